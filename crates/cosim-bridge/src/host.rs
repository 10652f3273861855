//! Minimal host engine: the clocked-component contract the bridge plugs into.
//!
//! The host calls `setup()` on every component, then `clock_tick()` once per cycle
//! on each component that has not reported `Done`, strictly in order, and never
//! starts the next call before the previous one returns. `finish()` runs on every
//! component at the end, including after a failure.

use async_trait::async_trait;

use crate::error::BridgeError;

/// Answer to one clock tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Keep ticking this component.
    Continue,
    /// This component's work is done; the simulation may end.
    Done,
}

/// A clocked simulation component.
#[async_trait]
pub trait Component: Send {
    fn name(&self) -> &str;

    /// Called once before the first cycle.
    async fn setup(&mut self) -> Result<(), BridgeError>;

    /// Called once per cycle until it returns `Tick::Done`.
    async fn clock_tick(&mut self, cycle: u64) -> Result<Tick, BridgeError>;

    /// Called once at the end of the simulation. Must not fail.
    async fn finish(&mut self);
}

#[derive(Debug, thiserror::Error)]
#[error("component {component}: {source}")]
pub struct SimulationError {
    pub component: String,
    #[source]
    pub source: BridgeError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationReport {
    /// Number of cycles driven.
    pub cycles: u64,
    /// The simulation hit `max_cycles` before every component was done.
    pub cycle_limit_hit: bool,
}

/// Drives a set of components from one clock.
#[derive(Default)]
pub struct Simulation {
    components: Vec<Box<dyn Component>>,
    max_cycles: Option<u64>,
}

impl Simulation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the simulation to end after `cycles` cycles.
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn add(&mut self, component: impl Component + 'static) -> &mut Self {
        self.components.push(Box::new(component));
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Run to completion. Every component is finished whatever the outcome.
    pub async fn run(&mut self) -> Result<SimulationReport, SimulationError> {
        let result = self.run_cycles().await;
        if let Err(ref e) = result {
            tracing::error!(error = %e, "Simulation failed");
        }
        for component in &mut self.components {
            component.finish().await;
        }
        result
    }

    async fn run_cycles(&mut self) -> Result<SimulationReport, SimulationError> {
        for component in &mut self.components {
            if let Err(source) = component.setup().await {
                return Err(SimulationError {
                    component: component.name().to_string(),
                    source,
                });
            }
        }

        let mut active = vec![true; self.components.len()];
        let mut cycle: u64 = 0;
        while active.iter().any(|a| *a) {
            if let Some(max) = self.max_cycles
                && cycle >= max
            {
                tracing::warn!(cycles = cycle, "Cycle limit reached, stopping simulation");
                return Ok(SimulationReport {
                    cycles: cycle,
                    cycle_limit_hit: true,
                });
            }

            for (component, active) in self.components.iter_mut().zip(active.iter_mut()) {
                if !*active {
                    continue;
                }
                match component.clock_tick(cycle).await {
                    Ok(Tick::Continue) => {}
                    Ok(Tick::Done) => {
                        tracing::debug!(component = component.name(), cycle, "Component done");
                        *active = false;
                    }
                    Err(source) => {
                        return Err(SimulationError {
                            component: component.name().to_string(),
                            source,
                        });
                    }
                }
            }
            cycle += 1;
        }

        tracing::info!(cycles = cycle, "Simulation complete");
        Ok(SimulationReport {
            cycles: cycle,
            cycle_limit_hit: false,
        })
    }
}
