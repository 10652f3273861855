//! Lock-step driver: one command/response exchange per host clock cycle.
//!
//! Flow:
//! 1. `setup()`: spawn the simulator (if configured), connect the pipes
//! 2. `clock_tick()` once per cycle: build command, write, read, count
//! 3. `finish()`: quit marker, release the pipes
//!
//! Frame N's write always precedes frame N's read, which precedes frame N+1's
//! write. Nothing is pipelined.

use std::fmt;
use std::num::NonZeroU64;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bridge::transport::{Connector, PipeConnector, Transport};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, ConfigError};
use crate::host::{Component, Tick};
use crate::launcher::PeerProcess;
use crate::shutdown::ShutdownSequencer;
use crate::stimulus::Stimulus;

/// Lifecycle of a bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    /// Built, host setup not called yet
    #[default]
    NotStarted,
    /// Launching the simulator / opening the pipes
    Connecting,
    /// Exchanging one frame pair per cycle
    Running,
    /// Repeat limit reached or the pipes failed, waiting for host teardown
    Terminating,
    /// Pipes released
    Closed,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cycle counters, owned by the driver alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleState {
    pub current_cycle: u64,
    pub repeats_completed: u64,
}

/// Bridge component driving one external simulator over one pipe pair.
pub struct Bridge<C: Connector = PipeConnector> {
    name: String,
    config: BridgeConfig,
    connector: C,
    state: BridgeState,
    cycles: CycleState,
    stimulus: Stimulus,
    transport: Option<Transport<C::Reader, C::Writer>>,
    peer: Option<PeerProcess>,
    shutdown: ShutdownSequencer,
}

impl Bridge<PipeConnector> {
    pub fn new(name: impl Into<String>, config: BridgeConfig) -> Result<Self, ConfigError> {
        Self::with_connector(name, config, PipeConnector)
    }
}

impl<C: Connector> Bridge<C> {
    pub fn with_connector(
        name: impl Into<String>,
        config: BridgeConfig,
        connector: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let print_frequency =
            NonZeroU64::new(config.print_frequency).ok_or(ConfigError::ZeroPrintFrequency)?;
        let name = name.into();
        tracing::debug!(
            bridge = %name,
            repeats = config.repeat_limit,
            print_frequency = config.print_frequency,
            "Bridge configured"
        );
        Ok(Self {
            stimulus: Stimulus::new(print_frequency, config.seed),
            name,
            config,
            connector,
            state: BridgeState::NotStarted,
            cycles: CycleState::default(),
            transport: None,
            peer: None,
            shutdown: ShutdownSequencer::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn cycle_state(&self) -> CycleState {
        self.cycles
    }

    /// Launch the simulator if configured and open the pipes.
    pub async fn setup(&mut self) -> Result<(), BridgeError> {
        if self.state != BridgeState::NotStarted {
            return Err(BridgeError::InvalidState {
                operation: "setup",
                state: self.state,
            });
        }
        self.state = BridgeState::Connecting;
        tracing::info!(bridge = %self.name, "Connecting to simulator");

        self.peer = PeerProcess::spawn(&self.config)?;
        let transport = self.connector.connect(&self.config).await?;

        self.transport = Some(transport);
        self.cycles = CycleState::default();
        self.state = BridgeState::Running;
        tracing::info!(bridge = %self.name, "Bridge running");
        Ok(())
    }

    /// One lock-step exchange. Returns `Tick::Done` on the cycle that completes
    /// the repeat limit.
    pub async fn clock_tick(&mut self, host_cycle: u64) -> Result<Tick, BridgeError> {
        let transport = match (self.state, self.transport.as_mut()) {
            (BridgeState::Running, Some(transport)) => transport,
            (state, _) => {
                return Err(BridgeError::InvalidState {
                    operation: "clock_tick",
                    state,
                });
            }
        };

        let cycle = self.cycles.current_cycle;
        let command = self.stimulus.encode_command(cycle);

        let response = match transport.exchange(command).await {
            Ok(response) => response,
            Err(source) => {
                // The stream is out of step with the simulator; no further exchange.
                tracing::error!(
                    bridge = %self.name,
                    cycle,
                    host_cycle,
                    error = %source,
                    "Pipe exchange failed"
                );
                self.state = BridgeState::Terminating;
                return Err(BridgeError::Transport { cycle, source });
            }
        };

        tracing::info!(
            bridge = %self.name,
            cycle,
            host_cycle,
            sent = %command,
            received = %response,
            counter = ?response.counter_value(),
            "Cycle complete"
        );

        self.cycles.current_cycle += 1;
        self.cycles.repeats_completed += 1;

        if self.cycles.repeats_completed == self.config.repeat_limit {
            tracing::info!(
                bridge = %self.name,
                repeats = self.cycles.repeats_completed,
                "Repeat limit reached"
            );
            self.state = BridgeState::Terminating;
            Ok(Tick::Done)
        } else {
            Ok(Tick::Continue)
        }
    }

    /// Host teardown. Safe to call from any state, any number of times.
    pub async fn finish(&mut self) {
        if self.state == BridgeState::Closed {
            tracing::debug!(bridge = %self.name, "Bridge already closed");
            return;
        }
        if self.state != BridgeState::NotStarted {
            self.state = BridgeState::Terminating;
        }

        let transport = self.transport.take();
        let peer = self.peer.take();
        if self.shutdown.run(transport, peer, &self.config).await {
            tracing::info!(
                bridge = %self.name,
                repeats = self.cycles.repeats_completed,
                "Bridge finished"
            );
        }
        self.state = BridgeState::Closed;
    }
}

#[async_trait]
impl<C> Component for Bridge<C>
where
    C: Connector + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&mut self) -> Result<(), BridgeError> {
        Bridge::setup(self).await
    }

    async fn clock_tick(&mut self, cycle: u64) -> Result<Tick, BridgeError> {
        Bridge::clock_tick(self, cycle).await
    }

    async fn finish(&mut self) {
        Bridge::finish(self).await
    }
}
