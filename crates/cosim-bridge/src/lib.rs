//! cosim-bridge: lock-step named-pipe bridge between a discrete-event simulation
//! host and an external hardware simulator.

mod launcher;
mod shutdown;
mod stimulus;

pub mod bridge;
pub mod config;
pub mod driver;
pub mod error;
pub mod host;
pub mod logging;

pub use bridge::protocol::{Command, FrameFormat, ResponseFrame};
pub use bridge::transport::{Connector, PipeConnector, PipeTransport, Transport};
pub use config::{BridgeConfig, Protocol, Readiness, RetryPolicy};
pub use driver::{Bridge, BridgeState, CycleState};
pub use error::{BridgeError, ConfigError, ConnectError, LaunchError, TransportError};
pub use host::{Component, Simulation, SimulationError, SimulationReport, Tick};
pub use launcher::PeerProcess;
pub use shutdown::ShutdownSequencer;
pub use stimulus::Stimulus;
