use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Invalid bridge configuration. Detected before the simulation starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("printFrequency must be greater than zero")]
    ZeroPrintFrequency,

    #[error("responseLen must be greater than zero")]
    ZeroResponseLen,

    #[error("input and output pipes must be different paths (both are {0})")]
    SamePipePath(PathBuf),

    #[error("invalid parameters: {0}")]
    InvalidParams(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure while establishing the pipe pair. Always fatal.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("pipe {0} does not exist")]
    Missing(PathBuf),

    #[error("{0} exists but is not a FIFO")]
    NotAFifo(PathBuf),

    #[error("failed to create FIFO {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("gave up waiting for {path} after {waited:?}")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("pipe open task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Steady-state I/O failure on an established pipe pair.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("short write: input pipe accepted no more bytes")]
    ShortWrite,

    #[error("short read: expected {expected} bytes, got {got} before end of stream")]
    ShortRead { expected: usize, got: usize },

    #[error("peer closed the pipe")]
    PeerClosed,

    #[error("no response within {0:?}")]
    ReadTimeout(Duration),

    #[error("pipe I/O failed: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WriteZero => TransportError::ShortWrite,
            io::ErrorKind::BrokenPipe => TransportError::PeerClosed,
            io::ErrorKind::UnexpectedEof => TransportError::PeerClosed,
            _ => TransportError::Io(e),
        }
    }
}

/// Failure to start the external simulator process.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("peer command is empty")]
    EmptyCommand,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced by a bridge to the host engine.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect to simulator: {0}")]
    Connect(#[from] ConnectError),

    #[error("failed to launch simulator: {0}")]
    Launch(#[from] LaunchError),

    #[error("cycle {cycle}: {source}")]
    Transport {
        cycle: u64,
        #[source]
        source: TransportError,
    },

    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::driver::BridgeState,
    },
}

impl BridgeError {
    /// Cycle at which a steady-state failure occurred, if any.
    pub fn cycle(&self) -> Option<u64> {
        match self {
            BridgeError::Transport { cycle, .. } => Some(*cycle),
            _ => None,
        }
    }
}
