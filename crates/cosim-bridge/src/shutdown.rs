//! Teardown of one bridge: quit marker, pipe release, optional cleanup.
//!
//! Teardown failures never escalate. By the time the host tears the bridge down
//! the simulation result is decided, and the simulator may already be gone.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::bridge::protocol::Command;
use crate::bridge::transport::{Transport, remove_pipes};
use crate::config::BridgeConfig;
use crate::launcher::PeerProcess;

/// Runs the shutdown sequence at most once per bridge.
#[derive(Debug, Default)]
pub struct ShutdownSequencer {
    done: bool,
}

impl ShutdownSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Send the quit marker, close the transport, stop the peer, remove the pipes.
    ///
    /// Returns `false` without touching anything if the sequence already ran.
    pub async fn run<R, W>(
        &mut self,
        transport: Option<Transport<R, W>>,
        peer: Option<PeerProcess>,
        config: &BridgeConfig,
    ) -> bool
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if self.done {
            tracing::debug!("Shutdown already ran, ignoring");
            return false;
        }
        self.done = true;

        match transport {
            Some(mut transport) => {
                if let Err(e) = transport.write_frame(Command::Quit).await {
                    tracing::warn!(error = %e, "Failed to send quit marker");
                }
                if let Err(e) = transport.close().await {
                    tracing::warn!(error = %e, "Failed to close pipes");
                }
            }
            None => tracing::debug!("No pipes connected, skipping quit marker"),
        }

        if let Some(peer) = peer {
            peer.shutdown(config.peer_exit_timeout()).await;
        }

        if config.remove_pipes {
            remove_pipes(config);
        }

        true
    }
}
