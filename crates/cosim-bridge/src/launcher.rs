//! External simulator subprocess.
//!
//! The simulator is normally started next to the host (e.g. `sbt testOnly ...`
//! from the run script). When `peerCommand` is set the bridge starts it itself,
//! before connecting, so the simulator can create and open its end of the pipes.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::config::BridgeConfig;
use crate::error::LaunchError;

/// Handle to a simulator process started by the bridge.
pub struct PeerProcess {
    program: String,
    child: Child,
}

impl PeerProcess {
    /// Spawn the configured command. Returns `None` when no command is configured.
    pub fn spawn(config: &BridgeConfig) -> Result<Option<Self>, LaunchError> {
        let Some((program, args)) = config.peer_command.split_first() else {
            return Ok(None);
        };
        if program.is_empty() {
            return Err(LaunchError::EmptyCommand);
        }

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(ref cwd) = config.peer_cwd {
            command.current_dir(cwd);
        }

        let child = command.spawn().map_err(|source| LaunchError::Spawn {
            program: program.clone(),
            source,
        })?;

        tracing::info!(program = %program, pid = ?child.id(), "Spawned simulator");
        Ok(Some(Self {
            program: program.clone(),
            child,
        }))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait up to `grace` for the simulator to exit after the quit marker, then kill it.
    pub async fn shutdown(mut self, grace: Duration) {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(program = %self.program, %status, "Simulator exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(program = %self.program, error = %e, "Failed to wait for simulator");
            }
            Err(_) => {
                tracing::warn!(
                    program = %self.program,
                    grace_ms = grace.as_millis() as u64,
                    "Simulator did not exit, killing"
                );
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(program = %self.program, error = %e, "Failed to kill simulator");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_command_spawns_nothing() {
        let config = BridgeConfig::default();
        assert!(PeerProcess::spawn(&config).unwrap().is_none());
    }

    #[test]
    fn empty_program_is_rejected() {
        let config = BridgeConfig::default().with_peer_command(vec![String::new()]);
        assert!(matches!(
            PeerProcess::spawn(&config),
            Err(LaunchError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn missing_program_names_it() {
        let config = BridgeConfig::default()
            .with_peer_command(vec!["/nonexistent/simulator".to_string()]);
        let err = PeerProcess::spawn(&config).err().unwrap();
        assert!(err.to_string().contains("/nonexistent/simulator"));
    }

    #[tokio::test]
    async fn exited_peer_shuts_down_cleanly() {
        let config = BridgeConfig::default().with_peer_command(vec!["true".to_string()]);
        let peer = PeerProcess::spawn(&config).unwrap().unwrap();
        assert!(peer.id().is_some());
        peer.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn hung_peer_is_killed_after_grace() {
        let config = BridgeConfig::default()
            .with_peer_command(vec!["sleep".to_string(), "30".to_string()]);
        let peer = PeerProcess::spawn(&config).unwrap().unwrap();

        let started = std::time::Instant::now();
        peer.shutdown(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
