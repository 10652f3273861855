//! Bridge configuration.
//!
//! Parameter names follow the host's component parameters (`printFrequency`,
//! `repeats`, ...). Values can come from a host-style string map or a JSON file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::protocol::FrameFormat;
use crate::error::ConfigError;

pub const DEFAULT_PRINT_FREQUENCY: u64 = 5;
pub const DEFAULT_REPEATS: u64 = 10;
pub const DEFAULT_INPUT_PIPE: &str = "/tmp/input";
pub const DEFAULT_OUTPUT_PIPE: &str = "/tmp/output";

/// Simulator harness the frame layout is taken from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Pyrtl,
    Chisel,
}

impl Protocol {
    pub fn frame_format(&self) -> FrameFormat {
        match self {
            Protocol::Pyrtl => FrameFormat::PYRTL,
            Protocol::Chisel => FrameFormat::CHISEL,
        }
    }
}

/// How the bridge decides the pipes are ready to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Pipes were created by an external setup step; fail at once if absent.
    AssumePresent,
    /// Wait for the simulator to create the pipes, under the retry policy.
    #[default]
    PollUntilPresent,
}

/// Backoff policy for `Readiness::PollUntilPresent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// `None` waits forever.
    pub max_wait_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 10,
            max_backoff_ms: 500,
            max_wait_ms: Some(60_000),
        }
    }
}

impl RetryPolicy {
    /// Poll without a deadline.
    pub fn unbounded() -> Self {
        Self {
            max_wait_ms: None,
            ..Self::default()
        }
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms.max(1))
    }

    /// Doubles `current`, capped at `max_backoff_ms`.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        let cap = Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms).max(1));
        current.saturating_mul(2).min(cap)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }
}

/// Configuration of one bridge instance. Immutable once the bridge is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Cycles between load commands.
    pub print_frequency: u64,
    /// Total cycles to drive. Zero runs until the host stops the simulation.
    #[serde(rename = "repeats")]
    pub repeat_limit: u64,
    /// Host -> simulator pipe.
    pub input_pipe: PathBuf,
    /// Simulator -> host pipe.
    pub output_pipe: PathBuf,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_newline: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_len: Option<usize>,
    /// Require full-width responses instead of taking one read of up to `responseLen`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_response: Option<bool>,
    pub readiness: Readiness,
    pub retry: RetryPolicy,
    /// `mkfifo` both pipes before opening them.
    pub create_pipes: bool,
    /// Unlink both pipes at teardown.
    pub remove_pipes: bool,
    /// Stimulus seed. Drawn from OS entropy when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Bound on each response wait. Unset blocks until the peer writes or closes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
    /// Simulator to launch during setup, as an argv list.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub peer_command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_cwd: Option<PathBuf>,
    pub peer_exit_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            print_frequency: DEFAULT_PRINT_FREQUENCY,
            repeat_limit: DEFAULT_REPEATS,
            input_pipe: PathBuf::from(DEFAULT_INPUT_PIPE),
            output_pipe: PathBuf::from(DEFAULT_OUTPUT_PIPE),
            protocol: Protocol::Pyrtl,
            command_newline: None,
            response_len: None,
            exact_response: None,
            readiness: Readiness::PollUntilPresent,
            retry: RetryPolicy::default(),
            create_pipes: false,
            remove_pipes: false,
            seed: None,
            read_timeout_ms: None,
            peer_command: Vec::new(),
            peer_cwd: None,
            peer_exit_timeout_ms: 5_000,
        }
    }
}

impl BridgeConfig {
    /// PyRTL harness: the simulator creates the pipes, the bridge polls for them.
    pub fn pyrtl() -> Self {
        Self::default()
    }

    /// Chisel harness: the bridge creates and removes the pipes itself and
    /// terminates commands with a newline.
    pub fn chisel() -> Self {
        Self {
            protocol: Protocol::Chisel,
            readiness: Readiness::AssumePresent,
            create_pipes: true,
            remove_pipes: true,
            ..Self::default()
        }
    }

    /// Build from host-style string parameters over the defaults.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::default().merge_params(params)
    }

    /// Apply host-style string parameters on top of this config.
    ///
    /// Each value is read as JSON when it parses as JSON (`"5"`, `"true"`,
    /// `"[\"sbt\", \"test\"]"`), otherwise taken as a plain string (paths).
    pub fn merge_params(self, params: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut map = match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (key, raw) in params {
            let value = serde_json::from_str::<serde_json::Value>(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
            map.insert(key.clone(), value);
        }
        let config: Self = serde_json::from_value(serde_json::Value::Object(map))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.print_frequency == 0 {
            return Err(ConfigError::ZeroPrintFrequency);
        }
        if self.response_len == Some(0) {
            return Err(ConfigError::ZeroResponseLen);
        }
        if self.input_pipe == self.output_pipe {
            return Err(ConfigError::SamePipePath(self.input_pipe.clone()));
        }
        Ok(())
    }

    /// Protocol preset with any per-field overrides applied.
    pub fn frame_format(&self) -> FrameFormat {
        let mut format = self.protocol.frame_format();
        if let Some(newline) = self.command_newline {
            format.command_newline = newline;
        }
        if let Some(len) = self.response_len {
            format.response_len = len;
        }
        if let Some(exact) = self.exact_response {
            format.exact_response = exact;
        }
        format
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn peer_exit_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_exit_timeout_ms)
    }

    pub fn with_pipes(mut self, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        self.input_pipe = input.into();
        self.output_pipe = output.into();
        self
    }

    pub fn with_repeats(mut self, repeats: u64) -> Self {
        self.repeat_limit = repeats;
        self
    }

    pub fn with_print_frequency(mut self, frequency: u64) -> Self {
        self.print_frequency = frequency;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_peer_command(mut self, argv: Vec<String>) -> Self {
        self.peer_command = argv;
        self
    }
}
