//! Wire protocol types for host-simulator communication.
//!
//! Two pipes, one direction each:
//! - **Input pipe** (host -> simulator): fixed-width ASCII command frames, plus the
//!   one-byte quit marker at teardown
//! - **Output pipe** (simulator -> host): fixed-width ASCII-hex counter values

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::bytes::{BufMut, Bytes, BytesMut};

/// Opcode digit that tells the simulator to load the following byte.
pub const LOAD_OPCODE: u8 = b'1';

/// Frame sent on cycles that carry no stimulus.
pub const NOOP_FRAME: &[u8; 3] = b"000";

/// Single byte that tells the simulator to exit. Never acknowledged.
pub const QUIT_MARKER: u8 = b'q';

/// Width of a command frame before any terminator.
pub const COMMAND_LEN: usize = 3;

/// Command sent to the simulator on the input pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Command {
    /// Let the simulator advance one step without new input.
    Noop,
    /// Load a byte into the simulator's counter.
    Load(u8),
    /// Terminate the simulator.
    Quit,
}

impl Command {
    /// Serialize into `dst` using the given frame layout.
    ///
    /// `Quit` is always the bare marker byte: the simulators check the first byte of
    /// whatever they read and never wait for a terminator after it.
    pub fn write_to(&self, format: &FrameFormat, dst: &mut BytesMut) {
        match self {
            Command::Quit => {
                dst.put_u8(QUIT_MARKER);
                return;
            }
            Command::Noop => dst.put_slice(NOOP_FRAME),
            Command::Load(value) => {
                dst.put_u8(LOAD_OPCODE);
                dst.put_slice(format!("{value:02x}").as_bytes());
            }
        }
        if format.command_newline {
            dst.put_u8(b'\n');
        }
    }

    /// Encoded frame as owned bytes.
    pub fn to_frame(&self, format: &FrameFormat) -> Bytes {
        let mut buf = BytesMut::with_capacity(format.command_len());
        self.write_to(format, &mut buf);
        buf.freeze()
    }

    pub fn is_load(&self) -> bool {
        matches!(self, Command::Load(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Noop => f.write_str("000"),
            Command::Load(value) => write!(f, "1{value:02x}"),
            Command::Quit => f.write_str("q"),
        }
    }
}

/// Per-deployment frame layout.
///
/// The two shipped simulator harnesses disagree: the Chisel tester's line reader
/// hangs unless every command ends in a newline, the PyRTL loop reads exactly three
/// bytes. The PyRTL loop also answers with Python's unpadded `hex()` text, so its
/// replies are 3 or 4 bytes long. Neither side negotiates this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameFormat {
    /// Append `\n` to every command frame (not to the quit marker).
    pub command_newline: bool,
    /// Upper bound on the bytes in one response frame.
    pub response_len: usize,
    /// Wait for all `response_len` bytes. When false, whatever the peer's single
    /// write delivers (at most `response_len` bytes) is the frame.
    pub exact_response: bool,
}

impl FrameFormat {
    pub const PYRTL: FrameFormat = FrameFormat {
        command_newline: false,
        response_len: 4,
        exact_response: false,
    };

    pub const CHISEL: FrameFormat = FrameFormat {
        command_newline: true,
        response_len: 2,
        exact_response: true,
    };

    /// Number of bytes written for a `Noop` or `Load` frame.
    pub fn command_len(&self) -> usize {
        COMMAND_LEN + usize::from(self.command_newline)
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::PYRTL
    }
}

/// Raw response bytes read back from the simulator.
///
/// The content is the simulator's counter rendered as ASCII hex. Nothing is
/// validated here; only the length is guaranteed by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame(Bytes);

impl ResponseFrame {
    pub fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Best-effort parse of the counter value, for diagnostics only.
    ///
    /// Accepts an optional `0x` prefix and ignores trailing NULs and whitespace,
    /// since Python's `hex()` output is shorter than the frame for small values.
    pub fn counter_value(&self) -> Option<u64> {
        let text = std::str::from_utf8(&self.0).ok()?;
        let text = text.trim_end_matches(['\0', '\n', '\r', ' ']);
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        if digits.is_empty() {
            return None;
        }
        u64::from_str_radix(digits, 16).ok()
    }
}

impl From<&'static [u8]> for ResponseFrame {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

impl fmt::Display for ResponseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}
