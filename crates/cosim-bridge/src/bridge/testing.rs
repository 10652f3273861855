//! Test doubles for the simulator side of the pipes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use super::protocol::{FrameFormat, QUIT_MARKER};
use super::transport::create_fifo;

/// Create `input` and `output` FIFOs in `dir`.
pub(crate) fn make_fifos(dir: &Path) -> (PathBuf, PathBuf) {
    let input = dir.join("input");
    let output = dir.join("output");
    create_fifo(&input).unwrap();
    create_fifo(&output).unwrap();
    (input, output)
}

/// What the fake simulator saw before the host closed its end.
#[derive(Debug, Default)]
pub(crate) struct PeerLog {
    pub commands: Vec<Vec<u8>>,
    pub quits: usize,
    /// Bytes received after the first quit marker.
    pub trailing_bytes: usize,
}

/// 8-bit loadable counter behind a pair of FIFOs, in a plain thread.
///
/// Opens its ends in the PyRTL harness order (output for writing, then input for
/// reading). Each command `"Lhh"` either loads `hh` (L = 1) or increments, and the
/// new counter value is written back in one write: zero-padded hex for formats
/// with exact-width responses, Python `hex()` text (`0x0` .. `0xff`) otherwise.
pub(crate) struct FakeCounter {
    handle: JoinHandle<PeerLog>,
}

impl FakeCounter {
    pub fn spawn(input: &Path, output: &Path, format: FrameFormat) -> Self {
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        let handle = std::thread::spawn(move || {
            let mut tx = OpenOptions::new().write(true).open(&output).unwrap();
            let mut rx = File::open(&input).unwrap();
            run_counter(&mut rx, &mut tx, format)
        });
        Self { handle }
    }

    /// Read `read_len` bytes, answer with `reply`, then close both ends.
    pub fn spawn_then_hang_up(
        input: &Path,
        output: &Path,
        read_len: usize,
        reply: &'static [u8],
    ) -> JoinHandle<()> {
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        std::thread::spawn(move || {
            let mut tx = OpenOptions::new().write(true).open(&output).unwrap();
            let mut rx = File::open(&input).unwrap();
            let mut buf = vec![0u8; read_len];
            rx.read_exact(&mut buf).unwrap();
            tx.write_all(reply).unwrap();
        })
    }

    pub fn join(self) -> PeerLog {
        self.handle.join().unwrap()
    }
}

fn run_counter(rx: &mut File, tx: &mut File, format: FrameFormat) -> PeerLog {
    let mut log = PeerLog::default();
    let mut counter: u8 = 0;

    loop {
        let mut first = [0u8; 1];
        if rx.read(&mut first).unwrap() == 0 {
            return log;
        }
        if first[0] == QUIT_MARKER {
            log.quits += 1;
            let mut rest = Vec::new();
            rx.read_to_end(&mut rest).unwrap();
            log.trailing_bytes = rest.len();
            log.quits += rest.iter().filter(|b| **b == QUIT_MARKER).count();
            return log;
        }

        let mut frame = vec![first[0]; format.command_len()];
        rx.read_exact(&mut frame[1..]).unwrap();
        let text = std::str::from_utf8(&frame[..3]).unwrap();
        let load = &text[..1] == "1";
        let data = u8::from_str_radix(&text[1..3], 16).unwrap();
        counter = if load { data } else { counter.wrapping_add(1) };
        log.commands.push(frame[..3].to_vec());

        let reply = if format.exact_response {
            format!("{counter:0width$x}", width = format.response_len)
        } else {
            format!("{counter:#x}")
        };
        tx.write_all(reply.as_bytes()).unwrap();
    }
}
