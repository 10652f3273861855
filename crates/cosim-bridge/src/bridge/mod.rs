//! Named-pipe bridge between the host simulation and an external simulator.
//!
//! # Architecture
//!
//! - **protocol**: Frame types (Command, ResponseFrame, FrameFormat)
//! - **codec**: Fixed-width framing codec for AsyncRead/AsyncWrite
//! - **transport**: FIFO creation, readiness, opening, framed I/O

pub mod codec;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
