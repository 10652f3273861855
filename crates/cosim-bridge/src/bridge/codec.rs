//! Fixed-width frame codec for simulator communication.
//!
//! Commands go out as 3 (or 4, newline-terminated) ASCII bytes; responses come back
//! with no delimiter, either as exactly `response_len` bytes or as whatever one
//! read delivers up to that bound. Works over any AsyncRead/AsyncWrite (FIFOs,
//! duplex streams in tests).

use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::{Command, FrameFormat, ResponseFrame};
use crate::error::TransportError;

/// Codec for one bridge's frame layout. Used for both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    format: FrameFormat,
}

impl FrameCodec {
    pub fn new(format: FrameFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }
}

impl Decoder for FrameCodec {
    type Item = ResponseFrame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = self.format.response_len;
        // Lock-step means at most one reply is ever in flight, so anything
        // buffered belongs to the current frame.
        if !self.format.exact_response && !src.is_empty() {
            let frame = src.split_to(src.len().min(len)).freeze();
            return Ok(Some(ResponseFrame::new(frame)));
        }
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }
        let frame = src.split_to(len).freeze();
        Ok(Some(ResponseFrame::new(frame)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let got = src.len();
                src.clear();
                Err(TransportError::ShortRead {
                    expected: self.format.response_len,
                    got,
                })
            }
        }
    }
}

impl Encoder<Command> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(self.format.command_len());
        item.write_to(&self.format, dst);
        tracing::trace!(command = %item, buffered = dst.len(), "Encoding frame");
        Ok(())
    }
}
