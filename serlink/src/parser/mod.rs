//! Byte-stream frame parsers.
//!
//! A [`FrameParser`] is fed one byte at a time, in arrival order, and answers
//! with a [`ParseSignal`]. When a frame completes the parser emits the decoded
//! value through the [`PacketSink`](crate::dispatch::PacketSink) it was built
//! with; the caller never extracts payloads itself. Parsers resynchronise on
//! their own after a terminal byte or a protocol error.
//!
//! Parsers are selected by id through a [`ParserRegistry`].

pub mod line;
pub mod mind;
pub mod registry;
pub mod simple;

pub use line::LineParser;
pub use mind::{MindData, MindParser};
pub use registry::{DEFAULT_PARSER, ParserFactory, ParserRegistry};
pub use simple::{SimpleFrame, SimpleParser};

/// Outcome of feeding one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseSignal {
    /// More bytes are needed.
    Incomplete,
    /// A frame completed and its payload was emitted.
    FrameComplete,
    /// The byte violated the protocol; the parser has resynchronised.
    FrameError,
}

/// Incremental decoder for one framing protocol.
pub trait FrameParser: Send {
    /// Feed one byte.
    fn parse_byte(&mut self, byte: u8) -> ParseSignal;

    /// Feed a slice byte by byte, returning how many frames completed.
    fn parse_bytes(&mut self, bytes: &[u8]) -> usize {
        bytes
            .iter()
            .filter(|&&b| self.parse_byte(b) == ParseSignal::FrameComplete)
            .count()
    }
}
