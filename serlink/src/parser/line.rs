//! Newline-delimited text lines.

use log::trace;

use crate::dispatch::PacketSink;
use crate::parser::{FrameParser, ParseSignal};

/// Default upper bound on a line's length in bytes.
pub const DEFAULT_MAX_LINE: usize = 4096;

/// Parser emitting each non-empty line as a `String`.
///
/// Lines end at `\n`; a trailing `\r` is removed. Invalid UTF-8 is replaced
/// with U+FFFD. A line exceeding the limit is discarded up to its newline.
#[derive(Debug)]
pub struct LineParser {
    sink: PacketSink,
    buffer: Vec<u8>,
    max_len: usize,
    overflowed: bool,
}

impl LineParser {
    /// Create a parser with the default line limit.
    pub fn new(sink: PacketSink) -> Self {
        Self::with_max_len(sink, DEFAULT_MAX_LINE)
    }

    /// Create a parser with a custom line limit.
    pub fn with_max_len(sink: PacketSink, max_len: usize) -> Self {
        Self {
            sink,
            buffer: Vec::new(),
            max_len,
            overflowed: false,
        }
    }
}

impl FrameParser for LineParser {
    fn parse_byte(&mut self, byte: u8) -> ParseSignal {
        if byte != b'\n' {
            if self.overflowed {
                return ParseSignal::Incomplete;
            }
            if self.buffer.len() == self.max_len {
                trace!("Dropping line longer than {} bytes", self.max_len);
                self.buffer.clear();
                self.overflowed = true;
                return ParseSignal::FrameError;
            }
            self.buffer.push(byte);
            return ParseSignal::Incomplete;
        }

        if self.overflowed {
            self.overflowed = false;
            return ParseSignal::Incomplete;
        }

        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }
        if self.buffer.is_empty() {
            return ParseSignal::Incomplete;
        }

        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        self.sink.emit(line);
        ParseSignal::FrameComplete
    }
}
