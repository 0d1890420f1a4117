//! Three-byte command frames: `0xFB <command> 0xBF`.

use crate::dispatch::PacketSink;
use crate::parser::{FrameParser, ParseSignal};

/// Frame start marker.
pub const SYNC_BYTE: u8 = 0xFB;
/// Frame end marker.
pub const END_BYTE: u8 = 0xBF;

/// Decoded simple frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleFrame {
    /// Command byte carried by the frame.
    pub command: u8,
}

impl SimpleFrame {
    /// The frame's wire bytes.
    pub fn to_bytes(self) -> [u8; 3] {
        [SYNC_BYTE, self.command, END_BYTE]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitSync,
    AwaitCommand,
    AwaitEnd,
}

/// Parser for [`SimpleFrame`]s.
#[derive(Debug)]
pub struct SimpleParser {
    sink: PacketSink,
    state: State,
    command: u8,
}

impl SimpleParser {
    /// Create a parser emitting into `sink`.
    pub fn new(sink: PacketSink) -> Self {
        Self {
            sink,
            state: State::AwaitSync,
            command: 0,
        }
    }

    /// Whether the parser is waiting for a sync byte.
    pub fn is_synchronising(&self) -> bool {
        self.state == State::AwaitSync
    }
}

impl FrameParser for SimpleParser {
    fn parse_byte(&mut self, byte: u8) -> ParseSignal {
        match self.state {
            State::AwaitSync => {
                if byte == SYNC_BYTE {
                    self.state = State::AwaitCommand;
                }
                ParseSignal::Incomplete
            },
            State::AwaitCommand => {
                self.command = byte;
                self.state = State::AwaitEnd;
                ParseSignal::Incomplete
            },
            State::AwaitEnd => {
                self.state = State::AwaitSync;
                if byte == END_BYTE {
                    self.sink.emit(SimpleFrame {
                        command: self.command,
                    });
                    ParseSignal::FrameComplete
                } else {
                    ParseSignal::FrameError
                }
            },
        }
    }
}
