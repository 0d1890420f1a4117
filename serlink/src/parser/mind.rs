//! ThinkGear (brainwave headset) packet parser.
//!
//! Packet layout:
//!
//! ```text
//! 0xAA 0xAA PLENGTH PAYLOAD[PLENGTH] CHECKSUM
//! ```
//!
//! `CHECKSUM` is the inverted low byte of the payload sum. The payload is a
//! sequence of data rows. Codes below `0x80` carry one value byte; codes from
//! `0x80` up carry a length byte followed by that many bytes. Leading `0x55`
//! bytes select extended code levels and are skipped.

use byteorder::{BigEndian, ByteOrder};
use log::trace;

use crate::dispatch::PacketSink;
use crate::parser::{FrameParser, ParseSignal};

const SYNC: u8 = 0xAA;
const EXCODE: u8 = 0x55;
const MAX_PAYLOAD: usize = 169;

const CODE_POOR_SIGNAL: u8 = 0x02;
const CODE_ATTENTION: u8 = 0x04;
const CODE_MEDITATION: u8 = 0x05;
const CODE_RAW_WAVE: u8 = 0x80;

/// Values decoded from one ThinkGear packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MindData {
    /// Poor-signal quality, 0 (good) to 200 (no contact).
    pub signal: Option<u8>,
    /// eSense attention, 0 to 100.
    pub attention: Option<u8>,
    /// eSense meditation, 0 to 100.
    pub meditation: Option<u8>,
    /// Raw wave sample.
    pub raw: Option<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Sync,
    SecondSync,
    Length,
    Payload,
    Checksum,
}

/// Parser for ThinkGear packets, emitting [`MindData`].
#[derive(Debug)]
pub struct MindParser {
    sink: PacketSink,
    state: State,
    length: usize,
    payload: Vec<u8>,
}

impl MindParser {
    /// Create a parser emitting into `sink`.
    pub fn new(sink: PacketSink) -> Self {
        Self {
            sink,
            state: State::Sync,
            length: 0,
            payload: Vec::with_capacity(MAX_PAYLOAD),
        }
    }

    fn reset(&mut self) {
        self.state = State::Sync;
        self.length = 0;
        self.payload.clear();
    }

    fn finish(&mut self, checksum: u8) -> ParseSignal {
        let sum = self
            .payload
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        let signal = if !sum != checksum {
            trace!("ThinkGear checksum mismatch: {:#04x} != {checksum:#04x}", !sum);
            ParseSignal::FrameError
        } else if let Some(data) = decode_rows(&self.payload) {
            self.sink.emit(data);
            ParseSignal::FrameComplete
        } else {
            trace!("Malformed ThinkGear payload");
            ParseSignal::FrameError
        };
        self.reset();
        signal
    }
}

impl FrameParser for MindParser {
    fn parse_byte(&mut self, byte: u8) -> ParseSignal {
        match self.state {
            State::Sync => {
                if byte == SYNC {
                    self.state = State::SecondSync;
                }
                ParseSignal::Incomplete
            },
            State::SecondSync => {
                self.state = if byte == SYNC { State::Length } else { State::Sync };
                ParseSignal::Incomplete
            },
            State::Length => {
                // Extra sync bytes before the length are allowed.
                if byte == SYNC {
                    return ParseSignal::Incomplete;
                }
                let length = usize::from(byte);
                if length > MAX_PAYLOAD {
                    self.reset();
                    return ParseSignal::FrameError;
                }
                self.length = length;
                self.state = if length == 0 {
                    State::Checksum
                } else {
                    State::Payload
                };
                ParseSignal::Incomplete
            },
            State::Payload => {
                self.payload.push(byte);
                if self.payload.len() == self.length {
                    self.state = State::Checksum;
                }
                ParseSignal::Incomplete
            },
            State::Checksum => self.finish(byte),
        }
    }
}

fn decode_rows(payload: &[u8]) -> Option<MindData> {
    let mut data = MindData::default();
    let mut i = 0;

    while i < payload.len() {
        while payload.get(i) == Some(&EXCODE) {
            i += 1;
        }
        let code = *payload.get(i)?;
        i += 1;

        let value = if code >= 0x80 {
            let len = usize::from(*payload.get(i)?);
            i += 1;
            let value = payload.get(i..i + len)?;
            i += len;
            value
        } else {
            let value = payload.get(i..=i)?;
            i += 1;
            value
        };

        match code {
            CODE_POOR_SIGNAL => data.signal = Some(value[0]),
            CODE_ATTENTION => data.attention = Some(value[0]),
            CODE_MEDITATION => data.meditation = Some(value[0]),
            CODE_RAW_WAVE if value.len() == 2 => data.raw = Some(BigEndian::read_i16(value)),
            _ => {},
        }
    }

    Some(data)
}
