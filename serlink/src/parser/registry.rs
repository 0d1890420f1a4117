//! Parser lookup by id.

use std::collections::BTreeMap;

use log::debug;

use crate::dispatch::PacketSink;
use crate::error::{Error, Result};
use crate::parser::{FrameParser, LineParser, MindParser, SimpleParser};

/// Builds a parser that emits into the given sink.
pub type ParserFactory = fn(PacketSink) -> Box<dyn FrameParser>;

/// Id of the reference parser.
pub const DEFAULT_PARSER: &str = "simple";

/// Explicit map from parser id to constructor.
///
/// Build one at startup and share it with every session that needs it.
#[derive(Debug, Clone, Default)]
pub struct ParserRegistry {
    factories: BTreeMap<String, ParserFactory>,
}

impl ParserRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in parsers: `simple`, `mind` and `line`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_PARSER, |sink| Box::new(SimpleParser::new(sink)));
        registry.register("mind", |sink| Box::new(MindParser::new(sink)));
        registry.register("line", |sink| Box::new(LineParser::new(sink)));
        registry
    }

    /// Register (or replace) a parser under `id`.
    pub fn register(&mut self, id: impl Into<String>, factory: ParserFactory) {
        let id = id.into();
        if self.factories.insert(id.clone(), factory).is_some() {
            debug!("Replaced parser '{id}'");
        }
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate the parser registered under `id`.
    pub fn create(&self, id: &str, sink: PacketSink) -> Result<Box<dyn FrameParser>> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| Error::UnknownParser(id.to_string()))?;
        Ok(factory(sink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParseSignal, SimpleFrame};

    struct CountingParser {
        sink: PacketSink,
        seen: usize,
    }

    impl FrameParser for CountingParser {
        fn parse_byte(&mut self, _byte: u8) -> ParseSignal {
            self.seen += 1;
            self.sink.emit(self.seen);
            ParseSignal::FrameComplete
        }
    }

    #[test]
    fn test_builtin_names() {
        let registry = ParserRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["line", "mind", "simple"]);
        assert!(registry.contains("simple"));
    }

    #[test]
    fn test_create_builtin() {
        let registry = ParserRegistry::with_builtin();
        let (sink, out) = PacketSink::detached();
        let mut parser = registry.create("simple", sink).unwrap();
        assert_eq!(parser.parse_bytes(&[0xFB, 0x01, 0xBF]), 1);
        assert_eq!(out.drain_as::<SimpleFrame>(), vec![SimpleFrame { command: 1 }]);
    }

    #[test]
    fn test_unknown_parser() {
        let registry = ParserRegistry::with_builtin();
        let (sink, _out) = PacketSink::detached();
        let err = registry.create("SerialPortUtility.Nope", sink).err().unwrap();
        assert!(matches!(err, Error::UnknownParser(ref id) if id == "SerialPortUtility.Nope"));
    }

    #[test]
    fn test_register_custom_parser() {
        let mut registry = ParserRegistry::new();
        registry.register("count", |sink| Box::new(CountingParser { sink, seen: 0 }));

        let (sink, out) = PacketSink::detached();
        let mut parser = registry.create("count", sink).unwrap();
        assert_eq!(parser.parse_bytes(b"abc"), 3);
        assert_eq!(out.drain_as::<usize>(), vec![1, 2, 3]);
    }
}
