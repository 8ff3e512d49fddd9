//! Frame decoding
//!
//! Provides:
//! - Modbus RTU frames with CRC-16 validation
//! - User-declared fixed-layout frames with an optional trailer checksum
//! - A `FrameCodec` holding the registered layouts
//!
//! Decoding is pull-based: nothing here runs unless a caller asks for it.

pub mod checksum;
pub mod decoder;
pub mod layout;
pub mod modbus;

pub use checksum::{crc16_modbus, ChecksumType};
pub use decoder::{DecodedFrame, DecoderInfo, FrameDecoder, LayoutDecoder, RtuDecoder};
pub use layout::{FieldDef, FieldType, FieldValue, FrameDefinition, ParsedField, ParsedFrame};
pub use modbus::{Frame, FrameDetail, FunctionCode, ReadRequest, RegisterResponse};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Decode errors. Returned as values, never fatal.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer shorter than the smallest frame
    #[error("Frame too short: need at least {needed} bytes, got {actual}")]
    TooShort {
        /// Minimum length
        needed: usize,
        /// Supplied length
        actual: usize,
    },

    /// A declared field does not fit in the remaining bytes
    #[error("Cannot read field '{field}' at offset {offset}: needs {needed} bytes, {available} left")]
    InsufficientBytes {
        /// Field name
        field: String,
        /// Field offset
        offset: usize,
        /// Field width
        needed: usize,
        /// Bytes remaining
        available: usize,
    },

    /// Payload length does not fit the function
    #[error("Length mismatch in {what}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// What was measured
        what: String,
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Declared byte count disagrees with the payload
    #[error("Byte count mismatch: declared {declared}, payload carries {actual}")]
    ByteCountMismatch {
        /// Byte count field
        declared: u8,
        /// Bytes following it
        actual: usize,
    },

    /// Function code outside the known set
    #[error("Unknown function code 0x{0:02X}")]
    UnknownFunction(u8),

    /// Payload admits more than one reading
    #[error("Ambiguous frame: {0}")]
    Ambiguous(String),

    /// Field type name not recognized
    #[error("Unknown field type: {0}")]
    UnknownFieldType(String),

    /// No definition under that name
    #[error("Unknown frame definition: {0}")]
    UnknownDefinition(String),

    /// A definition with that name is already registered
    #[error("Frame definition already registered: {0}")]
    DefinitionExists(String),
}

/// Registered frame layouts, looked up by name
#[derive(Debug, Default)]
pub struct FrameCodec {
    definitions: RwLock<HashMap<String, Arc<FrameDefinition>>>,
}

impl FrameCodec {
    /// Empty codec
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layout under its name
    pub fn register(&self, definition: FrameDefinition) -> Result<Arc<FrameDefinition>, DecodeError> {
        let mut definitions = self.definitions.write();
        if definitions.contains_key(&definition.name) {
            return Err(DecodeError::DefinitionExists(definition.name));
        }
        debug!(frame = %definition.name, size = definition.size(), "Registered frame definition");
        let definition = Arc::new(definition);
        definitions.insert(definition.name.clone(), Arc::clone(&definition));
        Ok(definition)
    }

    /// Remove a layout
    pub fn unregister(&self, name: &str) -> Option<Arc<FrameDefinition>> {
        self.definitions.write().remove(name)
    }

    /// Look up a layout
    pub fn definition(&self, name: &str) -> Option<Arc<FrameDefinition>> {
        self.definitions.read().get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Parse bytes against a registered layout
    pub fn parse(&self, data: &[u8], definition_name: &str) -> Result<ParsedFrame, DecodeError> {
        self.definition(definition_name)
            .map(|def| def.parse(data))
            .ok_or_else(|| DecodeError::UnknownDefinition(definition_name.to_string()))
    }

    /// Decode a Modbus RTU frame with its function-specific reading
    pub fn decode_rtu(&self, data: &[u8]) -> Option<Frame> {
        modbus::decode(data).map(Frame::with_detail)
    }

    /// Decoder for a registered layout
    pub fn decoder(&self, name: &str) -> Option<LayoutDecoder> {
        self.definition(name).map(LayoutDecoder::new)
    }

    /// Every available decoder: RTU first, then the layouts by name
    pub fn decoders(&self) -> Vec<Box<dyn FrameDecoder>> {
        let mut decoders: Vec<Box<dyn FrameDecoder>> = vec![Box::new(RtuDecoder)];
        for name in self.names() {
            if let Some(decoder) = self.decoder(&name) {
                decoders.push(Box::new(decoder));
            }
        }
        decoders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_parse() {
        let codec = FrameCodec::new();
        codec.register(layout::sample_definition()).unwrap();
        assert_eq!(
            codec.register(layout::sample_definition()),
            Err(DecodeError::DefinitionExists("Sample Frame".to_string()))
        );
        assert_eq!(codec.names(), vec!["Sample Frame".to_string()]);

        let parsed = codec.parse(&[0xAA, 0x01], "Sample Frame").unwrap();
        assert_eq!(parsed.fields.len(), 2);

        assert_eq!(
            codec.parse(&[0xAA], "missing"),
            Err(DecodeError::UnknownDefinition("missing".to_string()))
        );
    }

    #[test]
    fn test_unregister() {
        let codec = FrameCodec::new();
        codec.register(FrameDefinition::new("one").field("a", FieldType::U8, "")).unwrap();
        assert!(codec.unregister("one").is_some());
        assert!(codec.unregister("one").is_none());
        assert_eq!(codec.decoders().len(), 1);
    }
}
