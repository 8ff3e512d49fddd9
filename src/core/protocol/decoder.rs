//! Decoder capability shared by every frame kind

use super::layout::{FrameDefinition, ParsedFrame};
use super::modbus::{self, Frame};
use super::DecodeError;
use std::sync::Arc;

/// What a decoder handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderInfo {
    /// Decoder name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Fewest bytes the decoder can make sense of
    pub min_length: usize,
}

/// Output of a `FrameDecoder`
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// Modbus RTU frame
    Rtu(Frame),
    /// Declared-layout frame
    Layout(ParsedFrame),
}

impl DecodedFrame {
    /// Integrity check passed and every field was read
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Rtu(frame) => frame.valid,
            Self::Layout(parsed) => parsed.valid,
        }
    }
}

/// A frame kind that turns bytes into a structured result
pub trait FrameDecoder: Send + Sync {
    /// Decode one buffer
    fn decode(&self, data: &[u8]) -> Result<DecodedFrame, DecodeError>;

    /// Describe this decoder
    fn describe(&self) -> DecoderInfo;
}

/// Modbus RTU decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct RtuDecoder;

impl FrameDecoder for RtuDecoder {
    fn decode(&self, data: &[u8]) -> Result<DecodedFrame, DecodeError> {
        modbus::decode(data)
            .map(|frame| DecodedFrame::Rtu(frame.with_detail()))
            .ok_or(DecodeError::TooShort {
                needed: modbus::MIN_FRAME_LEN,
                actual: data.len(),
            })
    }

    fn describe(&self) -> DecoderInfo {
        DecoderInfo {
            name: "Modbus RTU".to_string(),
            description: "Unit id, function code, payload and CRC-16".to_string(),
            min_length: modbus::MIN_FRAME_LEN,
        }
    }
}

/// Decoder for one registered `FrameDefinition`
#[derive(Debug, Clone)]
pub struct LayoutDecoder {
    definition: Arc<FrameDefinition>,
}

impl LayoutDecoder {
    /// Wrap a definition
    pub fn new(definition: Arc<FrameDefinition>) -> Self {
        Self { definition }
    }

    /// The wrapped definition
    pub fn definition(&self) -> &FrameDefinition {
        &self.definition
    }
}

impl FrameDecoder for LayoutDecoder {
    // Short input is reported inside the ParsedFrame, alongside the fields read
    fn decode(&self, data: &[u8]) -> Result<DecodedFrame, DecodeError> {
        Ok(DecodedFrame::Layout(self.definition.parse(data)))
    }

    fn describe(&self) -> DecoderInfo {
        let fields = self
            .definition
            .fields
            .iter()
            .map(|f| format!("{} {}", f.field_type, f.name))
            .collect::<Vec<_>>()
            .join(", ");
        DecoderInfo {
            name: self.definition.name.clone(),
            description: if self.definition.description.is_empty() {
                fields
            } else {
                format!("{} [{fields}]", self.definition.description)
            },
            min_length: self.definition.size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::layout::sample_definition;

    #[test]
    fn test_rtu_decoder() {
        let decoder = RtuDecoder;
        assert_eq!(
            decoder.decode(&[1, 2]),
            Err(DecodeError::TooShort { needed: 4, actual: 2 })
        );

        let decoded = decoder.decode(&modbus::read_holding_registers(1, 0, 10)).unwrap();
        assert!(decoded.is_valid());
        match decoded {
            DecodedFrame::Rtu(frame) => assert!(frame.detail.is_some()),
            DecodedFrame::Layout(_) => panic!("wrong frame kind"),
        }
    }

    #[test]
    fn test_layout_decoder_describe() {
        let decoder = LayoutDecoder::new(Arc::new(sample_definition()));
        let info = decoder.describe();
        assert_eq!(info.name, "Sample Frame");
        assert_eq!(info.min_length, 14);
        assert!(info.description.contains("bytes(10) data"));

        let decoded = decoder.decode(&[0xAA]).unwrap();
        assert!(!decoded.is_valid());
    }
}
