//! User-declared fixed-layout frames
//!
//! A `FrameDefinition` is an ordered list of fixed-width fields. Offsets
//! follow from the preceding field widths alone, so the layout has no gaps
//! and no overlap. Multi-byte numbers are big-endian.

use super::checksum::ChecksumType;
use super::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    /// Unsigned 8-bit integer
    #[serde(alias = "uint8")]
    U8,
    /// Unsigned 16-bit integer
    #[serde(alias = "uint16")]
    U16,
    /// Unsigned 32-bit integer
    #[serde(alias = "uint32")]
    U32,
    /// Signed 8-bit integer
    #[serde(alias = "int8")]
    I8,
    /// Signed 16-bit integer
    #[serde(alias = "int16")]
    I16,
    /// Signed 32-bit integer
    #[serde(alias = "int32")]
    I32,
    /// 32-bit float
    #[serde(alias = "float")]
    F32,
    /// Fixed-length byte array
    Bytes {
        /// Width in bytes
        size: usize,
    },
    /// Fixed-length text, decoded lossily
    #[serde(alias = "string")]
    Text {
        /// Width in bytes
        size: usize,
    },
}

impl FieldType {
    /// Width in bytes
    pub fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::Bytes { size } | Self::Text { size } => size,
        }
    }

    fn read(self, raw: &[u8]) -> FieldValue {
        match self {
            Self::U8 => FieldValue::U8(raw[0]),
            Self::I8 => FieldValue::I8(i8::from_be_bytes([raw[0]])),
            Self::U16 => FieldValue::U16(u16::from_be_bytes([raw[0], raw[1]])),
            Self::I16 => FieldValue::I16(i16::from_be_bytes([raw[0], raw[1]])),
            Self::U32 => FieldValue::U32(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
            Self::I32 => FieldValue::I32(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
            Self::F32 => FieldValue::F32(f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
            Self::Bytes { .. } => FieldValue::Bytes(raw.to_vec()),
            Self::Text { .. } => FieldValue::Text(String::from_utf8_lossy(raw).into_owned()),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8 => write!(f, "u8"),
            Self::U16 => write!(f, "u16"),
            Self::U32 => write!(f, "u32"),
            Self::I8 => write!(f, "i8"),
            Self::I16 => write!(f, "i16"),
            Self::I32 => write!(f, "i32"),
            Self::F32 => write!(f, "f32"),
            Self::Bytes { size } => write!(f, "bytes({size})"),
            Self::Text { size } => write!(f, "text({size})"),
        }
    }
}

impl std::str::FromStr for FieldType {
    type Err = DecodeError;

    /// Accepts `u8`, `uint16`, `f32`, `float`, `bytes(10)`, `text(4)`, `string(4)`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let sized = |prefix: &str| -> Option<Result<usize, DecodeError>> {
            let inner = lowered.strip_prefix(prefix)?.strip_prefix('(')?.strip_suffix(')')?;
            Some(
                inner
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| DecodeError::UnknownFieldType(s.to_string())),
            )
        };

        if let Some(size) = sized("bytes") {
            return Ok(Self::Bytes { size: size? });
        }
        if let Some(size) = sized("text").or_else(|| sized("string")) {
            return Ok(Self::Text { size: size? });
        }

        match lowered.as_str() {
            "u8" | "uint8" => Ok(Self::U8),
            "u16" | "uint16" => Ok(Self::U16),
            "u32" | "uint32" => Ok(Self::U32),
            "i8" | "int8" => Ok(Self::I8),
            "i16" | "int16" => Ok(Self::I16),
            "i32" | "int32" => Ok(Self::I32),
            "f32" | "float" => Ok(Self::F32),
            _ => Err(DecodeError::UnknownFieldType(s.to_string())),
        }
    }
}

/// Field definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    #[serde(flatten)]
    pub field_type: FieldType,
    /// Description
    #[serde(default)]
    pub description: String,
}

/// Declared frame layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDefinition {
    /// Unique name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Fields in wire order
    pub fields: Vec<FieldDef>,
    /// Trailer check over every byte but the last, compared to the last byte
    #[serde(default)]
    pub checksum: Option<ChecksumType>,
}

impl FrameDefinition {
    /// Empty definition
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            fields: Vec::new(),
            checksum: None,
        }
    }

    /// Append a field
    #[must_use]
    pub fn field(mut self, name: &str, field_type: FieldType, description: &str) -> Self {
        self.fields.push(FieldDef {
            name: name.to_string(),
            field_type,
            description: description.to_string(),
        });
        self
    }

    /// Append a field given as text (`"u16"`, `"bytes(10)"`)
    pub fn field_named(self, name: &str, type_name: &str, description: &str) -> Result<Self, DecodeError> {
        let field_type = type_name.parse()?;
        Ok(self.field(name, field_type, description))
    }

    /// Set the trailer checksum
    #[must_use]
    pub fn with_checksum(mut self, checksum: ChecksumType) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Byte offset of each field
    pub fn offsets(&self) -> Vec<usize> {
        self.fields
            .iter()
            .scan(0usize, |offset, field| {
                let start = *offset;
                *offset += field.field_type.width();
                Some(start)
            })
            .collect()
    }

    /// Total width of all fields
    pub fn size(&self) -> usize {
        self.fields.iter().map(|f| f.field_type.width()).sum()
    }

    /// Load from a JSON document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load from a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Walk the fields in order over `data`.
    ///
    /// Stops at the first field that does not fit, keeping everything decoded
    /// before it. A checksum mismatch clears `valid` but keeps the fields.
    pub fn parse(&self, data: &[u8]) -> ParsedFrame {
        let mut fields = Vec::with_capacity(self.fields.len());
        let mut offset = 0usize;
        let mut error = None;

        for field in &self.fields {
            let width = field.field_type.width();
            let available = data.len().saturating_sub(offset);
            if available < width {
                error = Some(DecodeError::InsufficientBytes {
                    field: field.name.clone(),
                    offset,
                    needed: width,
                    available,
                });
                break;
            }

            fields.push(ParsedField {
                name: field.name.clone(),
                offset,
                value: field.field_type.read(&data[offset..offset + width]),
            });
            offset += width;
        }

        let checksum_message = match (self.checksum, data.split_last()) {
            (Some(algorithm), Some((&received, body))) => {
                let calculated = algorithm.compute(body);
                (calculated != received).then(|| {
                    format!(
                        "{} checksum mismatch: received=0x{received:02X}, calculated=0x{calculated:02X}",
                        algorithm.name()
                    )
                })
            }
            (Some(algorithm), None) => Some(format!("{} checksum missing: frame is empty", algorithm.name())),
            (None, _) => None,
        };

        ParsedFrame {
            definition: self.name.clone(),
            valid: error.is_none() && checksum_message.is_none(),
            fields,
            consumed: offset,
            error,
            checksum_message,
        }
    }
}

/// Decoded field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// u8
    U8(u8),
    /// u16
    U16(u16),
    /// u32
    U32(u32),
    /// i8
    I8(i8),
    /// i16
    I16(i16),
    /// i32
    I32(i32),
    /// f32
    F32(f32),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Text
    Text(String),
}

impl FieldValue {
    /// Integer value, if the field is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::U8(v) => Some(i64::from(v)),
            Self::U16(v) => Some(i64::from(v)),
            Self::U32(v) => Some(i64::from(v)),
            Self::I8(v) => Some(i64::from(v)),
            Self::I16(v) => Some(i64::from(v)),
            Self::I32(v) => Some(i64::from(v)),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8(v) => write!(f, "{v} (0x{v:02X})"),
            Self::U16(v) => write!(f, "{v} (0x{v:04X})"),
            Self::U32(v) => write!(f, "{v} (0x{v:08X})"),
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::Bytes(v) => write!(f, "{}", crate::core::codec::to_hex(v)),
            Self::Text(v) => write!(f, "{v:?}"),
        }
    }
}

/// One decoded field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedField {
    /// Field name
    pub name: String,
    /// Byte offset in the frame
    pub offset: usize,
    /// Decoded value
    pub value: FieldValue,
}

/// Result of parsing bytes against a `FrameDefinition`
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    /// Name of the definition used
    pub definition: String,
    /// Fields decoded, in order
    pub fields: Vec<ParsedField>,
    /// Bytes consumed by the decoded fields
    pub consumed: usize,
    /// All fields decoded and the checksum (if any) matched
    pub valid: bool,
    /// Why parsing stopped early
    pub error: Option<DecodeError>,
    /// Checksum mismatch description
    pub checksum_message: Option<String>,
}

impl ParsedFrame {
    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// All diagnostics, one per line
    pub fn diagnostics(&self) -> Vec<String> {
        self.error
            .iter()
            .map(ToString::to_string)
            .chain(self.checksum_message.iter().cloned())
            .collect()
    }
}

/// The sample layout: header, command, length, 10 data bytes and an XOR trailer
pub fn sample_definition() -> FrameDefinition {
    FrameDefinition::new("Sample Frame")
        .field("header", FieldType::U8, "Frame header (0xAA)")
        .field("command", FieldType::U8, "Command byte")
        .field("data_length", FieldType::U8, "Data length")
        .field("data", FieldType::Bytes { size: 10 }, "Payload data")
        .field("checksum", FieldType::U8, "XOR checksum")
        .with_checksum(ChecksumType::Xor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_command_data() -> FrameDefinition {
        FrameDefinition::new("hcd")
            .field("header", FieldType::U8, "")
            .field("command", FieldType::U8, "")
            .field("data", FieldType::Bytes { size: 10 }, "")
            .field("checksum", FieldType::U8, "")
    }

    #[test]
    fn test_offsets_follow_widths() {
        let def = FrameDefinition::new("offsets")
            .field("a", FieldType::U8, "")
            .field("b", FieldType::U16, "")
            .field("c", FieldType::F32, "")
            .field("d", FieldType::Text { size: 3 }, "")
            .field("e", FieldType::I32, "");
        assert_eq!(def.offsets(), vec![0, 1, 3, 7, 10]);
        assert_eq!(def.size(), 14);
    }

    #[test]
    fn test_short_input_names_missing_field() {
        let def = header_command_data();
        let parsed = def.parse(&[0xAA, 0x01, 0, 1, 2, 3]);

        assert!(!parsed.valid);
        assert_eq!(parsed.fields.len(), 2);
        assert_eq!(parsed.get("header"), Some(&FieldValue::U8(0xAA)));
        assert_eq!(parsed.get("command"), Some(&FieldValue::U8(0x01)));
        assert_eq!(
            parsed.error,
            Some(DecodeError::InsufficientBytes {
                field: "data".to_string(),
                offset: 2,
                needed: 10,
                available: 4,
            })
        );
        assert!(parsed.diagnostics()[0].contains("'data'"));
    }

    #[test]
    fn test_numbers_are_big_endian() {
        let def = FrameDefinition::new("numbers")
            .field("u", FieldType::U16, "")
            .field("i", FieldType::I16, "")
            .field("w", FieldType::U32, "")
            .field("f", FieldType::F32, "");
        let mut data = vec![0x12, 0x34, 0xFF, 0xFE, 0x00, 0x01, 0x00, 0x00];
        data.extend_from_slice(&1.5f32.to_be_bytes());

        let parsed = def.parse(&data);
        assert!(parsed.valid);
        assert_eq!(parsed.get("u"), Some(&FieldValue::U16(0x1234)));
        assert_eq!(parsed.get("i"), Some(&FieldValue::I16(-2)));
        assert_eq!(parsed.get("w"), Some(&FieldValue::U32(0x0001_0000)));
        assert_eq!(parsed.get("f"), Some(&FieldValue::F32(1.5)));
    }

    #[test]
    fn test_text_is_lossy() {
        let def = FrameDefinition::new("text").field("name", FieldType::Text { size: 4 }, "");
        let parsed = def.parse(&[b'o', b'k', 0xFF, b'!']);
        assert_eq!(parsed.get("name"), Some(&FieldValue::Text("ok\u{FFFD}!".to_string())));
    }

    #[test]
    fn test_checksum_mismatch_keeps_fields() {
        let def = sample_definition();
        let mut frame = vec![0xAA, 0x10, 0x0A, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let good = super::super::checksum::xor8(&frame);
        frame.push(good);

        let parsed = def.parse(&frame);
        assert!(parsed.valid, "{:?}", parsed.diagnostics());

        *frame.last_mut().unwrap() ^= 0xFF;
        let parsed = def.parse(&frame);
        assert!(!parsed.valid);
        assert!(parsed.error.is_none());
        assert_eq!(parsed.fields.len(), 5);
        assert!(parsed.checksum_message.unwrap().contains("mismatch"));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let def = sample_definition();
        let data = [0xAA, 0x01, 0x02, 9, 9, 9];
        assert_eq!(def.parse(&data), def.parse(&data));
    }

    #[test]
    fn test_field_type_from_text() {
        assert_eq!("uint16".parse::<FieldType>().unwrap(), FieldType::U16);
        assert_eq!("bytes(10)".parse::<FieldType>().unwrap(), FieldType::Bytes { size: 10 });
        assert_eq!("string(4)".parse::<FieldType>().unwrap(), FieldType::Text { size: 4 });
        assert!(matches!(
            "u64".parse::<FieldType>(),
            Err(DecodeError::UnknownFieldType(_))
        ));

        let def = FrameDefinition::new("typed")
            .field_named("id", "u8", "")
            .and_then(|d| d.field_named("value", "i16", ""))
            .unwrap();
        assert_eq!(def.size(), 3);
        assert!(FrameDefinition::new("bad").field_named("x", "word", "").is_err());
    }

    #[test]
    fn test_definition_from_yaml() {
        let yaml = r"
name: Sensor
fields:
  - name: id
    type: u8
  - name: temperature
    type: i16
    description: tenths of a degree
  - name: tag
    type: text
    size: 3
checksum: xor
";
        let def = FrameDefinition::from_yaml(yaml).unwrap();
        assert_eq!(def.fields[2].field_type, FieldType::Text { size: 3 });
        assert_eq!(def.checksum, Some(ChecksumType::Xor));
        assert_eq!(def.size(), 6);
    }
}
