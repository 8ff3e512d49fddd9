//! Conversion between user-entered text and raw bytes
//!
//! Supports input written as:
//! - Hexadecimal (`01 03 00 0A`, `0x01 0x03`, `01030A`)
//! - Escaped text (`AT\r\n`, `\x02data\x03`)
//! - Plain ASCII/UTF-8

use serde::{Deserialize, Serialize};

/// How user input should be turned into bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Hex if every character is a hex digit (ignoring spaces and `0x`), else ASCII
    #[default]
    Auto,
    /// Hexadecimal byte values
    Hex,
    /// Text with backslash escapes
    Escape,
    /// Text sent as-is
    Ascii,
}

impl std::str::FromStr for InputFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "hex" => Ok(Self::Hex),
            "escape" | "esc" => Ok(Self::Escape),
            "ascii" | "text" => Ok(Self::Ascii),
            other => Err(CodecError::InvalidFormat(format!("unknown input format '{other}'"))),
        }
    }
}

/// Codec errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// Invalid input format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Invalid character
    #[error("Invalid character at position {0}: {1}")]
    InvalidCharacter(usize, char),
}

/// Parse user input into bytes
pub fn parse_input(text: &str, format: InputFormat) -> Result<Vec<u8>, CodecError> {
    match format {
        InputFormat::Hex => parse_hex(text),
        InputFormat::Escape => parse_escaped(text),
        InputFormat::Ascii => Ok(text.as_bytes().to_vec()),
        InputFormat::Auto => {
            let stripped = strip_hex_noise(text);
            if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_hexdigit()) {
                parse_hex(text)
            } else {
                Ok(text.as_bytes().to_vec())
            }
        }
    }
}

fn strip_hex_noise(text: &str) -> String {
    text.replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect()
}

/// Parse hexadecimal text. An odd digit count is padded with a leading zero.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, CodecError> {
    let mut digits = strip_hex_noise(text);

    if let Some((pos, c)) = digits.char_indices().find(|(_, c)| !c.is_ascii_hexdigit()) {
        return Err(CodecError::InvalidCharacter(pos, c));
    }
    if digits.len() % 2 != 0 {
        digits.insert(0, '0');
    }

    hex::decode(&digits).map_err(|e| CodecError::InvalidFormat(e.to_string()))
}

/// Parse text with `\r \n \t \0 \\ \xNN` escapes
pub fn parse_escaped(text: &str) -> Result<Vec<u8>, CodecError> {
    let mut output = Vec::with_capacity(text.len());
    let mut chars = text.char_indices();

    while let Some((pos, c)) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            output.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        match chars.next() {
            Some((_, 'r')) => output.push(b'\r'),
            Some((_, 'n')) => output.push(b'\n'),
            Some((_, 't')) => output.push(b'\t'),
            Some((_, '0')) => output.push(0),
            Some((_, '\\')) => output.push(b'\\'),
            Some((_, 'x')) => {
                let hi = chars.next();
                let lo = chars.next();
                match (hi, lo) {
                    (Some((_, h)), Some((_, l))) if h.is_ascii_hexdigit() && l.is_ascii_hexdigit() => {
                        let byte = u8::from_str_radix(&format!("{h}{l}"), 16)
                            .map_err(|e| CodecError::InvalidFormat(e.to_string()))?;
                        output.push(byte);
                    }
                    _ => {
                        return Err(CodecError::InvalidFormat(format!(
                            "\\x at position {pos} needs two hex digits"
                        )))
                    }
                }
            }
            Some((p, other)) => return Err(CodecError::InvalidCharacter(p, other)),
            None => {
                return Err(CodecError::InvalidFormat(
                    "trailing backslash".to_string(),
                ))
            }
        }
    }

    Ok(output)
}

/// Space-separated uppercase hex
pub fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format bytes as a hexdump (like xxd)
pub fn hexdump(data: &[u8], bytes_per_line: usize) -> String {
    let bytes_per_line = bytes_per_line.max(1);
    let mut output = String::new();

    for (offset, chunk) in data.chunks(bytes_per_line).enumerate() {
        output.push_str(&format!("{:08x}  ", offset * bytes_per_line));

        for byte in chunk {
            output.push_str(&format!("{byte:02x} "));
        }
        for _ in chunk.len()..bytes_per_line {
            output.push_str("   ");
        }

        output.push_str(" |");
        for byte in chunk {
            if byte.is_ascii_graphic() || *byte == b' ' {
                output.push(*byte as char);
            } else {
                output.push('.');
            }
        }
        output.push_str("|\n");
    }

    output
}

/// Serde adapter storing byte buffers as lowercase hex strings
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as hex
    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    /// Deserialize hex (spaces and `0x` prefixes allowed)
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_hex(&text).map_err(serde::de::Error::custom)
    }
}
