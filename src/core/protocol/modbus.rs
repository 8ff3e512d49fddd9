//! Modbus RTU frames
//!
//! Layout: unit id, function code, payload, CRC-16 (low byte first).
//! Decoding never drops a frame with a bad check value; it is returned with
//! `valid = false` so the traffic can still be inspected.

use super::checksum::crc16_modbus;
use super::DecodeError;
use std::fmt;

/// Smallest decodable frame: unit id, function and the two check bytes
pub const MIN_FRAME_LEN: usize = 4;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    /// Get function code from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            0x0F => Some(Self::WriteMultipleCoils),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    /// Wire value
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Get name of function code
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

/// Display name for any function byte, including exceptions and unknown codes
pub fn function_name(code: u8) -> String {
    if code & 0x80 != 0 {
        return format!("Exception ({})", function_name(code & 0x7F));
    }
    FunctionCode::from_u8(code).map_or_else(|| format!("Unknown (0x{code:02X})"), |f| f.name().to_string())
}

/// Name of an exception code
pub fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Failed to Respond",
        _ => "Unknown Exception",
    }
}

/// Register read request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// First register address
    pub start_address: u16,
    /// Number of registers
    pub quantity: u16,
}

/// Register read response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    /// Declared byte count
    pub byte_count: u8,
    /// Register values
    pub registers: Vec<u16>,
}

/// Function-specific reading of a frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDetail {
    /// Register read request
    Request(ReadRequest),
    /// Register read response
    Response(RegisterResponse),
    /// The payload reads both as a request and as a response
    Ambiguous {
        /// Request reading, when the payload is long enough for one
        as_request: Option<ReadRequest>,
        /// Response reading
        as_response: RegisterResponse,
        /// Why both readings are plausible
        reason: String,
    },
    /// Single register or coil write (request or echo)
    WriteSingle {
        /// Target address
        address: u16,
        /// Written value
        value: u16,
    },
    /// Exception response
    Exception {
        /// Function code the exception answers
        function: u8,
        /// Exception code
        code: u8,
        /// Exception name
        name: &'static str,
    },
    /// Known function without a structured reading
    Raw {
        /// Function code
        function: FunctionCode,
    },
    /// Payload does not fit the function's layout
    Invalid(DecodeError),
}

impl FrameDetail {
    /// Problem a caller should surface, if any
    pub fn problem(&self) -> Option<DecodeError> {
        match self {
            Self::Invalid(err) => Some(err.clone()),
            Self::Ambiguous { reason, .. } => Some(DecodeError::Ambiguous(reason.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for FrameDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(req) => write!(f, "request start={} quantity={}", req.start_address, req.quantity),
            Self::Response(resp) => write!(f, "response byte_count={} registers={:?}", resp.byte_count, resp.registers),
            Self::Ambiguous { reason, .. } => write!(f, "ambiguous: {reason}"),
            Self::WriteSingle { address, value } => write!(f, "write address={address} value={value}"),
            Self::Exception { function, code, name } => {
                write!(f, "exception 0x{code:02X} ({name}) for function 0x{function:02X}")
            }
            Self::Raw { function } => write!(f, "{}", function.name()),
            Self::Invalid(err) => write!(f, "invalid: {err}"),
        }
    }
}

/// One decoded RTU frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Unit (slave) id
    pub unit_id: u8,
    /// Function code byte
    pub function: u8,
    /// Bytes between function code and check value
    pub payload: Vec<u8>,
    /// Check value as received
    pub check: u16,
    /// Check value computed over unit id, function and payload
    pub computed_check: u16,
    /// Received and computed check values agree
    pub valid: bool,
    /// Mismatch description when not valid
    pub message: Option<String>,
    /// Function-specific reading, filled by `with_detail`
    pub detail: Option<FrameDetail>,
}

impl Frame {
    /// Attach the function-specific reading
    #[must_use]
    pub fn with_detail(mut self) -> Self {
        self.detail = Some(interpret(&self));
        self
    }

    /// Function name
    pub fn function_name(&self) -> String {
        function_name(self.function)
    }

    /// One-line diagnostic
    pub fn summary(&self) -> String {
        let mut line = format!(
            "unit={} fn=0x{:02X} ({}) payload=[{}] crc=0x{:04X}",
            self.unit_id,
            self.function,
            self.function_name(),
            crate::core::codec::to_hex(&self.payload),
            self.check,
        );
        match &self.message {
            Some(message) => line.push_str(&format!(" INVALID: {message}")),
            None => line.push_str(" OK"),
        }
        if let Some(detail) = &self.detail {
            line.push_str(&format!(" | {detail}"));
        }
        line
    }
}

/// Split a buffer into an RTU frame. `None` below `MIN_FRAME_LEN` bytes.
pub fn decode(data: &[u8]) -> Option<Frame> {
    if data.len() < MIN_FRAME_LEN {
        return None;
    }

    let (body, trailer) = data.split_at(data.len() - 2);
    let check = u16::from_le_bytes([trailer[0], trailer[1]]);
    let computed_check = crc16_modbus(body);
    let valid = check == computed_check;

    Some(Frame {
        unit_id: body[0],
        function: body[1],
        payload: body[2..].to_vec(),
        check,
        computed_check,
        valid,
        message: (!valid).then(|| {
            format!("CRC mismatch: received=0x{check:04X}, calculated=0x{computed_check:04X}")
        }),
        detail: None,
    })
}

/// Function-specific reading of a frame's payload.
///
/// For 0x03/0x04 a 4-byte payload is a read request, except when its first
/// byte is 3: it then also parses as a one-byte-count response, and the frame
/// comes back as `FrameDetail::Ambiguous` with both readings. Requests whose
/// start address is 0x0300..=0x03FF therefore arrive as `Ambiguous`, with the
/// request in `as_request`.
pub fn interpret(frame: &Frame) -> FrameDetail {
    if frame.function & 0x80 != 0 {
        return match frame.payload.as_slice() {
            [code] => FrameDetail::Exception {
                function: frame.function & 0x7F,
                code: *code,
                name: exception_name(*code),
            },
            other => FrameDetail::Invalid(DecodeError::LengthMismatch {
                what: "exception payload".to_string(),
                expected: 1,
                actual: other.len(),
            }),
        };
    }

    match FunctionCode::from_u8(frame.function) {
        Some(FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters) => {
            interpret_register_read(&frame.payload)
        }
        Some(FunctionCode::WriteSingleRegister | FunctionCode::WriteSingleCoil) => {
            interpret_write_single(&frame.payload)
        }
        Some(function) => FrameDetail::Raw { function },
        None => FrameDetail::Invalid(DecodeError::UnknownFunction(frame.function)),
    }
}

fn interpret_register_read(payload: &[u8]) -> FrameDetail {
    // Request and response are told apart by payload length only. A response
    // whose byte count matches its length can collide with that guess.
    match payload {
        [a, b, c, d] if *a == 3 => FrameDetail::Ambiguous {
            as_request: Some(read_request(*a, *b, *c, *d)),
            as_response: register_response(payload),
            reason: "4-byte payload is a read request or a 3-byte response".to_string(),
        },
        [a, b, c, d] => FrameDetail::Request(read_request(*a, *b, *c, *d)),
        [2, _, _] => FrameDetail::Ambiguous {
            as_request: None,
            as_response: register_response(payload),
            reason: "3-byte payload is a one-register response or a read request missing a byte".to_string(),
        },
        [] => FrameDetail::Invalid(DecodeError::LengthMismatch {
            what: "register response".to_string(),
            expected: 1,
            actual: 0,
        }),
        [declared, rest @ ..] if usize::from(*declared) != rest.len() => {
            FrameDetail::Invalid(DecodeError::ByteCountMismatch {
                declared: *declared,
                actual: rest.len(),
            })
        }
        _ => FrameDetail::Response(register_response(payload)),
    }
}

fn read_request(a: u8, b: u8, c: u8, d: u8) -> ReadRequest {
    ReadRequest {
        start_address: u16::from_be_bytes([a, b]),
        quantity: u16::from_be_bytes([c, d]),
    }
}

fn register_response(payload: &[u8]) -> RegisterResponse {
    RegisterResponse {
        byte_count: payload[0],
        registers: payload[1..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect(),
    }
}

fn interpret_write_single(payload: &[u8]) -> FrameDetail {
    match payload {
        [a, b, c, d] => FrameDetail::WriteSingle {
            address: u16::from_be_bytes([*a, *b]),
            value: u16::from_be_bytes([*c, *d]),
        },
        other => FrameDetail::Invalid(DecodeError::LengthMismatch {
            what: "write single payload".to_string(),
            expected: 4,
            actual: other.len(),
        }),
    }
}

/// Assemble a frame and append its check value
pub fn build_frame(unit_id: u8, function: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(unit_id);
    frame.push(function);
    frame.extend_from_slice(payload);
    let crc = crc16_modbus(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Read holding registers request
pub fn read_holding_registers(unit_id: u8, start_address: u16, quantity: u16) -> Vec<u8> {
    let mut payload = start_address.to_be_bytes().to_vec();
    payload.extend_from_slice(&quantity.to_be_bytes());
    build_frame(unit_id, FunctionCode::ReadHoldingRegisters.code(), &payload)
}

/// Write single register request
pub fn write_single_register(unit_id: u8, address: u16, value: u16) -> Vec<u8> {
    let mut payload = address.to_be_bytes().to_vec();
    payload.extend_from_slice(&value.to_be_bytes());
    build_frame(unit_id, FunctionCode::WriteSingleRegister.code(), &payload)
}

/// Read holding registers response
pub fn holding_registers_response(unit_id: u8, registers: &[u16]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(registers.len() * 2 + 1);
    payload.push(u8::try_from(registers.len() * 2).unwrap_or(u8::MAX));
    for reg in registers {
        payload.extend_from_slice(&reg.to_be_bytes());
    }
    build_frame(unit_id, FunctionCode::ReadHoldingRegisters.code(), &payload)
}
