//! Register frame codec
//!
//! Every frame is `START | length (u16 LE) | type | payload | END`. Register
//! transactions use fixed layouts: a 6-byte read request, a 10-byte write
//! request and a 10-byte response for both reads and writes. Register values
//! travel most-significant byte first, the length field least-significant
//! byte first.

use super::register::Register;
use crate::core::error::{EngineError, Result};
use crate::core::transport::TransportError;

/// Start of every frame
pub const START_MARKER: u8 = 0xCC;
/// End of every frame
pub const END_MARKER: u8 = 0xCD;

/// Length of a read request frame
pub const READ_REQUEST_LEN: usize = 6;
/// Length of a write request frame
pub const WRITE_REQUEST_LEN: usize = 10;
/// Length of a register response frame
pub const RESPONSE_LEN: usize = 10;

/// Bytes before the payload: start marker, two length bytes, type
pub const HEADER_LEN: usize = 4;

/// Frame type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Register write response (0xF5)
    WriteResponse = 0xF5,
    /// Register read response (0xF6)
    ReadResponse = 0xF6,
    /// Register read request (0xF8)
    ReadRequest = 0xF8,
    /// Register write request (0xF9)
    WriteRequest = 0xF9,
    /// Streaming data buffer (0xFE)
    StreamData = 0xFE,
}

impl FrameType {
    /// Get frame type from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0xF5 => Some(FrameType::WriteResponse),
            0xF6 => Some(FrameType::ReadResponse),
            0xF8 => Some(FrameType::ReadRequest),
            0xF9 => Some(FrameType::WriteRequest),
            0xFE => Some(FrameType::StreamData),
            _ => None,
        }
    }

    /// Get name of frame type
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::WriteResponse => "Register Write Response",
            FrameType::ReadResponse => "Register Read Response",
            FrameType::ReadRequest => "Register Read Request",
            FrameType::WriteRequest => "Register Write Request",
            FrameType::StreamData => "Stream Data",
        }
    }

    /// Response type the device answers this request with
    pub fn response(&self) -> Option<FrameType> {
        match self {
            FrameType::ReadRequest => Some(FrameType::ReadResponse),
            FrameType::WriteRequest => Some(FrameType::WriteResponse),
            _ => None,
        }
    }
}

/// Decoded register response (read response or write acknowledgement)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterResponse {
    /// Register address echoed by the device
    pub address: u8,
    /// Register value
    pub value: u32,
}

impl RegisterResponse {
    /// Known register for the echoed address, if any
    pub fn register(&self) -> Option<Register> {
        Register::from_u8(self.address)
    }
}

/// Encode a register read request: `CC 01 00 F8 <reg> CD`
pub fn encode_read_request(register: Register) -> [u8; READ_REQUEST_LEN] {
    let len = 1u16.to_le_bytes();
    [
        START_MARKER,
        len[0],
        len[1],
        FrameType::ReadRequest as u8,
        register.address(),
        END_MARKER,
    ]
}

/// Encode a register write request: `CC 05 00 F9 <reg> <value MSB first> CD`
pub fn encode_write_request(register: Register, value: u32) -> [u8; WRITE_REQUEST_LEN] {
    encode_register_frame(FrameType::WriteRequest, register.address(), value)
}

/// Encode a register response frame as the device sends it
pub fn encode_register_response(
    frame_type: FrameType,
    address: u8,
    value: u32,
) -> [u8; RESPONSE_LEN] {
    encode_register_frame(frame_type, address, value)
}

fn encode_register_frame(frame_type: FrameType, address: u8, value: u32) -> [u8; 10] {
    let len = 5u16.to_le_bytes();
    let v = value.to_be_bytes();
    [
        START_MARKER,
        len[0],
        len[1],
        frame_type as u8,
        address,
        v[0],
        v[1],
        v[2],
        v[3],
        END_MARKER,
    ]
}

/// Decode a 10-byte register response, checking markers and opcode
///
/// Only the first [`RESPONSE_LEN`] bytes are consumed. The declared length
/// field is not validated against the fixed layout.
pub fn decode_register_response(bytes: &[u8], expected: FrameType) -> Result<RegisterResponse> {
    let mut decoder = ResponseDecoder::new(expected);
    for &byte in bytes.iter().take(RESPONSE_LEN) {
        if let Some(response) = decoder.push(byte)? {
            return Ok(response);
        }
    }
    Err(EngineError::Transport(TransportError::Eof {
        read: bytes.len().min(RESPONSE_LEN),
        expected: RESPONSE_LEN,
    }))
}

/// Position of the response decoder inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// Waiting for the start marker
    Start,
    /// Low byte of the payload length
    LengthLow,
    /// High byte of the payload length
    LengthHigh,
    /// Frame type
    Type,
    /// Register address
    Address,
    /// Most significant value byte
    Value1,
    /// Second value byte
    Value2,
    /// Third value byte
    Value3,
    /// Least significant value byte
    Value4,
    /// End marker
    End,
    /// Frame complete
    Done,
}

impl ResponseState {
    /// Byte offset this state reads inside the frame
    pub fn offset(&self) -> usize {
        match self {
            Self::Start => 0,
            Self::LengthLow => 1,
            Self::LengthHigh => 2,
            Self::Type => 3,
            Self::Address => 4,
            Self::Value1 => 5,
            Self::Value2 => 6,
            Self::Value3 => 7,
            Self::Value4 => 8,
            Self::End => 9,
            Self::Done => RESPONSE_LEN,
        }
    }
}

/// Byte-at-a-time register response decoder
///
/// Validation happens at the same offsets as [`decode_register_response`],
/// which is implemented on top of it. Any error resets the decoder.
#[derive(Debug, Clone)]
pub struct ResponseDecoder {
    expected: FrameType,
    state: ResponseState,
    length: u16,
    address: u8,
    value: u32,
}

impl ResponseDecoder {
    /// Create a decoder expecting the given response type
    pub fn new(expected: FrameType) -> Self {
        Self {
            expected,
            state: ResponseState::Start,
            length: 0,
            address: 0,
            value: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> ResponseState {
        self.state
    }

    /// Declared payload length of the frame being decoded
    pub fn declared_length(&self) -> u16 {
        self.length
    }

    /// Restart at the start marker
    pub fn reset(&mut self) {
        self.state = ResponseState::Start;
        self.length = 0;
        self.address = 0;
        self.value = 0;
    }

    /// Feed one byte; returns the response once the end marker is accepted
    pub fn push(&mut self, byte: u8) -> Result<Option<RegisterResponse>> {
        if self.state == ResponseState::Done {
            self.reset();
        }

        let offset = self.state.offset();
        let next = match self.state {
            ResponseState::Start => {
                if byte != START_MARKER {
                    return Err(self.fail(EngineError::Framing {
                        offset,
                        expected: START_MARKER,
                        found: byte,
                    }));
                }
                ResponseState::LengthLow
            }
            ResponseState::LengthLow => {
                self.length = u16::from(byte);
                ResponseState::LengthHigh
            }
            ResponseState::LengthHigh => {
                self.length |= u16::from(byte) << 8;
                ResponseState::Type
            }
            ResponseState::Type => {
                if byte != self.expected as u8 {
                    return Err(self.fail(EngineError::Protocol {
                        offset,
                        expected: self.expected as u8,
                        found: byte,
                    }));
                }
                ResponseState::Address
            }
            ResponseState::Address => {
                self.address = byte;
                ResponseState::Value1
            }
            ResponseState::Value1 => {
                self.value = u32::from(byte) << 24;
                ResponseState::Value2
            }
            ResponseState::Value2 => {
                self.value |= u32::from(byte) << 16;
                ResponseState::Value3
            }
            ResponseState::Value3 => {
                self.value |= u32::from(byte) << 8;
                ResponseState::Value4
            }
            ResponseState::Value4 => {
                self.value |= u32::from(byte);
                ResponseState::End
            }
            ResponseState::End => {
                if byte != END_MARKER {
                    return Err(self.fail(EngineError::Framing {
                        offset,
                        expected: END_MARKER,
                        found: byte,
                    }));
                }
                ResponseState::Done
            }
            ResponseState::Done => unreachable!("decoder is reset before reading"),
        };

        tracing::trace!("{:?} -> {:?} (0x{:02X})", self.state, next, byte);
        self.state = next;

        if next == ResponseState::Done {
            Ok(Some(RegisterResponse {
                address: self.address,
                value: self.value,
            }))
        } else {
            Ok(None)
        }
    }

    fn fail(&mut self, err: EngineError) -> EngineError {
        self.reset();
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_read_request() {
        assert_eq!(
            encode_read_request(Register::Status),
            [0xCC, 0x01, 0x00, 0xF8, 0x06, 0xCD]
        );
    }

    #[test]
    fn test_encode_write_request_msb_first() {
        assert_eq!(
            encode_write_request(Register::MainControl, 0x0102_0304),
            [0xCC, 0x05, 0x00, 0xF9, 0x03, 0x01, 0x02, 0x03, 0x04, 0xCD]
        );
    }

    #[test]
    fn test_response_roundtrip_all_registers() {
        let values = [0u32, 1, 0x0000_0103, 0x00FF_FF00, 0x8000_0000, u32::MAX];
        for register in Register::all() {
            for &value in &values {
                let frame =
                    encode_register_response(FrameType::ReadResponse, register.address(), value);
                let decoded = decode_register_response(&frame, FrameType::ReadResponse).unwrap();
                assert_eq!(decoded.register(), Some(*register));
                assert_eq!(decoded.value, value);
            }
        }
    }

    #[test]
    fn test_bad_start_marker() {
        let mut frame = encode_register_response(FrameType::ReadResponse, 0x06, 7);
        frame[0] = 0xAA;
        match decode_register_response(&frame, FrameType::ReadResponse) {
            Err(EngineError::Framing { offset, expected, found }) => {
                assert_eq!((offset, expected, found), (0, 0xCC, 0xAA));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_bad_end_marker() {
        let mut frame = encode_register_response(FrameType::ReadResponse, 0x06, 7);
        frame[9] = 0x00;
        assert!(matches!(
            decode_register_response(&frame, FrameType::ReadResponse),
            Err(EngineError::Framing { offset: 9, expected: 0xCD, found: 0x00 })
        ));
    }

    #[test]
    fn test_wrong_opcode() {
        let frame = encode_register_response(FrameType::WriteResponse, 0x03, 3);
        assert!(matches!(
            decode_register_response(&frame, FrameType::ReadResponse),
            Err(EngineError::Protocol { offset: 3, expected: 0xF6, found: 0xF5 })
        ));
    }

    #[test]
    fn test_truncated_response() {
        let frame = encode_register_response(FrameType::ReadResponse, 0x06, 7);
        assert!(matches!(
            decode_register_response(&frame[..7], FrameType::ReadResponse),
            Err(EngineError::Transport(TransportError::Eof { read: 7, expected: 10 }))
        ));
    }

    #[test]
    fn test_length_field_not_validated() {
        let mut frame = encode_register_response(FrameType::ReadResponse, 0x10, 42);
        frame[1] = 0x09;
        let decoded = decode_register_response(&frame, FrameType::ReadResponse).unwrap();
        assert_eq!(decoded.value, 42);
    }

    #[test]
    fn test_byte_decoder_matches_block_decoder() {
        let frame = encode_register_response(FrameType::ReadResponse, 0x12, 3_000_000);
        let mut decoder = ResponseDecoder::new(FrameType::ReadResponse);

        for &b in &frame[..9] {
            assert_eq!(decoder.push(b).unwrap(), None);
        }
        assert_eq!(decoder.state(), ResponseState::End);
        assert_eq!(decoder.declared_length(), 5);

        let response = decoder.push(frame[9]).unwrap().unwrap();
        assert_eq!(response, decode_register_response(&frame, FrameType::ReadResponse).unwrap());
        assert_eq!(decoder.state(), ResponseState::Done);
    }

    #[test]
    fn test_decoder_resets_after_error() {
        let mut decoder = ResponseDecoder::new(FrameType::ReadResponse);
        assert!(decoder.push(0x00).is_err());
        assert_eq!(decoder.state(), ResponseState::Start);

        let frame = encode_register_response(FrameType::ReadResponse, 0x06, 0x100);
        let mut result = None;
        for &b in &frame {
            result = decoder.push(b).unwrap();
        }
        assert_eq!(result.map(|r| r.value), Some(0x100));
    }

    #[test]
    fn test_frame_type_response() {
        assert_eq!(FrameType::ReadRequest.response(), Some(FrameType::ReadResponse));
        assert_eq!(FrameType::WriteRequest.response(), Some(FrameType::WriteResponse));
        assert_eq!(FrameType::from_u8(0xFE), Some(FrameType::StreamData));
        assert_eq!(FrameType::from_u8(0x00), None);
    }
}
