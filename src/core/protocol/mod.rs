//! XM122 register protocol
//!
//! Provides:
//! - Register frame encoding and decoding
//! - The register map
//! - Status register decoding
//! - Streaming envelope parsing

pub mod frame;
pub mod register;
pub mod status;
pub mod stream;

pub use frame::{
    decode_register_response, encode_read_request, encode_register_response, encode_write_request,
    FrameType, RegisterResponse, ResponseDecoder, ResponseState, END_MARKER, START_MARKER,
};
pub use register::{main_control, mode, streaming, Register, UnknownRegister};
pub use status::{StatusCondition, StatusFlags};
pub use stream::{encode_envelope, parse_envelope, MeasurementEntry};
