//! Core module containing the protocol engine
//!
//! This module provides:
//! - Register and stream frame codecs
//! - Register transactions over a half-duplex byte stream
//! - Status register decoding
//! - Stream frame reading with resynchronization
//! - Measurement smoothing
//! - Sessions with cooperative cancellation
//! - Telemetry sinks
//! - Serial transport
//! - A simulated sensor module

pub mod error;
pub mod protocol;
pub mod session;
pub mod simulator;
pub mod sink;
pub mod smoother;
pub mod stream_reader;
pub mod transactor;
pub mod transport;
