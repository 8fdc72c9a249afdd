//! # Rangewatch Core Library
//!
//! Protocol engine for XM122-class distance radar modules on a serial link:
//! - Register read/write transactions
//! - Status register decoding
//! - Streaming envelope parsing with resynchronization
//! - Moving-window smoothing of the strongest reflection
//! - Pluggable telemetry sinks
//!
//! ## Example
//!
//! ```rust,no_run
//! use rangewatch_core::core::protocol::{mode, streaming};
//! use rangewatch_core::{
//!     open_serial, ConfigurationProfile, EngineConfig, LogSink, Register, SerialConfig, Session,
//!     ShutdownSignal, SmootherConfig,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let port = open_serial(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!     let mut session = Session::new(port, EngineConfig::default(), SmootherConfig::default())?;
//!
//!     println!("{}", session.status()?);
//!     let profile = ConfigurationProfile::default()
//!         .write(Register::ModeSelection, mode::DISTANCE_DETECTOR)
//!         .write(Register::StreamingControl, streaming::UART);
//!     session.apply_profile(&profile)?;
//!     let summary = session.run(&ShutdownSignal::new(), &mut LogSink)?;
//!     println!("{} frames", summary.frames);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::AppConfig;
pub use crate::core::error::{EngineError, Result};
pub use crate::core::protocol::{MeasurementEntry, Register, StatusCondition, StatusFlags};
pub use crate::core::session::{
    ConfigurationProfile, EngineConfig, ProductInfo, RegisterWrite, RunSummary, Session,
    ShutdownSignal, StopReason,
};
pub use crate::core::simulator::{SimulatedDevice, SimulatorHandle, Waveform};
pub use crate::core::sink::{
    ChannelSink, LogSink, MeasurementSink, OutputFormat, Reading, ReadingKind, SinkError,
    WriterSink,
};
pub use crate::core::smoother::{MeasurementSmoother, SmootherConfig};
pub use crate::core::transport::{open_serial, SerialConfig, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
