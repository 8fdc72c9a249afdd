//! Sensor session
//!
//! A [`Session`] owns the byte stream for its whole life. It runs one-shot
//! register transactions during setup, then the streaming loop that feeds the
//! smoother and publishes readings until cancelled. Leaving the loop on any
//! path writes a best-effort STOP to main control, and dropping the session
//! does the same if the detector is still running.

use crate::core::error::{EngineError, Result};
use crate::core::protocol::{main_control, parse_envelope, Register, StatusFlags};
use crate::core::sink::{MeasurementSink, Reading, ReadingKind, SinkError};
use crate::core::smoother::{MeasurementSmoother, SmootherConfig};
use crate::core::stream_reader::{StreamReader, DEFAULT_MAX_SKIP_BYTES};
use crate::core::transactor::RegisterTransactor;
use crate::core::transport::{TransportError, TransportStats};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Streaming loop limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Consecutive failed frame reads tolerated before giving up
    pub max_resync_attempts: u32,
    /// Bytes discarded per scan for a start marker
    pub max_skip_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_resync_attempts: 5,
            max_skip_bytes: DEFAULT_MAX_SKIP_BYTES,
        }
    }
}

impl EngineConfig {
    /// Reject limits the streaming loop cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_skip_bytes == 0 {
            return Err(EngineError::Config("max_skip_bytes must be positive".into()));
        }
        Ok(())
    }
}

/// One register write of a configuration profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWrite {
    /// Target register, by name or address
    pub register: Register,
    /// Value to write
    pub value: u32,
}

impl RegisterWrite {
    /// Create a write
    pub fn new(register: Register, value: u32) -> Self {
        Self { register, value }
    }
}

/// Ordered register writes applied before streaming
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigurationProfile {
    writes: Vec<RegisterWrite>,
}

impl ConfigurationProfile {
    /// Create a profile from writes in application order
    pub fn new(writes: Vec<RegisterWrite>) -> Self {
        Self { writes }
    }

    /// Append a write
    #[must_use]
    pub fn write(mut self, register: Register, value: u32) -> Self {
        self.writes.push(RegisterWrite::new(register, value));
        self
    }

    /// Writes in application order
    pub fn writes(&self) -> &[RegisterWrite] {
        &self.writes
    }

    /// Profile has no writes
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Cooperative cancellation flag, checked between stream frames
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    /// Create an untriggered signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown was requested
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Underlying flag, for signal handlers
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Product identification as reported by the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProductInfo {
    /// Product identification register
    pub product_id: u32,
    /// Firmware version register
    pub product_version: u32,
    /// Highest supported UART baud rate
    pub max_baud_rate: u32,
}

impl fmt::Display for ProductInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "product 0x{:08X}, version 0x{:08X}, max baud {}",
            self.product_id, self.product_version, self.max_baud_rate
        )
    }
}

/// Why the streaming loop ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The shutdown signal was triggered
    #[default]
    Shutdown,
    /// The sink's consumer went away
    SinkClosed,
}

/// Counters of one streaming run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Frames read and parsed
    pub frames: u64,
    /// Frames without any entry
    pub empty_frames: u64,
    /// Frames discarded as malformed
    pub malformed: u64,
    /// Failed frame reads followed by a resync
    pub resyncs: u64,
    /// Averaged readings published
    pub averaged: u64,
    /// Raw readings published
    pub raw: u64,
    /// Readings the sink failed to accept
    pub publish_failures: u64,
    /// The module acknowledged the final STOP
    pub detector_stopped: bool,
    /// Why the loop ended
    pub stop_reason: StopReason,
}

enum Flow {
    Continue,
    Stop(StopReason),
}

/// Engine instance owning the transport
pub struct Session<T: Read + Write> {
    link: RegisterTransactor<T>,
    engine: EngineConfig,
    smoother: MeasurementSmoother,
    reader: StreamReader,
    streaming: bool,
}

impl<T: Read + Write> Session<T> {
    /// Take ownership of a transport; both configurations are validated here
    pub fn new(transport: T, engine: EngineConfig, smoothing: SmootherConfig) -> Result<Self> {
        engine.validate()?;
        let smoother = MeasurementSmoother::new(smoothing)?;
        Ok(Self {
            link: RegisterTransactor::new(transport),
            engine,
            smoother,
            reader: StreamReader::new(engine.max_skip_bytes),
            streaming: false,
        })
    }

    /// Read one register
    ///
    /// While streaming, stream frames still in flight ahead of the response
    /// are dropped.
    pub fn read_register(&mut self, register: Register) -> Result<u32> {
        if self.streaming {
            self.link.read_register_streaming(register, &mut self.reader)
        } else {
            self.link.read_register(register)
        }
    }

    /// Write one register, returning the acknowledged value
    pub fn write_register(&mut self, register: Register, value: u32) -> Result<u32> {
        if self.streaming {
            self.link.write_register_streaming(register, value, &mut self.reader)
        } else {
            self.link.write_register(register, value)
        }
    }

    /// Read and decode the status register, logging every condition
    pub fn status(&mut self) -> Result<StatusFlags> {
        let flags = StatusFlags::decode(self.read_register(Register::Status)?);
        tracing::info!("Status 0x{:08X}", flags.raw());
        for condition in flags.iter() {
            if condition.is_error() {
                tracing::warn!("{}", condition);
            } else {
                tracing::info!("{}", condition);
            }
        }
        Ok(flags)
    }

    /// Read product id, version and maximum baud rate
    pub fn product_info(&mut self) -> Result<ProductInfo> {
        let info = ProductInfo {
            product_id: self.read_register(Register::ProductId)?,
            product_version: self.read_register(Register::ProductVersion)?,
            max_baud_rate: self.read_register(Register::MaxBaudRate)?,
        };
        tracing::info!("{}", info);
        Ok(info)
    }

    /// Apply profile writes in order; returns how many were acknowledged
    /// with a different value
    pub fn apply_profile(&mut self, profile: &ConfigurationProfile) -> Result<usize> {
        let mut rejected = 0;
        for write in profile.writes() {
            let ack = self.write_register(write.register, write.value)?;
            if ack != write.value {
                tracing::warn!(
                    "{} acknowledged 0x{:08X} instead of 0x{:08X}",
                    write.register,
                    ack,
                    write.value
                );
                rejected += 1;
            }
        }
        tracing::info!(
            "Applied profile: {} writes, {} rejected",
            profile.writes().len(),
            rejected
        );
        Ok(rejected)
    }

    /// Create and activate the configured detector
    pub fn start_streaming(&mut self) -> Result<()> {
        self.link
            .write_register_checked(Register::MainControl, main_control::CREATE_AND_ACTIVATE)?;
        self.streaming = true;
        tracing::info!("Streaming started");
        Ok(())
    }

    /// Run the streaming loop until shutdown, a closed sink or a terminal error
    ///
    /// Starts streaming first if needed. The detector is stopped on every exit.
    pub fn run(
        &mut self,
        shutdown: &ShutdownSignal,
        sink: &mut dyn MeasurementSink,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let result = if self.streaming {
            self.stream_loop(shutdown, sink, &mut summary)
        } else {
            self.start_streaming()
                .and_then(|()| self.stream_loop(shutdown, sink, &mut summary))
        };
        summary.detector_stopped = self.stop();

        match result {
            Ok(reason) => {
                summary.stop_reason = reason;
                tracing::info!(
                    "Streaming ended ({:?}): {} frames, {} averaged, {} resyncs, {} malformed",
                    reason,
                    summary.frames,
                    summary.averaged,
                    summary.resyncs,
                    summary.malformed
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!("Streaming failed after {} frames: {}", summary.frames, e);
                Err(e)
            }
        }
    }

    /// Stop the detector and release the transport
    pub fn close(mut self) {
        self.stop();
    }

    /// Whether the detector was started and not yet stopped
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Byte counters
    pub fn stats(&self) -> TransportStats {
        self.link.stats()
    }

    /// The smoother
    pub fn smoother(&self) -> &MeasurementSmoother {
        &self.smoother
    }

    fn stream_loop(
        &mut self,
        shutdown: &ShutdownSignal,
        sink: &mut dyn MeasurementSink,
        summary: &mut RunSummary,
    ) -> Result<StopReason> {
        let mut failures = 0u32;

        while !shutdown.is_triggered() {
            let before = self.reader.received_total();
            let read = self.reader.read_frame(self.link.get_mut());
            let stats = self.link.stats_mut();
            stats.bytes_received += self.reader.received_total() - before;
            stats.bytes_skipped = self.reader.skipped_total();

            let frame = match read {
                Ok(frame) => frame,
                Err(e) if e.is_recoverable() => {
                    failures += 1;
                    summary.resyncs += 1;
                    if failures > self.engine.max_resync_attempts {
                        return Err(TransportError::ResyncExhausted { attempts: failures }.into());
                    }
                    tracing::warn!(
                        "Stream read failed ({}), resynchronizing {}/{}",
                        e,
                        failures,
                        self.engine.max_resync_attempts
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            failures = 0;

            let entries = match parse_envelope(&frame.payload) {
                Ok(entries) => entries,
                Err(EngineError::MalformedPayload(reason)) => {
                    summary.malformed += 1;
                    tracing::warn!("Discarding frame: {}", reason);
                    continue;
                }
                Err(e) => return Err(e),
            };
            summary.frames += 1;
            if entries.is_empty() {
                summary.empty_frames += 1;
            }

            let average = self.smoother.accept(&entries);

            if self.smoother.config().publish_raw && !entries.is_empty() {
                if let Some(selection) = self.smoother.last_selection() {
                    let reading = Reading::raw(selection.distance_mm, selection.entry.amplitude);
                    if let Flow::Stop(reason) = publish(sink, &reading, summary) {
                        return Ok(reason);
                    }
                }
            }

            if let Some(average) = average {
                let reading = Reading::averaged(average);
                if let Flow::Stop(reason) = publish(sink, &reading, summary) {
                    return Ok(reason);
                }
            }
        }

        Ok(StopReason::Shutdown)
    }

    /// Best-effort STOP; true when the module acknowledged it
    fn stop(&mut self) -> bool {
        if !self.streaming {
            return false;
        }

        let result = self.write_register(Register::MainControl, main_control::STOP);
        self.streaming = false;
        match result {
            Ok(_) => {
                tracing::info!("Detector stopped");
                true
            }
            Err(e) => {
                tracing::warn!("Failed to stop detector: {}", e);
                false
            }
        }
    }
}

impl<T: Read + Write> Drop for Session<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn publish(sink: &mut dyn MeasurementSink, reading: &Reading, summary: &mut RunSummary) -> Flow {
    match sink.publish(reading) {
        Ok(()) => {
            match reading.kind {
                ReadingKind::Averaged => summary.averaged += 1,
                ReadingKind::Raw => summary.raw += 1,
            }
            Flow::Continue
        }
        Err(SinkError::Closed) => {
            tracing::info!("Sink closed, leaving stream loop");
            Flow::Stop(StopReason::SinkClosed)
        }
        Err(e) => {
            summary.publish_failures += 1;
            tracing::warn!("Failed to publish reading: {}", e);
            Flow::Continue
        }
    }
}
