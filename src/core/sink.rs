//! Telemetry sinks
//!
//! The session hands every emitted [`Reading`] to a [`MeasurementSink`]. The
//! crate ships sinks for a channel, the log and any `io::Write`; network
//! publishers (MQTT, InfluxDB) live outside and usually consume the channel.

use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::io::Write;
use thiserror::Error;

/// What a reading represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingKind {
    /// Moving-window average emitted at the configured cadence
    Averaged,
    /// Value selected from a single frame
    Raw,
}

impl ReadingKind {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Averaged => "averaged",
            Self::Raw => "raw",
        }
    }
}

/// Distance value handed to a sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Time the reading was produced
    pub timestamp: DateTime<Local>,
    /// Distance in millimeters, calibration offset applied
    pub distance_mm: f64,
    /// Averaged or raw
    pub kind: ReadingKind,
    /// Amplitude of the selected reflection (raw readings only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<u16>,
}

impl Reading {
    /// Averaged reading stamped now
    pub fn averaged(distance_mm: f64) -> Self {
        Self {
            timestamp: Local::now(),
            distance_mm,
            kind: ReadingKind::Averaged,
            amplitude: None,
        }
    }

    /// Raw reading stamped now
    pub fn raw(distance_mm: f64, amplitude: u16) -> Self {
        Self {
            timestamp: Local::now(),
            distance_mm,
            kind: ReadingKind::Raw,
            amplitude: Some(amplitude),
        }
    }
}

/// Sink error types
#[derive(Error, Debug)]
pub enum SinkError {
    /// The receiving side of a channel went away
    #[error("Sink channel closed")]
    Closed,

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing the formatted reading failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Consumer of readings
#[cfg_attr(test, mockall::automock)]
pub trait MeasurementSink {
    /// Deliver one reading
    fn publish(&mut self, reading: &Reading) -> Result<(), SinkError>;
}

/// Forwards readings over a crossbeam channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<Reading>,
}

impl ChannelSink {
    /// Wrap an existing sender
    pub fn new(tx: Sender<Reading>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver that drains it
    pub fn unbounded() -> (Self, Receiver<Reading>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl MeasurementSink for ChannelSink {
    fn publish(&mut self, reading: &Reading) -> Result<(), SinkError> {
        self.tx.send(reading.clone()).map_err(|_| SinkError::Closed)
    }
}

/// Logs readings at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl MeasurementSink for LogSink {
    fn publish(&mut self, reading: &Reading) -> Result<(), SinkError> {
        tracing::info!(
            kind = reading.kind.as_str(),
            amplitude = reading.amplitude,
            "distance {:.1} mm",
            reading.distance_mm
        );
        Ok(())
    }
}

/// Output format for written readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// CSV rows
    Csv,
    /// InfluxDB line protocol
    Line,
}

/// Format one reading; `measurement` names the series in line protocol
pub fn format_reading(
    reading: &Reading,
    format: OutputFormat,
    measurement: &str,
) -> Result<String, SinkError> {
    let line = match format {
        OutputFormat::Text => match reading.amplitude {
            Some(amplitude) => format!(
                "{} {:>8} {:10.1} mm  amp {}",
                reading.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                reading.kind.as_str(),
                reading.distance_mm,
                amplitude
            ),
            None => format!(
                "{} {:>8} {:10.1} mm",
                reading.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                reading.kind.as_str(),
                reading.distance_mm
            ),
        },
        OutputFormat::Json => serde_json::to_string(reading)?,
        OutputFormat::Csv => format!(
            "{},{},{:.3},{}",
            reading.timestamp.to_rfc3339(),
            reading.kind.as_str(),
            reading.distance_mm,
            reading.amplitude.map(|a| a.to_string()).unwrap_or_default()
        ),
        OutputFormat::Line => {
            let mut fields = format!("level={}", reading.distance_mm);
            if let Some(amplitude) = reading.amplitude {
                fields.push_str(&format!(",amplitude={amplitude}i"));
            }
            format!(
                "{},kind={} {} {}",
                escape_measurement(measurement),
                reading.kind.as_str(),
                fields,
                reading.timestamp.timestamp_nanos_opt().unwrap_or_default()
            )
        }
    };
    Ok(line)
}

/// CSV header matching [`OutputFormat::Csv`] rows
pub const CSV_HEADER: &str = "timestamp,kind,distance_mm,amplitude";

fn escape_measurement(name: &str) -> String {
    name.replace(',', "\\,").replace(' ', "\\ ")
}

/// Writes formatted readings to any `io::Write`
pub struct WriterSink<W: Write> {
    writer: W,
    format: OutputFormat,
    measurement: String,
}

impl<W: Write> WriterSink<W> {
    /// Create a writer sink; CSV output starts with a header row
    pub fn new(mut writer: W, format: OutputFormat, measurement: &str) -> Result<Self, SinkError> {
        if format == OutputFormat::Csv {
            writeln!(writer, "{CSV_HEADER}")?;
        }
        Ok(Self {
            writer,
            format,
            measurement: measurement.to_string(),
        })
    }

    /// Give the writer back
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> MeasurementSink for WriterSink<W> {
    fn publish(&mut self, reading: &Reading) -> Result<(), SinkError> {
        let line = format_reading(reading, self.format, &self.measurement)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed(kind: ReadingKind, amplitude: Option<u16>) -> Reading {
        Reading {
            timestamp: Local.timestamp_opt(1_700_000_000, 0).unwrap(),
            distance_mm: 1234.5,
            kind,
            amplitude,
        }
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (mut sink, rx) = ChannelSink::unbounded();
        sink.publish(&Reading::averaged(10.0)).unwrap();
        sink.publish(&Reading::raw(11.0, 40)).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, ReadingKind::Averaged);
        assert_eq!(first.distance_mm, 10.0);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.amplitude, Some(40));
    }

    #[test]
    fn test_channel_sink_closed() {
        let (mut sink, rx) = ChannelSink::unbounded();
        drop(rx);
        assert!(matches!(sink.publish(&Reading::averaged(1.0)), Err(SinkError::Closed)));
    }

    #[test]
    fn test_line_protocol() {
        let reading = fixed(ReadingKind::Raw, Some(77));
        let line = format_reading(&reading, OutputFormat::Line, "pegel graefte").unwrap();
        assert_eq!(
            line,
            "pegel\\ graefte,kind=raw level=1234.5,amplitude=77i 1700000000000000000"
        );
    }

    #[test]
    fn test_json_skips_missing_amplitude() {
        let reading = fixed(ReadingKind::Averaged, None);
        let json = format_reading(&reading, OutputFormat::Json, "level").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["distance_mm"], 1234.5);
        assert_eq!(value["kind"], "averaged");
        assert!(value.get("amplitude").is_none());
    }

    #[test]
    fn test_writer_sink_csv() {
        let mut sink = WriterSink::new(Vec::new(), OutputFormat::Csv, "level").unwrap();
        sink.publish(&fixed(ReadingKind::Averaged, None)).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let mut lines = out.lines();

        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert!(lines.next().unwrap().ends_with(",averaged,1234.500,"));
    }

    #[test]
    fn test_text_format() {
        let reading = fixed(ReadingKind::Raw, Some(5));
        let text = format_reading(&reading, OutputFormat::Text, "level").unwrap();
        assert!(text.contains("1234.5 mm"));
        assert!(text.ends_with("amp 5"));
    }
}
