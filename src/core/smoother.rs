//! Measurement smoothing
//!
//! Each streaming frame contributes at most one value: the distance of its
//! strongest reflection, in millimeters, minus a calibration offset. Values
//! feed a fixed-size moving window and the window average is emitted every
//! `cadence` accepted frames.

use crate::core::error::{EngineError, Result};
use crate::core::protocol::MeasurementEntry;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Smoother configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// Number of accepted frames averaged
    pub window_size: u32,
    /// Accepted frames between emissions
    pub cadence: u32,
    /// Calibration offset subtracted from every distance, in mm
    pub offset_mm: f64,
    /// Also publish every per-frame value
    pub publish_raw: bool,
}

impl SmootherConfig {
    /// Create a configuration with no offset
    pub fn new(window_size: u32, cadence: u32) -> Self {
        Self {
            window_size,
            cadence,
            offset_mm: 0.0,
            publish_raw: false,
        }
    }

    /// Set calibration offset
    #[must_use]
    pub fn offset_mm(mut self, offset_mm: f64) -> Self {
        self.offset_mm = offset_mm;
        self
    }

    /// Enable per-frame publishing
    #[must_use]
    pub fn publish_raw(mut self, enable: bool) -> Self {
        self.publish_raw = enable;
        self
    }

    /// Reject zero window or cadence and non-finite offsets
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(EngineError::Config("window_size must be at least 1".into()));
        }
        if self.cadence == 0 {
            return Err(EngineError::Config("cadence must be at least 1".into()));
        }
        if !self.offset_mm.is_finite() {
            return Err(EngineError::Config("offset_mm must be finite".into()));
        }
        Ok(())
    }
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self::new(10, 10)
    }
}

/// Fixed-size moving average
#[derive(Debug, Clone)]
pub struct SlidingWindowAverage {
    window_size: usize,
    values: VecDeque<f64>,
    running_sum: f64,
}

impl SlidingWindowAverage {
    /// Create an empty window; a size of zero is treated as one
    pub fn new(window_size: u32) -> Self {
        let window_size = window_size.max(1) as usize;
        Self {
            window_size,
            values: VecDeque::with_capacity(window_size),
            running_sum: 0.0,
        }
    }

    /// Add a value, evicting the oldest once the window is full
    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
        self.running_sum += value;

        while self.values.len() > self.window_size {
            if let Some(old) = self.values.pop_front() {
                self.running_sum -= old;
            }
        }
    }

    /// Mean of the current values
    pub fn average(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.running_sum / self.values.len() as f64)
        }
    }

    /// Values oldest first
    pub fn values(&self) -> &VecDeque<f64> {
        &self.values
    }

    /// Sum of the current values
    pub fn sum(&self) -> f64 {
        self.running_sum
    }

    /// Number of values held
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Window holds no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Capacity
    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

/// Value selected from one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    /// The strongest entry of the frame
    pub entry: MeasurementEntry,
    /// Its distance in mm after the calibration offset
    pub distance_mm: f64,
}

/// Strongest reflection of a frame; the first one wins a tie
pub fn select_peak(entries: &[MeasurementEntry]) -> Option<MeasurementEntry> {
    entries.iter().copied().fold(None, |best, entry| match best {
        Some(b) if b.amplitude >= entry.amplitude => Some(b),
        _ => Some(entry),
    })
}

/// Per-frame selection, moving window and cadence-gated emission
#[derive(Debug, Clone)]
pub struct MeasurementSmoother {
    config: SmootherConfig,
    window: SlidingWindowAverage,
    counter: u32,
    accepted: u64,
    last: Option<Selection>,
}

impl MeasurementSmoother {
    /// Create a smoother from a validated configuration
    pub fn new(config: SmootherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            window: SlidingWindowAverage::new(config.window_size),
            counter: 0,
            accepted: 0,
            last: None,
        })
    }

    /// Feed one frame's entries; returns the window average on a cadence tick
    ///
    /// An empty frame leaves the window and the counter untouched.
    pub fn accept(&mut self, entries: &[MeasurementEntry]) -> Option<f64> {
        let entry = select_peak(entries)?;
        let distance_mm = f64::from(entry.distance_m) * 1000.0 - self.config.offset_mm;

        self.window.push(distance_mm);
        self.last = Some(Selection { entry, distance_mm });
        self.accepted += 1;
        self.counter += 1;

        if self.counter >= self.config.cadence {
            self.counter = 0;
            self.window.average()
        } else {
            None
        }
    }

    /// Selection made by the most recent accepted frame
    pub fn last_selection(&self) -> Option<Selection> {
        self.last
    }

    /// Accepted frames since the last emission
    pub fn pending(&self) -> u32 {
        self.counter
    }

    /// Accepted frames in total
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// The moving window
    pub fn window(&self) -> &SlidingWindowAverage {
        &self.window
    }

    /// Active configuration
    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }
}
