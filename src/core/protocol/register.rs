//! Register map of the XM122 module
//!
//! The address set is fixed by the module firmware. Only the registers the
//! engine or a configuration profile may touch are listed here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Register address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RegisterRef", into = "RegisterRef")]
#[repr(u8)]
pub enum Register {
    /// Service / detector mode selection (0x02)
    ModeSelection = 0x02,
    /// Main control: create, activate, stop (0x03)
    MainControl = 0x03,
    /// Streaming control: UART streaming on/off (0x05)
    StreamingControl = 0x05,
    /// Module status bitmask (0x06)
    Status = 0x06,
    /// UART baud rate (0x07)
    BaudRate = 0x07,
    /// Power mode (0x0A)
    PowerMode = 0x0A,
    /// Product identification (0x10)
    ProductId = 0x10,
    /// Product version (0x11)
    ProductVersion = 0x11,
    /// Maximum supported UART baud rate (0x12)
    MaxBaudRate = 0x12,
    /// Distance detector: range start in mm (0x20)
    RangeStart = 0x20,
    /// Distance detector: range length in mm (0x21)
    RangeLength = 0x21,
    /// Distance detector: update rate in mHz (0x23)
    UpdateRate = 0x23,
    /// Distance detector: receiver gain in 1/1000 (0x24)
    Gain = 0x24,
    /// Distance detector: fixed threshold amplitude (0x42)
    ThresholdAmplitude = 0x42,
    /// Distance detector: number of detected reflections (0xB0)
    DetectedCount = 0xB0,
    /// Distance detector: first peak distance (0xB1)
    PeakDistance0 = 0xB1,
    /// Distance detector: first peak amplitude (0xB2)
    PeakAmplitude0 = 0xB2,
    /// Distance detector: second peak distance (0xB3)
    PeakDistance1 = 0xB3,
    /// Distance detector: second peak amplitude (0xB4)
    PeakAmplitude1 = 0xB4,
    /// Distance detector: third peak distance (0xB5)
    PeakDistance2 = 0xB5,
    /// Distance detector: third peak amplitude (0xB6)
    PeakAmplitude2 = 0xB6,
    /// Distance detector: fourth peak distance (0xB7)
    PeakDistance3 = 0xB7,
    /// Distance detector: fourth peak amplitude (0xB8)
    PeakAmplitude3 = 0xB8,
    /// Output buffer length (0xE9)
    OutputBufferLength = 0xE9,
}

impl Register {
    /// All known registers, in address order
    pub fn all() -> &'static [Register] {
        &[
            Register::ModeSelection,
            Register::MainControl,
            Register::StreamingControl,
            Register::Status,
            Register::BaudRate,
            Register::PowerMode,
            Register::ProductId,
            Register::ProductVersion,
            Register::MaxBaudRate,
            Register::RangeStart,
            Register::RangeLength,
            Register::UpdateRate,
            Register::Gain,
            Register::ThresholdAmplitude,
            Register::DetectedCount,
            Register::PeakDistance0,
            Register::PeakAmplitude0,
            Register::PeakDistance1,
            Register::PeakAmplitude1,
            Register::PeakDistance2,
            Register::PeakAmplitude2,
            Register::PeakDistance3,
            Register::PeakAmplitude3,
            Register::OutputBufferLength,
        ]
    }

    /// Wire address
    pub fn address(self) -> u8 {
        self as u8
    }

    /// Look up a register by wire address
    pub fn from_u8(address: u8) -> Option<Self> {
        Self::all().iter().copied().find(|r| r.address() == address)
    }

    /// Configuration / CLI name
    pub fn name(self) -> &'static str {
        match self {
            Register::ModeSelection => "mode_selection",
            Register::MainControl => "main_control",
            Register::StreamingControl => "streaming_control",
            Register::Status => "status",
            Register::BaudRate => "baud_rate",
            Register::PowerMode => "power_mode",
            Register::ProductId => "product_id",
            Register::ProductVersion => "product_version",
            Register::MaxBaudRate => "max_baud_rate",
            Register::RangeStart => "range_start",
            Register::RangeLength => "range_length",
            Register::UpdateRate => "update_rate",
            Register::Gain => "gain",
            Register::ThresholdAmplitude => "threshold_amplitude",
            Register::DetectedCount => "detected_count",
            Register::PeakDistance0 => "peak_distance_0",
            Register::PeakAmplitude0 => "peak_amplitude_0",
            Register::PeakDistance1 => "peak_distance_1",
            Register::PeakAmplitude1 => "peak_amplitude_1",
            Register::PeakDistance2 => "peak_distance_2",
            Register::PeakAmplitude2 => "peak_amplitude_2",
            Register::PeakDistance3 => "peak_distance_3",
            Register::PeakAmplitude3 => "peak_amplitude_3",
            Register::OutputBufferLength => "output_buffer_length",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.address())
    }
}

/// Error parsing a register reference
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown register: {0}")]
pub struct UnknownRegister(pub String);

impl FromStr for Register {
    type Err = UnknownRegister;

    /// Accepts a register name (`update_rate`) or an address (`0x23`, `35`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let by_address = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u8::from_str_radix(hex, 16).ok()
        } else {
            s.parse::<u8>().ok()
        };

        by_address
            .and_then(Register::from_u8)
            .or_else(|| {
                let lower = s.to_lowercase().replace('-', "_");
                Register::all().iter().copied().find(|r| r.name() == lower)
            })
            .ok_or_else(|| UnknownRegister(s.to_string()))
    }
}

/// Serialized form of a register: name or numeric address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RegisterRef {
    Address(u8),
    Name(String),
}

impl TryFrom<RegisterRef> for Register {
    type Error = UnknownRegister;

    fn try_from(value: RegisterRef) -> Result<Self, Self::Error> {
        match value {
            RegisterRef::Address(address) => Register::from_u8(address)
                .ok_or_else(|| UnknownRegister(format!("0x{address:02X}"))),
            RegisterRef::Name(name) => name.parse(),
        }
    }
}

impl From<Register> for RegisterRef {
    fn from(register: Register) -> Self {
        RegisterRef::Name(register.name().to_string())
    }
}

/// Values written to [`Register::MainControl`]
pub mod main_control {
    /// Stop and destroy the active service or detector
    pub const STOP: u32 = 0;
    /// Create the configured service or detector
    pub const CREATE: u32 = 1;
    /// Activate a created service or detector
    pub const ACTIVATE: u32 = 2;
    /// Create and activate in one step
    pub const CREATE_AND_ACTIVATE: u32 = 3;
    /// Clear the error bits of the status register
    pub const CLEAR_STATUS: u32 = 4;
}

/// Values written to [`Register::ModeSelection`]
pub mod mode {
    /// Power bins service
    pub const POWER_BINS: u32 = 0x01;
    /// Envelope service
    pub const ENVELOPE: u32 = 0x02;
    /// IQ service
    pub const IQ: u32 = 0x03;
    /// Sparse service
    pub const SPARSE: u32 = 0x04;
    /// Distance detector
    pub const DISTANCE_DETECTOR: u32 = 0x200;
    /// Presence detector
    pub const PRESENCE_DETECTOR: u32 = 0x400;
}

/// Values written to [`Register::StreamingControl`]
pub mod streaming {
    /// No streaming, results are read from registers
    pub const DISABLED: u32 = 0;
    /// Results are streamed over the UART
    pub const UART: u32 = 1;
}
