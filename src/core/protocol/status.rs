//! Status register decoding

use serde::Serialize;
use std::fmt;

/// Condition reported by a bit of the status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCondition {
    /// Service or detector is created
    ServiceCreated,
    /// Service or detector is activated
    ServiceActivated,
    /// Data is ready to be read from the buffer
    DataReady,
    /// An error occurred in the module
    InternalError,
    /// Invalid command or parameter received
    InvalidCommand,
    /// Invalid mode
    InvalidMode,
    /// Error creating the requested service or detector
    CreateError,
    /// Error activating the requested service or detector
    ActivateError,
}

impl StatusCondition {
    /// All conditions, in bit order
    pub fn all() -> &'static [StatusCondition] {
        &[
            StatusCondition::ServiceCreated,
            StatusCondition::ServiceActivated,
            StatusCondition::DataReady,
            StatusCondition::InternalError,
            StatusCondition::InvalidCommand,
            StatusCondition::InvalidMode,
            StatusCondition::CreateError,
            StatusCondition::ActivateError,
        ]
    }

    /// Status register bit for this condition
    pub fn mask(self) -> u32 {
        match self {
            StatusCondition::ServiceCreated => 0x0000_0001,
            StatusCondition::ServiceActivated => 0x0000_0002,
            StatusCondition::DataReady => 0x0000_0100,
            StatusCondition::InternalError => 0x0001_0000,
            StatusCondition::InvalidCommand => 0x0002_0000,
            StatusCondition::InvalidMode => 0x0004_0000,
            StatusCondition::CreateError => 0x0008_0000,
            StatusCondition::ActivateError => 0x0010_0000,
        }
    }

    /// Whether the condition reports a fault
    pub fn is_error(self) -> bool {
        matches!(
            self,
            StatusCondition::InternalError
                | StatusCondition::InvalidCommand
                | StatusCondition::InvalidMode
                | StatusCondition::CreateError
                | StatusCondition::ActivateError
        )
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self {
            StatusCondition::ServiceCreated => "Service or detector is created",
            StatusCondition::ServiceActivated => "Service or detector is activated",
            StatusCondition::DataReady => "Data is ready to be read from the buffer",
            StatusCondition::InternalError => "An error occurred in the module",
            StatusCondition::InvalidCommand => "Invalid command or parameter received",
            StatusCondition::InvalidMode => "Invalid mode",
            StatusCondition::CreateError => "Error creating the requested service or detector",
            StatusCondition::ActivateError => "Error activating the requested service or detector",
        }
    }
}

impl fmt::Display for StatusCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Decoded view over a status register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusFlags {
    raw: u32,
}

impl StatusFlags {
    /// Decode a raw status register value
    pub fn decode(value: u32) -> Self {
        Self { raw: value }
    }

    /// Raw register value
    pub fn raw(&self) -> u32 {
        self.raw
    }

    /// Check a single condition
    pub fn contains(&self, condition: StatusCondition) -> bool {
        self.raw & condition.mask() != 0
    }

    /// No defined condition is set
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Any fault condition is set
    pub fn has_error(&self) -> bool {
        self.iter().any(StatusCondition::is_error)
    }

    /// Conditions present, in bit order
    pub fn iter(&self) -> impl Iterator<Item = StatusCondition> + '_ {
        StatusCondition::all()
            .iter()
            .copied()
            .filter(move |c| self.contains(*c))
    }

    /// Conditions present, collected
    pub fn conditions(&self) -> Vec<StatusCondition> {
        self.iter().collect()
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.raw)?;
        for condition in self.iter() {
            write!(f, "\n  {condition}")?;
        }
        Ok(())
    }
}
