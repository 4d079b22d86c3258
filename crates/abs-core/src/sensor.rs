//! Sensor-side data types
//!
//! A [`RawSample`] is what the hardware layer delivers each detection cycle.
//! The [`SpeedProcessor`](crate::processor::SpeedProcessor) turns it into a
//! [`SpeedSample`] that the detector and the calibration manager consume.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hardware status reported alongside each raw sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SensorStatus {
    #[default]
    Ok = 0,
    ShortCircuit = 1,
    OpenCircuit = 2,
    OutOfRange = 3,
    CalibrationError = 4,
    Invalid = 5,
}

impl From<u8> for SensorStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::ShortCircuit,
            2 => Self::OpenCircuit,
            3 => Self::OutOfRange,
            4 => Self::CalibrationError,
            _ => Self::Invalid,
        }
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::ShortCircuit => "short_circuit",
            Self::OpenCircuit => "open_circuit",
            Self::OutOfRange => "out_of_range",
            Self::CalibrationError => "calibration_error",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Pulse count and measurement interval for one wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawSample {
    pub pulse_count: u16,
    /// Measurement interval in milliseconds
    pub elapsed_ms: u16,
    pub status: SensorStatus,
    pub valid: bool,
}

impl RawSample {
    pub fn new(pulse_count: u16, elapsed_ms: u16) -> Self {
        Self {
            pulse_count,
            elapsed_ms,
            status: SensorStatus::Ok,
            valid: true,
        }
    }

    /// Sample reporting a hardware fault
    pub fn faulted(status: SensorStatus) -> Self {
        Self {
            pulse_count: 0,
            elapsed_ms: 0,
            status,
            valid: false,
        }
    }
}

/// Processed wheel speed for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeedSample {
    /// Uncorrected speed in km/h
    pub raw_speed: f32,
    /// Speed after correction factor and offset, km/h
    pub speed: f32,
    /// Longitudinal wheel acceleration in m/s²
    pub acceleration: f32,
    pub valid: bool,
    /// Advisory quality score, 0..=100
    pub quality: u8,
}

impl SpeedSample {
    pub fn invalid() -> Self {
        Self::default()
    }
}

/// Lifetime counters kept per sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorDiagnostics {
    pub total_pulse_count: u32,
    pub error_count: u16,
    pub calibration_changes: u16,
    pub last_status: SensorStatus,
    pub last_error_ms: u64,
}
