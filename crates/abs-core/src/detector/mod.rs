//! Wheel-speed malfunction detection
//!
//! Every detection cycle the [`MalfunctionDetector`] cross-checks the four
//! wheel speeds against their median, checks each wheel's calibration drift
//! and acceleration plausibility, debounces what it finds and derives the
//! aggregate [`SystemState`].
//!
//! ```text
//!          ┌──────────┐ trip  ┌────────┐ timer ≥ debounce ┌───────────┐
//!   ──────▶│ inactive │──────▶│ active │─────────────────▶│ confirmed │
//!          └──────────┘       └────────┘                  └───────────┘
//!               ▲   clear for a     │ no trip                   │ no trip
//!               │  debounce period  ▼                           │
//!               └───────────── cooling down ◀──────────────────┘
//! ```

mod classify;
mod monitor;

pub use classify::{median_speed, quantize_deviation, severity_for};
pub use monitor::MalfunctionDetector;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AbsError;
use crate::sensor::{SensorStatus, SpeedSample};
use crate::wheel::PerWheel;

/// Kind of malfunction recorded for a wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FaultKind {
    #[default]
    None = 0,
    /// Correction factor drifted away from unity
    Miscalibration = 1,
    /// Wheel speed too far from the cross-wheel reference
    SpeedDifference = 2,
    /// Acceleration beyond the physical limit while not braking
    AccelerationImplausible = 3,
    /// Sensor hardware reporting faults for several consecutive cycles
    SensorFailure = 4,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Miscalibration => "miscalibration",
            Self::SpeedDifference => "speed_difference",
            Self::AccelerationImplausible => "acceleration_implausible",
            Self::SensorFailure => "sensor_failure",
        };
        f.write_str(s)
    }
}

/// Malfunction severity, ordered
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Severity {
    #[default]
    None = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Aggregate ABS state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SystemState {
    /// No detection cycle has run yet
    #[default]
    Inactive = 0,
    Monitoring = 1,
    Degraded = 2,
    Malfunction = 3,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inactive => "inactive",
            Self::Monitoring => "monitoring",
            Self::Degraded => "degraded",
            Self::Malfunction => "malfunction",
        };
        f.write_str(s)
    }
}

/// Per-wheel detector state
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MalfunctionRecord {
    pub kind: FaultKind,
    pub severity: Severity,
    /// Magnitude of the deviation that tripped the check
    pub deviation: f32,
    /// Number of cycles in which a check tripped
    pub occurrence_count: u16,
    /// Time the condition has been continuously active
    pub debounce_timer_ms: u32,
    /// Time the condition has been continuously clear
    pub clear_timer_ms: u32,
    pub active: bool,
    pub confirmed: bool,
    pub detected_at_ms: u64,
}

/// Vehicle-wide inputs to a detection cycle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleData {
    pub wheel_speeds: PerWheel<SpeedSample>,
    /// Hardware status behind each speed sample
    pub sensor_status: PerWheel<SensorStatus>,
    pub brake_pedal_pressed: bool,
    pub longitudinal_acceleration: f32,
    pub lateral_acceleration: f32,
}

/// Detector thresholds and switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionParameters {
    /// Cross-wheel speed difference threshold, km/h
    #[serde(default = "default_speed_difference")]
    pub speed_difference_threshold: f32,

    /// Wheel acceleration threshold, m/s²
    #[serde(default = "default_acceleration")]
    pub acceleration_threshold: f32,

    /// Calibration drift threshold, percent
    #[serde(default = "default_drift")]
    pub calibration_drift_threshold: f32,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,

    /// Detection cycle period
    #[serde(default = "default_cycle_ms")]
    pub cycle_ms: u32,

    /// Consecutive faulted cycles before a hardware fault counts as sensor failure
    #[serde(default = "default_consecutive_errors")]
    pub consecutive_errors_threshold: u8,

    #[serde(default = "default_true")]
    pub enable_miscalibration_check: bool,

    #[serde(default = "default_true")]
    pub enable_plausibility_check: bool,

    #[serde(default = "default_true")]
    pub enable_acceleration_check: bool,
}

fn default_speed_difference() -> f32 {
    30.0
}

fn default_acceleration() -> f32 {
    15.0
}

fn default_drift() -> f32 {
    10.0
}

fn default_debounce_ms() -> u32 {
    100
}

fn default_cycle_ms() -> u32 {
    20
}

fn default_consecutive_errors() -> u8 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for DetectionParameters {
    fn default() -> Self {
        Self {
            speed_difference_threshold: default_speed_difference(),
            acceleration_threshold: default_acceleration(),
            calibration_drift_threshold: default_drift(),
            debounce_ms: default_debounce_ms(),
            cycle_ms: default_cycle_ms(),
            consecutive_errors_threshold: default_consecutive_errors(),
            enable_miscalibration_check: true,
            enable_plausibility_check: true,
            enable_acceleration_check: true,
        }
    }
}

impl DetectionParameters {
    pub fn validate(&self) -> Result<(), AbsError> {
        let positive = [
            ("speed_difference_threshold", self.speed_difference_threshold),
            ("acceleration_threshold", self.acceleration_threshold),
            ("calibration_drift_threshold", self.calibration_drift_threshold),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(AbsError::InvalidParameter {
                    name,
                    reason: format!("must be positive, got {}", value),
                });
            }
        }
        if self.cycle_ms == 0 {
            return Err(AbsError::InvalidParameter {
                name: "cycle_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.consecutive_errors_threshold == 0 {
            return Err(AbsError::InvalidParameter {
                name: "consecutive_errors_threshold",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
