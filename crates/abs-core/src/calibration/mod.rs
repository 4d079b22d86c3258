//! Wheel-speed sensor calibration
//!
//! Each wheel owns one [`CalibrationCoefficients`] set and at most one
//! [`CalibrationSession`]. Sessions move through
//!
//! ```text
//!   Idle ──start──▶ Requested ──cycle──▶ Sampling ──┬──▶ Completed ──apply──▶ Idle
//!                                                  ├──▶ Failed
//!                                                  └──▶ Cancelled
//! ```
//!
//! Terminal states keep their outcome until the next start request so that
//! tooling can read the result. Only `Requested` and `Sampling` count as busy.

mod manager;

pub use manager::CalibrationManager;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AbsError;
use crate::wheel::WheelPosition;

/// Default sensor pulses per wheel revolution
pub const DEFAULT_PULSES_PER_REVOLUTION: u16 = 60;
/// Default rolling circumference in meters
pub const DEFAULT_WHEEL_CIRCUMFERENCE_M: f32 = 2.1;
/// Number of history entries kept per wheel
pub const HISTORY_SIZE: usize = 10;

// =============================================================================
// Coefficients
// =============================================================================

/// Live calibration for one wheel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCoefficients {
    pub correction_factor: f32,
    pub offset: f32,
    pub pulses_per_revolution: u16,
    /// Wheel circumference in meters
    pub circumference_m: f32,
    pub valid: bool,
    /// When these coefficients were applied, ms since start
    pub applied_at_ms: u64,
}

impl Default for CalibrationCoefficients {
    fn default() -> Self {
        Self::factory()
    }
}

impl CalibrationCoefficients {
    /// Factory defaults: unity correction, nominal geometry
    pub fn factory() -> Self {
        Self {
            correction_factor: 1.0,
            offset: 0.0,
            pulses_per_revolution: DEFAULT_PULSES_PER_REVOLUTION,
            circumference_m: DEFAULT_WHEEL_CIRCUMFERENCE_M,
            valid: true,
            applied_at_ms: 0,
        }
    }

    /// Whether the speed processor can use these values at all
    pub fn is_acceptable(&self) -> bool {
        self.correction_factor > 0.5
            && self.correction_factor < 2.0
            && self.pulses_per_revolution > 0
            && self.circumference_m > 0.0
    }

    /// Tighter plausibility window used by the self-test
    pub fn is_plausible(&self) -> bool {
        (0.8..=1.2).contains(&self.correction_factor)
            && (30..=120).contains(&self.pulses_per_revolution)
            && (1.5..=3.0).contains(&self.circumference_m)
    }

    /// Accuracy estimate from the factor's distance to unity, in percent
    pub fn accuracy(&self) -> f32 {
        ((1.0 - (self.correction_factor - 1.0).abs()) * 100.0).max(0.0)
    }
}

// =============================================================================
// Session types
// =============================================================================

/// How a calibration was initiated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CalibrationMethod {
    Manual = 0,
    Automatic = 1,
    ReferenceBased = 2,
    GpsBased = 3,
    FactoryReset = 4,
}

/// Outcome code recorded on sessions and history entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CalibrationOutcome {
    Ok = 0,
    NotOk = 1,
    InvalidParam = 2,
    OutOfRange = 3,
    NvmError = 4,
    ValidationFailed = 5,
    InProgress = 6,
}

/// Calibration session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CalibrationState {
    #[default]
    Idle = 0,
    Requested = 1,
    Sampling = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

impl CalibrationState {
    /// Requested or sampling
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Requested | Self::Sampling)
    }
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Requested => "requested",
            Self::Sampling => "sampling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A start request for one wheel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRequest {
    pub wheel: WheelPosition,
    pub method: CalibrationMethod,
    /// Reference speed in km/h the wheel is compared against
    pub reference_speed: f32,
    /// Accepted deviation in percent
    pub tolerance_percent: f32,
    /// Sampling duration in ms
    pub duration_ms: u32,
}

impl CalibrationRequest {
    pub fn manual(wheel: WheelPosition, reference_speed: f32, tolerance_percent: f32) -> Self {
        Self {
            wheel,
            method: CalibrationMethod::Manual,
            reference_speed,
            tolerance_percent,
            duration_ms: 10_000,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if !(self.reference_speed > 0.0) {
            return Err(format!(
                "reference speed must be positive, got {}",
                self.reference_speed
            ));
        }
        if !(self.tolerance_percent > 0.0 && self.tolerance_percent <= 100.0) {
            return Err(format!(
                "tolerance must be within (0, 100], got {}",
                self.tolerance_percent
            ));
        }
        if self.duration_ms == 0 {
            return Err("sampling duration must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Observed and reference speed captured in one calibration cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePair {
    pub observed: f32,
    pub reference: f32,
}

/// Per-wheel calibration session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibrationSession {
    pub state: CalibrationState,
    pub request: Option<CalibrationRequest>,
    pub outcome: Option<CalibrationOutcome>,
    #[serde(skip)]
    pub(crate) samples: Vec<SamplePair>,
    pub correction_factor: f32,
    pub offset: f32,
    pub accuracy: f32,
    pub started_ms: u64,
    pub ended_ms: u64,
}

impl CalibrationSession {
    pub fn samples_collected(&self) -> usize {
        self.samples.len()
    }
}

/// One applied calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationHistoryEntry {
    pub timestamp_ms: u64,
    pub method: CalibrationMethod,
    pub outcome: CalibrationOutcome,
    pub old_correction_factor: f32,
    pub new_correction_factor: f32,
    pub accuracy: f32,
}

/// Calibration problem surfaced to the diagnostic layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationFault {
    /// Session failed validation or timed out
    Failed(WheelPosition),
    /// Computed factor outside the configured band
    OutOfRange(WheelPosition),
    /// Store read or write failed
    Nvm(WheelPosition),
}

impl CalibrationFault {
    pub fn wheel(&self) -> WheelPosition {
        match self {
            Self::Failed(w) | Self::OutOfRange(w) | Self::Nvm(w) => *w,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Calibration manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Sample buffer capacity per session
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    /// Samples needed before a session may complete
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    #[serde(default = "default_min_correction_factor")]
    pub min_correction_factor: f32,

    #[serde(default = "default_max_correction_factor")]
    pub max_correction_factor: f32,

    /// Tolerance in percent when a request does not set one
    #[serde(default = "default_tolerance")]
    pub default_tolerance_percent: f32,

    /// Absolute session timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_true")]
    pub auto_calibration: bool,

    #[serde(default = "default_auto_interval_ms")]
    pub auto_interval_ms: u64,

    /// Reference speed used for automatic requests, km/h
    #[serde(default = "default_auto_reference_speed")]
    pub auto_reference_speed: f32,

    #[serde(default = "default_auto_duration_ms")]
    pub auto_duration_ms: u32,

    /// Wheels below this accuracy are recalibrated automatically
    #[serde(default = "default_auto_min_accuracy")]
    pub auto_min_accuracy: f32,
}

fn default_max_samples() -> usize {
    1000
}

fn default_min_samples() -> usize {
    50
}

fn default_min_correction_factor() -> f32 {
    0.5
}

fn default_max_correction_factor() -> f32 {
    1.5
}

fn default_tolerance() -> f32 {
    2.0
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_auto_interval_ms() -> u64 {
    3_600_000
}

fn default_auto_reference_speed() -> f32 {
    50.0
}

fn default_auto_duration_ms() -> u32 {
    10_000
}

fn default_auto_min_accuracy() -> f32 {
    90.0
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            max_samples: default_max_samples(),
            min_samples: default_min_samples(),
            min_correction_factor: default_min_correction_factor(),
            max_correction_factor: default_max_correction_factor(),
            default_tolerance_percent: default_tolerance(),
            timeout_ms: default_timeout_ms(),
            auto_calibration: default_true(),
            auto_interval_ms: default_auto_interval_ms(),
            auto_reference_speed: default_auto_reference_speed(),
            auto_duration_ms: default_auto_duration_ms(),
            auto_min_accuracy: default_auto_min_accuracy(),
        }
    }
}

impl CalibrationConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<(), AbsError> {
        if self.min_samples == 0 || self.min_samples > self.max_samples {
            return Err(AbsError::InvalidParameter {
                name: "min_samples",
                reason: format!(
                    "must be within 1..={}, got {}",
                    self.max_samples, self.min_samples
                ),
            });
        }
        if !(self.min_correction_factor > 0.0
            && self.min_correction_factor < self.max_correction_factor)
        {
            return Err(AbsError::InvalidParameter {
                name: "correction_factor_band",
                reason: format!(
                    "invalid band [{}, {}]",
                    self.min_correction_factor, self.max_correction_factor
                ),
            });
        }
        if !(self.default_tolerance_percent > 0.0 && self.default_tolerance_percent <= 100.0) {
            return Err(AbsError::InvalidParameter {
                name: "default_tolerance_percent",
                reason: format!("must be within (0, 100], got {}", self.default_tolerance_percent),
            });
        }
        if self.timeout_ms == 0 {
            return Err(AbsError::InvalidParameter {
                name: "timeout_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Whether a factor lies inside the accepted band
    pub fn in_band(&self, correction_factor: f32) -> bool {
        correction_factor >= self.min_correction_factor
            && correction_factor <= self.max_correction_factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_coefficients() {
        let c = CalibrationCoefficients::factory();
        assert_eq!(c.correction_factor, 1.0);
        assert_eq!(c.pulses_per_revolution, 60);
        assert!(c.valid);
        assert!(c.is_acceptable());
        assert!(c.is_plausible());
        assert_eq!(c.accuracy(), 100.0);
    }

    #[test]
    fn test_accuracy_clamped() {
        let c = CalibrationCoefficients {
            correction_factor: 2.5,
            ..CalibrationCoefficients::factory()
        };
        assert_eq!(c.accuracy(), 0.0);
        assert!(!c.is_acceptable());
    }

    #[test]
    fn test_plausibility_window() {
        let c = CalibrationCoefficients {
            correction_factor: 1.25,
            ..CalibrationCoefficients::factory()
        };
        assert!(c.is_acceptable());
        assert!(!c.is_plausible());
    }

    #[test]
    fn test_request_validation() {
        let mut req = CalibrationRequest::manual(WheelPosition::FrontLeft, 50.0, 2.0);
        assert!(req.validate().is_ok());
        req.reference_speed = 0.0;
        assert!(req.validate().is_err());
        req.reference_speed = 50.0;
        req.tolerance_percent = 0.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_config_defaults_from_empty_document() {
        let config: CalibrationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CalibrationConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_inverted_band() {
        let config = CalibrationConfig {
            min_correction_factor: 1.5,
            max_correction_factor: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_busy_states() {
        assert!(CalibrationState::Requested.is_busy());
        assert!(CalibrationState::Sampling.is_busy());
        assert!(!CalibrationState::Completed.is_busy());
        assert!(!CalibrationState::Idle.is_busy());
    }
}
