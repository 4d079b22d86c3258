//! Diagnostic service configuration

use serde::{Deserialize, Serialize};

/// Diagnostic service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticConfig {
    /// Occurrences before a DTC is confirmed
    #[serde(default = "default_confirmation_threshold")]
    pub dtc_confirmation_threshold: u16,

    /// Status bits this ECU supports, reported in ReadDTCInformation
    #[serde(default = "default_availability_mask")]
    pub dtc_status_availability_mask: u8,

    /// Reference speed for a calibration routine started without parameters, km/h
    #[serde(default = "default_routine_reference_speed")]
    pub routine_reference_speed: f32,

    /// Sampling duration of a calibration routine started without parameters
    #[serde(default = "default_routine_duration_ms")]
    pub routine_duration_ms: u32,
}

fn default_confirmation_threshold() -> u16 {
    3
}

fn default_availability_mask() -> u8 {
    0xFF
}

fn default_routine_reference_speed() -> f32 {
    50.0
}

fn default_routine_duration_ms() -> u32 {
    10_000
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            dtc_confirmation_threshold: default_confirmation_threshold(),
            dtc_status_availability_mask: default_availability_mask(),
            routine_reference_speed: default_routine_reference_speed(),
            routine_duration_ms: default_routine_duration_ms(),
        }
    }
}
