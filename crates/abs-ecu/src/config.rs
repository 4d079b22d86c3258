//! ABS ECU configuration
//!
//! One file configures transport, the core components, the diagnostic
//! service, calibration storage and the sensor simulation. Every section is
//! optional; defaults reproduce the reference constants.

use std::path::{Path, PathBuf};

use abs_core::{AbsError, CalibrationConfig, CoreConfig, DetectionParameters, ProcessorConfig};
use abs_uds::DiagnosticConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] AbsError),
}

/// Complete ECU configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EcuConfig {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub detection: DetectionParameters,

    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cycles: CycleConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl EcuConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = read(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = read(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AbsError> {
        self.detection.validate()?;
        self.calibration.validate()?;
        if self.cycles.calibration_cycle_ms == 0 {
            return Err(AbsError::InvalidParameter {
                name: "calibration_cycle_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Configuration of the core components
    pub fn core(&self) -> CoreConfig {
        CoreConfig {
            processor: self.processor.clone(),
            detection: self.detection.clone(),
            calibration: self.calibration.clone(),
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// =============================================================================
// Transport Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// CAN interface
    #[serde(default = "default_interface")]
    pub interface: String,

    /// ECU's receive CAN ID (tester sends to this)
    #[serde(default = "default_rx_id")]
    pub rx_id: String,

    /// ECU's transmit CAN ID (ECU sends from this)
    #[serde(default = "default_tx_id")]
    pub tx_id: String,
}

fn default_interface() -> String {
    "vcan0".to_string()
}

fn default_rx_id() -> String {
    "0x18DA28F1".to_string()
}

fn default_tx_id() -> String {
    "0x18DAF128".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            rx_id: default_rx_id(),
            tx_id: default_tx_id(),
        }
    }
}

// =============================================================================
// Storage and cycles
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one file per calibration block
    #[serde(default = "default_storage_dir")]
    pub directory: PathBuf,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("calibration")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_storage_dir(),
        }
    }
}

/// Periods of the slower tasks; the detection period is `detection.cycle_ms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleConfig {
    #[serde(default = "default_calibration_cycle_ms")]
    pub calibration_cycle_ms: u64,

    /// Period of the status snapshot log line, 0 disables it
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
}

fn default_calibration_cycle_ms() -> u64 {
    20
}

fn default_status_interval_ms() -> u64 {
    1000
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            calibration_cycle_ms: default_calibration_cycle_ms(),
            status_interval_ms: default_status_interval_ms(),
        }
    }
}

// =============================================================================
// Simulation
// =============================================================================

/// Simulated wheel-speed sensors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Vehicle speed, km/h
    #[serde(default = "default_speed")]
    pub speed_kmh: f32,

    /// Peak uniform noise added per wheel and cycle, km/h
    #[serde(default = "default_noise")]
    pub noise_kmh: f32,

    /// Per-wheel speed scale (FL, FR, RL, RR), e.g. for a worn tyre
    #[serde(default = "default_wheel_scale")]
    pub wheel_scale: [f32; 4],

    /// Pulse counting window
    #[serde(default = "default_window_ms")]
    pub window_ms: u16,

    #[serde(default = "default_pulses_per_revolution")]
    pub pulses_per_revolution: u16,

    #[serde(default = "default_circumference")]
    pub circumference_m: f32,

    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_speed() -> f32 {
    60.0
}

fn default_noise() -> f32 {
    0.5
}

fn default_wheel_scale() -> [f32; 4] {
    [1.0; 4]
}

fn default_window_ms() -> u16 {
    100
}

fn default_pulses_per_revolution() -> u16 {
    abs_core::calibration::DEFAULT_PULSES_PER_REVOLUTION
}

fn default_circumference() -> f32 {
    abs_core::calibration::DEFAULT_WHEEL_CIRCUMFERENCE_M
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            speed_kmh: default_speed(),
            noise_kmh: default_noise(),
            wheel_scale: default_wheel_scale(),
            window_ms: default_window_ms(),
            pulses_per_revolution: default_pulses_per_revolution(),
            circumference_m: default_circumference(),
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EcuConfig::default();
        assert_eq!(config.detection.debounce_ms, 100);
        assert_eq!(config.calibration.min_samples, 50);
        assert_eq!(config.diagnostics.dtc_confirmation_threshold, 3);
        assert_eq!(config.processor.max_speed_kmh, 300.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[transport]
interface = "can1"

[detection]
debounce_ms = 200

[simulation]
speed_kmh = 80.0
wheel_scale = [1.0, 1.0, 1.0, 1.15]
seed = 7
"#
        )
        .unwrap();

        let config = EcuConfig::load(file.path()).unwrap();
        assert_eq!(config.transport.interface, "can1");
        assert_eq!(config.transport.rx_id, "0x18DA28F1");
        assert_eq!(config.detection.debounce_ms, 200);
        assert_eq!(config.detection.cycle_ms, 20);
        assert_eq!(config.simulation.wheel_scale[3], 1.15);
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.core().detection.debounce_ms, 200);
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "diagnostics:\n  dtc_confirmation_threshold: 5\n").unwrap();
        let config = EcuConfig::load_yaml(file.path()).unwrap();
        assert_eq!(config.diagnostics.dtc_confirmation_threshold, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[calibration]\nmin_samples = 0").unwrap();
        assert!(matches!(
            EcuConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            EcuConfig::load("/nonexistent/abs-ecu.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
