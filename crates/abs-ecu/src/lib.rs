//! abs-ecu - ABS wheel-speed supervisor ECU
//!
//! # Modules
//!
//! - [`config`] - TOML/YAML configuration for every component
//! - [`controller`] - cycle orchestration and UDS request handling
//! - [`simulation`] - sensor source trait and simulated wheel sensors
//! - [`store`] - CRC-guarded file store for calibration blocks

pub mod config;
pub mod controller;
pub mod simulation;
pub mod store;

pub use config::{ConfigError, EcuConfig};
pub use controller::{AbsController, StatusSnapshot};
pub use simulation::{SensorSource, SimulatedSensors};
pub use store::FileStore;
