//! abs-core - Wheel-speed processing, malfunction detection and calibration
//!
//! The core of an anti-lock braking controller's sensor supervision:
//!
//! - [`processor`] - raw pulse counts to calibrated speed, acceleration and quality
//! - [`detector`] - cross-wheel plausibility, debouncing and severity grading
//! - [`calibration`] - calibration sessions, coefficient ownership and history
//! - [`persistence`] - calibration block storage seam
//! - [`system`] - shared component state and cycle ordering

pub mod calibration;
pub mod detector;
pub mod error;
pub mod persistence;
pub mod processor;
pub mod sensor;
pub mod system;
pub mod wheel;

pub use calibration::{
    CalibrationCoefficients, CalibrationConfig, CalibrationFault, CalibrationManager,
    CalibrationMethod, CalibrationOutcome, CalibrationRequest, CalibrationState,
};
pub use detector::{
    DetectionParameters, FaultKind, MalfunctionDetector, MalfunctionRecord, Severity, SystemState,
};
pub use error::{AbsError, CalibrationError, CalibrationResult};
pub use persistence::{CalibrationStore, MemoryStore, PersistenceError, SharedMemoryStore};
pub use processor::{ProcessorConfig, SpeedProcessor};
pub use sensor::{RawSample, SensorStatus, SpeedSample};
pub use system::{AbsSystem, CoreConfig, CycleInput};
pub use wheel::{PerWheel, WheelPosition, WHEEL_COUNT};
