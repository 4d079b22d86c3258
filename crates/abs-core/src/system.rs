//! Shared component state and cycle ordering
//!
//! [`AbsSystem`] owns the three core components, each behind its own lock,
//! and runs the two periodic cycles in the order the components depend on
//! each other. The diagnostic layer holds an `Arc<AbsSystem>` and reaches the
//! components through the accessor guards.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calibration::{CalibrationConfig, CalibrationManager};
use crate::detector::{DetectionParameters, MalfunctionDetector, SystemState, VehicleData};
use crate::persistence::CalibrationStore;
use crate::processor::{ProcessorConfig, SpeedProcessor};
use crate::sensor::RawSample;
use crate::wheel::{PerWheel, WheelPosition};

/// Configuration for all core components
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub detection: DetectionParameters,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

/// Inputs gathered for one detection cycle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleInput {
    pub raw: PerWheel<RawSample>,
    pub brake_pedal_pressed: bool,
    pub longitudinal_acceleration: f32,
    pub lateral_acceleration: f32,
}

pub struct AbsSystem {
    processor: Mutex<SpeedProcessor>,
    detector: Mutex<MalfunctionDetector>,
    calibration: Mutex<CalibrationManager>,
}

impl AbsSystem {
    /// Build the components and load stored calibration
    pub fn new(config: CoreConfig, store: Box<dyn CalibrationStore>) -> Self {
        let max_speed = config.processor.max_speed_kmh;
        let mut calibration = CalibrationManager::new(config.calibration, store);
        calibration.load_all();

        Self {
            processor: Mutex::new(SpeedProcessor::new(config.processor)),
            detector: Mutex::new(MalfunctionDetector::new(config.detection, max_speed)),
            calibration: Mutex::new(calibration),
        }
    }

    /// Detection cycle: speed processing for all wheels, then detection
    ///
    /// Coefficients are copied once at the start so that every wheel in the
    /// cycle sees the same calibration.
    pub fn detection_cycle(&self, input: &CycleInput, now_ms: u64) -> SystemState {
        let coefficients = self.calibration.lock().all_coefficients();

        let (wheel_speeds, sensor_status) = {
            let mut processor = self.processor.lock();
            let speeds = WheelPosition::ALL.map(|w| {
                processor.process(w, &input.raw[w.index()], &coefficients[w.index()], now_ms)
            });
            let status = WheelPosition::ALL.map(|w| processor.last_status(w));
            (speeds, status)
        };

        let mut detector = self.detector.lock();
        detector.update_vehicle_data(VehicleData {
            wheel_speeds,
            sensor_status,
            brake_pedal_pressed: input.brake_pedal_pressed,
            longitudinal_acceleration: input.longitudinal_acceleration,
            lateral_acceleration: input.lateral_acceleration,
        });
        let state = detector.run_cycle(&coefficients, now_ms);
        debug!(state = %state, reference = detector.reference_speed(), "Detection cycle");
        state
    }

    /// Calibration cycle over the latest processed samples
    pub fn calibration_cycle(&self, now_ms: u64) {
        let samples = self.processor.lock().latest_all();
        self.calibration.lock().main_function(now_ms, &samples);
    }

    pub fn processor(&self) -> MutexGuard<'_, SpeedProcessor> {
        self.processor.lock()
    }

    pub fn detector(&self) -> MutexGuard<'_, MalfunctionDetector> {
        self.detector.lock()
    }

    pub fn calibration(&self) -> MutexGuard<'_, CalibrationManager> {
        self.calibration.lock()
    }
}

impl std::fmt::Debug for AbsSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbsSystem").finish_non_exhaustive()
    }
}
