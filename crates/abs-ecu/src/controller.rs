//! ABS controller: cycle orchestration and request handling
//!
//! The controller owns the core system, the diagnostic service and the
//! sensor source. The binary drives [`AbsController::detection_step`] and
//! [`AbsController::calibration_step`] from timers and forwards transport
//! requests to [`AbsController::handle_request`].

use std::sync::Arc;
use std::time::Instant;

use abs_core::{AbsSystem, CalibrationStore, SystemState, WheelPosition};
use abs_uds::{DiagnosticService, DiagnosticSession, DtcEntry};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::EcuConfig;
use crate::simulation::SensorSource;

/// Point-in-time view of the controller for logging
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub timestamp_ms: u64,
    pub state: SystemState,
    pub reference_speed: f32,
    pub wheel_speeds: [f32; 4],
    pub correction_factors: [f32; 4],
    pub confirmed_wheels: Vec<WheelPosition>,
    pub session: DiagnosticSession,
    pub dtcs: Vec<DtcEntry>,
}

pub struct AbsController {
    system: Arc<AbsSystem>,
    service: DiagnosticService,
    sensors: Mutex<Box<dyn SensorSource>>,
    started: Instant,
}

impl AbsController {
    pub fn new(
        config: &EcuConfig,
        store: Box<dyn CalibrationStore>,
        sensors: Box<dyn SensorSource>,
    ) -> Self {
        let system = Arc::new(AbsSystem::new(config.core(), store));
        let service = DiagnosticService::new(system.clone(), config.diagnostics.clone());
        info!(
            cycle_ms = config.detection.cycle_ms,
            debounce_ms = config.detection.debounce_ms,
            "ABS controller initialised"
        );
        Self {
            system,
            service,
            sensors: Mutex::new(sensors),
            started: Instant::now(),
        }
    }

    /// Milliseconds since the controller was created
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn system(&self) -> &Arc<AbsSystem> {
        &self.system
    }

    pub fn service(&self) -> &DiagnosticService {
        &self.service
    }

    /// Sample sensors, run detection, then update DTCs
    pub fn detection_step(&self, now_ms: u64) -> SystemState {
        let input = self.sensors.lock().sample(now_ms);
        let state = self.system.detection_cycle(&input, now_ms);
        let reported = self.service.monitor(now_ms);
        if reported > 0 {
            debug!(reported, state = %state, "DTCs reported");
        }
        state
    }

    pub fn calibration_step(&self, now_ms: u64) {
        self.system.calibration_cycle(now_ms);
    }

    pub fn handle_request(&self, request: &[u8], now_ms: u64) -> Vec<u8> {
        self.service.process_request(request, now_ms)
    }

    pub fn snapshot(&self, now_ms: u64) -> StatusSnapshot {
        let (state, reference_speed, records) = {
            let detector = self.system.detector();
            (
                detector.system_state(),
                detector.reference_speed(),
                detector.records(),
            )
        };
        let speeds = self.system.processor().latest_all();
        let coefficients = self.system.calibration().all_coefficients();

        StatusSnapshot {
            timestamp_ms: now_ms,
            state,
            reference_speed,
            wheel_speeds: speeds.map(|s| s.speed),
            correction_factors: coefficients.map(|c| c.correction_factor),
            confirmed_wheels: WheelPosition::ALL
                .into_iter()
                .filter(|w| records[w.index()].confirmed)
                .collect(),
            session: self.service.session(),
            dtcs: self.service.dtc_snapshot(),
        }
    }
}
