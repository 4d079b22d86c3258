//! Integration tests for the ABS wheel-speed supervisor
//!
//! The tests drive the core system and the diagnostic service together,
//! with synthetic sensor input and a simulated clock.
//!
//! # Test Structure
//!
//! - `scenarios_test.rs` - detection, calibration and DTC scenarios over UDS
//! - `ecu_test.rs` - controller with the file-backed calibration store
//!
//! ```bash
//! cargo test -p abs-tests
//! ```

use std::sync::Arc;

use abs_core::processor::pulses_for_speed;
use abs_core::{AbsSystem, CoreConfig, CycleInput, RawSample, SharedMemoryStore, SystemState};
use abs_uds::{DiagnosticConfig, DiagnosticService, DiagnosticSession};

/// Detection cycle period used by the bench
pub const CYCLE_MS: u64 = 20;

/// Counting window of synthetic samples
pub const WINDOW_MS: u16 = 100;

/// Raw sample for a wheel turning at `speed_kmh` on the factory geometry
pub fn raw_at(speed_kmh: f32) -> RawSample {
    RawSample::new(pulses_for_speed(speed_kmh, WINDOW_MS, 60, 2.1), WINDOW_MS)
}

/// Cycle input with every wheel at `speed_kmh`
pub fn steady(speed_kmh: f32) -> CycleInput {
    CycleInput {
        raw: [raw_at(speed_kmh); 4],
        ..Default::default()
    }
}

/// Core system, diagnostic service and a simulated clock
pub struct Bench {
    pub system: Arc<AbsSystem>,
    pub service: DiagnosticService,
    pub store: SharedMemoryStore,
    pub now_ms: u64,
}

impl Bench {
    pub fn new() -> Self {
        Self::with_store(SharedMemoryStore::default())
    }

    pub fn with_store(store: SharedMemoryStore) -> Self {
        let system = Arc::new(AbsSystem::new(CoreConfig::default(), Box::new(store.clone())));
        let service = DiagnosticService::new(system.clone(), DiagnosticConfig::default());
        Self {
            system,
            service,
            store,
            now_ms: 0,
        }
    }

    /// One detection cycle, DTC update and calibration cycle; advances the clock
    pub fn cycle(&mut self, input: &CycleInput) -> SystemState {
        let state = self.system.detection_cycle(input, self.now_ms);
        self.service.monitor(self.now_ms);
        self.system.calibration_cycle(self.now_ms);
        self.now_ms += CYCLE_MS;
        state
    }

    pub fn run(&mut self, input: &CycleInput, cycles: usize) -> SystemState {
        let mut state = SystemState::Inactive;
        for _ in 0..cycles {
            state = self.cycle(input);
        }
        state
    }

    pub fn request(&self, request: &[u8]) -> Vec<u8> {
        self.service.process_request(request, self.now_ms)
    }

    /// Switch session and check the positive response
    pub fn enter(&self, session: DiagnosticSession) {
        let response = self.request(&[0x10, session.level()]);
        assert_eq!(
            response.first(),
            Some(&0x50),
            "session change refused: {}",
            hex::encode(&response)
        );
    }
}

impl Default for Bench {
    fn default() -> Self {
        Self::new()
    }
}
