//! Calibration session processing and coefficient ownership

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use super::{
    CalibrationCoefficients, CalibrationConfig, CalibrationFault, CalibrationHistoryEntry,
    CalibrationMethod, CalibrationOutcome, CalibrationRequest, CalibrationSession,
    CalibrationState, SamplePair, HISTORY_SIZE,
};
use crate::error::{AbsError, CalibrationError, CalibrationResult};
use crate::persistence::{CalibrationStore, PersistenceError};
use crate::sensor::SpeedSample;
use crate::wheel::{PerWheel, WheelPosition};

/// Owns the live coefficients, the per-wheel sessions and their history
pub struct CalibrationManager {
    config: CalibrationConfig,
    store: Box<dyn CalibrationStore>,
    coefficients: PerWheel<CalibrationCoefficients>,
    sessions: PerWheel<CalibrationSession>,
    history: PerWheel<VecDeque<CalibrationHistoryEntry>>,
    faults: Vec<CalibrationFault>,
    last_auto_check_ms: u64,
}

impl std::fmt::Debug for CalibrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationManager")
            .field("config", &self.config)
            .field("coefficients", &self.coefficients)
            .field("sessions", &self.sessions)
            .field("pending_faults", &self.faults.len())
            .finish_non_exhaustive()
    }
}

impl CalibrationManager {
    /// Create a manager with factory coefficients; call [`load_all`](Self::load_all)
    /// to pick up stored blocks
    pub fn new(config: CalibrationConfig, store: Box<dyn CalibrationStore>) -> Self {
        Self {
            config,
            store,
            coefficients: [CalibrationCoefficients::factory(); 4],
            sessions: Default::default(),
            history: Default::default(),
            faults: Vec::new(),
            last_auto_check_ms: 0,
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: CalibrationConfig) -> Result<(), AbsError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    // =========================================================================
    // Coefficients
    // =========================================================================

    pub fn coefficients(&self, wheel: WheelPosition) -> CalibrationCoefficients {
        self.coefficients[wheel.index()]
    }

    /// Snapshot of all four coefficient sets
    pub fn all_coefficients(&self) -> PerWheel<CalibrationCoefficients> {
        self.coefficients
    }

    /// Overwrite a wheel's coefficients directly
    ///
    /// The values are live immediately but not persisted; follow with
    /// [`save_to_store`](Self::save_to_store) to keep them.
    pub fn set_coefficients(
        &mut self,
        wheel: WheelPosition,
        coefficients: CalibrationCoefficients,
        now_ms: u64,
    ) -> CalibrationResult<()> {
        if !coefficients.is_acceptable() {
            return Err(CalibrationError::CoefficientsRejected(format!(
                "cf {} ppr {} circumference {}",
                coefficients.correction_factor,
                coefficients.pulses_per_revolution,
                coefficients.circumference_m
            )));
        }
        if coefficients.valid && !self.config.in_band(coefficients.correction_factor) {
            return Err(CalibrationError::CoefficientsRejected(format!(
                "cf {} outside [{}, {}]",
                coefficients.correction_factor,
                self.config.min_correction_factor,
                self.config.max_correction_factor
            )));
        }

        let old = self.coefficients[wheel.index()];
        let new = CalibrationCoefficients {
            applied_at_ms: now_ms,
            ..coefficients
        };
        self.coefficients[wheel.index()] = new;
        self.push_history(
            wheel,
            CalibrationHistoryEntry {
                timestamp_ms: now_ms,
                method: CalibrationMethod::Manual,
                outcome: CalibrationOutcome::Ok,
                old_correction_factor: old.correction_factor,
                new_correction_factor: new.correction_factor,
                accuracy: new.accuracy(),
            },
        );
        info!(wheel = %wheel, cf = new.correction_factor, offset = new.offset, "Coefficients written");
        Ok(())
    }

    /// Whether the live coefficients are usable, and their accuracy estimate
    pub fn validate_calibration(&self, wheel: WheelPosition) -> (bool, f32) {
        let c = &self.coefficients[wheel.index()];
        let valid = c.valid && c.is_acceptable() && self.config.in_band(c.correction_factor);
        (valid, c.accuracy())
    }

    pub fn reset_to_factory(&mut self, wheel: WheelPosition, now_ms: u64) -> CalibrationResult<()> {
        let old = self.coefficients[wheel.index()];
        let factory = CalibrationCoefficients {
            applied_at_ms: now_ms,
            ..CalibrationCoefficients::factory()
        };
        self.coefficients[wheel.index()] = factory;

        let persisted = self.persist(wheel);
        self.push_history(
            wheel,
            CalibrationHistoryEntry {
                timestamp_ms: now_ms,
                method: CalibrationMethod::FactoryReset,
                outcome: if persisted.is_ok() {
                    CalibrationOutcome::Ok
                } else {
                    CalibrationOutcome::NvmError
                },
                old_correction_factor: old.correction_factor,
                new_correction_factor: factory.correction_factor,
                accuracy: factory.accuracy(),
            },
        );
        info!(wheel = %wheel, "Calibration reset to factory defaults");
        persisted
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Load every wheel's block, falling back to factory values
    pub fn load_all(&mut self) {
        for wheel in WheelPosition::ALL {
            self.load_from_store(wheel);
        }
    }

    /// Load one wheel's block
    ///
    /// A missing block is a first boot and silently yields factory values.
    /// Unreadable blocks raise an NVM fault; out-of-band blocks are ignored.
    pub fn load_from_store(&mut self, wheel: WheelPosition) {
        let block_id = wheel.block_id();
        let loaded = match self.store.read_block(block_id) {
            Ok(c) if c.valid && c.is_acceptable() && self.config.in_band(c.correction_factor) => {
                debug!(wheel = %wheel, cf = c.correction_factor, "Calibration loaded");
                c
            }
            Ok(c) => {
                warn!(
                    wheel = %wheel,
                    cf = c.correction_factor,
                    valid = c.valid,
                    "Stored calibration rejected, using factory defaults"
                );
                CalibrationCoefficients::factory()
            }
            Err(PersistenceError::NotFound(_)) => {
                debug!(wheel = %wheel, "No stored calibration, using factory defaults");
                CalibrationCoefficients::factory()
            }
            Err(e) => {
                warn!(wheel = %wheel, error = %e, "Calibration read failed, using factory defaults");
                self.faults.push(CalibrationFault::Nvm(wheel));
                CalibrationCoefficients::factory()
            }
        };
        self.coefficients[wheel.index()] = loaded;
    }

    pub fn save_to_store(&mut self, wheel: WheelPosition) -> CalibrationResult<()> {
        self.persist(wheel)
    }

    fn persist(&mut self, wheel: WheelPosition) -> CalibrationResult<()> {
        let coefficients = self.coefficients[wheel.index()];
        self.store
            .write_block(wheel.block_id(), &coefficients)
            .map_err(|source| {
                warn!(wheel = %wheel, error = %source, "Calibration write failed");
                self.faults.push(CalibrationFault::Nvm(wheel));
                CalibrationError::Persistence { wheel, source }
            })
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub fn start_calibration(
        &mut self,
        request: CalibrationRequest,
        now_ms: u64,
    ) -> CalibrationResult<()> {
        let wheel = request.wheel;
        if self.sessions[wheel.index()].state.is_busy() {
            return Err(CalibrationError::SessionBusy(wheel));
        }
        request.validate().map_err(CalibrationError::InvalidRequest)?;

        self.sessions[wheel.index()] = CalibrationSession {
            state: CalibrationState::Requested,
            request: Some(request),
            outcome: Some(CalibrationOutcome::InProgress),
            started_ms: now_ms,
            ..CalibrationSession::default()
        };
        info!(
            wheel = %wheel,
            method = ?request.method,
            reference = request.reference_speed,
            tolerance = request.tolerance_percent,
            duration_ms = request.duration_ms,
            "Calibration requested"
        );
        Ok(())
    }

    /// Abort a session; partial results are discarded
    pub fn cancel_calibration(&mut self, wheel: WheelPosition, now_ms: u64) -> CalibrationResult<()> {
        let session = &mut self.sessions[wheel.index()];
        if session.state == CalibrationState::Idle {
            return Err(CalibrationError::NoActiveSession(wheel));
        }
        session.state = CalibrationState::Cancelled;
        session.outcome = Some(CalibrationOutcome::NotOk);
        session.samples.clear();
        session.ended_ms = now_ms;
        info!(wheel = %wheel, "Calibration cancelled");
        Ok(())
    }

    pub fn session_status(&self, wheel: WheelPosition) -> &CalibrationSession {
        &self.sessions[wheel.index()]
    }

    /// Apply a completed session's result
    ///
    /// On a persistence failure the new coefficients stay live and the error
    /// is returned.
    pub fn apply_calibration(
        &mut self,
        wheel: WheelPosition,
        persist: bool,
        now_ms: u64,
    ) -> CalibrationResult<()> {
        let session = &self.sessions[wheel.index()];
        if session.state != CalibrationState::Completed {
            return Err(CalibrationError::NotCompleted {
                wheel,
                state: session.state,
            });
        }

        let method = session
            .request
            .map(|r| r.method)
            .unwrap_or(CalibrationMethod::Manual);
        let accuracy = session.accuracy;
        let old = self.coefficients[wheel.index()];
        let new = CalibrationCoefficients {
            correction_factor: session.correction_factor,
            offset: session.offset,
            valid: true,
            applied_at_ms: now_ms,
            ..old
        };
        self.coefficients[wheel.index()] = new;
        self.sessions[wheel.index()] = CalibrationSession::default();

        let persisted = if persist { self.persist(wheel) } else { Ok(()) };
        self.push_history(
            wheel,
            CalibrationHistoryEntry {
                timestamp_ms: now_ms,
                method,
                outcome: if persisted.is_ok() {
                    CalibrationOutcome::Ok
                } else {
                    CalibrationOutcome::NvmError
                },
                old_correction_factor: old.correction_factor,
                new_correction_factor: new.correction_factor,
                accuracy,
            },
        );
        info!(
            wheel = %wheel,
            old_cf = old.correction_factor,
            new_cf = new.correction_factor,
            persist,
            "Calibration applied"
        );
        persisted
    }

    /// Calibration cycle: advance sessions, then run the periodic auto-check
    pub fn main_function(&mut self, now_ms: u64, samples: &PerWheel<SpeedSample>) {
        for wheel in WheelPosition::ALL {
            self.process_session(wheel, &samples[wheel.index()], now_ms);
        }

        if self.config.auto_calibration
            && now_ms.saturating_sub(self.last_auto_check_ms) >= self.config.auto_interval_ms
        {
            self.last_auto_check_ms = now_ms;
            self.auto_calibration_check(now_ms);
        }
    }

    fn process_session(&mut self, wheel: WheelPosition, sample: &SpeedSample, now_ms: u64) {
        let max_samples = self.config.max_samples;
        let min_samples = self.config.min_samples;
        let timeout_ms = self.config.timeout_ms;
        let session = &mut self.sessions[wheel.index()];

        match session.state {
            CalibrationState::Requested => {
                session.state = CalibrationState::Sampling;
                debug!(wheel = %wheel, "Calibration sampling started");
            }
            CalibrationState::Sampling => {
                let Some(request) = session.request else {
                    session.state = CalibrationState::Failed;
                    session.outcome = Some(CalibrationOutcome::InvalidParam);
                    return;
                };

                if sample.valid && session.samples.len() < max_samples {
                    session.samples.push(SamplePair {
                        observed: sample.raw_speed,
                        reference: request.reference_speed,
                    });
                }

                let elapsed = now_ms.saturating_sub(session.started_ms);
                if elapsed >= u64::from(request.duration_ms) && session.samples.len() >= min_samples
                {
                    self.finish_session(wheel, request, now_ms);
                } else if elapsed >= timeout_ms {
                    session.state = CalibrationState::Failed;
                    session.outcome = Some(CalibrationOutcome::NotOk);
                    session.ended_ms = now_ms;
                    warn!(
                        wheel = %wheel,
                        samples = session.samples.len(),
                        "Calibration timed out"
                    );
                    self.faults.push(CalibrationFault::Failed(wheel));
                }
            }
            _ => {}
        }
    }

    fn finish_session(&mut self, wheel: WheelPosition, request: CalibrationRequest, now_ms: u64) {
        let (min_cf, max_cf) = (
            self.config.min_correction_factor,
            self.config.max_correction_factor,
        );
        let min_samples = self.config.min_samples;
        let session = &mut self.sessions[wheel.index()];
        session.ended_ms = now_ms;

        let Some((correction_factor, accuracy)) = compute_factor(&session.samples, min_samples)
        else {
            session.state = CalibrationState::Failed;
            session.outcome = Some(CalibrationOutcome::NotOk);
            warn!(wheel = %wheel, min_samples, "Too few usable calibration samples");
            self.faults.push(CalibrationFault::Failed(wheel));
            return;
        };
        session.correction_factor = correction_factor;
        session.offset = 0.0;
        session.accuracy = accuracy;

        let fault = if !(min_cf..=max_cf).contains(&correction_factor) {
            session.state = CalibrationState::Failed;
            session.outcome = Some(CalibrationOutcome::OutOfRange);
            Some(CalibrationFault::OutOfRange(wheel))
        } else if accuracy < 100.0 - request.tolerance_percent {
            session.state = CalibrationState::Failed;
            session.outcome = Some(CalibrationOutcome::ValidationFailed);
            Some(CalibrationFault::Failed(wheel))
        } else {
            session.state = CalibrationState::Completed;
            session.outcome = Some(CalibrationOutcome::Ok);
            None
        };

        info!(
            wheel = %wheel,
            state = %session.state,
            cf = correction_factor,
            accuracy,
            samples = session.samples.len(),
            "Calibration finished"
        );

        if let Some(fault) = fault {
            self.faults.push(fault);
            return;
        }

        if request.method == CalibrationMethod::Automatic {
            if let Err(e) = self.apply_calibration(wheel, true, now_ms) {
                warn!(wheel = %wheel, error = %e, "Automatic calibration not persisted");
            }
        }
    }

    /// Start automatic sessions for wheels whose calibration is invalid or
    /// below the configured accuracy; returns the wheels that were started
    pub fn auto_calibration_check(&mut self, now_ms: u64) -> Vec<WheelPosition> {
        let mut started = Vec::new();
        for wheel in WheelPosition::ALL {
            let c = self.coefficients[wheel.index()];
            if c.valid && c.accuracy() >= self.config.auto_min_accuracy {
                continue;
            }
            // a completed manual result waits for stop or a new request
            let state = self.sessions[wheel.index()].state;
            if state.is_busy() || state == CalibrationState::Completed {
                continue;
            }
            let request = CalibrationRequest {
                wheel,
                method: CalibrationMethod::Automatic,
                reference_speed: self.config.auto_reference_speed,
                tolerance_percent: self.config.default_tolerance_percent,
                duration_ms: self.config.auto_duration_ms,
            };
            match self.start_calibration(request, now_ms) {
                Ok(()) => started.push(wheel),
                Err(e) => warn!(wheel = %wheel, error = %e, "Automatic calibration not started"),
            }
        }
        started
    }

    // =========================================================================
    // History and faults
    // =========================================================================

    /// History entries, oldest first
    pub fn history(&self, wheel: WheelPosition) -> Vec<CalibrationHistoryEntry> {
        self.history[wheel.index()].iter().copied().collect()
    }

    pub fn clear_history(&mut self, wheel: WheelPosition) {
        self.history[wheel.index()].clear();
    }

    /// Drain faults raised since the last call
    pub fn take_faults(&mut self) -> Vec<CalibrationFault> {
        std::mem::take(&mut self.faults)
    }

    fn push_history(&mut self, wheel: WheelPosition, entry: CalibrationHistoryEntry) {
        let ring = &mut self.history[wheel.index()];
        if ring.len() == HISTORY_SIZE {
            ring.pop_front();
        }
        ring.push_back(entry);
    }
}

/// Ratio of mean reference to mean observed speed, and its accuracy
///
/// Only pairs with both speeds positive count; `None` below `min_samples`.
fn compute_factor(samples: &[SamplePair], min_samples: usize) -> Option<(f32, f32)> {
    let (mut sum_obs, mut sum_ref, mut n) = (0.0f64, 0.0f64, 0u32);
    for pair in samples.iter().filter(|p| p.observed > 0.0 && p.reference > 0.0) {
        sum_obs += f64::from(pair.observed);
        sum_ref += f64::from(pair.reference);
        n += 1;
    }
    if n == 0 || (n as usize) < min_samples {
        return None;
    }
    let mean_obs = sum_obs / f64::from(n);
    let mean_ref = sum_ref / f64::from(n);
    let cf = mean_ref / mean_obs;
    let accuracy = 100.0 - (mean_obs - mean_ref).abs() / mean_ref * 100.0;
    Some((cf as f32, accuracy as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, MockCalibrationStore, SharedMemoryStore};
    use mockall::predicate::{always, eq};
    use pretty_assertions::assert_eq;

    const FL: WheelPosition = WheelPosition::FrontLeft;

    fn sample(raw_speed: f32) -> SpeedSample {
        SpeedSample {
            raw_speed,
            speed: raw_speed,
            acceleration: 0.0,
            valid: true,
            quality: 100,
        }
    }

    fn manager() -> (CalibrationManager, SharedMemoryStore) {
        let store = SharedMemoryStore::default();
        let config = CalibrationConfig {
            auto_calibration: false,
            ..Default::default()
        };
        (CalibrationManager::new(config, Box::new(store.clone())), store)
    }

    /// Run 20 ms calibration cycles until the wheel's session is no longer busy
    fn run_until_done(
        mgr: &mut CalibrationManager,
        wheel: WheelPosition,
        mut observed: impl FnMut(usize) -> f32,
        start_ms: u64,
    ) -> u64 {
        let mut now = start_ms;
        for cycle in 0..5_000 {
            now += 20;
            let mut samples = [SpeedSample::invalid(); 4];
            samples[wheel.index()] = sample(observed(cycle));
            mgr.main_function(now, &samples);
            if !mgr.session_status(wheel).state.is_busy() {
                break;
            }
        }
        now
    }

    fn request(reference: f32, tolerance: f32, duration_ms: u32) -> CalibrationRequest {
        CalibrationRequest {
            duration_ms,
            ..CalibrationRequest::manual(FL, reference, tolerance)
        }
    }

    #[test]
    fn test_session_completes_near_unity() {
        let (mut mgr, _) = manager();
        mgr.start_calibration(request(50.0, 2.0, 1_000), 0).unwrap();
        assert_eq!(mgr.session_status(FL).state, CalibrationState::Requested);

        run_until_done(&mut mgr, FL, |i| if i % 2 == 0 { 49.0 } else { 51.0 }, 0);

        let session = mgr.session_status(FL);
        assert_eq!(session.state, CalibrationState::Completed);
        assert_eq!(session.outcome, Some(CalibrationOutcome::Ok));
        assert!(session.samples_collected() >= 50);
        assert!((session.correction_factor - 1.0).abs() < 0.02);
        assert!(session.accuracy >= 98.0);
    }

    #[test]
    fn test_requested_moves_to_sampling_next_cycle() {
        let (mut mgr, _) = manager();
        mgr.start_calibration(request(50.0, 2.0, 1_000), 0).unwrap();
        mgr.main_function(20, &[sample(50.0); 4]);
        assert_eq!(mgr.session_status(FL).state, CalibrationState::Sampling);
        assert_eq!(mgr.session_status(FL).samples_collected(), 0);
        mgr.main_function(40, &[sample(50.0); 4]);
        assert_eq!(mgr.session_status(FL).samples_collected(), 1);
    }

    #[test]
    fn test_busy_and_invalid_requests() {
        let (mut mgr, _) = manager();
        mgr.start_calibration(request(50.0, 2.0, 1_000), 0).unwrap();
        assert_eq!(
            mgr.start_calibration(request(50.0, 2.0, 1_000), 10),
            Err(CalibrationError::SessionBusy(FL))
        );
        assert!(matches!(
            mgr.start_calibration(CalibrationRequest::manual(WheelPosition::RearLeft, 0.0, 2.0), 0),
            Err(CalibrationError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_out_of_range_factor_fails() {
        let (mut mgr, _) = manager();
        mgr.start_calibration(request(50.0, 50.0, 1_000), 0).unwrap();
        run_until_done(&mut mgr, FL, |_| 30.0, 0);

        let session = mgr.session_status(FL);
        assert_eq!(session.state, CalibrationState::Failed);
        assert_eq!(session.outcome, Some(CalibrationOutcome::OutOfRange));
        assert_eq!(mgr.take_faults(), vec![CalibrationFault::OutOfRange(FL)]);
        assert!(mgr.take_faults().is_empty());
    }

    #[test]
    fn test_accuracy_below_tolerance_fails_validation() {
        let (mut mgr, _) = manager();
        mgr.start_calibration(request(50.0, 2.0, 1_000), 0).unwrap();
        run_until_done(&mut mgr, FL, |_| 45.0, 0);

        let session = mgr.session_status(FL);
        assert_eq!(session.state, CalibrationState::Failed);
        assert_eq!(session.outcome, Some(CalibrationOutcome::ValidationFailed));
        assert!((session.accuracy - 90.0).abs() < 1e-3);
        assert_eq!(mgr.take_faults(), vec![CalibrationFault::Failed(FL)]);
    }

    #[test]
    fn test_timeout_without_enough_samples() {
        let (mut mgr, _) = manager();
        mgr.start_calibration(request(50.0, 2.0, 1_000), 0).unwrap();
        let mut now = 0;
        while mgr.session_status(FL).state.is_busy() {
            now += 20;
            mgr.main_function(now, &[SpeedSample::invalid(); 4]);
        }
        assert_eq!(now, 30_000);
        assert_eq!(mgr.session_status(FL).outcome, Some(CalibrationOutcome::NotOk));
        assert_eq!(mgr.take_faults(), vec![CalibrationFault::Failed(FL)]);
    }

    #[test]
    fn test_standstill_samples_do_not_count_towards_minimum() {
        let (mut mgr, _) = manager();
        mgr.start_calibration(request(50.0, 2.0, 1_000), 0).unwrap();
        run_until_done(&mut mgr, FL, |i| if i == 10 { 50.0 } else { 0.0 }, 0);

        let session = mgr.session_status(FL);
        assert_eq!(session.state, CalibrationState::Failed);
        assert_eq!(session.outcome, Some(CalibrationOutcome::NotOk));
        assert_eq!(mgr.take_faults(), vec![CalibrationFault::Failed(FL)]);
        assert_eq!(
            mgr.apply_calibration(FL, false, 2_000),
            Err(CalibrationError::NotCompleted {
                wheel: FL,
                state: CalibrationState::Failed,
            })
        );
    }

    #[test]
    fn test_cancel() {
        let (mut mgr, _) = manager();
        assert_eq!(
            mgr.cancel_calibration(FL, 0),
            Err(CalibrationError::NoActiveSession(FL))
        );
        mgr.start_calibration(request(50.0, 2.0, 1_000), 0).unwrap();
        mgr.main_function(20, &[sample(50.0); 4]);
        mgr.cancel_calibration(FL, 30).unwrap();
        let session = mgr.session_status(FL);
        assert_eq!(session.state, CalibrationState::Cancelled);
        assert_eq!(session.samples_collected(), 0);
        assert_eq!(mgr.coefficients(FL), CalibrationCoefficients::factory());

        // terminal state does not block a new start
        mgr.start_calibration(request(50.0, 2.0, 1_000), 40).unwrap();
    }

    #[test]
    fn test_apply_and_persist() {
        let (mut mgr, store) = manager();
        mgr.start_calibration(request(50.0, 5.0, 1_000), 0).unwrap();
        let now = run_until_done(&mut mgr, FL, |_| 49.0, 0);
        assert_eq!(mgr.session_status(FL).state, CalibrationState::Completed);

        mgr.apply_calibration(FL, true, now).unwrap();
        let c = mgr.coefficients(FL);
        assert!((c.correction_factor - 50.0 / 49.0).abs() < 1e-4);
        assert_eq!(c.offset, 0.0);
        assert!(c.valid);
        assert_eq!(c.applied_at_ms, now);
        assert_eq!(store.block(FL.block_id()), Some(c));
        assert_eq!(mgr.session_status(FL).state, CalibrationState::Idle);

        let history = mgr.history(FL);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_correction_factor, 1.0);
        assert_eq!(history[0].new_correction_factor, c.correction_factor);
    }

    #[test]
    fn test_apply_requires_completed() {
        let (mut mgr, _) = manager();
        assert_eq!(
            mgr.apply_calibration(FL, false, 0),
            Err(CalibrationError::NotCompleted {
                wheel: FL,
                state: CalibrationState::Idle
            })
        );
    }

    #[test]
    fn test_apply_persist_failure_keeps_coefficients() {
        let mut store = MockCalibrationStore::new();
        store
            .expect_write_block()
            .with(eq(FL.block_id()), always())
            .times(1)
            .returning(|id, _| {
                Err(PersistenceError::WriteFailed {
                    block_id: id,
                    reason: "flash busy".to_string(),
                })
            });
        let config = CalibrationConfig {
            auto_calibration: false,
            ..Default::default()
        };
        let mut mgr = CalibrationManager::new(config, Box::new(store));
        mgr.start_calibration(request(50.0, 5.0, 1_000), 0).unwrap();
        let now = run_until_done(&mut mgr, FL, |_| 49.5, 0);

        let err = mgr.apply_calibration(FL, true, now).unwrap_err();
        assert!(matches!(err, CalibrationError::Persistence { wheel: FL, .. }));
        assert!((mgr.coefficients(FL).correction_factor - 50.0 / 49.5).abs() < 1e-4);
        assert_eq!(mgr.take_faults(), vec![CalibrationFault::Nvm(FL)]);
        assert_eq!(mgr.history(FL)[0].outcome, CalibrationOutcome::NvmError);
    }

    #[test]
    fn test_load_from_store() {
        let good = CalibrationCoefficients {
            correction_factor: 1.03,
            ..CalibrationCoefficients::factory()
        };
        let out_of_band = CalibrationCoefficients {
            correction_factor: 1.9,
            ..CalibrationCoefficients::factory()
        };
        let store = MemoryStore::with_blocks([
            (WheelPosition::FrontLeft.block_id(), good),
            (WheelPosition::FrontRight.block_id(), out_of_band),
        ]);
        let mut mgr = CalibrationManager::new(CalibrationConfig::default(), Box::new(store));
        mgr.load_all();

        assert_eq!(mgr.coefficients(WheelPosition::FrontLeft), good);
        assert_eq!(
            mgr.coefficients(WheelPosition::FrontRight),
            CalibrationCoefficients::factory()
        );
        assert_eq!(
            mgr.coefficients(WheelPosition::RearLeft),
            CalibrationCoefficients::factory()
        );
        assert!(mgr.take_faults().is_empty(), "missing blocks are not faults");
    }

    #[test]
    fn test_load_read_failure_raises_nvm_fault() {
        let mut store = MockCalibrationStore::new();
        store.expect_read_block().returning(|id| {
            Err(PersistenceError::ReadFailed {
                block_id: id,
                reason: "bus error".to_string(),
            })
        });
        let mut mgr = CalibrationManager::new(CalibrationConfig::default(), Box::new(store));
        mgr.load_from_store(WheelPosition::RearRight);
        assert_eq!(
            mgr.take_faults(),
            vec![CalibrationFault::Nvm(WheelPosition::RearRight)]
        );
        assert_eq!(
            mgr.coefficients(WheelPosition::RearRight),
            CalibrationCoefficients::factory()
        );
    }

    #[test]
    fn test_reset_to_factory() {
        let (mut mgr, store) = manager();
        let skewed = CalibrationCoefficients {
            correction_factor: 1.2,
            ..CalibrationCoefficients::factory()
        };
        mgr.set_coefficients(FL, skewed, 5).unwrap();
        mgr.reset_to_factory(FL, 10).unwrap();

        assert_eq!(mgr.coefficients(FL).correction_factor, 1.0);
        assert_eq!(store.block(FL.block_id()).map(|c| c.correction_factor), Some(1.0));
        let history = mgr.history(FL);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].method, CalibrationMethod::FactoryReset);
        assert_eq!(history[1].old_correction_factor, 1.2);
    }

    #[test]
    fn test_set_coefficients_rejections() {
        let (mut mgr, _) = manager();
        let too_large = CalibrationCoefficients {
            correction_factor: 2.5,
            ..CalibrationCoefficients::factory()
        };
        assert!(matches!(
            mgr.set_coefficients(FL, too_large, 0),
            Err(CalibrationError::CoefficientsRejected(_))
        ));
        let out_of_band = CalibrationCoefficients {
            correction_factor: 1.7,
            ..CalibrationCoefficients::factory()
        };
        assert!(mgr.set_coefficients(FL, out_of_band, 0).is_err());
        assert_eq!(mgr.coefficients(FL), CalibrationCoefficients::factory());
    }

    #[test]
    fn test_validate_calibration() {
        let (mut mgr, _) = manager();
        assert_eq!(mgr.validate_calibration(FL), (true, 100.0));
        let c = CalibrationCoefficients {
            correction_factor: 1.05,
            ..CalibrationCoefficients::factory()
        };
        mgr.set_coefficients(FL, c, 0).unwrap();
        let (valid, accuracy) = mgr.validate_calibration(FL);
        assert!(valid);
        assert!((accuracy - 95.0).abs() < 1e-3);
    }

    #[test]
    fn test_history_ring_drops_oldest() {
        let (mut mgr, _) = manager();
        for i in 0..12u64 {
            mgr.reset_to_factory(FL, i).unwrap();
        }
        let history = mgr.history(FL);
        assert_eq!(history.len(), HISTORY_SIZE);
        assert_eq!(history[0].timestamp_ms, 2);
        mgr.clear_history(FL);
        assert!(mgr.history(FL).is_empty());
    }

    #[test]
    fn test_auto_check_starts_and_applies_session() {
        let store = SharedMemoryStore::default();
        let config = CalibrationConfig {
            auto_interval_ms: 1_000,
            auto_duration_ms: 1_000,
            ..Default::default()
        };
        let mut mgr = CalibrationManager::new(config, Box::new(store.clone()));
        let drifted = CalibrationCoefficients {
            correction_factor: 1.12,
            ..CalibrationCoefficients::factory()
        };
        mgr.set_coefficients(FL, drifted, 0).unwrap();

        mgr.main_function(1_000, &[sample(50.0); 4]);
        let session = mgr.session_status(FL);
        assert_eq!(session.state, CalibrationState::Requested);
        assert_eq!(session.request.map(|r| r.method), Some(CalibrationMethod::Automatic));
        assert_eq!(
            mgr.session_status(WheelPosition::FrontRight).state,
            CalibrationState::Idle
        );

        run_until_done(&mut mgr, FL, |_| 50.0, 1_000);
        assert_eq!(mgr.session_status(FL).state, CalibrationState::Idle);
        assert_eq!(mgr.coefficients(FL).correction_factor, 1.0);
        assert!(store.block(FL.block_id()).is_some());
    }

    #[test]
    fn test_auto_check_keeps_completed_manual_result() {
        let (mut mgr, _) = manager();
        let drifted = CalibrationCoefficients {
            correction_factor: 1.12,
            ..CalibrationCoefficients::factory()
        };
        mgr.set_coefficients(FL, drifted, 0).unwrap();
        mgr.start_calibration(request(50.0, 2.0, 1_000), 0).unwrap();
        let now = run_until_done(&mut mgr, FL, |_| 50.0, 0);
        assert_eq!(mgr.session_status(FL).state, CalibrationState::Completed);

        assert!(mgr.auto_calibration_check(now).is_empty());
        let session = mgr.session_status(FL);
        assert_eq!(session.state, CalibrationState::Completed);
        assert_eq!(session.request.map(|r| r.method), Some(CalibrationMethod::Manual));
    }

    #[test]
    fn test_set_config_validates() {
        let (mut mgr, _) = manager();
        let bad = CalibrationConfig {
            min_samples: 0,
            ..Default::default()
        };
        assert!(mgr.set_config(bad).is_err());
        assert_eq!(mgr.config().min_samples, 50);
    }
}
