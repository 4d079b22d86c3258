//! Detection cycle

use tracing::{debug, info, warn};

use super::classify::{median_speed, quantize_deviation, severity_for};
use super::{
    DetectionParameters, FaultKind, MalfunctionRecord, Severity, SystemState, VehicleData,
};
use crate::calibration::CalibrationCoefficients;
use crate::error::AbsError;
use crate::sensor::SensorStatus;
use crate::wheel::{PerWheel, WheelPosition};

/// Result of evaluating one wheel in one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
struct Trip {
    kind: FaultKind,
    deviation: f32,
}

/// Per-wheel malfunction detector
#[derive(Debug)]
pub struct MalfunctionDetector {
    params: DetectionParameters,
    vehicle: VehicleData,
    records: PerWheel<MalfunctionRecord>,
    consecutive_errors: PerWheel<u8>,
    reference_speed: f32,
    state: SystemState,
    /// Deviation assigned to a wheel without a valid sample
    max_deviation: f32,
}

impl MalfunctionDetector {
    /// Create a detector; `max_deviation` is the speed-range ceiling in km/h
    pub fn new(params: DetectionParameters, max_deviation: f32) -> Self {
        Self {
            params,
            vehicle: VehicleData::default(),
            records: Default::default(),
            consecutive_errors: [0; 4],
            reference_speed: 0.0,
            state: SystemState::Inactive,
            max_deviation,
        }
    }

    pub fn parameters(&self) -> &DetectionParameters {
        &self.params
    }

    /// Replace thresholds; rejected parameters leave the current set in place
    pub fn set_parameters(&mut self, params: DetectionParameters) -> Result<(), AbsError> {
        params.validate()?;
        info!(
            speed_diff = params.speed_difference_threshold,
            accel = params.acceleration_threshold,
            drift = params.calibration_drift_threshold,
            debounce_ms = params.debounce_ms,
            "Detection parameters updated"
        );
        self.params = params;
        Ok(())
    }

    /// Latch the vehicle inputs for the next cycle
    pub fn update_vehicle_data(&mut self, data: VehicleData) {
        self.vehicle = data;
    }

    pub fn vehicle_data(&self) -> &VehicleData {
        &self.vehicle
    }

    /// Run one detection cycle over all wheels
    pub fn run_cycle(
        &mut self,
        coefficients: &PerWheel<CalibrationCoefficients>,
        now_ms: u64,
    ) -> SystemState {
        self.reference_speed = median_speed(&self.vehicle.wheel_speeds);

        for wheel in WheelPosition::ALL {
            let trip = self.evaluate(wheel, &coefficients[wheel.index()]);
            self.update_record(wheel, trip, now_ms);
        }

        let previous = self.state;
        self.state = self.aggregate_state();
        if self.state != previous {
            info!(from = %previous, to = %self.state, "System state changed");
        }
        self.state
    }

    fn evaluate(&self, wheel: WheelPosition, coefficients: &CalibrationCoefficients) -> Option<Trip> {
        let i = wheel.index();
        let sample = &self.vehicle.wheel_speeds[i];

        if self.params.enable_miscalibration_check {
            let drift = quantize_deviation((coefficients.correction_factor - 1.0).abs() * 100.0);
            if drift > self.params.calibration_drift_threshold {
                return Some(Trip {
                    kind: FaultKind::Miscalibration,
                    deviation: drift,
                });
            }
        }

        if !sample.valid {
            let hardware_fault = self.vehicle.sensor_status[i] != SensorStatus::Ok;
            let streak = self.consecutive_errors[i].saturating_add(1);
            if hardware_fault && streak >= self.params.consecutive_errors_threshold {
                return Some(Trip {
                    kind: FaultKind::SensorFailure,
                    deviation: self.max_deviation,
                });
            }
            if self.params.enable_plausibility_check {
                return Some(Trip {
                    kind: FaultKind::SpeedDifference,
                    deviation: self.max_deviation,
                });
            }
            return None;
        }

        if self.params.enable_plausibility_check {
            let deviation = (sample.speed - self.reference_speed).abs();
            if deviation > self.params.speed_difference_threshold {
                return Some(Trip {
                    kind: FaultKind::SpeedDifference,
                    deviation,
                });
            }
        }

        if self.params.enable_acceleration_check && !self.vehicle.brake_pedal_pressed {
            let accel = sample.acceleration.abs();
            if accel > self.params.acceleration_threshold {
                return Some(Trip {
                    kind: FaultKind::AccelerationImplausible,
                    deviation: accel,
                });
            }
        }

        None
    }

    fn update_record(&mut self, wheel: WheelPosition, trip: Option<Trip>, now_ms: u64) {
        let i = wheel.index();
        let cycle_ms = self.params.cycle_ms;
        let debounce_ms = self.params.debounce_ms;
        let record = &mut self.records[i];

        match trip {
            Some(trip) => {
                self.consecutive_errors[i] = self.consecutive_errors[i].saturating_add(1);

                if !record.active {
                    record.detected_at_ms = now_ms;
                    debug!(wheel = %wheel, kind = %trip.kind, deviation = trip.deviation, "Malfunction condition active");
                }
                record.kind = trip.kind;
                record.severity = severity_for(trip.kind, trip.deviation);
                record.deviation = trip.deviation;
                record.occurrence_count = record.occurrence_count.saturating_add(1);
                record.active = true;
                record.clear_timer_ms = 0;
                record.debounce_timer_ms = record.debounce_timer_ms.saturating_add(cycle_ms);

                if !record.confirmed && record.debounce_timer_ms >= debounce_ms {
                    record.confirmed = true;
                    warn!(
                        wheel = %wheel,
                        kind = %record.kind,
                        severity = %record.severity,
                        deviation = record.deviation,
                        "Malfunction confirmed"
                    );
                }
            }
            None => {
                self.consecutive_errors[i] = 0;

                if record.active {
                    debug!(wheel = %wheel, "Malfunction condition cleared");
                }
                record.active = false;
                record.confirmed = false;
                record.debounce_timer_ms = 0;

                if record.kind != FaultKind::None {
                    record.clear_timer_ms = record.clear_timer_ms.saturating_add(cycle_ms);
                    if record.clear_timer_ms >= debounce_ms {
                        info!(wheel = %wheel, kind = %record.kind, "Malfunction record healed");
                        *record = MalfunctionRecord {
                            occurrence_count: record.occurrence_count,
                            ..MalfunctionRecord::default()
                        };
                    }
                }
            }
        }
    }

    fn aggregate_state(&self) -> SystemState {
        let confirmed = self.records.iter().filter(|r| r.confirmed);
        let mut any = false;
        for record in confirmed {
            if record.severity >= Severity::High {
                return SystemState::Malfunction;
            }
            any = true;
        }
        if any {
            SystemState::Degraded
        } else {
            SystemState::Monitoring
        }
    }

    pub fn record(&self, wheel: WheelPosition) -> MalfunctionRecord {
        self.records[wheel.index()]
    }

    pub fn records(&self) -> PerWheel<MalfunctionRecord> {
        self.records
    }

    /// Reset a wheel's record, including its occurrence counter
    pub fn clear_record(&mut self, wheel: WheelPosition) {
        self.records[wheel.index()] = MalfunctionRecord::default();
        self.consecutive_errors[wheel.index()] = 0;
        debug!(wheel = %wheel, "Malfunction record cleared");
    }

    pub fn clear_all(&mut self) {
        for wheel in WheelPosition::ALL {
            self.clear_record(wheel);
        }
        if self.state != SystemState::Inactive {
            self.state = SystemState::Monitoring;
        }
    }

    pub fn system_state(&self) -> SystemState {
        self.state
    }

    /// Healthy when no wheel has an active condition
    pub fn check_system_health(&self) -> (bool, SystemState) {
        let healthy = self.records.iter().all(|r| !r.active);
        (healthy, self.state)
    }

    /// Median reference speed from the last cycle
    pub fn reference_speed(&self) -> f32 {
        self.reference_speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SpeedSample;

    fn sample(speed: f32) -> SpeedSample {
        SpeedSample {
            raw_speed: speed,
            speed,
            acceleration: 0.0,
            valid: true,
            quality: 100,
        }
    }

    fn vehicle(speeds: [f32; 4]) -> VehicleData {
        VehicleData {
            wheel_speeds: speeds.map(sample),
            ..Default::default()
        }
    }

    fn factory() -> PerWheel<CalibrationCoefficients> {
        [CalibrationCoefficients::factory(); 4]
    }

    fn detector() -> MalfunctionDetector {
        MalfunctionDetector::new(DetectionParameters::default(), 300.0)
    }

    #[test]
    fn test_healthy_vehicle_monitoring() {
        let mut d = detector();
        assert_eq!(d.system_state(), SystemState::Inactive);
        d.update_vehicle_data(vehicle([60.0, 60.5, 59.5, 60.0]));
        let state = d.run_cycle(&factory(), 0);
        assert_eq!(state, SystemState::Monitoring);
        assert_eq!(d.reference_speed(), 60.0);
        assert!(d.check_system_health().0);
    }

    #[test]
    fn test_debounce_requires_full_interval() {
        let mut d = detector();
        let mut coeffs = factory();
        coeffs[0].correction_factor = 1.15;
        d.update_vehicle_data(vehicle([60.0; 4]));

        // 100 ms debounce at 20 ms cycles confirms on the fifth cycle
        for cycle in 0..4u64 {
            d.run_cycle(&coeffs, cycle * 20);
            let r = d.record(WheelPosition::FrontLeft);
            assert!(r.active);
            assert!(!r.confirmed, "confirmed early at cycle {}", cycle);
        }
        d.run_cycle(&coeffs, 80);
        let r = d.record(WheelPosition::FrontLeft);
        assert!(r.confirmed);
        assert_eq!(r.kind, FaultKind::Miscalibration);
        assert_eq!(r.severity, Severity::Critical);
        assert!((r.deviation - 15.0).abs() < 1e-3);
        assert_eq!(d.system_state(), SystemState::Malfunction);
    }

    #[test]
    fn test_unconfirmed_on_first_clear_cycle() {
        let mut d = detector();
        let mut coeffs = factory();
        coeffs[1].correction_factor = 1.12;
        d.update_vehicle_data(vehicle([60.0; 4]));
        for cycle in 0..6u64 {
            d.run_cycle(&coeffs, cycle * 20);
        }
        assert!(d.record(WheelPosition::FrontRight).confirmed);

        coeffs[1].correction_factor = 1.0;
        d.run_cycle(&coeffs, 120);
        let r = d.record(WheelPosition::FrontRight);
        assert!(!r.active);
        assert!(!r.confirmed);
        assert_eq!(r.debounce_timer_ms, 0);
        // kind kept while cooling down
        assert_eq!(r.kind, FaultKind::Miscalibration);
        assert_eq!(d.system_state(), SystemState::Monitoring);

        for cycle in 7..11u64 {
            d.run_cycle(&coeffs, cycle * 20);
        }
        let r = d.record(WheelPosition::FrontRight);
        assert_eq!(r.kind, FaultKind::None);
        assert_eq!(r.occurrence_count, 6);
    }

    #[test]
    fn test_speed_difference_against_median() {
        let mut d = detector();
        d.update_vehicle_data(vehicle([60.0, 60.0, 60.0, 100.0]));
        d.run_cycle(&factory(), 0);
        let r = d.record(WheelPosition::RearRight);
        assert_eq!(r.kind, FaultKind::SpeedDifference);
        assert_eq!(r.deviation, 40.0);
        assert_eq!(r.severity, Severity::High);
        assert!(!d.record(WheelPosition::FrontLeft).active);
    }

    #[test]
    fn test_invalid_wheel_excluded_from_reference() {
        let mut d = detector();
        let mut data = vehicle([58.0, 60.0, 62.0, 0.0]);
        data.wheel_speeds[3] = SpeedSample::invalid();
        d.update_vehicle_data(data);
        d.run_cycle(&factory(), 0);

        assert_eq!(d.reference_speed(), 60.0);
        let r = d.record(WheelPosition::RearRight);
        assert_eq!(r.kind, FaultKind::SpeedDifference);
        assert_eq!(r.deviation, 300.0);
        assert_eq!(r.severity, Severity::Critical);
        assert!(!d.record(WheelPosition::FrontLeft).active);
    }

    #[test]
    fn test_hardware_fault_escalates_to_sensor_failure() {
        let mut d = detector();
        let mut data = vehicle([60.0; 4]);
        data.wheel_speeds[2] = SpeedSample::invalid();
        data.sensor_status[2] = SensorStatus::OpenCircuit;
        d.update_vehicle_data(data);

        for cycle in 0..4u64 {
            d.run_cycle(&factory(), cycle * 20);
            assert_eq!(d.record(WheelPosition::RearLeft).kind, FaultKind::SpeedDifference);
        }
        d.run_cycle(&factory(), 80);
        let r = d.record(WheelPosition::RearLeft);
        assert_eq!(r.kind, FaultKind::SensorFailure);
        assert!(r.confirmed);
    }

    #[test]
    fn test_braking_suppresses_acceleration_check() {
        let mut d = detector();
        let mut data = vehicle([60.0; 4]);
        data.wheel_speeds[0].acceleration = -25.0;
        data.brake_pedal_pressed = true;
        d.update_vehicle_data(data);
        d.run_cycle(&factory(), 0);
        assert!(!d.record(WheelPosition::FrontLeft).active);

        data.brake_pedal_pressed = false;
        d.update_vehicle_data(data);
        d.run_cycle(&factory(), 20);
        let r = d.record(WheelPosition::FrontLeft);
        assert_eq!(r.kind, FaultKind::AccelerationImplausible);
        assert_eq!(r.severity, Severity::Critical);
    }

    #[test]
    fn test_priority_drift_before_speed_difference() {
        let mut d = detector();
        let mut coeffs = factory();
        coeffs[3].correction_factor = 1.2;
        d.update_vehicle_data(vehicle([60.0, 60.0, 60.0, 120.0]));
        d.run_cycle(&coeffs, 0);
        assert_eq!(d.record(WheelPosition::RearRight).kind, FaultKind::Miscalibration);
    }

    #[test]
    fn test_degraded_for_low_severity() {
        let params = DetectionParameters {
            calibration_drift_threshold: 3.0,
            ..Default::default()
        };
        let mut d = MalfunctionDetector::new(params, 300.0);
        let mut coeffs = factory();
        coeffs[0].correction_factor = 1.04;
        d.update_vehicle_data(vehicle([60.0; 4]));
        for cycle in 0..5u64 {
            d.run_cycle(&coeffs, cycle * 20);
        }
        assert_eq!(d.record(WheelPosition::FrontLeft).severity, Severity::Low);
        assert_eq!(d.system_state(), SystemState::Degraded);
    }

    #[test]
    fn test_disabled_checks() {
        let params = DetectionParameters {
            enable_miscalibration_check: false,
            ..Default::default()
        };
        let mut d = MalfunctionDetector::new(params, 300.0);
        let mut coeffs = factory();
        coeffs[0].correction_factor = 1.3;
        d.update_vehicle_data(vehicle([60.0; 4]));
        d.run_cycle(&coeffs, 0);
        assert!(!d.record(WheelPosition::FrontLeft).active);
    }

    #[test]
    fn test_clear_all_resets_records() {
        let mut d = detector();
        d.update_vehicle_data(vehicle([60.0, 60.0, 60.0, 100.0]));
        for cycle in 0..5u64 {
            d.run_cycle(&factory(), cycle * 20);
        }
        assert_eq!(d.system_state(), SystemState::Malfunction);
        d.clear_all();
        assert_eq!(d.record(WheelPosition::RearRight), MalfunctionRecord::default());
        assert_eq!(d.system_state(), SystemState::Monitoring);
    }

    #[test]
    fn test_set_parameters_rejects_invalid() {
        let mut d = detector();
        let bad = DetectionParameters {
            cycle_ms: 0,
            ..Default::default()
        };
        assert!(d.set_parameters(bad).is_err());
        assert_eq!(d.parameters().cycle_ms, 20);
    }
}
