//! Raw pulse to wheel speed conversion
//!
//! The conversion itself lives in [`compute_speed`], a pure function of the raw
//! sample, the wheel's coefficients and the previous calibrated speed.
//! [`SpeedProcessor`] wraps it with the per-wheel state it needs between
//! cycles: the last valid speed, the latest published sample and the sensor
//! diagnostic counters.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calibration::CalibrationCoefficients;
use crate::sensor::{RawSample, SensorDiagnostics, SensorStatus, SpeedSample};
use crate::wheel::{PerWheel, WheelPosition};

/// Quality score of a fully trusted sample
pub const QUALITY_FULL: u8 = 100;
/// Quality ceiling while calibration is not marked valid
pub const QUALITY_UNCALIBRATED: u8 = 50;
/// Quality ceiling when acceleration exceeds the plausibility ceiling
pub const QUALITY_IMPLAUSIBLE_ACCEL: u8 = 30;

/// Speed processor limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Upper bound for a plausible raw speed, km/h
    #[serde(default = "default_max_speed")]
    pub max_speed_kmh: f32,

    /// Acceleration magnitude above which quality is reduced, m/s²
    #[serde(default = "default_accel_ceiling")]
    pub accel_quality_ceiling: f32,
}

fn default_max_speed() -> f32 {
    300.0
}

fn default_accel_ceiling() -> f32 {
    20.0
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_speed_kmh: default_max_speed(),
            accel_quality_ceiling: default_accel_ceiling(),
        }
    }
}

/// Convert one raw sample into a speed sample
///
/// `previous_speed` is the last valid calibrated speed of the same wheel, or
/// `None` for the first sample, in which case acceleration is zero.
pub fn compute_speed(
    raw: &RawSample,
    coefficients: &CalibrationCoefficients,
    previous_speed: Option<f32>,
    config: &ProcessorConfig,
) -> SpeedSample {
    if !raw.valid
        || raw.status != SensorStatus::Ok
        || raw.elapsed_ms == 0
        || coefficients.pulses_per_revolution == 0
    {
        return SpeedSample::invalid();
    }

    let elapsed_s = f32::from(raw.elapsed_ms) / 1000.0;
    let revolutions = f32::from(raw.pulse_count) / f32::from(coefficients.pulses_per_revolution);
    let rpm = revolutions / elapsed_s * 60.0;
    let raw_speed = rpm * coefficients.circumference_m * 60.0 / 1000.0;

    if !(0.0..=config.max_speed_kmh).contains(&raw_speed) {
        return SpeedSample {
            raw_speed,
            ..SpeedSample::invalid()
        };
    }

    let speed = raw_speed * coefficients.correction_factor + coefficients.offset;
    let acceleration = match previous_speed {
        Some(prev) => (speed - prev) / 3.6 / elapsed_s,
        None => 0.0,
    };

    let mut quality = QUALITY_FULL;
    if !coefficients.valid {
        quality = quality.min(QUALITY_UNCALIBRATED);
    }
    if acceleration.abs() > config.accel_quality_ceiling {
        quality = quality.min(QUALITY_IMPLAUSIBLE_ACCEL);
    }

    SpeedSample {
        raw_speed,
        speed,
        acceleration,
        valid: true,
        quality,
    }
}

#[derive(Debug, Clone, Default)]
struct WheelChannel {
    previous_speed: Option<f32>,
    latest: SpeedSample,
    last_status: SensorStatus,
    diagnostics: SensorDiagnostics,
    applied_at_ms: Option<u64>,
}

/// Stateful speed processor for all four wheels
#[derive(Debug, Default)]
pub struct SpeedProcessor {
    config: ProcessorConfig,
    channels: PerWheel<WheelChannel>,
}

impl SpeedProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            config,
            channels: Default::default(),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process one wheel's raw sample and publish the result
    pub fn process(
        &mut self,
        wheel: WheelPosition,
        raw: &RawSample,
        coefficients: &CalibrationCoefficients,
        now_ms: u64,
    ) -> SpeedSample {
        let channel = &mut self.channels[wheel.index()];
        let sample = compute_speed(raw, coefficients, channel.previous_speed, &self.config);

        if channel.applied_at_ms != Some(coefficients.applied_at_ms) {
            if channel.applied_at_ms.is_some() {
                channel.diagnostics.calibration_changes =
                    channel.diagnostics.calibration_changes.saturating_add(1);
                debug!(wheel = %wheel, cf = coefficients.correction_factor, "Calibration change observed");
            }
            channel.applied_at_ms = Some(coefficients.applied_at_ms);
        }

        channel.last_status = raw.status;
        channel.diagnostics.last_status = raw.status;

        if sample.valid {
            channel.previous_speed = Some(sample.speed);
            channel.diagnostics.total_pulse_count = channel
                .diagnostics
                .total_pulse_count
                .wrapping_add(u32::from(raw.pulse_count));
        } else {
            channel.diagnostics.error_count = channel.diagnostics.error_count.saturating_add(1);
            channel.diagnostics.last_error_ms = now_ms;
            if raw.status != SensorStatus::Ok {
                warn!(wheel = %wheel, status = %raw.status, "Sensor reports hardware fault");
            }
        }

        channel.latest = sample;
        sample
    }

    /// Latest published sample for a wheel
    pub fn latest(&self, wheel: WheelPosition) -> SpeedSample {
        self.channels[wheel.index()].latest
    }

    /// Latest samples for all wheels
    pub fn latest_all(&self) -> PerWheel<SpeedSample> {
        WheelPosition::ALL.map(|w| self.latest(w))
    }

    /// Hardware status from the last raw sample
    pub fn last_status(&self, wheel: WheelPosition) -> SensorStatus {
        self.channels[wheel.index()].last_status
    }

    pub fn diagnostics(&self, wheel: WheelPosition) -> SensorDiagnostics {
        self.channels[wheel.index()].diagnostics
    }

    /// Reset a wheel's error counters
    pub fn clear_errors(&mut self, wheel: WheelPosition) {
        let diag = &mut self.channels[wheel.index()].diagnostics;
        diag.error_count = 0;
        diag.last_error_ms = 0;
    }

    /// True when every sensor reports Ok and produced a valid sample
    pub fn check_all_sensors(&self) -> bool {
        self.channels
            .iter()
            .all(|c| c.last_status == SensorStatus::Ok && c.latest.valid)
    }

    /// Forget retained speeds, e.g. after an ECU reset
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.previous_speed = None;
            channel.latest = SpeedSample::invalid();
        }
    }
}

/// Pulse count that produces `speed_kmh` over `elapsed_ms` with given geometry
///
/// Used by simulators and tests to synthesize raw samples.
pub fn pulses_for_speed(
    speed_kmh: f32,
    elapsed_ms: u16,
    pulses_per_revolution: u16,
    circumference_m: f32,
) -> u16 {
    let meters = speed_kmh / 3.6 * f32::from(elapsed_ms) / 1000.0;
    let pulses = meters / circumference_m * f32::from(pulses_per_revolution);
    pulses.round().clamp(0.0, f32::from(u16::MAX)) as u16
}
