//! Sensor inputs for the detection cycle

use abs_core::processor::pulses_for_speed;
use abs_core::{CycleInput, RawSample, SensorStatus, WheelPosition};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationConfig;

/// Source of one cycle's raw wheel samples and vehicle state
pub trait SensorSource: Send {
    fn sample(&mut self, now_ms: u64) -> CycleInput;
}

/// Simulated wheel-speed sensors
///
/// Every wheel runs at the configured vehicle speed times its scale, plus
/// uniform noise, converted back to a pulse count over the counting window.
#[derive(Debug)]
pub struct SimulatedSensors {
    config: SimulationConfig,
    rng: StdRng,
    faults: [SensorStatus; 4],
    brake_pedal_pressed: bool,
}

impl SimulatedSensors {
    pub fn new(config: SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng,
            faults: [SensorStatus::Ok; 4],
            brake_pedal_pressed: false,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn set_speed(&mut self, speed_kmh: f32) {
        self.config.speed_kmh = speed_kmh.max(0.0);
    }

    pub fn set_wheel_scale(&mut self, wheel: WheelPosition, scale: f32) {
        self.config.wheel_scale[wheel.index()] = scale;
    }

    /// Report a hardware fault on a wheel until cleared with [`SensorStatus::Ok`]
    pub fn set_fault(&mut self, wheel: WheelPosition, status: SensorStatus) {
        self.faults[wheel.index()] = status;
    }

    pub fn set_brake(&mut self, pressed: bool) {
        self.brake_pedal_pressed = pressed;
    }

    fn wheel_sample(&mut self, wheel: WheelPosition) -> RawSample {
        let status = self.faults[wheel.index()];
        if status != SensorStatus::Ok {
            return RawSample::faulted(status);
        }

        let noise = self.config.noise_kmh.abs();
        let jitter = if noise > 0.0 {
            self.rng.gen_range(-noise..=noise)
        } else {
            0.0
        };
        let speed = (self.config.speed_kmh * self.config.wheel_scale[wheel.index()] + jitter).max(0.0);
        let pulses = pulses_for_speed(
            speed,
            self.config.window_ms,
            self.config.pulses_per_revolution,
            self.config.circumference_m,
        );
        RawSample::new(pulses, self.config.window_ms)
    }
}

impl SensorSource for SimulatedSensors {
    fn sample(&mut self, _now_ms: u64) -> CycleInput {
        let raw = WheelPosition::ALL.map(|w| self.wheel_sample(w));
        CycleInput {
            raw,
            brake_pedal_pressed: self.brake_pedal_pressed,
            longitudinal_acceleration: 0.0,
            lateral_acceleration: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> SimulationConfig {
        SimulationConfig {
            noise_kmh: 0.0,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_noise_free_pulses() {
        let mut sensors = SimulatedSensors::new(quiet());
        let input = sensors.sample(0);
        // 60 km/h over 100 ms on a 2.1 m wheel with 60 pulses/rev
        assert!(input.raw.iter().all(|r| r.pulse_count == 48 && r.elapsed_ms == 100));
        assert!(input.raw.iter().all(|r| r.valid && r.status == SensorStatus::Ok));
    }

    #[test]
    fn test_wheel_scale() {
        let mut sensors = SimulatedSensors::new(quiet());
        sensors.set_wheel_scale(WheelPosition::RearRight, 1.5);
        let input = sensors.sample(0);
        assert_eq!(input.raw[3].pulse_count, 71);
        assert_eq!(input.raw[0].pulse_count, 48);
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let config = SimulationConfig {
            seed: Some(42),
            noise_kmh: 2.0,
            ..SimulationConfig::default()
        };
        let mut a = SimulatedSensors::new(config.clone());
        let mut b = SimulatedSensors::new(config);
        for t in 0..10 {
            assert_eq!(a.sample(t), b.sample(t));
        }
    }

    #[test]
    fn test_fault_and_brake() {
        let mut sensors = SimulatedSensors::new(quiet());
        sensors.set_fault(WheelPosition::FrontRight, SensorStatus::OpenCircuit);
        sensors.set_brake(true);
        let input = sensors.sample(0);
        assert!(!input.raw[1].valid);
        assert_eq!(input.raw[1].status, SensorStatus::OpenCircuit);
        assert!(input.brake_pedal_pressed);

        sensors.set_fault(WheelPosition::FrontRight, SensorStatus::Ok);
        assert!(sensors.sample(20).raw[1].valid);
    }
}
