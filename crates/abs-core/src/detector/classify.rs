//! Reference speed and severity classification

use super::{FaultKind, Severity};
use crate::sensor::SpeedSample;

/// Median of all valid wheel speeds
///
/// With an even count the two middle values are averaged. Fewer than two
/// valid wheels give no usable reference and yield 0.
pub fn median_speed(samples: &[SpeedSample]) -> f32 {
    let mut speeds: Vec<f32> = samples.iter().filter(|s| s.valid).map(|s| s.speed).collect();
    if speeds.len() < 2 {
        return 0.0;
    }
    speeds.sort_by(f32::total_cmp);

    let mid = speeds.len() / 2;
    if speeds.len() % 2 == 0 {
        (speeds[mid - 1] + speeds[mid]) / 2.0
    } else {
        speeds[mid]
    }
}

/// Round a deviation to 1e-4 so that band edges are not lost to f32 noise
///
/// A correction factor of 1.15 is stored as 1.1499999 and would otherwise
/// classify just below the 15 % band.
pub fn quantize_deviation(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}

/// Severity band for a deviation of a given fault kind
///
/// Band edges are exclusive, except the critical drift edge which is
/// inclusive so that a factor of 1.15 grades critical.
pub fn severity_for(kind: FaultKind, deviation: f32) -> Severity {
    let d = quantize_deviation(deviation);
    match kind {
        FaultKind::None => Severity::None,
        FaultKind::Miscalibration => match d {
            d if d >= 15.0 => Severity::Critical,
            d if d > 10.0 => Severity::High,
            d if d > 5.0 => Severity::Medium,
            _ => Severity::Low,
        },
        FaultKind::SpeedDifference => match d {
            d if d > 50.0 => Severity::Critical,
            d if d > 30.0 => Severity::High,
            d if d > 20.0 => Severity::Medium,
            _ => Severity::Low,
        },
        FaultKind::AccelerationImplausible => match d {
            d if d > 20.0 => Severity::Critical,
            d if d > 15.0 => Severity::High,
            _ => Severity::Medium,
        },
        FaultKind::SensorFailure => Severity::Critical,
    }
}
