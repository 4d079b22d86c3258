//! Data identifiers and their payload codecs
//!
//! All multi-byte values are big-endian. Scaled values saturate at the
//! bounds of their wire type.

use abs_core::{CalibrationCoefficients, SpeedSample, WheelPosition};

use crate::error::{require_len, DiagnosticError, DiagnosticResult};

/// Wheel speed of FL; FR, RL, RR follow
pub const WHEEL_SPEED_BASE: u16 = 0xF100;
/// Calibration coefficients of FL; FR, RL, RR follow
pub const CALIBRATION_BASE: u16 = 0xF110;
pub const SYSTEM_STATUS: u16 = 0xF120;
pub const OCCURRENCE_COUNTERS: u16 = 0xF121;
pub const SESSION_INFO: u16 = 0xF1F0;

/// Bytes taken from a calibration write
pub const CALIBRATION_WRITE_LEN: usize = 8;

/// A data identifier served by the ABS service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataIdentifier {
    WheelSpeed(WheelPosition),
    Calibration(WheelPosition),
    SystemStatus,
    OccurrenceCounters,
    SessionInfo,
}

impl DataIdentifier {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            WHEEL_SPEED_BASE..=0xF103 => {
                WheelPosition::try_from(usize::from(id - WHEEL_SPEED_BASE))
                    .ok()
                    .map(Self::WheelSpeed)
            }
            CALIBRATION_BASE..=0xF113 => {
                WheelPosition::try_from(usize::from(id - CALIBRATION_BASE))
                    .ok()
                    .map(Self::Calibration)
            }
            SYSTEM_STATUS => Some(Self::SystemStatus),
            OCCURRENCE_COUNTERS => Some(Self::OccurrenceCounters),
            SESSION_INFO => Some(Self::SessionInfo),
            _ => None,
        }
    }

    pub fn id(self) -> u16 {
        match self {
            Self::WheelSpeed(w) => WHEEL_SPEED_BASE + w.index() as u16,
            Self::Calibration(w) => CALIBRATION_BASE + w.index() as u16,
            Self::SystemStatus => SYSTEM_STATUS,
            Self::OccurrenceCounters => OCCURRENCE_COUNTERS,
            Self::SessionInfo => SESSION_INFO,
        }
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Self::Calibration(_))
    }
}

fn scale_u16(value: f32, factor: f32) -> u16 {
    (value * factor).round().clamp(0.0, f32::from(u16::MAX)) as u16
}

fn scale_i16(value: f32, factor: f32) -> i16 {
    (value * factor)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// `[speed x100 u16, raw x100 u16, accel x100 i16, valid, quality]`
pub fn encode_speed(sample: &SpeedSample) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&scale_u16(sample.speed, 100.0).to_be_bytes());
    out.extend_from_slice(&scale_u16(sample.raw_speed, 100.0).to_be_bytes());
    out.extend_from_slice(&scale_i16(sample.acceleration, 100.0).to_be_bytes());
    out.push(u8::from(sample.valid));
    out.push(sample.quality);
    out
}

/// `[cf x10000 u16, offset x100 i16, ppr u16, circumference mm u16, valid]`
pub fn encode_calibration(c: &CalibrationCoefficients) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.extend_from_slice(&scale_u16(c.correction_factor, 10_000.0).to_be_bytes());
    out.extend_from_slice(&scale_i16(c.offset, 100.0).to_be_bytes());
    out.extend_from_slice(&c.pulses_per_revolution.to_be_bytes());
    out.extend_from_slice(&scale_u16(c.circumference_m, 1_000.0).to_be_bytes());
    out.push(u8::from(c.valid));
    out
}

/// Decode a calibration write; extra bytes past the first eight are ignored
///
/// Written coefficients are marked valid.
pub fn decode_calibration(data: &[u8]) -> DiagnosticResult<CalibrationCoefficients> {
    require_len(data, CALIBRATION_WRITE_LEN)?;
    let cf = u16::from_be_bytes([data[0], data[1]]);
    let offset = i16::from_be_bytes([data[2], data[3]]);
    let ppr = u16::from_be_bytes([data[4], data[5]]);
    let circumference_mm = u16::from_be_bytes([data[6], data[7]]);

    if ppr == 0 || circumference_mm == 0 {
        return Err(DiagnosticError::OutOfRange(format!(
            "ppr {} circumference {} mm",
            ppr, circumference_mm
        )));
    }

    Ok(CalibrationCoefficients {
        correction_factor: f32::from(cf) / 10_000.0,
        offset: f32::from(offset) / 100.0,
        pulses_per_revolution: ppr,
        circumference_m: f32::from(circumference_mm) / 1_000.0,
        valid: true,
        applied_at_ms: 0,
    })
}
