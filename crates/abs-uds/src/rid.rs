//! Routine identifiers and their payload codecs

use abs_core::calibration::CalibrationSession;
use abs_core::{CalibrationMethod, CalibrationRequest, WheelPosition};

use crate::error::{require_len, DiagnosticError, DiagnosticResult};

/// Calibration routine of FL; FR, RL, RR follow
pub const CALIBRATE_BASE: u16 = 0x0201;
pub const VALIDATE_ALL: u16 = 0x0210;
pub const RESET_ALL: u16 = 0x0220;
pub const SELF_TEST: u16 = 0x0230;

/// First byte of a routine status record
pub mod routine_result {
    pub const OK: u8 = 0x00;
    /// Calibration session already running for the wheel
    pub const BUSY: u8 = 0x01;
    /// Coefficients applied but not persisted
    pub const NVM_ERROR: u8 = 0x02;
    /// Per-wheel entry of a factory reset that was not persisted
    pub const RESET_FAILED: u8 = 0x01;
}

/// Option byte of a calibration stop request
pub mod stop_option {
    pub const CANCEL: u8 = 0x00;
    pub const APPLY_AND_PERSIST: u8 = 0x01;
    pub const APPLY: u8 = 0x02;
}

/// Outcome byte reported when a session has no result yet
pub const NO_OUTCOME: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineId {
    Calibrate(WheelPosition),
    ValidateAll,
    ResetAll,
    SelfTest,
}

impl RoutineId {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            CALIBRATE_BASE..=0x0204 => WheelPosition::try_from(usize::from(id - CALIBRATE_BASE))
                .ok()
                .map(Self::Calibrate),
            VALIDATE_ALL => Some(Self::ValidateAll),
            RESET_ALL => Some(Self::ResetAll),
            SELF_TEST => Some(Self::SelfTest),
            _ => None,
        }
    }

    pub fn id(self) -> u16 {
        match self {
            Self::Calibrate(w) => CALIBRATE_BASE + w.index() as u16,
            Self::ValidateAll => VALIDATE_ALL,
            Self::ResetAll => RESET_ALL,
            Self::SelfTest => SELF_TEST,
        }
    }
}

/// Build a calibration request from optional start parameters
///
/// Parameters are `[reference x100 u16, tolerance x100 u16, duration ms u16]`;
/// an empty payload takes the given defaults.
pub fn decode_start_params(
    wheel: WheelPosition,
    params: &[u8],
    default_reference: f32,
    default_tolerance: f32,
    default_duration_ms: u32,
) -> DiagnosticResult<CalibrationRequest> {
    let mut request = CalibrationRequest {
        wheel,
        method: CalibrationMethod::ReferenceBased,
        reference_speed: default_reference,
        tolerance_percent: default_tolerance,
        duration_ms: default_duration_ms,
    };
    if params.is_empty() {
        return Ok(request);
    }

    require_len(params, 6)?;
    request.reference_speed = f32::from(u16::from_be_bytes([params[0], params[1]])) / 100.0;
    request.tolerance_percent = f32::from(u16::from_be_bytes([params[2], params[3]])) / 100.0;
    request.duration_ms = u32::from(u16::from_be_bytes([params[4], params[5]]));

    if request.reference_speed <= 0.0 || request.tolerance_percent <= 0.0 || request.duration_ms == 0
    {
        return Err(DiagnosticError::OutOfRange(format!(
            "reference {} tolerance {} duration {}",
            request.reference_speed, request.tolerance_percent, request.duration_ms
        )));
    }
    Ok(request)
}

/// `[state, outcome, samples u16, cf x10000 u16, accuracy x100 u16]`
pub fn encode_session_result(session: &CalibrationSession) -> Vec<u8> {
    let samples = u16::try_from(session.samples_collected()).unwrap_or(u16::MAX);
    let cf = (session.correction_factor * 10_000.0)
        .round()
        .clamp(0.0, f32::from(u16::MAX)) as u16;
    let accuracy = (session.accuracy * 100.0)
        .round()
        .clamp(0.0, f32::from(u16::MAX)) as u16;

    let mut out = Vec::with_capacity(8);
    out.push(session.state as u8);
    out.push(session.outcome.map_or(NO_OUTCOME, |o| o as u8));
    out.extend_from_slice(&samples.to_be_bytes());
    out.extend_from_slice(&cf.to_be_bytes());
    out.extend_from_slice(&accuracy.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_routine_ids() {
        assert_eq!(
            RoutineId::from_id(0x0203),
            Some(RoutineId::Calibrate(WheelPosition::RearLeft))
        );
        assert_eq!(RoutineId::from_id(0x0230), Some(RoutineId::SelfTest));
        assert_eq!(RoutineId::from_id(0x0205), None);
        assert_eq!(RoutineId::Calibrate(WheelPosition::RearRight).id(), 0x0204);
    }

    #[test]
    fn test_start_params_defaults() {
        let req = decode_start_params(WheelPosition::FrontLeft, &[], 50.0, 2.0, 10_000).unwrap();
        assert_eq!(req.reference_speed, 50.0);
        assert_eq!(req.tolerance_percent, 2.0);
        assert_eq!(req.duration_ms, 10_000);
    }

    #[test]
    fn test_start_params_explicit() {
        // 80 km/h, 5 %, 2000 ms
        let params = [0x1F, 0x40, 0x01, 0xF4, 0x07, 0xD0];
        let req = decode_start_params(WheelPosition::RearRight, &params, 50.0, 2.0, 10_000).unwrap();
        assert_eq!(req.wheel, WheelPosition::RearRight);
        assert_eq!(req.reference_speed, 80.0);
        assert_eq!(req.tolerance_percent, 5.0);
        assert_eq!(req.duration_ms, 2_000);
    }

    #[test]
    fn test_start_params_rejects() {
        assert!(matches!(
            decode_start_params(WheelPosition::FrontLeft, &[0x1F], 50.0, 2.0, 10_000),
            Err(DiagnosticError::IncorrectLength { .. })
        ));
        assert!(matches!(
            decode_start_params(WheelPosition::FrontLeft, &[0, 0, 1, 0, 1, 0], 50.0, 2.0, 10_000),
            Err(DiagnosticError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_idle_session_result() {
        let session = CalibrationSession::default();
        assert_eq!(
            encode_session_result(&session),
            vec![0x00, NO_OUTCOME, 0, 0, 0, 0, 0, 0]
        );
    }
}
