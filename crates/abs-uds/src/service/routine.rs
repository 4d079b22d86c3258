//! RoutineControl (0x31)
//!
//! Calibration routines map onto calibration sessions; the remaining
//! routines run synchronously and report their result in the start response.

use abs_core::{CalibrationError, SensorStatus, WheelPosition};
use tracing::{info, warn};

use super::{ServiceContext, ServiceHandler};
use crate::error::{require_len, DiagnosticError, DiagnosticResult};
use crate::rid::{self, routine_result, stop_option, RoutineId};
use crate::uds::{routine_sub_function, service_id};

pub struct RoutineControl;

impl RoutineControl {
    fn start(
        ctx: &ServiceContext,
        routine: RoutineId,
        params: &[u8],
        now_ms: u64,
    ) -> DiagnosticResult<Vec<u8>> {
        match routine {
            RoutineId::Calibrate(wheel) => {
                let mut calibration = ctx.system.calibration();
                let request = rid::decode_start_params(
                    wheel,
                    params,
                    ctx.config.routine_reference_speed,
                    calibration.config().default_tolerance_percent,
                    ctx.config.routine_duration_ms,
                )?;
                match calibration.start_calibration(request, now_ms) {
                    Ok(()) => Ok(vec![routine_result::OK]),
                    Err(CalibrationError::SessionBusy(_)) => {
                        info!(wheel = %wheel, "Calibration routine busy");
                        Ok(vec![routine_result::BUSY])
                    }
                    Err(e) => Err(DiagnosticError::OutOfRange(e.to_string())),
                }
            }
            RoutineId::ValidateAll => {
                let calibration = ctx.system.calibration();
                Ok(WheelPosition::ALL
                    .iter()
                    .flat_map(|&w| {
                        let (valid, accuracy) = calibration.validate_calibration(w);
                        [u8::from(valid), accuracy.round().clamp(0.0, 100.0) as u8]
                    })
                    .collect())
            }
            RoutineId::ResetAll => {
                let mut calibration = ctx.system.calibration();
                Ok(WheelPosition::ALL
                    .iter()
                    .map(|&w| match calibration.reset_to_factory(w, now_ms) {
                        Ok(()) => routine_result::OK,
                        Err(e) => {
                            warn!(wheel = %w, error = %e, "Factory reset not persisted");
                            routine_result::RESET_FAILED
                        }
                    })
                    .collect())
            }
            RoutineId::SelfTest => {
                let coefficients = ctx.system.calibration().all_coefficients();
                let status = {
                    let processor = ctx.system.processor();
                    WheelPosition::ALL.map(|w| processor.last_status(w))
                };
                let failed_mask = WheelPosition::ALL
                    .iter()
                    .filter(|w| {
                        status[w.index()] != SensorStatus::Ok
                            || !coefficients[w.index()].is_plausible()
                    })
                    .fold(0u8, |mask, w| mask | (1 << w.index()));
                let state = ctx.system.detector().system_state();
                info!(failed_mask = format!("0x{:02X}", failed_mask), state = %state, "Self-test");
                Ok(vec![u8::from(failed_mask != 0), failed_mask, state as u8])
            }
        }
    }

    fn stop(
        ctx: &ServiceContext,
        routine: RoutineId,
        params: &[u8],
        now_ms: u64,
    ) -> DiagnosticResult<Vec<u8>> {
        let RoutineId::Calibrate(wheel) = routine else {
            return Err(DiagnosticError::SubFunctionNotSupported(
                routine_sub_function::STOP_ROUTINE,
            ));
        };
        let option = params.first().copied().unwrap_or(stop_option::CANCEL);
        let mut calibration = ctx.system.calibration();

        let result = match option {
            stop_option::CANCEL => calibration.cancel_calibration(wheel, now_ms),
            stop_option::APPLY_AND_PERSIST => calibration.apply_calibration(wheel, true, now_ms),
            stop_option::APPLY => calibration.apply_calibration(wheel, false, now_ms),
            other => {
                return Err(DiagnosticError::OutOfRange(format!(
                    "stop option 0x{:02X}",
                    other
                )))
            }
        };

        match result {
            Ok(()) => Ok(vec![routine_result::OK]),
            Err(CalibrationError::Persistence { .. }) => Ok(vec![routine_result::NVM_ERROR]),
            Err(e @ (CalibrationError::NoActiveSession(_) | CalibrationError::NotCompleted { .. })) => {
                Err(DiagnosticError::RequestSequence(e.to_string()))
            }
            Err(e) => Err(DiagnosticError::ConditionsNotCorrect(e.to_string())),
        }
    }

    fn results(ctx: &ServiceContext, routine: RoutineId) -> DiagnosticResult<Vec<u8>> {
        let RoutineId::Calibrate(wheel) = routine else {
            return Err(DiagnosticError::SubFunctionNotSupported(
                routine_sub_function::REQUEST_ROUTINE_RESULTS,
            ));
        };
        Ok(rid::encode_session_result(
            ctx.system.calibration().session_status(wheel),
        ))
    }
}

impl ServiceHandler for RoutineControl {
    fn service_id(&self) -> u8 {
        service_id::ROUTINE_CONTROL
    }

    fn handle(&self, ctx: &ServiceContext, request: &[u8], now_ms: u64) -> DiagnosticResult<Vec<u8>> {
        require_len(request, 4)?;
        ctx.active_session().require_extended()?;

        let sub_function = request[1];
        let raw = u16::from_be_bytes([request[2], request[3]]);
        let params = &request[4..];

        if !matches!(
            sub_function,
            routine_sub_function::START_ROUTINE
                | routine_sub_function::STOP_ROUTINE
                | routine_sub_function::REQUEST_ROUTINE_RESULTS
        ) {
            return Err(DiagnosticError::SubFunctionNotSupported(sub_function));
        }

        let routine = RoutineId::from_id(raw)
            .ok_or_else(|| DiagnosticError::OutOfRange(format!("unknown RID 0x{:04X}", raw)))?;

        info!(
            rid = format!("0x{:04X}", raw),
            sub_function = format!("0x{:02X}", sub_function),
            "Routine control"
        );

        let result = match sub_function {
            routine_sub_function::START_ROUTINE => Self::start(ctx, routine, params, now_ms)?,
            routine_sub_function::STOP_ROUTINE => Self::stop(ctx, routine, params, now_ms)?,
            _ => Self::results(ctx, routine)?,
        };

        let mut data = Vec::with_capacity(3 + result.len());
        data.push(sub_function);
        data.extend_from_slice(&raw.to_be_bytes());
        data.extend_from_slice(&result);
        Ok(data)
    }
}
