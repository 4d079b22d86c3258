//! ReadDataByIdentifier (0x22) and WriteDataByIdentifier (0x2E)

use abs_core::{CalibrationError, WheelPosition};
use tracing::{debug, info, warn};

use super::{ServiceContext, ServiceHandler};
use crate::did::{self, DataIdentifier};
use crate::error::{require_len, DiagnosticError, DiagnosticResult};
use crate::uds::service_id;

pub struct ReadDataByIdentifier;

impl ReadDataByIdentifier {
    fn read(ctx: &ServiceContext, id: DataIdentifier) -> Vec<u8> {
        match id {
            DataIdentifier::WheelSpeed(wheel) => did::encode_speed(&ctx.system.processor().latest(wheel)),
            DataIdentifier::Calibration(wheel) => {
                did::encode_calibration(&ctx.system.calibration().coefficients(wheel))
            }
            DataIdentifier::SystemStatus => {
                let (state, records) = {
                    let detector = ctx.system.detector();
                    (detector.system_state(), detector.records())
                };
                let active = records.iter().filter(|r| r.active).count() as u8;
                let confirmed_mask = WheelPosition::ALL
                    .iter()
                    .filter(|w| records[w.index()].confirmed)
                    .fold(0u8, |mask, w| mask | (1 << w.index()));
                let entries = ctx.dtcs.lock().len() as u8;
                vec![state as u8, active, confirmed_mask, entries]
            }
            DataIdentifier::OccurrenceCounters => {
                let records = ctx.system.detector().records();
                records
                    .iter()
                    .flat_map(|r| r.occurrence_count.to_be_bytes())
                    .collect()
            }
            DataIdentifier::SessionInfo => {
                let state = *ctx.session.read();
                let count = state.reset_count.to_be_bytes();
                vec![state.session.level(), count[0], count[1]]
            }
        }
    }
}

impl ServiceHandler for ReadDataByIdentifier {
    fn service_id(&self) -> u8 {
        service_id::READ_DATA_BY_ID
    }

    fn handle(&self, ctx: &ServiceContext, request: &[u8], _now_ms: u64) -> DiagnosticResult<Vec<u8>> {
        require_len(request, 3)?;
        let ids = &request[1..];
        if ids.len() % 2 != 0 {
            return Err(DiagnosticError::IncorrectLength {
                expected: request.len() + 1,
                actual: request.len(),
            });
        }

        let mut data = Vec::new();
        for pair in ids.chunks_exact(2) {
            let raw = u16::from_be_bytes([pair[0], pair[1]]);
            let id = DataIdentifier::from_id(raw).ok_or_else(|| {
                DiagnosticError::OutOfRange(format!("unknown DID 0x{:04X}", raw))
            })?;
            debug!(did = format!("0x{:04X}", raw), "Read data by identifier");
            data.extend_from_slice(&raw.to_be_bytes());
            data.extend_from_slice(&Self::read(ctx, id));
        }
        Ok(data)
    }
}

pub struct WriteDataByIdentifier;

impl ServiceHandler for WriteDataByIdentifier {
    fn service_id(&self) -> u8 {
        service_id::WRITE_DATA_BY_ID
    }

    fn handle(&self, ctx: &ServiceContext, request: &[u8], now_ms: u64) -> DiagnosticResult<Vec<u8>> {
        require_len(request, 4)?;
        ctx.active_session().require_extended()?;

        let raw = u16::from_be_bytes([request[1], request[2]]);
        let wheel = match DataIdentifier::from_id(raw) {
            Some(DataIdentifier::Calibration(wheel)) => wheel,
            Some(_) => {
                return Err(DiagnosticError::OutOfRange(format!(
                    "DID 0x{:04X} is read-only",
                    raw
                )))
            }
            None => {
                return Err(DiagnosticError::OutOfRange(format!(
                    "unknown DID 0x{:04X}",
                    raw
                )))
            }
        };

        let coefficients = did::decode_calibration(&request[3..])?;
        let mut calibration = ctx.system.calibration();
        calibration
            .set_coefficients(wheel, coefficients, now_ms)
            .map_err(|e| match e {
                CalibrationError::CoefficientsRejected(reason) => DiagnosticError::OutOfRange(reason),
                other => DiagnosticError::ConditionsNotCorrect(other.to_string()),
            })?;
        if let Err(e) = calibration.save_to_store(wheel) {
            // coefficients stay live; the NVM fault surfaces as a DTC
            warn!(wheel = %wheel, error = %e, "Written calibration not persisted");
        }

        info!(
            did = format!("0x{:04X}", raw),
            wheel = %wheel,
            cf = coefficients.correction_factor,
            "Calibration written"
        );
        Ok(raw.to_be_bytes().to_vec())
    }
}
