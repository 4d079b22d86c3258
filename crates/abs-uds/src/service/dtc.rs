//! ClearDiagnosticInformation (0x14) and ReadDTCInformation (0x19)

use tracing::info;

use super::{ServiceContext, ServiceHandler};
use crate::error::{require_len, DiagnosticError, DiagnosticResult};
use crate::uds::{dtc_sub_function, service_id, DtcEntry, DTC_GROUP_ALL};

pub struct ClearDiagnosticInformation;

impl ServiceHandler for ClearDiagnosticInformation {
    fn service_id(&self) -> u8 {
        service_id::CLEAR_DIAGNOSTIC_INFO
    }

    fn handle(&self, ctx: &ServiceContext, request: &[u8], _now_ms: u64) -> DiagnosticResult<Vec<u8>> {
        require_len(request, 4)?;
        let group = u32::from_be_bytes([0, request[1], request[2], request[3]]);
        info!(group = format!("0x{:06X}", group), "Clear DTCs");

        if group == DTC_GROUP_ALL {
            ctx.dtcs.lock().clear_all();
            ctx.system.detector().clear_all();
            return Ok(Vec::new());
        }

        if ctx.dtcs.lock().clear(group) {
            Ok(Vec::new())
        } else {
            Err(DiagnosticError::OutOfRange(format!(
                "DTC 0x{:06X} not in table",
                group
            )))
        }
    }
}

pub struct ReadDtcInformation;

impl ServiceHandler for ReadDtcInformation {
    fn service_id(&self) -> u8 {
        service_id::READ_DTC_INFO
    }

    fn handle(&self, ctx: &ServiceContext, request: &[u8], _now_ms: u64) -> DiagnosticResult<Vec<u8>> {
        require_len(request, 2)?;
        let sub_function = request[1];
        let availability = ctx.config.dtc_status_availability_mask;
        let dtcs = ctx.dtcs.lock();

        let records: Vec<&DtcEntry> = match sub_function {
            dtc_sub_function::REPORT_DTC_BY_STATUS_MASK => {
                require_len(request, 3)?;
                dtcs.matching(request[2]).collect()
            }
            dtc_sub_function::REPORT_SUPPORTED_DTC => dtcs.entries().collect(),
            other => return Err(DiagnosticError::SubFunctionNotSupported(other)),
        };

        info!(
            sub_function = format!("0x{:02X}", sub_function),
            count = records.len(),
            "Report DTCs"
        );

        let mut data = Vec::with_capacity(2 + records.len() * 4);
        data.push(sub_function);
        data.push(availability);
        for entry in records {
            data.extend_from_slice(&entry.code_bytes());
            data.push(entry.status.bits());
        }
        Ok(data)
    }
}
