//! InputOutputControlByIdentifier (0x2F)
//!
//! Actuator overrides are not offered on the wheel-speed supervisor. The
//! service stays registered so the refusal is explicit.

use super::{ServiceContext, ServiceHandler};
use crate::error::{DiagnosticError, DiagnosticResult};
use crate::uds::service_id;

pub struct IoControlByIdentifier;

impl ServiceHandler for IoControlByIdentifier {
    fn service_id(&self) -> u8 {
        service_id::IO_CONTROL_BY_ID
    }

    fn handle(&self, _ctx: &ServiceContext, _request: &[u8], _now_ms: u64) -> DiagnosticResult<Vec<u8>> {
        Err(DiagnosticError::ServiceNotSupported(service_id::IO_CONTROL_BY_ID))
    }
}
