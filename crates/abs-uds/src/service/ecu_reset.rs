//! ECUReset (0x11)

use tracing::info;

use super::{ServiceContext, ServiceHandler};
use crate::error::{require_len, DiagnosticError, DiagnosticResult};
use crate::session::DiagnosticSession;
use crate::uds::{reset_type, service_id};

pub struct EcuReset;

impl ServiceHandler for EcuReset {
    fn service_id(&self) -> u8 {
        service_id::ECU_RESET
    }

    fn handle(&self, ctx: &ServiceContext, request: &[u8], _now_ms: u64) -> DiagnosticResult<Vec<u8>> {
        require_len(request, 2)?;
        let kind = request[1];
        if kind != reset_type::HARD_RESET && kind != reset_type::SOFT_RESET {
            return Err(DiagnosticError::SubFunctionNotSupported(kind));
        }

        let active = ctx.active_session();
        if active != DiagnosticSession::Programming {
            return Err(DiagnosticError::ConditionsNotCorrect(format!(
                "reset requires programming session, active session is {}",
                active
            )));
        }

        if kind == reset_type::HARD_RESET {
            ctx.system.processor().reset();
        }

        let mut state = ctx.session.write();
        state.session = DiagnosticSession::Default;
        state.reset_count = state.reset_count.wrapping_add(1);
        info!(
            reset_type = format!("0x{:02X}", kind),
            reset_count = state.reset_count,
            "ECU reset"
        );

        Ok(vec![kind])
    }
}
