//! DiagnosticSessionControl (0x10)

use tracing::info;

use super::{ServiceContext, ServiceHandler};
use crate::error::{require_len, DiagnosticResult};
use crate::session::DiagnosticSession;
use crate::uds::{service_id, timing};

pub struct SessionControl;

impl ServiceHandler for SessionControl {
    fn service_id(&self) -> u8 {
        service_id::DIAGNOSTIC_SESSION_CONTROL
    }

    fn handle(&self, ctx: &ServiceContext, request: &[u8], _now_ms: u64) -> DiagnosticResult<Vec<u8>> {
        require_len(request, 2)?;
        let session = DiagnosticSession::try_from(request[1])?;

        let previous = std::mem::replace(&mut ctx.session.write().session, session);
        if previous != session {
            info!(from = %previous, to = %session, "Session changed");
        }

        // [session, P2 hi, P2 lo, P2* hi, P2* lo]
        let p2 = timing::P2_SERVER_MAX_MS.to_be_bytes();
        let p2_star = timing::P2_STAR_SERVER_MAX_10MS.to_be_bytes();
        Ok(vec![session.level(), p2[0], p2[1], p2_star[0], p2_star[1]])
    }
}
