//! Diagnostic service dispatch
//!
//! Each UDS service is a [`ServiceHandler`] registered by service ID. A
//! handler returns the positive response payload (without the response SID)
//! or a [`DiagnosticError`] that is turned into a negative response.

mod data_id;
mod dtc;
mod ecu_reset;
mod io_control;
mod routine;
mod session_control;

pub use data_id::{ReadDataByIdentifier, WriteDataByIdentifier};
pub use dtc::{ClearDiagnosticInformation, ReadDtcInformation};
pub use ecu_reset::EcuReset;
pub use io_control::IoControlByIdentifier;
pub use routine::RoutineControl;
pub use session_control::SessionControl;

use std::collections::HashMap;
use std::sync::Arc;

use abs_core::AbsSystem;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::config::DiagnosticConfig;
use crate::error::{DiagnosticError, DiagnosticResult};
use crate::monitor;
use crate::session::{DiagnosticSession, SessionState};
use crate::uds::{negative_response, positive_response, DtcEntry, DtcTable, NegativeResponseCode};

/// State shared by all service handlers
pub struct ServiceContext {
    pub system: Arc<AbsSystem>,
    pub config: DiagnosticConfig,
    pub dtcs: Mutex<DtcTable>,
    pub session: RwLock<SessionState>,
}

impl ServiceContext {
    pub fn new(system: Arc<AbsSystem>, config: DiagnosticConfig) -> Self {
        let dtcs = DtcTable::new(config.dtc_confirmation_threshold);
        Self {
            system,
            config,
            dtcs: Mutex::new(dtcs),
            session: RwLock::new(SessionState::default()),
        }
    }

    pub fn active_session(&self) -> DiagnosticSession {
        self.session.read().session
    }
}

/// Handler for one UDS service
pub trait ServiceHandler: Send + Sync {
    fn service_id(&self) -> u8;

    /// Handle a full request, `request[0]` being the service ID
    fn handle(&self, ctx: &ServiceContext, request: &[u8], now_ms: u64)
        -> DiagnosticResult<Vec<u8>>;
}

/// UDS server for the ABS supervisor
pub struct DiagnosticService {
    ctx: ServiceContext,
    handlers: HashMap<u8, Box<dyn ServiceHandler>>,
}

impl DiagnosticService {
    /// Service with every standard handler registered
    pub fn new(system: Arc<AbsSystem>, config: DiagnosticConfig) -> Self {
        let mut service = Self {
            ctx: ServiceContext::new(system, config),
            handlers: HashMap::new(),
        };
        service.register(Box::new(SessionControl));
        service.register(Box::new(EcuReset));
        service.register(Box::new(ClearDiagnosticInformation));
        service.register(Box::new(ReadDtcInformation));
        service.register(Box::new(ReadDataByIdentifier));
        service.register(Box::new(WriteDataByIdentifier));
        service.register(Box::new(IoControlByIdentifier));
        service.register(Box::new(RoutineControl));
        service
    }

    /// Add or replace the handler for its service ID
    pub fn register(&mut self, handler: Box<dyn ServiceHandler>) {
        self.handlers.insert(handler.service_id(), handler);
    }

    /// Process a UDS request and return the response
    pub fn process_request(&self, request: &[u8], now_ms: u64) -> Vec<u8> {
        let Some(&sid) = request.first() else {
            return negative_response(0x00, NegativeResponseCode::IncorrectMessageLengthOrFormat);
        };

        let result = match self.handlers.get(&sid) {
            Some(handler) => handler.handle(&self.ctx, request, now_ms),
            None => Err(DiagnosticError::ServiceNotSupported(sid)),
        };

        match result {
            Ok(data) => {
                let response = positive_response(sid, &data);
                debug!(
                    request = %hex::encode(request),
                    response = %hex::encode(&response),
                    "Positive response"
                );
                response
            }
            Err(e) => {
                debug!(
                    service_id = format!("0x{:02X}", sid),
                    nrc = format!("0x{:02X}", e.nrc()),
                    error = %e,
                    "Negative response"
                );
                negative_response(sid, e.nrc())
            }
        }
    }

    /// Monitoring step, run once per detection cycle after the detector
    pub fn monitor(&self, now_ms: u64) -> usize {
        monitor::update_dtcs(&self.ctx, now_ms)
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    pub fn session(&self) -> DiagnosticSession {
        self.ctx.active_session()
    }

    pub fn reset_count(&self) -> u16 {
        self.ctx.session.read().reset_count
    }

    /// Copy of all allocated DTC entries
    pub fn dtc_snapshot(&self) -> Vec<DtcEntry> {
        self.ctx.dtcs.lock().entries().copied().collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use abs_core::{CoreConfig, MemoryStore, SharedMemoryStore};

    pub fn service() -> DiagnosticService {
        DiagnosticService::new(
            Arc::new(AbsSystem::new(CoreConfig::default(), Box::new(MemoryStore::new()))),
            DiagnosticConfig::default(),
        )
    }

    pub fn service_with_store(store: SharedMemoryStore) -> DiagnosticService {
        DiagnosticService::new(
            Arc::new(AbsSystem::new(CoreConfig::default(), Box::new(store))),
            DiagnosticConfig::default(),
        )
    }

    pub fn enter(service: &DiagnosticService, session: DiagnosticSession) {
        let response = service.process_request(&[0x10, session.level()], 0);
        assert_eq!(response[0], 0x50);
    }
}
