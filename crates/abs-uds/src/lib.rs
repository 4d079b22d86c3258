//! abs-uds - UDS diagnostic service for the ABS wheel-speed supervisor
//!
//! Exposes the core components of [`abs_core`] over ISO 14229 services and
//! maintains the DTC table from detector and calibration state.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    DiagnosticService                       │
//! │  process_request(bytes) -> bytes                           │
//! │                                                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ 0x10 / 0x11  │  │ 0x14 / 0x19  │  │ 0x22 / 0x2E     │  │
//! │  │ session      │  │ DTC table    │  │ DIDs            │  │
//! │  └──────────────┘  └──────────────┘  └─────────────────┘  │
//! │  ┌──────────────┐            ┌──────────────────────────┐ │
//! │  │ 0x31 routine │            │ monitor (per cycle)      │ │
//! │  └──────┬───────┘            └────────────┬─────────────┘ │
//! │         └──────────────┬──────────────────┘               │
//! │                 ┌──────┴──────┐                           │
//! │                 │  AbsSystem  │                           │
//! │                 └─────────────┘                           │
//! └───────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod did;
pub mod error;
pub mod monitor;
pub mod rid;
pub mod service;
pub mod session;
pub mod uds;

pub use config::DiagnosticConfig;
pub use did::DataIdentifier;
pub use error::{DiagnosticError, DiagnosticResult};
pub use rid::RoutineId;
pub use service::{DiagnosticService, ServiceContext, ServiceHandler};
pub use session::{DiagnosticSession, SessionState};
pub use uds::{DtcEntry, DtcStatus, DtcTable, NegativeResponseCode};
