//! Error types for the ABS core

use thiserror::Error;

use crate::calibration::CalibrationState;
use crate::persistence::PersistenceError;
use crate::wheel::WheelPosition;

/// General errors raised by core components
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AbsError {
    #[error("Invalid wheel index: {0}")]
    InvalidWheel(usize),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Calibration manager errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    /// A session is already requested or sampling for this wheel
    #[error("Calibration session busy for wheel {0}")]
    SessionBusy(WheelPosition),

    #[error("No calibration session for wheel {0}")]
    NoActiveSession(WheelPosition),

    /// Operation needs a completed session
    #[error("Calibration for wheel {wheel} is {state}, expected completed")]
    NotCompleted {
        wheel: WheelPosition,
        state: CalibrationState,
    },

    #[error("Invalid calibration request: {0}")]
    InvalidRequest(String),

    #[error("Calibration coefficients rejected: {0}")]
    CoefficientsRejected(String),

    /// Coefficients are live but could not be written to the store
    #[error("Calibration for wheel {wheel} applied but not persisted: {source}")]
    Persistence {
        wheel: WheelPosition,
        #[source]
        source: PersistenceError,
    },
}

pub type CalibrationResult<T> = Result<T, CalibrationError>;
