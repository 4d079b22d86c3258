//! Diagnostic request errors

use thiserror::Error;

use crate::session::DiagnosticSession;
use crate::uds::NegativeResponseCode;

/// Reasons a request is answered with a negative response
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiagnosticError {
    #[error("Service 0x{0:02X} not supported")]
    ServiceNotSupported(u8),

    #[error("Sub-function 0x{0:02X} not supported")]
    SubFunctionNotSupported(u8),

    #[error("Incorrect message length: expected at least {expected}, got {actual}")]
    IncorrectLength { expected: usize, actual: usize },

    #[error("Conditions not correct: {0}")]
    ConditionsNotCorrect(String),

    #[error("Security access denied in {0} session")]
    SecurityAccessDenied(DiagnosticSession),

    #[error("Request sequence error: {0}")]
    RequestSequence(String),

    #[error("Request out of range: {0}")]
    OutOfRange(String),
}

impl DiagnosticError {
    /// Negative response code sent for this error
    pub fn nrc(&self) -> NegativeResponseCode {
        match self {
            Self::ServiceNotSupported(_) => NegativeResponseCode::ServiceNotSupported,
            Self::SubFunctionNotSupported(_) => NegativeResponseCode::SubFunctionNotSupported,
            Self::IncorrectLength { .. } => NegativeResponseCode::IncorrectMessageLengthOrFormat,
            Self::ConditionsNotCorrect(_) => NegativeResponseCode::ConditionsNotCorrect,
            Self::SecurityAccessDenied(_) => NegativeResponseCode::SecurityAccessDenied,
            Self::RequestSequence(_) => NegativeResponseCode::RequestSequenceError,
            Self::OutOfRange(_) => NegativeResponseCode::RequestOutOfRange,
        }
    }
}

pub type DiagnosticResult<T> = Result<T, DiagnosticError>;

/// Fail with `IncorrectLength` when `data` is shorter than `expected`
pub(crate) fn require_len(data: &[u8], expected: usize) -> DiagnosticResult<()> {
    if data.len() < expected {
        return Err(DiagnosticError::IncorrectLength {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}
