//! Diagnostic session state

use std::fmt;

use serde::Serialize;

use crate::error::{DiagnosticError, DiagnosticResult};

/// UDS diagnostic session level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DiagnosticSession {
    /// Default session (0x01)
    #[default]
    Default = 0x01,
    /// Programming session (0x02)
    Programming = 0x02,
    /// Extended diagnostic session (0x03)
    Extended = 0x03,
    /// Safety system session (0x04)
    Safety = 0x04,
}

impl DiagnosticSession {
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Gate for services that mutate calibration
    ///
    /// Only the extended session is accepted. The safety session is refused
    /// with a security error, every other session with a conditions error.
    pub fn require_extended(self) -> DiagnosticResult<()> {
        match self {
            Self::Extended => Ok(()),
            Self::Safety => Err(DiagnosticError::SecurityAccessDenied(self)),
            other => Err(DiagnosticError::ConditionsNotCorrect(format!(
                "requires extended session, active session is {}",
                other
            ))),
        }
    }
}

impl TryFrom<u8> for DiagnosticSession {
    type Error = DiagnosticError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Default),
            0x02 => Ok(Self::Programming),
            0x03 => Ok(Self::Extended),
            0x04 => Ok(Self::Safety),
            other => Err(DiagnosticError::SubFunctionNotSupported(other)),
        }
    }
}

impl fmt::Display for DiagnosticSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::Programming => "programming",
            Self::Extended => "extended",
            Self::Safety => "safety",
        };
        f.write_str(s)
    }
}

/// Process-wide session bookkeeping, never persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub session: DiagnosticSession,
    /// ECU resets served since start
    pub reset_count: u16,
}
