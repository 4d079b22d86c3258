//! UDS (ISO 14229) protocol constants and framing helpers

pub mod dtc;
mod nrc;

pub use dtc::{status_bit, DtcEntry, DtcStatus, DtcTable, DTC_TABLE_CAPACITY};
pub use nrc::NegativeResponseCode;

/// UDS Service IDs handled by the ABS service
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const CLEAR_DIAGNOSTIC_INFO: u8 = 0x14;
    pub const READ_DTC_INFO: u8 = 0x19;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const WRITE_DATA_BY_ID: u8 = 0x2E;
    pub const IO_CONTROL_BY_ID: u8 = 0x2F;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
}

/// Offset added to a service ID in a positive response
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// ECUReset (0x11) reset types
pub mod reset_type {
    pub const HARD_RESET: u8 = 0x01;
    pub const SOFT_RESET: u8 = 0x03;
}

/// ReadDTCInformation (0x19) sub-functions
pub mod dtc_sub_function {
    pub const REPORT_DTC_BY_STATUS_MASK: u8 = 0x02;
    pub const REPORT_SUPPORTED_DTC: u8 = 0x0A;
}

/// ClearDiagnosticInformation (0x14) group covering every DTC
pub const DTC_GROUP_ALL: u32 = 0xFF_FFFF;

/// RoutineControl (0x31) sub-functions
pub mod routine_sub_function {
    pub const START_ROUTINE: u8 = 0x01;
    pub const STOP_ROUTINE: u8 = 0x02;
    pub const REQUEST_ROUTINE_RESULTS: u8 = 0x03;
}

/// Session timing reported in the session control response
///
/// P2 in ms, P2* in units of 10 ms.
pub mod timing {
    pub const P2_SERVER_MAX_MS: u16 = 50;
    pub const P2_STAR_SERVER_MAX_10MS: u16 = 500;
}

/// Create a positive response for a service
pub fn positive_response(service_id: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(service_id.wrapping_add(POSITIVE_RESPONSE_OFFSET));
    response.extend_from_slice(data);
    response
}

/// Create a negative response
pub fn negative_response(service_id: u8, nrc: NegativeResponseCode) -> Vec<u8> {
    vec![service_id::NEGATIVE_RESPONSE, service_id, nrc.into()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_response() {
        assert_eq!(positive_response(0x22, &[0xF1, 0x20]), vec![0x62, 0xF1, 0x20]);
    }

    #[test]
    fn test_negative_response() {
        assert_eq!(
            negative_response(0x2E, NegativeResponseCode::ConditionsNotCorrect),
            vec![0x7F, 0x2E, 0x22]
        );
    }
}
