//! DTC status handling and the fixed-capacity DTC table
//!
//! Status bits follow ISO 14229-1. The table keeps at most
//! [`DTC_TABLE_CAPACITY`] entries; an entry once allocated stays in its slot
//! and is only reset by a clear request.

use std::fmt;

use abs_core::{CalibrationFault, FaultKind, WheelPosition};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Number of DTC slots
pub const DTC_TABLE_CAPACITY: usize = 32;

/// DTC status byte bit definitions per ISO 14229-1
pub mod status_bit {
    /// Bit 0: Test Failed
    pub const TEST_FAILED: u8 = 0x01;
    /// Bit 1: Test Failed This Operation Cycle
    pub const TEST_FAILED_THIS_OPERATION_CYCLE: u8 = 0x02;
    /// Bit 2: Pending DTC
    pub const PENDING_DTC: u8 = 0x04;
    /// Bit 3: Confirmed DTC
    pub const CONFIRMED_DTC: u8 = 0x08;
    /// Bit 4: Test Not Completed Since Last Clear
    pub const TEST_NOT_COMPLETED_SINCE_LAST_CLEAR: u8 = 0x10;
    /// Bit 5: Test Failed Since Last Clear
    pub const TEST_FAILED_SINCE_LAST_CLEAR: u8 = 0x20;
    /// Bit 6: Test Not Completed This Operation Cycle
    pub const TEST_NOT_COMPLETED_THIS_OPERATION_CYCLE: u8 = 0x40;
    /// Bit 7: Warning Indicator Requested
    pub const WARNING_INDICATOR_REQUESTED: u8 = 0x80;
}

/// DTC numbers raised by the ABS supervisor
pub mod dtc_code {
    /// Wheel miscalibration, plus wheel index
    pub const MISCALIBRATION_BASE: u32 = 0xC1_4100;
    /// Wheel sensor failure, plus wheel index
    pub const SENSOR_FAILURE_BASE: u32 = 0xC1_4200;
    /// Other plausibility faults
    pub const PLAUSIBILITY: u32 = 0xC1_4300;
    /// Cross-wheel speed difference
    pub const SPEED_DIFFERENCE: u32 = 0xC1_4400;
    pub const CALIBRATION_FAILED: u32 = 0xC1_4187;
    pub const CALIBRATION_OUT_OF_RANGE: u32 = 0xC1_4287;
    pub const CALIBRATION_NVM: u32 = 0xC1_4387;
}

/// DTC number for a confirmed detector record
pub fn code_for_fault(kind: FaultKind, wheel: WheelPosition) -> Option<u32> {
    let wheel = wheel.index() as u32;
    match kind {
        FaultKind::None => None,
        FaultKind::Miscalibration => Some(dtc_code::MISCALIBRATION_BASE + wheel),
        FaultKind::SensorFailure => Some(dtc_code::SENSOR_FAILURE_BASE + wheel),
        FaultKind::SpeedDifference => Some(dtc_code::SPEED_DIFFERENCE),
        FaultKind::AccelerationImplausible => Some(dtc_code::PLAUSIBILITY),
    }
}

/// DTC number for a calibration fault
pub fn code_for_calibration_fault(fault: &CalibrationFault) -> u32 {
    match fault {
        CalibrationFault::Failed(_) => dtc_code::CALIBRATION_FAILED,
        CalibrationFault::OutOfRange(_) => dtc_code::CALIBRATION_OUT_OF_RANGE,
        CalibrationFault::Nvm(_) => dtc_code::CALIBRATION_NVM,
    }
}

/// DTC status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct DtcStatus(u8);

impl DtcStatus {
    /// Status of a freshly failed test
    pub const NEWLY_FAILED: Self = Self(
        status_bit::TEST_FAILED
            | status_bit::TEST_FAILED_THIS_OPERATION_CYCLE
            | status_bit::PENDING_DTC
            | status_bit::TEST_FAILED_SINCE_LAST_CLEAR,
    );

    /// Status of a repeatedly failed test, before confirmation is applied
    pub const FAILED_AGAIN: Self = Self(
        status_bit::TEST_FAILED
            | status_bit::TEST_FAILED_THIS_OPERATION_CYCLE
            | status_bit::TEST_FAILED_SINCE_LAST_CLEAR,
    );

    /// Status after a clear
    pub const CLEARED: Self = Self(status_bit::TEST_NOT_COMPLETED_SINCE_LAST_CLEAR);

    pub const fn from_byte(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    fn set(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn test_failed(self) -> bool {
        self.has(status_bit::TEST_FAILED)
    }

    pub fn test_failed_this_operation_cycle(self) -> bool {
        self.has(status_bit::TEST_FAILED_THIS_OPERATION_CYCLE)
    }

    pub fn pending(self) -> bool {
        self.has(status_bit::PENDING_DTC)
    }

    pub fn confirmed(self) -> bool {
        self.has(status_bit::CONFIRMED_DTC)
    }

    pub fn test_not_completed_since_last_clear(self) -> bool {
        self.has(status_bit::TEST_NOT_COMPLETED_SINCE_LAST_CLEAR)
    }

    pub fn test_failed_since_last_clear(self) -> bool {
        self.has(status_bit::TEST_FAILED_SINCE_LAST_CLEAR)
    }

    pub fn test_not_completed_this_operation_cycle(self) -> bool {
        self.has(status_bit::TEST_NOT_COMPLETED_THIS_OPERATION_CYCLE)
    }

    pub fn warning_indicator_requested(self) -> bool {
        self.has(status_bit::WARNING_INDICATOR_REQUESTED)
    }

    pub fn set_test_failed(&mut self, on: bool) {
        self.set(status_bit::TEST_FAILED, on);
    }

    pub fn set_confirmed(&mut self, on: bool) {
        self.set(status_bit::CONFIRMED_DTC, on);
    }

    /// Check if the status matches a given mask
    pub fn matches_mask(self, mask: u8) -> bool {
        self.0 & mask != 0
    }
}

impl fmt::Display for DtcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// What raised a DTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DtcSource {
    Detector(FaultKind),
    Calibration,
}

/// One DTC table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DtcEntry {
    /// 24-bit DTC number
    pub code: u32,
    pub wheel: Option<WheelPosition>,
    pub source: DtcSource,
    pub status: DtcStatus,
    pub occurrence_count: u16,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
}

impl DtcEntry {
    /// DTC number as three big-endian bytes
    pub fn code_bytes(&self) -> [u8; 3] {
        let b = self.code.to_be_bytes();
        [b[1], b[2], b[3]]
    }
}

/// Table is full and the DTC could not be stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("DTC table full, dropped 0x{0:06X}")]
pub struct DtcTableFull(pub u32);

/// Fixed-capacity DTC table
#[derive(Debug, Clone)]
pub struct DtcTable {
    slots: [Option<DtcEntry>; DTC_TABLE_CAPACITY],
    confirmation_threshold: u16,
}

impl DtcTable {
    /// `confirmation_threshold` is the occurrence count at which an entry is confirmed
    pub fn new(confirmation_threshold: u16) -> Self {
        Self {
            slots: [None; DTC_TABLE_CAPACITY],
            confirmation_threshold: confirmation_threshold.max(1),
        }
    }

    pub fn confirmation_threshold(&self) -> u16 {
        self.confirmation_threshold
    }

    /// Record a failed test for `code`
    ///
    /// A new entry (or one reset by a clear) starts pending with count 1.
    /// Subsequent reports bump the count and set CONFIRMED once the count
    /// reaches the threshold.
    pub fn report_failed(
        &mut self,
        code: u32,
        wheel: Option<WheelPosition>,
        source: DtcSource,
        now_ms: u64,
    ) -> Result<DtcEntry, DtcTableFull> {
        let threshold = self.confirmation_threshold;

        if let Some(entry) = self.slots.iter_mut().flatten().find(|e| e.code == code) {
            if entry.occurrence_count == 0 {
                entry.status = DtcStatus::NEWLY_FAILED;
                entry.occurrence_count = 1;
                entry.first_seen_ms = now_ms;
            } else {
                let was_confirmed = entry.status.confirmed();
                entry.occurrence_count = entry.occurrence_count.saturating_add(1);
                entry.status = DtcStatus::FAILED_AGAIN;
                if entry.occurrence_count >= threshold {
                    if !was_confirmed {
                        debug!(dtc = format!("0x{:06X}", code), count = entry.occurrence_count, "DTC confirmed");
                    }
                    entry.status.set_confirmed(true);
                }
            }
            entry.wheel = wheel;
            entry.source = source;
            entry.last_seen_ms = now_ms;
            return Ok(*entry);
        }

        let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) else {
            warn!(dtc = format!("0x{:06X}", code), "DTC table full");
            return Err(DtcTableFull(code));
        };
        let mut entry = DtcEntry {
            code,
            wheel,
            source,
            status: DtcStatus::NEWLY_FAILED,
            occurrence_count: 1,
            first_seen_ms: now_ms,
            last_seen_ms: now_ms,
        };
        if threshold <= 1 {
            entry.status.set_confirmed(true);
        }
        *slot = Some(entry);
        info!(dtc = format!("0x{:06X}", code), "DTC stored");
        Ok(entry)
    }

    /// Drop TEST_FAILED on every entry whose code is not in `observed`
    pub fn age(&mut self, observed: &[u32]) {
        for entry in self.slots.iter_mut().flatten() {
            if !observed.contains(&entry.code) {
                entry.status.set_test_failed(false);
            }
        }
    }

    /// Reset one entry; false when the code is not in the table
    pub fn clear(&mut self, code: u32) -> bool {
        match self.slots.iter_mut().flatten().find(|e| e.code == code) {
            Some(entry) => {
                Self::reset(entry);
                true
            }
            None => false,
        }
    }

    /// Reset every entry
    pub fn clear_all(&mut self) {
        for entry in self.slots.iter_mut().flatten() {
            Self::reset(entry);
        }
    }

    fn reset(entry: &mut DtcEntry) {
        entry.status = DtcStatus::CLEARED;
        entry.occurrence_count = 0;
    }

    pub fn get(&self, code: u32) -> Option<&DtcEntry> {
        self.entries().find(|e| e.code == code)
    }

    /// Allocated entries in slot order
    pub fn entries(&self) -> impl Iterator<Item = &DtcEntry> {
        self.slots.iter().flatten()
    }

    /// Allocated entries whose status matches `mask`
    pub fn matching(&self, mask: u8) -> impl Iterator<Item = &DtcEntry> {
        self.entries().filter(move |e| e.status.matches_mask(mask))
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DtcTable {
    fn default() -> Self {
        Self::new(3)
    }
}
