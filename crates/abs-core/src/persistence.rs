//! Calibration block storage
//!
//! The calibration manager reads and writes one block per wheel through the
//! [`CalibrationStore`] trait. [`MemoryStore`] keeps blocks in RAM and can be
//! told to fail reads or writes, which is how NVM faults are exercised.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::calibration::CalibrationCoefficients;

/// Storage failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Block 0x{0:04X} not found")]
    NotFound(u16),

    #[error("Read of block 0x{block_id:04X} failed: {reason}")]
    ReadFailed { block_id: u16, reason: String },

    #[error("Write of block 0x{block_id:04X} failed: {reason}")]
    WriteFailed { block_id: u16, reason: String },

    #[error("Block 0x{block_id:04X} is corrupt: {reason}")]
    Corrupt { block_id: u16, reason: String },
}

/// Persistent storage for calibration blocks
#[cfg_attr(test, mockall::automock)]
pub trait CalibrationStore: Send {
    fn read_block(&self, block_id: u16) -> Result<CalibrationCoefficients, PersistenceError>;

    fn write_block(
        &mut self,
        block_id: u16,
        coefficients: &CalibrationCoefficients,
    ) -> Result<(), PersistenceError>;
}

/// In-memory block store
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: HashMap<u16, CalibrationCoefficients>,
    fail_reads: bool,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with blocks
    pub fn with_blocks(blocks: impl IntoIterator<Item = (u16, CalibrationCoefficients)>) -> Self {
        Self {
            blocks: blocks.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn block(&self, block_id: u16) -> Option<&CalibrationCoefficients> {
        self.blocks.get(&block_id)
    }
}

impl CalibrationStore for MemoryStore {
    fn read_block(&self, block_id: u16) -> Result<CalibrationCoefficients, PersistenceError> {
        if self.fail_reads {
            return Err(PersistenceError::ReadFailed {
                block_id,
                reason: "injected read failure".to_string(),
            });
        }
        self.blocks
            .get(&block_id)
            .copied()
            .ok_or(PersistenceError::NotFound(block_id))
    }

    fn write_block(
        &mut self,
        block_id: u16,
        coefficients: &CalibrationCoefficients,
    ) -> Result<(), PersistenceError> {
        if self.fail_writes {
            return Err(PersistenceError::WriteFailed {
                block_id,
                reason: "injected write failure".to_string(),
            });
        }
        self.blocks.insert(block_id, *coefficients);
        Ok(())
    }
}

/// Store handle that can be shared with a test or a status endpoint
///
/// The manager owns a boxed store; wrapping a [`MemoryStore`] in this type
/// lets the owner keep a second handle to inspect or fault the same blocks.
#[derive(Debug, Clone, Default)]
pub struct SharedMemoryStore {
    inner: Arc<Mutex<MemoryStore>>,
}

impl SharedMemoryStore {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.lock().set_fail_reads(fail);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().set_fail_writes(fail);
    }

    pub fn block(&self, block_id: u16) -> Option<CalibrationCoefficients> {
        self.inner.lock().block(block_id).copied()
    }
}

impl CalibrationStore for SharedMemoryStore {
    fn read_block(&self, block_id: u16) -> Result<CalibrationCoefficients, PersistenceError> {
        self.inner.lock().read_block(block_id)
    }

    fn write_block(
        &mut self,
        block_id: u16,
        coefficients: &CalibrationCoefficients,
    ) -> Result<(), PersistenceError> {
        self.inner.lock().write_block(block_id, coefficients)
    }
}
