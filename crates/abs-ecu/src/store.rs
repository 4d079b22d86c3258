//! File-backed calibration store
//!
//! Each block is one JSON file `block_XXXX.json` in the store directory. The
//! coefficients are kept as an embedded JSON payload guarded by a CRC-32, so
//! a truncated or hand-edited file reads back as corrupt instead of as
//! plausible-looking coefficients.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use abs_core::{CalibrationCoefficients, CalibrationStore, PersistenceError};
use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// CRC-32 calculator (ISO HDLC / CRC-32)
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Serialize, Deserialize)]
struct BlockFile {
    block_id: u16,
    /// JSON-encoded coefficients
    payload: String,
    /// Big-endian CRC-32 of `payload`, hex
    crc: String,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn block_path(&self, block_id: u16) -> PathBuf {
        self.directory.join(format!("block_{:04X}.json", block_id))
    }
}

fn checksum(payload: &str) -> String {
    hex::encode(CRC32.checksum(payload.as_bytes()).to_be_bytes())
}

impl CalibrationStore for FileStore {
    fn read_block(&self, block_id: u16) -> Result<CalibrationCoefficients, PersistenceError> {
        let path = self.block_path(block_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(block_id))
            }
            Err(e) => {
                return Err(PersistenceError::ReadFailed {
                    block_id,
                    reason: e.to_string(),
                })
            }
        };

        let corrupt = |reason: String| PersistenceError::Corrupt { block_id, reason };

        let file: BlockFile = serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
        if file.block_id != block_id {
            return Err(corrupt(format!(
                "file holds block 0x{:04X}",
                file.block_id
            )));
        }
        let expected = checksum(&file.payload);
        if !file.crc.eq_ignore_ascii_case(&expected) {
            return Err(corrupt(format!(
                "CRC mismatch: stored {}, computed {}",
                file.crc, expected
            )));
        }

        let coefficients = serde_json::from_str(&file.payload).map_err(|e| corrupt(e.to_string()))?;
        debug!(block_id = format!("0x{:04X}", block_id), path = %path.display(), "Block read");
        Ok(coefficients)
    }

    fn write_block(
        &mut self,
        block_id: u16,
        coefficients: &CalibrationCoefficients,
    ) -> Result<(), PersistenceError> {
        let failed = |reason: String| PersistenceError::WriteFailed { block_id, reason };

        let payload = serde_json::to_string(coefficients).map_err(|e| failed(e.to_string()))?;
        let file = BlockFile {
            block_id,
            crc: checksum(&payload),
            payload,
        };
        let content = serde_json::to_string_pretty(&file).map_err(|e| failed(e.to_string()))?;

        std::fs::create_dir_all(&self.directory).map_err(|e| failed(e.to_string()))?;
        // the previous block stays intact until the rename
        let path = self.block_path(block_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| failed(e.to_string()))?;
        std::fs::rename(&tmp, &path).map_err(|e| failed(e.to_string()))?;

        debug!(block_id = format!("0x{:04X}", block_id), path = %path.display(), "Block written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> CalibrationCoefficients {
        CalibrationCoefficients {
            correction_factor: 1.0234,
            applied_at_ms: 4200,
            ..CalibrationCoefficients::factory()
        }
    }

    #[test]
    fn test_missing_block_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.read_block(0x0100), Err(PersistenceError::NotFound(0x0100)));
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("nested"));
        store.write_block(0x0102, &sample()).unwrap();

        assert!(dir.path().join("nested/block_0102.json").exists());
        assert_eq!(store.read_block(0x0102).unwrap(), sample());

        // survives a fresh handle on the same directory
        let reopened = FileStore::new(dir.path().join("nested"));
        assert_eq!(reopened.read_block(0x0102).unwrap(), sample());
    }

    #[test]
    fn test_tampered_payload_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path());
        store.write_block(0x0100, &sample()).unwrap();

        let path = dir.path().join("block_0100.json");
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("1.0234", "1.4234")).unwrap();

        assert!(matches!(
            store.read_block(0x0100),
            Err(PersistenceError::Corrupt { block_id: 0x0100, .. })
        ));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("block_0101.json"), "not json").unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.read_block(0x0101),
            Err(PersistenceError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_block_id_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path());
        store.write_block(0x0100, &sample()).unwrap();
        std::fs::copy(
            dir.path().join("block_0100.json"),
            dir.path().join("block_0103.json"),
        )
        .unwrap();
        assert!(matches!(
            store.read_block(0x0103),
            Err(PersistenceError::Corrupt { .. })
        ));
    }
}
