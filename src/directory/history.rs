//! File-backed download history.
//!
//! Append-only JSON-lines log, one record per granted download, stored
//! under `dirs::data_dir()/<namespace>/downloads.jsonl`. A process-local
//! mutex serializes appends so records never interleave mid-line.

use crate::directory::{DownloadHistory, DownloadRecord};
use crate::GateError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Durable [`DownloadHistory`] backed by a JSON-lines file.
pub struct FileHistory {
    /// Path to the log file.
    path: PathBuf,
    /// Serializes appends within this process.
    write_lock: Mutex<()>,
}

impl FileHistory {
    /// Create a history log at the given path.
    pub fn new(path: PathBuf) -> Result<Self, GateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                GateError::StoreUnavailable(format!("Failed to create history dir: {}", e))
            })?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Create a history log with a namespace under the platform data dir.
    pub fn with_namespace(namespace: &str) -> Result<Self, GateError> {
        let base_dir = dirs::data_dir().ok_or_else(|| {
            GateError::StoreUnavailable("Could not find data directory".to_string())
        })?;

        Self::new(base_dir.join(namespace).join("downloads.jsonl"))
    }
}

impl DownloadHistory for FileHistory {
    fn append(&self, record: &DownloadRecord) -> Result<(), GateError> {
        let line = serde_json::to_string(record).map_err(|e| {
            GateError::StoreUnavailable(format!("Failed to serialize record: {}", e))
        })?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| GateError::StoreUnavailable("history lock poisoned".to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| GateError::StoreUnavailable(format!("Failed to open history: {}", e)))?;

        writeln!(file, "{}", line)
            .map_err(|e| GateError::StoreUnavailable(format!("Failed to append record: {}", e)))
    }

    fn find_by_id_for_user(
        &self,
        download_id: &str,
        user_id: &str,
    ) -> Result<Option<DownloadRecord>, GateError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .map_err(|e| GateError::StoreUnavailable(format!("Failed to read history: {}", e)))?;

        for line in contents.lines() {
            let record: DownloadRecord = serde_json::from_str(line).map_err(|e| {
                GateError::StoreUnavailable(format!("Corrupt history record: {}", e))
            })?;
            if record.id == download_id && record.user_id == user_id {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}
