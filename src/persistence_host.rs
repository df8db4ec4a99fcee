//! Node state retention for host (development) builds.
//!
//! Stands in for RTC memory with a file holding the retained record as
//! hex. Uses `~/.lora-sensor-node/state.hex` by default.
//!
//! # Usage
//!
//! ```ignore
//! use lora_sensor_node::persistence_host::FileStore;
//!
//! let store = FileStore::new(persistence_host::default_state_path()?);
//! let mut power = PowerController::new(SimulatedSleep::new(60), store, &config);
//! ```

use crate::power::{RetainedStore, StoreError};
use crate::state::NodeState;
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const RECORD_LEN: usize = NodeState::RETAINED_LEN;

/// Get the default state file path.
///
/// Returns `~/.lora-sensor-node/state.hex`
pub fn default_state_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home)
        .join(".lora-sensor-node")
        .join("state.hex"))
}

/// Retained record kept in a file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a record has been written.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Remove the record, so the next timer wake starts cold.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                warn!("State cleared at {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl RetainedStore for FileStore {
    /// Unreadable or malformed files load as `None`.
    fn load(&mut self) -> Result<Option<[u8; RECORD_LEN]>, StoreError> {
        let hex_str = match fs::read_to_string(&self.path) {
            Ok(s) => s.trim().to_string(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No state file found at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut record = [0u8; RECORD_LEN];
        match hex::decode_to_slice(&hex_str, &mut record) {
            Ok(()) => Ok(Some(record)),
            Err(e) => {
                warn!("Malformed state file {:?}: {}", self.path, e);
                Ok(None)
            }
        }
    }

    /// Write with read-back verification.
    fn save(&mut self, record: &[u8; RECORD_LEN]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let hex_string = hex::encode(record);
        fs::write(&self.path, &hex_string)?;

        let read_back = fs::read_to_string(&self.path)?;
        if read_back != hex_string {
            warn!(
                "State verification failed: wrote {} bytes, read {} bytes",
                hex_string.len(),
                read_back.len()
            );
            return Err(StoreError::VerifyFailed);
        }

        info!("State saved to {:?}", self.path);
        Ok(())
    }
}
