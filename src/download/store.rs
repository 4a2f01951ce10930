//! Durable storage for active download records
//!
//! Every mutation rewrites the whole blob. Records are keyed by source URL.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

use super::record::{Callbacks, DownloadRecord};

/// Current layout version written by [`JsonFileStore`]
pub const STATE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode download state: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode download state: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Unsupported download state version {0}")]
    UnsupportedVersion(u32),

    #[error("Durable store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Key-value persistence for download records
pub trait DurableStore: Send + Sync {
    /// Read every persisted record
    fn load_all(&self) -> Result<HashMap<String, DownloadRecord>, StoreError>;

    /// Replace the persisted set with `records`
    fn save_all(&self, records: &HashMap<String, DownloadRecord>) -> Result<(), StoreError>;

    /// Drop every persisted record
    fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Serialize)]
struct StateDocument<'a> {
    version: u32,
    downloads: &'a HashMap<String, DownloadRecord>,
}

/// Accepted on-disk layouts. A bare map predates the version envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredState {
    Versioned {
        version: u32,
        downloads: HashMap<String, DownloadRecord>,
    },
    Legacy(HashMap<String, DownloadRecord>),
}

impl StoredState {
    fn into_records(self) -> Result<HashMap<String, DownloadRecord>, StoreError> {
        match self {
            Self::Versioned { version, downloads } if version <= STATE_VERSION => Ok(downloads),
            Self::Versioned { version, .. } => Err(StoreError::UnsupportedVersion(version)),
            Self::Legacy(downloads) => Ok(downloads),
        }
    }
}

/// JSON document on the local filesystem, written atomically
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DurableStore for JsonFileStore {
    fn load_all(&self) -> Result<HashMap<String, DownloadRecord>, StoreError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(HashMap::new());
        }

        let state: StoredState = serde_json::from_slice(&content).map_err(StoreError::Decode)?;
        state.into_records()
    }

    fn save_all(&self, records: &HashMap<String, DownloadRecord>) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(&StateDocument {
            version: STATE_VERSION,
            downloads: records,
        })
        .map_err(StoreError::Encode)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }

        // Atomic write: temp file + rename
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &content).map_err(|e| StoreError::io(&temp_path, e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        tracing::trace!("Saved {} download record(s) to {:?}", records.len(), self.path);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }
}

/// Process-local store for tests and ephemeral runs.
///
/// Writes can be made to fail on demand to exercise flush-failure paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, DownloadRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `save_all`/`clear` calls fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of persisted records
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DownloadRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl DurableStore for MemoryStore {
    fn load_all(&self) -> Result<HashMap<String, DownloadRecord>, StoreError> {
        Ok(self.lock().clone())
    }

    fn save_all(&self, records: &HashMap<String, DownloadRecord>) -> Result<(), StoreError> {
        self.check_writable()?;
        // Persisted form never carries callbacks
        let stripped = records
            .iter()
            .map(|(key, record)| {
                (
                    key.clone(),
                    record.clone().with_callbacks(Callbacks::default()),
                )
            })
            .collect();
        *self.lock() = stripped;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().clear();
        Ok(())
    }
}
