use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use super::error::DownloadError;

/// Progress callback, receives the completed fraction in `0.0..=1.0`
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Completion callback, receives the final file location or the error that ended the download
pub type CompletionCallback = Arc<dyn Fn(Result<PathBuf, DownloadError>) + Send + Sync>;

/// Caller-supplied callbacks attached to a live record.
///
/// Held in memory only. A record reloaded from durable storage after a restart
/// carries empty callbacks and finishes without notifying the original caller.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub progress: Option<ProgressCallback>,
    pub completion: Option<CompletionCallback>,
}

impl Callbacks {
    pub fn is_empty(&self) -> bool {
        self.progress.is_none() && self.completion.is_none()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("progress", &self.progress.is_some())
            .field("completion", &self.completion.is_some())
            .finish()
    }
}

/// One active download, keyed by its source URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub(crate) remote_url: Url,
    #[serde(rename = "destination_url")]
    pub(crate) destination: PathBuf,
    #[serde(default)]
    pub(crate) retry_count: u32,
    #[serde(skip)]
    pub(crate) callbacks: Callbacks,
}

impl DownloadRecord {
    pub fn new(remote_url: Url, destination: impl Into<PathBuf>) -> Self {
        Self {
            remote_url,
            destination: destination.into(),
            retry_count: 0,
            callbacks: Callbacks::default(),
        }
    }

    /// Attach caller callbacks (kept out of the persisted form)
    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Seed the retry counter, e.g. when rebuilding a record from an older run
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Store key: the source URL as a string
    pub fn key(&self) -> &str {
        self.remote_url.as_str()
    }

    pub fn remote_url(&self) -> &Url {
        &self.remote_url
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    /// Last path component of the source, used for log lines and notifications
    pub fn display_name(&self) -> String {
        crate::file::naming::filename_from_url(&self.remote_url)
    }
}

/// Opaque blob produced by a failed transfer so the next attempt can continue
/// from partial state. Only the executor that produced it knows its layout.
#[derive(Clone, PartialEq, Eq)]
pub struct ResumeToken(Vec<u8>);

impl ResumeToken {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResumeToken({} bytes)", self.0.len())
    }
}
