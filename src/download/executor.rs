//! Transfer executor contract
//!
//! The executor performs the network I/O for a download. The scheduler tells it
//! *when* to start and whether to resume; the executor reports back progress and a
//! terminal outcome keyed by the source URL it was started with.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use super::http_errors::HttpErrorInfo;
use super::record::ResumeToken;

/// Handle to one outstanding transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub id: Uuid,
    /// Source URL of the original request
    pub url: Url,
}

impl TaskHandle {
    pub fn new(url: Url) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
        }
    }
}

/// Request to begin (or resume) a transfer
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: Url,
    pub resume_token: Option<ResumeToken>,
    /// Backoff applied before this attempt
    pub delay: Duration,
    /// Transfer must not begin before this instant
    pub not_before: DateTime<Utc>,
}

impl TransferRequest {
    /// First attempt, starts immediately
    pub fn immediate(url: Url) -> Self {
        Self {
            url,
            resume_token: None,
            delay: Duration::ZERO,
            not_before: Utc::now(),
        }
    }

    /// Retry attempt scheduled `delay` from now
    pub fn delayed(url: Url, resume_token: Option<ResumeToken>, delay: Duration) -> Self {
        let offset = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            url,
            resume_token,
            delay,
            not_before: Utc::now() + offset,
        }
    }
}

/// Category of a transport-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    Connect,
    Timeout,
    Body,
    Io,
    Cancelled,
    Other,
}

/// Transport failure reported by an executor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransferError {
    pub kind: TransferErrorKind,
    pub message: String,
}

impl TransferError {
    pub fn new(kind: TransferErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::Timeout, message)
    }

    pub fn body(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::Body, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::Io, message)
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransferErrorKind::Timeout
        } else if e.is_connect() {
            TransferErrorKind::Connect
        } else if e.is_body() || e.is_decode() {
            TransferErrorKind::Body
        } else {
            TransferErrorKind::Other
        };
        Self::new(kind, e.to_string())
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

/// Terminal result of one transfer attempt
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    /// Body fully written to a temporary file
    Downloaded {
        temp_path: PathBuf,
        suggested_filename: Option<String>,
    },
    /// Server answered with an error status (>= 400)
    HttpStatus { status: u16 },
    /// Connection or body failure, optionally resumable
    Transport {
        error: TransferError,
        resume_token: Option<ResumeToken>,
    },
}

impl TransferOutcome {
    /// Classify a completed response by status code
    pub fn from_response(status: u16, temp_path: PathBuf, suggested_filename: Option<String>) -> Self {
        if HttpErrorInfo::is_error_status(status) {
            Self::HttpStatus { status }
        } else {
            Self::Downloaded {
                temp_path,
                suggested_filename,
            }
        }
    }
}

/// Message from the executor back to the scheduler
#[derive(Debug, Clone)]
pub enum TransferReport {
    Progress {
        url: Url,
        bytes_written: i64,
        /// Zero or negative when the total is unknown
        bytes_expected: i64,
        /// Transfer already carries an error
        errored: bool,
    },
    Finished {
        url: Url,
        outcome: TransferOutcome,
    },
}

pub type ReportSender = mpsc::UnboundedSender<TransferReport>;
pub type ReportReceiver = mpsc::UnboundedReceiver<TransferReport>;

/// Create the channel an executor uses to report back to the scheduler
pub fn report_channel() -> (ReportSender, ReportReceiver) {
    mpsc::unbounded_channel()
}

/// Performs the network side of a download
pub trait TransferExecutor: Send + Sync {
    /// Begin a transfer no earlier than `request.not_before`
    fn start(&self, request: TransferRequest) -> TaskHandle;

    /// Ask a transfer to stop. Cooperative; the caller does not wait.
    fn cancel(&self, handle: &TaskHandle);

    /// Transfers that are scheduled or running
    fn outstanding(&self) -> Vec<TaskHandle>;
}
