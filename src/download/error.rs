use thiserror::Error;

use super::executor::TransferError;
use super::http_errors::HttpErrorInfo;
use crate::file::mover::MoveError;

/// Terminal error handed to a download's completion callback
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Server kept answering with an error status until retries ran out
    #[error("HTTP {status} - {reason}")]
    Http { status: u16, reason: String },

    /// Transfer failed and retries ran out; the executor's error, unchanged
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Bytes arrived but the file could not be placed at its destination
    #[error("Download complete but could not be moved into place: {0}")]
    Move(#[from] MoveError),
}

impl DownloadError {
    /// Build an HTTP error carrying the status and its reason phrase
    pub fn http(status: u16) -> Self {
        Self::Http {
            status,
            reason: HttpErrorInfo::from_status(status).description,
        }
    }

    /// Status code for HTTP failures
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
