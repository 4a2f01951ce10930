//! User-visible notifications
//!
//! Notifications are plain-text summaries (download complete, reschedule, all
//! downloads complete). Delivery failures never affect the download itself.

use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Not authorized to schedule notification")]
    NotAuthorized,

    #[error("Could not schedule notification: {0}")]
    Delivery(String),
}

/// Delivers a notification to the user
pub trait Notifier: Send + Sync {
    fn notify(&self, text: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, text: &str) -> Result<(), NotifyError> {
        tracing::info!(target: "dlkeeper::notify", "{}", text);
        Ok(())
    }
}

/// Prints notifications to stderr, for interactive CLI runs
#[derive(Debug, Clone, Copy)]
pub struct ConsoleNotifier {
    authorized: bool,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self { authorized: true }
    }

    /// Notifier that refuses every notification, e.g. when stderr is not a terminal
    pub fn unauthorized() -> Self {
        Self { authorized: false }
    }
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, text: &str) -> Result<(), NotifyError> {
        if !self.authorized {
            return Err(NotifyError::NotAuthorized);
        }
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "[dlkeeper] {}", text).map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}
