//! Download queue and retry scheduler
//!
//! [`DownloadManager`] owns the set of active downloads. It hands transfers to a
//! [`TransferExecutor`], consumes the executor's reports, and decides for each
//! terminal outcome whether to finalize, retry with linear backoff, or give up.
//! Every change to the set is flushed to durable storage before the call returns.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::Level;
use url::Url;

use super::backing_store::BackingStore;
use super::callbacks::CallbackQueue;
use super::error::DownloadError;
use super::events::{DownloadEvent, EventBus};
use super::executor::{
    ReportReceiver, TransferExecutor, TransferOutcome, TransferReport, TransferRequest,
};
use super::http_errors::HttpErrorInfo;
use super::notify::{LogNotifier, Notifier};
use super::record::{Callbacks, DownloadRecord, ResumeToken};
use super::store::DurableStore;
use crate::app::config::{LogVerbosity, ManagerConfig};
use crate::file::mover::{FileMover, FsMover};

/// Invoked once when every transfer has finished
pub type BackgroundCompletionHandler = Box<dyn FnOnce() + Send + 'static>;

const TEXT_ALL_COMPLETE: &str = "All downloads complete";

pub struct DownloadManager {
    config: RwLock<ManagerConfig>,
    store: BackingStore,
    executor: Arc<dyn TransferExecutor>,
    mover: Arc<dyn FileMover>,
    notifier: Arc<dyn Notifier>,
    events: EventBus,
    callbacks: CallbackQueue,
    background_completion: Mutex<Option<BackgroundCompletionHandler>>,
}

impl DownloadManager {
    /// Create a manager over `durable` state driving `executor`.
    ///
    /// Files are placed with [`FsMover`] and notifications go to [`LogNotifier`]
    /// unless replaced with [`with_mover`](Self::with_mover) /
    /// [`with_notifier`](Self::with_notifier). Call [`reconcile`](Self::reconcile)
    /// afterwards to pick up downloads left over from a previous run.
    pub fn new(
        config: ManagerConfig,
        durable: Arc<dyn DurableStore>,
        executor: Arc<dyn TransferExecutor>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            store: BackingStore::new(durable),
            executor,
            mover: Arc::new(FsMover::new()),
            notifier: Arc::new(LogNotifier),
            events: EventBus::new(),
            callbacks: CallbackQueue::spawn(),
            background_completion: Mutex::new(None),
        }
    }

    pub fn with_mover(mut self, mover: Arc<dyn FileMover>) -> Self {
        self.mover = mover;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    // ========== Configuration ==========

    /// Snapshot of the current configuration
    pub fn config(&self) -> ManagerConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update_config(&self, apply: impl FnOnce(&mut ManagerConfig)) {
        let mut config = self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut config);
    }

    pub fn set_max_retries(&self, max_retries: u32) {
        self.update_config(|c| c.max_retries = max_retries);
    }

    /// Seconds of delay added per retry
    pub fn set_backoff_multiplier(&self, seconds: u64) {
        self.update_config(|c| c.backoff_multiplier = seconds);
    }

    pub fn set_broadcast_events(&self, enabled: bool) {
        self.update_config(|c| c.broadcast_events = enabled);
    }

    pub fn set_show_notifications(&self, enabled: bool) {
        self.update_config(|c| c.show_notifications = enabled);
    }

    pub fn set_log_verbosity(&self, verbosity: LogVerbosity) {
        self.update_config(|c| c.log_verbosity = verbosity);
    }

    /// Text used for every notification instead of the per-event default
    pub fn set_notification_text(&self, text: Option<String>) {
        self.update_config(|c| c.notification_text = text);
    }

    /// Register a one-shot handler run when all transfers have quiesced
    pub fn set_background_completion_handler(&self, handler: impl FnOnce() + Send + 'static) {
        *self
            .background_completion
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(handler));
    }

    // ========== Observation ==========

    /// Receive lifecycle events. Events are only published while
    /// `broadcast_events` is enabled.
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// Source URLs of every active download
    pub fn list_active_downloads(&self) -> Vec<Url> {
        self.store
            .all_records()
            .into_iter()
            .map(|record| record.remote_url)
            .collect()
    }

    /// Every active download record
    pub fn active_downloads(&self) -> Vec<DownloadRecord> {
        self.store.all_records()
    }

    /// Block until every callback dispatched so far has run
    pub fn flush_callbacks(&self) {
        self.callbacks.flush();
    }

    // ========== Queue operations ==========

    /// Add a download. A URL that is already active is ignored.
    pub fn submit(&self, url: Url, destination: impl Into<PathBuf>, callbacks: Callbacks) {
        let record = DownloadRecord::new(url.clone(), destination).with_callbacks(callbacks);
        let name = record.display_name();

        // Start under the store lock so quiescence never sees the record without
        // its transfer
        let inserted = self.store.insert_if_absent_then(record, || {
            self.executor.start(TransferRequest::immediate(url.clone()))
        });
        match inserted {
            None => {
                self.log_debug(format_args!("{} Already in progress", name));
                return;
            }
            Some((Err(e), _)) => tracing::warn!("Failed to persist new download {}: {}", url, e),
            Some((Ok(()), _)) => {}
        }

        self.log_debug(format_args!("Added {} to download queue", name));
        self.broadcast(|| DownloadEvent::Queued {
            url,
            attempt: 0,
            delay: Duration::ZERO,
        });
    }

    /// Attach callbacks to a download that is already active, e.g. one picked up
    /// by [`reconcile`](Self::reconcile). Returns false for an unknown URL.
    pub fn attach_callbacks(&self, url: &Url, callbacks: Callbacks) -> bool {
        let attached = self.store.set_callbacks(url.as_str(), callbacks);
        if attached {
            tracing::debug!("Attached callbacks to active download {}", url);
        }
        attached
    }

    /// Cancel every outstanding transfer and forget every download
    pub fn cancel_all(&self) {
        for handle in self.executor.outstanding() {
            self.executor.cancel(&handle);
        }

        if self.config().broadcast_events {
            for record in self.store.all_records() {
                self.events.emit(DownloadEvent::Removed {
                    url: record.remote_url,
                });
            }
        }

        if let Err(e) = self.store.remove_all() {
            tracing::warn!("Failed to clear download state: {}", e);
        }
        tracing::info!("Cancelled all downloads");
    }

    /// Cancel outstanding transfers started for `url` and forget its record.
    ///
    /// Returns whether a transfer was cancelled. A download with no outstanding
    /// transfer is left untouched.
    pub fn cancel(&self, url: &Url) -> bool {
        let matching: Vec<_> = self
            .executor
            .outstanding()
            .into_iter()
            .filter(|handle| &handle.url == url)
            .collect();

        if matching.is_empty() {
            return false;
        }

        for handle in &matching {
            self.executor.cancel(handle);
        }

        if let Err(e) = self.store.remove(url.as_str()) {
            tracing::warn!("Failed to persist cancellation of {}: {}", url, e);
        }
        self.broadcast(|| DownloadEvent::Removed { url: url.clone() });
        tracing::info!("Cancelled download: {}", url);
        true
    }

    /// Retry every download persisted by a previous run, dropping those that
    /// have no retries left. Returns how many were rescheduled.
    ///
    /// Reloaded downloads have no callbacks; they finish silently apart from
    /// events and notifications.
    pub fn reconcile(&self) -> usize {
        self.store.load();

        let mut rescheduled = 0;
        for record in self.store.all_records() {
            if self.reschedule(&record, None) {
                rescheduled += 1;
            } else {
                self.log_debug(format_args!(
                    "Dropping {} after {} retries",
                    record.display_name(),
                    record.retry_count
                ));
                if let Err(e) = self.store.remove(record.key()) {
                    tracing::warn!("Failed to drop exhausted download {}: {}", record.key(), e);
                }
            }
        }

        if rescheduled > 0 {
            tracing::info!("Resumed {} download(s) from previous run", rescheduled);
        }
        rescheduled
    }

    // ========== Executor reports ==========

    /// Consume executor reports until the channel closes.
    ///
    /// After each finished transfer, when nothing is outstanding and no report
    /// is waiting, the manager treats all transfers as quiesced.
    pub async fn process_reports(&self, mut rx: ReportReceiver) {
        while let Some(report) = rx.recv().await {
            match report {
                TransferReport::Progress {
                    url,
                    bytes_written,
                    bytes_expected,
                    errored,
                } => self.on_progress(&url, bytes_written, bytes_expected, errored),
                TransferReport::Finished { url, outcome } => {
                    self.on_transfer_finished(&url, outcome);
                    // outstanding() first: executors drop a task from it and
                    // send its report atomically
                    if self.executor.outstanding().is_empty() && rx.is_empty() {
                        self.on_all_transfers_quiesced();
                    }
                }
            }
        }
        tracing::debug!("Report channel closed");
    }

    /// Bytes arrived for `url`. Ignored when the total size is unknown.
    pub fn on_progress(&self, url: &Url, bytes_written: i64, bytes_expected: i64, errored: bool) {
        if bytes_expected <= 0 {
            tracing::trace!("Could not calculate progress for {}: expected size unknown", url);
            return;
        }

        let Some(record) = self.store.find(url.as_str()) else {
            return;
        };

        let fraction = (bytes_written as f32 / bytes_expected as f32).clamp(0.0, 1.0);
        self.log_debug(format_args!(
            "{} progress: {:.0}%",
            record.display_name(),
            fraction * 100.0
        ));

        if let Some(progress) = record.callbacks.progress.clone() {
            self.callbacks.dispatch(move || progress(fraction));
        }

        self.broadcast(|| {
            if errored {
                DownloadEvent::Failed {
                    url: url.clone(),
                    reason: "transfer reported an error".to_string(),
                }
            } else {
                DownloadEvent::Progress {
                    url: url.clone(),
                    fraction,
                }
            }
        });
    }

    /// A transfer for `url` reached a terminal outcome
    pub fn on_transfer_finished(&self, url: &Url, outcome: TransferOutcome) {
        let Some(record) = self.store.find(url.as_str()) else {
            tracing::trace!("Dropping report for unknown download {}", url);
            return;
        };

        match outcome {
            TransferOutcome::Downloaded {
                temp_path,
                suggested_filename,
            } => self.finalize(record, temp_path, suggested_filename),

            TransferOutcome::HttpStatus { status } => {
                if !self.reschedule(&record, None) {
                    let category = HttpErrorInfo::from_status(status).category;
                    let error = DownloadError::http(status);
                    self.log_error(format_args!("Download error ({}): {}", category, error));
                    self.fail(&record, error);
                }
            }

            TransferOutcome::Transport {
                error,
                resume_token,
            } => {
                if !self.reschedule(&record, resume_token) {
                    self.log_error(format_args!("Download error: {}", error));
                    self.fail(&record, DownloadError::Transfer(error));
                }
            }
        }
    }

    /// Run the background completion handler, if any, and clear all state.
    ///
    /// Returns false without doing anything while transfers are outstanding.
    pub fn on_all_transfers_quiesced(&self) -> bool {
        // Checked under the store lock: submit starts its transfer under the same lock
        match self
            .store
            .remove_all_if(|| self.executor.outstanding().is_empty())
        {
            None => return false,
            Some(Err(e)) => tracing::warn!("Failed to clear download state: {}", e),
            Some(Ok(())) => {}
        }

        let handler = self
            .background_completion
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handler) = handler {
            self.callbacks.dispatch(handler);
        }

        self.notify(TEXT_ALL_COMPLETE);
        tracing::info!("All downloads complete");
        true
    }

    // ========== Internals ==========

    /// Move a downloaded file into place and retire its record
    fn finalize(&self, record: DownloadRecord, temp_path: PathBuf, suggested: Option<String>) {
        let name = record.display_name();
        let file_name = suggested.unwrap_or_else(|| name.clone());
        let url = record.remote_url.clone();

        match self
            .mover
            .move_into_place(&temp_path, &record.destination, &file_name, true)
        {
            Ok(location) => {
                self.log_debug(format_args!("Download complete: {}", name));
                self.notify(&format!("Download complete: {}", name));
                self.complete(&record, Ok(location.clone()));
                self.forget(&url);
                self.broadcast(|| DownloadEvent::Removed { url: url.clone() });
                self.broadcast(|| DownloadEvent::Finished {
                    url: url.clone(),
                    location: location.clone(),
                });
                tracing::info!("Download complete: {} -> {:?}", url, location);
            }
            Err(e) => {
                self.log_debug(format_args!("Download complete but unable to be moved: {}", name));
                tracing::error!("Failed to place {}: {}", url, e);
                self.broadcast(|| DownloadEvent::Failed {
                    url: url.clone(),
                    reason: e.to_string(),
                });
                self.complete(&record, Err(DownloadError::Move(e)));
                self.forget(&url);
            }
        }
    }

    /// Retry `record` after backoff if it has retries left
    fn reschedule(&self, record: &DownloadRecord, resume_token: Option<ResumeToken>) -> bool {
        let config = self.config();
        let url = record.remote_url.clone();

        if record.retry_count >= config.max_retries {
            self.broadcast(|| DownloadEvent::Failed {
                url: url.clone(),
                reason: format!("gave up after {} retries", record.retry_count),
            });
            return false;
        }

        let mut updated = record.clone();
        updated.retry_count += 1;
        let attempt = updated.retry_count;
        let delay = config.backoff_delay(attempt);

        let (persisted, _) = self.store.upsert_then(updated, || {
            self.executor
                .start(TransferRequest::delayed(url.clone(), resume_token, delay))
        });
        if let Err(e) = persisted {
            tracing::warn!("Failed to persist retry count for {}: {}", url, e);
        }

        let name = record.display_name();
        self.log_debug(format_args!("Rescheduled: {} retrycount: {}", name, attempt));
        tracing::info!("Retrying {} in {}s (attempt {})", url, delay.as_secs(), attempt);
        self.notify(&format!("Rescheduled: {}", name));
        self.broadcast(|| DownloadEvent::Queued {
            url: url.clone(),
            attempt,
            delay,
        });
        true
    }

    /// Report a terminal error and retire the record
    fn fail(&self, record: &DownloadRecord, error: DownloadError) {
        tracing::error!("Download failed: {}: {}", record.remote_url, error);
        self.complete(record, Err(error));
        self.forget(&record.remote_url);
    }

    fn complete(&self, record: &DownloadRecord, result: Result<PathBuf, DownloadError>) {
        if let Some(completion) = record.callbacks.completion.clone() {
            self.callbacks.dispatch(move || completion(result));
        }
    }

    fn forget(&self, url: &Url) {
        if let Err(e) = self.store.remove(url.as_str()) {
            tracing::warn!("Failed to persist removal of {}: {}", url, e);
        }
    }

    fn broadcast(&self, event: impl FnOnce() -> DownloadEvent) {
        if self.config().broadcast_events {
            self.events.emit(event());
        }
    }

    fn notify(&self, default_text: &str) {
        let config = self.config();
        if !config.show_notifications {
            return;
        }
        let text = config.notification_text.as_deref().unwrap_or(default_text);
        if let Err(e) = self.notifier.notify(text) {
            if config.log_verbosity.allows(Level::ERROR) {
                tracing::error!("{}", e);
            } else {
                tracing::trace!("Notification dropped: {}", e);
            }
        }
    }

    fn log_debug(&self, message: fmt::Arguments<'_>) {
        if self.config().log_verbosity.allows(Level::DEBUG) {
            tracing::debug!("{}", message);
        }
    }

    fn log_error(&self, message: fmt::Arguments<'_>) {
        if self.config().log_verbosity.allows(Level::ERROR) {
            tracing::error!("{}", message);
        }
    }
}
