//! HTTP transfer executor
//!
//! Each transfer runs as a tokio task: sleep for the backoff delay, GET the URL
//! (with `Range`/`If-Range` when resuming) and stream the body into a temp file.
//! Resume tokens are JSON documents describing the partial file; only this
//! executor reads them.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::header::{
    HeaderMap, HeaderName, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, ETAG, IF_RANGE, LAST_MODIFIED,
    RANGE,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use super::executor::{
    ReportSender, TaskHandle, TransferError, TransferExecutor, TransferOutcome, TransferReport,
    TransferRequest,
};
use super::http_errors::HttpErrorInfo;
use super::record::ResumeToken;
use crate::app::config::HttpConfig;
use crate::file::metadata::apply_last_modified;
use crate::file::naming::filename_from_content_disposition;

// Progress update thresholds
const MIN_PROGRESS_BYTES: u64 = 1024 * 1024; // 1 MB
const MIN_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Partial-file state carried inside a [`ResumeToken`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ResumeState {
    partial_path: PathBuf,
    offset: u64,
    etag: Option<String>,
}

impl ResumeState {
    fn into_token(self) -> Option<ResumeToken> {
        serde_json::to_vec(&self).ok().map(ResumeToken::new)
    }

    fn from_token(token: &ResumeToken) -> Option<Self> {
        match serde_json::from_slice(token.as_bytes()) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Ignoring unreadable resume token: {}", e);
                None
            }
        }
    }
}

/// Response headers the executor cares about
#[derive(Debug, Clone, Default)]
struct ParsedHeaders {
    size: Option<u64>,
    resume_supported: bool,
    etag: Option<String>,
    last_modified: Option<String>,
    filename: Option<String>,
}

fn parse_response_headers(headers: &HeaderMap) -> ParsedHeaders {
    let text = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

    ParsedHeaders {
        size: text(CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok()),
        resume_supported: text(ACCEPT_RANGES).map(|v| v == "bytes").unwrap_or(false),
        etag: text(ETAG).map(str::to_string),
        last_modified: text(LAST_MODIFIED).map(str::to_string),
        filename: text(CONTENT_DISPOSITION).and_then(filename_from_content_disposition),
    }
}

struct Outstanding {
    handle: TaskHandle,
    join: JoinHandle<()>,
}

type TaskMap = Arc<Mutex<HashMap<Uuid, Outstanding>>>;

fn lock_tasks(tasks: &TaskMap) -> MutexGuard<'_, HashMap<Uuid, Outstanding>> {
    tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything a transfer task needs, cheap to clone into each task
#[derive(Clone)]
struct TransferContext {
    client: reqwest::Client,
    temp_dir: PathBuf,
    reports: ReportSender,
}

/// [`TransferExecutor`] backed by reqwest
pub struct HttpExecutor {
    context: TransferContext,
    runtime: Handle,
    tasks: TaskMap,
}

impl HttpExecutor {
    /// Create an executor on the current tokio runtime.
    ///
    /// Reports go to `reports`; in-flight bodies are written under `temp_dir`.
    pub fn new(config: &HttpConfig, temp_dir: impl Into<PathBuf>, reports: ReportSender) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to build HTTP client")?;

        let runtime = Handle::try_current()
            .context("HttpExecutor must be created inside a tokio runtime")?;

        Ok(Self {
            context: TransferContext {
                client,
                temp_dir: temp_dir.into(),
                reports,
            },
            runtime,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

impl TransferExecutor for HttpExecutor {
    fn start(&self, request: TransferRequest) -> TaskHandle {
        let handle = TaskHandle::new(request.url.clone());
        let id = handle.id;
        let context = self.context.clone();
        let tasks = self.tasks.clone();

        // Hold the map while spawning so the task cannot finish before it is listed
        let mut guard = lock_tasks(&self.tasks);
        let join = self.runtime.spawn(async move {
            if !request.delay.is_zero() {
                tracing::trace!("Delaying {} by {:?}", request.url, request.delay);
                tokio::time::sleep(request.delay).await;
            }

            let resume = request.resume_token.as_ref().and_then(ResumeState::from_token);
            let outcome = run_transfer(&context, &request.url, resume).await;

            // Leave the outstanding set and report in one step
            let mut outstanding = lock_tasks(&tasks);
            outstanding.remove(&id);
            let _ = context.reports.send(TransferReport::Finished {
                url: request.url,
                outcome,
            });
        });
        guard.insert(
            id,
            Outstanding {
                handle: handle.clone(),
                join,
            },
        );

        handle
    }

    fn cancel(&self, handle: &TaskHandle) {
        if let Some(task) = lock_tasks(&self.tasks).remove(&handle.id) {
            task.join.abort();
            tracing::debug!("Cancelled transfer {} ({})", handle.id, handle.url);
        }
    }

    fn outstanding(&self) -> Vec<TaskHandle> {
        lock_tasks(&self.tasks)
            .values()
            .map(|task| task.handle.clone())
            .collect()
    }
}

fn transport(error: TransferError, resume: Option<ResumeState>) -> TransferOutcome {
    TransferOutcome::Transport {
        error,
        resume_token: resume.and_then(ResumeState::into_token),
    }
}

/// Perform one GET attempt and classify the result
async fn run_transfer(
    context: &TransferContext,
    url: &Url,
    resume: Option<ResumeState>,
) -> TransferOutcome {
    let resume = resume.filter(|state| state.partial_path.exists());
    let (temp_path, mut offset, etag) = match resume.clone() {
        Some(state) => (state.partial_path, state.offset, state.etag),
        None => (
            context.temp_dir.join(format!("{}.part", Uuid::new_v4())),
            0,
            None,
        ),
    };

    if let Err(e) = tokio::fs::create_dir_all(&context.temp_dir).await {
        return transport(e.into(), resume);
    }

    tracing::trace!("Starting download: url={}, path={:?}, offset={}", url, temp_path, offset);

    let mut request = context.client.get(url.clone());
    if offset > 0 {
        tracing::trace!("Adding Range header for resume: bytes={}-", offset);
        request = request.header(RANGE, format!("bytes={}-", offset));
        if let Some(etag) = &etag {
            request = request.header(IF_RANGE, etag.as_str());
        }
    }

    let mut response = match request.send().await {
        Ok(response) => response,
        Err(e) => return transport(e.into(), resume),
    };
    tracing::trace!("Received response with status: {}", response.status());

    // Range no longer satisfiable: start over without it
    if response.status().as_u16() == 416 && offset > 0 {
        tracing::warn!("Got 416 Range Not Satisfiable, retrying without Range header");
        offset = 0;
        response = match context.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                remove_partial(&temp_path).await;
                return transport(e.into(), None);
            }
        };
    }

    let status = response.status().as_u16();
    if HttpErrorInfo::is_error_status(status) {
        let info = HttpErrorInfo::from_status(status);
        tracing::debug!("{} ({}) for {}", info.format(), info.category, url);
        remove_partial(&temp_path).await;
        return TransferOutcome::HttpStatus { status };
    }

    // Server ignored the range and sent the whole body
    if offset > 0 && status != 206 {
        tracing::debug!("Server ignored Range for {}, restarting from zero", url);
        offset = 0;
    }

    let parsed = parse_response_headers(response.headers());
    let resume_supported = parsed.resume_supported || status == 206;
    let etag = parsed.etag.clone().or(etag);
    let expected: i64 = parsed
        .size
        .map(|size| (size + offset) as i64)
        .unwrap_or(-1);

    let file = if offset > 0 {
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&temp_path)
            .await
    } else {
        File::create(&temp_path).await
    };
    let file = match file {
        Ok(file) => file,
        Err(e) => return transport(e.into(), None),
    };
    let mut file = BufWriter::with_capacity(64 * 1024, file);

    let mut stream = response.bytes_stream();
    let mut written = offset;
    let mut last_progress_update = Instant::now();
    let mut last_progress_bytes = written;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let flushed = file.flush().await;
                let resume = resume_after_body_error(
                    &flushed,
                    resume_supported,
                    &temp_path,
                    written,
                    etag.clone(),
                );
                if resume.is_none() {
                    remove_partial(&temp_path).await;
                }
                return transport(e.into(), resume);
            }
        };

        if let Err(e) = file.write_all(&chunk).await {
            remove_partial(&temp_path).await;
            return transport(e.into(), None);
        }
        written += chunk.len() as u64;

        let now = Instant::now();
        if written - last_progress_bytes >= MIN_PROGRESS_BYTES
            || now.duration_since(last_progress_update) >= MIN_PROGRESS_INTERVAL
        {
            report_progress(context, url, written, expected);
            last_progress_bytes = written;
            last_progress_update = now;
        }
    }

    if let Err(e) = file.flush().await {
        remove_partial(&temp_path).await;
        return transport(e.into(), None);
    }
    drop(file);

    // Final progress update to ensure 100% is reported
    report_progress(context, url, written, expected);

    if let Err(e) = apply_last_modified(&temp_path, parsed.last_modified.as_deref()) {
        tracing::warn!("Failed to apply Last-Modified to {:?}: {}", temp_path, e);
    }

    tracing::trace!("Transfer finished: {} ({} bytes)", url, written);
    TransferOutcome::from_response(status, temp_path, parsed.filename)
}

/// Resume state for a body that broke off after `written` bytes.
///
/// `written` counts bytes handed to the buffered writer; they are only known to
/// be in the file when the final flush succeeded.
fn resume_after_body_error(
    flushed: &std::io::Result<()>,
    resume_supported: bool,
    temp_path: &Path,
    written: u64,
    etag: Option<String>,
) -> Option<ResumeState> {
    if let Err(e) = flushed {
        tracing::warn!("Failed to flush partial file {:?}: {}", temp_path, e);
        return None;
    }
    (resume_supported && written > 0).then(|| ResumeState {
        partial_path: temp_path.to_path_buf(),
        offset: written,
        etag,
    })
}

fn report_progress(context: &TransferContext, url: &Url, written: u64, expected: i64) {
    let _ = context.reports.send(TransferReport::Progress {
        url: url.clone(),
        bytes_written: written as i64,
        bytes_expected: expected,
        errored: false,
    });
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove partial file {:?}: {}", path, e);
        }
    }
}
