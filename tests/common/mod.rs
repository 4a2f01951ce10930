#![allow(dead_code)]

use dlkeeper::app::config::ManagerConfig;
use dlkeeper::download::executor::{
    report_channel, ReportReceiver, ReportSender, TaskHandle, TransferExecutor, TransferOutcome,
    TransferReport, TransferRequest,
};
use dlkeeper::download::notify::{Notifier, NotifyError};
use dlkeeper::download::{Callbacks, DownloadError, DownloadEvent, DownloadManager, DurableStore};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// Executor that records every request and only finishes when told to
#[derive(Default)]
pub struct RecordingExecutor {
    state: Mutex<RecordingState>,
    reports: Mutex<Option<ReportSender>>,
}

#[derive(Default)]
struct RecordingState {
    requests: Vec<TransferRequest>,
    outstanding: Vec<TaskHandle>,
    cancelled: Vec<TaskHandle>,
}

impl RecordingExecutor {
    pub fn new() -> (Arc<Self>, ReportReceiver) {
        let (tx, rx) = report_channel();
        let executor = Self {
            state: Mutex::default(),
            reports: Mutex::new(Some(tx)),
        };
        (Arc::new(executor), rx)
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn cancelled(&self) -> Vec<TaskHandle> {
        self.state.lock().unwrap().cancelled.clone()
    }

    /// Finish the oldest outstanding transfer for `url` with `outcome`.
    /// The handle is dropped and the report sent under one lock.
    pub fn finish(&self, url: &Url, outcome: TransferOutcome) {
        let mut state = self.state.lock().unwrap();
        let index = state
            .outstanding
            .iter()
            .position(|h| &h.url == url)
            .expect("no outstanding transfer for url");
        state.outstanding.remove(index);
        self.send(TransferReport::Finished {
            url: url.clone(),
            outcome,
        });
    }

    pub fn progress(&self, url: &Url, bytes_written: i64, bytes_expected: i64) {
        self.send(TransferReport::Progress {
            url: url.clone(),
            bytes_written,
            bytes_expected,
            errored: false,
        });
    }

    /// Close the report channel so `process_reports` returns
    pub fn close(&self) {
        self.reports.lock().unwrap().take();
    }

    fn send(&self, report: TransferReport) {
        if let Some(tx) = self.reports.lock().unwrap().as_ref() {
            tx.send(report).unwrap();
        }
    }
}

impl TransferExecutor for RecordingExecutor {
    fn start(&self, request: TransferRequest) -> TaskHandle {
        let handle = TaskHandle::new(request.url.clone());
        let mut state = self.state.lock().unwrap();
        state.requests.push(request);
        state.outstanding.push(handle.clone());
        handle
    }

    fn cancel(&self, handle: &TaskHandle) {
        let mut state = self.state.lock().unwrap();
        state.outstanding.retain(|h| h.id != handle.id);
        state.cancelled.push(handle.clone());
    }

    fn outstanding(&self) -> Vec<TaskHandle> {
        self.state.lock().unwrap().outstanding.clone()
    }
}

/// Notifier that keeps every message
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, text: &str) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Completion results collected from a callback
pub type Completions = Arc<Mutex<Vec<Result<PathBuf, String>>>>;

pub fn recording_callbacks() -> (Callbacks, Completions) {
    let completions: Completions = Arc::default();
    let sink = completions.clone();
    let callbacks = Callbacks {
        progress: None,
        completion: Some(Arc::new(move |result: Result<PathBuf, DownloadError>| {
            sink.lock().unwrap().push(result.map_err(|e| e.to_string()));
        })),
    };
    (callbacks, completions)
}

pub struct Harness {
    pub manager: Arc<DownloadManager>,
    pub executor: Arc<RecordingExecutor>,
    pub reports: Option<ReportReceiver>,
    pub events: broadcast::Receiver<DownloadEvent>,
}

/// Manager over `durable` with a recording executor and events enabled
pub fn harness_with(config: ManagerConfig, durable: Arc<dyn DurableStore>) -> Harness {
    let (executor, reports) = RecordingExecutor::new();
    let config = ManagerConfig {
        broadcast_events: true,
        ..config
    };
    let manager = Arc::new(DownloadManager::new(config, durable, executor.clone()));
    let events = manager.subscribe();
    Harness {
        manager,
        executor,
        reports: Some(reports),
        events,
    }
}

pub fn drain_events(rx: &mut broadcast::Receiver<DownloadEvent>) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Write `content` to a fresh temp file standing in for a finished transfer
pub fn temp_download(dir: &std::path::Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Mock server that serves `content` at `file_path`
pub async fn setup_mock_file_server(file_path: &str, content: Vec<u8>) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(content.clone())
                .append_header("Content-Length", content.len().to_string())
                .append_header("Accept-Ranges", "bytes"),
        )
        .mount(&server)
        .await;

    server
}
