mod common;

use common::*;
use dlkeeper::app::config::{HttpConfig, ManagerConfig};
use dlkeeper::cli::daemon::{run_until_quiesced, RunOutcome};
use dlkeeper::download::executor::report_channel;
use dlkeeper::download::{DownloadManager, HttpExecutor, JsonFileStore};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Workspace {
    _dir: TempDir,
    dest: std::path::PathBuf,
    state: std::path::PathBuf,
    temp: std::path::PathBuf,
}

fn workspace() -> Workspace {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("downloads");
    std::fs::create_dir_all(&dest).unwrap();
    Workspace {
        dest,
        state: dir.path().join("state.json"),
        temp: dir.path().join("tmp"),
        _dir: dir,
    }
}

fn http_manager(
    ws: &Workspace,
    config: ManagerConfig,
) -> (Arc<DownloadManager>, dlkeeper::download::executor::ReportReceiver) {
    let (tx, rx) = report_channel();
    let executor = HttpExecutor::new(&HttpConfig::default(), &ws.temp, tx).unwrap();
    let manager = DownloadManager::new(
        config,
        Arc::new(JsonFileStore::new(&ws.state)),
        Arc::new(executor),
    );
    (Arc::new(manager), rx)
}

async fn run(manager: Arc<DownloadManager>, rx: dlkeeper::download::executor::ReportReceiver) {
    let outcome = tokio::time::timeout(Duration::from_secs(20), run_until_quiesced(manager, rx))
        .await
        .expect("downloads never quiesced")
        .unwrap();
    assert_eq!(outcome, RunOutcome::Quiesced);
}

#[tokio::test]
async fn test_fetch_single_file_end_to_end() {
    let content = b"zip file contents".to_vec();
    let server = setup_mock_file_server("/archive.zip", content.clone()).await;
    let ws = workspace();
    let (manager, rx) = http_manager(&ws, ManagerConfig::default());
    let (callbacks, completions) = recording_callbacks();

    let source = url(&format!("{}/archive.zip", server.uri()));
    manager.submit(source, &ws.dest, callbacks);
    run(manager.clone(), rx).await;

    let final_path = ws.dest.join("archive.zip");
    assert_eq!(std::fs::read(&final_path).unwrap(), content);
    assert_eq!(*completions.lock().unwrap(), vec![Ok(final_path)]);
    assert!(manager.list_active_downloads().is_empty());
    assert!(std::fs::read_to_string(&ws.state)
        .map(|s| !s.contains("archive.zip"))
        .unwrap_or(true));
}

#[tokio::test]
async fn test_fetch_several_files_waits_for_all() {
    let server = MockServer::start().await;
    for name in ["a.bin", "b.bin", "c.bin"] {
        Mock::given(method("GET"))
            .and(path(format!("/{}", name)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(name.as_bytes().to_vec()))
            .mount(&server)
            .await;
    }

    let ws = workspace();
    let (manager, rx) = http_manager(&ws, ManagerConfig::default());
    for name in ["a.bin", "b.bin", "c.bin"] {
        let (callbacks, _) = recording_callbacks();
        manager.submit(url(&format!("{}/{}", server.uri(), name)), &ws.dest, callbacks);
    }
    run(manager.clone(), rx).await;

    for name in ["a.bin", "b.bin", "c.bin"] {
        assert_eq!(std::fs::read(ws.dest.join(name)).unwrap(), name.as_bytes());
    }
}

#[tokio::test]
async fn test_server_error_then_success_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.txt"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"recovered".to_vec()))
        .mount(&server)
        .await;

    let ws = workspace();
    let config = ManagerConfig {
        backoff_multiplier: 0,
        ..ManagerConfig::default()
    };
    let (manager, rx) = http_manager(&ws, config);
    let (callbacks, completions) = recording_callbacks();
    manager.submit(url(&format!("{}/flaky.txt", server.uri())), &ws.dest, callbacks);
    run(manager.clone(), rx).await;

    assert_eq!(
        std::fs::read(ws.dest.join("flaky.txt")).unwrap(),
        b"recovered"
    );
    assert_eq!(completions.lock().unwrap().len(), 1);
    assert!(completions.lock().unwrap()[0].is_ok());
}

#[tokio::test]
async fn test_not_found_gives_up_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.txt"))
        .respond_with(ResponseTemplate::new(404))
        .expect(3)
        .mount(&server)
        .await;

    let ws = workspace();
    let config = ManagerConfig {
        max_retries: 2,
        backoff_multiplier: 0,
        ..ManagerConfig::default()
    };
    let (manager, rx) = http_manager(&ws, config);
    let (callbacks, completions) = recording_callbacks();
    manager.submit(url(&format!("{}/missing.txt", server.uri())), &ws.dest, callbacks);
    run(manager.clone(), rx).await;

    assert_eq!(
        *completions.lock().unwrap(),
        vec![Err("HTTP 404 - Not Found".to_string())]
    );
    assert!(!ws.dest.join("missing.txt").exists());
}

#[tokio::test]
async fn test_resume_picks_up_persisted_download() {
    let server = setup_mock_file_server("/left-over.iso", b"iso".to_vec()).await;
    let ws = workspace();
    let source = url(&format!("{}/left-over.iso", server.uri()));

    // A previous run persisted the download and then died
    {
        let store = JsonFileStore::new(&ws.state);
        let record = dlkeeper::download::DownloadRecord::new(source.clone(), &ws.dest);
        dlkeeper::download::DurableStore::save_all(
            &store,
            &[(record.key().to_string(), record)].into_iter().collect(),
        )
        .unwrap();
    }

    let config = ManagerConfig {
        backoff_multiplier: 0,
        ..ManagerConfig::default()
    };
    let (manager, rx) = http_manager(&ws, config);
    assert_eq!(manager.reconcile(), 1);
    run(manager.clone(), rx).await;

    assert_eq!(std::fs::read(ws.dest.join("left-over.iso")).unwrap(), b"iso");
    assert!(manager.list_active_downloads().is_empty());
}
