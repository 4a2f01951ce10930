use crate::download::events::DownloadEvent;
use crate::download::executor::ReportReceiver;
use crate::download::manager::DownloadManager;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

/// How a foreground run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every transfer finished
    Quiesced,
    /// Stopped by Ctrl+C; remaining downloads stay persisted
    Interrupted,
}

/// Pump executor reports until every transfer has finished or Ctrl+C.
pub async fn run_until_quiesced(
    manager: Arc<DownloadManager>,
    reports: ReportReceiver,
) -> Result<RunOutcome> {
    if manager.list_active_downloads().is_empty() {
        tracing::info!("Nothing to download");
        return Ok(RunOutcome::Quiesced);
    }

    let (done_tx, done_rx) = oneshot::channel();
    manager.set_background_completion_handler(move || {
        let _ = done_tx.send(());
    });

    let pump = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.process_reports(reports).await })
    };

    tracing::info!("Waiting for downloads (Ctrl+C to stop)");
    let outcome = tokio::select! {
        _ = done_rx => RunOutcome::Quiesced,
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => tracing::info!("Received Ctrl+C, shutting down..."),
                Err(e) => tracing::error!("Error waiting for Ctrl+C: {}", e),
            }
            RunOutcome::Interrupted
        }
    };

    pump.abort();
    manager.flush_callbacks();
    tracing::info!("Stopped: {:?}", outcome);
    Ok(outcome)
}

/// Print each event as a JSON line until the bus closes
pub fn spawn_event_printer(mut events: broadcast::Receiver<DownloadEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", super::output::format_event(&event)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event printer skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
