use super::daemon::{self, RunOutcome};
use super::error;
use super::output;
use super::{Commands, ConfigAction};
use crate::app::config::Config;
use crate::download::backing_store::BackingStore;
use crate::download::executor::{report_channel, ReportReceiver};
use crate::download::http_client::HttpExecutor;
use crate::download::manager::DownloadManager;
use crate::download::notify::{ConsoleNotifier, LogNotifier, Notifier};
use crate::download::error::DownloadError;
use crate::download::record::{Callbacks, CompletionCallback, ProgressCallback};
use crate::download::store::JsonFileStore;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

/// Handle a CLI command and return exit code
pub async fn handle_command(command: Commands, config: Config, events: bool) -> i32 {
    let result = match command {
        Commands::Fetch { urls, dest } => handle_fetch(urls, dest, &config, events).await,
        Commands::Resume => handle_resume(&config, events).await,
        Commands::List { json } => handle_list(&config, json),
        Commands::CancelAll => handle_cancel_all(&config),
        Commands::Config { action } => handle_config(action, &config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            error::exit_code_for(&e)
        }
    }
}

/// Build a manager over the configured state file with an HTTP executor
fn open_manager(
    config: &Config,
    events: bool,
) -> anyhow::Result<(Arc<DownloadManager>, ReportReceiver)> {
    let state_path = config.storage.state_path()?;
    tracing::debug!("Using state file {:?}", state_path);

    let (reports_tx, reports_rx) = report_channel();
    let executor = HttpExecutor::new(&config.http, config.storage.temp_path(), reports_tx)?;

    let mut manager_config = config.manager.clone();
    if events {
        manager_config.broadcast_events = true;
    }
    let notifier: Arc<dyn Notifier> = if manager_config.show_notifications {
        Arc::new(ConsoleNotifier::new())
    } else {
        Arc::new(LogNotifier)
    };

    let manager = DownloadManager::new(
        manager_config,
        Arc::new(JsonFileStore::new(state_path)),
        Arc::new(executor),
    )
    .with_notifier(notifier);

    Ok((Arc::new(manager), reports_rx))
}

/// Download URLs until every one has finished or given up
async fn handle_fetch(
    urls: Vec<String>,
    dest: PathBuf,
    config: &Config,
    events: bool,
) -> anyhow::Result<i32> {
    let urls = urls
        .iter()
        .map(|raw| Url::parse(raw).with_context(|| format!("Invalid URL: {}", raw)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let (manager, reports) = open_manager(config, events)?;
    if events {
        daemon::spawn_event_printer(manager.subscribe());
    }

    let resumed = manager.reconcile();
    if resumed > 0 {
        println!("Resuming {} download(s) from a previous run", resumed);
    }

    let failures = Arc::new(AtomicUsize::new(0));
    for url in urls {
        let name = crate::file::naming::filename_from_url(&url);
        let progress_name = name.clone();
        let failed = failures.clone();
        let source = url.clone();

        // With --events the JSON stream already carries progress
        let progress: Option<ProgressCallback> = (!events).then(|| {
            Arc::new(move |fraction: f32| {
                eprintln!("{}", output::format_progress(&progress_name, fraction));
            }) as ProgressCallback
        });
        let completion: CompletionCallback =
            Arc::new(move |result: Result<PathBuf, DownloadError>| match result {
                Ok(path) => println!("Downloaded: {} -> {}", source, path.display()),
                Err(e) => {
                    failed.fetch_add(1, Ordering::SeqCst);
                    eprintln!("Failed: {}: {}", name, e);
                }
            });

        let callbacks = Callbacks {
            progress,
            completion: Some(completion),
        };

        // Already picked up by reconcile: keep its destination, report its result
        if manager.attach_callbacks(&url, callbacks.clone()) {
            println!("Already queued from a previous run: {}", url);
            continue;
        }
        manager.submit(url, dest.clone(), callbacks);
    }

    let outcome = daemon::run_until_quiesced(manager, reports).await?;

    if outcome == RunOutcome::Interrupted {
        println!("Interrupted; run `dlkeeper resume` to continue");
        return Ok(error::ERROR);
    }
    if failures.load(Ordering::SeqCst) > 0 {
        return Ok(error::ERROR);
    }
    Ok(error::SUCCESS)
}

/// Retry downloads persisted by a previous run
async fn handle_resume(config: &Config, events: bool) -> anyhow::Result<i32> {
    let (manager, reports) = open_manager(config, events)?;
    if events {
        daemon::spawn_event_printer(manager.subscribe());
    }

    let resumed = manager.reconcile();
    if resumed == 0 {
        println!("No downloads to resume.");
        return Ok(error::SUCCESS);
    }
    println!("Resuming {} download(s)", resumed);

    match daemon::run_until_quiesced(manager, reports).await? {
        RunOutcome::Quiesced => Ok(error::SUCCESS),
        RunOutcome::Interrupted => Ok(error::ERROR),
    }
}

/// List downloads recorded in the state file
fn handle_list(config: &Config, json: bool) -> anyhow::Result<i32> {
    let store = BackingStore::new(Arc::new(JsonFileStore::new(config.storage.state_path()?)));
    let records = store.all_records();
    println!("{}", output::format_records(&records, json));
    Ok(error::SUCCESS)
}

/// Forget every persisted download
fn handle_cancel_all(config: &Config) -> anyhow::Result<i32> {
    let store = BackingStore::new(Arc::new(JsonFileStore::new(config.storage.state_path()?)));
    let count = store.all_keys().len();
    store.remove_all().context("Failed to clear download state")?;
    println!("Cancelled {} download(s)", count);
    Ok(error::SUCCESS)
}

fn handle_config(action: ConfigAction, config: &Config) -> anyhow::Result<i32> {
    match action {
        ConfigAction::Show { json } => {
            let rendered = if json {
                serde_json::to_string_pretty(config)?
            } else {
                toml::to_string_pretty(config)?
            };
            println!("{}", rendered);
        }
        ConfigAction::Path => {
            println!("{}", crate::util::paths::get_app_config_path()?.display());
        }
    }
    Ok(error::SUCCESS)
}
