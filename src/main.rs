use clap::Parser;
use dlkeeper::{
    app::config::Config,
    cli::{self, Cli},
};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Config directory override must be in place before anything resolves paths
    if let Some(ref config_dir) = cli.config {
        dlkeeper::util::paths::set_config_dir_override(Some(config_dir.clone()));
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load configuration: {:#}", e);
            std::process::exit(cli::error::ERROR);
        }
    };

    // Get logs directory (creates if needed)
    let logs_dir = dlkeeper::util::paths::get_logs_dir().unwrap_or_else(|_| PathBuf::from("."));
    std::fs::create_dir_all(&logs_dir).ok();

    // Daily rotating JSON log file
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "app.jsonl");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_level = if cli.verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let console_level = if cli.verbose {
        LevelFilter::TRACE
    } else {
        config.manager.log_verbosity.level_filter()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(file_level),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_level),
        )
        .init();

    tracing::info!("Starting dlkeeper {}", env!("CARGO_PKG_VERSION"));
    if cli.verbose {
        tracing::info!("Verbose logging enabled (TRACE level)");
    }
    tracing::trace!("CLI arguments: {:?}", cli);
    tracing::debug!("Config loaded: {:?}", config);

    let exit_code = cli::handler::handle_command(cli.command, config, cli.events).await;

    // Flush buffered log lines before exiting
    drop(guard);
    std::process::exit(exit_code);
}
