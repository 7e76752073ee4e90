//! vod-sync engine
//!
//! Keeps several recordings of the same event playing in lockstep. A host
//! front-end renders the Twitch/YouTube widgets and talks to this process
//! over JSON lines on stdin/stdout.

mod bridge;
mod config;
mod logging;
mod player;
mod provider;
mod sync;
mod time;
mod widget;

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info};

use config::Config;
use provider::Providers;
use sync::{create_engine_channels, EngineCommand, SyncEngine};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let config_path = config_path_arg(&args)?;

    // Keep the guard alive so buffered log lines are flushed on exit
    let log_targets = logging::LogTargets::from_env()?;
    let _log_guard = logging::init_logging(&log_targets)?;
    info!("vod-sync starting, logging to {:?}", log_targets.dir);

    let config = match &config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.validate().context("Invalid configuration")?;
    info!("Configuration loaded from {:?}", config.config_path()?);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let result = runtime.block_on(run(config));
    if let Err(e) = &result {
        error!("Engine error: {:#}", e);
    }

    info!("Shutdown complete");
    result
}

async fn run(config: Config) -> Result<()> {
    let providers = Providers::new(&config.providers)?;

    // Create engine channels
    let (cmd_tx, cmd_rx, status_tx, status_rx) = create_engine_channels();
    let (widget_tx, widget_rx) = mpsc::unbounded_channel();

    let mut engine = SyncEngine::new(config, providers, cmd_rx, status_tx, widget_tx);

    bridge::spawn_stdin_reader(cmd_tx.clone());
    let writer = bridge::spawn_stdout_writer(widget_rx, status_rx);

    // Set up Ctrl+C handler that sends shutdown command
    let ctrl_c_tx = cmd_tx.clone();
    let handle = tokio::runtime::Handle::current();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let tx = ctrl_c_tx.clone();
        handle.spawn(async move {
            let _ = tx.send(EngineCommand::Shutdown).await;
        });
    })
    .context("Failed to install Ctrl+C handler")?;
    drop(cmd_tx);

    engine.run().await?;

    // Dropping the engine closes the command and status channels, which stops the writer
    drop(engine);
    if let Err(e) = writer.await {
        error!("Host writer task failed: {}", e);
    }
    Ok(())
}

fn config_path_arg(args: &[String]) -> Result<Option<PathBuf>> {
    match args.iter().position(|a| a == "--config" || a == "-c") {
        Some(i) => match args.get(i + 1) {
            Some(path) => Ok(Some(PathBuf::from(path))),
            None => bail!("--config requires a path"),
        },
        None => Ok(None),
    }
}

fn print_help() {
    println!("vod-sync - Synchronized playback of multiple stream recordings");
    println!();
    println!("USAGE:");
    println!("    vod-sync [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help           Print this help message");
    println!("    -c, --config <PATH>  Use this config file instead of the default");
    println!();
    println!("PROTOCOL:");
    println!("    Host messages are read from stdin and engine output is written");
    println!("    to stdout, one JSON object per line.");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG             Set log level (e.g., debug, info, warn)");
    println!("    VOD_SYNC_LOG_PATH    Directory for log files");
    println!("    VOD_SYNC_LOG_STDERR  Also log to stderr (1, true, yes, on)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_path_arg() {
        assert_eq!(config_path_arg(&args(&["vod-sync"])).unwrap(), None);
        assert_eq!(
            config_path_arg(&args(&["vod-sync", "--config", "/tmp/c.toml"])).unwrap(),
            Some(PathBuf::from("/tmp/c.toml"))
        );
        assert!(config_path_arg(&args(&["vod-sync", "-c"])).is_err());
    }
}
