//! Logging setup
//!
//! Stdout carries the host protocol, so log output only ever goes to the
//! rolling file and, when asked for, to stderr.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_BASENAME: &str = "vod-sync.log";
const LOG_DIR_ENV: &str = "VOD_SYNC_LOG_PATH";
const LOG_STDERR_ENV: &str = "VOD_SYNC_LOG_STDERR";
const LOG_RETENTION_DAYS: u64 = 7;

/// HTTP client internals are noisy at info
const DEFAULT_DIRECTIVES: &str = "info,reqwest=warn,hyper=warn,hyper_util=warn";

/// Where log lines are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTargets {
    pub dir: PathBuf,
    /// Mirror to stderr, for running the engine by hand next to a host
    pub stderr: bool,
}

impl LogTargets {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            dir: resolve_log_dir()?,
            stderr: std::env::var(LOG_STDERR_ENV)
                .map(|v| is_enabled(&v))
                .unwrap_or(false),
        })
    }
}

fn is_enabled(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the subscriber. The returned guard flushes the file writer on drop.
pub fn init_logging(targets: &LogTargets) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&targets.dir)
        .with_context(|| format!("Failed to create log directory: {:?}", targets.dir))?;

    prune_old_logs(
        &targets.dir,
        Duration::from_secs(60 * 60 * 24 * LOG_RETENTION_DAYS),
    );

    let file_appender = tracing_appender::rolling::daily(&targets.dir, LOG_FILE_BASENAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let stderr_layer = targets.stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(default_filter())
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(guard)
}

fn resolve_log_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }

    let dirs = ProjectDirs::from("dev", "vod-sync", "engine")
        .context("Failed to determine project directories for log path")?;

    // state_dir is Linux only
    Ok(if cfg!(target_os = "windows") {
        dirs.data_local_dir().join("Logs")
    } else {
        dirs.state_dir().unwrap_or_else(|| dirs.data_local_dir()).join("logs")
    })
}

/// Remove our rotated files older than `max_age`, leaving anything else in the directory alone
fn prune_old_logs(log_dir: &Path, max_age: Duration) {
    let (Ok(entries), Some(cutoff)) = (std::fs::read_dir(log_dir), SystemTime::now().checked_sub(max_age)) else {
        return;
    };

    let stale = entries.flatten().filter(|entry| {
        let ours = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(LOG_FILE_BASENAME));
        ours && entry
            .metadata()
            .is_ok_and(|m| m.is_file() && m.modified().is_ok_and(|t| t < cutoff))
    });

    for entry in stale {
        if let Err(e) = std::fs::remove_file(entry.path()) {
            eprintln!("Failed to remove old log {:?}: {}", entry.path(), e);
        }
    }
}
