//! Configuration management for vod-sync

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::player::Tuning;
use crate::time::Millis;
use crate::widget::{WidgetSettings, WidgetSource};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Synchronization timing
    #[serde(default)]
    pub engine: EngineConfig,

    /// Widget adapter tuning
    #[serde(default)]
    pub widgets: WidgetConfig,

    /// Metadata provider credentials
    #[serde(default)]
    pub providers: ProviderConfig,

    /// Videos to load on startup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<SlotConfig>,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval of the engine tick (ms)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Widgets are never parked closer than this to their end (ms)
    #[serde(default = "default_end_guard")]
    pub end_guard_ms: Millis,

    /// Offset used instead of an exact zero seek (ms)
    #[serde(default = "default_seek_epsilon")]
    pub seek_epsilon_ms: Millis,

    /// Reference timestamp players are aligned to in async mode
    #[serde(default = "default_async_align")]
    pub async_align_ms: i64,

    /// Step of the arrow-key seeks (ms)
    #[serde(default = "default_nudge")]
    pub nudge_ms: Millis,

    /// Number of slots the host can display
    #[serde(default = "default_max_players")]
    pub max_players: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetConfig {
    /// Position jump treated as a seek by polling adapters (ms)
    #[serde(default = "default_seek_detect_threshold")]
    pub seek_detect_threshold_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub twitch_client_id: Option<String>,
    pub twitch_token: Option<String>,
    pub youtube_api_key: Option<String>,
    pub youtube_token: Option<String>,

    /// Timeout for metadata requests (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// A video to restore into a slot at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub slot: usize,
    pub source: WidgetSource,
    /// Video id or URL
    pub video: String,
    #[serde(default)]
    pub offset_ms: Millis,
}

// Default value functions
fn default_tick_interval() -> u64 {
    100
}

fn default_end_guard() -> Millis {
    5_000
}

fn default_seek_epsilon() -> Millis {
    1
}

fn default_async_align() -> i64 {
    1_500_000_000_000
}

fn default_nudge() -> Millis {
    10_000
}

fn default_max_players() -> usize {
    6
}

fn default_seek_detect_threshold() -> u64 {
    1_000
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            end_guard_ms: default_end_guard(),
            seek_epsilon_ms: default_seek_epsilon(),
            async_align_ms: default_async_align(),
            nudge_ms: default_nudge(),
            max_players: default_max_players(),
        }
    }
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            seek_detect_threshold_ms: default_seek_detect_threshold(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            twitch_client_id: None,
            twitch_token: None,
            youtube_api_key: None,
            youtube_token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let mut config = Config::default();
            config.config_path = Some(config_path);
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "vod-sync", "engine")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.tick_interval_ms == 0 {
            bail!("engine.tick_interval_ms must be positive");
        }
        if engine.end_guard_ms < 0 {
            bail!("engine.end_guard_ms must not be negative");
        }
        if engine.seek_epsilon_ms < 0 {
            bail!("engine.seek_epsilon_ms must not be negative");
        }
        if engine.max_players == 0 {
            bail!("engine.max_players must be at least 1");
        }
        if let Some(slot) = self.slots.iter().find(|s| s.slot >= engine.max_players) {
            bail!(
                "slot {} is out of range, engine.max_players is {}",
                slot.slot,
                engine.max_players
            );
        }
        Ok(())
    }

    pub fn tuning(&self) -> Tuning {
        Tuning {
            end_guard_ms: self.engine.end_guard_ms,
            seek_epsilon_ms: self.engine.seek_epsilon_ms,
            async_align: self.engine.async_align_ms,
        }
    }

    pub fn widget_settings(&self) -> WidgetSettings {
        WidgetSettings {
            seek_detect_threshold_secs: self.widgets.seek_detect_threshold_ms as f64 / 1000.0,
        }
    }
}
