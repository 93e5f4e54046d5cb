//! Engine configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file named by
//! `RESPACK_CONFIG`, then `RESPACK_*` environment variables. Invalid values
//! fall back to the previous layer and everything is clamped to a sane floor,
//! so [`load`] never fails.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `RESPACK_CONFIG` | unset | TOML file with the same keys as [`FileConfig`] |
//! | `RESPACK_READ_ONLY_DIR` | `packs` | Root of the shipped read-only packs |
//! | `RESPACK_READ_WRITE_DIR` | `cache` | Root of the download cache |
//! | `RESPACK_URL_PREFIX` | empty | Remote content root |
//! | `RESPACK_PLATFORM` | host OS | Platform segment of remote URLs |
//! | `RESPACK_GAME_VERSION` | `0.0.0` | Game version segment of remote URLs |
//! | `RESPACK_STEPS_PER_TICK` | 16 | Scheduler step budget per tick |
//! | `RESPACK_MAX_CONCURRENT_DOWNLOADS` | 4 | Downloads in flight per group |
//! | `RESPACK_DOWNLOAD_ATTEMPTS` | 3 | Attempts per pack before failing |
//! | `RESPACK_STALL_TIMEOUT_SECS` | 30 | Abort an attempt after this long without bytes |
//! | `RESPACK_MANIFEST_FLUSH_BYTES` | 10485760 | Bytes downloaded between cache manifest rewrites |
//! | `RESPACK_DOWNLOAD_PRIORITY` | normal | Scheduler priority of update downloads |
//! | `RESPACK_UNLOAD_DELAY_MS` | 1000 | Grace period before an unused pack is unloaded |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::scheduler::Priority;

pub const DEFAULT_STEPS_PER_TICK: usize = 16;
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;
pub const DEFAULT_DOWNLOAD_ATTEMPTS: u32 = 3;
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MANIFEST_FLUSH_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_UNLOAD_DELAY: Duration = Duration::from_millis(1000);

const MIN_FLUSH_BYTES: u64 = 64 * 1024;
const MAX_CONCURRENT_DOWNLOADS: usize = 64;
const MAX_DOWNLOAD_ATTEMPTS: u32 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub read_only_dir: PathBuf,
    pub read_write_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url_prefix: String,
    pub platform: String,
    pub game_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub steps_per_tick: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub stall_timeout: Duration,
    pub manifest_flush_bytes: u64,
    pub priority: Priority,
}

/// Everything an [`Engine`](crate::Engine) needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub scheduler: SchedulerConfig,
    pub download: DownloadConfig,
    pub unload_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                read_only_dir: PathBuf::from("packs"),
                read_write_dir: PathBuf::from("cache"),
            },
            remote: RemoteConfig {
                url_prefix: String::new(),
                platform: std::env::consts::OS.to_string(),
                game_version: "0.0.0".to_string(),
            },
            scheduler: SchedulerConfig {
                steps_per_tick: DEFAULT_STEPS_PER_TICK,
            },
            download: DownloadConfig {
                max_concurrent: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
                max_attempts: DEFAULT_DOWNLOAD_ATTEMPTS,
                stall_timeout: DEFAULT_STALL_TIMEOUT,
                manifest_flush_bytes: DEFAULT_MANIFEST_FLUSH_BYTES,
                priority: Priority::Normal,
            },
            unload_delay: DEFAULT_UNLOAD_DELAY,
        }
    }
}

impl EngineConfig {
    /// Config rooted at the given directories, everything else default.
    pub fn with_roots(read_only: impl Into<PathBuf>, read_write: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.read_only_dir = read_only.into();
        config.storage.read_write_dir = read_write.into();
        config
    }

    /// Enforce floors and ceilings on every numeric knob.
    pub fn clamped(mut self) -> Self {
        self.scheduler.steps_per_tick = self.scheduler.steps_per_tick.max(1);
        self.download.max_concurrent = self
            .download
            .max_concurrent
            .clamp(1, MAX_CONCURRENT_DOWNLOADS);
        self.download.max_attempts = self.download.max_attempts.clamp(1, MAX_DOWNLOAD_ATTEMPTS);
        self.download.stall_timeout = self.download.stall_timeout.max(Duration::from_secs(1));
        self.download.manifest_flush_bytes = self.download.manifest_flush_bytes.max(MIN_FLUSH_BYTES);
        self
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            read_only_dir: self.storage.read_only_dir.display().to_string(),
            read_write_dir: self.storage.read_write_dir.display().to_string(),
            url_prefix: self.remote.url_prefix.clone(),
            platform: self.remote.platform.clone(),
            game_version: self.remote.game_version.clone(),
            steps_per_tick: self.scheduler.steps_per_tick,
            max_concurrent_downloads: self.download.max_concurrent,
            download_attempts: self.download.max_attempts,
            stall_timeout_secs: self.download.stall_timeout.as_secs(),
            manifest_flush_bytes: self.download.manifest_flush_bytes,
            download_priority: self.download.priority.to_string(),
            unload_delay_ms: self.unload_delay.as_millis() as u64,
        }
    }
}

/// Flat summary printed by `respack-cli config show`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub read_only_dir: String,
    pub read_write_dir: String,
    pub url_prefix: String,
    pub platform: String,
    pub game_version: String,
    pub steps_per_tick: usize,
    pub max_concurrent_downloads: usize,
    pub download_attempts: u32,
    pub stall_timeout_secs: u64,
    pub manifest_flush_bytes: u64,
    pub download_priority: String,
    pub unload_delay_ms: u64,
}

impl EffectiveConfig {
    /// `(ENV_VAR, value)` pairs in documentation order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("RESPACK_READ_ONLY_DIR", self.read_only_dir.clone()),
            ("RESPACK_READ_WRITE_DIR", self.read_write_dir.clone()),
            ("RESPACK_URL_PREFIX", self.url_prefix.clone()),
            ("RESPACK_PLATFORM", self.platform.clone()),
            ("RESPACK_GAME_VERSION", self.game_version.clone()),
            ("RESPACK_STEPS_PER_TICK", self.steps_per_tick.to_string()),
            (
                "RESPACK_MAX_CONCURRENT_DOWNLOADS",
                self.max_concurrent_downloads.to_string(),
            ),
            ("RESPACK_DOWNLOAD_ATTEMPTS", self.download_attempts.to_string()),
            ("RESPACK_STALL_TIMEOUT_SECS", self.stall_timeout_secs.to_string()),
            ("RESPACK_MANIFEST_FLUSH_BYTES", self.manifest_flush_bytes.to_string()),
            ("RESPACK_DOWNLOAD_PRIORITY", self.download_priority.clone()),
            ("RESPACK_UNLOAD_DELAY_MS", self.unload_delay_ms.to_string()),
        ]
    }
}

/// Shape of the optional TOML file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub read_only_dir: Option<PathBuf>,
    pub read_write_dir: Option<PathBuf>,
    pub url_prefix: Option<String>,
    pub platform: Option<String>,
    pub game_version: Option<String>,
    pub steps_per_tick: Option<usize>,
    pub max_concurrent_downloads: Option<usize>,
    pub download_attempts: Option<u32>,
    pub stall_timeout_secs: Option<u64>,
    pub manifest_flush_bytes: Option<u64>,
    pub download_priority: Option<Priority>,
    pub unload_delay_ms: Option<u64>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    fn apply(self, config: &mut EngineConfig) {
        if let Some(v) = self.read_only_dir {
            config.storage.read_only_dir = v;
        }
        if let Some(v) = self.read_write_dir {
            config.storage.read_write_dir = v;
        }
        if let Some(v) = self.url_prefix {
            config.remote.url_prefix = v;
        }
        if let Some(v) = self.platform {
            config.remote.platform = v;
        }
        if let Some(v) = self.game_version {
            config.remote.game_version = v;
        }
        if let Some(v) = self.steps_per_tick {
            config.scheduler.steps_per_tick = v;
        }
        if let Some(v) = self.max_concurrent_downloads {
            config.download.max_concurrent = v;
        }
        if let Some(v) = self.download_attempts {
            config.download.max_attempts = v;
        }
        if let Some(v) = self.stall_timeout_secs {
            config.download.stall_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.manifest_flush_bytes {
            config.download.manifest_flush_bytes = v;
        }
        if let Some(v) = self.download_priority {
            config.download.priority = v;
        }
        if let Some(v) = self.unload_delay_ms {
            config.unload_delay = Duration::from_millis(v);
        }
    }
}

/// Parse an env var, returning `current` on missing or invalid.
fn parse_env<T: std::str::FromStr>(key: &str, current: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(current),
        Err(_) => current,
    }
}

fn string_env(key: &str, current: String) -> String {
    std::env::var(key).unwrap_or(current)
}

fn apply_env(config: &mut EngineConfig) {
    if let Some(dir) = std::env::var_os("RESPACK_READ_ONLY_DIR") {
        config.storage.read_only_dir = PathBuf::from(dir);
    }
    if let Some(dir) = std::env::var_os("RESPACK_READ_WRITE_DIR") {
        config.storage.read_write_dir = PathBuf::from(dir);
    }
    let remote = &mut config.remote;
    remote.url_prefix = string_env("RESPACK_URL_PREFIX", std::mem::take(&mut remote.url_prefix));
    remote.platform = string_env("RESPACK_PLATFORM", std::mem::take(&mut remote.platform));
    remote.game_version = string_env(
        "RESPACK_GAME_VERSION",
        std::mem::take(&mut remote.game_version),
    );

    config.scheduler.steps_per_tick =
        parse_env("RESPACK_STEPS_PER_TICK", config.scheduler.steps_per_tick);

    let download = &mut config.download;
    download.max_concurrent = parse_env("RESPACK_MAX_CONCURRENT_DOWNLOADS", download.max_concurrent);
    download.max_attempts = parse_env("RESPACK_DOWNLOAD_ATTEMPTS", download.max_attempts);
    download.stall_timeout = Duration::from_secs(parse_env(
        "RESPACK_STALL_TIMEOUT_SECS",
        download.stall_timeout.as_secs(),
    ));
    download.manifest_flush_bytes =
        parse_env("RESPACK_MANIFEST_FLUSH_BYTES", download.manifest_flush_bytes);
    download.priority = parse_env("RESPACK_DOWNLOAD_PRIORITY", download.priority);

    config.unload_delay = Duration::from_millis(parse_env(
        "RESPACK_UNLOAD_DELAY_MS",
        config.unload_delay.as_millis() as u64,
    ));
}

/// Load configuration. A broken config file is logged and skipped.
pub fn load() -> EngineConfig {
    match try_load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "ignoring config file");
            let mut config = EngineConfig::default();
            apply_env(&mut config);
            config.clamped()
        }
    }
}

/// Like [`load`] but reports a broken config file.
pub fn try_load() -> Result<EngineConfig, ConfigError> {
    let mut config = EngineConfig::default();
    if let Some(path) = std::env::var_os("RESPACK_CONFIG") {
        FileConfig::from_path(Path::new(&path))?.apply(&mut config);
    }
    apply_env(&mut config);
    Ok(config.clamped())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_raises_floors() {
        let mut config = EngineConfig::default();
        config.scheduler.steps_per_tick = 0;
        config.download.max_concurrent = 0;
        config.download.max_attempts = 0;
        config.download.stall_timeout = Duration::ZERO;
        config.download.manifest_flush_bytes = 1;
        let config = config.clamped();
        assert_eq!(config.scheduler.steps_per_tick, 1);
        assert_eq!(config.download.max_concurrent, 1);
        assert_eq!(config.download.max_attempts, 1);
        assert_eq!(config.download.stall_timeout, Duration::from_secs(1));
        assert_eq!(config.download.manifest_flush_bytes, MIN_FLUSH_BYTES);
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let file = FileConfig::from_toml(
            "url_prefix = \"https://cdn.example.com/packs\"\n\
             download_priority = \"high\"\n\
             stall_timeout_secs = 5\n",
        )
        .unwrap();
        let mut config = EngineConfig::default();
        file.apply(&mut config);
        assert_eq!(config.remote.url_prefix, "https://cdn.example.com/packs");
        assert_eq!(config.download.priority, Priority::High);
        assert_eq!(config.download.stall_timeout, Duration::from_secs(5));
        assert_eq!(config.download.max_attempts, DEFAULT_DOWNLOAD_ATTEMPTS);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(FileConfig::from_toml("max_context = 4").is_err());
    }
}
