//! Configuration file handling for platen.
//!
//! Configuration is loaded once at process start from `platen.toml`, with
//! environment variables carrying the `PLATEN_` prefix overriding file
//! values. A missing file yields the defaults.
//!
//! # Example
//!
//! ```
//! use platen_config::{Config, load_config};
//! use std::path::Path;
//!
//! let config = load_config(Path::new(".")).expect("load config");
//! assert_eq!(config.typst.max_concurrent, 20);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default configuration file name.
pub const CONFIG_FILE: &str = "platen.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "PLATEN_";

/// Get the config file path for a directory.
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Complete platen configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Typesetter invocation and admission settings.
    #[serde(default)]
    pub typst: TypstConfig,
    /// Scheduled-publish worker settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Render pipeline settings.
    #[serde(default)]
    pub renderer: RendererConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-render typesetter deadline.
    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.typst.timeout_seconds)
    }

    /// Admission acquisition deadline; defaults to the render timeout.
    pub fn admission_timeout(&self) -> Duration {
        match self.renderer.admission_timeout_seconds {
            Some(secs) => Duration::from_secs(secs),
            None => self.render_timeout(),
        }
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.scheduler.shutdown_grace_seconds)
    }

    pub fn image_download_timeout(&self) -> Duration {
        Duration::from_secs(self.renderer.image_download_timeout_seconds)
    }

    pub fn image_cache_max_age(&self) -> Duration {
        Duration::from_secs(self.renderer.image_cache_max_age_seconds)
    }
}

/// Typesetter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypstConfig {
    /// Typesetter binary; resolved via `PATH` when not absolute.
    #[serde(default = "default_bin_path")]
    pub bin_path: String,
    /// Per-render compile deadline in seconds.
    #[serde(default = "default_typst_timeout")]
    pub timeout_seconds: u64,
    /// Render admission capacity.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Extra font directories passed to the typesetter.
    #[serde(default)]
    pub font_dirs: Vec<PathBuf>,
    /// Disk cache directory for downloaded images.
    #[serde(default = "default_image_cache_dir")]
    pub image_cache_dir: PathBuf,
    /// When set, exported as `SOURCE_DATE_EPOCH` for reproducible PDFs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_date_epoch: Option<i64>,
}

fn default_bin_path() -> String {
    "typst".to_string()
}
fn default_typst_timeout() -> u64 {
    60
}
fn default_max_concurrent() -> usize {
    20
}
fn default_image_cache_dir() -> PathBuf {
    PathBuf::from(".platen/image-cache")
}

impl Default for TypstConfig {
    fn default() -> Self {
        Self {
            bin_path: default_bin_path(),
            timeout_seconds: default_typst_timeout(),
            max_concurrent: default_max_concurrent(),
            font_dirs: Vec::new(),
            image_cache_dir: default_image_cache_dir(),
            source_date_epoch: None,
        }
    }
}

/// Scheduled-publish worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick interval in seconds.
    #[serde(default = "default_scheduler_interval")]
    pub interval_seconds: u64,
    /// How long shutdown waits for an in-flight tick to drain.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

fn default_scheduler_interval() -> u64 {
    30
}
fn default_shutdown_grace() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_scheduler_interval(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

/// Render pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Per-image download deadline in seconds.
    #[serde(default = "default_image_download_timeout")]
    pub image_download_timeout_seconds: u64,
    /// Image cache entry lifetime in seconds.
    #[serde(default = "default_image_cache_max_age")]
    pub image_cache_max_age_seconds: u64,
    /// Admission acquisition deadline in seconds; `None` means "same as the
    /// render timeout".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_timeout_seconds: Option<u64>,
}

fn default_image_download_timeout() -> u64 {
    15
}
fn default_image_cache_max_age() -> u64 {
    86_400
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            image_download_timeout_seconds: default_image_download_timeout(),
            image_cache_max_age_seconds: default_image_cache_max_age(),
            admission_timeout_seconds: None,
        }
    }
}

/// Load configuration from a directory, applying environment overrides.
pub fn load_config(dir: &Path) -> Result<Config> {
    let mut config = load_config_file(&config_path(dir))?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load a configuration file without environment overrides. A missing file
/// yields the defaults.
pub fn load_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Apply `PLATEN_`-prefixed environment variables on top of `config`.
///
/// Recognized variables mirror the file keys, e.g.
/// `PLATEN_TYPST_BIN_PATH`, `PLATEN_TYPST_MAX_CONCURRENT`,
/// `PLATEN_SCHEDULER_INTERVAL_SECONDS`. `PLATEN_TYPST_FONT_DIRS` is a
/// `:`-separated list. Unparseable values are ignored.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(v) = env_var("TYPST_BIN_PATH") {
        config.typst.bin_path = v;
    }
    if let Some(v) = env_parse::<u64>("TYPST_TIMEOUT_SECONDS") {
        config.typst.timeout_seconds = v;
    }
    if let Some(v) = env_parse::<usize>("TYPST_MAX_CONCURRENT") {
        config.typst.max_concurrent = v;
    }
    if let Some(v) = env_var("TYPST_FONT_DIRS") {
        config.typst.font_dirs = v
            .split(':')
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
    }
    if let Some(v) = env_var("TYPST_IMAGE_CACHE_DIR") {
        config.typst.image_cache_dir = PathBuf::from(v);
    }
    if let Some(v) = env_parse::<i64>("TYPST_SOURCE_DATE_EPOCH") {
        config.typst.source_date_epoch = Some(v);
    }
    if let Some(v) = env_parse::<u64>("SCHEDULER_INTERVAL_SECONDS") {
        config.scheduler.interval_seconds = v;
    }
    if let Some(v) = env_parse::<u64>("SCHEDULER_SHUTDOWN_GRACE_SECONDS") {
        config.scheduler.shutdown_grace_seconds = v;
    }
    if let Some(v) = env_parse::<u64>("RENDERER_IMAGE_DOWNLOAD_TIMEOUT_SECONDS") {
        config.renderer.image_download_timeout_seconds = v;
    }
    if let Some(v) = env_parse::<u64>("RENDERER_IMAGE_CACHE_MAX_AGE_SECONDS") {
        config.renderer.image_cache_max_age_seconds = v;
    }
    if let Some(v) = env_parse::<u64>("RENDERER_ADMISSION_TIMEOUT_SECONDS") {
        config.renderer.admission_timeout_seconds = Some(v);
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}")).ok()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key)?.trim().parse().ok()
}
