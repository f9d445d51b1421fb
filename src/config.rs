use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::error::{AppError, Result};
use crate::models::Board;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_files_dir")]
    pub files_dir: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_boards")]
    pub boards: Vec<String>,

    /// Target length of one poll cycle, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Pause used instead when a cycle overruns `poll_interval_secs`.
    #[serde(default = "default_poll_fallback")]
    pub poll_fallback_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Pause before each per-thread post request.
    #[serde(default)]
    pub request_delay_ms: u64,

    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,

    #[serde(default = "default_download_workers")]
    pub download_workers: usize,

    #[serde(default = "default_true")]
    pub download_files: bool,

    /// Remote attachment type code to download (6 is webm on 2ch).
    #[serde(default = "default_download_type")]
    pub download_type: i64,

    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn data_dir() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("board-archiver");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir
}

fn default_db_path() -> String {
    data_dir().join("archive.db").to_string_lossy().to_string()
}

fn default_files_dir() -> String {
    data_dir().join("files").to_string_lossy().to_string()
}

fn default_api_base_url() -> String {
    "https://2ch.hk".to_string()
}

fn default_boards() -> Vec<String> {
    vec!["b".to_string()]
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_poll_fallback() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_fetch_workers() -> usize {
    5
}

fn default_download_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_download_type() -> i64 {
    6
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            files_dir: default_files_dir(),
            api_base_url: default_api_base_url(),
            boards: default_boards(),
            poll_interval_secs: default_poll_interval(),
            poll_fallback_secs: default_poll_fallback(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            request_delay_ms: 0,
            fetch_workers: default_fetch_workers(),
            download_workers: default_download_workers(),
            download_files: true,
            download_type: default_download_type(),
            http_proxy: None,
            https_proxy: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Loads the config file, writing one with defaults on first run.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("board-archiver")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.boards.is_empty() {
            return Err(AppError::Config("at least one board is required".into()));
        }
        self.boards()?;
        self.base_url()?;
        if self.fetch_workers == 0 || self.download_workers == 0 {
            return Err(AppError::Config("worker counts must be at least 1".into()));
        }
        if self.poll_interval_secs == 0 || self.poll_fallback_secs == 0 {
            return Err(AppError::Config("poll intervals must be positive".into()));
        }
        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(AppError::Config(
                "request_timeout_secs and connect_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn boards(&self) -> Result<Vec<Board>> {
        self.boards.iter().map(Board::new).collect()
    }

    /// API root, always ending in `/` so board paths join beneath it.
    pub fn base_url(&self) -> Result<Url> {
        let mut raw = self.api_base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| AppError::Config(format!("invalid api_base_url: {}", e)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_fallback(&self) -> Duration {
        Duration::from_secs(self.poll_fallback_secs)
    }
}
