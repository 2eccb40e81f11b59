use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::errors::{AppError, Result};

const ENV_PREFIX: &str = "URL_UPLOADER";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub download_dir: PathBuf,
    pub owner_id: u64,
    pub authorized_users: Vec<u64>,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub proxy: Option<String>,
    pub fetch: FetchConfig,
    pub progress: ProgressConfig,
}

/// Robustness knobs handed to yt-dlp for every download.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FetchConfig {
    pub format: String,
    pub concurrent_fragments: u32,
    pub buffer_size: u32,
    pub http_chunk_size: u64,
    pub retries: u32,
    pub fragment_retries: u32,
    pub file_access_retries: u32,
    pub extractor_retries: u32,
    pub socket_timeout_secs: u64,
    pub no_check_certificate: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProgressConfig {
    pub download_interval_ms: u64,
    pub upload_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("tmpvideos"),
            owner_id: 0,
            authorized_users: Vec::new(),
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            proxy: None,
            fetch: FetchConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            format: "best/bestvideo+bestaudio".to_string(),
            concurrent_fragments: 5,
            buffer_size: 32 * 1024,
            http_chunk_size: 10 * 1024 * 1024,
            retries: 10,
            fragment_retries: 10,
            file_access_retries: 10,
            extractor_retries: 10,
            socket_timeout_secs: 30,
            no_check_certificate: true,
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            download_interval_ms: 1000,
            upload_interval_ms: 2000,
        }
    }
}

impl ProgressConfig {
    pub fn download_interval(&self) -> Duration {
        Duration::from_millis(self.download_interval_ms)
    }

    pub fn upload_interval(&self) -> Duration {
        Duration::from_millis(self.upload_interval_ms)
    }
}

impl AppConfig {
    /// Loads the JSON config file (creating it with defaults when absent) and
    /// layers `URL_UPLOADER_*` environment variables on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::get_config_path()?,
        };

        if !config_path.exists() {
            AppConfig::default().save_to(&config_path)?;
            log::info!("📝 [CONFIG] Wrote default configuration to {:?}", config_path);
        }

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::from(config_path.as_path()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("authorized_users"),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(config_dir) = config_path.parent() {
            if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Could not find config directory".to_string())))?;

        Ok(config_dir.join("url-uploader").join("config.json"))
    }

    /// The owner is always authorized, even when not listed explicitly.
    pub fn authorized_ids(&self) -> Vec<u64> {
        let mut ids = self.authorized_users.clone();
        if self.owner_id != 0 && !ids.contains(&self.owner_id) {
            ids.push(self.owner_id);
        }
        ids
    }
}
