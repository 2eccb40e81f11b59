pub mod cipher;
pub mod http_pool;
pub mod manager;
pub mod pipeline;
pub mod progress;
pub mod ytdlp;

use serde::{Deserialize, Serialize};
use crate::errors::Result;
use crate::metadata::VideoMetadata;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::sync::watch;

pub use tokio_util::sync::CancellationToken;

/// Separates the fetchable URL from an appended decryption key.
pub const KEY_DELIMITER: char = '*';

/// Containers recognised when choosing the output extension.
pub const VIDEO_EXTENSIONS: [&str; 7] = ["mkv", "mp4", "avi", "mov", "wmv", "flv", "webm"];

pub const DEFAULT_EXTENSION: &str = ".mkv";

static ENCRYPTED_EXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(mkv|mp4|avi|mov|wmv|flv|webm)(?:\*|$)").expect("static regex")
});

/// A user's `Filename : URL` request. Any `*key` suffix is split off at
/// construction so the key never reaches the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    url: String,
    filename: String,
    decryption_key: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: &str, filename: &str) -> Self {
        let (url, decryption_key) = match url.split_once(KEY_DELIMITER) {
            Some((url, key)) => (url.to_string(), Some(key.to_string())),
            None => (url.to_string(), None),
        };

        Self {
            url,
            filename: filename.to_string(),
            decryption_key,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn decryption_key(&self) -> Option<&str> {
        self.decryption_key.as_deref()
    }

    pub fn is_encrypted(&self) -> bool {
        self.decryption_key.is_some()
    }

    /// Key prefix safe for logs, e.g. `123***`.
    pub fn masked_key(&self) -> Option<String> {
        self.decryption_key
            .as_ref()
            .map(|key| format!("{}***", key.chars().take(3).collect::<String>()))
    }

    /// Output extension, including the leading dot. Unknown sources default
    /// to `.mkv` since nearly everything sent to the bot is video.
    pub fn file_extension(&self) -> String {
        if self.is_encrypted() {
            return ENCRYPTED_EXT_RE
                .captures(&self.url.to_lowercase())
                .and_then(|caps| caps.get(1))
                .map(|m| format!(".{}", m.as_str()))
                .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        }

        let path = match url::Url::parse(&self.url) {
            Ok(parsed) => parsed.path().to_lowercase(),
            Err(_) => self.url.split(['?', '#']).next().unwrap_or_default().to_lowercase(),
        };

        Path::new(&path)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| VIDEO_EXTENSIONS.contains(ext))
            .map(|ext| format!(".{}", ext))
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
    }
}

/// One tick from a transfer. `total_bytes == 0` means the size is unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub speed_bytes_per_sec: Option<f64>,
    pub eta_secs: Option<u64>,
    pub label: String,
}

impl DownloadProgress {
    pub fn new(downloaded: u64, total: u64) -> Self {
        Self {
            downloaded_bytes: downloaded,
            total_bytes: total,
            ..Default::default()
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed_bytes_per_sec = Some(speed);

        if speed > 0.0 && self.total_bytes > self.downloaded_bytes {
            let remaining_bytes = self.total_bytes - self.downloaded_bytes;
            self.eta_secs = Some((remaining_bytes as f64 / speed).ceil() as u64);
        }

        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn percent(&self) -> Option<f64> {
        crate::utils::percent(self.downloaded_bytes, self.total_bytes)
    }
}

/// Producer half of a progress channel. Only the latest tick is kept.
pub type TickSender = watch::Sender<Option<DownloadProgress>>;
pub type TickReceiver = watch::Receiver<Option<DownloadProgress>>;

pub fn tick_channel() -> (TickSender, TickReceiver) {
    watch::channel(None)
}

/// Running totals for a transfer, updated from ticks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferStats {
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub speed: Option<f64>,
    pub eta: Option<u64>,
}

impl TransferStats {
    pub fn record(&mut self, tick: &DownloadProgress) {
        self.bytes_downloaded = tick.downloaded_bytes;
        if tick.total_bytes > 0 {
            self.total_bytes = tick.total_bytes;
        }
        self.speed = tick.speed_bytes_per_sec;
        self.eta = tick.eta_secs;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Fetching,
    Decrypting,
    ProbingMetadata,
    Done,
}

/// State of one in-flight download, owned by the pipeline for its lifetime.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: String,
    pub request: DownloadRequest,
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
    pub thumb_path: PathBuf,
    pub cancel: CancellationToken,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub state: PipelineState,
    pub stats: TransferStats,
}

impl DownloadTask {
    pub fn new(request: DownloadRequest, download_dir: &Path, cancel: CancellationToken) -> Self {
        let ext = request.file_extension();
        let final_path = download_dir.join(format!("{}{}", request.filename(), ext));
        let temp_path = download_dir.join(format!("{}_temp{}", request.filename(), ext));
        let thumb_path = download_dir.join(format!("{}_thumb.jpg", request.filename()));

        Self {
            id: crate::utils::generate_download_id(),
            request,
            temp_path,
            final_path,
            thumb_path,
            cancel,
            started_at: chrono::Utc::now(),
            state: PipelineState::Idle,
            stats: TransferStats::default(),
        }
    }

    /// Every path the task may have created: the final file, the thumbnail
    /// and anything yt-dlp derived from the temp name (`.part`,
    /// `.part-Frag<N>`, `.ytdl`).
    pub async fn artifacts(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.final_path.clone(), self.thumb_path.clone()];
        let (Some(dir), Some(temp_name)) = (self.temp_path.parent(), self.temp_path.file_name()) else {
            paths.push(self.temp_path.clone());
            return paths;
        };
        let temp_name = temp_name.to_string_lossy().into_owned();

        match tokio::fs::read_dir(dir).await {
            Ok(mut entries) => {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    if entry.file_name().to_string_lossy().starts_with(&temp_name) {
                        paths.push(entry.path());
                    }
                }
            }
            Err(e) => {
                log::debug!("📂 [PIPELINE] Cannot list {:?}: {}", dir, e);
                paths.push(self.temp_path.clone());
            }
        }
        paths
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Success {
        path: PathBuf,
        metadata: VideoMetadata,
    },
    Failure {
        reason: String,
    },
    Cancelled,
}

/// Metadata the extractor reports alongside a finished download.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInfo {
    pub title: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedResource {
    pub path: PathBuf,
    pub info: Option<ExtractedInfo>,
}

/// Resource-fetch boundary: URL in, local file plus ticks out.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        ticks: TickSender,
        cancel: CancellationToken,
    ) -> Result<FetchedResource>;

    fn get_name(&self) -> &str;
}
