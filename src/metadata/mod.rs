pub mod probe;
pub mod thumbnail;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::downloader::ExtractedInfo;

pub use probe::FfmpegProbe;

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_DURATION_SECS: u64 = 60;

/// Media facts handed to the uploader. Zero means "not known yet" until
/// [`VideoMetadata::fill_defaults`] runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub duration: u64,
    /// Local JPEG; whoever holds the metadata is responsible for deleting it.
    pub thumbnail: Option<PathBuf>,
    pub title: String,
    pub format: String,
}

impl VideoMetadata {
    pub fn from_extracted(info: &ExtractedInfo, fallback_title: &str) -> Self {
        Self {
            width: info.width.unwrap_or(0),
            height: info.height.unwrap_or(0),
            duration: info.duration.map(|d| d.max(0.0) as u64).unwrap_or(0),
            thumbnail: None,
            title: info
                .title
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| fallback_title.to_string()),
            format: info.format.clone().unwrap_or_default(),
        }
    }

    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Falls back to 720p and one minute for anything still unknown.
    pub fn fill_defaults(&mut self) {
        if !self.has_dimensions() {
            self.width = DEFAULT_WIDTH;
            self.height = DEFAULT_HEIGHT;
        }
        if self.duration == 0 {
            self.duration = DEFAULT_DURATION_SECS;
        }
    }
}

/// `{dir}/{stem}_thumb.jpg` next to the video.
pub fn thumbnail_path_for(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    video.with_file_name(format!("{}_thumb.jpg", stem))
}

/// Media-inspection boundary. Implementations never fail: anything they
/// cannot determine is left to the defaults.
#[async_trait::async_trait]
pub trait MetadataProbe: Send + Sync {
    /// Completes `known` from the file at `path`, skipping work for fields
    /// that are already filled in.
    async fn inspect_with(&self, path: &Path, known: VideoMetadata) -> VideoMetadata;
}
