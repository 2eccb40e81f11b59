use std::path::{Path, PathBuf};
use std::process::Stdio;
use serde::Deserialize;
use tokio::process::Command;
use crate::errors::{AppError, Result};
use crate::metadata::{thumbnail_path_for, MetadataProbe, VideoMetadata};

const THUMBNAIL_OFFSET: &str = "00:00:05";
const THUMBNAIL_SCALE: &str = "scale=320:-1";

/// Width, height and duration as reported by ffprobe.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub duration: u64,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_seconds(value: Option<&str>) -> Option<u64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d as u64)
}

/// Parses `ffprobe -of json` output. Stream duration wins; containers like
/// MKV only carry it at format level.
pub fn parse_probe_output(json: &str) -> Result<StreamInfo> {
    let output: ProbeOutput = serde_json::from_str(json)?;
    let stream = output
        .streams
        .first()
        .ok_or_else(|| AppError::Probe("no video stream".to_string()))?;

    let duration = parse_seconds(stream.duration.as_deref())
        .or_else(|| parse_seconds(output.format.as_ref().and_then(|f| f.duration.as_deref())))
        .unwrap_or(0);

    Ok(StreamInfo {
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        duration,
    })
}

/// ffprobe/ffmpeg backed probe.
pub struct FfmpegProbe {
    ffprobe_path: String,
    ffmpeg_path: String,
}

impl FfmpegProbe {
    pub fn new(ffprobe_path: impl Into<String>, ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Best effort: logs and returns `None` on any failure.
    pub async fn probe_stream(&self, path: &Path) -> Option<StreamInfo> {
        match self.run_ffprobe(path).await {
            Ok(info) => {
                log::info!("📊 [PROBE] Video metadata: {}x{}, {}s", info.width, info.height, info.duration);
                Some(info)
            }
            Err(e) => {
                log::warn!("⚠️ [PROBE] Cannot extract video metadata with ffprobe: {}", e);
                None
            }
        }
    }

    async fn run_ffprobe(&self, path: &Path) -> Result<StreamInfo> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height,duration:format=duration"])
            .args(["-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Probe(format!("ffprobe exited with {}: {}", output.status, stderr.trim())));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// Grabs one frame five seconds in, scaled to 320px wide.
    pub async fn extract_thumbnail(&self, path: &Path) -> Option<PathBuf> {
        let thumb = thumbnail_path_for(path);
        match self.run_ffmpeg(path, &thumb).await {
            Ok(()) => {
                log::info!("🖼️ [PROBE] Thumbnail generated: {:?}", thumb);
                Some(thumb)
            }
            Err(e) => {
                log::warn!("⚠️ [PROBE] Cannot generate thumbnail: {}", e);
                let _ = crate::utils::remove_if_exists(&thumb).await;
                None
            }
        }
    }

    async fn run_ffmpeg(&self, path: &Path, thumb: &Path) -> Result<()> {
        let output = Command::new(&self.ffmpeg_path)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-ss", THUMBNAIL_OFFSET, "-vframes", "1", "-vf", THUMBNAIL_SCALE])
            .arg(thumb)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Probe(format!("ffmpeg exited with {}: {}", output.status, stderr.trim())));
        }

        match crate::utils::file_len(thumb).await {
            Some(len) if len > 0 => Ok(()),
            _ => Err(AppError::Probe("ffmpeg produced no thumbnail".to_string())),
        }
    }
}

#[async_trait::async_trait]
impl MetadataProbe for FfmpegProbe {
    async fn inspect_with(&self, path: &Path, known: VideoMetadata) -> VideoMetadata {
        let mut meta = known;

        if !meta.has_dimensions() || meta.duration == 0 {
            if let Some(info) = self.probe_stream(path).await {
                if !meta.has_dimensions() && info.width > 0 && info.height > 0 {
                    meta.width = info.width;
                    meta.height = info.height;
                }
                if meta.duration == 0 {
                    meta.duration = info.duration;
                }
            }
        }

        if meta.thumbnail.is_none() {
            meta.thumbnail = self.extract_thumbnail(path).await;
        }

        meta.fill_defaults();
        meta
    }
}
