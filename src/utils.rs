use std::path::Path;
use crate::errors::Result;
use log::info;

const BAR_LENGTH: usize = 20;

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("📁 Created directory: {:?}", path);
    }
    Ok(())
}

/// Removes a file, treating "already gone" as success.
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Size of a file in bytes, or `None` if it is missing.
pub async fn file_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// Generates a unique ID for downloads
pub fn generate_download_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn format_size(size_bytes: u64) -> String {
    if size_bytes == 0 {
        return "0 B".to_string();
    }

    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < units.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", size_bytes, units[0])
    } else {
        format!("{:.2} {}", size, units[unit])
    }
}

pub fn format_eta(seconds: Option<u64>) -> String {
    let seconds = match seconds {
        Some(s) if s > 0 => s,
        _ => return "Almost done...".to_string(),
    };

    let (minutes, secs) = (seconds / 60, seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Percentage of `current` over `total`; `None` when the total is unknown.
pub fn percent(current: u64, total: u64) -> Option<f64> {
    if total == 0 {
        None
    } else {
        Some((current as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
    }
}

pub fn progress_bar(percent: f64) -> String {
    let percent = percent.clamp(0.0, 100.0);
    let filled = ((BAR_LENGTH as f64) * percent / 100.0) as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(BAR_LENGTH - filled))
}
