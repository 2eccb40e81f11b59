use std::path::{Path, PathBuf};
use crate::downloader::http_pool::HttpPool;

/// Downloads an extractor-supplied thumbnail. Failures only cost the
/// thumbnail, never the download.
pub async fn fetch_remote_thumbnail(pool: &HttpPool, url: &str, dest: &Path) -> Option<PathBuf> {
    match pool.download_to_file(url, dest).await {
        Ok(bytes) => {
            log::info!("🖼️ [THUMB] Thumbnail downloaded: {:?} ({} bytes)", dest, bytes);
            Some(dest.to_path_buf())
        }
        Err(e) => {
            log::warn!("⚠️ [THUMB] Cannot download thumbnail from {}: {}", url, e);
            None
        }
    }
}
