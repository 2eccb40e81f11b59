use std::path::Path;
use std::time::Duration;
use futures_util::StreamExt;
use reqwest::{Client, ClientBuilder, Proxy};
use tokio::io::AsyncWriteExt;
use crate::errors::{AppError, Result};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Shared HTTP client for the small side downloads (thumbnails).
/// Source hosts are often self-signed mirrors, so certificates are not verified.
pub struct HttpPool {
    client: Client,
    retry_delay: Duration,
}

impl HttpPool {
    pub fn new(timeout_seconds: u64, proxy: Option<&str>) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_seconds);

        let mut builder = ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(true)
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true);

        if let Some(proxy_url) = proxy {
            builder = builder.proxy(Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            retry_delay: RETRY_DELAY,
        })
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Streams `url` into `dest`, retrying transient failures. A partial file
    /// is removed before every retry and after the final failure.
    pub async fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            log::debug!("🌐 [HTTP] Attempt {} of {} for URL: {}", attempt, MAX_RETRIES, url);

            match self.try_download(url, dest).await {
                Ok(written) => return Ok(written),
                Err(e) => {
                    log::warn!("⚠️ [HTTP] Attempt {} failed: {}", attempt, e);
                    let _ = crate::utils::remove_if_exists(dest).await;
                    last_error = Some(e);

                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        log::error!("❌ [HTTP] All {} attempts failed for {}", MAX_RETRIES, url);
        Err(last_error.unwrap_or_else(|| AppError::Network(format!("Failed to download {}", url))))
    }

    async fn try_download(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Network(format!("HTTP error: {}", response.status())));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            return Err(AppError::EmptyResult(format!("{} returned an empty body", url)));
        }

        Ok(written)
    }
}
