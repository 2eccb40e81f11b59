use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use crate::config::{AppConfig, FetchConfig};
use crate::downloader::{
    CancellationToken, DownloadProgress, ExtractedInfo, FetchedResource, Fetcher, TickSender,
};
use crate::errors::{AppError, Result};

const TICK_PREFIX: &str = "[tick]";
const INFO_PREFIX: &str = "[info]";
const STDERR_TAIL_LINES: usize = 8;

/// One machine-readable line per transfer step, printed by yt-dlp itself.
const PROGRESS_TEMPLATE: &str = "download:[tick] %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s %(progress.speed)s %(progress.eta)s";

/// Printed once the file has reached its final name.
const INFO_TEMPLATE: &str = "after_move:[info] %(.{title,width,height,duration,thumbnail,format})j";

/// What a line of yt-dlp output turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Tick(DownloadProgress),
    Info(ExtractedInfo),
    Other,
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>) -> Option<T> {
    field.filter(|f| *f != "NA" && *f != "None").and_then(|f| f.parse::<T>().ok())
}

fn parse_bytes(field: Option<&str>) -> Option<u64> {
    parse_field::<f64>(field)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
}

/// Parses a `[tick]` line. Total falls back to yt-dlp's estimate, then to 0
/// (unknown).
pub fn parse_tick(line: &str) -> Option<DownloadProgress> {
    let rest = line.trim().strip_prefix(TICK_PREFIX)?;
    let mut fields = rest.split_whitespace();

    let downloaded = parse_bytes(fields.next())?;
    let total = parse_bytes(fields.next());
    let estimate = parse_bytes(fields.next());
    let speed = parse_field::<f64>(fields.next()).filter(|s| s.is_finite() && *s > 0.0);
    let eta = parse_bytes(fields.next());

    let mut tick = DownloadProgress::new(downloaded, total.or(estimate).unwrap_or(0))
        .with_label("Downloading");
    if let Some(speed) = speed {
        tick = tick.with_speed(speed);
    }
    if eta.is_some() {
        tick.eta_secs = eta;
    }
    Some(tick)
}

pub fn parse_info(line: &str) -> Option<ExtractedInfo> {
    let json = line.trim().strip_prefix(INFO_PREFIX)?.trim();
    match serde_json::from_str::<ExtractedInfo>(json) {
        Ok(info) => Some(info),
        Err(e) => {
            log::warn!("⚠️ [YTDLP] Unreadable info line: {}", e);
            None
        }
    }
}

pub fn classify_line(line: &str) -> OutputLine {
    if let Some(tick) = parse_tick(line) {
        return OutputLine::Tick(tick);
    }
    if let Some(info) = parse_info(line) {
        return OutputLine::Info(info);
    }
    OutputLine::Other
}

/// Fetch engine backed by the yt-dlp executable.
pub struct YtDlpFetcher {
    name: String,
    ytdlp_path: String,
    config: FetchConfig,
    proxy: Option<String>,
}

impl YtDlpFetcher {
    pub fn new(ytdlp_path: impl Into<String>, config: FetchConfig) -> Self {
        Self {
            name: "yt-dlp".to_string(),
            ytdlp_path: ytdlp_path.into(),
            config,
            proxy: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.ytdlp_path, config.fetch.clone()).with_proxy(config.proxy.clone())
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn build_args(&self, url: &str, dest: &Path) -> Vec<String> {
        let cfg = &self.config;
        let mut args: Vec<String> = vec![
            "--format".into(),
            cfg.format.clone(),
            "--output".into(),
            dest.to_string_lossy().into_owned(),
            "--no-playlist".into(),
            "--no-warnings".into(),
            "--no-color".into(),
            "--newline".into(),
            "--progress".into(),
            "--progress-template".into(),
            PROGRESS_TEMPLATE.into(),
            "--print".into(),
            INFO_TEMPLATE.into(),
            "--prefer-insecure".into(),
            "--allow-unplayable-formats".into(),
            "--concurrent-fragments".into(),
            cfg.concurrent_fragments.to_string(),
            "--buffer-size".into(),
            cfg.buffer_size.to_string(),
            "--http-chunk-size".into(),
            cfg.http_chunk_size.to_string(),
            "--retries".into(),
            cfg.retries.to_string(),
            "--fragment-retries".into(),
            cfg.fragment_retries.to_string(),
            "--file-access-retries".into(),
            cfg.file_access_retries.to_string(),
            "--extractor-retries".into(),
            cfg.extractor_retries.to_string(),
            "--socket-timeout".into(),
            cfg.socket_timeout_secs.to_string(),
        ];

        if cfg.no_check_certificate {
            args.push("--no-check-certificate".into());
        }
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".into());
            args.push(proxy.clone());
        }

        args.push("--".into());
        args.push(url.to_string());
        args
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<(bool, String)>, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((is_stderr, line)).is_err() {
                break;
            }
        }
    });
}

#[async_trait::async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        ticks: TickSender,
        cancel: CancellationToken,
    ) -> Result<FetchedResource> {
        log::info!("🚀 [YTDLP] Starting download: {} -> {:?}", url, dest);

        let mut child = Command::new(&self.ytdlp_path)
            .args(self.build_args(url, dest))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Network(format!("Cannot start {}: {}", self.ytdlp_path, e)))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone(), false);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx.clone(), true);
        }
        drop(tx);

        let mut info = None;
        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("🛑 [YTDLP] Cancelled, stopping yt-dlp");
                    let _ = child.kill().await;
                    return Err(AppError::Cancelled);
                }
                line = rx.recv() => {
                    let Some((is_stderr, line)) = line else { break };
                    match classify_line(&line) {
                        OutputLine::Tick(tick) => {
                            ticks.send_replace(Some(tick));
                        }
                        OutputLine::Info(extracted) => {
                            log::debug!("📝 [YTDLP] Extracted info: {:?}", extracted);
                            info = Some(extracted);
                        }
                        OutputLine::Other if is_stderr && !line.trim().is_empty() => {
                            log::debug!("📄 [YTDLP] {}", line);
                            if stderr_tail.len() == STDERR_TAIL_LINES {
                                stderr_tail.pop_front();
                            }
                            stderr_tail.push_back(line);
                        }
                        OutputLine::Other => {}
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(AppError::Cancelled);
            }
            status = child.wait() => status?,
        };
        log::info!("📊 [YTDLP] yt-dlp exit status: {}", status);

        if !status.success() {
            let detail = stderr_tail.into_iter().collect::<Vec<_>>().join("\n");
            log::error!("❌ [YTDLP] yt-dlp failed: {}", detail);
            return Err(AppError::Network(if detail.is_empty() {
                format!("yt-dlp exited with {}", status)
            } else {
                detail
            }));
        }

        Ok(FetchedResource {
            path: dest.to_path_buf(),
            info,
        })
    }

    fn get_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::tick_channel;
    use std::path::PathBuf;

    fn fetcher() -> YtDlpFetcher {
        YtDlpFetcher::new("yt-dlp", FetchConfig::default())
    }

    #[test]
    fn args_carry_transfer_policy() {
        let args = fetcher()
            .with_proxy(Some("socks5://127.0.0.1:9050".to_string()))
            .build_args("https://host/v.mkv", &PathBuf::from("/tmp/a_temp.mkv"));

        let value_of = |flag: &str| {
            let idx = args.iter().position(|a| a == flag).unwrap();
            args[idx + 1].clone()
        };
        assert_eq!(value_of("--output"), "/tmp/a_temp.mkv");
        assert_eq!(value_of("--format"), "best/bestvideo+bestaudio");
        assert_eq!(value_of("--concurrent-fragments"), "5");
        assert_eq!(value_of("--http-chunk-size"), "10485760");
        assert_eq!(value_of("--retries"), "10");
        assert_eq!(value_of("--fragment-retries"), "10");
        assert_eq!(value_of("--socket-timeout"), "30");
        assert_eq!(value_of("--proxy"), "socks5://127.0.0.1:9050");
        assert!(args.contains(&"--no-check-certificate".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://host/v.mkv"));
    }

    #[test]
    fn tick_with_known_total() {
        let tick = parse_tick("[tick] 1048576 4194304 NA 524288.0 6").unwrap();
        assert_eq!(tick.downloaded_bytes, 1_048_576);
        assert_eq!(tick.total_bytes, 4_194_304);
        assert_eq!(tick.speed_bytes_per_sec, Some(524_288.0));
        assert_eq!(tick.eta_secs, Some(6));
    }

    #[test]
    fn tick_falls_back_to_estimate_then_unknown() {
        let tick = parse_tick("[tick] 100 NA 1000.5 NA NA").unwrap();
        assert_eq!(tick.total_bytes, 1000);
        assert_eq!(tick.speed_bytes_per_sec, None);
        assert_eq!(tick.eta_secs, None);

        let tick = parse_tick("[tick] 100 NA NA NA NA").unwrap();
        assert_eq!(tick.total_bytes, 0);
        assert_eq!(tick.percent(), None);
    }

    #[test]
    fn non_tick_lines_are_ignored() {
        assert!(parse_tick("[download] Destination: x.mkv").is_none());
        assert!(parse_tick("[tick] NA NA NA NA NA").is_none());
        assert_eq!(classify_line("ERROR: Unable to download"), OutputLine::Other);
    }

    #[test]
    fn info_line_is_parsed() {
        let line = r#"[info] {"title": "Lecture", "width": 1920, "height": 1080, "duration": 61.5, "thumbnail": "https://i/x.jpg", "format": "22 - 1920x1080"}"#;
        match classify_line(line) {
            OutputLine::Info(info) => {
                assert_eq!(info.title.as_deref(), Some("Lecture"));
                assert_eq!(info.width, Some(1920));
                assert_eq!(info.duration, Some(61.5));
                assert_eq!(info.thumbnail.as_deref(), Some("https://i/x.jpg"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let sparse = parse_info(r#"[info] {"title": "Raw", "width": null}"#).unwrap();
        assert_eq!(sparse.width, None);
        assert!(parse_info("[info] not json").is_none());
    }

    #[tokio::test]
    async fn missing_binary_is_a_network_failure() {
        let fetcher = YtDlpFetcher::new("/nonexistent/yt-dlp", FetchConfig::default());
        let (tx, _rx) = tick_channel();
        let err = fetcher
            .fetch("https://host/v.mkv", Path::new("/tmp/never.mkv"), tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_pipeline_failure());
    }
}
