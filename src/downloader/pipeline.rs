use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use crate::config::AppConfig;
use crate::downloader::cipher;
use crate::downloader::http_pool::HttpPool;
use crate::downloader::progress::{drive, ProgressReporter, ProgressSink};
use crate::downloader::ytdlp::YtDlpFetcher;
use crate::downloader::{
    tick_channel, CancellationToken, DownloadOutcome, DownloadProgress, DownloadRequest,
    DownloadTask, FetchedResource, Fetcher, PipelineState,
};
use crate::errors::AppError;
use crate::metadata::thumbnail::fetch_remote_thumbnail;
use crate::metadata::{FfmpegProbe, MetadataProbe, VideoMetadata};
use crate::utils::{ensure_dir_exists, file_len, remove_if_exists};

const THUMBNAIL_TIMEOUT_SECS: u64 = 30;

/// Runs one request through fetch, optional header decryption and metadata
/// probing. Only a `Success` outcome leaves files behind.
pub struct DownloadPipeline {
    download_dir: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    probe: Arc<dyn MetadataProbe>,
    http_pool: Option<Arc<HttpPool>>,
    progress_interval: Duration,
}

impl DownloadPipeline {
    pub fn new(download_dir: PathBuf, fetcher: Arc<dyn Fetcher>, probe: Arc<dyn MetadataProbe>) -> Self {
        Self {
            download_dir,
            fetcher,
            probe,
            http_pool: None,
            progress_interval: Duration::from_secs(1),
        }
    }

    pub fn from_config(config: &AppConfig) -> crate::errors::Result<Self> {
        let http_pool = HttpPool::new(THUMBNAIL_TIMEOUT_SECS, config.proxy.as_deref())?;

        Ok(Self::new(
            config.download_dir.clone(),
            Arc::new(YtDlpFetcher::from_config(config)),
            Arc::new(FfmpegProbe::new(&config.ffprobe_path, &config.ffmpeg_path)),
        )
        .with_http_pool(Arc::new(http_pool))
        .with_progress_interval(config.progress.download_interval()))
    }

    /// Enables downloading extractor-supplied thumbnails.
    pub fn with_http_pool(mut self, pool: Arc<HttpPool>) -> Self {
        self.http_pool = Some(pool);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub async fn run(
        &self,
        request: DownloadRequest,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> DownloadOutcome {
        let mut task = DownloadTask::new(request, &self.download_dir, cancel);

        log::info!(
            "🎬 [PIPELINE] Task {}: {} -> {:?} (encrypted: {}, key: {})",
            task.id,
            task.request.url(),
            task.final_path,
            task.request.is_encrypted(),
            task.request.masked_key().unwrap_or_else(|| "-".to_string())
        );

        let outcome = self.execute(&mut task, sink).await;

        match &outcome {
            DownloadOutcome::Success { path, .. } => {
                let elapsed = chrono::Utc::now() - task.started_at;
                log::info!(
                    "🎉 [PIPELINE] Task {} finished: {:?} (took {}s)",
                    task.id,
                    path,
                    elapsed.num_seconds()
                );
            }
            DownloadOutcome::Failure { reason } => {
                log::error!("❌ [PIPELINE] Task {} failed: {}", task.id, reason);
                self.discard_artifacts(&task).await;
            }
            DownloadOutcome::Cancelled => {
                log::info!("🛑 [PIPELINE] Task {} cancelled", task.id);
                self.discard_artifacts(&task).await;
            }
        }

        task.state = PipelineState::Done;
        outcome
    }

    async fn execute(&self, task: &mut DownloadTask, sink: Arc<dyn ProgressSink>) -> DownloadOutcome {
        if let Err(e) = ensure_dir_exists(&self.download_dir).await {
            return failure(format!("Cannot create download directory: {}", e));
        }
        self.discard_artifacts(task).await;

        let cancel = task.cancel.clone();
        let mut reporter = ProgressReporter::new(sink, self.progress_interval, cancel.clone());
        reporter
            .report(&DownloadProgress::new(0, 0).with_label("Starting"))
            .await;

        if cancel.is_cancelled() {
            return DownloadOutcome::Cancelled;
        }

        task.state = PipelineState::Fetching;
        let (ticks, tick_rx) = tick_channel();
        let fetcher = self.fetcher.clone();
        let url = task.request.url().to_string();
        let dest = task.temp_path.clone();
        let fetch_cancel = cancel.clone();
        log::info!("⬇️ [PIPELINE] Fetching with {}", self.fetcher.get_name());

        let handle = tokio::spawn(async move { fetcher.fetch(&url, &dest, ticks, fetch_cancel).await });
        let joined = drive(handle, tick_rx, &mut reporter, &mut task.stats).await;
        log::debug!("📊 [PIPELINE] Forwarded {} progress updates", reporter.forwarded());

        if cancel.is_cancelled() {
            return DownloadOutcome::Cancelled;
        }

        let fetched = match joined {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(AppError::Cancelled)) => return DownloadOutcome::Cancelled,
            Ok(Err(e)) if e.is_pipeline_failure() => return failure(e.to_string()),
            Ok(Err(e)) => {
                // Anything else is judged by what actually landed on disk.
                log::warn!("⚠️ [PIPELINE] Fetcher reported: {}", e);
                FetchedResource {
                    path: task.temp_path.clone(),
                    info: None,
                }
            }
            Err(e) => return failure(format!("Fetch task aborted: {}", e)),
        };

        match file_len(&fetched.path).await {
            Some(len) if len > 0 => {
                log::info!("✅ [PIPELINE] Fetched {} bytes into {:?}", len, fetched.path);
            }
            _ => {
                return failure(
                    AppError::EmptyResult("downloaded file is missing or empty".to_string()).to_string(),
                );
            }
        }

        let mut metadata = match &fetched.info {
            Some(info) => VideoMetadata::from_extracted(info, task.request.filename()),
            None => VideoMetadata {
                title: task.request.filename().to_string(),
                ..Default::default()
            },
        };

        let thumbnail_url = fetched.info.as_ref().and_then(|i| i.thumbnail.clone());
        if let (Some(pool), Some(url)) = (&self.http_pool, thumbnail_url) {
            metadata.thumbnail = fetch_remote_thumbnail(pool, &url, &task.thumb_path).await;
        }

        if cancel.is_cancelled() {
            return DownloadOutcome::Cancelled;
        }

        if let Some(key) = task.request.decryption_key().map(str::to_string) {
            task.state = PipelineState::Decrypting;
            if let Err(reason) = self.decrypt(task, &fetched.path, &key).await {
                return failure(reason);
            }
        } else if let Err(e) = tokio::fs::rename(&fetched.path, &task.final_path).await {
            return failure(format!("Cannot move download into place: {}", e));
        }

        if cancel.is_cancelled() {
            return DownloadOutcome::Cancelled;
        }

        task.state = PipelineState::ProbingMetadata;
        let metadata = self.probe.inspect_with(&task.final_path, metadata).await;

        if cancel.is_cancelled() {
            return DownloadOutcome::Cancelled;
        }

        DownloadOutcome::Success {
            path: task.final_path.clone(),
            metadata,
        }
    }

    /// Writes the decrypted file to the final path. An I/O failure falls back
    /// to promoting the raw download so the user still gets a file.
    async fn decrypt(&self, task: &DownloadTask, raw: &Path, key: &str) -> Result<(), String> {
        log::info!("🔐 [PIPELINE] Decrypting header of {:?}", raw);

        match cipher::decrypt_file(raw, &task.final_path, key).await {
            Ok(bytes) => {
                if let Err(e) = remove_if_exists(raw).await {
                    log::warn!("⚠️ [PIPELINE] Cannot remove raw download {:?}: {}", raw, e);
                }
                log::info!("✅ [PIPELINE] Decryption completed: {:?} ({} bytes)", task.final_path, bytes);
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "❌ [PIPELINE] Decryption failed, delivering the undecrypted file instead: {}",
                    e
                );
                let _ = remove_if_exists(&task.final_path).await;
                tokio::fs::rename(raw, &task.final_path)
                    .await
                    .map_err(|e| format!("Cannot move download into place: {}", e))
            }
        }
    }

    async fn discard_artifacts(&self, task: &DownloadTask) {
        for path in task.artifacts().await {
            match remove_if_exists(&path).await {
                Ok(true) => log::debug!("🗑️ [PIPELINE] Removed {:?}", path),
                Ok(false) => {}
                Err(e) => log::warn!("⚠️ [PIPELINE] Cannot remove {:?}: {}", path, e),
            }
        }
    }
}

fn failure(reason: impl Into<String>) -> DownloadOutcome {
    DownloadOutcome::Failure { reason: reason.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::progress::tests::RecordingSink;
    use crate::downloader::{ExtractedInfo, TickSender};
    use crate::errors::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    type Hook = Box<dyn Fn(&Path) + Send + Sync>;

    #[derive(Default)]
    struct FakeFetcher {
        body: Vec<u8>,
        error: Option<String>,
        info: Option<ExtractedInfo>,
        cancel_during_fetch: bool,
        io_error_after_write: bool,
        after_write: Option<Hook>,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(
            &self,
            url: &str,
            dest: &Path,
            ticks: TickSender,
            cancel: CancellationToken,
        ) -> Result<FetchedResource> {
            self.urls.lock().unwrap().push(url.to_string());
            let total = self.body.len() as u64;
            ticks.send_replace(Some(DownloadProgress::new(total / 2, total)));

            if let Some(error) = &self.error {
                return Err(AppError::Network(error.clone()));
            }

            tokio::fs::write(dest, &self.body).await?;
            ticks.send_replace(Some(DownloadProgress::new(total, total)));
            if let Some(hook) = &self.after_write {
                hook(dest);
            }
            if self.cancel_during_fetch {
                cancel.cancel();
            }
            if self.io_error_after_write {
                return Err(AppError::Io(std::io::Error::other("stderr pipe closed")));
            }

            Ok(FetchedResource {
                path: dest.to_path_buf(),
                info: self.info.clone(),
            })
        }

        fn get_name(&self) -> &str {
            "fake"
        }
    }

    #[derive(Default)]
    struct CountingProbe {
        calls: AtomicUsize,
        cancel_on_inspect: Option<CancellationToken>,
    }

    #[async_trait::async_trait]
    impl MetadataProbe for CountingProbe {
        async fn inspect_with(&self, _path: &Path, known: VideoMetadata) -> VideoMetadata {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = &self.cancel_on_inspect {
                token.cancel();
            }
            let mut meta = known;
            meta.fill_defaults();
            meta
        }
    }

    struct Harness {
        dir: TempDir,
        fetcher: Arc<FakeFetcher>,
        probe: Arc<CountingProbe>,
        sink: Arc<RecordingSink>,
    }

    impl Harness {
        fn new(fetcher: FakeFetcher) -> Self {
            Self::with_probe(fetcher, CountingProbe::default())
        }

        fn with_probe(fetcher: FakeFetcher, probe: CountingProbe) -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                fetcher: Arc::new(fetcher),
                probe: Arc::new(probe),
                sink: Arc::new(RecordingSink::default()),
            }
        }

        async fn run(&self, url: &str, filename: &str) -> DownloadOutcome {
            self.run_with(url, filename, CancellationToken::new()).await
        }

        async fn run_with(&self, url: &str, filename: &str, cancel: CancellationToken) -> DownloadOutcome {
            let pipeline = DownloadPipeline::new(
                self.dir.path().to_path_buf(),
                self.fetcher.clone(),
                self.probe.clone(),
            );
            pipeline
                .run(DownloadRequest::new(url, filename), self.sink.clone(), cancel)
                .await
        }

        fn files(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn plain_download_is_promoted_to_final_path() {
        let h = Harness::new(FakeFetcher {
            body: body(64),
            info: Some(ExtractedInfo {
                title: Some("Intro".to_string()),
                width: Some(1920),
                height: Some(1080),
                duration: Some(42.0),
                ..Default::default()
            }),
            ..Default::default()
        });

        let outcome = h.run("https://host/media/intro.mp4", "Intro").await;

        let DownloadOutcome::Success { path, metadata } = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(path, h.dir.path().join("Intro.mp4"));
        assert_eq!(std::fs::read(&path).unwrap(), body(64));
        assert_eq!((metadata.width, metadata.height, metadata.duration), (1920, 1080, 42));
        assert_eq!(metadata.title, "Intro");
        assert_eq!(h.files(), vec!["Intro.mp4"]);
        assert_eq!(h.probe.calls.load(Ordering::SeqCst), 1);

        let updates = h.sink.updates.lock().unwrap();
        assert_eq!(updates[0].downloaded_bytes, 0);
    }

    #[tokio::test]
    async fn encrypted_download_has_header_restored_and_key_withheld() {
        let h = Harness::new(FakeFetcher {
            body: body(100),
            ..Default::default()
        });

        let outcome = h.run("https://host/v/lesson.mkv*12345", "Lesson").await;

        let DownloadOutcome::Success { path, metadata } = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(path, h.dir.path().join("Lesson.mkv"));
        assert_eq!(std::fs::read(&path).unwrap(), cipher::apply(&body(100), "12345"));
        assert_eq!((metadata.width, metadata.height, metadata.duration), (1280, 720, 60));
        assert_eq!(h.fetcher.urls.lock().unwrap().as_slice(), ["https://host/v/lesson.mkv"]);
        assert_eq!(h.files(), vec!["Lesson.mkv"]);
    }

    #[tokio::test]
    async fn fetch_error_is_a_failure_and_leaves_nothing() {
        let h = Harness::new(FakeFetcher {
            error: Some("HTTP Error 404: Not Found".to_string()),
            ..Default::default()
        });

        let outcome = h.run("https://host/missing.mkv", "gone").await;

        match outcome {
            DownloadOutcome::Failure { reason } => assert!(reason.contains("404")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(h.files().is_empty());
        assert_eq!(h.probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_result_is_a_failure() {
        let h = Harness::new(FakeFetcher::default());

        let outcome = h.run("https://host/empty.mkv*99", "empty").await;

        match outcome {
            DownloadOutcome::Failure { reason } => assert!(reason.contains("Empty result")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(h.files().is_empty());
    }

    #[tokio::test]
    async fn cancel_during_fetch_discards_everything_without_probing() {
        let h = Harness::new(FakeFetcher {
            body: body(64),
            cancel_during_fetch: true,
            ..Default::default()
        });

        let outcome = h.run("https://host/a.mkv*777", "a").await;

        assert_eq!(outcome, DownloadOutcome::Cancelled);
        assert!(h.files().is_empty());
        assert_eq!(h.probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_during_probe_discards_finished_file() {
        let cancel = CancellationToken::new();
        let h = Harness::with_probe(
            FakeFetcher {
                body: body(64),
                ..Default::default()
            },
            CountingProbe {
                cancel_on_inspect: Some(cancel.clone()),
                ..Default::default()
            },
        );

        let outcome = h.run_with("https://host/a.mp4", "a", cancel).await;

        assert_eq!(outcome, DownloadOutcome::Cancelled);
        assert_eq!(h.probe.calls.load(Ordering::SeqCst), 1);
        assert!(h.files().is_empty());
    }

    #[tokio::test]
    async fn cancel_removes_fragment_leftovers() {
        let h = Harness::new(FakeFetcher {
            body: body(64),
            cancel_during_fetch: true,
            after_write: Some(Box::new(|dest: &Path| {
                let name = dest.file_name().unwrap().to_string_lossy().into_owned();
                for suffix in [".part-Frag1", ".part-Frag2", ".ytdl"] {
                    std::fs::write(dest.with_file_name(format!("{}{}", name, suffix)), b"-").unwrap();
                }
                std::fs::write(dest.with_file_name("keep.mkv"), b"unrelated").unwrap();
            })),
            ..Default::default()
        });

        let outcome = h.run("https://host/x.mkv", "x").await;

        assert_eq!(outcome, DownloadOutcome::Cancelled);
        assert_eq!(h.files(), vec!["keep.mkv"]);
    }

    #[tokio::test]
    async fn non_network_fetch_error_is_judged_by_output() {
        let h = Harness::new(FakeFetcher {
            body: body(16),
            io_error_after_write: true,
            ..Default::default()
        });
        let outcome = h.run("https://host/a.mkv", "a").await;
        assert!(matches!(outcome, DownloadOutcome::Success { .. }));
        assert_eq!(h.files(), vec!["a.mkv"]);

        let h = Harness::new(FakeFetcher {
            io_error_after_write: true,
            ..Default::default()
        });
        match h.run("https://host/a.mkv", "a").await {
            DownloadOutcome::Failure { reason } => assert!(reason.contains("Empty result")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancelled_before_start_never_fetches() {
        let h = Harness::new(FakeFetcher {
            body: body(8),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h.run_with("https://host/a.mkv", "a", cancel).await;

        assert_eq!(outcome, DownloadOutcome::Cancelled);
        assert!(h.fetcher.urls.lock().unwrap().is_empty());
        assert!(h.sink.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_artifacts_are_cleared_first() {
        let h = Harness::new(FakeFetcher {
            body: b"fresh".to_vec(),
            ..Default::default()
        });
        std::fs::write(h.dir.path().join("clip.mkv"), b"old").unwrap();
        std::fs::write(h.dir.path().join("clip_temp.mkv.part"), b"half").unwrap();

        let outcome = h.run("https://host/clip", "clip").await;

        assert!(matches!(outcome, DownloadOutcome::Success { .. }));
        assert_eq!(std::fs::read(h.dir.path().join("clip.mkv")).unwrap(), b"fresh");
        assert_eq!(h.files(), vec!["clip.mkv"]);
    }

    #[tokio::test]
    async fn unusable_key_delivers_raw_file() {
        let h = Harness::new(FakeFetcher {
            body: body(40),
            ..Default::default()
        });

        let outcome = h.run("https://host/v.mkv*k€y", "v").await;

        let DownloadOutcome::Success { path, .. } = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(std::fs::read(&path).unwrap(), body(40));
        assert_eq!(h.files(), vec!["v.mkv"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn decryption_io_failure_delivers_raw_file() {
        let h = Harness::new(FakeFetcher {
            body: body(40),
            after_write: Some(Box::new(|dest: &Path| {
                // Dangling link at the final path makes creating it fail.
                let final_path = dest.with_file_name("broken.mkv");
                std::os::unix::fs::symlink("/nonexistent-dir/target", final_path).unwrap();
            })),
            ..Default::default()
        });

        let outcome = h.run("https://host/broken.mkv*4242", "broken").await;

        let DownloadOutcome::Success { path, .. } = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(std::fs::read(&path).unwrap(), body(40));
        assert_eq!(h.files(), vec!["broken.mkv"]);
    }
}
