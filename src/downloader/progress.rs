//! Throttled bridge between transfer ticks and a slow notification sink.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use crate::downloader::{CancellationToken, DownloadProgress, TickReceiver, TransferStats};
use crate::errors::Result;

/// Where forwarded progress ends up (usually an edited chat message).
#[async_trait::async_trait]
pub trait ProgressSink: Send + Sync {
    async fn notify(&self, update: &DownloadProgress) -> Result<()>;
}

/// Forwards at most one update per `interval`. The first update always goes
/// through; anything arriving inside the window is dropped, not queued.
/// Once the token is cancelled nothing is forwarded again.
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    interval: Duration,
    cancel: CancellationToken,
    last_forwarded: Option<Instant>,
    forwarded: u64,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            sink,
            interval,
            cancel,
            last_forwarded: None,
            forwarded: 0,
        }
    }

    /// Returns whether the update was handed to the sink.
    pub async fn report(&mut self, update: &DownloadProgress) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let now = Instant::now();
        if let Some(last) = self.last_forwarded {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_forwarded = Some(now);
        self.forwarded += 1;

        if let Err(e) = self.sink.notify(update).await {
            log::error!("⚠️ [PROGRESS] Failed to forward progress update: {}", e);
        }
        true
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }
}

/// Awaits `work` while draining ticks into `reporter`. The tick channel only
/// ever holds the newest value, so a slow sink never builds a backlog.
pub async fn drive<F, T>(
    work: F,
    mut ticks: TickReceiver,
    reporter: &mut ProgressReporter,
    stats: &mut TransferStats,
) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(work);

    loop {
        tokio::select! {
            output = &mut work => return output,
            changed = ticks.changed() => {
                if changed.is_err() {
                    // Producer is gone; no more ticks will arrive.
                    return work.await;
                }
                let tick = ticks.borrow_and_update().clone();
                if let Some(tick) = tick {
                    stats.record(&tick);
                    reporter.report(&tick).await;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::downloader::tick_channel;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub updates: Mutex<Vec<DownloadProgress>>,
        pub fail: bool,
    }

    #[async_trait::async_trait]
    impl ProgressSink for RecordingSink {
        async fn notify(&self, update: &DownloadProgress) -> Result<()> {
            self.updates.lock().unwrap().push(update.clone());
            if self.fail {
                return Err(AppError::Messaging("message to edit not found".to_string()));
            }
            Ok(())
        }
    }

    fn reporter(sink: Arc<RecordingSink>, cancel: CancellationToken) -> ProgressReporter {
        ProgressReporter::new(sink, Duration::from_secs(1), cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn first_update_is_immediate_then_throttled() {
        let sink = Arc::new(RecordingSink::default());
        let mut reporter = reporter(sink.clone(), CancellationToken::new());

        assert!(reporter.report(&DownloadProgress::new(1, 100)).await);
        assert!(!reporter.report(&DownloadProgress::new(2, 100)).await);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!reporter.report(&DownloadProgress::new(3, 100)).await);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(reporter.report(&DownloadProgress::new(4, 100)).await);

        let seen: Vec<u64> = sink.updates.lock().unwrap().iter().map(|u| u.downloaded_bytes).collect();
        assert_eq!(seen, vec![1, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_two_forwards_inside_one_interval() {
        let sink = Arc::new(RecordingSink::default());
        let mut reporter = reporter(sink.clone(), CancellationToken::new());
        let mut forwarded_at = Vec::new();

        for i in 0..100u64 {
            if reporter.report(&DownloadProgress::new(i, 100)).await {
                forwarded_at.push(Instant::now());
            }
            tokio::time::advance(Duration::from_millis(130)).await;
        }

        assert!(forwarded_at.len() > 1);
        for pair in forwarded_at.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_suppresses_everything() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let mut reporter = reporter(sink.clone(), cancel.clone());

        assert!(reporter.report(&DownloadProgress::new(1, 10)).await);
        cancel.cancel();
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(5)).await;
            assert!(!reporter.report(&DownloadProgress::new(2, 10)).await);
        }
        assert_eq!(sink.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_errors_do_not_stop_reporting() {
        let sink = Arc::new(RecordingSink { fail: true, ..Default::default() });
        let mut reporter = reporter(sink.clone(), CancellationToken::new());

        assert!(reporter.report(&DownloadProgress::new(1, 10)).await);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(reporter.report(&DownloadProgress::new(2, 10)).await);
        assert_eq!(reporter.forwarded(), 2);
    }

    #[tokio::test]
    async fn drive_returns_work_output_and_tracks_latest_tick() {
        let sink = Arc::new(RecordingSink::default());
        let mut reporter = reporter(sink.clone(), CancellationToken::new());
        let mut stats = TransferStats::default();
        let (tx, rx) = tick_channel();

        let work = async move {
            for i in 1..=5u64 {
                tx.send_replace(Some(DownloadProgress::new(i * 10, 50)));
                tokio::task::yield_now().await;
            }
            "done"
        };

        let out = drive(work, rx, &mut reporter, &mut stats).await;
        assert_eq!(out, "done");
        assert!(!sink.updates.lock().unwrap().is_empty());
        assert_eq!(stats.total_bytes, 50);
    }
}
