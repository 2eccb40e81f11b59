//! Terminal stand-in for a chat client: stdin lines become updates, messages
//! are printed, and uploads are copies into an outbox directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use crate::bot::{BotHandler, Button, DocumentUpload, MessageId, Messenger, Update, VideoUpload};
use crate::downloader::{DownloadProgress, TickSender};
use crate::errors::{AppError, Result};
use crate::utils::ensure_dir_exists;

const COPY_CHUNK: usize = 64 * 1024;

const PB_STYLE: &str = "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

static PB_TEMPLATE: LazyLock<Option<ProgressStyle>> = LazyLock::new(|| {
    ProgressStyle::with_template(PB_STYLE)
        .ok()
        .map(|style| style.progress_chars("█▓▒░  "))
});

/// Turns a console line into an update: `/cmd` is a command, `!action` a
/// button press, anything else plain text.
pub fn parse_line(user: u64, line: &str) -> Option<Update> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(command) = line.strip_prefix('/') {
        let name = command.split_whitespace().next().unwrap_or_default().to_string();
        return Some(Update::Command { user, name });
    }

    if let Some(action) = line.strip_prefix('!') {
        return Some(Update::Callback {
            user,
            message: None,
            action: action.trim().to_string(),
        });
    }

    Some(Update::Text {
        user,
        text: line.to_string(),
    })
}

/// Feeds stdin into the handler until EOF, then winds down running requests.
pub async fn run(handler: Arc<BotHandler>, user: u64) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("💬 Type /start to begin, !<action> to press a button, Ctrl-D to quit.");

    while let Some(line) = lines.next_line().await? {
        let Some(update) = parse_line(user, &line) else { continue };
        if let Err(e) = handler.handle(update).await {
            log::error!("❌ [CONSOLE] {}", e);
        }
    }

    log::info!("👋 [CONSOLE] stdin closed, shutting down");
    handler.shutdown().await;
    Ok(())
}

/// Prints messages and delivers uploads into `outbox`.
pub struct ConsoleMessenger {
    outbox: PathBuf,
    next_id: AtomicU64,
}

impl ConsoleMessenger {
    pub fn new(outbox: PathBuf) -> Self {
        Self {
            outbox,
            next_id: AtomicU64::new(1),
        }
    }

    fn print(&self, header: &str, text: &str, buttons: &[Button]) {
        println!("{}\n{}", header, text);
        if !buttons.is_empty() {
            let row: Vec<String> = buttons
                .iter()
                .map(|b| format!("[{} → !{}]", b.label, b.action.as_str()))
                .collect();
            println!("{}", row.join("  "));
        }
        println!();
    }

    /// Copies `source` into the outbox chunk by chunk, reporting each chunk.
    pub async fn deliver(&self, source: &Path, progress: &TickSender) -> Result<PathBuf> {
        ensure_dir_exists(&self.outbox).await?;
        let name = source
            .file_name()
            .ok_or_else(|| AppError::Messaging(format!("{:?} has no file name", source)))?;
        let dest = self.outbox.join(name);

        let total = tokio::fs::metadata(source).await?.len();
        let mut input = tokio::fs::File::open(source).await?;
        let mut output = tokio::fs::File::create(&dest).await?;

        let bar = ProgressBar::new(total);
        if let Some(style) = PB_TEMPLATE.as_ref() {
            bar.set_style(style.clone());
        }

        let mut buf = vec![0u8; COPY_CHUNK];
        let mut sent = 0u64;
        loop {
            let read = input.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            output.write_all(&buf[..read]).await?;
            sent += read as u64;
            bar.set_position(sent);
            progress.send_replace(Some(DownloadProgress::new(sent, total).with_label("Uploading")));
        }
        output.flush().await?;
        bar.finish_and_clear();

        Ok(dest)
    }

    async fn deliver_thumbnail(&self, thumbnail: Option<&Path>) {
        let Some(thumb) = thumbnail else { return };
        let Some(name) = thumb.file_name() else { return };
        if let Err(e) = tokio::fs::copy(thumb, self.outbox.join(name)).await {
            log::warn!("⚠️ [CONSOLE] Cannot copy thumbnail {:?}: {}", thumb, e);
        }
    }
}

#[async_trait::async_trait]
impl Messenger for ConsoleMessenger {
    async fn send_text(&self, _chat: u64, text: &str, buttons: &[Button]) -> Result<MessageId> {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.print(&format!("── message {} ──", id), text, buttons);
        Ok(id)
    }

    async fn edit_text(&self, _chat: u64, message: MessageId, text: &str, buttons: &[Button]) -> Result<()> {
        self.print(&format!("── message {} (edited) ──", message), text, buttons);
        Ok(())
    }

    async fn delete_message(&self, _chat: u64, message: MessageId) -> Result<()> {
        println!("── message {} deleted ──\n", message);
        Ok(())
    }

    async fn send_video(&self, _chat: u64, video: &VideoUpload, progress: TickSender) -> Result<()> {
        let dest = self.deliver(&video.path, &progress).await?;
        self.deliver_thumbnail(video.thumbnail.as_deref()).await;
        println!(
            "🎬 Video delivered: {:?} ({}x{}, {}s, streaming: {})\n{}\n",
            dest, video.width, video.height, video.duration, video.supports_streaming, video.caption
        );
        Ok(())
    }

    async fn send_document(&self, _chat: u64, document: &DocumentUpload, progress: TickSender) -> Result<()> {
        let dest = self.deliver(&document.path, &progress).await?;
        self.deliver_thumbnail(document.thumbnail.as_deref()).await;
        println!("📄 Document delivered: {:?}\n{}\n", dest, document.caption);
        Ok(())
    }
}
