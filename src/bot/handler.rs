use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;
use crate::bot::{
    is_video_file, render, Button, CallbackAction, DocumentUpload, MessageId, Messenger, Update,
    VideoUpload,
};
use crate::config::AppConfig;
use crate::downloader::manager::{ConversationState, SessionStore};
use crate::downloader::pipeline::DownloadPipeline;
use crate::downloader::progress::{drive, ProgressReporter, ProgressSink};
use crate::downloader::{
    tick_channel, CancellationToken, DownloadOutcome, DownloadProgress, DownloadRequest,
    TransferStats,
};
use crate::errors::Result;
use crate::metadata::VideoMetadata;
use crate::security::InputValidator;
use crate::utils::remove_if_exists;

fn cancel_download_button() -> Vec<Button> {
    vec![Button::new("❌ Cancel", CallbackAction::CancelDownload)]
}

fn start_button() -> Vec<Button> {
    vec![Button::new("🔄 Start New Session", CallbackAction::Start)]
}

/// Edits the status message with download progress.
struct StatusSink {
    messenger: Arc<dyn Messenger>,
    chat: u64,
    message: MessageId,
    encrypted: bool,
}

#[async_trait::async_trait]
impl ProgressSink for StatusSink {
    async fn notify(&self, update: &DownloadProgress) -> Result<()> {
        let text = render::download_status(update, self.encrypted);
        self.messenger
            .edit_text(self.chat, self.message, &text, &cancel_download_button())
            .await
    }
}

struct UploadSink {
    messenger: Arc<dyn Messenger>,
    chat: u64,
    message: MessageId,
}

#[async_trait::async_trait]
impl ProgressSink for UploadSink {
    async fn notify(&self, update: &DownloadProgress) -> Result<()> {
        self.messenger
            .edit_text(self.chat, self.message, &render::upload_status(update), &[])
            .await
    }
}

/// The conversation: session setup, file requests, download and upload.
pub struct BotHandler {
    messenger: Arc<dyn Messenger>,
    sessions: Arc<SessionStore>,
    pipeline: Arc<DownloadPipeline>,
    validator: InputValidator,
    upload_interval: Duration,
    requests: Mutex<JoinSet<()>>,
}

impl BotHandler {
    pub fn new(messenger: Arc<dyn Messenger>, sessions: Arc<SessionStore>, pipeline: Arc<DownloadPipeline>) -> Self {
        Self {
            messenger,
            sessions,
            pipeline,
            validator: InputValidator::new(),
            upload_interval: Duration::from_secs(2),
            requests: Mutex::new(JoinSet::new()),
        }
    }

    pub fn from_config(config: &AppConfig, messenger: Arc<dyn Messenger>) -> Result<Self> {
        let pipeline = DownloadPipeline::from_config(config)?;
        Ok(Self::new(messenger, Arc::new(SessionStore::from_config(config)), Arc::new(pipeline))
            .with_upload_interval(config.progress.upload_interval()))
    }

    pub fn with_upload_interval(mut self, interval: Duration) -> Self {
        self.upload_interval = interval;
        self
    }

    #[cfg(test)]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn requests(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancels every running download and waits for all request tasks,
    /// including uploads already under way, to finish their cleanup.
    pub async fn shutdown(&self) {
        let cancelled = self.sessions.cancel_all();
        let mut requests = std::mem::take(&mut *self.requests());
        log::info!(
            "🛑 [BOT] Shutting down: {} downloads cancelled, {} requests to wait for",
            cancelled,
            requests.len()
        );

        while let Some(joined) = requests.join_next().await {
            if let Err(e) = joined {
                log::error!("❌ [BOT] Request task ended abnormally: {}", e);
            }
        }
    }

    /// Dispatches one update. File requests are handed to a spawned task so
    /// the caller can keep feeding updates (a cancel, for one) meanwhile.
    pub async fn handle(self: &Arc<Self>, update: Update) -> Result<()> {
        match update {
            Update::Command { user, name } => self.on_command(user, &name).await,
            Update::Callback { user, message, action } => self.on_callback(user, message, &action).await,
            Update::Text { user, text } => {
                if self.sessions.state(user) == Some(ConversationState::WaitingFileUrl) {
                    let handler = self.clone();
                    let mut requests = self.requests();
                    while requests.try_join_next().is_some() {}
                    requests.spawn(async move {
                        if let Err(e) = handler.process_file_request(user, &text).await {
                            log::error!("❌ [BOT] Download/upload error for user {}: {}", user, e);
                        }
                    });
                    Ok(())
                } else {
                    self.on_text(user, &text).await
                }
            }
        }
    }

    async fn on_command(&self, user: u64, name: &str) -> Result<()> {
        match name.trim_start_matches('/') {
            "start" => self.start(user, None).await,
            "stop" => self.stop(user).await,
            "help" => self.reply(user, None, render::HELP, &[Button::new("🔙 Back", CallbackAction::Start)]).await,
            other => {
                log::debug!("🤷 [BOT] Ignoring unknown command /{} from {}", other, user);
                Ok(())
            }
        }
    }

    /// Sends a fresh message, or edits `message` when the update came from a
    /// button on it.
    async fn reply(&self, user: u64, message: Option<MessageId>, text: &str, buttons: &[Button]) -> Result<()> {
        match message {
            Some(id) => self.messenger.edit_text(user, id, text, buttons).await,
            None => self.messenger.send_text(user, text, buttons).await.map(|_| ()),
        }
    }

    async fn start(&self, user: u64, message: Option<MessageId>) -> Result<()> {
        if !self.sessions.is_authorized(user) {
            log::warn!("🚫 [BOT] Unauthorized user {} tried to start a session", user);
            self.messenger.send_text(user, render::UNAUTHORIZED, &[]).await?;
            return Ok(());
        }

        self.sessions.start_session(user)?;
        let buttons = [
            Button::new("❌ Cancel", CallbackAction::Cancel),
            Button::new("ℹ️ Help", CallbackAction::Help),
        ];
        self.reply(user, message, render::WELCOME, &buttons).await
    }

    async fn stop(&self, user: u64) -> Result<()> {
        let text = if self.sessions.end_session(user) {
            render::GOODBYE
        } else {
            render::NO_SESSION
        };
        self.messenger.send_text(user, text, &start_button()).await?;
        Ok(())
    }

    async fn on_text(&self, user: u64, text: &str) -> Result<()> {
        if !self.sessions.is_authorized(user) {
            log::debug!("🚫 [BOT] Ignoring message from unauthorized user {}", user);
            return Ok(());
        }

        match self.sessions.state(user) {
            None => self.start(user, None).await,
            Some(ConversationState::WaitingUsername) => {
                let username = text.trim();
                if self.validator.validate_username(username).is_err() {
                    self.messenger
                        .send_text(user, render::INVALID_USERNAME, &[Button::new("❌ Cancel", CallbackAction::Cancel)])
                        .await?;
                    return Ok(());
                }
                self.sessions.set_username(user, username)?;
                self.messenger.send_text(user, render::ASK_BATCH_NAME, &[]).await?;
                Ok(())
            }
            Some(ConversationState::WaitingBatchName) => {
                self.sessions.set_batch_name(user, text.trim())?;
                self.messenger.send_text(user, render::REQUEST_FORMAT, &[]).await?;
                Ok(())
            }
            Some(ConversationState::WaitingFileUrl) => self.process_file_request(user, text).await,
        }
    }

    /// Runs a `Filename : URL` request from validation through upload.
    pub async fn process_file_request(&self, user: u64, text: &str) -> Result<()> {
        let request = self
            .validator
            .parse_file_request(text)
            .and_then(|(filename, url)| {
                self.validator.validate_url(&url)?;
                Ok((self.validator.sanitize_filename(&filename)?, url))
            });

        let (filename, url) = match request {
            Ok(parsed) => parsed,
            Err(e) => {
                log::info!("⚠️ [BOT] Rejected request from {}: {}", user, e);
                self.messenger.send_text(user, &render::invalid_input(&e.to_string()), &[]).await?;
                return Ok(());
            }
        };

        let (cancel, guard) = self.sessions.begin_download(user).await?;
        log::info!("📥 [BOT] Download {} started for user {}", guard.download_id(), user);
        let encrypted = self.validator.is_encrypted_request(&url);
        let status = self
            .messenger
            .send_text(user, &render::download_started(encrypted), &cancel_download_button())
            .await?;

        let sink = Arc::new(StatusSink {
            messenger: self.messenger.clone(),
            chat: user,
            message: status,
            encrypted,
        });

        let outcome = self
            .pipeline
            .run(DownloadRequest::new(&url, &filename), sink, cancel.clone())
            .await;

        match outcome {
            DownloadOutcome::Cancelled => {
                log::info!("🛑 [BOT] Download {} for user {} was cancelled", guard.download_id(), user);
                self.show_cancelled(user, status).await
            }
            DownloadOutcome::Failure { reason } => {
                self.messenger
                    .edit_text(
                        user,
                        status,
                        &render::failure(&reason),
                        &[Button::new("🔄 Try Again", CallbackAction::Continue)],
                    )
                    .await
            }
            DownloadOutcome::Success { path, metadata } => {
                self.deliver(user, status, &filename, &path, metadata, cancel).await
            }
        }
    }

    async fn deliver(
        &self,
        user: u64,
        status: MessageId,
        filename: &str,
        path: &Path,
        metadata: VideoMetadata,
        cancel: CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            self.remove_delivered(path, metadata.thumbnail.as_deref()).await;
            return self.show_cancelled(user, status).await;
        }

        if let Err(e) = self.messenger.edit_text(user, status, render::UPLOAD_STARTED, &[]).await {
            log::warn!("⚠️ [BOT] Cannot update status message: {}", e);
        }

        let snapshot = self.sessions.snapshot(user);
        let username = snapshot.as_ref().and_then(|s| s.username.clone()).unwrap_or_default();
        let batch_name = snapshot.as_ref().and_then(|s| s.batch_name.clone()).unwrap_or_default();
        let caption = render::caption(filename, &username, &batch_name);

        let upload_sink: Arc<dyn ProgressSink> = Arc::new(UploadSink {
            messenger: self.messenger.clone(),
            chat: user,
            message: status,
        });
        let mut reporter = ProgressReporter::new(upload_sink, self.upload_interval, cancel);
        let mut stats = TransferStats::default();

        let document = DocumentUpload {
            path: path.to_path_buf(),
            caption: caption.clone(),
            thumbnail: metadata.thumbnail.clone(),
        };

        let uploaded = if is_video_file(path) {
            let video = VideoUpload {
                path: path.to_path_buf(),
                caption,
                width: metadata.width,
                height: metadata.height,
                duration: metadata.duration,
                thumbnail: metadata.thumbnail.clone(),
                supports_streaming: true,
            };
            log::info!(
                "🎬 [BOT] Sending video {:?}: {}x{}, {}s",
                path.file_name().unwrap_or_default(),
                video.width,
                video.height,
                video.duration
            );

            let (ticks, rx) = tick_channel();
            let sent = drive(self.messenger.send_video(user, &video, ticks), rx, &mut reporter, &mut stats).await;
            match sent {
                Ok(()) => Ok(()),
                Err(e) => {
                    log::error!("❌ [BOT] Sending as video failed, falling back to document: {}", e);
                    let (ticks, rx) = tick_channel();
                    drive(self.messenger.send_document(user, &document, ticks), rx, &mut reporter, &mut stats).await
                }
            }
        } else {
            let (ticks, rx) = tick_channel();
            drive(self.messenger.send_document(user, &document, ticks), rx, &mut reporter, &mut stats).await
        };

        self.remove_delivered(path, metadata.thumbnail.as_deref()).await;

        if let Err(e) = uploaded {
            log::error!("❌ [BOT] Upload failed for user {}: {}", user, e);
            return self
                .messenger
                .edit_text(
                    user,
                    status,
                    &render::upload_failure(&e.to_string()),
                    &[Button::new("🔄 Try Again", CallbackAction::Continue)],
                )
                .await;
        }

        log::info!("✅ [BOT] Delivered {:?} to user {}", path.file_name().unwrap_or_default(), user);
        if let Err(e) = self.messenger.delete_message(user, status).await {
            log::error!("⚠️ [BOT] Error deleting status message: {}", e);
        }

        let buttons = [
            Button::new("✅ Yes", CallbackAction::Continue),
            Button::new("❌ No", CallbackAction::Stop),
        ];
        self.messenger.send_text(user, render::UPLOAD_DONE, &buttons).await?;
        Ok(())
    }

    async fn show_cancelled(&self, user: u64, status: MessageId) -> Result<()> {
        self.messenger
            .edit_text(user, status, render::DOWNLOAD_CANCELLED, &start_button())
            .await
    }

    async fn remove_delivered(&self, path: &Path, thumbnail: Option<&Path>) {
        for file in std::iter::once(path).chain(thumbnail) {
            match remove_if_exists(file).await {
                Ok(true) => log::info!("🗑️ [BOT] Removed {:?}", file),
                Ok(false) => {}
                Err(e) => log::warn!("⚠️ [BOT] Cannot remove {:?}: {}", file, e),
            }
        }
    }

    async fn on_callback(&self, user: u64, message: Option<MessageId>, action: &str) -> Result<()> {
        if !self.sessions.is_authorized(user) {
            return Ok(());
        }

        let action = match action.parse::<CallbackAction>() {
            Ok(action) => action,
            Err(e) => {
                log::warn!("⚠️ [BOT] {}", e);
                return Ok(());
            }
        };

        match action {
            CallbackAction::Cancel => {
                self.sessions.end_session(user);
                self.reply(user, message, render::OPERATION_CANCELLED, &start_button()).await
            }
            CallbackAction::CancelDownload => {
                // A running request answers on its own status message.
                if self.sessions.cancel_download(user) || self.sessions.state(user).is_none() {
                    return Ok(());
                }
                self.reply(user, message, render::DOWNLOAD_CANCELLED, &start_button()).await
            }
            CallbackAction::Start => self.start(user, message).await,
            CallbackAction::Continue => {
                if self.sessions.resume_requests(user) {
                    self.reply(user, message, render::REQUEST_FORMAT, &[]).await
                } else {
                    Ok(())
                }
            }
            CallbackAction::Stop => {
                self.sessions.end_session(user);
                self.reply(user, message, render::GOODBYE, &start_button()).await
            }
            CallbackAction::Help => {
                self.reply(user, message, render::HELP, &[Button::new("🔙 Back", CallbackAction::Start)])
                    .await
            }
        }
    }
}
