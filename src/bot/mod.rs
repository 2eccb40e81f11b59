pub mod console;
pub mod handler;
pub mod render;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use crate::downloader::TickSender;
use crate::errors::{AppError, Result};

pub use handler::BotHandler;

/// Extensions the chat client can play inline. Wider than what the pipeline
/// picks as a download container.
pub const UPLOAD_VIDEO_EXTENSIONS: [&str; 9] =
    ["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "3gp"];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| UPLOAD_VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What an inline button asks the bot to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Cancel,
    CancelDownload,
    Continue,
    Stop,
    Help,
    Start,
}

impl CallbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackAction::Cancel => "cancel",
            CallbackAction::CancelDownload => "cancel_download",
            CallbackAction::Continue => "continue",
            CallbackAction::Stop => "stop",
            CallbackAction::Help => "help",
            CallbackAction::Start => "start",
        }
    }
}

impl FromStr for CallbackAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "cancel" => Ok(CallbackAction::Cancel),
            "cancel_download" => Ok(CallbackAction::CancelDownload),
            "continue" => Ok(CallbackAction::Continue),
            "stop" => Ok(CallbackAction::Stop),
            "help" => Ok(CallbackAction::Help),
            "start" => Ok(CallbackAction::Start),
            other => Err(AppError::Validation(format!("Unknown action: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: CallbackAction,
}

impl Button {
    pub fn new(label: impl Into<String>, action: CallbackAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// Incoming event from a chat.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Command { user: u64, name: String },
    Text { user: u64, text: String },
    Callback { user: u64, message: Option<MessageId>, action: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoUpload {
    pub path: PathBuf,
    pub caption: String,
    pub width: u32,
    pub height: u32,
    pub duration: u64,
    pub thumbnail: Option<PathBuf>,
    pub supports_streaming: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentUpload {
    pub path: PathBuf,
    pub caption: String,
    pub thumbnail: Option<PathBuf>,
}

/// Messaging client boundary. Chats are addressed by user id. Uploads report
/// `(bytes_sent, total)` through `progress`.
#[async_trait::async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat: u64, text: &str, buttons: &[Button]) -> Result<MessageId>;

    async fn edit_text(&self, chat: u64, message: MessageId, text: &str, buttons: &[Button]) -> Result<()>;

    async fn delete_message(&self, chat: u64, message: MessageId) -> Result<()>;

    async fn send_video(&self, chat: u64, video: &VideoUpload, progress: TickSender) -> Result<()>;

    async fn send_document(&self, chat: u64, document: &DocumentUpload, progress: TickSender) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_detection_is_case_insensitive() {
        assert!(is_video_file(Path::new("a/b.MP4")));
        assert!(is_video_file(Path::new("clip.3gp")));
        assert!(!is_video_file(Path::new("notes.pdf")));
        assert!(!is_video_file(Path::new("noext")));
    }

    #[test]
    fn actions_round_trip_through_their_wire_names() {
        for action in [
            CallbackAction::Cancel,
            CallbackAction::CancelDownload,
            CallbackAction::Continue,
            CallbackAction::Stop,
            CallbackAction::Help,
            CallbackAction::Start,
        ] {
            assert_eq!(action.as_str().parse::<CallbackAction>().unwrap(), action);
        }
        assert!("explode".parse::<CallbackAction>().is_err());
    }
}
