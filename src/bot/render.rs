//! Chat texts. Everything the user reads is built here so the handler only
//! deals with flow.

use crate::downloader::DownloadProgress;
use crate::utils::{format_eta, format_size, progress_bar};

pub const WELCOME: &str = "🌟 Welcome to URL Uploader Bot! 🌟\n\n\
This bot downloads files from links and uploads them back to you.\n\n\
Features:\n\
• Videos, PDFs and images\n\
• Live download and upload progress\n\
• Decryption of protected video links\n\
• Video uploads with thumbnails\n\n\
Let's get started! Please send your @username to continue.";

pub const UNAUTHORIZED: &str = "⚠️ You are not authorized to use this bot.\n\
Please contact the administrator for access.";

pub const INVALID_USERNAME: &str = "⚠️ Invalid username format!\n\
Please send a username starting with @";

pub const ASK_BATCH_NAME: &str = "📝 Please send a batch name for your files:\n\n\
Example: URL Uploader 2024";

pub const REQUEST_FORMAT: &str = "📝 Send the file details as:\n\n\
Filename : URL\n\n\
Examples:\n\
My Video : https://example.com/video.mp4\n\
Encrypted Video : https://example.com/video.mkv*12345\n\n\
Use /stop to end the session at any time.";

pub const INVALID_REQUEST: &str = "⚠️ Invalid format!\n\n\
Use: Filename : URL\n\
For encrypted videos: Filename : URL.mkv*key";

pub const GOODBYE: &str = "👋 Thank you for using URL Uploader Bot!\n\n\
Send /start to begin a new session.";

pub const NO_SESSION: &str = "❌ No active session found.\n\n\
Send /start to begin a new session.";

pub const OPERATION_CANCELLED: &str = "❌ Operation cancelled.\n\n\
Send /start to begin a new session.";

pub const DOWNLOAD_CANCELLED: &str = "❌ Download cancelled.\n\n\
Send /start to begin a new session.";

pub const UPLOAD_STARTED: &str = "📤 Uploading...\n\nPlease wait while your file is uploaded.";

pub const UPLOAD_DONE: &str = "✅ File uploaded successfully!\n\n\
Would you like to download another file?";

pub const HELP: &str = "ℹ️ Help\n\n\
Commands:\n\
/start - Start a session\n\
/stop - End the current session\n\n\
Link formats:\n\
- Regular files: Filename : https://example.com/video.mp4\n\
- Encrypted videos: Filename : https://example.com/video.mkv*decryption_key\n\n\
Files are re-uploaded with live progress. Videos get a thumbnail and are\n\
streamable; everything else arrives as a document.";

fn phase_prefix(encrypted: bool) -> &'static str {
    if encrypted {
        "🔐 Decrypting & "
    } else {
        ""
    }
}

pub fn download_started(encrypted: bool) -> String {
    format!(
        "{}Download started....\n\n{}\n\n\
         ╭━━━━❰ progress ❱━➣\n\
         ┣⪼ 🗃️ Size: Waiting...\n\
         ┣⪼ ⏳️ Done: 0%\n\
         ┣⪼ 🚀 Speed: Calculating...\n\
         ┣⪼ ⏰️ ETA: Calculating...\n\
         ╰━━━━━━━━━━━━━━━➣",
        phase_prefix(encrypted),
        progress_bar(0.0)
    )
}

/// Download progress card. An unknown total renders as indeterminate rather
/// than a made-up percentage.
pub fn download_status(tick: &DownloadProgress, encrypted: bool) -> String {
    let speed = match tick.speed_bytes_per_sec {
        Some(speed) if speed > 0.0 => format!("{}/s", format_size(speed as u64)),
        _ => "Calculating...".to_string(),
    };

    let (bar, size, done) = match tick.percent() {
        Some(pct) => (
            progress_bar(pct),
            format!("{} / {}", format_size(tick.downloaded_bytes), format_size(tick.total_bytes)),
            format!("{:.1}%", pct),
        ),
        None => (
            progress_bar(0.0),
            format!("{} / Unknown", format_size(tick.downloaded_bytes)),
            "Unknown".to_string(),
        ),
    };

    format!(
        "{}Downloading....\n\n{}\n\n\
         ╭━━━━❰ progress ❱━➣\n\
         ┣⪼ 🗃️ Size: {}\n\
         ┣⪼ ⏳️ Done: {}\n\
         ┣⪼ 🚀 Speed: {}\n\
         ┣⪼ ⏰️ ETA: {}\n\
         ╰━━━━━━━━━━━━━━━➣",
        phase_prefix(encrypted),
        bar,
        size,
        done,
        speed,
        format_eta(tick.eta_secs)
    )
}

pub fn upload_status(tick: &DownloadProgress) -> String {
    let pct = tick.percent().unwrap_or(0.0);
    format!(
        "📤 Uploading....\n\n{}\n\n\
         ╭━━━━❰ progress ❱━➣\n\
         ┣⪼ 🗃️ Size: {} / {}\n\
         ┣⪼ ⏳️ Done: {:.1}%\n\
         ╰━━━━━━━━━━━━━━━➣",
        progress_bar(pct),
        format_size(tick.downloaded_bytes),
        format_size(tick.total_bytes),
        pct
    )
}

pub fn failure(reason: &str) -> String {
    format!(
        "❌ Download failed!\n\nError: {}\n\n\
         Please try again or contact support if the problem persists.",
        reason
    )
}

pub fn upload_failure(reason: &str) -> String {
    format!(
        "❌ An error occurred!\n\nError: {}\n\n\
         Please try again or contact support if the problem persists.",
        reason
    )
}

pub fn invalid_input(reason: &str) -> String {
    format!("⚠️ {}\n\n{}", reason, INVALID_REQUEST)
}

pub fn caption(filename: &str, username: &str, batch_name: &str) -> String {
    format!(
        "➖➖➖➖➖➖➖➖➖➖\n\
         📂 File Details\n\
         ➖➖➖➖➖➖➖➖➖➖\n\
         📝 File Name: {}\n\
         👤 Downloaded By: {}\n\
         🎯 Batch: {}\n\
         ⚡ Status: ✅ Successfully Processed\n\
         ➖➖➖➖➖➖➖➖➖➖",
        filename, username, batch_name
    )
}
