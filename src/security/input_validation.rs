use crate::errors::{AppError, Result};
use crate::downloader::{KEY_DELIMITER, VIDEO_EXTENSIONS};
use url::Url;

const MAX_FILENAME_LEN: usize = 200;

/// Checks user-supplied `Filename : URL` requests before anything touches the
/// network or the download directory.
pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    /// Splits `Filename : URL` on the first colon. The URL keeps its own
    /// colons (`https://...`) because only the first one is a separator.
    pub fn parse_file_request(&self, text: &str) -> Result<(String, String)> {
        let (filename, url) = text
            .split_once(':')
            .ok_or_else(|| AppError::Validation("Expected the format `Filename : URL`".to_string()))?;

        let filename = filename.trim();
        let url = url.trim();
        if filename.is_empty() || url.is_empty() {
            return Err(AppError::Validation("Please provide both filename and URL".to_string()));
        }

        Ok((filename.to_string(), url.to_string()))
    }

    /// Validates the fetchable part of a URL (anything after `*` is a key).
    pub fn validate_url(&self, url: &str) -> Result<()> {
        let fetch_url = url.split(KEY_DELIMITER).next().unwrap_or_default();
        if fetch_url.is_empty() {
            return Err(AppError::Validation("URL cannot be empty".to_string()));
        }

        let parsed_url = Url::parse(fetch_url)
            .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

        if !matches!(parsed_url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Unsupported scheme: {}",
                parsed_url.scheme()
            )));
        }

        if parsed_url.host_str().is_none() {
            return Err(AppError::Validation("URL must have a host".to_string()));
        }

        Ok(())
    }

    /// An encrypted request carries a `*key` suffix and names a video container.
    pub fn is_encrypted_request(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        lower.contains(KEY_DELIMITER)
            && VIDEO_EXTENSIONS.iter().any(|ext| lower.contains(&format!(".{}", ext)))
    }

    pub fn sanitize_filename(&self, filename: &str) -> Result<String> {
        if filename.is_empty() {
            return Err(AppError::Validation("Filename cannot be empty".to_string()));
        }

        let sanitized = filename
            .chars()
            .map(|c| match c {
                '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\\' | '/' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect::<String>();

        // Remove leading/trailing dots and spaces
        let sanitized = sanitized.trim_matches(|c: char| c == '.' || c.is_whitespace());

        if sanitized.is_empty() {
            return Err(AppError::Validation("Filename becomes empty after sanitization".to_string()));
        }

        Ok(sanitized.chars().take(MAX_FILENAME_LEN).collect())
    }

    pub fn validate_username(&self, username: &str) -> Result<()> {
        let username = username.trim();
        if !username.starts_with('@') || username.len() < 2 {
            return Err(AppError::Validation(
                "Username must start with @".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}
