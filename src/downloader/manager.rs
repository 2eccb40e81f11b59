use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use crate::config::AppConfig;
use crate::downloader::CancellationToken;
use crate::errors::{AppError, Result};
use crate::utils::generate_download_id;

/// Where a user is in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationState {
    WaitingUsername,
    WaitingBatchName,
    WaitingFileUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConversationState,
    pub username: Option<String>,
    pub batch_name: Option<String>,
    pub downloading: bool,
}

struct ActiveDownload {
    id: String,
    cancel: CancellationToken,
    /// Closes when the owning guard is dropped.
    released: watch::Receiver<()>,
}

struct Session {
    state: ConversationState,
    username: Option<String>,
    batch_name: Option<String>,
    active: Option<ActiveDownload>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: ConversationState::WaitingUsername,
            username: None,
            batch_name: None,
            active: None,
        }
    }
}

type SessionMap = Arc<Mutex<HashMap<u64, Session>>>;

fn lock(sessions: &SessionMap) -> MutexGuard<'_, HashMap<u64, Session>> {
    sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held by a running download. Dropping it marks the download finished,
/// which unblocks a successor waiting in [`SessionStore::begin_download`].
pub struct DownloadGuard {
    user_id: u64,
    download_id: String,
    _released: watch::Sender<()>,
    sessions: SessionMap,
}

impl DownloadGuard {
    pub fn download_id(&self) -> &str {
        &self.download_id
    }
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        let mut sessions = lock(&self.sessions);
        if let Some(session) = sessions.get_mut(&self.user_id) {
            if session.active.as_ref().map(|a| a.id.as_str()) == Some(self.download_id.as_str()) {
                session.active = None;
            }
        }
    }
}

/// Per-user conversation state and the single download each user may run.
/// The lock is never held across an await.
pub struct SessionStore {
    sessions: SessionMap,
    authorized: HashSet<u64>,
}

impl SessionStore {
    pub fn new(authorized: impl IntoIterator<Item = u64>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            authorized: authorized.into_iter().collect(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.authorized_ids())
    }

    pub fn is_authorized(&self, user_id: u64) -> bool {
        self.authorized.contains(&user_id)
    }

    /// (Re)starts the conversation at the username step. A download that is
    /// already running keeps running.
    pub fn start_session(&self, user_id: u64) -> Result<()> {
        if !self.is_authorized(user_id) {
            return Err(AppError::Unauthorized(user_id));
        }

        let mut sessions = lock(&self.sessions);
        let session = sessions.entry(user_id).or_insert_with(Session::new);
        session.state = ConversationState::WaitingUsername;
        session.username = None;
        session.batch_name = None;
        log::info!("👤 [SESSION] Session started for user {}", user_id);
        Ok(())
    }

    /// Cancels any running download and forgets the user. Returns whether a
    /// session existed.
    pub fn end_session(&self, user_id: u64) -> bool {
        let removed = lock(&self.sessions).remove(&user_id);
        match removed {
            Some(session) => {
                if let Some(active) = session.active {
                    active.cancel.cancel();
                }
                log::info!("👋 [SESSION] Session ended for user {}", user_id);
                true
            }
            None => false,
        }
    }

    pub fn state(&self, user_id: u64) -> Option<ConversationState> {
        lock(&self.sessions).get(&user_id).map(|s| s.state)
    }

    pub fn snapshot(&self, user_id: u64) -> Option<SessionSnapshot> {
        lock(&self.sessions).get(&user_id).map(|s| SessionSnapshot {
            state: s.state,
            username: s.username.clone(),
            batch_name: s.batch_name.clone(),
            downloading: s.active.is_some(),
        })
    }

    pub fn set_username(&self, user_id: u64, username: &str) -> Result<()> {
        self.advance(user_id, ConversationState::WaitingUsername, |session| {
            session.username = Some(username.to_string());
            session.state = ConversationState::WaitingBatchName;
        })
    }

    pub fn set_batch_name(&self, user_id: u64, batch_name: &str) -> Result<()> {
        self.advance(user_id, ConversationState::WaitingBatchName, |session| {
            session.batch_name = Some(batch_name.to_string());
            session.state = ConversationState::WaitingFileUrl;
        })
    }

    /// Back to waiting for a file request, e.g. after "Try Again".
    pub fn resume_requests(&self, user_id: u64) -> bool {
        let mut sessions = lock(&self.sessions);
        match sessions.get_mut(&user_id) {
            Some(session) => {
                session.state = ConversationState::WaitingFileUrl;
                true
            }
            None => false,
        }
    }

    fn advance<F>(&self, user_id: u64, expected: ConversationState, update: F) -> Result<()>
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(&user_id)
            .ok_or_else(|| AppError::Session(format!("no session for user {}", user_id)))?;

        if session.state != expected {
            return Err(AppError::Session(format!(
                "expected {:?}, session is in {:?}",
                expected, session.state
            )));
        }

        update(session);
        Ok(())
    }

    /// Registers a new download for the user. Any previous download is
    /// cancelled first and this waits until its guard has been dropped, so two
    /// downloads never overlap for one user.
    pub async fn begin_download(&self, user_id: u64) -> Result<(CancellationToken, DownloadGuard)> {
        loop {
            let mut previous = {
                let mut sessions = lock(&self.sessions);
                let session = sessions
                    .get_mut(&user_id)
                    .ok_or_else(|| AppError::Session(format!("no session for user {}", user_id)))?;

                let running = session.active.as_ref().map(|active| {
                    active.cancel.cancel();
                    active.released.clone()
                });

                match running {
                    Some(released) => released,
                    None => {
                        let cancel = CancellationToken::new();
                        let (released, released_rx) = watch::channel(());
                        let download_id = generate_download_id();
                        session.active = Some(ActiveDownload {
                            id: download_id.clone(),
                            cancel: cancel.clone(),
                            released: released_rx,
                        });
                        log::info!("⬇️ [SESSION] Download {} registered for user {}", download_id, user_id);

                        return Ok((
                            cancel,
                            DownloadGuard {
                                user_id,
                                download_id,
                                _released: released,
                                sessions: self.sessions.clone(),
                            },
                        ));
                    }
                }
            };

            log::info!("⏳ [SESSION] Waiting for previous download of user {} to wind down", user_id);
            // Only ever errors, once the sender in the old guard is gone.
            while previous.changed().await.is_ok() {}
        }
    }

    /// Flags the user's running download as cancelled. Returns whether there
    /// was one.
    pub fn cancel_download(&self, user_id: u64) -> bool {
        let sessions = lock(&self.sessions);
        match sessions.get(&user_id).and_then(|s| s.active.as_ref()) {
            Some(active) => {
                active.cancel.cancel();
                log::info!("🛑 [SESSION] User {} cancelled download {}", user_id, active.id);
                true
            }
            None => false,
        }
    }

    /// Cancels every running download, e.g. on shutdown. Returns how many
    /// were running.
    pub fn cancel_all(&self) -> usize {
        let sessions = lock(&self.sessions);
        let mut cancelled = 0;
        for (user_id, active) in sessions.iter().filter_map(|(id, s)| s.active.as_ref().map(|a| (id, a))) {
            active.cancel.cancel();
            log::info!("🛑 [SESSION] Cancelled download {} of user {}", active.id, user_id);
            cancelled += 1;
        }
        cancelled
    }

    #[cfg(test)]
    pub fn is_downloading(&self, user_id: u64) -> bool {
        lock(&self.sessions)
            .get(&user_id)
            .map(|s| s.active.is_some())
            .unwrap_or(false)
    }
}
