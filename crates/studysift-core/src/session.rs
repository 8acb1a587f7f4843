use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SiftError};

/// Path of the OAuth handoff page, relative to the backend base URL.
pub const GOOGLE_LOGIN_PATH: &str = "accounts/google/login/";

/// What gets persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub google_linked: bool,
}

/// Persistent storage behind the session.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredSession>>;
    fn save(&self, session: &StoredSession) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// TOML file in the user config directory, readable only by its owner.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let session: StoredSession = toml::from_str(&content).map_err(|e| {
            SiftError::Config(format!(
                "corrupt session file {}: {e}",
                self.path.display()
            ))
        })?;
        if session.access_token.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(session))
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(session)
            .map_err(|e| SiftError::Config(format!("failed to serialize session: {e}")))?;
        write_private(&self.path, content.as_bytes())?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on create
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(bytes)
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

/// In-process store, used by tests and embedders that manage tokens themselves.
#[derive(Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<StoredSession>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: StoredSession) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<StoredSession>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        Ok(self.slot().clone())
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        *self.slot() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub is_authenticated: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub google_linked: bool,
}

impl From<Option<StoredSession>> for Session {
    fn from(stored: Option<StoredSession>) -> Self {
        match stored {
            Some(s) => Self {
                is_authenticated: true,
                access_token: Some(s.access_token),
                refresh_token: s.refresh_token,
                google_linked: s.google_linked,
            },
            None => Self::default(),
        }
    }
}

/// Holds the authenticated state for every other component.
///
/// Built once and shared as `Arc<SessionService>`. State changes are written to
/// the store first; if that fails the in-memory state is left as it was.
pub struct SessionService {
    store: Box<dyn TokenStore>,
    state: Mutex<Session>,
}

impl SessionService {
    /// Read the initial state from `store`. An unreadable store counts as
    /// logged out.
    pub fn new(store: Box<dyn TokenStore>) -> Self {
        let initial = match store.load() {
            Ok(stored) => Session::from(stored),
            Err(e) => {
                tracing::warn!("ignoring unreadable session: {e}");
                Session::default()
            }
        };
        Self {
            store,
            state: Mutex::new(initial),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryTokenStore::new()))
    }

    fn state(&self) -> MutexGuard<'_, Session> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, stored: StoredSession) -> Result<()> {
        let mut state = self.state();
        self.store.save(&stored)?;
        *state = Session::from(Some(stored));
        Ok(())
    }

    /// Store an access token and mark the session authenticated.
    pub fn login(&self, token: &str) -> Result<()> {
        self.login_with_tokens(token, None)
    }

    /// Store the pair returned by the credential exchange.
    pub fn login_with_tokens(&self, access: &str, refresh: Option<&str>) -> Result<()> {
        let access = access.trim();
        if access.is_empty() {
            return Err(SiftError::InvalidInput("access token is empty".into()));
        }
        self.persist(StoredSession {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            google_linked: false,
        })?;
        tracing::debug!("session started");
        Ok(())
    }

    /// Finish the Google handoff from the callback URL the backend redirected to.
    ///
    /// Accepts a full URL or just its query string. Without an `access_token`
    /// parameter the session is left untouched.
    pub fn complete_oauth(&self, callback: &str) -> Result<()> {
        let token = access_token_from_callback(callback)?;
        self.persist(StoredSession {
            access_token: token,
            refresh_token: None,
            google_linked: true,
        })?;
        tracing::debug!("session started from Google handoff");
        Ok(())
    }

    /// Clear storage and mark the session logged out.
    pub fn logout(&self) -> Result<()> {
        let mut state = self.state();
        self.store.clear()?;
        *state = Session::default();
        tracing::debug!("session cleared");
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated
    }

    pub fn access_token(&self) -> Option<String> {
        self.state().access_token.clone()
    }

    pub fn is_google_linked(&self) -> bool {
        self.state().google_linked
    }

    pub fn snapshot(&self) -> Session {
        self.state().clone()
    }
}

fn access_token_from_callback(callback: &str) -> Result<String> {
    let trimmed = callback.trim();
    let url = match Url::parse(trimmed) {
        Ok(u) => u,
        Err(_) => {
            let query = trimmed.trim_start_matches('?');
            Url::parse(&format!("http://callback.invalid/?{query}"))
                .map_err(|e| SiftError::InvalidInput(format!("bad callback URL: {e}")))?
        }
    };
    url.query_pairs()
        .find(|(k, _)| k == "access_token")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            SiftError::Unauthorized("OAuth callback did not include an access token".into())
        })
}

/// Address the user opens in a browser to start the Google handoff.
pub fn google_login_url(base_url: &str) -> Result<Url> {
    let mut base = Url::parse(base_url)
        .map_err(|e| SiftError::Config(format!("invalid backend URL '{base_url}': {e}")))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(GOOGLE_LOGIN_PATH)
        .map_err(|e| SiftError::Config(e.to_string()))
}
