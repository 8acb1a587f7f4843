use thiserror::Error;

#[derive(Debug, Error)]
pub enum SiftError {
    #[error("Not authenticated: {0}")]
    Unauthorized(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Server returned {status}: {detail}")]
    Remote { status: u16, detail: String },

    #[error("Connection error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Google Calendar is not linked: {0}")]
    CalendarNotLinked(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl SiftError {
    /// Returns `true` when the caller should send the user back to login.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// The message a front-end shows inline. For remote errors this is the
    /// server-provided detail on its own, without the status prefix.
    pub fn user_message(&self) -> String {
        match self {
            Self::Remote { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }

    /// HTTP status for remote errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Pull the most useful message out of an error response body.
///
/// Looks at `detail`, `message` and `error` in that order; otherwise falls back
/// to the JSON body re-serialized, then the raw text, then `HTTP <status>`.
pub fn remote_detail(status: u16, body: &str) -> String {
    remote_detail_by(status, body, &DETAIL_KEYS)
}

/// Error body keys in the order most endpoints fill them.
pub const DETAIL_KEYS: [&str; 3] = ["detail", "message", "error"];

/// The calendar export endpoint reports its reason under `message` first.
pub const EXPORT_DETAIL_KEYS: [&str; 3] = ["message", "detail", "error"];

/// Like [`remote_detail`], checking `keys` in the given order.
pub fn remote_detail_by(status: u16, body: &str, keys: &[&str]) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {status}");
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => {
            for key in keys {
                if let Some(s) = value.get(key).and_then(|v| v.as_str()) {
                    return s.to_string();
                }
            }
            value.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, SiftError>;
