//! Error types for the opt-out core.

use thiserror::Error;

#[derive(Debug, Error)]
/// Errors raised while extracting, executing or recording an opt-out.
pub enum OptOutError {
    /// Message content could not be scanned. Treated as "no signal".
    #[error("extraction error: {0}")]
    Extraction(String),
    /// Network, DNS or HTTP-level failure while reaching the target.
    #[error("transport error: {0}")]
    Transport(String),
    /// The attempt exceeded the configured bound.
    #[error("timeout")]
    Timeout,
    /// The page loaded but no confirmation could be detected.
    #[error("no confirmation detected")]
    ConfirmationNotFound,
    /// Appending to the history store failed.
    #[error("history write failed: {0}")]
    StorageWrite(#[from] std::io::Error),
    /// A browser session could not be started at all.
    #[error("browser unavailable: {0}")]
    BrowserUnavailable(String),
}

impl OptOutError {
    /// Only a missing browser aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OptOutError::BrowserUnavailable(_))
    }

    /// Reason string stored alongside a failed attempt.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for OptOutError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OptOutError::Timeout
        } else {
            OptOutError::Transport(e.to_string())
        }
    }
}

impl From<chromiumoxide::error::CdpError> for OptOutError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        match e {
            chromiumoxide::error::CdpError::Timeout => OptOutError::Timeout,
            other => OptOutError::Transport(other.to_string()),
        }
    }
}

/// Result type for opt-out core operations.
pub type Result<T> = std::result::Result<T, OptOutError>;
