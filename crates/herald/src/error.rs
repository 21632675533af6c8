//! Failure taxonomy.
//!
//! Providers fail with a [`StepError`]: either a declared [`ProviderError`],
//! which the engine demotes to a warning so sibling providers still run, or a
//! fatal `anyhow::Error` that aborts the run.

use std::io;
use std::path::PathBuf;

use herald_types::Stage;

/// Declared provider failure.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Bad transition, missing key or credential. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Timeouts and 408/429/5xx responses.
    #[error("transient remote failure: {0}")]
    TransientRemote(String),
    /// Other 4xx responses, authentication failures.
    #[error("remote rejected request: {0}")]
    PermanentRemote(String),
    /// Local disk failure or a stream that can no longer be replayed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error(
        "staging repository {repository_id} did not reach {stage} after {checks} check(s); it was left in place"
    )]
    StateTimeout {
        repository_id: String,
        stage: Stage,
        checks: u32,
    },
}

impl ProviderError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        ProviderError::Io {
            context: context.into(),
            source,
        }
    }

    /// Only transient remote failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::TransientRemote(_))
    }
}

/// Failure of a provider's `execute`.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Declared(#[from] ProviderError),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// Failure of the signing stage.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("signing configuration error: {0}")]
    Configuration(String),
    #[error("no signing-capable key{} in keyring {}", key_id.as_deref().map(|id| format!(" '{id}'")).unwrap_or_default(), keyring.display())]
    KeyNotFound {
        keyring: PathBuf,
        key_id: Option<String>,
    },
    #[error("failed to unlock key '{key_id}': {reason}")]
    DecryptionFailed { key_id: String, reason: String },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SigningError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SigningError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by a lifecycle listener. Logged and otherwise ignored.
#[derive(Debug, thiserror::Error)]
#[error("listener {listener} failed: {message}")]
pub struct ListenerError {
    pub listener: String,
    pub message: String,
}

impl ListenerError {
    pub fn new(listener: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            listener: listener.into(),
            message: message.into(),
        }
    }
}
