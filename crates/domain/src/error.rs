/// Shared error type used across all noney crates.
///
/// A missing thread, checkpoint or message is never an error: lookups
/// return `Ok(None)` and callers start fresh.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// A storage backend call failed. Not retried locally.
    #[error("store: {0}")]
    Store(String),

    /// Stored or incoming data violates an invariant (bad segment index,
    /// dangling parent checkpoint, unknown interrupt id, ...).
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// A checkpoint or message payload could not be serialized. Aborts
    /// the current request.
    #[error("serialization: {0}")]
    Serialization(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the failure came from an unreliable dependency and the whole
    /// request may be retried by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::Timeout(_) | Error::Http(_) | Error::Io(_)
        )
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
