//! Shared helpers for the HTTP-backed adapters.

use ny_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeouts map to [`Error::Timeout`]; everything else to [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Read a secret from the environment variable named in config.
///
/// `None` means the endpoint needs no credential. A named variable that is
/// unset is a configuration error, surfaced when the adapter is built.
pub fn resolve_env_secret(var: Option<&str>) -> Result<Option<String>> {
    let Some(var) = var else {
        return Ok(None);
    };
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value)),
        _ => Err(Error::Config(format!(
            "environment variable '{var}' not set or empty"
        ))),
    }
}
