//! Shared utility functions for provider adapters.

use bk_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Read the API key named by `api_key_env`.
///
/// No variable configured means an unauthenticated endpoint (local model
/// servers); a configured but unset variable is an error.
pub(crate) fn resolve_api_key(api_key_env: Option<&str>) -> Result<Option<String>> {
    let Some(var) = api_key_env else {
        return Ok(None);
    };
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(Some(v)),
        _ => Err(Error::Auth(format!(
            "environment variable '{var}' not set or empty"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_env_means_no_key() {
        assert_eq!(resolve_api_key(None).unwrap(), None);
    }

    #[test]
    fn reads_env_var() {
        let var = "BK_TEST_PROVIDER_KEY_4411";
        std::env::set_var(var, "sk-test");
        assert_eq!(resolve_api_key(Some(var)).unwrap().as_deref(), Some("sk-test"));
        std::env::remove_var(var);
    }

    #[test]
    fn missing_env_var_is_an_error() {
        let err = resolve_api_key(Some("BK_TEST_MISSING_KEY_9090")).unwrap_err();
        assert!(err.to_string().contains("BK_TEST_MISSING_KEY_9090"));
    }
}
