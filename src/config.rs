//! Credential and backend configuration.
//!
//! The API key is resolved once when the process starts and then passed
//! explicitly into the backend builder. Nothing in the library reads the
//! environment at call time.

use crate::error::{Result, StudioError};
use std::fmt;
use std::time::Duration;

/// Environment variables consulted for the API key, in order.
pub const API_KEY_ENV_VARS: [&str; 3] = ["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Default Gemini API base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default timeout for a single remote call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// An API credential. The value never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wraps an explicit key, rejecting blank values.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(StudioError::Auth("API key is empty".into()));
        }
        Ok(Self(key))
    }

    /// Resolves the key from the first set variable in [`API_KEY_ENV_VARS`].
    pub fn from_env() -> Result<Self> {
        Self::resolve(None, |name| std::env::var(name).ok())
    }

    /// Resolves an explicit key first, then the environment via `lookup`.
    pub fn resolve(
        explicit: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        if let Some(key) = explicit.filter(|k| !k.trim().is_empty()) {
            return Ok(Self(key));
        }
        API_KEY_ENV_VARS
            .iter()
            .find_map(|name| lookup(name).filter(|k| !k.trim().is_empty()))
            .map(Self)
            .ok_or_else(|| {
                StudioError::Auth(format!(
                    "no API key provided; set one of {}",
                    API_KEY_ENV_VARS.join(", ")
                ))
            })
    }

    /// Returns the raw key for use in request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Settings for the remote backend.
#[derive(Debug, Clone)]
pub struct StudioConfig {
    /// Credential sent with every request.
    pub api_key: ApiKey,
    /// Model used to expand ideas into prompts.
    pub text_model: Option<String>,
    /// Model used to compose images.
    pub image_model: Option<String>,
    /// API base URL.
    pub base_url: String,
    /// Timeout for each remote call.
    pub request_timeout: Duration,
}

impl StudioConfig {
    /// Creates a config with default models and endpoint.
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_key,
            text_model: None,
            image_model: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_explicit_key_wins() {
        let vars = env(&[("GEMINI_API_KEY", "from-env")]);
        let key = ApiKey::resolve(Some("explicit".into()), |n| vars.get(n).cloned()).unwrap();
        assert_eq!(key.expose(), "explicit");
    }

    #[test]
    fn test_env_precedence() {
        let vars = env(&[("API_KEY", "legacy"), ("GOOGLE_API_KEY", "google")]);
        let key = ApiKey::resolve(None, |n| vars.get(n).cloned()).unwrap();
        assert_eq!(key.expose(), "google");
    }

    #[test]
    fn test_blank_values_are_skipped() {
        let vars = env(&[("GEMINI_API_KEY", "  "), ("API_KEY", "legacy")]);
        let key = ApiKey::resolve(Some(String::new()), |n| vars.get(n).cloned()).unwrap();
        assert_eq!(key.expose(), "legacy");
    }

    #[test]
    fn test_missing_key_is_auth_error() {
        let err = ApiKey::resolve(None, |_| None).unwrap_err();
        assert!(matches!(err, StudioError::Auth(_)));
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_debug_hides_key() {
        let key = ApiKey::new("secret").unwrap();
        assert_eq!(format!("{:?}", key), "ApiKey(***)");
        assert!(ApiKey::new(" ").is_err());
    }
}
