//! Error types for prompt expansion and image composition.

use std::time::Duration;

/// Longest remote error message kept verbatim before truncation.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while expanding prompts or composing images.
#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    /// Inputs are not ready for the requested action (empty idea, no images,
    /// empty prompt). Raised before any remote call.
    #[error("{0}")]
    Validation(String),

    /// Another remote operation is still running.
    #[error("an operation is already in progress")]
    Busy,

    /// API key missing or rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limit exceeded.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Content was blocked by safety filters.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The composition response carried no inline image.
    #[error("no image was generated by the API")]
    NoImageInResponse,

    /// The response was well-formed but not what we asked for.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// Failed to read or encode an input image.
    #[error("failed to encode image: {0}")]
    Encode(String),

    /// I/O error (e.g., reading an input or saving a result).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StudioError {
    /// Returns the remote failure's own message text, if it carries one.
    ///
    /// Used when surfacing an error to the user: a `None` here means the
    /// caller should fall back to its generic message for the operation.
    pub fn remote_message(&self) -> Option<String> {
        let message = match self {
            Self::Api { message, .. } => message.trim().to_string(),
            Self::Auth(m)
            | Self::ContentBlocked(m)
            | Self::InvalidRequest(m)
            | Self::UnexpectedResponse(m)
            | Self::Decode(m)
            | Self::Encode(m)
            | Self::Validation(m) => {
                if m.trim().is_empty() {
                    return None;
                }
                self.to_string()
            }
            other => other.to_string(),
        };
        if message.is_empty() {
            None
        } else {
            Some(message)
        }
    }

    /// Returns true if this error was raised before any remote call.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Busy)
    }
}

/// Trims a remote error body and caps its length.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return text.to_string();
    }
    let truncated: String = text.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
    format!("{truncated}...")
}

/// Reads a `Retry-After` header given in whole seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Result type alias for studio operations.
pub type Result<T> = std::result::Result<T, StudioError>;
