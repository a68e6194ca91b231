//! Completion client error types.

use std::sync::Arc;

use pagesift_core::Error;

/// Errors from the completion service client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompletionError {
    /// No API key configured.
    #[error("missing API key: PAGESIFT_COMPLETION_API_KEY not set")]
    MissingApiKey,

    /// Authentication failed (invalid API key).
    #[error("authentication failed: invalid API key")]
    AuthError,

    /// Rate limited by the completion service.
    #[error("rate limited: too many requests")]
    RateLimited,

    /// Non-success response other than auth and rate limiting.
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// The reply carried no usable message.
    #[error("empty response from completion service")]
    EmptyResponse,

    /// Response or reply content could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { CompletionError::Timeout } else { CompletionError::Network(Arc::new(err)) }
    }
}

impl From<CompletionError> for Error {
    fn from(err: CompletionError) -> Self {
        Error::Completion(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagesift_core::ErrorKind;

    #[test]
    fn test_error_display() {
        assert!(CompletionError::MissingApiKey.to_string().contains("API key"));
        let err = CompletionError::Api { status: 500, body: "upstream down".into() };
        assert_eq!(err.to_string(), "API error 500: upstream down");
    }

    #[test]
    fn test_maps_to_completion_kind() {
        let err: Error = CompletionError::RateLimited.into();
        assert_eq!(err.kind(), ErrorKind::Completion);
        assert!(err.to_string().starts_with("COMPLETION_FAILED"));
    }
}
