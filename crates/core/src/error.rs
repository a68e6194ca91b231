//! Unified error types for pagesift.
//!
//! Every failure a parse request can hit maps to one of these variants, and
//! every variant maps to an [`ErrorKind`] tag so callers can tell "too slow"
//! apart from "could not extract".

use rmcp::model::{ErrorCode, ErrorData as McpError};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::rusqlite;

/// Unified error types for the pagesift pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty URL).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid or disallowed URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// The shared rendering engine could not be started.
    #[error("RENDER_INIT_FAILED: {0}")]
    RenderInit(String),

    /// Navigation or engine failure while rendering a page.
    #[error("FETCH_FAILED: {0}")]
    Fetch(String),

    /// The completion capability failed or returned unusable output.
    #[error("COMPLETION_FAILED: {0}")]
    Completion(String),

    /// A generated extraction program faulted.
    #[error("SANDBOX_EXECUTION_FAILED: {0}")]
    SandboxExecution(String),

    /// A generated extraction program finished without binding its output.
    #[error("SANDBOX_MISSING_OUTPUT: program did not bind `{0}`")]
    SandboxMissingOutput(String),

    /// The structured result was judged unusable.
    #[error("VALIDATION_FAILED: {0}")]
    Validation(String),

    /// The global pipeline deadline elapsed.
    #[error("TIMEOUT: {0}")]
    Timeout(String),

    /// Cache persistence read/write fault.
    #[error("CACHE_IO: {0}")]
    CacheIo(String),

    /// Database operation failed.
    #[error("CACHE_IO: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_IO: migration failed: {0}")]
    MigrationFailed(String),
}

/// Coarse failure category reported alongside a failed parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Fetch,
    Completion,
    Sandbox,
    Validation,
    Timeout,
    CacheIo,
}

impl Error {
    /// Category tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) | Error::InvalidUrl(_) => ErrorKind::InvalidInput,
            Error::RenderInit(_) | Error::Fetch(_) => ErrorKind::Fetch,
            Error::Completion(_) => ErrorKind::Completion,
            Error::SandboxExecution(_) | Error::SandboxMissingOutput(_) => ErrorKind::Sandbox,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::CacheIo(_) | Error::Database(_) | Error::MigrationFailed(_) => ErrorKind::CacheIo,
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::CacheIo(format!("payload encoding: {err}"))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::InvalidUrl(msg) => (-32003, msg.clone()),
            Error::RenderInit(msg) => (-32011, msg.clone()),
            Error::Fetch(msg) => (-32012, msg.clone()),
            Error::Completion(msg) => (-32013, msg.clone()),
            Error::SandboxExecution(msg) => (-32014, msg.clone()),
            Error::SandboxMissingOutput(name) => (-32015, format!("program did not bind `{name}`")),
            Error::Validation(msg) => (-32000, msg.clone()),
            Error::Timeout(msg) => (-32006, msg.clone()),
            Error::CacheIo(msg) => (-32002, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Fetch("net::ERR_NAME_NOT_RESOLVED".to_string());
        assert!(err.to_string().contains("FETCH_FAILED"));
        assert!(err.to_string().contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(Error::Timeout("90s".into()).kind(), ErrorKind::Timeout);
        assert_eq!(Error::SandboxMissingOutput("parsed".into()).kind(), ErrorKind::Sandbox);
        assert_eq!(Error::RenderInit("no chrome".into()).kind(), ErrorKind::Fetch);
        assert_eq!(Error::InvalidUrl("ftp://x".into()).kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::CacheIo).unwrap();
        assert_eq!(json, "\"cache_io\"");
    }

    #[test]
    fn test_error_to_mcp_error() {
        let err = Error::Timeout("deadline".to_string());
        let mcp_err: McpError = err.into();
        assert_eq!(mcp_err.code.0, -32006);
    }
}
