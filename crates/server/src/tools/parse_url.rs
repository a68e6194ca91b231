//! parse_url tool implementation.
//!
//! Runs one request through the pipeline. Pipeline failures are reported as a
//! tool error result carrying the failed response, not as a protocol error.

use pagesift_client::Orchestrator;
use pagesift_core::{Error, ParseRequest};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use tokio_util::sync::CancellationToken;

/// Input parameters for the parse_url tool.
pub type ParseUrlParams = ParseRequest;

/// Implementation of the parse_url tool.
///
/// `cancel` is the MCP request's token; a client-side cancel ends the pipeline.
pub async fn parse_impl(
    orchestrator: &Orchestrator, params: ParseUrlParams, cancel: &CancellationToken,
) -> Result<CallToolResult, McpError> {
    let response = orchestrator.parse(&params, cancel).await;
    let json = serde_json::to_string_pretty(&response)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    if response.ok {
        Ok(CallToolResult::success(vec![Content::text(json)]))
    } else {
        Ok(CallToolResult::error(vec![Content::text(json)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{orchestrator, text_of};
    use pagesift_core::ParseResponse;

    #[tokio::test]
    async fn test_parse_success() {
        let orchestrator = orchestrator();
        let result = parse_impl(&orchestrator, ParseRequest::new("https://example.com/ferris"), &CancellationToken::new())
            .await
            .unwrap();

        assert_ne!(result.is_error, Some(true));
        let response: ParseResponse = serde_json::from_str(&text_of(&result)).unwrap();
        assert!(response.ok);
        assert_eq!(response.data.unwrap().title(), "Ferris Learns to Swim");
    }

    #[tokio::test]
    async fn test_parse_failure_is_tool_error() {
        let orchestrator = orchestrator();
        let result = parse_impl(&orchestrator, ParseRequest::new(""), &CancellationToken::new()).await.unwrap();

        assert_eq!(result.is_error, Some(true));
        let response: ParseResponse = serde_json::from_str(&text_of(&result)).unwrap();
        assert!(!response.ok);
        assert!(response.error.unwrap().contains("INVALID_INPUT"));
    }
}
