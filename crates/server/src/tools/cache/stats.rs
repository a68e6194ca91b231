//! cache_stats tool implementation.

use pagesift_core::{ContentCache, Error};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};

/// Implementation of the cache_stats tool.
pub fn stats_impl(cache: &ContentCache) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(&cache.stats())
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}
