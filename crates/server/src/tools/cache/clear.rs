//! cache_clear tool implementation.
//!
//! Removes every entry from memory and from the persistence file.

use pagesift_core::{ContentCache, Error};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Output from the cache_clear tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearOutput {
    /// Number of in-memory entries removed.
    pub removed: usize,
    pub message: String,
}

/// Implementation of the cache_clear tool.
pub async fn clear_impl(cache: &ContentCache) -> Result<CallToolResult, McpError> {
    let removed = cache.clear().await;
    let output = CacheClearOutput { removed, message: "Cache cleared successfully".to_string() };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::text_of;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let cache = ContentCache::in_memory(Duration::from_secs(600));
        for page in ["a", "b"] {
            let key = format!("https://example.com/{page}|auto");
            cache.set(&key, json!({"type": "detail", "title": page, "full_text": "body"}));
        }

        let result = clear_impl(&cache).await.unwrap();
        let output: CacheClearOutput = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(output.removed, 2);
        assert_eq!(cache.stats().entry_count, 0);
    }
}
