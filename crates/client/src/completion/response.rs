//! Chat response types and reply post-processing.

use serde::Deserialize;
use serde_json::Value;

use super::CompletionError;

/// Raw response from an OpenAI-compatible chat endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    /// Text of the first choice.
    pub fn into_content(self) -> Result<String, CompletionError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }
}

/// Remove a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let body = match rest.find('\n') {
        Some(newline) if rest[..newline].chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') => {
            &rest[newline + 1..]
        }
        _ => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a direct-mode reply into JSON.
pub fn parse_json_reply(reply: &str) -> Result<Value, CompletionError> {
    serde_json::from_str(strip_code_fences(reply)).map_err(|e| CompletionError::Parse(e.to_string()))
}
