//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `max_concurrency` is 0
    /// - `scroll_iterations` is outside 1..=3
    /// - `deadline_ms` is below 1s or above 10 minutes
    /// - `cache_ttl_secs`, `cache_flush_every`, `max_content_chars` or `sandbox_step_budget` is 0
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency", "must be greater than 0"));
        }

        if !(1..=3).contains(&self.scroll_iterations) {
            return Err(invalid("scroll_iterations", "must be between 1 and 3"));
        }

        if self.deadline_ms < 1_000 {
            return Err(invalid("deadline_ms", "must be at least 1000ms"));
        }
        if self.deadline_ms > 600_000 {
            return Err(invalid("deadline_ms", "must not exceed 10 minutes (600000ms)"));
        }

        if self.cache_ttl_secs == 0 {
            return Err(invalid("cache_ttl_secs", "must be greater than 0"));
        }
        if self.cache_flush_every == 0 {
            return Err(invalid("cache_flush_every", "must be greater than 0"));
        }
        if self.max_content_chars == 0 {
            return Err(invalid("max_content_chars", "must be greater than 0"));
        }
        if self.sandbox_step_budget == 0 {
            return Err(invalid("sandbox_step_budget", "must be greater than 0"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.navigation_timeout_ms + self.fallback_wait_ms + self.settle_delay_ms >= self.deadline_ms {
            tracing::warn!(
                navigation_timeout_ms = self.navigation_timeout_ms,
                fallback_wait_ms = self.fallback_wait_ms,
                deadline_ms = self.deadline_ms,
                "render wait budgets exceed the pipeline deadline; slow pages will time out before extraction"
            );
        }

        Ok(())
    }
}
