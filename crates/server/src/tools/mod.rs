//! MCP tool implementations.
//!
//! This module contains all tools exposed by the pagesift server.

pub mod cache;
pub mod parse_url;

pub use parse_url::{ParseUrlParams, parse_impl};
