//! Core types and shared functionality for pagesift.
//!
//! This crate provides:
//! - The content-addressed result cache with optional SQLite persistence
//! - Extraction record and request/response types
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod record;
pub mod request;

pub use cache::{CacheDb, CacheStats, ContentCache};
pub use config::{AppConfig, CacheKeyMode, ExtractionMode};
pub use error::{Error, ErrorKind};
pub use record::{ExtractionRecord, Image, ListItem, RecordKind, RecordLink, RecordMeta};
pub use request::{PageType, ParseRequest, ParseResponse};
