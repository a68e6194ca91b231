//! Client code for pagesift.
//!
//! This crate provides the rendering pool, document cleaning, the completion
//! client, the extraction sandbox, the readability fallback and the pipeline
//! that ties them together for the server.

pub mod clean;
pub mod completion;
pub mod extract;
pub mod guard;
pub mod pipeline;
pub mod render;
pub mod sandbox;

pub use clean::clean_html;
pub use completion::{CompletionClient, CompletionConfig, CompletionError, ExtractionHints, OpenAiClient};
pub use extract::{Extractor, LectitoExtractor};
pub use guard::{UrlError, canonicalize, check_target};
pub use pipeline::{Orchestrator, PageSource, PipelineOptions};
pub use render::{RenderEngine, RenderError, RenderOptions, RenderPool};
pub use sandbox::{Bindings, OUTPUT_VARIABLE, Sandbox, SandboxError};

#[cfg(feature = "render")]
pub use render::chromium::ChromiumEngine;
