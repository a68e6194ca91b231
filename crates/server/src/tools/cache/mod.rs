//! Cache management tools.

pub mod clear;
pub mod stats;

pub use clear::{CacheClearOutput, clear_impl};
pub use stats::stats_impl;
