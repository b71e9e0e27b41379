//! Pipeline assembly and execution.
//!
//! This module provides:
//! - Stage specifications and pipeline settings
//! - The builder that registers stages in declaration order
//! - Assembly into a frozen, validated DAG
//! - Cache keys and the local runner

mod builder;
mod cache;
mod dag;
mod runner;
mod spec;

pub use builder::{PipelineBuilder, StageHandle};
pub use cache::{cache_key, hash_config};
pub use dag::{assemble, Pipeline};
pub use runner::{LocalDagRunner, RunReport, StageReport};
pub use spec::{OutputSpec, PipelineSettings, StageSpec};
