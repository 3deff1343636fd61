//! GoGraph - Go source to property graph pipeline
//!
//! Parses a Go project, analyzes package dependencies, interface
//! implementations and call relationships, maps everything onto a property
//! graph and persists it in an embedded graph store.

pub mod analysis;
pub mod core;
pub mod error;
pub mod languages;
pub mod storage;

pub use crate::analysis::{AnalysisReport, Analyzer};
pub use crate::core::config::Config;
pub use crate::core::graph::GraphBuilder;
pub use crate::core::parser::CodeParser;
pub use crate::core::progress::{Phase, ProgressEvent, ProgressSink, TracingProgressSink};
pub use crate::core::{analyze_project, persist, run_pipeline, Analysis, PipelineOutcome};
pub use crate::error::PipelineError;
pub use crate::languages::LanguageRegistry;
pub use crate::storage::{AnalysisResult, GraphRepository, ImportStats};
