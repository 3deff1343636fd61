//! Error types for the parse → analyze → build → persist pipeline.
//!
//! Each stage owns its error enum. Per-file parse failures are not errors in
//! this sense: they are collected as [`FileParseError`] values inside the
//! parse result and the run continues with the files that did parse.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid configuration, reported before any work starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("parser.max_workers must be at least 1")]
    NoWorkers,

    #[error("store.batch_size must be at least 1")]
    ZeroBatchSize,

    #[error("store.retry.max_attempts must be at least 1")]
    NoRetryBudget,

    #[error("store.retry.multiplier must be >= 1.0, got {0}")]
    BadMultiplier(String),

    #[error("analyzer.max_call_depth must not be negative, got {0}")]
    NegativeDepth(i64),

    #[error("invalid ignore pattern '{pattern}': {message}")]
    BadPattern { pattern: String, message: String },
}

/// Fatal parser failures. Per-file problems are [`FileParseError`]s instead.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid project path {path:?}: {source}")]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("project path {0:?} is not a directory")]
    NotADirectory(PathBuf),

    #[error("no Go packages found under {root:?}")]
    NoPackages { root: PathBuf },

    #[error("failed to walk {path:?}: {message}")]
    Walk { path: PathBuf, message: String },

    #[error("failed to start parser workers: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("parsing cancelled")]
    Cancelled,
}

/// Category of a per-file parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileErrorKind {
    /// The file could not be read from disk
    Io,
    /// The source contains syntax errors
    Syntax,
    /// No language support is registered for the file
    Unsupported,
}

impl std::fmt::Display for FileErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io => write!(f, "I/O error"),
            Self::Syntax => write!(f, "syntax error"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// A file that was skipped. Collected, never thrown.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileParseError {
    pub path: PathBuf,
    pub kind: FileErrorKind,
    pub message: String,
}

impl std::fmt::Display for FileParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.path.display(), self.message, self.kind)
    }
}

impl std::error::Error for FileParseError {}

/// Fatal analyzer failures. Unresolved calls and types are recorded as data.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("analysis cancelled during {0}")]
    Cancelled(&'static str),
}

/// Graph store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store endpoint not configured")]
    NotConfigured,

    #[error("could not connect to {endpoint} after {attempts} attempt(s): {source}")]
    Connection {
        endpoint: String,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to initialize schema: {0}")]
    Schema(#[source] rusqlite::Error),

    #[error("failed to write {entity} batch [{batch_start}..{batch_end}): {source}")]
    Write {
        entity: String,
        batch_start: usize,
        batch_end: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("relationship {relationship} references missing node {endpoint}")]
    DanglingRelationship {
        relationship: uuid::Uuid,
        endpoint: uuid::Uuid,
    },

    #[error("{kind} {id} belongs to project '{found}', expected '{expected}'")]
    ProjectMismatch {
        kind: &'static str,
        id: uuid::Uuid,
        expected: String,
        found: String,
    },

    #[error("{source}")]
    Query {
        query: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store operation cancelled")]
    Cancelled,
}

/// Error for a whole pipeline run. Wraps the failing stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("persist failed: {0}")]
    Store(#[from] StoreError),

    #[error("unexpected fault in {operation}: {message}")]
    Fault {
        operation: &'static str,
        message: String,
        backtrace: String,
    },
}

impl PipelineError {
    /// True when the run stopped because its cancellation token fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Parse(ParseError::Cancelled)
                | Self::Analysis(AnalysisError::Cancelled(_))
                | Self::Store(StoreError::Cancelled)
        )
    }
}
