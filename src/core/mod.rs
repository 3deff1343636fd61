//! Core engine: parse, analyze, build and persist a project graph

pub mod config;
pub mod graph;
pub mod model;
pub mod parser;
pub mod progress;

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analysis::{AnalysisReport, Analyzer};
use crate::error::PipelineError;
use crate::languages::LanguageRegistry;
use crate::storage::{AnalysisResult, GraphRepository, ImportStats};
use config::Config;
use model::ParseResult;
use progress::{emit, Phase, ProgressSink};

/// Output of the pure stages of a run
#[derive(Debug)]
pub struct Analysis {
    pub parse: ParseResult,
    pub report: AnalysisReport,
    pub result: AnalysisResult,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub analysis: Analysis,
    pub import: ImportStats,
}

/// Parse, analyze and build without touching a store.
///
/// A cancelled run returns an error; no partial result escapes.
pub fn analyze_project(
    project_id: &str,
    root: &Path,
    config: &Config,
    cancel: &CancellationToken,
    progress: Option<&dyn ProgressSink>,
) -> Result<Analysis, PipelineError> {
    config.validate()?;

    let parse = guarded("parse", || {
        let parser = parser::CodeParser::new(LanguageRegistry::new());
        Ok(parser.parse(root, &config.parser, cancel, progress)?)
    })?;
    info!(
        packages = parse.packages.len(),
        files = parse.file_count(),
        skipped = parse.errors.len(),
        "Parsed {}",
        parse.root.display()
    );

    emit(progress, Phase::Analyze, 0.0, "analyzing relationships");
    let report = guarded("analyze", || {
        Ok(Analyzer::new(&config.analyzer).analyze(&parse, cancel)?)
    })?;
    emit(
        progress,
        Phase::Analyze,
        1.0,
        format!(
            "{} cycles, {} implementations, {} calls",
            report.cycles.len(),
            report.implementations.len(),
            report.calls.len()
        ),
    );

    emit(progress, Phase::Build, 0.0, "building graph model");
    let result = guarded("build", || {
        Ok(graph::GraphBuilder::new(config.graph.identity).build(project_id, &parse, &report))
    })?;
    emit(
        progress,
        Phase::Build,
        1.0,
        format!(
            "{} nodes, {} relationships",
            result.nodes.len(),
            result.relationships.len()
        ),
    );

    Ok(Analysis {
        parse,
        report,
        result,
    })
}

/// Write a built result: schema, indexes, then clear-then-write import.
pub fn persist(
    repository: &mut GraphRepository,
    result: &AnalysisResult,
    cancel: &CancellationToken,
    progress: Option<&dyn ProgressSink>,
) -> Result<ImportStats, PipelineError> {
    emit(progress, Phase::Persist, 0.0, "preparing store");
    guarded("persist", || {
        repository.init_schema()?;
        let indexes = repository.ensure_indexes();
        if !indexes.failed.is_empty() {
            warn!("{} index(es) could not be created", indexes.failed.len());
        }
        emit(progress, Phase::Persist, 0.1, "importing");
        let stats = repository.import(result, cancel)?;
        emit(
            progress,
            Phase::Persist,
            1.0,
            format!(
                "{} nodes, {} relationships written",
                stats.nodes_written, stats.relationships_written
            ),
        );
        Ok(stats)
    })
}

/// Full run against a connected repository
pub fn run_pipeline(
    repository: &mut GraphRepository,
    project_id: &str,
    root: &Path,
    config: &Config,
    cancel: &CancellationToken,
    progress: Option<&dyn ProgressSink>,
) -> Result<PipelineOutcome, PipelineError> {
    let analysis = analyze_project(project_id, root, config, cancel, progress)?;
    let import = persist(repository, &analysis.result, cancel, progress)?;
    Ok(PipelineOutcome { analysis, import })
}

/// Guards currently running; the panic hook only captures while non-zero
static ACTIVE_GUARDS: AtomicUsize = AtomicUsize::new(0);
static PANIC_BACKTRACE: Mutex<Option<String>> = Mutex::new(None);
static PANIC_HOOK: Once = Once::new();

/// Chain a hook in front of the installed one that records a backtrace at
/// the panic site, on whichever thread panicked.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if ACTIVE_GUARDS.load(Ordering::SeqCst) > 0 {
                let backtrace = Backtrace::force_capture().to_string();
                *PANIC_BACKTRACE
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(backtrace);
            }
            previous(info);
        }));
    });
}

fn take_panic_backtrace() -> Option<String> {
    PANIC_BACKTRACE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

/// Recovery point: a panic inside `f` becomes [`PipelineError::Fault`]
/// carrying the backtrace of the panic site.
pub(crate) fn guarded<T>(
    operation: &'static str,
    f: impl FnOnce() -> Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    install_panic_hook();
    ACTIVE_GUARDS.fetch_add(1, Ordering::SeqCst);
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    ACTIVE_GUARDS.fetch_sub(1, Ordering::SeqCst);

    match outcome {
        Ok(result) => result,
        Err(payload) => Err(PipelineError::Fault {
            operation,
            message: panic_message(payload.as_ref()),
            backtrace: take_panic_backtrace()
                .unwrap_or_else(|| Backtrace::force_capture().to_string()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::core::progress::testing::RecordingSink;
    use crate::error::ParseError;
    use crate::storage::NodeType;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("go.mod"), "module example.com/demo\n\ngo 1.22\n").unwrap();
        fs::write(
            dir.path().join("main.go"),
            "package main\n\nfunc main() {\n\trun()\n}\n",
        )
        .unwrap();
        fs::write(dir.path().join("run.go"), "package main\n\nfunc run() {}\n").unwrap();
        dir
    }

    #[test]
    fn test_guarded_converts_panics() {
        let err = guarded::<()>("build", || panic!("boom")).unwrap_err();
        match err {
            PipelineError::Fault {
                operation,
                message,
                backtrace,
            } => {
                assert_eq!(operation, "build");
                assert_eq!(message, "boom");
                assert!(!backtrace.is_empty());
                assert_ne!(backtrace, "disabled backtrace");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(guarded("build", || Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_analyze_project_reports_progress() {
        let dir = project();
        let sink = RecordingSink::default();
        let analysis = analyze_project(
            "demo",
            dir.path(),
            &Config::default(),
            &CancellationToken::new(),
            Some(&sink),
        )
        .unwrap();

        assert_eq!(analysis.result.nodes_of(NodeType::Function).count(), 2);
        let phases: Vec<Phase> = sink.events.lock().unwrap().iter().map(|e| e.phase).collect();
        assert_eq!(phases.first(), Some(&Phase::Parse));
        assert!(phases.contains(&Phase::Analyze));
        assert_eq!(phases.last(), Some(&Phase::Build));
    }

    #[test]
    fn test_invalid_config_fails_before_work() {
        let mut config = Config::default();
        config.parser.max_workers = 0;
        let err = analyze_project(
            "demo",
            Path::new("/definitely/not/here"),
            &config,
            &CancellationToken::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_cancelled_run_yields_no_result() {
        let dir = project();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = analyze_project("demo", dir.path(), &Config::default(), &cancel, None).unwrap_err();
        assert!(matches!(err, PipelineError::Parse(ParseError::Cancelled)));
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_run_pipeline_persists() {
        let dir = project();
        let mut repository = GraphRepository::open_in_memory(100).unwrap();
        let outcome = run_pipeline(
            &mut repository,
            "demo",
            dir.path(),
            &Config::default(),
            &CancellationToken::new(),
            None,
        )
        .unwrap();

        assert_eq!(outcome.import.nodes_written, outcome.analysis.result.nodes.len());
        assert_eq!(
            repository.count_nodes("demo", None).unwrap(),
            outcome.analysis.result.nodes.len()
        );
    }

    #[test]
    fn test_guarded_captures_worker_panic() {
        let err = guarded::<()>("parse", || {
            std::thread::scope(|scope| {
                scope.spawn(|| panic!("worker failed"));
            });
            Ok(())
        })
        .unwrap_err();
        match err {
            PipelineError::Fault {
                operation,
                backtrace,
                ..
            } => {
                assert_eq!(operation, "parse");
                assert!(!backtrace.is_empty());
                assert_ne!(backtrace, "disabled backtrace");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
