//! Cross-file relationship analysis
//!
//! Runs over a complete [`ParseResult`] and derives package dependencies,
//! import cycles, interface implementations, resolved calls and metrics.
//! All passes are sequential and read-only over the parse result.

pub mod calls;
pub mod dependency;
pub mod interfaces;
pub mod metrics;
pub mod symbols;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::AnalyzerConfig;
use crate::core::model::ParseResult;
use crate::error::AnalysisError;

pub use calls::{CallEdge, CallGraph, CallTarget, MAX_CHAINS};
pub use dependency::{Cycle, DependencyEdge, DependencyGraph};
pub use interfaces::{Implementor, InterfaceImplementations};
pub use metrics::{FunctionMetrics, Metrics, PackageMetrics};

use symbols::SymbolTable;

/// A named type qualified by its package import path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeKey {
    pub package: String,
    pub name: String,
}

impl TypeKey {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.package, self.name)
    }
}

/// A project function or method
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionRef {
    pub package: String,
    pub receiver: Option<String>,
    pub name: String,
}

impl FunctionRef {
    pub fn function(package: &str, name: &str) -> Self {
        Self {
            package: package.to_string(),
            receiver: None,
            name: name.to_string(),
        }
    }

    pub fn method(package: &str, receiver: &str, name: &str) -> Self {
        Self {
            package: package.to_string(),
            receiver: Some(receiver.to_string()),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.receiver {
            Some(receiver) => write!(f, "{}.({}).{}", self.package, receiver, self.name),
            None => write!(f, "{}.{}", self.package, self.name),
        }
    }
}

/// Something the analyzer could not fully resolve; the run continues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    pub package: String,
    pub subject: String,
    pub reason: String,
}

/// Everything derived from a parse result
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub dependencies: DependencyGraph,
    /// Empty when cycle detection is disabled
    pub cycles: Vec<Cycle>,
    pub implementations: InterfaceImplementations,
    /// Deduplicated, sorted by caller
    pub calls: Vec<CallEdge>,
    /// Call chains from each `main`/`init` of a main package, bounded by
    /// `max_call_depth`
    pub entry_chains: BTreeMap<FunctionRef, Vec<Vec<FunctionRef>>>,
    pub metrics: Option<Metrics>,
    pub degradations: Vec<Degradation>,
}

impl AnalysisReport {
    pub fn call_graph(&self) -> CallGraph {
        CallGraph::from_edges(&self.calls)
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    pub fn longest_entry_chain(&self) -> Option<&[FunctionRef]> {
        self.entry_chains
            .values()
            .flatten()
            .max_by_key(|chain| chain.len())
            .map(Vec::as_slice)
    }
}

pub struct Analyzer<'a> {
    config: &'a AnalyzerConfig,
}

impl<'a> Analyzer<'a> {
    pub fn new(config: &'a AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn analyze(
        &self,
        parse: &ParseResult,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, AnalysisError> {
        self.config.validate()?;
        check_cancellation(cancel, "dependency analysis")?;

        let symbols = SymbolTable::build(parse);

        let mut dependencies = DependencyGraph::build(parse);
        debug!(
            packages = dependencies.package_count(),
            edges = dependencies.edge_count(),
            "Built dependency graph"
        );

        check_cancellation(cancel, "cycle detection")?;
        let cycles = if self.config.detect_cycles {
            let cycles = dependencies.find_cycles();
            dependencies.mark_cycles(&cycles);
            for cycle in &cycles {
                warn!("Import cycle: {}", cycle);
            }
            cycles
        } else {
            Vec::new()
        };

        check_cancellation(cancel, "interface matching")?;
        let mut degradations = Vec::new();
        let implementations = InterfaceImplementations::compute(&symbols, &mut degradations);

        check_cancellation(cancel, "call resolution")?;
        let calls = calls::resolve_calls(parse, &symbols, &implementations, self.config);

        check_cancellation(cancel, "call chains")?;
        let entry_chains = self.entry_chains(parse, &calls, &mut degradations);

        check_cancellation(cancel, "metrics")?;
        let metrics = self
            .config
            .compute_metrics
            .then(|| Metrics::compute(parse, &calls));

        info!(
            packages = dependencies.package_count(),
            cycles = cycles.len(),
            implementations = implementations.len(),
            calls = calls.len(),
            entry_points = entry_chains.len(),
            degradations = degradations.len(),
            "Analysis complete"
        );

        Ok(AnalysisReport {
            dependencies,
            cycles,
            implementations,
            calls,
            entry_chains,
            metrics,
            degradations,
        })
    }

    fn entry_chains(
        &self,
        parse: &ParseResult,
        calls: &[CallEdge],
        degradations: &mut Vec<Degradation>,
    ) -> BTreeMap<FunctionRef, Vec<Vec<FunctionRef>>> {
        let max_depth = usize::try_from(self.config.max_call_depth).unwrap_or(0);
        let graph = CallGraph::from_edges(calls);

        let mut chains = BTreeMap::new();
        for package in parse.packages.iter().filter(|p| p.name == "main") {
            let entries = package
                .files
                .iter()
                .flat_map(|f| &f.functions)
                .filter(|f| !f.is_method() && (f.name == "main" || f.name == "init"));
            for entry in entries {
                let root = FunctionRef::function(&package.import_path, &entry.name);
                let found = graph.chains_from(&root, max_depth);
                if found.len() >= MAX_CHAINS {
                    degradations.push(Degradation {
                        package: package.import_path.clone(),
                        subject: entry.name.clone(),
                        reason: format!("call chains truncated at {}", MAX_CHAINS),
                    });
                }
                chains.insert(root, found);
            }
        }
        debug!(entry_points = chains.len(), "Enumerated entry call chains");
        chains
    }
}

fn check_cancellation(cancel: &CancellationToken, stage: &'static str) -> Result<(), AnalysisError> {
    if cancel.is_cancelled() {
        return Err(AnalysisError::Cancelled(stage));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;

    use crate::core::model::{ParseResult, ParsedFile, ParsedPackage};
    use crate::languages::go::GoLanguage;
    use crate::languages::LanguageSupport;

    /// Parse in-memory sources: `(import path, file name, source)`
    pub fn parse_sources(sources: &[(&str, &str, &str)]) -> ParseResult {
        let language = GoLanguage::new();
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&language.grammar()).unwrap();

        let mut packages: Vec<ParsedPackage> = Vec::new();
        for (import_path, file_name, source) in sources {
            let tree = parser.parse(source, None).unwrap();
            let dir = import_path.trim_start_matches("example.com/app").trim_start_matches('/');
            let path = if dir.is_empty() {
                file_name.to_string()
            } else {
                format!("{}/{}", dir, file_name)
            };
            let file: ParsedFile = language.extract_file(&path, source, &tree);
            match packages.iter_mut().find(|p| p.import_path == *import_path) {
                Some(package) => package.files.push(file),
                None => packages.push(ParsedPackage {
                    import_path: import_path.to_string(),
                    name: file.package.clone(),
                    dir: dir.to_string(),
                    files: vec![file],
                }),
            }
        }
        packages.sort_by(|a, b| a.import_path.cmp(&b.import_path));

        ParseResult {
            root: PathBuf::from("/project"),
            module_path: Some("example.com/app".to_string()),
            packages,
            errors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::parse_sources;
    use super::*;

    #[test]
    fn test_analyze_reports_all_passes() {
        let parse = parse_sources(&[
            (
                "example.com/app",
                "main.go",
                "package main\n\nimport \"example.com/app/store\"\n\nfunc main() {\n\ts := store.New()\n\ts.Save()\n}\n",
            ),
            (
                "example.com/app/store",
                "store.go",
                "package store\n\ntype Saver interface {\n\tSave() error\n}\n\ntype Store struct{}\n\nfunc New() *Store { return &Store{} }\n\nfunc (s *Store) Save() error { return nil }\n",
            ),
        ]);

        let config = AnalyzerConfig::default();
        let report = Analyzer::new(&config)
            .analyze(&parse, &CancellationToken::new())
            .unwrap();

        assert!(report.cycles.is_empty());
        assert_eq!(report.dependencies.edges().len(), 1);
        let saver = TypeKey::new("example.com/app/store", "Saver");
        assert_eq!(report.implementations.implementors(&saver).count(), 1);
        assert!(report.calls.iter().any(|c| matches!(
            &c.target,
            CallTarget::Resolved(f) if f.name == "New"
        )));
        assert!(report.metrics.is_some());
    }

    #[test]
    fn test_disabled_passes() {
        let parse = parse_sources(&[
            ("example.com/app/a", "a.go", "package a\n\nimport \"example.com/app/b\"\n\nvar _ = b.X\n"),
            ("example.com/app/b", "b.go", "package b\n\nimport \"example.com/app/a\"\n\nvar X = a.Y\n"),
        ]);
        let config = AnalyzerConfig {
            detect_cycles: false,
            compute_metrics: false,
            ..AnalyzerConfig::default()
        };
        let report = Analyzer::new(&config)
            .analyze(&parse, &CancellationToken::new())
            .unwrap();
        assert!(report.cycles.is_empty());
        assert!(report.metrics.is_none());
    }

    #[test]
    fn test_negative_depth_rejected() {
        let parse = parse_sources(&[("example.com/app", "main.go", "package main\n")]);
        let config = AnalyzerConfig {
            max_call_depth: -1,
            ..AnalyzerConfig::default()
        };
        let err = Analyzer::new(&config)
            .analyze(&parse, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }

    #[test]
    fn test_cancelled_before_start() {
        let parse = parse_sources(&[("example.com/app", "main.go", "package main\n")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let config = AnalyzerConfig::default();
        let err = Analyzer::new(&config).analyze(&parse, &cancel).unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled(_)));
    }

    #[test]
    fn test_function_ref_display() {
        assert_eq!(
            FunctionRef::method("example.com/app/store", "Store", "Save").to_string(),
            "example.com/app/store.(Store).Save"
        );
        assert_eq!(FunctionRef::function("example.com/app", "main").to_string(), "example.com/app.main");
    }

    #[test]
    fn test_entry_chains_bounded_by_depth() {
        let sources = [
            (
                "example.com/app",
                "main.go",
                "package main\n\nimport \"example.com/app/work\"\n\nfunc main() { work.A() }\n\nfunc init() {}\n",
            ),
            (
                "example.com/app/work",
                "work.go",
                "package work\n\nfunc A() { b() }\n\nfunc b() { c() }\n\nfunc c() {}\n\nfunc main() { A() }\n",
            ),
        ];
        let parse = parse_sources(&sources);
        let main = FunctionRef::function("example.com/app", "main");

        let config = AnalyzerConfig::default();
        let report = Analyzer::new(&config)
            .analyze(&parse, &CancellationToken::new())
            .unwrap();
        // init calls nothing; work.main is not in a main package
        assert_eq!(report.entry_chains.len(), 2);
        assert!(report.entry_chains[&FunctionRef::function("example.com/app", "init")].is_empty());
        let names: Vec<_> = report.entry_chains[&main][0]
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["main", "A", "b", "c"]);
        assert_eq!(report.longest_entry_chain().map(|c| c.len()), Some(4));

        let config = AnalyzerConfig {
            max_call_depth: 2,
            ..AnalyzerConfig::default()
        };
        let report = Analyzer::new(&config)
            .analyze(&parse, &CancellationToken::new())
            .unwrap();
        let names: Vec<_> = report.entry_chains[&main][0]
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["main", "A", "b"]);
    }
}
