//! Code parser using tree-sitter
//!
//! Discovers Go packages under a project root and parses their files on a
//! bounded worker pool. Files that fail to read or parse are recorded in
//! [`ParseResult::errors`] and skipped; the run continues with the rest.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tree_sitter::Node;
use walkdir::WalkDir;

use crate::core::config::ParserConfig;
use crate::core::model::{ParseResult, ParsedFile, ParsedPackage};
use crate::core::progress::{self, Phase, ProgressSink};
use crate::error::{ConfigError, FileErrorKind, FileParseError, ParseError};
use crate::languages::{walk_preorder, LanguageRegistry, Walk};

/// Files discovered under a root, plus entries that could not be visited
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<PathBuf>,
    pub errors: Vec<FileParseError>,
}

/// Code parser that uses tree-sitter for syntax analysis
pub struct CodeParser {
    registry: LanguageRegistry,
}

impl CodeParser {
    /// Create a new parser with the given language registry
    pub fn new(registry: LanguageRegistry) -> Self {
        Self { registry }
    }

    /// Parse every package under `root`.
    ///
    /// The root is canonicalized before anything is read. Cancellation is
    /// checked before each file; a cancelled run returns
    /// [`ParseError::Cancelled`] and no partial result.
    pub fn parse(
        &self,
        root: &Path,
        config: &ParserConfig,
        cancel: &CancellationToken,
        sink: Option<&dyn ProgressSink>,
    ) -> Result<ParseResult, ParseError> {
        if config.max_workers == 0 {
            return Err(ConfigError::NoWorkers.into());
        }
        let root = sanitize_root(root)?;
        if cancel.is_cancelled() {
            return Err(ParseError::Cancelled);
        }

        let module_path = read_module_path(&root);
        let discovery = self.collect_files(&root, config)?;
        let total = discovery.files.len();
        info!("Found {} Go files under {:?}", total, root);
        progress::emit(sink, Phase::Parse, 0.0, format!("{} files to parse", total));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_workers)
            .thread_name(|i| format!("gograph-parse-{}", i))
            .build()
            .map_err(|e| ParseError::WorkerPool(e.to_string()))?;

        let done = AtomicUsize::new(0);
        let step = (total / 10).max(1);
        let outcomes = pool.install(|| {
            discovery
                .files
                .par_iter()
                .map(|path| {
                    if cancel.is_cancelled() {
                        return Err(ParseError::Cancelled);
                    }
                    let outcome = self.parse_file(&root, path);
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if finished % step == 0 || finished == total {
                        progress::emit(
                            sink,
                            Phase::Parse,
                            finished as f32 / total.max(1) as f32,
                            format!("parsed {}/{} files", finished, total),
                        );
                    }
                    Ok(outcome)
                })
                .collect::<Result<Vec<_>, ParseError>>()
        })?;

        if cancel.is_cancelled() {
            return Err(ParseError::Cancelled);
        }

        let mut errors = discovery.errors;
        let mut parsed = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(file) => parsed.push(file),
                Err(e) => {
                    warn!("Skipping {}", e);
                    errors.push(e);
                }
            }
        }

        let packages = group_packages(parsed, module_path.as_deref(), &mut errors);
        if packages.is_empty() {
            return Err(ParseError::NoPackages { root });
        }

        info!(
            "Parsed {} packages ({} files skipped)",
            packages.len(),
            errors.len()
        );
        errors.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(ParseResult {
            root,
            module_path,
            packages,
            errors,
        })
    }

    /// Collect all parseable files under an already canonicalized root
    pub fn collect_files(&self, root: &Path, config: &ParserConfig) -> Result<Discovery, ParseError> {
        let ignore = build_globset(&config.ignore_patterns)?;
        let mut discovery = Discovery::default();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e, config));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    if path == root {
                        return Err(ParseError::Walk {
                            path,
                            message: e.to_string(),
                        });
                    }
                    discovery.errors.push(FileParseError {
                        path: relative_path(root, &path).into(),
                        kind: FileErrorKind::Io,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            // Symlinks are never followed, so only regular files inside root remain
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(lang) = self.registry.for_path(path) else {
                continue;
            };
            if !config.include_tests && lang.is_test_file(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let rel = relative_path(root, path);
            if ignore.is_match(&rel) {
                debug!("Ignoring {} by pattern", rel);
                continue;
            }
            discovery.files.push(path.to_path_buf());
        }

        Ok(discovery)
    }

    /// Parse a single file and extract its declarations
    pub fn parse_file(&self, root: &Path, path: &Path) -> Result<ParsedFile, FileParseError> {
        let rel = relative_path(root, path);
        let fail = |kind, message: String| FileParseError {
            path: PathBuf::from(&rel),
            kind,
            message,
        };

        let lang = self
            .registry
            .for_path(path)
            .ok_or_else(|| fail(FileErrorKind::Unsupported, "no language support".to_string()))?;

        // Read file as bytes first to handle non-UTF8 encodings
        let bytes = fs::read(path).map_err(|e| fail(FileErrorKind::Io, e.to_string()))?;
        let content = String::from_utf8_lossy(&bytes).into_owned();

        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&lang.grammar())
            .map_err(|e| fail(FileErrorKind::Unsupported, e.to_string()))?;

        let tree = parser
            .parse(&content, None)
            .ok_or_else(|| fail(FileErrorKind::Syntax, "parser produced no tree".to_string()))?;

        if let Some(line) = first_error_line(tree.root_node()) {
            return Err(fail(
                FileErrorKind::Syntax,
                format!("syntax error near line {}", line),
            ));
        }

        debug!("Parsed {}", rel);
        let mut file = lang.extract_file(&rel, &content, &tree);
        file.content_hash = compute_hash(&content);
        Ok(file)
    }
}

/// Canonicalize the project root and require a directory
pub fn sanitize_root(root: &Path) -> Result<PathBuf, ParseError> {
    let canonical = fs::canonicalize(root).map_err(|source| ParseError::InvalidPath {
        path: root.to_path_buf(),
        source,
    })?;
    if !canonical.is_dir() {
        return Err(ParseError::NotADirectory(canonical));
    }
    Ok(canonical)
}

/// Module path declared in `go.mod`, if any
fn read_module_path(root: &Path) -> Option<String> {
    let content = fs::read_to_string(root.join("go.mod")).ok()?;
    content.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("module")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let module = rest.trim().trim_matches('"');
        (!module.is_empty()).then(|| module.to_string())
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ConfigError::BadPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ConfigError::BadPattern {
        pattern: patterns.join(","),
        message: e.to_string(),
    })
}

fn is_skipped_dir(entry: &walkdir::DirEntry, config: &ParserConfig) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.')
        || (name == "vendor" && !config.include_vendor)
        || config.ignore_dirs.iter().any(|d| d.as_str() == name)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Group files into packages by (directory, package clause)
fn group_packages(
    files: Vec<ParsedFile>,
    module_path: Option<&str>,
    errors: &mut Vec<FileParseError>,
) -> Vec<ParsedPackage> {
    let mut groups: BTreeMap<(String, String), Vec<ParsedFile>> = BTreeMap::new();
    for file in files {
        if file.package.is_empty() {
            errors.push(FileParseError {
                path: PathBuf::from(&file.path),
                kind: FileErrorKind::Syntax,
                message: "missing package clause".to_string(),
            });
            continue;
        }
        let dir = match file.path.rfind('/') {
            Some(idx) => file.path[..idx].to_string(),
            None => String::new(),
        };
        groups
            .entry((dir, file.package.clone()))
            .or_default()
            .push(file);
    }

    let mut packages: Vec<ParsedPackage> = groups
        .into_iter()
        .map(|((dir, name), mut files)| {
            files.sort_by(|a, b| a.path.cmp(&b.path));
            let mut import_path = package_import_path(module_path, &dir);
            if name.ends_with("_test") {
                import_path.push_str("_test");
            }
            ParsedPackage {
                import_path,
                name,
                dir,
                files,
            }
        })
        .collect();
    disambiguate_packages(&mut packages);
    packages.sort_by(|a, b| a.import_path.cmp(&b.import_path));
    packages
}

/// Several packages in one directory (a `package main` generator beside a
/// library, say) would share an import path. The package named after the
/// directory, or else the largest, keeps the path; the others become
/// `<path>#<name>`, which no import can refer to.
fn disambiguate_packages(packages: &mut [ParsedPackage]) {
    let mut by_path: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, package) in packages.iter().enumerate() {
        by_path
            .entry(package.import_path.clone())
            .or_default()
            .push(index);
    }

    for (path, indices) in by_path {
        if indices.len() < 2 {
            continue;
        }
        let base = path.trim_end_matches("_test");
        let dir_name = base.rsplit('/').next().unwrap_or(base);
        let Some(primary) = indices.iter().copied().max_by_key(|&i| {
            let package = &packages[i];
            (
                package.name.trim_end_matches("_test") == dir_name,
                package.files.len(),
                std::cmp::Reverse(package.name.clone()),
            )
        }) else {
            continue;
        };
        for index in indices.into_iter().filter(|&i| i != primary) {
            let package = &mut packages[index];
            package.import_path = format!("{}#{}", path, package.name);
            warn!(
                "Directory {:?} holds more than one package; {} is recorded as {}",
                package.dir, package.name, package.import_path
            );
        }
    }
}

fn package_import_path(module_path: Option<&str>, dir: &str) -> String {
    match (module_path, dir.is_empty()) {
        (Some(module), true) => module.to_string(),
        (Some(module), false) => format!("{}/{}", module, dir),
        (None, true) => ".".to_string(),
        (None, false) => dir.to_string(),
    }
}

/// Line of the first error or missing node, if the tree has any
fn first_error_line(root: Node) -> Option<u32> {
    let mut found = None;
    walk_preorder(root, |node| {
        if node.is_error() || node.is_missing() {
            found = Some(node.start_position().row as u32 + 1);
            Walk::Stop
        } else if node.has_error() {
            Walk::Descend
        } else {
            Walk::Skip
        }
    });
    // An error flag with no error node below still fails the file
    found.or_else(|| root.has_error().then(|| root.start_position().row as u32 + 1))
}

/// Compute SHA-256 hash of content
fn compute_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn parse(dir: &Path, config: &ParserConfig) -> Result<ParseResult, ParseError> {
        CodeParser::new(LanguageRegistry::new()).parse(dir, config, &CancellationToken::new(), None)
    }

    #[test]
    fn test_groups_packages_with_module_path() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "go.mod", "module example.com/shop\n\ngo 1.22\n");
        write(dir.path(), "main.go", "package main\n\nfunc main() {}\n");
        write(dir.path(), "cart/cart.go", "package cart\n\ntype Cart struct{}\n");
        write(dir.path(), "cart/total.go", "package cart\n\nfunc Total() int { return 0 }\n");

        let result = parse(dir.path(), &ParserConfig::default()).unwrap();
        assert_eq!(result.module_path.as_deref(), Some("example.com/shop"));
        let paths: Vec<_> = result.packages.iter().map(|p| p.import_path.as_str()).collect();
        assert_eq!(paths, vec!["example.com/shop", "example.com/shop/cart"]);
        let cart = result.package("example.com/shop/cart").unwrap();
        assert_eq!(cart.files.len(), 2);
        assert_eq!(cart.files[0].path, "cart/cart.go");
        assert_eq!(cart.files[0].content_hash.len(), 64);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_ignore_rules() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.go", "package a\n");
        write(dir.path(), "a_test.go", "package a\n");
        write(dir.path(), "vendor/lib/lib.go", "package lib\n");
        write(dir.path(), ".hidden/h.go", "package h\n");
        write(dir.path(), "testdata/t.go", "package t\n");
        write(dir.path(), "gen/api.pb.go", "package gen\n");
        write(dir.path(), "README.md", "# readme\n");

        let config = ParserConfig {
            ignore_patterns: vec!["**/*.pb.go".to_string()],
            ..ParserConfig::default()
        };
        let result = parse(dir.path(), &config).unwrap();
        let files: Vec<_> = result
            .packages
            .iter()
            .flat_map(|p| p.files.iter().map(|f| f.path.clone()))
            .collect();
        assert_eq!(files, vec!["a.go"]);

        let config = ParserConfig {
            include_tests: true,
            include_vendor: true,
            ..ParserConfig::default()
        };
        let result = parse(dir.path(), &config).unwrap();
        assert_eq!(result.file_count(), 4);
    }

    #[test]
    fn test_syntax_error_is_collected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "good.go", "package app\n\nfunc Good() {}\n");
        write(dir.path(), "bad.go", "package app\n\nfunc Bad( {\n");

        let result = parse(dir.path(), &ParserConfig::default()).unwrap();
        assert_eq!(result.file_count(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, PathBuf::from("bad.go"));
        assert_eq!(result.errors[0].kind, FileErrorKind::Syntax);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = parse(&dir.path().join("nope"), &ParserConfig::default()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidPath { .. }));
    }

    #[test]
    fn test_file_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "main.go", "package main\n");
        let err = parse(&dir.path().join("main.go"), &ParserConfig::default()).unwrap_err();
        assert!(matches!(err, ParseError::NotADirectory(_)));
    }

    #[test]
    fn test_no_packages_is_fatal() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "notes.txt", "nothing here");
        let err = parse(dir.path(), &ParserConfig::default()).unwrap_err();
        assert!(matches!(err, ParseError::NoPackages { .. }));
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "main.go", "package main\n");
        let token = CancellationToken::new();
        token.cancel();
        let err = CodeParser::new(LanguageRegistry::new())
            .parse(dir.path(), &ParserConfig::default(), &token, None)
            .unwrap_err();
        assert!(matches!(err, ParseError::Cancelled));
    }

    #[test]
    fn test_package_import_path_without_module() {
        assert_eq!(package_import_path(None, ""), ".");
        assert_eq!(package_import_path(None, "internal/db"), "internal/db");
        assert_eq!(package_import_path(Some("m"), "x"), "m/x");
    }

    #[test]
    fn test_deeply_nested_file_parses_on_worker_pool() {
        let dir = TempDir::new().unwrap();
        let mut source = String::from("package gen\n\nvar Blob = \"a\"");
        for _ in 0..20_000 {
            source.push_str(" + \"a\"");
        }
        source.push('\n');
        write(dir.path(), "blob.go", &source);
        let mut broken = String::from("package gen\n\nfunc Broken() int {\n\treturn 1");
        for _ in 0..20_000 {
            broken.push_str(" + 1");
        }
        broken.push_str(" +\n");
        write(dir.path(), "broken.go", &broken);

        let result = parse(dir.path(), &ParserConfig::default()).unwrap();
        assert_eq!(result.file_count(), 1);
        assert_eq!(result.packages[0].files[0].values.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, PathBuf::from("broken.go"));
    }

    #[test]
    fn test_two_packages_in_one_directory() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "go.mod", "module example.com/app\n");
        write(
            dir.path(),
            "lib/lib.go",
            "package lib\n\nfunc helper() int { return 1 }\n\nfunc Area() int { return helper() }\n",
        );
        write(
            dir.path(),
            "lib/gen.go",
            "//go:build ignore\n\npackage main\n\nfunc main() {}\n",
        );

        let result = parse(dir.path(), &ParserConfig::default()).unwrap();
        let packages: Vec<_> = result
            .packages
            .iter()
            .map(|p| (p.import_path.as_str(), p.name.as_str()))
            .collect();
        assert_eq!(
            packages,
            vec![
                ("example.com/app/lib", "lib"),
                ("example.com/app/lib#main", "main"),
            ]
        );
    }
}
