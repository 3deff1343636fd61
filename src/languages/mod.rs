//! Source language front ends
//!
//! A front end owns a tree-sitter grammar and turns a syntax tree into the
//! parser IR. The pipeline ships with Go; the registry resolves the front end
//! for a discovered file by its extension.

pub mod go;

use std::path::Path;
use std::sync::Arc;

use tree_sitter::{Node, Tree};

use crate::core::model::ParsedFile;

pub trait LanguageSupport: Send + Sync {
    /// Short name, e.g. "go"
    fn name(&self) -> &'static str;

    /// File extension without the dot
    fn extension(&self) -> &'static str;

    /// Test sources, excluded unless the parser is told to include them
    fn is_test_file(&self, file_name: &str) -> bool;

    fn grammar(&self) -> tree_sitter::Language;

    /// Extract declarations, imports and call sites from a parsed file.
    ///
    /// `path` is root-relative. The content hash is filled in by the caller.
    fn extract_file(&self, path: &str, source: &str, tree: &Tree) -> ParsedFile;
}

/// What [`walk_preorder`] does after visiting a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Descend,
    /// Skip this node's children
    Skip,
    Stop,
}

/// Visit `root` and its descendants in source order.
///
/// Iterative over a tree cursor: nesting depth does not grow the call stack.
pub fn walk_preorder<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>) -> Walk) {
    let mut cursor = root.walk();
    let mut depth = 0usize;
    loop {
        let descend = match visit(cursor.node()) {
            Walk::Stop => return,
            Walk::Descend => true,
            Walk::Skip => false,
        };
        if descend && cursor.goto_first_child() {
            depth += 1;
            continue;
        }
        loop {
            if depth == 0 {
                return;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            cursor.goto_parent();
            depth -= 1;
        }
    }
}

pub struct LanguageRegistry {
    languages: Vec<Arc<dyn LanguageSupport>>,
}

impl LanguageRegistry {
    /// Registry with the Go front end
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(go::GoLanguage::new()));
        registry
    }

    pub fn empty() -> Self {
        Self {
            languages: Vec::new(),
        }
    }

    pub fn register(&mut self, language: Arc<dyn LanguageSupport>) {
        self.languages.push(language);
    }

    /// Front end responsible for `path`, if any
    pub fn for_path(&self, path: &Path) -> Option<&dyn LanguageSupport> {
        let ext = path.extension()?.to_str()?;
        self.languages
            .iter()
            .find(|l| l.extension().eq_ignore_ascii_case(ext))
            .map(|l| l.as_ref() as &dyn LanguageSupport)
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_handles_nothing() {
        let registry = LanguageRegistry::empty();
        assert!(registry.for_path(Path::new("main.go")).is_none());
    }

    #[test]
    fn test_resolves_go_sources() {
        let registry = LanguageRegistry::new();
        let go = registry.for_path(Path::new("cmd/server/main.go")).unwrap();
        assert_eq!(go.name(), "go");
        assert!(go.is_test_file("main_test.go"));
        assert!(!go.is_test_file("main.go"));
        assert!(registry.for_path(Path::new("README.md")).is_none());
        assert!(registry.for_path(Path::new("Makefile")).is_none());
    }

    #[test]
    fn test_walk_preorder_order_and_skip() {
        let go = go::GoLanguage::new();
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&go.grammar()).unwrap();
        let source = "package p\n\nfunc a() {}\n\nfunc b() {}\n";
        let tree = parser.parse(source, None).unwrap();

        let mut names = Vec::new();
        walk_preorder(tree.root_node(), |node| {
            if node.kind() == "function_declaration" {
                let name = node.child_by_field_name("name").unwrap();
                names.push(&source[name.byte_range()]);
                return Walk::Skip;
            }
            Walk::Descend
        });
        assert_eq!(names, vec!["a", "b"]);

        let mut visited = 0;
        walk_preorder(tree.root_node(), |_| {
            visited += 1;
            Walk::Stop
        });
        assert_eq!(visited, 1);
    }
}
