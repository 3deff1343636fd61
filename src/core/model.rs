//! Intermediate representation produced by the source parser
//!
//! These types are immutable once the parser returns them; the analyzer and
//! graph builder only read them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::FileParseError;

/// Exported or unexported, following Go's capitalization rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Exported,
    Unexported,
}

impl Visibility {
    pub fn of(name: &str) -> Self {
        match name.chars().next() {
            Some(c) if c.is_uppercase() => Self::Exported,
            _ => Self::Unexported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exported => "exported",
            Self::Unexported => "unexported",
        }
    }
}

/// Start and end line of a declaration, 1-based and inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub end_line: u32,
}

impl Span {
    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// How a call expression invokes its callee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// `f()` or `pkg.F()`
    Direct,
    /// `x.M()` on a concrete or unknown receiver
    Method,
    /// `x.M()` where `x` has an interface type
    InterfaceDispatch,
    /// Call through a function value, closure or index expression
    Dynamic,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Method => "method",
            Self::InterfaceDispatch => "interface_dispatch",
            Self::Dynamic => "dynamic",
        }
    }
}

/// A call expression found inside a function body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    /// Called function or method name
    pub callee: String,
    /// Import path of the package qualifying the call (`pkg.F()`, or the
    /// package of a `pkg.T` receiver type)
    pub qualifier: Option<String>,
    /// Receiver type name when it could be inferred syntactically
    pub receiver_type: Option<String>,
    pub call_type: CallType,
    pub line: u32,
}

/// A function or method declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    /// Declaration header, e.g. `func (s *Server) Start(ctx context.Context) error`
    pub signature: String,
    /// Receiver type name; empty for free functions
    pub receiver: String,
    pub pointer_receiver: bool,
    /// Parameter types with names stripped
    pub params: Vec<String>,
    /// Result types with names stripped
    pub results: Vec<String>,
    pub visibility: Visibility,
    pub span: Span,
    /// Branch and loop count + 1
    pub complexity: u32,
    /// In source order
    pub calls: Vec<CallSite>,
}

impl FunctionInfo {
    pub fn is_method(&self) -> bool {
        !self.receiver.is_empty()
    }
}

/// A method required by an interface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<String>,
    pub results: Vec<String>,
}

impl std::fmt::Display for MethodSig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.params.join(", "))?;
        match self.results.len() {
            0 => Ok(()),
            1 => write!(f, " {}", self.results[0]),
            _ => write!(f, " ({})", self.results.join(", ")),
        }
    }
}

/// A struct field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub type_name: String,
    pub visibility: Visibility,
    /// Anonymous (embedded) field
    pub embedded: bool,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Struct,
    Interface,
}

/// A struct or interface declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: String,
    pub kind: TypeKind,
    pub visibility: Visibility,
    pub span: Span,
    /// Struct fields (empty for interfaces)
    pub fields: Vec<FieldInfo>,
    /// Interface method set as declared (empty for structs)
    pub methods: Vec<MethodSig>,
    /// Embedded interfaces, as written (`Reader`, `io.Writer`)
    pub embeds: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Constant,
    Variable,
}

/// A package-level constant or variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub name: String,
    pub kind: ValueKind,
    pub type_name: Option<String>,
    pub visibility: Visibility,
    pub line: u32,
}

/// An import spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportInfo {
    pub path: String,
    /// Explicit alias, including `_` and `.`
    pub alias: Option<String>,
    pub line: u32,
}

impl ImportInfo {
    /// Name the import is referred to by inside the file
    pub fn local_name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => self.path.rsplit('/').next().unwrap_or(&self.path),
        }
    }
}

/// Everything extracted from one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFile {
    /// Path relative to the project root, `/`-separated
    pub path: String,
    /// Declared package name
    pub package: String,
    pub imports: Vec<ImportInfo>,
    pub functions: Vec<FunctionInfo>,
    pub types: Vec<TypeInfo>,
    pub values: Vec<ValueInfo>,
    pub content_hash: String,
    pub line_count: u32,
}

/// A compilable unit: the files of one directory sharing a package clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedPackage {
    /// Import path (`module/dir`), unique within a parse result
    pub import_path: String,
    /// Declared package name
    pub name: String,
    /// Directory relative to the project root (empty for the root)
    pub dir: String,
    pub files: Vec<ParsedFile>,
}

/// Output of [`crate::core::parser::CodeParser::parse`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    /// Canonicalized project root
    pub root: PathBuf,
    /// Module path from `go.mod`, when present
    pub module_path: Option<String>,
    /// Sorted by import path
    pub packages: Vec<ParsedPackage>,
    /// Files that were skipped
    pub errors: Vec<FileParseError>,
}

impl ParseResult {
    pub fn file_count(&self) -> usize {
        self.packages.iter().map(|p| p.files.len()).sum()
    }

    pub fn package(&self, import_path: &str) -> Option<&ParsedPackage> {
        self.packages.iter().find(|p| p.import_path == import_path)
    }
}
