//! Data models for the property graph

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::model::{CallType, Visibility};

/// Node label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    Project,
    Package,
    File,
    Function,
    Method,
    Struct,
    Interface,
    Field,
    Constant,
    Variable,
    Import,
}

impl NodeType {
    pub const ALL: [NodeType; 11] = [
        Self::Project,
        Self::Package,
        Self::File,
        Self::Function,
        Self::Method,
        Self::Struct,
        Self::Interface,
        Self::Field,
        Self::Constant,
        Self::Variable,
        Self::Import,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "Project",
            Self::Package => "Package",
            Self::File => "File",
            Self::Function => "Function",
            Self::Method => "Method",
            Self::Struct => "Struct",
            Self::Interface => "Interface",
            Self::Field => "Field",
            Self::Constant => "Constant",
            Self::Variable => "Variable",
            Self::Import => "Import",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown node type: {}", s))
    }
}

/// Relationship label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Contains,
    Imports,
    Calls,
    Implements,
    HasMethod,
    HasField,
    DependsOn,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 7] = [
        Self::Contains,
        Self::Imports,
        Self::Calls,
        Self::Implements,
        Self::HasMethod,
        Self::HasField,
        Self::DependsOn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "CONTAINS",
            Self::Imports => "IMPORTS",
            Self::Calls => "CALLS",
            Self::Implements => "IMPLEMENTS",
            Self::HasMethod => "HAS_METHOD",
            Self::HasField => "HAS_FIELD",
            Self::DependsOn => "DEPENDS_ON",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown relationship type: {}", s))
    }
}

/// Shared by Function and Method nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionProperties {
    pub package: String,
    pub file: String,
    pub receiver: Option<String>,
    pub pointer_receiver: bool,
    pub signature: String,
    pub visibility: Visibility,
    pub start_line: u32,
    pub end_line: u32,
    pub complexity: u32,
    /// Calls into code outside the project with no Import node to point at
    pub external_calls: u32,
    pub unresolved_calls: u32,
}

/// Shared by Struct and Interface nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeProperties {
    pub package: String,
    pub file: String,
    pub visibility: Visibility,
    pub start_line: u32,
    pub end_line: u32,
    /// Struct field count
    pub field_count: usize,
    /// Interface method signatures as declared
    pub methods: Vec<String>,
    /// Embedded interfaces as written
    pub embeds: Vec<String>,
}

/// Shared by Constant and Variable nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueProperties {
    pub package: String,
    pub file: String,
    pub type_name: Option<String>,
    pub visibility: Visibility,
    pub line: u32,
}

/// Typed property bag, one schema per node type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeProperties {
    Project {
        root: String,
        module_path: Option<String>,
        parse_errors: usize,
    },
    Package {
        import_path: String,
        name: String,
        dir: String,
        file_count: usize,
    },
    File {
        package: String,
        content_hash: String,
        line_count: u32,
    },
    Function(FunctionProperties),
    Type(TypeProperties),
    Field {
        package: String,
        owner: String,
        type_name: String,
        visibility: Visibility,
        embedded: bool,
        line: u32,
    },
    Value(ValueProperties),
    Import {
        path: String,
        standard_library: bool,
    },
}

impl NodeProperties {
    /// Owning package import path, where the node has one
    pub fn package(&self) -> Option<&str> {
        match self {
            Self::Project { .. } | Self::Import { .. } => None,
            Self::Package { import_path, .. } => Some(import_path),
            Self::File { package, .. } | Self::Field { package, .. } => Some(package),
            Self::Function(p) => Some(&p.package),
            Self::Type(p) => Some(&p.package),
            Self::Value(p) => Some(&p.package),
        }
    }
}

/// Typed property bag, one schema per relationship type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationshipProperties {
    Contains,
    Imports {
        alias: Option<String>,
        line: u32,
    },
    Calls {
        call_type: CallType,
        line: u32,
        name_matched: bool,
    },
    Implements {
        pointer_receiver: bool,
    },
    HasMethod {
        pointer_receiver: bool,
    },
    HasField {
        embedded: bool,
    },
    DependsOn {
        weight: usize,
        in_cycle: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: Uuid,
    pub project_id: String,
    pub node_type: NodeType,
    pub name: String,
    pub path: Option<String>,
    pub properties: NodeProperties,
    pub created_at: DateTime<Utc>,
}

impl GraphNode {
    pub fn package(&self) -> Option<&str> {
        self.properties.package()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub id: Uuid,
    pub project_id: String,
    pub rel_type: RelationshipType,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub properties: RelationshipProperties,
    pub created_at: DateTime<Utc>,
}

/// Summary counts recorded with every import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub files: usize,
    pub packages: usize,
    pub functions: usize,
    pub methods: usize,
    pub structs: usize,
    pub interfaces: usize,
    pub external_imports: usize,
    pub implementations: usize,
    pub resolved_calls: usize,
    pub unresolved_calls: usize,
    pub cycles: usize,
    pub parse_errors: usize,
}

/// The unit of persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub project_id: String,
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
    pub summary: AnalysisSummary,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn nodes_of(&self, node_type: NodeType) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }

    pub fn relationships_of(
        &self,
        rel_type: RelationshipType,
    ) -> impl Iterator<Item = &GraphRelationship> {
        self.relationships
            .iter()
            .filter(move |r| r.rel_type == rel_type)
    }

    pub fn node(&self, id: Uuid) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearStats {
    pub nodes: usize,
    pub relationships: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    pub cleared: ClearStats,
    pub nodes_written: usize,
    pub relationships_written: usize,
    pub node_batches: usize,
    pub relationship_batches: usize,
    pub duration_ms: u64,
}

/// Outcome of index creation; failures never abort a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub created: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Per-project summary row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub project_id: String,
    pub node_count: usize,
    pub relationship_count: usize,
    pub summary: AnalysisSummary,
    pub analyzed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_round_trip_through_str() {
        for node_type in NodeType::ALL {
            assert_eq!(node_type.as_str().parse::<NodeType>().unwrap(), node_type);
        }
        assert_eq!("has_method".parse::<RelationshipType>().unwrap(), RelationshipType::HasMethod);
        assert!("OWNS".parse::<RelationshipType>().is_err());
    }

    #[test]
    fn test_properties_are_tagged() {
        let props = RelationshipProperties::DependsOn {
            weight: 2,
            in_cycle: true,
        };
        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["kind"], "depends_on");
        assert_eq!(json["in_cycle"], true);

        let node = NodeProperties::Value(ValueProperties {
            package: "example.com/app".to_string(),
            file: "main.go".to_string(),
            type_name: None,
            visibility: Visibility::Exported,
            line: 3,
        });
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "value");
        assert_eq!(json["visibility"], "exported");
        assert_eq!(node.package(), Some("example.com/app"));
    }
}
