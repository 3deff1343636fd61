//! Property graph persistence

pub mod models;
pub mod sqlite;

pub use models::{
    AnalysisResult, AnalysisSummary, ClearStats, GraphNode, GraphRelationship, ImportStats,
    IndexReport, NodeProperties, NodeType, ProjectMetadata, RelationshipProperties,
    RelationshipType,
};
pub use sqlite::GraphRepository;
