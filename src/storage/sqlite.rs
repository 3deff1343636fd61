//! SQLite-backed property graph repository

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value as SqlValue, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::{Map, Number, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::models::{
    AnalysisResult, AnalysisSummary, ClearStats, GraphNode, GraphRelationship, ImportStats,
    IndexReport, NodeType, ProjectMetadata, RelationshipType,
};
use crate::core::config::StoreConfig;
use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    node_type TEXT NOT NULL,
    name TEXT NOT NULL,
    path TEXT,
    package TEXT,
    properties TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS graph_relationships (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    rel_type TEXT NOT NULL,
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    properties TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (source_id) REFERENCES graph_nodes(id) ON DELETE CASCADE,
    FOREIGN KEY (target_id) REFERENCES graph_nodes(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS project_metadata (
    project_id TEXT PRIMARY KEY,
    files INTEGER NOT NULL,
    packages INTEGER NOT NULL,
    functions INTEGER NOT NULL,
    structs INTEGER NOT NULL,
    node_count INTEGER NOT NULL,
    relationship_count INTEGER NOT NULL,
    summary TEXT NOT NULL,
    analyzed_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Memory,
    File(PathBuf),
}

fn parse_endpoint(uri: &str) -> Result<Endpoint, StoreError> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(StoreError::NotConfigured);
    }
    let location = uri
        .strip_prefix("sqlite://")
        .or_else(|| uri.strip_prefix("sqlite:"))
        .unwrap_or(uri);
    match location {
        "" => Err(StoreError::NotConfigured),
        ":memory:" => Ok(Endpoint::Memory),
        path => Ok(Endpoint::File(PathBuf::from(path))),
    }
}

/// Graph repository over a single long-lived connection
pub struct GraphRepository {
    conn: Connection,
    endpoint: String,
    batch_size: usize,
}

impl GraphRepository {
    /// Open and verify the store, retrying with exponential backoff.
    pub async fn connect(
        config: &StoreConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, StoreError> {
        let endpoint = parse_endpoint(&config.uri)?;
        if config.username.is_some() || config.password.is_some() {
            debug!("Credentials are not used by the embedded store");
        }

        let max_attempts = config.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            attempt += 1;

            match open_and_ping(&endpoint) {
                Ok(conn) => {
                    info!("Connected to graph store {} (attempt {})", config.uri, attempt);
                    return Ok(Self {
                        conn,
                        endpoint: config.uri.clone(),
                        batch_size: config.batch_size.max(1),
                    });
                }
                Err(source) if attempt >= max_attempts => {
                    return Err(StoreError::Connection {
                        endpoint: config.uri.clone(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    let delay = config.retry.delay_after(attempt);
                    warn!(
                        "Connection attempt {}/{} to {} failed: {}; retrying in {:?}",
                        attempt, max_attempts, config.uri, e, delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory(batch_size: usize) -> Result<Self, StoreError> {
        let conn = open_and_ping(&Endpoint::Memory)?;
        Ok(Self {
            conn,
            endpoint: ":memory:".to_string(),
            batch_size: batch_size.max(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Create tables if missing
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(SCHEMA)
            .map_err(StoreError::Schema)
    }

    /// Create indexes and uniqueness constraints. Failures are logged and
    /// reported, never fatal.
    pub fn ensure_indexes(&self) -> IndexReport {
        let mut statements = Vec::new();
        for node_type in NodeType::ALL {
            let label = node_type.as_str();
            let suffix = label.to_lowercase();
            statements.push((
                format!("uq_{}_id", suffix),
                format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_{}_id ON graph_nodes(id) WHERE node_type = '{}'",
                    suffix, label
                ),
            ));
            statements.push((
                format!("idx_{}_name", suffix),
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_name ON graph_nodes(name) WHERE node_type = '{}'",
                    suffix, label
                ),
            ));
        }
        for (name, sql) in [
            (
                "idx_nodes_package_name",
                "CREATE INDEX IF NOT EXISTS idx_nodes_package_name ON graph_nodes(package, name)",
            ),
            (
                "idx_nodes_project",
                "CREATE INDEX IF NOT EXISTS idx_nodes_project ON graph_nodes(project_id, node_type)",
            ),
            (
                "idx_rels_project",
                "CREATE INDEX IF NOT EXISTS idx_rels_project ON graph_relationships(project_id, rel_type)",
            ),
            (
                "idx_rels_source",
                "CREATE INDEX IF NOT EXISTS idx_rels_source ON graph_relationships(source_id)",
            ),
            (
                "idx_rels_target",
                "CREATE INDEX IF NOT EXISTS idx_rels_target ON graph_relationships(target_id)",
            ),
        ] {
            statements.push((name.to_string(), sql.to_string()));
        }

        let mut report = IndexReport::default();
        for (name, sql) in statements {
            match self.conn.execute_batch(&sql) {
                Ok(()) => report.created.push(name),
                Err(e) => {
                    warn!("Failed to create index {}: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        debug!(
            created = report.created.len(),
            failed = report.failed.len(),
            "Ensured indexes"
        );
        report
    }

    /// Clear-then-write the result's project. Nodes are written before any
    /// relationship, both in batches grouped by type.
    ///
    /// The scoped clear and every batch share one import transaction, each
    /// batch in its own savepoint. A failed batch or a cancellation rolls the
    /// whole import back, so the project's previous graph stays in place.
    pub fn import(
        &mut self,
        result: &AnalysisResult,
        cancel: &CancellationToken,
    ) -> Result<ImportStats, StoreError> {
        let started = Instant::now();
        validate_result(result)?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let batch_size = self.batch_size;
        let mut tx = self.conn.transaction()?;
        let mut stats = ImportStats {
            cleared: clear_scoped(&tx, &result.project_id)?,
            ..ImportStats::default()
        };

        let mut nodes_by_type: BTreeMap<NodeType, Vec<&GraphNode>> = BTreeMap::new();
        for node in &result.nodes {
            nodes_by_type.entry(node.node_type).or_default().push(node);
        }
        for (node_type, nodes) in &nodes_by_type {
            for (index, batch) in nodes.chunks(batch_size).enumerate() {
                if cancel.is_cancelled() {
                    return Err(StoreError::Cancelled);
                }
                let start = index * batch_size;
                write_nodes(&mut tx, batch).map_err(|source| StoreError::Write {
                    entity: format!("{} nodes", node_type),
                    batch_start: start,
                    batch_end: start + batch.len(),
                    source,
                })?;
                stats.nodes_written += batch.len();
                stats.node_batches += 1;
            }
        }

        let mut rels_by_type: BTreeMap<RelationshipType, Vec<&GraphRelationship>> = BTreeMap::new();
        for rel in &result.relationships {
            rels_by_type.entry(rel.rel_type).or_default().push(rel);
        }
        for (rel_type, rels) in &rels_by_type {
            for (index, batch) in rels.chunks(batch_size).enumerate() {
                if cancel.is_cancelled() {
                    return Err(StoreError::Cancelled);
                }
                let start = index * batch_size;
                write_relationships(&mut tx, batch).map_err(|source| StoreError::Write {
                    entity: format!("{} relationships", rel_type),
                    batch_start: start,
                    batch_end: start + batch.len(),
                    source,
                })?;
                stats.relationships_written += batch.len();
                stats.relationship_batches += 1;
            }
        }

        upsert_metadata(&tx, result)?;
        tx.commit()?;

        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            nodes = stats.nodes_written,
            relationships = stats.relationships_written,
            batches = stats.node_batches + stats.relationship_batches,
            "Imported project {} in {}ms",
            result.project_id,
            stats.duration_ms
        );
        Ok(stats)
    }

    /// Run a caller-supplied query. Parameters bind by name (`:name`, or a
    /// bare key which is prefixed with `:`). Errors are returned verbatim.
    pub fn execute_query(
        &self,
        query: &str,
        parameters: &Map<String, Value>,
    ) -> Result<Vec<Map<String, Value>>, StoreError> {
        let query_error = |source| StoreError::Query {
            query: query.to_string(),
            source,
        };

        let mut stmt = self.conn.prepare(query).map_err(query_error)?;
        for (name, value) in parameters {
            let key = if name.starts_with([':', '@', '$']) {
                name.clone()
            } else {
                format!(":{}", name)
            };
            match stmt.parameter_index(&key).map_err(query_error)? {
                Some(index) => stmt
                    .raw_bind_parameter(index, json_to_sql(value))
                    .map_err(query_error)?,
                None => debug!("Query has no parameter {}", key),
            }
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.raw_query();
        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(query_error)? {
            let mut record = Map::new();
            for (i, column) in columns.iter().enumerate() {
                let value = row.get_ref(i).map_err(query_error)?;
                record.insert(column.clone(), sql_to_json(value));
            }
            result.push(record);
        }
        Ok(result)
    }

    /// Delete everything scoped to one project
    pub fn clear_project(&self, project_id: &str) -> Result<ClearStats, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let stats = clear_scoped(&tx, project_id)?;
        tx.commit()?;

        debug!(
            "Cleared project {}: {} nodes, {} relationships",
            project_id, stats.nodes, stats.relationships
        );
        Ok(stats)
    }

    /// Delete every project in the store
    pub fn clear_all(&self) -> Result<ClearStats, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let relationships = tx.execute("DELETE FROM graph_relationships", [])?;
        let nodes = tx.execute("DELETE FROM graph_nodes", [])?;
        tx.execute("DELETE FROM project_metadata", [])?;
        tx.commit()?;

        warn!("Cleared entire store: {} nodes, {} relationships", nodes, relationships);
        Ok(ClearStats {
            nodes,
            relationships,
        })
    }

    pub fn count_nodes(
        &self,
        project_id: &str,
        node_type: Option<NodeType>,
    ) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM graph_nodes WHERE project_id = ?1 AND (?2 IS NULL OR node_type = ?2)",
            params![project_id, node_type.map(|t| t.as_str())],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_relationships(
        &self,
        project_id: &str,
        rel_type: Option<RelationshipType>,
    ) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM graph_relationships WHERE project_id = ?1 AND (?2 IS NULL OR rel_type = ?2)",
            params![project_id, rel_type.map(|t| t.as_str())],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn project_metadata(&self, project_id: &str) -> Result<Option<ProjectMetadata>, StoreError> {
        self.conn
            .query_row(
                "SELECT project_id, node_count, relationship_count, summary, analyzed_at, updated_at
                 FROM project_metadata WHERE project_id = ?1",
                params![project_id],
                metadata_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// All projects, most recently analyzed first
    pub fn list_projects(&self) -> Result<Vec<ProjectMetadata>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT project_id, node_count, relationship_count, summary, analyzed_at, updated_at
             FROM project_metadata ORDER BY analyzed_at DESC",
        )?;
        let rows = stmt.query_map([], metadata_from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

fn open_and_ping(endpoint: &Endpoint) -> rusqlite::Result<Connection> {
    let conn = match endpoint {
        Endpoint::Memory => Connection::open_in_memory()?,
        Endpoint::File(path) => Connection::open(path)?,
    };
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(conn)
}

fn clear_scoped(conn: &Connection, project_id: &str) -> rusqlite::Result<ClearStats> {
    let relationships = conn.execute(
        "DELETE FROM graph_relationships WHERE project_id = ?1",
        params![project_id],
    )?;
    let nodes = conn.execute(
        "DELETE FROM graph_nodes WHERE project_id = ?1",
        params![project_id],
    )?;
    conn.execute(
        "DELETE FROM project_metadata WHERE project_id = ?1",
        params![project_id],
    )?;
    Ok(ClearStats {
        nodes,
        relationships,
    })
}

fn write_nodes(tx: &mut Transaction<'_>, batch: &[&GraphNode]) -> rusqlite::Result<()> {
    let sp = tx.savepoint()?;
    {
        let mut stmt = sp.prepare_cached(
            "INSERT INTO graph_nodes (id, project_id, node_type, name, path, package, properties, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for node in batch {
            let properties = to_json(&node.properties)?;
            stmt.execute(params![
                node.id.to_string(),
                node.project_id,
                node.node_type.as_str(),
                node.name,
                node.path,
                node.package(),
                properties,
                node.created_at.to_rfc3339(),
            ])?;
        }
    }
    sp.commit()
}

fn write_relationships(tx: &mut Transaction<'_>, batch: &[&GraphRelationship]) -> rusqlite::Result<()> {
    let sp = tx.savepoint()?;
    {
        let mut stmt = sp.prepare_cached(
            "INSERT INTO graph_relationships (id, project_id, rel_type, source_id, target_id, properties, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for rel in batch {
            let properties = to_json(&rel.properties)?;
            stmt.execute(params![
                rel.id.to_string(),
                rel.project_id,
                rel.rel_type.as_str(),
                rel.source_id.to_string(),
                rel.target_id.to_string(),
                properties,
                rel.created_at.to_rfc3339(),
            ])?;
        }
    }
    sp.commit()
}

fn upsert_metadata(conn: &Connection, result: &AnalysisResult) -> rusqlite::Result<()> {
    let summary = to_json(&result.summary)?;
    conn.execute(
        "INSERT INTO project_metadata
            (project_id, files, packages, functions, structs, node_count, relationship_count, summary, analyzed_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(project_id) DO UPDATE SET
            files = excluded.files,
            packages = excluded.packages,
            functions = excluded.functions,
            structs = excluded.structs,
            node_count = excluded.node_count,
            relationship_count = excluded.relationship_count,
            summary = excluded.summary,
            analyzed_at = excluded.analyzed_at,
            updated_at = excluded.updated_at",
        params![
            result.project_id,
            result.summary.files as i64,
            result.summary.packages as i64,
            result.summary.functions as i64,
            result.summary.structs as i64,
            result.nodes.len() as i64,
            result.relationships.len() as i64,
            summary,
            result.analyzed_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Reject results whose scoping or endpoints are inconsistent before
/// anything is written.
fn validate_result(result: &AnalysisResult) -> Result<(), StoreError> {
    let mut ids = HashSet::with_capacity(result.nodes.len());
    for node in &result.nodes {
        if node.project_id != result.project_id {
            return Err(StoreError::ProjectMismatch {
                kind: "node",
                id: node.id,
                expected: result.project_id.clone(),
                found: node.project_id.clone(),
            });
        }
        ids.insert(node.id);
    }
    for rel in &result.relationships {
        if rel.project_id != result.project_id {
            return Err(StoreError::ProjectMismatch {
                kind: "relationship",
                id: rel.id,
                expected: result.project_id.clone(),
                found: rel.project_id.clone(),
            });
        }
        for endpoint in [rel.source_id, rel.target_id] {
            if !ids.contains(&endpoint) {
                return Err(StoreError::DanglingRelationship {
                    relationship: rel.id,
                    endpoint,
                });
            }
        }
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn metadata_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectMetadata> {
    let summary: String = row.get(3)?;
    let summary: AnalysisSummary = serde_json::from_str(&summary)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    Ok(ProjectMetadata {
        project_id: row.get(0)?,
        node_count: row.get::<_, i64>(1)? as usize,
        relationship_count: row.get::<_, i64>(2)? as usize,
        summary,
        analyzed_at: parse_time(4, &row.get::<_, String>(4)?)?,
        updated_at: parse_time(5, &row.get::<_, String>(5)?)?,
    })
}

fn parse_time(column: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::core::config::RetryConfig;
    use crate::core::model::Visibility;
    use crate::storage::models::{NodeProperties, RelationshipProperties, ValueProperties};

    fn node(project: &str, name: &str) -> GraphNode {
        GraphNode {
            id: Uuid::new_v4(),
            project_id: project.to_string(),
            node_type: NodeType::Constant,
            name: name.to_string(),
            path: Some("main.go".to_string()),
            properties: NodeProperties::Value(ValueProperties {
                package: "example.com/app".to_string(),
                file: "main.go".to_string(),
                type_name: None,
                visibility: Visibility::Exported,
                line: 1,
            }),
            created_at: Utc::now(),
        }
    }

    fn relate(project: &str, source: &GraphNode, target: &GraphNode) -> GraphRelationship {
        GraphRelationship {
            id: Uuid::new_v4(),
            project_id: project.to_string(),
            rel_type: RelationshipType::Contains,
            source_id: source.id,
            target_id: target.id,
            properties: RelationshipProperties::Contains,
            created_at: Utc::now(),
        }
    }

    /// A chain of `n` nodes linked by n - 1 relationships
    fn chain(project: &str, n: usize) -> AnalysisResult {
        let nodes: Vec<_> = (0..n).map(|i| node(project, &format!("N{}", i))).collect();
        let relationships = nodes.windows(2).map(|w| relate(project, &w[0], &w[1])).collect();
        AnalysisResult {
            project_id: project.to_string(),
            nodes,
            relationships,
            summary: AnalysisSummary::default(),
            analyzed_at: Utc::now(),
        }
    }

    fn repository(batch_size: usize) -> GraphRepository {
        let repo = GraphRepository::open_in_memory(batch_size).unwrap();
        repo.init_schema().unwrap();
        repo
    }

    #[test]
    fn test_parse_endpoint() {
        assert!(matches!(parse_endpoint("  "), Err(StoreError::NotConfigured)));
        assert!(matches!(parse_endpoint("sqlite://"), Err(StoreError::NotConfigured)));
        assert_eq!(parse_endpoint("sqlite::memory:").unwrap(), Endpoint::Memory);
        assert_eq!(parse_endpoint(":memory:").unwrap(), Endpoint::Memory);
        assert_eq!(
            parse_endpoint("sqlite://data/graph.db").unwrap(),
            Endpoint::File(PathBuf::from("data/graph.db"))
        );
        assert_eq!(
            parse_endpoint("graph.db").unwrap(),
            Endpoint::File(PathBuf::from("graph.db"))
        );
    }

    #[test]
    fn test_ensure_indexes_is_idempotent() {
        let repo = repository(10);
        let first = repo.ensure_indexes();
        assert!(first.failed.is_empty());
        let second = repo.ensure_indexes();
        assert_eq!(first.created, second.created);
    }

    #[test]
    fn test_ensure_indexes_reports_failures() {
        // No schema: every index fails but the call still returns
        let repo = GraphRepository::open_in_memory(10).unwrap();
        let report = repo.ensure_indexes();
        assert!(report.created.is_empty());
        assert!(!report.failed.is_empty());
    }

    #[test]
    fn test_import_batches_and_reimport() {
        let mut repo = repository(3);
        let result = chain("demo", 10);
        let cancel = CancellationToken::new();

        let stats = repo.import(&result, &cancel).unwrap();
        assert_eq!(stats.nodes_written, 10);
        assert_eq!(stats.relationships_written, 9);
        assert_eq!(stats.node_batches, 4);
        assert_eq!(stats.relationship_batches, 3);

        let again = repo.import(&result, &cancel).unwrap();
        assert_eq!(again.cleared.nodes, 10);
        assert_eq!(again.cleared.relationships, 9);
        assert_eq!(repo.count_nodes("demo", None).unwrap(), 10);
        assert_eq!(repo.count_relationships("demo", None).unwrap(), 9);
        assert_eq!(
            repo.count_nodes("demo", Some(NodeType::Constant)).unwrap(),
            10
        );

        let metadata = repo.project_metadata("demo").unwrap().unwrap();
        assert_eq!(metadata.node_count, 10);
        assert_eq!(metadata.relationship_count, 9);
    }

    #[test]
    fn test_dangling_relationship_fails_before_writing() {
        let mut repo = repository(100);
        repo.import(&chain("demo", 2), &CancellationToken::new())
            .unwrap();

        let mut broken = chain("demo", 3);
        let orphan = node("demo", "orphan");
        let dangling = relate("demo", &broken.nodes[0], &orphan);
        let dangling_id = dangling.id;
        broken.relationships.push(dangling);

        let err = repo.import(&broken, &CancellationToken::new()).unwrap_err();
        match err {
            StoreError::DanglingRelationship {
                relationship,
                endpoint,
            } => {
                assert_eq!(relationship, dangling_id);
                assert_eq!(endpoint, orphan.id);
            }
            other => panic!("unexpected error: {}", other),
        }
        // Previous import untouched
        assert_eq!(repo.count_nodes("demo", None).unwrap(), 2);
    }

    #[test]
    fn test_project_mismatch_rejected() {
        let mut repo = repository(100);
        let mut result = chain("demo", 2);
        result.nodes[1].project_id = "other".to_string();
        let err = repo.import(&result, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, StoreError::ProjectMismatch { kind: "node", .. }));
    }

    #[test]
    fn test_scoped_clear_and_clear_all() {
        let mut repo = repository(100);
        let cancel = CancellationToken::new();
        repo.import(&chain("alpha", 4), &cancel).unwrap();
        repo.import(&chain("beta", 3), &cancel).unwrap();

        let cleared = repo.clear_project("alpha").unwrap();
        assert_eq!(cleared.nodes, 4);
        assert_eq!(cleared.relationships, 3);
        assert_eq!(repo.count_nodes("alpha", None).unwrap(), 0);
        assert_eq!(repo.count_nodes("beta", None).unwrap(), 3);
        assert!(repo.project_metadata("alpha").unwrap().is_none());
        assert_eq!(repo.list_projects().unwrap().len(), 1);

        let all = repo.clear_all().unwrap();
        assert_eq!(all.nodes, 3);
        assert_eq!(repo.count_nodes("beta", None).unwrap(), 0);
    }

    #[test]
    fn test_import_honors_cancellation() {
        let mut repo = repository(2);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = repo.import(&chain("demo", 5), &cancel).unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
        assert_eq!(repo.count_nodes("demo", None).unwrap(), 0);
    }

    #[test]
    fn test_failed_batch_keeps_previous_graph() {
        let mut repo = repository(2);
        let cancel = CancellationToken::new();
        repo.import(&chain("beta", 3), &cancel).unwrap();
        let alpha = chain("alpha", 4);
        repo.import(&alpha, &cancel).unwrap();

        // Fourth node collides with a row owned by another project
        let mut next = chain("beta", 5);
        let collided = next.nodes[3].id;
        next.nodes[3].id = alpha.nodes[0].id;
        for rel in &mut next.relationships {
            if rel.source_id == collided {
                rel.source_id = alpha.nodes[0].id;
            }
            if rel.target_id == collided {
                rel.target_id = alpha.nodes[0].id;
            }
        }

        let err = repo.import(&next, &cancel).unwrap_err();
        match err {
            StoreError::Write {
                entity,
                batch_start,
                batch_end,
                ..
            } => {
                assert_eq!(entity, "Constant nodes");
                assert_eq!((batch_start, batch_end), (2, 4));
            }
            other => panic!("unexpected error: {}", other),
        }

        assert_eq!(repo.count_nodes("beta", None).unwrap(), 3);
        assert_eq!(repo.count_relationships("beta", None).unwrap(), 2);
        assert_eq!(repo.project_metadata("beta").unwrap().unwrap().node_count, 3);
        assert_eq!(repo.count_nodes("alpha", None).unwrap(), 4);
    }

    #[test]
    fn test_execute_query_with_parameters() {
        let mut repo = repository(100);
        repo.import(&chain("demo", 3), &CancellationToken::new())
            .unwrap();

        let mut parameters = Map::new();
        parameters.insert("project".to_string(), Value::from("demo"));
        parameters.insert(":name".to_string(), Value::from("N1"));
        let rows = repo
            .execute_query(
                "SELECT name, json_extract(properties, '$.line') AS line FROM graph_nodes
                 WHERE project_id = :project AND name = :name",
                &parameters,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "N1");
        assert_eq!(rows[0]["line"], 1);
    }

    #[test]
    fn test_query_errors_are_verbatim() {
        let repo = repository(100);
        let err = repo
            .execute_query("SELECT * FROM no_such_table", &Map::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::Query { .. }));
        assert!(err.to_string().contains("no_such_table"));
    }

    #[tokio::test]
    async fn test_connect_not_configured() {
        let config = StoreConfig {
            uri: String::new(),
            ..StoreConfig::default()
        };
        let err = GraphRepository::connect(&config, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "store endpoint not configured");
    }

    #[tokio::test]
    async fn test_connect_exhausts_retry_budget() {
        let dir = tempfile::TempDir::new().unwrap();
        let unreachable = dir.path().join("missing").join("graph.db");
        let config = StoreConfig {
            uri: format!("sqlite://{}", unreachable.display()),
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 5,
                multiplier: 2.0,
                max_delay_ms: 20,
            },
            ..StoreConfig::default()
        };
        let err = GraphRepository::connect(&config, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        match err {
            StoreError::Connection {
                endpoint, attempts, ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(endpoint, config.uri);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_file_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StoreConfig {
            uri: format!("sqlite://{}", dir.path().join("graph.db").display()),
            ..StoreConfig::default()
        };
        let repo = GraphRepository::connect(&config, &CancellationToken::new())
            .await
            .unwrap();
        repo.init_schema().unwrap();
        assert_eq!(repo.count_nodes("demo", None).unwrap(), 0);
        assert_eq!(repo.endpoint(), config.uri);
    }
}
