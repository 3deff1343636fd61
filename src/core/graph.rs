//! Graph model builder
//!
//! Maps a parse result and its analysis report onto typed nodes and
//! relationships. Pure: no I/O, no shared state between builds.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::analysis::{AnalysisReport, CallTarget, FunctionRef, TypeKey};
use crate::core::config::IdentityStrategy;
use crate::core::model::{FunctionInfo, ParseResult, ParsedFile, TypeKind, ValueKind};
use crate::storage::models::{
    AnalysisResult, AnalysisSummary, FunctionProperties, GraphNode, GraphRelationship,
    NodeProperties, NodeType, RelationshipProperties, RelationshipType, TypeProperties,
    ValueProperties,
};

/// Builds an [`AnalysisResult`] from analysis output
pub struct GraphBuilder {
    identity: IdentityStrategy,
    namespace: Uuid,
}

impl GraphBuilder {
    pub fn new(identity: IdentityStrategy) -> Self {
        Self {
            identity,
            namespace: Uuid::new_v5(&Uuid::NAMESPACE_URL, b"gograph"),
        }
    }

    pub fn build(
        &self,
        project_id: &str,
        parse: &ParseResult,
        report: &AnalysisReport,
    ) -> AnalysisResult {
        let mut state = BuildState::new(self, project_id, parse);

        state.add_project(parse);
        state.add_packages_and_files(parse);
        state.add_types_and_values(parse);
        state.add_functions(parse, report);
        state.add_imports(parse);
        state.add_dependencies(report);
        state.add_implementations(report);
        state.add_calls(report);

        let summary = state.summary(parse, report);
        debug!(
            nodes = state.nodes.len(),
            relationships = state.relationships.len(),
            "Built graph model for {}",
            project_id
        );

        AnalysisResult {
            project_id: project_id.to_string(),
            nodes: state.nodes,
            relationships: state.relationships,
            summary,
            analyzed_at: state.now,
        }
    }
}

struct BuildState<'b> {
    builder: &'b GraphBuilder,
    project_id: String,
    now: DateTime<Utc>,
    nodes: Vec<GraphNode>,
    relationships: Vec<GraphRelationship>,
    project: Uuid,
    packages: HashMap<String, Uuid>,
    files: HashMap<String, Uuid>,
    types: HashMap<TypeKey, Uuid>,
    functions: HashMap<FunctionRef, Uuid>,
    imports: HashMap<String, Uuid>,
    /// Import paths outside the project
    external: BTreeSet<String>,
    /// (caller, import node) pairs already linked
    import_calls: HashSet<(Uuid, Uuid)>,
    unresolved_calls: usize,
}

impl<'b> BuildState<'b> {
    fn new(builder: &'b GraphBuilder, project_id: &str, parse: &ParseResult) -> Self {
        let internal: HashSet<&str> = parse.packages.iter().map(|p| p.import_path.as_str()).collect();
        let external = parse
            .packages
            .iter()
            .flat_map(|p| &p.files)
            .flat_map(|f| &f.imports)
            .filter(|i| !internal.contains(i.path.as_str()))
            .map(|i| i.path.clone())
            .collect();

        Self {
            builder,
            project_id: project_id.to_string(),
            now: Utc::now(),
            nodes: Vec::new(),
            relationships: Vec::new(),
            project: Uuid::nil(),
            packages: HashMap::new(),
            files: HashMap::new(),
            types: HashMap::new(),
            functions: HashMap::new(),
            imports: HashMap::new(),
            external,
            import_calls: HashSet::new(),
            unresolved_calls: 0,
        }
    }

    fn id_for(&self, key: &str) -> Uuid {
        match self.builder.identity {
            IdentityStrategy::Random => Uuid::new_v4(),
            IdentityStrategy::ContentAddressed => {
                let scoped = format!("{}\u{0}{}", self.project_id, key);
                Uuid::new_v5(&self.builder.namespace, scoped.as_bytes())
            }
        }
    }

    fn add_node(
        &mut self,
        node_type: NodeType,
        qualified_name: &str,
        name: &str,
        path: Option<&str>,
        line: u32,
        properties: NodeProperties,
    ) -> Uuid {
        let id = self.id_for(&format!(
            "{}\u{0}{}\u{0}{}\u{0}{}",
            node_type,
            qualified_name,
            path.unwrap_or_default(),
            line
        ));
        self.nodes.push(GraphNode {
            id,
            project_id: self.project_id.clone(),
            node_type,
            name: name.to_string(),
            path: path.map(str::to_string),
            properties,
            created_at: self.now,
        });
        id
    }

    fn relate(
        &mut self,
        rel_type: RelationshipType,
        source_id: Uuid,
        target_id: Uuid,
        properties: RelationshipProperties,
    ) {
        let discriminator = serde_json::to_string(&properties).unwrap_or_default();
        let id = self.id_for(&format!(
            "{}\u{0}{}\u{0}{}\u{0}{}",
            rel_type, source_id, target_id, discriminator
        ));
        self.relationships.push(GraphRelationship {
            id,
            project_id: self.project_id.clone(),
            rel_type,
            source_id,
            target_id,
            properties,
            created_at: self.now,
        });
    }

    fn contains(&mut self, owner: Uuid, child: Uuid) {
        self.relate(
            RelationshipType::Contains,
            owner,
            child,
            RelationshipProperties::Contains,
        );
    }

    fn add_project(&mut self, parse: &ParseResult) {
        let root = parse.root.to_string_lossy().to_string();
        let project_id = self.project_id.clone();
        self.project = self.add_node(
            NodeType::Project,
            &project_id,
            &project_id,
            Some(&root),
            0,
            NodeProperties::Project {
                root: root.clone(),
                module_path: parse.module_path.clone(),
                parse_errors: parse.errors.len(),
            },
        );
    }

    fn add_packages_and_files(&mut self, parse: &ParseResult) {
        for package in &parse.packages {
            let dir = if package.dir.is_empty() { "." } else { package.dir.as_str() };
            let package_id = self.add_node(
                NodeType::Package,
                &package.import_path,
                &package.name,
                Some(dir),
                0,
                NodeProperties::Package {
                    import_path: package.import_path.clone(),
                    name: package.name.clone(),
                    dir: package.dir.clone(),
                    file_count: package.files.len(),
                },
            );
            self.contains(self.project, package_id);
            self.packages.insert(package.import_path.clone(), package_id);

            for file in &package.files {
                let name = file.path.rsplit('/').next().unwrap_or(&file.path);
                let file_id = self.add_node(
                    NodeType::File,
                    &file.path,
                    name,
                    Some(&file.path),
                    0,
                    NodeProperties::File {
                        package: package.import_path.clone(),
                        content_hash: file.content_hash.clone(),
                        line_count: file.line_count,
                    },
                );
                self.contains(package_id, file_id);
                self.files.insert(file.path.clone(), file_id);
            }
        }
    }

    fn add_types_and_values(&mut self, parse: &ParseResult) {
        for package in &parse.packages {
            for file in &package.files {
                let file_id = self.files[&file.path];
                self.add_file_types(&package.import_path, file, file_id);
                self.add_file_values(&package.import_path, file, file_id);
            }
        }
    }

    fn add_file_types(&mut self, package: &str, file: &ParsedFile, file_id: Uuid) {
        for type_info in &file.types {
            let key = TypeKey::new(package, type_info.name.as_str());
            if self.types.contains_key(&key) {
                continue;
            }
            let node_type = match type_info.kind {
                TypeKind::Struct => NodeType::Struct,
                TypeKind::Interface => NodeType::Interface,
            };
            let type_id = self.add_node(
                node_type,
                &key.to_string(),
                &type_info.name,
                Some(&file.path),
                type_info.span.start_line,
                NodeProperties::Type(TypeProperties {
                    package: package.to_string(),
                    file: file.path.clone(),
                    visibility: type_info.visibility,
                    start_line: type_info.span.start_line,
                    end_line: type_info.span.end_line,
                    field_count: type_info.fields.len(),
                    methods: type_info.methods.iter().map(|m| m.to_string()).collect(),
                    embeds: type_info.embeds.clone(),
                }),
            );
            self.contains(file_id, type_id);
            self.types.insert(key.clone(), type_id);

            for field in &type_info.fields {
                let field_id = self.add_node(
                    NodeType::Field,
                    &format!("{}.{}", key, field.name),
                    &field.name,
                    Some(&file.path),
                    field.line,
                    NodeProperties::Field {
                        package: package.to_string(),
                        owner: type_info.name.clone(),
                        type_name: field.type_name.clone(),
                        visibility: field.visibility,
                        embedded: field.embedded,
                        line: field.line,
                    },
                );
                self.contains(file_id, field_id);
                self.relate(
                    RelationshipType::HasField,
                    type_id,
                    field_id,
                    RelationshipProperties::HasField {
                        embedded: field.embedded,
                    },
                );
            }
        }
    }

    fn add_file_values(&mut self, package: &str, file: &ParsedFile, file_id: Uuid) {
        for value in &file.values {
            let node_type = match value.kind {
                ValueKind::Constant => NodeType::Constant,
                ValueKind::Variable => NodeType::Variable,
            };
            let value_id = self.add_node(
                node_type,
                &format!("{}.{}", package, value.name),
                &value.name,
                Some(&file.path),
                value.line,
                NodeProperties::Value(ValueProperties {
                    package: package.to_string(),
                    file: file.path.clone(),
                    type_name: value.type_name.clone(),
                    visibility: value.visibility,
                    line: value.line,
                }),
            );
            self.contains(file_id, value_id);
        }
    }

    fn add_functions(&mut self, parse: &ParseResult, report: &AnalysisReport) {
        // Calls with nowhere to point in the graph are kept as counters
        let mut counters: HashMap<&FunctionRef, (u32, u32)> = HashMap::new();
        for edge in &report.calls {
            match &edge.target {
                CallTarget::External { package, .. } if !self.external.contains(package) => {
                    counters.entry(&edge.caller).or_default().0 += 1;
                }
                CallTarget::Unresolved { .. } => {
                    counters.entry(&edge.caller).or_default().1 += 1;
                }
                _ => {}
            }
        }

        for package in &parse.packages {
            for file in &package.files {
                let file_id = self.files[&file.path];
                for function in &file.functions {
                    let function_ref = function_ref(&package.import_path, function);
                    let (external_calls, unresolved_calls) =
                        counters.get(&function_ref).copied().unwrap_or_default();
                    let node_type = if function.is_method() {
                        NodeType::Method
                    } else {
                        NodeType::Function
                    };
                    let function_id = self.add_node(
                        node_type,
                        &function_ref.to_string(),
                        &function.name,
                        Some(&file.path),
                        function.span.start_line,
                        NodeProperties::Function(FunctionProperties {
                            package: package.import_path.clone(),
                            file: file.path.clone(),
                            receiver: function.is_method().then(|| function.receiver.clone()),
                            pointer_receiver: function.pointer_receiver,
                            signature: function.signature.clone(),
                            visibility: function.visibility,
                            start_line: function.span.start_line,
                            end_line: function.span.end_line,
                            complexity: function.complexity,
                            external_calls,
                            unresolved_calls,
                        }),
                    );
                    self.contains(file_id, function_id);
                    self.functions.entry(function_ref).or_insert(function_id);

                    if function.is_method() {
                        let owner = TypeKey::new(package.import_path.as_str(), function.receiver.as_str());
                        if let Some(&struct_id) = self.types.get(&owner) {
                            self.relate(
                                RelationshipType::HasMethod,
                                struct_id,
                                function_id,
                                RelationshipProperties::HasMethod {
                                    pointer_receiver: function.pointer_receiver,
                                },
                            );
                        }
                    }
                }
            }
        }
    }

    fn add_imports(&mut self, parse: &ParseResult) {
        for package in &parse.packages {
            for file in &package.files {
                let file_id = self.files[&file.path];
                for import in &file.imports {
                    let target = match self.packages.get(&import.path) {
                        Some(&package_id) => package_id,
                        None => self.import_node(&import.path),
                    };
                    self.relate(
                        RelationshipType::Imports,
                        file_id,
                        target,
                        RelationshipProperties::Imports {
                            alias: import.alias.clone(),
                            line: import.line,
                        },
                    );
                }
            }
        }
    }

    fn import_node(&mut self, path: &str) -> Uuid {
        if let Some(&id) = self.imports.get(path) {
            return id;
        }
        let standard_library = !path.split('/').next().unwrap_or(path).contains('.');
        let id = self.add_node(
            NodeType::Import,
            path,
            path,
            None,
            0,
            NodeProperties::Import {
                path: path.to_string(),
                standard_library,
            },
        );
        self.contains(self.project, id);
        self.imports.insert(path.to_string(), id);
        id
    }

    fn add_dependencies(&mut self, report: &AnalysisReport) {
        for edge in report.dependencies.edges() {
            let (Some(&from), Some(&to)) = (self.packages.get(&edge.from), self.packages.get(&edge.to)) else {
                continue;
            };
            self.relate(
                RelationshipType::DependsOn,
                from,
                to,
                RelationshipProperties::DependsOn {
                    weight: edge.weight,
                    in_cycle: edge.in_cycle,
                },
            );
        }
    }

    fn add_implementations(&mut self, report: &AnalysisReport) {
        for (interface, implementor) in report.implementations.iter() {
            let (Some(&struct_id), Some(&interface_id)) =
                (self.types.get(&implementor.ty), self.types.get(interface))
            else {
                continue;
            };
            self.relate(
                RelationshipType::Implements,
                struct_id,
                interface_id,
                RelationshipProperties::Implements {
                    pointer_receiver: implementor.pointer_receiver,
                },
            );
        }
    }

    fn add_calls(&mut self, report: &AnalysisReport) {
        for edge in &report.calls {
            let Some(&caller) = self.functions.get(&edge.caller) else {
                continue;
            };
            let target = match &edge.target {
                CallTarget::Resolved(callee) => self.functions.get(callee).copied(),
                CallTarget::External { package, .. } => {
                    let import = self.imports.get(package).copied();
                    match import {
                        Some(id) if self.import_calls.insert((caller, id)) => Some(id),
                        _ => None,
                    }
                }
                CallTarget::Unresolved { .. } => {
                    self.unresolved_calls += 1;
                    None
                }
            };
            if let Some(target) = target {
                self.relate(
                    RelationshipType::Calls,
                    caller,
                    target,
                    RelationshipProperties::Calls {
                        call_type: edge.call_type,
                        line: edge.line,
                        name_matched: edge.name_matched,
                    },
                );
            }
        }
    }

    fn count(&self, node_type: NodeType) -> usize {
        self.nodes.iter().filter(|n| n.node_type == node_type).count()
    }

    fn summary(&self, parse: &ParseResult, report: &AnalysisReport) -> AnalysisSummary {
        AnalysisSummary {
            files: self.count(NodeType::File),
            packages: self.count(NodeType::Package),
            functions: self.count(NodeType::Function),
            methods: self.count(NodeType::Method),
            structs: self.count(NodeType::Struct),
            interfaces: self.count(NodeType::Interface),
            external_imports: self.count(NodeType::Import),
            implementations: self
                .relationships
                .iter()
                .filter(|r| r.rel_type == RelationshipType::Implements)
                .count(),
            resolved_calls: report
                .calls
                .iter()
                .filter(|c| matches!(c.target, CallTarget::Resolved(_)))
                .count(),
            unresolved_calls: self.unresolved_calls,
            cycles: report.cycles.len(),
            parse_errors: parse.errors.len(),
        }
    }
}

fn function_ref(package: &str, function: &FunctionInfo) -> FunctionRef {
    if function.is_method() {
        FunctionRef::method(package, &function.receiver, &function.name)
    } else {
        FunctionRef::function(package, &function.name)
    }
}
