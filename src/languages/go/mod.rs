//! Go language support

use std::collections::{HashMap, HashSet};

use tree_sitter::{Node, Tree};

use crate::core::model::{
    CallSite, CallType, FieldInfo, FunctionInfo, ImportInfo, MethodSig, ParsedFile, Span,
    TypeInfo, TypeKind, ValueInfo, ValueKind, Visibility,
};
use crate::languages::{walk_preorder, LanguageSupport, Walk};

/// Go front end over the tree-sitter Go grammar
pub struct GoLanguage;

impl GoLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GoLanguage {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageSupport for GoLanguage {
    fn name(&self) -> &'static str {
        "go"
    }

    fn extension(&self) -> &'static str {
        "go"
    }

    fn is_test_file(&self, file_name: &str) -> bool {
        file_name.ends_with("_test.go")
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
    }

    fn extract_file(&self, path: &str, source: &str, tree: &Tree) -> ParsedFile {
        let mut extractor = GoFileExtractor::new(source);
        extractor.extract(tree.root_node());
        ParsedFile {
            path: path.to_string(),
            package: extractor.package,
            imports: extractor.imports,
            functions: extractor.functions,
            types: extractor.types,
            values: extractor.values,
            content_hash: String::new(),
            line_count: source.lines().count() as u32,
        }
    }
}

fn line_of(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

fn span_of(node: Node) -> Span {
    Span {
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Type named by a variable, possibly qualified by an import path
#[derive(Debug, Clone)]
struct TypeRef {
    qualifier: Option<String>,
    name: String,
}

/// Variables visible inside the function being walked
#[derive(Default)]
struct FunctionScope {
    typed: HashMap<String, TypeRef>,
    bound: HashSet<String>,
    calls: Vec<CallSite>,
    complexity: u32,
}

impl FunctionScope {
    fn bind(&mut self, name: String, type_ref: Option<TypeRef>) {
        if name == "_" {
            return;
        }
        match type_ref {
            Some(t) => {
                self.typed.insert(name.clone(), t);
            }
            None => {
                self.typed.remove(&name);
            }
        }
        self.bound.insert(name);
    }
}

/// Helper for extracting declarations from Go source
struct GoFileExtractor<'a> {
    source: &'a str,
    package: String,
    imports: Vec<ImportInfo>,
    /// local name -> import path
    import_names: HashMap<String, String>,
    functions: Vec<FunctionInfo>,
    types: Vec<TypeInfo>,
    values: Vec<ValueInfo>,
}

impl<'a> GoFileExtractor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            package: String::new(),
            imports: Vec::new(),
            import_names: HashMap::new(),
            functions: Vec::new(),
            types: Vec::new(),
            values: Vec::new(),
        }
    }

    fn extract(&mut self, root: Node) {
        // Imports first so call qualifiers can be resolved in one pass
        for i in 0..root.child_count() {
            if let Some(child) = root.child(i) {
                match child.kind() {
                    "package_clause" => self.extract_package(child),
                    "import_declaration" => self.extract_imports(child),
                    _ => {}
                }
            }
        }

        for i in 0..root.child_count() {
            if let Some(child) = root.child(i) {
                match child.kind() {
                    "function_declaration" => self.extract_function(child),
                    "method_declaration" => self.extract_function(child),
                    "type_declaration" => self.extract_type_declaration(child),
                    "const_declaration" => self.extract_values(child, ValueKind::Constant),
                    "var_declaration" => self.extract_values(child, ValueKind::Variable),
                    _ => {}
                }
            }
        }
    }

    fn extract_package(&mut self, node: Node) {
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                if child.kind() == "package_identifier" {
                    self.package = self.node_text(child);
                    break;
                }
            }
        }
    }

    fn extract_imports(&mut self, node: Node) {
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                if child.kind() == "import_spec_list" {
                    for j in 0..child.child_count() {
                        if let Some(spec) = child.child(j) {
                            if spec.kind() == "import_spec" {
                                self.extract_import_spec(spec);
                            }
                        }
                    }
                } else if child.kind() == "import_spec" {
                    self.extract_import_spec(child);
                }
            }
        }
    }

    fn extract_import_spec(&mut self, node: Node) {
        let Some(path_node) = node.child_by_field_name("path") else {
            return;
        };
        let path = self.node_text(path_node).trim_matches(|c| c == '"' || c == '`').to_string();
        let alias = node
            .child_by_field_name("name")
            .map(|n| self.node_text(n));

        let import = ImportInfo {
            path,
            alias,
            line: line_of(node),
        };
        let local = import.local_name().to_string();
        if local != "_" && local != "." {
            self.import_names.insert(local, import.path.clone());
        }
        self.imports.push(import);
    }

    fn extract_function(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.node_text(name_node);
        let mut scope = FunctionScope::default();

        let mut receiver = String::new();
        let mut pointer_receiver = false;
        if let Some(recv) = node.child_by_field_name("receiver") {
            for i in 0..recv.named_child_count() {
                if let Some(param) = recv.named_child(i) {
                    if param.kind() != "parameter_declaration" {
                        continue;
                    }
                    if let Some(type_node) = param.child_by_field_name("type") {
                        pointer_receiver = type_node.kind() == "pointer_type";
                        receiver = self.base_type_name(type_node);
                        let type_ref = TypeRef {
                            qualifier: None,
                            name: receiver.clone(),
                        };
                        for recv_name in self.field_texts(param, "name") {
                            scope.bind(recv_name, Some(type_ref.clone()));
                        }
                    }
                }
            }
        }

        let params = node
            .child_by_field_name("parameters")
            .map(|p| {
                self.bind_parameters(p, &mut scope);
                self.parameter_types(p)
            })
            .unwrap_or_default();
        let results = node
            .child_by_field_name("result")
            .map(|r| self.result_types(r))
            .unwrap_or_default();

        let body = node.child_by_field_name("body");
        let header_end = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());
        let signature = normalize(&self.source[node.start_byte()..header_end]);

        scope.complexity = 1;
        if let Some(body) = body {
            self.walk_body(body, &mut scope);
        }

        self.functions.push(FunctionInfo {
            visibility: Visibility::of(&name),
            name,
            signature,
            receiver,
            pointer_receiver,
            params,
            results,
            span: span_of(node),
            complexity: scope.complexity,
            calls: scope.calls,
        });
    }

    fn bind_parameters(&self, list: Node, scope: &mut FunctionScope) {
        for i in 0..list.named_child_count() {
            if let Some(param) = list.named_child(i) {
                let type_ref = param
                    .child_by_field_name("type")
                    .and_then(|t| self.type_ref(t));
                for name in self.field_texts(param, "name") {
                    scope.bind(name, type_ref.clone());
                }
            }
        }
    }

    /// Parameter types with names stripped, one entry per parameter
    fn parameter_types(&self, list: Node) -> Vec<String> {
        let mut types = Vec::new();
        for i in 0..list.named_child_count() {
            let Some(param) = list.named_child(i) else {
                continue;
            };
            let Some(type_node) = param.child_by_field_name("type") else {
                continue;
            };
            let mut type_text = normalize(&self.node_text(type_node));
            if param.kind() == "variadic_parameter_declaration" {
                type_text = format!("...{}", type_text);
            }
            let count = self.field_texts(param, "name").len().max(1);
            for _ in 0..count {
                types.push(type_text.clone());
            }
        }
        types
    }

    fn result_types(&self, result: Node) -> Vec<String> {
        if result.kind() == "parameter_list" {
            self.parameter_types(result)
        } else {
            vec![normalize(&self.node_text(result))]
        }
    }

    fn walk_body(&self, body: Node, scope: &mut FunctionScope) {
        walk_preorder(body, |node| {
            self.visit_body_node(node, scope);
            Walk::Descend
        });
    }

    fn visit_body_node(&self, node: Node, scope: &mut FunctionScope) {
        match node.kind() {
            "if_statement" | "for_statement" | "expression_case" | "type_case"
            | "communication_case" => {
                scope.complexity += 1;
            }
            "binary_expression" => {
                if let Some(op) = node.child_by_field_name("operator") {
                    let op = self.node_text(op);
                    if op == "&&" || op == "||" {
                        scope.complexity += 1;
                    }
                }
            }
            "call_expression" => self.record_call(node, scope),
            "short_var_declaration" => self.bind_short_vars(node, scope),
            "var_spec" => {
                let type_ref = node
                    .child_by_field_name("type")
                    .and_then(|t| self.type_ref(t));
                let names = self.field_texts(node, "name");
                let values = node
                    .child_by_field_name("value")
                    .map(|v| self.expression_list(v))
                    .unwrap_or_default();
                for (idx, name) in names.into_iter().enumerate() {
                    let inferred = type_ref
                        .clone()
                        .or_else(|| values.get(idx).and_then(|v| self.literal_type(*v)));
                    scope.bind(name, inferred);
                }
            }
            _ => {}
        }
    }

    fn bind_short_vars(&self, node: Node, scope: &mut FunctionScope) {
        let left = node
            .child_by_field_name("left")
            .map(|l| self.expression_list(l))
            .unwrap_or_default();
        let right = node
            .child_by_field_name("right")
            .map(|r| self.expression_list(r))
            .unwrap_or_default();

        for (idx, target) in left.iter().enumerate() {
            if target.kind() != "identifier" {
                continue;
            }
            let type_ref = if left.len() == right.len() {
                right.get(idx).and_then(|v| self.literal_type(*v))
            } else {
                None
            };
            scope.bind(self.node_text(*target), type_ref);
        }
    }

    fn expression_list<'t>(&self, node: Node<'t>) -> Vec<Node<'t>> {
        if node.kind() != "expression_list" {
            return vec![node];
        }
        let mut items = Vec::new();
        for i in 0..node.named_child_count() {
            if let Some(child) = node.named_child(i) {
                items.push(child);
            }
        }
        items
    }

    /// Type of `T{...}` or `&T{...}`
    fn literal_type(&self, value: Node) -> Option<TypeRef> {
        let mut value = value;
        loop {
            match value.kind() {
                "composite_literal" => {
                    return value
                        .child_by_field_name("type")
                        .and_then(|t| self.type_ref(t))
                }
                "unary_expression" => {
                    let op = value.child_by_field_name("operator")?;
                    if self.node_text(op) != "&" {
                        return None;
                    }
                    value = value.child_by_field_name("operand")?;
                }
                _ => return None,
            }
        }
    }

    fn record_call(&self, node: Node, scope: &mut FunctionScope) {
        let Some(func) = node.child_by_field_name("function") else {
            return;
        };
        let line = line_of(node);

        let call = match func.kind() {
            "identifier" => {
                let name = self.node_text(func);
                let call_type = if scope.bound.contains(&name) {
                    CallType::Dynamic
                } else {
                    CallType::Direct
                };
                CallSite {
                    callee: name,
                    qualifier: None,
                    receiver_type: None,
                    call_type,
                    line,
                }
            }
            "selector_expression" => {
                let (Some(operand), Some(field)) = (
                    func.child_by_field_name("operand"),
                    func.child_by_field_name("field"),
                ) else {
                    return;
                };
                let callee = self.node_text(field);
                self.classify_selector_call(operand, callee, line, scope)
            }
            // Conversions such as []byte(s) or map[string]int(m)
            "slice_type" | "array_type" | "map_type" | "pointer_type" | "channel_type"
            | "interface_type" | "struct_type" | "function_type" | "qualified_type" => return,
            _ => CallSite {
                callee: normalize(&self.node_text(func)).chars().take(64).collect(),
                qualifier: None,
                receiver_type: None,
                call_type: CallType::Dynamic,
                line,
            },
        };
        scope.calls.push(call);
    }

    fn classify_selector_call(
        &self,
        operand: Node,
        callee: String,
        line: u32,
        scope: &FunctionScope,
    ) -> CallSite {
        if operand.kind() == "identifier" {
            let name = self.node_text(operand);
            if let Some(type_ref) = scope.typed.get(&name) {
                return CallSite {
                    callee,
                    qualifier: type_ref.qualifier.clone(),
                    receiver_type: Some(type_ref.name.clone()),
                    call_type: CallType::Method,
                    line,
                };
            }
            if !scope.bound.contains(&name) {
                if let Some(path) = self.import_names.get(&name) {
                    return CallSite {
                        callee,
                        qualifier: Some(path.clone()),
                        receiver_type: None,
                        call_type: CallType::Direct,
                        line,
                    };
                }
            }
        }

        CallSite {
            callee,
            qualifier: None,
            receiver_type: None,
            call_type: CallType::Method,
            line,
        }
    }

    /// Resolve a type expression to a (possibly qualified) named type
    fn type_ref(&self, node: Node) -> Option<TypeRef> {
        let mut node = node;
        loop {
            match node.kind() {
                "type_identifier" => {
                    return Some(TypeRef {
                        qualifier: None,
                        name: self.node_text(node),
                    })
                }
                "qualified_type" => {
                    let package = self.node_text(node.child_by_field_name("package")?);
                    let name = self.node_text(node.child_by_field_name("name")?);
                    let path = self.import_names.get(&package)?;
                    return Some(TypeRef {
                        qualifier: Some(path.clone()),
                        name,
                    });
                }
                "pointer_type" | "parenthesized_type" => node = node.named_child(0)?,
                "generic_type" => node = node.child_by_field_name("type")?,
                _ => return None,
            }
        }
    }

    /// `*pkg.List[T]` -> `List`
    fn base_type_name(&self, node: Node) -> String {
        let mut node = node;
        loop {
            let inner = match node.kind() {
                "pointer_type" | "parenthesized_type" => node.named_child(0),
                "generic_type" => node.child_by_field_name("type"),
                "qualified_type" => {
                    return node
                        .child_by_field_name("name")
                        .map(|n| self.node_text(n))
                        .unwrap_or_else(|| self.node_text(node))
                }
                _ => return self.node_text(node),
            };
            match inner {
                Some(inner) => node = inner,
                None => return self.node_text(node),
            }
        }
    }

    fn extract_type_declaration(&mut self, node: Node) {
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                if child.kind() == "type_spec" {
                    self.extract_type_spec(child);
                }
            }
        }
    }

    fn extract_type_spec(&mut self, node: Node) {
        let (Some(name_node), Some(type_node)) = (
            node.child_by_field_name("name"),
            node.child_by_field_name("type"),
        ) else {
            return;
        };
        let name = self.node_text(name_node);

        let info = match type_node.kind() {
            "struct_type" => TypeInfo {
                visibility: Visibility::of(&name),
                name,
                kind: TypeKind::Struct,
                span: span_of(node),
                fields: self.struct_fields(type_node),
                methods: Vec::new(),
                embeds: Vec::new(),
            },
            "interface_type" => {
                let (methods, embeds) = self.interface_elements(type_node);
                TypeInfo {
                    visibility: Visibility::of(&name),
                    name,
                    kind: TypeKind::Interface,
                    span: span_of(node),
                    fields: Vec::new(),
                    methods,
                    embeds,
                }
            }
            _ => return,
        };
        self.types.push(info);
    }

    fn struct_fields(&self, node: Node) -> Vec<FieldInfo> {
        let mut fields = Vec::new();
        for i in 0..node.child_count() {
            let Some(list) = node.child(i) else { continue };
            if list.kind() != "field_declaration_list" {
                continue;
            }
            for j in 0..list.named_child_count() {
                let Some(field) = list.named_child(j) else {
                    continue;
                };
                if field.kind() != "field_declaration" {
                    continue;
                }
                let Some(type_node) = field.child_by_field_name("type") else {
                    continue;
                };
                let type_name = normalize(&self.node_text(type_node));
                let names = self.field_texts(field, "name");

                if names.is_empty() {
                    // The `*` of an embedded pointer sits outside the type node
                    let type_name = if self.node_text(field).starts_with('*') {
                        format!("*{}", type_name.trim_start_matches('*'))
                    } else {
                        type_name
                    };
                    let name = self.base_type_name(type_node);
                    fields.push(FieldInfo {
                        visibility: Visibility::of(&name),
                        name,
                        type_name,
                        embedded: true,
                        line: line_of(field),
                    });
                } else {
                    for name in names {
                        fields.push(FieldInfo {
                            visibility: Visibility::of(&name),
                            name,
                            type_name: type_name.clone(),
                            embedded: false,
                            line: line_of(field),
                        });
                    }
                }
            }
        }
        fields
    }

    fn interface_elements(&self, node: Node) -> (Vec<MethodSig>, Vec<String>) {
        let mut methods = Vec::new();
        let mut embeds = Vec::new();
        for i in 0..node.named_child_count() {
            let Some(elem) = node.named_child(i) else {
                continue;
            };
            match elem.kind() {
                "method_elem" | "method_spec" => {
                    let Some(name_node) = elem.child_by_field_name("name") else {
                        continue;
                    };
                    methods.push(MethodSig {
                        name: self.node_text(name_node),
                        params: elem
                            .child_by_field_name("parameters")
                            .map(|p| self.parameter_types(p))
                            .unwrap_or_default(),
                        results: elem
                            .child_by_field_name("result")
                            .map(|r| self.result_types(r))
                            .unwrap_or_default(),
                    });
                }
                "type_elem" | "constraint_elem" => {
                    embeds.push(normalize(&self.node_text(elem)));
                }
                "type_identifier" | "qualified_type" | "interface_type_name" => {
                    embeds.push(self.node_text(elem));
                }
                _ => {}
            }
        }
        (methods, embeds)
    }

    fn extract_values(&mut self, node: Node, kind: ValueKind) {
        let spec_kind = match kind {
            ValueKind::Constant => "const_spec",
            ValueKind::Variable => "var_spec",
        };
        for i in 0..node.named_child_count() {
            let Some(child) = node.named_child(i) else {
                continue;
            };
            if child.kind() == spec_kind {
                self.extract_value_spec(child, kind);
            } else if child.kind() == "var_spec_list" {
                self.extract_values(child, kind);
            }
        }
    }

    fn extract_value_spec(&mut self, spec: Node, kind: ValueKind) {
        let type_name = spec
            .child_by_field_name("type")
            .map(|t| normalize(&self.node_text(t)));
        for name in self.field_texts(spec, "name") {
            if name == "_" {
                continue;
            }
            self.values.push(ValueInfo {
                visibility: Visibility::of(&name),
                name,
                kind,
                type_name: type_name.clone(),
                line: line_of(spec),
            });
        }
    }

    fn field_texts(&self, node: Node, field: &str) -> Vec<String> {
        let mut cursor = node.walk();
        node.children_by_field_name(field, &mut cursor)
            .map(|n| self.node_text(n))
            .collect()
    }

    fn node_text(&self, node: Node) -> String {
        self.source[node.byte_range()].to_string()
    }
}
