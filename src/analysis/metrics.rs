//! Per-function and per-package code metrics

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::calls::{CallEdge, CallTarget};
use super::FunctionRef;
use crate::core::model::{ParseResult, TypeKind, ValueKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMetrics {
    pub function: FunctionRef,
    pub file: String,
    pub complexity: u32,
    pub lines: u32,
    /// Raw call sites in the body
    pub call_sites: usize,
    /// Distinct project functions called
    pub fan_out: usize,
    /// Distinct project functions calling this one
    pub fan_in: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageMetrics {
    pub package: String,
    pub files: usize,
    pub lines: u64,
    pub functions: usize,
    pub methods: usize,
    pub structs: usize,
    pub interfaces: usize,
    pub constants: usize,
    pub variables: usize,
    pub imports: usize,
}

impl PackageMetrics {
    fn absorb(&mut self, other: &PackageMetrics) {
        self.files += other.files;
        self.lines += other.lines;
        self.functions += other.functions;
        self.methods += other.methods;
        self.structs += other.structs;
        self.interfaces += other.interfaces;
        self.constants += other.constants;
        self.variables += other.variables;
        self.imports += other.imports;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub functions: Vec<FunctionMetrics>,
    pub packages: Vec<PackageMetrics>,
    /// Sum over all packages; `package` is empty
    pub totals: PackageMetrics,
    pub average_complexity: f64,
    pub max_complexity: u32,
}

impl Metrics {
    pub fn compute(parse: &ParseResult, calls: &[CallEdge]) -> Self {
        // Edges are distinct per call type; count each caller/callee pair once
        let pairs: BTreeSet<(&FunctionRef, &FunctionRef)> = calls
            .iter()
            .filter_map(|edge| match &edge.target {
                CallTarget::Resolved(callee) => Some((&edge.caller, callee)),
                _ => None,
            })
            .collect();
        let mut fan_out: BTreeMap<&FunctionRef, usize> = BTreeMap::new();
        let mut fan_in: BTreeMap<&FunctionRef, usize> = BTreeMap::new();
        for (caller, callee) in pairs {
            *fan_out.entry(caller).or_default() += 1;
            *fan_in.entry(callee).or_default() += 1;
        }

        let mut functions = Vec::new();
        let mut packages = Vec::new();
        let mut totals = PackageMetrics::default();

        for package in &parse.packages {
            let mut stats = PackageMetrics {
                package: package.import_path.clone(),
                files: package.files.len(),
                ..PackageMetrics::default()
            };
            for file in &package.files {
                stats.lines += u64::from(file.line_count);
                stats.imports += file.imports.len();
                for value in &file.values {
                    match value.kind {
                        ValueKind::Constant => stats.constants += 1,
                        ValueKind::Variable => stats.variables += 1,
                    }
                }
                for type_info in &file.types {
                    match type_info.kind {
                        TypeKind::Struct => stats.structs += 1,
                        TypeKind::Interface => stats.interfaces += 1,
                    }
                }
                for function in &file.functions {
                    let function_ref = if function.is_method() {
                        stats.methods += 1;
                        FunctionRef::method(&package.import_path, &function.receiver, &function.name)
                    } else {
                        stats.functions += 1;
                        FunctionRef::function(&package.import_path, &function.name)
                    };
                    functions.push(FunctionMetrics {
                        fan_out: fan_out.get(&function_ref).copied().unwrap_or(0),
                        fan_in: fan_in.get(&function_ref).copied().unwrap_or(0),
                        function: function_ref,
                        file: file.path.clone(),
                        complexity: function.complexity,
                        lines: function.span.line_count(),
                        call_sites: function.calls.len(),
                    });
                }
            }
            totals.absorb(&stats);
            packages.push(stats);
        }

        let max_complexity = functions.iter().map(|f| f.complexity).max().unwrap_or(0);
        let average_complexity = if functions.is_empty() {
            0.0
        } else {
            functions.iter().map(|f| f64::from(f.complexity)).sum::<f64>() / functions.len() as f64
        };

        Self {
            functions,
            packages,
            totals,
            average_complexity,
            max_complexity,
        }
    }

    /// Functions at or above `threshold`, most complex first
    pub fn complex_functions(&self, threshold: u32) -> Vec<&FunctionMetrics> {
        let mut hot: Vec<_> = self
            .functions
            .iter()
            .filter(|f| f.complexity >= threshold)
            .collect();
        hot.sort_by(|a, b| b.complexity.cmp(&a.complexity));
        hot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::parse_sources;
    use crate::core::model::CallType;

    fn find<'m>(metrics: &'m Metrics, name: &str) -> &'m FunctionMetrics {
        metrics
            .functions
            .iter()
            .find(|f| f.function.name == name)
            .unwrap()
    }

    #[test]
    fn test_counts_and_complexity() {
        let parse = parse_sources(&[(
            "example.com/app",
            "main.go",
            "package main\n\nconst Max = 3\n\nvar count int\n\ntype T struct{}\n\ntype I interface{ M() }\n\nfunc (T) M() {}\n\nfunc main() {\n\tif count > Max {\n\t\treturn\n\t}\n\thelper()\n}\n\nfunc helper() {}\n",
        )]);
        let edges = vec![CallEdge {
            caller: FunctionRef::function("example.com/app", "main"),
            target: CallTarget::Resolved(FunctionRef::function("example.com/app", "helper")),
            call_type: CallType::Direct,
            name_matched: false,
            line: 17,
        }];
        let metrics = Metrics::compute(&parse, &edges);

        let package = &metrics.packages[0];
        assert_eq!(package.functions, 2);
        assert_eq!(package.methods, 1);
        assert_eq!(package.structs, 1);
        assert_eq!(package.interfaces, 1);
        assert_eq!(package.constants, 1);
        assert_eq!(package.variables, 1);
        assert_eq!(metrics.totals.functions, 2);

        let main = find(&metrics, "main");
        assert_eq!(main.complexity, 2);
        assert_eq!(main.fan_out, 1);
        assert_eq!(main.lines, 6);
        assert_eq!(metrics.max_complexity, 2);
        assert!((metrics.average_complexity - 4.0 / 3.0).abs() < 1e-9);

        let helper = find(&metrics, "helper");
        assert_eq!(helper.fan_in, 1);
        assert_eq!(metrics.complex_functions(2).len(), 1);
    }

    #[test]
    fn test_fan_counts_distinct_functions() {
        let parse = parse_sources(&[(
            "example.com/app",
            "main.go",
            "package main\n\nfunc main() {\n\tf := helper\n\tf()\n\thelper()\n\tother()\n}\n\nfunc helper() {}\n\nfunc other() { helper() }\n",
        )]);
        let edge = |caller: &str, callee: &str, call_type| CallEdge {
            caller: FunctionRef::function("example.com/app", caller),
            target: CallTarget::Resolved(FunctionRef::function("example.com/app", callee)),
            call_type,
            name_matched: false,
            line: 1,
        };
        let edges = vec![
            edge("main", "helper", CallType::Dynamic),
            edge("main", "helper", CallType::Direct),
            edge("main", "other", CallType::Direct),
            edge("other", "helper", CallType::Direct),
        ];
        let metrics = Metrics::compute(&parse, &edges);

        let main = find(&metrics, "main");
        assert_eq!(main.fan_out, 2);
        assert_eq!(main.call_sites, 3);
        assert_eq!(find(&metrics, "helper").fan_in, 2);
        assert_eq!(find(&metrics, "other").fan_in, 1);
    }
}
