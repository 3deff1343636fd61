//! Call resolution and the derived call graph

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::interfaces::InterfaceImplementations;
use super::symbols::SymbolTable;
use super::{FunctionRef, TypeKey};
use crate::core::config::AnalyzerConfig;
use crate::core::model::{CallSite, CallType, FunctionInfo, ParseResult};

const BUILTIN_FUNCS: &[&str] = &[
    "append", "cap", "clear", "close", "complex", "copy", "delete", "imag", "len", "make", "max",
    "min", "new", "panic", "print", "println", "real", "recover",
];

/// Upper bound on call chains enumerated from one root
pub const MAX_CHAINS: usize = 10_000;

const BUILTIN_TYPES: &[&str] = &[
    "any", "bool", "byte", "complex64", "complex128", "error", "float32", "float64", "int", "int8",
    "int16", "int32", "int64", "rune", "string", "uint", "uint8", "uint16", "uint32", "uint64",
    "uintptr",
];

/// Where a call lands
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallTarget {
    /// A function or method declared in the project
    Resolved(FunctionRef),
    /// A function outside the project (standard library, dependency, builtin)
    External { package: String, name: String },
    /// Could not be pinned to a declaration
    Unresolved { name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller: FunctionRef,
    pub target: CallTarget,
    pub call_type: CallType,
    /// Resolved by method name alone, without a known receiver type
    pub name_matched: bool,
    /// First call site in the caller
    pub line: u32,
}

/// Resolve every call site in the project; one edge per distinct
/// (caller, target, call type).
pub(crate) fn resolve_calls(
    parse: &ParseResult,
    symbols: &SymbolTable<'_>,
    implementations: &InterfaceImplementations,
    config: &AnalyzerConfig,
) -> Vec<CallEdge> {
    let resolver = Resolver {
        symbols,
        implementations,
        dispatch: config.resolve_interface_dispatch,
        methods_by_name: methods_by_name(symbols),
    };

    let mut edges: BTreeMap<(FunctionRef, CallTarget, CallType), CallEdge> = BTreeMap::new();
    for package in &parse.packages {
        for file in &package.files {
            for function in &file.functions {
                let caller = caller_ref(&package.import_path, function);
                for site in &function.calls {
                    for (target, call_type, name_matched) in
                        resolver.resolve(&package.import_path, site)
                    {
                        edges
                            .entry((caller.clone(), target.clone(), call_type))
                            .or_insert_with(|| CallEdge {
                                caller: caller.clone(),
                                target,
                                call_type,
                                name_matched,
                                line: site.line,
                            });
                    }
                }
            }
        }
    }
    edges.into_values().collect()
}

fn caller_ref(package: &str, function: &FunctionInfo) -> FunctionRef {
    if function.is_method() {
        FunctionRef::method(package, &function.receiver, &function.name)
    } else {
        FunctionRef::function(package, &function.name)
    }
}

fn methods_by_name(symbols: &SymbolTable<'_>) -> BTreeMap<String, Vec<FunctionRef>> {
    let mut index: BTreeMap<String, Vec<FunctionRef>> = BTreeMap::new();
    for (package, package_symbols) in &symbols.packages {
        for (receiver, name) in package_symbols.methods.keys() {
            index
                .entry(name.to_string())
                .or_default()
                .push(FunctionRef::method(package, receiver, name));
        }
    }
    for refs in index.values_mut() {
        refs.sort();
    }
    index
}

struct Resolver<'s, 'a> {
    symbols: &'s SymbolTable<'a>,
    implementations: &'s InterfaceImplementations,
    dispatch: bool,
    methods_by_name: BTreeMap<String, Vec<FunctionRef>>,
}

type Resolution = (CallTarget, CallType, bool);

impl Resolver<'_, '_> {
    fn resolve(&self, package: &str, site: &CallSite) -> Vec<Resolution> {
        match site.call_type {
            CallType::Direct => self.resolve_direct(package, site),
            CallType::Method | CallType::InterfaceDispatch => match &site.receiver_type {
                Some(receiver) => {
                    let owner = site.qualifier.as_deref().unwrap_or(package);
                    self.resolve_typed_method(owner, receiver, &site.callee)
                }
                None => vec![self.resolve_by_name(package, &site.callee)],
            },
            CallType::Dynamic => vec![(
                unresolved(&site.callee, "call through a function value"),
                CallType::Dynamic,
                false,
            )],
        }
    }

    fn resolve_direct(&self, package: &str, site: &CallSite) -> Vec<Resolution> {
        let name = site.callee.as_str();
        let owner = match &site.qualifier {
            Some(path) if !self.symbols.contains_package(path) => {
                return vec![(
                    CallTarget::External {
                        package: path.clone(),
                        name: name.to_string(),
                    },
                    CallType::Direct,
                    false,
                )];
            }
            Some(path) => path.as_str(),
            None => package,
        };

        let Some(symbols) = self.symbols.packages.get(owner) else {
            return Vec::new();
        };
        if symbols.functions.contains_key(name) {
            return vec![(
                CallTarget::Resolved(FunctionRef::function(owner, name)),
                CallType::Direct,
                false,
            )];
        }
        // Conversions to project or builtin types are not calls
        if symbols.types.contains_key(name) || (site.qualifier.is_none() && BUILTIN_TYPES.contains(&name)) {
            return Vec::new();
        }
        if site.qualifier.is_none() && BUILTIN_FUNCS.contains(&name) {
            return vec![(
                CallTarget::External {
                    package: "builtin".to_string(),
                    name: name.to_string(),
                },
                CallType::Direct,
                false,
            )];
        }
        vec![(
            unresolved(name, &format!("no function {} in {}", name, owner)),
            CallType::Direct,
            false,
        )]
    }

    fn resolve_typed_method(&self, owner: &str, receiver: &str, method: &str) -> Vec<Resolution> {
        let Some(symbols) = self.symbols.packages.get(owner) else {
            return vec![(
                CallTarget::External {
                    package: owner.to_string(),
                    name: format!("{}.{}", receiver, method),
                },
                CallType::Method,
                false,
            )];
        };

        let key = TypeKey::new(owner, receiver);
        if symbols.interface_named(receiver).is_some() {
            return self.resolve_dispatch(&key, method);
        }

        if symbols.struct_named(receiver).is_some() {
            let set = self.symbols.struct_methods(&key);
            return match set.get(method).and_then(|e| e.function.clone()) {
                Some(function) => vec![(CallTarget::Resolved(function), CallType::Method, false)],
                None => vec![(
                    unresolved(method, &format!("{} has no method {}", key, method)),
                    CallType::Method,
                    false,
                )],
            };
        }

        // Methods on named non-struct types
        if symbols.methods.contains_key(&(receiver, method)) {
            return vec![(
                CallTarget::Resolved(FunctionRef::method(owner, receiver, method)),
                CallType::Method,
                false,
            )];
        }
        vec![(
            unresolved(method, &format!("unknown receiver type {}", key)),
            CallType::Method,
            false,
        )]
    }

    fn resolve_dispatch(&self, interface: &TypeKey, method: &str) -> Vec<Resolution> {
        if !self.dispatch {
            return vec![(
                unresolved(method, &format!("dispatch through {} not resolved", interface)),
                CallType::InterfaceDispatch,
                false,
            )];
        }

        let targets: BTreeSet<FunctionRef> = self
            .implementations
            .implementors(interface)
            .filter_map(|implementor| {
                self.symbols
                    .struct_methods(&implementor.ty)
                    .get(method)
                    .and_then(|e| e.function.clone())
            })
            .collect();

        if targets.is_empty() {
            return vec![(
                unresolved(method, &format!("no implementation of {} provides {}", interface, method)),
                CallType::InterfaceDispatch,
                false,
            )];
        }
        targets
            .into_iter()
            .map(|f| (CallTarget::Resolved(f), CallType::InterfaceDispatch, false))
            .collect()
    }

    /// Receiver type unknown: accept a unique method of that name, preferring
    /// the caller's package.
    fn resolve_by_name(&self, package: &str, method: &str) -> Resolution {
        let candidates = self
            .methods_by_name
            .get(method)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let local: Vec<_> = candidates.iter().filter(|f| f.package == package).collect();
        let chosen = match (local.as_slice(), candidates) {
            ([only], _) => Some((*only).clone()),
            ([], [only]) => Some(only.clone()),
            _ => None,
        };

        match chosen {
            Some(function) => (CallTarget::Resolved(function), CallType::Method, true),
            None if candidates.is_empty() => (
                unresolved(method, "receiver type unknown"),
                CallType::Method,
                false,
            ),
            None => (
                unresolved(
                    method,
                    &format!("ambiguous method {} ({} candidates)", method, candidates.len()),
                ),
                CallType::Method,
                false,
            ),
        }
    }
}

fn unresolved(name: &str, reason: &str) -> CallTarget {
    CallTarget::Unresolved {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Resolved project-internal calls as adjacency lists
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    callees: BTreeMap<FunctionRef, BTreeSet<FunctionRef>>,
    callers: BTreeMap<FunctionRef, BTreeSet<FunctionRef>>,
}

impl CallGraph {
    pub fn from_edges(edges: &[CallEdge]) -> Self {
        let mut graph = Self::default();
        for edge in edges {
            if let CallTarget::Resolved(callee) = &edge.target {
                graph
                    .callees
                    .entry(edge.caller.clone())
                    .or_default()
                    .insert(callee.clone());
                graph
                    .callers
                    .entry(callee.clone())
                    .or_default()
                    .insert(edge.caller.clone());
            }
        }
        graph
    }

    pub fn callees(&self, function: &FunctionRef) -> impl Iterator<Item = &FunctionRef> {
        self.callees.get(function).into_iter().flatten()
    }

    pub fn callers(&self, function: &FunctionRef) -> impl Iterator<Item = &FunctionRef> {
        self.callers.get(function).into_iter().flatten()
    }

    /// Maximal acyclic call chains starting at `root`, each at most
    /// `max_depth` calls long. Enumeration stops after [`MAX_CHAINS`].
    pub fn chains_from(&self, root: &FunctionRef, max_depth: usize) -> Vec<Vec<FunctionRef>> {
        let mut chains = Vec::new();
        let mut path = vec![root.clone()];
        let mut pending = vec![self.next_hops(&path, max_depth).into_iter()];

        loop {
            let Some(hops) = pending.last_mut() else {
                break;
            };
            match hops.next() {
                Some(callee) => {
                    path.push(callee);
                    let next = self.next_hops(&path, max_depth);
                    if next.is_empty() {
                        chains.push(path.clone());
                        if chains.len() >= MAX_CHAINS {
                            break;
                        }
                        path.pop();
                    } else {
                        pending.push(next.into_iter());
                    }
                }
                None => {
                    pending.pop();
                    path.pop();
                }
            }
        }
        chains
    }

    fn next_hops(&self, path: &[FunctionRef], max_depth: usize) -> Vec<FunctionRef> {
        match path.last() {
            Some(last) if path.len() <= max_depth => self
                .callees(last)
                .filter(|f| !path.contains(f))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }
}
