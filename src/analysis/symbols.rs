//! Whole-program symbol table shared by the analysis passes
//!
//! Built once per run, single-threaded, borrowing from the parse result.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::analysis::{FunctionRef, TypeKey};
use crate::core::model::{FunctionInfo, MethodSig, ParseResult, ParsedFile, TypeInfo, TypeKind};

/// Method available on a struct, possibly promoted from an embedded field
#[derive(Debug, Clone)]
pub struct MethodEntry {
    /// Declaring function; `None` for methods promoted from an embedded interface
    pub function: Option<FunctionRef>,
    pub sig: MethodSig,
    /// Only in the pointer method set
    pub pointer_only: bool,
}

/// Method set of a struct, keyed by method name
pub type MethodSet = BTreeMap<String, MethodEntry>;

pub struct PackageSymbols<'a> {
    pub name: &'a str,
    pub functions: HashMap<&'a str, &'a FunctionInfo>,
    /// (receiver, method name)
    pub methods: HashMap<(&'a str, &'a str), &'a FunctionInfo>,
    pub types: HashMap<&'a str, (&'a TypeInfo, &'a ParsedFile)>,
}

impl<'a> PackageSymbols<'a> {
    pub fn struct_named(&self, name: &str) -> Option<(&'a TypeInfo, &'a ParsedFile)> {
        self.types
            .get(name)
            .copied()
            .filter(|(t, _)| t.kind == TypeKind::Struct)
    }

    pub fn interface_named(&self, name: &str) -> Option<(&'a TypeInfo, &'a ParsedFile)> {
        self.types
            .get(name)
            .copied()
            .filter(|(t, _)| t.kind == TypeKind::Interface)
    }
}

pub struct SymbolTable<'a> {
    pub packages: BTreeMap<&'a str, PackageSymbols<'a>>,
}

impl<'a> SymbolTable<'a> {
    pub fn build(parse: &'a ParseResult) -> Self {
        let mut packages = BTreeMap::new();
        for package in &parse.packages {
            let mut symbols = PackageSymbols {
                name: &package.name,
                functions: HashMap::new(),
                methods: HashMap::new(),
                types: HashMap::new(),
            };
            for file in &package.files {
                for function in &file.functions {
                    if function.is_method() {
                        symbols
                            .methods
                            .entry((function.receiver.as_str(), function.name.as_str()))
                            .or_insert(function);
                    } else {
                        symbols
                            .functions
                            .entry(function.name.as_str())
                            .or_insert(function);
                    }
                }
                for type_info in &file.types {
                    symbols
                        .types
                        .entry(type_info.name.as_str())
                        .or_insert((type_info, file));
                }
            }
            packages.insert(package.import_path.as_str(), symbols);
        }
        Self { packages }
    }

    pub fn contains_package(&self, import_path: &str) -> bool {
        self.packages.contains_key(import_path)
    }

    pub fn structs(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.packages.iter().flat_map(|(path, symbols)| {
            let mut names: Vec<_> = symbols
                .types
                .values()
                .filter(|(t, _)| t.kind == TypeKind::Struct)
                .map(|(t, _)| t.name.as_str())
                .collect();
            names.sort_unstable();
            names.into_iter().map(move |name| TypeKey::new(*path, name))
        })
    }

    pub fn interfaces(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.packages.iter().flat_map(|(path, symbols)| {
            let mut names: Vec<_> = symbols
                .types
                .values()
                .filter(|(t, _)| t.kind == TypeKind::Interface)
                .map(|(t, _)| t.name.as_str())
                .collect();
            names.sort_unstable();
            names.into_iter().map(move |name| TypeKey::new(*path, name))
        })
    }

    /// Resolve a type expression written in `file` of package `package`
    /// (`T`, `*T`, `pkg.T`) to a project type.
    pub fn resolve_type(&self, package: &str, file: &ParsedFile, written: &str) -> Option<TypeKey> {
        let written = written.trim_start_matches('*');
        let written = written.split('[').next().unwrap_or(written);
        match written.split_once('.') {
            Some((alias, name)) => {
                let import = file.imports.iter().find(|i| i.local_name() == alias)?;
                self.packages
                    .get(import.path.as_str())?
                    .types
                    .get(name)
                    .map(|_| TypeKey::new(import.path.as_str(), name))
            }
            None => self
                .packages
                .get(package)?
                .types
                .get(written)
                .map(|_| TypeKey::new(package, written)),
        }
    }

    /// Flattened method set of an interface, or why it cannot be computed.
    pub fn interface_methods(&self, key: &TypeKey) -> Result<BTreeMap<String, MethodSig>, String> {
        let mut visiting = HashSet::new();
        self.interface_methods_inner(key, &mut visiting)
    }

    fn interface_methods_inner(
        &self,
        key: &TypeKey,
        visiting: &mut HashSet<TypeKey>,
    ) -> Result<BTreeMap<String, MethodSig>, String> {
        let (info, file) = self
            .packages
            .get(key.package.as_str())
            .and_then(|p| p.interface_named(&key.name))
            .ok_or_else(|| format!("unknown interface {}", key))?;
        if !visiting.insert(key.clone()) {
            return Err(format!("interface {} embeds itself", key));
        }

        let mut methods: BTreeMap<String, MethodSig> = info
            .methods
            .iter()
            .map(|m| (m.name.clone(), m.clone()))
            .collect();

        for embed in &info.embeds {
            if embed == "error" {
                methods.entry("Error".to_string()).or_insert(MethodSig {
                    name: "Error".to_string(),
                    params: Vec::new(),
                    results: vec!["string".to_string()],
                });
                continue;
            }
            let embedded = self
                .resolve_type(&key.package, file, embed)
                .ok_or_else(|| format!("embeds unresolved interface {}", embed))?;
            for (name, sig) in self.interface_methods_inner(&embedded, visiting)? {
                methods.entry(name).or_insert(sig);
            }
        }

        visiting.remove(key);
        Ok(methods)
    }

    /// Pointer method set of a struct including promoted methods
    pub fn struct_methods(&self, key: &TypeKey) -> MethodSet {
        let mut visiting = HashSet::new();
        self.struct_methods_inner(key, &mut visiting)
    }

    fn struct_methods_inner(&self, key: &TypeKey, visiting: &mut HashSet<TypeKey>) -> MethodSet {
        let mut set = MethodSet::new();
        let Some(symbols) = self.packages.get(key.package.as_str()) else {
            return set;
        };
        if !visiting.insert(key.clone()) {
            return set;
        }

        for ((receiver, name), function) in &symbols.methods {
            if *receiver != key.name {
                continue;
            }
            set.insert(
                name.to_string(),
                MethodEntry {
                    function: Some(FunctionRef::method(&key.package, receiver, name)),
                    sig: MethodSig {
                        name: name.to_string(),
                        params: function.params.clone(),
                        results: function.results.clone(),
                    },
                    pointer_only: function.pointer_receiver,
                },
            );
        }

        if let Some((info, file)) = symbols.struct_named(&key.name) {
            for field in info.fields.iter().filter(|f| f.embedded) {
                let via_pointer = field.type_name.starts_with('*');
                let Some(embedded) = self.resolve_type(&key.package, file, &field.type_name) else {
                    continue;
                };
                let promoted = match self.packages.get(embedded.package.as_str()) {
                    Some(p) if p.struct_named(&embedded.name).is_some() => {
                        self.struct_methods_inner(&embedded, visiting)
                    }
                    Some(p) if p.interface_named(&embedded.name).is_some() => self
                        .interface_methods(&embedded)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|(name, sig)| {
                            (
                                name,
                                MethodEntry {
                                    function: None,
                                    sig,
                                    pointer_only: false,
                                },
                            )
                        })
                        .collect(),
                    _ => continue,
                };
                for (name, mut entry) in promoted {
                    if via_pointer {
                        entry.pointer_only = false;
                    }
                    set.entry(name).or_insert(entry);
                }
            }
        }

        visiting.remove(key);
        set
    }
}

/// Drop package qualifiers so `http.Request` and `Request` compare equal
pub fn strip_qualifiers(type_text: &str) -> String {
    let mut out = String::with_capacity(type_text.len());
    let chars: Vec<char> = type_text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let qualified = i + 1 < chars.len()
                && chars[i] == '.'
                && (chars[i + 1].is_alphabetic() || chars[i + 1] == '_');
            if qualified {
                i += 1;
            } else {
                out.extend(&chars[start..i]);
            }
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

/// Signature equality modulo package qualifiers
pub fn signatures_match(required: &MethodSig, provided: &MethodSig) -> bool {
    fn same(a: &[String], b: &[String]) -> bool {
        a.len() == b.len()
            && a
                .iter()
                .zip(b)
                .all(|(x, y)| strip_qualifiers(x) == strip_qualifiers(y))
    }
    required.name == provided.name
        && same(&required.params, &provided.params)
        && same(&required.results, &provided.results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_qualifiers() {
        assert_eq!(strip_qualifiers("*http.Request"), "*Request");
        assert_eq!(strip_qualifiers("map[string]io.Reader"), "map[string]Reader");
        assert_eq!(strip_qualifiers("...string"), "...string");
        assert_eq!(strip_qualifiers("func(ctx context.Context) error"), "func(ctx Context) error");
    }

    #[test]
    fn test_signatures_match_ignores_qualifiers() {
        let required = MethodSig {
            name: "Handle".to_string(),
            params: vec!["*Request".to_string()],
            results: vec!["error".to_string()],
        };
        let provided = MethodSig {
            name: "Handle".to_string(),
            params: vec!["*api.Request".to_string()],
            results: vec!["error".to_string()],
        };
        assert!(signatures_match(&required, &provided));

        let wrong = MethodSig {
            results: Vec::new(),
            ..provided
        };
        assert!(!signatures_match(&required, &wrong));
    }
}
