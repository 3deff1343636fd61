//! Structural interface matching
//!
//! A struct implements an interface when its pointer method set, including
//! methods promoted through embedded fields, covers every method of the
//! interface's flattened method set. Empty interfaces are not matched.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::symbols::{signatures_match, MethodSet, SymbolTable};
use super::{Degradation, TypeKey};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Implementor {
    pub ty: TypeKey,
    /// Only `*T` satisfies the interface
    pub pointer_receiver: bool,
}

/// Interface -> implementing structs, keyed by qualified name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterfaceImplementations {
    by_interface: BTreeMap<TypeKey, BTreeSet<Implementor>>,
}

impl InterfaceImplementations {
    pub(crate) fn compute(symbols: &SymbolTable<'_>, degradations: &mut Vec<Degradation>) -> Self {
        let mut result = Self::default();

        let method_sets: Vec<(TypeKey, MethodSet)> = symbols
            .structs()
            .map(|key| {
                let set = symbols.struct_methods(&key);
                (key, set)
            })
            .collect();

        for interface in symbols.interfaces() {
            let required = match symbols.interface_methods(&interface) {
                Ok(required) => required,
                Err(reason) => {
                    debug!("Skipping interface {}: {}", interface, reason);
                    degradations.push(Degradation {
                        package: interface.package.clone(),
                        subject: interface.name.clone(),
                        reason,
                    });
                    continue;
                }
            };
            if required.is_empty() {
                continue;
            }
            for (candidate, provided) in &method_sets {
                let mut needs_pointer = false;
                let satisfied = required.values().all(|sig| match provided.get(&sig.name) {
                    Some(entry) if signatures_match(sig, &entry.sig) => {
                        needs_pointer |= entry.pointer_only;
                        true
                    }
                    _ => false,
                });
                if satisfied {
                    result
                        .by_interface
                        .entry(interface.clone())
                        .or_default()
                        .insert(Implementor {
                            ty: candidate.clone(),
                            pointer_receiver: needs_pointer,
                        });
                }
            }
        }

        result
    }

    pub fn implementors(&self, interface: &TypeKey) -> impl Iterator<Item = &Implementor> {
        self.by_interface.get(interface).into_iter().flatten()
    }

    pub fn implements(&self, ty: &TypeKey, interface: &TypeKey) -> bool {
        self.implementors(interface).any(|i| &i.ty == ty)
    }

    /// (interface, implementor) pairs in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&TypeKey, &Implementor)> {
        self.by_interface
            .iter()
            .flat_map(|(iface, impls)| impls.iter().map(move |i| (iface, i)))
    }

    /// Number of (interface, implementor) pairs
    pub fn len(&self) -> usize {
        self.by_interface.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_interface.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::parse_sources;

    const APP: &str = "example.com/app";

    fn compute(sources: &[(&str, &str, &str)]) -> (InterfaceImplementations, Vec<Degradation>) {
        let parse = parse_sources(sources);
        let symbols = SymbolTable::build(&parse);
        let mut degradations = Vec::new();
        let result = InterfaceImplementations::compute(&symbols, &mut degradations);
        (result, degradations)
    }

    #[test]
    fn test_value_and_pointer_receivers() {
        let source = r#"package app

type Shape interface {
	Area() float64
	Name() string
}

type Square struct{ side float64 }

func (s Square) Area() float64 { return s.side * s.side }
func (s Square) Name() string  { return "square" }

type Circle struct{ r float64 }

func (c *Circle) Area() float64 { return 3.14 * c.r * c.r }
func (c Circle) Name() string   { return "circle" }

type Line struct{}

func (l Line) Name() string { return "line" }
"#;
        let (result, _) = compute(&[(APP, "shapes.go", source)]);
        let shape = TypeKey::new(APP, "Shape");
        let impls: Vec<_> = result.implementors(&shape).collect();
        assert_eq!(impls.len(), 2);

        let circle = impls.iter().find(|i| i.ty.name == "Circle").unwrap();
        assert!(circle.pointer_receiver);
        let square = impls.iter().find(|i| i.ty.name == "Square").unwrap();
        assert!(!square.pointer_receiver);
        assert!(!result.implements(&TypeKey::new(APP, "Line"), &shape));
    }

    #[test]
    fn test_embedded_interfaces_and_promotion() {
        let source = r#"package app

type Reader interface {
	Read(p []byte) (int, error)
}

type ReadCloser interface {
	Reader
	Close() error
}

type base struct{}

func (b *base) Close() error { return nil }

type File struct {
	*base
}

func (f File) Read(p []byte) (int, error) { return 0, nil }
"#;
        let (result, degradations) = compute(&[(APP, "io.go", source)]);
        assert!(degradations.is_empty());
        let file = TypeKey::new(APP, "File");
        assert!(result.implements(&file, &TypeKey::new(APP, "ReadCloser")));
        assert!(result.implements(&file, &TypeKey::new(APP, "Reader")));
        let implementor = result
            .implementors(&TypeKey::new(APP, "ReadCloser"))
            .next()
            .unwrap();
        assert!(!implementor.pointer_receiver);
    }

    #[test]
    fn test_cross_package_implementation() {
        let (result, _) = compute(&[
            (
                "example.com/app/api",
                "api.go",
                "package api\n\ntype Request struct{}\n\ntype Handler interface {\n\tHandle(r *Request) error\n}\n",
            ),
            (
                "example.com/app/impl",
                "impl.go",
                "package impl\n\nimport \"example.com/app/api\"\n\ntype Echo struct{}\n\nfunc (e *Echo) Handle(r *api.Request) error { return nil }\n",
            ),
        ]);
        assert!(result.implements(
            &TypeKey::new("example.com/app/impl", "Echo"),
            &TypeKey::new("example.com/app/api", "Handler"),
        ));
    }

    #[test]
    fn test_unresolved_embed_degrades() {
        let source = "package app\n\nimport \"io\"\n\ntype Stream interface {\n\tio.Reader\n\tFlush()\n}\n\ntype Empty interface{}\n\ntype S struct{}\n\nfunc (S) Flush() {}\n";
        let (result, degradations) = compute(&[(APP, "s.go", source)]);
        assert!(result.is_empty());
        assert_eq!(degradations.len(), 1);
        assert_eq!(degradations[0].subject, "Stream");
        assert!(degradations[0].reason.contains("io.Reader"));
    }

    #[test]
    fn test_error_embed_is_builtin() {
        let source = "package app\n\ntype Coded interface {\n\terror\n\tCode() int\n}\n\ntype E struct{}\n\nfunc (E) Error() string { return \"\" }\nfunc (E) Code() int     { return 1 }\n";
        let (result, degradations) = compute(&[(APP, "e.go", source)]);
        assert!(degradations.is_empty());
        assert!(result.implements(&TypeKey::new(APP, "E"), &TypeKey::new(APP, "Coded")));
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_method_set_spans_files() {
        let (result, _) = compute(&[
            (
                APP,
                "shape.go",
                "package app\n\ntype Shape interface {\n\tArea() float64\n\tName() string\n}\n\ntype Square struct{ side float64 }\n\nfunc (s Square) Area() float64 { return s.side * s.side }\n",
            ),
            (
                APP,
                "square_name.go",
                "package app\n\nfunc (s *Square) Name() string { return \"square\" }\n",
            ),
        ]);
        let implementor = result
            .implementors(&TypeKey::new(APP, "Shape"))
            .next()
            .unwrap();
        assert_eq!(implementor.ty, TypeKey::new(APP, "Square"));
        assert!(implementor.pointer_receiver);
    }

    #[test]
    fn test_method_set_does_not_span_packages() {
        let (result, _) = compute(&[
            (
                "example.com/app/geom",
                "shape.go",
                "package geom\n\ntype Shape interface {\n\tArea() float64\n\tName() string\n}\n\ntype Tri struct{}\n\nfunc (t Tri) Area() float64 { return 0 }\n",
            ),
            (
                "example.com/app/other",
                "tri.go",
                "package other\n\ntype Tri struct{}\n\nfunc (t Tri) Name() string { return \"tri\" }\n",
            ),
        ]);
        assert!(result.is_empty());
    }
}
