//! Type helper: a small reflected-type system layered over
//! `serde_json::Value`, and the per-edge coercion record the compiler's
//! type-inference fixpoint produces.
//!
//! Rust has no runtime struct/interface reflection to lean on the way the
//! system this engine's design is modeled after does. [`TypeDescriptor`]
//! is the substitute: a value-level description of a node's declared
//! input/output shape (struct-with-fields, homogeneous mapping, open
//! interface, list, scalar, or fully dynamic `Any`), expressive enough for
//! the compiler to answer "can a value shaped like `from` flow into a slot
//! shaped like `to`?" without needing compile-time generics over node types.
//!
//! That question has three answers, not two: a struct with every field
//! present in both sides is **always** assignable; a struct missing a field
//! the destination requires can **never** be; and anything touching an
//! `Interface` or `Any` boundary **may or may not** be, resolved only once
//! real values are flowing (hence also runtime field-mapping validation in
//! [`crate::mapping`]).

use std::collections::BTreeMap;

use serde_json::Value;

/// The three possible answers to "is a value of type `from` assignable to a
/// slot of type `to`?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignability {
    /// Always assignable; the compiler can treat the edge as statically sound.
    Must,
    /// Never assignable; the compiler should reject the graph at compile time.
    MustNot,
    /// Assignability depends on the actual runtime value; defer to a runtime
    /// check when the edge actually carries a value.
    May,
}

impl Assignability {
    /// Whether this result permits the graph to compile (i.e. isn't `MustNot`).
    pub fn permits_compile(self) -> bool {
        !matches!(self, Self::MustNot)
    }
}

/// Scalar kinds `TypeDescriptor` distinguishes. `Value::Null` maps to `Null`
/// rather than being folded into `Any`, so a field explicitly typed as
/// nullable is distinguishable from one with no declared type at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    /// UTF-8 string.
    String,
    /// Any JSON number (integer or float).
    Number,
    /// Boolean.
    Bool,
    /// JSON null.
    Null,
}

/// A value-level description of a node's declared input or output shape.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    /// No declared shape; assignable to and from anything.
    Any,
    /// A single scalar kind.
    Scalar(ScalarKind),
    /// A homogeneous list of the given element type.
    List(Box<TypeDescriptor>),
    /// A struct with named, individually typed fields.
    Struct {
        /// Name used in error messages and visualization.
        name: String,
        /// Field name -> field type.
        fields: BTreeMap<String, TypeDescriptor>,
    },
    /// A homogeneous mapping with arbitrary string keys and a fixed value type.
    Mapping(Box<TypeDescriptor>),
    /// A named open type whose concrete shape isn't known until runtime
    /// (the equivalent of an interface/trait-object boundary).
    Interface(String),
}

impl TypeDescriptor {
    /// Infer a descriptor from an actual JSON value. Used to seed the
    /// compiler's type-inference fixpoint from node output examples or
    /// literal initial state, and to validate field-mapping assignments at
    /// runtime once real values are available.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => Self::Scalar(ScalarKind::Null),
            Value::Bool(_) => Self::Scalar(ScalarKind::Bool),
            Value::Number(_) => Self::Scalar(ScalarKind::Number),
            Value::String(_) => Self::Scalar(ScalarKind::String),
            Value::Array(items) => {
                let element = items
                    .first()
                    .map(Self::infer)
                    .unwrap_or(Self::Any);
                Self::List(Box::new(element))
            }
            Value::Object(map) => Self::Struct {
                name: "inferred".to_string(),
                fields: map.iter().map(|(k, v)| (k.clone(), Self::infer(v))).collect(),
            },
        }
    }

    /// Whether a value of this shape is assignable to a slot shaped `to`.
    pub fn assignable_to(&self, to: &TypeDescriptor) -> Assignability {
        use Assignability::*;
        match (self, to) {
            (_, TypeDescriptor::Any) => Must,
            (TypeDescriptor::Any, _) => May,
            (TypeDescriptor::Interface(_), _) | (_, TypeDescriptor::Interface(_)) => {
                if self == to {
                    Must
                } else {
                    May
                }
            }
            (TypeDescriptor::Scalar(a), TypeDescriptor::Scalar(b)) => {
                if a == b {
                    Must
                } else {
                    MustNot
                }
            }
            (TypeDescriptor::List(a), TypeDescriptor::List(b)) => a.assignable_to(b),
            (TypeDescriptor::Mapping(a), TypeDescriptor::Mapping(b)) => a.assignable_to(b),
            (TypeDescriptor::Struct { fields: from_fields, .. }, TypeDescriptor::Struct { fields: to_fields, .. }) => {
                let mut saw_may = false;
                for (field, to_ty) in to_fields {
                    match from_fields.get(field) {
                        None => return MustNot,
                        Some(from_ty) => match from_ty.assignable_to(to_ty) {
                            Must => {}
                            MustNot => return MustNot,
                            May => saw_may = true,
                        },
                    }
                }
                if saw_may {
                    May
                } else {
                    Must
                }
            }
            _ => MustNot,
        }
    }
}

/// The type-inference result recorded for one edge once the compiler's
/// fixpoint has run: the producer's inferred output type, the consumer's
/// declared input type, and the assignability verdict between them.
#[derive(Debug, Clone)]
pub struct EdgeCoercion {
    /// Source node id.
    pub from_node: String,
    /// Destination node id.
    pub to_node: String,
    /// Inferred type flowing out of `from_node`.
    pub from_type: TypeDescriptor,
    /// Declared type expected by `to_node`.
    pub to_type: TypeDescriptor,
    /// Verdict from [`TypeDescriptor::assignable_to`].
    pub assignability: Assignability,
}

impl EdgeCoercion {
    /// Compute the coercion record for one edge.
    pub fn compute(from_node: impl Into<String>, to_node: impl Into<String>, from_type: TypeDescriptor, to_type: TypeDescriptor) -> Self {
        let assignability = from_type.assignable_to(&to_type);
        Self {
            from_node: from_node.into(),
            to_node: to_node.into(),
            from_type,
            to_type,
            assignability,
        }
    }
}
