//! Field mapping: moving values between a producer's output shape and a
//! consumer's input shape along a data edge.
//!
//! A data edge doesn't have to connect identically-shaped nodes. A
//! [`FieldMapping`] names a source path to read out of the upstream value
//! and a destination path to write it into the downstream value, so
//! `summarize\u{1f}output` can land at `review\u{1f}draft` without the two
//! nodes agreeing on field names. A [`MappingSet`] is the full set of
//! mappings attached to one edge; it is validated twice — once statically,
//! when the edge is added (duplicate destinations, empty paths), and once
//! more with type information once the compiler's inference fixpoint has
//! run (see [`crate::types`]), since a source path's type isn't known until
//! then.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::{GraphError, Result};
use crate::types::{Assignability, TypeDescriptor};

/// The separator joining path segments, both in [`FieldPath::parse`]'s wire
/// form and in [`FieldPath::as_str`]'s rendering.
///
/// A `.` or `/` would collide with a user field name or mapping key that
/// happens to contain one; the ASCII Unit Separator essentially never shows
/// up in real field names, so segments can be rejoined unambiguously.
pub const PATH_SEPARATOR: char = '\u{1f}';

/// A single path into a JSON value, e.g. segments `["a", "b", "c"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Build a path directly from its segments (the primary constructor —
    /// bypasses any separator entirely, so segment content is unrestricted).
    pub fn from_segments(segments: Vec<String>) -> Result<Self> {
        if segments.is_empty() {
            return Err(GraphError::Build("field path must not be empty".to_string()));
        }
        if segments.iter().any(String::is_empty) {
            return Err(GraphError::Build("field path has an empty segment".to_string()));
        }
        Ok(Self { segments })
    }

    /// Parse a path in its wire form: segments joined by
    /// [`PATH_SEPARATOR`]. Empty segments (leading/trailing/doubled
    /// separators) are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(GraphError::Build("field path must not be empty".to_string()));
        }
        let segments: Vec<String> = raw.split(PATH_SEPARATOR).map(str::to_string).collect();
        Self::from_segments(segments)
    }

    /// Read the value at this path out of `root`, if present.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Write `value` at this path inside `root`, creating intermediate
    /// objects as needed. Fails if an intermediate segment already holds a
    /// non-object value.
    pub fn set(&self, root: &mut Value, value: Value) -> Result<()> {
        if !root.is_object() {
            *root = Value::Object(Map::new());
        }
        let mut current = root;
        let (last, prefix) = self.segments.split_last().expect("parse rejects empty paths");
        for segment in prefix {
            let obj = current
                .as_object_mut()
                .ok_or_else(|| GraphError::Build(format!("path segment '{segment}' is not an object")))?;
            current = obj
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !current.is_object() {
                return Err(GraphError::Build(format!(
                    "cannot write through non-object value at segment '{segment}'"
                )));
            }
        }
        let obj = current
            .as_object_mut()
            .ok_or_else(|| GraphError::Build(format!("path segment '{last}' is not an object")))?;
        obj.insert(last.clone(), value);
        Ok(())
    }

    /// The wire-form string, segments joined by [`PATH_SEPARATOR`].
    pub fn as_str(&self) -> String {
        self.segments.join(&PATH_SEPARATOR.to_string())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join(&PATH_SEPARATOR.to_string()))
    }
}

/// One source-path -> destination-path assignment on a data edge.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    /// Path read from the upstream value.
    pub source: FieldPath,
    /// Path written into the downstream value.
    pub target: FieldPath,
}

impl FieldMapping {
    /// Build a mapping from two wire-form path strings (segments joined by
    /// [`PATH_SEPARATOR`]).
    pub fn new(source: &str, target: &str) -> Result<Self> {
        Ok(Self {
            source: FieldPath::parse(source)?,
            target: FieldPath::parse(target)?,
        })
    }

    /// Build a mapping from segment lists directly, without going through
    /// the wire form. Convenient when a caller already has parsed path
    /// segments (e.g. from a builder API) and wants to skip the separator
    /// round-trip.
    pub fn from_segments(source: Vec<String>, target: Vec<String>) -> Result<Self> {
        Ok(Self {
            source: FieldPath::from_segments(source)?,
            target: FieldPath::from_segments(target)?,
        })
    }

    /// Apply this mapping: read `source` out of `from`, write it into
    /// `target` inside `into`. A missing source path is silently skipped —
    /// downstream nodes are expected to handle absent optional fields, same
    /// as a struct with a field omitted.
    pub fn apply(&self, from: &Value, into: &mut Value) -> Result<()> {
        if let Some(value) = self.source.get(from) {
            self.target.set(into, value.clone())?;
        }
        Ok(())
    }
}

/// The full set of field mappings attached to one data edge.
#[derive(Debug, Clone, Default)]
pub struct MappingSet {
    mappings: Vec<FieldMapping>,
}

impl MappingSet {
    /// An empty mapping set (an identity edge: the whole value passes through).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping, enforcing target-path uniqueness within this set.
    ///
    /// Two mappings writing to the same destination path is always a build
    /// error — the second write would silently clobber the first and the
    /// conflict can't be resolved by type inference, so it's caught here
    /// rather than deferred.
    pub fn add(&mut self, mapping: FieldMapping) -> Result<()> {
        if self.mappings.iter().any(|m| m.target == mapping.target) {
            return Err(GraphError::Build(format!(
                "duplicate mapping target '{}'",
                mapping.target
            )));
        }
        self.mappings.push(mapping);
        Ok(())
    }

    /// Whether this set has no mappings (pass the value through unchanged).
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// The wire-form destination path of every mapping in this set, used by
    /// the compiler to check target-path uniqueness across every edge
    /// feeding the same destination node, not just within one edge.
    pub fn target_paths(&self) -> Vec<String> {
        self.mappings.iter().map(|m| m.target.as_str()).collect()
    }

    /// Apply every mapping in this set, building a fresh destination value.
    /// An empty set passes `from` through unchanged (identity edge).
    pub fn apply(&self, from: &Value) -> Result<Value> {
        if self.mappings.is_empty() {
            return Ok(from.clone());
        }
        let mut into = Value::Object(Map::new());
        for mapping in &self.mappings {
            mapping.apply(from, &mut into)?;
        }
        Ok(into)
    }

    /// Deferred validation: once the compiler knows the producer's output
    /// type and the consumer's declared input type, check each mapping's
    /// source path actually resolves within `from_type` and that the value
    /// it would carry is assignable into the field `target` names within
    /// `to_type`. Returns every mapping whose assignability came back
    /// `MustNot`; an empty result means the edge's mappings are compile-time
    /// sound (anything left `May` is deferred again, to a runtime check).
    pub fn validate_against_types(&self, from_type: &TypeDescriptor, to_type: &TypeDescriptor) -> Vec<String> {
        let mut failures = Vec::new();
        for mapping in &self.mappings {
            let source_ty = resolve_field_type(from_type, &mapping.source);
            let target_ty = resolve_field_type(to_type, &mapping.target);
            if let (Some(source_ty), Some(target_ty)) = (source_ty, target_ty) {
                if source_ty.assignable_to(&target_ty) == Assignability::MustNot {
                    failures.push(format!(
                        "mapping {} -> {} is type-incompatible",
                        mapping.source, mapping.target
                    ));
                }
            }
        }
        failures
    }
}

/// Walk a [`TypeDescriptor`] along a dotted path, returning the descriptor at
/// that path if the path resolves through known struct fields. Returns
/// `None` when the path runs through an `Any`, `Interface`, or `Mapping`
/// boundary — those defer to runtime, same as [`TypeDescriptor::assignable_to`].
fn resolve_field_type(root: &TypeDescriptor, path: &FieldPath) -> Option<TypeDescriptor> {
    let mut current = root.clone();
    for segment in &path.segments {
        current = match current {
            TypeDescriptor::Struct { fields, .. } => fields.get(segment)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}
