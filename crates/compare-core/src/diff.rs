//! Recursive structural comparison of document trees.
//!
//! The walk is depth-first with path tracking. Object fields are visited in
//! source-field order followed by target-only fields, so the entry order is
//! deterministic for a given pair and exclusion policy. Arrays are compared
//! strictly positionally: a length difference produces a single
//! `LengthMismatch` entry for the whole array and no element recursion.

use std::collections::HashSet;

use crate::value::DocumentValue;

/// One step in a difference path: a field name or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Render a path as a dotted string, `$` for the document root.
///
/// Field segments join with `.`, indices render as `[i]`: `items[0].price`.
pub fn path_string(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "$".to_string();
    }
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Field(name) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(name);
            }
            PathSegment::Index(i) => {
                out.push_str(&format!("[{i}]"));
            }
        }
    }
    out
}

/// The kind of difference found at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    MissingInSource,
    MissingInTarget,
    TypeMismatch,
    ValueMismatch,
    LengthMismatch,
}

impl DiffKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffKind::MissingInSource => "missing_in_source",
            DiffKind::MissingInTarget => "missing_in_target",
            DiffKind::TypeMismatch => "type_mismatch",
            DiffKind::ValueMismatch => "value_mismatch",
            DiffKind::LengthMismatch => "length_mismatch",
        }
    }
}

/// A single path-addressed difference between a matched pair.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceEntry {
    pub path: Vec<PathSegment>,
    pub kind: DiffKind,
    pub source: Option<DocumentValue>,
    pub target: Option<DocumentValue>,
}

impl DifferenceEntry {
    /// Dotted rendering of the entry path.
    pub fn path_string(&self) -> String {
        path_string(&self.path)
    }

    /// JSON record for the mismatch log. Type labels accompany the values so
    /// a type_mismatch line is readable without inspecting both renderings.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "path": self.path_string(),
            "kind": self.kind.as_str(),
            "source_type": self.source.as_ref().map(DocumentValue::type_name),
            "target_type": self.target.as_ref().map(DocumentValue::type_name),
            "source": self.source.as_ref().map(DocumentValue::to_json),
            "target": self.target.as_ref().map(DocumentValue::to_json),
        })
    }
}

/// The set of field specifiers skipped during comparison.
///
/// A bare name excludes that field at any depth; a dotted path excludes only
/// the field at that exact logical path. Array indices do not participate in
/// logical paths, so `meta.tags` also matches `meta.tags` inside every
/// element when `meta` is an array of objects.
#[derive(Debug, Clone, Default)]
pub struct ExcludePolicy {
    anywhere: HashSet<String>,
    exact: HashSet<String>,
}

impl ExcludePolicy {
    pub fn new(specifiers: impl IntoIterator<Item = String>) -> Self {
        let mut anywhere = HashSet::new();
        let mut exact = HashSet::new();
        for spec in specifiers {
            if spec.contains('.') {
                exact.insert(spec);
            } else {
                anywhere.insert(spec);
            }
        }
        ExcludePolicy { anywhere, exact }
    }

    pub fn is_empty(&self) -> bool {
        self.anywhere.is_empty() && self.exact.is_empty()
    }

    /// Whether the field at `logical_path` is excluded from comparison.
    fn excludes(&self, field: &str, logical_path: &str) -> bool {
        self.anywhere.contains(field) || self.exact.contains(logical_path)
    }
}

/// Compare an optional pair of documents, producing path-addressed entries.
///
/// Both sides absent is a logical no-op. One absent side produces a single
/// missing entry at the root path; everything else walks the trees.
pub fn diff(
    source: Option<&DocumentValue>,
    target: Option<&DocumentValue>,
    policy: &ExcludePolicy,
) -> Vec<DifferenceEntry> {
    match (source, target) {
        (None, None) => Vec::new(),
        (None, Some(target)) => vec![DifferenceEntry {
            path: Vec::new(),
            kind: DiffKind::MissingInSource,
            source: None,
            target: Some(target.clone()),
        }],
        (Some(source), None) => vec![DifferenceEntry {
            path: Vec::new(),
            kind: DiffKind::MissingInTarget,
            source: Some(source.clone()),
            target: None,
        }],
        (Some(source), Some(target)) => {
            let mut entries = Vec::new();
            let mut path = Vec::new();
            walk(source, target, &mut path, "", policy, &mut entries);
            entries
        }
    }
}

fn join_logical(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{parent}.{field}")
    }
}

fn walk(
    source: &DocumentValue,
    target: &DocumentValue,
    path: &mut Vec<PathSegment>,
    logical: &str,
    policy: &ExcludePolicy,
    entries: &mut Vec<DifferenceEntry>,
) {
    match (source, target) {
        (DocumentValue::Object(source_fields), DocumentValue::Object(target_fields)) => {
            // Source-field order first, then target-only fields.
            for (field, source_value) in source_fields {
                let child_logical = join_logical(logical, field);
                if policy.excludes(field, &child_logical) {
                    continue;
                }
                path.push(PathSegment::Field(field.clone()));
                match target_fields.get(field) {
                    Some(target_value) => {
                        walk(source_value, target_value, path, &child_logical, policy, entries);
                    }
                    None => entries.push(DifferenceEntry {
                        path: path.clone(),
                        kind: DiffKind::MissingInTarget,
                        source: Some(source_value.clone()),
                        target: None,
                    }),
                }
                path.pop();
            }
            for (field, target_value) in target_fields {
                if source_fields.contains_key(field) {
                    continue;
                }
                let child_logical = join_logical(logical, field);
                if policy.excludes(field, &child_logical) {
                    continue;
                }
                path.push(PathSegment::Field(field.clone()));
                entries.push(DifferenceEntry {
                    path: path.clone(),
                    kind: DiffKind::MissingInSource,
                    source: None,
                    target: Some(target_value.clone()),
                });
                path.pop();
            }
        }
        (DocumentValue::Array(source_items), DocumentValue::Array(target_items)) => {
            if source_items.len() != target_items.len() {
                // Strictly positional comparison: report the length difference
                // once instead of recursing into misaligned elements.
                entries.push(DifferenceEntry {
                    path: path.clone(),
                    kind: DiffKind::LengthMismatch,
                    source: Some(DocumentValue::Int(source_items.len() as i64)),
                    target: Some(DocumentValue::Int(target_items.len() as i64)),
                });
                return;
            }
            for (i, (source_item, target_item)) in
                source_items.iter().zip(target_items.iter()).enumerate()
            {
                path.push(PathSegment::Index(i));
                // Indices are not part of the logical path used for exclusions.
                walk(source_item, target_item, path, logical, policy, entries);
                path.pop();
            }
        }
        _ => {
            // Numbers compare numerically across the int/float divide. The
            // f64 crossover applies only to mixed pairs; an Int/Int pair uses
            // exact i64 equality so values above 2^53 never collapse.
            match (source, target) {
                (DocumentValue::Int(_), DocumentValue::Int(_)) => {}
                _ => {
                    if let (Some(a), Some(b)) = (source.numeric_value(), target.numeric_value()) {
                        if a != b {
                            entries.push(scalar_entry(path, DiffKind::ValueMismatch, source, target));
                        }
                        return;
                    }
                }
            }
            if std::mem::discriminant(source) != std::mem::discriminant(target) {
                entries.push(scalar_entry(path, DiffKind::TypeMismatch, source, target));
                return;
            }
            if source != target {
                entries.push(scalar_entry(path, DiffKind::ValueMismatch, source, target));
            }
        }
    }
}

fn scalar_entry(
    path: &[PathSegment],
    kind: DiffKind,
    source: &DocumentValue,
    target: &DocumentValue,
) -> DifferenceEntry {
    DifferenceEntry {
        path: path.to_vec(),
        kind,
        source: Some(source.clone()),
        target: Some(target.clone()),
    }
}
