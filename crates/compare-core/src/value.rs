//! Document and business key representations.
//!
//! Both stores surface documents in their own native shapes; adapters convert
//! them into [`DocumentValue`] so the diff engine can dispatch on a closed set
//! of variants instead of driver-specific types.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// A recursively nested document value.
///
/// Object field order is preserved from the source document; it is irrelevant
/// for equality but drives the deterministic visiting order of the diff
/// engine.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Bytes(Vec<u8>),
    Array(Vec<DocumentValue>),
    Object(IndexMap<String, DocumentValue>),
}

impl DocumentValue {
    /// Type label used in mismatch records and type-mismatch comparisons.
    ///
    /// `Int` and `Float` are distinct labels but compare numerically; see
    /// [`DocumentValue::numeric_value`].
    pub fn type_name(&self) -> &'static str {
        match self {
            DocumentValue::Null => "null",
            DocumentValue::Bool(_) => "bool",
            DocumentValue::Int(_) => "int",
            DocumentValue::Float(_) => "float",
            DocumentValue::String(_) => "string",
            DocumentValue::DateTime(_) => "datetime",
            DocumentValue::Bytes(_) => "bytes",
            DocumentValue::Array(_) => "array",
            DocumentValue::Object(_) => "object",
        }
    }

    /// Numeric view of the value, when it has one.
    pub fn numeric_value(&self) -> Option<f64> {
        match self {
            DocumentValue::Int(i) => Some(*i as f64),
            DocumentValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Render for mismatch logs.
    ///
    /// Values with no natural JSON form degrade to strings so the log stays
    /// writable.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DocumentValue::Null => serde_json::Value::Null,
            DocumentValue::Bool(b) => serde_json::Value::Bool(*b),
            DocumentValue::Int(i) => serde_json::Value::Number(serde_json::Number::from(*i)),
            DocumentValue::Float(f) => match serde_json::Number::from_f64(*f) {
                Some(n) => serde_json::Value::Number(n),
                None => serde_json::Value::String(f.to_string()),
            },
            DocumentValue::String(s) => serde_json::Value::String(s.clone()),
            DocumentValue::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            DocumentValue::Bytes(bytes) => {
                let mut hex = String::with_capacity(bytes.len() * 2);
                for b in bytes {
                    hex.push_str(&format!("{b:02x}"));
                }
                serde_json::Value::String(hex)
            }
            DocumentValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(DocumentValue::to_json).collect())
            }
            DocumentValue::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (key, value) in fields {
                    map.insert(key.clone(), value.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

/// An application-chosen field value identifying the same logical document in
/// both stores.
///
/// Uniqueness within a collection is an external invariant the engine assumes
/// and does not verify. Kept to hashable primitives so keys can be
/// deduplicated and scored; an ObjectId travels as its hex form tagged so
/// adapters can query it natively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BusinessKey {
    Int(i64),
    String(String),
    Bool(bool),
    ObjectId(String),
}

impl BusinessKey {
    /// Stable textual form used for sampling scores and tie-breaks.
    ///
    /// Must not change across releases: deterministic sample membership for a
    /// given seed depends on it.
    pub fn canonical(&self) -> String {
        match self {
            BusinessKey::Int(i) => i.to_string(),
            BusinessKey::String(s) => s.clone(),
            BusinessKey::Bool(b) => b.to_string(),
            BusinessKey::ObjectId(hex) => hex.clone(),
        }
    }

    /// JSON rendering for mismatch records.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            BusinessKey::Int(i) => serde_json::Value::Number(serde_json::Number::from(*i)),
            BusinessKey::String(s) => serde_json::Value::String(s.clone()),
            BusinessKey::Bool(b) => serde_json::Value::Bool(*b),
            BusinessKey::ObjectId(hex) => serde_json::Value::String(hex.clone()),
        }
    }
}

impl std::fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms_are_stable() {
        assert_eq!(BusinessKey::Int(42).canonical(), "42");
        assert_eq!(BusinessKey::String("ab".into()).canonical(), "ab");
        assert_eq!(BusinessKey::Bool(true).canonical(), "true");
        assert_eq!(
            BusinessKey::ObjectId("507f1f77bcf86cd799439011".into()).canonical(),
            "507f1f77bcf86cd799439011"
        );
    }

    #[test]
    fn object_preserves_field_order() {
        let mut fields = IndexMap::new();
        fields.insert("z".to_string(), DocumentValue::Int(1));
        fields.insert("a".to_string(), DocumentValue::Int(2));
        let value = DocumentValue::Object(fields);
        if let DocumentValue::Object(fields) = &value {
            let keys: Vec<_> = fields.keys().collect();
            assert_eq!(keys, vec!["z", "a"]);
        }
    }

    #[test]
    fn json_rendering_degrades_to_strings() {
        assert_eq!(
            DocumentValue::Float(f64::NAN).to_json(),
            serde_json::Value::String("NaN".to_string())
        );
        assert_eq!(
            DocumentValue::Bytes(vec![0xde, 0xad]).to_json(),
            serde_json::Value::String("dead".to_string())
        );
    }
}
