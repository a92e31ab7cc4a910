//! MongoDB-driver adapters for the source and target stores.
//!
//! Both stores speak the Mongo wire protocol, so the two adapters share the
//! same driver, the same BSON conversion, and the same retry policy. Each
//! adapter owns its retries; a [`AdapterError`] surfaced to the engine is
//! final for that operation.

use std::time::Duration;

use compare_core::indexmap::IndexMap;
use compare_core::{AdapterError, BusinessKey, DocumentValue};
use mongodb::bson::{oid::ObjectId, Bson, Document};

pub mod cosmos;
pub mod mongo;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Whether a driver error is worth retrying.
fn retryable(error: &mongodb::error::Error) -> bool {
    use mongodb::error::ErrorKind;
    matches!(
        *error.kind,
        ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. }
    )
}

fn classify(error: mongodb::error::Error) -> AdapterError {
    if retryable(&error) {
        AdapterError::transient(error.to_string())
    } else {
        AdapterError::permanent(error.to_string())
    }
}

/// Run a driver operation with bounded exponential backoff. Non-retryable
/// errors fail immediately; retryable ones fail after the last attempt.
async fn with_retries<T, F, Fut>(operation: &str, mut run: F) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, mongodb::error::Error>>,
{
    let mut attempt = 0;
    loop {
        match run().await {
            Ok(value) => return Ok(value),
            Err(e) if retryable(&e) && attempt + 1 < MAX_ATTEMPTS => {
                let backoff = BACKOFF_BASE * 2u32.pow(attempt);
                tracing::warn!(
                    "Transient error in {operation} (attempt {}): {e}, retrying in {backoff:?}",
                    attempt + 1
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(classify(e)),
        }
    }
}

/// Convert a BSON value into the store-neutral document representation.
///
/// Types without a neutral equivalent degrade to strings so documents from
/// either store stay comparable: ObjectId as its hex form, Decimal128 via its
/// canonical rendering, regex as `/pattern/options`.
pub fn bson_to_value(bson: Bson) -> DocumentValue {
    match bson {
        Bson::Null | Bson::Undefined => DocumentValue::Null,
        Bson::Boolean(b) => DocumentValue::Bool(b),
        Bson::Int32(i) => DocumentValue::Int(i64::from(i)),
        Bson::Int64(i) => DocumentValue::Int(i),
        Bson::Double(f) => DocumentValue::Float(f),
        Bson::String(s) => DocumentValue::String(s),
        Bson::ObjectId(oid) => DocumentValue::String(oid.to_hex()),
        Bson::Decimal128(d) => DocumentValue::String(d.to_string()),
        Bson::DateTime(dt) => DocumentValue::DateTime(dt.to_chrono()),
        Bson::Timestamp(ts) => {
            use chrono::TimeZone;
            match chrono::Utc.timestamp_opt(i64::from(ts.time), 0).single() {
                Some(dt) => DocumentValue::DateTime(dt),
                None => DocumentValue::String(format!("timestamp({},{})", ts.time, ts.increment)),
            }
        }
        Bson::Binary(bin) => DocumentValue::Bytes(bin.bytes),
        Bson::RegularExpression(regex) => {
            DocumentValue::String(format!("/{}/{}", regex.pattern, regex.options))
        }
        Bson::JavaScriptCode(code) => DocumentValue::String(code),
        Bson::JavaScriptCodeWithScope(code) => DocumentValue::String(code.code),
        Bson::Symbol(s) => DocumentValue::String(s),
        Bson::Array(items) => {
            DocumentValue::Array(items.into_iter().map(bson_to_value).collect())
        }
        Bson::Document(doc) => bson_to_document(doc),
        other => DocumentValue::String(format!("{other:?}")),
    }
}

/// Convert a BSON document, preserving field order.
pub fn bson_to_document(doc: Document) -> DocumentValue {
    let mut fields = IndexMap::with_capacity(doc.len());
    for (key, value) in doc {
        fields.insert(key, bson_to_value(value));
    }
    DocumentValue::Object(fields)
}

/// Turn a sampled key back into a BSON filter value.
pub fn business_key_to_bson(key: &BusinessKey) -> Result<Bson, AdapterError> {
    match key {
        BusinessKey::Int(i) => Ok(Bson::Int64(*i)),
        BusinessKey::String(s) => Ok(Bson::String(s.clone())),
        BusinessKey::Bool(b) => Ok(Bson::Boolean(*b)),
        BusinessKey::ObjectId(hex) => ObjectId::parse_str(hex)
            .map(Bson::ObjectId)
            .map_err(|e| AdapterError::permanent(format!("Invalid ObjectId {hex:?}: {e}"))),
    }
}

/// Read a business key out of a projected document value. Returns `None` for
/// values that cannot serve as a key, which the sampler skips.
pub fn bson_to_business_key(bson: &Bson) -> Option<BusinessKey> {
    match bson {
        Bson::Int32(i) => Some(BusinessKey::Int(i64::from(*i))),
        Bson::Int64(i) => Some(BusinessKey::Int(*i)),
        // The magnitude guard keeps the cast exact; huge doubles would all
        // saturate onto i64::MAX and collide as keys.
        Bson::Double(f) if f.fract() == 0.0 && f.is_finite() && f.abs() < 2f64.powi(63) => {
            Some(BusinessKey::Int(*f as i64))
        }
        Bson::String(s) => Some(BusinessKey::String(s.clone())),
        Bson::Boolean(b) => Some(BusinessKey::Bool(*b)),
        Bson::ObjectId(oid) => Some(BusinessKey::ObjectId(oid.to_hex())),
        _ => None,
    }
}

/// Resolve a dotted field path inside a document. Arrays terminate the walk;
/// a business key never lives inside an array.
pub fn extract_field<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let value = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(value);
        }
        match value {
            Bson::Document(inner) => current = inner,
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn objectid_and_decimal_become_strings() {
        let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        assert_eq!(
            bson_to_value(Bson::ObjectId(oid)),
            DocumentValue::String("507f1f77bcf86cd799439011".to_string())
        );
    }

    #[test]
    fn document_conversion_preserves_field_order() {
        let doc = doc! { "b": 1i64, "a": 2i64, "c": 3i64 };
        match bson_to_document(doc) {
            DocumentValue::Object(fields) => {
                let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
                assert_eq!(keys, vec!["b", "a", "c"]);
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn integral_double_keys_become_ints() {
        assert_eq!(
            bson_to_business_key(&Bson::Double(42.0)),
            Some(BusinessKey::Int(42))
        );
        assert_eq!(bson_to_business_key(&Bson::Double(4.5)), None);
        assert_eq!(bson_to_business_key(&Bson::Null), None);
    }

    #[test]
    fn out_of_range_doubles_are_not_keys() {
        // Integral but beyond i64; casting would saturate and collide.
        assert_eq!(bson_to_business_key(&Bson::Double(1e19)), None);
        assert_eq!(bson_to_business_key(&Bson::Double(-1e19)), None);
        assert_eq!(bson_to_business_key(&Bson::Double(f64::INFINITY)), None);
        assert_eq!(
            bson_to_business_key(&Bson::Double(9.0e18)),
            Some(BusinessKey::Int(9_000_000_000_000_000_000))
        );
    }

    #[test]
    fn business_key_round_trips_through_bson() {
        let key = BusinessKey::ObjectId("507f1f77bcf86cd799439011".to_string());
        let bson = business_key_to_bson(&key).unwrap();
        assert_eq!(bson_to_business_key(&bson), Some(key));
        assert!(business_key_to_bson(&BusinessKey::ObjectId("nope".to_string())).is_err());
    }

    #[test]
    fn dotted_paths_resolve_nested_fields() {
        let doc = doc! { "order": { "customer": { "id": 7i64 } }, "tags": ["a"] };
        assert_eq!(
            extract_field(&doc, "order.customer.id"),
            Some(&Bson::Int64(7))
        );
        assert_eq!(extract_field(&doc, "order.customer.name"), None);
        assert_eq!(extract_field(&doc, "tags.0"), None);
    }
}
