use serde_json::Value;

use crate::error::ValidationError;
use crate::model::{RecordFields, REQUIRED_FIELDS};

/// Checks a raw request body and pulls out the record fields.
///
/// Presence is key existence: `0`, `false`, `""` and `null` all count.
/// A JSON value that is not an object is missing every field.
pub fn validate_payload(body: Option<&[u8]>) -> Result<RecordFields, ValidationError> {
    let body = match body {
        Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => bytes,
        _ => return Err(ValidationError::MissingBody),
    };

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ValidationError::MalformedPayload(e.to_string()))?;

    let mut object = match value {
        Value::Object(map) => map,
        _ => return Err(ValidationError::MissingFields(REQUIRED_FIELDS.to_vec())),
    };

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| !object.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields(missing));
    }

    // Keys are known present, so each remove yields Some.
    let mut take = |field: &str| object.remove(field).unwrap_or(Value::Null);
    Ok(RecordFields {
        id: take("id"),
        result: take("result"),
        score: take("score"),
    })
}
