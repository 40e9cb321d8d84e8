use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One stored row. Cells are kept as raw JSON so `id` and `score` keep their caller-supplied type.
pub type Row = Vec<Value>;

/// Keys every inbound record must carry, in reporting order.
pub const REQUIRED_FIELDS: [&str; 3] = ["id", "result", "score"];

pub const HEADER: [&str; 4] = ["Timestamp", "ID", "Result", "Score"];

pub fn header_row() -> Row {
    HEADER.iter().map(|h| Value::String((*h).to_string())).collect()
}

/// Caller-supplied part of a record. Presence is checked, types are not.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecordFields {
    pub id: Value,
    pub result: Value,
    pub score: Value,
}

/// The Atomic Unit of Tally
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Assigned server-side at append, never taken from the caller
    pub timestamp: DateTime<Utc>,
    pub id: Value,
    pub result: Value,
    pub score: Value,
}

impl Record {
    pub fn stamp(fields: RecordFields, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            id: fields.id,
            result: fields.result,
            score: fields.score,
        }
    }

    pub fn into_row(self) -> Row {
        vec![
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
            self.id,
            self.result,
            self.score,
        ]
    }
}
