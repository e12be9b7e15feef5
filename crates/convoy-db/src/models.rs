//! Database row types and the feed's public record/filter/op types.
//! Row types map directly to SQLite rows; `Record` is what callers see.
use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde_json::Value;

pub struct RecordRow {
    pub seq: i64,
    pub collection: String,
    pub id: String,
    pub body: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Store-assigned insertion order; breaks `created_at` ties.
    pub seq: i64,
    pub collection: String,
    pub id: String,
    pub body: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for Record {
    type Error = anyhow::Error;

    fn try_from(row: RecordRow) -> Result<Self> {
        let body = serde_json::from_str(&row.body)
            .map_err(|e| anyhow!("Corrupt body on {}/{}: {}", row.collection, row.id, e))?;
        let created_at = parse_stamp(&row.created_at)?;
        let updated_at = parse_stamp(&row.updated_at)?;

        Ok(Self {
            seq: row.seq,
            collection: row.collection,
            id: row.id,
            body,
            created_at,
            updated_at,
        })
    }
}

fn parse_stamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

/// A committed insert or update, broadcast to every feed subscriber.
#[derive(Debug, Clone)]
pub struct Change {
    pub collection: String,
    pub id: String,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    /// Top-level body field equals `value`.
    FieldEq { field: String, value: Value },
}

impl Filter {
    pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::FieldEq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, body: &Value) -> bool {
        match self {
            Self::All => true,
            Self::FieldEq { field, value } => body.get(field) == Some(value),
        }
    }
}

/// A single field edit. Paths are JSON pointers into the record body.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set { path: String, value: Value },
    /// `Set`, unless the current value's numeric `order_by` field is greater
    /// than the incoming one's.
    SetIfNewer { path: String, value: Value, order_by: String },
    /// Append `value` unless the array already holds it.
    ArrayUnion { path: String, value: Value },
    /// Drop every element equal to `value`; absent is a no-op.
    ArrayRemove { path: String, value: Value },
}

impl FieldOp {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set { path: path.into(), value: value.into() }
    }

    pub fn set_if_newer(path: impl Into<String>, value: impl Into<Value>, order_by: impl Into<String>) -> Self {
        Self::SetIfNewer {
            path: path.into(),
            value: value.into(),
            order_by: order_by.into(),
        }
    }

    pub fn array_union(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::ArrayUnion { path: path.into(), value: value.into() }
    }

    pub fn array_remove(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::ArrayRemove { path: path.into(), value: value.into() }
    }

    pub fn apply(&self, body: &mut Value) -> Result<()> {
        match self {
            Self::Set { path, value } => {
                let (parent, key) = split_pointer(path)?;
                match body.pointer_mut(parent) {
                    Some(Value::Object(map)) => {
                        map.insert(key, value.clone());
                        Ok(())
                    }
                    _ => bail!("No object at '{}'", parent),
                }
            }
            Self::SetIfNewer { path, value, order_by } => {
                let current = body
                    .pointer(path)
                    .and_then(|v| v.get(order_by))
                    .and_then(Value::as_i64);
                let incoming = value.get(order_by).and_then(Value::as_i64);
                if let (Some(current), Some(incoming)) = (current, incoming) {
                    if current > incoming {
                        return Ok(());
                    }
                }
                Self::set(path.as_str(), value.clone()).apply(body)
            }
            Self::ArrayUnion { path, value } => {
                let items = array_at(body, path)?;
                if !items.contains(value) {
                    items.push(value.clone());
                }
                Ok(())
            }
            Self::ArrayRemove { path, value } => {
                array_at(body, path)?.retain(|v| v != value);
                Ok(())
            }
        }
    }
}

fn array_at<'a>(body: &'a mut Value, path: &str) -> Result<&'a mut Vec<Value>> {
    match body.pointer_mut(path) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(anyhow!("Value at '{}' is not an array", path)),
        None => Err(anyhow!("No array at '{}'", path)),
    }
}

fn split_pointer(path: &str) -> Result<(&str, String)> {
    let idx = path
        .rfind('/')
        .ok_or_else(|| anyhow!("Invalid JSON pointer '{}'", path))?;
    let key = path[idx + 1..].replace("~1", "/").replace("~0", "~");
    Ok((&path[..idx], key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn array_ops_behave_as_sets() {
        let mut body = json!({ "poll": { "options": [ { "votes": [] }, { "votes": ["u1"] } ] } });

        FieldOp::array_union("/poll/options/0/votes", "u1").apply(&mut body).unwrap();
        FieldOp::array_union("/poll/options/0/votes", "u1").apply(&mut body).unwrap();
        FieldOp::array_remove("/poll/options/1/votes", "u1").apply(&mut body).unwrap();
        FieldOp::array_remove("/poll/options/1/votes", "u9").apply(&mut body).unwrap();

        assert_eq!(body["poll"]["options"][0]["votes"], json!(["u1"]));
        assert_eq!(body["poll"]["options"][1]["votes"], json!([]));
    }

    #[test]
    fn set_creates_missing_key() {
        let mut body = json!({ "group_id": "g1" });
        FieldOp::set("/last_message", json!({ "summary": "hi" })).apply(&mut body).unwrap();
        assert_eq!(body["last_message"]["summary"], "hi");
    }

    #[test]
    fn set_if_newer_keeps_the_newest_value() {
        let mut body = json!({ "last_message": null });

        FieldOp::set_if_newer("/last_message", json!({ "at": 20, "id": "b" }), "at")
            .apply(&mut body)
            .unwrap();
        FieldOp::set_if_newer("/last_message", json!({ "at": 10, "id": "a" }), "at")
            .apply(&mut body)
            .unwrap();
        assert_eq!(body["last_message"]["id"], "b");

        FieldOp::set_if_newer("/last_message", json!({ "at": 30, "id": "c" }), "at")
            .apply(&mut body)
            .unwrap();
        assert_eq!(body["last_message"]["id"], "c");
    }

    #[test]
    fn ops_on_bad_paths_fail() {
        let mut body = json!({ "text": "hello" });
        assert!(FieldOp::array_union("/read_by", "u1").apply(&mut body).is_err());
        assert!(FieldOp::array_union("/text", "u1").apply(&mut body).is_err());
        assert!(FieldOp::set("/missing/key", 1).apply(&mut body).is_err());
        assert!(FieldOp::set("no-slash", 1).apply(&mut body).is_err());
    }

    #[test]
    fn field_eq_filter_matches_top_level_field() {
        let filter = Filter::field_eq("conversation_id", "c1");
        assert!(filter.matches(&json!({ "conversation_id": "c1" })));
        assert!(!filter.matches(&json!({ "conversation_id": "c2" })));
        assert!(!filter.matches(&json!({})));
        assert!(Filter::All.matches(&json!(null)));
    }
}
