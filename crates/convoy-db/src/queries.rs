use crate::models::{FieldOp, Filter, Record, RecordRow};
use crate::Database;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

const RECORD_COLUMNS: &str = "seq, collection, id, body, created_at, updated_at";

impl Database {
    pub fn insert_record(&self, collection: &str, id: &str, body: Value) -> Result<Record> {
        let record = self.with_writer(|writer| {
            let stamp = writer.next_stamp();
            let stamp_text = format_stamp(stamp);
            writer.conn.execute(
                "INSERT INTO records (collection, id, body, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![collection, id, body.to_string(), stamp_text],
            )?;

            Ok(Record {
                seq: writer.conn.last_insert_rowid(),
                collection: collection.to_string(),
                id: id.to_string(),
                body,
                created_at: stamp,
                updated_at: stamp,
            })
        })?;

        debug!("Inserted {}/{} (seq {})", collection, id, record.seq);
        self.publish(&record);
        Ok(record)
    }

    pub fn get_record(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        self.with_conn(|conn| query_record(conn, collection, id))
    }

    pub fn query_records(&self, collection: &str, filter: &Filter) -> Result<Vec<Record>> {
        self.with_conn(|conn| query_filtered(conn, collection, filter))
    }

    /// Apply a batch of field ops under the writer lock, in one transaction.
    /// Either every op lands or none does.
    pub fn update_record(&self, collection: &str, id: &str, ops: &[FieldOp]) -> Result<Option<Record>> {
        let updated = self.with_writer(|writer| {
            let stamp = writer.next_stamp();
            let tx = writer.conn.transaction()?;

            let Some(mut record) = query_record(&tx, collection, id)? else {
                return Ok(None);
            };

            for op in ops {
                op.apply(&mut record.body)?;
            }

            tx.execute(
                "UPDATE records SET body = ?1, updated_at = ?2 WHERE seq = ?3",
                rusqlite::params![record.body.to_string(), format_stamp(stamp), record.seq],
            )?;
            tx.commit()?;

            record.updated_at = stamp;
            Ok(Some(record))
        })?;

        if let Some(record) = &updated {
            debug!("Updated {}/{} with {} op(s)", collection, id, ops.len());
            self.publish(record);
        }
        Ok(updated)
    }
}

/// RFC 3339 with fixed microsecond precision, so text order is time order.
fn format_stamp(stamp: DateTime<Utc>) -> String {
    stamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Newest stamp on disk, so a reopened store keeps stamping forward.
pub(crate) fn latest_stamp(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn.query_row("SELECT MAX(updated_at) FROM records", [], |r| r.get(0))?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| anyhow::anyhow!("Corrupt timestamp '{}': {}", raw, e))
    })
    .transpose()
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        seq: row.get(0)?,
        collection: row.get(1)?,
        id: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn query_record(conn: &Connection, collection: &str, id: &str) -> Result<Option<Record>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM records WHERE collection = ?1 AND id = ?2",
        RECORD_COLUMNS
    ))?;

    let row = stmt
        .query_row(rusqlite::params![collection, id], read_row)
        .optional()?;

    row.map(Record::try_from).transpose()
}

fn query_filtered(conn: &Connection, collection: &str, filter: &Filter) -> Result<Vec<Record>> {
    let rows = match filter {
        Filter::All => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM records WHERE collection = ?1 ORDER BY created_at, seq",
                RECORD_COLUMNS
            ))?;
            let rows = stmt
                .query_map([collection], read_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        Filter::FieldEq { field, value } => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM records
                 WHERE collection = ?1 AND json_extract(body, ?2) = json_extract(?3, '$')
                 ORDER BY created_at, seq",
                RECORD_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![collection, format!("$.{}", field), value.to_string()],
                    read_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };

    rows.into_iter().map(Record::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChangeFeed;
    use serde_json::json;
    use std::sync::Arc;

    fn db() -> Database {
        Database::open_in_memory(16).unwrap()
    }

    #[test]
    fn insert_then_get() {
        let db = db();
        let inserted = db.insert("messages", "m1", json!({ "text": "hi" })).unwrap();
        let fetched = db.get("messages", "m1").unwrap().unwrap();

        assert_eq!(fetched, inserted);
        assert_eq!(fetched.created_at, fetched.updated_at);
        assert!(db.get("messages", "m2").unwrap().is_none());
        assert!(db.get("conversations", "m1").unwrap().is_none());
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let db = db();
        db.insert("messages", "m1", json!({})).unwrap();
        assert!(db.insert("messages", "m1", json!({})).is_err());
    }

    #[test]
    fn query_orders_by_stamp_then_seq_and_filters() {
        let db = db();
        db.insert("messages", "a", json!({ "conversation_id": "c1", "n": 1 })).unwrap();
        db.insert("messages", "b", json!({ "conversation_id": "c2", "n": 2 })).unwrap();
        db.insert("messages", "c", json!({ "conversation_id": "c1", "n": 3 })).unwrap();
        db.insert("conversations", "d", json!({ "conversation_id": "c1" })).unwrap();

        let c1 = db.query("messages", &Filter::field_eq("conversation_id", "c1")).unwrap();
        let ids: Vec<_> = c1.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(c1[0].created_at <= c1[1].created_at);
        assert!(c1[0].seq < c1[1].seq);

        let all = db.query("messages", &Filter::All).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn update_applies_batch_and_bumps_updated_at() {
        let db = db();
        let inserted = db
            .insert("messages", "m1", json!({ "a": ["u1"], "b": [] }))
            .unwrap();

        let updated = db
            .update(
                "messages",
                "m1",
                &[FieldOp::array_remove("/a", "u1"), FieldOp::array_union("/b", "u1")],
            )
            .unwrap()
            .unwrap();

        assert_eq!(updated.body, json!({ "a": [], "b": ["u1"] }));
        assert_eq!(updated.created_at, inserted.created_at);
        assert!(updated.updated_at >= inserted.updated_at);
        assert_eq!(db.get("messages", "m1").unwrap().unwrap().body, updated.body);
    }

    #[test]
    fn failed_batch_leaves_record_untouched() {
        let db = db();
        db.insert("messages", "m1", json!({ "a": [] })).unwrap();

        let result = db.update(
            "messages",
            "m1",
            &[FieldOp::array_union("/a", "u1"), FieldOp::array_union("/missing", "u1")],
        );
        assert!(result.is_err());
        assert_eq!(db.get("messages", "m1").unwrap().unwrap().body, json!({ "a": [] }));
    }

    #[test]
    fn update_missing_record_returns_none() {
        let db = db();
        assert!(db.update("messages", "nope", &[]).unwrap().is_none());
    }

    #[test]
    fn writes_are_broadcast() {
        let db = db();
        let mut rx = db.changes();

        db.insert("messages", "m1", json!({ "votes": [] })).unwrap();
        db.update("messages", "m1", &[FieldOp::array_union("/votes", "u1")]).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!((first.collection.as_str(), first.id.as_str()), ("messages", "m1"));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.body, json!({ "votes": ["u1"] }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn concurrent_unions_are_not_lost() {
        let db = Arc::new(db());
        db.insert("messages", "m1", json!({ "votes": [] })).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = db.clone();
                std::thread::spawn(move || {
                    db.update("messages", "m1", &[FieldOp::array_union("/votes", format!("u{}", i))])
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let body = db.get("messages", "m1").unwrap().unwrap().body;
        assert_eq!(body["votes"].as_array().unwrap().len(), 8);
    }

    #[test]
    fn reopened_store_stamps_after_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stamps.db");

        let first = {
            let db = Database::open(&path, 16).unwrap();
            db.insert("messages", "m1", json!({})).unwrap()
        };
        let db = Database::open(&path, 16).unwrap();
        assert_eq!(latest_stamp(&db.writer.lock().unwrap().conn).unwrap(), Some(first.updated_at));

        let second = db.insert("messages", "m2", json!({})).unwrap();
        assert!(second.created_at >= first.created_at);
    }

    #[test]
    fn stamps_never_go_backwards() {
        let db = db();
        let mut last = None;
        for i in 0..50 {
            let rec = db.insert("messages", &format!("m{}", i), json!({})).unwrap();
            if let Some(prev) = last {
                assert!(rec.created_at >= prev);
            }
            last = Some(rec.created_at);
        }
    }
}
