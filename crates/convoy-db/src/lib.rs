pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::info;

pub use models::{Change, FieldOp, Filter, Record};

/// Default capacity of the change broadcast channel.
pub const DEFAULT_CHANGE_CAPACITY: usize = 1024;

/// Persistent keyed-record store with push notification on change.
///
/// Every committed write is followed by a [`Change`] on the broadcast channel
/// returned from [`ChangeFeed::changes`]. Array edits go through
/// [`ChangeFeed::update`], which applies its whole batch atomically, so
/// concurrent writers never clobber each other's elements.
pub trait ChangeFeed: Send + Sync + 'static {
    /// Create a record. The store assigns `seq`, `created_at` and `updated_at`.
    fn insert(&self, collection: &str, id: &str, body: Value) -> Result<Record>;

    fn get(&self, collection: &str, id: &str) -> Result<Option<Record>>;

    /// All matching records ordered by `(created_at, seq)`.
    fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Record>>;

    /// Apply `ops` in one transaction. Returns `None` if the record is missing.
    fn update(&self, collection: &str, id: &str, ops: &[FieldOp]) -> Result<Option<Record>>;

    /// Subscribe to every change committed after this call.
    fn changes(&self) -> broadcast::Receiver<Change>;
}

pub(crate) struct Writer {
    pub(crate) conn: Connection,
    /// Last timestamp handed out; server stamps never go backwards.
    last_stamp: DateTime<Utc>,
}

impl Writer {
    /// Stored at microsecond precision, so stamps are truncated to match.
    pub(crate) fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6).max(self.last_stamp);
        self.last_stamp = now;
        now
    }
}

pub struct Database {
    writer: Mutex<Writer>,
    changes_tx: broadcast::Sender<Change>,
}

impl Database {
    pub fn open(path: &Path, change_capacity: usize) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::from_connection(conn, change_capacity)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory(change_capacity: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self::from_connection(conn, change_capacity)?;
        info!("In-memory database opened");
        Ok(db)
    }

    fn from_connection(conn: Connection, change_capacity: usize) -> Result<Self> {
        migrations::run(&conn)?;
        let last_stamp = queries::latest_stamp(&conn)?.unwrap_or(DateTime::<Utc>::MIN_UTC);

        let (changes_tx, _) = broadcast::channel(change_capacity.max(1));
        Ok(Self {
            writer: Mutex::new(Writer { conn, last_stamp }),
            changes_tx,
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let writer = self.writer.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&writer.conn)
    }

    pub(crate) fn with_writer<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Writer) -> Result<T>,
    {
        let mut writer = self.writer.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut writer)
    }

    /// Fan out a committed change. No receivers is not an error.
    pub(crate) fn publish(&self, record: &Record) {
        let _ = self.changes_tx.send(Change {
            collection: record.collection.clone(),
            id: record.id.clone(),
            body: record.body.clone(),
        });
    }
}

impl ChangeFeed for Database {
    fn insert(&self, collection: &str, id: &str, body: Value) -> Result<Record> {
        self.insert_record(collection, id, body)
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        self.get_record(collection, id)
    }

    fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Record>> {
        self.query_records(collection, filter)
    }

    fn update(&self, collection: &str, id: &str, ops: &[FieldOp]) -> Result<Option<Record>> {
        self.update_record(collection, id, ops)
    }

    fn changes(&self) -> broadcast::Receiver<Change> {
        self.changes_tx.subscribe()
    }
}
