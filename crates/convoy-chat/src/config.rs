use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use convoy_db::{DEFAULT_CHANGE_CAPACITY, Database};

pub const DEFAULT_DB_PATH: &str = "convoy.db";
pub const DEFAULT_PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// SQLite file backing the change feed.
    pub db_path: PathBuf,
    /// Buffered changes per feed subscriber before it lags and reloads.
    pub change_capacity: usize,
    /// Max characters of text kept in a conversation's last-message preview.
    pub preview_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            change_capacity: DEFAULT_CHANGE_CAPACITY,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

impl ChatConfig {
    /// Load from the process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = lookup("CONVOY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let change_capacity = match lookup("CONVOY_CHANGE_CAPACITY") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("CONVOY_CHANGE_CAPACITY is not a number: {}", raw))?,
            None => defaults.change_capacity,
        };
        if change_capacity == 0 {
            anyhow::bail!("CONVOY_CHANGE_CAPACITY must be at least 1");
        }

        let preview_chars = match lookup("CONVOY_PREVIEW_CHARS") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("CONVOY_PREVIEW_CHARS is not a number: {}", raw))?,
            None => defaults.preview_chars,
        };

        Ok(Self {
            db_path,
            change_capacity,
            preview_chars,
        })
    }

    pub fn open_feed(&self) -> Result<Database> {
        info!(
            "Opening change feed at {} (capacity {})",
            self.db_path.display(),
            self.change_capacity
        );
        Database::open(&self.db_path, self.change_capacity)
    }
}
