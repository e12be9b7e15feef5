use std::sync::Arc;

use tracing::error;

use convoy_db::ChangeFeed;

use crate::error::{ChatError, Result};

pub type SharedFeed = Arc<dyn ChangeFeed>;

/// Run blocking feed work off the async runtime.
pub(crate) async fn blocking<F, T>(feed: &SharedFeed, f: F) -> Result<T>
where
    F: FnOnce(&dyn ChangeFeed) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let feed = feed.clone();
    tokio::task::spawn_blocking(move || f(feed.as_ref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::Transport(anyhow::anyhow!("feed task failed: {}", e))
        })?
}
