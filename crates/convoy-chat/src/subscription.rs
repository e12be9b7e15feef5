use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use convoy_db::{Change, ChangeFeed};

use crate::error::Result;
use crate::feed::{SharedFeed, blocking};

/// A live, cancellable stream of full snapshots.
///
/// The first snapshot is the current state; every relevant change committed to
/// the feed afterwards replaces it wholesale. If loading a snapshot fails the
/// stream stops, but [`Subscription::latest`] keeps returning the last good
/// one. Dropping the handle cancels it.
pub struct Subscription<T> {
    rx: watch::Receiver<Option<T>>,
    cancel: CancellationToken,
}

impl<T> Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn spawn<M, L>(
        feed: SharedFeed,
        cancel: CancellationToken,
        label: String,
        relevant: M,
        load: L,
    ) -> Self
    where
        M: Fn(&Change) -> bool + Send + 'static,
        L: Fn(&dyn ChangeFeed) -> Result<T> + Send + Sync + 'static,
    {
        let (tx, rx) = watch::channel(None);
        tokio::spawn(run_subscription(
            feed,
            cancel.clone(),
            label,
            relevant,
            Arc::new(load),
            tx,
        ));
        Self { rx, cancel }
    }

    /// Wait for the next snapshot. Returns `None` once cancelled or once the
    /// stream has stopped after a failure.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            let changed = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                changed = self.rx.changed() => changed,
            };
            if changed.is_err() {
                return None;
            }

            if let Some(snapshot) = self.rx.borrow_and_update().clone() {
                return Some(snapshot);
            }
        }
    }

    /// Last delivered snapshot, if any has loaded yet.
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// Stop receiving updates. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_subscription<T, M, L>(
    feed: SharedFeed,
    cancel: CancellationToken,
    label: String,
    relevant: M,
    load: Arc<L>,
    tx: watch::Sender<Option<T>>,
) where
    T: Send + Sync + 'static,
    M: Fn(&Change) -> bool + Send + 'static,
    L: Fn(&dyn ChangeFeed) -> Result<T> + Send + Sync + 'static,
{
    // Listen before the first load so nothing committed in between is missed.
    let mut changes = feed.changes();
    debug!(subscription = %label, "Subscription started");

    'outer: loop {
        let load = load.clone();
        let snapshot = tokio::select! {
            _ = cancel.cancelled() => break,
            snapshot = blocking(&feed, move |feed| load(feed)) => snapshot,
        };

        match snapshot {
            // A load that finished after cancellation is dropped unseen.
            Ok(_) if cancel.is_cancelled() => break,
            Ok(snapshot) => {
                if tx.send(Some(snapshot)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(subscription = %label, "Snapshot load failed, keeping last snapshot: {}", e);
                break;
            }
        }

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                received = changes.recv() => received,
            };

            match received {
                Ok(change) if relevant(&change) => break,
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    debug!(subscription = %label, "Lagged by {} changes, reloading", n);
                    break;
                }
                Err(RecvError::Closed) => {
                    warn!(subscription = %label, "Change feed closed");
                    break 'outer;
                }
            }
        }
    }

    debug!(subscription = %label, "Subscription ended");
}
