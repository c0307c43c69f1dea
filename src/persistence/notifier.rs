use log::{info, warn};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::db::{HistoryReader, ScanEvent};

const CHANNEL_CAPACITY: usize = 64;

/// What changed in the store. Subscribers are expected to re-query rather
/// than patch their view from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Appended { id: i64 },
    NoteEdited { id: i64 },
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<StoreChange>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }

    /// Publishes a change. Having no subscribers is normal.
    pub(crate) fn notify(&self, change: StoreChange) {
        let _ = self.tx.send(change);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps `view` equal to the latest `limit` scans, reloading it in full on
/// every store change. Returns when `cancel_token` fires or the notifier is
/// dropped.
pub async fn follow_history(
    reader: HistoryReader,
    mut changes: broadcast::Receiver<StoreChange>,
    limit: usize,
    view: watch::Sender<Vec<ScanEvent>>,
    cancel_token: CancellationToken,
) {
    reload(&reader, limit, &view).await;

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(_) => reload(&reader, limit, &view).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("history view lagged behind {skipped} store changes, reloading");
                    reload(&reader, limit, &view).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = cancel_token.cancelled() => break,
        }
    }

    info!("history view follower stopped");
}

async fn reload(reader: &HistoryReader, limit: usize, view: &watch::Sender<Vec<ScanEvent>>) {
    match reader.list_recent(limit).await {
        Ok(scans) => {
            view.send_replace(scans);
        }
        Err(err) => warn!("failed to reload history view: {err:#}"),
    }
}
