use std::sync::mpsc;

use anyhow::{anyhow, Result};
use tokio::sync::oneshot;

use crate::db::{helpers::normalize_note, NoteUpdate, PendingScan};
use crate::error::{ScanError, ScanResult};

pub(crate) type NoteReply = oneshot::Sender<Result<NoteUpdate>>;

pub(crate) enum QueueItem {
    Append(PendingScan),
    SetNote {
        id: i64,
        note: Option<String>,
        reply: NoteReply,
    },
    /// Sentinel: the worker stops taking work once it reaches this.
    Shutdown,
}

/// Producer side of the hand-off to the persistence worker. Sending never
/// blocks; the channel is unbounded.
#[derive(Clone)]
pub struct EventQueue {
    sender: mpsc::Sender<QueueItem>,
}

impl EventQueue {
    pub(crate) fn new(sender: mpsc::Sender<QueueItem>) -> Self {
        Self { sender }
    }

    pub fn enqueue(&self, scan: PendingScan) -> ScanResult<()> {
        self.sender
            .send(QueueItem::Append(scan))
            .map_err(|_| ScanError::QueueClosed)
    }

    /// Edits the note of a committed scan through the worker, preserving
    /// the single-writer rule. Blank text clears the note.
    pub async fn set_note(&self, id: i64, text: &str) -> ScanResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(QueueItem::SetNote {
                id,
                note: normalize_note(text),
                reply: reply_tx,
            })
            .map_err(|_| ScanError::QueueClosed)?;

        let outcome = reply_rx
            .await
            .map_err(|_| anyhow!("persistence worker dropped note edit for scan {id}"))??;

        match outcome {
            NoteUpdate::Updated => Ok(()),
            NoteUpdate::NotFound => Err(ScanError::NotFound(id)),
        }
    }

    pub(crate) fn push_sentinel(&self) -> bool {
        self.sender.send(QueueItem::Shutdown).is_ok()
    }
}
