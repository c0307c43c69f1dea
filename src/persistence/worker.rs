use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result};

use crate::db::{NoteUpdate, ScanWriter};
use crate::error::{ScanError, ScanResult};

use super::notifier::{Notifier, StoreChange};
use super::queue::{EventQueue, QueueItem};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// How the worker should treat items still queued when asked to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Commit everything queued before the sentinel, then exit.
    Drain,
    /// Finish the in-flight commit and abandon the rest.
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub committed: usize,
    pub failed: usize,
    pub abandoned: usize,
}

/// Owner of the store's write handle. Runs on its own thread, draining the
/// queue in FIFO order so ids follow enqueue order.
pub struct PersistenceWorker {
    handle: Option<JoinHandle<WorkerReport>>,
    queue: EventQueue,
    stop_flag: Arc<AtomicBool>,
    done_rx: mpsc::Receiver<()>,
    poll_interval: Duration,
}

impl PersistenceWorker {
    pub fn spawn<W: ScanWriter>(
        writer: W,
        notifier: Notifier,
        poll_interval: Duration,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<QueueItem>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let stop_flag = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new()
            .name("scanlog-db".into())
            .spawn({
                let stop_flag = Arc::clone(&stop_flag);
                move || {
                    // Dropped on exit, which is what waiters observe.
                    let _done = done_tx;
                    run(writer, rx, stop_flag, notifier, poll_interval)
                }
            })
            .context("failed to spawn persistence worker thread")?;

        log_info!("Persistence worker started (poll every {poll_interval:?})");

        Ok(Self {
            handle: Some(handle),
            queue: EventQueue::new(tx),
            stop_flag,
            done_rx,
            poll_interval,
        })
    }

    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Asks the worker to exit. Does not wait.
    pub fn request_shutdown(&self, mode: ShutdownMode) {
        if mode == ShutdownMode::Stop {
            self.stop_flag.store(true, Ordering::Release);
        }
        if !self.queue.push_sentinel() {
            log_warn!("Persistence worker already gone when shutdown was requested");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Blocks until the worker exits or `timeout` elapses. On timeout the
    /// stop flag is raised and the thread is detached; the caller must treat
    /// the error as fatal and release whatever else it holds.
    pub fn wait(mut self, timeout: Duration) -> ScanResult<WorkerReport> {
        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => {}
            Ok(()) | Err(RecvTimeoutError::Timeout) => {
                self.stop_flag.store(true, Ordering::Release);
                self.handle.take();
                log_error!("Persistence worker did not stop within {timeout:?}; detaching it");
                return Err(ScanError::ShutdownTimeout(timeout));
            }
        }

        let Some(handle) = self.handle.take() else {
            return Ok(WorkerReport::default());
        };
        let report = handle
            .join()
            .map_err(|_| anyhow::anyhow!("persistence worker panicked"))?;
        log_info!(
            "Persistence worker stopped: {} committed, {} failed, {} abandoned",
            report.committed,
            report.failed,
            report.abandoned
        );
        Ok(report)
    }

    /// Requests shutdown in `mode` and waits up to `timeout`.
    pub fn shutdown(self, mode: ShutdownMode, timeout: Duration) -> ScanResult<WorkerReport> {
        self.request_shutdown(mode);
        self.wait(timeout)
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Not waited on; the thread drains up to the sentinel and exits.
            self.queue.push_sentinel();
            drop(handle);
        }
    }
}

fn run<W: ScanWriter>(
    mut writer: W,
    rx: mpsc::Receiver<QueueItem>,
    stop_flag: Arc<AtomicBool>,
    notifier: Notifier,
    poll_interval: Duration,
) -> WorkerReport {
    let mut report = WorkerReport::default();

    loop {
        if stop_flag.load(Ordering::Acquire) {
            break;
        }

        let item = match rx.recv_timeout(poll_interval) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log_info!("All queue producers dropped; persistence worker exiting");
                break;
            }
        };

        if stop_flag.load(Ordering::Acquire) {
            if matches!(item, QueueItem::Append(_)) {
                report.abandoned += 1;
            }
            break;
        }

        match item {
            QueueItem::Append(scan) => match writer.append(&scan) {
                Ok(id) => {
                    report.committed += 1;
                    log_debug!("Committed scan {id}: {}", scan.content());
                    notifier.notify(StoreChange::Appended { id });
                }
                Err(err) => {
                    report.failed += 1;
                    log_error!(
                        "Dropping scan '{}' detected at {}: {err:#}",
                        scan.content(),
                        scan.detected_at()
                    );
                }
            },
            QueueItem::SetNote { id, note, reply } => {
                let outcome = writer.set_note(id, note.as_deref());
                match &outcome {
                    Ok(NoteUpdate::Updated) => notifier.notify(StoreChange::NoteEdited { id }),
                    Ok(NoteUpdate::NotFound) => log_warn!("Note edit for missing scan {id}"),
                    Err(err) => log_error!("Failed to edit note for scan {id}: {err:#}"),
                }
                if reply.send(outcome).is_err() {
                    log_warn!("Note edit requester for scan {id} went away");
                }
            }
            QueueItem::Shutdown => {
                log_info!("Persistence worker received shutdown sentinel");
                break;
            }
        }
    }

    if stop_flag.load(Ordering::Acquire) {
        report.abandoned += rx
            .try_iter()
            .filter(|item| matches!(item, QueueItem::Append(_)))
            .count();
        if report.abandoned > 0 {
            log_warn!("Abandoned {} queued scans on stop", report.abandoned);
        }
    }

    drop(writer);
    log_info!("Persistence worker released the write handle");

    report
}
