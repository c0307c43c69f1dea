use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{error, info};
use tokio::sync::{broadcast, watch};

use crate::{
    db::{HistoryReader, HistoryStore, ScanWriter},
    error::{ScanError, ScanResult},
    export::{export_range, ExportOutcome},
    persistence::{EventQueue, Notifier, PersistenceWorker, ShutdownMode, StoreChange, WorkerReport},
    scanner::{
        Clock, Decoder, FrameSource, ScanLoopReport, ScannerController, ScannerStatus, SystemClock,
    },
    settings::ScanSettings,
};

/// Everything a running scanner needs: the persistence worker holding the
/// write handle, a shared read handle, the change notifier and the capture
/// loop controller.
pub struct ScanApp {
    settings: ScanSettings,
    reader: HistoryReader,
    notifier: Notifier,
    worker: Option<PersistenceWorker>,
    queue: EventQueue,
    scanner: ScannerController,
}

impl ScanApp {
    pub fn open(settings: ScanSettings, db_path: PathBuf) -> Result<Self> {
        let store = HistoryStore::open(db_path)?;
        let reader = store.reader()?;
        Self::with_writer(settings, reader, store.into_writer())
    }

    /// Assembles the app around an already opened store. `writer` becomes
    /// the persistence worker's write handle.
    pub fn with_writer<W: ScanWriter>(
        settings: ScanSettings,
        reader: HistoryReader,
        writer: W,
    ) -> Result<Self> {
        let notifier = Notifier::new();
        let worker = PersistenceWorker::spawn(writer, notifier.clone(), settings.worker_poll())
            .context("failed to start persistence worker")?;
        let queue = worker.queue();

        Ok(Self {
            settings,
            reader,
            notifier,
            worker: Some(worker),
            queue,
            scanner: ScannerController::new(),
        })
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn reader(&self) -> HistoryReader {
        self.reader.clone()
    }

    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.notifier.subscribe()
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    pub fn scanner_status(&self) -> watch::Receiver<ScannerStatus> {
        self.scanner.status()
    }

    pub fn start_scanning<S, D>(&mut self, source: S, decoder: D) -> Result<()>
    where
        S: FrameSource,
        D: Decoder<S::Frame>,
    {
        self.start_scanning_with_clock(source, decoder, Arc::new(SystemClock))
    }

    pub fn start_scanning_with_clock<S, D, C>(
        &mut self,
        source: S,
        decoder: D,
        clock: Arc<C>,
    ) -> Result<()>
    where
        S: FrameSource,
        D: Decoder<S::Frame>,
        C: Clock,
    {
        self.scanner
            .start(source, decoder, clock, self.queue.clone(), self.settings.capture())
    }

    /// Waits for a finite source to run dry.
    pub async fn finish_scanning(&mut self) -> Result<ScanLoopReport> {
        self.scanner.join().await
    }

    pub async fn stop_scanning(&mut self) -> Result<ScanLoopReport> {
        self.scanner.stop().await
    }

    pub async fn set_note(&self, id: i64, text: &str) -> ScanResult<()> {
        self.queue.set_note(id, text).await
    }

    pub async fn export(&self, start: NaiveDate, end: NaiveDate) -> ScanResult<ExportOutcome> {
        export_range(&self.reader, start, end).await
    }

    /// Stops capture, lets the worker commit what is already queued and
    /// waits for it within the configured shutdown timeout.
    ///
    /// On [`ScanError::ShutdownTimeout`] the worker is detached and the read
    /// connection is released; the caller must treat that as fatal. After a
    /// clean shutdown the reader stays usable.
    pub async fn shutdown(&mut self) -> ScanResult<WorkerReport> {
        if let Err(err) = self.scanner.stop().await {
            error!("scan loop did not stop cleanly: {err:#}");
        }

        let Some(worker) = self.worker.take() else {
            return Ok(WorkerReport::default());
        };

        let timeout = self.settings.shutdown_timeout();
        let outcome = tokio::task::spawn_blocking(move || {
            worker.shutdown(ShutdownMode::Drain, timeout)
        })
        .await
        .map_err(|err| ScanError::Storage(anyhow::anyhow!("shutdown task failed: {err}")))?;

        match outcome {
            Ok(report) => {
                info!("scanner shut down cleanly");
                Ok(report)
            }
            Err(err) => {
                if err.is_fatal() {
                    self.reader.close();
                }
                Err(err)
            }
        }
    }
}
