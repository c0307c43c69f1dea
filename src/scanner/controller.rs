use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::persistence::EventQueue;

use super::debounce::Clock;
use super::loop_worker::{scan_loop, CaptureSettings, ScanLoopReport, ScannerStatus};
use super::source::{Decoder, FrameSource};

pub struct ScannerController {
    handle: Option<JoinHandle<ScanLoopReport>>,
    cancel_token: Option<CancellationToken>,
    status_tx: watch::Sender<ScannerStatus>,
}

impl ScannerController {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ScannerStatus::Idle);
        Self {
            handle: None,
            cancel_token: None,
            status_tx,
        }
    }

    pub fn status(&self) -> watch::Receiver<ScannerStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn start<S, D, C>(
        &mut self,
        source: S,
        decoder: D,
        clock: Arc<C>,
        queue: EventQueue,
        settings: CaptureSettings,
    ) -> Result<()>
    where
        S: FrameSource,
        D: Decoder<S::Frame>,
        C: Clock,
    {
        if self.handle.is_some() {
            bail!("scanner already active");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(scan_loop(
            source,
            decoder,
            clock,
            queue,
            settings,
            self.status_tx.clone(),
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        info!("scanner started");
        Ok(())
    }

    /// Waits for the loop to end on its own (source exhausted, queue gone).
    pub async fn join(&mut self) -> Result<ScanLoopReport> {
        self.cancel_token.take();
        match self.handle.take() {
            Some(handle) => handle.await.context("scan loop task failed to join"),
            None => Ok(ScanLoopReport::default()),
        }
    }

    pub async fn stop(&mut self) -> Result<ScanLoopReport> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        match self.handle.take() {
            Some(handle) => handle.await.context("scan loop task failed to join"),
            None => Ok(ScanLoopReport::default()),
        }
    }
}

impl Default for ScannerController {
    fn default() -> Self {
        Self::new()
    }
}
