use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::db::PendingScan;
use crate::error::ScanError;
use crate::persistence::EventQueue;

use super::debounce::{Clock, DebounceGate};
use super::source::{Decoder, Detection, FrameSource};

// Set to true to enable logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// What the scanner is doing, for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ScannerStatus {
    Idle,
    Scanning,
    SourceUnavailable,
    Accepted { content: String },
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub interval: Duration,
    pub capture_timeout: Duration,
    pub cooldown: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanLoopReport {
    pub frames: usize,
    pub unavailable: usize,
    pub timeouts: usize,
    /// Ticks dropped because the previous capture had not returned yet.
    pub skipped: usize,
    pub detections: usize,
    pub accepted: usize,
}

enum CaptureOutcome {
    Decoded(Vec<Detection>),
    Unavailable,
    Exhausted,
}

/// Periodic capture → decode → debounce task. Owns its debounce gate; the
/// only thing it shares is the queue to the persistence worker, which never
/// blocks. Frame grabbing and decoding run on the blocking pool under
/// `capture_timeout`.
pub async fn scan_loop<S, D, C>(
    source: S,
    decoder: D,
    clock: Arc<C>,
    queue: EventQueue,
    settings: CaptureSettings,
    status: watch::Sender<ScannerStatus>,
    cancel_token: CancellationToken,
) -> ScanLoopReport
where
    S: FrameSource,
    D: Decoder<S::Frame>,
    C: Clock,
{
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let pipeline = Arc::new(Mutex::new((source, decoder)));
    let mut gate = DebounceGate::new(settings.cooldown);
    let mut report = ScanLoopReport::default();
    let mut in_flight: Option<JoinHandle<CaptureOutcome>> = None;

    status.send_replace(ScannerStatus::Scanning);
    log_info!(
        "scan loop started (every {:?}, cooldown {:?})",
        settings.interval,
        settings.cooldown
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // At most one capture runs at a time; a hung source costs one
                // blocking thread, not one per tick.
                let mut capture = match in_flight.take() {
                    Some(handle) if !handle.is_finished() => {
                        report.skipped += 1;
                        log_debug!("previous capture still running, skipping tick");
                        in_flight = Some(handle);
                        continue;
                    }
                    Some(handle) => handle,
                    None => tokio::task::spawn_blocking({
                        let pipeline = Arc::clone(&pipeline);
                        move || capture_frame(&pipeline)
                    }),
                };

                let outcome = match tokio::time::timeout(settings.capture_timeout, &mut capture).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(err)) => {
                        log_error!("capture worker join failed: {err}");
                        continue;
                    }
                    Err(_) => {
                        report.timeouts += 1;
                        log_warn!("capture timeout (> {:?})", settings.capture_timeout);
                        in_flight = Some(capture);
                        continue;
                    }
                };

                match outcome {
                    CaptureOutcome::Decoded(detections) => {
                        report.frames += 1;
                        report.detections += detections.len();
                        mark_scanning(&status);
                        match gate_detections(&detections, &mut gate, clock.as_ref(), &queue, &status) {
                            Ok(accepted) => report.accepted += accepted,
                            Err(err) => {
                                log_error!("scan loop cannot hand off scans: {err}");
                                break;
                            }
                        }
                    }
                    CaptureOutcome::Unavailable => {
                        report.unavailable += 1;
                        let changed = status.send_if_modified(|current| {
                            if *current == ScannerStatus::SourceUnavailable {
                                return false;
                            }
                            *current = ScannerStatus::SourceUnavailable;
                            true
                        });
                        if changed {
                            log_warn!("{}", ScanError::CaptureFailure);
                        }
                    }
                    CaptureOutcome::Exhausted => {
                        log_info!("frame source exhausted");
                        break;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("scan loop shutting down");
                break;
            }
        }
    }

    if in_flight.is_some() {
        log_warn!("scan loop stopped with a capture still running");
    }
    status.send_replace(ScannerStatus::Stopped);
    report
}

fn capture_frame<S, D>(pipeline: &Mutex<(S, D)>) -> CaptureOutcome
where
    S: FrameSource,
    D: Decoder<S::Frame>,
{
    let mut guard = match pipeline.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let (source, decoder) = &mut *guard;

    if source.is_exhausted() {
        return CaptureOutcome::Exhausted;
    }

    match source.next_frame() {
        Some(frame) => CaptureOutcome::Decoded(decoder.decode(&frame)),
        None => CaptureOutcome::Unavailable,
    }
}

/// Runs one frame's detections through the gate in decode order, queueing
/// every accepted one. Returns how many were accepted.
fn gate_detections<C: Clock + ?Sized>(
    detections: &[Detection],
    gate: &mut DebounceGate,
    clock: &C,
    queue: &EventQueue,
    status: &watch::Sender<ScannerStatus>,
) -> Result<usize, ScanError> {
    if detections.is_empty() {
        return Ok(0);
    }

    let now = clock.monotonic();
    let detected_at = clock.wall();
    let mut accepted = 0;

    for detection in detections {
        let Some(content) = detection.text() else {
            log_warn!(
                "skipping undecodable payload ({} bytes) at {:?}",
                detection.payload.len(),
                detection.bounding_box
            );
            continue;
        };

        if !gate.accept(content, now) {
            log_debug!("debounced repeat of {content}");
            continue;
        }

        queue.enqueue(PendingScan::new(content, detected_at)?)?;
        accepted += 1;
        log_info!("accepted scan {content}");
        status.send_replace(ScannerStatus::Accepted {
            content: content.to_string(),
        });
    }

    Ok(accepted)
}

fn mark_scanning(status: &watch::Sender<ScannerStatus>) {
    status.send_if_modified(|current| {
        if matches!(current, ScannerStatus::Idle | ScannerStatus::SourceUnavailable) {
            *current = ScannerStatus::Scanning;
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NoteUpdate, ScanWriter};
    use crate::persistence::{Notifier, PersistenceWorker, ShutdownMode};
    use crate::scanner::debounce::ManualClock;
    use crate::scanner::replay::{ReplayDecoder, ReplaySource};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;

    #[derive(Clone, Default)]
    struct MemoryWriter {
        rows: Arc<Mutex<Vec<String>>>,
    }

    impl ScanWriter for MemoryWriter {
        fn append(&mut self, scan: &PendingScan) -> anyhow::Result<i64> {
            let mut rows = self.rows.lock().unwrap();
            rows.push(scan.content().to_string());
            Ok(rows.len() as i64)
        }

        fn set_note(&mut self, _id: i64, _note: Option<&str>) -> anyhow::Result<NoteUpdate> {
            Ok(NoteUpdate::NotFound)
        }
    }

    fn clock() -> ManualClock {
        ManualClock::new(
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        )
    }

    fn detections(codes: &[&str]) -> Vec<Detection> {
        codes
            .iter()
            .map(|code| Detection::new(code.as_bytes(), Default::default()))
            .collect()
    }

    struct NoSymbols;

    impl Decoder<()> for NoSymbols {
        fn decode(&mut self, _frame: &()) -> Vec<Detection> {
            Vec::new()
        }
    }

    /// Blocks inside `next_frame` until released, like a camera driver that
    /// stopped answering.
    struct StalledSource {
        calls: Arc<AtomicUsize>,
        release: std_mpsc::Receiver<()>,
    }

    impl FrameSource for StalledSource {
        type Frame = ();

        fn next_frame(&mut self) -> Option<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.release.recv();
            None
        }
    }

    fn spawn_worker() -> (PersistenceWorker, Arc<Mutex<Vec<String>>>) {
        let writer = MemoryWriter::default();
        let rows = Arc::clone(&writer.rows);
        let worker =
            PersistenceWorker::spawn(writer, Notifier::new(), Duration::from_millis(20)).unwrap();
        (worker, rows)
    }

    #[test]
    fn same_frame_codes_share_the_gate() {
        let (worker, rows) = spawn_worker();
        let (status, _status_rx) = watch::channel(ScannerStatus::Idle);
        let clock = clock();
        let mut gate = DebounceGate::new(Duration::from_millis(1000));

        let accepted = gate_detections(
            &detections(&["A", "B", "A", "A"]),
            &mut gate,
            &clock,
            &worker.queue(),
            &status,
        )
        .unwrap();
        assert_eq!(accepted, 3);

        clock.advance(Duration::from_millis(200));
        let accepted =
            gate_detections(&detections(&["A"]), &mut gate, &clock, &worker.queue(), &status)
                .unwrap();
        assert_eq!(accepted, 0);

        worker
            .shutdown(ShutdownMode::Drain, Duration::from_secs(5))
            .unwrap();
        assert_eq!(*rows.lock().unwrap(), vec!["A", "B", "A"]);
        assert_eq!(
            *status.borrow(),
            ScannerStatus::Accepted {
                content: "A".into()
            }
        );
    }

    #[test]
    fn invalid_payloads_are_skipped() {
        let (worker, rows) = spawn_worker();
        let (status, _status_rx) = watch::channel(ScannerStatus::Idle);
        let mut gate = DebounceGate::default();
        let frame = vec![
            Detection::new(vec![0xc3, 0x28], Default::default()),
            Detection::new("", Default::default()),
            Detection::new("OK-1", Default::default()),
        ];

        let accepted =
            gate_detections(&frame, &mut gate, &clock(), &worker.queue(), &status).unwrap();
        assert_eq!(accepted, 1);

        worker
            .shutdown(ShutdownMode::Drain, Duration::from_secs(5))
            .unwrap();
        assert_eq!(*rows.lock().unwrap(), vec!["OK-1"]);
    }

    #[test]
    fn closed_queue_is_reported() {
        let (worker, _rows) = spawn_worker();
        let queue = worker.queue();
        worker
            .shutdown(ShutdownMode::Drain, Duration::from_secs(5))
            .unwrap();

        let (status, _status_rx) = watch::channel(ScannerStatus::Idle);
        let result = gate_detections(
            &detections(&["late"]),
            &mut DebounceGate::default(),
            &clock(),
            &queue,
            &status,
        );
        assert!(matches!(result, Err(ScanError::QueueClosed)));
    }

    #[tokio::test]
    async fn replayed_frames_run_until_source_is_exhausted() {
        let log = "A\nA\n!\n!\nA\tB\n\nB\n";
        let source = ReplaySource::from_reader(log.as_bytes()).unwrap();
        let (worker, rows) = spawn_worker();
        let (status, status_rx) = watch::channel(ScannerStatus::Idle);

        let report = scan_loop(
            source,
            ReplayDecoder,
            Arc::new(clock()),
            worker.queue(),
            CaptureSettings {
                interval: Duration::from_millis(1),
                capture_timeout: Duration::from_secs(1),
                cooldown: Duration::from_millis(1000),
            },
            status,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(report.frames, 5);
        assert_eq!(report.unavailable, 2);
        assert_eq!(report.detections, 5);
        // Clock never moves: A, then the A→B switch; repeats are debounced.
        assert_eq!(report.accepted, 2);
        assert_eq!(*status_rx.borrow(), ScannerStatus::Stopped);

        tokio::task::spawn_blocking(move || {
            worker.shutdown(ShutdownMode::Drain, Duration::from_secs(5))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(*rows.lock().unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn cancellation_stops_an_endless_source() {
        struct Blank;
        impl FrameSource for Blank {
            type Frame = ();
            fn next_frame(&mut self) -> Option<()> {
                Some(())
            }
        }
        let (worker, _rows) = spawn_worker();
        let (status, _status_rx) = watch::channel(ScannerStatus::Idle);
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(scan_loop(
            Blank,
            NoSymbols,
            Arc::new(clock()),
            worker.queue(),
            CaptureSettings {
                interval: Duration::from_millis(5),
                capture_timeout: Duration::from_secs(1),
                cooldown: Duration::from_millis(1000),
            },
            status,
            cancel_token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_token.cancel();
        let report = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(report.frames > 0);
        assert_eq!(report.accepted, 0);

        tokio::task::spawn_blocking(move || {
            worker.shutdown(ShutdownMode::Drain, Duration::from_secs(5))
        })
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn stalled_source_holds_a_single_capture() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = std_mpsc::channel();
        let source = StalledSource {
            calls: Arc::clone(&calls),
            release: release_rx,
        };
        let (worker, _rows) = spawn_worker();
        let (status, _status_rx) = watch::channel(ScannerStatus::Idle);
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(scan_loop(
            source,
            NoSymbols,
            Arc::new(clock()),
            worker.queue(),
            CaptureSettings {
                interval: Duration::from_millis(1),
                capture_timeout: Duration::from_millis(20),
                cooldown: Duration::from_millis(1000),
            },
            status,
            cancel_token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel_token.cancel();
        let report = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(report.timeouts >= 1);
        assert!(report.skipped > 0);
        assert_eq!(report.frames, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Unblock the stuck capture; nothing queued behind it may run.
        release_tx.send(()).unwrap();
        drop(release_tx);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::task::spawn_blocking(move || {
            worker.shutdown(ShutdownMode::Drain, Duration::from_secs(5))
        })
        .await
        .unwrap()
        .unwrap();
    }
}
