use std::path::Path;

use chrono::NaiveDate;

use crate::{
    app::ScanApp,
    db::ScanEvent,
    error::ScanResult,
    export::ExportOutcome,
    persistence::WorkerReport,
    scanner::{ReplayDecoder, ReplaySource, ScanLoopReport},
};

#[derive(Debug)]
pub struct ReplaySummary {
    pub scan: ScanLoopReport,
    pub worker: WorkerReport,
    pub committed: Vec<ScanEvent>,
}

/// Runs a recorded detection log through the whole pipeline, then shuts the
/// worker down so everything accepted is committed before reporting.
pub async fn replay(app: &mut ScanApp, log_path: &Path) -> ScanResult<ReplaySummary> {
    let reader = app.reader();
    let before = reader.latest_id().await?;

    let source = ReplaySource::open(log_path)?;
    app.start_scanning(source, ReplayDecoder)?;
    let scan = app.finish_scanning().await?;
    let worker = app.shutdown().await?;

    let committed = reader.list_after(before).await?;
    Ok(ReplaySummary {
        scan,
        worker,
        committed,
    })
}

pub async fn history(app: &ScanApp, limit: Option<usize>) -> ScanResult<Vec<ScanEvent>> {
    let limit = limit.unwrap_or(app.settings().history_limit);
    app.reader().list_recent(limit).await
}

pub async fn export(app: &ScanApp, from: NaiveDate, to: NaiveDate) -> ScanResult<ExportOutcome> {
    app.export(from, to).await
}

pub async fn set_note(app: &ScanApp, id: i64, text: &str) -> ScanResult<()> {
    app.set_note(id, text).await
}
