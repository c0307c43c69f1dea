//! Classified failures surfaced by the scan pipeline and the history store.

use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    /// The frame source could not deliver a frame. Recoverable: the capture
    /// loop reports it and keeps polling.
    #[error("frame source unavailable")]
    CaptureFailure,

    #[error("invalid date range: {start} is after {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("scan {0} not found")]
    NotFound(i64),

    #[error("scan content must not be empty")]
    EmptyContent,

    /// The persistence worker is gone; nothing more can be queued.
    #[error("persistence queue is closed")]
    QueueClosed,

    /// The worker did not exit within the allowed time. Fatal.
    #[error("persistence worker did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ScanError {
    /// True for the one failure class that must take the process down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::ShutdownTimeout(_))
    }
}

impl From<rusqlite::Error> for ScanError {
    fn from(err: rusqlite::Error) -> Self {
        ScanError::Storage(err.into())
    }
}

/// Checks an inclusive date range before any query touches the store.
pub fn ensure_date_range(start: NaiveDate, end: NaiveDate) -> ScanResult<()> {
    if start > end {
        return Err(ScanError::InvalidDateRange { start, end });
    }
    Ok(())
}
