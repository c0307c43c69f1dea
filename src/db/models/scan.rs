//! Scan history records.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// An accepted detection that has not been committed yet. Has no id; the
/// store assigns one when the worker commits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingScan {
    content: String,
    detected_at: NaiveDateTime,
}

impl PendingScan {
    /// Builds a pending scan, truncating the timestamp to whole seconds so the
    /// stored `scanned_at`, `scan_date` and `scan_time` always agree.
    pub fn new(content: impl Into<String>, detected_at: NaiveDateTime) -> ScanResult<Self> {
        let content = content.into();
        if content.is_empty() {
            return Err(ScanError::EmptyContent);
        }
        let detected_at = detected_at.with_nanosecond(0).unwrap_or(detected_at);
        Ok(Self {
            content,
            detected_at,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn detected_at(&self) -> NaiveDateTime {
        self.detected_at
    }

    pub fn scan_date(&self) -> NaiveDate {
        self.detected_at.date()
    }

    pub fn scan_time(&self) -> NaiveTime {
        self.detected_at.time()
    }
}

/// A committed row of the `scans` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    pub id: i64,
    pub content: String,
    pub detected_at: NaiveDateTime,
    pub scan_date: NaiveDate,
    pub scan_time: NaiveTime,
    pub note: Option<String>,
}

/// Result of a note edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteUpdate {
    Updated,
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_is_rejected() {
        let now = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        assert!(matches!(
            PendingScan::new("", now),
            Err(ScanError::EmptyContent)
        ));
    }

    #[test]
    fn date_and_time_follow_detection_timestamp() {
        let detected = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_milli_opt(23, 59, 59, 870)
            .unwrap();
        let scan = PendingScan::new("8934563138165", detected).unwrap();
        assert_eq!(scan.scan_date(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(scan.scan_time(), NaiveTime::from_hms_opt(23, 59, 59).unwrap());
        assert_eq!(scan.detected_at().nanosecond(), 0);
    }
}
