//! Rows handed to spreadsheet exporters.

use chrono::NaiveDate;
use serde::Serialize;

use crate::db::{
    helpers::{format_date, format_time},
    HistoryReader, ScanEvent,
};
use crate::error::{ensure_date_range, ScanResult};

const DISPLAY_DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    /// 1-based position within the export.
    pub sequence_number: usize,
    pub content: String,
    /// `DD/MM/YYYY`
    pub date: String,
    /// `HH:MM:SS`
    pub time: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Rows(Vec<ExportRow>),
    /// Valid range, nothing scanned in it.
    NoData,
}

pub fn build_rows(scans: &[ScanEvent]) -> Vec<ExportRow> {
    scans
        .iter()
        .enumerate()
        .map(|(index, scan)| ExportRow {
            sequence_number: index + 1,
            content: scan.content.clone(),
            date: scan.scan_date.format(DISPLAY_DATE_FORMAT).to_string(),
            time: format_time(&scan.scan_time),
            note: scan.note.clone(),
        })
        .collect()
}

/// Loads the rows for `[start, end]`. A reversed range fails before the
/// store is queried.
pub async fn export_range(
    reader: &HistoryReader,
    start: NaiveDate,
    end: NaiveDate,
) -> ScanResult<ExportOutcome> {
    ensure_date_range(start, end)?;

    let scans = reader.list_by_date_range(start, end).await?;
    if scans.is_empty() {
        return Ok(ExportOutcome::NoData);
    }
    Ok(ExportOutcome::Rows(build_rows(&scans)))
}

/// File name stem exporters use for a range, e.g.
/// `barcode_scans_2024-01-01_to_2024-01-31`.
pub fn default_file_stem(start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "barcode_scans_{}_to_{}",
        format_date(&start),
        format_date(&end)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn event(id: i64, content: &str, date: (i32, u32, u32), time: (u32, u32, u32)) -> ScanEvent {
        let scan_date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        let scan_time = NaiveTime::from_hms_opt(time.0, time.1, time.2).unwrap();
        ScanEvent {
            id,
            content: content.to_string(),
            detected_at: scan_date.and_time(scan_time),
            scan_date,
            scan_time,
            note: None,
        }
    }

    #[test]
    fn rows_are_numbered_and_dates_reformatted() {
        let mut second = event(9, "B", (2024, 1, 2), (8, 0, 5));
        second.note = Some("reprint".into());
        let rows = build_rows(&[event(4, "A", (2024, 12, 31), (23, 59, 1)), second]);

        assert_eq!(
            rows,
            vec![
                ExportRow {
                    sequence_number: 1,
                    content: "A".into(),
                    date: "31/12/2024".into(),
                    time: "23:59:01".into(),
                    note: None,
                },
                ExportRow {
                    sequence_number: 2,
                    content: "B".into(),
                    date: "02/01/2024".into(),
                    time: "08:00:05".into(),
                    note: Some("reprint".into()),
                },
            ]
        );
    }

    #[test]
    fn file_stem_uses_iso_dates() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(
            default_file_stem(start, end),
            "barcode_scans_2024-01-01_to_2024-01-31"
        );
    }
}
