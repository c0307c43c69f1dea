use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::warn;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    helpers::{
        format_date, format_scanned_at, format_time, parse_date, parse_scanned_at, parse_time,
        to_i64,
    },
    models::{NoteUpdate, PendingScan, ScanEvent},
    HistoryReader,
};
use crate::error::{ensure_date_range, ScanResult};

const SCAN_COLUMNS: &str = "id, content, scanned_at, scan_date, scan_time, note";

/// Maps one row. Rows whose split columns are unreadable fall back to
/// `scanned_at` (and the reverse); a row with no usable timestamp at all is
/// skipped so one damaged row cannot fail a whole listing.
fn row_to_scan(row: &Row) -> Result<Option<ScanEvent>> {
    let id: i64 = row.get("id")?;
    let scanned_at: String = row.get("scanned_at")?;
    let scan_date: Option<String> = row.get("scan_date")?;
    let scan_time: Option<String> = row.get("scan_time")?;

    let Some((detected_at, scan_date, scan_time)) = resolve_timestamps(
        id,
        &scanned_at,
        scan_date.as_deref(),
        scan_time.as_deref(),
    ) else {
        return Ok(None);
    };

    Ok(Some(ScanEvent {
        id,
        content: row.get("content")?,
        detected_at,
        scan_date,
        scan_time,
        note: row.get("note")?,
    }))
}

fn resolve_timestamps(
    id: i64,
    scanned_at: &str,
    scan_date: Option<&str>,
    scan_time: Option<&str>,
) -> Option<(NaiveDateTime, NaiveDate, NaiveTime)> {
    let split = match (scan_date, scan_time) {
        (Some(date), Some(time)) => parse_date(date, "scan_date")
            .and_then(|date| Ok((date, parse_time(time, "scan_time")?)))
            .ok(),
        _ => None,
    };

    match (parse_scanned_at(scanned_at, "scanned_at"), split) {
        (Ok(at), Some((date, time))) => Some((at, date, time)),
        (Ok(at), None) => {
            warn!("scan {id}: unreadable scan_date/scan_time, using scanned_at");
            Some((at, at.date(), at.time()))
        }
        (Err(err), Some((date, time))) => {
            warn!("scan {id}: {err:#}; using scan_date/scan_time");
            Some((date.and_time(time), date, time))
        }
        (Err(err), None) => {
            warn!("skipping scan {id}: {err:#}");
            None
        }
    }
}

/// Appends one scan and returns the id SQLite assigned to it.
pub(crate) fn insert_scan(conn: &Connection, scan: &PendingScan) -> Result<i64> {
    conn.execute(
        "INSERT INTO scans (content, scanned_at, scan_date, scan_time)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            scan.content(),
            format_scanned_at(&scan.detected_at()),
            format_date(&scan.scan_date()),
            format_time(&scan.scan_time()),
        ],
    )
    .context("failed to insert scan")?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn update_note(conn: &Connection, id: i64, note: Option<&str>) -> Result<NoteUpdate> {
    let rows_affected = conn
        .execute("UPDATE scans SET note = ?1 WHERE id = ?2", params![note, id])
        .with_context(|| format!("failed to update note for scan {id}"))?;

    if rows_affected == 0 {
        Ok(NoteUpdate::NotFound)
    } else {
        Ok(NoteUpdate::Updated)
    }
}

pub(crate) fn select_by_date_range(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<ScanEvent>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SCAN_COLUMNS}
         FROM scans
         WHERE scan_date >= ?1 AND scan_date <= ?2
         ORDER BY scan_date ASC, scan_time ASC, id ASC"
    ))?;

    let mut rows = stmt.query(params![format_date(&start), format_date(&end)])?;
    let mut scans = Vec::new();
    while let Some(row) = rows.next()? {
        if let Some(scan) = row_to_scan(row)? {
            scans.push(scan);
        }
    }
    Ok(scans)
}

pub(crate) fn select_recent(conn: &Connection, limit: usize) -> Result<Vec<ScanEvent>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SCAN_COLUMNS}
         FROM scans
         ORDER BY id DESC
         LIMIT ?1"
    ))?;

    let mut rows = stmt.query(params![to_i64(limit)?])?;
    let mut scans = Vec::new();
    while let Some(row) = rows.next()? {
        if let Some(scan) = row_to_scan(row)? {
            scans.push(scan);
        }
    }
    Ok(scans)
}

pub(crate) fn select_after_id(conn: &Connection, after_id: i64) -> Result<Vec<ScanEvent>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SCAN_COLUMNS}
         FROM scans
         WHERE id > ?1
         ORDER BY id ASC"
    ))?;

    let mut rows = stmt.query(params![after_id])?;
    let mut scans = Vec::new();
    while let Some(row) = rows.next()? {
        if let Some(scan) = row_to_scan(row)? {
            scans.push(scan);
        }
    }
    Ok(scans)
}

pub(crate) fn select_by_id(conn: &Connection, id: i64) -> Result<Option<ScanEvent>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = ?1"))?;
    let scan = stmt
        .query_row(params![id], |row| Ok(row_to_scan(row)))
        .optional()?
        .transpose()?
        .flatten();
    Ok(scan)
}

impl HistoryReader {
    /// Scans whose `scan_date` falls within `[start, end]`, oldest first.
    /// A reversed range is rejected before the store is touched.
    pub async fn list_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ScanResult<Vec<ScanEvent>> {
        ensure_date_range(start, end)?;
        let scans = self
            .execute(move |conn| select_by_date_range(conn, start, end))
            .await?;
        Ok(scans)
    }

    /// Most recent scans, newest first.
    pub async fn list_recent(&self, limit: usize) -> ScanResult<Vec<ScanEvent>> {
        let scans = self.execute(move |conn| select_recent(conn, limit)).await?;
        Ok(scans)
    }

    /// Scans committed after `after_id`, in commit order.
    pub async fn list_after(&self, after_id: i64) -> ScanResult<Vec<ScanEvent>> {
        let scans = self
            .execute(move |conn| select_after_id(conn, after_id))
            .await?;
        Ok(scans)
    }

    /// Highest committed id, 0 for an empty store.
    pub async fn latest_id(&self) -> ScanResult<i64> {
        let id = self
            .execute(|conn| {
                let id: i64 =
                    conn.query_row("SELECT COALESCE(MAX(id), 0) FROM scans", [], |row| row.get(0))?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    pub async fn get(&self, id: i64) -> ScanResult<Option<ScanEvent>> {
        let scan = self.execute(move |conn| select_by_id(conn, id)).await?;
        Ok(scan)
    }

    pub async fn count(&self) -> ScanResult<u64> {
        let count = self
            .execute(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM scans", [], |row| row.get(0))?;
                u64::try_from(count).context("scan count is negative")
            })
            .await?;
        Ok(count)
    }
}
