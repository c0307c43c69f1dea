use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::{Connection, OpenFlags};

pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

use migrations::run_migrations;
pub use models::{NoteUpdate, PendingScan, ScanEvent};

const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

/// Write side of the history store. Exactly one value exists per open store
/// and it is handed to the persistence worker.
pub trait ScanWriter: Send + 'static {
    fn append(&mut self, scan: &PendingScan) -> Result<i64>;
    fn set_note(&mut self, id: i64, note: Option<&str>) -> Result<NoteUpdate>;
}

/// An opened, migrated scan history database.
pub struct HistoryStore {
    db_path: Arc<PathBuf>,
    writer: SqliteWriter,
}

impl HistoryStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let mut conn = Connection::open(&db_path).context("failed to open SQLite database")?;

        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            error!("Failed to enable WAL mode: {err}");
        }
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("failed to set busy timeout")?;

        run_migrations(&mut conn).context("failed to run database migrations")?;

        info!("Scan history opened at {}", db_path.display());

        Ok(Self {
            db_path: Arc::new(db_path),
            writer: SqliteWriter { conn },
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Opens an additional read-only connection. Any number may coexist with
    /// the single writer.
    pub fn reader(&self) -> Result<HistoryReader> {
        HistoryReader::open(self.path())
    }

    pub fn into_writer(self) -> SqliteWriter {
        self.writer
    }
}

pub struct SqliteWriter {
    conn: Connection,
}

impl ScanWriter for SqliteWriter {
    fn append(&mut self, scan: &PendingScan) -> Result<i64> {
        repositories::scans::insert_scan(&self.conn, scan)
    }

    fn set_note(&mut self, id: i64, note: Option<&str>) -> Result<NoteUpdate> {
        repositories::scans::update_note(&self.conn, id, note)
    }
}

/// Read-only handle to the history. Cheap to clone; clones share one
/// connection. Queries run on the blocking pool.
#[derive(Clone)]
pub struct HistoryReader {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl HistoryReader {
    fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open read-only connection to {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("failed to set busy timeout")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    pub(crate) async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| anyhow!("history reader connection poisoned"))?;
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow!("history reader is closed"))?;
            task(conn)
        })
        .await
        .context("history reader task failed to join")?
    }

    /// Drops the underlying connection. Later queries on any clone fail.
    pub fn close(&self) {
        let mut guard = match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.take().is_some() {
            info!("History reader connection released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn detected(day: u32, hour: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn reader_sees_committed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("nested").join("scans.sqlite3")).unwrap();
        let reader = store.reader().unwrap();
        let mut writer = store.into_writer();

        let id = writer
            .append(&PendingScan::new("QR-1", detected(1, 9)).unwrap())
            .unwrap();

        let scan = reader.get(id).await.unwrap().unwrap();
        assert_eq!(scan.content, "QR-1");
        assert_eq!(reader.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn closed_reader_refuses_queries() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("scans.sqlite3")).unwrap();
        let reader = store.reader().unwrap();
        let clone = reader.clone();

        reader.close();
        assert!(clone.list_recent(10).await.is_err());
    }

    #[tokio::test]
    async fn reader_cannot_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("scans.sqlite3")).unwrap();
        let reader = store.reader().unwrap();

        let result = reader
            .execute(|conn| {
                conn.execute(
                    "INSERT INTO scans (content, scanned_at) VALUES ('x', '2024-01-01 00:00:00')",
                    [],
                )?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }
}
