use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use log::info;
use rusqlite::{Connection, Transaction};

const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Columns added after the first release of the scan table. Stores created
/// before them are upgraded in place.
const LATE_COLUMNS: [(&str, &str); 3] = [
    ("scan_date", "TEXT"),
    ("scan_time", "TEXT"),
    ("note", "TEXT"),
];

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => {
            tx.execute_batch(include_str!("schemas/schema_v1.sql"))
                .context("failed to execute schema_v1.sql")?;
            Ok(())
        }
        2 => {
            add_missing_columns(tx)?;
            tx.execute_batch(include_str!("schemas/schema_v2.sql"))
                .context("failed to execute schema_v2.sql")?;
            Ok(())
        }
        _ => bail!("unknown migration target version: {version}"),
    }
}

fn add_missing_columns(tx: &Transaction<'_>) -> Result<()> {
    let existing = table_columns(tx, "scans")?;

    for (name, sql_type) in LATE_COLUMNS {
        if existing.contains(name) {
            continue;
        }
        info!("Adding missing column scans.{name}");
        tx.execute_batch(&format!("ALTER TABLE scans ADD COLUMN {name} {sql_type}"))
            .with_context(|| format!("failed to add column scans.{name}"))?;
    }

    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table {table}"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE scans (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 content TEXT NOT NULL,
                 scanned_at TEXT NOT NULL
             );
             INSERT INTO scans (content, scanned_at) VALUES ('4006381333931', '2023-12-31 23:59:58');
             INSERT INTO scans (content, scanned_at) VALUES ('https://example.org/q', '2024-01-01 08:15:00');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn fresh_store_gets_full_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let columns = table_columns(&conn, "scans").unwrap();
        for column in ["id", "content", "scanned_at", "scan_date", "scan_time", "note"] {
            assert!(columns.contains(column), "missing {column}");
        }
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn legacy_store_is_upgraded_and_backfilled() {
        let mut conn = legacy_store();
        run_migrations(&mut conn).unwrap();

        let rows: Vec<(i64, String, String, String, String, Option<String>)> = conn
            .prepare("SELECT id, content, scanned_at, scan_date, scan_time, note FROM scans ORDER BY id")
            .unwrap()
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
            })
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();

        assert_eq!(
            rows,
            vec![
                (
                    1,
                    "4006381333931".to_string(),
                    "2023-12-31 23:59:58".to_string(),
                    "2023-12-31".to_string(),
                    "23:59:58".to_string(),
                    None
                ),
                (
                    2,
                    "https://example.org/q".to_string(),
                    "2024-01-01 08:15:00".to_string(),
                    "2024-01-01".to_string(),
                    "08:15:00".to_string(),
                    None
                ),
            ]
        );

        let indexes: HashSet<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'scans'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(indexes.contains("idx_scans_scan_date"));
        assert!(indexes.contains("idx_scans_scanned_at"));
    }

    #[test]
    fn partially_upgraded_store_keeps_existing_split() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE scans (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 content TEXT NOT NULL,
                 scanned_at TEXT NOT NULL,
                 scan_date TEXT,
                 scan_time TEXT
             );
             INSERT INTO scans (content, scanned_at, scan_date, scan_time)
                 VALUES ('A-1', '2024-05-01 10:00:00', '2024-05-01', '10:00:00');
             INSERT INTO scans (content, scanned_at, scan_date, scan_time)
                 VALUES ('A-2', '2024-05-02 11:30:00', '', NULL);",
        )
        .unwrap();

        run_migrations(&mut conn).unwrap();

        let split: Vec<(String, String)> = conn
            .prepare("SELECT scan_date, scan_time FROM scans ORDER BY id")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(
            split,
            vec![
                ("2024-05-01".to_string(), "10:00:00".to_string()),
                ("2024-05-02".to_string(), "11:30:00".to_string()),
            ]
        );
        assert!(table_columns(&conn, "scans").unwrap().contains("note"));
    }

    #[test]
    fn newer_store_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION + 1)
            .unwrap();
        assert!(run_migrations(&mut conn).is_err());
    }
}
