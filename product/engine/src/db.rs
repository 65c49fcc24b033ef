use crate::paths::AppPaths;
use crate::Result;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

pub fn open(paths: &AppPaths) -> Result<Connection> {
    paths.ensure_dirs()?;
    open_at(&paths.history_db_path())
}

pub fn open_at(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
    )?;

    conn.busy_timeout(Duration::from_secs(10))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS downloads (
  id TEXT PRIMARY KEY,
  url TEXT NOT NULL,
  output_dir TEXT NOT NULL,
  status TEXT NOT NULL,
  started_at INTEGER NOT NULL,
  completed_at INTEGER,
  file_path TEXT,
  error TEXT
);

CREATE TABLE IF NOT EXISTS logs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  download_id TEXT NOT NULL,
  ts INTEGER NOT NULL,
  level TEXT,
  line TEXT NOT NULL,
  FOREIGN KEY (download_id) REFERENCES downloads(id)
);

CREATE INDEX IF NOT EXISTS idx_logs_download_id ON logs(download_id);
CREATE INDEX IF NOT EXISTS idx_downloads_started ON downloads(started_at);
"#,
    )?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key='schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(v) if v == CURRENT_SCHEMA_VERSION.to_string() => {}
        _ => {
            conn.execute(
                "INSERT INTO meta(key, value) VALUES('schema_version', ?)
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                [CURRENT_SCHEMA_VERSION.to_string()],
            )?;
        }
    }

    Ok(())
}

pub(crate) trait OptionalRowExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalRowExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("table_info");
        let mut rows = stmt.query([]).expect("query table_info");
        let mut names = Vec::new();
        while let Some(row) = rows.next().expect("next row") {
            let name: String = row.get(1).expect("name");
            names.push(name);
        }
        names
    }

    #[test]
    fn migrate_creates_history_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let conn = open(&paths).expect("open");
        migrate(&conn).expect("migrate");

        assert_eq!(
            table_columns(&conn, "downloads"),
            vec![
                "id",
                "url",
                "output_dir",
                "status",
                "started_at",
                "completed_at",
                "file_path",
                "error"
            ]
        );
        assert_eq!(
            table_columns(&conn, "logs"),
            vec!["id", "download_id", "ts", "level", "line"]
        );

        let index_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_logs_download_id'",
                [],
                |row| row.get(0),
            )
            .expect("index lookup");
        assert_eq!(index_count, 1);
    }

    #[test]
    fn migrate_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let conn = open(&paths).expect("open");
        migrate(&conn).expect("first");
        migrate(&conn).expect("second");

        let version: String = conn
            .query_row(
                "SELECT value FROM meta WHERE key='schema_version'",
                [],
                |row| row.get(0),
            )
            .expect("version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION.to_string());
    }
}
