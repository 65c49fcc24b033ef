use crate::classify::LineLevel;
use crate::db::{self, OptionalRowExt};
use crate::jobs::JobStatus;
use crate::paths::AppPaths;
use crate::{EngineError, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedDownload<'a> {
    pub id: &'a str,
    pub url: &'a str,
    pub output_dir: &'a str,
    pub started_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedDownload<'a> {
    pub id: &'a str,
    pub status: JobStatus,
    pub completed_at_ms: i64,
    pub file_path: Option<&'a str>,
    pub error: Option<&'a str>,
}

pub trait HistoryStore: Send + Sync {
    fn record_started(&self, row: &StartedDownload<'_>) -> Result<()>;

    fn record_finished(&self, row: &FinishedDownload<'_>) -> Result<()>;

    fn append_log(
        &self,
        job_id: &str,
        ts_ms: i64,
        level: Option<LineLevel>,
        line: &str,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHistory;

impl HistoryStore for NoopHistory {
    fn record_started(&self, _row: &StartedDownload<'_>) -> Result<()> {
        Ok(())
    }

    fn record_finished(&self, _row: &FinishedDownload<'_>) -> Result<()> {
        Ok(())
    }

    fn append_log(
        &self,
        _job_id: &str,
        _ts_ms: i64,
        _level: Option<LineLevel>,
        _line: &str,
    ) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DownloadRow {
    pub id: String,
    pub url: String,
    pub output_dir: String,
    pub status: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub file_path: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogRow {
    pub id: i64,
    pub download_id: String,
    pub ts: i64,
    pub level: Option<String>,
    pub line: String,
}

pub struct SqliteHistory {
    conn: Mutex<Connection>,
}

impl SqliteHistory {
    pub fn open(paths: &AppPaths) -> Result<Self> {
        Self::from_connection(db::open(paths))
    }

    pub fn open_at(db_path: &Path) -> Result<Self> {
        Self::from_connection(db::open_at(db_path))
    }

    fn from_connection(conn: Result<Connection>) -> Result<Self> {
        let conn = conn
            .and_then(|conn| db::migrate(&conn).map(|_| conn))
            .map_err(|e| EngineError::HistoryUnavailable(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn recent_downloads(&self, limit: usize) -> Result<Vec<DownloadRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
SELECT id, url, output_dir, status, started_at, completed_at, file_path, error
FROM downloads
ORDER BY started_at DESC, id ASC
LIMIT ?1
"#,
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(DownloadRow {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    output_dir: row.get(2)?,
                    status: row.get(3)?,
                    started_at: row.get(4)?,
                    completed_at: row.get(5)?,
                    file_path: row.get(6)?,
                    error: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn download(&self, id: &str) -> Result<Option<DownloadRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                r#"
SELECT id, url, output_dir, status, started_at, completed_at, file_path, error
FROM downloads WHERE id=?1
"#,
                params![id],
                |row| {
                    Ok(DownloadRow {
                        id: row.get(0)?,
                        url: row.get(1)?,
                        output_dir: row.get(2)?,
                        status: row.get(3)?,
                        started_at: row.get(4)?,
                        completed_at: row.get(5)?,
                        file_path: row.get(6)?,
                        error: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn logs_for(&self, download_id: &str) -> Result<Vec<LogRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, download_id, ts, level, line FROM logs WHERE download_id=?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![download_id], |row| {
                Ok(LogRow {
                    id: row.get(0)?,
                    download_id: row.get(1)?,
                    ts: row.get(2)?,
                    level: row.get(3)?,
                    line: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl HistoryStore for SqliteHistory {
    fn record_started(&self, row: &StartedDownload<'_>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO downloads (id, url, output_dir, status, started_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.id,
                row.url,
                row.output_dir,
                JobStatus::Downloading.as_str(),
                row.started_at_ms
            ],
        )?;
        Ok(())
    }

    fn record_finished(&self, row: &FinishedDownload<'_>) -> Result<()> {
        self.conn().execute(
            r#"
UPDATE downloads
SET status=?1, completed_at=?2, file_path=COALESCE(?3, file_path), error=COALESCE(?4, error)
WHERE id=?5
"#,
            params![
                row.status.as_str(),
                row.completed_at_ms,
                row.file_path,
                row.error,
                row.id
            ],
        )?;
        Ok(())
    }

    fn append_log(
        &self,
        job_id: &str,
        ts_ms: i64,
        level: Option<LineLevel>,
        line: &str,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO logs (download_id, ts, level, line) VALUES (?1, ?2, ?3, ?4)",
            params![job_id, ts_ms, level.map(|l| l.as_str()), line],
        )?;
        Ok(())
    }
}

/// Opens the SQLite store, or falls back to a no-op store when that fails.
pub fn open_or_disabled(paths: &AppPaths) -> Arc<dyn HistoryStore> {
    match SqliteHistory::open(paths) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::warn!(error = %err, "history logging disabled");
            Arc::new(NoopHistory)
        }
    }
}
