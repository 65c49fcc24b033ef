use crate::classify::LineLevel;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

pub const LOG_WINDOW_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Downloading,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Submitted,
    Starting,
    Downloading,
    Transcoding,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobPhase::Completed => JobStatus::Completed,
            JobPhase::Failed => JobStatus::Error,
            JobPhase::Submitted
            | JobPhase::Starting
            | JobPhase::Downloading
            | JobPhase::Transcoding => JobStatus::Downloading,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub url: String,
    pub output_directory: String,
    pub phase: JobPhase,
    pub debug: bool,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub file_path: Option<String>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(id: String, url: String, output_directory: String, debug: bool) -> Self {
        Self {
            id,
            url,
            output_directory,
            phase: JobPhase::Submitted,
            debug,
            started_at: now_ms(),
            completed_at: None,
            file_path: None,
            error: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.phase.status()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub job_id: String,
    pub timestamp: i64,
    pub level: Option<LineLevel>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { path: String },
    Failed { error: String },
}

struct JobEntry {
    record: JobRecord,
    logs: VecDeque<LogLine>,
}

/// Owns every job's in-memory state for the life of the process. Jobs are
/// never removed.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobEntry>>,
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: JobRecord) -> Result<()> {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&record.id) {
            return Err(EngineError::InvalidRequest(format!(
                "duplicate job id {}",
                record.id
            )));
        }
        jobs.insert(
            record.id.clone(),
            JobEntry {
                record,
                logs: VecDeque::new(),
            },
        );
        Ok(())
    }

    /// Terminal phases are set through [`JobRegistry::finish`] only.
    pub fn set_phase(&self, id: &str, phase: JobPhase) {
        if phase.is_terminal() {
            return;
        }
        if let Some(entry) = lock(&self.jobs).get_mut(id) {
            if !entry.record.phase.is_terminal() {
                entry.record.phase = phase;
            }
        }
    }

    pub fn push_log(&self, line: LogLine) {
        if let Some(entry) = lock(&self.jobs).get_mut(&line.job_id) {
            if entry.logs.len() == LOG_WINDOW_LINES {
                entry.logs.pop_front();
            }
            entry.logs.push_back(line);
        }
    }

    /// Returns the completion timestamp, or `None` if the job is unknown or
    /// already finished.
    pub fn finish(&self, id: &str, outcome: &JobOutcome) -> Option<i64> {
        let mut jobs = lock(&self.jobs);
        let entry = jobs.get_mut(id)?;
        if entry.record.phase.is_terminal() {
            return None;
        }
        let completed_at = now_ms();
        let record = &mut entry.record;
        record.completed_at = Some(completed_at);
        match outcome {
            JobOutcome::Completed { path } => {
                record.phase = JobPhase::Completed;
                record.file_path = Some(path.clone());
            }
            JobOutcome::Failed { error } => {
                record.phase = JobPhase::Failed;
                record.error = Some(error.clone());
            }
        }
        Some(completed_at)
    }

    pub fn snapshot(&self, id: &str) -> Option<JobRecord> {
        lock(&self.jobs).get(id).map(|e| e.record.clone())
    }

    pub fn recent_logs(&self, id: &str) -> Vec<LogLine> {
        lock(&self.jobs)
            .get(id)
            .map(|e| e.logs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.jobs)
            .values()
            .filter(|e| !e.record.phase.is_terminal())
            .map(|e| e.record.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Handles of threads that already finished are reaped here.
    pub fn attach_handle(&self, id: &str, handle: JoinHandle<()>) {
        let finished = {
            let mut handles = lock(&self.handles);
            let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut *handles)
                .into_iter()
                .partition(|(_, h)| h.is_finished());
            *handles = running;
            handles.push((id.to_string(), handle));
            finished
        };
        for (id, handle) in finished {
            join_job_thread(&id, handle);
        }
    }

    pub fn join_all(&self) -> usize {
        let handles = std::mem::take(&mut *lock(&self.handles));
        let count = handles.len();
        for (id, handle) in handles {
            join_job_thread(&id, handle);
        }
        count
    }
}

fn join_job_thread(id: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::warn!(job_id = %id, "job thread panicked");
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
