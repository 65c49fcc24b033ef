use crate::classify::LineLevel;
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub job_id: String,
    pub line: String,
    pub level: LineLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionEvent {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionEvent {
    pub fn succeeded(id: &str, path: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            success: true,
            path: Some(path.into()),
            error: None,
        }
    }

    pub fn failed(id: &str, error: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            success: false,
            path: None,
            error: Some(error.into()),
        }
    }
}

/// Every subscriber gets its own unbounded channel. Subscribers that dropped
/// their receiver are pruned on the next publish.
#[derive(Default)]
pub struct EventBus {
    logs: Mutex<Vec<Sender<LogEvent>>>,
    completions: Mutex<Vec<Sender<CompletionEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_logs(&self) -> Receiver<LogEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        lock(&self.logs).push(tx);
        rx
    }

    pub fn subscribe_completions(&self) -> Receiver<CompletionEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        lock(&self.completions).push(tx);
        rx
    }

    pub fn publish_log(&self, event: LogEvent) {
        broadcast(&self.logs, event);
    }

    pub fn publish_completion(&self, event: CompletionEvent) {
        broadcast(&self.completions, event);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn broadcast<T: Clone>(senders: &Mutex<Vec<Sender<T>>>, event: T) {
    let mut senders = lock(senders);
    senders.retain(|tx| tx.send(event.clone()).is_ok());
}
