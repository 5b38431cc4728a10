use std::fmt::Display;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};

/// Severity levels of the user-facing activity log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => f.pad("info"),
            LogLevel::Warning => f.pad("warning"),
            LogLevel::Error => f.pad("error"),
            LogLevel::Success => f.pad("success"),
        }
    }
}

/// Sink for user-facing log entries. The graph engine and the conversation
/// session report rejections and failures here instead of panicking or
/// bubbling them into the UI layer.
pub trait CanvasLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Forwards entries to the `tracing` subscriber.
#[derive(Default)]
pub struct TracingLogger;

impl CanvasLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
            LogLevel::Success => tracing::info!("[success] {message}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub level: LogLevel,
}

/// Keeps entries in memory for a log panel to render. Entry ids keep
/// climbing across `clear()` so a renderer can key on them.
#[derive(Default)]
pub struct BufferedLogger {
    entries: Mutex<Vec<LogEntry>>,
    next_id: AtomicU64,
}

impl BufferedLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl CanvasLogger for BufferedLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = LogEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Local::now(),
            message: message.to_owned(),
            level,
        };
        entries.push(entry);
    }
}
