use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const LOG_CAPACITY: usize = 1000;

/// Log level enum for type-safe logging
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

/// One controller log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Component that produced the entry ("session", "arbiter", "monitor", ...)
    pub component: String,
}

/// Fixed-size ring of the most recent entries
struct CircularBuffer {
    buffer: Vec<LogEntry>,
    head: usize,
    capacity: usize,
}

impl CircularBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    fn push(&mut self, item: LogEntry) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(item);
        } else {
            self.buffer[self.head] = item;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    fn to_vec(&self) -> Vec<LogEntry> {
        let mut result = Vec::with_capacity(self.buffer.len());
        result.extend_from_slice(&self.buffer[self.head..]);
        result.extend_from_slice(&self.buffer[..self.head]);
        result
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.head = 0;
    }
}

/// Commands for the logger thread
enum LogCommand {
    Log(LogEntry),
    GetLogs(Sender<Vec<LogEntry>>),
    Clear,
}

/// In-process log sink
///
/// Producers never block: entries go through a bounded channel to a background
/// thread and are dropped when the channel is full.
pub struct Logger {
    sender: Sender<LogCommand>,
    min_level: Arc<AtomicU8>,
}

impl Logger {
    pub fn new() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        let min_level = Arc::new(AtomicU8::new(LogLevel::Debug as u8));

        std::thread::Builder::new()
            .name("camctl-log".to_string())
            .spawn(move || Self::logger_thread(receiver, capacity))
            .map(|_| ())
            .unwrap_or_else(|e| log::error!("Failed to spawn logger thread: {}", e));

        Self { sender, min_level }
    }

    fn logger_thread(receiver: Receiver<LogCommand>, capacity: usize) {
        let mut buffer = CircularBuffer::new(capacity.max(1));

        for cmd in receiver {
            match cmd {
                LogCommand::Log(entry) => buffer.push(entry),
                LogCommand::GetLogs(response_tx) => {
                    let _ = response_tx.send(buffer.to_vec());
                }
                LogCommand::Clear => buffer.clear(),
            }
        }
    }

    /// Record an entry (non-blocking)
    pub fn log(&self, level: LogLevel, component: &str, message: &str) {
        if (level as u8) < self.min_level.load(Ordering::Relaxed) {
            return;
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            component: component.to_string(),
        };

        let _ = self.sender.try_send(LogCommand::Log(entry));
    }

    pub fn set_min_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn min_level(&self) -> LogLevel {
        LogLevel::from_u8(self.min_level.load(Ordering::Relaxed))
    }

    /// Entries in chronological order
    pub fn get_logs(&self) -> Vec<LogEntry> {
        let (response_tx, response_rx) = bounded(1);
        if self.sender.send(LogCommand::GetLogs(response_tx)).is_ok() {
            response_rx.recv().unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    pub fn clear_logs(&self) {
        let _ = self.sender.send(LogCommand::Clear);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

// Global logger instance
lazy_static::lazy_static! {
    pub static ref LOGGER: Logger = Logger::new();
}

/// Log to the in-process buffer and the `log` facade.
///
/// ```ignore
/// app_log!(LogLevel::Warn, "arbiter", "preempted: {}", reason);
/// ```
#[macro_export]
macro_rules! app_log {
    ($level:expr, $component:expr, $($arg:tt)*) => {
        {
            use $crate::logger::LogLevel;
            let level: LogLevel = $level;
            let message = format!($($arg)*);
            $crate::logger::LOGGER.log(level, $component, &message);
            match level {
                LogLevel::Error => log::error!(target: $component, "{}", message),
                LogLevel::Warn => log::warn!(target: $component, "{}", message),
                LogLevel::Info => log::info!(target: $component, "{}", message),
                LogLevel::Debug => log::debug!(target: $component, "{}", message),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_buffer_wraps() {
        let mut buffer = CircularBuffer::new(2);
        for i in 0..3 {
            buffer.push(LogEntry {
                timestamp: Utc::now(),
                level: LogLevel::Info,
                message: format!("entry {}", i),
                component: "test".to_string(),
            });
        }
        let entries = buffer.to_vec();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "entry 1");
        assert_eq!(entries[1].message, "entry 2");
    }

    #[test]
    fn test_logger_round_trip() {
        let logger = Logger::with_capacity(16);
        logger.log(LogLevel::Info, "session", "realized");
        logger.log(LogLevel::Error, "monitor", "write failed");

        let logs = logger.get_logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].component, "session");
        assert_eq!(logs[1].level, LogLevel::Error);

        logger.clear_logs();
        assert!(logger.get_logs().is_empty());
    }

    #[test]
    fn test_min_level_filters() {
        let logger = Logger::with_capacity(16);
        logger.set_min_level(LogLevel::Warn);
        logger.log(LogLevel::Debug, "session", "dropped");
        logger.log(LogLevel::Warn, "session", "kept");

        let logs = logger.get_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "kept");
        assert_eq!(logger.min_level(), LogLevel::Warn);
    }
}
