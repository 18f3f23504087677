use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_core::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::Result;

const MAX_LOG_MEMORY_BYTES: usize = 2 * 1024 * 1024; // 2MB
const LOG_FILE_PREFIX: &str = "bitbucket_notifier";

pub type LogLevel = Level;

/// Console of the build being notified about.
///
/// Notification outcomes are only ever reported here, never as build
/// failures.
pub trait BuildLog: Send + Sync {
    fn log(&self, level: LogLevel, line: &str);

    fn println(&self, line: &str) {
        self.log(Level::INFO, line);
    }
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    fn size(&self) -> usize {
        std::mem::size_of::<LogEntry>() + self.message.len()
    }
}

/// In-memory build console, bounded to 2MB; oldest lines are dropped first.
pub struct BuildConsole {
    entries: Mutex<VecDeque<LogEntry>>,
    max_total_memory_size: usize,
}

impl BuildConsole {
    pub fn new() -> Self {
        Self::with_capacity_bytes(MAX_LOG_MEMORY_BYTES)
    }

    pub fn with_capacity_bytes(max_total_memory_size: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_total_memory_size,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .map(|entry| entry.message)
            .collect()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn get_logs_by_level(&self, level: LogLevel) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.level == level)
            .collect()
    }

    /// True if any line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|entry| entry.message.contains(needle))
    }
}

impl Default for BuildConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildLog for BuildConsole {
    fn log(&self, level: LogLevel, line: &str) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: line.to_string(),
        };
        let entry_size = entry.size();

        if let Ok(mut guard) = self.entries.lock() {
            let mut total: usize = guard.iter().map(LogEntry::size).sum();
            while total + entry_size > self.max_total_memory_size {
                match guard.pop_front() {
                    Some(evicted) => total -= evicted.size(),
                    None => break,
                }
            }
            guard.push_back(entry);
        }
    }
}

/// Forwards console lines to `tracing` under the `build_console` target
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingBuildLog;

impl BuildLog for TracingBuildLog {
    fn log(&self, level: LogLevel, line: &str) {
        if level == Level::ERROR {
            error!(target: "build_console", "{}", line);
        } else if level == Level::WARN {
            warn!(target: "build_console", "{}", line);
        } else if level == Level::INFO {
            info!(target: "build_console", "{}", line);
        } else {
            debug!(target: "build_console", "{}", line);
        }
    }
}

pub struct FileLogger {
    log_directory: PathBuf,
    rotation: Rotation,
}

impl FileLogger {
    pub fn new(log_directory: PathBuf) -> Self {
        Self {
            log_directory,
            rotation: Rotation::DAILY,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn setup_file_logging(&self) -> Result<(NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.log_directory)?;

        let file_appender = RollingFileAppender::new(
            self.rotation.to_owned(),
            &self.log_directory,
            LOG_FILE_PREFIX,
        );

        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Install the global subscriber: console output plus an optional rolling
/// log file. The returned guard must be held until exit to flush the file.
pub fn setup_logging(file_logger: Option<&FileLogger>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match file_logger {
        Some(logger) => {
            let (writer, guard) = logger.setup_file_logging()?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false); // Disable ANSI colors for file logs
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer()) // Console output
        .with(file_layer)
        .init();

    Ok(guard)
}
