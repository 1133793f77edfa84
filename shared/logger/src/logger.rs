//! Non-blocking logger handle.
//!
//! This module provides the main [`Logger`] interface. Filtering happens on
//! the caller's thread; file output is handed to a writer thread.

use crate::error::Result;
use crate::log_level::LogLevel;
use crate::log_message::LogMessage;
use crate::log_writer::{LogCapture, Sink};
use std::fmt;
use std::path::PathBuf;

/// Cloneable, non-blocking logger.
///
/// Clones and derived components share the same sink.
///
/// # Examples
///
/// ```
/// use logging::{Logger, LogLevel};
///
/// let (logger, capture) = Logger::in_memory(LogLevel::Info);
/// let assoc = logger.for_component("sctp");
/// assoc.info("Association established");
/// assoc.debug("filtered out");
/// assert!(capture.contains("[sctp]: Association established"));
/// assert!(!capture.contains("filtered out"));
/// ```
#[derive(Clone)]
pub struct Logger {
    sink: Sink,
    level: LogLevel,
    component: Option<String>,
    console_output: bool,
}

impl Logger {
    /// Creates a logger appending to `log_path` through a dedicated writer thread.
    ///
    /// # Errors
    ///
    /// Returns error if the log file cannot be created or opened.
    pub fn new(log_path: PathBuf, level: LogLevel) -> Result<Self> {
        Ok(Self::with_sink(Sink::file(&log_path)?, level))
    }

    /// Creates a logger whose lines are kept in memory and readable through
    /// the returned [`LogCapture`].
    pub fn in_memory(level: LogLevel) -> (Self, LogCapture) {
        let capture = LogCapture::default();
        (Self::with_sink(Sink::Memory(capture.clone()), level), capture)
    }

    /// Creates a logger that drops everything.
    pub fn disabled() -> Self {
        Self::with_sink(Sink::Discard, LogLevel::Error)
    }

    fn with_sink(sink: Sink, level: LogLevel) -> Self {
        Logger {
            sink,
            level,
            component: None,
            console_output: false,
        }
    }

    /// Mirrors every accepted line to stdout as well.
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console_output = enabled;
        self
    }

    /// Derives a logger tagged with `component`, sharing this logger's sink,
    /// level and console setting.
    pub fn for_component(&self, component: &str) -> Self {
        Logger {
            sink: self.sink.clone(),
            level: self.level,
            component: Some(component.to_string()),
            console_output: self.console_output,
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// True if a message at `level` would be recorded.
    ///
    /// Lets callers skip building expensive messages.
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        !matches!(self.sink, Sink::Discard) && level >= self.level
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    fn log(&self, level: LogLevel, message: &str) {
        if !self.is_enabled(level) {
            return;
        }
        let msg = LogMessage::new(level, self.component.as_deref(), message);
        if self.console_output {
            println!("{}", msg.line());
        }
        self.sink.write(msg);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level)
            .field("component", &self.component)
            .finish()
    }
}
