//! Log sinks: file writer thread, in-memory capture, discard.

use crate::error::Result;
use crate::log_message::LogMessage;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};

/// Where records go once they pass the level filter.
#[derive(Clone)]
pub(crate) enum Sink {
    File(Sender<LogMessage>),
    Memory(LogCapture),
    Discard,
}

impl Sink {
    /// Opens `log_path` in append mode and starts its writer thread.
    pub fn file(log_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        let (sender, receiver) = channel();
        std::thread::spawn(move || FileWriter { file }.run(receiver));
        Ok(Sink::File(sender))
    }

    pub fn write(&self, message: LogMessage) {
        match self {
            // A closed channel means the writer thread died; nothing to report to.
            Sink::File(sender) => {
                let _ = sender.send(message);
            }
            Sink::Memory(capture) => capture.push(message.line()),
            Sink::Discard => {}
        }
    }
}

struct FileWriter {
    file: File,
}

impl FileWriter {
    fn run(mut self, receiver: Receiver<LogMessage>) {
        for message in receiver {
            let mut line = message.line();
            line.push('\n');
            if let Err(e) = self.file.write_all(line.as_bytes()) {
                eprintln!("Error writing log: {}", e);
                continue;
            }
            if let Err(e) = self.file.flush() {
                eprintln!("Error flushing log: {}", e);
            }
        }
    }
}

/// Shared in-memory record of every line a logger emitted.
///
/// Cloning yields another handle to the same buffer.
#[derive(Clone, Default)]
pub struct LogCapture {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogCapture {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }

    /// Snapshot of the captured lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// True if any captured line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .map(|lines| lines.iter().any(|l| l.contains(needle)))
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_level::LogLevel;
    use std::fs;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_file_sink_creates_file() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("sctp.log");

        let sink = Sink::file(&log_path);
        assert!(sink.is_ok());
        assert!(log_path.exists());
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("sctp.log");

        let sink = Sink::file(&log_path).unwrap();
        sink.write(LogMessage::new(LogLevel::Info, None, "first"));
        sink.write(LogMessage::new(LogLevel::Info, None, "second"));
        drop(sink);
        thread::sleep(Duration::from_millis(100));

        let content = fs::read_to_string(log_path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("first"));
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn test_capture_shared_between_clones() {
        let capture = LogCapture::default();
        let sink = Sink::Memory(capture.clone());

        sink.write(LogMessage::new(LogLevel::Debug, Some("tx"), "queued"));

        assert!(capture.contains("queued"));
        capture.clear();
        assert!(capture.lines().is_empty());
    }
}
