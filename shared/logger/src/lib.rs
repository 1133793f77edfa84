//! Leveled, component-tagged logging shared by the workspace crates.
//!
//! A [`Logger`] writes through one shared sink: a log file drained by a
//! dedicated writer thread, an in-memory [`LogCapture`] (tests), or nothing.
//! Components derived with [`Logger::for_component`] reuse the parent's sink.

pub mod error;
mod log_level;
mod log_message;
mod log_writer;
mod logger;

pub use error::{LoggingError, Result};
pub use log_level::LogLevel;
pub use log_writer::LogCapture;
pub use logger::Logger;
