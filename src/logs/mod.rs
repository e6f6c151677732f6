//! CRI container log reading.
//!
//! ```text
//!   log file ──▶ reader (dump | follow) ──▶ LogLine::parse ──▶ LogWriter
//!                                                               │    │
//!                                                           stdout  stderr
//! ```
//!
//! A reader call owns its writer and file position; nothing is shared
//! between calls.

pub mod line;
pub mod reader;
pub mod writer;

pub use self::line::{LogLine, LogStream, LogTag, format_timestamp};
pub use self::reader::{LogOptions, read_logs};
pub use self::writer::{LogWriter, WriteOutcome};
