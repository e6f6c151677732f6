//! CRI log line parsing.
//!
//! Each record of a CRI container log is one line:
//!
//! ```text
//! 2021-01-01T00:00:00.000000000Z stdout F hello world\n
//! └──────── timestamp ─────────┘ └─┬──┘ │ └── payload ──┘
//!                              stream  tag
//! ```
//!
//! The tag is a `:`-separated list whose first field says whether the
//! record is a complete line (`F`) or a fragment of a longer one (`P`).
//! Later fields are reserved for extensions and ignored.

use crate::constants::{
    LOG_EOL, LOG_FIELD_DELIMITER, LOG_TAG_DELIMITER, LOG_TAG_FULL, LOG_TAG_PARTIAL,
    STREAM_STDERR, STREAM_STDOUT,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Timelike, Utc};

/// Output stream a record was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl LogStream {
    /// Parses a stream token. Only the exact lowercase names are accepted.
    pub fn from_bytes(token: &[u8]) -> Option<Self> {
        match token {
            t if t == STREAM_STDOUT.as_bytes() => Some(Self::Stdout),
            t if t == STREAM_STDERR.as_bytes() => Some(Self::Stderr),
            _ => None,
        }
    }

    /// Returns the stream token.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => STREAM_STDOUT,
            Self::Stderr => STREAM_STDERR,
        }
    }
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a record completes a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    /// Fragment of a line that continues in the next record.
    Partial,
    /// Complete line (or the last fragment of one).
    Full,
}

impl LogTag {
    /// Interprets the first tag field. Anything other than `P` is a full line.
    fn from_field(field: &[u8]) -> Self {
        if field == LOG_TAG_PARTIAL.as_bytes() {
            Self::Partial
        } else {
            Self::Full
        }
    }

    /// Returns the tag token.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Partial => LOG_TAG_PARTIAL,
            Self::Full => LOG_TAG_FULL,
        }
    }
}

/// One parsed record. The payload borrows from the raw line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine<'a> {
    /// Time the runtime captured the output.
    pub timestamp: DateTime<Utc>,
    /// Stream the output was written to.
    pub stream: LogStream,
    /// Partial or full record.
    pub tag: LogTag,
    /// Output bytes, verbatim. Full records keep their newline.
    pub payload: &'a [u8],
}

impl<'a> LogLine<'a> {
    /// Parses one raw log line (with or without its trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`Error::LogParse`] for a missing field delimiter, a timestamp
    /// that is not RFC 3339, or a stream other than `stdout`/`stderr`.
    pub fn parse(line: &'a [u8]) -> Result<Self> {
        let (timestamp, rest) =
            split_field(line).ok_or_else(|| parse_error(line, "timestamp delimiter not found"))?;
        let timestamp = std::str::from_utf8(timestamp)
            .ok()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .ok_or_else(|| parse_error(line, "unexpected timestamp format"))?
            .with_timezone(&Utc);

        let (stream, rest) =
            split_field(rest).ok_or_else(|| parse_error(line, "stream delimiter not found"))?;
        let stream = LogStream::from_bytes(stream).ok_or_else(|| {
            parse_error(
                line,
                &format!("unexpected stream type {:?}", String::from_utf8_lossy(stream)),
            )
        })?;

        let (tag_field, mut payload) =
            split_field(rest).ok_or_else(|| parse_error(line, "log tag delimiter not found"))?;
        let first = tag_field
            .split(|&b| b == LOG_TAG_DELIMITER)
            .next()
            .unwrap_or_default();
        let tag = LogTag::from_field(first);

        if tag == LogTag::Partial
            && let Some(stripped) = payload.strip_suffix(&[LOG_EOL])
        {
            payload = stripped;
        }

        Ok(Self {
            timestamp,
            stream,
            tag,
            payload,
        })
    }

    /// Returns true for a fragment of a longer line.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.tag == LogTag::Partial
    }
}

/// Splits off the field before the next single-space delimiter.
fn split_field(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let idx = bytes.iter().position(|&b| b == LOG_FIELD_DELIMITER)?;
    Some((&bytes[..idx], &bytes[idx + 1..]))
}

fn parse_error(line: &[u8], reason: &str) -> Error {
    let line = String::from_utf8_lossy(line);
    Error::LogParse {
        line: line.trim_end_matches(LOG_EOL as char).to_string(),
        reason: reason.to_string(),
    }
}

/// Formats a timestamp as RFC 3339 in UTC with nanoseconds, dropping
/// trailing zeros of the fraction (and the fraction itself when zero).
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    let mut out = ts.format("%Y-%m-%dT%H:%M:%S").to_string();
    let nanos = ts.nanosecond() % 1_000_000_000;
    if nanos != 0 {
        let fraction = format!("{nanos:09}");
        out.push('.');
        out.push_str(fraction.trim_end_matches('0'));
    }
    out.push('Z');
    out
}
