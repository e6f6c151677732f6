//! Routes parsed log records to output streams under a byte budget.

use crate::error::{Error, Result};
use crate::logs::line::{LogLine, LogStream, format_timestamp};
use crate::logs::reader::LogOptions;
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// What the caller should do after a record was handed to the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record was written; keep going.
    Continue,
    /// The record is older than the `since` cutoff and was dropped.
    Filtered,
    /// The byte budget is used up; stop reading, successfully.
    BudgetExhausted,
}

/// Writes records to stdout/stderr sinks.
///
/// With a byte budget, each record is cut to fit what remains. The budget
/// is charged for bytes the sink actually accepted, including any timestamp
/// prefix.
#[derive(Debug)]
pub struct LogWriter<O, E> {
    stdout: O,
    stderr: E,
    since: Option<DateTime<Utc>>,
    timestamps: bool,
    /// Remaining byte budget; `None` is unlimited.
    remaining: Option<u64>,
}

impl<O, E> LogWriter<O, E>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    /// Creates a writer configured from `opts`.
    pub fn new(stdout: O, stderr: E, opts: &LogOptions) -> Self {
        Self {
            stdout,
            stderr,
            since: opts.since,
            timestamps: opts.timestamps,
            remaining: opts.limit_bytes,
        }
    }

    /// Returns the remaining byte budget (`None` when unlimited).
    #[must_use]
    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// Returns the sinks.
    pub fn into_inner(self) -> (O, E) {
        (self.stdout, self.stderr)
    }

    /// Writes one record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShortWrite`] if a sink accepted fewer bytes than it
    /// was given without reporting an error, or [`Error::Io`] if it failed.
    /// Bytes accepted before either error are still charged to the budget.
    pub async fn write(&mut self, line: &LogLine<'_>) -> Result<WriteOutcome> {
        if self.since.is_some_and(|since| line.timestamp < since) {
            return Ok(WriteOutcome::Filtered);
        }

        let full: Cow<'_, [u8]> = if self.timestamps {
            let mut prefixed = format_timestamp(&line.timestamp).into_bytes();
            prefixed.push(b' ');
            prefixed.extend_from_slice(line.payload);
            Cow::Owned(prefixed)
        } else {
            Cow::Borrowed(line.payload)
        };

        // Hard byte cut; may split a UTF-8 sequence.
        let keep = match self.remaining {
            Some(remaining) if full.len() as u64 > remaining => {
                usize::try_from(remaining).unwrap_or(usize::MAX)
            }
            _ => full.len(),
        };
        let buf = &full[..keep];

        let (written, result) = match line.stream {
            LogStream::Stdout => write_counted(&mut self.stdout, buf).await,
            LogStream::Stderr => write_counted(&mut self.stderr, buf).await,
        };

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(written as u64);
        }

        result?;
        if written < buf.len() {
            return Err(Error::ShortWrite {
                written,
                expected: buf.len(),
            });
        }

        if self.remaining == Some(0) {
            return Ok(WriteOutcome::BudgetExhausted);
        }
        Ok(WriteOutcome::Continue)
    }
}

/// Writes as much of `buf` as the sink accepts and flushes it.
///
/// Returns the bytes accepted alongside the outcome, so a failure halfway
/// through can still be accounted for.
async fn write_counted<W: AsyncWrite + Unpin>(
    sink: &mut W,
    buf: &[u8],
) -> (usize, std::io::Result<()>) {
    let mut written = 0;
    while written < buf.len() {
        match sink.write(&buf[written..]).await {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) => return (written, Err(e)),
        }
    }
    if written == 0 {
        return (0, Ok(()));
    }
    (written, sink.flush().await)
}
