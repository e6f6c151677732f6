//! Reading CRI container logs, once or following.
//!
//! # Modes
//!
//! ```text
//!   dump (follow = false)
//!     read whole file ──▶ keep last `tail` lines ──▶ parse + write each
//!
//!   follow (follow = true)
//!     ┌─────────────┐  first EOF   ┌───────────┐ container stopped ┌────────────┐
//!     │ PrimingTail │─────────────▶│ Streaming │──────────────────▶│ Terminated │
//!     └─────────────┘ emit tail    └─────┬─────┘  (after one last  └────────────┘
//!       (tail > 0 only)                  │         drain read)
//!                                        │ EOF, still running:
//!                                        └─ sleep poll_interval
//! ```
//!
//! Either mode stops successfully when the writer's byte budget runs out,
//! and fails on the first malformed line.

use crate::constants::{LOG_EOL, LOG_POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::logs::line::LogLine;
use crate::logs::writer::{LogWriter, WriteOutcome};
use crate::runtime::ContainerStateSource;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

// =============================================================================
// Options
// =============================================================================

/// Options for [`read_logs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// Show extra details. Accepted for compatibility; has no effect.
    pub details: bool,
    /// Keep reading as the log grows, until the container stops.
    pub follow: bool,
    /// Drop records strictly older than this.
    pub since: Option<DateTime<Utc>>,
    /// Emit only the last N lines that exist when reading starts (0 = all).
    pub tail: usize,
    /// Prefix each record with its timestamp.
    pub timestamps: bool,
    /// Total output byte budget. `None` is unlimited.
    pub limit_bytes: Option<u64>,
    /// Sleep between end-of-file checks in follow mode.
    pub poll_interval: Duration,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            details: false,
            follow: false,
            since: None,
            tail: 0,
            timestamps: false,
            limit_bytes: None,
            poll_interval: LOG_POLL_INTERVAL,
        }
    }
}

impl LogOptions {
    /// Enables follow mode.
    #[must_use]
    pub fn with_follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    /// Sets the `since` cutoff.
    #[must_use]
    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Sets the tail line count.
    #[must_use]
    pub fn with_tail(mut self, tail: usize) -> Self {
        self.tail = tail;
        self
    }

    /// Enables timestamp prefixes.
    #[must_use]
    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Sets the output byte budget.
    #[must_use]
    pub fn with_limit_bytes(mut self, limit: u64) -> Self {
        self.limit_bytes = Some(limit);
        self
    }

    /// Sets the follow-mode poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

// =============================================================================
// Reading
// =============================================================================

/// Reads the CRI log at `path` and writes its records to `stdout`/`stderr`.
///
/// In follow mode, `state` is queried each time the end of the file is
/// reached, and `cancel` stops the call (successfully) at any suspension
/// point. Dump mode ignores both.
///
/// # Errors
///
/// [`Error::LogRead`] if the file cannot be read, [`Error::LogParse`] on the
/// first malformed line, and any write error from the sinks.
pub async fn read_logs<S, O, E>(
    path: impl AsRef<Path>,
    state: &S,
    opts: &LogOptions,
    stdout: O,
    stderr: E,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: ContainerStateSource + ?Sized,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let path = path.as_ref();
    let mut writer = LogWriter::new(stdout, stderr, opts);

    debug!(
        "Reading logs from {} (follow: {}, tail: {})",
        path.display(),
        opts.follow,
        opts.tail
    );

    if opts.follow {
        follow(path, state, opts, &mut writer, cancel).await
    } else {
        dump(path, opts, &mut writer).await
    }
}

async fn dump<O, E>(path: &Path, opts: &LogOptions, writer: &mut LogWriter<O, E>) -> Result<()>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let content = tokio::fs::read(path).await.map_err(|source| Error::LogRead {
        path: path.to_path_buf(),
        source,
    })?;

    let lines: Vec<&[u8]> = content.split_inclusive(|&b| b == LOG_EOL).collect();
    for line in tail_lines(&lines, opts.tail) {
        if emit(writer, line).await? == WriteOutcome::BudgetExhausted {
            return Ok(());
        }
    }
    Ok(())
}

async fn follow<S, O, E>(
    path: &Path,
    state: &S,
    opts: &LogOptions,
    writer: &mut LogWriter<O, E>,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: ContainerStateSource + ?Sized,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let read_error = |source: std::io::Error| Error::LogRead {
        path: path.to_path_buf(),
        source,
    };
    let file = tokio::fs::File::open(path).await.map_err(read_error)?;
    let mut reader = BufReader::new(file);

    // Lines held back until the first EOF when only the tail is wanted.
    let mut priming = (opts.tail > 0).then(VecDeque::new);
    let mut draining = false;
    let mut buf = Vec::new();

    loop {
        // `read_until` appends, so a line cut by EOF is completed by a
        // later read.
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            read = reader.read_until(LOG_EOL, &mut buf) => read.map_err(read_error)?,
        };

        if read > 0 && buf.last() == Some(&LOG_EOL) {
            if let Some(held) = priming.as_mut() {
                if held.len() == opts.tail {
                    held.pop_front();
                }
                held.push_back(std::mem::take(&mut buf));
            } else {
                let outcome = emit(writer, &buf).await?;
                buf.clear();
                if outcome == WriteOutcome::BudgetExhausted {
                    return Ok(());
                }
            }
            continue;
        }

        // End of file.
        if let Some(held) = priming.take() {
            debug!("Emitting last {} lines of {}", held.len(), path.display());
            for line in held {
                if emit(writer, &line).await? == WriteOutcome::BudgetExhausted {
                    return Ok(());
                }
            }
            continue;
        }

        if draining {
            // The container is gone; flush a final unterminated record.
            if !buf.is_empty() {
                emit(writer, &buf).await?;
            }
            return Ok(());
        }

        let status = state.status().await?;
        if !status.is_producing_output() {
            debug!("Container is {}, finishing log {}", status, path.display());
            draining = true;
            continue;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            () = tokio::time::sleep(opts.poll_interval) => {}
        }
    }
}

/// Returns the last `tail` lines, or all of them when `tail` is 0.
fn tail_lines<'a, T>(lines: &'a [T], tail: usize) -> &'a [T] {
    if tail == 0 || tail >= lines.len() {
        lines
    } else {
        &lines[lines.len() - tail..]
    }
}

async fn emit<O, E>(writer: &mut LogWriter<O, E>, raw: &[u8]) -> Result<WriteOutcome>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let line = LogLine::parse(raw)?;
    writer.write(&line).await
}
