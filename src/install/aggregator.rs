//! Folds reporter events into an [`InstallSummary`].

use serde::Serialize;

use crate::protocol::{LogLevel, ProtocolEvent};
use crate::subprocess::ProcessError;

/// A user-facing line destined for the caller's log sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Counts and log lines accumulated over one install
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallSummary {
    pub added_count: u64,
    pub removed_count: u64,
    pub log_entries: Vec<LogEntry>,
    /// Records skipped because their shape was unknown
    pub unrecognized: usize,
    /// Records that could not be decoded
    pub decode_errors: usize,
}

impl InstallSummary {
    pub fn warnings(&self) -> impl Iterator<Item = &LogEntry> {
        self.log_entries
            .iter()
            .filter(|entry| entry.level == LogLevel::Warn)
    }
}

/// Applies events strictly in the order they are fed.
///
/// Owned by the stdout pipeline; nothing else writes to it until
/// [`Aggregator::finish`] hands the summary over.
pub struct Aggregator {
    prefix: String,
    summary: InstallSummary,
}

impl Aggregator {
    /// `label` prefixes every log line, e.g. `pnpm` gives `pnpm: ...`
    pub fn new(label: &str) -> Self {
        Self {
            prefix: format!("{}: ", label),
            summary: InstallSummary::default(),
        }
    }

    pub fn apply(&mut self, event: ProtocolEvent) {
        tracing::trace!(kind = event.kind(), "reporter event");

        match event {
            ProtocolEvent::Info { level, message } => self.push(level, message),
            ProtocolEvent::Progress { package_id, status } => {
                self.push(
                    LogLevel::Info,
                    format!("[{}] {}", status.as_str(), package_id),
                );
            }
            ProtocolEvent::Link { link, .. } => {
                self.push(LogLevel::Progress, format!("[link] {}", link));
            }
            ProtocolEvent::Importing { to, .. } => {
                self.push(LogLevel::Progress, format!("[importing] {}", to));
            }
            ProtocolEvent::RootChange { added, removed } => {
                if let Some(pkg) = added {
                    self.push(LogLevel::Info, format!("[added] {}", pkg));
                }
                if let Some(pkg) = removed {
                    self.push(LogLevel::Info, format!("[removed] {}", pkg));
                }
            }
            ProtocolEvent::Stats {
                added,
                removed,
                payload,
            } => {
                let summary = &mut self.summary;
                summary.added_count = summary.added_count.saturating_add(added.unwrap_or(0));
                summary.removed_count = summary
                    .removed_count
                    .saturating_add(removed.unwrap_or(0));
                self.push(LogLevel::Info, payload.to_string());
            }
            ProtocolEvent::Unrecognized { raw } => {
                self.summary.unrecognized += 1;
                tracing::trace!(
                    "Ignoring unrecognized reporter record: {}",
                    String::from_utf8_lossy(&raw)
                );
            }
            ProtocolEvent::DecodeError { raw, cause } => {
                self.summary.decode_errors += 1;
                tracing::warn!("Could not decode reporter record: {}", cause);
                self.push(
                    LogLevel::Warn,
                    format!(
                        "could not decode reporter output ({}): {}",
                        cause,
                        String::from_utf8_lossy(&raw)
                    ),
                );
            }
        }
    }

    /// Record a read failure on the stdout pipe; counting continues with what was read
    pub fn record_stream_error(&mut self, error: &ProcessError) {
        tracing::warn!("Reading installer output failed: {}", error);
        self.push(LogLevel::Warn, format!("reading output failed: {}", error));
    }

    pub fn summary(&self) -> &InstallSummary {
        &self.summary
    }

    pub fn finish(self) -> InstallSummary {
        self.summary
    }

    fn push(&mut self, level: LogLevel, message: impl AsRef<str>) {
        self.summary.log_entries.push(LogEntry {
            level,
            message: format!("{}{}", self.prefix, message.as_ref()),
        });
    }
}
