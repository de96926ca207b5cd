//! Replays an [`InstallOutcome`] into the caller's `tracing` sink.
//!
//! Collected entries come first, then the totals on success, then the
//! stderr buffer. Stderr is replayed at info level after a success (installers
//! print benign text there) and at warn level after a failure.

use super::aggregator::LogEntry;
use super::reconciler::InstallOutcome;
use crate::protocol::LogLevel;

/// Build every line `emit` will log, in order
pub fn render(outcome: &InstallOutcome, label: &str) -> Vec<LogEntry> {
    let summary = outcome.summary();
    let mut lines = summary.log_entries.clone();

    let diagnostic_level = match outcome {
        InstallOutcome::Success { .. } => {
            if summary.added_count > 0 {
                lines.push(entry(
                    LogLevel::Info,
                    format!("Added {} packages via {}", summary.added_count, label),
                ));
            }
            if summary.removed_count > 0 {
                lines.push(entry(
                    LogLevel::Info,
                    format!("Removed {} packages via {}", summary.removed_count, label),
                ));
            }
            LogLevel::Info
        }
        InstallOutcome::Failure { .. } => LogLevel::Warn,
    };

    lines.extend(
        outcome
            .diagnostics()
            .lines()
            .iter()
            .map(|line| entry(diagnostic_level, line.clone())),
    );

    if let Some(reason) = outcome.reason() {
        lines.push(entry(LogLevel::Error, format!("{} failed: {}", label, reason)));
    }

    lines
}

/// Log the outcome through `tracing`
pub fn emit(outcome: &InstallOutcome, label: &str) {
    for line in render(outcome, label) {
        match line.level {
            LogLevel::Info => tracing::info!(target: "pmbridge::installer", "{}", line.message),
            LogLevel::Progress => {
                tracing::debug!(target: "pmbridge::installer", "{}", line.message)
            }
            LogLevel::Warn => tracing::warn!(target: "pmbridge::installer", "{}", line.message),
            LogLevel::Error => tracing::error!(target: "pmbridge::installer", "{}", line.message),
        }
    }
}

fn entry(level: LogLevel, message: String) -> LogEntry {
    LogEntry { level, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::aggregator::InstallSummary;
    use crate::install::diagnostics::DiagnosticCollector;
    use crate::install::reconciler::FailureReason;

    fn diagnostics(lines: &[&str]) -> crate::install::DiagnosticBuffer {
        let mut collector = DiagnosticCollector::new();
        for line in lines {
            collector.push(line.as_bytes());
        }
        collector.finish()
    }

    #[test]
    fn test_success_adds_totals_then_diagnostics() {
        let outcome = InstallOutcome::Success {
            summary: InstallSummary {
                added_count: 2,
                removed_count: 0,
                log_entries: vec![entry(LogLevel::Info, "pnpm: [added] a (1.0.0)".to_string())],
                ..Default::default()
            },
            diagnostics: diagnostics(&["Done in 1.2s"]),
        };

        let lines = render(&outcome, "pnpm");
        let messages: Vec<_> = lines.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["pnpm: [added] a (1.0.0)", "Added 2 packages via pnpm", "Done in 1.2s"]
        );
        assert_eq!(lines[2].level, LogLevel::Info);
    }

    #[test]
    fn test_failure_replays_diagnostics_as_warnings() {
        let outcome = InstallOutcome::Failure {
            reason: FailureReason::ExitCode { code: 1 },
            partial_summary: InstallSummary {
                added_count: 4,
                ..Default::default()
            },
            diagnostics: diagnostics(&["ERR_PNPM_FETCH_404"]),
        };

        let lines = render(&outcome, "pnpm");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].level, LogLevel::Warn);
        assert_eq!(lines[0].message, "ERR_PNPM_FETCH_404");
        assert_eq!(lines[1].level, LogLevel::Error);
        assert!(lines[1].message.contains("exit code 1"));
    }

    #[test]
    fn test_nothing_added_means_no_totals() {
        let outcome = InstallOutcome::Success {
            summary: InstallSummary::default(),
            diagnostics: diagnostics(&[]),
        };
        assert!(render(&outcome, "pnpm").is_empty());
    }
}
