//! Joins stream exhaustion with the exit status into one [`InstallOutcome`].
//!
//! ```text
//! Running --exit--> Draining --streams exhausted--> Finished
//!    \------------ exit after streams exhausted -----^
//! ```
//!
//! Both conditions must hold before the outcome exists; the order in which
//! they arrive does not change it.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::aggregator::InstallSummary;
use super::diagnostics::DiagnosticBuffer;
use crate::subprocess::{ExitStatus, ProcessError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    /// Process alive; streams being consumed
    Running,
    /// Process exited; buffered output still being drained
    Draining,
    /// Streams exhausted and exit status known
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    ExitCode {
        code: i32,
    },
    Signal {
        signal: i32,
    },
    TimedOut {
        #[serde(with = "humantime_serde")]
        after: Duration,
    },
    Cancelled,
    WaitFailed {
        message: String,
    },
    /// Only produced when strict protocol checking is enabled
    UnrecognizedEvents {
        count: usize,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const EXITED: &str = "external tool exited with failure";
        match self {
            Self::ExitCode { code } => write!(f, "{} (exit code {})", EXITED, code),
            Self::Signal { signal } => write!(f, "{} (terminated by signal {})", EXITED, signal),
            Self::TimedOut { after } => write!(f, "{} (timed out after {:?})", EXITED, after),
            Self::Cancelled => f.write_str("install cancelled; external tool was terminated"),
            Self::WaitFailed { message } => {
                write!(f, "{} (could not collect exit status: {})", EXITED, message)
            }
            Self::UnrecognizedEvents { count } => write!(
                f,
                "external tool reported {} unrecognized event(s) under strict protocol checking",
                count
            ),
        }
    }
}

/// Terminal result of one install call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstallOutcome {
    Success {
        summary: InstallSummary,
        diagnostics: DiagnosticBuffer,
    },
    Failure {
        reason: FailureReason,
        partial_summary: InstallSummary,
        diagnostics: DiagnosticBuffer,
    },
}

impl InstallOutcome {
    /// Outcome for an abandoned install; partial progress is discarded
    pub fn cancelled() -> Self {
        Self::Failure {
            reason: FailureReason::Cancelled,
            partial_summary: InstallSummary::default(),
            diagnostics: DiagnosticBuffer::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Summary for either variant
    pub fn summary(&self) -> &InstallSummary {
        match self {
            Self::Success { summary, .. } => summary,
            Self::Failure {
                partial_summary, ..
            } => partial_summary,
        }
    }

    pub fn diagnostics(&self) -> &DiagnosticBuffer {
        match self {
            Self::Success { diagnostics, .. } | Self::Failure { diagnostics, .. } => diagnostics,
        }
    }

    pub fn reason(&self) -> Option<&FailureReason> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { reason, .. } => Some(reason),
        }
    }
}

pub struct Reconciler {
    state: ReconcilerState,
    summary: Option<InstallSummary>,
    diagnostics: Option<DiagnosticBuffer>,
    exit: Option<Result<ExitStatus, String>>,
    timeout: Option<Duration>,
    strict_protocol: bool,
}

impl Reconciler {
    pub fn new(timeout: Option<Duration>, strict_protocol: bool) -> Self {
        Self {
            state: ReconcilerState::Running,
            summary: None,
            diagnostics: None,
            exit: None,
            timeout,
            strict_protocol,
        }
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    pub fn primary_exhausted(&mut self, summary: InstallSummary) {
        self.summary = Some(summary);
        self.advance();
    }

    pub fn secondary_exhausted(&mut self, diagnostics: DiagnosticBuffer) {
        self.diagnostics = Some(diagnostics);
        self.advance();
    }

    pub fn process_exited(&mut self, status: Result<ExitStatus, ProcessError>) {
        tracing::debug!("Installer exit observed: {:?}", status);
        self.exit = Some(status.map_err(|e| e.to_string()));
        self.advance();
    }

    /// Take the outcome once both streams are exhausted and the exit status is known
    pub fn try_finish(&mut self) -> Option<InstallOutcome> {
        if self.state != ReconcilerState::Finished {
            return None;
        }

        let summary = self.summary.take()?;
        let diagnostics = self.diagnostics.take()?;
        let exit = self.exit.take()?;

        let reason = match exit {
            Ok(ExitStatus::Success) if self.strict_protocol && summary.unrecognized > 0 => {
                Some(FailureReason::UnrecognizedEvents {
                    count: summary.unrecognized,
                })
            }
            Ok(ExitStatus::Success) => None,
            Ok(ExitStatus::Error(code)) => Some(FailureReason::ExitCode { code }),
            Ok(ExitStatus::Signal(signal)) => Some(FailureReason::Signal { signal }),
            Ok(ExitStatus::Timeout) => Some(FailureReason::TimedOut {
                after: self.timeout.unwrap_or_default(),
            }),
            Ok(ExitStatus::Terminated) => Some(FailureReason::Cancelled),
            Err(message) => Some(FailureReason::WaitFailed { message }),
        };

        Some(match reason {
            None => InstallOutcome::Success {
                summary,
                diagnostics,
            },
            Some(reason) => InstallOutcome::Failure {
                reason,
                partial_summary: summary,
                diagnostics,
            },
        })
    }

    fn advance(&mut self) {
        let streams_done = self.summary.is_some() && self.diagnostics.is_some();
        self.state = match (self.exit.is_some(), streams_done) {
            (false, _) => ReconcilerState::Running,
            (true, false) => ReconcilerState::Draining,
            (true, true) => ReconcilerState::Finished,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(added: u64) -> InstallSummary {
        InstallSummary {
            added_count: added,
            ..Default::default()
        }
    }

    #[test]
    fn test_exit_first_passes_through_draining() {
        let mut r = Reconciler::new(None, false);
        assert_eq!(r.state(), ReconcilerState::Running);

        r.process_exited(Ok(ExitStatus::Success));
        assert_eq!(r.state(), ReconcilerState::Draining);
        assert!(r.try_finish().is_none());

        r.primary_exhausted(summary(1));
        assert_eq!(r.state(), ReconcilerState::Draining);
        r.secondary_exhausted(DiagnosticBuffer::default());
        assert_eq!(r.state(), ReconcilerState::Finished);

        let outcome = r.try_finish().unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.summary().added_count, 1);
    }

    #[test]
    fn test_streams_first_waits_for_exit() {
        let mut r = Reconciler::new(None, false);
        r.primary_exhausted(summary(1));
        r.secondary_exhausted(DiagnosticBuffer::default());
        assert_eq!(r.state(), ReconcilerState::Running);
        assert!(r.try_finish().is_none());

        r.process_exited(Ok(ExitStatus::Success));
        assert_eq!(r.state(), ReconcilerState::Finished);
        assert!(r.try_finish().is_some());
    }

    #[test]
    fn test_completion_order_does_not_change_outcome() {
        let mut exit_first = Reconciler::new(None, false);
        exit_first.process_exited(Ok(ExitStatus::Error(1)));
        exit_first.secondary_exhausted(DiagnosticBuffer::default());
        exit_first.primary_exhausted(summary(2));

        let mut exit_last = Reconciler::new(None, false);
        exit_last.primary_exhausted(summary(2));
        exit_last.secondary_exhausted(DiagnosticBuffer::default());
        exit_last.process_exited(Ok(ExitStatus::Error(1)));

        assert_eq!(exit_first.try_finish(), exit_last.try_finish());
    }

    #[test]
    fn test_failure_keeps_partial_summary_and_code() {
        let mut r = Reconciler::new(None, false);
        r.primary_exhausted(summary(3));
        r.secondary_exhausted(DiagnosticBuffer::default());
        r.process_exited(Ok(ExitStatus::Error(1)));

        let outcome = r.try_finish().unwrap();
        let reason = outcome.reason().unwrap();
        assert_eq!(reason, &FailureReason::ExitCode { code: 1 });
        assert!(reason.to_string().contains("exit code 1"));
        assert_eq!(outcome.summary().added_count, 3);
    }

    #[test]
    fn test_timeout_and_signal_reasons() {
        let mut r = Reconciler::new(Some(Duration::from_secs(5)), false);
        r.primary_exhausted(summary(0));
        r.secondary_exhausted(DiagnosticBuffer::default());
        r.process_exited(Ok(ExitStatus::Timeout));
        assert_eq!(
            r.try_finish().unwrap().reason(),
            Some(&FailureReason::TimedOut {
                after: Duration::from_secs(5)
            })
        );

        assert!(FailureReason::Signal { signal: 9 }
            .to_string()
            .starts_with("external tool exited with failure"));
    }

    #[test]
    fn test_wait_error_is_failure() {
        let mut r = Reconciler::new(None, false);
        r.primary_exhausted(summary(0));
        r.secondary_exhausted(DiagnosticBuffer::default());
        r.process_exited(Err(ProcessError::InternalError {
            message: "wait failed".to_string(),
        }));
        assert!(matches!(
            r.try_finish().unwrap().reason(),
            Some(FailureReason::WaitFailed { .. })
        ));
    }

    #[test]
    fn test_strict_protocol_fails_on_unrecognized() {
        let lenient_summary = InstallSummary {
            unrecognized: 2,
            ..Default::default()
        };

        let mut lenient = Reconciler::new(None, false);
        lenient.primary_exhausted(lenient_summary.clone());
        lenient.secondary_exhausted(DiagnosticBuffer::default());
        lenient.process_exited(Ok(ExitStatus::Success));
        assert!(lenient.try_finish().unwrap().is_success());

        let mut strict = Reconciler::new(None, true);
        strict.primary_exhausted(lenient_summary);
        strict.secondary_exhausted(DiagnosticBuffer::default());
        strict.process_exited(Ok(ExitStatus::Success));
        assert_eq!(
            strict.try_finish().unwrap().reason(),
            Some(&FailureReason::UnrecognizedEvents { count: 2 })
        );
    }

    #[test]
    fn test_outcome_is_produced_once() {
        let mut r = Reconciler::new(None, false);
        r.primary_exhausted(summary(0));
        r.secondary_exhausted(DiagnosticBuffer::default());
        r.process_exited(Ok(ExitStatus::Success));
        assert!(r.try_finish().is_some());
        assert!(r.try_finish().is_none());
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = InstallOutcome::cancelled();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "failure");
        assert_eq!(json["reason"]["kind"], "cancelled");
        assert_eq!(json["partial_summary"]["added_count"], 0);
    }
}
