//! Drives one installer process from spawn to [`InstallOutcome`].
//!
//! Three sources are consumed concurrently on one task: the stdout pipeline
//! (framing, decoding, aggregation), the stderr pipeline (diagnostics) and the
//! exit status. Each pipeline owns its accumulator; the reconciler only sees
//! them once they are frozen.

use futures::{Future, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use super::aggregator::{Aggregator, InstallSummary};
use super::diagnostics::{DiagnosticBuffer, DiagnosticCollector};
use super::reconciler::{InstallOutcome, Reconciler, ReconcilerState};
use crate::protocol::{decode_record, is_blank};
use crate::subprocess::{
    ProcessCommand, ProcessError, ProcessRunner, ProcessStatusFut, ProcessStream,
    ProcessStreamFut,
};

/// Extra time allowed for the pipes to close after a cancelled process was killed
const DRAIN_SLACK: Duration = Duration::from_millis(500);

pub struct ProcessSupervisor {
    runner: Arc<dyn ProcessRunner>,
    label: String,
    strict_protocol: bool,
}

impl ProcessSupervisor {
    pub fn new(runner: Arc<dyn ProcessRunner>, label: impl Into<String>) -> Self {
        Self {
            runner,
            label: label.into(),
            strict_protocol: false,
        }
    }

    pub fn with_strict_protocol(mut self, strict: bool) -> Self {
        self.strict_protocol = strict;
        self
    }

    /// Spawn `command` and run it to completion.
    ///
    /// Only a spawn failure is returned as `Err`. If `cancel` resolves first the
    /// process group is terminated, the pipes are drained for a bounded time and
    /// the outcome is [`InstallOutcome::cancelled`].
    pub async fn supervise<C>(
        &self,
        command: ProcessCommand,
        cancel: C,
    ) -> Result<InstallOutcome, ProcessError>
    where
        C: Future<Output = ()> + Send,
    {
        let drain_limit = command.kill_grace + DRAIN_SLACK;
        let reconciler = Reconciler::new(command.timeout, self.strict_protocol);

        let ProcessStream {
            stdout,
            stderr,
            status,
            mut terminator,
        } = self.runner.run_streaming(command).await?;

        let work = drive(
            stdout,
            stderr,
            status,
            Aggregator::new(&self.label),
            reconciler,
        );
        tokio::pin!(work);
        tokio::pin!(cancel);

        // Cancellation wins over a run that finishes on the same poll
        tokio::select! {
            biased;
            _ = &mut cancel => {
                tracing::info!("Install cancelled; terminating {}", self.label);
                terminator.terminate();

                if tokio::time::timeout(drain_limit, &mut work).await.is_err() {
                    tracing::warn!(
                        "{} output did not close within {:?} after termination",
                        self.label,
                        drain_limit
                    );
                }
                Ok(InstallOutcome::cancelled())
            }
            outcome = &mut work => Ok(outcome),
        }
    }
}

async fn drive(
    stdout: ProcessStreamFut,
    stderr: ProcessStreamFut,
    mut status: ProcessStatusFut,
    aggregator: Aggregator,
    mut reconciler: Reconciler,
) -> InstallOutcome {
    let primary = consume_primary(stdout, aggregator);
    let secondary = consume_secondary(stderr);
    tokio::pin!(primary);
    tokio::pin!(secondary);

    let mut primary_done = false;
    let mut secondary_done = false;
    let mut exited = false;

    while reconciler.state() != ReconcilerState::Finished {
        tokio::select! {
            summary = &mut primary, if !primary_done => {
                primary_done = true;
                tracing::debug!("Installer stdout exhausted");
                reconciler.primary_exhausted(summary);
            }
            diagnostics = &mut secondary, if !secondary_done => {
                secondary_done = true;
                tracing::debug!("Installer stderr exhausted");
                reconciler.secondary_exhausted(diagnostics);
            }
            exit = &mut status, if !exited => {
                exited = true;
                reconciler.process_exited(exit);
            }
        }
    }

    reconciler
        .try_finish()
        .unwrap_or_else(InstallOutcome::cancelled)
}

async fn consume_primary(mut stdout: ProcessStreamFut, mut aggregator: Aggregator) -> InstallSummary {
    while let Some(item) = stdout.next().await {
        match item {
            Ok(record) => {
                if is_blank(&record) {
                    continue;
                }
                tracing::trace!("stdout: {}", String::from_utf8_lossy(&record));
                aggregator.apply(decode_record(&record));
            }
            Err(e) => aggregator.record_stream_error(&e),
        }
    }
    aggregator.finish()
}

async fn consume_secondary(mut stderr: ProcessStreamFut) -> DiagnosticBuffer {
    let mut collector = DiagnosticCollector::new();
    while let Some(item) = stderr.next().await {
        match item {
            Ok(record) => collector.push(&record),
            Err(e) => tracing::warn!("Reading installer diagnostics failed: {}", e),
        }
    }
    collector.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::reconciler::FailureReason;
    use crate::subprocess::{ExitStatus, MockProcessRunner, ProcessCommandBuilder};
    use std::io::ErrorKind;

    fn command() -> ProcessCommand {
        ProcessCommandBuilder::new("pnpm")
            .args(["install", "--reporter", "ndjson", "left-pad"])
            .build()
    }

    fn supervisor(mock: &MockProcessRunner) -> ProcessSupervisor {
        ProcessSupervisor::new(Arc::new(mock.clone()), "pnpm")
    }

    #[tokio::test]
    async fn test_success_with_stats() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("pnpm")
            .returns_stdout(r#"{"name":"pnpm:stats","added":1,"removed":0}"#)
            .returns_stderr("Done in 0.4s")
            .returns_success()
            .finish();

        let outcome = supervisor(&mock)
            .supervise(command(), futures::future::pending())
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.summary().added_count, 1);
        assert_eq!(outcome.summary().removed_count, 0);
        assert_eq!(outcome.diagnostics().lines(), &["Done in 0.4s".to_string()]);
    }

    #[tokio::test]
    async fn test_blank_records_are_skipped() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("pnpm")
            .returns_stdout("\n   \n{\"name\":\"pnpm:stats\",\"added\":2}\n")
            .returns_success()
            .finish();

        let outcome = supervisor(&mock)
            .supervise(command(), futures::future::pending())
            .await
            .unwrap();

        let summary = outcome.summary();
        assert_eq!(summary.added_count, 2);
        assert_eq!(summary.decode_errors, 0);
    }

    #[tokio::test]
    async fn test_exit_before_output_drains() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("pnpm")
            .returns_stdout(
                "{\"name\":\"pnpm:stats\",\"added\":1}\n{\"name\":\"pnpm:stats\",\"added\":1}",
            )
            .line_delay(Duration::from_millis(20))
            .returns_success()
            .finish();

        let outcome = supervisor(&mock)
            .supervise(command(), futures::future::pending())
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.summary().added_count, 2);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure_with_partial_counts() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("pnpm")
            .returns_stdout(r#"{"name":"pnpm:stats","added":3}"#)
            .returns_stderr("ERR_PNPM_FETCH_404")
            .returns_exit_code(1)
            .finish();

        let outcome = supervisor(&mock)
            .supervise(command(), futures::future::pending())
            .await
            .unwrap();

        assert_eq!(outcome.reason(), Some(&FailureReason::ExitCode { code: 1 }));
        assert_eq!(outcome.summary().added_count, 3);
        assert_eq!(outcome.diagnostics().len(), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("pnpm")
            .fails_to_spawn(ErrorKind::NotFound)
            .finish();

        let result = supervisor(&mock)
            .supervise(command(), futures::future::pending())
            .await;

        assert!(matches!(result, Err(ProcessError::CommandNotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_after_stats_is_failure() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("pnpm")
            .returns_stdout(r#"{"name":"pnpm:stats","added":1}"#)
            .returns_status(ExitStatus::Success)
            .exit_delay(Duration::from_secs(30))
            .finish();

        let outcome = supervisor(&mock)
            .supervise(command(), tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        assert_eq!(outcome.reason(), Some(&FailureReason::Cancelled));
        assert_eq!(outcome.summary().added_count, 0);
        assert!(mock.was_terminated());
    }

    #[tokio::test]
    async fn test_strict_protocol() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("pnpm")
            .returns_stdout(r#"{"name":"pnpm:future-thing"}"#)
            .returns_success()
            .times(2)
            .finish();

        let lenient = supervisor(&mock)
            .supervise(command(), futures::future::pending())
            .await
            .unwrap();
        assert!(lenient.is_success());
        assert_eq!(lenient.summary().unrecognized, 1);

        let strict = supervisor(&mock)
            .with_strict_protocol(true)
            .supervise(command(), futures::future::pending())
            .await
            .unwrap();
        assert_eq!(
            strict.reason(),
            Some(&FailureReason::UnrecognizedEvents { count: 1 })
        );
    }

    #[tokio::test]
    async fn test_cancel_already_resolved_never_succeeds() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("pnpm")
            .returns_stdout(r#"{"name":"pnpm:stats","added":1}"#)
            .returns_success()
            .finish();
        let supervisor = supervisor(&mock);

        for _ in 0..200 {
            let outcome = supervisor
                .supervise(command(), futures::future::ready(()))
                .await
                .unwrap();
            assert_eq!(outcome.reason(), Some(&FailureReason::Cancelled));
            assert_eq!(outcome.summary().added_count, 0);
        }
    }

    #[tokio::test]
    async fn test_diagnostics_surface_only_through_outcome() {
        use std::sync::Mutex;
        use tracing::field::{Field, Visit};
        use tracing_subscriber::layer::{Context, SubscriberExt};
        use tracing_subscriber::Layer;

        struct MessageVisitor(String);

        impl Visit for MessageVisitor {
            fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.0 = format!("{:?}", value);
                }
            }
        }

        struct Capture(Arc<Mutex<Vec<String>>>);

        impl<S: tracing::Subscriber> Layer<S> for Capture {
            fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
                let mut visitor = MessageVisitor(String::new());
                event.record(&mut visitor);
                self.0.lock().unwrap().push(visitor.0);
            }
        }

        const DIAGNOSTIC: &str = "ERR_PNPM_PEER_DEP_ISSUES unmet peer react@18";

        let mut mock = MockProcessRunner::new();
        mock.expect_command("pnpm")
            .returns_stdout(r#"{"name":"pnpm:stats","added":1}"#)
            .returns_stderr(DIAGNOSTIC)
            .exit_delay(Duration::from_millis(50))
            .returns_success()
            .finish();

        let captured = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(Capture(captured.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let outcome = supervisor(&mock)
            .supervise(command(), futures::future::pending())
            .await
            .unwrap();

        let seen_before_outcome = captured.lock().unwrap().clone();
        assert!(!seen_before_outcome.is_empty());
        assert!(seen_before_outcome.iter().all(|m| !m.contains(DIAGNOSTIC)));
        assert!(outcome
            .summary()
            .log_entries
            .iter()
            .all(|e| !e.message.contains(DIAGNOSTIC)));
        assert_eq!(outcome.diagnostics().lines(), &[DIAGNOSTIC.to_string()]);

        crate::install::report::emit(&outcome, "pnpm");
        assert!(captured
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.contains(DIAGNOSTIC)));
    }
}
