use async_trait::async_trait;
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::error::ProcessError;
use super::runner::{
    ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, ProcessStream, ProcessStreamFut,
    ProcessTerminator,
};

/// Scripted process runner for tests.
///
/// Each expectation describes the records a fake process writes to stdout
/// and stderr, how long it takes, and how it exits.
#[derive(Clone)]
pub struct MockProcessRunner {
    expectations: Arc<Mutex<Vec<MockExpectation>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
    terminated: Arc<AtomicBool>,
}

struct MockExpectation {
    program: String,
    #[allow(clippy::type_complexity)]
    args_matcher: Option<Box<dyn Fn(&[String]) -> bool + Send + Sync>>,
    response: MockResponse,
    times_called: usize,
    expected_times: Option<usize>,
}

#[derive(Clone)]
struct MockResponse {
    stdout: Vec<Vec<u8>>,
    stderr: Vec<Vec<u8>>,
    status: ExitStatus,
    line_delay: Option<Duration>,
    exit_delay: Option<Duration>,
    spawn_error: Option<std::io::ErrorKind>,
}

pub struct MockCommandConfig {
    runner: MockProcessRunner,
    expectation: MockExpectation,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            call_history: Arc::new(Mutex::new(Vec::new())),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn expect_command(&mut self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            expectation: MockExpectation {
                program: program.to_string(),
                args_matcher: None,
                response: MockResponse {
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    status: ExitStatus::Success,
                    line_delay: None,
                    exit_delay: None,
                    spawn_error: None,
                },
                times_called: 0,
                expected_times: None,
            },
        }
    }

    pub fn verify_called(&self, program: &str, times: usize) -> bool {
        let history = lock(&self.call_history);
        let count = history.iter().filter(|cmd| cmd.program == program).count();
        count == times
    }

    /// True once a streaming process was stopped through its terminator
    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn next_response(&self, command: &ProcessCommand) -> Result<MockResponse, ProcessError> {
        lock(&self.call_history).push(command.clone());

        let mut expectations = lock(&self.expectations);

        for expectation in expectations.iter_mut() {
            if expectation.program != command.program {
                continue;
            }

            if let Some(ref args_matcher) = expectation.args_matcher {
                if !(args_matcher)(&command.args) {
                    continue;
                }
            }

            expectation.times_called += 1;

            if let Some(expected) = expectation.expected_times {
                if expectation.times_called > expected {
                    return Err(ProcessError::MockExpectationNotMet(format!(
                        "Command '{}' called {} times, expected {}",
                        command.program, expectation.times_called, expected
                    )));
                }
            }

            if let Some(kind) = expectation.response.spawn_error {
                let error = std::io::Error::new(kind, "mock spawn failure");
                return Err(ProcessError::from_spawn(
                    error,
                    &command.program,
                    command.display(),
                ));
            }

            return Ok(expectation.response.clone());
        }

        Err(ProcessError::MockExpectationNotMet(format!(
            "No expectation found for command: {} {:?}",
            command.program, command.args
        )))
    }

    fn scripted_stream(
        records: Vec<Vec<u8>>,
        delay: Option<Duration>,
        stopped: Arc<AtomicBool>,
    ) -> ProcessStreamFut {
        Box::pin(
            futures::stream::iter(records)
                .then(move |record| async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    record
                })
                .take_while(move |_| {
                    let running = !stopped.load(Ordering::SeqCst);
                    async move { running }
                })
                .map(Ok),
        ) as ProcessStreamFut
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let response = self.next_response(&command)?;
        let join = |records: &[Vec<u8>]| {
            records
                .iter()
                .map(|r| String::from_utf8_lossy(r).to_string())
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(ProcessOutput {
            status: response.status,
            stdout: join(&response.stdout),
            stderr: join(&response.stderr),
        })
    }

    async fn run_streaming(&self, command: ProcessCommand) -> Result<ProcessStream, ProcessError> {
        let response = self.next_response(&command)?;
        let stopped = Arc::new(AtomicBool::new(false));

        let stdout = Self::scripted_stream(response.stdout, response.line_delay, stopped.clone());
        let stderr = Self::scripted_stream(response.stderr, response.line_delay, stopped.clone());

        let (terminator, mut terminate_rx) = ProcessTerminator::channel();
        let terminated = self.terminated.clone();
        let exit_delay = response.exit_delay;
        let exit_status = response.status;

        let status = Box::pin(async move {
            let exit = async {
                if let Some(delay) = exit_delay {
                    tokio::time::sleep(delay).await;
                }
            };

            tokio::select! {
                _ = exit => Ok(exit_status),
                Ok(()) = &mut terminate_rx => {
                    stopped.store(true, Ordering::SeqCst);
                    terminated.store(true, Ordering::SeqCst);
                    Ok(ExitStatus::Terminated)
                }
            }
        });

        Ok(ProcessStream {
            stdout,
            stderr,
            status,
            terminator,
        })
    }
}

impl MockCommandConfig {
    pub fn with_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.expectation.args_matcher = Some(Box::new(matcher));
        self
    }

    /// Script stdout, one record per line of `stdout`
    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        self.expectation
            .response
            .stdout
            .extend(stdout.lines().map(|l| l.as_bytes().to_vec()));
        self
    }

    /// Script stderr, one record per line of `stderr`
    pub fn returns_stderr(mut self, stderr: &str) -> Self {
        self.expectation
            .response
            .stderr
            .extend(stderr.lines().map(|l| l.as_bytes().to_vec()));
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.expectation.response.status = if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        };
        self
    }

    pub fn returns_status(mut self, status: ExitStatus) -> Self {
        self.expectation.response.status = status;
        self
    }

    pub fn returns_success(mut self) -> Self {
        self.expectation.response.status = ExitStatus::Success;
        self
    }

    /// Delay before each output record
    pub fn line_delay(mut self, delay: Duration) -> Self {
        self.expectation.response.line_delay = Some(delay);
        self
    }

    /// Delay before the exit status resolves
    pub fn exit_delay(mut self, delay: Duration) -> Self {
        self.expectation.response.exit_delay = Some(delay);
        self
    }

    /// Make spawning fail with the given IO error kind
    pub fn fails_to_spawn(mut self, kind: std::io::ErrorKind) -> Self {
        self.expectation.response.spawn_error = Some(kind);
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.expectation.expected_times = Some(n);
        self
    }

    pub fn finish(self) {
        lock(&self.runner.expectations).push(self.expectation);
    }
}

impl Default for MockProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}
