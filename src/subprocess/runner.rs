use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::oneshot;

use super::error::ProcessError;
use super::framing::{LineFramer, DEFAULT_MAX_LINE_LENGTH};

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    /// Per-record limit applied when framing stdout and stderr
    pub max_line_length: Option<usize>,
    /// Time between SIGTERM and SIGKILL when the process is stopped early
    pub kill_grace: Duration,
}

impl ProcessCommand {
    /// Command line as a single string, for logs and error messages
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Timeout,
    Signal(i32),
    /// Stopped through [`ProcessTerminator::terminate`]
    Terminated,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            _ => None,
        }
    }
}

pub type ProcessStreamItem = Result<Vec<u8>, ProcessError>;
pub type ProcessStreamFut = Pin<Box<dyn Stream<Item = ProcessStreamItem> + Send>>;
pub type ProcessStatusFut =
    Pin<Box<dyn futures::Future<Output = Result<ExitStatus, ProcessError>> + Send>>;

/// A running process split into three independently awaitable parts
pub struct ProcessStream {
    pub stdout: ProcessStreamFut,
    pub stderr: ProcessStreamFut,
    pub status: ProcessStatusFut,
    pub terminator: ProcessTerminator,
}

/// Requests early termination of a process whose status future is still pending
#[derive(Debug)]
pub struct ProcessTerminator {
    sender: Option<oneshot::Sender<()>>,
}

impl ProcessTerminator {
    /// Create a terminator and the receiver the status future listens on
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { sender: Some(tx) }, rx)
    }

    /// Ask the process to stop. Only the first call has an effect.
    pub fn terminate(&mut self) -> bool {
        match self.sender.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
    async fn run_streaming(&self, command: ProcessCommand) -> Result<ProcessStream, ProcessError>;
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    /// Create a framed record stream from a child pipe
    fn create_record_stream<R>(pipe: R, max_line_length: Option<usize>, command: String) -> ProcessStreamFut
    where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
    {
        let framer = LineFramer::new(tokio::io::BufReader::new(pipe))
            .with_max_line_length(max_line_length);

        Box::pin(framer.into_stream().map(move |item| {
            item.map_err(|source| ProcessError::IoError {
                command: command.clone(),
                source,
            })
        })) as ProcessStreamFut
    }

    /// Convert process exit status to our ExitStatus enum
    fn parse_exit_status(status: std::process::ExitStatus) -> ExitStatus {
        if status.success() {
            ExitStatus::Success
        } else if let Some(code) = status.code() {
            ExitStatus::Error(code)
        } else {
            Self::parse_signal_status(status)
        }
    }

    /// Parse signal status on Unix systems
    #[cfg(unix)]
    fn parse_signal_status(status: std::process::ExitStatus) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            ExitStatus::Signal(signal)
        } else {
            ExitStatus::Error(1)
        }
    }

    #[cfg(not(unix))]
    fn parse_signal_status(_status: std::process::ExitStatus) -> ExitStatus {
        ExitStatus::Error(1)
    }

    /// Create the status future. It resolves when the process exits, when the
    /// timeout elapses, or when the terminator fires; the latter two stop the
    /// whole process group first.
    fn create_status_future(
        mut child: tokio::process::Child,
        timeout: Option<Duration>,
        kill_grace: Duration,
        mut terminate_rx: oneshot::Receiver<()>,
        command: String,
    ) -> ProcessStatusFut {
        Box::pin(async move {
            let deadline = async {
                match timeout {
                    Some(duration) => tokio::time::sleep(duration).await,
                    None => futures::future::pending::<()>().await,
                }
            };
            tokio::pin!(deadline);

            let interrupted = tokio::select! {
                status = child.wait() => {
                    return status
                        .map(Self::parse_exit_status)
                        .map_err(|source| ProcessError::IoError { command, source });
                }
                _ = &mut deadline => {
                    tracing::warn!("Subprocess timed out after {:?}: {}", timeout.unwrap_or_default(), command);
                    ExitStatus::Timeout
                }
                Ok(()) = &mut terminate_rx => {
                    tracing::debug!("Terminating subprocess on request: {}", command);
                    ExitStatus::Terminated
                }
            };

            Self::terminate_child(&mut child, kill_grace).await;
            Ok(interrupted)
        })
    }

    /// Stop a child and everything it spawned
    async fn terminate_child(child: &mut tokio::process::Child, grace: Duration) {
        // On Unix, signal the whole process group so helpers spawned by the
        // installer release the output pipes too
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                use nix::sys::signal::{self, Signal};
                use nix::unistd::Pid;

                let pgid = Pid::from_raw(-(pid as i32));
                let _ = signal::kill(pgid, Signal::SIGTERM);

                if tokio::time::timeout(grace, child.wait()).await.is_err() {
                    let _ = signal::kill(pgid, Signal::SIGKILL);
                }
            }
        }

        if let Err(e) = child.kill().await {
            tracing::trace!("Kill after termination returned: {}", e);
        }
    }

    /// Log command execution details
    fn log_command_start(command: &ProcessCommand) {
        tracing::debug!("Executing subprocess: {}", command.display());

        if !command.env.is_empty() {
            tracing::trace!("Extra environment variables: {:?}", command.env.keys());
        }

        if let Some(ref dir) = command.working_dir {
            tracing::trace!("Working directory: {:?}", dir);
        }
    }

    /// Configure the command with environment, working directory and pipes
    fn configure_command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);

        // New process group so termination reaches the installer's children
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        cmd.args(&command.args);
        cmd.envs(&command.env);

        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    fn spawn(command: &ProcessCommand) -> Result<tokio::process::Child, ProcessError> {
        Self::configure_command(command).spawn().map_err(|e| {
            tracing::error!(
                "Failed to spawn '{}': {:?} (kind: {:?})",
                command.program,
                e,
                e.kind()
            );
            ProcessError::from_spawn(e, &command.program, command.display())
        })
    }

    /// Extract a stream from a child process, converting None to error
    fn extract_stream<T>(stream: Option<T>, stream_name: &str) -> Result<T, ProcessError> {
        stream.ok_or_else(|| ProcessError::InternalError {
            message: format!("Failed to capture {}", stream_name),
        })
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        Self::log_command_start(&command);

        let child = Self::spawn(&command)?;
        let output = match command.timeout {
            Some(duration) => match tokio::time::timeout(duration, child.wait_with_output()).await {
                Ok(result) => result.map_err(ProcessError::Io)?,
                Err(_) => {
                    return Ok(ProcessOutput {
                        status: ExitStatus::Timeout,
                        stdout: String::new(),
                        stderr: String::new(),
                    })
                }
            },
            None => child.wait_with_output().await.map_err(ProcessError::Io)?,
        };

        Ok(ProcessOutput {
            status: Self::parse_exit_status(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn run_streaming(&self, command: ProcessCommand) -> Result<ProcessStream, ProcessError> {
        Self::log_command_start(&command);

        let mut child = Self::spawn(&command)?;
        let limit = command.max_line_length;

        let stdout = Self::extract_stream(child.stdout.take(), "stdout")?;
        let stderr = Self::extract_stream(child.stderr.take(), "stderr")?;
        let stdout = Self::create_record_stream(stdout, limit, command.display());
        let stderr = Self::create_record_stream(stderr, limit, command.display());

        let (terminator, terminate_rx) = ProcessTerminator::channel();
        let status = Self::create_status_future(
            child,
            command.timeout,
            command.kill_grace,
            terminate_rx,
            command.display(),
        );

        Ok(ProcessStream {
            stdout,
            stderr,
            status,
            terminator,
        })
    }
}

impl Default for ProcessCommand {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            timeout: None,
            max_line_length: Some(DEFAULT_MAX_LINE_LENGTH),
            kill_grace: Duration::from_millis(100),
        }
    }
}
