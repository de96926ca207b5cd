//! Package installation through an external package manager.
//!
//! [`PnpmInstaller`] spawns `pnpm install --reporter ndjson`, turns its
//! structured stdout into an [`InstallSummary`], keeps stderr verbatim in a
//! [`DiagnosticBuffer`] and joins both with the exit status into an
//! [`InstallOutcome`].

pub mod aggregator;
pub mod diagnostics;
pub mod reconciler;
pub mod report;
pub mod specifier;
pub mod supervisor;

pub use aggregator::{Aggregator, InstallSummary, LogEntry};
pub use diagnostics::{DiagnosticBuffer, DiagnosticCollector};
pub use reconciler::{FailureReason, InstallOutcome, Reconciler, ReconcilerState};
pub use specifier::ModuleRequest;
pub use supervisor::ProcessSupervisor;

use async_trait::async_trait;
use futures::Future;
use std::path::PathBuf;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, ErrorCode};
use crate::subprocess::{ProcessCommand, ProcessCommandBuilder, SubprocessManager};

/// One install call. Consumed when the call starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub modules: Vec<ModuleRequest>,
    pub cwd: PathBuf,
    /// Manifest the modules are being installed for
    pub package_path: Option<PathBuf>,
    pub save_dev: bool,
}

impl InstallRequest {
    pub fn new(modules: Vec<ModuleRequest>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            modules,
            cwd: cwd.into(),
            package_path: None,
            save_dev: false,
        }
    }

    pub fn with_package_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.package_path = Some(path.into());
        self
    }

    pub fn save_dev(mut self, save_dev: bool) -> Self {
        self.save_dev = save_dev;
        self
    }
}

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install the requested modules.
    ///
    /// `Err` means the installer could not be started; every other problem
    /// is reported as [`InstallOutcome::Failure`].
    async fn install(&self, request: InstallRequest) -> Result<InstallOutcome, BridgeError>;
}

pub struct PnpmInstaller {
    subprocess: SubprocessManager,
    config: BridgeConfig,
}

impl PnpmInstaller {
    pub fn new(subprocess: SubprocessManager, config: BridgeConfig) -> Self {
        Self { subprocess, config }
    }

    /// Like [`PackageInstaller::install`], but gives up as soon as `cancel`
    /// resolves. A cancelled install is always a failure.
    pub async fn install_with_cancellation<C>(
        &self,
        request: InstallRequest,
        cancel: C,
    ) -> Result<InstallOutcome, BridgeError>
    where
        C: Future<Output = ()> + Send,
    {
        let command = self.build_command(&request)?;
        if let Some(manifest) = &request.package_path {
            tracing::debug!("Installing for manifest {}", manifest.display());
        }
        tracing::info!(
            "Installing {} module(s) with {}",
            request.modules.len(),
            self.config.program
        );

        let outcome = ProcessSupervisor::new(self.subprocess.runner(), self.config.program.as_str())
            .with_strict_protocol(self.config.strict_protocol)
            .supervise(command, cancel)
            .await?;

        tracing::debug!(
            "Install finished: success={} added={} removed={}",
            outcome.is_success(),
            outcome.summary().added_count,
            outcome.summary().removed_count
        );
        Ok(outcome)
    }

    /// Ask the installer for its version
    pub async fn version(&self) -> Result<String, BridgeError> {
        let command = ProcessCommandBuilder::new(&self.config.program)
            .arg("--version")
            .envs(&self.config.env)
            .timeout(self.config.timeout)
            .build();

        let output = self.subprocess.runner().run(command).await?;
        if !output.status.success() {
            return Err(BridgeError::other(format!(
                "{} --version failed: {}",
                self.config.program,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// `install --reporter <fmt> [--dev] <specifier>...`
    pub fn build_command(&self, request: &InstallRequest) -> Result<ProcessCommand, BridgeError> {
        if request.modules.is_empty() {
            return Err(BridgeError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "no modules to install",
                None,
            ));
        }

        Ok(ProcessCommandBuilder::new(&self.config.program)
            .args(["install", "--reporter", self.config.reporter.as_str()])
            .arg_if(request.save_dev, "--dev")
            .args(request.modules.iter().map(ModuleRequest::npm_specifier))
            .envs(&self.config.env)
            .current_dir(&request.cwd)
            .timeout(self.config.timeout)
            .max_line_length(self.config.max_line_length)
            .kill_grace(self.config.kill_grace)
            .build())
    }
}

#[async_trait]
impl PackageInstaller for PnpmInstaller {
    async fn install(&self, request: InstallRequest) -> Result<InstallOutcome, BridgeError> {
        self.install_with_cancellation(request, futures::future::pending())
            .await
    }
}
