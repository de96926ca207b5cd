//! Subprocess abstraction for driving external tools.
//!
//! A [`ProcessRunner`] spawns a command and hands back a [`ProcessStream`]:
//! framed stdout records, framed stderr records and an exit-status future,
//! each of which can be awaited independently. Tests swap in
//! [`MockProcessRunner`] through [`SubprocessManager`].

pub mod builder;
pub mod error;
pub mod framing;
pub mod mock;
pub mod runner;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use framing::{LineFramer, DEFAULT_MAX_LINE_LENGTH};
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{
    ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, ProcessStatusFut, ProcessStream,
    ProcessStreamFut, ProcessTerminator, TokioProcessRunner,
};

use std::sync::Arc;

#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn ProcessRunner>,
}

impl SubprocessManager {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    pub fn production() -> Self {
        Self::new(Arc::new(TokioProcessRunner))
    }

    pub fn mock() -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        let runner = Arc::new(mock.clone()) as Arc<dyn ProcessRunner>;
        (Self::new(runner), mock)
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }
}
