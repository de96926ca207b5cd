use std::path::PathBuf;
use thiserror::Error;

pub mod codes;

pub use codes::{describe_error_code, ErrorCode};

/// Errors that abort an install before an outcome exists.
///
/// Everything that happens after the installer is running is reported through
/// [`crate::install::InstallOutcome`] instead.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Failed to start installer: {message}")]
    Spawn {
        code: u16,
        message: String,
        program: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BridgeError {
    /// Create a configuration error with specific code and path
    pub fn config_with_code(code: u16, message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            path,
            source: None,
        }
    }

    /// Create a spawn error with specific code
    pub fn spawn_with_code(code: u16, message: impl Into<String>, program: Option<String>) -> Self {
        Self::Spawn {
            code,
            message: message.into(),
            program,
            source: None,
        }
    }

    /// Create a generic other error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Spawn { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
        }
        self
    }

    /// Get the process exit code the CLI uses for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::Spawn { .. } => 2,
            Self::Other { .. } => 1,
        }
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. } | Self::Spawn { code, .. } | Self::Other { code, .. } => {
                *code
            }
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, path, .. } => match path {
                Some(p) => format!("Configuration problem in {}: {}", p.display(), message),
                None => format!("Configuration problem: {}", message),
            },
            Self::Spawn {
                message, program, ..
            } => match program {
                Some(p) => format!("Could not start '{}': {}", p, message),
                None => format!("Could not start installer: {}", message),
            },
            Self::Other { message, .. } => message.clone(),
        }
    }

    /// True when the installer was never started
    pub fn is_spawn_error(&self) -> bool {
        matches!(self, Self::Spawn { .. })
    }
}
