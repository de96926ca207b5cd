use crate::error::{BridgeError, ErrorCode};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Permission denied executing {0}")]
    PermissionDenied(String),

    #[error("Failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error while running {command}: {source}")]
    IoError {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}

impl ProcessError {
    /// Classify an error returned by `Command::spawn`
    pub fn from_spawn(error: std::io::Error, program: &str, command: String) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::CommandNotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.to_string()),
            _ => Self::SpawnFailed {
                command,
                source: error,
            },
        }
    }
}

/// Convert ProcessError to BridgeError
impl From<ProcessError> for BridgeError {
    fn from(err: ProcessError) -> Self {
        let (code, program) = match &err {
            ProcessError::CommandNotFound(program) => {
                (ErrorCode::EXEC_COMMAND_NOT_FOUND, Some(program.clone()))
            }
            ProcessError::PermissionDenied(program) => {
                (ErrorCode::EXEC_PERMISSION_DENIED, Some(program.clone()))
            }
            ProcessError::SpawnFailed { command, .. } => {
                (ErrorCode::EXEC_SPAWN_FAILED, Some(command.clone()))
            }
            ProcessError::IoError { .. } | ProcessError::Io(_) => {
                (ErrorCode::EXEC_OUTPUT_ERROR, None)
            }
            ProcessError::InternalError { .. } => (ErrorCode::OTHER_INTERNAL_ERROR, None),
            ProcessError::MockExpectationNotMet(_) => (ErrorCode::EXEC_GENERIC, None),
        };

        BridgeError::spawn_with_code(code, err.to_string(), program).with_source(err)
    }
}
