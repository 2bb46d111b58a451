//! Engine error types.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use vcd_models::ManifestError;
use vcd_process::ProcessError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse classification reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed command input or an invalid request
    Argument,
    /// Executable missing or unstartable
    Spawn,
    /// A tool exited with a non-zero code
    StageExecution,
    /// Malformed manifest or detections file
    Parse,
    /// An expected artifact is missing
    NotFound,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Argument => "ArgumentError",
            ErrorKind::Spawn => "SpawnError",
            ErrorKind::StageExecution => "StageExecutionError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Invalid database manifest {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },

    #[error("{}:{line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Process(e) => process_kind(e),
            EngineError::Manifest { source, .. } => match source {
                ManifestError::Io { source, .. }
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    ErrorKind::NotFound
                }
                ManifestError::Io { .. } => ErrorKind::Internal,
                _ => ErrorKind::Parse,
            },
            EngineError::Parse { .. } => ErrorKind::Parse,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::InvalidRequest(_) => ErrorKind::Argument,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::Io(_) | EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

fn process_kind(error: &ProcessError) -> ErrorKind {
    match error {
        ProcessError::InvalidArgument(_) => ErrorKind::Argument,
        ProcessError::Spawn { .. } | ProcessError::ToolNotFound { .. } => ErrorKind::Spawn,
        ProcessError::ExitFailure { .. } => ErrorKind::StageExecution,
        ProcessError::Cancelled { .. } => ErrorKind::Cancelled,
        ProcessError::ToolCheck { source, .. } => process_kind(source),
        ProcessError::TaskFailed(_) | ProcessError::Io(_) => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kinds() {
        let stage = EngineError::from(ProcessError::ExitFailure {
            command: "pvcd_detect -detect".to_string(),
            tool: "pvcd_detect".to_string(),
            exit_code: Some(7),
            elapsed: Duration::from_millis(10),
        });
        assert_eq!(stage.kind(), ErrorKind::StageExecution);
        assert!(stage.to_string().contains("code=7"));

        assert_eq!(EngineError::parse("d.txt", 3, "bad").kind(), ErrorKind::Parse);
        assert_eq!(EngineError::parse("d.txt", 3, "bad").to_string(), "d.txt:3: bad");
        assert_eq!(EngineError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(EngineError::invalid_request("x").kind(), ErrorKind::Argument);
        assert!(EngineError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_manifest_kinds() {
        let duplicate = EngineError::Manifest {
            path: PathBuf::from("db/files.txt"),
            source: ManifestError::DuplicateObject {
                line: 2,
                obj_id: "a".to_string(),
            },
        };
        assert_eq!(duplicate.kind(), ErrorKind::Parse);

        let missing = EngineError::Manifest {
            path: PathBuf::from("db/files.txt"),
            source: ManifestError::Io {
                path: PathBuf::from("db/files.txt"),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
        };
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }
}
