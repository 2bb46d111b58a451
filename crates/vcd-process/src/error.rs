//! Error types for command building and process supervision.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors that can occur while building or running an external command.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Invalid command argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command {tool} error code={} ({} ms): {command}", display_code(.exit_code), .elapsed.as_millis())]
    ExitFailure {
        command: String,
        tool: String,
        exit_code: Option<i32>,
        elapsed: Duration,
    },

    #[error("Command cancelled after {} ms: {command}", .elapsed.as_millis())]
    Cancelled { command: String, elapsed: Duration },

    #[error("{tool} not found: {}", .path.display())]
    ToolNotFound { tool: String, path: PathBuf },

    #[error("error running {tool}. {source}")]
    ToolCheck {
        tool: String,
        #[source]
        source: Box<ProcessError>,
    },

    #[error("Supervisor task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl ProcessError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::ToolNotFound {
            tool: tool.into(),
            path: path.into(),
        }
    }

    /// Exit code of a failed stage, if the process exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitFailure { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_failure_message() {
        let err = ProcessError::ExitFailure {
            command: "pvcd_db -new".to_string(),
            tool: "pvcd_db".to_string(),
            exit_code: Some(7),
            elapsed: Duration::from_millis(1250),
        };
        assert_eq!(err.exit_code(), Some(7));
        assert_eq!(
            err.to_string(),
            "command pvcd_db error code=7 (1250 ms): pvcd_db -new"
        );
    }

    #[test]
    fn test_killed_by_signal() {
        let err = ProcessError::ExitFailure {
            command: "sleep 5".to_string(),
            tool: "sleep".to_string(),
            exit_code: None,
            elapsed: Duration::from_millis(3),
        };
        assert!(err.to_string().contains("code=signal"));
        assert!(!err.is_cancelled());
    }
}
