//! Application-wide error types.

use std::path::PathBuf;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Every variant that can end a job is rendered into the job's `error` text
/// through `Display`, so messages are written for the person looking at the
/// queue rather than for a log parser.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Converter not found or not executable: {binary}")]
    ConverterNotFound { binary: String },

    #[error("File already exists: {}", path.display())]
    DestinationConflict { path: PathBuf },

    #[error("{}", exit_failure_message(*code, tail))]
    ConverterExitFailure { code: Option<i32>, tail: String },

    #[error("Failed to launch converter: {0}")]
    LaunchFailure(#[source] std::io::Error),

    #[error("Unsupported format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("File is empty or invalid: {}", path.display())]
    InvalidSource { path: PathBuf },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

fn exit_failure_message(code: Option<i32>, tail: &str) -> String {
    let status = match code {
        Some(c) => format!("exit code {}", c),
        None => "termination by signal".to_string(),
    };
    if tail.is_empty() {
        format!("Converter finished with {}", status)
    } else {
        format!("Converter finished with {}. Log: {}", status, tail)
    }
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Classify a spawn error: a missing or non-executable binary is a
    /// configuration problem the user can fix, anything else is an OS failure.
    pub fn from_spawn(binary: impl Into<String>, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Self::ConverterNotFound {
                    binary: binary.into(),
                }
            }
            _ => Self::LaunchFailure(err),
        }
    }
}
