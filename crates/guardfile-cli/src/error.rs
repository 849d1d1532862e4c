//! Errors surfaced by the guardfile binary

use guardfile::{ConfigError, FileError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: FileError,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot read snapshot {path}: {source}")]
    SnapshotRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid snapshot {path}: {source}")]
    SnapshotParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn file(path: impl Into<PathBuf>, source: FileError) -> Self {
        CliError::File {
            path: path.into(),
            source,
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::File { source, .. } => source.code(),
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_errors_exit_with_their_code() {
        let err = CliError::file("/tmp/x", FileError::InsecurePath);
        assert_eq!(err.exit_code(), FileError::InsecurePath.code());
        assert_ne!(err.exit_code(), 0);
        assert!(err.to_string().starts_with("/tmp/x: "));
    }

    #[test]
    fn test_other_errors_exit_with_one() {
        let err = CliError::Io(std::io::Error::other("boom"));
        assert_eq!(err.exit_code(), 1);
    }
}
