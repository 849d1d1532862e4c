//! Error types for the guardfile library

use std::path::PathBuf;
use thiserror::Error;

/// Outcome of a secure file operation that did not succeed
///
/// This is a closed set: every failure the open, I/O and delete paths can
/// report maps to exactly one variant. Success is represented by `Ok(..)`
/// and by `None` from [`SecureFile::last_error`](crate::SecureFile::last_error).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileError {
    // Contract violations
    #[error("invalid file handle")]
    InvalidHandle,

    #[error("invalid parameter")]
    InvalidParameter,

    #[error("invalid open mode")]
    InvalidMode,

    #[error("buffer too small for requested transfer")]
    BufferTooSmall,

    // Path and identity validation
    #[error("file does not exist or is not a regular file")]
    InvalidFile,

    #[error("path could not be resolved")]
    InvalidPath,

    #[error("file already exists")]
    FileAlreadyExists,

    #[error("directory chain is not secure")]
    InsecurePath,

    #[error("file extension is not allowed")]
    InvalidFileExtension,

    #[error("file attributes do not match the expected attributes")]
    InvalidFileAttributes,

    #[error("file unique identifier does not match")]
    InvalidFileUniqueId,

    // Stream conditions
    #[error("end of file reached")]
    EndOfFile,

    #[error("read/write error")]
    ReadWriteError,

    #[error("seek failed")]
    SeekFailure,

    #[error("flush failed")]
    FlushFailure,

    #[error("disk full")]
    DiskFull,

    #[error("failure closing file")]
    FailureClosingFile,

    #[error("cannot remove file: still open")]
    CannotRemoveFileStillOpen,

    #[error("operation failed")]
    Failure,
}

/// Broad classes of failure, used to decide whether a caller may retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller bug: bad argument, bad mode, unusable handle. Never retried.
    Contract,
    /// Environment or identity check failed. Always fatal to the attempt.
    Security,
    /// Stream condition the caller may retry or handle (EOF, disk full).
    Transient,
    /// Resource problem not attributable to the caller.
    Resource,
}

impl FileError {
    /// Stable numeric code. `0` is reserved for success.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            FileError::InvalidHandle => 1,
            FileError::InvalidFile => 2,
            FileError::InvalidPath => 3,
            FileError::InvalidParameter => 4,
            FileError::InvalidMode => 5,
            FileError::FileAlreadyExists => 6,
            FileError::InsecurePath => 7,
            FileError::InvalidFileExtension => 8,
            FileError::InvalidFileAttributes => 9,
            FileError::InvalidFileUniqueId => 10,
            FileError::BufferTooSmall => 11,
            FileError::EndOfFile => 12,
            FileError::ReadWriteError => 13,
            FileError::SeekFailure => 14,
            FileError::FlushFailure => 15,
            FileError::DiskFull => 16,
            FileError::FailureClosingFile => 17,
            FileError::CannotRemoveFileStillOpen => 18,
            FileError::Failure => 19,
        }
    }

    /// Classify this error.
    ///
    /// Every variant is matched explicitly so a new variant cannot fall into
    /// the wrong class unnoticed.
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        match self {
            FileError::InvalidHandle
            | FileError::InvalidParameter
            | FileError::InvalidMode
            | FileError::BufferTooSmall => ErrorCategory::Contract,
            FileError::InvalidFile
            | FileError::InvalidPath
            | FileError::FileAlreadyExists
            | FileError::InsecurePath
            | FileError::InvalidFileExtension
            | FileError::InvalidFileAttributes
            | FileError::InvalidFileUniqueId
            | FileError::CannotRemoveFileStillOpen => ErrorCategory::Security,
            FileError::EndOfFile
            | FileError::ReadWriteError
            | FileError::SeekFailure
            | FileError::FlushFailure
            | FileError::DiskFull => ErrorCategory::Transient,
            FileError::FailureClosingFile | FileError::Failure => ErrorCategory::Resource,
        }
    }

    /// True for errors caused by the caller violating the API contract
    #[must_use]
    pub fn is_contract_violation(self) -> bool {
        self.category() == ErrorCategory::Contract
    }
}

/// Errors loading a [`SecurityPolicy`](crate::SecurityPolicy)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read policy at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Policy parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid policy value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

/// Result type alias for secure file operations
pub type Result<T> = std::result::Result<T, FileError>;
