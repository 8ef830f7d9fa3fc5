//! Error types for metadata parsing and generation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or writing archive metadata.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A control file line that fits no known shape.
    #[error("malformed line in {}: {line:?}", .file.display())]
    MalformedLine {
        /// File being parsed.
        file: PathBuf,
        /// Offending line.
        line: String,
    },

    /// A required control field is absent.
    #[error("missing field {field} in {}", .file.display())]
    MissingField {
        /// File being parsed.
        file: PathBuf,
        /// Field name.
        field: &'static str,
    },

    /// A field value that could not be interpreted.
    #[error("invalid value for {field}: {value:?}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// A version string that is not a valid Debian version.
    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion {
        /// Offending version string.
        version: String,
        /// Parser detail.
        reason: String,
    },

    /// A referenced file is not present on disk yet.
    #[error("file {} not present", .0.display())]
    FileMissing(PathBuf),

    /// A referenced file exists but has the wrong length.
    #[error("file {} has size {actual}, expected {expected}", .file.display())]
    SizeMismatch {
        /// File checked.
        file: PathBuf,
        /// Size found on disk.
        actual: u64,
        /// Size declared in the manifest.
        expected: u64,
    },

    /// A referenced file exists but its checksum does not match.
    #[error("checksum mismatch for {}", .file.display())]
    ChecksumMismatch {
        /// File checked.
        file: PathBuf,
    },
}

/// Result alias for metadata operations.
pub type Result<T> = std::result::Result<T, MetadataError>;
