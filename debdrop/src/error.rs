//! Error types for the ingestion daemon.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while ingesting uploads or maintaining an archive.
#[derive(Error, Debug)]
pub enum DinstallError {
    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest or metadata handling failed.
    #[error(transparent)]
    Metadata(#[from] repo_metadata::MetadataError),

    /// Signature verification rejected the manifest.
    #[error("signature verification failed for {}: {detail}", .file.display())]
    SignatureInvalid {
        /// Manifest that failed verification.
        file: PathBuf,
        /// Verifier output.
        detail: String,
    },

    /// A manifest references a binary package for an architecture the
    /// archive does not carry.
    #[error("unknown architecture: {arch}")]
    UnknownArchitecture {
        /// Offending architecture.
        arch: String,
    },

    /// The manifest's distribution matches no configured archive or alias.
    #[error("unknown distribution {distribution:?} in {}", .file.display())]
    UnknownDistribution {
        /// Distribution named by the manifest.
        distribution: String,
        /// Manifest file.
        file: PathBuf,
    },

    /// A rename inside an installation transaction failed; the transaction
    /// has been rolled back.
    #[error("failed to rename {} to {}: {source}", .from.display(), .to.display())]
    RenameFailed {
        /// Source path of the failed rename.
        from: PathBuf,
        /// Destination path of the failed rename.
        to: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A hook script could not be run or exited non-zero.
    #[error("script {} failed: {detail}", .script.display())]
    HookFailed {
        /// Script path.
        script: PathBuf,
        /// Exit status or execution error.
        detail: String,
    },

    /// An external tool (indexer, verifier) exited non-zero.
    #[error("{tool} exited with {status}")]
    SubprocessFailed {
        /// Tool name.
        tool: String,
        /// Exit status description.
        status: String,
    },

    /// An upload never became complete within the retry window.
    #[error("couldn't install {} in {seconds} seconds", .file.display())]
    RetryTimeout {
        /// Manifest file.
        file: PathBuf,
        /// Configured maximum retry time.
        seconds: u64,
    },

    /// Configuration could not be loaded or resolved.
    #[error("configuration error: {0}")]
    Config(String),

    /// The lock file is held by a running process.
    #[error("lock file {} held by running process {pid}", .path.display())]
    LockHeld {
        /// Lock file path.
        path: PathBuf,
        /// Owning process.
        pid: i32,
    },

    /// The lock file exists but does not name a running process.
    #[error("lock file {} is stale or invalid: {detail}", .path.display())]
    LockInvalid {
        /// Lock file path.
        path: PathBuf,
        /// What was wrong with it.
        detail: String,
    },
}

/// Result alias for daemon operations.
pub type Result<T> = std::result::Result<T, DinstallError>;
