//! Manifest signature verification.

use crate::error::{DinstallError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Checks the signature on an upload manifest.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Verify the manifest at `path`; an error carries the verifier output.
    async fn verify(&self, path: &Path) -> Result<()>;
}

/// Verifier shelling out to `gpgv` with the configured keyrings.
pub struct GpgVerifier {
    command: String,
    keyrings: Vec<PathBuf>,
}

impl GpgVerifier {
    /// Create a verifier using the `gpgv` binary from `$PATH`.
    pub fn new(keyrings: Vec<PathBuf>) -> Self {
        Self {
            command: "gpgv".to_string(),
            keyrings,
        }
    }

    /// Override the verifier binary. Used by tests to substitute a stub.
    pub fn with_command(command: impl Into<String>, keyrings: Vec<PathBuf>) -> Self {
        Self {
            command: command.into(),
            keyrings,
        }
    }
}

#[async_trait]
impl SignatureVerifier for GpgVerifier {
    async fn verify(&self, path: &Path) -> Result<()> {
        let mut command = Command::new(&self.command);
        for keyring in &self.keyrings {
            command.arg("--keyring").arg(keyring);
        }
        command.arg(path);
        debug!("running {:?}", command);
        let output = command
            .output()
            .await
            .map_err(|e| DinstallError::SignatureInvalid {
                file: path.to_path_buf(),
                detail: format!("failed to run {}: {}", self.command, e),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DinstallError::SignatureInvalid {
                file: path.to_path_buf(),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// Verifier that accepts everything. Stands in when verification is
/// disabled by policy and in tests.
pub struct AcceptAllVerifier;

#[async_trait]
impl SignatureVerifier for AcceptAllVerifier {
    async fn verify(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}
