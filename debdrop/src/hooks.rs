//! External hook script execution.
//!
//! Hooks are executables invoked with a single file argument: pre/post
//! install scripts and the Release signing script. Zero exit means success.

use crate::error::{DinstallError, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// Expand a leading `~/` against `$HOME`.
fn expand_user(script: &Path) -> PathBuf {
    if let Ok(stripped) = script.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    script.to_path_buf()
}

/// Run `script <arg>`, optionally from `cwd`.
pub async fn run_script(script: &Path, arg: &OsStr, cwd: Option<&Path>) -> Result<()> {
    let script = expand_user(script);
    info!("running {} {}", script.display(), arg.to_string_lossy());

    let mut command = Command::new(&script);
    command.arg(arg);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    let status = command
        .status()
        .await
        .map_err(|e| DinstallError::HookFailed {
            script: script.clone(),
            detail: e.to_string(),
        })?;
    if !status.success() {
        return Err(DinstallError::HookFailed {
            script,
            detail: format!("exited with {}", status),
        });
    }
    Ok(())
}
