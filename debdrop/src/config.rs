//! Daemon configuration.
//!
//! Configuration is TOML: a `[global]` section for daemon-wide settings and
//! one `[distribution.<name>]` section per published distribution. All
//! per-distribution options have global defaults, so a minimal configuration
//! is just a toplevel directory. Settings are resolved once at startup into
//! [`ArchiveTarget`] values; nothing re-reads the configuration afterwards.

use crate::error::{DinstallError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn default_incoming_subdir() -> String {
    "incoming".to_string()
}

fn default_reject_subdir() -> String {
    "reject".to_string()
}

fn default_lockfile() -> String {
    "debdrop.lock".to_string()
}

fn default_socket_name() -> String {
    "debdrop.sock".to_string()
}

fn default_poll_time() -> u64 {
    30
}

fn default_max_retry_time() -> u64 {
    // two days
    2 * 24 * 60 * 60
}

fn default_architectures() -> Vec<String> {
    vec!["all".to_string(), "i386".to_string(), "amd64".to_string()]
}

fn default_true() -> bool {
    true
}

/// How an archive lays out its published files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveStyle {
    /// One shared directory for all architectures.
    Flat,
    /// One subdirectory per architecture plus `source/`.
    Subdir,
}

/// The `[global]` configuration section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Directory holding the incoming dir, the archives and the lock file.
    pub toplevel_dir: Option<PathBuf>,
    /// Incoming directory name under the toplevel.
    #[serde(default = "default_incoming_subdir")]
    pub incoming_subdir: String,
    /// Reject directory name under the toplevel.
    #[serde(default = "default_reject_subdir")]
    pub reject_subdir: String,
    /// Lock file name under the toplevel.
    #[serde(default = "default_lockfile")]
    pub lockfile: String,
    /// Control socket name under the toplevel.
    #[serde(default = "default_socket_name")]
    pub socket_name: String,
    /// Poll interval in seconds for the notifier fallback and the worker.
    #[serde(default = "default_poll_time")]
    pub poll_time: u64,
    /// How long an incomplete upload is retried before rejection, seconds.
    #[serde(default = "default_max_retry_time")]
    pub max_retry_time: u64,
    /// Whether installs trigger reindexing of the target archive.
    #[serde(default = "default_true")]
    pub trigger_reindex: bool,
    /// Use inotify where available; polling otherwise.
    #[serde(default = "default_true")]
    pub use_inotify: bool,
    /// Default for distributions that don't set `verify_sigs`.
    #[serde(default)]
    pub verify_sigs: bool,
    /// GPG keyrings passed to the verifier.
    #[serde(default)]
    pub keyrings: Vec<PathBuf>,
    /// Default archive layout style.
    #[serde(default = "default_archive_style")]
    pub archive_style: ArchiveStyle,
    /// Default architecture list.
    #[serde(default = "default_architectures")]
    pub architectures: Vec<String>,
}

fn default_archive_style() -> ArchiveStyle {
    ArchiveStyle::Flat
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            toplevel_dir: None,
            incoming_subdir: default_incoming_subdir(),
            reject_subdir: default_reject_subdir(),
            lockfile: default_lockfile(),
            socket_name: default_socket_name(),
            poll_time: default_poll_time(),
            max_retry_time: default_max_retry_time(),
            trigger_reindex: true,
            use_inotify: true,
            verify_sigs: false,
            keyrings: Vec::new(),
            archive_style: ArchiveStyle::Flat,
            architectures: default_architectures(),
        }
    }
}

/// One `[distribution.<name>]` section. Unset options fall back to the
/// global defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistributionConfig {
    /// Alternative distribution names that resolve to this archive.
    #[serde(default)]
    pub alias: Vec<String>,
    /// Architectures carried by this archive.
    pub architectures: Option<Vec<String>>,
    /// Layout style override.
    pub archive_style: Option<ArchiveStyle>,
    /// Whether uploads must carry a good signature.
    pub verify_sigs: Option<bool>,
    /// Keyrings for this archive's verifier.
    pub keyrings: Option<Vec<PathBuf>>,
    /// Keep superseded versions instead of retiring them.
    #[serde(default)]
    pub keep_old: bool,
    /// Tighten installed changes files to mode 0600.
    #[serde(default = "default_true")]
    pub chown_changes_files: bool,
    /// Generate a Release file per index pass.
    #[serde(default)]
    pub generate_release: bool,
    /// React to archive-directory changes with reindexing.
    #[serde(default = "default_true")]
    pub dynamic_reindex: bool,
    /// Mark the Release `NotAutomatic: yes`.
    #[serde(default)]
    pub experimental_release: bool,
    /// Release Origin field.
    pub release_origin: Option<String>,
    /// Release Label field.
    pub release_label: Option<String>,
    /// Release Suite field.
    pub release_suite: Option<String>,
    /// Release Codename field; defaults to the suite.
    pub release_codename: Option<String>,
    /// Release Description field.
    pub release_description: Option<String>,
    /// Script run over the generated Release file before publication.
    pub release_signscript: Option<PathBuf>,
    /// Script run before installation; non-zero exit rejects the upload.
    pub pre_install_script: Option<PathBuf>,
    /// Script run after installation; non-zero exit is logged only.
    pub post_install_script: Option<PathBuf>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Daemon-wide settings.
    #[serde(default)]
    pub global: GlobalConfig,
    /// Per-distribution sections.
    #[serde(default)]
    pub distribution: BTreeMap<String, DistributionConfig>,
}

/// A resolved distribution archive: filesystem roots plus policy.
#[derive(Debug, Clone)]
pub struct ArchiveTarget {
    /// Distribution name.
    pub name: String,
    /// Archive root directory.
    pub dir: PathBuf,
    /// Layout style.
    pub style: ArchiveStyle,
    /// Architectures carried by the archive.
    pub architectures: Vec<String>,
    /// Alias names resolving to this archive.
    pub aliases: Vec<String>,
    /// Verify upload signatures before installing.
    pub verify_sigs: bool,
    /// Keyrings for signature verification.
    pub keyrings: Vec<PathBuf>,
    /// Keep superseded versions.
    pub keep_old: bool,
    /// Tighten installed changes files to mode 0600.
    pub chown_changes_files: bool,
    /// Generate Release files.
    pub generate_release: bool,
    /// React to directory changes with reindexing.
    pub dynamic_reindex: bool,
    /// Mark Release files `NotAutomatic: yes`.
    pub experimental_release: bool,
    /// Release Origin field.
    pub release_origin: Option<String>,
    /// Release Label field.
    pub release_label: Option<String>,
    /// Release Suite field.
    pub release_suite: Option<String>,
    /// Release Codename field.
    pub release_codename: Option<String>,
    /// Release Description field.
    pub release_description: Option<String>,
    /// Release signing hook.
    pub release_signscript: Option<PathBuf>,
    /// Pre-install hook.
    pub pre_install_script: Option<PathBuf>,
    /// Post-install hook.
    pub post_install_script: Option<PathBuf>,
}

impl ArchiveTarget {
    /// Codename written into Release files; falls back to the suite.
    pub fn codename(&self) -> Option<&str> {
        self.release_codename
            .as_deref()
            .or(self.release_suite.as_deref())
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DinstallError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents).map_err(|e| {
            DinstallError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// The toplevel directory, after any command-line override.
    pub fn toplevel(&self) -> Result<&Path> {
        self.global
            .toplevel_dir
            .as_deref()
            .ok_or_else(|| DinstallError::Config("no toplevel directory configured".to_string()))
    }

    /// Incoming drop directory.
    pub fn incoming_dir(&self) -> Result<PathBuf> {
        Ok(self.toplevel()?.join(&self.global.incoming_subdir))
    }

    /// Reject quarantine directory.
    pub fn reject_dir(&self) -> Result<PathBuf> {
        Ok(self.toplevel()?.join(&self.global.reject_subdir))
    }

    /// PID lock file path.
    pub fn lockfile_path(&self) -> Result<PathBuf> {
        Ok(self.toplevel()?.join(&self.global.lockfile))
    }

    /// Control socket path.
    pub fn socket_path(&self) -> Result<PathBuf> {
        Ok(self.toplevel()?.join(&self.global.socket_name))
    }

    /// Resolve the configuration into archive targets, one per distribution.
    ///
    /// With no `[distribution.*]` section at all, a single `unstable`
    /// distribution with default policy is assumed. Duplicate alias names
    /// (including an alias shadowing a real distribution) are a
    /// configuration error.
    pub fn resolve_targets(&self) -> Result<Vec<ArchiveTarget>> {
        let toplevel = self.toplevel()?.to_path_buf();
        let mut sections: Vec<(String, DistributionConfig)> = self
            .distribution
            .iter()
            .map(|(name, dist)| (name.clone(), dist.clone()))
            .collect();
        if sections.is_empty() {
            sections.push(("unstable".to_string(), DistributionConfig::default()));
        }

        let mut targets = Vec::new();
        let mut seen_names: Vec<String> = Vec::new();
        for (name, dist) in sections {
            for alias in &dist.alias {
                if seen_names.contains(alias) {
                    return Err(DinstallError::Config(format!(
                        "distribution name or alias {:?} used twice",
                        alias
                    )));
                }
                seen_names.push(alias.clone());
            }
            if seen_names.contains(&name) {
                return Err(DinstallError::Config(format!(
                    "distribution name or alias {:?} used twice",
                    name
                )));
            }
            seen_names.push(name.clone());

            targets.push(ArchiveTarget {
                dir: toplevel.join(&name),
                name,
                style: dist.archive_style.unwrap_or(self.global.archive_style),
                architectures: dist
                    .architectures
                    .clone()
                    .unwrap_or_else(|| self.global.architectures.clone()),
                aliases: dist.alias,
                verify_sigs: dist.verify_sigs.unwrap_or(self.global.verify_sigs),
                keyrings: dist
                    .keyrings
                    .clone()
                    .unwrap_or_else(|| self.global.keyrings.clone()),
                keep_old: dist.keep_old,
                chown_changes_files: dist.chown_changes_files,
                generate_release: dist.generate_release,
                dynamic_reindex: dist.dynamic_reindex,
                experimental_release: dist.experimental_release,
                release_origin: dist.release_origin,
                release_label: dist.release_label,
                release_suite: dist.release_suite,
                release_codename: dist.release_codename,
                release_description: dist.release_description,
                release_signscript: dist.release_signscript,
                pre_install_script: dist.pre_install_script,
                post_install_script: dist.post_install_script,
            });
        }
        Ok(targets)
    }
}

/// Resolve a manifest's distribution name against the configured targets,
/// following one level of alias indirection.
pub fn resolve_distribution<'a>(
    targets: &'a [ArchiveTarget],
    distribution: &str,
) -> Option<&'a ArchiveTarget> {
    targets
        .iter()
        .find(|t| t.name == distribution)
        .or_else(|| {
            targets
                .iter()
                .find(|t| t.aliases.iter().any(|a| a == distribution))
        })
}
