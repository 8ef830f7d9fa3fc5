//! Archive installation: classification, supersession and the rename
//! transaction.

use crate::config::ArchiveTarget;
use crate::error::{DinstallError, Result};
use crate::hooks;
use crate::layout::{self, ArchiveLayout};
use crate::plan::RenamePlan;
use crate::verify::SignatureVerifier;
use lazy_regex::regex_captures;
use repo_metadata::changes::ChangesFile;
use repo_metadata::version;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Quarantine suffix for superseded files awaiting deletion.
const OLD_SUFFIX: &str = ".old";

/// What a file referenced by a manifest is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileClass {
    /// An architecture-specific binary package.
    Binary {
        /// Package name.
        package: String,
        /// Version embedded in the file name.
        version: String,
        /// Architecture.
        arch: String,
    },
    /// A source control file (`.dsc`).
    SourceDsc {
        /// Package name.
        package: String,
    },
    /// A source diff or packaging tarball.
    SourceDiff {
        /// Package name.
        package: String,
    },
    /// An upstream tarball (`.orig.tar.*`).
    SourceOrig {
        /// Package name.
        package: String,
        /// Version embedded in the file name.
        version: String,
    },
    /// A native source tarball.
    SourceNative {
        /// Package name.
        package: String,
    },
}

impl FileClass {
    /// Whether this is a source artifact rather than a binary package.
    pub fn is_source(&self) -> bool {
        !matches!(self, FileClass::Binary { .. })
    }
}

/// Classify an archive file name.
///
/// Returns `None` for names following no known pattern; such files are
/// passed over by installation and supersession alike.
pub fn classify(filename: &str) -> Option<FileClass> {
    if let Some((_, package, version, arch)) =
        regex_captures!(r"^([a-z0-9][-a-z0-9+.]*)_(.+?)_([-a-zA-Z0-9]+)\.u?deb$", filename)
    {
        return Some(FileClass::Binary {
            package: package.to_string(),
            version: version.to_string(),
            arch: arch.to_string(),
        });
    }
    if let Some((_, package, _)) =
        regex_captures!(r"^([a-z0-9][-a-z0-9+.]*)_(.+?)\.dsc$", filename)
    {
        return Some(FileClass::SourceDsc {
            package: package.to_string(),
        });
    }
    if let Some((_, package, _, _)) = regex_captures!(
        r"^([a-z0-9][-a-z0-9+.]*)_(.+?)\.(diff\.gz|debian\.tar\.(?:gz|bz2|xz))$",
        filename
    ) {
        return Some(FileClass::SourceDiff {
            package: package.to_string(),
        });
    }
    if let Some((_, package, version)) = regex_captures!(
        r"^([a-z0-9][-a-z0-9+.]*)_(.+?)\.orig\.tar\.(?:gz|bz2|xz)$",
        filename
    ) {
        return Some(FileClass::SourceOrig {
            package: package.to_string(),
            version: version.to_string(),
        });
    }
    if let Some((_, package, _)) = regex_captures!(
        r"^([a-z0-9][-a-z0-9+.]*)_([^_]+?)\.tar\.(?:gz|bz2|xz)$",
        filename
    ) {
        return Some(FileClass::SourceNative {
            package: package.to_string(),
        });
    }
    None
}

/// Parse an installed manifest file name into (source, version, arch).
pub fn classify_changes(filename: &str) -> Option<(String, String, String)> {
    regex_captures!(
        r"^([a-z0-9][-a-z0-9+.]*)_(.+?)_([-a-zA-Z0-9]+)\.changes$",
        filename
    )
    .map(|(_, source, version, arch)| {
        (source.to_string(), version.to_string(), arch.to_string())
    })
}

/// Outcome of an installation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The upload was published into the archive.
    Installed,
    /// The upload was moved to the reject directory; the failure was a
    /// defined one and has been handled.
    Rejected,
}

struct NewFile {
    src: PathBuf,
    dest: PathBuf,
    package: String,
    arch: String,
}

/// Installs uploads into one distribution archive.
pub struct ArchiveInstaller {
    target: Arc<ArchiveTarget>,
    layout: Arc<dyn ArchiveLayout>,
    reject_dir: PathBuf,
    verifier: Arc<dyn SignatureVerifier>,
}

impl ArchiveInstaller {
    /// Create an installer for `target`.
    pub fn new(
        target: Arc<ArchiveTarget>,
        layout: Arc<dyn ArchiveLayout>,
        reject_dir: PathBuf,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            target,
            layout,
            reject_dir,
            verifier,
        }
    }

    /// The archive this installer publishes into.
    pub fn target(&self) -> &ArchiveTarget {
        &self.target
    }

    /// Install a complete upload.
    ///
    /// Defined failures (bad signature, pre-install rejection, unknown
    /// architecture, rename failure after rollback) move the upload to the
    /// reject directory and return [`InstallOutcome::Rejected`]. An `Err`
    /// means something undefined happened; the caller must quarantine the
    /// manifest rather than retry it.
    pub async fn install(
        &self,
        changes_path: &Path,
        changes: &ChangesFile,
    ) -> Result<InstallOutcome> {
        info!(
            "preparing to install {} in archive {}",
            changes_path.display(),
            self.target.name
        );

        if self.target.verify_sigs {
            info!("verifying signature on {}", changes_path.display());
            if let Err(e) = self.verifier.verify(changes_path).await {
                error!("{}", e);
                self.reject(changes_path, changes, &e.to_string())?;
                return Ok(InstallOutcome::Rejected);
            }
            info!("good signature on {}", changes_path.display());
        } else {
            debug!("skipping signature verification on {}", changes_path.display());
        }

        if let Some(script) = &self.target.pre_install_script {
            if let Err(e) = hooks::run_script(script, changes_path.as_os_str(), None).await {
                error!("pre-installation script rejected {}: {}", changes_path.display(), e);
                self.reject(
                    changes_path,
                    changes,
                    &format!("pre-installation script rejected upload: {}", e),
                )?;
                return Ok(InstallOutcome::Rejected);
            }
        }

        let quarantined = match self.publish_files(changes_path, changes) {
            Ok(quarantined) => quarantined,
            Err(e) => {
                error!("failed to process {}: {}", changes_path.display(), e);
                self.reject(changes_path, changes, &e.to_string())?;
                return Ok(InstallOutcome::Rejected);
            }
        };

        if self.target.chown_changes_files {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                fs::set_permissions(changes_path, fs::Permissions::from_mode(0o600))
            {
                warn!("failed to tighten permissions on {}: {}", changes_path.display(), e);
            }
        }

        // marks the upload as installed in place
        let installed = self
            .target
            .dir
            .join(changes_path.file_name().unwrap_or_default());
        fs::rename(changes_path, &installed).map_err(|e| DinstallError::RenameFailed {
            from: changes_path.to_path_buf(),
            to: installed.clone(),
            source: e,
        })?;

        for old in quarantined {
            debug!("deleting {}", old.display());
            if let Err(e) = fs::remove_file(&old) {
                warn!("failed to delete superseded file {}: {}", old.display(), e);
            }
        }

        info!(
            "successfully installed {} {} to {}",
            changes.source, changes.version, self.target.name
        );

        if let Some(script) = &self.target.post_install_script {
            if let Err(e) = hooks::run_script(script, installed.as_os_str(), None).await {
                error!("post-installation script failed: {}", e);
            }
        }

        Ok(InstallOutcome::Installed)
    }

    /// Classify, supersede and move the upload's files into the pool.
    ///
    /// Returns the quarantine paths of superseded files; they are unlinked
    /// only after the manifest rename makes the install definitive.
    fn publish_files(&self, changes_path: &Path, changes: &ChangesFile) -> Result<Vec<PathBuf>> {
        let incoming = changes_path.parent().unwrap_or_else(|| Path::new("."));
        let new_version = version::parse(&changes.version)?;
        let native = version::is_native(&new_version);

        let mut new_files: Vec<NewFile> = Vec::new();
        for name in changes.file_names() {
            let Some(class) = classify(name) else {
                warn!(
                    "ignoring unrecognized file {} referenced by {}",
                    name,
                    changes_path.display()
                );
                continue;
            };
            match class {
                FileClass::Binary { package, arch, .. } => {
                    if !self.target.architectures.iter().any(|a| a == &arch) {
                        return Err(DinstallError::UnknownArchitecture { arch });
                    }
                    new_files.push(NewFile {
                        src: incoming.join(name),
                        dest: self.layout.arch_target(&arch, name),
                        package,
                        arch,
                    });
                }
                FileClass::SourceDsc { package }
                | FileClass::SourceDiff { package }
                | FileClass::SourceOrig { package, .. }
                | FileClass::SourceNative { package } => {
                    new_files.push(NewFile {
                        src: incoming.join(name),
                        dest: self.layout.source_target(name),
                        package,
                        arch: "source".to_string(),
                    });
                }
            }
        }

        let mut plan = RenamePlan::new();
        let mut quarantined = Vec::new();
        if !self.target.keep_old {
            self.tag_superseded(changes, &new_files, &new_version, native, &mut plan)?;
            quarantined = plan
                .destinations()
                .map(|p| p.to_path_buf())
                .collect::<Vec<_>>();
        }
        for file in &new_files {
            plan.push(file.src.clone(), file.dest.clone());
        }
        plan.execute()?;
        Ok(quarantined)
    }

    /// Tag files superseded by this upload for quarantine.
    fn tag_superseded(
        &self,
        changes: &ChangesFile,
        new_files: &[NewFile],
        new_version: &debversion::Version,
        native: bool,
        plan: &mut RenamePlan,
    ) -> Result<()> {
        let is_sourceful = new_files.iter().any(|f| f.arch == "source");
        let new_arches: HashSet<&str> = new_files.iter().map(|f| f.arch.as_str()).collect();
        let new_packages: HashSet<&str> =
            new_files.iter().map(|f| f.package.as_str()).collect();

        // An installed binary of an architecture this upload doesn't cover,
        // older than the upload: that architecture is losing its build. Old
        // source artifacts stay until an upload supplies bins again.
        let mut found_old_bins = false;
        for pkg in layout::package_versions(self.layout.as_ref(), &self.target.architectures) {
            if new_arches.contains(pkg.arch.as_str()) {
                continue;
            }
            if let Ok(old_version) = version::parse(&pkg.version) {
                if old_version < *new_version {
                    found_old_bins = true;
                }
            }
        }

        // binaries: superseded by a new binary of the same name and arch
        for file in new_files.iter().filter(|f| f.arch != "source") {
            debug!("scanning {} for old files", file.arch);
            for name in self.layout.read_arch_dir(&file.arch)? {
                let Some(FileClass::Binary { package, arch, .. }) = classify(&name) else {
                    continue;
                };
                let path = self.layout.arch_target(&file.arch, &name);
                if plan.has_source(&path) {
                    continue;
                }
                if package == file.package && arch == file.arch {
                    let quarantine = quarantine_name(&path);
                    debug!("tagging {} for deletion", path.display());
                    plan.push(path, quarantine);
                }
            }
        }

        if is_sourceful && found_old_bins {
            debug!(
                "upload closes an architecture still carrying older binaries; keeping old source artifacts"
            );
        }

        debug!("scanning source directory for old files");
        for name in self.layout.read_source_dir()? {
            let path = self.layout.source_target(&name);
            if plan.has_source(&path) {
                continue;
            }
            // old manifests of the same source are always cleaned out
            if let Some((source, _, _)) = classify_changes(&name) {
                if source == changes.source {
                    plan.push(path.clone(), quarantine_name(&path));
                }
                continue;
            }
            if !is_sourceful || found_old_bins {
                continue;
            }
            match classify(&name) {
                Some(FileClass::SourceDsc { package })
                | Some(FileClass::SourceDiff { package }) => {
                    if package == changes.source {
                        plan.push(path.clone(), quarantine_name(&path));
                    }
                }
                Some(FileClass::SourceOrig { package, version: old_version }) => {
                    if package != changes.source {
                        continue;
                    }
                    if native {
                        debug!("tagging upstream tarball {} for deletion", name);
                        plan.push(path.clone(), quarantine_name(&path));
                    } else {
                        match version::parse(&old_version) {
                            Ok(old) => {
                                if version::upstream_cmp(&old, new_version) == Ordering::Less {
                                    debug!(
                                        "old upstream tarball {} version {} < {}, tagging for deletion",
                                        name, old_version, changes.version
                                    );
                                    plan.push(path.clone(), quarantine_name(&path));
                                } else {
                                    debug!("keeping upstream tarball {}", name);
                                }
                            }
                            Err(_) => {
                                warn!("unparseable version in {}; keeping it", name);
                            }
                        }
                    }
                }
                Some(FileClass::SourceNative { package }) => {
                    if new_packages.contains(package.as_str()) {
                        debug!("tagging native tarball {} for deletion", name);
                        plan.push(path.clone(), quarantine_name(&path));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Move the upload and everything it references to the reject directory,
    /// recording `reason` in a sibling `.reason` file.
    ///
    /// This is itself the failure path: errors here are reported, the
    /// archive may be left inconsistent.
    pub fn reject(&self, changes_path: &Path, changes: &ChangesFile, reason: &str) -> Result<()> {
        let result = self.reject_inner(changes_path, changes, reason);
        if let Err(ref e) = result {
            error!(
                "unhandled error while rejecting {}; archive may be in an inconsistent state: {}",
                changes_path.display(),
                e
            );
        }
        result
    }

    fn reject_inner(&self, changes_path: &Path, changes: &ChangesFile, reason: &str) -> Result<()> {
        fs::create_dir_all(&self.reject_dir)?;
        let reason_path = self
            .reject_dir
            .join(format!("{}_{}.reason", changes.source, changes.version));
        fs::write(&reason_path, format!("{}\n", reason))?;

        let incoming = changes_path.parent().unwrap_or_else(|| Path::new("."));
        for name in changes.file_names() {
            let in_incoming = incoming.join(name);
            let in_archive = self.target.dir.join(name);
            let src = if in_incoming.exists() {
                in_incoming
            } else if in_archive.exists() {
                in_archive
            } else {
                // never uploaded; nothing to quarantine
                debug!("referenced file {} not present, skipping", name);
                continue;
            };
            fs::rename(&src, self.reject_dir.join(name)).map_err(|e| {
                DinstallError::RenameFailed {
                    from: src.clone(),
                    to: self.reject_dir.join(name),
                    source: e,
                }
            })?;
        }
        if changes_path.exists() {
            let file_name = changes_path.file_name().unwrap_or_default();
            fs::rename(changes_path, self.reject_dir.join(file_name)).map_err(|e| {
                DinstallError::RenameFailed {
                    from: changes_path.to_path_buf(),
                    to: self.reject_dir.join(file_name),
                    source: e,
                }
            })?;
        }
        info!("rejected {}: {}", changes_path.display(), reason);
        Ok(())
    }
}

/// Quarantine path for a superseded file.
fn quarantine_name(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(OLD_SUFFIX);
    PathBuf::from(name)
}
