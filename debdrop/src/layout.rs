//! Archive layout variants.
//!
//! An archive is either flat (every file in one shared directory) or split
//! into per-architecture subdirectories plus `source/`. The installer and
//! indexer only talk to the [`ArchiveLayout`] trait; the variant is picked
//! from configuration at startup.

use crate::config::{ArchiveStyle, ArchiveTarget};
use crate::error::Result;
use crate::indexer::{self, IndexContext, IndexKind};
use crate::installer::{classify, FileClass};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Sentinel file whose mtime marks the last completed index-and-sign cycle.
pub const RELEASE_SIGNATURE: &str = "Release.gpg";

/// An installed binary package observed in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPackage {
    /// Package name.
    pub name: String,
    /// Version string as embedded in the file name.
    pub version: String,
    /// Architecture.
    pub arch: String,
}

/// The capability set both archive layouts provide.
#[async_trait]
pub trait ArchiveLayout: Send + Sync {
    /// Archive root directory.
    fn root(&self) -> &Path;

    /// Create the directories this layout needs.
    fn ensure_dirs(&self) -> std::io::Result<()>;

    /// Directories whose changes should wake the indexer.
    fn watch_dirs(&self) -> Vec<PathBuf>;

    /// Uncompressed index files, relative to the archive root.
    fn index_files(&self) -> Vec<PathBuf>;

    /// Pool location for an architecture-specific file.
    fn arch_target(&self, arch: &str, file: &str) -> PathBuf;

    /// Pool location for a source artifact.
    fn source_target(&self, file: &str) -> PathBuf;

    /// File names currently in an architecture's pool directory.
    fn read_arch_dir(&self, arch: &str) -> std::io::Result<Vec<String>>;

    /// File names currently in the source pool directory.
    fn read_source_dir(&self) -> std::io::Result<Vec<String>>;

    /// The architecture a watched directory belongs to, if it maps to one.
    fn arch_for_dir(&self, dir: &Path) -> Option<String>;

    /// Whether archive content changed since the last published signature.
    ///
    /// mtime heuristic only; a missing sentinel always reads as stale.
    fn reindex_needed(&self) -> bool;

    /// Regenerate index files for the given architectures.
    async fn index(&self, ctx: &IndexContext, arches: &[String], force: bool) -> Result<()>;

    /// Regenerate Release files for the given architectures.
    async fn generate_release(&self, ctx: &IndexContext, arches: &[String], force: bool)
        -> Result<()>;
}

/// Construct the layout configured for `target`.
pub fn make_layout(target: Arc<ArchiveTarget>) -> Arc<dyn ArchiveLayout> {
    match target.style {
        ArchiveStyle::Flat => Arc::new(FlatLayout { target }),
        ArchiveStyle::Subdir => Arc::new(SubdirLayout { target }),
    }
}

fn list_file_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Stale when the sentinel is missing or any watched dir is newer than it.
fn newer_than_sentinel(sentinel: &Path, dirs: &[PathBuf]) -> bool {
    let Some(sentinel_mtime) = mtime(sentinel) else {
        return true;
    };
    dirs.iter()
        .any(|dir| mtime(dir).is_some_and(|m| m > sentinel_mtime))
}

/// One shared directory for all architectures.
pub struct FlatLayout {
    target: Arc<ArchiveTarget>,
}

#[async_trait]
impl ArchiveLayout for FlatLayout {
    fn root(&self) -> &Path {
        &self.target.dir
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.target.dir)
    }

    fn watch_dirs(&self) -> Vec<PathBuf> {
        vec![self.target.dir.clone()]
    }

    fn index_files(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("Packages"), PathBuf::from("Sources")]
    }

    fn arch_target(&self, _arch: &str, file: &str) -> PathBuf {
        self.target.dir.join(file)
    }

    fn source_target(&self, file: &str) -> PathBuf {
        self.target.dir.join(file)
    }

    fn read_arch_dir(&self, _arch: &str) -> std::io::Result<Vec<String>> {
        list_file_names(&self.target.dir)
    }

    fn read_source_dir(&self) -> std::io::Result<Vec<String>> {
        list_file_names(&self.target.dir)
    }

    fn arch_for_dir(&self, _dir: &Path) -> Option<String> {
        // one shared directory; every change is a general change
        None
    }

    fn reindex_needed(&self) -> bool {
        newer_than_sentinel(&self.target.dir.join(RELEASE_SIGNATURE), &self.watch_dirs())
    }

    async fn index(&self, ctx: &IndexContext, _arches: &[String], force: bool) -> Result<()> {
        let rel_dir = PathBuf::from(&self.target.name);
        indexer::make_index_file(
            ctx,
            &self.target.dir,
            &rel_dir,
            IndexKind::Packages,
            force,
        )
        .await?;
        indexer::make_index_file(ctx, &self.target.dir, &rel_dir, IndexKind::Sources, force)
            .await?;
        Ok(())
    }

    async fn generate_release(
        &self,
        ctx: &IndexContext,
        _arches: &[String],
        force: bool,
    ) -> Result<()> {
        let index_files: Vec<String> = self
            .index_files()
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        indexer::write_release(
            ctx,
            &self.target.dir,
            self.target.codename().map(|c| c.to_string()),
            self.target.architectures.clone(),
            &index_files,
            force,
        )
        .await
    }
}

/// One subdirectory per architecture plus `source/`.
pub struct SubdirLayout {
    target: Arc<ArchiveTarget>,
}

impl SubdirLayout {
    fn arch_dir(&self, arch: &str) -> PathBuf {
        self.target.dir.join(arch)
    }

    fn all_arches(&self) -> Vec<String> {
        let mut arches = self.target.architectures.clone();
        arches.push("source".to_string());
        arches
    }
}

#[async_trait]
impl ArchiveLayout for SubdirLayout {
    fn root(&self) -> &Path {
        &self.target.dir
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        for arch in self.all_arches() {
            fs::create_dir_all(self.arch_dir(&arch))?;
        }
        Ok(())
    }

    fn watch_dirs(&self) -> Vec<PathBuf> {
        self.all_arches().iter().map(|a| self.arch_dir(a)).collect()
    }

    fn index_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .target
            .architectures
            .iter()
            .map(|arch| PathBuf::from(arch).join("Packages"))
            .collect();
        files.push(PathBuf::from("source").join("Sources"));
        files
    }

    fn arch_target(&self, arch: &str, file: &str) -> PathBuf {
        self.arch_dir(arch).join(file)
    }

    fn source_target(&self, file: &str) -> PathBuf {
        self.arch_dir("source").join(file)
    }

    fn read_arch_dir(&self, arch: &str) -> std::io::Result<Vec<String>> {
        list_file_names(&self.arch_dir(arch))
    }

    fn read_source_dir(&self) -> std::io::Result<Vec<String>> {
        list_file_names(&self.arch_dir("source"))
    }

    fn arch_for_dir(&self, dir: &Path) -> Option<String> {
        let name = dir.file_name()?.to_str()?;
        self.all_arches().into_iter().find(|a| a == name)
    }

    fn reindex_needed(&self) -> bool {
        newer_than_sentinel(&self.target.dir.join(RELEASE_SIGNATURE), &self.watch_dirs())
    }

    async fn index(&self, ctx: &IndexContext, arches: &[String], force: bool) -> Result<()> {
        for arch in arches {
            let dir = self.arch_dir(arch);
            let rel_dir = PathBuf::from(&self.target.name).join(arch);
            let kind = if arch == "source" {
                IndexKind::Sources
            } else {
                IndexKind::Packages
            };
            indexer::make_index_file(ctx, &dir, &rel_dir, kind, force).await?;
        }
        Ok(())
    }

    async fn generate_release(
        &self,
        ctx: &IndexContext,
        arches: &[String],
        force: bool,
    ) -> Result<()> {
        for arch in arches {
            if arch == "source" {
                // source indices are published without their own Release
                continue;
            }
            let dir = self.arch_dir(arch);
            let codename = self
                .target
                .codename()
                .map(|codename| format!("{}/{}", codename, arch));
            indexer::write_release(
                ctx,
                &dir,
                codename,
                vec![arch.clone()],
                &["Packages".to_string()],
                force,
            )
            .await?;
        }
        Ok(())
    }
}

/// Scan the archive for installed binary packages.
///
/// Files that don't parse as binary packages are skipped.
pub fn package_versions(layout: &dyn ArchiveLayout, arches: &[String]) -> Vec<BinaryPackage> {
    let mut packages = Vec::new();
    for arch in arches {
        let Ok(files) = layout.read_arch_dir(arch) else {
            continue;
        };
        for file in files {
            if let Some(FileClass::Binary {
                package,
                version,
                arch,
            }) = classify(&file)
            {
                packages.push(BinaryPackage {
                    name: package,
                    version,
                    arch,
                });
            }
        }
    }
    packages
}
