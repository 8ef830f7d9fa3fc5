//! Per-archive index and Release generation.
//!
//! One indexer runs per distribution archive, either as a single batch pass
//! or as a long-lived loop reacting to change events. Index files are built
//! by streaming the output of an external tool (`apt-ftparchive` by
//! default) into every compression variant at once; Release files hash the
//! published index artifacts.

use crate::config::ArchiveTarget;
use crate::error::{DinstallError, Result};
use crate::hooks;
use crate::layout::ArchiveLayout;
use chrono::Utc;
use repo_metadata::hash::{hash_path, HashedFile};
use repo_metadata::release::Release;
use repo_metadata::{MultiCompressedWriter, DEFAULT_COMPRESSIONS, DEFAULT_HASH_ALGORITHMS};
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Settle time after a change event before deciding on regeneration.
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Which index an archive directory gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Binary package index.
    Packages,
    /// Source package index.
    Sources,
}

impl IndexKind {
    /// Subcommand passed to the index tool.
    pub fn command(&self) -> &'static str {
        match self {
            IndexKind::Packages => "packages",
            IndexKind::Sources => "sources",
        }
    }

    /// Name of the generated file.
    pub fn file_name(&self) -> &'static str {
        match self {
            IndexKind::Packages => "Packages",
            IndexKind::Sources => "Sources",
        }
    }
}

/// Shared state the layout implementations need to generate indices.
pub struct IndexContext {
    /// The archive being indexed.
    pub target: Arc<ArchiveTarget>,
    /// Index tool binary; `apt-ftparchive` unless overridden.
    pub index_tool: String,
    /// Working directory for the tool, so pool paths in its output come out
    /// relative to the toplevel.
    pub tool_cwd: PathBuf,
}

/// Whether an index file needs regeneration.
///
/// mtime shortcut only: regenerating is always safe, skipping only happens
/// when the index is demonstrably newer than its directory.
fn needs_regen(dir: &Path, index_file: &Path, force: bool) -> bool {
    if force {
        return true;
    }
    let Ok(index_mtime) = fs::metadata(index_file).and_then(|m| m.modified()) else {
        return true;
    };
    match fs::metadata(dir).and_then(|m| m.modified()) {
        Ok(dir_mtime) => dir_mtime > index_mtime,
        Err(_) => true,
    }
}

/// Regenerate one index file by streaming the tool's output into every
/// compression variant, swapping the results in only on a zero exit.
pub async fn make_index_file(
    ctx: &IndexContext,
    dir: &Path,
    rel_dir: &Path,
    kind: IndexKind,
    force: bool,
) -> Result<()> {
    let index_path = dir.join(kind.file_name());
    if !needs_regen(dir, &index_path, force) {
        info!(
            "skipping generation of {} for {}",
            kind.file_name(),
            rel_dir.display()
        );
        return Ok(());
    }
    info!("generating {} for {}...", kind.file_name(), rel_dir.display());

    let mut child = Command::new(&ctx.index_tool)
        .arg(kind.command())
        .arg(rel_dir)
        .current_dir(&ctx.tool_cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| DinstallError::SubprocessFailed {
            tool: ctx.index_tool.clone(),
            status: e.to_string(),
        })?;

    let mut stdout = child.stdout.take().ok_or_else(|| {
        DinstallError::SubprocessFailed {
            tool: ctx.index_tool.clone(),
            status: "no stdout".to_string(),
        }
    })?;
    if let Some(stderr) = child.stderr.take() {
        let tool = ctx.index_tool.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("{}: {}", tool, line);
            }
        });
    }

    let mut writer = MultiCompressedWriter::create(&index_path, DEFAULT_COMPRESSIONS)?;
    let mut buf = [0u8; 8192];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if let Err(e) = writer.write_all(&buf[..n]) {
            writer.discard();
            return Err(e.into());
        }
    }

    let status = child.wait().await?;
    if !status.success() {
        writer.discard();
        return Err(DinstallError::SubprocessFailed {
            tool: ctx.index_tool.clone(),
            status: status.to_string(),
        });
    }
    writer.commit()?;
    info!("{} generation complete", kind.file_name());
    Ok(())
}

/// Generate the Release file for one directory.
///
/// The file is written under a temporary name, optionally passed through
/// the signing hook, then renamed over the published Release. When release
/// generation is disabled by policy any pre-existing Release is removed
/// instead.
pub async fn write_release(
    ctx: &IndexContext,
    dir: &Path,
    codename: Option<String>,
    architectures: Vec<String>,
    index_files: &[String],
    force: bool,
) -> Result<()> {
    let target = &ctx.target;
    let release_path = dir.join("Release");
    if !target.generate_release {
        if release_path.exists() {
            info!("Release generation disabled, removing existing Release file");
            if let Err(e) = fs::remove_file(&release_path) {
                warn!("failed to remove {}: {}", release_path.display(), e);
            }
        }
        return Ok(());
    }
    if !needs_regen(dir, &release_path, force) {
        info!("skipping Release generation in {}", dir.display());
        return Ok(());
    }

    info!("generating Release in {}...", dir.display());
    let mut release = Release::new(Utc::now());
    release.origin = target.release_origin.clone();
    release.label = target.release_label.clone();
    release.suite = target.release_suite.clone();
    release.codename = codename;
    release.not_automatic = target.experimental_release;
    release.architectures = architectures;
    release.description = target.release_description.clone();

    for file in index_files {
        for compression in DEFAULT_COMPRESSIONS {
            let name = format!("{}{}", file, compression.extension());
            let path = dir.join(&name);
            if !path.exists() {
                continue;
            }
            let (size, hashes) = hash_path(&path, DEFAULT_HASH_ALGORITHMS)?;
            let mut hashed = HashedFile::new(name, size);
            hashed.hashes = hashes;
            release.add_file(hashed);
        }
    }

    let tmp_path = dir.join("Release.new");
    fs::write(&tmp_path, release.render())?;
    if let Some(script) = &target.release_signscript {
        if let Err(e) = hooks::run_script(script, OsStr::new("Release.new"), Some(dir)).await {
            // leave the temporary in place; the next cycle retries
            error!("failure while running Release signature script: {}", e);
            return Ok(());
        }
    }
    fs::rename(&tmp_path, &release_path)?;
    info!("Release generation complete");
    Ok(())
}

/// Events the indexer loop reacts to.
#[derive(Debug)]
pub enum IndexEvent {
    /// A specific archive subdirectory changed.
    DirChanged(PathBuf),
    /// Something changed; reindex everything.
    Changed,
    /// Reindex everything and acknowledge once the cycle completed.
    WaitReprocess(oneshot::Sender<()>),
}

/// Handle for signalling a running indexer.
#[derive(Clone)]
pub struct IndexerHandle {
    tx: mpsc::Sender<IndexEvent>,
}

impl IndexerHandle {
    /// Fire-and-forget change notification.
    pub async fn notify(&self) {
        let _ = self.tx.send(IndexEvent::Changed).await;
    }

    /// Ask for a reindex and block until a full cycle completed after the
    /// request was raised. Returns early if the daemon is shutting down.
    pub async fn wait_reprocess(&self, cancel: &CancellationToken) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .tx
            .send(IndexEvent::WaitReprocess(ack_tx))
            .await
            .is_err()
        {
            return;
        }
        tokio::select! {
            _ = ack_rx => {}
            _ = cancel.cancelled() => {}
        }
    }
}

/// Keeps one archive's indices and Release metadata fresh.
pub struct ArchiveIndexer {
    target: Arc<ArchiveTarget>,
    layout: Arc<dyn ArchiveLayout>,
    ctx: IndexContext,
    rx: mpsc::Receiver<IndexEvent>,
    cancel: CancellationToken,
}

impl ArchiveIndexer {
    /// Create an indexer and its signalling handle.
    pub fn new(
        target: Arc<ArchiveTarget>,
        layout: Arc<dyn ArchiveLayout>,
        index_tool: String,
        cancel: CancellationToken,
    ) -> (Self, IndexerHandle) {
        let tool_cwd = target
            .dir
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let (tx, rx) = mpsc::channel(64);
        let ctx = IndexContext {
            target: Arc::clone(&target),
            index_tool,
            tool_cwd,
        };
        (
            Self {
                target,
                layout,
                ctx,
                rx,
                cancel,
            },
            IndexerHandle { tx },
        )
    }

    /// Architectures plus the source pseudo-architecture.
    fn index_arches(&self) -> Vec<String> {
        let mut arches = self.target.architectures.clone();
        arches.push("source".to_string());
        arches
    }

    /// Regenerate every index file.
    pub async fn index_all(&self, force: bool) -> Result<()> {
        self.layout
            .index(&self.ctx, &self.index_arches(), force)
            .await
    }

    /// Regenerate every Release file.
    pub async fn generate_release_all(&self, force: bool) -> Result<()> {
        self.layout
            .generate_release(&self.ctx, &self.target.architectures, force)
            .await
    }

    /// One full forced pass; standalone batch operation.
    pub async fn run_batch(&self) -> Result<()> {
        self.index_all(true).await?;
        self.generate_release_all(true).await?;
        self.refresh_published_mtimes();
        Ok(())
    }

    /// Restamp every published artifact after a cycle.
    ///
    /// Each rename during the cycle bumps the directory mtime past the
    /// files renamed earlier, so without this a completed cycle reads as a
    /// new change and regeneration never settles.
    fn refresh_published_mtimes(&self) {
        let now = filetime::FileTime::now();
        let root = self.layout.root();
        for rel in self.layout.index_files() {
            let index_path = root.join(&rel);
            for compression in DEFAULT_COMPRESSIONS {
                let mut name = index_path.clone().into_os_string();
                name.push(compression.extension());
                let path = PathBuf::from(name);
                if path.exists() {
                    let _ = filetime::set_file_mtime(&path, now);
                }
            }
            if let Some(dir) = index_path.parent() {
                for name in ["Release", crate::layout::RELEASE_SIGNATURE] {
                    let path = dir.join(name);
                    if path.exists() {
                        let _ = filetime::set_file_mtime(&path, now);
                    }
                }
            }
        }
    }

    /// Daemon loop: full pass at startup, then react to events until
    /// cancelled. `watch_rx` carries directory-change notifications.
    pub async fn run(mut self, mut watch_rx: Option<mpsc::Receiver<PathBuf>>) {
        info!("archive indexer {} starting", self.target.name);
        if let Err(e) = self.run_batch().await {
            error!("initial indexing of {} failed: {}", self.target.name, e);
        }
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                dir = recv_watch(&mut watch_rx) => IndexEvent::DirChanged(dir),
            };
            self.handle_event(event).await;
        }
        info!("archive indexer {} exiting", self.target.name);
    }

    async fn handle_event(&mut self, event: IndexEvent) {
        let (changed_dir, waiter) = match event {
            IndexEvent::DirChanged(dir) => {
                debug!("got change in {}", dir.display());
                (Some(dir), None)
            }
            IndexEvent::Changed => {
                debug!("got general change");
                (None, None)
            }
            IndexEvent::WaitReprocess(ack) => {
                debug!("got reprocess request");
                (None, Some(ack))
            }
        };

        // settle briefly so mtime comparisons see the final state of a
        // burst of renames
        tokio::select! {
            _ = tokio::time::sleep(DEBOUNCE) => {}
            _ = self.cancel.cancelled() => return,
        }

        if !self.layout.reindex_needed() {
            debug!("archive {} unchanged since last signature", self.target.name);
            if let Some(ack) = waiter {
                let _ = ack.send(());
            }
            return;
        }

        // directory events defer to the mtime heuristic; explicit requests
        // force a full regeneration
        let (arches, force) = match &changed_dir {
            Some(dir) => match self.layout.arch_for_dir(dir) {
                Some(arch) => (vec![arch], false),
                None => (self.index_arches(), false),
            },
            None => (self.index_arches(), true),
        };
        let result = match self.layout.index(&self.ctx, &arches, force).await {
            Ok(()) => self.layout.generate_release(&self.ctx, &arches, force).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => self.refresh_published_mtimes(),
            Err(e) => {
                // abandoned for this cycle; the next event retries
                error!("indexing {} failed: {}", self.target.name, e);
            }
        }
        if let Some(ack) = waiter {
            let _ = ack.send(());
        }
    }
}

async fn recv_watch(rx: &mut Option<mpsc::Receiver<PathBuf>>) -> PathBuf {
    match rx {
        Some(rx) => match rx.recv().await {
            Some(dir) => dir,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Push a path's mtime into the past.
    fn set_mtime_back(path: &Path) {
        // 200001010000 is comfortably older than any test directory
        std::process::Command::new("touch")
            .arg("-t")
            .arg("200001010000")
            .arg(path)
            .status()
            .expect("touch");
    }

    #[test]
    fn test_needs_regen_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        assert!(needs_regen(dir.path(), &dir.path().join("Packages"), false));
    }

    #[test]
    fn test_needs_regen_stale_and_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("Packages");
        std::fs::write(&index, "x").unwrap();

        // index older than the directory: stale
        set_mtime_back(&index);
        assert!(needs_regen(dir.path(), &index, false));

        // directory older than the index: fresh, but force overrides
        set_mtime_back(dir.path());
        std::fs::write(&index, "x").unwrap();
        assert!(!needs_regen(dir.path(), &index, false));
        assert!(needs_regen(dir.path(), &index, true));
    }
}
