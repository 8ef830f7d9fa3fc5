//! Incoming directory orchestration.
//!
//! The worker scans the incoming directory for upload manifests, feeds the
//! retry queue, drives the installer for each due task and coordinates with
//! the archive indexers. One worker runs per incoming directory.

use crate::error::DinstallError;
use crate::indexer::IndexerHandle;
use crate::installer::{ArchiveInstaller, InstallOutcome};
use crate::queue::{IngestionTask, RetryQueue};
use repo_metadata::changes::ChangesFile;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Commands the control socket sends to a running worker.
#[derive(Debug)]
pub enum WorkerCommand {
    /// Reprocess the incoming directory now; acknowledge when the cycle
    /// (including triggered reindexing) completed.
    Run(oneshot::Sender<()>),
}

/// One distribution archive as seen by the worker.
pub struct ArchiveEntry {
    /// Installer publishing into the archive.
    pub installer: ArchiveInstaller,
    /// Handle to the archive's indexer.
    pub indexer: IndexerHandle,
}

/// Watches one incoming directory and installs what lands there.
pub struct IncomingWorker {
    incoming_dir: PathBuf,
    archives: Vec<ArchiveEntry>,
    queue: RetryQueue,
    /// Manifests whose installation blew up in an undefined way; never
    /// retried blindly, only skipped.
    screwed: Vec<PathBuf>,
    max_retry_time: Duration,
    poll_time: Duration,
    trigger_reindex: bool,
    cancel: CancellationToken,
}

impl IncomingWorker {
    /// Create a worker for `incoming_dir` feeding the given archives.
    pub fn new(
        incoming_dir: PathBuf,
        archives: Vec<ArchiveEntry>,
        max_retry_time: Duration,
        poll_time: Duration,
        trigger_reindex: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            incoming_dir,
            archives,
            queue: RetryQueue::new(),
            screwed: Vec::new(),
            max_retry_time,
            poll_time,
            trigger_reindex,
            cancel,
        }
    }

    /// Number of manifests currently quarantined on the screwed list.
    pub fn screwed_count(&self) -> usize {
        self.screwed.len()
    }

    fn archive_index(&self, distribution: &str) -> Option<usize> {
        if let Some(index) = self
            .archives
            .iter()
            .position(|a| a.installer.target().name == distribution)
        {
            return Some(index);
        }
        let index = self.archives.iter().position(|a| {
            a.installer
                .target()
                .aliases
                .iter()
                .any(|alias| alias == distribution)
        })?;
        info!(
            "distribution {:?} is an alias for {:?}",
            distribution,
            self.archives[index].installer.target().name
        );
        Some(index)
    }

    /// List manifests in the incoming directory and enqueue the ones not
    /// already tracked. Parse failures are skipped; the file may still be
    /// uploading and a later scan will pick it up.
    pub fn scan(&mut self) {
        let now = Instant::now();
        let entries = match fs::read_dir(&self.incoming_dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!(
                    "unable to list incoming dir {}: {}",
                    self.incoming_dir.display(),
                    e
                );
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("changes") {
                continue;
            }
            if self.screwed.contains(&path) {
                info!("skipping screwed changefile {}", path.display());
                continue;
            }
            if self.queue.contains(&path) {
                debug!("skipping {}, already queued", path.display());
                continue;
            }
            info!("examining {}", path.display());
            match ChangesFile::parse_path(&path) {
                Ok(_) => {
                    debug!("new change file {}", path.display());
                    self.queue.put(IngestionTask::new(path, now));
                }
                Err(e) => {
                    debug!("unable to parse {}, skipping: {}", path.display(), e);
                }
            }
        }
    }

    /// Process everything the retry queue considers ready: expired tasks
    /// are rejected with a timeout reason, due tasks are re-checked and
    /// either installed or re-queued with doubled backoff.
    pub async fn drain_due(&mut self, doing_reprocess: bool) {
        let now = Instant::now();
        let ready = self.queue.take_ready(now, self.max_retry_time);
        for task in ready.expired {
            self.reject_expired(task);
        }
        for task in ready.due {
            self.process_task(task, doing_reprocess, now).await;
        }
    }

    /// Re-parse a task's manifest; `None` means the task reached a terminal
    /// state here (file gone, or screwed on a parse error).
    fn reload_manifest(&mut self, task: &IngestionTask) -> Option<ChangesFile> {
        match ChangesFile::parse_path(&task.filename) {
            Ok(changes) => Some(changes),
            Err(_) if !task.filename.is_file() => {
                info!("changefile {} got removed", task.filename.display());
                None
            }
            Err(e) => {
                error!("unable to load change file {}: {}", task.filename.display(), e);
                warn!("marking {} as screwed", task.filename.display());
                self.screwed.push(task.filename.clone());
                None
            }
        }
    }

    fn reject_expired(&mut self, task: IngestionTask) {
        let Some(changes) = self.reload_manifest(&task) else {
            return;
        };
        let reason = DinstallError::RetryTimeout {
            file: task.filename.clone(),
            seconds: self.max_retry_time.as_secs(),
        };
        match self.archive_index(&changes.distribution) {
            Some(index) => {
                let _ = self.archives[index]
                    .installer
                    .reject(&task.filename, &changes, &reason.to_string());
            }
            None => {
                let err = DinstallError::UnknownDistribution {
                    distribution: changes.distribution.clone(),
                    file: task.filename.clone(),
                };
                error!("{}; cannot reject", err);
                warn!("marking {} as screwed", task.filename.display());
                self.screwed.push(task.filename);
            }
        }
    }

    async fn process_task(&mut self, task: IngestionTask, doing_reprocess: bool, now: Instant) {
        let Some(changes) = self.reload_manifest(&task) else {
            return;
        };

        if let Err(e) = changes.verify_files(&self.incoming_dir) {
            let task = task.backed_off(now);
            info!(
                "upload {} isn't complete ({}); marking for retry in {} seconds",
                task.filename.display(),
                e,
                task.delay.as_secs()
            );
            self.queue.put(task);
            return;
        }

        debug!("preparing to install {}", task.filename.display());
        let Some(index) = self.archive_index(&changes.distribution) else {
            let err = DinstallError::UnknownDistribution {
                distribution: changes.distribution.clone(),
                file: task.filename.clone(),
            };
            error!("{}", err);
            warn!("marking {} as screwed", task.filename.display());
            self.screwed.push(task.filename);
            return;
        };

        let entry = &self.archives[index];
        let archive_name = entry.installer.target().name.clone();
        match entry.installer.install(&task.filename, &changes).await {
            Ok(InstallOutcome::Installed) => {
                if self.trigger_reindex {
                    if doing_reprocess {
                        debug!("waiting on archive {} to reprocess", archive_name);
                        entry.indexer.wait_reprocess(&self.cancel).await;
                    } else {
                        debug!("notifying archive {} of change", archive_name);
                        entry.indexer.notify().await;
                    }
                }
                debug!("finished processing {}", task.filename.display());
            }
            Ok(InstallOutcome::Rejected) => {
                info!("failed to install {}", task.filename.display());
            }
            Err(e) => {
                error!(
                    "unable to install {}: {}; adding to screwed list",
                    task.filename.display(),
                    e
                );
                self.screwed.push(task.filename);
            }
        }
    }

    /// One scan-and-drain pass; batch mode.
    pub async fn run_batch(&mut self) {
        info!("entering batch mode...");
        self.scan();
        self.drain_due(false).await;
    }

    /// Daemon loop: wakes on change events, control commands, due retry
    /// tasks and the poll interval; exits on cancellation.
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<WorkerCommand>,
        mut notify_rx: mpsc::Receiver<PathBuf>,
    ) {
        info!("incoming worker watching {}", self.incoming_dir.display());
        self.scan();
        self.drain_due(false).await;

        loop {
            let wait = match self.queue.next_due() {
                Some(due) => due
                    .saturating_duration_since(Instant::now())
                    .min(self.poll_time),
                None => self.poll_time,
            };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(command) = cmd_rx.recv() => match command {
                    WorkerCommand::Run(ack) => {
                        info!("got reprocessing request");
                        self.scan();
                        self.drain_due(true).await;
                        info!("reprocessing complete");
                        let _ = ack.send(());
                    }
                },
                Some(dir) = notify_rx.recv() => {
                    debug!("got {} from notifier", dir.display());
                    self.scan();
                    self.drain_due(false).await;
                }
                _ = tokio::time::sleep(wait) => {
                    self.drain_due(false).await;
                }
            }
        }
        info!("incoming worker exiting");
    }
}
