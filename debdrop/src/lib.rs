//! debdrop, a package-repository ingestion daemon.
//!
//! The daemon watches an incoming directory for `.changes` upload manifests,
//! verifies and atomically installs the referenced files into
//! per-distribution archive trees, and regenerates package indices and
//! signed Release metadata for those trees.
//!
//! Modules roughly follow the runtime actors: [`worker`] drives the incoming
//! directory, [`queue`] holds not-yet-installable uploads, [`installer`]
//! performs the rename transaction against one archive, and [`indexer`]
//! keeps that archive's indices fresh. The remaining modules are glue:
//! configuration, control socket, PID lock, change notification, hook and
//! signature subprocesses.

pub mod config;
pub mod control;
pub mod error;
pub mod hooks;
pub mod indexer;
pub mod installer;
pub mod layout;
pub mod notifier;
pub mod pidlock;
pub mod plan;
pub mod queue;
pub mod verify;
pub mod worker;

pub use config::{ArchiveStyle, ArchiveTarget, Config};
pub use error::{DinstallError, Result};
pub use indexer::{ArchiveIndexer, IndexerHandle};
pub use installer::{ArchiveInstaller, InstallOutcome};
pub use queue::{IngestionTask, RetryQueue};
pub use worker::{IncomingWorker, WorkerCommand};

/// Process exit code: clean shutdown.
pub const EXIT_OK: u8 = 0;
/// Process exit code: configuration could not be loaded or resolved.
pub const EXIT_CONFIG: u8 = 2;
/// Process exit code: the lock file is held by a running process.
pub const EXIT_LOCK_HELD: u8 = 3;
/// Process exit code: the lock file exists but is stale or unreadable.
pub const EXIT_LOCK_INVALID: u8 = 4;
