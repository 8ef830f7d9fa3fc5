//! Worker orchestration: scanning, retry backoff, timeout rejection and
//! alias resolution against real directory trees.

mod common;

use common::{archive_target, detached_indexer_handle, make_installer, write_upload};
use debdrop::config::ArchiveStyle;
use debdrop::worker::{ArchiveEntry, IncomingWorker};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn make_worker(
    toplevel: &Path,
    targets: Vec<debdrop::config::ArchiveTarget>,
    max_retry_time: Duration,
) -> IncomingWorker {
    let mut archives = Vec::new();
    for target in targets {
        let (installer, _layout, target) = make_installer(toplevel, target);
        let indexer = detached_indexer_handle(&target);
        archives.push(ArchiveEntry { installer, indexer });
    }
    IncomingWorker::new(
        toplevel.join("incoming"),
        archives,
        max_retry_time,
        Duration::from_secs(30),
        false,
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn test_scan_and_install_complete_upload() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let mut worker = make_worker(
        toplevel.path(),
        vec![archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat)],
        Duration::from_secs(600),
    );

    write_upload(
        &incoming,
        "hello",
        "1.0-1",
        "unstable",
        &[("hello_1.0-1_amd64.deb", b"deb payload")],
    );

    worker.scan();
    worker.drain_due(false).await;

    let archive = toplevel.path().join("unstable");
    assert!(archive.join("hello_1.0-1_amd64.deb").is_file());
    assert!(archive.join("hello_1.0-1_multi.changes").is_file());
    assert!(!incoming.join("hello_1.0-1_multi.changes").exists());
    assert_eq!(worker.screwed_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_incomplete_upload_is_retried_with_backoff() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let mut worker = make_worker(
        toplevel.path(),
        vec![archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat)],
        Duration::from_secs(600),
    );

    let changes_path = write_upload(
        &incoming,
        "hello",
        "1.0-1",
        "unstable",
        &[("hello_1.0-1_amd64.deb", b"deb payload")],
    );
    // the referenced file hasn't finished uploading
    std::fs::remove_file(incoming.join("hello_1.0-1_amd64.deb")).unwrap();

    worker.scan();
    worker.drain_due(false).await;

    // nothing installed, nothing rejected, manifest still in place
    assert!(changes_path.is_file());
    assert!(!toplevel.path().join("unstable/hello_1.0-1_multi.changes").exists());

    // not due yet: draining again immediately is a no-op
    worker.drain_due(false).await;
    assert!(changes_path.is_file());

    // the file arrives; after the backoff delay the task becomes due
    std::fs::write(incoming.join("hello_1.0-1_amd64.deb"), b"deb payload").unwrap();
    tokio::time::advance(Duration::from_secs(31)).await;
    worker.drain_due(false).await;

    assert!(toplevel
        .path()
        .join("unstable/hello_1.0-1_amd64.deb")
        .is_file());
}

#[tokio::test(start_paused = true)]
async fn test_upload_never_completing_is_rejected_with_timeout() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let mut worker = make_worker(
        toplevel.path(),
        vec![archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat)],
        Duration::from_secs(60),
    );

    let changes_path = write_upload(
        &incoming,
        "hello",
        "1.0-1",
        "unstable",
        &[("hello_1.0-1_amd64.deb", b"deb payload")],
    );
    std::fs::remove_file(incoming.join("hello_1.0-1_amd64.deb")).unwrap();

    worker.scan();
    worker.drain_due(false).await;
    assert!(changes_path.is_file());

    tokio::time::advance(Duration::from_secs(61)).await;
    worker.drain_due(false).await;

    let reject = toplevel.path().join("reject");
    assert!(reject.join("hello_1.0-1_multi.changes").is_file());
    let reason = std::fs::read_to_string(reject.join("hello_1.0-1.reason")).unwrap();
    assert!(reason.contains("60 seconds"), "reason: {}", reason);
    assert!(!changes_path.exists());
}

#[tokio::test]
async fn test_unparseable_manifest_left_for_later_scan() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    std::fs::create_dir_all(&incoming).unwrap();
    let mut worker = make_worker(
        toplevel.path(),
        vec![archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat)],
        Duration::from_secs(600),
    );

    // a manifest still being uploaded: truncated garbage
    let path = incoming.join("partial_1.0-1_amd64.changes");
    std::fs::write(&path, "Source: partial\nVers").unwrap();

    worker.scan();
    worker.drain_due(false).await;

    // skipped, not screwed, not rejected
    assert!(path.is_file());
    assert_eq!(worker.screwed_count(), 0);
    assert!(!toplevel.path().join("reject/partial_1.0-1.reason").exists());
}

#[tokio::test]
async fn test_unknown_distribution_is_screwed() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let mut worker = make_worker(
        toplevel.path(),
        vec![archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat)],
        Duration::from_secs(600),
    );

    let changes_path = write_upload(
        &incoming,
        "hello",
        "1.0-1",
        "nosuchdist",
        &[("hello_1.0-1_amd64.deb", b"deb payload")],
    );

    worker.scan();
    worker.drain_due(false).await;

    assert_eq!(worker.screwed_count(), 1);
    assert!(changes_path.is_file());

    // a later scan skips the screwed manifest instead of retrying it
    worker.scan();
    worker.drain_due(false).await;
    assert_eq!(worker.screwed_count(), 1);
}

#[tokio::test]
async fn test_alias_resolves_to_real_distribution() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let mut target = archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat);
    target.aliases = vec!["sid".to_string()];
    let mut worker = make_worker(toplevel.path(), vec![target], Duration::from_secs(600));

    write_upload(
        &incoming,
        "hello",
        "1.0-1",
        "sid",
        &[("hello_1.0-1_amd64.deb", b"deb payload")],
    );

    worker.scan();
    worker.drain_due(false).await;

    assert!(toplevel
        .path()
        .join("unstable/hello_1.0-1_amd64.deb")
        .is_file());
}

#[tokio::test]
async fn test_vanished_manifest_is_dropped_quietly() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let mut worker = make_worker(
        toplevel.path(),
        vec![archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat)],
        Duration::from_secs(600),
    );

    let changes_path = write_upload(
        &incoming,
        "hello",
        "1.0-1",
        "unstable",
        &[("hello_1.0-1_amd64.deb", b"deb payload")],
    );
    std::fs::remove_file(incoming.join("hello_1.0-1_amd64.deb")).unwrap();

    worker.scan();
    // uploader gave up and deleted the manifest
    std::fs::remove_file(&changes_path).unwrap();
    worker.drain_due(false).await;

    assert_eq!(worker.screwed_count(), 0);
    assert!(!toplevel.path().join("reject/hello_1.0-1.reason").exists());
}
