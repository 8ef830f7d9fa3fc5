//! Installation end-to-end: classification, atomic publication,
//! supersession and rejection against real directory trees.

mod common;

use common::{archive_target, make_installer, write_upload};
use debdrop::config::ArchiveStyle;
use debdrop::installer::InstallOutcome;
use repo_metadata::changes::ChangesFile;

#[tokio::test]
async fn test_install_flat_complete_upload() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let (installer, _layout, target) = make_installer(
        toplevel.path(),
        archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat),
    );

    let changes_path = write_upload(
        &incoming,
        "hello",
        "1.0-1",
        "unstable",
        &[
            ("hello_1.0-1_amd64.deb", b"deb payload"),
            ("hello_1.0-1.dsc", b"dsc payload"),
            ("hello_1.0.orig.tar.gz", b"orig payload"),
            ("hello_1.0-1.diff.gz", b"diff payload"),
        ],
    );
    let changes = ChangesFile::parse_path(&changes_path).unwrap();

    let outcome = installer.install(&changes_path, &changes).await.unwrap();
    assert_eq!(outcome, InstallOutcome::Installed);

    // files live at their target paths and are gone from incoming
    for name in [
        "hello_1.0-1_amd64.deb",
        "hello_1.0-1.dsc",
        "hello_1.0.orig.tar.gz",
        "hello_1.0-1.diff.gz",
    ] {
        assert!(target.dir.join(name).is_file(), "missing {}", name);
        assert!(!incoming.join(name).exists(), "{} left in incoming", name);
    }
    // the manifest marks the upload installed in place
    assert!(target.dir.join("hello_1.0-1_multi.changes").is_file());
    assert!(!changes_path.exists());
}

#[tokio::test]
async fn test_install_subdir_layout_splits_pools() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let (installer, _layout, target) = make_installer(
        toplevel.path(),
        archive_target(toplevel.path(), "stable", ArchiveStyle::Subdir),
    );

    let changes_path = write_upload(
        &incoming,
        "hello",
        "2.0-1",
        "stable",
        &[
            ("hello_2.0-1_amd64.deb", b"deb payload"),
            ("hello_2.0-1.dsc", b"dsc payload"),
        ],
    );
    let changes = ChangesFile::parse_path(&changes_path).unwrap();
    let outcome = installer.install(&changes_path, &changes).await.unwrap();
    assert_eq!(outcome, InstallOutcome::Installed);

    assert!(target.dir.join("amd64/hello_2.0-1_amd64.deb").is_file());
    assert!(target.dir.join("source/hello_2.0-1.dsc").is_file());
    assert!(target.dir.join("hello_2.0-1_multi.changes").is_file());
}

#[tokio::test]
async fn test_unknown_architecture_rejects_upload() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let (installer, _layout, target) = make_installer(
        toplevel.path(),
        archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat),
    );

    let changes_path = write_upload(
        &incoming,
        "hello",
        "1.0-1",
        "unstable",
        &[("hello_1.0-1_sparc.deb", b"deb payload")],
    );
    let changes = ChangesFile::parse_path(&changes_path).unwrap();
    let outcome = installer.install(&changes_path, &changes).await.unwrap();
    assert_eq!(outcome, InstallOutcome::Rejected);

    let reject = toplevel.path().join("reject");
    assert!(reject.join("hello_1.0-1_sparc.deb").is_file());
    assert!(reject.join("hello_1.0-1_multi.changes").is_file());
    let reason = std::fs::read_to_string(reject.join("hello_1.0-1.reason")).unwrap();
    assert!(reason.contains("unknown architecture"), "reason: {}", reason);
    // nothing was published
    assert!(!target.dir.join("hello_1.0-1_sparc.deb").exists());
}

#[tokio::test]
async fn test_supersession_retires_older_version() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let (installer, _layout, target) = make_installer(
        toplevel.path(),
        archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat),
    );

    // an older version already published
    std::fs::write(target.dir.join("hello_0.9-1_amd64.deb"), b"old deb").unwrap();
    // an unrelated package stays untouched
    std::fs::write(target.dir.join("other_1.0-1_amd64.deb"), b"other deb").unwrap();

    let changes_path = write_upload(
        &incoming,
        "hello",
        "1.0-1",
        "unstable",
        &[("hello_1.0-1_amd64.deb", b"new deb")],
    );
    let changes = ChangesFile::parse_path(&changes_path).unwrap();
    let outcome = installer.install(&changes_path, &changes).await.unwrap();
    assert_eq!(outcome, InstallOutcome::Installed);

    assert!(!target.dir.join("hello_0.9-1_amd64.deb").exists());
    assert!(!target.dir.join("hello_0.9-1_amd64.deb.old").exists());
    assert!(target.dir.join("hello_1.0-1_amd64.deb").is_file());
    assert!(target.dir.join("other_1.0-1_amd64.deb").is_file());
}

#[tokio::test]
async fn test_keep_old_policy_retains_older_version() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let mut target = archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat);
    target.keep_old = true;
    let (installer, _layout, target) = make_installer(toplevel.path(), target);

    std::fs::write(target.dir.join("hello_0.9-1_amd64.deb"), b"old deb").unwrap();

    let changes_path = write_upload(
        &incoming,
        "hello",
        "1.0-1",
        "unstable",
        &[("hello_1.0-1_amd64.deb", b"new deb")],
    );
    let changes = ChangesFile::parse_path(&changes_path).unwrap();
    installer.install(&changes_path, &changes).await.unwrap();

    assert!(target.dir.join("hello_0.9-1_amd64.deb").is_file());
    assert!(target.dir.join("hello_1.0-1_amd64.deb").is_file());
}

/// A source-only upload that closes an architecture still carrying older
/// binaries must not retire the old source artifacts; the next upload that
/// does supply binaries retires everything.
#[tokio::test]
async fn test_source_only_upload_keeps_sources_while_old_binaries_live() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let (installer, _layout, target) = make_installer(
        toplevel.path(),
        archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat),
    );

    // version 1.0-1 fully published: binary plus source artifacts
    for (name, content) in [
        ("hello_1.0-1_amd64.deb", "old deb"),
        ("hello_1.0-1.dsc", "old dsc"),
        ("hello_1.0-1.diff.gz", "old diff"),
        ("hello_1.0.orig.tar.gz", "old orig"),
    ] {
        std::fs::write(target.dir.join(name), content).unwrap();
    }

    // source-only 1.1-1: no amd64 binary supplied
    let changes_path = write_upload(
        &incoming,
        "hello",
        "1.1-1",
        "unstable",
        &[
            ("hello_1.1-1.dsc", b"new dsc"),
            ("hello_1.1-1.diff.gz", b"new diff"),
            ("hello_1.1.orig.tar.gz", b"new orig"),
        ],
    );
    let changes = ChangesFile::parse_path(&changes_path).unwrap();
    let outcome = installer.install(&changes_path, &changes).await.unwrap();
    assert_eq!(outcome, InstallOutcome::Installed);

    // the old binary still needs its source artifacts
    assert!(target.dir.join("hello_1.0-1_amd64.deb").is_file());
    assert!(target.dir.join("hello_1.0-1.dsc").is_file());
    assert!(target.dir.join("hello_1.0.orig.tar.gz").is_file());
    assert!(target.dir.join("hello_1.1-1.dsc").is_file());

    // 1.1-2 supplies an amd64 binary again: everything older is retired
    let changes_path = write_upload(
        &incoming,
        "hello",
        "1.1-2",
        "unstable",
        &[
            ("hello_1.1-2_amd64.deb", b"new deb"),
            ("hello_1.1-2.dsc", b"newer dsc"),
            ("hello_1.1-2.diff.gz", b"newer diff"),
        ],
    );
    let changes = ChangesFile::parse_path(&changes_path).unwrap();
    let outcome = installer.install(&changes_path, &changes).await.unwrap();
    assert_eq!(outcome, InstallOutcome::Installed);

    assert!(!target.dir.join("hello_1.0-1_amd64.deb").exists());
    assert!(!target.dir.join("hello_1.0-1.dsc").exists());
    assert!(!target.dir.join("hello_1.0.orig.tar.gz").exists());
    assert!(!target.dir.join("hello_1.1-1.dsc").exists());
    assert!(target.dir.join("hello_1.1-2_amd64.deb").is_file());
    assert!(target.dir.join("hello_1.1-2.dsc").is_file());
    // the 1.1 upstream tarball is not older than 1.1-2's upstream component
    assert!(target.dir.join("hello_1.1.orig.tar.gz").is_file());
}

#[tokio::test]
async fn test_rename_failure_rejects_and_restores_incoming() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let (installer, _layout, target) = make_installer(
        toplevel.path(),
        archive_target(toplevel.path(), "stable", ArchiveStyle::Subdir),
    );

    let changes_path = write_upload(
        &incoming,
        "hello",
        "1.0-1",
        "stable",
        &[("hello_1.0-1_amd64.deb", b"deb payload")],
    );
    let changes = ChangesFile::parse_path(&changes_path).unwrap();

    // sabotage the pool directory so the publish rename fails
    std::fs::remove_dir(target.dir.join("amd64")).unwrap();

    let outcome = installer.install(&changes_path, &changes).await.unwrap();
    assert_eq!(outcome, InstallOutcome::Rejected);

    // the transaction rolled back and the reject path picked the files up
    let reject = toplevel.path().join("reject");
    assert!(reject.join("hello_1.0-1_amd64.deb").is_file());
    assert!(reject.join("hello_1.0-1_multi.changes").is_file());
    assert!(reject.join("hello_1.0-1.reason").is_file());
}

#[tokio::test]
async fn test_reject_writes_reason_file() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let (installer, _layout, _target) = make_installer(
        toplevel.path(),
        archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat),
    );

    let changes_path = write_upload(
        &incoming,
        "hello",
        "1.0-1",
        "unstable",
        &[("hello_1.0-1_amd64.deb", b"deb payload")],
    );
    let changes = ChangesFile::parse_path(&changes_path).unwrap();
    installer
        .reject(&changes_path, &changes, "it displeased the machine")
        .unwrap();

    let reject = toplevel.path().join("reject");
    assert!(reject.join("hello_1.0-1_amd64.deb").is_file());
    assert!(reject.join("hello_1.0-1_multi.changes").is_file());
    let reason = std::fs::read_to_string(reject.join("hello_1.0-1.reason")).unwrap();
    assert_eq!(reason, "it displeased the machine\n");
    assert!(!changes_path.exists());
}

#[tokio::test]
async fn test_reject_tolerates_missing_referenced_files() {
    let toplevel = tempfile::tempdir().unwrap();
    let incoming = toplevel.path().join("incoming");
    let (installer, _layout, _target) = make_installer(
        toplevel.path(),
        archive_target(toplevel.path(), "unstable", ArchiveStyle::Flat),
    );

    // manifest references a file that was never uploaded
    let changes_path = write_upload(&incoming, "hello", "1.0-1", "unstable", &[]);
    let text = std::fs::read_to_string(&changes_path).unwrap();
    std::fs::write(
        &changes_path,
        format!(
            "{} aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa 10 main optional hello_1.0-1_amd64.deb\n",
            text
        ),
    )
    .unwrap();
    let changes = ChangesFile::parse_path(&changes_path).unwrap();

    installer
        .reject(&changes_path, &changes, "upload never completed")
        .unwrap();
    let reject = toplevel.path().join("reject");
    assert!(reject.join("hello_1.0-1_multi.changes").is_file());
    assert!(reject.join("hello_1.0-1.reason").is_file());
}
