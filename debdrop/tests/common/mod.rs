//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use debdrop::config::{ArchiveStyle, ArchiveTarget};
use debdrop::indexer::{ArchiveIndexer, IndexerHandle};
use debdrop::installer::ArchiveInstaller;
use debdrop::layout::{make_layout, ArchiveLayout};
use debdrop::verify::AcceptAllVerifier;
use repo_metadata::hash::{HashAlgorithm, MultiHasher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = MultiHasher::new(&[HashAlgorithm::Md5]);
    hasher.update(data);
    let (_, hashes) = hasher.finalize();
    hashes.get(&HashAlgorithm::Md5).unwrap().to_string()
}

/// A target with test-friendly policy defaults.
pub fn archive_target(toplevel: &Path, name: &str, style: ArchiveStyle) -> ArchiveTarget {
    ArchiveTarget {
        name: name.to_string(),
        dir: toplevel.join(name),
        style,
        architectures: vec!["all".to_string(), "i386".to_string(), "amd64".to_string()],
        aliases: Vec::new(),
        verify_sigs: false,
        keyrings: Vec::new(),
        keep_old: false,
        chown_changes_files: false,
        generate_release: false,
        dynamic_reindex: true,
        experimental_release: false,
        release_origin: None,
        release_label: None,
        release_suite: None,
        release_codename: None,
        release_description: None,
        release_signscript: None,
        pre_install_script: None,
        post_install_script: None,
    }
}

/// Write the referenced files plus a manifest describing them into
/// `incoming`, returning the manifest path.
pub fn write_upload(
    incoming: &Path,
    source: &str,
    version: &str,
    distribution: &str,
    files: &[(&str, &[u8])],
) -> PathBuf {
    fs::create_dir_all(incoming).unwrap();
    let mut files_block = String::new();
    for (name, content) in files {
        fs::write(incoming.join(name), content).unwrap();
        files_block.push_str(&format!(
            " {} {} main optional {}\n",
            md5_hex(content),
            content.len(),
            name
        ));
    }
    let text = format!(
        "Format: 1.8\n\
         Source: {source}\n\
         Binary: {source}\n\
         Architecture: any\n\
         Version: {version}\n\
         Distribution: {distribution}\n\
         Maintainer: Test Maintainer <maintainer@example.org>\n\
         Changed-By: Test Uploader <uploader@example.org>\n\
         Files:\n{files_block}"
    );
    let path = incoming.join(format!("{source}_{version}_multi.changes"));
    fs::write(&path, text).unwrap();
    path
}

/// Build an installer (accept-all verifier) plus its layout for `target`.
pub fn make_installer(
    toplevel: &Path,
    target: ArchiveTarget,
) -> (ArchiveInstaller, Arc<dyn ArchiveLayout>, Arc<ArchiveTarget>) {
    let target = Arc::new(target);
    let layout = make_layout(Arc::clone(&target));
    layout.ensure_dirs().unwrap();
    let installer = ArchiveInstaller::new(
        Arc::clone(&target),
        Arc::clone(&layout),
        toplevel.join("reject"),
        Arc::new(AcceptAllVerifier),
    );
    (installer, layout, target)
}

/// An indexer handle whose indexer is never run; signals are simply
/// dropped. Good enough for worker tests that don't exercise reindexing.
pub fn detached_indexer_handle(target: &Arc<ArchiveTarget>) -> IndexerHandle {
    let layout = make_layout(Arc::clone(target));
    let (_indexer, handle) = ArchiveIndexer::new(
        Arc::clone(target),
        layout,
        "apt-ftparchive".to_string(),
        CancellationToken::new(),
    );
    handle
}
