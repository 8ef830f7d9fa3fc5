//! Metadata handling for Debian-style package archives.
//!
//! This library covers the file formats an archive ingestion daemon needs to
//! read and write: upload manifests (`.changes` control files), `Release`
//! files with their hash blocks, multi-algorithm file hashing, and writing an
//! index stream simultaneously to several compression variants.
//!
//! The text grammar supported here is deliberately minimal: single deb822
//! paragraphs with continuation lines, optionally wrapped in an OpenPGP
//! clearsign armor. Signature *verification* is out of scope for this crate.

pub mod changes;
pub mod compression;
pub mod error;
pub mod hash;
pub mod release;
pub mod version;

pub use changes::{ChangesFile, FileEntry};
pub use compression::{Compression, MultiCompressedWriter};
pub use error::{MetadataError, Result};
pub use hash::{hash_path, HashAlgorithm, HashSet, HashedFile, MultiHasher};
pub use release::Release;

/// Compression variants generated for every index file.
pub const DEFAULT_COMPRESSIONS: &[Compression] =
    &[Compression::None, Compression::Gzip, Compression::Bzip2];

/// Hash algorithms written into Release hash blocks.
pub const DEFAULT_HASH_ALGORITHMS: &[HashAlgorithm] = &[
    HashAlgorithm::Md5,
    HashAlgorithm::Sha1,
    HashAlgorithm::Sha256,
];
