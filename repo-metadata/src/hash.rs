//! Multi-algorithm file hashing for Release hash blocks.

use crate::Result;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Hash algorithms understood by apt-style Release files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// MD5.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl HashAlgorithm {
    /// Field name used in Release files.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5Sum",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha512 => "SHA512",
        }
    }

    /// All supported algorithms.
    pub fn all() -> &'static [HashAlgorithm] {
        &[
            HashAlgorithm::Md5,
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha512,
        ]
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hex digests of one file, keyed by algorithm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashSet {
    hashes: HashMap<HashAlgorithm, String>,
}

impl HashSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a digest.
    pub fn insert(&mut self, algorithm: HashAlgorithm, hash: String) {
        self.hashes.insert(algorithm, hash);
    }

    /// Look up a digest.
    pub fn get(&self, algorithm: &HashAlgorithm) -> Option<&str> {
        self.hashes.get(algorithm).map(|s| s.as_str())
    }

    /// Iterate over the recorded digests.
    pub fn iter(&self) -> impl Iterator<Item = (&HashAlgorithm, &str)> {
        self.hashes.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Number of recorded digests.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }
}

/// A file path with its size and digests, as listed in a Release hash block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedFile {
    /// Path relative to the directory holding the Release file.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Digests of the file contents.
    pub hashes: HashSet,
}

impl HashedFile {
    /// Create an entry with no digests yet.
    pub fn new<S: Into<String>>(path: S, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            hashes: HashSet::new(),
        }
    }

    /// Record a digest.
    pub fn add_hash(&mut self, algorithm: HashAlgorithm, hash: String) {
        self.hashes.insert(algorithm, hash);
    }

    /// Look up a digest.
    pub fn get_hash(&self, algorithm: &HashAlgorithm) -> Option<&str> {
        self.hashes.get(algorithm)
    }
}

/// Computes several digests over one pass of the data.
pub struct MultiHasher {
    md5: Option<md5::Context>,
    sha1: Option<sha1::Sha1>,
    sha256: Option<sha2::Sha256>,
    sha512: Option<sha2::Sha512>,
    size: u64,
}

impl MultiHasher {
    /// Create a hasher for the given algorithms.
    pub fn new(algorithms: &[HashAlgorithm]) -> Self {
        use sha1::Digest as _;
        use sha2::Digest as _;
        let mut hasher = Self {
            md5: None,
            sha1: None,
            sha256: None,
            sha512: None,
            size: 0,
        };
        for &algorithm in algorithms {
            match algorithm {
                HashAlgorithm::Md5 => hasher.md5 = Some(md5::Context::new()),
                HashAlgorithm::Sha1 => hasher.sha1 = Some(sha1::Sha1::new()),
                HashAlgorithm::Sha256 => hasher.sha256 = Some(sha2::Sha256::new()),
                HashAlgorithm::Sha512 => hasher.sha512 = Some(sha2::Sha512::new()),
            }
        }
        hasher
    }

    /// Feed data into every active digest.
    pub fn update(&mut self, data: &[u8]) {
        self.size += data.len() as u64;
        if let Some(ref mut hasher) = self.md5 {
            hasher.consume(data);
        }
        if let Some(ref mut hasher) = self.sha1 {
            use sha1::Digest;
            hasher.update(data);
        }
        if let Some(ref mut hasher) = self.sha256 {
            use sha2::Digest;
            hasher.update(data);
        }
        if let Some(ref mut hasher) = self.sha512 {
            use sha2::Digest;
            hasher.update(data);
        }
    }

    /// Finish all digests, returning the byte count and the hex digests.
    pub fn finalize(self) -> (u64, HashSet) {
        let mut hash_set = HashSet::new();
        if let Some(hasher) = self.md5 {
            hash_set.insert(HashAlgorithm::Md5, format!("{:x}", hasher.compute()));
        }
        if let Some(hasher) = self.sha1 {
            use sha1::Digest;
            hash_set.insert(HashAlgorithm::Sha1, format!("{:x}", hasher.finalize()));
        }
        if let Some(hasher) = self.sha256 {
            use sha2::Digest;
            hash_set.insert(HashAlgorithm::Sha256, format!("{:x}", hasher.finalize()));
        }
        if let Some(hasher) = self.sha512 {
            use sha2::Digest;
            hash_set.insert(HashAlgorithm::Sha512, format!("{:x}", hasher.finalize()));
        }
        (self.size, hash_set)
    }
}

impl Write for MultiHasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Hash everything readable from `reader`.
pub fn hash_reader<R: Read>(mut reader: R, algorithms: &[HashAlgorithm]) -> Result<(u64, HashSet)> {
    let mut hasher = MultiHasher::new(algorithms);
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Hash a file on disk.
pub fn hash_path(path: &Path, algorithms: &[HashAlgorithm]) -> Result<(u64, HashSet)> {
    hash_reader(File::open(path)?, algorithms)
}
