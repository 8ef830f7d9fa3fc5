//! Upload manifest (`.changes` control file) parsing.
//!
//! A changes file is a single deb822 paragraph, usually wrapped in an OpenPGP
//! clearsign armor. Only the fields the ingestion pipeline consumes are given
//! dedicated accessors; everything else is kept verbatim in `fields`.

use crate::hash::{hash_path, HashAlgorithm};
use crate::{MetadataError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One file referenced by an upload manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// MD5 digest from the `Files` block.
    pub md5sum: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Archive section, e.g. `main/utils`.
    pub section: String,
    /// Priority, e.g. `optional`.
    pub priority: String,
    /// Bare file name (no directory component).
    pub filename: String,
    /// SHA-256 digest from the `Checksums-Sha256` block, if present.
    pub sha256: Option<String>,
}

/// A parsed upload manifest.
#[derive(Debug, Clone)]
pub struct ChangesFile {
    /// Source package name.
    pub source: String,
    /// Full version string.
    pub version: String,
    /// Target distribution name.
    pub distribution: String,
    /// Maintainer field.
    pub maintainer: Option<String>,
    /// Changed-By field.
    pub changed_by: Option<String>,
    /// Referenced files in manifest order.
    pub files: Vec<FileEntry>,
    /// All raw fields, lowercased keys.
    pub fields: HashMap<String, String>,
}

impl ChangesFile {
    /// Parse the manifest at `path`.
    pub fn parse_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    /// Parse manifest text. `path` is used in error messages only.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let mut fields: HashMap<String, String> = HashMap::new();
        let mut current_field: Option<String> = None;
        let mut current_value = String::new();
        let mut in_signature_header = false;

        for line in content.lines() {
            if line.starts_with("-----BEGIN PGP SIGNED MESSAGE-----") {
                // armor header lines (Hash: ...) follow until a blank line
                in_signature_header = true;
                continue;
            }
            if line.starts_with("-----BEGIN PGP SIGNATURE-----") {
                break;
            }
            if in_signature_header {
                if line.is_empty() {
                    in_signature_header = false;
                }
                continue;
            }
            if line.is_empty() {
                continue;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if current_field.is_some() {
                    current_value.push('\n');
                    current_value.push_str(line);
                } else {
                    return Err(MetadataError::MalformedLine {
                        file: path.to_path_buf(),
                        line: line.to_string(),
                    });
                }
            } else {
                if let Some(field) = current_field.take() {
                    fields.insert(field, current_value);
                    current_value = String::new();
                }
                match line.split_once(':') {
                    Some((field, value)) => {
                        current_field = Some(field.trim().to_lowercase());
                        current_value = value.trim().to_string();
                    }
                    None => {
                        return Err(MetadataError::MalformedLine {
                            file: path.to_path_buf(),
                            line: line.to_string(),
                        })
                    }
                }
            }
        }
        if let Some(field) = current_field {
            fields.insert(field, current_value);
        }

        let required = |fields: &HashMap<String, String>, name: &'static str| {
            fields
                .get(name)
                .map(|s| s.to_string())
                .ok_or(MetadataError::MissingField {
                    file: path.to_path_buf(),
                    field: name,
                })
        };

        let source = required(&fields, "source")?;
        let version = required(&fields, "version")?;
        let distribution = required(&fields, "distribution")?;
        // multiple distributions are not supported; take the first word
        let distribution = distribution
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        if distribution.is_empty() {
            return Err(MetadataError::MissingField {
                file: path.to_path_buf(),
                field: "distribution",
            });
        }

        let files_block = required(&fields, "files")?;
        let mut files = Self::parse_files_block(&files_block, path)?;

        if let Some(block) = fields.get("checksums-sha256") {
            let sha256s = Self::parse_checksums_block(block, path)?;
            for entry in &mut files {
                if let Some(digest) = sha256s.get(&entry.filename) {
                    entry.sha256 = Some(digest.clone());
                }
            }
        }

        Ok(Self {
            source,
            version,
            distribution,
            maintainer: fields.get("maintainer").cloned(),
            changed_by: fields.get("changed-by").cloned(),
            files,
            fields,
        })
    }

    /// Parse the five-column `Files` block.
    fn parse_files_block(block: &str, path: &Path) -> Result<Vec<FileEntry>> {
        let mut files = Vec::new();
        for line in block.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() != 5 {
                return Err(MetadataError::MalformedLine {
                    file: path.to_path_buf(),
                    line: line.to_string(),
                });
            }
            let size = parts[1]
                .parse::<u64>()
                .map_err(|_| MetadataError::InvalidField {
                    field: "size",
                    value: parts[1].to_string(),
                })?;
            files.push(FileEntry {
                md5sum: parts[0].to_string(),
                size,
                section: parts[2].to_string(),
                priority: parts[3].to_string(),
                filename: parts[4].to_string(),
                sha256: None,
            });
        }
        Ok(files)
    }

    /// Parse a three-column checksums block into filename → digest.
    fn parse_checksums_block(block: &str, path: &Path) -> Result<HashMap<String, String>> {
        let mut sums = HashMap::new();
        for line in block.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() != 3 {
                return Err(MetadataError::MalformedLine {
                    file: path.to_path_buf(),
                    line: line.to_string(),
                });
            }
            sums.insert(parts[2].to_string(), parts[0].to_string());
        }
        Ok(sums)
    }

    /// File names referenced by the manifest, in manifest order.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.filename.as_str())
    }

    /// Check that every referenced file is fully present in `dir`.
    ///
    /// Existence, size and MD5 digest are checked for each entry, plus the
    /// SHA-256 digest where the manifest carries one. The first failing file
    /// is reported; an upload still in progress shows up here as a missing
    /// file or a short size.
    pub fn verify_files(&self, dir: &Path) -> Result<()> {
        for entry in &self.files {
            let path = dir.join(&entry.filename);
            let metadata = match fs::metadata(&path) {
                Ok(m) => m,
                Err(_) => return Err(MetadataError::FileMissing(path)),
            };
            if metadata.len() != entry.size {
                return Err(MetadataError::SizeMismatch {
                    file: path,
                    actual: metadata.len(),
                    expected: entry.size,
                });
            }
            let mut algorithms = vec![HashAlgorithm::Md5];
            if entry.sha256.is_some() {
                algorithms.push(HashAlgorithm::Sha256);
            }
            let (_, hashes) = hash_path(&path, &algorithms)?;
            if hashes.get(&HashAlgorithm::Md5) != Some(entry.md5sum.as_str()) {
                return Err(MetadataError::ChecksumMismatch { file: path });
            }
            if let Some(expected) = &entry.sha256 {
                if hashes.get(&HashAlgorithm::Sha256) != Some(expected.as_str()) {
                    return Err(MetadataError::ChecksumMismatch { file: path });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(files_block: &str) -> String {
        format!(
            "Format: 1.8\n\
             Date: Tue, 04 Aug 2026 10:00:00 +0000\n\
             Source: hello\n\
             Binary: hello\n\
             Architecture: source amd64\n\
             Version: 2.10-3\n\
             Distribution: unstable\n\
             Maintainer: Jane Doe <jane@example.org>\n\
             Changed-By: John Doe <john@example.org>\n\
             Description:\n hello - example package\n\
             Changes:\n hello (2.10-3) unstable; urgency=medium\n .\n   * Test upload.\n\
             Files:\n{}",
            files_block
        )
    }

    #[test]
    fn test_parse_basic() {
        let text = sample(
            " 0123456789abcdef0123456789abcdef 1234 main/utils optional hello_2.10-3_amd64.deb\n",
        );
        let changes = ChangesFile::parse(&text, Path::new("hello.changes")).unwrap();
        assert_eq!(changes.source, "hello");
        assert_eq!(changes.version, "2.10-3");
        assert_eq!(changes.distribution, "unstable");
        assert_eq!(changes.changed_by.as_deref(), Some("John Doe <john@example.org>"));
        assert_eq!(changes.files.len(), 1);
        let entry = &changes.files[0];
        assert_eq!(entry.filename, "hello_2.10-3_amd64.deb");
        assert_eq!(entry.size, 1234);
        assert_eq!(entry.section, "main/utils");
    }

    #[test]
    fn test_parse_clearsigned() {
        let inner = sample(" 0123456789abcdef0123456789abcdef 12 main optional hello_2.10-3_amd64.deb\n");
        let text = format!(
            "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\n{}\n-----BEGIN PGP SIGNATURE-----\n\nnonsense\n-----END PGP SIGNATURE-----\n",
            inner
        );
        let changes = ChangesFile::parse(&text, Path::new("hello.changes")).unwrap();
        assert_eq!(changes.source, "hello");
        assert_eq!(changes.files.len(), 1);
    }

    #[test]
    fn test_missing_field() {
        let err = ChangesFile::parse("Source: x\nVersion: 1\n", Path::new("x.changes")).unwrap_err();
        assert!(matches!(
            err,
            MetadataError::MissingField {
                field: "distribution",
                ..
            }
        ));
    }

    #[test]
    fn test_verify_files() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"payload bytes";
        std::fs::write(dir.path().join("hello_1.0_all.deb"), payload).unwrap();
        let md5 = format!("{:x}", md5::compute(payload));

        let text = sample(&format!(
            " {} {} main optional hello_1.0_all.deb\n",
            md5,
            payload.len()
        ));
        let changes = ChangesFile::parse(&text, Path::new("hello.changes")).unwrap();
        changes.verify_files(dir.path()).unwrap();

        // short file reads as incomplete
        std::fs::write(dir.path().join("hello_1.0_all.deb"), b"pay").unwrap();
        assert!(matches!(
            changes.verify_files(dir.path()),
            Err(MetadataError::SizeMismatch { .. })
        ));

        // absent file reads as incomplete
        std::fs::remove_file(dir.path().join("hello_1.0_all.deb")).unwrap();
        assert!(matches!(
            changes.verify_files(dir.path()),
            Err(MetadataError::FileMissing(_))
        ));
    }

    #[test]
    fn test_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello_1.0_all.deb"), b"other bytes..").unwrap();
        let md5 = format!("{:x}", md5::compute(b"payload bytes"));
        let text = sample(&format!(" {} 13 main optional hello_1.0_all.deb\n", md5));
        let changes = ChangesFile::parse(&text, Path::new("hello.changes")).unwrap();
        assert!(matches!(
            changes.verify_files(dir.path()),
            Err(MetadataError::ChecksumMismatch { .. })
        ));
    }
}
