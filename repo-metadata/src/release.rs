//! Release file model and rendering.
//!
//! The Release files written here carry the archive identity fields followed
//! by one hash block per digest algorithm, each line naming an index artifact
//! relative to the directory holding the Release file.

use crate::hash::{HashAlgorithm, HashedFile};
use crate::{MetadataError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;

/// A Release control file for one archive directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Origin field.
    pub origin: Option<String>,
    /// Label field.
    pub label: Option<String>,
    /// Suite field.
    pub suite: Option<String>,
    /// Codename field.
    pub codename: Option<String>,
    /// Whether `NotAutomatic: yes` is emitted.
    pub not_automatic: bool,
    /// Timestamp written into the Date field.
    pub date: DateTime<Utc>,
    /// Architectures covered by this Release.
    pub architectures: Vec<String>,
    /// Description field.
    pub description: Option<String>,
    /// Index artifacts with their sizes and digests.
    pub files: Vec<HashedFile>,
}

impl Release {
    /// Create an empty Release stamped with the given time.
    pub fn new(date: DateTime<Utc>) -> Self {
        Self {
            origin: None,
            label: None,
            suite: None,
            codename: None,
            not_automatic: false,
            date,
            architectures: Vec::new(),
            description: None,
            files: Vec::new(),
        }
    }

    /// Add an index artifact entry.
    pub fn add_file(&mut self, file: HashedFile) {
        self.files.push(file);
    }

    /// Entries carrying a digest for `algorithm`.
    pub fn files_with_hash(&self, algorithm: &HashAlgorithm) -> Vec<(&HashedFile, &str)> {
        self.files
            .iter()
            .filter_map(|file| file.get_hash(algorithm).map(|hash| (file, hash)))
            .collect()
    }

    /// Render the Release file contents.
    pub fn render(&self) -> String {
        let mut content = String::new();
        if let Some(ref origin) = self.origin {
            content.push_str(&format!("Origin: {}\n", origin));
        }
        if let Some(ref label) = self.label {
            content.push_str(&format!("Label: {}\n", label));
        }
        if let Some(ref suite) = self.suite {
            content.push_str(&format!("Suite: {}\n", suite));
        }
        if let Some(ref codename) = self.codename {
            content.push_str(&format!("Codename: {}\n", codename));
        }
        if self.not_automatic {
            content.push_str("NotAutomatic: yes\n");
        }
        content.push_str(&format!(
            "Date: {}\n",
            self.date.format("%a, %d %b %Y %H:%M:%S UTC")
        ));
        if !self.architectures.is_empty() {
            content.push_str(&format!(
                "Architectures: {}\n",
                self.architectures.join(" ")
            ));
        }
        if let Some(ref description) = self.description {
            content.push_str(&format!("Description: {}\n", description));
        }
        for algorithm in HashAlgorithm::all() {
            let files = self.files_with_hash(algorithm);
            if files.is_empty() {
                continue;
            }
            content.push_str(&format!("{}:\n", algorithm.as_str()));
            for (file, hash) in files {
                content.push_str(&format!(" {} {:>15} {}\n", hash, file.size, file.path));
            }
        }
        content
    }

    /// Parse Release file contents, the inverse of [`Release::render`].
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let mut release = Release::new(Utc::now());
        let mut current_block: Option<HashAlgorithm> = None;

        for line in content.lines() {
            if line.is_empty() {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                let algorithm = current_block.ok_or_else(|| MetadataError::MalformedLine {
                    file: path.to_path_buf(),
                    line: line.to_string(),
                })?;
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() != 3 {
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
                match release.files.iter().position(|f| f.path == parts[2]) {
                    Some(index) => {
                        release.files[index].add_hash(algorithm, parts[0].to_string())
                    }
                    None => {
                        let mut file = HashedFile::new(parts[2], size);
                        file.add_hash(algorithm, parts[0].to_string());
                        release.files.push(file);
                    }
                }
                continue;
            }

            current_block = None;
            let (field, value) = line.split_once(':').ok_or_else(|| {
                MetadataError::MalformedLine {
                    file: path.to_path_buf(),
                    line: line.to_string(),
                }
            })?;
            let value = value.trim();
            match field {
                "Origin" => release.origin = Some(value.to_string()),
                "Label" => release.label = Some(value.to_string()),
                "Suite" => release.suite = Some(value.to_string()),
                "Codename" => release.codename = Some(value.to_string()),
                "NotAutomatic" => release.not_automatic = value.eq_ignore_ascii_case("yes"),
                "Date" => {
                    let normalized = value.replace(" UTC", " +0000");
                    release.date = DateTime::parse_from_rfc2822(&normalized)
                        .map_err(|_| MetadataError::InvalidField {
                            field: "Date",
                            value: value.to_string(),
                        })?
                        .with_timezone(&Utc);
                }
                "Architectures" => {
                    release.architectures =
                        value.split_whitespace().map(|s| s.to_string()).collect();
                }
                "Description" => release.description = Some(value.to_string()),
                "MD5Sum" => current_block = Some(HashAlgorithm::Md5),
                "SHA1" => current_block = Some(HashAlgorithm::Sha1),
                "SHA256" => current_block = Some(HashAlgorithm::Sha256),
                "SHA512" => current_block = Some(HashAlgorithm::Sha512),
                _ => {}
            }
        }
        Ok(release)
    }
}

impl std::fmt::Display for Release {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}
