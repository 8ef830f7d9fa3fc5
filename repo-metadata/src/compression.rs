//! Compression variants for generated index files.

use crate::Result;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Suffix for files still being written.
const TMP_SUFFIX: &str = ".new";

/// Compression formats an index file is published in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    None,
    /// Gzip.
    Gzip,
    /// Bzip2.
    Bzip2,
}

impl Compression {
    /// File name extension, including the leading dot for compressed formats.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Bzip2 => ".bz2",
        }
    }

    /// Wrap a writer in the matching encoder.
    pub fn writer<W: Write + 'static>(self, writer: W) -> Box<dyn Write> {
        match self {
            Compression::None => Box::new(writer),
            Compression::Gzip => Box::new(flate2::write::GzEncoder::new(
                writer,
                flate2::Compression::default(),
            )),
            Compression::Bzip2 => Box::new(bzip2::write::BzEncoder::new(
                writer,
                bzip2::Compression::default(),
            )),
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Bzip2 => write!(f, "bzip2"),
        }
    }
}

/// Writes one data stream to several compression variants at once.
///
/// Each variant is written under a temporary `.new` name; `commit` renames
/// every variant over its published name only after all writers finished
/// cleanly, and `discard` removes the temporaries instead. Dropping the
/// writer without calling either leaves the temporaries behind for the next
/// run to overwrite.
pub struct MultiCompressedWriter {
    writers: Vec<Box<dyn Write>>,
    paths: Vec<(PathBuf, PathBuf)>,
}

impl MultiCompressedWriter {
    /// Open temporary files for `base` plus one per compression variant.
    pub fn create(base: &Path, compressions: &[Compression]) -> Result<Self> {
        let mut writers = Vec::new();
        let mut paths = Vec::new();
        for &compression in compressions {
            let mut final_path = base.as_os_str().to_owned();
            final_path.push(compression.extension());
            let final_path = PathBuf::from(final_path);
            let mut tmp_path = final_path.as_os_str().to_owned();
            tmp_path.push(TMP_SUFFIX);
            let tmp_path = PathBuf::from(tmp_path);
            let file = BufWriter::new(File::create(&tmp_path)?);
            writers.push(compression.writer(file));
            paths.push((tmp_path, final_path));
        }
        Ok(Self { writers, paths })
    }

    /// Paths of the files this writer publishes on commit.
    pub fn final_paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(|(_, f)| f.as_path())
    }

    /// Finish all encoders and swap every variant into place.
    pub fn commit(mut self) -> Result<Vec<PathBuf>> {
        self.finish()?;
        let mut published = Vec::new();
        for (tmp, final_path) in &self.paths {
            fs::rename(tmp, final_path)?;
            published.push(final_path.clone());
        }
        Ok(published)
    }

    /// Finish the encoders and remove the temporaries.
    pub fn discard(mut self) {
        let _ = self.finish();
        for (tmp, _) in &self.paths {
            let _ = fs::remove_file(tmp);
        }
    }

    fn finish(&mut self) -> Result<()> {
        for writer in &mut self.writers {
            writer.flush()?;
        }
        // Encoders write their stream trailer when dropped.
        self.writers.clear();
        Ok(())
    }
}

impl Write for MultiCompressedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for writer in &mut self.writers {
            writer.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for writer in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_COMPRESSIONS;
    use std::io::Read;

    #[test]
    fn test_extensions() {
        assert_eq!(Compression::None.extension(), "");
        assert_eq!(Compression::Gzip.extension(), ".gz");
        assert_eq!(Compression::Bzip2.extension(), ".bz2");
    }

    #[test]
    fn test_commit_publishes_all_variants() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Packages");
        let mut writer = MultiCompressedWriter::create(&base, DEFAULT_COMPRESSIONS).unwrap();
        writer.write_all(b"Package: hello\n").unwrap();
        let published = writer.commit().unwrap();

        assert_eq!(published.len(), 3);
        assert_eq!(fs::read(&base).unwrap(), b"Package: hello\n");

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(File::open(dir.path().join("Packages.gz")).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"Package: hello\n");

        decoded.clear();
        bzip2::read::BzDecoder::new(File::open(dir.path().join("Packages.bz2")).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"Package: hello\n");

        // no temporaries left behind
        assert!(!dir.path().join("Packages.new").exists());
        assert!(!dir.path().join("Packages.gz.new").exists());
    }

    #[test]
    fn test_discard_leaves_nothing_published() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Sources");
        let mut writer = MultiCompressedWriter::create(&base, DEFAULT_COMPRESSIONS).unwrap();
        writer.write_all(b"partial").unwrap();
        writer.discard();

        assert!(!base.exists());
        assert!(!dir.path().join("Sources.gz").exists());
        assert!(!dir.path().join("Sources.new").exists());
    }
}
