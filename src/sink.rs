use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Output file receiving flushed trace records, opened once per mount.
pub struct TraceSink {
    path: Option<PathBuf>,
    out: Box<dyn Write + Send>,
}

impl TraceSink {
    /// Create (or truncate) the trace file at `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            out: Box::new(file),
        })
    }

    /// Wrap an arbitrary writer, e.g. an in-memory buffer.
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            path: None,
            out: Box::new(writer),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write one complete record and push it to the OS before returning.
    pub fn write_record(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.out.flush()
    }
}

impl std::fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSink")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn create_truncates_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace.bin");
        fs::write(&path, b"left over from a previous mount").unwrap();

        let mut sink = TraceSink::create(&path).unwrap();
        assert_eq!(sink.path(), Some(path.as_path()));
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        sink.write_record(b"one").unwrap();
        sink.write_record(b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"onetwo");
    }

    #[test]
    fn create_fails_in_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("trace.bin");
        assert!(TraceSink::create(&path).is_err());
    }
}
