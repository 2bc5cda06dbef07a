//! The traced pass-through layer.
//!
//! Each operation is delegated to the lower storage first; its real outcome
//! is then recorded (if the category is enabled) and returned unchanged.
//! Nothing that goes wrong while tracing reaches the caller.

use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::control::ControlError;
use crate::lower::{open_result, transfer_result, DirLower, LowerStorage};
use crate::options::{MountOptions, OptionsError};
use crate::record::{OpKind, Record, RecordId};
use crate::sink::TraceSink;
use crate::tracer::Tracer;

#[derive(Debug, Error)]
pub enum MountError {
    #[error("invalid mount options")]
    Options(#[from] OptionsError),
    #[error("cannot access lower directory {}", path.display())]
    Lower {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot open trace file {}", path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An open file on the traced mount.
///
/// Remembers the id of the record describing its own open, so that later
/// records for this handle can point back at it. `None` means the open was
/// not traced, in which case closing the handle is not traced either.
#[derive(Debug)]
pub struct TracedFile<H> {
    handle: H,
    open_record_id: Option<RecordId>,
}

impl<H> TracedFile<H> {
    pub fn open_record_id(&self) -> Option<RecordId> {
        self.open_record_id
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }
}

/// One mounted instance: a lower storage layer plus its trace context.
#[derive(Debug)]
pub struct TracedFs<L> {
    lower: L,
    tracer: Tracer,
}

impl TracedFs<DirLower> {
    /// Mount over the directory `lower_root` with the raw `tfile=<path>` option.
    ///
    /// The lower directory is checked before the trace file is created, so a
    /// bad lower path leaves nothing behind.
    pub fn mount(lower_root: impl AsRef<Path>, raw_options: &str) -> Result<Self, MountError> {
        let lower_root = lower_root.as_ref();
        let options: MountOptions = raw_options.parse()?;
        let lower = DirLower::new(lower_root).map_err(|source| MountError::Lower {
            path: lower_root.to_path_buf(),
            source,
        })?;
        let sink = TraceSink::create(&options.trace_file).map_err(|source| MountError::Sink {
            path: options.trace_file.clone(),
            source,
        })?;
        info!(
            lower = %lower_root.display(),
            trace = %options.trace_file.display(),
            "mounted traced filesystem"
        );
        Ok(Self::new(lower, Tracer::new(sink)))
    }
}

impl<L: LowerStorage> TracedFs<L> {
    pub fn new(lower: L, tracer: Tracer) -> Self {
        Self { lower, tracer }
    }

    pub fn lower(&self) -> &L {
        &self.lower
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn open(&self, path: &Path, flags: i32) -> io::Result<TracedFile<L::Handle>> {
        let outcome = self.lower.open(path, flags);
        // The opened inode's mode, which an O_CREAT open has only just given it.
        let mode = match &outcome {
            Ok(handle) => self.lower.handle_mode(handle),
            Err(_) => self.lower.mode(path),
        }
        .unwrap_or(0);

        let open_record_id = if self.tracer.enabled(OpKind::Open) {
            let relative = relative_path_bytes(path);
            if relative.is_empty() {
                // The mount root has no path to record.
                None
            } else {
                self.tracer.emit(&Record::Open {
                    flags,
                    mode: mode as u16,
                    path: &relative,
                    result: open_result(&outcome),
                })
            }
        } else {
            None
        };

        outcome.map(|handle| TracedFile {
            handle,
            open_record_id,
        })
    }

    pub fn read(&self, file: &mut TracedFile<L::Handle>, buf: &mut [u8]) -> io::Result<usize> {
        let outcome = self.lower.read(&mut file.handle, buf);
        if self.tracer.enabled(OpKind::Read) {
            let delivered: &[u8] = match &outcome {
                Ok(n) => &buf[..(*n).min(buf.len())],
                Err(_) => &[],
            };
            self.tracer.emit(&Record::Read {
                open_record_id: file.open_record_id,
                requested: buf.len(),
                result: transfer_result(&outcome),
                payload: delivered,
            });
        }
        outcome
    }

    pub fn write(&self, file: &mut TracedFile<L::Handle>, data: &[u8]) -> io::Result<usize> {
        let outcome = self.lower.write(&mut file.handle, data);
        if self.tracer.enabled(OpKind::Write) {
            self.tracer.emit(&Record::Write {
                open_record_id: file.open_record_id,
                requested: data.len(),
                payload: data,
                result: transfer_result(&outcome),
            });
        }
        outcome
    }

    /// Release the handle, recording the close if its open was recorded.
    pub fn release(&self, file: TracedFile<L::Handle>) {
        let TracedFile {
            handle,
            open_record_id,
        } = file;
        self.lower.release(handle);
        if let Some(open_record_id) = open_record_id {
            self.tracer.emit(&Record::Close { open_record_id });
        }
    }

    /// Control channel entry point; see [`crate::control`].
    pub fn ioctl(&self, cmd: u32, arg: Option<&mut [u8]>) -> Result<(), ControlError> {
        self.tracer.ioctl(cmd, arg)
    }
}

/// Path bytes as recorded in an open record: `/`-separated, no leading
/// separator, `.` components dropped.
fn relative_path_bytes(path: &Path) -> Vec<u8> {
    let mut out = Vec::new();
    for component in path.components() {
        if let Component::Normal(name) = component {
            if !out.is_empty() {
                out.push(b'/');
            }
            out.extend_from_slice(name.as_bytes());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::tests::SharedSink;
    use std::fs;
    use tempfile::TempDir;

    fn traced(dir: &TempDir) -> (TracedFs<DirLower>, SharedSink) {
        let sink = SharedSink::default();
        let tracer = Tracer::new(TraceSink::from_writer(sink.clone()));
        (
            TracedFs::new(DirLower::new(dir.path()).unwrap(), tracer),
            sink,
        )
    }

    #[test]
    fn relative_path_normalisation() {
        assert_eq!(relative_path_bytes(Path::new("dir/file.txt")), b"dir/file.txt");
        assert_eq!(relative_path_bytes(Path::new("./dir//file.txt")), b"dir/file.txt");
        assert!(relative_path_bytes(Path::new("")).is_empty());
        assert!(relative_path_bytes(Path::new(".")).is_empty());
    }

    #[test]
    fn handle_carries_its_open_record_id() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"abc").unwrap();
        let (tfs, _sink) = traced(&dir);

        let first = tfs.open(Path::new("a.txt"), libc::O_RDONLY).unwrap();
        let second = tfs.open(Path::new("a.txt"), libc::O_RDONLY).unwrap();
        assert_eq!(first.open_record_id(), Some(0));
        assert_eq!(second.open_record_id(), Some(1));
        tfs.release(first);
        tfs.release(second);
        assert_eq!(tfs.tracer().next_record_id(), Some(4));
    }

    #[test]
    fn failed_open_is_still_recorded() {
        let dir = TempDir::new().unwrap();
        let (tfs, sink) = traced(&dir);

        let err = tfs.open(Path::new("missing.txt"), libc::O_RDONLY).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        let bytes = sink.bytes();
        assert_eq!(bytes[6], b'o');
        let result = i32::from_ne_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        assert_eq!(result, -libc::ENOENT);
    }

    #[test]
    fn opening_the_root_is_not_recorded() {
        let dir = TempDir::new().unwrap();
        let (tfs, sink) = traced(&dir);

        let root = tfs.open(Path::new(""), libc::O_RDONLY | libc::O_DIRECTORY).unwrap();
        assert_eq!(root.open_record_id(), None);
        tfs.release(root);
        assert!(sink.bytes().is_empty());
    }

    #[test]
    fn created_file_records_its_new_mode() {
        let dir = TempDir::new().unwrap();
        let (tfs, sink) = traced(&dir);

        let file = tfs
            .open(Path::new("new.txt"), libc::O_WRONLY | libc::O_CREAT)
            .unwrap();
        tfs.release(file);

        let events = crate::trace::decode(&sink.bytes()).unwrap();
        match &events[0] {
            crate::trace::TraceEvent::Open { mode, path, .. } => {
                assert_eq!(path, "new.txt");
                assert_eq!(u32::from(*mode) & libc::S_IFMT, libc::S_IFREG);
                assert_ne!(*mode & 0o777, 0);
            }
            other => panic!("expected an open record, got {other:?}"),
        }
    }
}
