//! The storage layer underneath the traced mount.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Component, Path, PathBuf};

/// Real file operations the traced layer delegates to.
///
/// Paths are relative to the mount root. Handles carry their own file
/// position, like an open file description.
pub trait LowerStorage: Send + Sync {
    type Handle: Send;

    /// Mode bits (type and permissions) of the object at `path`.
    fn mode(&self, path: &Path) -> io::Result<u32>;

    /// Mode bits of the object behind an open handle.
    fn handle_mode(&self, handle: &Self::Handle) -> io::Result<u32>;

    fn open(&self, path: &Path, flags: i32) -> io::Result<Self::Handle>;

    fn read(&self, handle: &mut Self::Handle, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&self, handle: &mut Self::Handle, data: &[u8]) -> io::Result<usize>;

    fn release(&self, handle: Self::Handle);
}

/// Negative errno for a failed operation, `EIO` when the error has none.
pub fn errno_of(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}

/// Signed result code of a transfer: byte count on success, `-errno` on failure.
pub fn transfer_result(outcome: &io::Result<usize>) -> isize {
    match outcome {
        Ok(n) => *n as isize,
        Err(err) => -(errno_of(err) as isize),
    }
}

/// Result code of an open: 0 on success, `-errno` on failure.
pub fn open_result<T>(outcome: &io::Result<T>) -> i32 {
    match outcome {
        Ok(_) => 0,
        Err(err) => -errno_of(err),
    }
}

/// A directory on a local filesystem.
#[derive(Debug, Clone)]
pub struct DirLower {
    root: PathBuf,
}

impl DirLower {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let meta = fs::metadata(&root)?;
        if !meta.is_dir() {
            return Err(io::Error::from_raw_os_error(libc::ENOTDIR));
        }
        fs::read_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a mount-relative path onto the lower directory without leaving it.
    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => return Err(io::Error::from_raw_os_error(libc::EACCES)),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(io::Error::from_raw_os_error(libc::EINVAL))
                }
            }
        }
        Ok(self.root.join(path))
    }
}

impl LowerStorage for DirLower {
    type Handle = File;

    fn mode(&self, path: &Path) -> io::Result<u32> {
        Ok(fs::metadata(self.resolve(path)?)?.mode())
    }

    fn handle_mode(&self, handle: &File) -> io::Result<u32> {
        Ok(handle.metadata()?.mode())
    }

    fn open(&self, path: &Path, flags: i32) -> io::Result<File> {
        let target = self.resolve(path)?;
        let mut options = OpenOptions::new();
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => options.read(true),
            libc::O_WRONLY => options.write(true),
            libc::O_RDWR => options.read(true).write(true),
            _ => return Err(io::Error::from_raw_os_error(libc::EINVAL)),
        };
        options
            .custom_flags(flags & !libc::O_ACCMODE)
            .mode(0o644)
            .open(target)
    }

    fn read(&self, handle: &mut File, buf: &mut [u8]) -> io::Result<usize> {
        handle.read(buf)
    }

    fn write(&self, handle: &mut File, data: &[u8]) -> io::Result<usize> {
        handle.write(data)
    }

    fn release(&self, handle: File) {
        drop(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rejects_paths_outside_root() {
        let dir = TempDir::new().unwrap();
        let lower = DirLower::new(dir.path()).unwrap();

        let err = lower.open(Path::new("../escape"), libc::O_RDONLY).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));
        let err = lower.open(Path::new("/etc/passwd"), libc::O_RDONLY).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn honours_creation_flags() {
        let dir = TempDir::new().unwrap();
        let lower = DirLower::new(dir.path()).unwrap();

        let missing = lower.open(Path::new("new.txt"), libc::O_WRONLY).unwrap_err();
        assert_eq!(missing.raw_os_error(), Some(libc::ENOENT));

        let mut file = lower
            .open(Path::new("new.txt"), libc::O_WRONLY | libc::O_CREAT)
            .unwrap();
        assert_eq!(lower.write(&mut file, b"hello").unwrap(), 5);
        lower.release(file);

        let mut file = lower.open(Path::new("new.txt"), libc::O_RDONLY).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(lower.read(&mut file, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(lower.mode(Path::new("new.txt")).unwrap() & 0o170000, 0o100000);
        assert_eq!(
            lower.handle_mode(&file).unwrap(),
            lower.mode(Path::new("new.txt")).unwrap()
        );
    }

    #[test]
    fn root_must_be_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"").unwrap();
        let err = DirLower::new(&file).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTDIR));
        assert!(DirLower::new(dir.path().join("absent")).is_err());
    }

    #[test]
    fn result_codes() {
        let ok: io::Result<usize> = Ok(12);
        let failed: io::Result<usize> = Err(io::Error::from_raw_os_error(libc::EBADF));
        assert_eq!(transfer_result(&ok), 12);
        assert_eq!(transfer_result(&failed), -(libc::EBADF as isize));
        assert_eq!(open_result(&ok), 0);
        assert_eq!(open_result(&failed), -libc::EBADF);
        let opaque: io::Result<usize> = Err(io::Error::other("no errno"));
        assert_eq!(transfer_result(&opaque), -(libc::EIO as isize));
    }
}
