//! Process-wide advisory lock (§5 / §10.4): acquired on `<first-content>.lock`
//! before any state is loaded, released on clean exit (drop).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::LockError;

pub struct Lock {
    path: PathBuf,
    file: File,
}

impl Lock {
    /// Acquires an exclusive, non-blocking lock on `<content_path>.lock`.
    /// A second process that finds it held gets `LockError::InUse`
    /// immediately -- no blocking wait.
    pub fn acquire(content_path: &Path) -> Result<Lock, LockError> {
        let mut lock_path = content_path.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock_path = PathBuf::from(lock_path);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&lock_path)
            .map_err(|source| LockError::Io {
                path: lock_path.clone(),
                source,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Lock {
                path: lock_path,
                file,
            }),
            Err(ref e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(LockError::InUse { path: lock_path })
            }
            Err(source) => Err(LockError::Io {
                path: lock_path,
                source,
            }),
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = &self.path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_is_refused() {
        let dir = tempdir().unwrap();
        let content = dir.path().join("snapraid.content");
        std::fs::write(&content, b"x").unwrap();

        let first = Lock::acquire(&content).unwrap();
        let second = Lock::acquire(&content);
        assert!(matches!(second, Err(LockError::InUse { .. })));
        drop(first);

        // after release, acquiring again succeeds
        let third = Lock::acquire(&content);
        assert!(third.is_ok());
    }
}
