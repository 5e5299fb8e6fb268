use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// An exclusive advisory lock on the data directory, held from open until
/// the store is closed. Enforces the single-process contract.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Creates a new FileLock and locks the file.
    /// The lock file contains the process ID for debugging purposes.
    pub fn lock<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Self::try_lock(&file)?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // Fallback for other platforms - just succeed
        Ok(())
    }

    /// Get the path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // The OS releases the lock when the file handle is closed. The lock
        // file itself stays behind to avoid unlink races with other openers.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let lock_path = dir.path().join("emberdb.lock");

        let lock = FileLock::lock(&lock_path).expect("Failed to acquire lock");
        assert_eq!(lock.path(), lock_path.as_path());

        // A second lock attempt on the same file must fail while the first
        // is held.
        #[cfg(unix)]
        assert!(FileLock::lock(&lock_path).is_err());

        drop(lock);

        // After release, locking succeeds again.
        FileLock::lock(&lock_path).expect("Failed to re-acquire lock");
    }

    #[test]
    fn test_lock_file_records_pid() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let lock_path = dir.path().join("emberdb.lock");

        let _lock = FileLock::lock(&lock_path).expect("Failed to acquire lock");
        let contents = std::fs::read_to_string(&lock_path).expect("Failed to read lock file");
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
