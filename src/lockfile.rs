//! Process Lock File
//!
//! Prevents two warden instances from mutating the self-heal state and the
//! snapshot store at the same time. Uses an exclusive, non-blocking
//! `flock(2)` on `<data_dir>/.hostwarden.lock`; the kernel drops the lock
//! when the descriptor closes, so every exit path (including a signal)
//! releases it. The file itself is left in place and only carries the PID of
//! the current holder for diagnostics.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock file I/O error ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "another hostwarden instance is already running{}\n(lock: {})",
        .pid.map(|p| format!(" (PID: {p})")).unwrap_or_default(),
        .path.display()
    )]
    Held { path: PathBuf, pid: Option<u32> },
}

/// Exclusive process lock, held until dropped.
#[derive(Debug)]
pub struct ProcessLock {
    file: File,
    lock_path: PathBuf,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".hostwarden.lock";

    /// Acquire the lock for `data_dir` without waiting.
    ///
    /// Fails with [`LockError::Held`] when another process holds it.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self, LockError> {
        let data_dir = data_dir.as_ref();
        let io_err = |path: &Path, source: std::io::Error| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(data_dir).map_err(|e| io_err(data_dir, e))?;
        let lock_path = data_dir.join(Self::LOCK_FILE_NAME);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| io_err(&lock_path, e))?;

        #[allow(unsafe_code)]
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                let mut contents = String::new();
                let _ = file.read_to_string(&mut contents);
                return Err(LockError::Held {
                    pid: contents.trim().parse().ok(),
                    path: lock_path,
                });
            }
            return Err(io_err(&lock_path, err));
        }

        let pid = std::process::id();
        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)))
            .and_then(|_| writeln!(file, "{pid}"))
            .map_err(|e| io_err(&lock_path, e))?;

        tracing::debug!(pid, path = %lock_path.display(), "Acquired process lock");
        Ok(Self { file, lock_path })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        #[allow(unsafe_code)]
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc == 0 {
            tracing::debug!(path = %self.lock_path.display(), "Released process lock");
        }
    }
}
