//! Exclusive ownership of a data directory across processes.
//!
//! Tables are loaded into memory when a data directory is opened and written
//! back on every commit, so two processes over the same directory would each
//! commit against their own stale copy. Holding `flock(LOCK_EX)` on
//! `<data_dir>/phoenix.lock` for the lifetime of the open handle rules that
//! out. The lock is released when the file is closed, including on crash.

use phoenix_core::error::{PhoenixError, PhoenixResult};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const LOCK_FILE: &str = "phoenix.lock";

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Held for as long as the data directory is in use.
pub struct DataDirLock {
    _file: File,
    path: PathBuf,
}

impl fmt::Debug for DataDirLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataDirLock")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl DataDirLock {
    /// Takes the lock if nobody holds it. `Ok(None)` means it is busy.
    pub fn try_acquire(dir: impl AsRef<Path>) -> PhoenixResult<Option<Self>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| PhoenixError::Store(format!("creating {}: {e}", dir.display())))?;
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| PhoenixError::Store(format!("opening {}: {e}", path.display())))?;

        match try_flock_exclusive(&file) {
            Ok(true) => Ok(Some(Self { _file: file, path })),
            Ok(false) => Ok(None),
            Err(e) => Err(PhoenixError::Store(format!("locking {}: {e}", path.display()))),
        }
    }

    /// Waits up to `timeout` for the lock.
    ///
    /// Fails with `Conflict` if another process keeps the directory longer.
    pub async fn acquire(dir: impl AsRef<Path>, timeout: Duration) -> PhoenixResult<Self> {
        let dir = dir.as_ref();
        let start = Instant::now();
        let mut logged = false;
        loop {
            if let Some(lock) = Self::try_acquire(dir)? {
                return Ok(lock);
            }
            if start.elapsed() >= timeout {
                return Err(PhoenixError::Conflict(format!(
                    "data directory {} is in use by another process",
                    dir.display()
                )));
            }
            if !logged {
                tracing::info!(data_dir = %dir.display(), "waiting for data directory lock");
                logged = true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid descriptor owned by `file` for the whole call.
        #[allow(unsafe_code)]
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let first = DataDirLock::try_acquire(dir.path()).unwrap().unwrap();
        assert_eq!(first.path(), dir.path().join(LOCK_FILE));
        assert!(DataDirLock::try_acquire(dir.path()).unwrap().is_none());

        drop(first);
        assert!(DataDirLock::try_acquire(dir.path()).unwrap().is_some());
    }

    #[tokio::test]
    async fn acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let _held = DataDirLock::try_acquire(dir.path()).unwrap().unwrap();
        let err = DataDirLock::acquire(dir.path(), Duration::from_millis(60))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn acquire_succeeds_once_released() {
        let dir = tempfile::tempdir().unwrap();
        let held = DataDirLock::try_acquire(dir.path()).unwrap().unwrap();
        let path = dir.path().to_path_buf();
        let waiter =
            tokio::spawn(async move { DataDirLock::acquire(path, Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.unwrap().is_ok());
    }
}
