//! Advisory lock tying an engine directory to a single process.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::error::{Error, Result};

/// Name of the lock file inside the engine directory.
pub const LOCK_FILE_NAME: &str = "cinderdb.lock";

/// Exclusive claim on an engine directory. The claim lasts until the lock
/// is dropped; the lock file itself stays behind so a later open can name
/// the previous holder.
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Claim `dir` for this process. Fails with [`Error::Locked`], naming
    /// the holding process when known, if another engine owns the directory.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);

        // Keep any existing contents readable until the claim succeeds, so
        // a conflict can report who holds the lock.
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        if !Self::try_exclusive(&file)? {
            let holder = fs::read_to_string(&path).unwrap_or_default();
            return Err(Error::Locked(match holder.trim() {
                "" => dir.display().to_string(),
                pid => format!("{} (held by pid {pid})", dir.display()),
            }));
        }

        // Ours now; replace whatever pid a previous owner left behind.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file })
    }

    /// Whether the exclusive lock could be taken without blocking.
    #[cfg(unix)]
    fn try_exclusive(file: &File) -> Result<bool> {
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(false);
        }
        Err(err.into())
    }

    #[cfg(not(unix))]
    fn try_exclusive(_file: &File) -> Result<bool> {
        // No advisory locking on this platform; single-process use only.
        Ok(true)
    }
}

// Dropping the handle releases the OS lock; the file is left in place
// because removing it would race a concurrent acquire.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    #[test]
    fn test_acquire_records_process_id() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let _lock = FileLock::acquire(dir.path()).expect("Failed to acquire lock");

        let content = fs::read_to_string(dir.path().join(LOCK_FILE_NAME))
            .expect("Failed to read lock file");
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_conflict_names_the_holder() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let _held = FileLock::acquire(dir.path()).expect("Failed to acquire lock");

        match FileLock::acquire(dir.path()) {
            Err(Error::Locked(msg)) => {
                assert!(msg.contains(&std::process::id().to_string()));
            }
            Err(other) => panic!("expected Locked, got {other:?}"),
            Ok(_) => panic!("second claim on a held directory must fail"),
        }
    }

    #[test]
    fn test_released_on_drop() {
        let dir = TempDir::new().expect("Failed to create temp dir");

        {
            let _held = FileLock::acquire(dir.path()).expect("Failed to acquire lock");
        }
        FileLock::acquire(dir.path()).expect("Lock should be free after the holder drops");
    }

    #[test]
    fn test_stale_pid_is_replaced() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        // A lock file left behind by a dead process holds no OS lock.
        fs::write(dir.path().join(LOCK_FILE_NAME), "999999\n").unwrap();

        let _lock = FileLock::acquire(dir.path()).expect("Stale lock file must not block");
        let content = fs::read_to_string(dir.path().join(LOCK_FILE_NAME)).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }
}
