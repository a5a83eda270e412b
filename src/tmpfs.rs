//! Throwaway engine directories for filesystem-backed tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::options::Options;

static NEXT_DIR_ID: AtomicU64 = AtomicU64::new(0);

pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    /// Create a fresh directory under the system temp dir.
    pub fn new() -> io::Result<Self> {
        Self::with_prefix("engine")
    }

    /// Create a fresh directory whose name starts with `prefix`.
    pub fn with_prefix(prefix: &str) -> io::Result<Self> {
        let base = std::env::temp_dir().join("cinderdb_tests");
        fs::create_dir_all(&base)?;

        loop {
            let id = NEXT_DIR_ID.fetch_add(1, Ordering::Relaxed);
            let path = base.join(format!("{prefix}_{}_{id}", std::process::id()));
            match fs::create_dir(&path) {
                Ok(()) => return Ok(Self { path }),
                // Leftover of a recycled process id; probe the next slot.
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Engine options rooted at this directory.
    pub fn options(&self) -> Options {
        Options::new(self.path())
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}
