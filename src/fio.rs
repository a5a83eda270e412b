//! Positioned file IO for data files.
//!
//! One [`FileIo`] wraps one file handle. Appends go to the end of the file,
//! reads are positioned and move no cursor, and durability is an explicit
//! `sync` call. The engine layers offset bookkeeping on top; nothing here
//! assumes torn-write protection, which is why every record carries a CRC.

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::error::Result;

/// Permission bits for newly created data files.
#[cfg(unix)]
const DATA_FILE_MODE: u32 = 0o644;

pub struct FileIo {
    file: File,
}

impl FileIo {
    /// Open (or create) the file at `path` for appending and positioned reads.
    pub fn open(path: &Path) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.create(true).read(true).write(true).append(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(DATA_FILE_MODE);
        }

        let file = opts.open(path)?;
        Ok(Self { file })
    }

    /// Read into `buf` starting at `offset`. Returns the number of bytes read,
    /// which may be short at the end of the file.
    #[cfg(unix)]
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        use std::os::unix::fs::FileExt;
        Ok(self.file.read_at(buf, offset)?)
    }

    #[cfg(windows)]
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        use std::os::windows::fs::FileExt;
        Ok(self.file.seek_read(buf, offset)?)
    }

    /// Append `buf` to the end of the file. Returns the number of bytes written.
    pub fn append(&mut self, buf: &[u8]) -> Result<usize> {
        use std::io::Write;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    /// Flush file contents to stable storage.
    pub fn sync(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    /// Current size of the file in bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}
