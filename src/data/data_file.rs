//! Append-only data files.
//!
//! A [`DataFile`] is a stateful append wrapper over positioned file IO. The
//! engine keeps exactly one mutable active file; every other data file is
//! sealed and only ever read. The same record format also backs the three
//! reserved bookkeeping files in the engine directory (`hint-index`,
//! `merge-finished`, `seq-no`).

use std::path::{Path, PathBuf};

use crate::data::record::{
    decode_header, record_crc, LogRecord, RecordPos, CRC_SIZE, MAX_HEADER_SIZE,
};
use crate::error::{Error, Result};
use crate::fio::FileIo;

pub const DATA_FILE_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

pub struct DataFile {
    /// Identifier of this file within its generation, strictly increasing.
    pub file_id: u32,
    /// Bytes appended since the file was opened. The engine resets this to
    /// the on-disk size when reopening an existing file.
    pub write_off: u64,
    io: FileIo,
}

impl std::fmt::Debug for DataFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFile")
            .field("file_id", &self.file_id)
            .field("write_off", &self.write_off)
            .finish()
    }
}

impl DataFile {
    /// Open (or create) the data file with the given id under `dir`.
    pub fn open(dir: &Path, file_id: u32) -> Result<Self> {
        Self::open_path(&Self::file_name(dir, file_id), file_id)
    }

    /// Open the hint file written by a merge.
    pub fn open_hint(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(HINT_FILE_NAME), 0)
    }

    /// Open the merge completion marker.
    pub fn open_merge_finished(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(MERGE_FINISHED_FILE_NAME), 0)
    }

    /// Open the sequence number snapshot written at close.
    pub fn open_seq_no(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(SEQ_NO_FILE_NAME), 0)
    }

    fn open_path(path: &Path, file_id: u32) -> Result<Self> {
        Ok(Self {
            file_id,
            write_off: 0,
            io: FileIo::open(path)?,
        })
    }

    /// Path of the data file with the given id: `<dir>/<id:09>.data`.
    pub fn file_name(dir: &Path, file_id: u32) -> PathBuf {
        dir.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
    }

    /// Read the record starting at `offset`.
    ///
    /// Returns the record and its on-disk size, or `Ok(None)` at the clean
    /// end of the file. A CRC mismatch or a truncated tail is reported as
    /// [`Error::CorruptRecord`].
    pub fn read_record(&self, offset: u64) -> Result<Option<(LogRecord, u64)>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        let header_len = (file_size - offset).min(MAX_HEADER_SIZE as u64) as usize;
        let mut header_buf = vec![0u8; header_len];
        self.io.read_at(&mut header_buf, offset)?;

        let header = match decode_header(&header_buf)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let kv_size = header.key_size + header.value_size;
        let mut kv = vec![0u8; kv_size];
        if kv_size > 0 {
            let n = self.io.read_at(&mut kv, offset + header.len as u64)?;
            if n < kv_size {
                return Err(Error::CorruptRecord(format!(
                    "record at offset {offset} truncated: wanted {kv_size} payload bytes, got {n}"
                )));
            }
        }

        let value = kv.split_off(header.key_size);
        let key = kv;

        let crc = record_crc(&header_buf[CRC_SIZE..header.len], &key, &value);
        if crc != header.crc {
            return Err(Error::CorruptRecord(format!(
                "crc mismatch at offset {offset}: stored {}, computed {crc}",
                header.crc
            )));
        }

        let record = LogRecord {
            key,
            value,
            rec_type: header.rec_type,
        };
        Ok(Some((record, (header.len + kv_size) as u64)))
    }

    /// Append raw encoded bytes and advance the write offset.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.io.append(buf)?;
        self.write_off += n as u64;
        Ok(n)
    }

    /// Append a hint record: the user key mapped to an encoded position.
    pub fn write_hint_record(&mut self, key: &[u8], pos: RecordPos) -> Result<()> {
        let record = LogRecord::normal(key.to_vec(), pos.encode());
        self.write(&record.encode())?;
        Ok(())
    }

    /// Flush the file to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Current on-disk size.
    pub fn size(&self) -> Result<u64> {
        self.io.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::{key_with_seq, RecordType, NON_BATCH_SEQ_NO};
    use crate::tmpfs::TempDir;

    #[test]
    fn test_file_name_is_zero_padded() {
        let name = DataFile::file_name(Path::new("/data"), 42);
        assert_eq!(name, PathBuf::from("/data/000000042.data"));
    }

    #[test]
    fn test_write_then_read_sequentially() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut file = DataFile::open(dir.path(), 0).expect("Failed to open data file");

        let records = [
            LogRecord::normal(key_with_seq(b"alpha", NON_BATCH_SEQ_NO), b"one".to_vec()),
            LogRecord::normal(key_with_seq(b"beta", NON_BATCH_SEQ_NO), b"two".to_vec()),
            LogRecord::deleted(key_with_seq(b"alpha", NON_BATCH_SEQ_NO)),
        ];
        let mut offsets = Vec::new();
        for record in &records {
            offsets.push(file.write_off);
            file.write(&record.encode()).expect("Failed to write");
        }

        for (record, offset) in records.iter().zip(&offsets) {
            let (read, _) = file
                .read_record(*offset)
                .expect("Failed to read")
                .expect("Record missing");
            assert_eq!(&read, record);
        }
    }

    #[test]
    fn test_read_record_size_advances_to_next() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut file = DataFile::open(dir.path(), 0).expect("Failed to open data file");

        let first = LogRecord::normal(b"k1".to_vec(), b"v1".to_vec());
        let second = LogRecord::normal(b"k2".to_vec(), b"a much longer value".to_vec());
        file.write(&first.encode()).unwrap();
        file.write(&second.encode()).unwrap();

        let (read, size) = file.read_record(0).unwrap().unwrap();
        assert_eq!(read, first);
        let (read, _) = file.read_record(size).unwrap().unwrap();
        assert_eq!(read, second);
    }

    #[test]
    fn test_read_past_end_is_clean_eof() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut file = DataFile::open(dir.path(), 0).expect("Failed to open data file");

        assert!(file.read_record(0).unwrap().is_none());

        let record = LogRecord::normal(b"k".to_vec(), b"v".to_vec());
        let size = record.encode().len() as u64;
        file.write(&record.encode()).unwrap();
        assert!(file.read_record(size).unwrap().is_none());
    }

    #[test]
    fn test_flipped_byte_is_detected() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let record = LogRecord::normal(b"key".to_vec(), b"value".to_vec());
        let encoded = record.encode();

        // Flip each payload byte in turn; every mutation must fail the CRC.
        for i in 0..encoded.len() {
            let mut corrupted = encoded.clone();
            corrupted[i] ^= 0xff;

            let mut file = DataFile::open(dir.path(), (i + 1) as u32).unwrap();
            file.write(&corrupted).unwrap();
            match file.read_record(0) {
                Err(Error::CorruptRecord(_)) => {}
                other => panic!("byte {i}: expected corrupt record, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_hint_record_roundtrip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut hint = DataFile::open_hint(dir.path()).expect("Failed to open hint file");

        let pos = RecordPos::new(3, 9001);
        hint.write_hint_record(b"answer", pos).unwrap();

        let (record, _) = hint.read_record(0).unwrap().unwrap();
        assert_eq!(record.rec_type, RecordType::Normal);
        assert_eq!(record.key, b"answer");
        assert_eq!(RecordPos::decode(&record.value).unwrap(), pos);
    }

    #[test]
    fn test_reopen_keeps_contents() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let record = LogRecord::normal(b"durable".to_vec(), b"data".to_vec());

        {
            let mut file = DataFile::open(dir.path(), 7).unwrap();
            file.write(&record.encode()).unwrap();
            file.sync().unwrap();
        }

        let file = DataFile::open(dir.path(), 7).unwrap();
        assert_eq!(file.write_off, 0);
        assert_eq!(file.size().unwrap(), record.encode().len() as u64);
        let (read, _) = file.read_record(0).unwrap().unwrap();
        assert_eq!(read, record);
    }
}
