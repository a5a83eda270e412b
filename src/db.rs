//! Engine core: the public key-value API over an append-only log.
//!
//! One [`Engine`] owns a directory of numbered data files. The file with the
//! highest id is the active file and takes all appends; every other file is
//! sealed. An in-memory (or persistent) index maps each live user key to the
//! position of its latest record. Reads go index -> positioned read; writes
//! go append -> index update, in that order, so that a crash between the two
//! is repaired by replay on the next open.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::{debug, info};

use crate::batch::WriteBatch;
use crate::data::data_file::{
    DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use crate::data::record::{
    key_with_seq, parse_seq_key, LogRecord, RecordPos, RecordType, NON_BATCH_SEQ_NO,
};
use crate::error::{Error, Result};
use crate::flock::{FileLock, LOCK_FILE_NAME};
use crate::index::{new_indexer, Indexer};
use crate::iterator::Iter;
use crate::merge;
use crate::options::{IndexType, IteratorOptions, Options, WriteBatchOptions};

const SEQ_NO_KEY: &[u8] = b"seq.no";

/// The active file plus the sealed files, guarded together by one lock.
pub(crate) struct FileSet {
    pub(crate) active: Option<DataFile>,
    pub(crate) older: HashMap<u32, DataFile>,
}

/// A cinderdb storage engine rooted at one directory.
pub struct Engine {
    pub(crate) options: Options,
    pub(crate) files: RwLock<FileSet>,
    pub(crate) index: Box<dyn Indexer>,

    /// Sequence number of the most recent batch commit; `0` before any.
    pub(crate) seq_no: AtomicU64,
    pub(crate) merging: AtomicBool,

    /// Whether the directory was created (or empty) at open.
    is_initial: bool,

    /// Held for the lifetime of the engine; released on drop.
    _lock: FileLock,
}

impl Engine {
    /// Open the engine described by `options`, creating the directory if
    /// needed and recovering state left by previous runs.
    pub fn open(options: Options) -> Result<Self> {
        check_options(&options)?;

        let mut is_initial = false;
        if !options.dir_path.is_dir() {
            is_initial = true;
            fs::create_dir_all(&options.dir_path)?;
        }

        let lock = FileLock::acquire(&options.dir_path)?;

        if !is_initial {
            let only_lock_file = fs::read_dir(&options.dir_path)?
                .filter_map(|entry| entry.ok())
                .all(|entry| entry.file_name() == LOCK_FILE_NAME);
            is_initial = only_lock_file;
        }

        // Promote a completed merge before looking at the data files.
        merge::load_merge_files(&options)?;

        let index = new_indexer(options.index_type, &options.dir_path, options.sync_writes)?;

        let engine = Engine {
            files: RwLock::new(FileSet {
                active: None,
                older: HashMap::new(),
            }),
            index,
            seq_no: AtomicU64::new(NON_BATCH_SEQ_NO),
            merging: AtomicBool::new(false),
            is_initial,
            _lock: lock,
            options,
        };

        let file_ids = engine.load_data_files()?;

        if engine.options.index_type == IndexType::BPlusTree {
            // The persisted index is authoritative; only the sequence
            // counter and the append offset need restoring.
            engine.load_seq_no()?;
            let mut files = engine.files.write()?;
            if let Some(active) = files.active.as_mut() {
                active.write_off = active.size()?;
            }
        } else {
            engine.load_index_from_hint_file()?;
            engine.load_index_from_data_files(&file_ids)?;
        }

        info!(
            "opened engine at {} ({} data files, {} keys, initial={})",
            engine.options.dir_path.display(),
            file_ids.len(),
            engine.index.len(),
            engine.is_initial,
        );
        Ok(engine)
    }

    /// Store `value` under `key`, overwriting any previous value.
    pub fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }

        let record = LogRecord::normal(key_with_seq(key, NON_BATCH_SEQ_NO), value);
        let pos = self.append_record_with_lock(&record)?;

        if !self.index.put(key.to_vec(), pos) {
            return Err(Error::IndexUpdateFailed);
        }
        Ok(())
    }

    /// Remove `key`. Removing an absent key is a successful no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if self.index.get(key).is_none() {
            return Ok(());
        }

        let record = LogRecord::deleted(key_with_seq(key, NON_BATCH_SEQ_NO));
        self.append_record_with_lock(&record)?;

        if !self.index.delete(key) {
            return Err(Error::IndexUpdateFailed);
        }
        Ok(())
    }

    /// Fetch the latest value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let files = self.files.read()?;

        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let pos = self.index.get(key).ok_or(Error::KeyNotFound)?;
        self.value_at(&files, pos)
    }

    /// All keys, ascending.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut iter = self.index.iterator(false);
        let mut keys = Vec::with_capacity(self.index.len());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        keys
    }

    /// Apply `f` to every key-value pair in ascending key order, stopping
    /// early when `f` returns false.
    pub fn fold(&self, mut f: impl FnMut(&[u8], &[u8]) -> bool) -> Result<()> {
        let files = self.files.read()?;
        let mut iter = self.index.iterator(false);
        while iter.valid() {
            let value = self.value_at(&files, iter.value())?;
            if !f(iter.key(), &value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Cursor over the engine's keys. See [`IteratorOptions`] for prefix
    /// filtering and direction.
    pub fn iter(&self, options: IteratorOptions) -> Iter<'_> {
        Iter::new(self, options)
    }

    /// Stage writes for an atomic commit. See [`WriteBatch`].
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch::new(self, options)
    }

    /// Flush the active data file to stable storage.
    pub fn sync(&self) -> Result<()> {
        let files = self.files.write()?;
        match &files.active {
            Some(active) => active.sync(),
            None => Ok(()),
        }
    }

    /// Flush everything and persist the sequence counter. The engine with no
    /// active file closes as a no-op.
    pub fn close(&self) -> Result<()> {
        let files = self.files.write()?;
        if files.active.is_none() {
            return Ok(());
        }

        self.index.close()?;

        // Rewrite the counter snapshot from scratch; the file holds exactly
        // one record.
        let seq_no_path = self.options.dir_path.join(SEQ_NO_FILE_NAME);
        if seq_no_path.is_file() {
            fs::remove_file(&seq_no_path)?;
        }
        let mut seq_file = DataFile::open_seq_no(&self.options.dir_path)?;
        let record = LogRecord::normal(
            SEQ_NO_KEY.to_vec(),
            self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
        );
        seq_file.write(&record.encode())?;
        seq_file.sync()?;

        if let Some(active) = &files.active {
            active.sync()?;
        }
        info!("closed engine at {}", self.options.dir_path.display());
        Ok(())
    }

    /// Resolve a position to its record's value. Fails with `KeyNotFound`
    /// when the record is a tombstone.
    pub(crate) fn value_at(&self, files: &FileSet, pos: RecordPos) -> Result<Vec<u8>> {
        let active_matches = files
            .active
            .as_ref()
            .map(|f| f.file_id == pos.file_id)
            .unwrap_or(false);
        let file = if active_matches {
            files.active.as_ref()
        } else {
            files.older.get(&pos.file_id)
        }
        .ok_or(Error::DataFileNotFound(pos.file_id))?;

        let (record, _) = file.read_record(pos.offset)?.ok_or_else(|| {
            Error::CorruptRecord(format!(
                "no record at indexed position {}:{}",
                pos.file_id, pos.offset
            ))
        })?;

        if record.rec_type == RecordType::Deleted {
            return Err(Error::KeyNotFound);
        }
        Ok(record.value)
    }

    /// Append under a fresh acquisition of the engine write lock.
    pub(crate) fn append_record_with_lock(&self, record: &LogRecord) -> Result<RecordPos> {
        let mut files = self.files.write()?;
        self.append_record(&mut files, record)
    }

    /// Append to the active file, rotating first when the record would push
    /// it past `data_file_size`. The caller holds the engine write lock.
    pub(crate) fn append_record(
        &self,
        files: &mut FileSet,
        record: &LogRecord,
    ) -> Result<RecordPos> {
        if files.active.is_none() {
            files.active = Some(DataFile::open(&self.options.dir_path, 0)?);
        }

        let encoded = record.encode();
        let needs_rotation = match &files.active {
            Some(active) => active.write_off + encoded.len() as u64 > self.options.data_file_size,
            None => false,
        };
        if needs_rotation {
            if let Some(sealed) = files.active.take() {
                sealed.sync()?;
                let next_id = sealed.file_id + 1;
                debug!("sealing data file {:09}, opening {next_id:09}", sealed.file_id);
                files.older.insert(sealed.file_id, sealed);
                files.active = Some(DataFile::open(&self.options.dir_path, next_id)?);
            }
        }

        let active = files
            .active
            .as_mut()
            .ok_or(Error::DataFileNotFound(0))?;
        let offset = active.write_off;
        active.write(&encoded)?;

        if self.options.sync_writes {
            active.sync()?;
        }
        Ok(RecordPos::new(active.file_id, offset))
    }

    /// Enumerate `*.data` files, open them all, and promote the highest id
    /// to active. Returns the sorted ids.
    fn load_data_files(&self) -> Result<Vec<u32>> {
        let mut file_ids = Vec::new();
        for entry in fs::read_dir(&self.options.dir_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) else {
                continue;
            };
            let file_id: u32 = stem.parse().map_err(|_| {
                Error::CorruptDirectory(format!("unexpected data file name {name}"))
            })?;
            file_ids.push(file_id);
        }
        file_ids.sort_unstable();

        let mut files = self.files.write()?;
        for (i, &file_id) in file_ids.iter().enumerate() {
            let file = DataFile::open(&self.options.dir_path, file_id)?;
            if i == file_ids.len() - 1 {
                files.active = Some(file);
            } else {
                files.older.insert(file_id, file);
            }
        }
        Ok(file_ids)
    }

    /// Replay the merge hint file, if present, into the index.
    fn load_index_from_hint_file(&self) -> Result<()> {
        if !self.options.dir_path.join(HINT_FILE_NAME).is_file() {
            return Ok(());
        }

        let hint = DataFile::open_hint(&self.options.dir_path)?;
        let mut offset = 0;
        let mut count = 0u64;
        while let Some((record, size)) = hint.read_record(offset)? {
            let pos = RecordPos::decode(&record.value)?;
            self.index.put(record.key, pos);
            offset += size;
            count += 1;
        }
        debug!("replayed {count} hint records");
        Ok(())
    }

    /// Rebuild the index by scanning data files in id order, honoring the
    /// merge boundary and batch atomicity.
    fn load_index_from_data_files(&self, file_ids: &[u32]) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }

        // Files below the merge boundary are covered by the hint file.
        let mut non_merge_file_id = 0;
        if self
            .options
            .dir_path
            .join(MERGE_FINISHED_FILE_NAME)
            .is_file()
        {
            non_merge_file_id = merge::non_merge_file_id(&self.options.dir_path)?;
        }

        // Batch records stage here until their terminal marker shows up;
        // whatever is left at the end never committed and is discarded.
        let mut pending: HashMap<u64, Vec<(LogRecord, RecordPos)>> = HashMap::new();
        let mut current_seq_no = NON_BATCH_SEQ_NO;
        let mut last_offset = 0;

        let mut files = self.files.write()?;
        for (i, &file_id) in file_ids.iter().enumerate() {
            if file_id < non_merge_file_id {
                continue;
            }
            let is_last = i == file_ids.len() - 1;
            let file = if is_last {
                files.active.as_ref()
            } else {
                files.older.get(&file_id)
            }
            .ok_or(Error::DataFileNotFound(file_id))?;

            let mut offset = 0;
            while let Some((record, size)) = file.read_record(offset)? {
                let pos = RecordPos::new(file_id, offset);
                let (seq_no, user_key) = parse_seq_key(&record.key)?;

                if seq_no == NON_BATCH_SEQ_NO {
                    self.apply_to_index(user_key.to_vec(), record.rec_type, pos)?;
                } else if record.rec_type == RecordType::TxFinished {
                    if let Some(staged) = pending.remove(&seq_no) {
                        for (staged_record, staged_pos) in staged {
                            self.apply_to_index(
                                staged_record.key,
                                staged_record.rec_type,
                                staged_pos,
                            )?;
                        }
                    }
                } else {
                    let user_key = user_key.to_vec();
                    pending.entry(seq_no).or_default().push((
                        LogRecord {
                            key: user_key,
                            value: record.value,
                            rec_type: record.rec_type,
                        },
                        pos,
                    ));
                }

                current_seq_no = current_seq_no.max(seq_no);
                offset += size;
            }

            if is_last {
                last_offset = offset;
            }
        }

        if !pending.is_empty() {
            debug!(
                "discarded {} uncommitted batches during replay",
                pending.len()
            );
        }

        if let Some(active) = files.active.as_mut() {
            active.write_off = last_offset;
        }
        self.seq_no.store(current_seq_no, Ordering::SeqCst);
        Ok(())
    }

    /// Apply one replayed record to the index. A tombstone for a key the
    /// index never saw (its put was compacted away) is harmless.
    fn apply_to_index(&self, key: Vec<u8>, rec_type: RecordType, pos: RecordPos) -> Result<()> {
        match rec_type {
            RecordType::Normal => {
                if !self.index.put(key, pos) {
                    return Err(Error::IndexUpdateFailed);
                }
            }
            RecordType::Deleted => {
                self.index.delete(&key);
            }
            RecordType::TxFinished => {}
        }
        Ok(())
    }

    /// Restore the sequence counter persisted by the last clean close.
    fn load_seq_no(&self) -> Result<()> {
        if !self.options.dir_path.join(SEQ_NO_FILE_NAME).is_file() {
            return Ok(());
        }

        let file = DataFile::open_seq_no(&self.options.dir_path)?;
        if let Some((record, _)) = file.read_record(0)? {
            let seq_no = std::str::from_utf8(&record.value)
                .ok()
                .and_then(|text| text.parse::<u64>().ok())
                .ok_or_else(|| {
                    Error::CorruptRecord("sequence number snapshot is not numeric".to_string())
                })?;
            self.seq_no.store(seq_no, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn check_options(options: &Options) -> Result<()> {
    if options.dir_path.as_os_str().is_empty() {
        return Err(Error::InvalidOptions("dir_path is empty".to_string()));
    }
    if options.data_file_size == 0 {
        return Err(Error::InvalidOptions(
            "data_file_size must be positive".to_string(),
        ));
    }
    Ok(())
}
