//! Atomic write batches.
//!
//! A batch stages mutations in memory keyed by user key (last write wins)
//! and commits them under one freshly allocated sequence number. On disk the
//! batch is its data records followed by a single `TxFinished` marker with
//! the same sequence number; recovery applies the batch only after seeing
//! the marker, so a commit interrupted anywhere earlier simply vanishes.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use crate::data::record::{key_with_seq, LogRecord, RecordPos, RecordType};
use crate::db::Engine;
use crate::error::{Error, Result};
use crate::options::WriteBatchOptions;

/// Key of the terminal marker record, under the batch's sequence number.
const TX_FIN_KEY: &[u8] = b"tx-fin";

pub struct WriteBatch<'a> {
    engine: &'a Engine,
    options: WriteBatchOptions,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(engine: &'a Engine, options: WriteBatchOptions) -> Self {
        Self {
            engine,
            options,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Stage a put. Nothing reaches disk until `commit`.
    pub fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let mut pending = self.pending.lock()?;
        pending.insert(key.to_vec(), LogRecord::normal(key.to_vec(), value));
        Ok(())
    }

    /// Stage a delete. For a key that is neither stored nor staged this is a
    /// no-op; a staged write for the key is simply dropped.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let mut pending = self.pending.lock()?;
        if self.engine.index.get(key).is_none() {
            pending.remove(key);
            return Ok(());
        }
        pending.insert(key.to_vec(), LogRecord::deleted(key.to_vec()));
        Ok(())
    }

    /// Write all staged records plus the terminal marker, then apply the
    /// index mutations. Committing an empty batch is a no-op.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock()?;
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum);
        }

        // Commits are serialized by the engine write lock; the sequence
        // number allocated here is unique to this batch.
        let mut files = self.engine.files.write()?;
        let seq_no = self.engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions: HashMap<&[u8], RecordPos> = HashMap::with_capacity(pending.len());
        for record in pending.values() {
            let pos = self.engine.append_record(
                &mut files,
                &LogRecord {
                    key: key_with_seq(&record.key, seq_no),
                    value: record.value.clone(),
                    rec_type: record.rec_type,
                },
            )?;
            positions.insert(record.key.as_slice(), pos);
        }

        let finished = LogRecord {
            key: key_with_seq(TX_FIN_KEY, seq_no),
            value: Vec::new(),
            rec_type: RecordType::TxFinished,
        };
        self.engine.append_record(&mut files, &finished)?;

        if self.options.sync_writes {
            if let Some(active) = &files.active {
                active.sync()?;
            }
        }

        for record in pending.values() {
            let applied = match record.rec_type {
                RecordType::Deleted => {
                    self.engine.index.delete(&record.key);
                    true
                }
                _ => match positions.get(record.key.as_slice()) {
                    Some(pos) => self.engine.index.put(record.key.clone(), *pos),
                    None => false,
                },
            };
            if !applied {
                return Err(Error::IndexUpdateFailed);
            }
        }

        pending.clear();
        Ok(())
    }
}
