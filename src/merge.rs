//! Merge: compaction of obsolete records.
//!
//! A merge rewrites only the live records of the sealed files into a fresh
//! engine rooted at the sibling directory `<root>-merge`, together with a
//! hint file mapping each live key to its new position. The rewrite itself
//! runs without the engine lock; the index decides liveness record by
//! record. Writing the `merge-finished` marker is the commit point: the next
//! `open` promotes a finished merge directory and discards an unfinished
//! one, so a crash anywhere in between is safe.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::data::data_file::{DataFile, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME};
use crate::data::record::{key_with_seq, parse_seq_key, LogRecord, RecordPos, NON_BATCH_SEQ_NO};
use crate::db::Engine;
use crate::error::{Error, Result};
use crate::flock::LOCK_FILE_NAME;
use crate::index::bptree::BPTREE_INDEX_FILE_NAME;
use crate::options::{IndexType, Options};

const MERGE_DIR_SUFFIX: &str = "-merge";
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Clears the merging flag when the merge ends, successfully or not.
struct MergingGuard<'a>(&'a AtomicBool);

impl Drop for MergingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Engine {
    /// Rewrite live records into a fresh generation and stage it for
    /// promotion at the next open. No-op on an engine that never wrote.
    pub fn merge(&self) -> Result<()> {
        let mut guard = None;

        // Preamble under the write lock: claim the merge, seal the active
        // file, and fix the boundary between old and new generations.
        let (merge_file_ids, non_merge_file_id) = {
            let mut files = self.files.write()?;
            if files.active.is_none() {
                return Ok(());
            }
            if self.merging.swap(true, Ordering::SeqCst) {
                return Err(Error::MergeInProgress);
            }
            guard = Some(MergingGuard(&self.merging));

            let active = match files.active.take() {
                Some(active) => active,
                None => return Ok(()),
            };
            active.sync()?;
            let next_id = active.file_id + 1;
            files.older.insert(active.file_id, active);
            files.active = Some(DataFile::open(&self.options.dir_path, next_id)?);

            let mut ids: Vec<u32> = files.older.keys().copied().collect();
            ids.sort_unstable();
            (ids, next_id)
        };
        let _guard = guard;

        let merge_path = merge_path(&self.options.dir_path);
        if merge_path.is_dir() {
            fs::remove_dir_all(&merge_path)?;
        }
        fs::create_dir_all(&merge_path)?;

        // The shadow engine only ever appends with sequence 0, so it always
        // gets the in-memory index regardless of what the caller runs.
        let merge_engine = Engine::open(
            Options::new(&merge_path)
                .data_file_size(self.options.data_file_size)
                .index_type(IndexType::BTree)
                .sync_writes(false),
        )?;
        let mut hint_file = DataFile::open_hint(&merge_path)?;

        let mut live = 0u64;
        let mut scanned = 0u64;
        for &file_id in &merge_file_ids {
            // Sealed files are immutable; scan through fresh read handles so
            // concurrent writers never wait on the merge.
            let file = DataFile::open(&self.options.dir_path, file_id)?;
            let mut offset = 0;
            while let Some((record, size)) = file.read_record(offset)? {
                let (_, user_key) = parse_seq_key(&record.key)?;
                scanned += 1;

                // A record is live iff the index still points exactly here.
                if self.index.get(user_key) == Some(RecordPos::new(file_id, offset)) {
                    let rewritten = LogRecord {
                        key: key_with_seq(user_key, NON_BATCH_SEQ_NO),
                        value: record.value.clone(),
                        rec_type: record.rec_type,
                    };
                    let user_key = user_key.to_vec();
                    let new_pos = merge_engine.append_record_with_lock(&rewritten)?;
                    hint_file.write_hint_record(&user_key, new_pos)?;
                    live += 1;
                }
                offset += size;
            }
        }

        hint_file.sync()?;
        merge_engine.sync()?;

        // Commit point: only a directory carrying this marker is promoted.
        let mut finished_file = DataFile::open_merge_finished(&merge_path)?;
        let finished = LogRecord::normal(
            MERGE_FINISHED_KEY.to_vec(),
            non_merge_file_id.to_string().into_bytes(),
        );
        finished_file.write(&finished.encode())?;
        finished_file.sync()?;

        info!(
            "merged {} data files: {live} of {scanned} records live, boundary {non_merge_file_id:09}",
            merge_file_ids.len(),
        );
        Ok(())
    }
}

/// Staging directory for a merge of `dir`: a sibling named `<dir>-merge`.
pub(crate) fn merge_path(dir: &Path) -> PathBuf {
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    let mut name = dir
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("cinderdb"));
    name.push(MERGE_DIR_SUFFIX);
    parent.join(name)
}

/// First file id that was not part of the merged generation.
pub(crate) fn non_merge_file_id(dir: &Path) -> Result<u32> {
    let file = DataFile::open_merge_finished(dir)?;
    let (record, _) = file.read_record(0)?.ok_or_else(|| {
        Error::CorruptRecord("merge-finished marker holds no record".to_string())
    })?;
    std::str::from_utf8(&record.value)
        .ok()
        .and_then(|text| text.parse::<u32>().ok())
        .ok_or_else(|| Error::CorruptRecord("merge-finished marker is not numeric".to_string()))
}

/// Promote a completed merge directory into the engine directory, then
/// remove it. Called by `Engine::open` before data files are loaded; an
/// unfinished merge directory is discarded wholesale.
pub(crate) fn load_merge_files(options: &Options) -> Result<()> {
    let merge_path = merge_path(&options.dir_path);
    if !merge_path.is_dir() {
        return Ok(());
    }

    let promoted = promote(options, &merge_path);
    fs::remove_dir_all(&merge_path)?;
    promoted
}

fn promote(options: &Options, merge_path: &Path) -> Result<()> {
    let mut merge_finished = false;
    let mut merge_file_names: Vec<OsString> = Vec::new();
    for entry in fs::read_dir(merge_path)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == MERGE_FINISHED_FILE_NAME {
            merge_finished = true;
        }
        // Bookkeeping private to the shadow engine stays behind.
        if name == SEQ_NO_FILE_NAME || name == LOCK_FILE_NAME || name == BPTREE_INDEX_FILE_NAME {
            continue;
        }
        merge_file_names.push(name);
    }
    if !merge_finished {
        info!("discarding unfinished merge at {}", merge_path.display());
        return Ok(());
    }

    let non_merge_file_id = non_merge_file_id(merge_path)?;

    // Every file below the boundary was rewritten into the merge outputs.
    for file_id in 0..non_merge_file_id {
        let path = DataFile::file_name(&options.dir_path, file_id);
        if path.is_file() {
            fs::remove_file(path)?;
        }
    }

    for name in merge_file_names {
        fs::rename(merge_path.join(&name), options.dir_path.join(&name))?;
    }

    info!(
        "promoted merge into {}, boundary {non_merge_file_id:09}",
        options.dir_path.display(),
    );
    Ok(())
}
