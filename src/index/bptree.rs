//! Persistent B+ tree index backend.
//!
//! Positions are stored in an embedded single-file store (`redb`) at
//! `<dir>/bptree-index`. Every mutation is its own crash-safe transaction,
//! which is what lets the engine skip log replay entirely when this backend
//! is selected: the on-disk index is authoritative across restarts.
//!
//! # Iterator lifetime
//!
//! [`Indexer::iterator`] opens a read transaction and keeps the table it
//! yields for the whole life of the cursor; the store pins that
//! transaction's view internally (the table holds it via `Arc`), so the
//! transaction stays open until the iterator is dropped. Dropping the
//! iterator is what releases it. Like the in-memory backends, the cursor
//! therefore observes the index as it was at creation; puts and deletes
//! committed while it lives only show up in cursors opened afterwards.

use std::ops::Bound;
use std::path::Path;

use redb::{Database, Durability, ReadOnlyTable, ReadableTableMetadata, TableDefinition};

use super::{IndexIterator, Indexer};
use crate::data::record::RecordPos;
use crate::error::Result;

pub const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";

const INDEX_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("keydir");

pub struct BPlusTreeIndex {
    db: Database,
    sync_writes: bool,
}

impl BPlusTreeIndex {
    /// Open (or create) the index file under `dir`. With `sync_writes`
    /// unset, commits skip the per-transaction fsync.
    pub fn open(dir: &Path, sync_writes: bool) -> Result<Self> {
        let db = Database::create(dir.join(BPTREE_INDEX_FILE_NAME))?;

        // Create the table up front so read transactions never race it.
        let txn = db.begin_write()?;
        txn.open_table(INDEX_TABLE)?;
        txn.commit()?;

        Ok(Self { db, sync_writes })
    }

    fn durability(&self) -> Durability {
        if self.sync_writes {
            Durability::Immediate
        } else {
            Durability::Eventual
        }
    }

    fn write(&self, key: &[u8], pos: Option<RecordPos>) -> Result<bool> {
        let mut txn = self.db.begin_write()?;
        txn.set_durability(self.durability());
        let changed;
        {
            let mut table = txn.open_table(INDEX_TABLE)?;
            changed = match pos {
                Some(pos) => {
                    table.insert(key, pos.encode().as_slice())?;
                    true
                }
                None => table.remove(key)?.is_some(),
            };
        }
        txn.commit()?;
        Ok(changed)
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> bool {
        match self.write(&key, Some(pos)) {
            Ok(_) => true,
            Err(err) => {
                tracing::error!("bptree index put failed: {err}");
                false
            }
        }
    }

    fn get(&self, key: &[u8]) -> Option<RecordPos> {
        let lookup = || -> Result<Option<RecordPos>> {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(INDEX_TABLE)?;
            match table.get(key)? {
                Some(guard) => Ok(Some(RecordPos::decode(guard.value())?)),
                None => Ok(None),
            }
        };
        match lookup() {
            Ok(pos) => pos,
            Err(err) => {
                tracing::error!("bptree index get failed: {err}");
                None
            }
        }
    }

    fn delete(&self, key: &[u8]) -> bool {
        match self.write(key, None) {
            Ok(existed) => existed,
            Err(err) => {
                tracing::error!("bptree index delete failed: {err}");
                false
            }
        }
    }

    fn len(&self) -> usize {
        let count = || -> Result<u64> {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(INDEX_TABLE)?;
            Ok(table.len()?)
        };
        match count() {
            Ok(len) => len as usize,
            Err(err) => {
                tracing::error!("bptree index len failed: {err}");
                0
            }
        }
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let open = || -> Result<ReadOnlyTable<&'static [u8], &'static [u8]>> {
            let txn = self.db.begin_read()?;
            Ok(txn.open_table(INDEX_TABLE)?)
        };
        let table = match open() {
            Ok(table) => Some(table),
            Err(err) => {
                tracing::error!("bptree index iterator failed: {err}");
                None
            }
        };
        let mut iter = BPlusTreeIter {
            table,
            reverse,
            current: None,
        };
        iter.rewind();
        Box::new(iter)
    }

    fn close(&self) -> Result<()> {
        // Flush any eventual-durability commits before the handle drops.
        let mut txn = self.db.begin_write()?;
        txn.set_durability(Durability::Immediate);
        txn.commit()?;
        Ok(())
    }
}

/// Cursor over the persistent table. Unlike the in-memory backends this does
/// not snapshot: each step is a bounded range query against the same read
/// view, keyed on the current position.
struct BPlusTreeIter {
    table: Option<ReadOnlyTable<&'static [u8], &'static [u8]>>,
    reverse: bool,
    current: Option<(Vec<u8>, RecordPos)>,
}

impl BPlusTreeIter {
    /// First entry within `bounds` in iteration order.
    fn first_in(
        &self,
        bounds: (Bound<&[u8]>, Bound<&[u8]>),
    ) -> Option<(Vec<u8>, RecordPos)> {
        let table = self.table.as_ref()?;
        let mut range = match table.range::<&[u8]>(bounds) {
            Ok(range) => range,
            Err(err) => {
                tracing::error!("bptree index range failed: {err}");
                return None;
            }
        };
        let item = if self.reverse {
            range.next_back()
        } else {
            range.next()
        };
        match item {
            Some(Ok((key, value))) => match RecordPos::decode(value.value()) {
                Ok(pos) => Some((key.value().to_vec(), pos)),
                Err(err) => {
                    tracing::error!("bptree index holds corrupt position: {err}");
                    None
                }
            },
            Some(Err(err)) => {
                tracing::error!("bptree index scan failed: {err}");
                None
            }
            None => None,
        }
    }
}

impl IndexIterator for BPlusTreeIter {
    fn rewind(&mut self) {
        self.current = self.first_in((Bound::Unbounded, Bound::Unbounded));
    }

    fn seek(&mut self, key: &[u8]) {
        self.current = if self.reverse {
            self.first_in((Bound::Unbounded, Bound::Included(key)))
        } else {
            self.first_in((Bound::Included(key), Bound::Unbounded))
        };
    }

    fn next(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        self.current = if self.reverse {
            self.first_in((Bound::Unbounded, Bound::Excluded(key.as_slice())))
        } else {
            self.first_in((Bound::Excluded(key.as_slice()), Bound::Unbounded))
        };
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator exhausted").0
    }

    fn value(&self) -> RecordPos {
        self.current.as_ref().expect("iterator exhausted").1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    #[test]
    fn test_put_get_delete() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let index = BPlusTreeIndex::open(dir.path(), false).expect("Failed to open index");

        assert!(index.put(b"k".to_vec(), RecordPos::new(0, 12)));
        assert_eq!(index.get(b"k"), Some(RecordPos::new(0, 12)));

        assert!(index.put(b"k".to_vec(), RecordPos::new(3, 99)));
        assert_eq!(index.get(b"k"), Some(RecordPos::new(3, 99)));
        assert_eq!(index.len(), 1);

        assert!(index.delete(b"k"));
        assert!(!index.delete(b"k"));
        assert_eq!(index.get(b"k"), None);
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = TempDir::new().expect("Failed to create temp dir");

        {
            let index = BPlusTreeIndex::open(dir.path(), false).expect("Failed to open index");
            index.put(b"persisted".to_vec(), RecordPos::new(1, 256));
            index.close().expect("Failed to close index");
        }

        let index = BPlusTreeIndex::open(dir.path(), false).expect("Failed to reopen index");
        assert_eq!(index.get(b"persisted"), Some(RecordPos::new(1, 256)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_cursor_order_and_seek() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let index = BPlusTreeIndex::open(dir.path(), false).expect("Failed to open index");

        for (i, key) in [&b"aa"[..], b"ab", b"b", b"d"].iter().enumerate() {
            index.put(key.to_vec(), RecordPos::new(0, i as u64));
        }

        let mut iter = index.iterator(false);
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, [&b"aa"[..], b"ab", b"b", b"d"]);

        iter.seek(b"c");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"d");

        let mut iter = index.iterator(true);
        assert_eq!(iter.key(), b"d");
        iter.seek(b"c");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"b");
        iter.next();
        assert_eq!(iter.key(), b"ab");
    }

    #[test]
    fn test_iterator_keeps_a_stable_read_view() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let index = BPlusTreeIndex::open(dir.path(), false).expect("Failed to open index");

        index.put(b"a".to_vec(), RecordPos::new(0, 1));
        index.put(b"b".to_vec(), RecordPos::new(0, 2));
        index.put(b"c".to_vec(), RecordPos::new(0, 3));

        let mut iter = index.iterator(false);

        // Mutations landing while the cursor is alive.
        assert!(index.put(b"d".to_vec(), RecordPos::new(0, 4)));
        assert!(index.delete(b"b"));
        assert!(index.put(b"a".to_vec(), RecordPos::new(9, 9)));

        // The cursor still sees the state it was opened against.
        let mut seen = Vec::new();
        while iter.valid() {
            seen.push((iter.key().to_vec(), iter.value()));
            iter.next();
        }
        assert_eq!(
            seen,
            [
                (b"a".to_vec(), RecordPos::new(0, 1)),
                (b"b".to_vec(), RecordPos::new(0, 2)),
                (b"c".to_vec(), RecordPos::new(0, 3)),
            ]
        );
        drop(iter);

        // A cursor opened after the writes sees them all.
        let mut iter = index.iterator(false);
        let mut seen = Vec::new();
        while iter.valid() {
            seen.push((iter.key().to_vec(), iter.value()));
            iter.next();
        }
        assert_eq!(
            seen,
            [
                (b"a".to_vec(), RecordPos::new(9, 9)),
                (b"c".to_vec(), RecordPos::new(0, 3)),
                (b"d".to_vec(), RecordPos::new(0, 4)),
            ]
        );
    }

    #[test]
    fn test_empty_iterator() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let index = BPlusTreeIndex::open(dir.path(), false).expect("Failed to open index");

        let mut iter = index.iterator(false);
        assert!(!iter.valid());
        iter.seek(b"anything");
        assert!(!iter.valid());
        iter.next();
        assert!(!iter.valid());
    }
}
