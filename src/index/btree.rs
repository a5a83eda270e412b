//! B-tree index backend over the standard library's ordered map.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{IndexIterator, Indexer, SnapshotIter};
use crate::data::record::RecordPos;
use crate::error::Result;

pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, RecordPos>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> bool {
        self.tree.write().unwrap().insert(key, pos);
        true
    }

    fn get(&self, key: &[u8]) -> Option<RecordPos> {
        self.tree.read().unwrap().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.tree.write().unwrap().remove(key).is_some()
    }

    fn len(&self) -> usize {
        self.tree.read().unwrap().len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let tree = self.tree.read().unwrap();
        let entries: Vec<(Vec<u8>, RecordPos)> = if reverse {
            tree.iter().rev().map(|(k, p)| (k.clone(), *p)).collect()
        } else {
            tree.iter().map(|(k, p)| (k.clone(), *p)).collect()
        };
        Box::new(SnapshotIter::new(entries, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_overwrites() {
        let index = BTreeIndex::new();
        assert!(index.put(b"k".to_vec(), RecordPos::new(0, 0)));
        assert!(index.put(b"k".to_vec(), RecordPos::new(2, 64)));

        assert_eq!(index.get(b"k"), Some(RecordPos::new(2, 64)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let index = BTreeIndex::new();
        assert_eq!(index.get(b"nope"), None);
    }

    #[test]
    fn test_delete() {
        let index = BTreeIndex::new();
        index.put(b"k".to_vec(), RecordPos::new(0, 0));

        assert!(index.delete(b"k"));
        assert!(!index.delete(b"k"));
        assert_eq!(index.get(b"k"), None);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_iterator_orders_lexicographically() {
        let index = BTreeIndex::new();
        for key in [&b"banana"[..], b"apple", b"cherry"] {
            index.put(key.to_vec(), RecordPos::new(0, 0));
        }

        let mut iter = index.iterator(false);
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, [&b"apple"[..], b"banana", b"cherry"]);

        let mut iter = index.iterator(true);
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, [&b"cherry"[..], b"banana", b"apple"]);
    }

    #[test]
    fn test_iterator_is_a_snapshot() {
        let index = BTreeIndex::new();
        index.put(b"a".to_vec(), RecordPos::new(0, 0));

        let mut iter = index.iterator(false);
        index.put(b"b".to_vec(), RecordPos::new(0, 10));

        let mut count = 0;
        while iter.valid() {
            count += 1;
            iter.next();
        }
        assert_eq!(count, 1);
    }
}
