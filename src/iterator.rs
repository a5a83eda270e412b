//! User-facing scan cursor.
//!
//! Wraps an index iterator with a prefix filter and resolves values lazily:
//! `key` is free, `value` takes the engine read lock and touches disk.

use crate::db::Engine;
use crate::error::Result;
use crate::index::IndexIterator;
use crate::options::IteratorOptions;

pub struct Iter<'a> {
    engine: &'a Engine,
    index_iter: Box<dyn IndexIterator>,
    options: IteratorOptions,
}

impl<'a> Iter<'a> {
    pub(crate) fn new(engine: &'a Engine, options: IteratorOptions) -> Self {
        let index_iter = engine.index.iterator(options.reverse);
        let mut iter = Self {
            engine,
            index_iter,
            options,
        };
        iter.skip_to_prefix();
        iter
    }

    /// Reset to the first matching key in iteration order.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_prefix();
    }

    /// Position at the first matching key `>=` the target (or `<=` when
    /// iterating in reverse).
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_prefix();
    }

    /// Advance to the next matching key.
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_prefix();
    }

    /// Whether the cursor points at an entry.
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Key at the cursor. Only call while `valid`.
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Value at the cursor, read from its data file.
    pub fn value(&self) -> Result<Vec<u8>> {
        let pos = self.index_iter.value();
        let files = self.engine.files.read()?;
        self.engine.value_at(&files, pos)
    }

    fn skip_to_prefix(&mut self) {
        let prefix = &self.options.prefix;
        if prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() {
            let key = self.index_iter.key();
            if key.len() >= prefix.len() && &key[..prefix.len()] == prefix.as_slice() {
                break;
            }
            self.index_iter.next();
        }
    }
}
