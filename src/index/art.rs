//! Adaptive radix tree index backend.
//!
//! A byte-wise radix tree whose interior nodes adapt their child storage to
//! their fanout: small nodes keep a sorted sparse vector, nodes past
//! [`SPARSE_MAX`] children switch to a direct 256-slot table. Values live on
//! the node reached by the final key byte, so a key that is a strict prefix
//! of another needs no terminator byte.

use std::sync::RwLock;

use super::{IndexIterator, Indexer, SnapshotIter};
use crate::data::record::RecordPos;
use crate::error::Result;

/// Fanout beyond which a node's children move to the dense representation.
const SPARSE_MAX: usize = 48;

pub struct ArtIndex {
    tree: RwLock<Art>,
}

struct Art {
    root: Node,
    len: usize,
}

struct Node {
    value: Option<RecordPos>,
    children: Children,
}

enum Children {
    /// Sorted by child byte.
    Sparse(Vec<(u8, Box<Node>)>),
    Dense(Box<[Option<Box<Node>>; 256]>),
}

impl Node {
    fn new() -> Self {
        Self {
            value: None,
            children: Children::Sparse(Vec::new()),
        }
    }
}

impl Children {
    fn get(&self, byte: u8) -> Option<&Node> {
        match self {
            Children::Sparse(slots) => slots
                .binary_search_by_key(&byte, |(b, _)| *b)
                .ok()
                .map(|i| slots[i].1.as_ref()),
            Children::Dense(slots) => slots[byte as usize].as_deref(),
        }
    }

    fn get_mut(&mut self, byte: u8) -> Option<&mut Node> {
        match self {
            Children::Sparse(slots) => match slots.binary_search_by_key(&byte, |(b, _)| *b) {
                Ok(i) => Some(slots[i].1.as_mut()),
                Err(_) => None,
            },
            Children::Dense(slots) => slots[byte as usize].as_deref_mut(),
        }
    }

    fn get_or_insert(&mut self, byte: u8) -> &mut Node {
        // Grow into the dense table before an insert would overflow the
        // sparse form.
        if let Children::Sparse(slots) = self {
            let missing = slots.binary_search_by_key(&byte, |(b, _)| *b).is_err();
            if missing && slots.len() >= SPARSE_MAX {
                let mut dense: Box<[Option<Box<Node>>; 256]> =
                    Box::new(std::array::from_fn(|_| None));
                for (b, node) in slots.drain(..) {
                    dense[b as usize] = Some(node);
                }
                *self = Children::Dense(dense);
            }
        }
        match self {
            Children::Sparse(slots) => {
                let i = match slots.binary_search_by_key(&byte, |(b, _)| *b) {
                    Ok(i) => i,
                    Err(i) => {
                        slots.insert(i, (byte, Box::new(Node::new())));
                        i
                    }
                };
                slots[i].1.as_mut()
            }
            Children::Dense(slots) => slots[byte as usize]
                .get_or_insert_with(|| Box::new(Node::new()))
                .as_mut(),
        }
    }

    fn remove(&mut self, byte: u8) {
        match self {
            Children::Sparse(slots) => {
                if let Ok(i) = slots.binary_search_by_key(&byte, |(b, _)| *b) {
                    slots.remove(i);
                }
            }
            Children::Dense(slots) => slots[byte as usize] = None,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Children::Sparse(slots) => slots.is_empty(),
            Children::Dense(slots) => slots.iter().all(|slot| slot.is_none()),
        }
    }

    /// Visit children in ascending byte order.
    fn for_each(&self, f: &mut impl FnMut(u8, &Node)) {
        match self {
            Children::Sparse(slots) => {
                for (byte, node) in slots {
                    f(*byte, node);
                }
            }
            Children::Dense(slots) => {
                for (byte, slot) in slots.iter().enumerate() {
                    if let Some(node) = slot {
                        f(byte as u8, node);
                    }
                }
            }
        }
    }
}

impl Art {
    fn new() -> Self {
        Self {
            root: Node::new(),
            len: 0,
        }
    }

    fn put(&mut self, key: &[u8], pos: RecordPos) -> Option<RecordPos> {
        let mut node = &mut self.root;
        for &byte in key {
            node = node.children.get_or_insert(byte);
        }
        let previous = node.value.replace(pos);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    fn get(&self, key: &[u8]) -> Option<RecordPos> {
        let mut node = &self.root;
        for &byte in key {
            node = node.children.get(byte)?;
        }
        node.value
    }

    fn delete(&mut self, key: &[u8]) -> bool {
        let removed = remove_at(&mut self.root, key).is_some();
        if removed {
            self.len -= 1;
        }
        removed
    }

    fn entries(&self) -> Vec<(Vec<u8>, RecordPos)> {
        let mut out = Vec::with_capacity(self.len);
        let mut prefix = Vec::new();
        collect(&self.root, &mut prefix, &mut out);
        out
    }
}

fn remove_at(node: &mut Node, key: &[u8]) -> Option<RecordPos> {
    match key.split_first() {
        None => node.value.take(),
        Some((&byte, rest)) => {
            let child = node.children.get_mut(byte)?;
            let removed = remove_at(child, rest);
            // Prune branches left without values; each frame collapses one
            // level, so an emptied chain disappears bottom-up.
            if removed.is_some() && child.value.is_none() && child.children.is_empty() {
                node.children.remove(byte);
            }
            removed
        }
    }
}

fn collect(node: &Node, prefix: &mut Vec<u8>, out: &mut Vec<(Vec<u8>, RecordPos)>) {
    if let Some(pos) = node.value {
        out.push((prefix.clone(), pos));
    }
    node.children.for_each(&mut |byte, child| {
        prefix.push(byte);
        collect(child, prefix, out);
        prefix.pop();
    });
}

impl ArtIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Art::new()),
        }
    }
}

impl Default for ArtIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for ArtIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> bool {
        self.tree.write().unwrap().put(&key, pos);
        true
    }

    fn get(&self, key: &[u8]) -> Option<RecordPos> {
        self.tree.read().unwrap().get(key)
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.tree.write().unwrap().delete(key)
    }

    fn len(&self) -> usize {
        self.tree.read().unwrap().len
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let mut entries = self.tree.read().unwrap().entries();
        if reverse {
            entries.reverse();
        }
        Box::new(SnapshotIter::new(entries, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
