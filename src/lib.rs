//! cinderdb is an embedded key-value store built on an append-only log.
//!
//! Writes append CRC-protected records to numbered data files and update an
//! in-memory index mapping each key to its latest record; reads are one
//! index lookup plus one positioned read. Write batches commit atomically
//! under a shared sequence number, and a merge pass rewrites live records
//! into a fresh generation to reclaim space.
//!
//! ```no_run
//! use cinderdb::{Engine, Options};
//!
//! let engine = Engine::open(Options::new("/tmp/cinderdb-demo"))?;
//! engine.put(b"name", b"cinderdb".to_vec())?;
//! assert_eq!(engine.get(b"name")?, b"cinderdb");
//! engine.delete(b"name")?;
//! engine.close()?;
//! # Ok::<(), cinderdb::Error>(())
//! ```

pub mod batch;
pub mod data;
pub mod db;
pub mod encoding;
pub mod error;
pub mod fio;
pub mod flock;
pub mod index;
pub mod iterator;
pub mod merge;
pub mod options;
pub mod tmpfs;

pub use batch::WriteBatch;
pub use db::Engine;
pub use error::{Error, Result};
pub use iterator::Iter;
pub use options::{IndexType, IteratorOptions, Options, WriteBatchOptions};
