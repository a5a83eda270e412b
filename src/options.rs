use std::path::PathBuf;

/// Index backend used for key lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// In-memory B-tree. Rebuilt from the log on open.
    BTree,
    /// In-memory adaptive radix tree. Rebuilt from the log on open.
    Art,
    /// Persistent on-disk B+ tree. Survives restarts, skips log replay.
    BPlusTree,
}

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the data files.
    pub dir_path: PathBuf,

    /// Size threshold at which the active data file is sealed and rotated
    /// (default: 256MB).
    pub data_file_size: u64,

    /// Fsync the active file after every append (default: false).
    pub sync_writes: bool,

    /// Index backend (default: BTree).
    pub index_type: IndexType,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("./cinderdb"),
            data_file_size: 256 * 1024 * 1024, // 256MB
            sync_writes: false,
            index_type: IndexType::BTree,
        }
    }
}

impl Options {
    /// Create options rooted at the given directory.
    pub fn new(dir_path: impl Into<PathBuf>) -> Self {
        Self {
            dir_path: dir_path.into(),
            ..Default::default()
        }
    }

    /// Set the data file rotation threshold.
    pub fn data_file_size(mut self, size: u64) -> Self {
        self.data_file_size = size;
        self
    }

    /// Fsync after every append.
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    /// Select the index backend.
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }
}

/// Configuration for a scan over the engine.
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys starting with this prefix (default: empty, all keys).
    pub prefix: Vec<u8>,

    /// Iterate from the largest key down (default: false).
    pub reverse: bool,
}

impl IteratorOptions {
    /// Restrict the scan to keys with the given prefix.
    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Iterate in descending key order.
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }
}

/// Configuration for a [`WriteBatch`](crate::WriteBatch).
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Maximum number of staged records a single commit may carry
    /// (default: 1000).
    pub max_batch_num: usize,

    /// Fsync the active file once the whole batch is on disk
    /// (default: false).
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: 1000,
            sync_writes: false,
        }
    }
}

impl WriteBatchOptions {
    /// Set the maximum staged record count.
    pub fn max_batch_num(mut self, max: usize) -> Self {
        self.max_batch_num = max;
        self
    }

    /// Fsync at commit.
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }
}
