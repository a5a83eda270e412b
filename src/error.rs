use std::fmt::Display;

/// cinderdb errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The key given to a read or write operation was empty.
    EmptyKey,
    /// The key does not exist, or its latest record is a tombstone.
    KeyNotFound,
    /// The index rejected a mutation. Indicates a broken invariant.
    IndexUpdateFailed,
    /// The index points at a data file the engine does not know about.
    DataFileNotFound(u32),
    /// A non-numeric `.data` file name was found while opening the directory.
    CorruptDirectory(String),
    /// A record failed its CRC check or could not be decoded.
    CorruptRecord(String),
    /// A write batch staged more records than `max_batch_num` allows.
    ExceedMaxBatchNum,
    /// A merge is already running on this engine.
    MergeInProgress,
    /// Invalid engine options, typically an empty path or a zero file size.
    InvalidOptions(String),
    /// The data directory is locked by another engine instance.
    Locked(String),
    /// An error from the persistent index backend.
    Index(String),
    /// An IO error.
    Io(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::EmptyKey => write!(f, "key is empty"),
            Error::KeyNotFound => write!(f, "key not found"),
            Error::IndexUpdateFailed => write!(f, "index update failed"),
            Error::DataFileNotFound(id) => write!(f, "data file {id:09} not found"),
            Error::CorruptDirectory(msg) => write!(f, "data directory corrupted: {msg}"),
            Error::CorruptRecord(msg) => write!(f, "corrupt record: {msg}"),
            Error::ExceedMaxBatchNum => write!(f, "batch exceeds maximum record count"),
            Error::MergeInProgress => write!(f, "merge is in progress, try again later"),
            Error::InvalidOptions(msg) => write!(f, "invalid options: {msg}"),
            Error::Locked(msg) => write!(f, "directory locked: {msg}"),
            Error::Index(msg) => write!(f, "index error: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// A cinderdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(err: redb::DatabaseError) -> Self {
        Error::Index(err.to_string())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(err: redb::TransactionError) -> Self {
        Error::Index(err.to_string())
    }
}

impl From<redb::TableError> for Error {
    fn from(err: redb::TableError) -> Self {
        Error::Index(err.to_string())
    }
}

impl From<redb::StorageError> for Error {
    fn from(err: redb::StorageError) -> Self {
        Error::Index(err.to_string())
    }
}

impl From<redb::CommitError> for Error {
    fn from(err: redb::CommitError) -> Self {
        Error::Index(err.to_string())
    }
}
