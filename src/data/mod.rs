pub mod data_file;
pub mod record;

pub use data_file::DataFile;
pub use record::{LogRecord, RecordPos, RecordType};
