pub mod bitmap;
pub mod config;
pub mod disk_format;
pub mod error;
pub mod ixfs;
pub mod metadata;
pub mod namespace;
pub mod open_table;
pub mod storage;
pub mod volume;

pub use config::Config;
pub use error::{FsError, Result};
pub use ixfs::Ixfs;
pub use metadata::{FsStats, ListEntry, Metadata};
pub use open_table::FileHandle;
