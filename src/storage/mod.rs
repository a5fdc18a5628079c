/// File-backed ixfs storage.
mod file;
/// The ixfs storage abstraction.
mod ixfs_storage;
/// Memory-backed ixfs storage.
mod memory;

pub use file::*;
pub use ixfs_storage::*;
pub use memory::*;
