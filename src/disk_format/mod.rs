/// Perform a const assertion.
macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    }
}

/// Directory entries and their on-disk encoding.
pub mod directory_entry;
/// Inodes.
pub mod inode;
/// The superblock and the region layout it describes.
pub mod superblock;
