use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};

use super::inode::InodeNumber;

/// The maximum supported length of a file or directory name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// A directory entry. A directory's content is the encoded, ordered list of its entries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// The inode number.
    pub inum: InodeNumber,
    /// The name of the entry, length-prefixed on disk.
    pub name: String,
}

impl DirectoryEntry {
    /// Constructs a new [`DirectoryEntry`] instance.
    pub fn new(inum: InodeNumber, name: &str) -> Result<DirectoryEntry> {
        validate_name(name)?;

        Ok(DirectoryEntry {
            inum,
            name: name.to_string(),
        })
    }
}

/// Checks that `name` can be stored as a single path component.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('/') || name.contains('\0')
    {
        return Err(FsError::InvalidName(name.to_string()));
    }

    Ok(())
}

/// Encodes the entries of a directory into its on-disk content.
pub fn encode_entries(entries: &[DirectoryEntry]) -> Result<Vec<u8>> {
    Ok(bincode::serialize(entries)?)
}

/// Decodes the content of a directory. Empty content decodes to an empty directory.
pub fn decode_entries(content: &[u8]) -> Result<Vec<DirectoryEntry>> {
    if content.is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<DirectoryEntry> = bincode::deserialize(content)?;
    for entry in &entries {
        validate_name(&entry.name)
            .map_err(|_| FsError::Corrupt(format!("invalid entry name {:?}", entry.name)))?;
    }

    Ok(entries)
}
