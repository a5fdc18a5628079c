//! The directory tree, held as an arena of directory records keyed by inode number. Parent and
//! child relationships are inode numbers, never references, so the tree can be written out and
//! rebuilt as is.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::disk_format::directory_entry::DirectoryEntry;
use crate::disk_format::inode::{InodeNumber, ROOT_INODE};
use crate::error::{FsError, Result};

/// A directory: its identity and its ordered entries. Only directories get one; files and links
/// exist solely as entries of their parents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dentry {
    pub inum: InodeNumber,
    /// The root is its own parent.
    pub parent: InodeNumber,
    pub name: String,
    /// Entries in insertion order. Names are unique.
    pub entries: Vec<DirectoryEntry>,
}

impl Dentry {
    pub fn new(inum: InodeNumber, parent: InodeNumber, name: &str) -> Self {
        Self {
            inum,
            parent,
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<InodeNumber> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.inum)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    dentries: BTreeMap<InodeNumber, Dentry>,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    /// A tree holding only an empty root directory.
    pub fn new() -> Self {
        Self {
            dentries: BTreeMap::from([(ROOT_INODE, Dentry::new(ROOT_INODE, ROOT_INODE, "/"))]),
        }
    }

    pub fn dentry(&self, inum: InodeNumber) -> Option<&Dentry> {
        self.dentries.get(&inum)
    }

    pub fn dentries(&self) -> impl Iterator<Item = &Dentry> + '_ {
        self.dentries.values()
    }

    pub fn is_directory(&self, inum: InodeNumber) -> bool {
        self.dentries.contains_key(&inum)
    }

    /// Resolves `path` to an inode number. Absolute paths start at the root, anything else at
    /// `cwd`. Components match entry names exactly.
    pub fn resolve(&self, cwd: InodeNumber, path: &str) -> Result<InodeNumber> {
        let (start, components) = split_path(cwd, path)?;
        self.walk(start, &components, path)
    }

    /// Resolves everything but the last component of `path`, which must name a directory.
    /// Returns that directory and the last component.
    pub fn resolve_parent<'p>(
        &self,
        cwd: InodeNumber,
        path: &'p str,
    ) -> Result<(InodeNumber, &'p str)> {
        let (start, components) = split_path(cwd, path)?;
        let Some((name, parents)) = components.split_last() else {
            return Err(FsError::InvalidPath(path.to_string()));
        };

        let parent = self.walk(start, parents, path)?;
        if !self.is_directory(parent) {
            return Err(FsError::NotADirectory(path.to_string()));
        }

        Ok((parent, *name))
    }

    /// Looks `name` up in directory `dir`.
    pub fn lookup(&self, dir: InodeNumber, name: &str) -> Result<Option<InodeNumber>> {
        Ok(self.directory(dir)?.lookup(name))
    }

    pub fn entries(&self, dir: InodeNumber) -> Result<&[DirectoryEntry]> {
        Ok(&self.directory(dir)?.entries)
    }

    /// Appends `entry` to directory `dir`.
    pub fn insert_entry(&mut self, dir: InodeNumber, entry: DirectoryEntry) -> Result<()> {
        let dentry = self.directory_mut(dir)?;

        if dentry.lookup(&entry.name).is_some() {
            return Err(FsError::Exists(entry.name));
        }

        dentry.entries.push(entry);
        Ok(())
    }

    /// Removes the entry called `name` from directory `dir`, keeping the order of the rest.
    pub fn remove_entry(&mut self, dir: InodeNumber, name: &str) -> Result<DirectoryEntry> {
        let dentry = self.directory_mut(dir)?;
        let position = dentry
            .entries
            .iter()
            .position(|entry| entry.name == name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;

        Ok(dentry.entries.remove(position))
    }

    /// Registers directory `inum`, named `name` inside `parent`.
    pub fn add_directory(&mut self, inum: InodeNumber, parent: InodeNumber, name: &str) {
        self.dentries.insert(inum, Dentry::new(inum, parent, name));
    }

    /// Forgets an empty directory.
    pub fn remove_directory(&mut self, inum: InodeNumber) -> Result<Dentry> {
        if inum == ROOT_INODE {
            return Err(FsError::Busy("cannot remove the root directory".to_string()));
        }

        let dentry = self.directory(inum)?;
        if !dentry.entries.is_empty() {
            return Err(FsError::NotEmpty(dentry.name.clone()));
        }

        Ok(self
            .dentries
            .remove(&inum)
            .expect("the directory was looked up above"))
    }

    /// Whether `ancestor` is `inum` or lies on the path from the root to it.
    pub fn is_ancestor(&self, ancestor: InodeNumber, inum: InodeNumber) -> bool {
        let mut current = inum;

        for _ in 0..=self.dentries.len() {
            if current == ancestor {
                return true;
            }

            match self.dentries.get(&current) {
                Some(dentry) if current != ROOT_INODE => current = dentry.parent,
                _ => return false,
            }
        }

        false
    }

    /// The absolute path of directory `inum`.
    pub fn path_of(&self, inum: InodeNumber) -> Result<String> {
        let mut names = Vec::new();
        let mut current = self.directory(inum)?;

        while current.inum != ROOT_INODE {
            if names.len() > self.dentries.len() {
                return Err(FsError::Corrupt("directory tree contains a loop".to_string()));
            }

            names.push(current.name.as_str());
            current = self.directory(current.parent)?;
        }

        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    /// How many entries name each inode.
    pub fn link_counts(&self) -> HashMap<InodeNumber, usize> {
        let mut counts = HashMap::new();

        for entry in self.dentries.values().flat_map(|dentry| &dentry.entries) {
            *counts.entry(entry.inum).or_insert(0) += 1;
        }

        counts
    }

    /// Checks that every directory is reached from the root exactly once, through an entry
    /// whose name and parent match its record.
    pub fn check_tree(&self) -> Result<()> {
        let mut seen = HashSet::from([ROOT_INODE]);
        let mut queue = vec![ROOT_INODE];

        while let Some(inum) = queue.pop() {
            let dentry = self.directory(inum)?;

            let mut names = HashSet::new();
            for entry in &dentry.entries {
                if !names.insert(entry.name.as_str()) {
                    return Err(FsError::Corrupt(format!(
                        "directory {inum} contains duplicate entry {:?}",
                        entry.name
                    )));
                }

                let Some(child) = self.dentries.get(&entry.inum) else {
                    continue;
                };

                if !seen.insert(child.inum) {
                    return Err(FsError::Corrupt(format!(
                        "directory {} is reachable more than once",
                        child.inum
                    )));
                }

                if child.parent != inum || child.name != entry.name {
                    return Err(FsError::Corrupt(format!(
                        "directory {} does not record its parent {inum} and name {:?}",
                        child.inum, entry.name
                    )));
                }

                queue.push(child.inum);
            }
        }

        if let Some(detached) = self.dentries.keys().find(|inum| !seen.contains(inum)) {
            return Err(FsError::Corrupt(format!(
                "directory {detached} is not reachable from the root"
            )));
        }

        Ok(())
    }

    fn walk(&self, start: InodeNumber, components: &[&str], path: &str) -> Result<InodeNumber> {
        let mut current = start;

        for component in components {
            let dentry = self
                .dentries
                .get(&current)
                .ok_or_else(|| FsError::NotADirectory(path.to_string()))?;

            current = dentry
                .lookup(component)
                .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        }

        Ok(current)
    }

    fn directory(&self, inum: InodeNumber) -> Result<&Dentry> {
        self.dentries
            .get(&inum)
            .ok_or_else(|| FsError::NotADirectory(format!("inode {inum}")))
    }

    fn directory_mut(&mut self, inum: InodeNumber) -> Result<&mut Dentry> {
        self.dentries
            .get_mut(&inum)
            .ok_or_else(|| FsError::NotADirectory(format!("inode {inum}")))
    }
}

/// Picks the starting directory for `path` and splits it into non-empty components.
fn split_path(cwd: InodeNumber, path: &str) -> Result<(InodeNumber, Vec<&str>)> {
    if path.is_empty() {
        return Err(FsError::InvalidPath(path.to_string()));
    }

    let start = if path.starts_with('/') { ROOT_INODE } else { cwd };
    let components = path
        .split('/')
        .filter(|component| !component.is_empty())
        .collect();

    Ok((start, components))
}
