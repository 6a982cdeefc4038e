//! The directory subsystem: fixed-stride directory records, entry
//! management, path resolution and the directory-level operations.
//!
//! Directory content is a flat array of fixed-size records spread over the
//! 12 direct blocks; a record whose inode field is zero is a free slot.
//! Removals tombstone in place, directories are never compacted.

use crate::error::{FsError, Result};
use crate::inode::{DIRECT_BLOCKS_COUNT, INODE_PERMISSION_IWUSR, INODE_PERMISSION_IXUSR, INODE_TYPE_DIRECTORY};
use crate::util;
use crate::volume::Ext2Fs;
use crate::{BLOCK_SIZE, MAX_FILENAME, MAX_PATH, ROOT_INODE};
use std::mem::{self, size_of};

/// Directory entry type indicator: regular file.
pub const ENTRY_TYPE_REGULAR: u8 = 1;
/// Directory entry type indicator: directory.
pub const ENTRY_TYPE_DIRECTORY: u8 = 2;

/// The fixed stride of a directory record.
pub const DIRENT_SIZE: usize = size_of::<DirEntry>();
/// The number of directory records per block.
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIRENT_SIZE;
/// The maximum number of live records a directory can hold.
pub const MAX_DIR_ENTRIES: usize = DIRECT_BLOCKS_COUNT * ENTRIES_PER_BLOCK;

/// A fixed-size directory record mapping a name to an inode.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct DirEntry {
    /// The referenced inode; 0 marks a free slot or a tombstone.
    pub inode: u32,
    /// Record length.
    pub rec_len: u16,
    /// Length of the name.
    pub name_len: u8,
    /// Entry type indicator.
    pub file_type: u8,
    /// The name, NUL-terminated when shorter than the field.
    pub name: [u8; MAX_FILENAME],
    /// Padding to the record stride.
    pub pad: u8,
}

impl DirEntry {
    /// Returns an all-zero (free) record.
    pub fn zeroed() -> Self {
        unsafe { mem::zeroed() }
    }

    /// Builds a live record.
    pub fn new(inode: u32, name: &str, file_type: u8) -> Self {
        let mut entry = Self::zeroed();
        entry.inode = inode;
        entry.rec_len = DIRENT_SIZE as u16;
        entry.name_len = name.len() as u8;
        entry.file_type = file_type;
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_FILENAME);
        let mut buf = [0u8; MAX_FILENAME];
        buf[..len].copy_from_slice(&bytes[..len]);
        entry.name = buf;
        entry
    }

    /// Returns the entry's name.
    pub fn name(&self) -> String {
        let name = self.name;
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        String::from_utf8_lossy(&name[..end]).into_owned()
    }
}

/// Splits `path` at its last `/`, returning the prefix and the leaf name.
///
/// Returns `None` when the path holds no separator.
fn split_last(path: &str) -> Option<(&str, &str)> {
    let idx = path.rfind('/')?;
    Some((&path[..idx], &path[idx + 1..]))
}

/// Strips trailing separators, keeping a lone `/` intact.
fn trim_trailing(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

impl Ext2Fs {
    /// Adds an entry to the directory `parent_ino`, reusing the first free
    /// slot across its direct blocks and allocating a fresh block when the
    /// scan reaches an unallocated one. Increments the child's link count.
    pub fn add_entry(
        &mut self,
        parent_ino: u32,
        name: &str,
        child_ino: u32,
        file_type: u8,
    ) -> Result<()> {
        if name.is_empty() || name.len() > MAX_FILENAME {
            return Err(FsError::BadArgument);
        }
        for block_index in 0..DIRECT_BLOCKS_COUNT as u32 {
            let mut buf = [0u8; BLOCK_SIZE];
            let mut block_no = self.inode_block(parent_ino, block_index)?;
            if block_no == 0 {
                block_no = self.allocate_block()?;
                if let Err(e) = self.set_inode_block(parent_ino, block_index, block_no) {
                    let _ = self.free_block(block_no);
                    return Err(e);
                }
            } else {
                self.device.read_block(block_no, &mut buf)?;
            }
            for slot in 0..ENTRIES_PER_BLOCK {
                let off = slot * DIRENT_SIZE;
                let entry: DirEntry = unsafe { util::read_struct(&buf[off..]) };
                if entry.inode == 0 {
                    let entry = DirEntry::new(child_ino, name, file_type);
                    util::write_struct(&mut buf[off..], &entry);
                    self.device.write_block(block_no, &buf)?;
                    return self.increment_link(child_ino);
                }
            }
        }
        Err(FsError::NoSpace)
    }

    /// Removes the entry named `name` from `parent_ino`, zeroing the whole
    /// record in place. Decrements the child's link count.
    pub fn remove_entry(&mut self, parent_ino: u32, name: &str) -> Result<()> {
        for block_index in 0..DIRECT_BLOCKS_COUNT as u32 {
            let block_no = self.inode_block(parent_ino, block_index)?;
            if block_no == 0 {
                break;
            }
            let mut buf = [0u8; BLOCK_SIZE];
            self.device.read_block(block_no, &mut buf)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                let off = slot * DIRENT_SIZE;
                let entry: DirEntry = unsafe { util::read_struct(&buf[off..]) };
                if entry.inode != 0 && entry.name() == name {
                    let child_ino = entry.inode;
                    util::write_struct(&mut buf[off..], &DirEntry::zeroed());
                    self.device.write_block(block_no, &buf)?;
                    return self.decrement_link(child_ino);
                }
            }
        }
        Err(FsError::NotFound)
    }

    /// Returns the first live entry named `name` in `parent_ino`.
    ///
    /// The comparison is a strict, case-sensitive match.
    pub fn find_entry(&mut self, parent_ino: u32, name: &str) -> Result<DirEntry> {
        for block_index in 0..DIRECT_BLOCKS_COUNT as u32 {
            let block_no = self.inode_block(parent_ino, block_index)?;
            if block_no == 0 {
                break;
            }
            let mut buf = [0u8; BLOCK_SIZE];
            self.device.read_block(block_no, &mut buf)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                let entry: DirEntry = unsafe { util::read_struct(&buf[slot * DIRENT_SIZE..]) };
                if entry.inode != 0 && entry.name() == name {
                    return Ok(entry);
                }
            }
        }
        Err(FsError::NotFound)
    }

    /// Gathers every live record of the directory, up to `max` of them.
    pub fn read_entries(&mut self, inode_no: u32, max: usize) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for block_index in 0..DIRECT_BLOCKS_COUNT as u32 {
            if entries.len() >= max {
                break;
            }
            let block_no = self.inode_block(inode_no, block_index)?;
            if block_no == 0 {
                break;
            }
            let mut buf = [0u8; BLOCK_SIZE];
            self.device.read_block(block_no, &mut buf)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                if entries.len() >= max {
                    break;
                }
                let entry: DirEntry = unsafe { util::read_struct(&buf[slot * DIRENT_SIZE..]) };
                if entry.inode != 0 {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    /// Resolves `path` to an inode number.
    ///
    /// Absolute paths start at the root, relative paths at the session's
    /// current working directory. `.` and `..` resolve through the
    /// directory's own entries, not by special-casing.
    pub fn path_to_inode(&mut self, path: &str) -> Result<u32> {
        if path.len() > MAX_PATH {
            return Err(FsError::BadArgument);
        }
        let path = trim_trailing(path);
        if path == "/" {
            return Ok(ROOT_INODE);
        }
        let mut current = if path.starts_with('/') {
            ROOT_INODE
        } else {
            self.session.cwd_inode
        };
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if component.len() > MAX_FILENAME {
                return Err(FsError::BadArgument);
            }
            if !self.is_directory(current) {
                return Err(FsError::NotADirectory);
            }
            current = self.find_entry(current, component)?.inode;
        }
        Ok(current)
    }

    /// Resolves `path` into its parent directory inode and leaf name.
    ///
    /// `/` yields the root and an empty name; a path without any separator
    /// yields the current working directory and the whole string.
    pub fn parent_of(&mut self, path: &str) -> Result<(u32, String)> {
        if path.len() > MAX_PATH {
            return Err(FsError::BadArgument);
        }
        let path = trim_trailing(path);
        if path == "/" {
            return Ok((ROOT_INODE, String::new()));
        }
        match split_last(path) {
            None => Ok((self.session.cwd_inode, path.to_string())),
            Some((prefix, leaf)) => {
                let parent_ino = if prefix.is_empty() {
                    ROOT_INODE
                } else {
                    self.path_to_inode(prefix)?
                };
                Ok((parent_ino, leaf.to_string()))
            }
        }
    }

    /// Creates the directory at `path`, recursively creating missing
    /// ancestors with mode 0755. Succeeds silently when the leaf already
    /// exists.
    pub fn create_directory(&mut self, path: &str, mode: u16) -> Result<()> {
        let (parent_ino, leaf) = match self.parent_of(path) {
            Err(FsError::NotFound) => {
                // An ancestor is missing: build the prefix first, then retry.
                let (prefix, _) = split_last(trim_trailing(path)).ok_or(FsError::NotFound)?;
                self.create_directory(prefix, 0o755)?;
                self.parent_of(path)?
            }
            resolved => resolved?,
        };
        if leaf.is_empty() {
            // The root always exists.
            return Ok(());
        }
        if !self.is_directory(parent_ino) {
            return Err(FsError::NotADirectory);
        }
        if self.find_entry(parent_ino, &leaf).is_ok() {
            return Ok(());
        }
        if !self.check_permission(parent_ino, INODE_PERMISSION_IWUSR) {
            return Err(FsError::AccessDenied);
        }
        let (uid, gid) = (self.current_uid(), self.current_gid());
        let dir_ino = self.create_inode(INODE_TYPE_DIRECTORY | (mode & 0x0fff), uid, gid)?;
        let built = self
            .init_directory(dir_ino, parent_ino)
            .and_then(|_| self.add_entry(parent_ino, &leaf, dir_ino, ENTRY_TYPE_DIRECTORY));
        if let Err(e) = built {
            let _ = self.delete_inode(dir_ino);
            return Err(e);
        }
        Ok(())
    }

    /// Allocates the first data block of a fresh directory and writes its
    /// `.` and `..` entries.
    fn init_directory(&mut self, dir_ino: u32, parent_ino: u32) -> Result<()> {
        let block_no = self.allocate_block()?;
        if let Err(e) = self.set_inode_block(dir_ino, 0, block_no) {
            let _ = self.free_block(block_no);
            return Err(e);
        }
        self.device.write_block(block_no, &[0u8; BLOCK_SIZE])?;
        self.add_entry(dir_ino, ".", dir_ino, ENTRY_TYPE_DIRECTORY)?;
        self.add_entry(dir_ino, "..", parent_ino, ENTRY_TYPE_DIRECTORY)
    }

    /// Removes the directory at `path`; it must hold nothing besides `.`
    /// and `..`.
    pub fn delete_directory(&mut self, path: &str) -> Result<()> {
        let inode_no = self.path_to_inode(path)?;
        if !self.is_directory(inode_no) {
            return Err(FsError::NotADirectory);
        }
        if !self.check_permission(inode_no, INODE_PERMISSION_IWUSR) {
            return Err(FsError::AccessDenied);
        }
        let live = self.read_entries(inode_no, MAX_DIR_ENTRIES)?;
        if live.len() > 2 {
            return Err(FsError::NotEmpty);
        }
        let (parent_ino, leaf) = self.parent_of(path)?;
        if leaf.is_empty() {
            return Err(FsError::BadArgument);
        }
        self.remove_entry(parent_ino, &leaf)?;
        // The child's `..` entry held a reference on the parent.
        self.decrement_link(parent_ino)?;
        self.delete_inode(inode_no)
    }

    /// Changes the session's working directory. The target must be a
    /// directory the session user may execute.
    pub fn change_directory(&mut self, path: &str) -> Result<()> {
        let inode_no = self.path_to_inode(path)?;
        if !self.is_directory(inode_no) {
            return Err(FsError::NotADirectory);
        }
        if !self.check_permission(inode_no, INODE_PERMISSION_IXUSR) {
            return Err(FsError::AccessDenied);
        }
        self.session.cwd_inode = inode_no;
        Ok(())
    }

    /// Rebuilds the absolute path of the current working directory by
    /// walking `..` entries up to the root and recovering each component's
    /// name from its parent.
    pub fn cwd_path(&mut self) -> String {
        let mut components = Vec::new();
        let mut current = self.session.cwd_inode;
        while current != ROOT_INODE {
            let Ok(dotdot) = self.find_entry(current, "..") else {
                break;
            };
            let parent_ino = dotdot.inode;
            let Ok(entries) = self.read_entries(parent_ino, MAX_DIR_ENTRIES) else {
                break;
            };
            let name = entries
                .iter()
                .filter(|e| e.inode == current)
                .map(|e| e.name())
                .find(|n| n != "." && n != "..");
            match name {
                Some(name) => components.push(name),
                None => break,
            }
            if parent_ino == current {
                break;
            }
            current = parent_ino;
        }
        if components.is_empty() {
            return "/".to_string();
        }
        let mut path = String::new();
        for component in components.iter().rev() {
            path.push('/');
            path.push_str(component);
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_has_fixed_stride() {
        assert_eq!(DIRENT_SIZE, 264);
        assert_eq!(ENTRIES_PER_BLOCK, 3);
    }

    #[test]
    fn entry_name_roundtrip() {
        let entry = DirEntry::new(7, "notes.txt", ENTRY_TYPE_REGULAR);
        assert_eq!({ entry.inode }, 7);
        assert_eq!({ entry.name_len }, 9);
        assert_eq!({ entry.file_type }, ENTRY_TYPE_REGULAR);
        assert_eq!(entry.name(), "notes.txt");
    }

    #[test]
    fn zeroed_entry_is_free() {
        let entry = DirEntry::zeroed();
        assert_eq!({ entry.inode }, 0);
        assert_eq!(entry.name(), "");
    }

    #[test]
    fn split_last_separates_leaf() {
        assert_eq!(split_last("/a/b/c"), Some(("/a/b", "c")));
        assert_eq!(split_last("/a"), Some(("", "a")));
        assert_eq!(split_last("a/b"), Some(("a", "b")));
        assert_eq!(split_last("plain"), None);
    }

    #[test]
    fn trailing_separators_are_ignored() {
        assert_eq!(trim_trailing("/a/b/"), "/a/b");
        assert_eq!(trim_trailing("/"), "/");
        assert_eq!(trim_trailing("///"), "/");
        assert_eq!(trim_trailing("a/"), "a");
    }
}
