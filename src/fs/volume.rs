//! The volume: the in-memory mirror of a mounted image together with the
//! session and open-file state attached to it.
//!
//! The engine runs single-threaded; every operation completes before the
//! next begins, so the mirrored superblock, bitmaps and user table need no
//! locking. Bitmaps are written through on every change, the superblock is
//! flushed at unmount.

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::directory::{DirEntry, DIRENT_SIZE, ENTRY_TYPE_DIRECTORY};
use crate::error::{FsError, Result};
use crate::inode::{INODE_PERMISSION_IRUSR, INODE_PERMISSION_IWUSR, INODE_TYPE_DIRECTORY};
use crate::superblock::Superblock;
use crate::user::UserRecord;
use crate::util;
use crate::{
    BLOCK_BITMAP_BLOCK, BLOCK_SIZE, INODE_BITMAP_BLOCK, MAX_BLOCKS, MAX_INODES, MAX_OPEN_FILES,
    MAX_USERS, RESERVED_BLOCKS, ROOT_INODE,
};
use std::path::{Path, PathBuf};

/// The first descriptor handed out; 0 through 2 belong to the standard
/// streams.
const FIRST_FD: i32 = 3;

/// Access mode of an open file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpenMode {
    /// Reads only.
    ReadOnly,
    /// Writes only.
    WriteOnly,
    /// Both directions.
    ReadWrite,
}

impl OpenMode {
    /// Decodes the mode from the low bits of UNIX-style open flags; higher
    /// bits are ignored.
    pub fn from_flags(flags: i32) -> Result<Self> {
        match flags & 0b11 {
            0 => Ok(Self::ReadOnly),
            1 => Ok(Self::WriteOnly),
            2 => Ok(Self::ReadWrite),
            _ => Err(FsError::BadArgument),
        }
    }

    /// Tells whether reads are permitted.
    pub fn readable(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    /// Tells whether writes are permitted.
    pub fn writable(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }

    /// The owner-slot permission bits this mode requires.
    pub fn access_bits(self) -> u16 {
        match self {
            Self::ReadOnly => INODE_PERMISSION_IRUSR,
            Self::WriteOnly => INODE_PERMISSION_IWUSR,
            Self::ReadWrite => INODE_PERMISSION_IRUSR | INODE_PERMISSION_IWUSR,
        }
    }
}

/// A process-local open-file handle.
#[derive(Clone, Copy)]
pub struct OpenFile {
    /// The descriptor handed to the caller.
    pub fd: i32,
    /// The file's inode.
    pub inode_no: u32,
    /// The access mode the file was opened with.
    pub mode: OpenMode,
    /// Current byte offset.
    pub offset: u32,
}

/// The session: who is logged in and where they stand in the tree.
pub struct Session {
    /// Index of the logged-in user in the user table, `None` when
    /// anonymous.
    pub current_user: Option<usize>,
    /// Inode of the current working directory.
    pub cwd_inode: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            current_user: None,
            cwd_inode: ROOT_INODE,
        }
    }
}

/// A filesystem engine instance.
///
/// All mutable state lives here: the opened image, the superblock and
/// bitmaps mirrored in memory, the user table, the session and the
/// open-file table.
pub struct Ext2Fs {
    pub(crate) device: BlockDevice,
    pub(crate) superblock: Superblock,
    pub(crate) block_bitmap: Bitmap,
    pub(crate) inode_bitmap: Bitmap,
    pub(crate) users: [UserRecord; MAX_USERS],
    pub(crate) session: Session,
    pub(crate) open_files: [Option<OpenFile>; MAX_OPEN_FILES],
    pub(crate) next_fd: i32,
    pub(crate) image_path: Option<PathBuf>,
}

impl Default for Ext2Fs {
    fn default() -> Self {
        Self::new()
    }
}

impl Ext2Fs {
    /// Creates an engine with no mounted image.
    pub fn new() -> Self {
        Self {
            device: BlockDevice::default(),
            superblock: Superblock::zeroed(),
            block_bitmap: Bitmap::new(MAX_BLOCKS - 1),
            inode_bitmap: Bitmap::new(MAX_INODES - 1),
            users: [UserRecord::zeroed(); MAX_USERS],
            session: Session::default(),
            open_files: [None; MAX_OPEN_FILES],
            next_fd: FIRST_FD,
            image_path: None,
        }
    }

    /// Tells whether an image is mounted.
    pub fn is_mounted(&self) -> bool {
        self.device.is_open()
    }

    /// Allocates a block, mirroring the bitmap to disk.
    ///
    /// The returned id is 1-based and used directly as a physical block
    /// index, so block 0 (the superblock) is never handed out.
    pub fn allocate_block(&mut self) -> Result<u32> {
        let bit = self.block_bitmap.find_first_zero().ok_or(FsError::NoSpace)?;
        self.block_bitmap.set(bit);
        self.superblock.free_blocks = self.superblock.free_blocks - 1;
        self.device
            .write_block(BLOCK_BITMAP_BLOCK, self.block_bitmap.as_bytes())?;
        Ok(bit as u32 + 1)
    }

    /// Releases block `block_no`, mirroring the bitmap to disk.
    pub fn free_block(&mut self, block_no: u32) -> Result<()> {
        if block_no == 0 || block_no as usize >= MAX_BLOCKS {
            return Err(FsError::BadArgument);
        }
        let bit = block_no as usize - 1;
        if self.block_bitmap.test(bit) {
            self.block_bitmap.clear(bit);
            self.superblock.free_blocks = self.superblock.free_blocks + 1;
            self.device
                .write_block(BLOCK_BITMAP_BLOCK, self.block_bitmap.as_bytes())?;
        }
        Ok(())
    }

    /// Allocates an inode id, mirroring the bitmap to disk.
    pub fn allocate_inode(&mut self) -> Result<u32> {
        let bit = self.inode_bitmap.find_first_zero().ok_or(FsError::NoSpace)?;
        self.inode_bitmap.set(bit);
        self.superblock.free_inodes = self.superblock.free_inodes - 1;
        self.device
            .write_block(INODE_BITMAP_BLOCK, self.inode_bitmap.as_bytes())?;
        Ok(bit as u32 + 1)
    }

    /// Releases inode id `inode_no`, mirroring the bitmap to disk.
    pub fn free_inode(&mut self, inode_no: u32) -> Result<()> {
        if inode_no == 0 || inode_no as usize >= MAX_INODES {
            return Err(FsError::BadArgument);
        }
        let bit = inode_no as usize - 1;
        if self.inode_bitmap.test(bit) {
            self.inode_bitmap.clear(bit);
            self.superblock.free_inodes = self.superblock.free_inodes + 1;
            self.device
                .write_block(INODE_BITMAP_BLOCK, self.inode_bitmap.as_bytes())?;
        }
        Ok(())
    }

    /// Writes the superblock, with its current counters, to block 0.
    pub(crate) fn flush_superblock(&mut self) -> Result<()> {
        self.superblock.last_write_time = util::timestamp();
        let mut buf = [0u8; BLOCK_SIZE];
        util::write_struct(&mut buf, &self.superblock);
        self.device.write_block(0, &buf)
    }

    /// Builds a fresh filesystem in the image at `path`.
    ///
    /// The image is zero-filled, the superblock and bitmaps are written
    /// with the whole metadata region reserved, the root directory is
    /// created with `.` and `..` pointing at itself, and the default user
    /// accounts are seeded.
    pub fn format(path: &Path) -> Result<()> {
        let mut fs = Self::new();
        fs.device.create(path)?;
        fs.superblock = Superblock::new_formatted();
        // Reserve the metadata region: bitmaps, inode table, user table.
        for bit in 0..RESERVED_BLOCKS as usize {
            fs.block_bitmap.set(bit);
        }
        // Inode 1 stays reserved; the root directory takes inode 2.
        fs.inode_bitmap.set(0);
        fs.superblock.free_blocks = fs.block_bitmap.free_count();
        fs.superblock.free_inodes = fs.inode_bitmap.free_count();
        fs.device
            .write_block(BLOCK_BITMAP_BLOCK, fs.block_bitmap.as_bytes())?;
        fs.device
            .write_block(INODE_BITMAP_BLOCK, fs.inode_bitmap.as_bytes())?;
        // Root directory.
        let root_ino = fs.create_inode(INODE_TYPE_DIRECTORY | 0o755, 0, 0)?;
        debug_assert_eq!(root_ino, ROOT_INODE);
        let root_block = fs.allocate_block()?;
        fs.set_inode_block(root_ino, 0, root_block)?;
        let mut buf = [0u8; BLOCK_SIZE];
        util::write_struct(&mut buf, &DirEntry::new(root_ino, ".", ENTRY_TYPE_DIRECTORY));
        util::write_struct(
            &mut buf[DIRENT_SIZE..],
            &DirEntry::new(root_ino, "..", ENTRY_TYPE_DIRECTORY),
        );
        fs.device.write_block(root_block, &buf)?;
        // Default accounts.
        fs.init_users()?;
        fs.flush_superblock()?;
        fs.device.close();
        Ok(())
    }

    /// Mounts the image at `path`: loads and validates the superblock,
    /// loads the bitmaps and the user table, and resets the session.
    pub fn mount(&mut self, path: &Path) -> Result<()> {
        self.device.close();
        self.device.open(path)?;
        let loaded = self.load_mounted_state();
        if loaded.is_err() {
            self.device.close();
            return loaded;
        }
        self.session = Session::default();
        self.open_files = [None; MAX_OPEN_FILES];
        self.next_fd = FIRST_FD;
        self.image_path = Some(path.to_path_buf());
        Ok(())
    }

    fn load_mounted_state(&mut self) -> Result<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        self.device.read_block(0, &mut buf)?;
        let superblock: Superblock = unsafe { util::read_struct(&buf) };
        superblock.check_signature()?;
        self.superblock = superblock;
        self.device.read_block(BLOCK_BITMAP_BLOCK, &mut buf)?;
        self.block_bitmap.load(buf);
        self.device.read_block(INODE_BITMAP_BLOCK, &mut buf)?;
        self.inode_bitmap.load(buf);
        // The on-disk counters are advisory; the bitmaps are authoritative.
        self.superblock.free_blocks = self.block_bitmap.free_count();
        self.superblock.free_inodes = self.inode_bitmap.free_count();
        self.superblock.last_mount_time = util::timestamp();
        self.superblock.mount_count = self.superblock.mount_count + 1;
        self.init_users()
    }

    /// Unmounts: flushes the superblock counters and closes the image.
    /// Idempotent.
    pub fn unmount(&mut self) -> Result<()> {
        if self.device.is_open() {
            self.flush_superblock()?;
            self.device.close();
        }
        self.image_path = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MAX_DIR_ENTRIES;
    use std::fs;

    fn temp_image(name: &str) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("ext2fs-volume-{name}-{}.img", std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn format_then_mount() {
        let path = temp_image("format");
        Ext2Fs::format(&path).unwrap();
        let mut fs = Ext2Fs::new();
        fs.mount(&path).unwrap();
        // The root directory is in place with its dot entries.
        assert_eq!(fs.path_to_inode("/").unwrap(), ROOT_INODE);
        let entries = fs.read_entries(ROOT_INODE, MAX_DIR_ENTRIES).unwrap();
        let names: Vec<String> = entries.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec![".", ".."]);
        assert!(entries.iter().all(|e| e.inode == ROOT_INODE));
        // Default accounts are seeded.
        assert!(fs.find_user("root").is_some());
        assert!(fs.find_user("user1").is_some());
        assert!(fs.find_user("user2").is_some());
        fs.unmount().unwrap();
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn counters_match_bitmaps() {
        let path = temp_image("counters");
        Ext2Fs::format(&path).unwrap();
        let mut fs = Ext2Fs::new();
        fs.mount(&path).unwrap();
        assert_eq!({ fs.superblock.free_blocks }, fs.block_bitmap.free_count());
        assert_eq!({ fs.superblock.free_inodes }, fs.inode_bitmap.free_count());
        // Metadata region and the root's data block are in use.
        assert_eq!(fs.block_bitmap.popcount(), RESERVED_BLOCKS + 1);
        // Inode 1 (reserved) and the root inode.
        assert_eq!(fs.inode_bitmap.popcount(), 2);
        let before = { fs.superblock.free_blocks };
        let block_no = fs.allocate_block().unwrap();
        assert_eq!({ fs.superblock.free_blocks }, before - 1);
        fs.free_block(block_no).unwrap();
        assert_eq!({ fs.superblock.free_blocks }, before);
        // Double free leaves the counter untouched.
        fs.free_block(block_no).unwrap();
        assert_eq!({ fs.superblock.free_blocks }, before);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn allocated_ids_skip_reserved_region() {
        let path = temp_image("ids");
        Ext2Fs::format(&path).unwrap();
        let mut fs = Ext2Fs::new();
        fs.mount(&path).unwrap();
        let block_no = fs.allocate_block().unwrap();
        assert!(block_no > RESERVED_BLOCKS);
        assert!((block_no as usize) < MAX_BLOCKS);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn mount_rejects_bad_signature() {
        let path = temp_image("badmagic");
        fs::write(&path, vec![0u8; MAX_BLOCKS * BLOCK_SIZE]).unwrap();
        let mut volume = Ext2Fs::new();
        assert!(matches!(volume.mount(&path), Err(FsError::Corrupt)));
        assert!(!volume.is_mounted());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn mount_missing_image_fails() {
        let mut volume = Ext2Fs::new();
        assert!(matches!(
            volume.mount(Path::new("/nonexistent/ext2fs.img")),
            Err(FsError::NotMounted)
        ));
    }

    #[test]
    fn remount_preserves_root_and_users() {
        let path = temp_image("remount");
        Ext2Fs::format(&path).unwrap();
        let mut fs = Ext2Fs::new();
        fs.mount(&path).unwrap();
        let users_before: Vec<String> = fs
            .users
            .iter()
            .filter(|u| u.active != 0)
            .map(|u| u.username())
            .collect();
        fs.unmount().unwrap();
        fs.mount(&path).unwrap();
        let users_after: Vec<String> = fs
            .users
            .iter()
            .filter(|u| u.active != 0)
            .map(|u| u.username())
            .collect();
        assert_eq!(users_before, users_after);
        assert_eq!(fs.path_to_inode("/").unwrap(), ROOT_INODE);
        let entries = fs.read_entries(ROOT_INODE, MAX_DIR_ENTRIES).unwrap();
        assert_eq!(entries.len(), 2);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn open_mode_from_flags() {
        assert_eq!(OpenMode::from_flags(0).unwrap(), OpenMode::ReadOnly);
        assert_eq!(OpenMode::from_flags(1).unwrap(), OpenMode::WriteOnly);
        assert_eq!(OpenMode::from_flags(2).unwrap(), OpenMode::ReadWrite);
        assert!(OpenMode::from_flags(3).is_err());
        // Higher bits are ignored.
        assert_eq!(OpenMode::from_flags(0o100 | 2).unwrap(), OpenMode::ReadWrite);
        assert!(OpenMode::from_flags(2).unwrap().readable());
        assert!(OpenMode::from_flags(2).unwrap().writable());
        assert!(!OpenMode::from_flags(0).unwrap().writable());
        assert!(!OpenMode::from_flags(1).unwrap().readable());
    }
}
