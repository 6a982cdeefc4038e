//! The host interface: the operations exposed to the outer command layer.
//!
//! Engine operations never print; each returns a result (or a structured
//! report) for the caller to render. Every operation except the session
//! and volume management entry points requires a logged-in session,
//! consults the path-scope policy first, then the inode-level permission
//! bits at the eventual target.

use crate::directory::{ENTRY_TYPE_REGULAR, MAX_DIR_ENTRIES};
use crate::error::{FsError, Result};
use crate::inode::{
    FileType, INODE_PERMISSION_IRUSR, INODE_PERMISSION_IWUSR, INODE_PERMISSION_IXUSR,
    INODE_TYPE_REGULAR,
};
use crate::volume::{Ext2Fs, OpenFile, OpenMode};
use std::path::PathBuf;

/// A directory listing row.
pub struct DirEntryInfo {
    /// Entry name.
    pub name: String,
    /// Referenced inode.
    pub inode_no: u32,
    /// File type, when known.
    pub file_type: Option<FileType>,
    /// Size in bytes.
    pub size: u32,
    /// Mode word of the inode.
    pub mode: u16,
}

/// A snapshot of the engine state for the `status` command.
pub struct StatusReport {
    /// Path of the mounted image, if any.
    pub image_path: Option<PathBuf>,
    /// Total number of blocks.
    pub total_blocks: u32,
    /// Number of free blocks.
    pub free_blocks: u32,
    /// Total number of inodes.
    pub total_inodes: u32,
    /// Number of free inodes.
    pub free_inodes: u32,
    /// Name of the session user.
    pub current_user: String,
    /// Number of open files.
    pub open_files: usize,
}

/// A row of the `users` report.
pub struct UserInfo {
    /// Login name.
    pub username: String,
    /// User id.
    pub uid: u16,
    /// Group id.
    pub gid: u16,
    /// Tells whether this is the session user.
    pub logged_in: bool,
}

impl Ext2Fs {
    fn require_login(&self) -> Result<()> {
        if self.is_logged_in() {
            Ok(())
        } else {
            Err(FsError::NotLoggedIn)
        }
    }

    fn require_root(&self) -> Result<()> {
        self.require_login()?;
        if self.current_uid() == 0 {
            Ok(())
        } else {
            Err(FsError::AccessDenied)
        }
    }

    fn check_path_scope(&mut self, path: &str, access: u16) -> Result<()> {
        if self.check_user_path_access(path, access) {
            Ok(())
        } else {
            Err(FsError::PathDenied)
        }
    }

    fn find_open(&self, fd: i32) -> Result<(usize, OpenFile)> {
        self.open_files
            .iter()
            .enumerate()
            .find_map(|(slot, file)| file.filter(|f| f.fd == fd).map(|f| (slot, f)))
            .ok_or(FsError::BadDescriptor)
    }

    /// Creates an empty regular file with mode 0644.
    pub fn file_create(&mut self, path: &str) -> Result<()> {
        self.require_login()?;
        self.check_path_scope(path, INODE_PERMISSION_IWUSR)?;
        let (parent_ino, leaf) = self.parent_of(path)?;
        if leaf.is_empty() {
            return Err(FsError::BadArgument);
        }
        if !self.is_directory(parent_ino) {
            return Err(FsError::NotADirectory);
        }
        if !self.check_permission(parent_ino, INODE_PERMISSION_IWUSR) {
            return Err(FsError::AccessDenied);
        }
        let (uid, gid) = (self.current_uid(), self.current_gid());
        let inode_no = self.create_inode(INODE_TYPE_REGULAR | 0o644, uid, gid)?;
        if let Err(e) = self.add_entry(parent_ino, &leaf, inode_no, ENTRY_TYPE_REGULAR) {
            let _ = self.delete_inode(inode_no);
            return Err(e);
        }
        Ok(())
    }

    /// Deletes a regular file.
    pub fn file_delete(&mut self, path: &str) -> Result<()> {
        self.require_login()?;
        self.check_path_scope(path, INODE_PERMISSION_IWUSR)?;
        let inode_no = self.path_to_inode(path)?;
        if self.is_directory(inode_no) {
            return Err(FsError::IsADirectory);
        }
        if !self.check_permission(inode_no, INODE_PERMISSION_IWUSR) {
            return Err(FsError::AccessDenied);
        }
        let (parent_ino, leaf) = self.parent_of(path)?;
        self.remove_entry(parent_ino, &leaf)?;
        self.delete_inode(inode_no)
    }

    /// Opens a regular file, returning a fresh descriptor.
    pub fn file_open(&mut self, path: &str, flags: i32) -> Result<i32> {
        self.require_login()?;
        let mode = OpenMode::from_flags(flags)?;
        self.check_path_scope(path, mode.access_bits())?;
        let inode_no = self.path_to_inode(path)?;
        let inode = self.read_inode(inode_no)?;
        match inode.file_type() {
            Some(FileType::Regular) => {}
            Some(FileType::Directory) => return Err(FsError::IsADirectory),
            None => return Err(FsError::BadArgument),
        }
        if !self.check_permission(inode_no, mode.access_bits()) {
            return Err(FsError::AccessDenied);
        }
        let slot = self
            .open_files
            .iter()
            .position(|f| f.is_none())
            .ok_or(FsError::TooManyOpenFiles)?;
        let fd = self.next_fd;
        self.next_fd += 1;
        self.open_files[slot] = Some(OpenFile {
            fd,
            inode_no,
            mode,
            offset: 0,
        });
        Ok(fd)
    }

    /// Closes the descriptor `fd`.
    pub fn file_close(&mut self, fd: i32) -> Result<()> {
        self.require_login()?;
        let (slot, _) = self.find_open(fd)?;
        self.open_files[slot] = None;
        Ok(())
    }

    /// Reads up to `size` bytes from `fd`, advancing its offset.
    ///
    /// An empty result means end of file.
    pub fn file_read(&mut self, fd: i32, size: usize) -> Result<Vec<u8>> {
        self.require_login()?;
        let (slot, file) = self.find_open(fd)?;
        if !file.mode.readable() {
            return Err(FsError::AccessDenied);
        }
        let data = self.read_inode_data(file.inode_no, size, file.offset)?;
        if let Some(handle) = &mut self.open_files[slot] {
            handle.offset += data.len() as u32;
        }
        Ok(data)
    }

    /// Writes `data` at `fd`'s offset, returning the bytes written.
    pub fn file_write(&mut self, fd: i32, data: &[u8]) -> Result<usize> {
        self.require_login()?;
        let (slot, file) = self.find_open(fd)?;
        if !file.mode.writable() {
            return Err(FsError::AccessDenied);
        }
        let written = self.write_inode_data(file.inode_no, data, file.offset)?;
        if let Some(handle) = &mut self.open_files[slot] {
            handle.offset += written as u32;
        }
        Ok(written)
    }

    /// Creates a directory (and any missing ancestors) with mode 0755.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        self.require_login()?;
        self.check_path_scope(path, INODE_PERMISSION_IWUSR)?;
        self.create_directory(path, 0o755)
    }

    /// Removes an empty directory.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        self.require_login()?;
        self.check_path_scope(path, INODE_PERMISSION_IWUSR)?;
        self.delete_directory(path)
    }

    /// Changes the session's working directory.
    pub fn cd(&mut self, path: &str) -> Result<()> {
        self.require_login()?;
        self.check_path_scope(path, INODE_PERMISSION_IXUSR)?;
        self.change_directory(path)
    }

    /// Lists the directory at `path`.
    pub fn dir(&mut self, path: &str) -> Result<Vec<DirEntryInfo>> {
        self.require_login()?;
        self.check_path_scope(path, INODE_PERMISSION_IRUSR)?;
        let inode_no = self.path_to_inode(path)?;
        if !self.is_directory(inode_no) {
            return Err(FsError::NotADirectory);
        }
        if !self.check_permission(inode_no, INODE_PERMISSION_IRUSR) {
            return Err(FsError::AccessDenied);
        }
        let entries = self.read_entries(inode_no, MAX_DIR_ENTRIES)?;
        let mut rows = Vec::new();
        for entry in entries {
            let Ok(inode) = self.read_inode(entry.inode) else {
                continue;
            };
            rows.push(DirEntryInfo {
                name: entry.name(),
                inode_no: entry.inode,
                file_type: inode.file_type(),
                size: inode.size,
                mode: inode.mode,
            });
        }
        Ok(rows)
    }

    /// Lists the active user accounts.
    pub fn list_users(&self) -> Result<Vec<UserInfo>> {
        self.require_login()?;
        Ok(self
            .users
            .iter()
            .enumerate()
            .filter(|(_, u)| u.active != 0)
            .map(|(slot, u)| UserInfo {
                username: u.username(),
                uid: u.uid,
                gid: u.gid,
                logged_in: self.session.current_user == Some(slot),
            })
            .collect())
    }

    /// Reports the engine state.
    pub fn status(&self) -> StatusReport {
        StatusReport {
            image_path: self.image_path.clone(),
            total_blocks: self.superblock.total_blocks,
            free_blocks: self.superblock.free_blocks,
            total_inodes: self.superblock.total_inodes,
            free_inodes: self.superblock.free_inodes,
            current_user: self.current_username(),
            open_files: self.open_files.iter().flatten().count(),
        }
    }

    /// Installs new permission bits on the target; root only.
    pub fn chmod(&mut self, path: &str, mode: u16) -> Result<()> {
        self.require_root()?;
        let inode_no = self.path_to_inode(path)?;
        self.change_permission(inode_no, mode)
    }

    /// Changes the ownership of the target; root only.
    pub fn chown(&mut self, path: &str, uid: u16, gid: u16) -> Result<()> {
        self.require_root()?;
        let inode_no = self.path_to_inode(path)?;
        self.change_owner(inode_no, uid, gid)
    }

    /// Adds a user account; root only.
    pub fn useradd(&mut self, username: &str, password: &str, uid: u16, gid: u16) -> Result<()> {
        self.require_root()?;
        self.add_user(username, password, uid, gid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::DIRECT_BLOCKS_COUNT;
    use crate::util;
    use crate::{BLOCK_SIZE, MAX_OPEN_FILES, ROOT_INODE};
    use std::fs;
    use std::path::PathBuf;

    fn temp_image(name: &str) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("ext2fs-cmd-{name}-{}.img", std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    fn mounted(name: &str) -> (Ext2Fs, PathBuf) {
        let path = temp_image(name);
        Ext2Fs::format(&path).unwrap();
        let mut fs = Ext2Fs::new();
        fs.mount(&path).unwrap();
        (fs, path)
    }

    #[test]
    fn create_write_read_roundtrip() {
        let (mut fs, path) = mounted("roundtrip");
        fs.login("root", "root").unwrap();
        fs.mkdir("/a").unwrap();
        fs.mkdir("/a/b").unwrap();
        fs.cd("/a/b").unwrap();
        assert_eq!(fs.cwd_path(), "/a/b");
        fs.file_create("c").unwrap();
        let fd = fs.file_open("c", 2).unwrap();
        assert_eq!(fs.file_write(fd, b"hello").unwrap(), 5);
        fs.file_close(fd).unwrap();
        let fd2 = fs.file_open("c", 0).unwrap();
        assert_eq!(fs.file_read(fd2, 5).unwrap(), b"hello");
        // The offset advanced to the end of file.
        assert!(fs.file_read(fd2, 5).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn operations_require_login() {
        let (mut fs, path) = mounted("nologin");
        assert!(matches!(fs.mkdir("/a"), Err(FsError::NotLoggedIn)));
        assert!(matches!(fs.file_create("/f"), Err(FsError::NotLoggedIn)));
        assert!(matches!(fs.dir("/"), Err(FsError::NotLoggedIn)));
        assert!(matches!(fs.list_users(), Err(FsError::NotLoggedIn)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn login_failures() {
        let (mut fs, path) = mounted("badlogin");
        assert!(matches!(fs.login("nobody", "x"), Err(FsError::NotFound)));
        assert!(matches!(
            fs.login("user1", "wrong"),
            Err(FsError::AccessDenied)
        ));
        assert!(!fs.is_logged_in());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn home_provisioning_and_scope() {
        let (mut fs, path) = mounted("homes");
        fs.login("user1", "user1").unwrap();
        assert_eq!(fs.cwd_path(), "/home/user1");
        // The home belongs to its user even though root created it.
        let home = fs.path_to_inode("/home/user1").unwrap();
        let inode = fs.read_inode(home).unwrap();
        assert_eq!({ inode.uid }, 1);
        assert_eq!({ inode.gid }, 1);
        fs.file_create("/home/user1/x").unwrap();
        assert!(matches!(
            fs.file_create("/home/user2/x"),
            Err(FsError::PathDenied)
        ));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn scope_allows_reading_the_tree() {
        let (mut fs, path) = mounted("scope");
        // Root's first login provisions /root.
        fs.login("root", "root").unwrap();
        fs.logout().unwrap();
        fs.login("user1", "user1").unwrap();
        let names: Vec<String> = fs.dir("/").unwrap().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&"home".to_string()));
        assert!(names.contains(&"root".to_string()));
        // /root is readable but not writable for other users.
        fs.dir("/root").unwrap();
        assert!(matches!(
            fs.file_create("/root/y"),
            Err(FsError::PathDenied)
        ));
        assert!(matches!(fs.cd("/root"), Err(FsError::PathDenied)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn path_scope_matrix() {
        let (mut fs, path) = mounted("policy");
        fs.login("root", "root").unwrap();
        fs.logout().unwrap();
        fs.login("user1", "user1").unwrap();
        // Reads are broadly allowed, writes confined to the home subtree.
        assert!(fs.check_user_path_access("/", INODE_PERMISSION_IRUSR));
        assert!(!fs.check_user_path_access("/", INODE_PERMISSION_IWUSR));
        assert!(fs.check_user_path_access("/home", INODE_PERMISSION_IXUSR));
        assert!(!fs.check_user_path_access("/home", INODE_PERMISSION_IWUSR));
        assert!(fs.check_user_path_access("/root", INODE_PERMISSION_IRUSR));
        assert!(!fs.check_user_path_access("/root", INODE_PERMISSION_IXUSR));
        assert!(fs.check_user_path_access("/home/user1/f", INODE_PERMISSION_IWUSR));
        assert!(!fs.check_user_path_access("/home/user2/f", INODE_PERMISSION_IWUSR));
        assert!(fs.check_user_path_access("/home/user2/f", INODE_PERMISSION_IRUSR));
        assert!(fs.check_user_path_access("..", INODE_PERMISSION_IXUSR));
        // A plain name is judged against the working directory's bits.
        assert!(fs.check_user_path_access("f", INODE_PERMISSION_IWUSR));
        // Deep paths outside the home subtree fall through to a denial.
        assert!(!fs.check_user_path_access("/a/b", INODE_PERMISSION_IRUSR));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn inode_bitmap_matches_records() {
        let (mut fs, path) = mounted("bitmapinv");
        fs.login("root", "root").unwrap();
        fs.mkdir("/d").unwrap();
        fs.file_create("/d/f").unwrap();
        fs.file_create("/d/g").unwrap();
        fs.file_delete("/d/f").unwrap();
        for inode_no in 2..crate::MAX_INODES as u32 {
            let inode = fs.read_inode(inode_no).unwrap();
            if fs.inode_bitmap.test(inode_no as usize - 1) {
                assert_ne!({ inode.mode }, 0);
            } else {
                assert!(util::reinterpret(&inode).iter().all(|&b| b == 0));
            }
        }
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn useradd_and_fresh_home() {
        let (mut fs, path) = mounted("useradd");
        fs.login("root", "root").unwrap();
        fs.useradd("alice", "pw", 3, 3).unwrap();
        fs.logout().unwrap();
        fs.login("alice", "pw").unwrap();
        assert_eq!(fs.cwd_path(), "/home/alice");
        let home = fs.path_to_inode("/home/alice").unwrap();
        let inode = fs.read_inode(home).unwrap();
        assert_eq!({ inode.uid }, 3);
        assert_eq!({ inode.gid }, 3);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn useradd_rejects_conflicts() {
        let (mut fs, path) = mounted("dupuser");
        fs.login("root", "root").unwrap();
        assert!(matches!(
            fs.useradd("user1", "x", 9, 9),
            Err(FsError::AlreadyExists)
        ));
        assert!(matches!(
            fs.useradd("bob", "x", 1, 9),
            Err(FsError::AlreadyExists)
        ));
        assert!(matches!(
            fs.useradd("bob", "x", 9, 1),
            Err(FsError::AlreadyExists)
        ));
        fs.useradd("bob", "x", 9, 9).unwrap();
        // Non-root users may not manage accounts.
        fs.logout().unwrap();
        fs.login("user1", "user1").unwrap();
        assert!(matches!(
            fs.useradd("carol", "x", 10, 10),
            Err(FsError::AccessDenied)
        ));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn user_removal_restores_table_bytes() {
        let (mut fs, path) = mounted("userbytes");
        fs.login("root", "root").unwrap();
        let before: Vec<Vec<u8>> = fs.users.iter().map(|u| util::reinterpret(u).to_vec()).collect();
        fs.useradd("bob", "pw", 9, 9).unwrap();
        fs.remove_user("bob").unwrap();
        let after: Vec<Vec<u8>> = fs.users.iter().map(|u| util::reinterpret(u).to_vec()).collect();
        assert_eq!(before, after);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn mkdir_rmdir_restores_state() {
        let (mut fs, path) = mounted("mkrm");
        fs.login("root", "root").unwrap();
        let blocks_before = fs.block_bitmap.as_bytes().to_vec();
        let inodes_before = fs.inode_bitmap.as_bytes().to_vec();
        let root_block = fs.inode_block(ROOT_INODE, 0).unwrap();
        let mut dir_before = [0u8; BLOCK_SIZE];
        fs.device.read_block(root_block, &mut dir_before).unwrap();
        let links_before = { fs.read_inode(ROOT_INODE).unwrap().links_count };

        fs.mkdir("/p").unwrap();
        fs.rmdir("/p").unwrap();

        assert_eq!(fs.block_bitmap.as_bytes().to_vec(), blocks_before);
        assert_eq!(fs.inode_bitmap.as_bytes().to_vec(), inodes_before);
        let mut dir_after = [0u8; BLOCK_SIZE];
        fs.device.read_block(root_block, &mut dir_after).unwrap();
        assert_eq!(dir_after, dir_before);
        assert_eq!({ fs.read_inode(ROOT_INODE).unwrap().links_count }, links_before);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn mkdir_is_recursive_and_idempotent() {
        let (mut fs, path) = mounted("recursive");
        fs.login("root", "root").unwrap();
        fs.mkdir("/x/y/z").unwrap();
        assert!(fs.path_to_inode("/x/y/z").is_ok());
        // Ancestors got the default mode.
        let x = fs.path_to_inode("/x").unwrap();
        assert_eq!({ fs.read_inode(x).unwrap().mode } & 0x0fff, 0o755);
        // Creating it again succeeds silently.
        fs.mkdir("/x/y/z").unwrap();
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn mkdir_rejects_file_parent() {
        let (mut fs, path) = mounted("fileparent");
        fs.login("root", "root").unwrap();
        fs.file_create("/f").unwrap();
        assert!(matches!(fs.mkdir("/f/sub"), Err(FsError::NotADirectory)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn dot_entries_point_home() {
        let (mut fs, path) = mounted("dots");
        fs.login("root", "root").unwrap();
        fs.mkdir("/d").unwrap();
        let d = fs.path_to_inode("/d").unwrap();
        assert_eq!({ fs.find_entry(d, ".").unwrap().inode }, d);
        assert_eq!({ fs.find_entry(d, "..").unwrap().inode }, ROOT_INODE);
        // `..` resolves through the entry, up to the root.
        fs.cd("/d").unwrap();
        assert_eq!(fs.path_to_inode("..").unwrap(), ROOT_INODE);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rmdir_refuses_non_empty() {
        let (mut fs, path) = mounted("nonempty");
        fs.login("root", "root").unwrap();
        fs.mkdir("/d").unwrap();
        fs.file_create("/d/f").unwrap();
        assert!(matches!(fs.rmdir("/d"), Err(FsError::NotEmpty)));
        fs.file_delete("/d/f").unwrap();
        fs.rmdir("/d").unwrap();
        assert!(matches!(fs.path_to_inode("/d"), Err(FsError::NotFound)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn delete_rejects_directories() {
        let (mut fs, path) = mounted("deldir");
        fs.login("root", "root").unwrap();
        fs.mkdir("/d").unwrap();
        assert!(matches!(fs.file_delete("/d"), Err(FsError::IsADirectory)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn indirect_block_is_allocated_lazily() {
        let (mut fs, path) = mounted("indirect");
        fs.login("root", "root").unwrap();
        fs.file_create("/big").unwrap();
        let big = fs.path_to_inode("/big").unwrap();
        // Writing at the direct-block boundary brings in the indirect block.
        let boundary = (DIRECT_BLOCKS_COUNT * BLOCK_SIZE) as u32;
        fs.write_inode_data(big, b"boundary", boundary).unwrap();
        let inode = fs.read_inode(big).unwrap();
        let indirect = inode.block[DIRECT_BLOCKS_COUNT];
        assert_ne!(indirect, 0);
        assert!(fs.block_bitmap.test(indirect as usize - 1));
        assert_eq!(fs.read_inode_data(big, 8, boundary).unwrap(), b"boundary");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn thirteen_block_file_reads_back() {
        let (mut fs, path) = mounted("big13");
        fs.login("root", "root").unwrap();
        fs.file_create("/big").unwrap();
        let data: Vec<u8> = (0..13 * BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
        let fd = fs.file_open("/big", 1).unwrap();
        assert_eq!(fs.file_write(fd, &data).unwrap(), data.len());
        fs.file_close(fd).unwrap();
        let big = fs.path_to_inode("/big").unwrap();
        let inode = fs.read_inode(big).unwrap();
        assert_eq!({ inode.size }, 13 * BLOCK_SIZE as u32);
        assert_eq!({ inode.blocks }, 13);
        assert_ne!({ inode.block[DIRECT_BLOCKS_COUNT] }, 0);
        let tail = fs
            .read_inode_data(big, BLOCK_SIZE, (12 * BLOCK_SIZE) as u32)
            .unwrap();
        assert_eq!(tail, data[12 * BLOCK_SIZE..]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn write_past_single_indirect_fails() {
        let (mut fs, path) = mounted("toolarge");
        fs.login("root", "root").unwrap();
        fs.file_create("/f").unwrap();
        let f = fs.path_to_inode("/f").unwrap();
        let limit = ((DIRECT_BLOCKS_COUNT + BLOCK_SIZE / 4) * BLOCK_SIZE) as u32;
        assert!(matches!(
            fs.write_inode_data(f, b"x", limit),
            Err(FsError::FileTooLarge)
        ));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn holes_read_as_zeros() {
        let (mut fs, path) = mounted("holes");
        fs.login("root", "root").unwrap();
        fs.file_create("/sparse").unwrap();
        let sparse = fs.path_to_inode("/sparse").unwrap();
        // Leave block 0 unallocated by writing into block 1 only.
        fs.write_inode_data(sparse, b"tail", BLOCK_SIZE as u32)
            .unwrap();
        assert_eq!(fs.inode_block(sparse, 0).unwrap(), 0);
        let head = fs.read_inode_data(sparse, 16, 0).unwrap();
        assert_eq!(head, vec![0u8; 16]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn truncate_releases_blocks() {
        let (mut fs, path) = mounted("truncate");
        fs.login("root", "root").unwrap();
        fs.file_create("/t").unwrap();
        let t = fs.path_to_inode("/t").unwrap();
        let data = vec![7u8; 3 * BLOCK_SIZE];
        fs.write_inode_data(t, &data, 0).unwrap();
        let free_before = { fs.superblock.free_blocks };
        fs.truncate_inode(t, BLOCK_SIZE as u32).unwrap();
        let inode = fs.read_inode(t).unwrap();
        assert_eq!({ inode.size }, BLOCK_SIZE as u32);
        assert_eq!({ inode.blocks }, 1);
        assert_eq!({ fs.superblock.free_blocks }, free_before + 2);
        // Growing is a no-op.
        fs.truncate_inode(t, 4 * BLOCK_SIZE as u32).unwrap();
        assert_eq!({ fs.read_inode(t).unwrap().size }, BLOCK_SIZE as u32);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn open_file_table_is_bounded() {
        let (mut fs, path) = mounted("fdlimit");
        fs.login("root", "root").unwrap();
        fs.file_create("/f").unwrap();
        let mut fds = Vec::new();
        for _ in 0..MAX_OPEN_FILES {
            fds.push(fs.file_open("/f", 0).unwrap());
        }
        assert!(matches!(
            fs.file_open("/f", 0),
            Err(FsError::TooManyOpenFiles)
        ));
        // Closing one slot frees it for the next open.
        fs.file_close(fds[0]).unwrap();
        fs.file_open("/f", 0).unwrap();
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn descriptor_modes_are_enforced() {
        let (mut fs, path) = mounted("fdmode");
        fs.login("root", "root").unwrap();
        fs.file_create("/f").unwrap();
        let rd = fs.file_open("/f", 0).unwrap();
        assert!(matches!(fs.file_write(rd, b"x"), Err(FsError::AccessDenied)));
        let wr = fs.file_open("/f", 1).unwrap();
        assert!(matches!(fs.file_read(wr, 1), Err(FsError::AccessDenied)));
        assert!(matches!(fs.file_read(999, 1), Err(FsError::BadDescriptor)));
        fs.file_close(rd).unwrap();
        assert!(matches!(fs.file_close(rd), Err(FsError::BadDescriptor)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn chmod_gates_other_users() {
        let (mut fs, path) = mounted("chmod");
        fs.login("root", "root").unwrap();
        fs.mkdir("/a").unwrap();
        fs.chmod("/a", 0o700).unwrap();
        fs.logout().unwrap();
        fs.login("user1", "user1").unwrap();
        assert!(matches!(fs.cd("/a"), Err(FsError::AccessDenied)));
        assert!(matches!(fs.chmod("/a", 0o777), Err(FsError::AccessDenied)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn status_reflects_session() {
        let (mut fs, path) = mounted("status");
        let report = fs.status();
        assert_eq!(report.current_user, "anonymous");
        assert_eq!(report.total_blocks, crate::MAX_BLOCKS as u32);
        fs.login("root", "root").unwrap();
        fs.file_create("/f").unwrap();
        let _fd = fs.file_open("/f", 0).unwrap();
        let report = fs.status();
        assert_eq!(report.current_user, "root");
        assert_eq!(report.open_files, 1);
        let users = fs.list_users().unwrap();
        assert_eq!(users.len(), 3);
        assert!(users.iter().any(|u| u.username == "root" && u.logged_in));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn password_change_applies() {
        let (mut fs, path) = mounted("passwd");
        fs.login("root", "root").unwrap();
        fs.logout().unwrap();
        assert!(matches!(
            fs.change_password("user1", "wrong", "new"),
            Err(FsError::AccessDenied)
        ));
        fs.change_password("user1", "user1", "secret").unwrap();
        assert!(matches!(
            fs.login("user1", "user1"),
            Err(FsError::AccessDenied)
        ));
        fs.login("user1", "secret").unwrap();
        let _ = fs::remove_file(&path);
    }
}
