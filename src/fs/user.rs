//! The user and session subsystem: the on-disk user table, login/logout,
//! the session's identity accessors and the path-scope access policy.

use crate::error::{FsError, Result};
use crate::inode::{INODE_PERMISSION_IRUSR, INODE_PERMISSION_IWUSR, INODE_PERMISSION_IXUSR};
use crate::util;
use crate::volume::Ext2Fs;
use crate::{BLOCK_SIZE, MAX_USERS, ROOT_INODE, USER_TABLE_BLOCK, USER_TABLE_BLOCKS};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand_core::OsRng;
use std::mem;

/// The stride of an on-disk user record.
pub const USER_RECORD_SIZE: usize = 256;
/// The number of user records per table block.
const USERS_PER_BLOCK: usize = BLOCK_SIZE / USER_RECORD_SIZE;
/// The size of the username field, terminating NUL included.
const USERNAME_SIZE: usize = 32;
/// The size of the password hash field, terminating NUL included.
const PASS_HASH_SIZE: usize = 212;

/// The uid/gid reported for an anonymous session.
const ANONYMOUS_ID: u16 = 0xffff;

/// Hashes the given clear password with a generated salt, producing the
/// PHC string stored in the user table.
pub fn hash_password(pass: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pass.as_bytes(), &salt)
        .map_err(|_| FsError::BadArgument)?;
    Ok(hash.to_string())
}

/// Tells whether the clear password `pass` matches the stored hash.
pub fn check_password(hash: &str, pass: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(pass.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Copies `s` into a zero-padded fixed-size buffer.
fn fixed_bytes<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let len = s.len().min(N - 1);
    buf[..len].copy_from_slice(&s.as_bytes()[..len]);
    buf
}

/// Reads a NUL-terminated string out of a fixed-size buffer.
fn fixed_to_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// A record of the on-disk user table.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct UserRecord {
    /// Login name, NUL-terminated.
    pub username: [u8; USERNAME_SIZE],
    /// Argon2 PHC string of the password, NUL-terminated.
    pub pass_hash: [u8; PASS_HASH_SIZE],
    /// User id.
    pub uid: u16,
    /// Group id.
    pub gid: u16,
    /// Non-zero when the record is in use.
    pub active: u32,
    /// Padding to the record stride.
    pub pad: [u8; 4],
}

impl UserRecord {
    /// Returns an all-zero (inactive) record.
    pub fn zeroed() -> Self {
        unsafe { mem::zeroed() }
    }

    /// Builds an active record with an already-hashed password.
    pub fn new(username: &str, pass_hash: &str, uid: u16, gid: u16) -> Self {
        let mut record = Self::zeroed();
        record.username = fixed_bytes(username);
        record.pass_hash = fixed_bytes(pass_hash);
        record.uid = uid;
        record.gid = gid;
        record.active = 1;
        record
    }

    /// Returns the login name.
    pub fn username(&self) -> String {
        let name = self.username;
        fixed_to_string(&name)
    }

    /// Returns the stored password hash.
    pub fn pass_hash(&self) -> String {
        let hash = self.pass_hash;
        fixed_to_string(&hash)
    }
}

impl Ext2Fs {
    /// Loads the user table from its reserved blocks, seeding the default
    /// accounts when no active root record is present.
    pub(crate) fn init_users(&mut self) -> Result<()> {
        self.load_users()?;
        let has_root = self
            .users
            .iter()
            .any(|u| u.active != 0 && u.username() == "root");
        if !has_root {
            self.users = [UserRecord::zeroed(); MAX_USERS];
            self.add_user("root", "root", 0, 0)?;
            self.add_user("user1", "user1", 1, 1)?;
            self.add_user("user2", "user2", 2, 2)?;
        }
        Ok(())
    }

    /// Reads the user table from disk.
    pub(crate) fn load_users(&mut self) -> Result<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        for block in 0..USER_TABLE_BLOCKS {
            self.device.read_block(USER_TABLE_BLOCK + block, &mut buf)?;
            for slot in 0..USERS_PER_BLOCK {
                let index = block as usize * USERS_PER_BLOCK + slot;
                self.users[index] = unsafe { util::read_struct(&buf[slot * USER_RECORD_SIZE..]) };
            }
        }
        Ok(())
    }

    /// Mirrors the in-memory user table to its reserved blocks.
    pub(crate) fn save_users(&mut self) -> Result<()> {
        for block in 0..USER_TABLE_BLOCKS {
            let mut buf = [0u8; BLOCK_SIZE];
            for slot in 0..USERS_PER_BLOCK {
                let index = block as usize * USERS_PER_BLOCK + slot;
                util::write_struct(&mut buf[slot * USER_RECORD_SIZE..], &self.users[index]);
            }
            self.device.write_block(USER_TABLE_BLOCK + block, &buf)?;
        }
        Ok(())
    }

    /// Returns the table index of the active user named `username`.
    pub fn find_user(&self, username: &str) -> Option<usize> {
        self.users
            .iter()
            .position(|u| u.active != 0 && u.username() == username)
    }

    /// Adds a user record and flushes the table.
    ///
    /// Fails with [`FsError::AlreadyExists`] when the username, uid or gid
    /// collides with an active record, and with [`FsError::NoSpace`] when
    /// the table is full.
    pub fn add_user(&mut self, username: &str, password: &str, uid: u16, gid: u16) -> Result<()> {
        if username.is_empty() || username.len() >= USERNAME_SIZE {
            return Err(FsError::BadArgument);
        }
        let conflict = self
            .users
            .iter()
            .any(|u| u.active != 0 && (u.username() == username || u.uid == uid || u.gid == gid));
        if conflict {
            return Err(FsError::AlreadyExists);
        }
        let slot = self
            .users
            .iter()
            .position(|u| u.active == 0)
            .ok_or(FsError::NoSpace)?;
        let hash = hash_password(password)?;
        if hash.len() >= PASS_HASH_SIZE {
            return Err(FsError::BadArgument);
        }
        self.users[slot] = UserRecord::new(username, &hash, uid, gid);
        self.save_users()
    }

    /// Removes the user named `username`, zeroing its record.
    pub fn remove_user(&mut self, username: &str) -> Result<()> {
        let slot = self.find_user(username).ok_or(FsError::NotFound)?;
        self.users[slot] = UserRecord::zeroed();
        self.save_users()
    }

    /// Changes a user's password after verifying the old one.
    pub fn change_password(&mut self, username: &str, old: &str, new: &str) -> Result<()> {
        let slot = self.find_user(username).ok_or(FsError::NotFound)?;
        if !check_password(&self.users[slot].pass_hash(), old) {
            return Err(FsError::AccessDenied);
        }
        let hash = hash_password(new)?;
        if hash.len() >= PASS_HASH_SIZE {
            return Err(FsError::BadArgument);
        }
        self.users[slot].pass_hash = fixed_bytes(&hash);
        self.save_users()
    }

    /// Authenticates `username` and opens a session.
    ///
    /// On success the user's home directory is provisioned when missing
    /// (`/root` for the root user, `/home/<name>` otherwise) and becomes
    /// the working directory; when provisioning fails the session starts
    /// at the root directory instead.
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let slot = self.find_user(username).ok_or(FsError::NotFound)?;
        if !check_password(&self.users[slot].pass_hash(), password) {
            return Err(FsError::AccessDenied);
        }
        self.session.current_user = Some(slot);
        let home = self.provision_home(slot);
        self.session.cwd_inode = home.unwrap_or(ROOT_INODE);
        Ok(())
    }

    /// Ensures the home directory of the user at `slot` exists and returns
    /// its inode.
    ///
    /// Creation runs with the session temporarily elevated to the root
    /// user, then the fresh directory is handed over to its owner.
    fn provision_home(&mut self, slot: usize) -> Option<u32> {
        let username = self.users[slot].username();
        let (uid, gid) = (self.users[slot].uid, self.users[slot].gid);
        let home = if uid == 0 {
            "/root".to_string()
        } else {
            format!("/home/{username}")
        };
        if let Ok(inode_no) = self.path_to_inode(&home) {
            return Some(inode_no);
        }
        let saved = self.session.current_user;
        self.session.current_user = self.find_user("root");
        let created = self
            .create_directory(&home, 0o755)
            .and_then(|_| self.path_to_inode(&home))
            .and_then(|inode_no| {
                self.change_owner(inode_no, uid, gid)?;
                Ok(inode_no)
            });
        self.session.current_user = saved;
        created.ok()
    }

    /// Closes the session and flushes the user table.
    pub fn logout(&mut self) -> Result<()> {
        self.session.current_user = None;
        if self.device.is_open() {
            self.save_users()?;
        }
        Ok(())
    }

    /// Tells whether a user is logged in.
    pub fn is_logged_in(&self) -> bool {
        self.session.current_user.is_some()
    }

    /// Returns the uid of the session user, or 0xffff when anonymous.
    pub fn current_uid(&self) -> u16 {
        self.session
            .current_user
            .map(|i| self.users[i].uid)
            .unwrap_or(ANONYMOUS_ID)
    }

    /// Returns the gid of the session user, or 0xffff when anonymous.
    pub fn current_gid(&self) -> u16 {
        self.session
            .current_user
            .map(|i| self.users[i].gid)
            .unwrap_or(ANONYMOUS_ID)
    }

    /// Returns the session user's name, or `anonymous`.
    pub fn current_username(&self) -> String {
        self.session
            .current_user
            .map(|i| self.users[i].username())
            .unwrap_or_else(|| "anonymous".to_string())
    }

    /// The path-scope policy, layered above the inode permission bits and
    /// consulted first by every host-interface operation.
    ///
    /// Non-root users may read most of the tree but may only write below
    /// their own home; every case not explicitly allowed denies.
    pub fn check_user_path_access(&mut self, path: &str, access: u16) -> bool {
        if self.current_uid() == 0 {
            return true;
        }
        let Some(slot) = self.session.current_user else {
            return false;
        };
        let username = self.users[slot].username();
        let wants_write = access & INODE_PERMISSION_IWUSR != 0;
        let wants_exec = access & INODE_PERMISSION_IXUSR != 0;
        if path == ".." {
            return self.check_user_path_access("/home", access);
        }
        if !path.starts_with('/') {
            if !path.contains('/') {
                // Plain names are judged against the working directory.
                let want = if wants_write {
                    INODE_PERMISSION_IWUSR
                } else {
                    INODE_PERMISSION_IRUSR
                };
                let cwd = self.session.cwd_inode;
                return self.check_permission(cwd, want);
            }
            // Re-anchor below the working directory and retry.
            let cwd_path = self.cwd_path();
            let joined = if cwd_path == "/" {
                format!("/{path}")
            } else {
                format!("{cwd_path}/{path}")
            };
            return self.check_user_path_access(&joined, access);
        }
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        match components.as_slice() {
            // The root and its plain children: read-only territory.
            [] => !wants_write,
            ["home"] => !wants_write,
            ["root"] => !wants_write && !wants_exec,
            ["home", user, ..] if *user == username => true,
            ["home", ..] => !wants_write,
            [_] => !wants_write,
            _ => false,
        }
    }
}
