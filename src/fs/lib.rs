//! User-space implementation of a simplified second extended filesystem.
//!
//! The whole filesystem lives inside a fixed-size image file treated as a
//! virtual block device. [`Ext2Fs`] is the entry point: [`Ext2Fs::format`]
//! builds a fresh image, [`Ext2Fs::mount`] opens one, and the host-interface
//! operations implement the file, directory, user and administration
//! commands on top of it.

pub mod bitmap;
pub mod commands;
pub mod device;
pub mod directory;
pub mod error;
pub mod inode;
pub mod prompt;
pub mod superblock;
pub mod user;
pub mod util;
pub mod volume;

pub use error::{FsError, Result};
pub use volume::Ext2Fs;

/// The size of a block in bytes.
pub const BLOCK_SIZE: usize = 1024;
/// The total number of blocks in an image.
pub const MAX_BLOCKS: usize = 1024;
/// The number of inode slots; slot 0 is never used.
pub const MAX_INODES: usize = 128;
/// The number of records in the user table.
pub const MAX_USERS: usize = 16;
/// The maximum length of a file name.
pub const MAX_FILENAME: usize = 255;
/// The maximum length of a path.
pub const MAX_PATH: usize = 1024;
/// The maximum number of simultaneously open files.
pub const MAX_OPEN_FILES: usize = 16;
/// The inode of the root directory.
pub const ROOT_INODE: u32 = 2;
/// The filesystem's signature.
pub const EXT2_SIGNATURE: u16 = 0xef53;

/// The block holding the block allocation bitmap.
pub const BLOCK_BITMAP_BLOCK: u32 = 1;
/// The block holding the inode allocation bitmap.
pub const INODE_BITMAP_BLOCK: u32 = 2;
/// The first block of the inode table.
pub const INODE_TABLE_BLOCK: u32 = 3;
/// The size of an inode record slot in the inode table.
pub const INODE_SIZE: usize = 128;
/// The number of inode slots per block.
pub const INODES_PER_BLOCK: usize = 4;

/// The first block of the user table, right past the inode table.
pub const USER_TABLE_BLOCK: u32 =
    INODE_TABLE_BLOCK + (MAX_INODES as u32 - 1).div_ceil(INODES_PER_BLOCK as u32);
/// The number of blocks occupied by the user table.
pub const USER_TABLE_BLOCKS: u32 = 4;

/// The highest block id of the metadata region (bitmaps, inode table, user
/// table); all of it is marked used at format time so data allocation can
/// never reach into it.
pub const RESERVED_BLOCKS: u32 = USER_TABLE_BLOCK + USER_TABLE_BLOCKS - 1;
