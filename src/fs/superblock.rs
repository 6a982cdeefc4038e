//! The superblock, stored at block 0 of the image.

use crate::error::{FsError, Result};
use crate::util;
use crate::{EXT2_SIGNATURE, MAX_BLOCKS, MAX_INODES, RESERVED_BLOCKS};
use std::mem;
use uuid::Uuid;

/// Filesystem state: clean.
const FS_STATE_CLEAN: u16 = 1;
/// Error handling action: ignore and continue.
const ERR_ACTION_IGNORE: u16 = 1;
/// The number of mounts allowed before a consistency check is advised.
const MAX_MOUNT_COUNT: u16 = 20;
/// The interval between advised consistency checks, in seconds.
const CHECK_INTERVAL: u32 = 1800;
/// The volume label written at format time.
const VOLUME_LABEL: &str = "EXT2FS";

/// The superblock record.
///
/// Only the signature and the two free counters are actually enforced by
/// the engine; the remaining fields describe the geometry for external
/// tools and are carried verbatim.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Superblock {
    /// Total number of inodes in the filesystem.
    pub total_inodes: u32,
    /// Total number of blocks in the filesystem.
    pub total_blocks: u32,
    /// Number of reserved blocks.
    pub reserved_blocks: u32,
    /// Number of unallocated blocks.
    pub free_blocks: u32,
    /// Number of unallocated inodes.
    pub free_inodes: u32,
    /// The first data block.
    pub first_data_block: u32,
    /// log2(block_size) - 10.
    pub block_size_log: u32,
    /// log2(fragment_size) - 10.
    pub fragment_size_log: u32,
    /// The number of blocks per block group.
    pub blocks_per_group: u32,
    /// The number of fragments per block group.
    pub fragments_per_group: u32,
    /// The number of inodes per block group.
    pub inodes_per_group: u32,
    /// Timestamp of the last mount.
    pub last_mount_time: u32,
    /// Timestamp of the last write.
    pub last_write_time: u32,
    /// Number of mounts since the last consistency check.
    pub mount_count: u16,
    /// Number of mounts allowed before a consistency check.
    pub max_mount_count: u16,
    /// The filesystem signature.
    pub signature: u16,
    /// The filesystem state.
    pub state: u16,
    /// The action to take when an error is detected.
    pub error_action: u16,
    /// The minor version.
    pub minor_version: u16,
    /// Timestamp of the last consistency check.
    pub last_check_time: u32,
    /// Interval between mandatory consistency checks.
    pub check_interval: u32,
    /// The id of the creating operating system.
    pub creator_os: u32,
    /// The major version.
    pub major_version: u32,
    /// UID allowed to use reserved blocks.
    pub reserved_uid: u16,
    /// GID allowed to use reserved blocks.
    pub reserved_gid: u16,
    /// The first non-reserved inode.
    pub first_inode: u32,
    /// The size of an inode record in bytes.
    pub inode_size: u16,
    /// The block group containing this superblock.
    pub superblock_group: u16,
    /// Compatible feature flags.
    pub features_compat: u32,
    /// Incompatible feature flags.
    pub features_incompat: u32,
    /// Read-only compatible feature flags.
    pub features_ro_compat: u32,
    /// The filesystem id.
    pub filesystem_id: [u8; 16],
    /// The volume name.
    pub volume_name: [u8; 16],
    /// The path the filesystem was last mounted to.
    pub last_mount_path: [u8; 64],
    /// The journal id.
    pub journal_id: [u8; 16],
}

/// Copies `s` into a zero-padded fixed-size buffer.
fn fixed_str<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let len = s.len().min(N);
    buf[..len].copy_from_slice(&s.as_bytes()[..len]);
    buf
}

impl Superblock {
    /// Returns an all-zero record, as held before a mount.
    pub fn zeroed() -> Self {
        unsafe { mem::zeroed() }
    }

    /// Builds the superblock of a freshly formatted image.
    ///
    /// The free counters are left at zero; the volume manager fills them in
    /// from the bitmaps once the root directory exists.
    pub fn new_formatted() -> Self {
        let now = util::timestamp();
        let mut superblock = Self::zeroed();
        superblock.total_inodes = MAX_INODES as u32;
        superblock.total_blocks = MAX_BLOCKS as u32;
        superblock.reserved_blocks = RESERVED_BLOCKS;
        superblock.first_data_block = 1;
        superblock.blocks_per_group = MAX_BLOCKS as u32;
        superblock.fragments_per_group = MAX_BLOCKS as u32;
        superblock.inodes_per_group = MAX_INODES as u32;
        superblock.last_mount_time = now;
        superblock.last_write_time = now;
        superblock.max_mount_count = MAX_MOUNT_COUNT;
        superblock.signature = EXT2_SIGNATURE;
        superblock.state = FS_STATE_CLEAN;
        superblock.error_action = ERR_ACTION_IGNORE;
        superblock.last_check_time = now;
        superblock.check_interval = CHECK_INTERVAL;
        superblock.first_inode = 11;
        superblock.inode_size = crate::INODE_SIZE as u16;
        superblock.filesystem_id = Uuid::new_v4().into_bytes();
        superblock.volume_name = fixed_str(VOLUME_LABEL);
        superblock.last_mount_path = fixed_str("/");
        superblock
    }

    /// Verifies the filesystem signature.
    pub fn check_signature(&self) -> Result<()> {
        if self.signature == EXT2_SIGNATURE {
            Ok(())
        } else {
            Err(FsError::Corrupt)
        }
    }
}
