//! The inode subsystem: the on-disk inode record, the inode table store,
//! block mapping with single indirection, file content I/O, permissions,
//! timestamps and link counts.

use crate::error::{FsError, Result};
use crate::util;
use crate::volume::Ext2Fs;
use crate::{BLOCK_SIZE, INODES_PER_BLOCK, INODE_SIZE, INODE_TABLE_BLOCK, MAX_INODES};
use std::mem;

/// The number of direct block pointers in an inode.
pub const DIRECT_BLOCKS_COUNT: usize = 12;
/// The number of block pointers held by the single indirect block.
pub const INDIRECT_ENTRIES: usize = BLOCK_SIZE / 4;

/// INode type: directory.
pub const INODE_TYPE_DIRECTORY: u16 = 0x4000;
/// INode type: regular file.
pub const INODE_TYPE_REGULAR: u16 = 0x8000;

/// Owner: read.
pub const INODE_PERMISSION_IRUSR: u16 = 0o0400;
/// Owner: write.
pub const INODE_PERMISSION_IWUSR: u16 = 0o0200;
/// Owner: execute.
pub const INODE_PERMISSION_IXUSR: u16 = 0o0100;
/// Group: read.
pub const INODE_PERMISSION_IRGRP: u16 = 0o0040;
/// Group: write.
pub const INODE_PERMISSION_IWGRP: u16 = 0o0020;
/// Group: execute.
pub const INODE_PERMISSION_IXGRP: u16 = 0o0010;
/// Other: read.
pub const INODE_PERMISSION_IROTH: u16 = 0o0004;
/// Other: write.
pub const INODE_PERMISSION_IWOTH: u16 = 0o0002;
/// Other: execute.
pub const INODE_PERMISSION_IXOTH: u16 = 0o0001;

/// The type of a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    /// A regular file.
    Regular,
    /// A directory.
    Directory,
}

/// An on-disk inode record.
///
/// The name of a file is not stored in the inode but in the directory
/// entries referencing it.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Inode {
    /// Type and permissions: high nibble is the file type, low 12 bits are
    /// the permission bits.
    pub mode: u16,
    /// User ID.
    pub uid: u16,
    /// Size in bytes.
    pub size: u32,
    /// Timestamp of the last access.
    pub atime: u32,
    /// Timestamp of the last metadata change.
    pub ctime: u32,
    /// Timestamp of the last content change.
    pub mtime: u32,
    /// Timestamp of the deletion.
    pub dtime: u32,
    /// Group ID.
    pub gid: u16,
    /// Number of directory entries referencing this inode.
    pub links_count: u16,
    /// Number of content blocks, rounded up.
    pub blocks: u32,
    /// File flags.
    pub flags: u32,
    /// Block pointers: 12 direct, then single, double and triple indirect.
    /// This engine uses only the direct and single-indirect slots.
    pub block: [u32; 15],
    /// File version.
    pub generation: u32,
    /// File ACL block.
    pub file_acl: u32,
    /// Directory ACL block.
    pub dir_acl: u32,
    /// Fragment address.
    pub fragment_addr: u32,
    /// Fragment number.
    pub fragment_num: u8,
    /// Fragment size.
    pub fragment_size: u8,
    /// Padding.
    pub pad: u16,
    /// Reserved.
    pub reserved: [u32; 2],
}

impl Inode {
    /// Returns an all-zero record.
    pub fn zeroed() -> Self {
        unsafe { mem::zeroed() }
    }

    /// Returns the file type encoded in the mode, if known.
    pub fn file_type(&self) -> Option<FileType> {
        match self.mode & 0xf000 {
            INODE_TYPE_REGULAR => Some(FileType::Regular),
            INODE_TYPE_DIRECTORY => Some(FileType::Directory),
            _ => None,
        }
    }
}

/// Tells whether `access` (owner-slot permission bits) is granted on an
/// inode with the given mode and ownership, for a caller identified by
/// `uid`/`gid`.
///
/// The root user is always granted. The triplet is selected by owner, then
/// group, then other; the request is shifted down to a 3-bit rwx value
/// before masking against the selected triplet.
pub fn permission_granted(
    mode: u16,
    owner_uid: u16,
    owner_gid: u16,
    uid: u16,
    gid: u16,
    access: u16,
) -> bool {
    if uid == 0 {
        return true;
    }
    let want = (access >> 6) & 0x7;
    let triplet = if uid == owner_uid {
        (mode >> 6) & 0x7
    } else if gid == owner_gid {
        (mode >> 3) & 0x7
    } else {
        mode & 0x7
    };
    triplet & want == want
}

/// Returns the inode table block and slot holding inode `inode_no`.
fn inode_slot(inode_no: u32) -> Result<(u32, usize)> {
    if inode_no == 0 || inode_no as usize >= MAX_INODES {
        return Err(FsError::BadArgument);
    }
    let block_no = INODE_TABLE_BLOCK + (inode_no - 1) / INODES_PER_BLOCK as u32;
    let slot = (inode_no as usize - 1) % INODES_PER_BLOCK;
    Ok((block_no, slot))
}

impl Ext2Fs {
    /// Reads inode record `inode_no` from the inode table.
    pub fn read_inode(&mut self, inode_no: u32) -> Result<Inode> {
        let (block_no, slot) = inode_slot(inode_no)?;
        let mut buf = [0u8; BLOCK_SIZE];
        self.device.read_block(block_no, &mut buf)?;
        Ok(unsafe { util::read_struct(&buf[slot * INODE_SIZE..]) })
    }

    /// Writes inode record `inode_no`, read-modify-writing its table block.
    pub fn write_inode(&mut self, inode_no: u32, inode: &Inode) -> Result<()> {
        let (block_no, slot) = inode_slot(inode_no)?;
        let mut buf = [0u8; BLOCK_SIZE];
        self.device.read_block(block_no, &mut buf)?;
        util::write_struct(&mut buf[slot * INODE_SIZE..], inode);
        self.device.write_block(block_no, &buf)
    }

    /// Allocates and initializes a fresh inode, returning its number.
    pub fn create_inode(&mut self, mode: u16, uid: u16, gid: u16) -> Result<u32> {
        let inode_no = self.allocate_inode()?;
        let now = util::timestamp();
        let mut inode = Inode::zeroed();
        inode.mode = mode;
        inode.uid = uid;
        inode.gid = gid;
        inode.links_count = 1;
        inode.atime = now;
        inode.ctime = now;
        inode.mtime = now;
        if let Err(e) = self.write_inode(inode_no, &inode) {
            let _ = self.free_inode(inode_no);
            return Err(e);
        }
        Ok(inode_no)
    }

    /// Deletes an inode: frees every data block it references (directly or
    /// through the indirect block), zeroes its record and releases its
    /// bitmap bit.
    pub fn delete_inode(&mut self, inode_no: u32) -> Result<()> {
        let inode = self.read_inode(inode_no)?;
        let blocks = inode.block;
        for &block_no in blocks.iter().take(DIRECT_BLOCKS_COUNT) {
            if block_no != 0 {
                self.free_block(block_no)?;
            }
        }
        let indirect = blocks[DIRECT_BLOCKS_COUNT];
        if indirect != 0 {
            let mut buf = [0u8; BLOCK_SIZE];
            if self.device.read_block(indirect, &mut buf).is_ok() {
                let table: [u32; INDIRECT_ENTRIES] = unsafe { util::read_struct(&buf) };
                for block_no in table {
                    if block_no != 0 {
                        self.free_block(block_no)?;
                    }
                }
            }
            self.free_block(indirect)?;
        }
        self.write_inode(inode_no, &Inode::zeroed())?;
        self.free_inode(inode_no)
    }

    /// Maps logical block `index` of the file to its physical block id.
    ///
    /// Returns 0 when the logical block is a hole.
    pub fn inode_block(&mut self, inode_no: u32, index: u32) -> Result<u32> {
        let inode = self.read_inode(inode_no)?;
        let blocks = inode.block;
        if (index as usize) < DIRECT_BLOCKS_COUNT {
            Ok(blocks[index as usize])
        } else if (index as usize) < DIRECT_BLOCKS_COUNT + INDIRECT_ENTRIES {
            let indirect = blocks[DIRECT_BLOCKS_COUNT];
            if indirect == 0 {
                return Ok(0);
            }
            let mut buf = [0u8; BLOCK_SIZE];
            self.device.read_block(indirect, &mut buf)?;
            let table: [u32; INDIRECT_ENTRIES] = unsafe { util::read_struct(&buf) };
            Ok(table[index as usize - DIRECT_BLOCKS_COUNT])
        } else {
            Err(FsError::FileTooLarge)
        }
    }

    /// Binds physical block `block_no` as logical block `index` of the
    /// file, allocating the indirect block lazily.
    ///
    /// This performs its own read-modify-write of the inode record; callers
    /// holding a copy of the inode must re-read it afterwards.
    pub fn set_inode_block(&mut self, inode_no: u32, index: u32, block_no: u32) -> Result<()> {
        let mut inode = self.read_inode(inode_no)?;
        let mut blocks = inode.block;
        if (index as usize) < DIRECT_BLOCKS_COUNT {
            blocks[index as usize] = block_no;
            inode.block = blocks;
        } else if (index as usize) < DIRECT_BLOCKS_COUNT + INDIRECT_ENTRIES {
            let mut buf = [0u8; BLOCK_SIZE];
            let indirect = if blocks[DIRECT_BLOCKS_COUNT] == 0 {
                let fresh = self.allocate_block()?;
                blocks[DIRECT_BLOCKS_COUNT] = fresh;
                inode.block = blocks;
                fresh
            } else {
                let indirect = blocks[DIRECT_BLOCKS_COUNT];
                self.device.read_block(indirect, &mut buf)?;
                indirect
            };
            let mut table: [u32; INDIRECT_ENTRIES] = unsafe { util::read_struct(&buf) };
            table[index as usize - DIRECT_BLOCKS_COUNT] = block_no;
            util::write_struct(&mut buf, &table);
            self.device.write_block(indirect, &buf)?;
        } else {
            return Err(FsError::FileTooLarge);
        }
        self.write_inode(inode_no, &inode)
    }

    /// Reads up to `size` bytes of file content starting at byte `offset`.
    ///
    /// Returns an empty buffer when `offset` is at or past the end. Holes
    /// read as zeros; the walk stops early on any device or mapping error
    /// and returns the bytes gathered so far. Updates the access time.
    pub fn read_inode_data(&mut self, inode_no: u32, size: usize, offset: u32) -> Result<Vec<u8>> {
        let inode = self.read_inode(inode_no)?;
        let file_size = inode.size;
        if offset >= file_size {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(size.min((file_size - offset) as usize));
        let mut pos = offset;
        while out.len() < size && pos < file_size {
            let block_index = pos / BLOCK_SIZE as u32;
            let block_off = (pos % BLOCK_SIZE as u32) as usize;
            let chunk = (BLOCK_SIZE - block_off)
                .min(size - out.len())
                .min((file_size - pos) as usize);
            let Ok(block_no) = self.inode_block(inode_no, block_index) else {
                break;
            };
            if block_no == 0 {
                out.resize(out.len() + chunk, 0);
            } else {
                let mut buf = [0u8; BLOCK_SIZE];
                if self.device.read_block(block_no, &mut buf).is_err() {
                    break;
                }
                out.extend_from_slice(&buf[block_off..block_off + chunk]);
            }
            pos += chunk as u32;
        }
        self.update_atime(inode_no)?;
        Ok(out)
    }

    /// Writes `data` at byte `offset`, allocating blocks on demand and
    /// growing the file when writing past the end.
    ///
    /// Returns the number of bytes written, which is short when the
    /// allocator or the device fails mid-write; the size is extended to
    /// cover exactly the bytes that made it to disk.
    pub fn write_inode_data(&mut self, inode_no: u32, data: &[u8], offset: u32) -> Result<usize> {
        let mut inode = self.read_inode(inode_no)?;
        let mut written = 0usize;
        let mut pos = offset;
        while written < data.len() {
            let block_index = pos / BLOCK_SIZE as u32;
            let block_off = (pos % BLOCK_SIZE as u32) as usize;
            let block_no = match self.inode_block(inode_no, block_index) {
                Ok(block_no) => block_no,
                Err(e) if written == 0 => return Err(e),
                Err(_) => break,
            };
            let block_no = if block_no == 0 {
                let fresh = match self.allocate_block() {
                    Ok(block_no) => block_no,
                    Err(e) if written == 0 => return Err(e),
                    Err(_) => break,
                };
                if let Err(e) = self.set_inode_block(inode_no, block_index, fresh) {
                    let _ = self.free_block(fresh);
                    if written == 0 {
                        return Err(e);
                    }
                    break;
                }
                // `set_inode_block` re-saved the record; refresh the copy.
                match self.read_inode(inode_no) {
                    Ok(fresh_inode) => inode = fresh_inode,
                    Err(_) => break,
                }
                fresh
            } else {
                block_no
            };
            let mut buf = [0u8; BLOCK_SIZE];
            if self.device.read_block(block_no, &mut buf).is_err() {
                break;
            }
            let chunk = (BLOCK_SIZE - block_off).min(data.len() - written);
            buf[block_off..block_off + chunk].copy_from_slice(&data[written..written + chunk]);
            if self.device.write_block(block_no, &buf).is_err() {
                break;
            }
            written += chunk;
            pos += chunk as u32;
        }
        if written > 0 && pos > inode.size {
            inode.size = pos;
            inode.blocks = util::ceil_division(pos, BLOCK_SIZE as u32);
            self.write_inode(inode_no, &inode)?;
        }
        self.update_mtime(inode_no)?;
        self.update_ctime(inode_no)?;
        Ok(written)
    }

    /// Truncates the file to `length` bytes, freeing the blocks past the
    /// new end. Growing is a no-op.
    pub fn truncate_inode(&mut self, inode_no: u32, length: u32) -> Result<()> {
        let inode = self.read_inode(inode_no)?;
        if length >= inode.size {
            return Ok(());
        }
        let new_blocks = util::ceil_division(length, BLOCK_SIZE as u32);
        let old_blocks = util::ceil_division(inode.size, BLOCK_SIZE as u32);
        for index in new_blocks..old_blocks {
            let block_no = self.inode_block(inode_no, index)?;
            if block_no != 0 {
                self.free_block(block_no)?;
                self.set_inode_block(inode_no, index, 0)?;
            }
        }
        let mut inode = self.read_inode(inode_no)?;
        inode.size = length;
        inode.blocks = new_blocks;
        self.write_inode(inode_no, &inode)?;
        self.update_mtime(inode_no)?;
        self.update_ctime(inode_no)
    }

    /// Tells whether the current session may access `inode_no` with the
    /// requested owner-slot permission bits. An unreadable inode denies.
    pub fn check_permission(&mut self, inode_no: u32, access: u16) -> bool {
        let Ok(inode) = self.read_inode(inode_no) else {
            return false;
        };
        permission_granted(
            inode.mode,
            inode.uid,
            inode.gid,
            self.current_uid(),
            self.current_gid(),
            access,
        )
    }

    /// Installs new permission bits, preserving the file-type nibble.
    pub fn change_permission(&mut self, inode_no: u32, mode: u16) -> Result<()> {
        let mut inode = self.read_inode(inode_no)?;
        inode.mode = (inode.mode & 0xf000) | (mode & 0x0fff);
        inode.ctime = util::timestamp();
        self.write_inode(inode_no, &inode)
    }

    /// Changes the owner and group of the inode.
    pub fn change_owner(&mut self, inode_no: u32, uid: u16, gid: u16) -> Result<()> {
        let mut inode = self.read_inode(inode_no)?;
        inode.uid = uid;
        inode.gid = gid;
        inode.ctime = util::timestamp();
        self.write_inode(inode_no, &inode)
    }

    /// Sets the access time to the current second.
    pub fn update_atime(&mut self, inode_no: u32) -> Result<()> {
        let mut inode = self.read_inode(inode_no)?;
        inode.atime = util::timestamp();
        self.write_inode(inode_no, &inode)
    }

    /// Sets the content modification time to the current second.
    pub fn update_mtime(&mut self, inode_no: u32) -> Result<()> {
        let mut inode = self.read_inode(inode_no)?;
        inode.mtime = util::timestamp();
        self.write_inode(inode_no, &inode)
    }

    /// Sets the metadata change time to the current second.
    pub fn update_ctime(&mut self, inode_no: u32) -> Result<()> {
        let mut inode = self.read_inode(inode_no)?;
        inode.ctime = util::timestamp();
        self.write_inode(inode_no, &inode)
    }

    /// Increments the link count; called whenever a new directory entry
    /// starts referencing the inode.
    pub fn increment_link(&mut self, inode_no: u32) -> Result<()> {
        let mut inode = self.read_inode(inode_no)?;
        inode.links_count = inode.links_count + 1;
        inode.ctime = util::timestamp();
        self.write_inode(inode_no, &inode)
    }

    /// Decrements the link count. Reaching zero does not delete the inode:
    /// link counts are informational in this engine.
    pub fn decrement_link(&mut self, inode_no: u32) -> Result<()> {
        let mut inode = self.read_inode(inode_no)?;
        if inode.links_count > 0 {
            inode.links_count = inode.links_count - 1;
        }
        inode.ctime = util::timestamp();
        self.write_inode(inode_no, &inode)
    }

    /// Tells whether `inode_no` is a directory.
    pub fn is_directory(&mut self, inode_no: u32) -> bool {
        self.read_inode(inode_no)
            .map(|inode| inode.file_type() == Some(FileType::Directory))
            .unwrap_or(false)
    }

    /// Tells whether `inode_no` is a regular file.
    pub fn is_regular_file(&mut self, inode_no: u32) -> bool {
        self.read_inode(inode_no)
            .map(|inode| inode.file_type() == Some(FileType::Regular))
            .unwrap_or(false)
    }
}
