//! The virtual block device: a plain image file accessed one full block at
//! a time, write-through, without any caching.

use crate::error::{FsError, Result};
use crate::{BLOCK_SIZE, MAX_BLOCKS};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::fs;
use std::path::Path;

/// A block-granular view of an image file.
#[derive(Default)]
pub struct BlockDevice {
    /// The opened image, `None` while unmounted.
    file: Option<fs::File>,
}

impl BlockDevice {
    /// Opens the image at `path` for reading and writing.
    pub fn open(&mut self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|_| FsError::NotMounted)?;
        self.file = Some(file);
        Ok(())
    }

    /// Creates or truncates the image at `path`, zero-fills all of its
    /// blocks and leaves it open.
    pub fn create(&mut self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let zero = [0u8; BLOCK_SIZE];
        for _ in 0..MAX_BLOCKS {
            file.write_all(&zero)?;
        }
        file.seek(SeekFrom::Start(0))?;
        self.file = Some(file);
        Ok(())
    }

    /// Releases the image handle. Idempotent.
    pub fn close(&mut self) {
        self.file = None;
    }

    /// Tells whether an image is currently open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn file_mut(&mut self) -> Result<&mut fs::File> {
        self.file.as_mut().ok_or(FsError::NotMounted)
    }

    /// Reads block `block_no` into `buf`; a short read is an error.
    pub fn read_block(&mut self, block_no: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(block_no as u64 * BLOCK_SIZE as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf` to block `block_no`; a short write is an error.
    pub fn write_block(&mut self, block_no: u32, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(block_no as u64 * BLOCK_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }
}
