//! Block-device collaborator interface.
//!
//! The cache core only ever moves whole blocks between a slot payload and
//! stable storage, so the interface is two directed transfers plus a
//! flush. Transfers are synchronous and may block the calling thread; the
//! cache guarantees it never holds a shard or pool lock across one.

use crate::{BlockKey, BlockSize, CacheError, DeviceId, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Synchronous whole-block I/O.
///
/// `buf` length must equal the device block size in both directions;
/// implementations reject mismatches rather than truncate.
pub trait BlockDevice: Send + Sync {
    /// Read the block at `key` into `buf`.
    fn read_block(&self, key: BlockKey, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` to the block at `key`.
    fn write_block(&self, key: BlockKey, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// File-backed block device using `pread`/`pwrite` style positional I/O.
///
/// Uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position. One instance serves exactly one
/// [`DeviceId`]; requests for any other device are rejected.
#[derive(Debug, Clone)]
pub struct FileBlockDevice {
    file: Arc<File>,
    device: DeviceId,
    block_size: BlockSize,
    block_count: u64,
    writable: bool,
}

impl FileBlockDevice {
    /// Open an image file, falling back to read-only if the file is not
    /// writable. The image length must be block-aligned.
    pub fn open(path: impl AsRef<Path>, device: DeviceId, block_size: BlockSize) -> Result<Self> {
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path.as_ref())
                    .map(|file| (file, false))
            })?;
        let len = file.metadata()?.len();
        let block_size_u64 = u64::from(block_size.get());
        let remainder = len % block_size_u64;
        if remainder != 0 {
            return Err(CacheError::Geometry(format!(
                "image length is not block-aligned: len_bytes={len} block_size={} remainder={remainder}",
                block_size.get()
            )));
        }
        Ok(Self {
            file: Arc::new(file),
            device,
            block_size,
            block_count: len / block_size_u64,
            writable,
        })
    }

    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.device
    }

    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    #[must_use]
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Validate a transfer request and compute its byte offset.
    fn offset_of(&self, key: BlockKey, buf_len: usize) -> Result<u64> {
        if key.device != self.device {
            return Err(CacheError::DeviceMismatch {
                want: self.device.0,
                got: key.device.0,
            });
        }
        if buf_len != self.block_size.as_usize() {
            return Err(CacheError::SizeMismatch {
                got: buf_len,
                expected: self.block_size.as_usize(),
            });
        }
        if key.block.0 >= self.block_count {
            return Err(CacheError::OutOfRange {
                block: key.block.0,
                count: self.block_count,
            });
        }
        self.block_size
            .block_to_byte(key.block)
            .ok_or_else(|| CacheError::Geometry("block offset overflows u64".to_owned()))
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&self, key: BlockKey, buf: &mut [u8]) -> Result<()> {
        let offset = self.offset_of(key, buf.len())?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_block(&self, key: BlockKey, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(CacheError::ReadOnly);
        }
        let offset = self.offset_of(key, buf.len())?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
