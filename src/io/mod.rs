use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::consts::BlockPointer;
use crate::driver::DeviceDriver;
use crate::util::error::{FsError, Result};
use raw::{raw_read_block, raw_write_block};

mod raw;

/// Block-level access over a sector device, with a write-back cache.
/// A written block only reaches the device on `flush`; callers mark
/// metadata blocks dirty and the session flushes at sync/unmount.
pub struct BlockIo<D: DeviceDriver> {
    device: D,
    pub block_size: usize,
    pub block_count: u64,
    cache: HashMap<BlockPointer, Vec<u8>>,
    dirty: BTreeSet<BlockPointer>,
}

impl<D: DeviceDriver> BlockIo<D> {
    pub fn new(device: D, block_size: usize) -> BlockIo<D> {
        let block_count = device.get_size() / block_size as u64;
        BlockIo {
            device,
            block_size,
            block_count,
            cache: HashMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn read_block(&mut self, index: BlockPointer) -> Result<Vec<u8>> {
        self.check_range(index)?;
        if let Some(block) = self.cache.get(&index) {
            return Ok(block.clone());
        }
        let block = raw_read_block(&self.device, self.block_size, index)?;
        self.cache.insert(index, block.clone());
        Ok(block)
    }

    /// Replaces the cached block and schedules it for write-back.
    pub fn write_block(&mut self, index: BlockPointer, block: Vec<u8>) -> Result<()> {
        self.check_range(index)?;
        if block.len() != self.block_size {
            return Err(FsError::InvalidArgument("block size mismatch"));
        }
        self.cache.insert(index, block);
        self.dirty.insert(index);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        let pending: Vec<BlockPointer> = self.dirty.iter().copied().collect();
        for index in pending {
            if let Some(block) = self.cache.get(&index) {
                raw_write_block(&mut self.device, self.block_size, block, index)?;
            }
            self.dirty.remove(&index);
        }
        debug!("flushed dirty blocks, cache holds {}", self.cache.len());
        Ok(())
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    fn check_range(&self, index: BlockPointer) -> Result<()> {
        if index as u64 >= self.block_count {
            return Err(FsError::InvalidArgument("block index out of range"));
        }
        Ok(())
    }
}
