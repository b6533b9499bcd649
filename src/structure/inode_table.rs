use crate::consts::{BlockPointer, InodePointer, INODE_TABLE_NUM, MAX_INODE_COUNT};
use crate::driver::DeviceDriver;
use crate::io::BlockIo;
use crate::structure::read_u32;
use crate::util::error::Result;

/// Indirection table mapping inode number -> block holding that inode's
/// record. One block of u32 entries; entry 0 means unmapped.
pub struct InodeTable {
    entries: Vec<BlockPointer>,
}

impl InodeTable {
    pub fn new() -> InodeTable {
        InodeTable { entries: vec![0; MAX_INODE_COUNT as usize] }
    }

    pub fn read<D: DeviceDriver>(io: &mut BlockIo<D>) -> Result<InodeTable> {
        let buffer = io.read_block(INODE_TABLE_NUM)?;
        let entries = (0..MAX_INODE_COUNT as usize)
            .map(|i| read_u32(&buffer, i * 4))
            .collect();
        Ok(InodeTable { entries })
    }

    pub fn write<D: DeviceDriver>(&self, io: &mut BlockIo<D>) -> Result<()> {
        let mut buffer = Vec::with_capacity(io.block_size);
        for entry in &self.entries {
            buffer.extend_from_slice(&entry.to_le_bytes());
        }
        buffer.resize(io.block_size, 0);
        io.write_block(INODE_TABLE_NUM, buffer)
    }

    /// Block number holding the inode's record, or the 0 sentinel when the
    /// number is out of range or unmapped.
    pub fn find_block(&self, inode_num: InodePointer) -> BlockPointer {
        if inode_num >= MAX_INODE_COUNT {
            return 0;
        }
        self.entries[inode_num as usize]
    }

    pub fn map(&mut self, inode_num: InodePointer, block_num: BlockPointer) {
        self.entries[inode_num as usize] = block_num;
    }

    pub fn unmap(&mut self, inode_num: InodePointer) {
        self.entries[inode_num as usize] = 0;
    }
}
