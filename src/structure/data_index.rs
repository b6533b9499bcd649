use crate::consts::{BlockPointer, DATA_INDEX_CAPACITY};
use crate::driver::DeviceDriver;
use crate::io::BlockIo;
use crate::structure::{read_u32, Structure};
use crate::util::error::Result;

/// Per-inode array of data-block pointers filling exactly one block.
/// Pointer 0 = unused slot. Creation and the directory/file paths only
/// ever populate slot 0; `release_all` still walks every slot so a
/// multi-block object would be reclaimed correctly.
pub struct DataIndex {
    block_num: BlockPointer,
    pointers: Vec<BlockPointer>,
}

impl DataIndex {
    /// Zero-fills the index block. Must run at object creation before
    /// any data pointer is stored.
    pub fn init<D: DeviceDriver>(io: &mut BlockIo<D>, block_num: BlockPointer) -> Result<DataIndex> {
        let index = DataIndex { block_num, pointers: vec![0; DATA_INDEX_CAPACITY] };
        index.write(io)?;
        Ok(index)
    }

    pub fn read<D: DeviceDriver>(io: &mut BlockIo<D>, block_num: BlockPointer) -> Result<DataIndex> {
        let buffer = io.read_block(block_num)?;
        let pointers = (0..DATA_INDEX_CAPACITY)
            .map(|i| read_u32(&buffer, i * 4))
            .collect();
        Ok(DataIndex { block_num, pointers })
    }

    fn write<D: DeviceDriver>(&self, io: &mut BlockIo<D>) -> Result<()> {
        let mut buffer = Vec::with_capacity(self.pointers.len() * 4);
        for pointer in &self.pointers {
            buffer.extend_from_slice(&pointer.to_le_bytes());
        }
        io.write_block(self.block_num, buffer)
    }

    /// Slot 0: the sole data block consulted by every current directory
    /// and file operation.
    pub fn first_block(&self) -> BlockPointer {
        self.pointers[0]
    }

    pub fn set_slot<D: DeviceDriver>(
        &mut self,
        io: &mut BlockIo<D>,
        slot: usize,
        pointer: BlockPointer,
    ) -> Result<()> {
        self.pointers[slot] = pointer;
        self.write(io)
    }

    /// Releases every nonzero pointer back to the block allocator.
    /// Used at finalize time.
    pub fn release_all<D: DeviceDriver>(
        &mut self,
        structure: &mut Structure,
        io: &mut BlockIo<D>,
    ) -> Result<()> {
        for slot in 0..DATA_INDEX_CAPACITY {
            if self.pointers[slot] != 0 {
                structure.release_block(io, self.pointers[slot])?;
                self.pointers[slot] = 0;
            }
        }
        self.write(io)
    }
}
