use crate::consts::BLOCK_SIZE;
use crate::driver::DeviceDriver;
use crate::fs::FsSession;
use crate::structure::inode::Inode;
use crate::util::error::{FsError, Result};
use crate::util::mode::ModeBitsHelper;

use super::Node;

/// A regular file. Content lives in the single data block behind slot 0
/// of the inode's DataIndex, so a file tops out at one block.
pub struct FileNode {
    pub inode: Inode,
}

impl FileNode {
    pub fn from_inode(inode: Inode) -> Result<FileNode> {
        if inode.mode.is_directory() {
            return Err(FsError::InvalidArgument("inode is a directory"));
        }
        Ok(FileNode { inode })
    }

    pub fn read<D: DeviceDriver>(
        &self,
        session: &FsSession<D>,
        offset: u32,
        size: u32,
    ) -> Result<Vec<u8>> {
        let data = session.read_data_block(&self.inode)?;
        // a corrupt on-disk size must not push the slice past the block
        let end = (self.inode.size.min(offset.saturating_add(size)) as usize).min(data.len());
        if offset as usize >= end {
            return Ok(Vec::new());
        }
        Ok(data[offset as usize..end].to_vec())
    }

    /// Writes into the data block and grows the recorded size if the
    /// write extends past it.
    pub fn write<D: DeviceDriver>(
        &mut self,
        session: &FsSession<D>,
        offset: u32,
        data: &[u8],
    ) -> Result<u32> {
        let end = offset as usize + data.len();
        if end > BLOCK_SIZE {
            return Err(FsError::OutOfSpace("file limited to a single block"));
        }

        let mut block = session.read_data_block(&self.inode)?;
        block[offset as usize..end].copy_from_slice(data);
        session.write_data_block(&self.inode, block)?;

        if end as u32 > self.inode.size {
            self.inode.size = end as u32;
        }
        self.inode.touch_modified();
        session.write_inode(&self.inode)?;
        Ok(data.len() as u32)
    }

    pub fn truncate<D: DeviceDriver>(
        &mut self,
        session: &FsSession<D>,
        new_size: u32,
    ) -> Result<()> {
        if new_size as usize > BLOCK_SIZE {
            return Err(FsError::OutOfSpace("file limited to a single block"));
        }
        if new_size < self.inode.size {
            // zero the cut tail so stale bytes cannot resurface on growth
            let mut block = session.read_data_block(&self.inode)?;
            block[new_size as usize..self.inode.size as usize].fill(0);
            session.write_data_block(&self.inode, block)?;
        }
        self.inode.size = new_size;
        self.inode.touch_modified();
        session.write_inode(&self.inode)
    }
}

impl Node for FileNode {
    fn inode(&self) -> &Inode {
        &self.inode
    }
}
