use crate::consts::{MAGIC, SUPERBLOCK_NUM};
use crate::driver::DeviceDriver;
use crate::structure::read_u32;
use crate::io::BlockIo;
use crate::util::error::{FsError, Result};

/// Filesystem-wide counters and identity, persisted in block 0.
/// The free counters must equal the number of zero bits in the matching
/// bitmap at all times; the allocators maintain that in lockstep.
#[derive(Debug, PartialEq)]
pub struct SuperBlock {
    pub magic: u32,
    pub inode_count: u32,
    pub block_count: u32,
    pub free_blocks: u32,
    pub free_inodes: u32,
    pub block_size: u32,
}

impl SuperBlock {
    pub fn new(block_count: u32, inode_count: u32, free_blocks: u32, free_inodes: u32, block_size: u32) -> SuperBlock {
        SuperBlock {
            magic: MAGIC,
            inode_count,
            block_count,
            free_blocks,
            free_inodes,
            block_size,
        }
    }

    pub fn read<D: DeviceDriver>(io: &mut BlockIo<D>) -> Result<SuperBlock> {
        let buffer = io.read_block(SUPERBLOCK_NUM)?;
        let sb = SuperBlock::from_bytes(&buffer);
        if sb.magic != MAGIC {
            return Err(FsError::BadMagic(sb.magic));
        }
        Ok(sb)
    }

    pub fn write<D: DeviceDriver>(&self, io: &mut BlockIo<D>) -> Result<()> {
        let mut buffer = self.to_bytes();
        buffer.resize(io.block_size, 0);
        io.write_block(SUPERBLOCK_NUM, buffer)
    }

    fn from_bytes(buffer: &[u8]) -> SuperBlock {
        SuperBlock {
            magic: read_u32(buffer, 0),
            inode_count: read_u32(buffer, 4),
            block_count: read_u32(buffer, 8),
            free_blocks: read_u32(buffer, 12),
            free_inodes: read_u32(buffer, 16),
            block_size: read_u32(buffer, 20),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.magic.to_le_bytes());
        buffer.extend_from_slice(&self.inode_count.to_le_bytes());
        buffer.extend_from_slice(&self.block_count.to_le_bytes());
        buffer.extend_from_slice(&self.free_blocks.to_le_bytes());
        buffer.extend_from_slice(&self.free_inodes.to_le_bytes());
        buffer.extend_from_slice(&self.block_size.to_le_bytes());
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::FileDrive;

    #[test]
    fn read_write_superblock() {
        let dir = tempfile::tempdir().unwrap();
        let drive = FileDrive::create(dir.path().join("sb.img"), 1024 * 512, 512).unwrap();
        let mut io = BlockIo::new(drive, 1024);

        let superblock = SuperBlock::new(512, 256, 505, 254, 1024);
        superblock.write(&mut io).unwrap();
        let read_back = SuperBlock::read(&mut io).unwrap();
        assert_eq!(superblock, read_back);
    }

    #[test]
    fn bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let drive = FileDrive::create(dir.path().join("sb.img"), 1024 * 512, 512).unwrap();
        let mut io = BlockIo::new(drive, 1024);

        io.write_block(0, vec![0xab; 1024]).unwrap();
        assert!(matches!(
            SuperBlock::read(&mut io),
            Err(FsError::BadMagic(_))
        ));
    }
}
