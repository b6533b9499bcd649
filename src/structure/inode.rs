use std::time::{SystemTime, UNIX_EPOCH};

use crate::consts::{BlockPointer, InodePointer};
use crate::structure::{read_u16, read_u32};
use crate::util::mode::ModeBits;

pub const INODE_SIZE_ON_DISK: usize = 36;

/// One on-disk inode record; each record owns a whole metadata block.
///
/// The own-block and DataIndex-block fields are structural bookkeeping
/// set when the record is created or loaded. `to_bytes` always writes
/// those private copies, never values a caller could have mutated.
pub struct Inode {
    pub num: InodePointer,
    pub mode: ModeBits,
    pub uid: u16,
    pub gid: u16,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub link_count: u16,
    pub num_blocks: u32,
    block_num: BlockPointer,
    index_block_num: BlockPointer,
}

impl Inode {
    pub fn new(
        num: InodePointer,
        mode: ModeBits,
        uid: u16,
        gid: u16,
        block_num: BlockPointer,
        index_block_num: BlockPointer,
    ) -> Inode {
        let now = now_secs();
        Inode {
            num,
            mode,
            uid,
            gid,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            link_count: 1,
            num_blocks: 1,
            block_num,
            index_block_num,
        }
    }

    pub fn from_bytes(num: InodePointer, buffer: &[u8]) -> Inode {
        Inode {
            num,
            mode: read_u16(buffer, 0),
            uid: read_u16(buffer, 2),
            gid: read_u16(buffer, 4),
            size: read_u32(buffer, 6),
            atime: read_u32(buffer, 10),
            mtime: read_u32(buffer, 14),
            ctime: read_u32(buffer, 18),
            link_count: read_u16(buffer, 22),
            num_blocks: read_u32(buffer, 24),
            block_num: read_u32(buffer, 28),
            index_block_num: read_u32(buffer, 32),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(INODE_SIZE_ON_DISK);
        buffer.extend_from_slice(&self.mode.to_le_bytes());
        buffer.extend_from_slice(&self.uid.to_le_bytes());
        buffer.extend_from_slice(&self.gid.to_le_bytes());
        buffer.extend_from_slice(&self.size.to_le_bytes());
        buffer.extend_from_slice(&self.atime.to_le_bytes());
        buffer.extend_from_slice(&self.mtime.to_le_bytes());
        buffer.extend_from_slice(&self.ctime.to_le_bytes());
        buffer.extend_from_slice(&self.link_count.to_le_bytes());
        buffer.extend_from_slice(&self.num_blocks.to_le_bytes());
        buffer.extend_from_slice(&self.block_num.to_le_bytes());
        buffer.extend_from_slice(&self.index_block_num.to_le_bytes());
        buffer
    }

    pub fn block_num(&self) -> BlockPointer {
        self.block_num
    }

    pub fn index_block_num(&self) -> BlockPointer {
        self.index_block_num
    }

    pub fn touch_modified(&mut self) {
        let now = now_secs();
        self.mtime = now;
        self.ctime = now;
    }
}

pub fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
