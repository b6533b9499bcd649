pub const BLOCK_SIZE: usize = 1024;
pub const MAGIC: u32 = 0x0BAD_C0DE;

// Fixed block numbers written at format time, never allocable.
pub const SUPERBLOCK_NUM: u32 = 0;
pub const BLOCK_BITMAP_NUM: u32 = 1;
pub const INODE_BITMAP_NUM: u32 = 2;
pub const INODE_TABLE_NUM: u32 = 3;
pub const ROOT_INODE_BLOCK_NUM: u32 = 4;
pub const ROOT_INDEX_BLOCK_NUM: u32 = 5;
pub const ROOT_DATA_BLOCK_NUM: u32 = 6;
pub const RESERVED_BOUNDARY: u32 = ROOT_DATA_BLOCK_NUM;

/// The block bitmap is a single block, one bit per block.
pub const MAX_BLOCK_COUNT: u32 = (BLOCK_SIZE * 8) as u32;
/// The inode table is a single block of u32 entries, so the table
/// capacity bounds the inode count.
pub const MAX_INODE_COUNT: u32 = (BLOCK_SIZE / 4) as u32;

/// Inode number 0 is the null sentinel, 1 is the root directory.
pub const NULL_INODE: u32 = 0;
pub const ROOT_INODE: u32 = 1;

pub const DATA_INDEX_CAPACITY: usize = BLOCK_SIZE / 4;
pub const MAX_NAME_LEN: usize = 16;

pub type BlockPointer = u32;
pub type InodePointer = u32;
