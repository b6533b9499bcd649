use log::{debug, warn};

use crate::consts::{
    BlockPointer, InodePointer, BLOCK_BITMAP_NUM, BLOCK_SIZE, INODE_BITMAP_NUM, MAX_BLOCK_COUNT,
    MAX_INODE_COUNT, NULL_INODE, RESERVED_BOUNDARY, ROOT_INODE, ROOT_INODE_BLOCK_NUM,
};
use crate::driver::DeviceDriver;
use crate::io::BlockIo;
use crate::util::error::{FsError, Result};

pub mod bitmap;
pub mod data_index;
pub mod directory;
pub mod inode;
pub mod inode_table;
pub mod superblock;

use bitmap::Bitmap;
use inode_table::InodeTable;
use superblock::SuperBlock;

pub(crate) fn read_u32(buffer: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
    ])
}

pub(crate) fn read_u16(buffer: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

/// The allocation engine: superblock counters, both bitmaps and the inode
/// indirection table, loaded once at mount and held for the session.
///
/// The session wraps this in a single engine-wide mutex held across every
/// allocate/release call; that coarse lock is what keeps the bitmaps and
/// counters consistent under concurrent callers. Directory content is
/// deliberately outside it.
pub struct Structure {
    pub superblock: SuperBlock,
    block_bitmap: Bitmap,
    inode_bitmap: Bitmap,
    inode_table: InodeTable,
}

impl Structure {
    /// Writes the metadata blocks (0-3) of a fresh image: superblock,
    /// both bitmaps and the inode table, with blocks 0-6 and inodes 0-1
    /// pre-marked used and the root mapped to its fixed block. The root
    /// object blocks (4-6) are written by the session on top of this.
    pub fn format<D: DeviceDriver>(io: &mut BlockIo<D>) -> Result<Structure> {
        let block_count = io.block_count.min(MAX_BLOCK_COUNT as u64) as u32;
        if block_count <= RESERVED_BOUNDARY + 1 {
            return Err(FsError::InvalidArgument("image too small to format"));
        }

        let mut block_bitmap = Bitmap::new(BLOCK_BITMAP_NUM, BLOCK_SIZE);
        for num in 0..=RESERVED_BOUNDARY {
            block_bitmap.mark_used(num);
        }
        // bits beyond the device are unusable, keep them out of the scan
        for num in block_count..MAX_BLOCK_COUNT {
            block_bitmap.mark_used(num);
        }

        let mut inode_bitmap = Bitmap::new(INODE_BITMAP_NUM, BLOCK_SIZE);
        inode_bitmap.mark_used(NULL_INODE);
        inode_bitmap.mark_used(ROOT_INODE);

        let mut inode_table = InodeTable::new();
        inode_table.map(ROOT_INODE, ROOT_INODE_BLOCK_NUM);

        let superblock = SuperBlock::new(
            block_count,
            MAX_INODE_COUNT,
            block_count - (RESERVED_BOUNDARY + 1),
            MAX_INODE_COUNT - 2,
            BLOCK_SIZE as u32,
        );

        superblock.write(io)?;
        block_bitmap.write(io)?;
        inode_bitmap.write(io)?;
        inode_table.write(io)?;

        Ok(Structure { superblock, block_bitmap, inode_bitmap, inode_table })
    }

    /// Loads the four metadata blocks. Any read failure here aborts the
    /// mount; nothing beyond the magic is validated, per the bootstrap
    /// contract.
    pub fn mount<D: DeviceDriver>(io: &mut BlockIo<D>) -> Result<Structure> {
        let superblock = SuperBlock::read(io)?;
        let block_bitmap = Bitmap::read(io, BLOCK_BITMAP_NUM)?;
        let inode_bitmap = Bitmap::read(io, INODE_BITMAP_NUM)?;
        let inode_table = InodeTable::read(io)?;
        debug!(
            "mounted: {} blocks ({} free), {} inodes ({} free)",
            superblock.block_count,
            superblock.free_blocks,
            superblock.inode_count,
            superblock.free_inodes
        );
        Ok(Structure { superblock, block_bitmap, inode_bitmap, inode_table })
    }

    /// First free block above the reserved boundary. A scan failure while
    /// the counter claims free blocks means the bitmap and counter have
    /// diverged; that is fatal, not retriable.
    pub fn alloc_block<D: DeviceDriver>(&mut self, io: &mut BlockIo<D>) -> Result<BlockPointer> {
        if self.superblock.free_blocks == 0 {
            return Err(FsError::OutOfSpace("no free blocks"));
        }

        let block_num = match self.block_bitmap.first_free(RESERVED_BOUNDARY + 1) {
            Some(num) if num < self.superblock.block_count => num,
            _ => {
                warn!(
                    "block bitmap scan failed with free counter {}",
                    self.superblock.free_blocks
                );
                return Err(FsError::Consistency(format!(
                    "free block counter is {} but the bitmap has no usable zero bit",
                    self.superblock.free_blocks
                )));
            }
        };

        self.block_bitmap.mark_used(block_num);
        self.superblock.free_blocks -= 1;
        self.block_bitmap.write(io)?;
        self.superblock.write(io)?;
        debug!("allocated block {}", block_num);
        Ok(block_num)
    }

    pub fn release_block<D: DeviceDriver>(
        &mut self,
        io: &mut BlockIo<D>,
        block_num: BlockPointer,
    ) -> Result<()> {
        if block_num <= RESERVED_BOUNDARY {
            return Err(FsError::Protected { kind: "block", num: block_num });
        }
        if block_num >= self.superblock.block_count {
            return Err(FsError::InvalidArgument("block number beyond device"));
        }
        if self.block_bitmap.is_free(block_num) {
            return Err(FsError::DoubleFree { kind: "block", num: block_num });
        }

        self.block_bitmap.mark_free(block_num);
        self.superblock.free_blocks += 1;
        self.block_bitmap.write(io)?;
        self.superblock.write(io)?;
        debug!("released block {}", block_num);
        Ok(())
    }

    /// First free inode number above the root, mapped to `owning_block`
    /// in the indirection table.
    pub fn alloc_inode<D: DeviceDriver>(
        &mut self,
        io: &mut BlockIo<D>,
        owning_block: BlockPointer,
    ) -> Result<InodePointer> {
        if self.superblock.free_inodes == 0 {
            return Err(FsError::OutOfSpace("no free inodes"));
        }

        let inode_num = match self.inode_bitmap.first_free(ROOT_INODE + 1) {
            Some(num) if num < MAX_INODE_COUNT => num,
            _ => {
                warn!(
                    "inode bitmap scan failed with free counter {}",
                    self.superblock.free_inodes
                );
                return Err(FsError::Consistency(format!(
                    "free inode counter is {} but the bitmap has no usable zero bit",
                    self.superblock.free_inodes
                )));
            }
        };

        self.inode_bitmap.mark_used(inode_num);
        self.inode_table.map(inode_num, owning_block);
        self.superblock.free_inodes -= 1;
        self.inode_bitmap.write(io)?;
        self.inode_table.write(io)?;
        self.superblock.write(io)?;
        debug!("allocated inode {} on block {}", inode_num, owning_block);
        Ok(inode_num)
    }

    pub fn release_inode<D: DeviceDriver>(
        &mut self,
        io: &mut BlockIo<D>,
        inode_num: InodePointer,
    ) -> Result<()> {
        if inode_num <= ROOT_INODE {
            return Err(FsError::Protected { kind: "inode", num: inode_num });
        }
        if inode_num >= MAX_INODE_COUNT {
            return Err(FsError::InvalidArgument("inode number out of range"));
        }
        if self.inode_bitmap.is_free(inode_num) {
            return Err(FsError::DoubleFree { kind: "inode", num: inode_num });
        }

        self.inode_bitmap.mark_free(inode_num);
        self.inode_table.unmap(inode_num);
        self.superblock.free_inodes += 1;
        self.inode_bitmap.write(io)?;
        self.inode_table.write(io)?;
        self.superblock.write(io)?;
        debug!("released inode {}", inode_num);
        Ok(())
    }

    /// Pure indirection-table lookup; 0 sentinel for out of range or
    /// unmapped numbers.
    pub fn find_block(&self, inode_num: InodePointer) -> BlockPointer {
        self.inode_table.find_block(inode_num)
    }

    #[cfg(test)]
    pub(crate) fn counters_match_bitmaps(&self) -> bool {
        self.block_bitmap.count_free(MAX_BLOCK_COUNT) == self.superblock.free_blocks
            && self.inode_bitmap.count_free(MAX_INODE_COUNT) == self.superblock.free_inodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::FileDrive;

    fn fresh(dir: &tempfile::TempDir, blocks: u64) -> (Structure, BlockIo<FileDrive>) {
        let drive =
            FileDrive::create(dir.path().join("structure.img"), blocks * 1024, 512).unwrap();
        let mut io = BlockIo::new(drive, BLOCK_SIZE);
        let structure = Structure::format(&mut io).unwrap();
        (structure, io)
    }

    #[test]
    fn format_reserves_fixed_layout() {
        let dir = tempfile::tempdir().unwrap();
        let (structure, _io) = fresh(&dir, 64);

        assert_eq!(structure.superblock.block_count, 64);
        assert_eq!(structure.superblock.free_blocks, 64 - 7);
        assert_eq!(structure.superblock.free_inodes, MAX_INODE_COUNT - 2);
        assert_eq!(structure.find_block(ROOT_INODE), ROOT_INODE_BLOCK_NUM);
        assert!(structure.counters_match_bitmaps());
    }

    #[test]
    fn format_rejects_tiny_image() {
        let dir = tempfile::tempdir().unwrap();
        let drive = FileDrive::create(dir.path().join("tiny.img"), 4 * 1024, 512).unwrap();
        let mut io = BlockIo::new(drive, BLOCK_SIZE);
        assert!(Structure::format(&mut io).is_err());
    }

    #[test]
    fn mount_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (structure, mut io) = fresh(&dir, 64);
        drop(structure);
        io.flush().unwrap();

        let mounted = Structure::mount(&mut io).unwrap();
        assert_eq!(mounted.superblock.free_blocks, 64 - 7);
        assert_eq!(mounted.find_block(ROOT_INODE), ROOT_INODE_BLOCK_NUM);
        assert!(mounted.counters_match_bitmaps());
    }

    #[test]
    fn alloc_block_skips_reserved_range() {
        let dir = tempfile::tempdir().unwrap();
        let (mut structure, mut io) = fresh(&dir, 64);

        let first = structure.alloc_block(&mut io).unwrap();
        assert_eq!(first, RESERVED_BOUNDARY + 1);
        assert!(structure.counters_match_bitmaps());
    }

    #[test]
    fn counters_track_alloc_release_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let (mut structure, mut io) = fresh(&dir, 64);

        let a = structure.alloc_block(&mut io).unwrap();
        let b = structure.alloc_block(&mut io).unwrap();
        assert!(structure.counters_match_bitmaps());

        structure.release_block(&mut io, a).unwrap();
        assert!(structure.counters_match_bitmaps());

        let c = structure.alloc_block(&mut io).unwrap();
        assert_eq!(c, a); // first-fit reuses the released number
        assert_ne!(b, c);
        assert!(structure.counters_match_bitmaps());
    }

    #[test]
    fn exhaustion_returns_out_of_space_and_leaves_state() {
        let dir = tempfile::tempdir().unwrap();
        let (mut structure, mut io) = fresh(&dir, 10);

        for _ in 0..3 {
            structure.alloc_block(&mut io).unwrap();
        }
        assert_eq!(structure.superblock.free_blocks, 0);

        assert!(matches!(
            structure.alloc_block(&mut io),
            Err(FsError::OutOfSpace(_))
        ));
        assert_eq!(structure.superblock.free_blocks, 0);
        assert!(structure.counters_match_bitmaps());
    }

    #[test]
    fn block_counter_bitmap_desync_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut structure, mut io) = fresh(&dir, 10);

        for _ in 0..3 {
            structure.alloc_block(&mut io).unwrap();
        }
        // counter claims a free block the bitmap does not have
        structure.superblock.free_blocks = 1;
        assert!(matches!(
            structure.alloc_block(&mut io),
            Err(FsError::Consistency(_))
        ));
    }

    #[test]
    fn inode_counter_bitmap_desync_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut structure, mut io) = fresh(&dir, 64);

        for _ in 0..MAX_INODE_COUNT - 2 {
            structure.alloc_inode(&mut io, 42).unwrap();
        }
        assert_eq!(structure.superblock.free_inodes, 0);

        structure.superblock.free_inodes = 1;
        assert!(matches!(
            structure.alloc_inode(&mut io, 42),
            Err(FsError::Consistency(_))
        ));
    }

    #[test]
    fn release_reserved_block_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (mut structure, mut io) = fresh(&dir, 64);

        for num in 0..=RESERVED_BOUNDARY {
            let before = structure.superblock.free_blocks;
            assert!(matches!(
                structure.release_block(&mut io, num),
                Err(FsError::Protected { .. })
            ));
            assert_eq!(structure.superblock.free_blocks, before);
        }
        assert!(structure.counters_match_bitmaps());
    }

    #[test]
    fn release_out_of_range_block_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (mut structure, mut io) = fresh(&dir, 64);
        assert!(structure.release_block(&mut io, 64).is_err());
    }

    #[test]
    fn double_free_detected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut structure, mut io) = fresh(&dir, 64);

        let block = structure.alloc_block(&mut io).unwrap();
        structure.release_block(&mut io, block).unwrap();
        assert!(matches!(
            structure.release_block(&mut io, block),
            Err(FsError::DoubleFree { .. })
        ));
        assert!(structure.counters_match_bitmaps());
    }

    #[test]
    fn inode_alloc_maps_owning_block() {
        let dir = tempfile::tempdir().unwrap();
        let (mut structure, mut io) = fresh(&dir, 64);

        let inode_num = structure.alloc_inode(&mut io, 42).unwrap();
        assert_eq!(inode_num, ROOT_INODE + 1);
        assert_eq!(structure.find_block(inode_num), 42);
        assert!(structure.counters_match_bitmaps());

        structure.release_inode(&mut io, inode_num).unwrap();
        assert_eq!(structure.find_block(inode_num), 0);
        assert!(structure.counters_match_bitmaps());
    }

    #[test]
    fn root_and_null_inodes_protected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut structure, mut io) = fresh(&dir, 64);

        assert!(matches!(
            structure.release_inode(&mut io, NULL_INODE),
            Err(FsError::Protected { .. })
        ));
        assert!(matches!(
            structure.release_inode(&mut io, ROOT_INODE),
            Err(FsError::Protected { .. })
        ));
    }
}
