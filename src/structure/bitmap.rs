use crate::consts::BlockPointer;
use crate::driver::DeviceDriver;
use crate::io::BlockIo;
use crate::util::error::Result;

/// One block of in-use/free bits, one bit per tracked resource.
/// Bit set = in use. Backs both the block and the inode allocators.
pub struct Bitmap {
    block_num: BlockPointer,
    data: Vec<u8>,
}

impl Bitmap {
    /// Fresh all-free bitmap, persisted by the first `write`.
    pub fn new(block_num: BlockPointer, block_size: usize) -> Bitmap {
        Bitmap { block_num, data: vec![0; block_size] }
    }

    pub fn read<D: DeviceDriver>(io: &mut BlockIo<D>, block_num: BlockPointer) -> Result<Bitmap> {
        let data = io.read_block(block_num)?;
        Ok(Bitmap { block_num, data })
    }

    pub fn write<D: DeviceDriver>(&self, io: &mut BlockIo<D>) -> Result<()> {
        io.write_block(self.block_num, self.data.clone())
    }

    pub fn capacity(&self) -> u32 {
        (self.data.len() * 8) as u32
    }

    pub fn is_free(&self, index: u32) -> bool {
        self.data[(index / 8) as usize] & (1 << (index % 8)) == 0
    }

    pub fn is_used(&self, index: u32) -> bool {
        !self.is_free(index)
    }

    pub fn mark_used(&mut self, index: u32) {
        self.data[(index / 8) as usize] |= 1 << (index % 8);
    }

    pub fn mark_free(&mut self, index: u32) {
        self.data[(index / 8) as usize] &= !(1 << (index % 8));
    }

    /// First zero bit at or above `from`, or None if every bit is set.
    pub fn first_free(&self, from: u32) -> Option<u32> {
        for index in from..self.capacity() {
            if self.is_free(index) {
                return Some(index);
            }
        }
        None
    }

    /// Zero bits among the first `limit`. The allocators keep this equal
    /// to the superblock free counter.
    pub fn count_free(&self, limit: u32) -> u32 {
        (0..limit).filter(|i| self.is_free(*i)).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::FileDrive;

    #[test]
    fn mark_and_scan() {
        let mut bitmap = Bitmap::new(1, 1024);
        assert_eq!(bitmap.capacity(), 8192);
        assert_eq!(bitmap.first_free(0), Some(0));

        for i in 0..10 {
            bitmap.mark_used(i);
        }
        assert_eq!(bitmap.first_free(0), Some(10));
        assert_eq!(bitmap.first_free(7), Some(10));
        assert!(bitmap.is_used(3));

        bitmap.mark_free(4);
        assert_eq!(bitmap.first_free(0), Some(4));
        assert_eq!(bitmap.count_free(10), 1);
    }

    #[test]
    fn full_bitmap_has_no_free_bit() {
        let mut bitmap = Bitmap::new(1, 1024);
        for i in 0..bitmap.capacity() {
            bitmap.mark_used(i);
        }
        assert_eq!(bitmap.first_free(0), None);
        assert_eq!(bitmap.count_free(8192), 0);
    }

    #[test]
    fn read_write() {
        let dir = tempfile::tempdir().unwrap();
        let drive = FileDrive::create(dir.path().join("bm.img"), 1024 * 512, 512).unwrap();
        let mut io = BlockIo::new(drive, 1024);

        let mut bitmap = Bitmap::new(1, 1024);
        bitmap.mark_used(0);
        bitmap.mark_used(42);
        bitmap.write(&mut io).unwrap();

        let read_back = Bitmap::read(&mut io, 1).unwrap();
        assert!(read_back.is_used(0));
        assert!(read_back.is_used(42));
        assert!(read_back.is_free(41));
    }
}
