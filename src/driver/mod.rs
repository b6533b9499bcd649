use std::io;

pub(crate) mod file_drive;

pub use file_drive::FileDrive;

/// Sector-level contract for the underlying storage. Blocks are assembled
/// from whole sectors above this trait; there are no partial operations.
pub trait DeviceDriver {
    fn get_sector_count(&self) -> u64;
    fn get_sector_size(&self) -> usize;
    fn get_size(&self) -> u64 {
        self.get_sector_count() * self.get_sector_size() as u64
    }
    fn read_sector(&self, index: u64) -> io::Result<Vec<u8>>;
    fn write_sector(&mut self, index: u64, data: &[u8]) -> io::Result<()>;
}
