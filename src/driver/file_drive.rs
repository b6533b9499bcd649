use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use super::DeviceDriver;

/// File-backed drive. Every image used by the engine, including the test
/// images, goes through this.
pub struct FileDrive {
    file: File,
    bytes: u64,
    sector_size: usize,
}

impl FileDrive {
    pub fn create<P: AsRef<Path>>(path: P, bytes: u64, sector_size: usize) -> io::Result<FileDrive> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(bytes)?;
        Ok(FileDrive { file, bytes, sector_size })
    }

    pub fn open<P: AsRef<Path>>(path: P, sector_size: usize) -> io::Result<FileDrive> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let bytes = file.metadata()?.len();
        Ok(FileDrive { file, bytes, sector_size })
    }
}

impl DeviceDriver for FileDrive {
    fn get_sector_count(&self) -> u64 {
        self.bytes / self.sector_size as u64
    }

    fn get_sector_size(&self) -> usize {
        self.sector_size
    }

    fn read_sector(&self, index: u64) -> io::Result<Vec<u8>> {
        let mut buffer = vec![0; self.sector_size];
        self.file
            .read_exact_at(&mut buffer, index * self.sector_size as u64)?;
        Ok(buffer)
    }

    fn write_sector(&mut self, index: u64, data: &[u8]) -> io::Result<()> {
        if data.len() != self.sector_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "sector size mismatch - expected {}, got {}",
                    self.sector_size,
                    data.len()
                ),
            ));
        }
        self.file.write_all_at(data, index * self.sector_size as u64)
    }
}
