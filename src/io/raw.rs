use std::io;

use crate::consts::BlockPointer;
use crate::driver::DeviceDriver;

pub(crate) fn raw_write_block<D: DeviceDriver>(
    drive: &mut D,
    block_size: usize,
    data: &[u8],
    index: BlockPointer,
) -> io::Result<()> {
    if block_size == drive.get_sector_size() {
        return drive.write_sector(index as u64, data);
    }

    let ratio = (block_size / drive.get_sector_size()) as u64;
    let start = index as u64 * ratio;
    for i in start..start + ratio {
        let offset = (i - start) as usize * drive.get_sector_size();
        let limit = offset + drive.get_sector_size();
        drive.write_sector(i, &data[offset..limit])?;
    }
    Ok(())
}

pub(crate) fn raw_read_block<D: DeviceDriver>(
    drive: &D,
    block_size: usize,
    index: BlockPointer,
) -> io::Result<Vec<u8>> {
    if block_size == drive.get_sector_size() {
        return drive.read_sector(index as u64);
    }

    let ratio = (block_size / drive.get_sector_size()) as u64;
    let start = index as u64 * ratio;
    let mut buffer = Vec::with_capacity(block_size);
    for i in start..start + ratio {
        buffer.append(&mut drive.read_sector(i)?);
    }
    Ok(buffer)
}
