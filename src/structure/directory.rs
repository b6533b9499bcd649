use crate::consts::{BlockPointer, InodePointer, BLOCK_SIZE, MAX_NAME_LEN};
use crate::driver::DeviceDriver;
use crate::io::BlockIo;
use crate::structure::read_u32;
use crate::util::error::{FsError, Result};

pub const ENTRY_SIZE: usize = 22;
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / ENTRY_SIZE;

const INO_OFFSET: usize = 0;
const NAME_LEN_OFFSET: usize = 4;
const KIND_OFFSET: usize = 5;
const NAME_OFFSET: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn tag(&self) -> u8 {
        match self {
            EntryKind::File => 1,
            EntryKind::Directory => 2,
        }
    }

    pub fn from_tag(tag: u8) -> EntryKind {
        match tag {
            2 => EntryKind::Directory,
            _ => EntryKind::File,
        }
    }
}

/// An entry yielded by `enumerate`. `next_cursor` resumes iteration at
/// the position after this entry.
#[derive(Debug, PartialEq)]
pub struct DirEntry {
    pub inode: InodePointer,
    pub kind: EntryKind,
    pub name: Vec<u8>,
    pub next_cursor: u64,
}

/// Fixed-size directory records packed into the directory's single data
/// block. Removal tombstones (inode number 0) instead of compacting;
/// insertion reuses the first tombstone it finds.
///
/// Mutation here is not covered by the engine's allocation lock. Two
/// concurrent inserts into the same directory can race on the free-slot
/// scan; callers must serialize writers per directory.
pub struct DirectoryStore {
    data_block: BlockPointer,
}

impl DirectoryStore {
    pub fn new(data_block: BlockPointer) -> DirectoryStore {
        DirectoryStore { data_block }
    }

    /// Writes (inode, kind, name) into the first free record.
    pub fn insert<D: DeviceDriver>(
        &self,
        io: &mut BlockIo<D>,
        child: InodePointer,
        name: &[u8],
        kind: EntryKind,
    ) -> Result<()> {
        check_name(name)?;

        let mut block = io.read_block(self.data_block)?;
        for slot in 0..ENTRIES_PER_BLOCK {
            let offset = slot * ENTRY_SIZE;
            if read_u32(&block, offset + INO_OFFSET) != 0 {
                continue;
            }
            block[offset..offset + 4].copy_from_slice(&child.to_le_bytes());
            block[offset + NAME_LEN_OFFSET] = name.len() as u8;
            block[offset + KIND_OFFSET] = kind.tag();
            block[offset + NAME_OFFSET..offset + NAME_OFFSET + MAX_NAME_LEN].fill(0);
            block[offset + NAME_OFFSET..offset + NAME_OFFSET + name.len()].copy_from_slice(name);
            return io.write_block(self.data_block, block);
        }
        // single-block directories cannot grow
        Err(FsError::OutOfSpace("no free directory entry"))
    }

    /// Tombstones the record whose stored name matches byte for byte.
    /// Returns the inode number the record pointed at.
    pub fn remove<D: DeviceDriver>(
        &self,
        io: &mut BlockIo<D>,
        name: &[u8],
    ) -> Result<InodePointer> {
        check_name(name)?;

        let mut block = io.read_block(self.data_block)?;
        for slot in 0..ENTRIES_PER_BLOCK {
            let offset = slot * ENTRY_SIZE;
            if !entry_matches(&block, offset, name) {
                continue;
            }
            let inode = read_u32(&block, offset + INO_OFFSET);
            block[offset..offset + 4].copy_from_slice(&0u32.to_le_bytes());
            block[offset + NAME_LEN_OFFSET] = 0;
            io.write_block(self.data_block, block)?;
            return Ok(inode);
        }
        Err(FsError::NotFound)
    }

    /// First live record matching the name, skipping tombstones.
    pub fn find<D: DeviceDriver>(
        &self,
        io: &mut BlockIo<D>,
        name: &[u8],
    ) -> Result<Option<(InodePointer, EntryKind)>> {
        check_name(name)?;

        let block = io.read_block(self.data_block)?;
        for slot in 0..ENTRIES_PER_BLOCK {
            let offset = slot * ENTRY_SIZE;
            if entry_matches(&block, offset, name) {
                return Ok(Some((
                    read_u32(&block, offset + INO_OFFSET),
                    EntryKind::from_tag(block[offset + KIND_OFFSET]),
                )));
            }
        }
        Ok(None)
    }

    /// Live entries at or after `cursor`, with "." and ".." synthesized
    /// at logical positions 0 and 1. On-disk records sit at
    /// 2 + slot-byte-offset so the cursor doubles as a block position and
    /// iteration can restart from any previously returned cursor.
    pub fn enumerate<D: DeviceDriver>(
        &self,
        io: &mut BlockIo<D>,
        self_inode: InodePointer,
        parent_inode: InodePointer,
        cursor: u64,
    ) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();

        if cursor == 0 {
            entries.push(DirEntry {
                inode: self_inode,
                kind: EntryKind::Directory,
                name: b".".to_vec(),
                next_cursor: 1,
            });
        }
        if cursor <= 1 {
            entries.push(DirEntry {
                inode: parent_inode,
                kind: EntryKind::Directory,
                name: b"..".to_vec(),
                next_cursor: 2,
            });
        }

        let block = io.read_block(self.data_block)?;
        for slot in 0..ENTRIES_PER_BLOCK {
            let offset = slot * ENTRY_SIZE;
            let position = 2 + offset as u64;
            if position < cursor {
                continue;
            }
            let inode = read_u32(&block, offset + INO_OFFSET);
            if inode == 0 {
                continue;
            }
            let name_len = block[offset + NAME_LEN_OFFSET] as usize;
            entries.push(DirEntry {
                inode,
                kind: EntryKind::from_tag(block[offset + KIND_OFFSET]),
                name: block[offset + NAME_OFFSET..offset + NAME_OFFSET + name_len].to_vec(),
                next_cursor: 2 + (offset + ENTRY_SIZE) as u64,
            });
        }
        Ok(entries)
    }

    /// True when no live record remains (tombstones do not count).
    pub fn is_empty<D: DeviceDriver>(&self, io: &mut BlockIo<D>) -> Result<bool> {
        let block = io.read_block(self.data_block)?;
        for slot in 0..ENTRIES_PER_BLOCK {
            if read_u32(&block, slot * ENTRY_SIZE + INO_OFFSET) != 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn check_name(name: &[u8]) -> Result<()> {
    if name.is_empty() {
        return Err(FsError::InvalidArgument("empty name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

/// Byte-exact comparison against the stored length and bytes; the name
/// buffer is not null-terminated.
fn entry_matches(block: &[u8], offset: usize, name: &[u8]) -> bool {
    if read_u32(block, offset + INO_OFFSET) == 0 {
        return false;
    }
    let name_len = block[offset + NAME_LEN_OFFSET] as usize;
    name_len == name.len() && &block[offset + NAME_OFFSET..offset + NAME_OFFSET + name_len] == name
}
