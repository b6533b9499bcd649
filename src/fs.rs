use log::{debug, info};
use parking_lot::Mutex;

use crate::consts::{
    BlockPointer, InodePointer, BLOCK_SIZE, ROOT_DATA_BLOCK_NUM, ROOT_INDEX_BLOCK_NUM, ROOT_INODE,
    ROOT_INODE_BLOCK_NUM,
};
use crate::driver::DeviceDriver;
use crate::io::BlockIo;
use crate::structure::data_index::DataIndex;
use crate::structure::directory::{DirEntry, DirectoryStore, EntryKind};
use crate::structure::inode::Inode;
use crate::structure::Structure;
use crate::util::error::{FsError, Result};
use crate::util::mode::{directory_mode, ModeBits, ModeBitsHelper};

/// One mounted filesystem: the loaded metadata blocks plus the block
/// cache, alive until `unmount`.
///
/// `structure` is the engine-wide allocation lock of the design: it is
/// held for the full duration of every allocate/release call, which
/// serializes all block and inode allocation. Directory content ops take
/// only the `io` lock per block access, so concurrent writers against the
/// same directory must be serialized by the caller.
pub struct FsSession<D: DeviceDriver> {
    io: Mutex<BlockIo<D>>,
    structure: Mutex<Structure>,
}

impl<D: DeviceDriver> FsSession<D> {
    /// Writes a fresh image: the four metadata blocks, then the root
    /// object (inode record, DataIndex, empty data block) on blocks 4-6.
    pub fn format(drive: D) -> Result<FsSession<D>> {
        let mut io = BlockIo::new(drive, BLOCK_SIZE);
        let structure = Structure::format(&mut io)?;

        let root = Inode::new(
            ROOT_INODE,
            directory_mode(0o755),
            0,
            0,
            ROOT_INODE_BLOCK_NUM,
            ROOT_INDEX_BLOCK_NUM,
        );
        write_inode_record(&mut io, &root)?;

        let mut index = DataIndex::init(&mut io, ROOT_INDEX_BLOCK_NUM)?;
        index.set_slot(&mut io, 0, ROOT_DATA_BLOCK_NUM)?;
        io.write_block(ROOT_DATA_BLOCK_NUM, vec![0; BLOCK_SIZE])?;
        io.flush()?;

        info!("formatted image with {} blocks", structure.superblock.block_count);
        Ok(FsSession { io: Mutex::new(io), structure: Mutex::new(structure) })
    }

    /// Loads the metadata blocks for the lifetime of the session. Fails
    /// on a bad magic or on any metadata read error.
    pub fn mount(drive: D) -> Result<FsSession<D>> {
        let mut io = BlockIo::new(drive, BLOCK_SIZE);
        let structure = Structure::mount(&mut io)?;
        Ok(FsSession { io: Mutex::new(io), structure: Mutex::new(structure) })
    }

    /// Pushes every dirty block to the device.
    pub fn sync(&self) -> Result<()> {
        self.io.lock().flush()
    }

    pub fn unmount(self) -> Result<()> {
        self.sync()
    }

    pub fn read_inode(&self, inode_num: InodePointer) -> Result<Inode> {
        let block_num = self.structure.lock().find_block(inode_num);
        if block_num == 0 {
            return Err(FsError::NotFound);
        }
        let block = self.io.lock().read_block(block_num)?;
        Ok(Inode::from_bytes(inode_num, &block))
    }

    pub fn write_inode(&self, inode: &Inode) -> Result<()> {
        write_inode_record(&mut self.io.lock(), inode)
    }

    /// Creates a file or directory under `parent`. Resources are acquired
    /// in order data block, DataIndex block, inode metadata block, inode
    /// number; any later failure releases everything acquired by this
    /// call before the error surfaces.
    pub fn create(
        &self,
        parent_num: InodePointer,
        name: &[u8],
        mode: ModeBits,
        uid: u16,
        gid: u16,
    ) -> Result<Inode> {
        let mut parent = self.read_inode(parent_num)?;
        let store = self.directory_store(&parent)?;

        // validate before anything is allocated
        if store.find(&mut self.io.lock(), name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }

        let (data_block, index_block, meta_block, inode_num) = {
            let mut structure = self.structure.lock();
            let mut io = self.io.lock();
            let data_block = structure.alloc_block(&mut io)?;
            let index_block = match structure.alloc_block(&mut io) {
                Ok(num) => num,
                Err(e) => {
                    structure.release_block(&mut io, data_block)?;
                    return Err(e);
                }
            };
            let meta_block = match structure.alloc_block(&mut io) {
                Ok(num) => num,
                Err(e) => {
                    structure.release_block(&mut io, index_block)?;
                    structure.release_block(&mut io, data_block)?;
                    return Err(e);
                }
            };
            let inode_num = match structure.alloc_inode(&mut io, meta_block) {
                Ok(num) => num,
                Err(e) => {
                    structure.release_block(&mut io, meta_block)?;
                    structure.release_block(&mut io, index_block)?;
                    structure.release_block(&mut io, data_block)?;
                    return Err(e);
                }
            };
            (data_block, index_block, meta_block, inode_num)
        };

        let kind = if mode.is_directory() { EntryKind::Directory } else { EntryKind::File };
        let inode = Inode::new(inode_num, mode, uid, gid, meta_block, index_block);

        let built = (|| -> Result<()> {
            let mut io = self.io.lock();
            let mut index = DataIndex::init(&mut io, index_block)?;
            index.set_slot(&mut io, 0, data_block)?;
            io.write_block(data_block, vec![0; BLOCK_SIZE])?;
            write_inode_record(&mut io, &inode)?;
            store.insert(&mut io, inode_num, name, kind)
        })();

        if let Err(e) = built {
            self.unwind_create(data_block, index_block, meta_block, inode_num);
            return Err(e);
        }

        parent.touch_modified();
        self.write_inode(&parent)?;
        debug!("created inode {} under {}", inode_num, parent_num);
        Ok(inode)
    }

    /// Removes the directory entry, then drops the child's link count.
    /// Reclamation happens later through `finalize`, once the caller
    /// drops its last reference to the object.
    pub fn unlink(&self, parent_num: InodePointer, name: &[u8]) -> Result<InodePointer> {
        let mut parent = self.read_inode(parent_num)?;
        let store = self.directory_store(&parent)?;

        let child_num = store.remove(&mut self.io.lock(), name)?;

        let mut child = self.read_inode(child_num)?;
        child.link_count = child.link_count.saturating_sub(1);
        child.ctime = crate::structure::inode::now_secs();
        self.write_inode(&child)?;

        parent.touch_modified();
        self.write_inode(&parent)?;
        debug!("unlinked inode {} from {}", child_num, parent_num);
        Ok(child_num)
    }

    /// Reclaims a fully unlinked object: every data block through the
    /// DataIndex, the index block, the metadata block and the inode
    /// number. The caller invokes this once the link count is zero and
    /// the last open handle is gone.
    pub fn finalize(&self, inode_num: InodePointer) -> Result<()> {
        let inode = self.read_inode(inode_num)?;
        if inode.link_count != 0 {
            return Err(FsError::InvalidArgument("inode is still linked"));
        }

        let mut structure = self.structure.lock();
        let mut io = self.io.lock();
        let mut index = DataIndex::read(&mut io, inode.index_block_num())?;
        index.release_all(&mut structure, &mut io)?;
        structure.release_block(&mut io, inode.index_block_num())?;
        structure.release_block(&mut io, inode.block_num())?;
        structure.release_inode(&mut io, inode_num)?;
        debug!("finalized inode {}", inode_num);
        Ok(())
    }

    pub fn lookup(
        &self,
        parent_num: InodePointer,
        name: &[u8],
    ) -> Result<(InodePointer, EntryKind)> {
        let parent = self.read_inode(parent_num)?;
        let store = self.directory_store(&parent)?;
        store
            .find(&mut self.io.lock(), name)?
            .ok_or(FsError::NotFound)
    }

    /// Walks an absolute path component by component from the root.
    pub fn resolve(&self, path: &str) -> Result<InodePointer> {
        let mut current = ROOT_INODE;
        let mut current_kind = EntryKind::Directory;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if current_kind != EntryKind::Directory {
                return Err(FsError::NotADirectory);
            }
            let (next, kind) = self.lookup(current, component.as_bytes())?;
            current = next;
            current_kind = kind;
        }
        Ok(current)
    }

    /// Entries of a directory from `cursor`, "." and ".." synthesized
    /// first. The parent number comes from the caller; the on-disk format
    /// does not record parentage.
    pub fn entries(
        &self,
        dir_num: InodePointer,
        parent_num: InodePointer,
        cursor: u64,
    ) -> Result<Vec<DirEntry>> {
        let dir = self.read_inode(dir_num)?;
        let store = self.directory_store(&dir)?;
        store.enumerate(&mut self.io.lock(), dir_num, parent_num, cursor)
    }

    pub fn is_directory_empty(&self, dir_num: InodePointer) -> Result<bool> {
        let dir = self.read_inode(dir_num)?;
        let store = self.directory_store(&dir)?;
        store.is_empty(&mut self.io.lock())
    }

    /// The object's single data block, resolved through slot 0 of its
    /// DataIndex.
    pub fn first_data_block(&self, inode: &Inode) -> Result<BlockPointer> {
        let index = DataIndex::read(&mut self.io.lock(), inode.index_block_num())?;
        Ok(index.first_block())
    }

    pub fn read_data_block(&self, inode: &Inode) -> Result<Vec<u8>> {
        let block_num = self.first_data_block(inode)?;
        self.io.lock().read_block(block_num)
    }

    pub fn write_data_block(&self, inode: &Inode, data: Vec<u8>) -> Result<()> {
        let block_num = self.first_data_block(inode)?;
        self.io.lock().write_block(block_num, data)
    }

    pub fn free_counts(&self) -> (u32, u32) {
        let structure = self.structure.lock();
        (structure.superblock.free_blocks, structure.superblock.free_inodes)
    }

    fn directory_store(&self, dir: &Inode) -> Result<DirectoryStore> {
        if !dir.mode.is_directory() {
            return Err(FsError::NotADirectory);
        }
        Ok(DirectoryStore::new(self.first_data_block(dir)?))
    }

    /// Rollback path for `create`. Release errors here would mask the
    /// original failure, so they are only logged.
    fn unwind_create(
        &self,
        data_block: BlockPointer,
        index_block: BlockPointer,
        meta_block: BlockPointer,
        inode_num: InodePointer,
    ) {
        let mut structure = self.structure.lock();
        let mut io = self.io.lock();
        for result in [
            structure.release_inode(&mut io, inode_num),
            structure.release_block(&mut io, meta_block),
            structure.release_block(&mut io, index_block),
            structure.release_block(&mut io, data_block),
        ] {
            if let Err(e) = result {
                log::error!("create rollback failed: {}", e);
            }
        }
    }
}

fn write_inode_record<D: DeviceDriver>(io: &mut BlockIo<D>, inode: &Inode) -> Result<()> {
    let mut block = inode.to_bytes();
    block.resize(io.block_size, 0);
    io.write_block(inode.block_num(), block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::FileDrive;
    use crate::util::mode::file_mode;

    fn session(dir: &tempfile::TempDir) -> FsSession<FileDrive> {
        let drive = FileDrive::create(dir.path().join("fs.img"), 256 * 1024, 512).unwrap();
        FsSession::format(drive).unwrap()
    }

    #[test]
    fn format_then_remount() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.img");
        {
            let drive = FileDrive::create(&path, 256 * 1024, 512).unwrap();
            let session = FsSession::format(drive).unwrap();
            session.unmount().unwrap();
        }
        let session = FsSession::mount(FileDrive::open(&path, 512).unwrap()).unwrap();
        let root = session.read_inode(ROOT_INODE).unwrap();
        assert!(root.mode.is_directory());
        assert_eq!(root.block_num(), ROOT_INODE_BLOCK_NUM);
        assert_eq!(session.first_data_block(&root).unwrap(), ROOT_DATA_BLOCK_NUM);
    }

    #[test]
    fn mount_rejects_unformatted_image() {
        let dir = tempfile::tempdir().unwrap();
        let drive = FileDrive::create(dir.path().join("raw.img"), 256 * 1024, 512).unwrap();
        assert!(matches!(
            FsSession::mount(drive),
            Err(FsError::BadMagic(_))
        ));
    }

    #[test]
    fn create_then_find_returns_same_inode() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);

        let inode = session
            .create(ROOT_INODE, b"foo", file_mode(0o644), 0, 0)
            .unwrap();
        assert_eq!(inode.size, 0);
        assert_eq!(inode.link_count, 1);

        let (found, kind) = session.lookup(ROOT_INODE, b"foo").unwrap();
        assert_eq!(found, inode.num);
        assert_eq!(kind, EntryKind::File);
    }

    #[test]
    fn enumerate_after_create() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);

        session
            .create(ROOT_INODE, b"foo", file_mode(0o644), 0, 0)
            .unwrap();

        let entries = session.entries(ROOT_INODE, ROOT_INODE, 0).unwrap();
        let names: Vec<&[u8]> = entries.iter().map(|e| e.name.as_slice()).collect();
        assert_eq!(names, vec![b"." as &[u8], b"..", b"foo"]);
    }

    #[test]
    fn create_duplicate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);

        session
            .create(ROOT_INODE, b"foo", file_mode(0o644), 0, 0)
            .unwrap();
        assert!(matches!(
            session.create(ROOT_INODE, b"foo", file_mode(0o644), 0, 0),
            Err(FsError::AlreadyExists)
        ));
    }

    #[test]
    fn long_name_rejected_without_allocating() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);

        let before = session.free_counts();
        let name = [b'x'; 17];
        assert!(matches!(
            session.create(ROOT_INODE, &name, file_mode(0o644), 0, 0),
            Err(FsError::NameTooLong)
        ));
        assert_eq!(session.free_counts(), before);
    }

    #[test]
    fn unlink_then_finalize_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        let before = session.free_counts();

        let inode = session
            .create(ROOT_INODE, b"foo", file_mode(0o644), 0, 0)
            .unwrap();
        assert_eq!(session.free_counts(), (before.0 - 3, before.1 - 1));

        let child = session.unlink(ROOT_INODE, b"foo").unwrap();
        assert_eq!(child, inode.num);
        assert!(matches!(
            session.lookup(ROOT_INODE, b"foo"),
            Err(FsError::NotFound)
        ));
        // entry gone, resources still owned until the final release
        assert_eq!(session.free_counts(), (before.0 - 3, before.1 - 1));

        session.finalize(child).unwrap();
        assert_eq!(session.free_counts(), before);

        // the freed numbers are allocable again
        let reused = session
            .create(ROOT_INODE, b"bar", file_mode(0o644), 0, 0)
            .unwrap();
        assert_eq!(reused.num, inode.num);
    }

    #[test]
    fn finalize_refuses_linked_inode() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);

        let inode = session
            .create(ROOT_INODE, b"foo", file_mode(0o644), 0, 0)
            .unwrap();
        assert!(session.finalize(inode.num).is_err());
    }

    #[test]
    fn create_rolls_back_when_parent_directory_is_full() {
        use crate::structure::directory::ENTRIES_PER_BLOCK;

        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);

        for i in 0..ENTRIES_PER_BLOCK {
            let name = format!("f{}", i);
            session
                .create(ROOT_INODE, name.as_bytes(), file_mode(0o644), 0, 0)
                .unwrap();
        }

        let before = session.free_counts();
        assert!(matches!(
            session.create(ROOT_INODE, b"overflow", file_mode(0o644), 0, 0),
            Err(FsError::OutOfSpace(_))
        ));
        // strict rollback: nothing leaked
        assert_eq!(session.free_counts(), before);
    }

    #[test]
    fn create_rolls_back_when_blocks_run_out() {
        let dir = tempfile::tempdir().unwrap();
        // 10 blocks total: 7 reserved + 3 free, one object fits exactly
        let drive = FileDrive::create(dir.path().join("small.img"), 10 * 1024, 512).unwrap();
        let session = FsSession::format(drive).unwrap();

        session
            .create(ROOT_INODE, b"only", file_mode(0o644), 0, 0)
            .unwrap();
        let before = session.free_counts();
        assert_eq!(before.0, 0);

        assert!(matches!(
            session.create(ROOT_INODE, b"nope", file_mode(0o644), 0, 0),
            Err(FsError::OutOfSpace(_))
        ));
        assert_eq!(session.free_counts(), before);
    }

    #[test]
    fn nested_directories_and_path_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);

        let sub = session
            .create(ROOT_INODE, b"sub", directory_mode(0o755), 0, 0)
            .unwrap();
        let file = session
            .create(sub.num, b"leaf", file_mode(0o644), 0, 0)
            .unwrap();

        assert_eq!(session.resolve("/").unwrap(), ROOT_INODE);
        assert_eq!(session.resolve("/sub").unwrap(), sub.num);
        assert_eq!(session.resolve("/sub/leaf").unwrap(), file.num);
        assert!(matches!(
            session.resolve("/sub/missing"),
            Err(FsError::NotFound)
        ));
        assert!(matches!(
            session.resolve("/sub/leaf/deeper"),
            Err(FsError::NotADirectory)
        ));
    }

    #[test]
    fn lookup_through_file_inode_fails() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);

        let file = session
            .create(ROOT_INODE, b"plain", file_mode(0o644), 0, 0)
            .unwrap();
        assert!(matches!(
            session.lookup(file.num, b"x"),
            Err(FsError::NotADirectory)
        ));
    }

    #[test]
    fn changes_survive_remount() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persist.img");
        let created;
        {
            let drive = FileDrive::create(&path, 256 * 1024, 512).unwrap();
            let session = FsSession::format(drive).unwrap();
            created = session
                .create(ROOT_INODE, b"keep", file_mode(0o600), 7, 7)
                .unwrap()
                .num;
            session.unmount().unwrap();
        }

        let session = FsSession::mount(FileDrive::open(&path, 512).unwrap()).unwrap();
        let (found, _) = session.lookup(ROOT_INODE, b"keep").unwrap();
        assert_eq!(found, created);
        let inode = session.read_inode(found).unwrap();
        assert_eq!(inode.uid, 7);
        assert_eq!(inode.mode, file_mode(0o600));
    }
}
