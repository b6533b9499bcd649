use crate::consts::InodePointer;
use crate::driver::DeviceDriver;
use crate::fs::FsSession;
use crate::structure::directory::{DirEntry, EntryKind};
use crate::structure::inode::Inode;
use crate::util::error::{FsError, Result};
use crate::util::mode::{directory_mode, file_mode, ModeBitsHelper};

use super::Node;

/// A directory object. All mutation funnels through the session so the
/// allocation rollback and link accounting stay in one place.
pub struct DirNode {
    pub inode: Inode,
}

impl DirNode {
    pub fn from_inode(inode: Inode) -> Result<DirNode> {
        if !inode.mode.is_directory() {
            return Err(FsError::NotADirectory);
        }
        Ok(DirNode { inode })
    }

    pub fn lookup<D: DeviceDriver>(
        &self,
        session: &FsSession<D>,
        name: &[u8],
    ) -> Result<(InodePointer, EntryKind)> {
        session.lookup(self.inode.num, name)
    }

    pub fn entries<D: DeviceDriver>(
        &self,
        session: &FsSession<D>,
        parent_num: InodePointer,
        cursor: u64,
    ) -> Result<Vec<DirEntry>> {
        session.entries(self.inode.num, parent_num, cursor)
    }

    pub fn create_file<D: DeviceDriver>(
        &mut self,
        session: &FsSession<D>,
        name: &[u8],
        permissions: u16,
        uid: u16,
        gid: u16,
    ) -> Result<Inode> {
        session.create(self.inode.num, name, file_mode(permissions), uid, gid)
    }

    pub fn create_directory<D: DeviceDriver>(
        &mut self,
        session: &FsSession<D>,
        name: &[u8],
        permissions: u16,
        uid: u16,
        gid: u16,
    ) -> Result<Inode> {
        session.create(self.inode.num, name, directory_mode(permissions), uid, gid)
    }

    pub fn unlink<D: DeviceDriver>(
        &mut self,
        session: &FsSession<D>,
        name: &[u8],
    ) -> Result<InodePointer> {
        session.unlink(self.inode.num, name)
    }

    pub fn is_empty<D: DeviceDriver>(&self, session: &FsSession<D>) -> Result<bool> {
        session.is_directory_empty(self.inode.num)
    }
}

impl Node for DirNode {
    fn inode(&self) -> &Inode {
        &self.inode
    }
}
