use crate::consts::InodePointer;
use crate::driver::DeviceDriver;
use crate::fs::FsSession;
use crate::structure::inode::Inode;
use crate::util::error::Result;
use crate::util::mode::ModeBitsHelper;

pub mod directory;
pub mod file;

pub use directory::DirNode;
pub use file::FileNode;

/// Common surface of an opened object, whatever its kind.
pub trait Node {
    fn inode(&self) -> &Inode;
}

/// An opened object, dispatched on the inode's type bits. The two
/// variants carry the operations that make sense for their kind; the
/// host adapter matches on this instead of re-checking mode bits.
pub enum Object {
    File(FileNode),
    Directory(DirNode),
}

impl Object {
    pub fn open<D: DeviceDriver>(
        session: &FsSession<D>,
        inode_num: InodePointer,
    ) -> Result<Object> {
        let inode = session.read_inode(inode_num)?;
        if inode.mode.is_directory() {
            Ok(Object::Directory(DirNode::from_inode(inode)?))
        } else {
            Ok(Object::File(FileNode::from_inode(inode)?))
        }
    }

    pub fn as_node(&self) -> &dyn Node {
        match self {
            Object::File(file) => file,
            Object::Directory(dir) => dir,
        }
    }
}
