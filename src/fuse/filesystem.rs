use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyWrite, Request, TimeOrNow,
};
use log::{debug, warn};

use crate::consts::{BLOCK_SIZE, InodePointer};
use crate::driver::DeviceDriver;
use crate::fs::FsSession;
use crate::ops::{FileNode, Object};
use crate::structure::directory::EntryKind;
use crate::structure::inode::Inode;
use crate::util::error::FsError;
use crate::util::mode::{directory_mode, file_mode, ModeBitsHelper};

const TTL: Duration = Duration::from_secs(1);

/// FUSE front end over a mounted session. FUSE inode numbers map one to
/// one onto engine inode numbers (the root is 1 on both sides).
///
/// The kernel's lookup/forget protocol is the external reference count
/// of the design: a forgotten inode whose link count already reached
/// zero gets finalized here.
pub struct FuseDriver<D: DeviceDriver> {
    session: FsSession<D>,
    lookups: HashMap<u64, u64>,
    parents: HashMap<u64, u64>,
}

impl<D: DeviceDriver> FuseDriver<D> {
    pub fn new(session: FsSession<D>) -> FuseDriver<D> {
        FuseDriver { session, lookups: HashMap::new(), parents: HashMap::new() }
    }

    fn attr(&self, inode: &Inode) -> FileAttr {
        FileAttr {
            ino: inode.num as u64,
            size: inode.size as u64,
            blocks: inode.num_blocks as u64,
            atime: secs_to_time(inode.atime),
            mtime: secs_to_time(inode.mtime),
            ctime: secs_to_time(inode.ctime),
            crtime: secs_to_time(inode.ctime),
            kind: if inode.mode.is_directory() {
                FileType::Directory
            } else {
                FileType::RegularFile
            },
            perm: inode.mode.get_permissions(),
            nlink: inode.link_count as u32,
            uid: inode.uid as u32,
            gid: inode.gid as u32,
            rdev: 0,
            blksize: BLOCK_SIZE as u32,
            flags: 0,
        }
    }

    fn remember(&mut self, ino: u64, parent: u64) {
        *self.lookups.entry(ino).or_insert(0) += 1;
        self.parents.insert(ino, parent);
    }

    fn created_entry(&mut self, parent: u64, inode: &Inode) -> FileAttr {
        self.remember(inode.num as u64, parent);
        self.attr(inode)
    }
}

fn secs_to_time(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs as u64)
}

fn time_or_now_to_secs(value: TimeOrNow) -> u32 {
    match value {
        TimeOrNow::SpecificTime(time) => time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0),
        TimeOrNow::Now => crate::structure::inode::now_secs(),
    }
}

impl<D: DeviceDriver> Filesystem for FuseDriver<D> {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self
            .session
            .lookup(parent as InodePointer, name.as_bytes())
            .and_then(|(num, _)| self.session.read_inode(num))
        {
            Ok(inode) => {
                let attr = self.created_entry(parent, &inode);
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        let remaining = match self.lookups.get_mut(&ino) {
            Some(count) => {
                *count = count.saturating_sub(nlookup);
                *count
            }
            None => return,
        };
        if remaining > 0 {
            return;
        }
        self.lookups.remove(&ino);
        self.parents.remove(&ino);

        // last reference dropped; reclaim if the object is fully unlinked
        match self.session.read_inode(ino as InodePointer) {
            Ok(inode) if inode.link_count == 0 => {
                if let Err(e) = self.session.finalize(ino as InodePointer) {
                    warn!("finalize of inode {} failed: {}", ino, e);
                }
            }
            Ok(_) => {}
            Err(FsError::NotFound) => {}
            Err(e) => warn!("forget could not read inode {}: {}", ino, e),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.session.read_inode(ino as InodePointer) {
            Ok(inode) => reply.attr(&TTL, &self.attr(&inode)),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let result = (|| -> crate::util::error::Result<Inode> {
            let mut inode = self.session.read_inode(ino as InodePointer)?;

            if let Some(new_size) = size {
                let mut file = FileNode::from_inode(inode)?;
                // saturate the cast; truncate rejects anything past one block
                file.truncate(&self.session, u32::try_from(new_size).unwrap_or(u32::MAX))?;
                inode = file.inode;
            }
            if let Some(mode) = mode {
                let permissions = (mode & 0o777) as u16;
                inode.mode = if inode.mode.is_directory() {
                    directory_mode(permissions)
                } else {
                    file_mode(permissions)
                };
            }
            if let Some(uid) = uid {
                inode.uid = uid as u16;
            }
            if let Some(gid) = gid {
                inode.gid = gid as u16;
            }
            if let Some(atime) = atime {
                inode.atime = time_or_now_to_secs(atime);
            }
            if let Some(mtime) = mtime {
                inode.mtime = time_or_now_to_secs(mtime);
            }
            self.session.write_inode(&inode)?;
            Ok(inode)
        })();

        match result {
            Ok(inode) => reply.attr(&TTL, &self.attr(&inode)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let permissions = (mode & 0o777) as u16;
        match self.session.create(
            parent as InodePointer,
            name.as_bytes(),
            file_mode(permissions),
            req.uid() as u16,
            req.gid() as u16,
        ) {
            Ok(inode) => {
                let attr = self.created_entry(parent, &inode);
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let permissions = (mode & 0o777) as u16;
        match self.session.create(
            parent as InodePointer,
            name.as_bytes(),
            directory_mode(permissions),
            req.uid() as u16,
            req.gid() as u16,
        ) {
            Ok(inode) => {
                let attr = self.created_entry(parent, &inode);
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let permissions = (mode & 0o777) as u16;
        match self.session.create(
            parent as InodePointer,
            name.as_bytes(),
            file_mode(permissions),
            req.uid() as u16,
            req.gid() as u16,
        ) {
            Ok(inode) => {
                let attr = self.created_entry(parent, &inode);
                reply.created(&TTL, &attr, 0, 0, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.session.unlink(parent as InodePointer, name.as_bytes()) {
            Ok(child) => {
                debug!("unlinked inode {}", child);
                // no live handle means nothing will trigger finalize later
                if !self.lookups.contains_key(&(child as u64)) {
                    if let Err(e) = self.session.finalize(child) {
                        warn!("finalize of inode {} failed: {}", child, e);
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let checked = self
            .session
            .lookup(parent as InodePointer, name.as_bytes())
            .and_then(|(child, kind)| {
                if kind != EntryKind::Directory {
                    return Err(FsError::NotADirectory);
                }
                Ok(child)
            })
            .and_then(|child| Ok((child, self.session.is_directory_empty(child)?)));

        match checked {
            Ok((_, false)) => reply.error(libc::ENOTEMPTY),
            Ok((child, true)) => {
                match self.session.unlink(parent as InodePointer, name.as_bytes()) {
                    Ok(_) => {
                        if !self.lookups.contains_key(&(child as u64)) {
                            if let Err(e) = self.session.finalize(child) {
                                warn!("finalize of inode {} failed: {}", child, e);
                            }
                        }
                        reply.ok();
                    }
                    Err(e) => reply.error(e.errno()),
                }
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let result = match Object::open(&self.session, ino as InodePointer) {
            Ok(Object::File(file)) => file.read(&self.session, offset.max(0) as u32, size),
            Ok(Object::Directory(_)) => Err(FsError::InvalidArgument("read on a directory")),
            Err(e) => Err(e),
        };
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let result = match Object::open(&self.session, ino as InodePointer) {
            Ok(Object::File(mut file)) => {
                file.write(&self.session, offset.max(0) as u32, data)
            }
            Ok(Object::Directory(_)) => Err(FsError::InvalidArgument("write on a directory")),
            Err(e) => Err(e),
        };
        match result {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let parent = self.parents.get(&ino).copied().unwrap_or(ino);
        match self
            .session
            .entries(ino as InodePointer, parent as InodePointer, offset.max(0) as u64)
        {
            Ok(entries) => {
                for entry in entries {
                    let kind = match entry.kind {
                        EntryKind::Directory => FileType::Directory,
                        EntryKind::File => FileType::RegularFile,
                    };
                    let full = reply.add(
                        entry.inode as u64,
                        entry.next_cursor as i64,
                        kind,
                        OsStr::from_bytes(&entry.name),
                    );
                    if full {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.session.sync() {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn destroy(&mut self) {
        if let Err(e) = self.session.sync() {
            warn!("flush at unmount failed: {}", e);
        }
    }
}
