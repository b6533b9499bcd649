use std::io;

use libc::c_int;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("no space left: {0}")]
    OutOfSpace(&'static str),
    /// Bitmap and free counter disagree. Fatal, never retried.
    #[error("consistency violation: {0}")]
    Consistency(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("name exceeds {max} bytes", max = crate::consts::MAX_NAME_LEN)]
    NameTooLong,
    #[error("not found")]
    NotFound,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("{kind} {num} is already free")]
    DoubleFree { kind: &'static str, num: u32 },
    #[error("{kind} {num} is reserved")]
    Protected { kind: &'static str, num: u32 },
    #[error("bad superblock magic {0:#x}")]
    BadMagic(u32),
}

impl FsError {
    /// errno for the FUSE reply. Exhaustive on purpose, so a new variant
    /// cannot ship without one.
    pub fn errno(&self) -> c_int {
        match self {
            FsError::OutOfSpace(_) => libc::ENOSPC,
            FsError::Consistency(_) => libc::EIO,
            FsError::Io(_) => libc::EIO,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::DoubleFree { .. } => libc::EINVAL,
            FsError::Protected { .. } => libc::EPERM,
            FsError::BadMagic(_) => libc::EINVAL,
        }
    }
}
