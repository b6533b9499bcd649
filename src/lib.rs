pub mod consts;
pub mod driver;
pub mod fs;
pub mod fuse;
pub mod io;
pub mod ops;
pub mod structure;
pub mod util;

pub use driver::{DeviceDriver, FileDrive};
pub use fs::FsSession;
pub use util::error::{FsError, Result};
