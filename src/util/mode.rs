pub type ModeBits = u16;

const PERMISSIONS_MASK: u32 = 0o777;
const TYPE_MASK: ModeBits = 0o170000;
const IS_DIR_BITS: ModeBits = 0o040000;
const IS_FILE_BITS: ModeBits = 0o100000;

pub trait ModeBitsHelper {
    fn get_permissions(&self) -> u16;
    fn is_directory(&self) -> bool;
    fn is_file(&self) -> bool;
}

impl ModeBitsHelper for ModeBits {
    fn get_permissions(&self) -> u16 {
        (*self as u32 & PERMISSIONS_MASK) as u16
    }

    fn is_directory(&self) -> bool {
        (self & TYPE_MASK) == IS_DIR_BITS
    }

    fn is_file(&self) -> bool {
        (self & TYPE_MASK) == IS_FILE_BITS
    }
}

pub fn directory_mode(permissions: u16) -> ModeBits {
    IS_DIR_BITS | (permissions & PERMISSIONS_MASK as u16)
}

pub fn file_mode(permissions: u16) -> ModeBits {
    IS_FILE_BITS | (permissions & PERMISSIONS_MASK as u16)
}
