use std::marker::Unpin;
use tokio::io::AsyncRead;

pub trait Readable: Unpin + AsyncRead {}
impl Readable for tokio::fs::File {}
impl Readable for std::io::Cursor<Vec<u8>> {}
impl Readable for std::io::Cursor<&[u8]> {}

pub const HEADER_LENGTH: usize = 512;
pub const MAGIC_BYTES: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
pub const BYTE_ORDER_MARK: [u8; 2] = [0xFE, 0xFF];
pub const DEFAULT_MINOR_VERSION: [u8; 2] = [0x3E, 0x00];

pub const MAJOR_VERSION_3: u16 = 3;
pub const MAJOR_VERSION_4: u16 = 4;

pub const DEFAULT_SECTOR_SIZE: usize = 512;
pub const DEFAULT_MINI_SECTOR_SIZE: usize = 64;
pub const DEFAULT_MINI_CUTOFF: usize = 4096;

pub const FREE_SECTOR: u32 = 0xFFFFFFFF;
pub const END_OF_CHAIN: u32 = 0xFFFFFFFE;
pub const FAT_SECTOR: u32 = 0xFFFFFFFD;
pub const DIF_SECTOR: u32 = 0xFFFFFFFC;
pub const MAX_REG_SID: u32 = 0xFFFFFFFA;
pub const NO_STREAM: u32 = 0xFFFFFFFF;

pub const SIZE_OF_DIRECTORY_ENTRY: usize = 128;
pub const DIFAT_INLINE_COUNT: usize = 109;
pub const MAX_NAME_UTF16_UNITS: usize = 31;

pub const OBJECT_TYPE_UNALLOCATED: u8 = 0x00;
pub const OBJECT_TYPE_STORAGE: u8 = 0x01;
pub const OBJECT_TYPE_STREAM: u8 = 0x02;
pub const OBJECT_TYPE_ROOT: u8 = 0x05;

pub const NODE_COLOR_RED: u8 = 0x00;
pub const NODE_COLOR_BLACK: u8 = 0x01;

/// Fixed non-zero FILETIME stamped onto storage entries when writing, for
/// bit-reproducible output across runs.
pub const FIXED_STORAGE_FILETIME: u64 = 0x01CEC6FD605BCC00;

/// Upper bound on how many entries a FAT/DIFAT are allowed to carry before
/// we treat the container as corrupt rather than merely large.
pub const MAX_PLAUSIBLE_SECTOR_COUNT: usize = 0x00FF_FFFF;
