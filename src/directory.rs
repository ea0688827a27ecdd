//! Directory entries: the 128-byte records that describe storages,
//! streams, and the root entry, read and written by [`crate::reader`] and
//! [`crate::writer`].

use crate::constants;
use crate::error::{Diagnostics, Error, Result, Warning};
use chrono::NaiveDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Root,
    Storage,
    Stream,
    /// Unallocated or otherwise malformed slot, kept (not skipped) so
    /// directory indices stay stable; never exposed as a navigable entity.
    Invalid,
}

impl EntityKind {
    pub fn is_container(self) -> bool {
        matches!(self, EntityKind::Root | EntityKind::Storage)
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RawLinks {
    pub left: u32,
    pub right: u32,
    pub child: u32,
}

#[derive(Clone, Debug)]
pub struct Entity {
    pub(crate) index: usize,
    pub(crate) kind: EntityKind,
    pub(crate) name: String,
    pub(crate) clsid: Option<[u8; 16]>,
    pub(crate) created: Option<NaiveDateTime>,
    pub(crate) modified: Option<NaiveDateTime>,
    pub(crate) start_sector: Option<u32>,
    pub(crate) size: u64,
    pub(crate) links: RawLinks,
    pub(crate) children: Vec<usize>,
}

impl Entity {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_stream(&self) -> bool {
        self.kind == EntityKind::Stream
    }

    pub fn is_storage(&self) -> bool {
        matches!(self.kind, EntityKind::Storage | EntityKind::Root)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn clsid(&self) -> Option<[u8; 16]> {
        self.clsid
    }

    pub fn created(&self) -> Option<NaiveDateTime> {
        self.created
    }

    pub fn modified(&self) -> Option<NaiveDateTime> {
        self.modified
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }
}

fn field<const N: usize>(bytes: &[u8], range: std::ops::Range<usize>, name: &'static str) -> Result<[u8; N]> {
    bytes[range]
        .try_into()
        .map_err(|_| Error::Internal(format!("directory entry field {name} has the wrong width")))
}

struct RawEntry {
    name: [u8; 64],
    name_len: u16,
    object_type: u8,
    color: u8,
    left: u32,
    right: u32,
    child: u32,
    clsid: [u8; 16],
    user_flags: u32,
    created: u64,
    modified: u64,
    start_sector: u32,
    size_low: u32,
    size_high: u32,
}

fn parse_raw(bytes: &[u8]) -> Result<RawEntry> {
    Ok(RawEntry {
        name: field(bytes, 0..64, "name")?,
        name_len: u16::from_le_bytes(field(bytes, 64..66, "name_len")?),
        object_type: bytes[66],
        color: bytes[67],
        left: u32::from_le_bytes(field(bytes, 68..72, "left_sibling")?),
        right: u32::from_le_bytes(field(bytes, 72..76, "right_sibling")?),
        child: u32::from_le_bytes(field(bytes, 76..80, "child")?),
        clsid: field(bytes, 80..96, "clsid")?,
        user_flags: u32::from_le_bytes(field(bytes, 96..100, "user_flags")?),
        created: u64::from_le_bytes(field(bytes, 100..108, "created")?),
        modified: u64::from_le_bytes(field(bytes, 108..116, "modified")?),
        start_sector: u32::from_le_bytes(field(bytes, 116..120, "start_sector")?),
        size_low: u32::from_le_bytes(field(bytes, 120..124, "size_low")?),
        size_high: u32::from_le_bytes(field(bytes, 124..128, "size_high")?),
    })
}

const TIMESTAMP_MIN: u64 = 10_000_000;
const TIMESTAMP_MAX: u64 = 999_999_999_999_999_999;

/// Decodes the full 32-unit name field and terminates at the first NUL code
/// unit, wherever it falls — not just at the position `name_len` declares.
/// Falls back to `name_len/2 - 1` units only when no NUL appears at all.
fn decode_name(raw: &RawEntry, index: usize, diagnostics: &Diagnostics) -> Result<String> {
    let declared_units = (raw.name_len as usize) / 2;
    let units: Vec<u16> = raw
        .name
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let name = match units.iter().position(|&u| u == 0) {
        Some(nul_at) => {
            if nul_at != declared_units.saturating_sub(1) {
                diagnostics.warn(Warning::DirName {
                    index,
                    detail: format!("invalid name length ({})", raw.name_len),
                });
            }
            String::from_utf16(&units[..nul_at])?
        }
        None => {
            diagnostics.warn(Warning::DirName {
                index,
                detail: "missing NUL terminator in name".into(),
            });
            let truncated = &units[..declared_units.saturating_sub(1).min(units.len())];
            String::from_utf16_lossy(truncated)
        }
    };
    Ok(name)
}

/// Decodes one 128-byte slot. Malformed fields are warned about and
/// normalized rather than rejected outright, mirroring the tolerant
/// behavior of the source this codec tracks; only a structurally
/// impossible slice length is a hard error.
pub(crate) fn decode_entry(
    bytes: &[u8],
    index: usize,
    major_version: u16,
    sector_size: usize,
    diagnostics: &Diagnostics,
) -> Result<Entity> {
    let raw = parse_raw(bytes)?;

    let mut kind = if index == 0 {
        if raw.object_type != constants::OBJECT_TYPE_ROOT {
            diagnostics.warn(Warning::DirType {
                index,
                detail: format!("root entry has non-root type byte 0x{:02x}", raw.object_type),
            });
        }
        EntityKind::Root
    } else {
        match raw.object_type {
            constants::OBJECT_TYPE_STREAM => EntityKind::Stream,
            constants::OBJECT_TYPE_STORAGE => EntityKind::Storage,
            constants::OBJECT_TYPE_UNALLOCATED => EntityKind::Invalid,
            other => {
                diagnostics.warn(Warning::DirType {
                    index,
                    detail: format!("invalid type byte 0x{other:02x}"),
                });
                EntityKind::Invalid
            }
        }
    };

    if kind == EntityKind::Invalid {
        if raw.name_len != 0 {
            diagnostics.warn(Warning::DirEntry {
                index,
                detail: "unallocated entry has non-zero name length".into(),
            });
        }
        if raw.user_flags != 0 {
            diagnostics.warn(Warning::DirEntry {
                index,
                detail: "unallocated entry has non-zero user flags".into(),
            });
        }
    }

    let name = if kind == EntityKind::Invalid {
        String::new()
    } else {
        decode_name(&raw, index, diagnostics)?
    };

    let has_problematic_timestamps = (raw.created != 0 && !(TIMESTAMP_MIN..=TIMESTAMP_MAX).contains(&raw.created))
        || (raw.modified != 0 && !(TIMESTAMP_MIN..=TIMESTAMP_MAX).contains(&raw.modified));
    let clsid_is_zero = raw.clsid == [0u8; 16];
    if kind != EntityKind::Root && !clsid_is_zero && has_problematic_timestamps {
        diagnostics.warn(Warning::DirEntry {
            index,
            detail: "non-zero class id with an implausible creation/modification timestamp".into(),
        });
    }
    if raw.created != 0 && !(TIMESTAMP_MIN..=TIMESTAMP_MAX).contains(&raw.created) {
        diagnostics.warn(Warning::DirTime {
            index,
            detail: "invalid creation timestamp value".into(),
        });
    }
    if raw.modified != 0 && !(TIMESTAMP_MIN..=TIMESTAMP_MAX).contains(&raw.modified) {
        diagnostics.warn(Warning::DirTime {
            index,
            detail: "invalid modification timestamp value".into(),
        });
    }

    let mut left = raw.left;
    let mut right = raw.right;
    let mut child = raw.child;

    if kind == EntityKind::Root || kind == EntityKind::Invalid {
        if left != constants::NO_STREAM || right != constants::NO_STREAM {
            diagnostics.warn(Warning::DirIndex {
                index,
                detail: "root/unallocated entry must not have siblings".into(),
            });
            left = constants::NO_STREAM;
            right = constants::NO_STREAM;
        }
    }
    if kind == EntityKind::Stream || kind == EntityKind::Invalid {
        if child != constants::NO_STREAM {
            diagnostics.warn(Warning::DirIndex {
                index,
                detail: "stream/unallocated entry must not have a child".into(),
            });
            child = constants::NO_STREAM;
        }
    }

    let clsid = if clsid_is_zero { None } else { Some(raw.clsid) };
    let (clsid, created_raw, modified_raw) = if kind == EntityKind::Invalid {
        (None, 0, 0)
    } else {
        (clsid, raw.created, raw.modified)
    };

    let created = if created_raw == 0 { None } else { epochs::windows_file(created_raw as i64) };
    let modified = if modified_raw == 0 { None } else { epochs::windows_file(modified_raw as i64) };

    let (mut start_sector, mut size_low, mut size_high) = (raw.start_sector, raw.size_low, raw.size_high);
    if matches!(kind, EntityKind::Invalid | EntityKind::Storage) {
        if start_sector != 0 {
            diagnostics.warn(Warning::DirSector {
                index,
                detail: "storage entry must have a zero start sector".into(),
            });
            start_sector = 0;
        }
        if size_low != 0 || size_high != 0 {
            diagnostics.warn(Warning::DirSize {
                index,
                detail: "storage entry must have zero size".into(),
            });
            size_low = 0;
            size_high = 0;
        }
    }

    if major_version == 3 {
        if size_high != 0 {
            diagnostics.warn(Warning::DirSize {
                index,
                detail: "invalid size in a version-3 file (high 32 bits must be zero)".into(),
            });
            size_high = 0;
        }
        if size_low >= 1 << 31 {
            diagnostics.warn(Warning::DirSize {
                index,
                detail: "size too large for a version-3 file".into(),
            });
        }
    }
    let _ = sector_size;

    let size = ((size_high as u64) << 32) | size_low as u64;
    let start_sector = if kind.is_container() && kind != EntityKind::Root {
        None
    } else {
        Some(start_sector)
    };

    if kind == EntityKind::Invalid {
        left = constants::NO_STREAM;
        right = constants::NO_STREAM;
        child = constants::NO_STREAM;
    }

    // normalize `kind` after all validation so warnings above fired against
    // the originally-declared type, matching the source material.
    if index == 0 {
        kind = EntityKind::Root;
    }

    Ok(Entity {
        index,
        kind,
        name,
        clsid,
        created,
        modified,
        start_sector,
        size,
        links: RawLinks { left, right, child },
        children: Vec::new(),
    })
}

/// Serializes one entry for the writer. `left`/`right`/`child` are final
/// directory-array positions assigned by the writer's sibling-tree pass.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_entry(
    name: &str,
    kind: EntityKind,
    size: u64,
    start_sector: u32,
    left: u32,
    right: u32,
    mut child: u32,
    is_black: bool,
    dll_version: u16,
) -> Result<[u8; constants::SIZE_OF_DIRECTORY_ENTRY]> {
    let mut buf = [0u8; constants::SIZE_OF_DIRECTORY_ENTRY];

    let (left, right) = if kind == EntityKind::Root {
        (constants::NO_STREAM, constants::NO_STREAM)
    } else {
        (left, right)
    };

    let mut name_utf16: Vec<u16> = name.encode_utf16().collect();
    if name_utf16.len() > constants::MAX_NAME_UTF16_UNITS {
        return Err(Error::WriteError(format!(
            "name '{name}' exceeds {} UTF-16 code units",
            constants::MAX_NAME_UTF16_UNITS
        )));
    }
    name_utf16.push(0);
    let name_len = (name_utf16.len() * 2) as u16;
    for (i, unit) in name_utf16.iter().enumerate() {
        buf[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    buf[64..66].copy_from_slice(&name_len.to_le_bytes());

    buf[66] = match kind {
        EntityKind::Storage => constants::OBJECT_TYPE_STORAGE,
        EntityKind::Stream => constants::OBJECT_TYPE_STREAM,
        EntityKind::Root => constants::OBJECT_TYPE_ROOT,
        EntityKind::Invalid => return Err(Error::Internal("attempted to write an invalid entity".into())),
    };
    buf[67] = if is_black { constants::NODE_COLOR_BLACK } else { constants::NODE_COLOR_RED };
    buf[68..72].copy_from_slice(&left.to_le_bytes());
    buf[72..76].copy_from_slice(&right.to_le_bytes());

    if kind == EntityKind::Stream {
        child = constants::NO_STREAM;
    }
    buf[76..80].copy_from_slice(&child.to_le_bytes());

    let (created, modified) = if kind == EntityKind::Storage {
        (constants::FIXED_STORAGE_FILETIME, constants::FIXED_STORAGE_FILETIME)
    } else {
        (0, 0)
    };
    buf[100..108].copy_from_slice(&created.to_le_bytes());
    buf[108..116].copy_from_slice(&modified.to_le_bytes());

    if size > 0x8000_0000 && dll_version == 3 {
        return Err(Error::WriteError(format!(
            "stream '{name}' exceeds the 2 GiB limit for a version-3 container"
        )));
    }

    buf[116..120].copy_from_slice(&start_sector.to_le_bytes());
    buf[120..124].copy_from_slice(&((size & 0xFFFF_FFFF) as u32).to_le_bytes());
    buf[124..128].copy_from_slice(&((size >> 32) as u32).to_le_bytes());

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_bytes(name: &str, object_type: u8, color: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 128];
        let mut units: Vec<u16> = name.encode_utf16().collect();
        units.push(0);
        for (i, u) in units.iter().enumerate() {
            buf[i * 2..i * 2 + 2].copy_from_slice(&u.to_le_bytes());
        }
        buf[64..66].copy_from_slice(&((units.len() as u16) * 2).to_le_bytes());
        buf[66] = object_type;
        buf[67] = color;
        buf[68..72].copy_from_slice(&constants::NO_STREAM.to_le_bytes());
        buf[72..76].copy_from_slice(&constants::NO_STREAM.to_le_bytes());
        buf[76..80].copy_from_slice(&constants::NO_STREAM.to_le_bytes());
        buf
    }

    #[test]
    fn decodes_a_well_formed_root_entry() {
        let bytes = entry_bytes("Root Entry", constants::OBJECT_TYPE_ROOT, constants::NODE_COLOR_BLACK);
        let diagnostics = Diagnostics::default_sink();
        let entity = decode_entry(&bytes, 0, 3, 512, &diagnostics).unwrap();
        assert_eq!(entity.name, "Root Entry");
        assert_eq!(entity.kind, EntityKind::Root);
        assert!(diagnostics.warnings().is_empty());
    }

    #[test]
    fn unallocated_slot_is_kept_as_invalid_not_skipped() {
        let bytes = vec![0u8; 128];
        let diagnostics = Diagnostics::default_sink();
        let entity = decode_entry(&bytes, 5, 3, 512, &diagnostics).unwrap();
        assert_eq!(entity.kind, EntityKind::Invalid);
    }

    #[test]
    fn write_then_decode_round_trips_a_stream_entry() {
        let encoded = write_entry("Summary", EntityKind::Stream, 42, 7, 1, 2, constants::NO_STREAM, true, 3).unwrap();
        let diagnostics = Diagnostics::default_sink();
        let entity = decode_entry(&encoded, 3, 3, 512, &diagnostics).unwrap();
        assert_eq!(entity.name, "Summary");
        assert_eq!(entity.kind, EntityKind::Stream);
        assert_eq!(entity.size, 42);
    }

    #[test]
    fn overlong_name_is_a_hard_write_error() {
        let name = "x".repeat(40);
        let result = write_entry(&name, EntityKind::Stream, 0, 0, constants::NO_STREAM, constants::NO_STREAM, constants::NO_STREAM, true, 3);
        assert!(matches!(result, Err(Error::WriteError(_))));
    }

    #[test]
    fn truncates_at_an_embedded_nul_before_the_declared_length() {
        // "Leaf" followed by a stray embedded NUL, then garbage that would
        // otherwise be decoded as part of the name if we only looked at the
        // last declared unit instead of scanning for the first NUL.
        let mut bytes = entry_bytes("Leafxxxx", constants::OBJECT_TYPE_STREAM, constants::NODE_COLOR_RED);
        let embedded_nul_unit = 4usize; // right after "Leaf"
        bytes[embedded_nul_unit * 2..embedded_nul_unit * 2 + 2].copy_from_slice(&0u16.to_le_bytes());
        let diagnostics = Diagnostics::default_sink();
        let entity = decode_entry(&bytes, 1, 3, 512, &diagnostics).unwrap();
        assert_eq!(entity.name, "Leaf");
        assert_eq!(diagnostics.warnings().len(), 1);
    }

    #[test]
    fn falls_back_to_declared_length_when_no_nul_is_present() {
        let mut bytes = vec![0u8; 128];
        // fill the whole 32-unit name field with non-zero code units so no
        // NUL terminator exists anywhere in it.
        let units: Vec<u16> = "abcdefghijklmnopqrstuvwxyzABCDEF".encode_utf16().collect();
        assert_eq!(units.len(), 32);
        for (i, u) in units.iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&u.to_le_bytes());
        }
        // name_len claims 5 code units ("abcd" + terminator).
        bytes[64..66].copy_from_slice(&10u16.to_le_bytes());
        bytes[66] = constants::OBJECT_TYPE_STREAM;
        bytes[68..72].copy_from_slice(&constants::NO_STREAM.to_le_bytes());
        bytes[72..76].copy_from_slice(&constants::NO_STREAM.to_le_bytes());
        bytes[76..80].copy_from_slice(&constants::NO_STREAM.to_le_bytes());
        let diagnostics = Diagnostics::default_sink();
        let entity = decode_entry(&bytes, 2, 3, 512, &diagnostics).unwrap();
        assert_eq!(entity.name, "abcd");
        assert_eq!(diagnostics.warnings().len(), 1);
    }
}
