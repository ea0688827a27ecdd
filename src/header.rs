//! Container header: the fixed 512-byte preamble plus (for version 4) its
//! zero-padded remainder, and the inline 109-entry DIFAT head.
//!
//! <https://winprotocoldoc.blob.core.windows.net/productionwindowsarchives/MS-CFB/%5bMS-CFB%5d.pdf>

use crate::constants::{self, Readable};
use crate::error::{Diagnostics, Error, Result, Warning};
use derivative::Derivative;
use std::array::TryFromSliceError;
use tokio::io::AsyncReadExt;

#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Header {
    pub major_version: u16,
    pub minor_version: u16,
    pub sector_size: u32,
    pub mini_sector_size: u32,
    pub directory_sectors_len: u32,
    pub mini_cutoff: u32,
    pub fat_sector_count: u32,
    pub first_directory_sector: u32,
    pub first_minifat_sector: u32,
    pub minifat_sector_count: u32,
    pub first_difat_sector: u32,
    pub difat_sector_count: u32,
    #[derivative(Debug = "ignore")]
    pub difat_head: Vec<u32>,
}

fn field<const N: usize>(bytes: &[u8], range: std::ops::Range<usize>, name: &'static str) -> Result<[u8; N]> {
    bytes[range]
        .try_into()
        .map_err(|err: TryFromSliceError| Error::HeaderError {
            field: name,
            detail: err.to_string(),
        })
}

/// Parses a 512-byte header buffer, relaxing the stricter teacher checks
/// (exact minor-version equality, exact mini-cutoff equality) to warnings
/// since real-world containers occasionally deviate from the common case
/// without being otherwise malformed.
pub fn parse_header(bytes: &[u8], diagnostics: &Diagnostics) -> Result<Header> {
    if bytes.len() < constants::HEADER_LENGTH {
        return Err(Error::HeaderError {
            field: "header",
            detail: format!(
                "expected at least {} bytes, got {}",
                constants::HEADER_LENGTH,
                bytes.len()
            ),
        });
    }

    let signature: [u8; 8] = field(bytes, 0..8, "signature")?;
    if signature != constants::MAGIC_BYTES {
        return Err(Error::InvalidMagic);
    }

    let minor_version = u16::from_le_bytes(field(bytes, 24..26, "minor_version")?);
    if minor_version != u16::from_le_bytes(constants::DEFAULT_MINOR_VERSION) {
        diagnostics.warn(Warning::HeaderVersion { minor: minor_version });
    }

    let declared_major_version = u16::from_le_bytes(field(bytes, 26..28, "major_version")?);

    let bom: [u8; 2] = field(bytes, 28..30, "byte_order_mark")?;
    if bom != constants::BYTE_ORDER_MARK {
        return Err(Error::InvalidBom);
    }

    let sector_shift = u16::from_le_bytes(field(bytes, 30..32, "sector_shift")?);
    if !matches!(sector_shift, 9 | 12) {
        return Err(Error::HeaderError {
            field: "sector_shift",
            detail: format!("sector shift must be 9 or 12, got {sector_shift}"),
        });
    }
    let sector_size = 1u32 << sector_shift;

    let mini_sector_shift = u16::from_le_bytes(field(bytes, 32..34, "mini_sector_shift")?);
    if mini_sector_shift != 6 {
        return Err(Error::HeaderError {
            field: "mini_sector_shift",
            detail: format!("mini sector shift must be 6, got {mini_sector_shift}"),
        });
    }
    let mini_sector_size = 1u32 << mini_sector_shift;

    // An unknown dll_version does not reject the file — fall back to
    // whatever major version the (already-validated) sector shift implies.
    let major_version = if declared_major_version == constants::MAJOR_VERSION_3
        || declared_major_version == constants::MAJOR_VERSION_4
    {
        declared_major_version
    } else {
        diagnostics.warn(Warning::HeaderDllVersion { value: declared_major_version });
        if sector_shift == 9 { constants::MAJOR_VERSION_3 } else { constants::MAJOR_VERSION_4 }
    };

    let expected_sector_size = if major_version == constants::MAJOR_VERSION_3 { 512 } else { 4096 };
    if sector_size != expected_sector_size {
        diagnostics.warn(Warning::HeaderSectorSize { declared: sector_size });
    }

    let directory_sectors_len = u32::from_le_bytes(field(bytes, 40..44, "directory_sectors_len")?);

    let fat_sector_count = u32::from_le_bytes(field(bytes, 44..48, "fat_sector_count")?);
    let first_directory_sector = u32::from_le_bytes(field(bytes, 48..52, "first_directory_sector")?);

    let mini_cutoff = u32::from_le_bytes(field(bytes, 56..60, "mini_cutoff")?);
    if mini_cutoff != constants::DEFAULT_MINI_CUTOFF as u32 {
        diagnostics.warn(Warning::HeaderMiniCutoff { value: mini_cutoff });
    }

    let first_minifat_sector = u32::from_le_bytes(field(bytes, 60..64, "first_minifat_sector")?);
    let minifat_sector_count = u32::from_le_bytes(field(bytes, 64..68, "minifat_sector_count")?);
    let first_difat_sector = u32::from_le_bytes(field(bytes, 68..72, "first_difat_sector")?);
    let difat_sector_count = u32::from_le_bytes(field(bytes, 72..76, "difat_sector_count")?);

    let difat_head = bytes[76..512]
        .chunks_exact(4)
        .map(|quad| u32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
        .collect::<Vec<_>>();

    Ok(Header {
        major_version,
        minor_version,
        sector_size,
        mini_sector_size,
        directory_sectors_len,
        mini_cutoff,
        fat_sector_count,
        first_directory_sector,
        first_minifat_sector,
        minifat_sector_count,
        first_difat_sector,
        difat_sector_count,
        difat_head,
    })
}

pub async fn read_header<R: Readable>(read: &mut R, diagnostics: &Diagnostics) -> Result<Header> {
    let mut buf = [0u8; constants::HEADER_LENGTH];
    let n = read.read(&mut buf).await?;
    if n != constants::HEADER_LENGTH {
        return Err(Error::HeaderError {
            field: "header",
            detail: format!("expected {} bytes, got {n}", constants::HEADER_LENGTH),
        });
    }
    parse_header(&buf, diagnostics)
}

/// Parameters needed to emit a header sector; produced by the writer's
/// layout planner once sizing has converged.
pub struct HeaderWriteParams<'a> {
    pub sector_size: u32,
    pub mini_sector_size: u32,
    pub mini_cutoff: u32,
    pub dll_version: u16,
    pub fat_sector_count: u32,
    pub dir_start_sector: u32,
    pub minifat_start_sector: u32,
    pub minifat_sector_count: u32,
    pub difat_first_sector: u32,
    pub difat_sector_count: u32,
    pub fat_sector_refs: &'a [u32],
}

pub fn write_header(params: &HeaderWriteParams) -> Vec<u8> {
    let mut out = Vec::with_capacity(params.sector_size as usize);
    out.extend_from_slice(&constants::MAGIC_BYTES);
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(&constants::DEFAULT_MINOR_VERSION);
    out.extend_from_slice(&params.dll_version.to_le_bytes());
    out.extend_from_slice(&constants::BYTE_ORDER_MARK);
    out.extend_from_slice(&(params.sector_size.trailing_zeros() as u16).to_le_bytes());
    out.extend_from_slice(&(params.mini_sector_size.trailing_zeros() as u16).to_le_bytes());
    out.extend_from_slice(&[0u8; 6]);
    out.extend_from_slice(&0u32.to_le_bytes()); // directory sector count: fixed 0 for v3 layout
    out.extend_from_slice(&params.fat_sector_count.to_le_bytes());
    out.extend_from_slice(&params.dir_start_sector.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // transaction signature, unused
    out.extend_from_slice(&params.mini_cutoff.to_le_bytes());
    out.extend_from_slice(&params.minifat_start_sector.to_le_bytes());
    out.extend_from_slice(&params.minifat_sector_count.to_le_bytes());
    out.extend_from_slice(&params.difat_first_sector.to_le_bytes());
    out.extend_from_slice(&params.difat_sector_count.to_le_bytes());

    let mut difat_head: Vec<u32> = params
        .fat_sector_refs
        .iter()
        .copied()
        .take(constants::DIFAT_INLINE_COUNT)
        .collect();
    difat_head.resize(constants::DIFAT_INLINE_COUNT, constants::FREE_SECTOR);
    for v in difat_head {
        out.extend_from_slice(&v.to_le_bytes());
    }

    out.resize(params.sector_size as usize, 0);
    out
}
