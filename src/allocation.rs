//! Builds the three allocation tables a container carries: the DIFAT
//! (locates the FAT's own sectors), the FAT (locates every other
//! sector's chain), and the mini-FAT (locates mini-stream chains within
//! the root entry's own data).

use crate::chain::{collect_chain, ChainWalk};
use crate::constants::{DIFAT_INLINE_COUNT, END_OF_CHAIN, FAT_SECTOR, FREE_SECTOR};
use crate::error::{Diagnostics, Error, Result, Warning};
use crate::header::Header;
use crate::sector::SectorStore;

/// Reads the full DIFAT: the 109 inline entries from the header plus
/// any overflow sectors, each holding `entries_per_sector - 1` FAT
/// sector references and a trailing pointer to the next DIFAT sector.
pub(crate) fn read_difat(store: &SectorStore, header: &Header) -> Result<Vec<u32>> {
    let mut difat: Vec<u32> = header
        .difat_head
        .iter()
        .copied()
        .filter(|&v| v != FREE_SECTOR)
        .collect();

    if header.difat_sector_count == 0 {
        return Ok(difat);
    }

    let entries_per_sector = store.sector_size() / 4;
    if entries_per_sector < 2 {
        return Err(Error::Internal("sector too small to hold a DIFAT entry".into()));
    }
    let refs_per_sector = entries_per_sector - 1;

    let mut current = header.first_difat_sector;
    let mut visited = Vec::new();
    let mut seen_count = 0usize;

    loop {
        if current == END_OF_CHAIN || current == FREE_SECTOR {
            break;
        }
        if visited.contains(&current) {
            return Err(Error::MasterLoop);
        }
        visited.push(current);
        seen_count += 1;
        if seen_count > header.difat_sector_count as usize + 1 {
            return Err(Error::MasterLoop);
        }

        let Some(data) = store.sector(current) else {
            break;
        };
        for chunk in data[..refs_per_sector * 4].chunks_exact(4) {
            let value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if value != FREE_SECTOR {
                difat.push(value);
            }
        }
        let tail = &data[refs_per_sector * 4..refs_per_sector * 4 + 4];
        current = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    }

    Ok(difat)
}

/// Builds the FAT by concatenating every sector the DIFAT points at, then
/// sanity-checks that each such sector marks itself FATSECT within the
/// assembled table (spec §4.F: warn, don't fail, on a mismatch).
pub(crate) fn read_fat(store: &SectorStore, difat: &[u32], diagnostics: &Diagnostics) -> Result<Vec<u32>> {
    if difat.len() > crate::constants::MAX_PLAUSIBLE_SECTOR_COUNT {
        return Err(Error::LargeNormalFat(difat.len()));
    }
    let mut fat = Vec::with_capacity(difat.len() * store.sector_size() / 4);
    for &sector in difat {
        let Some(data) = store.sector(sector) else {
            continue;
        };
        for chunk in data.chunks_exact(4) {
            fat.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
    }
    for &sector in difat {
        if fat.get(sector as usize) != Some(&FAT_SECTOR) {
            diagnostics.warn(Warning::MasterSector { sector });
        }
    }
    Ok(fat)
}

/// Builds the mini-FAT by walking its own chain through the normal FAT.
pub(crate) fn read_minifat(store: &SectorStore, fat: &[u32], header: &Header) -> Result<Vec<u32>> {
    if header.minifat_sector_count == 0 || header.first_minifat_sector == END_OF_CHAIN {
        return Ok(Vec::new());
    }
    let sectors = collect_chain(fat, header.first_minifat_sector, Error::NormalLoop)?;
    if sectors.len() > crate::constants::MAX_PLAUSIBLE_SECTOR_COUNT {
        return Err(Error::LargeMiniFat(sectors.len()));
    }
    let mut minifat = Vec::with_capacity(sectors.len() * store.sector_size() / 4);
    for sector in sectors {
        let Some(data) = store.sector(sector) else {
            continue;
        };
        for chunk in data.chunks_exact(4) {
            minifat.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
    }
    Ok(minifat)
}

/// A FAT-linked chain of directory sectors, used while decoding entries.
pub(crate) fn directory_sectors(fat: &[u32], first: u32) -> Result<Vec<u32>> {
    ChainWalk::new(fat, first, Error::NormalLoop).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HeaderWriteParams;

    fn store_of(sectors: Vec<Vec<u8>>, sector_size: usize) -> SectorStore {
        let mut bytes = Vec::new();
        for mut s in sectors {
            s.resize(sector_size, 0);
            bytes.extend_from_slice(&s);
        }
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(SectorStore::read_all(std::io::Cursor::new(bytes), sector_size)).unwrap()
    }

    #[test]
    fn reads_inline_difat_head_only() {
        let store = store_of(vec![vec![0u8; 512]], 512);
        let params = HeaderWriteParams {
            sector_size: 512,
            mini_sector_size: 64,
            mini_cutoff: 4096,
            dll_version: 3,
            fat_sector_count: 2,
            dir_start_sector: 0,
            minifat_start_sector: END_OF_CHAIN,
            minifat_sector_count: 0,
            difat_first_sector: END_OF_CHAIN,
            difat_sector_count: 0,
            fat_sector_refs: &[0, 1],
        };
        let bytes = crate::header::write_header(&params);
        let diagnostics = crate::error::Diagnostics::default_sink();
        let header = crate::header::parse_header(&bytes, &diagnostics).unwrap();
        let difat = read_difat(&store, &header).unwrap();
        assert_eq!(difat, vec![0, 1]);
    }

    #[test]
    fn builds_fat_from_difat_sectors() {
        // sector 0 is itself a FAT sector, so it self-marks FATSECT at its
        // own index; index 1 is an ordinary chain entry.
        let mut fat_sector = vec![FAT_SECTOR.to_le_bytes().to_vec(), END_OF_CHAIN.to_le_bytes().to_vec()].concat();
        fat_sector.resize(512, 0);
        let store = store_of(vec![fat_sector], 512);
        let diagnostics = crate::error::Diagnostics::default_sink();
        let fat = read_fat(&store, &[0], &diagnostics).unwrap();
        assert_eq!(fat[0], FAT_SECTOR);
        assert_eq!(fat[1], END_OF_CHAIN);
        assert!(diagnostics.warnings().is_empty());
    }

    #[test]
    fn warns_when_a_difat_sector_is_not_self_marked_fatsect() {
        let mut fat_sector = vec![1u32.to_le_bytes().to_vec(), END_OF_CHAIN.to_le_bytes().to_vec()].concat();
        fat_sector.resize(512, 0);
        let store = store_of(vec![fat_sector], 512);
        let diagnostics = crate::error::Diagnostics::default_sink();
        let fat = read_fat(&store, &[0], &diagnostics).unwrap();
        assert_eq!(fat[0], 1);
        assert_eq!(diagnostics.warnings().len(), 1);
    }
}
