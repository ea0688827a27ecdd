//! Layout planner: accumulates storages and streams in memory, then lays
//! out a complete container (directory, data, FAT, mini-FAT, DIFAT,
//! header) in one pass.
//!
//! Ported from `writer.py`'s `CompoundFileWriter`: a sizing fixpoint
//! (`finalize_structure`) converges the FAT/DIFAT sector counts against
//! the rest of the layout before any physical sector is assigned, since
//! the FAT's own size depends on the total sector count it must
//! describe.

use crate::constants::{
    self, DIFAT_INLINE_COUNT, END_OF_CHAIN, FAT_SECTOR, DIF_SECTOR, FREE_SECTOR, MAX_NAME_UTF16_UNITS, NO_STREAM,
};
use crate::directory::{write_entry, EntityKind};
use crate::error::{Error, Result};
use crate::header::{write_header, HeaderWriteParams};
use crate::tree::RbTree;
#[cfg(feature = "blocking")]
use std::io::Write as _;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EntityId(u32);

impl EntityId {
    pub const ROOT: EntityId = EntityId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

struct WriteEntity {
    name: String,
    kind: EntityKind,
    data: Vec<u8>,
    children: Vec<u32>,
    start_sector: u32,
    sector_chain: Vec<u32>,
    mini_sector_chain: Vec<u32>,
}

pub struct WriterOptions {
    pub sector_size: u32,
    pub mini_sector_size: u32,
    pub mini_cutoff: u32,
    pub dll_version: u16,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            sector_size: constants::DEFAULT_SECTOR_SIZE as u32,
            mini_sector_size: constants::DEFAULT_MINI_SECTOR_SIZE as u32,
            mini_cutoff: constants::DEFAULT_MINI_CUTOFF as u32,
            dll_version: constants::MAJOR_VERSION_3,
        }
    }
}

pub struct Writer {
    options: WriterOptions,
    entities: Vec<WriteEntity>,
}

impl Writer {
    pub fn new(options: WriterOptions) -> Self {
        let root = WriteEntity {
            name: "Root Entry".to_string(),
            kind: EntityKind::Root,
            data: Vec::new(),
            children: Vec::new(),
            start_sector: END_OF_CHAIN,
            sector_chain: Vec::new(),
            mini_sector_chain: Vec::new(),
        };
        Writer {
            options,
            entities: vec![root],
        }
    }

    fn validate_name(&self, parent: EntityId, name: &str) -> Result<()> {
        if name.encode_utf16().count() > MAX_NAME_UTF16_UNITS {
            return Err(Error::WriteError(format!(
                "name '{name}' exceeds {MAX_NAME_UTF16_UNITS} UTF-16 code units"
            )));
        }
        let parent_entity = &self.entities[parent.index()];
        if parent_entity.kind != EntityKind::Root && parent_entity.kind != EntityKind::Storage {
            return Err(Error::WriteError(format!("'{}' is not a storage", parent_entity.name)));
        }
        for &child in &parent_entity.children {
            if crate::tree::names_equal_ignore_case(&self.entities[child as usize].name, name) {
                return Err(Error::WriteError(format!("sibling named '{name}' already exists")));
            }
        }
        Ok(())
    }

    pub fn create_storage(&mut self, parent: EntityId, name: &str) -> Result<EntityId> {
        self.validate_name(parent, name)?;
        let id = EntityId(self.entities.len() as u32);
        self.entities.push(WriteEntity {
            name: name.to_string(),
            kind: EntityKind::Storage,
            data: Vec::new(),
            children: Vec::new(),
            start_sector: END_OF_CHAIN,
            sector_chain: Vec::new(),
            mini_sector_chain: Vec::new(),
        });
        self.entities[parent.index()].children.push(id.0);
        Ok(id)
    }

    pub fn create_stream(&mut self, parent: EntityId, name: &str, data: Vec<u8>) -> Result<EntityId> {
        self.validate_name(parent, name)?;
        let id = EntityId(self.entities.len() as u32);
        self.entities.push(WriteEntity {
            name: name.to_string(),
            kind: EntityKind::Stream,
            data,
            children: Vec::new(),
            start_sector: END_OF_CHAIN,
            sector_chain: Vec::new(),
            mini_sector_chain: Vec::new(),
        });
        self.entities[parent.index()].children.push(id.0);
        Ok(id)
    }

    /// Converges FAT/DIFAT sector counts against the rest of the layout,
    /// then assigns every logical sector its final index.
    fn finalize_structure(&mut self) -> Layout {
        let sector_size = self.options.sector_size as usize;
        let mini_sector_size = self.options.mini_sector_size as usize;
        let cutoff = self.options.mini_cutoff;
        let fat_entries_per_sector = sector_size / 4;
        let difat_refs_per_sector = fat_entries_per_sector - 1;

        let stream_count = self.entities.iter().filter(|e| e.kind == EntityKind::Stream).count();
        let storage_count = self.entities.len() - stream_count;

        let mut fat_sectors_needed = 0usize;
        let mut difat_sectors_needed = 0usize;

        let (normal_size_total, mini_sectors_total) = {
            let normal_total: u64 = self.entities.iter().filter(|e| entity_is_normal(e, cutoff)).map(|e| e.data.len() as u64).sum();
            let mini_total: usize = self
                .entities
                .iter()
                .filter(|e| entity_is_mini(e, cutoff))
                .map(|e| (e.data.len() + mini_sector_size - 1) / mini_sector_size)
                .sum();
            (normal_total, mini_total)
        };

        loop {
            let normal_sectors_needed = ((normal_size_total as usize) + sector_size - 1) / sector_size.max(1);
            let mini_storage_size = mini_sectors_total * mini_sector_size;
            let mini_storage_sectors_needed = if mini_storage_size > 0 { (mini_storage_size + sector_size - 1) / sector_size } else { 0 };
            let minifat_sectors_needed = if mini_sectors_total > 0 { (mini_sectors_total * 4 + sector_size - 1) / sector_size } else { 0 };

            let data_sectors_needed = normal_sectors_needed + mini_storage_sectors_needed;
            let total_entities = stream_count + storage_count;
            let dir_sectors_needed = (total_entities * constants::SIZE_OF_DIRECTORY_ENTRY + sector_size - 1) / sector_size;

            let total_logical_sectors = dir_sectors_needed + data_sectors_needed + minifat_sectors_needed + fat_sectors_needed + difat_sectors_needed;
            let new_fat_sectors = (total_logical_sectors + fat_entries_per_sector - 1) / fat_entries_per_sector;

            let new_difat_sectors = if new_fat_sectors > DIFAT_INLINE_COUNT {
                let additional = new_fat_sectors - DIFAT_INLINE_COUNT;
                (additional + difat_refs_per_sector - 1) / difat_refs_per_sector
            } else {
                0
            };

            if new_fat_sectors == fat_sectors_needed && new_difat_sectors == difat_sectors_needed {
                break;
            }
            fat_sectors_needed = new_fat_sectors;
            difat_sectors_needed = new_difat_sectors;
        }

        let mini_storage_size = mini_sectors_total * mini_sector_size;
        let mini_storage_sectors_needed = if mini_storage_size > 0 { (mini_storage_size + sector_size - 1) / sector_size } else { 0 };
        let minifat_sectors_needed = if mini_sectors_total > 0 { (mini_sectors_total * 4 + sector_size - 1) / sector_size } else { 0 };
        let normal_sectors_needed = ((normal_size_total as usize) + sector_size - 1) / sector_size.max(1);
        let total_entities = stream_count + storage_count;
        let dir_sectors_needed = (total_entities * constants::SIZE_OF_DIRECTORY_ENTRY + sector_size - 1) / sector_size;

        let mut current = 0u32;
        let dir_sectors: Vec<u32> = (current..current + dir_sectors_needed as u32).collect();
        current += dir_sectors_needed as u32;

        for entity in self.entities.iter_mut().filter(|e| entity_is_normal(e, cutoff)) {
            let needed = (entity.data.len() + sector_size - 1) / sector_size;
            entity.sector_chain = (current..current + needed as u32).collect();
            entity.start_sector = entity.sector_chain.first().copied().unwrap_or(END_OF_CHAIN);
            current += needed as u32;
        }

        let mut mini_cursor = 0u32;
        for entity in self.entities.iter_mut().filter(|e| entity_is_mini(e, cutoff)) {
            let needed = (entity.data.len() + mini_sector_size - 1) / mini_sector_size;
            entity.mini_sector_chain = (mini_cursor..mini_cursor + needed as u32).collect();
            entity.start_sector = entity.mini_sector_chain.first().copied().unwrap_or(END_OF_CHAIN);
            mini_cursor += needed as u32;
        }

        for entity in self.entities.iter_mut() {
            if entity.kind == EntityKind::Stream && entity.data.is_empty() {
                entity.start_sector = END_OF_CHAIN;
            }
        }

        let mini_storage_sectors: Vec<u32> = (current..current + mini_storage_sectors_needed as u32).collect();
        current += mini_storage_sectors_needed as u32;

        let mini_fat_sectors: Vec<u32> = (current..current + minifat_sectors_needed as u32).collect();
        current += minifat_sectors_needed as u32;
        let mini_fat_start_sector = mini_fat_sectors.first().copied().unwrap_or(END_OF_CHAIN);

        let fat_sectors: Vec<u32> = (current..current + fat_sectors_needed as u32).collect();
        current += fat_sectors_needed as u32;

        let difat_sectors: Vec<u32> = (current..current + difat_sectors_needed as u32).collect();
        current += difat_sectors_needed as u32;

        let dir_start_sector = dir_sectors.first().copied().unwrap_or(END_OF_CHAIN);

        if mini_sectors_total > 0 {
            self.entities[0].start_sector = mini_storage_sectors.first().copied().unwrap_or(END_OF_CHAIN);
            self.entities[0].data = vec![0u8; mini_storage_size];
        } else {
            self.entities[0].start_sector = END_OF_CHAIN;
        }

        let logical_sector_count = current as usize;
        let mut fat = vec![FREE_SECTOR; logical_sector_count];
        for chain in [&dir_sectors, &mini_storage_sectors, &mini_fat_sectors] {
            link_chain(&mut fat, chain);
        }
        for entity in self.entities.iter().filter(|e| entity_is_normal(e, cutoff)) {
            link_chain(&mut fat, &entity.sector_chain);
        }
        for &sector in &fat_sectors {
            fat[sector as usize] = FAT_SECTOR;
        }
        for &sector in &difat_sectors {
            fat[sector as usize] = DIF_SECTOR;
        }

        Layout {
            dir_sectors,
            dir_start_sector,
            fat_sectors,
            difat_sectors,
            mini_fat_sectors,
            mini_fat_start_sector,
            mini_storage_sectors,
            fat,
            mini_storage_size_total: mini_storage_size,
        }
    }

    fn prepare_directory(&self, layout: &Layout) -> Result<Vec<u8>> {
        let n = self.entities.len();
        let mut left = vec![NO_STREAM; n];
        let mut right = vec![NO_STREAM; n];
        let mut child = vec![NO_STREAM; n];
        let mut black = vec![true; n];

        let mut stack = vec![0usize];
        let mut visited_storage = vec![false; n];
        while let Some(parent_idx) = stack.pop() {
            if visited_storage[parent_idx] {
                continue;
            }
            visited_storage[parent_idx] = true;
            let items: Vec<(u32, String)> = self.entities[parent_idx]
                .children
                .iter()
                .map(|&c| (c, self.entities[c as usize].name.clone()))
                .collect();
            if items.is_empty() {
                continue;
            }
            let tree = RbTree::build(&items);
            child[parent_idx] = tree.root_entity().unwrap_or(NO_STREAM);
            tree.record_links(|entity_index, l, r, is_black| {
                let idx = entity_index as usize;
                left[idx] = l.unwrap_or(NO_STREAM);
                right[idx] = r.unwrap_or(NO_STREAM);
                black[idx] = is_black;
            });
            for &c in &self.entities[parent_idx].children {
                if self.entities[c as usize].kind != EntityKind::Stream {
                    stack.push(c as usize);
                }
            }
        }

        let mut out = Vec::with_capacity(layout.dir_sectors.len() * self.options.sector_size as usize);
        for (i, entity) in self.entities.iter().enumerate() {
            let size = if entity.kind == EntityKind::Root {
                layout.mini_storage_size_total as u64
            } else {
                entity.data.len() as u64
            };
            let bytes = write_entry(
                &entity.name,
                entity.kind,
                size,
                entity.start_sector,
                left[i],
                right[i],
                child[i],
                black[i],
                self.options.dll_version,
            )?;
            out.extend_from_slice(&bytes);
        }
        out.resize(layout.dir_sectors.len() * self.options.sector_size as usize, 0);
        Ok(out)
    }

    fn prepare_data(&self, layout: &Layout) -> Vec<u8> {
        let sector_size = self.options.sector_size as usize;
        let mini_sector_size = self.options.mini_sector_size as usize;
        let mut sector_to_data: std::collections::HashMap<u32, Vec<u8>> = std::collections::HashMap::new();

        if !layout.mini_storage_sectors.is_empty() {
            let mut mini_stream_data = vec![0u8; layout.mini_storage_size_total];
            for entity in self.entities.iter().filter(|e| entity_is_mini(e, self.options.mini_cutoff)) {
                for (i, &mini_sector) in entity.mini_sector_chain.iter().enumerate() {
                    let data_start = i * mini_sector_size;
                    let data_end = (data_start + mini_sector_size).min(entity.data.len());
                    let chunk = &entity.data[data_start..data_end];
                    let start_pos = mini_sector as usize * mini_sector_size;
                    mini_stream_data[start_pos..start_pos + chunk.len()].copy_from_slice(chunk);
                }
            }
            for (i, &storage_sector) in layout.mini_storage_sectors.iter().enumerate() {
                let start = i * sector_size;
                let end = (start + sector_size).min(mini_stream_data.len());
                let mut chunk = mini_stream_data[start..end].to_vec();
                chunk.resize(sector_size, 0);
                sector_to_data.insert(storage_sector, chunk);
            }
        }

        for entity in self.entities.iter().filter(|e| entity_is_normal(e, self.options.mini_cutoff)) {
            for (i, &sector) in entity.sector_chain.iter().enumerate() {
                let start = i * sector_size;
                let end = (start + sector_size).min(entity.data.len());
                let mut chunk = entity.data[start..end].to_vec();
                chunk.resize(sector_size, 0);
                sector_to_data.insert(sector, chunk);
            }
        }

        let total_sectors = sector_to_data.keys().copied().max().map(|m| m as usize + 1).unwrap_or(0);
        let mut out = vec![0u8; total_sectors * sector_size];
        for (sector, chunk) in sector_to_data {
            let start = sector as usize * sector_size;
            out[start..start + sector_size].copy_from_slice(&chunk);
        }
        out
    }

    fn prepare_fat(&self, layout: &Layout) -> Vec<u8> {
        let mut out = Vec::with_capacity(layout.fat.len() * 4);
        for &v in &layout.fat {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.resize(layout.fat_sectors.len() * self.options.sector_size as usize, 0xFF);
        out
    }

    fn prepare_minifat(&self, layout: &Layout) -> Vec<u8> {
        if layout.mini_storage_sectors.is_empty() {
            return Vec::new();
        }
        let max_mini_sector = self
            .entities
            .iter()
            .flat_map(|e| e.mini_sector_chain.iter().copied())
            .max();
        let Some(max_mini_sector) = max_mini_sector else {
            return Vec::new();
        };
        let mut minifat = vec![FREE_SECTOR; max_mini_sector as usize + 1];
        for entity in self.entities.iter().filter(|e| entity_is_mini(e, self.options.mini_cutoff)) {
            link_chain(&mut minifat, &entity.mini_sector_chain);
        }
        let mut out = Vec::with_capacity(minifat.len() * 4);
        for v in minifat {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.resize(layout.mini_fat_sectors.len() * self.options.sector_size as usize, 0xFF);
        out
    }

    fn prepare_difat(&self, layout: &Layout) -> Vec<u8> {
        if layout.fat_sectors.len() <= DIFAT_INLINE_COUNT {
            return vec![0u8; layout.difat_sectors.len() * self.options.sector_size as usize];
        }
        let fat_entries_per_sector = self.options.sector_size as usize / 4;
        let difat_refs_per_sector = fat_entries_per_sector - 1;
        let additional: Vec<u32> = layout.fat_sectors[DIFAT_INLINE_COUNT..].to_vec();

        let mut out = Vec::new();
        for (i, _) in layout.difat_sectors.iter().enumerate() {
            let start = i * difat_refs_per_sector;
            let end = (start + difat_refs_per_sector).min(additional.len());
            let mut refs: Vec<u32> = additional[start..end].to_vec();
            refs.resize(difat_refs_per_sector, FREE_SECTOR);
            let next = if i + 1 < layout.difat_sectors.len() { layout.difat_sectors[i + 1] } else { END_OF_CHAIN };
            refs.push(next);
            for v in refs {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    fn prepare_header(&self, layout: &Layout) -> Vec<u8> {
        let params = HeaderWriteParams {
            sector_size: self.options.sector_size,
            mini_sector_size: self.options.mini_sector_size,
            mini_cutoff: self.options.mini_cutoff,
            dll_version: self.options.dll_version,
            fat_sector_count: layout.fat_sectors.len() as u32,
            dir_start_sector: layout.dir_start_sector,
            minifat_start_sector: layout.mini_fat_start_sector,
            minifat_sector_count: layout.mini_fat_sectors.len() as u32,
            difat_first_sector: layout.difat_sectors.first().copied().unwrap_or(END_OF_CHAIN),
            difat_sector_count: layout.difat_sectors.len() as u32,
            fat_sector_refs: &layout.fat_sectors,
        };
        write_header(&params)
    }

    /// Lays out the container and returns the complete file bytes.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let layout = self.finalize_structure();
        let sector_size = self.options.sector_size as usize;

        let header_data = self.prepare_header(&layout);
        let dir_data = self.prepare_directory(&layout)?;
        let data_chunks = self.prepare_data(&layout);
        let fat_data = self.prepare_fat(&layout);
        let difat_data = self.prepare_difat(&layout);

        let mut all_physical: Vec<u32> = layout
            .dir_sectors
            .iter()
            .chain(layout.fat_sectors.iter())
            .chain(layout.difat_sectors.iter())
            .chain(layout.mini_fat_sectors.iter())
            .chain(layout.mini_storage_sectors.iter())
            .copied()
            .collect();
        for entity in self.entities.iter().filter(|e| entity_is_normal(e, self.options.mini_cutoff)) {
            all_physical.extend(entity.sector_chain.iter().copied());
        }
        let max_sector = all_physical.into_iter().max();
        let total_sectors = max_sector.map(|m| m as usize + 2).unwrap_or(1);

        let mut out = vec![0u8; total_sectors * sector_size];
        out[..header_data.len()].copy_from_slice(&header_data);

        let place = |out: &mut [u8], chain: &[u32], data: &[u8]| {
            for (i, &logical) in chain.iter().enumerate() {
                let src_start = i * sector_size;
                let src_end = (src_start + sector_size).min(data.len());
                let dst_start = (logical as usize + 1) * sector_size;
                let dst_end = dst_start + (src_end - src_start);
                if dst_end <= out.len() {
                    out[dst_start..dst_end].copy_from_slice(&data[src_start..src_end]);
                }
            }
        };

        place(&mut out, &layout.dir_sectors, &dir_data);
        place(&mut out, &layout.fat_sectors, &fat_data);
        place(&mut out, &layout.difat_sectors, &difat_data);
        if !layout.mini_fat_sectors.is_empty() {
            let minifat_data = self.prepare_minifat(&layout);
            place(&mut out, &layout.mini_fat_sectors, &minifat_data);
        }

        let data_sector_count = data_chunks.len() / sector_size;
        for logical in 0..data_sector_count {
            let src_start = logical * sector_size;
            let dst_start = (logical + 1) * sector_size;
            if dst_start + sector_size <= out.len() {
                out[dst_start..dst_start + sector_size].copy_from_slice(&data_chunks[src_start..src_start + sector_size]);
            }
        }

        Ok(out)
    }

    #[cfg(feature = "async")]
    pub async fn write_to_file<P: AsRef<std::path::Path>>(self, path: P) -> Result<()> {
        let bytes = self.finish()?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    #[cfg(feature = "blocking")]
    pub fn write_to_file_blocking<P: AsRef<std::path::Path>>(self, path: P) -> Result<()> {
        let bytes = self.finish()?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(&bytes)?;
        Ok(())
    }
}

struct Layout {
    dir_sectors: Vec<u32>,
    dir_start_sector: u32,
    fat_sectors: Vec<u32>,
    difat_sectors: Vec<u32>,
    mini_fat_sectors: Vec<u32>,
    mini_fat_start_sector: u32,
    mini_storage_sectors: Vec<u32>,
    fat: Vec<u32>,
    mini_storage_size_total: usize,
}

fn entity_is_mini(e: &WriteEntity, cutoff: u32) -> bool {
    e.kind == EntityKind::Stream && !e.data.is_empty() && (e.data.len() as u32) < cutoff
}

fn entity_is_normal(e: &WriteEntity, cutoff: u32) -> bool {
    e.kind == EntityKind::Stream && (e.data.len() as u32) >= cutoff
}

fn link_chain(fat: &mut [u32], chain: &[u32]) {
    for (i, &sector) in chain.iter().enumerate() {
        fat[sector as usize] = if i + 1 < chain.len() { chain[i + 1] } else { END_OF_CHAIN };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    #[test]
    fn rejects_overlong_names() {
        let mut writer = Writer::new(WriterOptions::default());
        let long_name = "x".repeat(32);
        assert!(writer.create_stream(EntityId::ROOT, &long_name, vec![]).is_err());
    }

    #[test]
    fn rejects_duplicate_sibling_names() {
        let mut writer = Writer::new(WriterOptions::default());
        writer.create_stream(EntityId::ROOT, "a", vec![1]).unwrap();
        assert!(writer.create_stream(EntityId::ROOT, "a", vec![2]).is_err());
    }

    #[test]
    fn round_trips_a_single_small_stream() {
        let mut writer = Writer::new(WriterOptions::default());
        writer.create_stream(EntityId::ROOT, "hello", b"hello world".to_vec()).unwrap();
        let bytes = writer.finish().unwrap();
        let reader = Reader::from_bytes(bytes).unwrap();
        let data = reader.open_stream(&["hello"]).unwrap();
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn round_trips_a_stream_inside_a_storage() {
        let mut writer = Writer::new(WriterOptions::default());
        let storage = writer.create_storage(EntityId::ROOT, "Data").unwrap();
        writer.create_stream(storage, "Stream1", vec![1, 2, 3, 4]).unwrap();
        let bytes = writer.finish().unwrap();
        let reader = Reader::from_bytes(bytes).unwrap();
        let data = reader.open_stream(&["Data", "Stream1"]).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn round_trips_a_large_normal_stream() {
        let mut writer = Writer::new(WriterOptions::default());
        let payload = vec![7u8; 9000];
        writer.create_stream(EntityId::ROOT, "big", payload.clone()).unwrap();
        let bytes = writer.finish().unwrap();
        let reader = Reader::from_bytes(bytes).unwrap();
        let data = reader.open_stream(&["big"]).unwrap();
        assert_eq!(data, payload);
    }
}
