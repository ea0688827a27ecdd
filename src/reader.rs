//! `Reader`: parses a container end to end and exposes a path-indexed
//! view over its directory tree and stream contents.

use crate::allocation::{directory_sectors, read_difat, read_fat, read_minifat};
use crate::constants::{Readable, NO_STREAM, SIZE_OF_DIRECTORY_ENTRY};
use crate::directory::{decode_entry, Entity, EntityKind};
use crate::error::{Diagnostics, Error, Result, Warning};
use crate::header::{read_header, Header};
use crate::sector::SectorStore;
use crate::stream::{MiniStream, NormalStream, StreamCursor};
use crate::tree::build_tree;
use std::io::Read;
use tokio::io::AsyncReadExt;

pub struct Reader {
    header: Header,
    sectors: SectorStore,
    fat: Vec<u32>,
    mini_fat: Vec<u32>,
    entities: Vec<Entity>,
    diagnostics: Diagnostics,
}

impl Reader {
    #[cfg(feature = "async")]
    pub async fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Self::parse(file).await
    }

    #[cfg(feature = "blocking")]
    pub fn from_file_blocking<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let rt = tokio::runtime::Runtime::new().map_err(|e| Error::Internal(e.to_string()))?;
        let file = rt.block_on(tokio::fs::File::open(path))?;
        rt.block_on(Self::parse(file))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let rt = tokio::runtime::Runtime::new().map_err(|e| Error::Internal(e.to_string()))?;
        rt.block_on(Self::parse(std::io::Cursor::new(bytes)))
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn root(&self) -> &Entity {
        &self.entities[0]
    }

    pub fn entity(&self, index: usize) -> Option<&Entity> {
        self.entities.get(index)
    }

    pub fn list_streams(&self) -> Vec<&Entity> {
        self.entities.iter().filter(|e| e.is_stream()).collect()
    }

    pub fn list_storage(&self) -> Vec<&Entity> {
        self.entities
            .iter()
            .filter(|e| e.is_storage() && e.index() != 0)
            .collect()
    }

    /// Resolves a `/`-joined path (e.g. `["Data", "Stream1"]`) by walking
    /// the owned tree from the root. Lookup is case-insensitive; a valid
    /// container never has two children whose upper-cased names collide
    /// (P7), so the exact-match fallback below only matters for
    /// malformed input where a case-insensitive match is ambiguous.
    pub fn find(&self, path: &[&str]) -> Option<&Entity> {
        let mut current = 0usize;
        for segment in path {
            let children = &self.entities[current].children;
            let mut folded = children
                .iter()
                .filter(|&&i| crate::tree::names_equal_ignore_case(self.entities[i].name(), segment));
            let first = *folded.next()?;
            let found = if folded.next().is_some() {
                *children.iter().find(|&&i| self.entities[i].name() == *segment)?
            } else {
                first
            };
            current = found;
        }
        Some(&self.entities[current])
    }

    pub fn open_stream(&self, path: &[&str]) -> Result<Vec<u8>> {
        let entity = self.find(path).ok_or_else(|| Error::NotFound(path.join("/")))?;
        self.read_entity(entity)
    }

    /// Reads the full contents of a stream entity already obtained from
    /// this reader (via [`Reader::root`], [`Reader::find`], or
    /// [`Reader::entity`]).
    pub fn read_entity(&self, entity: &Entity) -> Result<Vec<u8>> {
        let mut data = vec![0u8; entity.size() as usize];
        let mut cursor = self.open_entity(entity)?;
        cursor.read_exact(&mut data).or_else(|e| if data.is_empty() { Ok(()) } else { Err(Error::Io(e)) })?;
        Ok(data)
    }

    /// Opens a random-access, seekable cursor over a stream path, routed
    /// through the mini-FAT or normal FAT according to its declared size
    /// vs. `mini_cutoff`, per spec §4.K.
    pub fn open(&self, path: &[&str]) -> Result<StreamCursor<'_>> {
        let entity = self.find(path).ok_or_else(|| Error::NotFound(path.join("/")))?;
        self.open_entity(entity)
    }

    /// Same as [`Reader::open`] but taking an already-resolved entity.
    pub fn open_entity(&self, entity: &Entity) -> Result<StreamCursor<'_>> {
        if !entity.is_stream() {
            return Err(Error::NotStream(entity.name().to_string()));
        }
        // A zero-size stream has nothing to fetch from either table; routing it
        // through the mini-FAT path would spuriously fail with `NoMiniFat` on a
        // container that otherwise has no small streams at all.
        if entity.size() == 0 {
            return Ok(StreamCursor::Normal(NormalStream::open(
                &self.sectors,
                &self.fat,
                crate::constants::END_OF_CHAIN,
                0,
                &self.diagnostics,
            )?));
        }
        let start = entity.start_sector.unwrap_or(NO_STREAM);
        if entity.size() < self.header.mini_cutoff as u64 {
            let root = &self.entities[0];
            let root_start = root.start_sector.unwrap_or(NO_STREAM);
            let mini = MiniStream::open(
                &self.sectors,
                &self.mini_fat,
                &self.fat,
                root_start,
                root.size(),
                self.header.mini_sector_size as usize,
                start,
                entity.size(),
                &self.diagnostics,
            )?;
            Ok(StreamCursor::Mini(mini))
        } else {
            let normal = NormalStream::open(&self.sectors, &self.fat, start, entity.size(), &self.diagnostics)?;
            Ok(StreamCursor::Normal(normal))
        }
    }

    async fn parse<R: Readable>(mut read: R) -> Result<Self> {
        let diagnostics = Diagnostics::default_sink();
        let header = read_header(&mut read, &diagnostics).await?;

        if header.sector_size as usize > crate::constants::HEADER_LENGTH {
            let remainder_len = header.sector_size as usize - crate::constants::HEADER_LENGTH;
            let mut remainder = vec![0u8; remainder_len];
            read.read_exact(&mut remainder).await?;
        }

        let sectors = SectorStore::read_all(read, header.sector_size as usize).await?;

        let difat = read_difat(&sectors, &header)?;
        let fat = read_fat(&sectors, &difat, &diagnostics)?;
        let mini_fat = read_minifat(&sectors, &fat, &header)?;

        let dir_sectors = directory_sectors(&fat, header.first_directory_sector)?;
        let mut directory_bytes = Vec::with_capacity(dir_sectors.len() * header.sector_size as usize);
        for sector in dir_sectors {
            if let Some(data) = sectors.sector(sector) {
                directory_bytes.extend_from_slice(data);
            }
        }

        if directory_bytes.len() % SIZE_OF_DIRECTORY_ENTRY != 0 {
            diagnostics.warn(Warning::Truncated {
                detail: format!("directory stream length {} is not a multiple of {SIZE_OF_DIRECTORY_ENTRY}", directory_bytes.len()),
            });
        }

        let mut entities = Vec::with_capacity(directory_bytes.len() / SIZE_OF_DIRECTORY_ENTRY);
        for (index, raw) in directory_bytes.chunks(SIZE_OF_DIRECTORY_ENTRY).enumerate() {
            if raw.len() < SIZE_OF_DIRECTORY_ENTRY {
                break;
            }
            let entity = decode_entry(raw, index, header.major_version, header.sector_size as usize, &diagnostics)?;
            entities.push(entity);
        }

        if entities.is_empty() || entities[0].kind != EntityKind::Root {
            return Err(Error::HeaderError {
                field: "directory",
                detail: "first directory entry is not the root storage".into(),
            });
        }

        build_tree(&mut entities, &diagnostics)?;

        Ok(Reader {
            header,
            sectors,
            fat,
            mini_fat,
            entities,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_an_empty_root_only_container() {
        // A minimal valid container: one FAT sector (all free), a root
        // directory entry with no stream, header pointing at both.
        let sector_size = 512usize;
        let mut fat_sector = vec![0u8; sector_size];
        fat_sector[0..4].copy_from_slice(&crate::constants::FAT_SECTOR.to_le_bytes());
        fat_sector[4..8].copy_from_slice(&crate::constants::END_OF_CHAIN.to_le_bytes());
        for i in 2..(sector_size / 4) {
            fat_sector[i * 4..i * 4 + 4].copy_from_slice(&crate::constants::FREE_SECTOR.to_le_bytes());
        }

        let mut dir_sector = vec![0u8; sector_size];
        dir_sector[64] = crate::constants::OBJECT_TYPE_ROOT;
        dir_sector[66] = crate::constants::NODE_COLOR_BLACK;
        dir_sector[68..72].copy_from_slice(&crate::constants::NO_STREAM.to_le_bytes());
        dir_sector[72..76].copy_from_slice(&crate::constants::NO_STREAM.to_le_bytes());
        dir_sector[76..80].copy_from_slice(&crate::constants::NO_STREAM.to_le_bytes());
        dir_sector[116..120].copy_from_slice(&crate::constants::END_OF_CHAIN.to_le_bytes());

        let params = crate::header::HeaderWriteParams {
            sector_size: sector_size as u32,
            mini_sector_size: 64,
            mini_cutoff: 4096,
            dll_version: 3,
            fat_sector_count: 1,
            dir_start_sector: 1,
            minifat_start_sector: crate::constants::END_OF_CHAIN,
            minifat_sector_count: 0,
            difat_first_sector: crate::constants::END_OF_CHAIN,
            difat_sector_count: 0,
            fat_sector_refs: &[0],
        };
        let header_bytes = crate::header::write_header(&params);

        let mut bytes = header_bytes;
        bytes.extend_from_slice(&fat_sector);
        bytes.extend_from_slice(&dir_sector);

        let reader = Reader::from_bytes(bytes).unwrap();
        assert_eq!(reader.root().children, Vec::<usize>::new());
        assert!(reader.list_streams().is_empty());
    }

    #[test]
    fn stream_cursor_seek_and_read_compose() {
        use crate::writer::{EntityId, Writer, WriterOptions};
        use std::io::SeekFrom;

        let mut writer = Writer::new(WriterOptions::default());
        writer.create_stream(EntityId::ROOT, "Data", b"0123456789abcdefghij".to_vec()).unwrap();
        let bytes = writer.finish().unwrap();
        let reader = Reader::from_bytes(bytes).unwrap();

        let mut cursor = reader.open(&["Data"]).unwrap();
        assert_eq!(cursor.seek(SeekFrom::Start(4)).unwrap(), 4);
        assert_eq!(cursor.seek(SeekFrom::Current(3)).unwrap(), 7);

        let mut buf = [0u8; 5];
        let n = cursor.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"789ab");
        assert_eq!(cursor.seek(SeekFrom::Current(0)).unwrap(), 12);
    }

    #[test]
    fn stream_cursor_reads_an_empty_stream_without_a_mini_fat() {
        use crate::writer::{EntityId, Writer, WriterOptions};

        let mut writer = Writer::new(WriterOptions::default());
        writer.create_stream(EntityId::ROOT, "Empty", Vec::new()).unwrap();
        let bytes = writer.finish().unwrap();
        let reader = Reader::from_bytes(bytes).unwrap();

        let mut cursor = reader.open(&["Empty"]).unwrap();
        assert!(cursor.is_empty());
        let mut buf = Vec::new();
        assert_eq!(cursor.read_to_end(&mut buf).unwrap(), 0);
    }
}
