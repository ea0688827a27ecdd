use crate::constants::Readable;
use crate::error::{Error, Result};
use tokio::io::AsyncReadExt;

/// Owns the decoded sector vector for a container. Built once from a full
/// read of the input; everything above this layer (FAT walking, directory
/// parsing, stream reads) is synchronous slice indexing.
#[derive(Clone)]
pub struct SectorStore {
    sector_size: usize,
    sectors: Vec<Vec<u8>>,
}

impl SectorStore {
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    pub fn sector(&self, index: u32) -> Option<&[u8]> {
        self.sectors.get(index as usize).map(Vec::as_slice)
    }

    /// Reads whole `sector_size`-byte chunks until a short or empty read.
    /// A non-empty short read means the container was truncated mid-sector,
    /// which we treat as a hard error here since it happens before any
    /// directory/FAT structure exists to report it through diagnostics.
    pub(crate) async fn read_all<R: Readable>(mut read: R, sector_size: usize) -> Result<Self> {
        let mut sectors = Vec::new();
        loop {
            let mut buf = vec![0u8; sector_size];
            let n = read.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if n != sector_size {
                return Err(Error::Internal(format!(
                    "truncated sector: expected {sector_size} bytes, got {n}"
                )));
            }
            sectors.push(buf);
        }
        Ok(Self {
            sector_size,
            sectors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_whole_sectors() {
        let data = vec![7u8; 512 * 3];
        let cursor = std::io::Cursor::new(data);
        let store = SectorStore::read_all(cursor, 512).await.unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.sector(0).unwrap().len(), 512);
        assert!(store.sector(3).is_none());
    }

    #[tokio::test]
    async fn errors_on_partial_trailing_sector() {
        let data = vec![7u8; 512 + 10];
        let cursor = std::io::Cursor::new(data);
        let result = SectorStore::read_all(cursor, 512).await;
        assert!(result.is_err());
    }
}
