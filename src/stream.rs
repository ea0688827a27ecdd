//! Cursors over a stream's sector chain: `NormalStream` walks whole
//! sectors via the FAT, `MiniStream` walks mini-sectors via the mini-FAT,
//! delegating physical reads to a `NormalStream` over the root entry's
//! own chain.

use crate::chain::collect_chain;
use crate::error::{Diagnostics, Error, Result, Warning};
use crate::sector::SectorStore;
use std::io::{Read, Seek, SeekFrom};

pub struct NormalStream<'a> {
    store: &'a SectorStore,
    sectors: Vec<u32>,
    length: u64,
    position: u64,
    diagnostics: &'a Diagnostics,
    short_read_reported: bool,
}

impl<'a> NormalStream<'a> {
    pub(crate) fn open(store: &'a SectorStore, fat: &[u32], start: u32, declared_length: u64, diagnostics: &'a Diagnostics) -> Result<Self> {
        let sectors = collect_chain(fat, start, Error::NormalLoop)?;
        let sector_size = store.sector_size() as u64;
        let min_length = sectors.len().saturating_sub(1) as u64 * sector_size;
        let max_length = sectors.len() as u64 * sector_size;

        let mut length = declared_length;
        if length > max_length {
            diagnostics.warn(Warning::Truncated {
                detail: format!("declared length {length} exceeds {max_length} bytes available in the chain"),
            });
            length = max_length;
        } else if length < min_length {
            diagnostics.warn(Warning::DirSize {
                index: start as usize,
                detail: format!("declared length {length} is smaller than the chain's minimum {min_length}"),
            });
            length = max_length;
        }

        Ok(Self {
            store,
            sectors,
            length,
            position: 0,
            diagnostics,
            short_read_reported: false,
        })
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn read1(&mut self, buf: &mut [u8]) -> usize {
        if self.position >= self.length {
            return 0;
        }
        let sector_size = self.store.sector_size() as u64;
        let sector_index = (self.position / sector_size) as usize;
        let sector_offset = (self.position % sector_size) as usize;
        let Some(&sector) = self.sectors.get(sector_index) else {
            self.report_short_read();
            return 0;
        };
        let Some(data) = self.store.sector(sector) else {
            self.report_short_read();
            return 0;
        };
        let available_in_sector = data.len() - sector_offset;
        let remaining_in_stream = (self.length - self.position) as usize;
        let n = buf.len().min(available_in_sector).min(remaining_in_stream);
        buf[..n].copy_from_slice(&data[sector_offset..sector_offset + n]);
        self.position += n as u64;
        n
    }

    /// Warns once, the first time a read stops short of the declared
    /// length because the chain or backing sector data ran out.
    fn report_short_read(&mut self) {
        if self.short_read_reported {
            return;
        }
        self.short_read_reported = true;
        self.diagnostics.warn(Warning::Truncated {
            detail: format!("stream ended at offset {} before its declared length {}", self.position, self.length),
        });
    }
}

impl<'a> Read for NormalStream<'a> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read1(&mut buf[total..]);
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }
}

impl<'a> Seek for NormalStream<'a> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(d) => self.position as i64 + d,
            SeekFrom::End(d) => self.length as i64 + d,
        };
        if new_pos < 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "negative seek position"));
        }
        self.position = new_pos as u64;
        Ok(self.position)
    }
}

pub struct MiniStream<'a> {
    file: NormalStream<'a>,
    mini_sector_size: u64,
    sectors: Vec<u32>,
    length: u64,
    position: u64,
    diagnostics: &'a Diagnostics,
    short_read_reported: bool,
}

impl<'a> MiniStream<'a> {
    pub(crate) fn open(
        store: &'a SectorStore,
        mini_fat: &[u32],
        normal_fat: &[u32],
        root_start: u32,
        root_size: u64,
        mini_sector_size: usize,
        start: u32,
        declared_length: u64,
        diagnostics: &'a Diagnostics,
    ) -> Result<Self> {
        if mini_fat.is_empty() {
            return Err(Error::NoMiniFat);
        }
        let sectors = collect_chain(mini_fat, start, Error::NormalLoop)?;
        let mini_sector_size = mini_sector_size as u64;
        let max_length = sectors.len() as u64 * mini_sector_size;

        let file = NormalStream::open(store, normal_fat, root_start, root_size, diagnostics)?;

        let mut length = declared_length;
        if length > max_length {
            diagnostics.warn(Warning::Truncated {
                detail: format!("mini-stream declared length {length} exceeds {max_length} bytes available"),
            });
            length = max_length;
        }

        Ok(Self {
            file,
            mini_sector_size,
            sectors,
            length,
            position: 0,
            diagnostics,
            short_read_reported: false,
        })
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn set_pos(&mut self) -> std::io::Result<bool> {
        let sector_index = (self.position / self.mini_sector_size) as usize;
        let Some(&sector) = self.sectors.get(sector_index) else {
            return Ok(false);
        };
        let sector_offset = self.position % self.mini_sector_size;
        self.file.seek(SeekFrom::Start(sector as u64 * self.mini_sector_size + sector_offset))?;
        Ok(true)
    }

    fn read1(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.position >= self.length {
            return Ok(0);
        }
        if !self.set_pos()? {
            self.report_short_read();
            return Ok(0);
        }
        let sector_offset = (self.position % self.mini_sector_size) as usize;
        let available_in_sector = self.mini_sector_size as usize - sector_offset;
        let remaining_in_stream = (self.length - self.position) as usize;
        let n = buf.len().min(available_in_sector).min(remaining_in_stream);
        let read = self.file.read(&mut buf[..n])?;
        if read == 0 {
            self.report_short_read();
        }
        self.position += read as u64;
        Ok(read)
    }

    /// Warns once, the first time a read stops short of the declared
    /// length because the mini-FAT chain or backing mini-sector ran out.
    fn report_short_read(&mut self) {
        if self.short_read_reported {
            return;
        }
        self.short_read_reported = true;
        self.diagnostics.warn(Warning::Truncated {
            detail: format!("mini-stream ended at offset {} before its declared length {}", self.position, self.length),
        });
    }
}

impl<'a> Read for MiniStream<'a> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read1(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }
}

impl<'a> Seek for MiniStream<'a> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(d) => self.position as i64 + d,
            SeekFrom::End(d) => self.length as i64 + d,
        };
        if new_pos < 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "negative seek position"));
        }
        self.position = new_pos as u64;
        Ok(self.position)
    }
}

/// A stream reader, normal or mini, behind one seekable `Read` cursor.
/// Not writable, matching the entity API in spec §6.
pub enum StreamCursor<'a> {
    Normal(NormalStream<'a>),
    Mini(MiniStream<'a>),
}

impl<'a> StreamCursor<'a> {
    pub fn len(&self) -> u64 {
        match self {
            StreamCursor::Normal(s) => s.len(),
            StreamCursor::Mini(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> Read for StreamCursor<'a> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            StreamCursor::Normal(s) => s.read(buf),
            StreamCursor::Mini(s) => s.read(buf),
        }
    }
}

impl<'a> Seek for StreamCursor<'a> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            StreamCursor::Normal(s) => s.seek(pos),
            StreamCursor::Mini(s) => s.seek(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::END_OF_CHAIN;

    fn store_of(sectors: &[&[u8]], sector_size: usize) -> SectorStore {
        let mut bytes = Vec::new();
        for s in sectors {
            let mut padded = s.to_vec();
            padded.resize(sector_size, 0);
            bytes.extend_from_slice(&padded);
        }
        futures_lite_read(bytes, sector_size)
    }

    fn futures_lite_read(bytes: Vec<u8>, sector_size: usize) -> SectorStore {
        // test-only synchronous shim around the async slurp.
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(SectorStore::read_all(std::io::Cursor::new(bytes), sector_size)).unwrap()
    }

    #[test]
    fn reads_a_single_sector_stream() {
        let store = store_of(&[b"hello world!!!!!"], 16);
        let fat = vec![END_OF_CHAIN];
        let diagnostics = Diagnostics::default_sink();
        let mut stream = NormalStream::open(&store, &fat, 0, 11, &diagnostics).unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello world");
    }

    #[test]
    fn reads_across_sector_boundaries() {
        let store = store_of(&[b"0123456789", b"abcdefghij"], 10);
        let fat = vec![1, END_OF_CHAIN];
        let diagnostics = Diagnostics::default_sink();
        let mut stream = NormalStream::open(&store, &fat, 0, 15, &diagnostics).unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"0123456789abcde");
    }

    #[test]
    fn warns_once_when_the_chain_runs_out_before_the_declared_length() {
        // The chain visits sector 1, but the store only backs sector 0 —
        // the declared length matches what the (two-sector) chain promises,
        // so `open` sees no mismatch and the shortfall only surfaces at read time.
        let store = store_of(&[b"0123456789"], 10);
        let fat = vec![1, END_OF_CHAIN];
        let diagnostics = Diagnostics::default_sink();
        let mut stream = NormalStream::open(&store, &fat, 0, 20, &diagnostics).unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"0123456789");
        assert_eq!(diagnostics.warnings().len(), 1);

        // A second read past the end must not re-report the warning.
        let mut more = [0u8; 4];
        assert_eq!(stream.read(&mut more).unwrap(), 0);
        assert_eq!(diagnostics.warnings().len(), 1);
    }

    #[test]
    fn mini_stream_warns_once_when_its_backing_sector_is_out_of_range() {
        use crate::constants::END_OF_CHAIN as EOC;

        // The mini-FAT chain starts at mini-sector 5, which addresses bytes
        // beyond the root stream's own (fully valid, 16-byte) backing data —
        // `MiniStream::open` sees a chain-length/declared-length match, so
        // the shortfall only shows up once the read actually walks there.
        let store = store_of(&[b"0123456789abcdef"], 16);
        let normal_fat = vec![EOC];
        let mini_fat = vec![0, 0, 0, 0, 0, EOC];
        let diagnostics = Diagnostics::default_sink();

        let mut mini = MiniStream::open(&store, &mini_fat, &normal_fat, 0, 16, 8, 5, 8, &diagnostics).unwrap();
        let mut buf = Vec::new();
        mini.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert_eq!(diagnostics.warnings().len(), 1);
    }
}
