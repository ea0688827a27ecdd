//! Read, write, and edit OLE Compound Documents (Compound File Binary):
//! the container format behind legacy Microsoft Office documents and
//! many proprietary single-file formats.
//!
//! The crate is organized the way the format itself is layered:
//! [`header`] and [`allocation`] decode the FAT/mini-FAT/DIFAT tables
//! that describe where every sector lives, [`directory`] and [`tree`]
//! turn the flat directory array into an owned parent→children tree,
//! [`stream`] gives random-access cursors over a stream's sector chain,
//! and [`reader`]/[`writer`]/[`editor`] compose all of the above into
//! the three public entry points: read an existing container, build a
//! new one from scratch, or mutate and re-emit an existing one.
//!
//! Interpreting the *contents* of a stream (Word/Excel/PowerPoint
//! structures, VBA, embedded objects) is out of scope — this crate only
//! gets you the bytes.
//!
//! ## Example usage
//! ```rust
//! use compoundfiles::{Reader, Writer, WriterOptions, EntityId};
//!
//! let mut writer = Writer::new(WriterOptions::default());
//! writer.create_stream(EntityId::ROOT, "Greeting", b"hello".to_vec()).unwrap();
//! let bytes = writer.finish().unwrap();
//!
//! let reader = Reader::from_bytes(bytes).unwrap();
//! assert_eq!(reader.open_stream(&["Greeting"]).unwrap(), b"hello");
//! ```

mod allocation;
mod chain;
mod constants;
mod directory;
mod editor;
mod header;
mod reader;
mod sector;
mod stream;
mod tree;
mod writer;

pub mod error;
pub use error::{Error, Result};

pub use directory::{Entity, EntityKind};
pub use editor::Editor;
pub use reader::Reader;
pub use stream::StreamCursor;
pub use writer::{EntityId, Writer, WriterOptions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_reads_back_a_nested_document() {
        let mut writer = Writer::new(WriterOptions::default());
        let data_storage = writer.create_storage(EntityId::ROOT, "Data").unwrap();
        writer.create_stream(data_storage, "Stream1", b"hello compound world".to_vec()).unwrap();
        let bytes = writer.finish().unwrap();

        let reader = Reader::from_bytes(bytes).unwrap();
        assert_eq!(reader.list_storage().len(), 1);
        let data = reader.open_stream(&["Data", "Stream1"]).unwrap();
        assert_eq!(data, b"hello compound world");
    }

    #[test]
    fn empty_container_has_no_children() {
        let writer = Writer::new(WriterOptions::default());
        let bytes = writer.finish().unwrap();
        let reader = Reader::from_bytes(bytes).unwrap();
        assert!(reader.root().children().is_empty());
        assert_eq!(reader.root().size(), 0);
    }

    #[test]
    fn rejects_a_file_with_a_bad_magic_signature() {
        let bytes = vec![0u8; 512];
        let result = Reader::from_bytes(bytes);
        assert!(matches!(result, Err(Error::InvalidMagic)));
    }
}
