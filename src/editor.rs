//! Editor: loads an existing container into an owned arena of entities
//! plus their stream payloads, applies `rename`/`delete`/`add_stream`/
//! `add_storage` mutations against that arena, and re-emits the whole
//! tree through [`crate::writer::Writer`] on `save`.
//!
//! Per spec's second open question, the arena's parent→children links
//! are the only source of truth; paths are never stored, only walked on
//! demand, so a rename can never leave a path-indexed mirror stale (the
//! hazard the original editor's hand-synchronized `structure` dict was
//! prone to).

use crate::constants::MAX_NAME_UTF16_UNITS;
use crate::directory::EntityKind;
use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::tree::names_equal_ignore_case;
use crate::writer::{EntityId, Writer, WriterOptions};
use std::path::{Path, PathBuf};

struct EditEntity {
    name: String,
    kind: EntityKind,
    data: Vec<u8>,
    children: Vec<usize>,
    parent: Option<usize>,
}

pub struct Editor {
    entities: Vec<EditEntity>,
    source_path: Option<PathBuf>,
}

impl Editor {
    #[cfg(feature = "async")]
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::from_file(path.as_ref()).await?;
        Self::from_reader(reader, Some(path.as_ref().to_path_buf()))
    }

    #[cfg(feature = "blocking")]
    pub fn open_blocking<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::from_file_blocking(path.as_ref())?;
        Self::from_reader(reader, Some(path.as_ref().to_path_buf()))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let reader = Reader::from_bytes(bytes)?;
        Self::from_reader(reader, None)
    }

    /// The path this editor was opened from, if any (it was not
    /// necessarily opened from a path — see [`Editor::from_bytes`]).
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    fn from_reader(reader: Reader, source_path: Option<PathBuf>) -> Result<Self> {
        let mut entities = Vec::new();
        clone_subtree(&reader, 0, None, &mut entities)?;
        Ok(Editor { entities, source_path })
    }

    fn resolve(&self, path: &str) -> Result<usize> {
        let mut current = 0usize;
        for segment in split_path(path) {
            let next = self.entities[current]
                .children
                .iter()
                .copied()
                .find(|&c| names_equal_ignore_case(&self.entities[c].name, segment));
            current = next.ok_or_else(|| Error::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    fn validate_new_child(&self, parent: usize, name: &str) -> Result<()> {
        if !matches!(self.entities[parent].kind, EntityKind::Root | EntityKind::Storage) {
            return Err(Error::WriteError(format!(
                "'{}' is not a storage",
                self.entities[parent].name
            )));
        }
        if name.encode_utf16().count() > MAX_NAME_UTF16_UNITS {
            return Err(Error::WriteError(format!(
                "name '{name}' exceeds {MAX_NAME_UTF16_UNITS} UTF-16 code units"
            )));
        }
        if self.entities[parent]
            .children
            .iter()
            .any(|&c| names_equal_ignore_case(&self.entities[c].name, name))
        {
            return Err(Error::WriteError(format!("sibling named '{name}' already exists")));
        }
        Ok(())
    }

    /// Renames the entity at `path` to `new_name`. Fails if `path` is the
    /// root, if no entity exists there, or if a sibling already carries
    /// `new_name` (case-insensitive).
    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<()> {
        let idx = self.resolve(path)?;
        if idx == 0 {
            return Err(Error::WriteError("cannot rename the root entry".into()));
        }
        if new_name.encode_utf16().count() > MAX_NAME_UTF16_UNITS {
            return Err(Error::WriteError(format!(
                "name '{new_name}' exceeds {MAX_NAME_UTF16_UNITS} UTF-16 code units"
            )));
        }
        let parent = self.entities[idx].parent.expect("non-root entity always has a parent");
        if self.entities[parent]
            .children
            .iter()
            .any(|&c| c != idx && names_equal_ignore_case(&self.entities[c].name, new_name))
        {
            return Err(Error::WriteError(format!("sibling named '{new_name}' already exists")));
        }
        self.entities[idx].name = new_name.to_string();
        Ok(())
    }

    /// Deletes the entity at `path`, and (if it's a storage) everything
    /// beneath it. The removed subtree stays in the arena, unreachable
    /// from the root, so it is simply never visited when `save` walks
    /// the tree.
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let idx = self.resolve(path)?;
        if idx == 0 {
            return Err(Error::WriteError("cannot delete the root entry".into()));
        }
        let parent = self.entities[idx].parent.expect("non-root entity always has a parent");
        self.entities[parent].children.retain(|&c| c != idx);
        Ok(())
    }

    /// Adds a new stream under the storage at `parent_path`.
    pub fn add_stream(&mut self, parent_path: &str, name: &str, data: Vec<u8>) -> Result<()> {
        let parent = self.resolve(parent_path)?;
        self.validate_new_child(parent, name)?;
        let idx = self.entities.len();
        self.entities.push(EditEntity {
            name: name.to_string(),
            kind: EntityKind::Stream,
            data,
            children: Vec::new(),
            parent: Some(parent),
        });
        self.entities[parent].children.push(idx);
        Ok(())
    }

    /// Adds a new, empty storage under the storage at `parent_path`.
    pub fn add_storage(&mut self, parent_path: &str, name: &str) -> Result<()> {
        let parent = self.resolve(parent_path)?;
        self.validate_new_child(parent, name)?;
        let idx = self.entities.len();
        self.entities.push(EditEntity {
            name: name.to_string(),
            kind: EntityKind::Storage,
            data: Vec::new(),
            children: Vec::new(),
            parent: Some(parent),
        });
        self.entities[parent].children.push(idx);
        Ok(())
    }

    fn build_writer(&self) -> Result<Writer> {
        let mut writer = Writer::new(WriterOptions::default());
        self.recreate(0, EntityId::ROOT, &mut writer)?;
        Ok(writer)
    }

    fn recreate(&self, index: usize, target: EntityId, writer: &mut Writer) -> Result<()> {
        for &child in &self.entities[index].children {
            let entity = &self.entities[child];
            match entity.kind {
                EntityKind::Stream => {
                    writer.create_stream(target, &entity.name, entity.data.clone())?;
                }
                EntityKind::Storage => {
                    let storage = writer.create_storage(target, &entity.name)?;
                    self.recreate(child, storage, writer)?;
                }
                EntityKind::Root | EntityKind::Invalid => {
                    return Err(Error::Internal("root/invalid entity cannot appear as a child".into()));
                }
            }
        }
        Ok(())
    }

    /// Serializes the mutated tree to bytes without touching the
    /// filesystem.
    pub fn finish(&self) -> Result<Vec<u8>> {
        self.build_writer()?.finish()
    }

    #[cfg(feature = "async")]
    pub async fn save<P: AsRef<Path>>(&self, target: P) -> Result<()> {
        self.build_writer()?.write_to_file(target).await
    }

    #[cfg(feature = "blocking")]
    pub fn save_blocking<P: AsRef<Path>>(&self, target: P) -> Result<()> {
        self.build_writer()?.write_to_file_blocking(target)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn clone_subtree(reader: &Reader, index: usize, parent: Option<usize>, out: &mut Vec<EditEntity>) -> Result<usize> {
    let entity = reader
        .entity(index)
        .ok_or_else(|| Error::Internal("dangling directory index while cloning for edit".into()))?;
    let kind = if index == 0 {
        EntityKind::Root
    } else if entity.is_stream() {
        EntityKind::Stream
    } else {
        EntityKind::Storage
    };
    let data = if entity.is_stream() { reader.read_entity(entity)? } else { Vec::new() };
    let name = entity.name().to_string();
    let child_indices = entity.children().to_vec();

    let new_index = out.len();
    out.push(EditEntity {
        name,
        kind,
        data,
        children: Vec::new(),
        parent,
    });

    for child in child_indices {
        let child_new_index = clone_subtree(reader, child, Some(new_index), out)?;
        out[new_index].children.push(child_new_index);
    }
    Ok(new_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_container() -> Vec<u8> {
        let mut writer = Writer::new(WriterOptions::default());
        let a = writer.create_storage(EntityId::ROOT, "A").unwrap();
        let b = writer.create_storage(a, "B").unwrap();
        writer.create_stream(b, "leaf", b"data".to_vec()).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn renames_a_nested_storage() {
        let bytes = sample_container();
        let mut editor = Editor::from_bytes(bytes).unwrap();
        editor.rename("/A/B", "C").unwrap();
        let out = editor.finish().unwrap();

        let reader = Reader::from_bytes(out).unwrap();
        assert_eq!(reader.open_stream(&["A", "C", "leaf"]).unwrap(), b"data");
        assert!(reader.find(&["A", "B"]).is_none());
    }

    #[test]
    fn deletes_a_subtree() {
        let bytes = sample_container();
        let mut editor = Editor::from_bytes(bytes).unwrap();
        editor.delete("/A/B").unwrap();
        let out = editor.finish().unwrap();

        let reader = Reader::from_bytes(out).unwrap();
        assert!(reader.find(&["A", "B"]).is_none());
        assert!(reader.find(&["A"]).is_some());
    }

    #[test]
    fn adds_a_stream_and_storage() {
        let bytes = sample_container();
        let mut editor = Editor::from_bytes(bytes).unwrap();
        editor.add_storage("/A", "D").unwrap();
        editor.add_stream("/A/D", "new", vec![1, 2, 3]).unwrap();
        let out = editor.finish().unwrap();

        let reader = Reader::from_bytes(out).unwrap();
        assert_eq!(reader.open_stream(&["A", "D", "new"]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn rejects_renaming_onto_an_existing_sibling() {
        let bytes = sample_container();
        let mut editor = Editor::from_bytes(bytes).unwrap();
        editor.add_stream("/A", "sibling", vec![]).unwrap();
        assert!(editor.rename("/A/B", "sibling").is_err());
    }

    #[test]
    fn rejects_deleting_the_root() {
        let bytes = sample_container();
        let mut editor = Editor::from_bytes(bytes).unwrap();
        assert!(editor.delete("/").is_err());
    }
}
