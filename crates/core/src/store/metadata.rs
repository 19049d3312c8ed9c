//! JSON-file metadata store: the canonical record of chunks, symbols, and
//! embeddings for one project.

use crate::error::Result;
use crate::store::MetadataStore;
use crate::types::Chunk;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

#[derive(Default, Serialize, Deserialize)]
struct MetadataState {
    chunks: BTreeMap<String, Chunk>,
    embeddings: BTreeMap<String, Vec<f32>>,
}

pub struct JsonMetadataStore {
    path: PathBuf,
    state: RwLock<MetadataState>,
}

impl JsonMetadataStore {
    /// Load from `path`, or start empty when the file does not exist.
    pub fn open(path: PathBuf) -> Result<Self> {
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MetadataState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, state: RwLock::new(state) })
    }
}

impl MetadataStore for JsonMetadataStore {
    fn put_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        for chunk in chunks {
            state.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    fn get_chunk(&self, id: &str) -> Option<Chunk> {
        self.state.read().unwrap().chunks.get(id).cloned()
    }

    fn chunk_count(&self) -> usize {
        self.state.read().unwrap().chunks.len()
    }

    fn put_embedding(&self, id: &str, vector: Vec<f32>) -> Result<()> {
        self.state.write().unwrap().embeddings.insert(id.to_string(), vector);
        Ok(())
    }

    fn embeddings(&self) -> BTreeMap<String, Vec<f32>> {
        self.state.read().unwrap().embeddings.clone()
    }

    fn remove_file(&self, file_path: &str) -> Vec<String> {
        let mut state = self.state.write().unwrap();
        let ids: Vec<String> = state
            .chunks
            .iter()
            .filter(|(_, c)| c.file_path == file_path)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            state.chunks.remove(id);
            state.embeddings.remove(id);
        }
        ids
    }

    fn save(&self) -> Result<()> {
        let state = self.state.read().unwrap();
        let bytes = serde_json::to_vec(&*state)?;
        std::fs::write(&self.path, bytes)?;
        debug!(path = %self.path.display(), chunks = state.chunks.len(), "metadata saved");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentType;

    fn sample_chunk(path: &str, body: &str) -> Chunk {
        Chunk::new(
            path,
            body.to_string(),
            String::new(),
            ContentType::Code,
            Some("rust".to_string()),
            1,
            1,
            vec![],
        )
    }

    #[test]
    fn test_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");

        let store = JsonMetadataStore::open(path.clone()).unwrap();
        let chunk = sample_chunk("src/a.rs", "fn a() {}");
        store.put_chunks(std::slice::from_ref(&chunk)).unwrap();
        store.put_embedding(&chunk.id, vec![0.1, 0.2]).unwrap();
        store.save().unwrap();

        let reopened = JsonMetadataStore::open(path).unwrap();
        assert_eq!(reopened.chunk_count(), 1);
        assert_eq!(reopened.get_chunk(&chunk.id).unwrap().raw_content, "fn a() {}");
        assert_eq!(reopened.embeddings().get(&chunk.id).unwrap(), &vec![0.1, 0.2]);
    }

    #[test]
    fn test_remove_file_drops_chunks_and_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMetadataStore::open(dir.path().join("metadata.json")).unwrap();

        let a = sample_chunk("src/a.rs", "fn a() {}");
        let b = sample_chunk("src/b.rs", "fn b() {}");
        store.put_chunks(&[a.clone(), b.clone()]).unwrap();
        store.put_embedding(&a.id, vec![1.0]).unwrap();

        let removed = store.remove_file("src/a.rs");
        assert_eq!(removed, vec![a.id.clone()]);
        assert!(store.get_chunk(&a.id).is_none());
        assert!(store.get_chunk(&b.id).is_some());
        assert!(store.embeddings().is_empty());
    }
}
