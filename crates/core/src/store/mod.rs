//! Polymorphic project stores: metadata, keyword, and vector indexes.
//!
//! The service consumes these through capability traits so backends can be
//! swapped without touching the engine. Methods take `&self` and the
//! implementations carry interior locks, so handles are shared as
//! `Arc<dyn …>` across concurrent searches. The vector trait keeps
//! `stats()` and the module keeps a fresh-instance constructor — both are
//! needed by the compaction manager.

pub mod keyword;
pub mod metadata;
pub mod vector;

use crate::error::Result;
use crate::types::{Chunk, VectorStats};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-project data directory under the project root.
pub const DATA_DIR: &str = ".amanmcp";
pub const METADATA_FILE: &str = "metadata.json";
pub const BM25_FILE: &str = "bm25.json";
pub const VECTORS_FILE: &str = "vectors.json";

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// Canonical store for chunks and their embeddings.
pub trait MetadataStore: Send + Sync {
    fn put_chunks(&self, chunks: &[Chunk]) -> Result<()>;
    fn get_chunk(&self, id: &str) -> Option<Chunk>;
    fn chunk_count(&self) -> usize;
    fn put_embedding(&self, id: &str, vector: Vec<f32>) -> Result<()>;
    /// All canonical embeddings, keyed by chunk id. The compaction rebuild
    /// reads these.
    fn embeddings(&self) -> BTreeMap<String, Vec<f32>>;
    /// Remove every chunk of a file; returns the removed chunk ids.
    fn remove_file(&self, file_path: &str) -> Vec<String>;
    fn save(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
}

/// Lexical (BM25) index over chunk content.
pub trait KeywordIndex: Send + Sync {
    fn add(&self, chunks: &[Chunk]) -> Result<()>;
    fn remove(&self, ids: &[String]) -> Result<()>;
    /// Ranked `(chunk_id, score)` pairs, best first.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<(String, f64)>>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn save(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
}

/// Approximate-nearest-neighbor index over chunk embeddings. Deletion is
/// logical: removed entries stay in the graph as orphans until compaction
/// rebuilds the index.
pub trait VectorIndex: Send + Sync {
    fn add(&self, id: &str, vector: &[f32]) -> Result<()>;
    fn remove(&self, id: &str) -> Result<()>;
    /// Ranked `(chunk_id, similarity)` pairs, best first. Orphans are
    /// never returned.
    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f64)>>;
    fn stats(&self) -> VectorStats;
    fn dim(&self) -> usize;
    fn save(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Store triple
// ---------------------------------------------------------------------------

/// The three store handles of one project, grabbed atomically by the
/// engine on entry to a search.
#[derive(Clone)]
pub struct ProjectStores {
    pub metadata: Arc<dyn MetadataStore>,
    pub keyword: Arc<dyn KeywordIndex>,
    pub vector: Arc<dyn VectorIndex>,
}

/// Project data directory (`<root>/.amanmcp`), created on demand by
/// `open_project_stores`.
pub fn project_data_dir(root: &Path) -> PathBuf {
    root.join(DATA_DIR)
}

/// Open (load-or-create) the store triple for a project root.
pub fn open_project_stores(root: &Path) -> Result<ProjectStores> {
    let dir = project_data_dir(root);
    std::fs::create_dir_all(&dir)?;
    Ok(ProjectStores {
        metadata: Arc::new(metadata::JsonMetadataStore::open(dir.join(METADATA_FILE))?),
        keyword: Arc::new(keyword::Bm25Index::open(dir.join(BM25_FILE))?),
        vector: Arc::new(vector::FlatVectorIndex::open(dir.join(VECTORS_FILE))?),
    })
}

/// A fresh, empty vector index for the project, used by the compaction
/// rebuild. It persists to the same path the live index uses and replaces
/// it on save.
pub fn fresh_vector_index(root: &Path, dim: usize) -> vector::FlatVectorIndex {
    vector::FlatVectorIndex::fresh(project_data_dir(root).join(VECTORS_FILE), dim)
}
