//! Flat vector index: contiguous embedding rows with brute-force cosine
//! search and logical deletion.
//!
//! Removal marks a row as an orphan but leaves it occupying its slot;
//! orphans are invisible to search yet still cost memory and scan time,
//! which is what the compaction manager exists to reclaim.

use crate::embed::cosine;
use crate::error::{Error, Result};
use crate::store::VectorIndex;
use crate::types::VectorStats;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

#[derive(Default, Serialize, Deserialize)]
struct VectorState {
    dim: usize,
    ids: Vec<String>,
    /// Row-major `ids.len() * dim` floats.
    vectors: Vec<f32>,
    orphaned: Vec<bool>,
    #[serde(skip)]
    by_id: HashMap<String, usize>,
}

impl VectorState {
    fn rebuild_lookup(&mut self) {
        self.by_id = self.ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dim..(i + 1) * self.dim]
    }
}

pub struct FlatVectorIndex {
    path: PathBuf,
    state: RwLock<VectorState>,
}

impl FlatVectorIndex {
    pub fn open(path: PathBuf) -> Result<Self> {
        let mut state: VectorState = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VectorState::default(),
            Err(e) => return Err(e.into()),
        };
        state.rebuild_lookup();
        Ok(Self { path, state: RwLock::new(state) })
    }

    /// A fresh, empty index with a fixed dimensionality. Used by the
    /// compaction rebuild; shares the live index's on-disk path so `save`
    /// replaces it.
    pub fn fresh(path: PathBuf, dim: usize) -> Self {
        let state = VectorState { dim, ..Default::default() };
        Self { path, state: RwLock::new(state) }
    }
}

impl VectorIndex for FlatVectorIndex {
    fn add(&self, id: &str, vector: &[f32]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.dim == 0 {
            state.dim = vector.len();
        }
        if vector.len() != state.dim {
            return Err(Error::Store(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                state.dim
            )));
        }
        if let Some(&i) = state.by_id.get(id) {
            let dim = state.dim;
            state.vectors[i * dim..(i + 1) * dim].copy_from_slice(vector);
            state.orphaned[i] = false;
            return Ok(());
        }
        let i = state.ids.len();
        state.ids.push(id.to_string());
        state.vectors.extend_from_slice(vector);
        state.orphaned.push(false);
        state.by_id.insert(id.to_string(), i);
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(&i) = state.by_id.get(id) {
            state.orphaned[i] = true;
        }
        Ok(())
    }

    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f64)>> {
        let state = self.state.read().unwrap();
        if state.dim == 0 || state.ids.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != state.dim {
            return Err(Error::Store(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                state.dim
            )));
        }

        let mut scored: Vec<(String, f64)> = state
            .ids
            .iter()
            .enumerate()
            .filter(|(i, _)| !state.orphaned[*i])
            .map(|(i, id)| (id.clone(), cosine(query, state.row(i)) as f64))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    fn stats(&self) -> VectorStats {
        let state = self.state.read().unwrap();
        VectorStats {
            nodes: state.ids.len(),
            orphans: state.orphaned.iter().filter(|o| **o).count(),
            dim: state.dim,
        }
    }

    fn dim(&self) -> usize {
        self.state.read().unwrap().dim
    }

    fn save(&self) -> Result<()> {
        let state = self.state.read().unwrap();
        let bytes = serde_json::to_vec(&*state)?;
        std::fs::write(&self.path, bytes)?;
        debug!(
            path = %self.path.display(),
            nodes = state.ids.len(),
            "vector index saved"
        );
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, FlatVectorIndex) {
        let dir = tempfile::tempdir().unwrap();
        let idx = FlatVectorIndex::open(dir.path().join("vectors.json")).unwrap();
        (dir, idx)
    }

    #[test]
    fn test_nearest_neighbor_order() {
        let (_dir, idx) = open_temp();
        idx.add("a", &[1.0, 0.0]).unwrap();
        idx.add("b", &[0.0, 1.0]).unwrap();
        idx.add("c", &[0.7, 0.7]).unwrap();

        let hits = idx.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].0, "a");
        assert_eq!(hits[1].0, "c");
        assert_eq!(hits[2].0, "b");
    }

    #[test]
    fn test_remove_marks_orphan_and_hides_from_search() {
        let (_dir, idx) = open_temp();
        idx.add("a", &[1.0, 0.0]).unwrap();
        idx.add("b", &[0.9, 0.1]).unwrap();
        idx.remove("a").unwrap();

        let stats = idx.stats();
        assert_eq!(stats.nodes, 2, "orphan keeps its slot");
        assert_eq!(stats.orphans, 1);

        let hits = idx.search(&[1.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "b");
    }

    #[test]
    fn test_readd_clears_orphan() {
        let (_dir, idx) = open_temp();
        idx.add("a", &[1.0, 0.0]).unwrap();
        idx.remove("a").unwrap();
        idx.add("a", &[0.0, 1.0]).unwrap();

        assert_eq!(idx.stats().orphans, 0);
        let hits = idx.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].0, "a");
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let (_dir, idx) = open_temp();
        idx.add("a", &[1.0, 0.0]).unwrap();
        assert!(idx.add("b", &[1.0, 0.0, 0.0]).is_err());
        assert!(idx.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_persistence_keeps_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        {
            let idx = FlatVectorIndex::open(path.clone()).unwrap();
            idx.add("a", &[1.0, 0.0]).unwrap();
            idx.add("b", &[0.0, 1.0]).unwrap();
            idx.remove("b").unwrap();
            idx.save().unwrap();
        }
        let idx = FlatVectorIndex::open(path).unwrap();
        let stats = idx.stats();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.orphans, 1);
        assert_eq!(stats.dim, 2);
    }

    #[test]
    fn test_fresh_index_is_empty_with_fixed_dim() {
        let dir = tempfile::tempdir().unwrap();
        let idx = FlatVectorIndex::fresh(dir.path().join("vectors.json"), 4);
        assert_eq!(idx.dim(), 4);
        assert_eq!(idx.stats().nodes, 0);
        assert!(idx.search(&[0.0, 0.0, 0.0, 0.0], 5).unwrap().is_empty());
    }
}
