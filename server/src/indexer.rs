//! Offline indexing pipeline: walk a project tree, chunk files in
//! parallel, embed, and populate the per-project stores.

use crate::registry::ProjectRegistry;
use amanmcp_core::chunker::{Chunker, ChunkerConfig};
use amanmcp_core::embed::Embedder;
use amanmcp_core::error::Result;
use amanmcp_core::store::DATA_DIR;
use amanmcp_core::types::Chunk;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Files larger than this are skipped outright.
const MAX_FILE_BYTES: u64 = 512 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOutcome {
    pub files: usize,
    pub chunks: usize,
}

/// Index (or re-index) a project root into its stores. Walks with
/// gitignore semantics, skips the data directory and configured excludes,
/// chunks in parallel, and saves all three stores at the end.
pub fn index_project(
    registry: &ProjectRegistry,
    embedder: Option<&dyn Embedder>,
    chunker_config: ChunkerConfig,
    exclude: &[String],
    root: &Path,
) -> Result<IndexOutcome> {
    let start = Instant::now();
    let handle = registry.acquire_or_init(root)?;
    let stores = handle.stores();
    let chunker = Chunker::new(chunker_config);

    // Collect candidate files first so chunking can fan out.
    let mut files: Vec<(String, std::path::PathBuf)> = Vec::new();
    let walker = WalkBuilder::new(root).follow_links(false).build();
    for entry in walker.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else { continue };
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if rel_str.starts_with(DATA_DIR) {
            continue;
        }
        if rel_str.split('/').any(|part| exclude.iter().any(|e| e == part)) {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            debug!(file = rel_str.as_str(), "skipping oversized or unreadable file");
            continue;
        }
        files.push((rel_str, path.to_path_buf()));
    }

    let chunked: Vec<(String, Vec<Chunk>)> = files
        .par_iter()
        .filter_map(|(rel, abs)| {
            let bytes = std::fs::read(abs).ok()?;
            let chunks = chunker.chunk(rel, &bytes, None);
            Some((rel.clone(), chunks))
        })
        .collect();

    let mut outcome = IndexOutcome::default();
    for (rel, chunks) in &chunked {
        // Re-indexing a file replaces everything it previously contributed.
        let stale = stores.metadata.remove_file(rel);
        if !stale.is_empty() {
            stores.keyword.remove(&stale)?;
            for id in &stale {
                stores.vector.remove(id)?;
            }
        }
        if chunks.is_empty() {
            continue;
        }

        stores.metadata.put_chunks(chunks)?;
        stores.keyword.add(chunks)?;

        if let Some(embedder) = embedder {
            let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
            match embedder.embed(&texts) {
                Ok(vectors) => {
                    for (chunk, vector) in chunks.iter().zip(vectors) {
                        stores.metadata.put_embedding(&chunk.id, vector.clone())?;
                        stores.vector.add(&chunk.id, &vector)?;
                    }
                }
                Err(e) => {
                    warn!(file = rel.as_str(), error = %e, "embedding failed, keyword-only for file");
                }
            }
        }

        outcome.files += 1;
        outcome.chunks += chunks.len();
    }

    stores.metadata.save()?;
    stores.keyword.save()?;
    stores.vector.save()?;

    info!(
        project = %root.display(),
        files = outcome.files,
        chunks = outcome.chunks,
        time_ms = start.elapsed().as_millis() as u64,
        "index complete"
    );
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
