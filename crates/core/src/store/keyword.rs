//! In-process BM25 inverted index over chunk content and symbol names.

use crate::embed::tokenize;
use crate::error::Result;
use crate::store::KeywordIndex;
use crate::types::Chunk;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

/// BM25 parameters tuned down for code: identifier repetition should not
/// dominate, and chunk lengths are already bounded by the chunker.
const K1: f64 = 1.2;
const B: f64 = 0.75;

#[derive(Default, Serialize, Deserialize)]
struct IndexState {
    /// term → chunk id → term frequency.
    postings: HashMap<String, HashMap<String, u32>>,
    /// chunk id → token count.
    doc_len: HashMap<String, u32>,
    total_len: u64,
}

impl IndexState {
    fn avg_len(&self) -> f64 {
        if self.doc_len.is_empty() {
            0.0
        } else {
            self.total_len as f64 / self.doc_len.len() as f64
        }
    }

    /// Robertson-Sparck-Jones IDF with the +1 floor that keeps common
    /// terms from going negative.
    fn idf(&self, term: &str) -> f64 {
        let n = self.doc_len.len() as f64;
        let df = self.postings.get(term).map(|p| p.len()).unwrap_or(0) as f64;
        (((n - df + 0.5) / (df + 0.5)) + 1.0).ln()
    }
}

pub struct Bm25Index {
    path: PathBuf,
    state: RwLock<IndexState>,
}

impl Bm25Index {
    pub fn open(path: PathBuf) -> Result<Self> {
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, state: RwLock::new(state) })
    }
}

impl KeywordIndex for Bm25Index {
    fn add(&self, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        for chunk in chunks {
            // Re-adding an id replaces its previous posting contributions.
            remove_doc(&mut state, &chunk.id);

            let mut tokens = tokenize(&chunk.content);
            for sym in &chunk.symbols {
                tokens.extend(tokenize(&sym.name));
            }
            let len = tokens.len() as u32;
            let mut tf: HashMap<String, u32> = HashMap::new();
            for t in tokens {
                *tf.entry(t).or_insert(0) += 1;
            }
            for (term, count) in tf {
                state.postings.entry(term).or_default().insert(chunk.id.clone(), count);
            }
            state.doc_len.insert(chunk.id.clone(), len);
            state.total_len += len as u64;
        }
        Ok(())
    }

    fn remove(&self, ids: &[String]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        for id in ids {
            remove_doc(&mut state, id);
        }
        Ok(())
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<(String, f64)>> {
        let state = self.state.read().unwrap();
        let terms = tokenize(query);
        if terms.is_empty() || state.doc_len.is_empty() {
            return Ok(Vec::new());
        }
        let avg_len = state.avg_len();

        let mut scores: HashMap<&str, f64> = HashMap::new();
        for term in &terms {
            let Some(postings) = state.postings.get(term) else { continue };
            let idf = state.idf(term);
            for (id, &tf) in postings {
                let len = *state.doc_len.get(id).unwrap_or(&0) as f64;
                let tf = tf as f64;
                let denom = tf + K1 * (1.0 - B + B * len / avg_len.max(1.0));
                *scores.entry(id.as_str()).or_insert(0.0) += idf * tf * (K1 + 1.0) / denom;
            }
        }

        let mut ranked: Vec<(String, f64)> =
            scores.into_iter().map(|(id, s)| (id.to_string(), s)).collect();
        // Deterministic: score descending, then id ascending.
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    fn len(&self) -> usize {
        self.state.read().unwrap().doc_len.len()
    }

    fn save(&self) -> Result<()> {
        let state = self.state.read().unwrap();
        let bytes = serde_json::to_vec(&*state)?;
        std::fs::write(&self.path, bytes)?;
        debug!(path = %self.path.display(), docs = state.doc_len.len(), "keyword index saved");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.save()
    }
}

fn remove_doc(state: &mut IndexState, id: &str) {
    if let Some(len) = state.doc_len.remove(id) {
        state.total_len = state.total_len.saturating_sub(len as u64);
        state.postings.retain(|_, postings| {
            postings.remove(id);
            !postings.is_empty()
        });
    }
}
