//! Embedder capability interface and the deterministic hashing fallback.
//!
//! Real model servers live outside this crate; the service only depends on
//! this trait. The hashing embedder keeps the daemon functional with zero
//! model downloads and is fully deterministic, which the tests rely on.

use crate::error::{Error, Result};

/// Text-embedding capability. Implementations must be safe to share
/// across concurrent searches.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Convenience for query embedding.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vecs = self.embed(&[text])?;
        vecs.pop().ok_or_else(|| Error::Embed("embedder returned no vectors".into()))
    }
}

// ---------------------------------------------------------------------------
// Hashing fallback
// ---------------------------------------------------------------------------

pub const HASH_EMBEDDER_DIM: usize = 256;

/// Feature-hashing embedder: identifier-aware tokens and their bigrams are
/// hashed into a fixed number of buckets, L2-normalized. No model, no IO.
pub struct HashEmbedder {
    dim: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_EMBEDDER_DIM)
    }
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0f32; self.dim];
        let tokens = tokenize(text);
        for token in &tokens {
            vec[bucket(token, self.dim)] += 1.0;
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            vec[bucket(&bigram, self.dim)] += 0.5;
        }
        l2_normalize(&mut vec);
        vec
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

// ---------------------------------------------------------------------------
// Token and vector helpers
// ---------------------------------------------------------------------------

/// Lowercased word tokens; identifiers are split on `_` and camelCase
/// boundaries so `getUserById` and `get user by id` land near each other.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if raw.is_empty() {
            continue;
        }
        for piece in raw.split('_') {
            if piece.is_empty() {
                continue;
            }
            let mut word = String::new();
            let mut prev_lower = false;
            for ch in piece.chars() {
                if ch.is_uppercase() && prev_lower && !word.is_empty() {
                    out.push(word.to_lowercase());
                    word = String::new();
                }
                prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
                word.push(ch);
            }
            if !word.is_empty() {
                out.push(word.to_lowercase());
            }
        }
    }
    out
}

/// FNV-1a 64-bit, reduced to a bucket index. Stable across processes.
fn bucket(token: &str, dim: usize) -> usize {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET;
    for b in token.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash % dim as u64) as usize
}

fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two same-length vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_identifiers() {
        assert_eq!(tokenize("getUserById"), vec!["get", "user", "by", "id"]);
        assert_eq!(tokenize("parse_config_file"), vec!["parse", "config", "file"]);
        assert_eq!(tokenize("fn main() {}"), vec!["fn", "main"]);
    }

    #[test]
    fn test_embedding_is_deterministic_and_normalized() {
        let e = HashEmbedder::default();
        let a = e.embed_one("registry eviction policy").unwrap();
        let b = e.embed_one("registry eviction policy").unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_similar_texts_score_higher() {
        let e = HashEmbedder::default();
        let query = e.embed_one("evict least recently used project").unwrap();
        let close = e.embed_one("fn evict(&self) removes the least recently used project").unwrap();
        let far = e.embed_one("markdown table rendering widget").unwrap();
        assert!(cosine(&query, &close) > cosine(&query, &far));
    }

    #[test]
    fn test_batch_embed_shape() {
        let e = HashEmbedder::new(64);
        let vecs = e.embed(&["one", "two", "three"]).unwrap();
        assert_eq!(vecs.len(), 3);
        assert!(vecs.iter().all(|v| v.len() == 64));
    }
}
