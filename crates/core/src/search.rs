//! Hybrid search engine: keyword and vector legs run in parallel and are
//! fused with Reciprocal Rank Fusion.
//!
//! Partial availability is a normal outcome — a failed or skipped semantic
//! leg degrades to keyword-only and is flagged in the ExplainBlock. Only
//! when no leg produced anything does a search fail.

use crate::classify::QueryClassifier;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::store::ProjectStores;
use crate::types::{Chunk, ContentType, ExplainBlock, SearchResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_RRF_K: f64 = 60.0;
pub const DEFAULT_LIMIT: usize = 10;

/// One local retry per backend call, after this backoff.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);
/// Display excerpt budget per result.
const EXCERPT_CHARS: usize = 400;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Content-type scope of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentFilter {
    #[default]
    All,
    Code,
    Docs,
}

impl ContentFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(ContentFilter::All),
            "code" => Some(ContentFilter::Code),
            "docs" => Some(ContentFilter::Docs),
            _ => None,
        }
    }

    fn admits(&self, ct: ContentType) -> bool {
        match self {
            ContentFilter::All => true,
            ContentFilter::Code => ct == ContentType::Code,
            ContentFilter::Docs => matches!(ct, ContentType::Markdown | ContentType::Text),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub content: ContentFilter,
    pub language: Option<String>,
    /// Path-prefix scopes; empty admits everything.
    pub scopes: Vec<String>,
}

impl SearchFilters {
    fn admits(&self, chunk: &Chunk) -> bool {
        if !self.content.admits(chunk.content_type) {
            return false;
        }
        if let Some(lang) = &self.language {
            if chunk.language.as_deref() != Some(lang.as_str()) {
                return false;
            }
        }
        if !self.scopes.is_empty()
            && !self.scopes.iter().any(|s| chunk.file_path.starts_with(s.as_str()))
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub filters: SearchFilters,
    /// Explicit `(bm25, semantic)` weights; bypasses the classifier.
    pub weights: Option<(f64, f64)>,
    pub bm25_only: bool,
    pub explain: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        SearchRequest {
            query: query.into(),
            limit: DEFAULT_LIMIT,
            filters: SearchFilters::default(),
            weights: None,
            bm25_only: false,
            explain: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct HybridSearchEngine {
    classifier: Arc<QueryClassifier>,
    rrf_k: f64,
}

impl Default for HybridSearchEngine {
    fn default() -> Self {
        Self::new(Arc::new(QueryClassifier::default()), DEFAULT_RRF_K)
    }
}

impl HybridSearchEngine {
    pub fn new(classifier: Arc<QueryClassifier>, rrf_k: f64) -> Self {
        Self { classifier, rrf_k }
    }

    /// Run a hybrid search over one project's store triple.
    pub fn search(
        &self,
        stores: &ProjectStores,
        embedder: Option<&dyn Embedder>,
        req: &SearchRequest,
    ) -> Result<Vec<SearchResult>> {
        let query = req.query.trim();
        if query.is_empty() {
            return Err(Error::InvalidParams("query must not be empty".into()));
        }
        let limit = if req.limit == 0 { DEFAULT_LIMIT } else { req.limit };

        // Resolve weights: explicit wins, otherwise classify.
        let (query_kind, w_bm25, w_sem) = match req.weights {
            Some((b, s)) => ("explicit".to_string(), b, s),
            None => {
                let c = self.classifier.classify(query);
                (c.kind.as_str().to_string(), c.bm25_weight, c.semantic_weight)
            }
        };

        // Decide whether the semantic leg runs at all.
        let vector_dim = stores.vector.dim();
        let skip_reason: Option<&str> = if req.bm25_only {
            Some("bm25_only")
        } else {
            match embedder {
                None => Some("no_embedder"),
                Some(e) if vector_dim != 0 && e.dim() != vector_dim => Some("dimension_mismatch"),
                Some(_) => None,
            }
        };

        let cap = (limit * 5).max(100);

        let (keyword_leg, semantic_leg) = rayon::join(
            || retry_once(|| stores.keyword.search(query, cap)),
            || match skip_reason {
                Some(_) => Ok(Vec::new()),
                None => {
                    let embedder = embedder.expect("semantic leg runs only with an embedder");
                    let vector = embedder.embed_one(query)?;
                    retry_once(|| stores.vector.search(&vector, cap))
                }
            },
        );

        let keyword_ok = keyword_leg.is_ok();
        let semantic_ran = skip_reason.is_none();
        let semantic_ok = semantic_ran && semantic_leg.is_ok();

        if !keyword_ok && !semantic_ok {
            if let Err(e) = &keyword_leg {
                warn!(error = %e, "keyword backend failed");
            }
            if semantic_ran {
                if let Err(e) = &semantic_leg {
                    warn!(error = %e, "vector backend failed");
                }
            }
            return Err(Error::SearchFailed("keyword and vector backends both failed".into()));
        }

        let fallback_reason = if let Some(r) = skip_reason {
            Some(r.to_string())
        } else if !semantic_ok {
            Some("vector_backend_error".to_string())
        } else {
            None
        };

        // Filter both legs against chunk metadata; ranks are assigned
        // after filtering.
        let mut chunks: HashMap<String, Chunk> = HashMap::new();
        let keyword_hits =
            self.filter_leg(stores, keyword_leg.unwrap_or_default(), &req.filters, &mut chunks);
        let semantic_hits =
            self.filter_leg(stores, semantic_leg.unwrap_or_default(), &req.filters, &mut chunks);

        debug!(
            query = query,
            kind = query_kind.as_str(),
            keyword = keyword_hits.len(),
            semantic = semantic_hits.len(),
            "search legs complete"
        );

        // Reciprocal Rank Fusion. A missing rank contributes 0.
        #[derive(Default)]
        struct Fused {
            bm25_rank: Option<usize>,
            bm25_score: Option<f64>,
            semantic_rank: Option<usize>,
            semantic_score: Option<f64>,
        }
        let mut fused: HashMap<&str, Fused> = HashMap::new();
        for (rank, (id, score)) in keyword_hits.iter().enumerate() {
            let e = fused.entry(id.as_str()).or_default();
            e.bm25_rank = Some(rank + 1);
            e.bm25_score = Some(*score);
        }
        for (rank, (id, score)) in semantic_hits.iter().enumerate() {
            let e = fused.entry(id.as_str()).or_default();
            e.semantic_rank = Some(rank + 1);
            e.semantic_score = Some(*score);
        }

        let k = self.rrf_k;
        let mut ranked: Vec<(&str, f64, usize, Fused)> = fused
            .into_iter()
            .map(|(id, f)| {
                let score = f.bm25_rank.map(|r| w_bm25 / (k + r as f64)).unwrap_or(0.0)
                    + f.semantic_rank.map(|r| w_sem / (k + r as f64)).unwrap_or(0.0);
                let best_rank =
                    f.bm25_rank.unwrap_or(usize::MAX).min(f.semantic_rank.unwrap_or(usize::MAX));
                (id, score, best_rank, f)
            })
            .collect();
        // Score descending; ties by better present rank, then smaller id.
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.2.cmp(&b.2))
                .then_with(|| a.0.cmp(b.0))
        });
        ranked.truncate(limit);

        let mut results = Vec::with_capacity(ranked.len());
        for (i, (id, score, _, f)) in ranked.into_iter().enumerate() {
            let chunk = &chunks[id];
            let mut result = SearchResult {
                file_path: chunk.file_path.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                content: excerpt(&chunk.raw_content),
                language: chunk.language.clone(),
                score,
                bm25_rank: None,
                bm25_score: None,
                semantic_rank: None,
                semantic_score: None,
                explain: None,
            };
            if req.explain {
                result.bm25_rank = f.bm25_rank;
                result.bm25_score = f.bm25_score;
                result.semantic_rank = f.semantic_rank;
                result.semantic_score = f.semantic_score;
                if i == 0 {
                    result.explain = Some(ExplainBlock {
                        query_kind: query_kind.clone(),
                        bm25_weight: w_bm25,
                        semantic_weight: w_sem,
                        rrf_k: k,
                        keyword_available: keyword_ok,
                        semantic_available: semantic_ok,
                        keyword_candidates: keyword_hits.len(),
                        semantic_candidates: semantic_hits.len(),
                        fallback_reason: fallback_reason.clone(),
                    });
                }
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Resolve leg hits to chunks, apply filters, and cache the chunks for
    /// result assembly. Ids without a metadata record are dropped.
    fn filter_leg(
        &self,
        stores: &ProjectStores,
        hits: Vec<(String, f64)>,
        filters: &SearchFilters,
        chunks: &mut HashMap<String, Chunk>,
    ) -> Vec<(String, f64)> {
        hits.into_iter()
            .filter(|(id, _)| {
                if let Some(chunk) = chunks.get(id) {
                    return filters.admits(chunk);
                }
                match stores.metadata.get_chunk(id) {
                    Some(chunk) => {
                        let ok = filters.admits(&chunk);
                        chunks.insert(id.clone(), chunk);
                        ok
                    }
                    None => false,
                }
            })
            .collect()
    }
}

fn retry_once<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    match op() {
        Ok(v) => Ok(v),
        Err(first) => {
            debug!(error = %first, "backend call failed, retrying once");
            std::thread::sleep(RETRY_BACKOFF);
            op()
        }
    }
}

fn excerpt(content: &str) -> String {
    if content.len() <= EXCERPT_CHARS {
        return content.to_string();
    }
    let mut end = EXCERPT_CHARS;
    while !content.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}…", &content[..end])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::store::open_project_stores;
    use crate::types::Symbol;
    use crate::types::SymbolKind;

    fn chunk(path: &str, body: &str, ct: ContentType, lang: Option<&str>) -> Chunk {
        let symbols = vec![Symbol {
            name: body.split_whitespace().nth(1).unwrap_or("sym").to_string(),
            kind: SymbolKind::Function,
            start_line: 1,
            end_line: 1,
            signature: None,
            doc: None,
        }];
        Chunk::new(
            path,
            body.to_string(),
            String::new(),
            ct,
            lang.map(|l| l.to_string()),
            1,
            1,
            symbols,
        )
    }

    /// Build a populated store triple in a temp dir.
    fn seeded() -> (tempfile::TempDir, ProjectStores, HashEmbedder) {
        let dir = tempfile::tempdir().unwrap();
        let stores = open_project_stores(dir.path()).unwrap();
        let embedder = HashEmbedder::default();

        let chunks = vec![
            chunk("src/registry.rs", "fn evict_project() { lru eviction of project handles }", ContentType::Code, Some("rust")),
            chunk("src/rpc.rs", "fn dispatch() { json rpc method dispatch }", ContentType::Code, Some("rust")),
            chunk("docs/guide.md", "eviction guide for operators", ContentType::Markdown, None),
            chunk("pkg/compact.go", "func rebuild() { vector index rebuild }", ContentType::Code, Some("go")),
        ];
        stores.metadata.put_chunks(&chunks).unwrap();
        stores.keyword.add(&chunks).unwrap();
        for c in &chunks {
            let v = embedder.embed_one(&c.content).unwrap();
            stores.metadata.put_embedding(&c.id, v.clone()).unwrap();
            stores.vector.add(&c.id, &v).unwrap();
        }
        (dir, stores, embedder)
    }

    #[test]
    fn test_empty_query_is_invalid_params() {
        let (_dir, stores, embedder) = seeded();
        let engine = HybridSearchEngine::default();
        let err = engine
            .search(&stores, Some(&embedder), &SearchRequest::new("   "))
            .unwrap_err();
        assert_eq!(err.rpc_code(), crate::error::codes::INVALID_PARAMS);
        assert!(err.to_string().contains("query"));
    }

    #[test]
    fn test_hybrid_finds_relevant_chunk() {
        let (_dir, stores, embedder) = seeded();
        let engine = HybridSearchEngine::default();
        let results = engine
            .search(&stores, Some(&embedder), &SearchRequest::new("lru eviction"))
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].file_path, "src/registry.rs");
    }

    #[test]
    fn test_bm25_only_mode_flags_fallback() {
        let (_dir, stores, embedder) = seeded();
        let engine = HybridSearchEngine::default();
        let mut req = SearchRequest::new("eviction");
        req.bm25_only = true;
        req.explain = true;
        let results = engine.search(&stores, Some(&embedder), &req).unwrap();
        let explain = results[0].explain.as_ref().unwrap();
        assert!(!explain.semantic_available);
        assert_eq!(explain.fallback_reason.as_deref(), Some("bm25_only"));
    }

    #[test]
    fn test_dimension_mismatch_falls_back_to_keyword() {
        let (_dir, stores, _embedder) = seeded();
        // An embedder whose dimensionality disagrees with the index.
        let small = HashEmbedder::new(16);
        let engine = HybridSearchEngine::default();
        let mut req = SearchRequest::new("eviction");
        req.explain = true;
        let results = engine.search(&stores, Some(&small), &req).unwrap();
        let explain = results[0].explain.as_ref().unwrap();
        assert_eq!(explain.fallback_reason.as_deref(), Some("dimension_mismatch"));
        assert!(!results.is_empty());
    }

    #[test]
    fn test_filters_scope_language_content() {
        let (_dir, stores, embedder) = seeded();
        let engine = HybridSearchEngine::default();

        let mut req = SearchRequest::new("eviction");
        req.filters.content = ContentFilter::Docs;
        let results = engine.search(&stores, Some(&embedder), &req).unwrap();
        assert!(results.iter().all(|r| r.file_path.starts_with("docs/")));

        let mut req = SearchRequest::new("rebuild");
        req.filters.language = Some("go".to_string());
        let results = engine.search(&stores, Some(&embedder), &req).unwrap();
        assert!(results.iter().all(|r| r.language.as_deref() == Some("go")));

        let mut req = SearchRequest::new("eviction rpc rebuild");
        req.filters.scopes = vec!["src/".to_string()];
        let results = engine.search(&stores, Some(&embedder), &req).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.file_path.starts_with("src/")));
    }

    #[test]
    fn test_explicit_weights_bypass_classifier() {
        let (_dir, stores, embedder) = seeded();
        let engine = HybridSearchEngine::default();
        let mut req = SearchRequest::new("eviction");
        req.weights = Some((1.0, 0.0));
        req.explain = true;
        let results = engine.search(&stores, Some(&embedder), &req).unwrap();
        let explain = results[0].explain.as_ref().unwrap();
        assert_eq!(explain.query_kind, "explicit");
        assert!((explain.bm25_weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rrf_missing_rank_contributes_zero() {
        // One chunk present in both legs must outscore an equally-ranked
        // chunk present in only one leg when weights are split.
        let k = DEFAULT_RRF_K;
        let both = 0.5 / (k + 1.0) + 0.5 / (k + 1.0);
        let only_one = 0.5 / (k + 1.0);
        assert!(both > only_one);
    }

    #[test]
    fn test_tie_breaks_by_smaller_id() {
        let (_dir, stores, _) = seeded();

        // Force a tie: keyword-only result at rank 1 vs semantic-only
        // result at rank 1, equal weights. Order must be by smaller id.
        let a = chunk("src/aaa.rs", "fn zebra_token_one() { unique alpha }", ContentType::Code, Some("rust"));
        let embedder = HashEmbedder::default();
        stores.metadata.put_chunks(std::slice::from_ref(&a)).unwrap();
        stores.keyword.add(std::slice::from_ref(&a)).unwrap();

        let b = chunk("src/bbb.rs", "unrelated body entirely", ContentType::Code, Some("rust"));
        stores.metadata.put_chunks(std::slice::from_ref(&b)).unwrap();
        // b is only in the vector index, positioned to rank first for the
        // query embedding.
        let qv = embedder.embed_one("zebra_token_one").unwrap();
        stores.vector.add(&b.id, &qv).unwrap();

        let engine = HybridSearchEngine::default();
        let mut req = SearchRequest::new("zebra_token_one");
        req.weights = Some((0.5, 0.5));
        req.explain = true;
        let results = engine.search(&stores, Some(&embedder), &req).unwrap();

        let ra = results.iter().position(|r| r.file_path == "src/aaa.rs").unwrap();
        let rb = results.iter().position(|r| r.file_path == "src/bbb.rs").unwrap();
        let fa = &results[ra];
        let fb = &results[rb];
        if (fa.score - fb.score).abs() < 1e-12 {
            let first = if a.id < b.id { ra } else { rb };
            let second = if a.id < b.id { rb } else { ra };
            assert!(first < second, "equal scores must order by smaller id");
        }
    }

    #[test]
    fn test_limit_truncates() {
        let (_dir, stores, embedder) = seeded();
        let engine = HybridSearchEngine::default();
        let mut req = SearchRequest::new("fn");
        req.limit = 1;
        let results = engine.search(&stores, Some(&embedder), &req).unwrap();
        assert!(results.len() <= 1);
    }
}
