//! Query classification: decides how to weight lexical vs. semantic
//! scores for a query.
//!
//! Hybrid with pattern fallback: a bounded LRU cache in front, an optional
//! LLM capability, and a fixed ordered rule set that recognizes error
//! codes, quoted phrases, paths, code identifiers, and natural-language
//! shapes. Explicit caller-supplied weights bypass classification
//! entirely (handled by the search engine).

use crate::chunker::language;
use lru::LruCache;
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::trace;

// ---------------------------------------------------------------------------
// Kinds and weights
// ---------------------------------------------------------------------------

/// Query classification outcome. Each kind carries a fixed weight pair;
/// these triples are the only ones the classifier produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Lexical,
    Semantic,
    Mixed,
}

impl QueryKind {
    /// `(bm25, semantic)` fusion weights; always sums to 1.0.
    pub fn weights(&self) -> (f64, f64) {
        match self {
            QueryKind::Lexical => (0.85, 0.15),
            QueryKind::Semantic => (0.20, 0.80),
            QueryKind::Mixed => (0.35, 0.65),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Lexical => "lexical",
            QueryKind::Semantic => "semantic",
            QueryKind::Mixed => "mixed",
        }
    }
}

/// A classified query with its fusion weights.
#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub kind: QueryKind,
    pub bm25_weight: f64,
    pub semantic_weight: f64,
}

impl From<QueryKind> for Classification {
    fn from(kind: QueryKind) -> Self {
        let (bm25_weight, semantic_weight) = kind.weights();
        Classification { kind, bm25_weight, semantic_weight }
    }
}

// ---------------------------------------------------------------------------
// Optional LLM capability
// ---------------------------------------------------------------------------

/// Optional LLM classification capability. Any failure — timeout,
/// unavailability, unparseable response — returns `None` and the
/// classifier falls through to the pattern rules.
pub trait QueryLlm: Send + Sync {
    fn classify(&self, query: &str, timeout: Duration) -> Option<QueryKind>;
}

/// Default timeout for the LLM step.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

const CACHE_SHARDS: usize = 16;
const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Thread-safe query classifier with a sharded LRU cache so concurrent
/// searches don't serialize on a single lock.
pub struct QueryClassifier {
    shards: Vec<Mutex<LruCache<String, QueryKind>>>,
    llm: Option<Arc<dyn QueryLlm>>,
    llm_timeout: Duration,
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl QueryClassifier {
    pub fn new(cache_capacity: usize) -> Self {
        let per_shard = (cache_capacity / CACHE_SHARDS).max(1);
        let shards = (0..CACHE_SHARDS)
            .map(|_| Mutex::new(LruCache::new(NonZeroUsize::new(per_shard).unwrap())))
            .collect();
        QueryClassifier { shards, llm: None, llm_timeout: LLM_TIMEOUT }
    }

    /// Attach an LLM capability consulted before the pattern rules.
    pub fn with_llm(mut self, llm: Arc<dyn QueryLlm>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Classify a query. Deterministic on equal normalized input; never
    /// blocks search beyond the LLM timeout.
    pub fn classify(&self, query: &str) -> Classification {
        let collapsed = collapse_whitespace(query.trim());
        let key = collapsed.to_lowercase();

        let shard = &self.shards[shard_index(&key)];
        if let Some(kind) = shard.lock().unwrap().get(&key).copied() {
            trace!(query = key.as_str(), kind = kind.as_str(), "classifier cache hit");
            return kind.into();
        }

        let kind = self
            .llm
            .as_ref()
            .and_then(|llm| llm.classify(&collapsed, self.llm_timeout))
            .unwrap_or_else(|| pattern_classify(&collapsed));

        shard.lock().unwrap().put(key, kind);
        kind.into()
    }
}

fn shard_index(key: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % CACHE_SHARDS
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Pattern rules
// ---------------------------------------------------------------------------

const WH_WORDS: &[&str] =
    &["how", "what", "where", "why", "when", "which", "explain", "describe", "show", "find", "list"];

fn pattern_classify(collapsed: &str) -> QueryKind {
    // The rule set needs the original casing; the lowercased form is only
    // the cache key.
    let classifier_regexes = PatternRegexes::get();

    if classifier_regexes.error_code.is_match(collapsed) {
        return QueryKind::Lexical;
    }
    if classifier_regexes.quoted.is_match(collapsed) {
        return QueryKind::Lexical;
    }
    if collapsed.split(' ').any(is_path_token) {
        return QueryKind::Lexical;
    }
    if collapsed.split(' ').any(|t| classifier_regexes.identifier.is_match(t)) {
        return QueryKind::Lexical;
    }

    let words: Vec<&str> = collapsed.split(' ').filter(|w| !w.is_empty()).collect();
    if let Some(first) = words.first() {
        if WH_WORDS.contains(&first.to_lowercase().as_str()) {
            return QueryKind::Semantic;
        }
    }
    if words.len() >= 3 {
        return QueryKind::Semantic;
    }

    QueryKind::Mixed
}

/// A token that looks like a source path: contains a separator and ends in
/// a recognized file extension.
fn is_path_token(token: &str) -> bool {
    if !token.contains('/') {
        return false;
    }
    token
        .rsplit_once('.')
        .map(|(_, ext)| language::is_source_extension(ext))
        .unwrap_or(false)
}

/// Compiled pattern rules, shared by every classifier instance.
struct PatternRegexes {
    error_code: Regex,
    quoted: Regex,
    identifier: Regex,
}

impl PatternRegexes {
    fn get() -> &'static PatternRegexes {
        use std::sync::OnceLock;
        static REGEXES: OnceLock<PatternRegexes> = OnceLock::new();
        REGEXES.get_or_init(|| PatternRegexes {
            error_code: Regex::new(r"(?i)(\bERR_[A-Z0-9_]+\b|\bE\d{3,5}\b|\b\w+Exception\b)")
                .unwrap(),
            quoted: Regex::new(r#""[^"]+"|'[^']+'"#).unwrap(),
            identifier: Regex::new(
                r"^([a-z0-9]+[A-Z]\w*|[A-Z][a-z0-9]+[A-Z]\w*|[A-Za-z0-9]+_[A-Za-z0-9_]+)$",
            )
            .unwrap(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
