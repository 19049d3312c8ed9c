//! Core data model: chunks, symbols, search results, and store statistics.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::SystemTime;

// ---------------------------------------------------------------------------
// Content hashing — stable chunk identity
// ---------------------------------------------------------------------------

/// First 16 lowercase hex digits of the SHA-256 of `bytes`.
pub fn h16(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Stable chunk identifier: `H16(file_path ++ ":" ++ H16(raw_content))`.
///
/// Stable across line-number shifts in the same file; changes iff the byte
/// content of `raw_content` changes; distinct for identical content in
/// different files.
pub fn chunk_id(file_path: &str, raw_content: &str) -> String {
    let inner = h16(raw_content.as_bytes());
    h16(format!("{file_path}:{inner}").as_bytes())
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// The kind of a code symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    Type,
    Variable,
    Constant,
}

impl SymbolKind {
    pub fn label(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Type => "type",
            SymbolKind::Variable => "variable",
            SymbolKind::Constant => "constant",
        }
    }
}

/// A named entity extracted from source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based start line, inclusive.
    pub start_line: usize,
    /// 1-based end line, inclusive.
    pub end_line: usize,
    /// First line of the declaration up to the opening brace, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Leading doc comment, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// Content-type tag for a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Code,
    Markdown,
    Text,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Code => "code",
            ContentType::Markdown => "markdown",
            ContentType::Text => "text",
        }
    }
}

/// Unit of retrieval carved from a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Content-addressed identifier, 16 lowercase hex characters.
    pub id: String,
    /// Path relative to the project root.
    pub file_path: String,
    /// The symbol or span itself, without any surrounding context.
    pub raw_content: String,
    /// File marker plus package/import context; empty for fallback chunks.
    pub context: String,
    /// `context ++ blank line ++ raw_content`, or bare `raw_content` when
    /// the context is empty. This is what gets embedded and indexed.
    pub content: String,
    pub content_type: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// 1-based start line, inclusive.
    pub start_line: usize,
    /// 1-based end line, inclusive.
    pub end_line: usize,
    pub symbols: Vec<Symbol>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Chunk {
    /// Assemble a chunk from its parts, computing the id and joined content.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_path: &str,
        raw_content: String,
        context: String,
        content_type: ContentType,
        language: Option<String>,
        start_line: usize,
        end_line: usize,
        symbols: Vec<Symbol>,
    ) -> Self {
        let id = chunk_id(file_path, &raw_content);
        let content = if context.is_empty() {
            raw_content.clone()
        } else {
            format!("{context}\n\n{raw_content}")
        };
        let now = SystemTime::now();
        Chunk {
            id,
            file_path: file_path.to_string(),
            raw_content,
            context,
            content,
            content_type,
            language,
            start_line,
            end_line,
            symbols,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

/// How a search was executed — attached to the first result when the caller
/// requests explain mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplainBlock {
    /// Classification the weights came from ("lexical", "semantic",
    /// "mixed", or "explicit" when the caller supplied weights).
    pub query_kind: String,
    pub bm25_weight: f64,
    pub semantic_weight: f64,
    pub rrf_k: f64,
    pub keyword_available: bool,
    pub semantic_available: bool,
    pub keyword_candidates: usize,
    pub semantic_candidates: usize,
    /// Set when the semantic leg was skipped (no embedder, dimension
    /// mismatch, bm25-only mode, or backend failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// One ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Content excerpt for display.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Final fused score.
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<ExplainBlock>,
}

// ---------------------------------------------------------------------------
// Store statistics
// ---------------------------------------------------------------------------

/// Vector-store statistics, consumed by the compaction manager.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VectorStats {
    /// Total graph nodes, orphans included.
    pub nodes: usize,
    /// Logically deleted entries still occupying graph slots.
    pub orphans: usize,
    pub dim: usize,
}

impl VectorStats {
    /// Orphan / graph-node ratio, 0.0 for an empty index.
    pub fn orphan_ratio(&self) -> f64 {
        if self.nodes == 0 {
            0.0
        } else {
            self.orphans as f64 / self.nodes as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
