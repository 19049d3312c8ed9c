//! AST-aware chunking of source files into retrievable units.
//!
//! Parses a file with tree-sitter, extracts symbol-bearing nodes with their
//! names, signatures, and leading doc comments, and emits one chunk per
//! top-level symbol. Oversized symbols are split into overlapping line
//! windows with `_partN` sub-symbols. Unsupported languages and parser
//! failures fall back to plain line windows; chunking never fails.

pub mod language;

use crate::types::{Chunk, ContentType, Symbol, SymbolKind};
use language::LanguageConfig;
use std::collections::HashSet;
use tracing::debug;
use tree_sitter::{Node, Parser, Tree};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Chunk sizing knobs. Token counts use the 4-chars-per-token estimate.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Symbols estimated above this many tokens are split.
    pub max_chunk_tokens: usize,
    /// Token overlap between split windows.
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { max_chunk_tokens: 512, overlap_tokens: 64 }
    }
}

/// Line budget assumed per source line when sizing split windows.
const CHARS_PER_LINE: usize = 80;
/// Chars per token for the length estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Fallback window geometry for unsupported languages and parser failures.
const FALLBACK_WINDOW_LINES: usize = 128;
const FALLBACK_OVERLAP_LINES: usize = 16;

impl ChunkerConfig {
    fn window_lines(&self) -> usize {
        (self.max_chunk_tokens * CHARS_PER_TOKEN / CHARS_PER_LINE).max(2)
    }

    fn overlap_lines(&self) -> usize {
        (self.overlap_tokens * CHARS_PER_TOKEN / CHARS_PER_LINE).max(2)
    }
}

// ---------------------------------------------------------------------------
// ParseTree — transient parse result
// ---------------------------------------------------------------------------

/// Transient wrapper around a parsed tree. The error flag is propagated
/// from the parser; a tree with errors is still walked for whatever
/// subtrees it produced. Not persisted.
pub struct ParseTree {
    tree: Tree,
    pub has_error: bool,
}

impl ParseTree {
    /// Parse `text` with the language's grammar. `None` when the parser
    /// itself fails (grammar rejected, allocation failure).
    pub fn parse(cfg: &LanguageConfig, text: &str) -> Option<ParseTree> {
        let mut parser = Parser::new();
        parser.set_language(&cfg.grammar()).ok()?;
        let tree = parser.parse(text, None)?;
        let has_error = tree.root_node().has_error();
        Some(ParseTree { tree, has_error })
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

pub struct Chunker {
    config: ChunkerConfig,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split a file into chunks. Deterministic for equal `(file_path,
    /// bytes)`; never fails — unknown languages and parser failures fall
    /// back to line windows.
    pub fn chunk(&self, file_path: &str, bytes: &[u8], lang: Option<&str>) -> Vec<Chunk> {
        let text = String::from_utf8_lossy(bytes);
        if text.trim().is_empty() {
            return Vec::new();
        }

        let cfg = lang
            .and_then(language::by_name)
            .or_else(|| language::detect(file_path));

        let cfg = match cfg {
            Some(c) => c,
            None => {
                let ct = fallback_content_type(file_path);
                return dedup(line_fallback(file_path, &text, ct, None));
            }
        };

        let tree = match ParseTree::parse(cfg, &text) {
            Some(t) => t,
            None => {
                debug!(file = file_path, language = cfg.name, "parser failed, using line fallback");
                return dedup(line_fallback(
                    file_path,
                    &text,
                    ContentType::Code,
                    Some(cfg.name.to_string()),
                ));
            }
        };

        if tree.has_error {
            debug!(file = file_path, language = cfg.name, "partial parse, chunking error tree");
        }

        let lines: Vec<&str> = text.lines().collect();
        let context = file_context(cfg, file_path, tree.root(), &text);

        let mut nodes = Vec::new();
        collect_chunk_nodes(tree.root(), cfg, false, &mut nodes);

        let mut chunks = Vec::new();
        for (node, in_container) in nodes {
            self.emit_symbol(file_path, cfg, &text, &lines, &context, node, in_container, &mut chunks);
        }

        if chunks.is_empty() {
            // Parsed but nothing symbol-shaped (script files, config-like
            // sources) — fall back so the file is still retrievable.
            return dedup(line_fallback(
                file_path,
                &text,
                ContentType::Code,
                Some(cfg.name.to_string()),
            ));
        }

        dedup(chunks)
    }

    /// Emit one or more chunks for a symbol node.
    #[allow(clippy::too_many_arguments)]
    fn emit_symbol(
        &self,
        file_path: &str,
        cfg: &'static LanguageConfig,
        text: &str,
        lines: &[&str],
        context: &str,
        node: Node<'_>,
        in_container: bool,
        out: &mut Vec<Chunk>,
    ) {
        let kind = match symbol_kind(cfg, node, text, in_container) {
            Some(k) => k,
            None => return,
        };
        let name = match extract_name(cfg, node, text) {
            Some(n) if !n.is_empty() => n,
            _ => return,
        };

        let start_row = node.start_position().row;
        let end_row = node.end_position().row;
        let (doc, doc_start_row) = leading_doc(lines, start_row, cfg.line_comment);
        let signature = extract_signature(cfg, node, text);

        let raw_start = doc_start_row.unwrap_or(start_row);
        let raw_content = lines[raw_start..=end_row.min(lines.len() - 1)].join("\n");

        let own = Symbol {
            name: name.clone(),
            kind,
            start_line: start_row + 1,
            end_line: end_row + 1,
            signature: Some(signature),
            doc,
        };

        let est_tokens = raw_content.len() / CHARS_PER_TOKEN;
        if est_tokens <= self.config.max_chunk_tokens {
            let mut symbols = vec![own];
            collect_nested_symbols(cfg, node, text, &mut symbols);
            out.push(Chunk::new(
                file_path,
                raw_content,
                context.to_string(),
                ContentType::Code,
                Some(cfg.name.to_string()),
                raw_start + 1,
                end_row + 1,
                symbols,
            ));
            return;
        }

        self.split_symbol(file_path, cfg, context, &raw_content, raw_start, own, out);
    }

    /// Split an oversized symbol into overlapping line windows. The first
    /// window registers both the parent symbol and `<name>_part1`; later
    /// windows carry only their `<name>_partK` sub-symbol.
    #[allow(clippy::too_many_arguments)]
    fn split_symbol(
        &self,
        file_path: &str,
        cfg: &'static LanguageConfig,
        context: &str,
        raw_content: &str,
        raw_start_row: usize,
        parent: Symbol,
        out: &mut Vec<Chunk>,
    ) {
        let raw_lines: Vec<&str> = raw_content.lines().collect();
        let n = raw_lines.len();
        let window = self.config.window_lines();
        let overlap = self.config.overlap_lines().min(window - 1);

        let mut start = 0usize;
        let mut part = 1usize;
        loop {
            let end = (start + window).min(n);
            let piece = raw_lines[start..end].join("\n");
            let abs_start = raw_start_row + start + 1;
            let abs_end = raw_start_row + end;

            let sub = Symbol {
                name: format!("{}_part{}", parent.name, part),
                kind: parent.kind,
                start_line: abs_start,
                end_line: abs_end,
                signature: None,
                doc: None,
            };
            let symbols = if part == 1 {
                vec![parent.clone(), sub]
            } else {
                vec![sub]
            };

            out.push(Chunk::new(
                file_path,
                piece,
                context.to_string(),
                ContentType::Code,
                Some(cfg.name.to_string()),
                abs_start,
                abs_end,
                symbols,
            ));

            if end >= n {
                break;
            }
            start = end - overlap;
            part += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Symbol-node collection
// ---------------------------------------------------------------------------

/// Wrapper kinds the walk descends through when looking for declarations
/// (export statements, decorator wrappers, grouped const/var blocks).
const WRAPPER_KINDS: &[&str] = &[
    "export_statement",
    "decorated_definition",
    "declaration_list",
    "const_declaration",
    "var_declaration",
    "source_file",
    "program",
    "module",
    "translation_unit",
];

/// Collect the nodes that become chunks: symbol-kind nodes and variable
/// bindings, outermost first. Containers that are not themselves symbols
/// (Rust impl blocks) are descended into with the container flag set so
/// their functions classify as methods.
fn collect_chunk_nodes<'a>(
    node: Node<'a>,
    cfg: &'static LanguageConfig,
    in_container: bool,
    out: &mut Vec<(Node<'a>, bool)>,
) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        let kind = child.kind();
        if cfg.symbol_kind_for(kind).is_some() || cfg.is_binding(kind) {
            out.push((child, in_container));
        } else if cfg.is_container(kind) {
            collect_chunk_nodes(child, cfg, true, out);
        } else if WRAPPER_KINDS.contains(&kind) {
            collect_chunk_nodes(child, cfg, in_container, out);
        }
    }
}

/// Collect nested symbol entries (methods of a class, members of a trait)
/// for a chunk's symbol list. Descends through the symbol's body only.
fn collect_nested_symbols(
    cfg: &'static LanguageConfig,
    node: Node<'_>,
    text: &str,
    out: &mut Vec<Symbol>,
) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        let kind = child.kind();
        if let Some(sym_kind) = cfg.symbol_kind_for(kind) {
            if let Some(name) = extract_name(cfg, child, text) {
                let kind = if sym_kind == SymbolKind::Function {
                    SymbolKind::Method
                } else {
                    sym_kind
                };
                out.push(Symbol {
                    name,
                    kind,
                    start_line: child.start_position().row + 1,
                    end_line: child.end_position().row + 1,
                    signature: Some(extract_signature(cfg, child, text)),
                    doc: None,
                });
            }
            continue;
        }
        collect_nested_symbols(cfg, child, text, out);
    }
}

/// Resolve the symbol kind of a node, applying the two reclassification
/// rules: variable bindings with a function-valued initializer become
/// functions; functions found inside a container become methods.
fn symbol_kind(
    cfg: &'static LanguageConfig,
    node: Node<'_>,
    text: &str,
    in_container: bool,
) -> Option<SymbolKind> {
    let mut kind = cfg.symbol_kind_for(node.kind())?;
    if cfg.is_binding(node.kind()) && has_function_initializer(node, text) {
        kind = SymbolKind::Function;
    }
    if kind == SymbolKind::Function && in_container {
        kind = SymbolKind::Method;
    }
    Some(kind)
}

/// True when a variable-binding node initializes to an arrow function or
/// function expression.
fn has_function_initializer(node: Node<'_>, _text: &str) -> bool {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "variable_declarator" {
            if let Some(value) = child.child_by_field_name("value") {
                return matches!(
                    value.kind(),
                    "arrow_function" | "function_expression" | "function" | "generator_function"
                );
            }
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Name / signature / doc extraction
// ---------------------------------------------------------------------------

fn node_text<'a>(node: Node<'_>, text: &'a str) -> &'a str {
    &text[node.byte_range()]
}

/// Extract the symbol's name from its language-specific name-bearing
/// descendant.
fn extract_name(cfg: &'static LanguageConfig, node: Node<'_>, text: &str) -> Option<String> {
    if let Some(name_node) = node.child_by_field_name("name") {
        let name = node_text(name_node, text).trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }

    // Variable bindings: the declarator's name field.
    if cfg.is_binding(node.kind()) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "variable_declarator" {
                if let Some(name_node) = child.child_by_field_name("name") {
                    return Some(node_text(name_node, text).trim().to_string());
                }
            }
        }
    }

    // C/C++ functions: walk the declarator chain to the identifier.
    if node.kind() == "function_definition" {
        let mut decl = node.child_by_field_name("declarator");
        while let Some(d) = decl {
            if let Some(inner) = d.child_by_field_name("declarator") {
                decl = Some(inner);
                continue;
            }
            let s = node_text(d, text).trim();
            let name = s.split('(').next().unwrap_or(s).trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
            break;
        }
    }

    // Last resort: first identifier-like named child.
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind().contains("identifier") {
            return Some(node_text(child, text).trim().to_string());
        }
    }
    None
}

/// First line of the declaration up to the opening brace, or the full
/// first line for brace-less forms (Python keeps its trailing colon).
fn extract_signature(cfg: &'static LanguageConfig, node: Node<'_>, text: &str) -> String {
    let first_line = node_text(node, text).lines().next().unwrap_or("").trim();
    let sig = if cfg.indent_based {
        first_line
    } else if let Some(brace) = first_line.find('{') {
        first_line[..brace].trim_end()
    } else {
        first_line
    };
    sig.to_string()
}

/// Scan upward from the symbol for its leading doc comment: the run of
/// line comments immediately above, blank lines tolerated, stopping at the
/// first non-comment non-blank line. Returns the stripped doc text and the
/// row of the topmost doc line.
fn leading_doc(
    lines: &[&str],
    symbol_row: usize,
    comment_prefix: &str,
) -> (Option<String>, Option<usize>) {
    let mut collected: Vec<(usize, String)> = Vec::new();
    let mut row = symbol_row;
    while row > 0 {
        row -= 1;
        let trimmed = lines[row].trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix(comment_prefix) {
            // Doc-style markers share the line-comment prefix (`///`, `//!`).
            let body = rest.trim_start_matches(['/', '!']).trim();
            collected.push((row, body.to_string()));
        } else {
            break;
        }
    }
    if collected.is_empty() {
        return (None, None);
    }
    collected.reverse();
    let top_row = collected[0].0;
    let doc = collected.iter().map(|(_, s)| s.as_str()).collect::<Vec<_>>().join("\n");
    (Some(doc), Some(top_row))
}

// ---------------------------------------------------------------------------
// File context
// ---------------------------------------------------------------------------

/// Build the enriched file context: a file-path marker comment, the
/// package/module declaration when present, and all top-level import
/// statements in source order, joined by blank lines.
fn file_context(
    cfg: &'static LanguageConfig,
    file_path: &str,
    root: Node<'_>,
    text: &str,
) -> String {
    let mut pieces = vec![cfg.file_marker(file_path)];

    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        let kind = child.kind();
        if cfg.package_kinds.contains(&kind) || cfg.import_kinds.contains(&kind) {
            pieces.push(node_text(child, text).trim_end().to_string());
        }
    }
    pieces.join("\n\n")
}

// ---------------------------------------------------------------------------
// Line fallback
// ---------------------------------------------------------------------------

fn fallback_content_type(file_path: &str) -> ContentType {
    match file_path.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase()) {
        Some(ext) if ext == "md" || ext == "markdown" => ContentType::Markdown,
        _ => ContentType::Text,
    }
}

/// Plain line-window chunking: ~128-line windows with ~16-line overlap,
/// no symbols, empty context. Guarantees progress for any input.
fn line_fallback(
    file_path: &str,
    text: &str,
    content_type: ContentType,
    lang: Option<String>,
) -> Vec<Chunk> {
    let lines: Vec<&str> = text.lines().collect();
    let n = lines.len();
    let mut out = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + FALLBACK_WINDOW_LINES).min(n);
        let raw = lines[start..end].join("\n");
        if !raw.trim().is_empty() {
            out.push(Chunk::new(
                file_path,
                raw,
                String::new(),
                content_type,
                lang.clone(),
                start + 1,
                end,
                Vec::new(),
            ));
        }
        if end >= n {
            break;
        }
        start = end - FALLBACK_OVERLAP_LINES;
    }
    out
}

/// Drop repeated ids (identical raw_content at different offsets hashes to
/// the same id); first occurrence wins, so output order is stable.
fn dedup(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    chunks.into_iter().filter(|c| seen.insert(c.id.clone())).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_str(path: &str, src: &str) -> Vec<Chunk> {
        Chunker::default().chunk(path, src.as_bytes(), None)
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_str("a.rs", "").is_empty());
        assert!(chunk_str("a.rs", "   \n\t\n").is_empty());
    }

    #[test]
    fn test_rust_functions_one_chunk_each() {
        let src = "\
use std::fmt;

/// Greets a person.
pub fn greet(name: &str) -> String {
    format!(\"Hello, {}!\", name)
}

pub fn farewell(name: &str) -> String {
    format!(\"Bye, {}!\", name)
}
";
        let chunks = chunk_str("src/lib.rs", src);
        assert_eq!(chunks.len(), 2);

        let greet = &chunks[0];
        assert_eq!(greet.symbols[0].name, "greet");
        assert_eq!(greet.symbols[0].kind, SymbolKind::Function);
        assert_eq!(greet.symbols[0].doc.as_deref(), Some("Greets a person."));
        assert!(greet.raw_content.starts_with("/// Greets a person."));
        assert!(greet.context.contains("// File: src/lib.rs"));
        assert!(greet.context.contains("use std::fmt;"));
        assert_eq!(greet.content, format!("{}\n\n{}", greet.context, greet.raw_content));
    }

    #[test]
    fn test_id_stable_across_line_shifts() {
        let before = "pub fn target() -> u32 {\n    42\n}\n";
        let after = "// an unrelated comment\n\nfn other() {}\n\npub fn target() -> u32 {\n    42\n}\n";
        let a = chunk_str("src/x.rs", before);
        let b = chunk_str("src/x.rs", after);
        let find = |cs: &[Chunk]| {
            cs.iter()
                .find(|c| c.symbols.iter().any(|s| s.name == "target"))
                .map(|c| c.id.clone())
                .unwrap()
        };
        assert_eq!(find(&a), find(&b));
    }

    #[test]
    fn test_go_package_and_imports_in_context() {
        let src = "\
package mathx

import \"fmt\"

func Add(a, b int) int {
\treturn a + b
}
";
        let chunks = chunk_str("pkg/mathx/add.go", src);
        assert_eq!(chunks.len(), 1);
        let c = &chunks[0];
        assert!(c.context.starts_with("// File: pkg/mathx/add.go"));
        assert!(c.context.contains("package mathx"));
        assert!(c.context.contains("import \"fmt\""));
        assert_eq!(c.symbols[0].name, "Add");
        assert_eq!(c.language.as_deref(), Some("go"));
    }

    #[test]
    fn test_python_file_marker_uses_hash() {
        let src = "\
import os

def walk(root):
    return list(os.walk(root))
";
        let chunks = chunk_str("tools/walk.py", src);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].context.starts_with("# File: tools/walk.py"));
        assert_eq!(chunks[0].symbols[0].name, "walk");
        assert_eq!(chunks[0].symbols[0].signature.as_deref(), Some("def walk(root):"));
    }

    #[test]
    fn test_python_methods_nested_in_class_chunk() {
        let src = "\
class Store:
    def put(self, key, value):
        self.data[key] = value

    def get(self, key):
        return self.data.get(key)
";
        let chunks = chunk_str("store.py", src);
        assert_eq!(chunks.len(), 1);
        let syms = &chunks[0].symbols;
        assert_eq!(syms[0].name, "Store");
        assert_eq!(syms[0].kind, SymbolKind::Class);
        let methods: Vec<&str> = syms
            .iter()
            .filter(|s| s.kind == SymbolKind::Method)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(methods, vec!["put", "get"]);
    }

    #[test]
    fn test_rust_impl_methods_become_method_chunks() {
        let src = "\
struct Counter {
    n: u64,
}

impl Counter {
    pub fn incr(&mut self) {
        self.n += 1;
    }
}
";
        let chunks = chunk_str("counter.rs", src);
        assert_eq!(chunks.len(), 2);
        let incr = chunks
            .iter()
            .find(|c| c.symbols.iter().any(|s| s.name == "incr"))
            .expect("incr chunk");
        assert_eq!(incr.symbols[0].kind, SymbolKind::Method);
    }

    #[test]
    fn test_js_arrow_binding_reclassified_as_function() {
        let src = "\
const render = (items) => {
    return items.map(x => x.name);
};

const LIMIT = 50;
";
        let chunks = chunk_str("render.js", src);
        let render = chunks
            .iter()
            .find(|c| c.symbols.iter().any(|s| s.name == "render"))
            .expect("render chunk");
        assert_eq!(render.symbols[0].kind, SymbolKind::Function);

        let limit = chunks
            .iter()
            .find(|c| c.symbols.iter().any(|s| s.name == "LIMIT"))
            .expect("LIMIT chunk");
        assert_eq!(limit.symbols[0].kind, SymbolKind::Variable);
    }

    #[test]
    fn test_oversized_symbol_splits_with_parent_registration() {
        // One Go function far over the split threshold (~1200 lines).
        let mut src = String::from("package big\n\nfunc Compute() int {\n\tx := 0\n");
        for i in 0..1200 {
            src.push_str(&format!("\tx += {i} // line payload with some width to it\n"));
        }
        src.push_str("\treturn x\n}\n");

        let chunks = chunk_str("big/compute.go", &src);
        assert!(chunks.len() >= 2, "expected a split, got {} chunk(s)", chunks.len());

        // First chunk registers both the original symbol and part1.
        let first_names: Vec<&str> = chunks[0].symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(first_names.contains(&"Compute"));
        assert!(first_names.contains(&"Compute_part1"));

        // Every later chunk has exactly one _partN sub-symbol and no parent.
        for (i, c) in chunks.iter().enumerate().skip(1) {
            assert_eq!(c.symbols.len(), 1, "chunk {i} symbols: {:?}", c.symbols);
            let expected = format!("Compute_part{}", i + 1);
            assert_eq!(c.symbols[0].name, expected);
        }

        // Sub-symbol names are unique across the split.
        let mut parts: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.symbols.iter())
            .filter(|s| s.name.starts_with("Compute_part"))
            .map(|s| s.name.clone())
            .collect();
        let before = parts.len();
        parts.sort();
        parts.dedup();
        assert_eq!(parts.len(), before);
    }

    #[test]
    fn test_unknown_language_line_fallback() {
        let mut src = String::new();
        for i in 0..300 {
            src.push_str(&format!("line {i} of an unknown file format\n"));
        }
        let chunks = chunk_str("data.unknown", &src);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.symbols.is_empty());
            assert_eq!(c.content_type, ContentType::Text);
            assert!(c.context.is_empty());
        }
        // 128-line window with 16-line overlap: second window starts at 113.
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 128);
        assert_eq!(chunks[1].start_line, 113);
    }

    #[test]
    fn test_markdown_tagged_as_markdown() {
        let src = "# Title\n\nSome prose about the project.\n";
        let chunks = chunk_str("README.md", src);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content_type, ContentType::Markdown);
    }

    #[test]
    fn test_parse_error_still_yields_chunks() {
        // Unbalanced brace — tree-sitter flags an error but produces a tree.
        let src = "pub fn broken( {\n\nfn fine() -> u32 { 1 }\n";
        let chunks = chunk_str("broken.rs", src);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_determinism() {
        let src = "package p\n\nfunc A() {}\n\nfunc B() {}\n";
        let a = chunk_str("p/f.go", src);
        let b = chunk_str("p/f.go", src);
        let ids_a: Vec<&str> = a.iter().map(|c| c.id.as_str()).collect();
        let ids_b: Vec<&str> = b.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_doc_comment_tolerates_blank_line() {
        let src = "\
// Computes the checksum.

pub fn checksum(data: &[u8]) -> u64 {
    0
}
";
        let chunks = chunk_str("sum.rs", src);
        assert_eq!(chunks[0].symbols[0].doc.as_deref(), Some("Computes the checksum."));
    }
}
