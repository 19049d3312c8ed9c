//! Per-language parsing configuration: grammar handles, the parse-node
//! kinds that denote each symbol kind, context-bearing node kinds, and
//! comment syntax.

use crate::types::SymbolKind;
use tree_sitter::Language;

// ---------------------------------------------------------------------------
// LanguageConfig
// ---------------------------------------------------------------------------

/// Maps a language to its grammar and the node kinds the chunker cares
/// about. All tables are static; configs are resolved by name or extension.
pub struct LanguageConfig {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    /// Line-comment prefix, used for the file-path marker and doc-comment
    /// detection.
    pub line_comment: &'static str,
    /// Indentation-based languages get a `#`-style file marker.
    pub indent_based: bool,
    grammar: fn() -> Language,
    /// Parse-node kind → symbol kind.
    pub symbol_kinds: &'static [(&'static str, SymbolKind)],
    /// Node kinds holding the package/module declaration.
    pub package_kinds: &'static [&'static str],
    /// Node kinds holding top-level import statements.
    pub import_kinds: &'static [&'static str],
    /// Node kinds that contain nested symbols (class bodies, impl blocks).
    /// Function-kind symbols found inside these are reclassified as methods.
    pub container_kinds: &'static [&'static str],
    /// Variable-binding node kinds checked for function-valued initializers.
    pub binding_kinds: &'static [&'static str],
}

impl LanguageConfig {
    pub fn grammar(&self) -> Language {
        (self.grammar)()
    }

    pub fn symbol_kind_for(&self, node_kind: &str) -> Option<SymbolKind> {
        self.symbol_kinds.iter().find(|(k, _)| *k == node_kind).map(|(_, s)| *s)
    }

    pub fn is_container(&self, node_kind: &str) -> bool {
        self.container_kinds.contains(&node_kind)
    }

    pub fn is_binding(&self, node_kind: &str) -> bool {
        self.binding_kinds.contains(&node_kind)
    }

    /// File-path marker comment in this language's line-comment syntax.
    pub fn file_marker(&self, path: &str) -> String {
        format!("{} File: {}", self.line_comment, path)
    }
}

// ---------------------------------------------------------------------------
// Grammar loaders
// ---------------------------------------------------------------------------

fn lang_rust() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}
fn lang_typescript() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}
fn lang_javascript() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}
fn lang_python() -> Language {
    tree_sitter_python::LANGUAGE.into()
}
fn lang_go() -> Language {
    tree_sitter_go::LANGUAGE.into()
}
fn lang_c() -> Language {
    tree_sitter_c::LANGUAGE.into()
}
fn lang_cpp() -> Language {
    tree_sitter_cpp::LANGUAGE.into()
}
fn lang_java() -> Language {
    tree_sitter_java::LANGUAGE.into()
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

static RUST: LanguageConfig = LanguageConfig {
    name: "rust",
    extensions: &["rs"],
    line_comment: "//",
    indent_based: false,
    grammar: lang_rust,
    symbol_kinds: &[
        ("function_item", SymbolKind::Function),
        ("struct_item", SymbolKind::Class),
        ("enum_item", SymbolKind::Class),
        ("trait_item", SymbolKind::Interface),
        ("type_item", SymbolKind::Type),
        ("const_item", SymbolKind::Constant),
        ("static_item", SymbolKind::Constant),
    ],
    package_kinds: &[],
    import_kinds: &["use_declaration"],
    container_kinds: &["impl_item", "trait_item"],
    binding_kinds: &[],
};

static GO: LanguageConfig = LanguageConfig {
    name: "go",
    extensions: &["go"],
    line_comment: "//",
    indent_based: false,
    grammar: lang_go,
    symbol_kinds: &[
        ("function_declaration", SymbolKind::Function),
        ("method_declaration", SymbolKind::Method),
        ("type_spec", SymbolKind::Type),
        ("const_spec", SymbolKind::Constant),
        ("var_spec", SymbolKind::Variable),
    ],
    package_kinds: &["package_clause"],
    import_kinds: &["import_declaration"],
    container_kinds: &[],
    binding_kinds: &[],
};

static PYTHON: LanguageConfig = LanguageConfig {
    name: "python",
    extensions: &["py", "pyi"],
    line_comment: "#",
    indent_based: true,
    grammar: lang_python,
    symbol_kinds: &[
        ("function_definition", SymbolKind::Function),
        ("class_definition", SymbolKind::Class),
    ],
    package_kinds: &[],
    import_kinds: &["import_statement", "import_from_statement"],
    container_kinds: &["class_definition"],
    binding_kinds: &[],
};

static JAVASCRIPT: LanguageConfig = LanguageConfig {
    name: "javascript",
    extensions: &["js", "jsx", "mjs", "cjs"],
    line_comment: "//",
    indent_based: false,
    grammar: lang_javascript,
    symbol_kinds: &[
        ("function_declaration", SymbolKind::Function),
        ("generator_function_declaration", SymbolKind::Function),
        ("class_declaration", SymbolKind::Class),
        ("method_definition", SymbolKind::Method),
        ("lexical_declaration", SymbolKind::Variable),
        ("variable_declaration", SymbolKind::Variable),
    ],
    package_kinds: &[],
    import_kinds: &["import_statement"],
    container_kinds: &["class_declaration"],
    binding_kinds: &["lexical_declaration", "variable_declaration"],
};

static TYPESCRIPT: LanguageConfig = LanguageConfig {
    name: "typescript",
    extensions: &["ts", "tsx"],
    line_comment: "//",
    indent_based: false,
    grammar: lang_typescript,
    symbol_kinds: &[
        ("function_declaration", SymbolKind::Function),
        ("generator_function_declaration", SymbolKind::Function),
        ("class_declaration", SymbolKind::Class),
        ("abstract_class_declaration", SymbolKind::Class),
        ("method_definition", SymbolKind::Method),
        ("interface_declaration", SymbolKind::Interface),
        ("type_alias_declaration", SymbolKind::Type),
        ("enum_declaration", SymbolKind::Type),
        ("lexical_declaration", SymbolKind::Variable),
        ("variable_declaration", SymbolKind::Variable),
    ],
    package_kinds: &[],
    import_kinds: &["import_statement"],
    container_kinds: &["class_declaration", "abstract_class_declaration"],
    binding_kinds: &["lexical_declaration", "variable_declaration"],
};

static C: LanguageConfig = LanguageConfig {
    name: "c",
    extensions: &["c", "h"],
    line_comment: "//",
    indent_based: false,
    grammar: lang_c,
    symbol_kinds: &[
        ("function_definition", SymbolKind::Function),
        ("struct_specifier", SymbolKind::Class),
        ("enum_specifier", SymbolKind::Type),
        ("type_definition", SymbolKind::Type),
    ],
    package_kinds: &[],
    import_kinds: &["preproc_include"],
    container_kinds: &[],
    binding_kinds: &[],
};

static CPP: LanguageConfig = LanguageConfig {
    name: "cpp",
    extensions: &["cpp", "cc", "cxx", "hpp", "hh", "hxx"],
    line_comment: "//",
    indent_based: false,
    grammar: lang_cpp,
    symbol_kinds: &[
        ("function_definition", SymbolKind::Function),
        ("struct_specifier", SymbolKind::Class),
        ("class_specifier", SymbolKind::Class),
        ("enum_specifier", SymbolKind::Type),
        ("type_definition", SymbolKind::Type),
    ],
    package_kinds: &[],
    import_kinds: &["preproc_include"],
    container_kinds: &["class_specifier", "struct_specifier"],
    binding_kinds: &[],
};

static JAVA: LanguageConfig = LanguageConfig {
    name: "java",
    extensions: &["java"],
    line_comment: "//",
    indent_based: false,
    grammar: lang_java,
    symbol_kinds: &[
        ("class_declaration", SymbolKind::Class),
        ("interface_declaration", SymbolKind::Interface),
        ("enum_declaration", SymbolKind::Class),
        ("method_declaration", SymbolKind::Method),
        ("constructor_declaration", SymbolKind::Method),
    ],
    package_kinds: &["package_declaration"],
    import_kinds: &["import_declaration"],
    container_kinds: &["class_declaration", "interface_declaration", "enum_declaration"],
    binding_kinds: &[],
};

static ALL: &[&LanguageConfig] =
    &[&RUST, &GO, &PYTHON, &JAVASCRIPT, &TYPESCRIPT, &C, &CPP, &JAVA];

/// Resolve a config by language name (case-insensitive).
pub fn by_name(name: &str) -> Option<&'static LanguageConfig> {
    let lower = name.to_ascii_lowercase();
    ALL.iter().find(|c| c.name == lower).copied()
}

/// Resolve a config by file extension (without the dot).
pub fn by_extension(ext: &str) -> Option<&'static LanguageConfig> {
    let lower = ext.to_ascii_lowercase();
    ALL.iter().find(|c| c.extensions.contains(&lower.as_str())).copied()
}

/// Detect the language of a path from its extension.
pub fn detect(path: &str) -> Option<&'static LanguageConfig> {
    let ext = path.rsplit_once('.').map(|(_, e)| e)?;
    by_extension(ext)
}

/// Extensions the query classifier recognizes as source-file paths.
pub fn is_source_extension(ext: &str) -> bool {
    by_extension(ext).is_some() || matches!(ext, "md" | "markdown" | "toml" | "json" | "yaml" | "yml" | "txt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_name_and_extension_agree() {
        for cfg in ALL {
            assert_eq!(by_name(cfg.name).unwrap().name, cfg.name);
            for ext in cfg.extensions {
                assert_eq!(by_extension(ext).unwrap().name, cfg.name);
            }
        }
    }

    #[test]
    fn test_detect_from_path() {
        assert_eq!(detect("src/main.rs").unwrap().name, "rust");
        assert_eq!(detect("pkg/server.go").unwrap().name, "go");
        assert_eq!(detect("app/util.test.ts").unwrap().name, "typescript");
        assert!(detect("README.md").is_none());
        assert!(detect("Makefile").is_none());
    }

    #[test]
    fn test_file_marker_syntax() {
        assert_eq!(by_name("go").unwrap().file_marker("a/b.go"), "// File: a/b.go");
        assert_eq!(by_name("python").unwrap().file_marker("a/b.py"), "# File: a/b.py");
    }

    #[test]
    fn test_grammars_load() {
        for cfg in ALL {
            let lang = cfg.grammar();
            assert!(lang.node_kind_count() > 0, "{} grammar failed to load", cfg.name);
        }
    }
}
