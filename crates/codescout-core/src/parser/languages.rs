//! Supported Languages and AST Node Classification
//!
//! Maps file extensions to tree-sitter grammars and grammar node kinds to
//! the block types the indexer understands.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use tree_sitter::Language;

use crate::types::BlockType;

/// Supported programming languages for semantic splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedLanguage {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Rust,
    Go,
    C,
    Cpp,
    CSharp,
}

impl SupportedLanguage {
    /// Get the language name used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedLanguage::Python => "python",
            SupportedLanguage::JavaScript => "javascript",
            SupportedLanguage::TypeScript => "typescript",
            SupportedLanguage::Tsx => "typescript",
            SupportedLanguage::Rust => "rust",
            SupportedLanguage::Go => "go",
            SupportedLanguage::C => "c",
            SupportedLanguage::Cpp => "cpp",
            SupportedLanguage::CSharp => "csharp",
        }
    }

    /// Get the tree-sitter Language for this language.
    pub fn tree_sitter_language(&self) -> Language {
        match self {
            SupportedLanguage::Python => tree_sitter_python::LANGUAGE.into(),
            SupportedLanguage::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            SupportedLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            SupportedLanguage::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            SupportedLanguage::Rust => tree_sitter_rust::LANGUAGE.into(),
            SupportedLanguage::Go => tree_sitter_go::LANGUAGE.into(),
            SupportedLanguage::C => tree_sitter_c::LANGUAGE.into(),
            SupportedLanguage::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            SupportedLanguage::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
        }
    }

    /// Detect language from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        get_extension_map()
            .get(ext.to_lowercase().as_str())
            .copied()
    }

    /// Detect language from file path.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// All supported file extensions.
    pub fn all_extensions() -> &'static [&'static str] {
        &[
            "py", "js", "mjs", "cjs", "jsx", "ts", "tsx", "rs", "go", "c", "h", "cpp", "hpp",
            "cc", "cxx", "cs",
        ]
    }

    /// Classify a grammar node kind as an indexable block type.
    ///
    /// Returns `None` for node kinds that are not block boundaries
    /// (expressions, statements inside bodies, punctuation, ...).
    pub fn block_type_for_node(&self, kind: &str) -> Option<BlockType> {
        match self {
            SupportedLanguage::Python => match kind {
                "function_definition" => Some(BlockType::Function),
                "class_definition" => Some(BlockType::Class),
                "decorated_definition" => Some(BlockType::Function),
                "import_statement" | "import_from_statement" => Some(BlockType::Import),
                _ => None,
            },
            SupportedLanguage::JavaScript | SupportedLanguage::TypeScript | SupportedLanguage::Tsx => {
                match kind {
                    "function_declaration" | "generator_function_declaration" | "arrow_function" => {
                        Some(BlockType::Function)
                    }
                    "method_definition" => Some(BlockType::Method),
                    "class_declaration" | "abstract_class_declaration" => Some(BlockType::Class),
                    "interface_declaration" => Some(BlockType::Interface),
                    "enum_declaration" => Some(BlockType::Enum),
                    "module" | "internal_module" => Some(BlockType::Module),
                    "lexical_declaration" | "variable_declaration" => Some(BlockType::Variable),
                    "import_statement" => Some(BlockType::Import),
                    "export_statement" => Some(BlockType::Variable),
                    "type_alias_declaration" => Some(BlockType::Interface),
                    _ => None,
                }
            }
            SupportedLanguage::Rust => match kind {
                "function_item" => Some(BlockType::Function),
                "impl_item" => Some(BlockType::Class),
                "struct_item" => Some(BlockType::Struct),
                "enum_item" => Some(BlockType::Enum),
                "trait_item" => Some(BlockType::Interface),
                "mod_item" => Some(BlockType::Module),
                "static_item" | "const_item" => Some(BlockType::Variable),
                "use_declaration" => Some(BlockType::Import),
                "macro_definition" => Some(BlockType::Function),
                _ => None,
            },
            SupportedLanguage::Go => match kind {
                "function_declaration" => Some(BlockType::Function),
                "method_declaration" => Some(BlockType::Method),
                "type_declaration" => Some(BlockType::Struct),
                "const_declaration" | "var_declaration" => Some(BlockType::Variable),
                "import_declaration" => Some(BlockType::Import),
                _ => None,
            },
            SupportedLanguage::C | SupportedLanguage::Cpp => match kind {
                "function_definition" => Some(BlockType::Function),
                "struct_specifier" => Some(BlockType::Struct),
                "enum_specifier" => Some(BlockType::Enum),
                "class_specifier" => Some(BlockType::Class),
                "namespace_definition" => Some(BlockType::Module),
                "declaration" => Some(BlockType::Variable),
                "preproc_include" => Some(BlockType::Import),
                "template_declaration" => Some(BlockType::Function),
                _ => None,
            },
            SupportedLanguage::CSharp => match kind {
                "method_declaration" | "local_function_statement" => Some(BlockType::Method),
                "constructor_declaration" => Some(BlockType::Method),
                "class_declaration" => Some(BlockType::Class),
                "interface_declaration" => Some(BlockType::Interface),
                "struct_declaration" => Some(BlockType::Struct),
                "enum_declaration" => Some(BlockType::Enum),
                "namespace_declaration" => Some(BlockType::Module),
                "field_declaration" | "property_declaration" => Some(BlockType::Variable),
                "using_directive" => Some(BlockType::Import),
                _ => None,
            },
        }
    }

    /// Node kinds whose subtree contains further block boundaries worth
    /// descending into when a node exceeds the maximum block size.
    pub fn is_container_node(&self, kind: &str) -> bool {
        matches!(
            kind,
            "class_definition"
                | "class_declaration"
                | "abstract_class_declaration"
                | "decorated_definition"
                | "impl_item"
                | "trait_item"
                | "mod_item"
                | "module"
                | "internal_module"
                | "namespace_definition"
                | "namespace_declaration"
                | "interface_declaration"
                | "struct_declaration"
                | "export_statement"
                | "template_declaration"
                | "class_specifier"
                | "type_declaration"
        )
    }
}

impl std::fmt::Display for SupportedLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static extension to language mapping.
static EXTENSION_MAP: OnceLock<HashMap<&'static str, SupportedLanguage>> = OnceLock::new();

fn get_extension_map() -> &'static HashMap<&'static str, SupportedLanguage> {
    EXTENSION_MAP.get_or_init(|| {
        let mut map = HashMap::new();
        // Python
        map.insert("py", SupportedLanguage::Python);
        // JavaScript
        map.insert("js", SupportedLanguage::JavaScript);
        map.insert("mjs", SupportedLanguage::JavaScript);
        map.insert("cjs", SupportedLanguage::JavaScript);
        map.insert("jsx", SupportedLanguage::JavaScript);
        // TypeScript
        map.insert("ts", SupportedLanguage::TypeScript);
        map.insert("tsx", SupportedLanguage::Tsx);
        // Rust
        map.insert("rs", SupportedLanguage::Rust);
        // Go
        map.insert("go", SupportedLanguage::Go);
        // C
        map.insert("c", SupportedLanguage::C);
        map.insert("h", SupportedLanguage::C);
        // C++
        map.insert("cpp", SupportedLanguage::Cpp);
        map.insert("hpp", SupportedLanguage::Cpp);
        map.insert("cc", SupportedLanguage::Cpp);
        map.insert("cxx", SupportedLanguage::Cpp);
        // C#
        map.insert("cs", SupportedLanguage::CSharp);
        map
    })
}
