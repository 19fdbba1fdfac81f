//! Query Analyzer
//!
//! Classifies a natural-language query into an intent, extracts the symbol
//! it talks about, and picks the backends (with weights) that should answer
//! it. Detection is phrase-pattern based and case-insensitive.
//!
//! Ordering matters in two places: `find_dependents` is tested before
//! `find_dependencies` (the former's "what depends on" would otherwise
//! match the latter's "depend on"), and symbol extraction tries quoted
//! strings, then keyword-anchored words, then PascalCase, then camelCase.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// Intents
// ============================================================================

/// What the user is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    FindImplementation,
    FindUsages,
    FindCallers,
    FindCallees,
    FindDependencies,
    FindDependents,
    FindTests,
    FindExamples,
    FindByType,
    FindPattern,
    ImpactAnalysis,
    DependencyAnalysis,
    BlastRadius,
    ChangeSafety,
    SemanticSearch,
}

impl QueryIntent {
    /// Get the string representation used in result metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::FindImplementation => "find_implementation",
            QueryIntent::FindUsages => "find_usages",
            QueryIntent::FindCallers => "find_callers",
            QueryIntent::FindCallees => "find_callees",
            QueryIntent::FindDependencies => "find_dependencies",
            QueryIntent::FindDependents => "find_dependents",
            QueryIntent::FindTests => "find_tests",
            QueryIntent::FindExamples => "find_examples",
            QueryIntent::FindByType => "find_by_type",
            QueryIntent::FindPattern => "find_pattern",
            QueryIntent::ImpactAnalysis => "impact_analysis",
            QueryIntent::DependencyAnalysis => "dependency_analysis",
            QueryIntent::BlastRadius => "blast_radius",
            QueryIntent::ChangeSafety => "change_safety",
            QueryIntent::SemanticSearch => "semantic_search",
        }
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Backends and weights
// ============================================================================

/// A search backend the orchestrator can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    Vector,
    Bm25,
    Graph,
    Lsp,
}

/// Per-backend fusion weights.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BackendWeights {
    pub vector: f32,
    pub bm25: f32,
    pub graph: f32,
    pub lsp: f32,
}

impl BackendWeights {
    const fn new(vector: f32, bm25: f32, graph: f32, lsp: f32) -> Self {
        Self {
            vector,
            bm25,
            graph,
            lsp,
        }
    }

    /// Backends with a non-zero weight.
    pub fn backends(&self) -> Vec<SearchBackend> {
        let mut backends = Vec::new();
        if self.vector > 0.0 {
            backends.push(SearchBackend::Vector);
        }
        if self.bm25 > 0.0 {
            backends.push(SearchBackend::Bm25);
        }
        if self.graph > 0.0 {
            backends.push(SearchBackend::Graph);
        }
        if self.lsp > 0.0 {
            backends.push(SearchBackend::Lsp);
        }
        backends
    }

    /// Vector/BM25 weights renormalized to sum to 1, for delegation to the
    /// hybrid service when only those backends are selected.
    pub fn renormalized_hybrid(&self) -> (f32, f32) {
        let sum = self.vector + self.bm25;
        if sum <= 0.0 {
            (0.0, 0.0)
        } else {
            (self.vector / sum, self.bm25 / sum)
        }
    }
}

// ============================================================================
// Analysis result
// ============================================================================

/// Everything the orchestrator needs to route a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub intent: QueryIntent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub backends: Vec<SearchBackend>,
    pub weights: BackendWeights,
    pub boost_exported: bool,
    pub test_files_only: bool,
}

// ============================================================================
// Pattern tables
// ============================================================================

/// Intent phrase patterns, in priority order. First match wins, so
/// `FindDependents` precedes `FindDependencies`.
static INTENT_PATTERNS: &[(QueryIntent, &[&str])] = &[
    (QueryIntent::BlastRadius, &["blast radius"]),
    (
        QueryIntent::ChangeSafety,
        &["safe to change", "safe to modify", "safe to delete", "risky to change", "can i change"],
    ),
    (
        QueryIntent::ImpactAnalysis,
        &["impact of", "impact analysis", "what breaks", "would break", "affected by changing"],
    ),
    (
        QueryIntent::DependencyAnalysis,
        &["dependency analysis", "dependency graph", "analyze dependencies", "analyze the dependencies"],
    ),
    (
        QueryIntent::FindCallers,
        &["who calls", "what calls", "callers of", "is called by", "called from", "call sites"],
    ),
    (
        QueryIntent::FindCallees,
        &["callees of", "calls made by", "what does it call", "functions called by", "call into"],
    ),
    (
        QueryIntent::FindDependents,
        &["what depends on", "depends on it", "dependents of", "who uses", "relies on"],
    ),
    (
        QueryIntent::FindDependencies,
        &["depend on", "dependencies of", "what does it use", "imports of", "what it needs"],
    ),
    (
        QueryIntent::FindUsages,
        &["usages of", "usage of", "where is", "references to", "find usages", "all uses of"],
    ),
    (
        QueryIntent::FindTests,
        &["tests for", "test for", "test coverage", "unit tests", "spec for", "tested"],
    ),
    (
        QueryIntent::FindExamples,
        &["example of", "examples of", "example usage", "sample of", "how to use", "show me how"],
    ),
    (
        QueryIntent::FindByType,
        &["of type", "returns type", "that return", "that returns", "accepting", "with signature"],
    ),
    (
        QueryIntent::FindPattern,
        &["pattern", "similar to", "code like", "like this"],
    ),
    (
        QueryIntent::FindImplementation,
        &["implemented", "implementation of", "how does", "how is", "defined", "definition of", "where is the logic"],
    ),
];

/// Weight table per intent `(vector, bm25, graph, lsp)`.
fn weights_for(intent: QueryIntent) -> BackendWeights {
    match intent {
        QueryIntent::FindCallers | QueryIntent::FindCallees => {
            BackendWeights::new(0.0, 0.4, 0.6, 0.0)
        }
        QueryIntent::FindDependencies | QueryIntent::FindDependents => {
            BackendWeights::new(0.0, 0.3, 0.7, 0.0)
        }
        QueryIntent::ImpactAnalysis
        | QueryIntent::DependencyAnalysis
        | QueryIntent::BlastRadius
        | QueryIntent::ChangeSafety => BackendWeights::new(0.0, 0.0, 1.0, 0.0),
        QueryIntent::FindUsages => BackendWeights::new(0.0, 0.4, 0.3, 0.3),
        QueryIntent::FindByType => BackendWeights::new(0.3, 0.3, 0.0, 0.4),
        QueryIntent::FindImplementation => BackendWeights::new(0.6, 0.4, 0.0, 0.0),
        QueryIntent::FindExamples => BackendWeights::new(0.7, 0.3, 0.0, 0.0),
        QueryIntent::FindPattern => BackendWeights::new(0.8, 0.2, 0.0, 0.0),
        QueryIntent::FindTests => BackendWeights::new(0.6, 0.4, 0.0, 0.0),
        QueryIntent::SemanticSearch => BackendWeights::new(0.7, 0.3, 0.0, 0.0),
    }
}

static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["'`]([^"'`]+)["'`]"#).expect("quoted pattern compiles"));

static KEYWORD_ANCHORED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:for|of|calls|call|on|uses|using|to)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .expect("anchored pattern compiles")
});

static PASCAL_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-z0-9]+(?:[A-Z][a-z0-9]*)+|[A-Z][a-z0-9]+)\b").expect("pascal pattern compiles"));

static CAMEL_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([a-z]+(?:[A-Z][a-z0-9]*)+)\b").expect("camel pattern compiles"));

/// Words a keyword anchor must not capture as a symbol.
const STOPWORDS: &[&str] = &[
    "the", "this", "that", "a", "an", "it", "me", "my", "our", "all", "any", "some", "code",
    "file", "files", "function", "functions", "class", "classes", "method", "methods", "type",
    "types", "changing", "change",
];

// ============================================================================
// Analyzer
// ============================================================================

/// Phrase-pattern query classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryAnalyzer;

impl QueryAnalyzer {
    /// Create an analyzer.
    pub fn new() -> Self {
        Self
    }

    /// Classify a query.
    ///
    /// Guarantees a non-empty backend set whose weights sum to a positive
    /// value.
    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let lowered = query.to_lowercase();
        let intent = Self::detect_intent(&lowered);
        let weights = weights_for(intent);

        QueryAnalysis {
            intent,
            symbol: Self::extract_symbol(query),
            backends: weights.backends(),
            weights,
            boost_exported: intent == QueryIntent::FindImplementation,
            test_files_only: intent == QueryIntent::FindTests,
        }
    }

    fn detect_intent(lowered: &str) -> QueryIntent {
        for (intent, phrases) in INTENT_PATTERNS {
            if phrases.iter().any(|p| lowered.contains(p)) {
                return *intent;
            }
        }
        QueryIntent::SemanticSearch
    }

    /// Extract the symbol a query refers to, if any.
    ///
    /// Tried in order: quoted strings, keyword-anchored words, PascalCase
    /// words, camelCase words.
    fn extract_symbol(query: &str) -> Option<String> {
        if let Some(captures) = QUOTED.captures(query) {
            let symbol = captures[1].trim();
            if !symbol.is_empty() {
                return Some(symbol.to_string());
            }
        }

        for captures in KEYWORD_ANCHORED.captures_iter(query) {
            let word = &captures[1];
            if !STOPWORDS.contains(&word.to_lowercase().as_str()) {
                return Some(word.to_string());
            }
        }

        if let Some(captures) = PASCAL_CASE.captures(query) {
            return Some(captures[1].to_string());
        }

        if let Some(captures) = CAMEL_CASE.captures(query) {
            return Some(captures[1].to_string());
        }

        None
    }
}
