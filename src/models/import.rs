use serde::{Deserialize, Serialize};

/// The kind of import statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    Import,
    Require,
    /// Rust `mod name;` declaration pointing at a sibling file
    Module,
    Include,
}

/// A single import edge extracted from source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEdge {
    /// The imported module/path/package, unquoted
    #[serde(rename = "src")]
    pub source: String,
    /// Line number (0-indexed)
    #[serde(rename = "ln")]
    pub line: usize,
    pub kind: ImportKind,
}

/// Structural complexity of a file: deepest control-flow nesting and total
/// branch points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complexity {
    pub max_depth: u32,
    pub branches: u32,
}

impl Complexity {
    pub fn score(self) -> u32 {
        self.max_depth.saturating_mul(self.branches)
    }
}

/// What the analyzer needs to know about one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFacts {
    pub imports: Vec<ImportEdge>,
    pub exports: std::collections::BTreeSet<String>,
    pub complexity: Complexity,
}
