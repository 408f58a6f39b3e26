use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tree_sitter::Language;

/// Languages with a tree-sitter grammar linked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LangId {
    Rust,
    Python,
    Javascript,
    Typescript,
    Tsx,
    Go,
}

impl std::fmt::Display for LangId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
        };
        write!(f, "{s}")
    }
}

impl LangId {
    pub const ALL: [LangId; 6] = [
        LangId::Rust,
        LangId::Python,
        LangId::Javascript,
        LangId::Typescript,
        LangId::Tsx,
        LangId::Go,
    ];

    /// Detect language from file extension.
    pub fn from_path(path: &Utf8Path) -> Option<Self> {
        let ext = path.extension().unwrap_or("").to_lowercase();
        match ext.as_str() {
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            "js" | "mjs" | "cjs" | "jsx" => Some(Self::Javascript),
            "ts" | "mts" | "cts" => Some(Self::Typescript),
            "tsx" => Some(Self::Tsx),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    /// Get the tree-sitter Language for this language ID.
    pub fn ts_language(self) -> Language {
        match self {
            Self::Rust => Language::new(tree_sitter_rust::LANGUAGE),
            Self::Python => Language::new(tree_sitter_python::LANGUAGE),
            Self::Javascript => Language::new(tree_sitter_javascript::LANGUAGE),
            Self::Typescript => Language::new(tree_sitter_typescript::LANGUAGE_TYPESCRIPT),
            Self::Tsx => Language::new(tree_sitter_typescript::LANGUAGE_TSX),
            Self::Go => Language::new(tree_sitter_go::LANGUAGE),
        }
    }

    /// JS-family languages share module resolution rules.
    pub fn is_ecmascript(self) -> bool {
        matches!(self, Self::Javascript | Self::Typescript | Self::Tsx)
    }
}

/// Coarse classification that drives the impact rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Source,
    Configuration,
    Documentation,
    Other,
}

const SOURCE_EXTS: &[&str] = &[
    "rs", "py", "pyi", "js", "mjs", "cjs", "jsx", "ts", "mts", "cts", "tsx", "go", "java", "kt",
    "kts", "swift", "c", "h", "cc", "cpp", "cxx", "hpp", "cs", "php", "rb", "vue", "svelte",
    "scala", "dart", "sh",
];

const CONFIG_EXTS: &[&str] = &[
    "yaml", "yml", "toml", "json", "jsonc", "ini", "cfg", "conf", "properties", "env", "tf",
    "hcl", "xml", "gradle", "lock",
];

const CONFIG_NAMES: &[&str] = &[
    "dockerfile",
    "makefile",
    "procfile",
    "justfile",
    "docker-compose.yml",
    "docker-compose.yaml",
];

const DOC_EXTS: &[&str] = &["md", "mdx", "markdown", "rst", "adoc", "txt"];

impl FileCategory {
    pub fn from_path(path: &Utf8Path) -> Self {
        let name = path.file_name().unwrap_or("").to_lowercase();
        let ext = path.extension().unwrap_or("").to_lowercase();

        if name.starts_with(".env") || CONFIG_NAMES.contains(&name.as_str()) {
            return Self::Configuration;
        }
        if DOC_EXTS.contains(&ext.as_str()) {
            return Self::Documentation;
        }
        if SOURCE_EXTS.contains(&ext.as_str()) {
            return Self::Source;
        }
        if CONFIG_EXTS.contains(&ext.as_str()) {
            return Self::Configuration;
        }
        Self::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_rust() {
        assert_eq!(LangId::from_path(Utf8Path::new("src/main.rs")), Some(LangId::Rust));
    }

    #[test]
    fn detect_typescript() {
        assert_eq!(
            LangId::from_path(Utf8Path::new("app.ts")),
            Some(LangId::Typescript)
        );
    }

    #[test]
    fn detect_tsx() {
        assert_eq!(
            LangId::from_path(Utf8Path::new("component.tsx")),
            Some(LangId::Tsx)
        );
    }

    #[test]
    fn detect_unsupported() {
        assert!(LangId::from_path(Utf8Path::new("Main.java")).is_none());
    }

    #[test]
    fn categorize_source_without_grammar() {
        assert_eq!(
            FileCategory::from_path(Utf8Path::new("src/Main.java")),
            FileCategory::Source
        );
    }

    #[test]
    fn categorize_config() {
        assert_eq!(
            FileCategory::from_path(Utf8Path::new("config/app.yaml")),
            FileCategory::Configuration
        );
        assert_eq!(
            FileCategory::from_path(Utf8Path::new(".env.production")),
            FileCategory::Configuration
        );
        assert_eq!(
            FileCategory::from_path(Utf8Path::new("deploy/Dockerfile")),
            FileCategory::Configuration
        );
    }

    #[test]
    fn categorize_docs_and_other() {
        assert_eq!(
            FileCategory::from_path(Utf8Path::new("README.md")),
            FileCategory::Documentation
        );
        assert_eq!(
            FileCategory::from_path(Utf8Path::new("assets/logo.png")),
            FileCategory::Other
        );
    }
}
