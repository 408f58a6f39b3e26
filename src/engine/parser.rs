use anyhow::{Context, Result};
use tree_sitter::{Parser, Tree};

use crate::language::LangId;

/// Maximum file size analyzed: 10 MB. Larger files are skipped.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Parse source text with a known language.
pub fn parse_source(source: &str, lang_id: LangId) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&lang_id.ts_language())
        .context("Failed to set parser language")?;

    parser
        .parse(source, None)
        .with_context(|| format!("Failed to parse {lang_id} source"))
}

/// Whether every linked grammar can be loaded into a parser.
pub fn check_language(lang_id: LangId) -> bool {
    let mut parser = Parser::new();
    parser.set_language(&lang_id.ts_language()).is_ok()
}
