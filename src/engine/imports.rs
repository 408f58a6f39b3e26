use anyhow::Result;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Node, Query, QueryCursor};

use crate::language::LangId;
use crate::models::import::{ImportEdge, ImportKind};

/// Extract import edges from a parsed tree.
pub fn extract_imports(root: Node<'_>, source: &[u8], lang_id: LangId) -> Result<Vec<ImportEdge>> {
    let query_src = import_query(lang_id);
    let language = lang_id.ts_language();
    let query = Query::new(&language, query_src)?;
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, root, source);

    let mut edges = Vec::new();
    while let Some(m) = matches.next() {
        for capture in m.captures {
            let node = capture.node;
            let capture_name = &query.capture_names()[capture.index as usize];
            if *capture_name != "import.source" {
                continue;
            }

            // `mod foo { ... }` is inline and does not point at another file
            if node
                .parent()
                .is_some_and(|p| p.kind() == "mod_item" && p.child_by_field_name("body").is_some())
            {
                continue;
            }

            let source_text = node.utf8_text(source).unwrap_or("");
            let clean_source = unquote(source_text);
            if clean_source.is_empty() {
                continue;
            }

            edges.push(ImportEdge {
                source: clean_source.to_string(),
                line: node.start_position().row,
                kind: determine_kind(lang_id, m.pattern_index),
            });
        }
    }

    Ok(edges)
}

/// Strip string-literal quotes from an import source.
pub fn unquote(text: &str) -> &str {
    text.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

/// Determine the ImportKind based on language and pattern.
fn determine_kind(lang_id: LangId, pattern_index: usize) -> ImportKind {
    match lang_id {
        // pattern 0 = import statement, pattern 1 = require()
        LangId::Javascript | LangId::Typescript | LangId::Tsx if pattern_index >= 1 => {
            ImportKind::Require
        }
        LangId::Rust => ImportKind::Module,
        _ => ImportKind::Import,
    }
}

/// Language-specific tree-sitter queries for import statements.
fn import_query(lang_id: LangId) -> &'static str {
    match lang_id {
        LangId::Rust => r#"(mod_item name: (identifier) @import.source)"#,
        LangId::Python => {
            r#"
            (import_statement name: (dotted_name) @import.source)
            (import_from_statement module_name: (dotted_name) @import.source)
            (import_from_statement module_name: (relative_import) @import.source)
            "#
        }
        LangId::Javascript | LangId::Typescript | LangId::Tsx => {
            r#"
            (import_statement source: (string) @import.source)
            (call_expression
              function: (identifier) @fn_name
              arguments: (arguments (string) @import.source)
              (#eq? @fn_name "require"))
            "#
        }
        LangId::Go => r#"(import_spec path: (interpreted_string_literal) @import.source)"#,
    }
}
