//! Best-effort extraction of imports, exported symbols and structural
//! complexity from source text.
//!
//! Languages with a linked grammar are walked syntactically; everything else
//! classified as source falls back to line heuristics. Neither path resolves
//! renamed re-exports or dynamic imports.

use anyhow::Result;
use camino::Utf8Path;
use std::collections::BTreeSet;
use tree_sitter::Node;

use crate::engine::{imports, parser};
use crate::language::LangId;
use crate::models::import::{Complexity, ImportEdge, ImportKind, SourceFacts};

/// Node kinds that count as one branch point.
const BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "if_expression",
    "elif_clause",
    "for_statement",
    "for_in_statement",
    "for_expression",
    "while_statement",
    "while_expression",
    "loop_expression",
    "do_statement",
    "switch_case",
    "match_arm",
    "expression_case",
    "type_case",
    "communication_case",
    "case_clause",
    "catch_clause",
    "except_clause",
    "ternary_expression",
    "conditional_expression",
];

/// Node kinds that open a nesting level.
const NESTING_KINDS: &[&str] = &[
    "if_statement",
    "if_expression",
    "for_statement",
    "for_in_statement",
    "for_expression",
    "while_statement",
    "while_expression",
    "loop_expression",
    "do_statement",
    "switch_statement",
    "match_expression",
    "expression_switch_statement",
    "type_switch_statement",
    "select_statement",
    "try_statement",
    "catch_clause",
    "except_clause",
    "with_statement",
];

const TEXT_BRANCH_WORDS: &[&str] = &[
    "if", "elif", "for", "foreach", "while", "case", "catch", "when",
];

/// Extract facts for the file at `path` whose content is `source`.
pub fn extract_facts(path: &Utf8Path, source: &str) -> Result<SourceFacts> {
    match LangId::from_path(path) {
        Some(lang) => extract_syntactic(source, lang),
        None => Ok(extract_textual(source)),
    }
}

fn extract_syntactic(source: &str, lang: LangId) -> Result<SourceFacts> {
    let tree = parser::parse_source(source, lang)?;
    let root = tree.root_node();
    let bytes = source.as_bytes();

    let mut imports = imports::extract_imports(root, bytes, lang)?;
    let mut exports = BTreeSet::new();
    match lang {
        LangId::Javascript | LangId::Typescript | LangId::Tsx => {
            ecmascript_exports(root, bytes, &mut exports, &mut imports)
        }
        LangId::Rust => rust_exports(root, bytes, &mut exports),
        LangId::Python => python_exports(root, bytes, &mut exports),
        LangId::Go => go_exports(root, bytes, &mut exports),
    }

    Ok(SourceFacts {
        imports,
        exports,
        complexity: measure(root),
    })
}

fn text_of<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn field_text<'a>(node: Node<'_>, field: &str, source: &'a [u8]) -> Option<&'a str> {
    node.child_by_field_name(field)
        .map(|n| text_of(n, source))
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Exports
// ---------------------------------------------------------------------------

fn ecmascript_exports(
    root: Node<'_>,
    source: &[u8],
    exports: &mut BTreeSet<String>,
    imports: &mut Vec<ImportEdge>,
) {
    let mut cursor = root.walk();
    for node in root.named_children(&mut cursor) {
        match node.kind() {
            "export_statement" => {
                // `export { a } from './x'` and `export * from './x'`
                if let Some(from) = node.child_by_field_name("source") {
                    imports.push(ImportEdge {
                        source: imports::unquote(text_of(from, source)).to_string(),
                        line: node.start_position().row,
                        kind: ImportKind::Import,
                    });
                }

                let mut inner = node.walk();
                let is_default = node.children(&mut inner).any(|c| c.kind() == "default");
                if is_default {
                    exports.insert("default".to_string());
                    continue;
                }

                if let Some(decl) = node.child_by_field_name("declaration") {
                    declaration_names(decl, source, exports);
                }

                let mut inner = node.walk();
                for child in node.named_children(&mut inner) {
                    if child.kind() != "export_clause" {
                        continue;
                    }
                    let mut spec_cursor = child.walk();
                    for spec in child.named_children(&mut spec_cursor) {
                        let name = field_text(spec, "alias", source)
                            .or_else(|| field_text(spec, "name", source));
                        if let Some(name) = name {
                            exports.insert(name.to_string());
                        }
                    }
                }
            }
            // CommonJS: `module.exports = x`, `exports.name = x`
            "expression_statement" => {
                let Some(assign) = node.named_child(0) else {
                    continue;
                };
                if assign.kind() != "assignment_expression" {
                    continue;
                }
                let Some(left) = field_text(assign, "left", source) else {
                    continue;
                };
                if left == "module.exports" {
                    exports.insert("default".to_string());
                } else if let Some(name) = left
                    .strip_prefix("module.exports.")
                    .or_else(|| left.strip_prefix("exports."))
                {
                    exports.insert(name.to_string());
                }
            }
            _ => {}
        }
    }
}

fn declaration_names(decl: Node<'_>, source: &[u8], exports: &mut BTreeSet<String>) {
    match decl.kind() {
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = decl.walk();
            for declarator in decl.named_children(&mut cursor) {
                if declarator.kind() == "variable_declarator"
                    && let Some(name) = field_text(declarator, "name", source)
                {
                    exports.insert(name.to_string());
                }
            }
        }
        _ => {
            if let Some(name) = field_text(decl, "name", source) {
                exports.insert(name.to_string());
            }
        }
    }
}

const RUST_ITEM_KINDS: &[&str] = &[
    "function_item",
    "struct_item",
    "enum_item",
    "union_item",
    "trait_item",
    "type_item",
    "const_item",
    "static_item",
    "mod_item",
];

fn is_pub(node: Node<'_>, source: &[u8]) -> bool {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .any(|c| c.kind() == "visibility_modifier" && text_of(c, source) == "pub")
}

fn rust_exports(root: Node<'_>, source: &[u8], exports: &mut BTreeSet<String>) {
    let mut cursor = root.walk();
    for node in root.named_children(&mut cursor) {
        if RUST_ITEM_KINDS.contains(&node.kind()) {
            if is_pub(node, source)
                && let Some(name) = field_text(node, "name", source)
            {
                exports.insert(name.to_string());
            }
            continue;
        }

        // pub methods of inherent and trait impls are part of the surface too
        if node.kind() == "impl_item"
            && let Some(ty) = field_text(node, "type", source)
            && let Some(body) = node.child_by_field_name("body")
        {
            let mut body_cursor = body.walk();
            for item in body.named_children(&mut body_cursor) {
                if item.kind() == "function_item"
                    && is_pub(item, source)
                    && let Some(name) = field_text(item, "name", source)
                {
                    exports.insert(format!("{ty}::{name}"));
                }
            }
        }
    }
}

fn python_exports(root: Node<'_>, source: &[u8], exports: &mut BTreeSet<String>) {
    let mut cursor = root.walk();
    for node in root.named_children(&mut cursor) {
        let def = if node.kind() == "decorated_definition" {
            match node.child_by_field_name("definition") {
                Some(d) => d,
                None => continue,
            }
        } else {
            node
        };
        if !matches!(def.kind(), "function_definition" | "class_definition") {
            continue;
        }
        if let Some(name) = field_text(def, "name", source)
            && !name.starts_with('_')
        {
            exports.insert(name.to_string());
        }
    }
}

fn go_exports(root: Node<'_>, source: &[u8], exports: &mut BTreeSet<String>) {
    let mut insert = |name: &str| {
        if name.chars().next().is_some_and(char::is_uppercase) {
            exports.insert(name.to_string());
        }
    };

    let mut cursor = root.walk();
    for node in root.named_children(&mut cursor) {
        match node.kind() {
            "function_declaration" | "method_declaration" => {
                if let Some(name) = field_text(node, "name", source) {
                    insert(name);
                }
            }
            "type_declaration" | "const_declaration" | "var_declaration" => {
                let mut inner = node.walk();
                for spec in node.named_children(&mut inner) {
                    if let Some(name) = field_text(spec, "name", source) {
                        insert(name);
                    }
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Complexity
// ---------------------------------------------------------------------------

/// Walk the whole tree once, tracking control-flow nesting.
fn measure(root: Node<'_>) -> Complexity {
    let mut complexity = Complexity::default();
    let mut cursor = root.walk();
    let mut nest_stack: Vec<bool> = Vec::new();
    let mut depth = 0u32;

    loop {
        let node = cursor.node();
        let kind = node.kind();
        if BRANCH_KINDS.contains(&kind) {
            complexity.branches += 1;
        }
        let nests = NESTING_KINDS.contains(&kind) && !is_else_if(node);
        if nests {
            depth += 1;
            complexity.max_depth = complexity.max_depth.max(depth);
        }
        nest_stack.push(nests);

        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if nest_stack.pop() == Some(true) {
                depth -= 1;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return complexity;
            }
        }
    }
}

/// `else if` chains stay at the level of the first `if`.
fn is_else_if(node: Node<'_>) -> bool {
    if !matches!(node.kind(), "if_statement" | "if_expression") {
        return false;
    }
    node.parent().is_some_and(|p| {
        matches!(
            p.kind(),
            "else_clause" | "if_statement" | "if_expression"
        )
    })
}

// ---------------------------------------------------------------------------
// Line heuristics
// ---------------------------------------------------------------------------

fn extract_textual(source: &str) -> SourceFacts {
    let mut facts = SourceFacts::default();
    let mut open: Vec<bool> = Vec::new();

    for (line_no, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.starts_with("//") || line.starts_with('*') || line.starts_with("/*") {
            continue;
        }

        if let Some(edge) = text_import(line, line_no) {
            facts.imports.push(edge);
        }
        if let Some(name) = text_export(line) {
            facts.exports.insert(name);
        }

        let branch_words = line
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| TEXT_BRANCH_WORDS.contains(w))
            .count() as u32;
        if branch_words > 0 {
            facts.complexity.branches += branch_words;
            let level = open.iter().filter(|b| **b).count() as u32 + 1;
            facts.complexity.max_depth = facts.complexity.max_depth.max(level);
        }

        for c in line.chars() {
            match c {
                '{' => open.push(branch_words > 0),
                '}' => {
                    open.pop();
                }
                _ => {}
            }
        }
    }

    facts
}

fn first_quoted(text: &str) -> Option<&str> {
    let start = text.find(['"', '\''])?;
    let quote = text[start..].chars().next()?;
    let rest = &text[start + 1..];
    let end = rest.find(quote)?;
    Some(&rest[..end])
}

fn text_import(line: &str, line_no: usize) -> Option<ImportEdge> {
    let (source, kind) = if let Some(rest) = line.strip_prefix("#include") {
        // only project-local includes are resolvable
        (first_quoted(rest)?, ImportKind::Include)
    } else if let Some(pos) = line.find("require(") {
        (first_quoted(&line[pos..])?, ImportKind::Require)
    } else if line.starts_with("import ")
        || (line.starts_with("export ") && line.contains(" from "))
    {
        match line.find(" from ") {
            Some(pos) => (first_quoted(&line[pos..])?, ImportKind::Import),
            None => match first_quoted(line) {
                Some(s) => (s, ImportKind::Import),
                // `import a.b.C;`
                None => (
                    line.trim_start_matches("import ")
                        .trim_start_matches("static ")
                        .trim_end_matches(';')
                        .trim(),
                    ImportKind::Import,
                ),
            },
        }
    } else {
        return None;
    };

    if source.is_empty() {
        return None;
    }
    Some(ImportEdge {
        source: source.to_string(),
        line: line_no,
        kind,
    })
}

fn text_export(line: &str) -> Option<String> {
    const KEYWORDS: &[&str] = &[
        "default", "async", "function", "function*", "class", "const", "let", "var",
        "interface", "type", "enum", "abstract", "static", "final", "public", "object", "fun",
        "struct", "data", "sealed", "def",
    ];

    let mut words = if let Some(rest) = line.strip_prefix("export ") {
        if rest.starts_with("default") {
            return Some("default".to_string());
        }
        rest.split_whitespace()
    } else if line.starts_with("public ") {
        line.split_whitespace()
    } else {
        return None;
    };

    let name = words.find(|w| !KEYWORDS.contains(w))?;
    let name: String = name
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
        .collect();
    if name.is_empty() { None } else { Some(name) }
}
