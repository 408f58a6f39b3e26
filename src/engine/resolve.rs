//! Map import specifiers to project-relative file paths.
//!
//! Only specifiers that can point into the project are resolved: relative
//! ECMAScript paths, Python modules, Rust `mod` declarations and quoted C-style
//! includes. Package imports return `None` and never become graph edges.

use camino::{Utf8Path, Utf8PathBuf};

use crate::models::import::{ImportEdge, ImportKind};

const ECMASCRIPT_EXTS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts"];

/// Resolve one import of `importer` (project-relative, '/'-separated).
///
/// `exists` answers whether a project-relative path is a known file.
pub fn resolve_import(
    importer: &str,
    edge: &ImportEdge,
    exists: impl Fn(&str) -> bool,
) -> Option<String> {
    let importer_path = Utf8Path::new(importer);
    let dir = importer_path.parent().unwrap_or(Utf8Path::new(""));
    let ext = importer_path.extension().unwrap_or("");

    match (edge.kind, ext) {
        (ImportKind::Module, _) => resolve_rust_mod(importer_path, &edge.source, &exists),
        (ImportKind::Include, _) => first_existing([join_normalized(dir, &edge.source)], &exists),
        (_, "py" | "pyi") => resolve_python(dir, &edge.source, &exists),
        _ if edge.source.starts_with('.') => resolve_relative(dir, &edge.source, &exists),
        _ => None,
    }
}

/// Whether `edge` could name a project file at all, even if none matches yet.
///
/// Package imports are never project-local; everything `resolve_import` would
/// try to match against the tree is.
pub fn is_project_local(importer: &str, edge: &ImportEdge) -> bool {
    let ext = Utf8Path::new(importer).extension().unwrap_or("");
    match (edge.kind, ext) {
        (ImportKind::Module | ImportKind::Include, _) => true,
        (_, "py" | "pyi") => true,
        _ => edge.source.starts_with('.'),
    }
}

fn first_existing(
    candidates: impl IntoIterator<Item = Option<String>>,
    exists: &impl Fn(&str) -> bool,
) -> Option<String> {
    candidates.into_iter().flatten().find(|c| exists(c))
}

/// Join `spec` onto `dir`, folding `.` and `..`. Escaping the root yields `None`.
fn join_normalized(dir: &Utf8Path, spec: &str) -> Option<String> {
    let mut parts: Vec<&str> = dir
        .as_str()
        .split('/')
        .filter(|p| !p.is_empty())
        .collect();
    for segment in spec.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn resolve_relative(dir: &Utf8Path, spec: &str, exists: &impl Fn(&str) -> bool) -> Option<String> {
    let base = join_normalized(dir, spec)?;
    if exists(&base) {
        return Some(base);
    }

    // `./util.js` written for a `.ts` source
    let stem = Utf8Path::new(&base)
        .extension()
        .filter(|e| ECMASCRIPT_EXTS.contains(e))
        .map(|e| base[..base.len() - e.len() - 1].to_string());

    let mut candidates = Vec::new();
    for root in std::iter::once(&base).chain(stem.as_ref()) {
        for ext in ECMASCRIPT_EXTS {
            candidates.push(Some(format!("{root}.{ext}")));
        }
    }
    for ext in ECMASCRIPT_EXTS {
        candidates.push(Some(format!("{base}/index.{ext}")));
    }
    first_existing(candidates, exists)
}

fn python_candidates(base: &Utf8Path, module: &str) -> [Option<String>; 2] {
    let rel = module.replace('.', "/");
    let joined: Utf8PathBuf = base.join(rel);
    let joined = joined.as_str().trim_start_matches('/');
    if joined.is_empty() {
        return [None, None];
    }
    [
        Some(format!("{joined}.py")),
        Some(format!("{joined}/__init__.py")),
    ]
}

fn resolve_python(dir: &Utf8Path, spec: &str, exists: &impl Fn(&str) -> bool) -> Option<String> {
    let dots = spec.chars().take_while(|c| *c == '.').count();
    if dots > 0 {
        let mut base = dir.to_path_buf();
        for _ in 1..dots {
            base = base.parent()?.to_path_buf();
        }
        let module = &spec[dots..];
        if module.is_empty() {
            let init = base.join("__init__.py").into_string();
            return first_existing([Some(init)], exists);
        }
        return first_existing(python_candidates(&base, module), exists);
    }

    // absolute imports: project root first, then the importer's directory
    first_existing(
        python_candidates(Utf8Path::new(""), spec)
            .into_iter()
            .chain(python_candidates(dir, spec)),
        exists,
    )
}

fn resolve_rust_mod(
    importer: &Utf8Path,
    name: &str,
    exists: &impl Fn(&str) -> bool,
) -> Option<String> {
    let parent = importer.parent().unwrap_or(Utf8Path::new(""));
    let dir = match importer.file_name() {
        Some("lib.rs" | "main.rs" | "mod.rs") => parent.to_path_buf(),
        _ => parent.join(importer.file_stem()?),
    };
    let candidates = [
        dir.join(format!("{name}.rs")),
        dir.join(name).join("mod.rs"),
    ];
    first_existing(candidates.map(|c| Some(c.into_string())), exists)
}
