//! Text mutations behind the built-in refactoring types.

use anyhow::{Result, bail};

use crate::engine::resolve;
use crate::error::{ContextError, ErrorCode};
use crate::models::import::{ImportEdge, ImportKind};
use crate::models::refactor::{RefactoringTask, RefactoringType};

/// Compute the new content of `task.target`.
///
/// `removed_upstream` is the task's upstream file when it no longer exists;
/// import lines pointing at it are dropped.
pub fn rewrite(
    task: &RefactoringTask,
    content: &str,
    removed_upstream: Option<&str>,
) -> Result<String> {
    ensure_supported(task)?;
    let cleaned = cleanup(&task.target, content, removed_upstream);
    Ok(match task.kind {
        RefactoringType::Optimize => strip_debug_statements(&cleaned),
        _ => cleaned,
    })
}

/// Extract, rename and move need a symbol and a destination the task model
/// does not carry.
pub fn ensure_supported(task: &RefactoringTask) -> Result<()> {
    match task.kind {
        RefactoringType::Cleanup | RefactoringType::Optimize => Ok(()),
        kind => {
            let kind = format!("{kind:?}").to_lowercase();
            bail!(ContextError::new(
                ErrorCode::UnsupportedRefactoring,
                format!("{kind} refactoring of {} is not supported", task.target),
            ))
        }
    }
}

fn cleanup(target: &str, content: &str, removed_upstream: Option<&str>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut blank_run = 0;

    for line in content.lines() {
        let line = line.trim_end();
        if let Some(upstream) = removed_upstream
            && imports_file(line, target, upstream)
        {
            continue;
        }
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }

    let trimmed = out.trim_end_matches('\n').len();
    out.truncate(trimmed);
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Whether `line` of `importer` imports exactly the file `upstream`.
fn imports_file(line: &str, importer: &str, upstream: &str) -> bool {
    let trimmed = line.trim_start();
    let names_upstream = |source: &str, kind: ImportKind| {
        let edge = ImportEdge {
            source: source.to_string(),
            line: 0,
            kind,
        };
        resolve::resolve_import(importer, &edge, |p| p == upstream).is_some()
    };

    if trimmed.starts_with("#include") {
        return quoted_strings(trimmed).any(|spec| names_upstream(spec, ImportKind::Include));
    }

    let quoted_import = trimmed.starts_with("import ")
        || trimmed.contains("require(")
        || (trimmed.starts_with("export ") && trimmed.contains(" from "));
    if quoted_import {
        let mut specs = quoted_strings(trimmed).peekable();
        if specs.peek().is_some() {
            return specs.any(|spec| names_upstream(spec, ImportKind::Import));
        }
    }

    // python: `from .util import x`, `import pkg.util`
    if let Some(rest) = trimmed
        .strip_prefix("from ")
        .or_else(|| trimmed.strip_prefix("import "))
    {
        let module = rest
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_end_matches(',');
        return !module.is_empty() && names_upstream(module, ImportKind::Import);
    }
    false
}

fn quoted_strings(line: &str) -> impl Iterator<Item = &str> {
    let mut rest = line;
    std::iter::from_fn(move || {
        let start = rest.find(['"', '\''])?;
        let quote = rest[start..].chars().next()?;
        let tail = &rest[start + 1..];
        let end = tail.find(quote)?;
        let found = &tail[..end];
        rest = &tail[end + 1..];
        Some(found)
    })
}

fn is_debug_statement(line: &str) -> bool {
    let t = line.trim();
    if t == "debugger;" || t == "debugger" {
        return true;
    }
    let call = t.starts_with("console.log(")
        || t.starts_with("console.debug(")
        || t.starts_with("dbg!(");
    call && (t.ends_with(");") || t.ends_with(')'))
}

fn strip_debug_statements(content: &str) -> String {
    let kept: Vec<&str> = content.lines().filter(|l| !is_debug_statement(l)).collect();
    if kept.is_empty() {
        return String::new();
    }
    let mut out = kept.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::refactor::Priority;

    fn task(kind: RefactoringType) -> RefactoringTask {
        task_for("src/a.ts", kind)
    }

    fn task_for(target: &str, kind: RefactoringType) -> RefactoringTask {
        RefactoringTask::new(target, kind, Priority::Medium, "test")
    }

    #[test]
    fn cleanup_normalizes_whitespace() {
        let out = rewrite(&task(RefactoringType::Cleanup), "a  \n\n\n\nb\t\n\n\n", None).unwrap();
        assert_eq!(out, "a\n\nb\n");
    }

    #[test]
    fn cleanup_is_idempotent() {
        let once = rewrite(&task(RefactoringType::Cleanup), "x \n\n\ny", None).unwrap();
        let twice = rewrite(&task(RefactoringType::Cleanup), &once, None).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn cleanup_drops_imports_of_removed_upstream() {
        let src = "import { helper } from '../lib/util';\nimport { log } from '../lib/log';\nconst x = require(\"../lib/util.js\");\nexport const a = 1;\n";
        let out = rewrite(&task(RefactoringType::Cleanup), src, Some("lib/util.ts")).unwrap();
        assert_eq!(out, "import { log } from '../lib/log';\nexport const a = 1;\n");
    }

    #[test]
    fn cleanup_drops_python_imports() {
        let src = "from .util import helper\nimport os\n\nhelper()\n";
        let task = task_for("app/main.py", RefactoringType::Cleanup);
        let out = rewrite(&task, src, Some("app/util.py")).unwrap();
        assert_eq!(out, "import os\n\nhelper()\n");
    }

    #[test]
    fn cleanup_keeps_imports_of_same_named_modules() {
        let src = "import { helper } from '../lib/util';\nimport { format } from './format/util';\nimport { pad } from '../vendor/util.js';\nexport const a = 1;\n";
        let out = rewrite(&task(RefactoringType::Cleanup), src, Some("lib/util.ts")).unwrap();
        assert_eq!(
            out,
            "import { format } from './format/util';\nimport { pad } from '../vendor/util.js';\nexport const a = 1;\n"
        );
    }

    #[test]
    fn cleanup_keeps_python_modules_from_other_packages() {
        let src = "from .util import helper\nfrom tools.util import other\n";
        let task = task_for("app/main.py", RefactoringType::Cleanup);
        let out = rewrite(&task, src, Some("app/util.py")).unwrap();
        assert_eq!(out, "from tools.util import other\n");
    }

    #[test]
    fn cleanup_matches_includes_by_path() {
        let src = "#include \"util.h\"\n#include \"other/util.h\"\nint main() {}\n";
        let task = task_for("native/main.c", RefactoringType::Cleanup);
        let out = rewrite(&task, src, Some("native/util.h")).unwrap();
        assert_eq!(out, "#include \"other/util.h\"\nint main() {}\n");
    }

    #[test]
    fn optimize_strips_debug_statements() {
        let src = "function f() {\n  console.log('x');\n  debugger;\n  return 1;\n}\n";
        let out = rewrite(&task(RefactoringType::Optimize), src, None).unwrap();
        assert_eq!(out, "function f() {\n  return 1;\n}\n");
    }

    #[test]
    fn multiline_debug_calls_are_kept() {
        let src = "console.log(\n  value\n);\n";
        let out = rewrite(&task(RefactoringType::Optimize), src, None).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn unsupported_kinds_fail() {
        for kind in [RefactoringType::Extract, RefactoringType::Rename, RefactoringType::Move] {
            let err = rewrite(&task(kind), "x\n", None).unwrap_err();
            let ctx = err.downcast_ref::<ContextError>().unwrap();
            assert_eq!(ctx.code, ErrorCode::UnsupportedRefactoring);
        }
    }
}
