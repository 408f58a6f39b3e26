use aho_corasick::AhoCorasick;
use anyhow::Result;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use crate::engine::graph::DependencyGraph;
use crate::engine::parser::MAX_FILE_SIZE;
use crate::engine::watcher::{PathFilter, relative_to};
use crate::engine::{extract, resolve};
use crate::language::FileCategory;
use crate::models::analysis::{
    AnalysisResult, ContextChange, DependencyChange, ImpactLevel, SkippedFile,
};
use crate::models::change::{ChangeBatch, ChangeKind, FileChange};
use crate::models::import::{ImportEdge, SourceFacts};
use crate::models::refactor::{Priority, RefactoringTask, RefactoringType};

/// Markers that make an added line a breaking change, matched case-insensitively.
const BREAKING_MARKERS: &[&str] = &[
    "breaking change",
    "breaking:",
    "@deprecated",
    "#[deprecated",
    "@breaking",
];

/// Partial override returned by a classifier. `None` keeps the heuristic value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifierVerdict {
    pub impact_level: Option<ImpactLevel>,
    pub requires_doc_update: Option<bool>,
    pub requires_refactoring: Option<bool>,
}

/// Second opinion on a change, merged over the heuristic result.
#[async_trait]
pub trait ImpactClassifier: Send + Sync {
    async fn classify(&self, change: &FileChange, content: Option<&str>)
    -> Result<ClassifierVerdict>;
}

/// Classifier that never overrides anything.
pub struct NoopClassifier;

#[async_trait]
impl ImpactClassifier for NoopClassifier {
    async fn classify(
        &self,
        _change: &FileChange,
        _content: Option<&str>,
    ) -> Result<ClassifierVerdict> {
        Ok(ClassifierVerdict::default())
    }
}

/// Last analyzed state of a source file.
#[derive(Debug, Clone)]
struct FileRecord {
    exports: BTreeSet<String>,
    content: String,
}

/// Read-only view of one file's place in the graph.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentSummary {
    pub path: String,
    pub known: bool,
    pub exports: Vec<String>,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub affected_components: Vec<String>,
}

/// Owns the dependency graph and the export registry; classifies batches.
pub struct ImpactAnalyzer {
    root: Utf8PathBuf,
    complexity_threshold: u32,
    classifier: Box<dyn ImpactClassifier>,
    markers: AhoCorasick,
    graph: DependencyGraph,
    registry: HashMap<String, FileRecord>,
    known: HashSet<String>,
    /// Project-local imports per importer that matched no known file yet.
    pending: HashMap<String, Vec<ImportEdge>>,
}

/// Everything pass 1 learned about one change.
struct Observed<'a> {
    change: &'a FileChange,
    category: FileCategory,
    content: Option<String>,
    facts: Option<SourceFacts>,
}

impl ImpactAnalyzer {
    pub fn new(
        root: impl Into<Utf8PathBuf>,
        complexity_threshold: u32,
        classifier: Box<dyn ImpactClassifier>,
    ) -> Result<Self> {
        let markers = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(BREAKING_MARKERS)?;
        Ok(Self {
            root: root.into(),
            complexity_threshold,
            classifier,
            markers,
            graph: DependencyGraph::new(),
            registry: HashMap::new(),
            known: HashSet::new(),
            pending: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Read files from `root` from now on, keeping the indexed state as the
    /// previous version of every file.
    pub fn rebase(&mut self, root: impl Into<Utf8PathBuf>) {
        self.root = root.into();
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn is_known(&self, path: &str) -> bool {
        self.known.contains(path)
    }

    pub fn exports_of(&self, path: &str) -> Option<&BTreeSet<String>> {
        self.registry.get(path).map(|r| &r.exports)
    }

    /// Rebuild the graph and registry from every matching file under the root.
    ///
    /// Unreadable or unparsable files are skipped; returns the number of
    /// source files indexed.
    pub fn index(&mut self, filter: &PathFilter) -> Result<usize> {
        use ignore::WalkBuilder;

        self.graph = DependencyGraph::new();
        self.registry.clear();
        self.known.clear();
        self.pending.clear();

        let mut builder = WalkBuilder::new(&self.root);
        builder.hidden(false).git_ignore(true).git_global(false);

        let mut sources = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "walk entry skipped");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let Some(rel) = relative_to(&self.root, entry.path()) else {
                continue;
            };
            if !filter.matches(&rel) {
                continue;
            }
            if FileCategory::from_path(Utf8Path::new(&rel)) == FileCategory::Source {
                sources.push(rel.clone());
            }
            self.known.insert(rel);
        }

        let mut indexed = 0;
        for rel in sources {
            let path = self.root.join(&rel);
            match std::fs::metadata(&path) {
                Ok(meta) if meta.len() <= MAX_FILE_SIZE => {}
                _ => continue,
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let facts = match extract::extract_facts(Utf8Path::new(&rel), &content) {
                Ok(f) => f,
                Err(e) => {
                    debug!(path = %rel, error = %e, "index extraction failed");
                    continue;
                }
            };
            self.link(&rel, &facts);
            self.registry.insert(
                rel,
                FileRecord {
                    exports: facts.exports,
                    content,
                },
            );
            indexed += 1;
        }

        debug!(
            files = indexed,
            edges = self.graph.edge_count(),
            "project indexed"
        );
        Ok(indexed)
    }

    /// Replace the outgoing edges of `path` from its imports. Project-local
    /// imports that match nothing are parked until their target shows up.
    fn link(&mut self, path: &str, facts: &SourceFacts) -> DependencyChange {
        let mut deps = BTreeSet::new();
        let mut unresolved = Vec::new();
        for edge in &facts.imports {
            match resolve::resolve_import(path, edge, |p| self.known.contains(p)) {
                Some(dep) if dep != path => {
                    deps.insert(dep);
                }
                Some(_) => {}
                None if resolve::is_project_local(path, edge) => unresolved.push(edge.clone()),
                None => {}
            }
        }
        if unresolved.is_empty() {
            self.pending.remove(path);
        } else {
            self.pending.insert(path.to_string(), unresolved);
        }
        self.graph.set_dependencies(path, deps)
    }

    /// Turn parked imports that name `target` into graph edges.
    fn adopt(&mut self, target: &str) -> Vec<DependencyChange> {
        let known = &self.known;
        let names_target = |importer: &str, edge: &ImportEdge| {
            resolve::resolve_import(importer, edge, |p| p == target || known.contains(p))
                .is_some_and(|dep| dep == target)
        };

        let importers: Vec<String> = self
            .pending
            .iter()
            .filter(|(importer, edges)| {
                let importer = importer.as_str();
                importer != target && edges.iter().any(|e| names_target(importer, e))
            })
            .map(|(importer, _)| importer.clone())
            .collect();

        let mut changes = Vec::new();
        for importer in importers {
            if let Some(edges) = self.pending.get_mut(&importer) {
                edges.retain(|e| !names_target(importer.as_str(), e));
                if edges.is_empty() {
                    self.pending.remove(&importer);
                }
            }
            let mut deps: BTreeSet<String> =
                self.graph.dependencies(&importer).map(str::to_string).collect();
            deps.insert(target.to_string());
            debug!(importer = %importer, path = %target, "parked import resolved");
            changes.push(self.graph.set_dependencies(&importer, deps));
        }
        changes
    }

    /// Classify every change in `batch`.
    ///
    /// Pass 1 reads files and updates the graph, pass 2 classifies against the
    /// updated graph, pass 3 commits the new file state to the registry.
    pub async fn analyze(&mut self, batch: &ChangeBatch) -> AnalysisResult {
        let mut skipped = Vec::new();
        let mut dependency_changes = Vec::new();
        let mut observed = Vec::new();

        // files added in this batch must resolve for each other
        let mut arrived = Vec::new();
        for change in &batch.changes {
            if change.kind != ChangeKind::Deleted && self.known.insert(change.path.clone()) {
                arrived.push(change.path.as_str());
            }
        }
        for path in arrived {
            for dep_change in self.adopt(path) {
                push_dependency_change(&mut dependency_changes, dep_change);
            }
        }

        // --- Pass 1: read + graph maintenance ---
        for change in &batch.changes {
            let category = FileCategory::from_path(Utf8Path::new(&change.path));

            if change.kind == ChangeKind::Deleted {
                // importers written before the file existed still depend on it
                for dep_change in self.adopt(&change.path) {
                    push_dependency_change(&mut dependency_changes, dep_change);
                }
                self.pending.remove(&change.path);
                let dep_change = self.graph.remove_file(&change.path);
                push_dependency_change(&mut dependency_changes, dep_change);
                observed.push(Observed {
                    change,
                    category,
                    content: None,
                    facts: None,
                });
                continue;
            }

            let content = match self.read(&change.path).await {
                Ok(c) => c,
                Err(reason) => {
                    warn!(path = %change.path, %reason, "file skipped");
                    self.known.remove(&change.path);
                    skipped.push(SkippedFile {
                        path: change.path.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let facts = if category == FileCategory::Source {
                match extract::extract_facts(Utf8Path::new(&change.path), &content) {
                    Ok(f) => Some(f),
                    Err(e) => {
                        warn!(path = %change.path, error = %e, "extraction failed");
                        skipped.push(SkippedFile {
                            path: change.path.clone(),
                            reason: format!("extraction failed: {e}"),
                        });
                        continue;
                    }
                }
            } else {
                None
            };

            if let Some(facts) = &facts {
                let dep_change = self.link(&change.path, facts);
                push_dependency_change(&mut dependency_changes, dep_change);
            }

            observed.push(Observed {
                change,
                category,
                content: Some(content),
                facts,
            });
        }

        // --- Pass 2: classify against the updated graph ---
        let mut changes = Vec::with_capacity(observed.len());
        let mut complexity = HashMap::new();
        for obs in &observed {
            if let Some(facts) = &obs.facts {
                complexity.insert(obs.change.path.as_str(), facts.complexity.score());
            }
            let mut ctx = self.heuristic(obs);

            match self
                .classifier
                .classify(obs.change, obs.content.as_deref())
                .await
            {
                Ok(verdict) => {
                    if let Some(level) = verdict.impact_level {
                        ctx.impact_level = level;
                    }
                    if let Some(doc) = verdict.requires_doc_update {
                        ctx.requires_doc_update = doc;
                    }
                    if let Some(refactor) = verdict.requires_refactoring {
                        ctx.requires_refactoring = refactor;
                    }
                }
                Err(e) => {
                    warn!(
                        path = %obs.change.path,
                        error = %e,
                        "classifier failed, keeping heuristic result"
                    );
                }
            }
            changes.push(ctx);
        }

        let refactoring_tasks = refactoring_tasks(&changes, &complexity);

        // --- Pass 3: commit file state ---
        for obs in observed {
            let path = &obs.change.path;
            match (obs.change.kind, obs.facts, obs.content) {
                (ChangeKind::Deleted, _, _) => {
                    self.registry.remove(path);
                    self.known.remove(path);
                }
                (_, Some(facts), Some(content)) => {
                    self.registry.insert(
                        path.clone(),
                        FileRecord {
                            exports: facts.exports,
                            content,
                        },
                    );
                }
                _ => {}
            }
        }

        let overall_impact = changes
            .iter()
            .map(|c| c.impact_level)
            .max()
            .unwrap_or_default();
        let documentation_updates = documentation_updates(&changes);

        debug!(
            batch = batch.id,
            files = changes.len(),
            skipped = skipped.len(),
            impact = %overall_impact,
            "batch analyzed"
        );

        AnalysisResult {
            changes,
            overall_impact,
            documentation_updates,
            refactoring_tasks,
            dependency_changes,
            skipped,
        }
    }

    /// Re-read files written by the pipeline itself so the graph and the
    /// registry match disk, without classifying anything.
    pub async fn refresh(&mut self, paths: &[String]) {
        for path in paths {
            if FileCategory::from_path(Utf8Path::new(path)) != FileCategory::Source {
                continue;
            }
            let content = match self.read(path).await {
                Ok(c) => c,
                Err(_) => {
                    self.graph.remove_file(path);
                    self.pending.remove(path);
                    self.registry.remove(path);
                    self.known.remove(path);
                    continue;
                }
            };
            let Ok(facts) = extract::extract_facts(Utf8Path::new(path), &content) else {
                continue;
            };
            if self.known.insert(path.clone()) {
                self.adopt(path);
            }
            self.link(path, &facts);
            self.registry.insert(
                path.clone(),
                FileRecord {
                    exports: facts.exports,
                    content,
                },
            );
        }
    }

    async fn read(&self, rel: &str) -> std::result::Result<String, String> {
        let path = self.root.join(rel);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| format!("unreadable: {e}"))?;
        if !meta.is_file() {
            return Err("not a regular file".to_string());
        }
        if meta.len() > MAX_FILE_SIZE {
            return Err(format!("larger than {MAX_FILE_SIZE} bytes"));
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| format!("unreadable: {e}"))?;
        String::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_string())
    }

    fn heuristic(&self, obs: &Observed<'_>) -> ContextChange {
        let path = obs.change.path.as_str();
        let mut suggestions = Vec::new();
        let affected_components = self.graph.affected_components(path);

        let (impact_level, requires_doc_update, requires_refactoring) = match (
            obs.change.kind,
            obs.category,
        ) {
            (ChangeKind::Deleted, category) => {
                let had_exports = self
                    .registry
                    .get(path)
                    .is_some_and(|r| !r.exports.is_empty());
                let dependents = self.graph.dependents(path).count();
                if category == FileCategory::Source && (dependents > 0 || had_exports) {
                    if dependents > 0 {
                        suggestions.push(format!(
                            "Remove or replace imports of {path} in {dependents} dependent file(s)"
                        ));
                    } else {
                        suggestions.push(format!(
                            "Check external users of the API exported by {path}"
                        ));
                    }
                    (ImpactLevel::Breaking, true, false)
                } else {
                    suggestions.push(format!("Drop documentation that still mentions {path}"));
                    (ImpactLevel::Major, true, false)
                }
            }
            (_, FileCategory::Source) => {
                let (Some(facts), Some(content)) = (&obs.facts, &obs.content) else {
                    return self.minor(obs, affected_components);
                };
                let previous = self.registry.get(path);

                let old_content = previous.map(|r| r.content.as_str()).unwrap_or("");
                let marker = added_lines(old_content, content)
                    .into_iter()
                    .any(|line| self.markers.is_match(line));

                let exports_changed = match previous {
                    Some(r) => r.exports != facts.exports,
                    None => !facts.exports.is_empty(),
                };

                let score = facts.complexity.score();
                let requires_refactoring = score > self.complexity_threshold;
                if requires_refactoring {
                    suggestions.push(format!(
                        "Reduce nesting in {path}: complexity {score} exceeds {}",
                        self.complexity_threshold
                    ));
                }

                if marker {
                    suggestions.push(format!("Review the breaking-change marker added to {path}"));
                    (ImpactLevel::Breaking, true, requires_refactoring)
                } else if exports_changed {
                    let before = previous.map(|r| &r.exports);
                    let added: Vec<&str> = facts
                        .exports
                        .iter()
                        .filter(|e| before.is_none_or(|b| !b.contains(*e)))
                        .map(String::as_str)
                        .collect();
                    let removed: Vec<&str> = before
                        .into_iter()
                        .flatten()
                        .filter(|e| !facts.exports.contains(*e))
                        .map(String::as_str)
                        .collect();
                    if !added.is_empty() {
                        suggestions.push(format!("Document new exports: {}", added.join(", ")));
                    }
                    if !removed.is_empty() {
                        suggestions
                            .push(format!("Document removed exports: {}", removed.join(", ")));
                    }
                    (ImpactLevel::Major, true, requires_refactoring)
                } else {
                    (ImpactLevel::Minor, false, requires_refactoring)
                }
            }
            (_, FileCategory::Configuration) => {
                suggestions.push(format!("Review configuration change in {path}"));
                (ImpactLevel::Major, true, false)
            }
            (_, FileCategory::Documentation | FileCategory::Other) => {
                (ImpactLevel::Minor, false, false)
            }
        };

        ContextChange {
            path: path.to_string(),
            change_kind: obs.change.kind,
            impact_level,
            affected_components,
            suggestions,
            requires_doc_update,
            requires_refactoring,
        }
    }

    fn minor(&self, obs: &Observed<'_>, affected_components: Vec<String>) -> ContextChange {
        ContextChange {
            path: obs.change.path.clone(),
            change_kind: obs.change.kind,
            impact_level: ImpactLevel::Minor,
            affected_components,
            suggestions: Vec::new(),
            requires_doc_update: false,
            requires_refactoring: false,
        }
    }

    /// Read-only summary of one file for reporting.
    pub fn component_summary(&self, path: &str) -> ComponentSummary {
        ComponentSummary {
            path: path.to_string(),
            known: self.known.contains(path),
            exports: self
                .registry
                .get(path)
                .map(|r| r.exports.iter().cloned().collect())
                .unwrap_or_default(),
            dependencies: self.graph.dependencies(path).map(str::to_string).collect(),
            dependents: self.graph.dependents(path).map(str::to_string).collect(),
            affected_components: self.graph.affected_components(path),
        }
    }
}

/// Review/optimize tasks for flagged files, then align tasks for the
/// dependents of every change of at least major impact.
fn refactoring_tasks(
    changes: &[ContextChange],
    complexity: &HashMap<&str, u32>,
) -> Vec<RefactoringTask> {
    let mut tasks: Vec<RefactoringTask> = Vec::new();
    let mut push = |task: RefactoringTask| {
        let duplicate = tasks.iter().any(|t| {
            t.target == task.target && t.kind == task.kind && t.depends_on == task.depends_on
        });
        if !duplicate {
            tasks.push(task);
        }
    };

    for change in changes {
        let path = change.path.as_str();
        let score = complexity.get(path).copied().unwrap_or(1).max(1);

        if change.requires_refactoring {
            push(
                RefactoringTask::new(
                    path,
                    RefactoringType::Optimize,
                    Priority::High,
                    format!("Reduce structural complexity of {path}"),
                )
                .with_complexity(score),
            );
        } else if change.impact_level == ImpactLevel::Breaking {
            push(
                RefactoringTask::new(
                    path,
                    RefactoringType::Cleanup,
                    Priority::High,
                    format!("Review breaking change in {path}"),
                )
                .with_complexity(change.affected_components.len() as u32 + 1),
            );
        }

        if change.impact_level >= ImpactLevel::Major {
            for component in &change.affected_components {
                push(
                    RefactoringTask::new(
                        component.as_str(),
                        RefactoringType::Cleanup,
                        Priority::Medium,
                        format!("Align {component} with changes in {path}"),
                    )
                    .after(path),
                );
            }
        }
    }

    // stable: equal priorities keep discovery order
    tasks.sort_by_key(|t| t.priority);
    tasks
}

fn push_dependency_change(out: &mut Vec<DependencyChange>, change: DependencyChange) {
    if !change.is_empty() {
        out.push(change);
    }
}

/// Union of affected components of doc-requiring changes, first-seen order.
/// A change with no affected components documents itself.
fn documentation_updates(changes: &[ContextChange]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for change in changes.iter().filter(|c| c.requires_doc_update) {
        let targets: Vec<&str> = if change.affected_components.is_empty() {
            vec![change.path.as_str()]
        } else {
            change.affected_components.iter().map(String::as_str).collect()
        };
        for target in targets {
            if seen.insert(target.to_string()) {
                out.push(target.to_string());
            }
        }
    }
    out
}

/// Lines of `new` not accounted for in `old`, compared as trimmed multisets.
fn added_lines<'a>(old: &str, new: &'a str) -> Vec<&'a str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in old.lines() {
        *counts.entry(line.trim()).or_default() += 1;
    }
    new.lines()
        .filter(|line| match counts.get_mut(line.trim()) {
            Some(n) if *n > 0 => {
                *n -= 1;
                false
            }
            _ => true,
        })
        .collect()
}

/// Project-relative form of a user-supplied path. Absolute paths must lie under
/// `root`; traversal components are rejected.
pub fn normalize_request_path(root: &Utf8Path, input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let candidate = Utf8Path::new(input);
    let rel = if candidate.is_absolute() {
        relative_to(root, candidate.as_std_path())?
    } else {
        input.trim_start_matches("./").replace('\\', "/")
    };
    if rel.split('/').any(|c| c == "..") || rel.is_empty() {
        return None;
    }
    Some(rel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct FailingClassifier;

    #[async_trait]
    impl ImpactClassifier for FailingClassifier {
        async fn classify(&self, _: &FileChange, _: Option<&str>) -> Result<ClassifierVerdict> {
            anyhow::bail!("model unavailable")
        }
    }

    struct DowngradeClassifier;

    #[async_trait]
    impl ImpactClassifier for DowngradeClassifier {
        async fn classify(&self, _: &FileChange, _: Option<&str>) -> Result<ClassifierVerdict> {
            Ok(ClassifierVerdict {
                impact_level: Some(ImpactLevel::Minor),
                requires_doc_update: Some(false),
                requires_refactoring: None,
            })
        }
    }

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        dir
    }

    fn analyzer(dir: &TempDir, classifier: Box<dyn ImpactClassifier>) -> ImpactAnalyzer {
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        let mut a = ImpactAnalyzer::new(root, 10, classifier).unwrap();
        let filter = PathFilter::new(&["**/*".to_string()], &["**/node_modules/**".to_string()])
            .unwrap();
        a.index(&filter).unwrap();
        a
    }

    fn batch(changes: Vec<FileChange>) -> ChangeBatch {
        ChangeBatch::new(1, changes)
    }

    fn util_project() -> TempDir {
        project(&[
            ("lib/util.ts", "export function helper() { return 1; }\n"),
            ("src/a.ts", "import { helper } from '../lib/util';\nexport const a = helper();\n"),
            ("src/b.ts", "import { helper } from '../lib/util';\nexport const b = helper();\n"),
            ("src/c.ts", "import { helper } from '../lib/util';\nexport const c = helper();\n"),
            ("README.md", "# demo\n"),
        ])
    }

    #[tokio::test]
    async fn index_builds_graph() {
        let dir = util_project();
        let a = analyzer(&dir, Box::new(NoopClassifier));
        let dependents: Vec<&str> = a.graph().dependents("lib/util.ts").collect();
        assert_eq!(dependents, vec!["src/a.ts", "src/b.ts", "src/c.ts"]);
        assert!(a.graph().is_symmetric());
        assert!(a.is_known("README.md"));
        assert_eq!(
            a.exports_of("lib/util.ts").unwrap().iter().collect::<Vec<_>>(),
            vec!["helper"]
        );
    }

    #[tokio::test]
    async fn deleting_imported_source_is_breaking() {
        let dir = util_project();
        let mut a = analyzer(&dir, Box::new(NoopClassifier));
        fs::remove_file(dir.path().join("lib/util.ts")).unwrap();

        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Deleted, "lib/util.ts")]))
            .await;

        assert_eq!(result.overall_impact, ImpactLevel::Breaking);
        let change = result.change_for("lib/util.ts").unwrap();
        assert!(change.requires_doc_update);
        assert_eq!(
            result.documentation_updates,
            vec!["src/a.ts", "src/b.ts", "src/c.ts"]
        );
        // incoming edges survive the deletion
        assert_eq!(a.graph().dependents("lib/util.ts").count(), 3);
        assert!(a.graph().is_symmetric());

        let first = &result.refactoring_tasks[0];
        assert_eq!(first.priority, Priority::High);
        assert_eq!(first.target, "lib/util.ts");
        let aligned: Vec<&str> = result
            .refactoring_tasks
            .iter()
            .filter(|t| t.depends_on.as_deref() == Some("lib/util.ts"))
            .map(|t| t.target.as_str())
            .collect();
        assert_eq!(aligned, vec!["src/a.ts", "src/b.ts", "src/c.ts"]);
    }

    fn importers_only_project() -> TempDir {
        project(&[
            ("src/a.ts", "import { helper } from '../lib/util';\nexport const a = helper();\n"),
            ("src/b.ts", "import { helper } from '../lib/util';\nexport const b = helper();\n"),
            ("src/c.ts", "import { helper } from '../lib/util';\nexport const c = helper();\n"),
        ])
    }

    #[tokio::test]
    async fn deleting_module_unknown_at_index_still_finds_importers() {
        let dir = importers_only_project();
        let mut a = analyzer(&dir, Box::new(NoopClassifier));
        assert!(!a.graph().has_dependents("lib/util.ts"));

        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Deleted, "lib/util.ts")]))
            .await;

        let change = result.change_for("lib/util.ts").unwrap();
        assert_eq!(change.impact_level, ImpactLevel::Breaking);
        assert_eq!(change.affected_components, vec!["src/a.ts", "src/b.ts", "src/c.ts"]);
        assert_eq!(
            result.documentation_updates,
            vec!["src/a.ts", "src/b.ts", "src/c.ts"]
        );
        assert!(a.graph().is_symmetric());
    }

    #[tokio::test]
    async fn module_added_after_importers_gains_dependents() {
        let dir = importers_only_project();
        let mut a = analyzer(&dir, Box::new(NoopClassifier));
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/util.ts"), "export function helper() { return 1; }\n")
            .unwrap();

        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Added, "lib/util.ts")]))
            .await;

        let change = result.change_for("lib/util.ts").unwrap();
        assert_eq!(change.impact_level, ImpactLevel::Major);
        assert_eq!(change.affected_components, vec!["src/a.ts", "src/b.ts", "src/c.ts"]);
        let adopted: Vec<&str> = result
            .dependency_changes
            .iter()
            .filter(|c| c.added == vec!["lib/util.ts"])
            .map(|c| c.path.as_str())
            .collect();
        assert_eq!(adopted.len(), 3);

        // the parked imports are consumed; a later edit resolves normally
        fs::write(
            dir.path().join("lib/util.ts"),
            "export function helper() { return 2; }\n",
        )
        .unwrap();
        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Modified, "lib/util.ts")]))
            .await;
        assert!(result.dependency_changes.is_empty());
        assert_eq!(a.graph().dependents("lib/util.ts").count(), 3);
        assert!(a.graph().is_symmetric());
    }

    #[tokio::test]
    async fn package_imports_never_gain_edges() {
        let dir = project(&[("src/a.ts", "import React from 'react';\nexport const a = 1;\n")]);
        let mut a = analyzer(&dir, Box::new(NoopClassifier));
        fs::write(dir.path().join("react"), "not a module\n").unwrap();

        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Added, "react")]))
            .await;
        assert!(result.dependency_changes.is_empty());
        assert!(!a.graph().has_dependents("react"));
    }

    #[tokio::test]
    async fn deleting_unreferenced_doc_is_major() {
        let dir = util_project();
        let mut a = analyzer(&dir, Box::new(NoopClassifier));
        fs::remove_file(dir.path().join("README.md")).unwrap();

        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Deleted, "README.md")]))
            .await;
        let change = result.change_for("README.md").unwrap();
        assert_eq!(change.impact_level, ImpactLevel::Major);
        assert_eq!(result.documentation_updates, vec!["README.md"]);
    }

    #[tokio::test]
    async fn configuration_is_major_with_docs() {
        let dir = project(&[("config/app.yaml", "port: 1\n")]);
        let mut a = analyzer(&dir, Box::new(NoopClassifier));
        fs::write(dir.path().join("config/app.yaml"), "port: 2\n").unwrap();

        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Modified, "config/app.yaml")]))
            .await;
        let change = result.change_for("config/app.yaml").unwrap();
        assert_eq!(change.impact_level, ImpactLevel::Major);
        assert!(change.requires_doc_update);
        assert!(!change.requires_refactoring);
        assert!(result.refactoring_tasks.is_empty());
    }

    #[tokio::test]
    async fn new_export_is_major() {
        let dir = project(&[("src/api.ts", "export function one() {}\n")]);
        let mut a = analyzer(&dir, Box::new(NoopClassifier));
        fs::write(
            dir.path().join("src/api.ts"),
            "export function one() {}\nexport function two() {}\n",
        )
        .unwrap();

        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Modified, "src/api.ts")]))
            .await;
        let change = result.change_for("src/api.ts").unwrap();
        assert_eq!(change.impact_level, ImpactLevel::Major);
        assert!(change.requires_doc_update);
        assert!(change.suggestions.iter().any(|s| s.contains("two")));
        assert_eq!(a.exports_of("src/api.ts").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn body_edit_is_minor() {
        let dir = project(&[("src/api.ts", "export function one() { return 1; }\n")]);
        let mut a = analyzer(&dir, Box::new(NoopClassifier));
        fs::write(dir.path().join("src/api.ts"), "export function one() { return 2; }\n").unwrap();

        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Modified, "src/api.ts")]))
            .await;
        assert_eq!(result.overall_impact, ImpactLevel::Minor);
        assert!(!result.has_work());
    }

    #[tokio::test]
    async fn marker_in_added_line_is_breaking() {
        let dir = project(&[("src/api.ts", "export function one() {}\n")]);
        let mut a = analyzer(&dir, Box::new(NoopClassifier));
        fs::write(
            dir.path().join("src/api.ts"),
            "/** @Deprecated use two */\nexport function one() {}\n",
        )
        .unwrap();

        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Modified, "src/api.ts")]))
            .await;
        let change = result.change_for("src/api.ts").unwrap();
        assert_eq!(change.impact_level, ImpactLevel::Breaking);
        assert!(change.requires_doc_update);
    }

    #[tokio::test]
    async fn complex_file_requires_refactoring() {
        let dir = project(&[("src/deep.py", "def f():\n    pass\n")]);
        let mut a = analyzer(&dir, Box::new(NoopClassifier));
        let deep = "def f(a):\n    if a:\n        for x in a:\n            while x:\n                if x > 1:\n                    x -= 1\n";
        fs::write(dir.path().join("src/deep.py"), deep).unwrap();

        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Modified, "src/deep.py")]))
            .await;
        let change = result.change_for("src/deep.py").unwrap();
        assert!(change.requires_refactoring);
        let task = &result.refactoring_tasks[0];
        assert_eq!(task.kind, RefactoringType::Optimize);
        assert_eq!(task.estimated_complexity, 16);
    }

    #[tokio::test]
    async fn unreadable_file_is_skipped() {
        let dir = project(&[("src/a.ts", "export const a = 1;\n")]);
        let mut a = analyzer(&dir, Box::new(NoopClassifier));

        let result = a
            .analyze(&batch(vec![
                FileChange::new(ChangeKind::Modified, "src/missing.ts"),
                FileChange::new(ChangeKind::Modified, "src/a.ts"),
            ]))
            .await;
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].path, "src/missing.ts");
    }

    #[tokio::test]
    async fn classifier_verdict_wins() {
        let dir = project(&[("config/app.yaml", "a: 1\n")]);
        let mut a = analyzer(&dir, Box::new(DowngradeClassifier));
        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Modified, "config/app.yaml")]))
            .await;
        let change = result.change_for("config/app.yaml").unwrap();
        assert_eq!(change.impact_level, ImpactLevel::Minor);
        assert!(!change.requires_doc_update);
        assert!(result.documentation_updates.is_empty());
    }

    #[tokio::test]
    async fn classifier_error_keeps_heuristic() {
        let dir = project(&[("config/app.yaml", "a: 1\n")]);
        let mut a = analyzer(&dir, Box::new(FailingClassifier));
        let result = a
            .analyze(&batch(vec![FileChange::new(ChangeKind::Modified, "config/app.yaml")]))
            .await;
        assert_eq!(result.overall_impact, ImpactLevel::Major);
    }

    #[tokio::test]
    async fn new_import_updates_graph_before_propagation() {
        let dir = project(&[
            ("src/core.ts", "export const core = 1;\n"),
            ("src/feature.ts", "export const feature = 1;\n"),
        ]);
        let mut a = analyzer(&dir, Box::new(NoopClassifier));
        fs::write(
            dir.path().join("src/feature.ts"),
            "import { core } from './core';\nexport const feature = core;\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("src/core.ts"),
            "export const core = 1;\nexport const extra = 2;\n",
        )
        .unwrap();

        let result = a
            .analyze(&batch(vec![
                FileChange::new(ChangeKind::Modified, "src/core.ts"),
                FileChange::new(ChangeKind::Modified, "src/feature.ts"),
            ]))
            .await;
        let core = result.change_for("src/core.ts").unwrap();
        assert_eq!(core.affected_components, vec!["src/feature.ts"]);
        assert_eq!(result.dependency_changes.len(), 1);
        assert_eq!(result.dependency_changes[0].added, vec!["src/core.ts"]);
    }

    #[tokio::test]
    async fn refresh_drops_edges_of_rewritten_importer() {
        let dir = util_project();
        let mut a = analyzer(&dir, Box::new(NoopClassifier));
        fs::write(dir.path().join("src/a.ts"), "export const a = 1;\n").unwrap();

        a.refresh(&["src/a.ts".to_string()]).await;
        let dependents: Vec<&str> = a.graph().dependents("lib/util.ts").collect();
        assert_eq!(dependents, vec!["src/b.ts", "src/c.ts"]);
        assert!(a.graph().is_symmetric());
    }

    #[test]
    fn added_lines_is_multiset_diff() {
        let added = added_lines("a\nb\nb\n", "b\na\nc\nb\nb\n");
        assert_eq!(added, vec!["c", "b"]);
    }

    #[test]
    fn request_paths_are_normalized() {
        let root = Utf8Path::new("/work/project");
        assert_eq!(normalize_request_path(root, "./src/a.ts").as_deref(), Some("src/a.ts"));
        assert_eq!(
            normalize_request_path(root, "/work/project/src/a.ts").as_deref(),
            Some("src/a.ts")
        );
        assert_eq!(normalize_request_path(root, "/etc/passwd"), None);
        assert_eq!(normalize_request_path(root, "../x.ts"), None);
    }
}
