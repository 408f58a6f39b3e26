use serde::{Deserialize, Serialize};

use crate::models::change::ChangeKind;
use crate::models::refactor::RefactoringTask;

/// Severity of a change. Ordering is `Minor < Major < Breaking`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    #[default]
    Minor,
    Major,
    Breaking,
}

impl std::fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Breaking => "breaking",
        };
        write!(f, "{s}")
    }
}

/// Per-file analysis outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChange {
    pub path: String,
    pub change_kind: ChangeKind,
    pub impact_level: ImpactLevel,
    pub affected_components: Vec<String>,
    pub suggestions: Vec<String>,
    pub requires_doc_update: bool,
    pub requires_refactoring: bool,
}

/// Import edges added/removed for one file during graph maintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyChange {
    pub path: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub added: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub removed: Vec<String>,
}

impl DependencyChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A file excluded from a result under the soft-fail policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Result of a one-shot analysis outside the watch pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct OneShotReport {
    /// Tree the files were compared against; `null` when there was none.
    pub baseline: Option<String>,
    /// Modified source files left unclassified for lack of a baseline.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unassessed: Vec<String>,
    #[serde(flatten)]
    pub result: AnalysisResult,
}

/// Aggregate of one batch's analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub changes: Vec<ContextChange>,
    pub overall_impact: ImpactLevel,
    pub documentation_updates: Vec<String>,
    pub refactoring_tasks: Vec<RefactoringTask>,
    pub dependency_changes: Vec<DependencyChange>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub skipped: Vec<SkippedFile>,
}

impl AnalysisResult {
    /// Whether applying this result would write anything.
    pub fn has_work(&self) -> bool {
        !self.documentation_updates.is_empty() || !self.refactoring_tasks.is_empty()
    }

    pub fn change_for(&self, path: &str) -> Option<&ContextChange> {
        self.changes.iter().find(|c| c.path == path)
    }
}
