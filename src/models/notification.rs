use serde::Serialize;

use crate::models::analysis::AnalysisResult;
use crate::models::approval::ApprovalRequest;
use crate::models::change::ChangeBatch;
use crate::models::docs::{DocValidation, UpdatePlan};
use crate::models::refactor::{RefactoringPlan, RefactoringResult};

/// Everything the pipeline reports, in emission order.
///
/// Per cycle the order is: `batch-flushed`, `analysis-complete`, then either
/// `approval-required` or the apply events, then `cycle-idle`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Notification {
    WatcherStarted {
        paths: Vec<String>,
    },
    WatcherStopped,
    BatchFlushed(ChangeBatch),
    AnalysisComplete(AnalysisResult),
    FileSkipped {
        path: String,
        reason: String,
    },
    ApprovalRequired(ApprovalRequest),
    ApprovalRejected {
        id: String,
    },
    ApprovalAbandoned {
        id: String,
    },
    DocumentationUpdated {
        plan: UpdatePlan,
        validation: DocValidation,
    },
    RefactoringStart(RefactoringPlan),
    RefactoringComplete(RefactoringResult),
    ValidationFailed(RefactoringResult),
    CycleIdle,
    WatchError {
        message: String,
    },
    PipelineError {
        stage: String,
        message: String,
    },
}

impl Notification {
    /// Wire name, as serialized in the `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WatcherStarted { .. } => "watcher-started",
            Self::WatcherStopped => "watcher-stopped",
            Self::BatchFlushed(_) => "batch-flushed",
            Self::AnalysisComplete(_) => "analysis-complete",
            Self::FileSkipped { .. } => "file-skipped",
            Self::ApprovalRequired(_) => "approval-required",
            Self::ApprovalRejected { .. } => "approval-rejected",
            Self::ApprovalAbandoned { .. } => "approval-abandoned",
            Self::DocumentationUpdated { .. } => "documentation-updated",
            Self::RefactoringStart(_) => "refactoring-start",
            Self::RefactoringComplete(_) => "refactoring-complete",
            Self::ValidationFailed(_) => "validation-failed",
            Self::CycleIdle => "cycle-idle",
            Self::WatchError { .. } => "watch-error",
            Self::PipelineError { .. } => "pipeline-error",
        }
    }
}

/// Process-wide state exposed by `status()`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub watched_paths: Vec<String>,
    pub pending_approval_count: usize,
}
