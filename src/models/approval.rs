use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::models::analysis::AnalysisResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Applied,
    Rejected,
    Abandoned,
}

impl ApprovalStatus {
    /// Whether `self -> next` is a legal transition.
    pub fn can_become(self, next: ApprovalStatus) -> bool {
        use ApprovalStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Pending, Abandoned) | (Approved, Applied)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Rejected | Self::Abandoned)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{s}")
    }
}

/// How one half of an apply ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageOutcome {
    Completed,
    /// Docs were written but failed validation.
    Invalid,
    /// Tests failed and every touched file was restored.
    RolledBack,
    /// The stage errored before finishing; see the `pipeline-error` event.
    Failed,
}

/// What applying an approved analysis actually did. `None` means the
/// analysis had no work for that stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refactoring: Option<StageOutcome>,
}

impl ApplyOutcome {
    pub fn succeeded(&self) -> bool {
        [self.documentation, self.refactoring]
            .into_iter()
            .flatten()
            .all(|s| s == StageOutcome::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub analysis: AnalysisResult,
    pub status: ApprovalStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Set once an approved request has been applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ApplyOutcome>,
}

impl ApprovalRequest {
    pub fn new(analysis: AnalysisResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            analysis,
            status: ApprovalStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
            outcome: None,
        }
    }
}
