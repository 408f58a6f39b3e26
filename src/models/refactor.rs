use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefactoringType {
    Extract,
    Rename,
    Move,
    Optimize,
    Cleanup,
}

impl RefactoringType {
    /// Baseline effort in minutes before complexity is added.
    pub fn base_minutes(self) -> u32 {
        match self {
            Self::Extract => 30,
            Self::Rename => 10,
            Self::Move => 15,
            Self::Optimize => 20,
            Self::Cleanup => 5,
        }
    }
}

/// Task priority. Sorting ascending yields `High` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefactoringTask {
    pub target: String,
    #[serde(rename = "type")]
    pub kind: RefactoringType,
    pub priority: Priority,
    pub description: String,
    pub estimated_complexity: u32,
    /// Upstream target whose own task must run first
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub depends_on: Option<String>,
}

impl RefactoringTask {
    pub fn new(
        target: impl Into<String>,
        kind: RefactoringType,
        priority: Priority,
        description: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            kind,
            priority,
            description: description.into(),
            estimated_complexity: 1,
            depends_on: None,
        }
    }

    pub fn with_complexity(mut self, complexity: u32) -> Self {
        self.estimated_complexity = complexity;
        self
    }

    pub fn after(mut self, upstream: impl Into<String>) -> Self {
        self.depends_on = Some(upstream.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefactoringPlan {
    pub tasks: Vec<RefactoringTask>,
    pub risk_level: RiskLevel,
    /// Estimated effort in minutes
    pub estimated_time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTask {
    pub task: RefactoringTask,
    pub reason: String,
}

/// Terminal record of one plan's execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefactoringResult {
    /// Tasks whose mutation was applied, even if later rolled back
    pub completed_tasks: Vec<RefactoringTask>,
    pub failed_tasks: Vec<FailedTask>,
    pub tests_run: u32,
    pub tests_passed: u32,
    pub validation_passed: bool,
    pub rolled_back: bool,
    /// Files written during execution, including rollback restores
    pub touched_files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_sorts_high_first() {
        let mut ps = vec![Priority::Low, Priority::High, Priority::Medium];
        ps.sort();
        assert_eq!(ps, vec![Priority::High, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn task_serializes_type_field() {
        let task = RefactoringTask::new("src/a.ts", RefactoringType::Cleanup, Priority::Medium, "x")
            .after("lib/util.ts");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "cleanup");
        assert_eq!(json["priority"], "medium");
        assert_eq!(json["depends_on"], "lib/util.ts");
    }
}
