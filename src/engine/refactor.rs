//! Plan ordering, atomic execution and validation of refactoring tasks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::engine::rewrite;
use crate::models::refactor::{
    FailedTask, Priority, RefactoringPlan, RefactoringResult, RefactoringTask, RiskLevel,
};

/// Outcome of one validation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TestReport {
    pub run: u32,
    pub passed: u32,
    pub success: bool,
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, root: &Utf8Path, touched: &[String]) -> Result<TestReport>;
}

/// Accepts every plan without running anything.
pub struct NoopTestRunner;

#[async_trait]
impl TestRunner for NoopTestRunner {
    async fn run(&self, _root: &Utf8Path, _touched: &[String]) -> Result<TestReport> {
        Ok(TestReport {
            run: 0,
            passed: 0,
            success: true,
        })
    }
}

/// Runs a shell command in the project root; exit status decides success.
pub struct CommandTestRunner {
    command: String,
}

impl CommandTestRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, root: &Utf8Path, touched: &[String]) -> Result<TestReport> {
        debug!(command = %self.command, files = touched.len(), "running validation");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(root)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run test command '{}'", self.command))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let success = output.status.success();

        let (passed, failed) = count_results(&text);
        let report = if passed + failed > 0 {
            TestReport {
                run: passed + failed,
                passed,
                success,
            }
        } else {
            TestReport {
                run: 1,
                passed: u32::from(success),
                success,
            }
        };
        Ok(report)
    }
}

/// Sum `N passed` / `N failed` counts from runner output.
fn count_results(text: &str) -> (u32, u32) {
    let mut passed = 0;
    let mut failed = 0;
    let words: Vec<&str> = text.split_whitespace().collect();
    for pair in words.windows(2) {
        let Ok(n) = pair[0].trim_matches(|c: char| !c.is_ascii_digit()).parse::<u32>() else {
            continue;
        };
        let word = pair[1].trim_matches(|c: char| !c.is_alphabetic());
        match word {
            "passed" | "passing" => passed += n,
            "failed" | "failing" => failed += n,
            _ => {}
        }
    }
    (passed, failed)
}

/// Pre-plan content of every target. `None` marks a file that did not exist.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<(String, Option<Vec<u8>>)>,
}

impl Snapshot {
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn capture(&self, root: &Utf8Path, paths: &[String]) -> Result<Snapshot>;

    /// Put every entry back. Returns the paths whose content actually changed.
    async fn restore(&self, root: &Utf8Path, snapshot: &Snapshot) -> Result<Vec<String>>;
}

/// Keeps snapshots in memory for the duration of one plan.
pub struct MemorySnapshotStore;

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn capture(&self, root: &Utf8Path, paths: &[String]) -> Result<Snapshot> {
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let full = root.join(path);
            let content = match tokio::fs::read(&full).await {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e).with_context(|| format!("Failed to snapshot {full}")),
            };
            entries.push((path.clone(), content));
        }
        Ok(Snapshot { entries })
    }

    async fn restore(&self, root: &Utf8Path, snapshot: &Snapshot) -> Result<Vec<String>> {
        let mut restored = Vec::new();
        for (path, content) in &snapshot.entries {
            let full = root.join(path);
            let current = tokio::fs::read(&full).await.ok();
            if current == *content {
                continue;
            }
            match content {
                Some(bytes) => {
                    if let Some(parent) = full.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&full, bytes)
                        .await
                        .with_context(|| format!("Failed to restore {full}"))?;
                }
                None => match tokio::fs::remove_file(&full).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e).with_context(|| format!("Failed to remove {full}")),
                },
            }
            restored.push(path.clone());
        }
        Ok(restored)
    }
}

pub struct RefactoringEngine {
    root: Utf8PathBuf,
    max_plan_tasks: usize,
    test_runner: Box<dyn TestRunner>,
    snapshots: Box<dyn SnapshotStore>,
}

impl RefactoringEngine {
    pub fn new(
        root: impl Into<Utf8PathBuf>,
        max_plan_tasks: usize,
        test_runner: Box<dyn TestRunner>,
        snapshots: Box<dyn SnapshotStore>,
    ) -> Self {
        Self {
            root: root.into(),
            max_plan_tasks,
            test_runner,
            snapshots,
        }
    }

    /// Order tasks by priority, then hold back every task whose upstream
    /// target still has a task of its own. Cycles fall back to priority order.
    pub fn build_plan(&self, tasks: Vec<RefactoringTask>) -> RefactoringPlan {
        let mut remaining = tasks;
        remaining.sort_by_key(|t| t.priority);

        let mut ordered = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let ready = (0..remaining.len()).find(|&i| match remaining[i].depends_on.as_deref() {
                None => true,
                Some(upstream) => !remaining
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && other.target == upstream),
            });
            match ready {
                Some(i) => ordered.push(remaining.remove(i)),
                None => ordered.append(&mut remaining),
            }
        }

        let risk_level = if ordered.len() > self.max_plan_tasks
            || ordered.iter().any(|t| t.priority == Priority::High)
        {
            RiskLevel::High
        } else if ordered.iter().any(|t| t.priority == Priority::Medium) {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        let estimated_time = ordered
            .iter()
            .map(|t| t.kind.base_minutes() + t.estimated_complexity)
            .sum();

        RefactoringPlan {
            tasks: ordered,
            risk_level,
            estimated_time,
        }
    }

    /// Apply every task, then validate. Any task error or failed validation
    /// restores all targets to their pre-plan content.
    pub async fn execute(&self, plan: &RefactoringPlan) -> Result<RefactoringResult> {
        let mut result = RefactoringResult::default();
        if plan.tasks.is_empty() {
            result.validation_passed = true;
            return Ok(result);
        }

        let mut targets: Vec<String> = Vec::new();
        for task in &plan.tasks {
            if !targets.contains(&task.target) {
                targets.push(task.target.clone());
            }
        }
        let snapshot = self.snapshots.capture(&self.root, &targets).await?;

        let mut touched: Vec<String> = Vec::new();
        let mut task_failed = false;
        for (i, task) in plan.tasks.iter().enumerate() {
            match self.apply_task(task).await {
                Ok(changed) => {
                    if changed && !touched.contains(&task.target) {
                        touched.push(task.target.clone());
                    }
                    result.completed_tasks.push(task.clone());
                }
                Err(e) => {
                    warn!(target_file = %task.target, error = %e, "refactoring task failed");
                    result.failed_tasks.push(FailedTask {
                        task: task.clone(),
                        reason: e.to_string(),
                    });
                    for rest in &plan.tasks[i + 1..] {
                        result.failed_tasks.push(FailedTask {
                            task: rest.clone(),
                            reason: format!("not attempted: {} failed", task.target),
                        });
                    }
                    task_failed = true;
                    break;
                }
            }
        }

        if !task_failed {
            match self.test_runner.run(&self.root, &touched).await {
                Ok(report) => {
                    result.tests_run = report.run;
                    result.tests_passed = report.passed;
                    if report.success {
                        info!(
                            tasks = result.completed_tasks.len(),
                            files = touched.len(),
                            "refactoring plan validated"
                        );
                        result.validation_passed = true;
                        result.touched_files = touched;
                        return Ok(result);
                    }
                }
                Err(e) => warn!(error = %e, "test runner failed"),
            }
        }

        let restored = self.snapshots.restore(&self.root, &snapshot).await?;
        warn!(restored = restored.len(), "refactoring plan rolled back");
        for path in restored {
            if !touched.contains(&path) {
                touched.push(path);
            }
        }
        result.rolled_back = true;
        result.validation_passed = false;
        result.touched_files = touched;
        Ok(result)
    }

    /// Returns whether the target's content changed.
    async fn apply_task(&self, task: &RefactoringTask) -> Result<bool> {
        rewrite::ensure_supported(task)?;

        let path = self.root.join(&task.target);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            // nothing left to clean up
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {path}")),
        };

        let removed_upstream = task
            .depends_on
            .as_deref()
            .filter(|up| !self.root.join(up).exists());
        let updated = rewrite::rewrite(task, &content, removed_upstream)?;
        if updated == content {
            return Ok(false);
        }
        tokio::fs::write(&path, &updated)
            .await
            .with_context(|| format!("Failed to write {path}"))?;
        Ok(true)
    }
}
