use anyhow::Result;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use context_manager::config::Config;
use context_manager::engine::batcher::Batcher;
use context_manager::engine::impact::{
    ClassifierVerdict, ImpactAnalyzer, ImpactClassifier, NoopClassifier,
};
use context_manager::engine::refactor::{
    MemorySnapshotStore, NoopTestRunner, TestReport, TestRunner,
};
use context_manager::engine::watcher::PathFilter;
use context_manager::error::{ContextError, ErrorCode};
use context_manager::models::analysis::ImpactLevel;
use context_manager::models::approval::{ApprovalStatus, StageOutcome};
use context_manager::models::change::{ChangeBatch, ChangeKind, FileChange};
use context_manager::models::notification::Notification;
use context_manager::orchestrator::{Collaborators, Orchestrator};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// `lib/util.ts` imported by three components.
fn shared_util_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "lib/util.ts", "export function helper() {\n  return 1;\n}\n");
    for name in ["a", "b", "c"] {
        write(
            dir.path(),
            &format!("src/{name}.ts"),
            &format!(
                "import {{ helper }} from '../lib/util';\nexport const {name} = () => helper();\n"
            ),
        );
    }
    write(dir.path(), "config/app.yaml", "port: 8080\n");
    dir
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Every file under `root` with its bytes.
fn tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    out
}

/// Watcher batches never flush during a test; cycles are driven by
/// `force_analysis`.
fn config(dir: &TempDir, require_approval: bool, auto_update: bool) -> Config {
    Config {
        project_path: dir.path().to_path_buf(),
        debounce_ms: 60_000,
        require_approval,
        auto_update,
        ..Config::default()
    }
}

fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

fn names(notes: &[Notification]) -> Vec<&'static str> {
    notes.iter().map(Notification::name).collect()
}

fn approval_id(notes: &[Notification]) -> String {
    notes
        .iter()
        .find_map(|n| match n {
            Notification::ApprovalRequired(req) => Some(req.id.clone()),
            _ => None,
        })
        .expect("approval-required notification")
}

fn code(err: &anyhow::Error) -> ErrorCode {
    err.downcast_ref::<ContextError>().expect("typed error").code
}

struct FailingRunner;

#[async_trait]
impl TestRunner for FailingRunner {
    async fn run(&self, _: &Utf8Path, touched: &[String]) -> Result<TestReport> {
        Ok(TestReport {
            run: touched.len() as u32,
            passed: 0,
            success: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_a_deleting_shared_module_is_breaking() {
    let dir = shared_util_project();
    let (mut orch, mut rx) = Orchestrator::new(config(&dir, false, false));
    orch.start().await.unwrap();

    fs::remove_file(dir.path().join("lib/util.ts")).unwrap();
    let result = orch.force_analysis(&["lib/util.ts".to_string()]).await.unwrap();

    assert_eq!(result.overall_impact, ImpactLevel::Breaking);
    assert_eq!(
        result.documentation_updates,
        vec!["src/a.ts", "src/b.ts", "src/c.ts"]
    );
    let change = result.change_for("lib/util.ts").unwrap();
    assert_eq!(change.change_kind, ChangeKind::Deleted);
    assert!(change.requires_doc_update);

    // report-only: nothing applied
    let notes = drain(&mut rx);
    assert!(!names(&notes).contains(&"documentation-updated"));
    assert!(!dir.path().join("docs").exists());
    orch.stop().await.unwrap();
}

#[tokio::test]
async fn scenario_b_configuration_change_is_major() {
    let dir = shared_util_project();
    let (mut orch, _rx) = Orchestrator::new(config(&dir, false, false));
    orch.start().await.unwrap();

    write(dir.path(), "config/app.yaml", "");
    let result = orch.force_analysis(&["config/app.yaml".to_string()]).await.unwrap();
    let change = result.change_for("config/app.yaml").unwrap();
    assert_eq!(change.impact_level, ImpactLevel::Major);
    assert!(change.requires_doc_update);
    assert!(!change.requires_refactoring);
    orch.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn scenario_c_rapid_saves_collapse_to_one_change() {
    let dir = shared_util_project();
    let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
    write(dir.path(), "src/api.ts", "export const api = 1;\n");

    let (tx, events) = mpsc::unbounded_channel();
    let (_stop, shutdown) = tokio::sync::watch::channel(false);
    let (batch_tx, mut batches) = mpsc::unbounded_channel();
    tokio::spawn(Batcher::new(Duration::from_millis(2000)).run(events, shutdown, move |b| {
        let _ = batch_tx.send(b);
    }));

    for i in 0..10 {
        let content = format!("export const api = {i};\n");
        tx.send(
            FileChange::new(ChangeKind::Modified, "src/api.ts").with_content(content.as_bytes()),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let batch = batches.recv().await.unwrap();
    assert!(batches.try_recv().is_err());
    assert_eq!(batch.len(), 1);

    let mut analyzer = ImpactAnalyzer::new(root, 10, Box::new(NoopClassifier)).unwrap();
    analyzer
        .index(&PathFilter::new(&["**/*".to_string()], &[]).unwrap())
        .unwrap();
    let result = analyzer.analyze(&batch).await;
    assert_eq!(
        result.changes.iter().filter(|c| c.path == "src/api.ts").count(),
        1
    );
}

#[tokio::test]
async fn scenario_d_new_export_is_major() {
    let dir = shared_util_project();
    write(dir.path(), "src/api.ts", "export function list() {\n  return [];\n}\n");
    let (mut orch, _rx) = Orchestrator::new(config(&dir, false, false));
    orch.start().await.unwrap();

    write(
        dir.path(),
        "src/api.ts",
        "export function list() {\n  return [];\n}\n\nexport function create() {\n  return 1;\n}\n",
    );
    let result = orch.force_analysis(&["src/api.ts".to_string()]).await.unwrap();
    let change = result.change_for("src/api.ts").unwrap();
    assert_eq!(change.impact_level, ImpactLevel::Major);
    assert!(change.requires_doc_update);
    assert_eq!(result.documentation_updates, vec!["src/api.ts"]);
    orch.stop().await.unwrap();
}

#[tokio::test]
async fn scenario_e_reject_leaves_tree_untouched() {
    let dir = shared_util_project();
    let (mut orch, mut rx) = Orchestrator::new(config(&dir, true, true));
    orch.start().await.unwrap();

    fs::remove_file(dir.path().join("lib/util.ts")).unwrap();
    let before = tree(dir.path());

    let result = orch.force_analysis(&["lib/util.ts".to_string()]).await.unwrap();
    assert_eq!(result.overall_impact, ImpactLevel::Breaking);

    let notes = drain(&mut rx);
    let required = notes
        .iter()
        .filter(|n| {
            matches!(n, Notification::ApprovalRequired(r) if r.status == ApprovalStatus::Pending)
        })
        .count();
    assert_eq!(required, 1);
    assert_eq!(orch.status().await.pending_approval_count, 1);
    assert_eq!(tree(dir.path()), before, "no writes while pending");

    let id = approval_id(&notes);
    let rejected = orch.reject_update(&id).await.unwrap();
    assert_eq!(rejected.status, ApprovalStatus::Rejected);
    assert!(rejected.outcome.is_none());
    assert_eq!(tree(dir.path()), before);
    assert_eq!(orch.status().await.pending_approval_count, 0);

    let notes = drain(&mut rx);
    assert_eq!(names(&notes), vec!["approval-rejected", "cycle-idle"]);

    let err = orch.approve_update(&id).await.unwrap_err();
    assert_eq!(code(&err), ErrorCode::InvalidTransition);
    orch.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Apply path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn approve_applies_documentation() {
    let dir = shared_util_project();
    write(dir.path(), "src/api.ts", "export function list() {}\n");
    let (mut orch, mut rx) = Orchestrator::new(config(&dir, true, false));
    orch.start().await.unwrap();

    write(dir.path(), "src/api.ts", "export function list() {}\nexport function create() {}\n");
    orch.force_analysis(&["src/api.ts".to_string()]).await.unwrap();
    let id = approval_id(&drain(&mut rx));
    assert!(!dir.path().join("docs").exists());

    let applied = orch.approve_update(&id).await.unwrap();
    assert_eq!(applied.status, ApprovalStatus::Applied);
    let outcome = applied.outcome.unwrap();
    assert_eq!(outcome.documentation, Some(StageOutcome::Completed));
    assert_eq!(outcome.refactoring, None);
    assert!(outcome.succeeded());
    let page = fs::read_to_string(dir.path().join("docs/context/api/src__api.ts.md")).unwrap();
    assert!(page.contains("- `create`"));
    let changelog = fs::read_to_string(dir.path().join("docs/context/CHANGELOG.md")).unwrap();
    assert!(changelog.contains("`src/api.ts`"));

    let notes = drain(&mut rx);
    assert_eq!(names(&notes), vec!["documentation-updated", "cycle-idle"]);
    if let Notification::DocumentationUpdated { validation, .. } = &notes[0] {
        assert!(validation.valid, "{:?}", validation.issues);
    }

    let err = orch.approve_update(&id).await.unwrap_err();
    assert_eq!(code(&err), ErrorCode::InvalidTransition);
    let err = orch.approve_update("unknown").await.unwrap_err();
    assert_eq!(code(&err), ErrorCode::ApprovalNotFound);
    orch.stop().await.unwrap();
}

#[tokio::test]
async fn auto_update_runs_full_cycle_in_order() {
    let dir = shared_util_project();
    let (mut orch, mut rx) = Orchestrator::new(config(&dir, false, true));
    orch.start().await.unwrap();
    assert_eq!(names(&drain(&mut rx)), vec!["watcher-started"]);

    fs::remove_file(dir.path().join("lib/util.ts")).unwrap();
    orch.force_analysis(&["lib/util.ts".to_string()]).await.unwrap();

    let notes = drain(&mut rx);
    assert_eq!(
        names(&notes),
        vec![
            "batch-flushed",
            "analysis-complete",
            "documentation-updated",
            "refactoring-start",
            "refactoring-complete",
            "cycle-idle",
        ]
    );
    if let Notification::RefactoringComplete(result) = &notes[4] {
        assert!(result.validation_passed);
        assert_eq!(result.touched_files, vec!["src/a.ts", "src/b.ts", "src/c.ts"]);
    }

    // align tasks dropped the dangling import
    let a = fs::read_to_string(dir.path().join("src/a.ts")).unwrap();
    assert_eq!(a, "export const a = () => helper();\n");

    // graph follows the pipeline's own writes
    let status = orch.status().await;
    assert!(status.running);
    orch.stop().await.unwrap();
}

#[tokio::test]
async fn failed_validation_rolls_back_every_target() {
    let dir = shared_util_project();
    let collaborators = Collaborators {
        classifier: Box::new(NoopClassifier),
        test_runner: Box::new(FailingRunner),
        snapshots: Box::new(MemorySnapshotStore),
    };
    let (mut orch, mut rx) =
        Orchestrator::with_collaborators(config(&dir, false, true), collaborators);
    orch.start().await.unwrap();

    fs::remove_file(dir.path().join("lib/util.ts")).unwrap();
    let before: BTreeMap<String, Vec<u8>> = tree(dir.path())
        .into_iter()
        .filter(|(p, _)| p.starts_with("src/"))
        .collect();

    orch.force_analysis(&["lib/util.ts".to_string()]).await.unwrap();

    let after: BTreeMap<String, Vec<u8>> = tree(dir.path())
        .into_iter()
        .filter(|(p, _)| p.starts_with("src/"))
        .collect();
    assert_eq!(after, before);

    let notes = drain(&mut rx);
    let failed = notes
        .iter()
        .find_map(|n| match n {
            Notification::ValidationFailed(r) => Some(r.clone()),
            _ => None,
        })
        .expect("validation-failed notification");
    assert!(failed.rolled_back);
    assert!(!failed.validation_passed);
    assert_eq!(failed.tests_run, 3);
    assert!(!names(&notes).contains(&"refactoring-complete"));
    assert_eq!(names(&notes).last(), Some(&"cycle-idle"));
    orch.stop().await.unwrap();
}

#[tokio::test]
async fn approved_plan_that_fails_tests_reports_rollback() {
    let dir = shared_util_project();
    let collaborators = Collaborators {
        classifier: Box::new(NoopClassifier),
        test_runner: Box::new(FailingRunner),
        snapshots: Box::new(MemorySnapshotStore),
    };
    let (mut orch, mut rx) =
        Orchestrator::with_collaborators(config(&dir, true, false), collaborators);
    orch.start().await.unwrap();

    fs::remove_file(dir.path().join("lib/util.ts")).unwrap();
    orch.force_analysis(&["lib/util.ts".to_string()]).await.unwrap();
    let id = approval_id(&drain(&mut rx));
    let a_before = fs::read(dir.path().join("src/a.ts")).unwrap();

    let request = orch.approve_update(&id).await.unwrap();
    assert_eq!(request.status, ApprovalStatus::Applied);
    let outcome = request.outcome.unwrap();
    assert_eq!(outcome.refactoring, Some(StageOutcome::RolledBack));
    assert!(!outcome.succeeded());
    assert_eq!(fs::read(dir.path().join("src/a.ts")).unwrap(), a_before);

    let notes = drain(&mut rx);
    assert!(names(&notes).contains(&"validation-failed"));
    assert_eq!(names(&notes).last(), Some(&"cycle-idle"));
    orch.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Graph and ordering properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn graph_stays_symmetric_across_batches() {
    let dir = shared_util_project();
    let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
    let mut analyzer = ImpactAnalyzer::new(root, 10, Box::new(NoopClassifier)).unwrap();
    analyzer
        .index(&PathFilter::new(&["**/*".to_string()], &[]).unwrap())
        .unwrap();
    assert!(analyzer.graph().is_symmetric());

    let steps: Vec<(&str, Option<&str>)> = vec![
        ("src/d.ts", Some("import { a } from './a';\nimport { b } from './b';\n")),
        ("src/a.ts", Some("export const a = 1;\n")),
        ("src/b.ts", None),
        ("lib/util.ts", None),
        ("src/c.ts", Some("import { d } from './d';\n")),
    ];
    for (i, (path, content)) in steps.into_iter().enumerate() {
        let change = match content {
            Some(c) => {
                write(dir.path(), path, c);
                FileChange::new(ChangeKind::Modified, path).with_content(c.as_bytes())
            }
            None => {
                fs::remove_file(dir.path().join(path)).unwrap();
                FileChange::new(ChangeKind::Deleted, path)
            }
        };
        let batch = ChangeBatch::new(i as u64, vec![change]);
        analyzer.analyze(&batch).await;
        assert!(analyzer.graph().is_symmetric(), "asymmetric after {path}");
    }

    let deps: Vec<&str> = analyzer.graph().dependencies("src/c.ts").collect();
    assert_eq!(deps, vec!["src/d.ts"]);
}

#[tokio::test]
async fn forced_batches_are_processed_in_order() {
    let dir = shared_util_project();
    let (mut orch, mut rx) = Orchestrator::new(config(&dir, false, false));
    orch.start().await.unwrap();
    drain(&mut rx);

    let first = vec!["config/app.yaml".to_string()];
    let second = vec!["src/a.ts".to_string()];
    let third = vec!["src/b.ts".to_string()];
    let (r1, r2, r3) = tokio::join!(
        orch.force_analysis(&first),
        orch.force_analysis(&second),
        orch.force_analysis(&third),
    );
    assert_eq!(r1.unwrap().changes[0].path, "config/app.yaml");
    assert_eq!(r2.unwrap().changes[0].path, "src/a.ts");
    assert_eq!(r3.unwrap().changes[0].path, "src/b.ts");

    let notes = drain(&mut rx);
    let flushed: Vec<u64> = notes
        .iter()
        .filter_map(|n| match n {
            Notification::BatchFlushed(b) => Some(b.id),
            _ => None,
        })
        .collect();
    let analyzed: Vec<String> = notes
        .iter()
        .filter_map(|n| match n {
            Notification::AnalysisComplete(r) => Some(r.changes[0].path.clone()),
            _ => None,
        })
        .collect();
    assert!(flushed.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(analyzed, vec!["config/app.yaml", "src/a.ts", "src/b.ts"]);

    // cycles never interleave: each flush is followed by its own analysis
    assert_eq!(
        names(&notes),
        vec![
            "batch-flushed",
            "analysis-complete",
            "cycle-idle",
            "batch-flushed",
            "analysis-complete",
            "cycle-idle",
            "batch-flushed",
            "analysis-complete",
            "cycle-idle",
        ]
    );
    for pair in notes.windows(2) {
        if let [Notification::BatchFlushed(batch), Notification::AnalysisComplete(result)] = pair {
            assert_eq!(batch.changes[0].path, result.changes[0].path);
        }
    }
    orch.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn control_surface_needs_a_running_orchestrator() {
    let dir = shared_util_project();
    let (orch, _rx) = Orchestrator::new(config(&dir, true, false));

    let err = orch.force_analysis(&["src/a.ts".to_string()]).await.unwrap_err();
    assert_eq!(code(&err), ErrorCode::NotRunning);
    let err = orch.reject_update("x").await.unwrap_err();
    assert_eq!(code(&err), ErrorCode::NotRunning);
}

#[tokio::test]
async fn stop_abandons_pending_requests() {
    let dir = shared_util_project();
    let (mut orch, mut rx) = Orchestrator::new(config(&dir, true, false));
    orch.start().await.unwrap();

    fs::remove_file(dir.path().join("lib/util.ts")).unwrap();
    orch.force_analysis(&["lib/util.ts".to_string()]).await.unwrap();
    let id = approval_id(&drain(&mut rx));
    let before = tree(dir.path());

    orch.stop().await.unwrap();
    let notes = drain(&mut rx);
    assert_eq!(names(&notes), vec!["approval-abandoned", "watcher-stopped"]);
    assert!(matches!(
        &notes[0],
        Notification::ApprovalAbandoned { id: abandoned } if *abandoned == id
    ));
    assert_eq!(tree(dir.path()), before);

    let status = orch.status().await;
    assert!(!status.running);
    assert_eq!(status.pending_approval_count, 0);

    // restart re-indexes; the abandoned request stays terminal
    orch.start().await.unwrap();
    let err = orch.approve_update(&id).await.unwrap_err();
    assert_eq!(code(&err), ErrorCode::InvalidTransition);
    orch.stop().await.unwrap();
}

#[tokio::test]
async fn watcher_batches_reach_the_pipeline() {
    let dir = shared_util_project();
    let cfg = Config {
        debounce_ms: 200,
        ..config(&dir, false, false)
    };
    let (mut orch, mut rx) = Orchestrator::with_collaborators(
        cfg,
        Collaborators {
            classifier: Box::new(NoopClassifier),
            test_runner: Box::new(NoopTestRunner),
            snapshots: Box::new(MemorySnapshotStore),
        },
    );
    orch.start().await.unwrap();
    // give the platform watcher a moment to arm
    tokio::time::sleep(Duration::from_millis(200)).await;

    write(dir.path(), "config/app.yaml", "port: 9090\n");

    let analyzed = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(n) = rx.recv().await {
            if let Notification::AnalysisComplete(result) = n
                && result.change_for("config/app.yaml").is_some()
            {
                return result;
            }
        }
        panic!("notification channel closed");
    })
    .await
    .expect("watcher batch analyzed");
    assert_eq!(analyzed.overall_impact, ImpactLevel::Major);
    orch.stop().await.unwrap();
}

#[tokio::test]
async fn injected_classifier_overrides_heuristic() {
    struct AlwaysBreaking;

    #[async_trait]
    impl ImpactClassifier for AlwaysBreaking {
        async fn classify(
            &self,
            _: &FileChange,
            _: Option<&str>,
        ) -> Result<ClassifierVerdict> {
            Ok(ClassifierVerdict {
                impact_level: Some(ImpactLevel::Breaking),
                ..Default::default()
            })
        }
    }

    let dir = shared_util_project();
    let collaborators = Collaborators {
        classifier: Box::new(AlwaysBreaking),
        ..Collaborators::default()
    };
    let (mut orch, _rx) =
        Orchestrator::with_collaborators(config(&dir, false, false), collaborators);
    orch.start().await.unwrap();
    let result = orch.force_analysis(&["src/a.ts".to_string()]).await.unwrap();
    assert_eq!(result.overall_impact, ImpactLevel::Breaking);
    orch.stop().await.unwrap();
}
