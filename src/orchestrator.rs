//! Pipeline wiring and the approval state machine.
//!
//! One worker task owns the analyzer, the documentation updater and the
//! refactoring engine. Watcher batches, forced analyses and approval decisions
//! all reach it through a single FIFO command channel, so at most one cycle
//! runs at a time.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::batcher::Batcher;
use crate::engine::docs::DocumentationUpdater;
use crate::engine::impact::{
    ImpactAnalyzer, ImpactClassifier, NoopClassifier, normalize_request_path,
};
use crate::engine::refactor::{
    CommandTestRunner, MemorySnapshotStore, NoopTestRunner, RefactoringEngine, SnapshotStore,
    TestRunner,
};
use crate::engine::watcher::{ChangeWatcher, PathFilter};
use crate::error::{ContextError, ErrorCode};
use crate::language::FileCategory;
use crate::models::analysis::{AnalysisResult, OneShotReport};
use crate::models::approval::{ApplyOutcome, ApprovalRequest, ApprovalStatus, StageOutcome};
use crate::models::change::{ChangeBatch, ChangeKind, FileChange, content_hash};
use crate::models::notification::{Notification, OrchestratorStatus};

/// Ordered notification channel shared by every pipeline stage.
#[derive(Clone)]
pub struct Notifier {
    tx: UnboundedSender<Notification>,
}

impl Notifier {
    pub fn new(tx: UnboundedSender<Notification>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, notification: Notification) {
        debug!(event = notification.name(), "notify");
        // nobody listening is fine
        let _ = self.tx.send(notification);
    }
}

/// Injected capabilities. Defaults never override, never test and keep
/// snapshots in memory.
pub struct Collaborators {
    pub classifier: Box<dyn ImpactClassifier>,
    pub test_runner: Box<dyn TestRunner>,
    pub snapshots: Box<dyn SnapshotStore>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            classifier: Box::new(NoopClassifier),
            test_runner: Box::new(NoopTestRunner),
            snapshots: Box::new(MemorySnapshotStore),
        }
    }
}

impl Collaborators {
    pub fn from_config(config: &Config) -> Self {
        let test_runner: Box<dyn TestRunner> = match &config.test_command {
            Some(command) => Box::new(CommandTestRunner::new(command.clone())),
            None => Box::new(NoopTestRunner),
        };
        Self {
            test_runner,
            ..Self::default()
        }
    }
}

/// Canonical project root, or `PROJECT_NOT_FOUND`.
pub fn project_root(config: &Config) -> Result<Utf8PathBuf> {
    let display = config.project_path.display().to_string();
    let canonical = std::fs::canonicalize(&config.project_path)
        .map_err(|_| ContextError::project_not_found(&display))?;
    if !canonical.is_dir() {
        bail!(ContextError::project_not_found(&display));
    }
    Utf8PathBuf::from_path_buf(canonical)
        .map_err(|_| ContextError::project_not_found(&display).into())
}

pub fn path_filter(config: &Config) -> Result<PathFilter> {
    PathFilter::new(&config.watch_patterns, &config.effective_ignored())
}

/// Analyzer over a freshly indexed project, for one-shot reports.
pub fn indexed_analyzer(
    config: &Config,
    classifier: Box<dyn ImpactClassifier>,
) -> Result<ImpactAnalyzer> {
    config.validate()?;
    let root = project_root(config)?;
    let mut analyzer = ImpactAnalyzer::new(root, config.complexity_threshold, classifier)?;
    analyzer.index(&path_filter(config)?)?;
    Ok(analyzer)
}

/// A batch describing the current state of `paths`: existing files are
/// modified, missing ones deleted.
pub fn synthetic_batch(root: &Utf8Path, id: u64, paths: &[String]) -> Result<ChangeBatch> {
    let mut changes = BTreeMap::new();
    for input in paths {
        let Some(rel) = normalize_request_path(root, input) else {
            bail!(ContextError::new(
                ErrorCode::InvalidRequest,
                format!("Path is outside the project: {input}"),
            ));
        };
        let full = root.join(&rel);
        let change = if full.is_file() {
            let change = FileChange::new(ChangeKind::Modified, rel.clone());
            match std::fs::read(&full) {
                Ok(bytes) => change.with_content(&bytes),
                Err(_) => change,
            }
        } else {
            FileChange::new(ChangeKind::Deleted, rel.clone())
        };
        changes.insert(rel, change);
    }
    Ok(ChangeBatch::new(id, changes.into_values().collect()))
}

fn baseline_root(dir: &Path) -> Result<Utf8PathBuf> {
    let invalid = || {
        ContextError::new(
            ErrorCode::InvalidRequest,
            format!("Baseline is not a directory: {}", dir.display()),
        )
    };
    let canonical = std::fs::canonicalize(dir).map_err(|_| invalid())?;
    if !canonical.is_dir() {
        bail!(invalid());
    }
    Utf8PathBuf::from_path_buf(canonical).map_err(|_| invalid().into())
}

/// Classify the current state of `paths` once without writing anything.
///
/// With `baseline` the graph and the previous file contents come from that
/// tree, so edits are diffed against it. Without one, modified source files
/// have nothing to be compared with and are reported as unassessed.
pub async fn analyze_once(
    config: &Config,
    paths: &[String],
    baseline: Option<&Path>,
    classifier: Box<dyn ImpactClassifier>,
) -> Result<OneShotReport> {
    if paths.is_empty() {
        bail!(ContextError::new(
            ErrorCode::InvalidRequest,
            "No paths to analyze"
        ));
    }

    let (mut analyzer, base) = match baseline {
        Some(dir) => {
            config.validate()?;
            let root = project_root(config)?;
            let base = baseline_root(dir)?;
            let mut analyzer =
                ImpactAnalyzer::new(base.clone(), config.complexity_threshold, classifier)?;
            analyzer.index(&path_filter(config)?)?;
            analyzer.rebase(root);
            (analyzer, Some(base))
        }
        None => (indexed_analyzer(config, classifier)?, None),
    };

    let mut batch = synthetic_batch(analyzer.root(), 1, paths)?;
    let mut unassessed = Vec::new();
    if base.is_none() {
        batch.changes.retain(|change| {
            let source =
                FileCategory::from_path(Utf8Path::new(&change.path)) == FileCategory::Source;
            if source && change.kind != ChangeKind::Deleted {
                unassessed.push(change.path.clone());
                return false;
            }
            true
        });
    }

    let result = analyzer.analyze(&batch).await;
    debug!(
        baseline = ?base,
        unassessed = unassessed.len(),
        impact = %result.overall_impact,
        "one-shot analysis"
    );
    Ok(OneShotReport {
        baseline: base.map(Utf8PathBuf::into_string),
        unassessed,
        result,
    })
}

enum PipelineCommand {
    Batch(ChangeBatch),
    Force {
        batch: ChangeBatch,
        reply: oneshot::Sender<AnalysisResult>,
    },
    Approve {
        id: String,
        reply: oneshot::Sender<Result<ApprovalRequest>>,
    },
    Reject {
        id: String,
        reply: oneshot::Sender<Result<ApprovalRequest>>,
    },
    PendingCount {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// State owned by the worker task. Survives stop/start within a process.
struct Pipeline {
    require_approval: bool,
    auto_update: bool,
    analyzer: ImpactAnalyzer,
    docs: DocumentationUpdater,
    refactoring: RefactoringEngine,
    approvals: Vec<ApprovalRequest>,
    /// Content hash of every file the pipeline wrote itself
    written: HashMap<String, String>,
    notifier: Notifier,
}

impl Pipeline {
    fn new(
        config: &Config,
        root: Utf8PathBuf,
        collaborators: Collaborators,
        notifier: Notifier,
    ) -> Result<Self> {
        Ok(Self {
            require_approval: config.require_approval,
            auto_update: config.auto_update,
            analyzer: ImpactAnalyzer::new(
                root.clone(),
                config.complexity_threshold,
                collaborators.classifier,
            )?,
            docs: DocumentationUpdater::new(root.clone(), &config.docs_dir),
            refactoring: RefactoringEngine::new(
                root,
                config.max_plan_tasks,
                collaborators.test_runner,
                collaborators.snapshots,
            ),
            approvals: Vec::new(),
            written: HashMap::new(),
            notifier,
        })
    }

    async fn run(mut self, mut commands: UnboundedReceiver<PipelineCommand>) -> Self {
        while let Some(command) = commands.recv().await {
            match command {
                PipelineCommand::Batch(batch) => {
                    let batch = self.suppress_echoes(batch);
                    if batch.is_empty() {
                        debug!(batch = batch.id, "batch held only own writes");
                        continue;
                    }
                    self.cycle(&batch).await;
                }
                PipelineCommand::Force { batch, reply } => {
                    let result = self.cycle(&batch).await;
                    let _ = reply.send(result);
                }
                PipelineCommand::Approve { id, reply } => {
                    let _ = reply.send(self.approve(&id).await);
                }
                PipelineCommand::Reject { id, reply } => {
                    let _ = reply.send(self.reject(&id));
                }
                PipelineCommand::PendingCount { reply } => {
                    let _ = reply.send(self.pending_count());
                }
                PipelineCommand::Shutdown => break,
            }
        }
        self.abandon_pending();
        self
    }

    fn pending_count(&self) -> usize {
        self.approvals
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .count()
    }

    /// Drop watcher events caused by our own writes.
    fn suppress_echoes(&mut self, batch: ChangeBatch) -> ChangeBatch {
        if self.written.is_empty() {
            return batch;
        }
        let ChangeBatch {
            id,
            changes,
            flushed_at,
        } = batch;
        let mut kept = Vec::with_capacity(changes.len());
        for change in changes {
            match (self.written.get(&change.path), &change.content_hash) {
                (Some(ours), Some(seen)) if ours == seen => {
                    debug!(path = %change.path, "own write ignored");
                }
                (Some(_), _) => {
                    self.written.remove(&change.path);
                    kept.push(change);
                }
                _ => kept.push(change),
            }
        }
        ChangeBatch {
            id,
            changes: kept,
            flushed_at,
        }
    }

    /// One batch from flush to idle. Every notification of the cycle is
    /// emitted here, so cycles never interleave.
    async fn cycle(&mut self, batch: &ChangeBatch) -> AnalysisResult {
        self.notifier.emit(Notification::BatchFlushed(batch.clone()));
        let result = self.analyzer.analyze(batch).await;
        for skipped in &result.skipped {
            self.notifier.emit(Notification::FileSkipped {
                path: skipped.path.clone(),
                reason: skipped.reason.clone(),
            });
        }
        self.notifier
            .emit(Notification::AnalysisComplete(result.clone()));

        if result.has_work() {
            if self.require_approval {
                let request = ApprovalRequest::new(result.clone());
                info!(id = %request.id, impact = %result.overall_impact, "approval required");
                self.notifier
                    .emit(Notification::ApprovalRequired(request.clone()));
                self.approvals.push(request);
            } else if self.auto_update {
                let outcome = self.apply(&result).await;
                debug!(batch = batch.id, ?outcome, "cycle applied");
            } else {
                debug!(batch = batch.id, "report-only cycle");
            }
        }

        self.notifier.emit(Notification::CycleIdle);
        result
    }

    /// Write documentation, then run the refactoring plan. Failures are
    /// reported and do not stop the other half.
    async fn apply(&mut self, analysis: &AnalysisResult) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        if !analysis.documentation_updates.is_empty() {
            let plan = self
                .docs
                .plan(&analysis.documentation_updates, &self.analyzer);
            match self.docs.apply(&plan).await {
                Ok(written) => {
                    let validation = self.docs.validate();
                    outcome.documentation = Some(if validation.valid {
                        StageOutcome::Completed
                    } else {
                        warn!(issues = ?validation.issues, "documentation validation failed");
                        StageOutcome::Invalid
                    });
                    info!(files = written.len(), "documentation updated");
                    self.notifier
                        .emit(Notification::DocumentationUpdated { plan, validation });
                }
                Err(e) => {
                    outcome.documentation = Some(StageOutcome::Failed);
                    self.pipeline_error("documentation", &e);
                }
            }
        }

        if !analysis.refactoring_tasks.is_empty() {
            let plan = self
                .refactoring
                .build_plan(analysis.refactoring_tasks.clone());
            self.notifier
                .emit(Notification::RefactoringStart(plan.clone()));
            match self.refactoring.execute(&plan).await {
                Ok(result) => {
                    self.record_writes(&result.touched_files).await;
                    self.analyzer.refresh(&result.touched_files).await;
                    if result.validation_passed {
                        outcome.refactoring = Some(StageOutcome::Completed);
                        self.notifier
                            .emit(Notification::RefactoringComplete(result));
                    } else {
                        outcome.refactoring = Some(if result.rolled_back {
                            StageOutcome::RolledBack
                        } else {
                            StageOutcome::Failed
                        });
                        self.notifier.emit(Notification::ValidationFailed(result));
                    }
                }
                Err(e) => {
                    outcome.refactoring = Some(StageOutcome::Failed);
                    self.pipeline_error("refactoring", &e);
                }
            }
        }
        outcome
    }

    async fn record_writes(&mut self, paths: &[String]) {
        let root = self.analyzer.root().to_path_buf();
        for path in paths {
            match tokio::fs::read(root.join(path)).await {
                Ok(bytes) => {
                    self.written.insert(path.clone(), content_hash(&bytes));
                }
                Err(_) => {
                    self.written.remove(path);
                }
            }
        }
    }

    fn pipeline_error(&self, stage: &str, error: &anyhow::Error) {
        warn!(stage, error = %error, "pipeline stage failed");
        self.notifier.emit(Notification::PipelineError {
            stage: stage.to_string(),
            message: error.to_string(),
        });
    }

    fn find(&self, id: &str) -> Result<usize> {
        self.approvals
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| ContextError::approval_not_found(id).into())
    }

    fn transition(&mut self, index: usize, next: ApprovalStatus) -> Result<()> {
        let request = &mut self.approvals[index];
        if !request.status.can_become(next) {
            bail!(ContextError::new(
                ErrorCode::InvalidTransition,
                format!(
                    "Approval {} is {}, cannot become {next}",
                    request.id, request.status
                ),
            ));
        }
        debug!(id = %request.id, from = %request.status, to = %next, "approval transition");
        request.status = next;
        Ok(())
    }

    /// Apply an approved request. The request ends `applied` either way; its
    /// `outcome` tells whether the writes stuck.
    async fn approve(&mut self, id: &str) -> Result<ApprovalRequest> {
        let index = self.find(id)?;
        self.transition(index, ApprovalStatus::Approved)?;
        let analysis = self.approvals[index].analysis.clone();
        let outcome = self.apply(&analysis).await;
        self.transition(index, ApprovalStatus::Applied)?;
        self.approvals[index].outcome = Some(outcome);
        if outcome.succeeded() {
            info!(id, "approval applied");
        } else {
            warn!(id, ?outcome, "approval applied with failures");
        }
        self.notifier.emit(Notification::CycleIdle);
        Ok(self.approvals[index].clone())
    }

    fn reject(&mut self, id: &str) -> Result<ApprovalRequest> {
        let index = self.find(id)?;
        self.transition(index, ApprovalStatus::Rejected)?;
        info!(id, "approval rejected");
        self.notifier.emit(Notification::ApprovalRejected { id: id.to_string() });
        self.notifier.emit(Notification::CycleIdle);
        Ok(self.approvals[index].clone())
    }

    fn abandon_pending(&mut self) {
        for request in &mut self.approvals {
            if request.status == ApprovalStatus::Pending {
                request.status = ApprovalStatus::Abandoned;
                self.notifier.emit(Notification::ApprovalAbandoned {
                    id: request.id.clone(),
                });
            }
        }
    }
}

/// Handles for a started pipeline.
struct Running {
    root: Utf8PathBuf,
    commands: UnboundedSender<PipelineCommand>,
    worker: JoinHandle<Pipeline>,
    batcher: JoinHandle<()>,
    batcher_shutdown: watch::Sender<bool>,
    watcher: ChangeWatcher,
}

pub struct Orchestrator {
    config: Config,
    notifier: Notifier,
    collaborators: Option<Collaborators>,
    idle: Option<Pipeline>,
    running: Option<Running>,
    batch_ids: Arc<AtomicU64>,
}

impl Orchestrator {
    pub fn new(config: Config) -> (Self, UnboundedReceiver<Notification>) {
        let collaborators = Collaborators::from_config(&config);
        Self::with_collaborators(config, collaborators)
    }

    pub fn with_collaborators(
        config: Config,
        collaborators: Collaborators,
    ) -> (Self, UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            config,
            notifier: Notifier::new(tx),
            collaborators: Some(collaborators),
            idle: None,
            running: None,
            batch_ids: Arc::new(AtomicU64::new(1)),
        };
        (orchestrator, rx)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Validate configuration, index the project and begin watching.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            bail!(ContextError::new(
                ErrorCode::AlreadyRunning,
                "Orchestrator is already running"
            ));
        }
        self.config.validate()?;
        let root = project_root(&self.config)?;
        let filter = path_filter(&self.config)?;

        let mut pipeline = match self.idle.take() {
            Some(p) => p,
            None => Pipeline::new(
                &self.config,
                root.clone(),
                self.collaborators.take().unwrap_or_default(),
                self.notifier.clone(),
            )?,
        };
        let indexed = match pipeline.analyzer.index(&filter) {
            Ok(n) => n,
            Err(e) => {
                self.idle = Some(pipeline);
                return Err(e);
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(pipeline.run(command_rx));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let flush_commands = command_tx.clone();
        let batcher = tokio::spawn(
            Batcher::new(self.config.debounce())
                .with_ids(Arc::clone(&self.batch_ids))
                .run(event_rx, shutdown_rx, move |batch| {
                    let _ = flush_commands.send(PipelineCommand::Batch(batch));
                }),
        );

        let error_notifier = self.notifier.clone();
        let watcher = match ChangeWatcher::watch(&root, filter, event_tx, move |message| {
            error_notifier.emit(Notification::WatchError { message });
        }) {
            Ok(w) => w,
            Err(e) => {
                let _ = shutdown_tx.send(true);
                let _ = batcher.await;
                let _ = command_tx.send(PipelineCommand::Shutdown);
                if let Ok(pipeline) = worker.await {
                    self.idle = Some(pipeline);
                }
                return Err(e);
            }
        };

        info!(root = %root, files = indexed, "watching project");
        self.notifier.emit(Notification::WatcherStarted {
            paths: vec![root.to_string()],
        });
        self.running = Some(Running {
            root,
            commands: command_tx,
            worker,
            batcher,
            batcher_shutdown: shutdown_tx,
            watcher,
        });
        Ok(())
    }

    /// Stop watching. Pending debounced changes are dropped and every pending
    /// approval is abandoned. Stopping a stopped orchestrator is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        drop(running.watcher);
        let _ = running.batcher_shutdown.send(true);
        if let Err(e) = running.batcher.await {
            warn!(error = %e, "batcher task failed");
        }
        let _ = running.commands.send(PipelineCommand::Shutdown);
        let pipeline = running
            .worker
            .await
            .context("Pipeline worker panicked")?;
        self.idle = Some(pipeline);

        info!(root = %running.root, "stopped watching");
        self.notifier.emit(Notification::WatcherStopped);
        Ok(())
    }

    fn running(&self) -> Result<&Running> {
        self.running
            .as_ref()
            .ok_or_else(|| ContextError::not_running().into())
    }

    fn send(&self, command: PipelineCommand) -> Result<()> {
        self.running()?
            .commands
            .send(command)
            .map_err(|_| ContextError::not_running().into())
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let Some(running) = &self.running else {
            return OrchestratorStatus::default();
        };
        let (reply, rx) = oneshot::channel();
        let pending = match running.commands.send(PipelineCommand::PendingCount { reply }) {
            Ok(()) => rx.await.unwrap_or(0),
            Err(_) => 0,
        };
        OrchestratorStatus {
            running: true,
            watched_paths: vec![running.root.to_string()],
            pending_approval_count: pending,
        }
    }

    /// Run `paths` through the pipeline as one batch, behind anything already
    /// queued.
    pub async fn force_analysis(&self, paths: &[String]) -> Result<AnalysisResult> {
        let running = self.running()?;
        let id = self.batch_ids.fetch_add(1, Ordering::Relaxed);
        let batch = synthetic_batch(&running.root, id, paths)?;

        let (reply, rx) = oneshot::channel();
        self.send(PipelineCommand::Force { batch, reply })?;
        rx.await.map_err(|_| ContextError::not_running().into())
    }

    /// Apply a pending request. The returned request carries the outcome.
    pub async fn approve_update(&self, id: &str) -> Result<ApprovalRequest> {
        let (reply, rx) = oneshot::channel();
        self.send(PipelineCommand::Approve {
            id: id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| anyhow::Error::from(ContextError::not_running()))?
    }

    pub async fn reject_update(&self, id: &str) -> Result<ApprovalRequest> {
        let (reply, rx) = oneshot::channel();
        self.send(PipelineCommand::Reject {
            id: id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| anyhow::Error::from(ContextError::not_running()))?
    }
}
