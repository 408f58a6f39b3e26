use anyhow::Result;
use clap::Parser;
use std::path::Path;

use context_manager::cli::{Cli, Commands};
use context_manager::config::{Config, ConfigService};
use context_manager::doctor;
use context_manager::engine::impact::{NoopClassifier, normalize_request_path};
use context_manager::error::{ContextError, ErrorCode};
use context_manager::orchestrator::{self, Orchestrator};
use context_manager::session;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        let (code, message) = classify_error(&e);
        let error = serde_json::json!({
            "error": { "code": code, "message": message }
        });
        println!("{error}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn classify_error(e: &anyhow::Error) -> (String, String) {
    if let Some(ce) = e.downcast_ref::<ContextError>() {
        (ce.code.to_string(), ce.message.clone())
    } else {
        ("IO_ERROR".to_string(), e.to_string())
    }
}

fn serialize_output(value: &impl serde::Serialize, pretty: bool) -> Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}

fn split_paths(paths: &str) -> Vec<String> {
    paths
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

fn run(cli: Cli) -> Result<()> {
    let pretty = cli.pretty;

    // Handle early-exit commands before loading the project configuration
    if let Commands::Init { path } = &cli.command {
        let config_path = if let Some(p) = path {
            ConfigService::generate_at(p)?;
            p.clone()
        } else {
            ConfigService::generate_default()?;
            ConfigService::default_path()
        };
        eprintln!("Configuration file created at: {}", config_path.display());
        return Ok(());
    }

    let mut config = ConfigService::load(cli.config.as_deref())?;
    if let Some(project) = cli.project {
        config.project_path = project;
    }

    // Initialize logging if debug mode (CLI flag or config)
    let _guard = if cli.debug || config.debug {
        Some(context_manager::logger::init(&config)?)
    } else {
        None
    };

    match cli.command {
        Commands::Watch => cmd_watch(config, pretty),
        Commands::Session => cmd_session(config),
        Commands::Analyze { paths, baseline } => {
            cmd_analyze(&config, &split_paths(&paths), baseline.as_deref(), pretty)
        }
        Commands::Deps { path } => cmd_deps(&config, &path, pretty),
        Commands::Doctor => cmd_doctor(&config, pretty),
        Commands::Init { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn cmd_watch(config: Config, pretty: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (mut orchestrator, mut notifications) = Orchestrator::new(config);
        orchestrator.start().await?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                Some(notification) = notifications.recv() => {
                    println!("{}", serialize_output(&notification, pretty)?);
                }
            }
        }

        orchestrator.stop().await?;
        while let Ok(notification) = notifications.try_recv() {
            println!("{}", serialize_output(&notification, pretty)?);
        }
        Ok(())
    })
}

fn cmd_session(config: Config) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (mut orchestrator, notifications) = Orchestrator::new(config);
        orchestrator.start().await?;
        session::run_session(&mut orchestrator, notifications).await
    })
}

/// One-shot, report-only analysis. Nothing is written.
fn cmd_analyze(
    config: &Config,
    paths: &[String],
    baseline: Option<&Path>,
    pretty: bool,
) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(orchestrator::analyze_once(
        config,
        paths,
        baseline,
        Box::new(NoopClassifier),
    ))?;
    println!("{}", serialize_output(&report, pretty)?);
    Ok(())
}

fn cmd_deps(config: &Config, path: &str, pretty: bool) -> Result<()> {
    let analyzer = orchestrator::indexed_analyzer(config, Box::new(NoopClassifier))?;
    let rel = normalize_request_path(analyzer.root(), path).ok_or_else(|| {
        ContextError::new(
            ErrorCode::InvalidRequest,
            format!("Path is outside the project: {path}"),
        )
    })?;
    let summary = analyzer.component_summary(&rel);
    println!("{}", serialize_output(&summary, pretty)?);
    Ok(())
}

fn cmd_doctor(config: &Config, pretty: bool) -> Result<()> {
    let report = doctor::run_doctor(config);
    println!("{}", serialize_output(&report, pretty)?);
    Ok(())
}
