//! Per-project file logging with daily rotation in local time.
//!
//! Every watched project writes to its own `context-manager-<project>.YYYY-MM-DD`
//! files, so watchers sharing a log directory never prune each other's history.

use anyhow::Result;
use logroller::{LogRollerBuilder, Rotation, RotationAge, TimeZone};
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};
use time::macros::format_description;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::prelude::*;

use crate::config::Config;

const APP: &str = "context-manager";
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Log file stem for the configured project, e.g. `context-manager-webapp`.
///
/// Falls back to the bare app name when the project root cannot be resolved.
pub fn log_stem(config: &Config) -> String {
    let project = fs::canonicalize(&config.project_path)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();
    let slug: String = project
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '-',
        })
        .collect();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        APP.to_string()
    } else {
        format!("{APP}-{slug}")
    }
}

/// Start file logging for `config`'s project.
///
/// The returned guard flushes buffered lines when dropped, so callers keep it
/// alive until the process exits.
pub fn init(config: &Config) -> Result<WorkerGuard> {
    fs::create_dir_all(&config.log_path)?;

    let stem = log_stem(config);
    let retention = config.log_retention_days.max(1);
    let pruned = prune(&config.log_path, &stem, DAY * retention)?;

    let appender = LogRollerBuilder::new(config.log_path.as_path(), Path::new(&stem))
        .rotation(Rotation::AgeBased(RotationAge::Daily))
        .time_zone(TimeZone::Local)
        .max_keep_files(u64::from(retention))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create log roller: {e}"))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let time_format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("context_manager=debug".parse()?))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(OffsetTime::new(local_offset, time_format)),
        );
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set global subscriber: {e}"))?;

    info!(
        project = %config.project_path.display(),
        log = %stem,
        retention_days = retention,
        pruned,
        "logging started"
    );
    Ok(guard)
}

/// Delete this project's log files last modified more than `max_age` ago and
/// return how many went. Other projects' files and subdirectories are kept.
fn prune(dir: &Path, stem: &str, max_age: Duration) -> Result<usize> {
    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return Ok(0);
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let rotated = format!("{stem}.");
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name != stem && !name.starts_with(&rotated) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let expired = meta.modified().is_ok_and(|m| m < cutoff);
        if meta.is_file() && expired && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}
