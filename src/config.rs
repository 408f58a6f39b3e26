//! Configuration loading and generation.

use anyhow::{Context, Result, bail};
use globset::Glob;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ContextError;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enable debug logging to file
    pub debug: bool,

    /// Path to log directory
    pub log_path: PathBuf,

    /// Days a rotated log file is kept
    pub log_retention_days: u32,

    /// Root of the source tree to watch
    pub project_path: PathBuf,

    /// Globs (relative to the project root) a path must match to be watched
    pub watch_patterns: Vec<String>,

    /// Globs whose matches are dropped at the source
    pub ignored_paths: Vec<String>,

    /// Quiet window before a batch is flushed
    pub debounce_ms: u64,

    /// Apply documentation and refactoring work without approval
    pub auto_update: bool,

    /// Park every cycle that has work until it is approved or rejected
    pub require_approval: bool,

    /// Nesting depth x branch count above which a file needs refactoring
    pub complexity_threshold: u32,

    /// Plans with more tasks than this are high risk
    pub max_plan_tasks: usize,

    /// Documentation artifact directory, relative to the project root
    pub docs_dir: String,

    /// Shell command run to validate a refactoring plan
    pub test_command: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            log_path: default_log_path(),
            log_retention_days: 3,
            project_path: PathBuf::from("."),
            watch_patterns: vec!["**/*".to_string()],
            ignored_paths: default_ignored_paths(),
            debounce_ms: 2000,
            auto_update: false,
            require_approval: true,
            complexity_threshold: 10,
            max_plan_tasks: 5,
            docs_dir: "docs/context".to_string(),
            test_command: None,
        }
    }
}

/// Default log path: ~/.config/context-manager/logs
fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("context-manager")
        .join("logs")
}

fn default_ignored_paths() -> Vec<String> {
    [
        "**/node_modules/**",
        "**/.git/**",
        "**/target/**",
        "**/dist/**",
        "**/build/**",
        "**/coverage/**",
        "**/.next/**",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Ignored globs plus the documentation directory, which the pipeline
    /// writes itself.
    pub fn effective_ignored(&self) -> Vec<String> {
        let mut ignored = self.ignored_paths.clone();
        let docs = self.docs_dir.trim_matches('/');
        if !docs.is_empty() {
            ignored.push(format!("{docs}/**"));
        }
        ignored
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.debounce_ms == 0 {
            bail!(ContextError::invalid_config("debounce_ms must be greater than 0"));
        }
        if self.log_retention_days == 0 {
            bail!(ContextError::invalid_config(
                "log_retention_days must be at least 1"
            ));
        }
        if self.watch_patterns.is_empty() {
            bail!(ContextError::invalid_config(
                "watch_patterns must contain at least one glob"
            ));
        }
        for pattern in self.watch_patterns.iter().chain(self.ignored_paths.iter()) {
            if let Err(e) = Glob::new(pattern) {
                bail!(ContextError::invalid_config(format!(
                    "Invalid glob {pattern:?}: {e}"
                )));
            }
        }
        if Path::new(&self.docs_dir).is_absolute() || self.docs_dir.split('/').any(|c| c == "..")
        {
            bail!(ContextError::invalid_config(
                "docs_dir must be a relative path inside the project"
            ));
        }
        Ok(())
    }
}

/// Configuration service.
pub struct ConfigService;

impl ConfigService {
    /// Get the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("context-manager")
            .join("config.toml")
    }

    /// Load configuration from file.
    ///
    /// If `path` is `None`, uses the default path.
    /// If the file doesn't exist, returns default configuration.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = path.map(PathBuf::from).unwrap_or_else(Self::default_path);
        let config_dir = path.parent();

        if !path.exists() {
            let mut config = Config::default();
            if let Some(dir) = config_dir {
                config.log_path = dir.join("logs");
            }
            return Ok(config);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        // If log_path was not explicitly set, use config file's directory/logs
        if config.log_path == default_log_path()
            && let Some(dir) = config_dir
        {
            config.log_path = dir.join("logs");
        }

        Ok(config)
    }

    /// Generate default configuration file at the default path.
    pub fn generate_default() -> Result<()> {
        Self::generate_at(&Self::default_path())
    }

    /// Generate default configuration file at the specified path.
    pub fn generate_at(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = Self::default_config_content();
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Generate default configuration content with comments.
    fn default_config_content() -> String {
        r#"# context-manager configuration file

# Enable debug logging to file (default: false)
debug = false

# Path to log directory (default: ~/.config/context-manager/logs)
# log_path = "~/.config/context-manager/logs"

# Days rotated log files are kept; each project logs to its own files
log_retention_days = 3

# Root of the source tree to watch (default: current directory)
project_path = "."

# Globs a changed path must match, relative to project_path
watch_patterns = ["**/*"]

# Globs dropped before batching (dependency dirs, VCS metadata, build output)
ignored_paths = [
    "**/node_modules/**",
    "**/.git/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/coverage/**",
    "**/.next/**",
]

# Quiet window in milliseconds before a batch of changes is analyzed
debounce_ms = 2000

# Apply documentation and refactoring work without asking (default: false)
auto_update = false

# Wait for approve/reject before applying anything (default: true)
require_approval = true

# Nesting depth x branch count above which a file is flagged for refactoring
complexity_threshold = 10

# Refactoring plans with more tasks than this are treated as high risk
max_plan_tasks = 5

# Where generated documentation lives, relative to project_path
docs_dir = "docs/context"

# Command used to validate refactorings; the plan is rolled back if it fails
# test_command = "cargo test"
"#
        .to_string()
    }
}
