use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "context-manager",
    version,
    about = "Watch a source tree, analyze change impact, keep docs and code in step"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Pretty-print JSON output (default: compact)
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Path to configuration file
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    /// Project root (overrides project_path from the config)
    #[arg(long, global = true)]
    pub project: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the project and print notifications as NDJSON until interrupted
    Watch,

    /// Watch the project and accept control requests as NDJSON on stdin
    Session,

    /// Analyze the current state of the given files once
    Analyze {
        /// Comma-separated project paths
        #[arg(long)]
        paths: String,

        /// Earlier copy of the project to diff against
        #[arg(long)]
        baseline: Option<std::path::PathBuf>,
    },

    /// Show the dependencies and dependents of a file
    Deps {
        /// Project path of the file
        #[arg(short, long)]
        path: String,
    },

    /// Check grammars and project access
    Doctor,

    /// Generate default configuration file
    Init {
        /// Output path for config file (default: ~/.config/context-manager/config.toml)
        #[arg(long)]
        path: Option<std::path::PathBuf>,
    },
}
