//! # HTA Harness CLI (`hta`)
//!
//! Thin command-line front end over the HTA Harness library: create
//! projects, save and load path-scoped task trees, check their integrity,
//! list the actionable frontier, and inspect vector store health.
//!
//! ## Usage
//!
//! ```bash
//! hta --config ./config/hta.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hta init` | Create the SQLite database and run schema migrations |
//! | `hta create <project>` | Create a project config and empty snapshot |
//! | `hta save <project> --file <json>` | Replace a path's snapshot |
//! | `hta load <project>` | Print a path's snapshot |
//! | `hta validate <project>` | Report orphan, cycle, and duplicate-id findings |
//! | `hta frontier <project>` | List actionable tasks in dependency order |
//! | `hta switch <project> <path>` | Change the project's active path |
//! | `hta paths <project>` | List stored paths |
//! | `hta status` | Database and vector store health |
//!
//! Commands that take `--path` fall back to the project's active path, and
//! then to `general`, when it is omitted.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hta_harness::{commands, config, logging};

/// HTA Harness CLI: persistent hierarchical task trees.
#[derive(Parser)]
#[command(
    name = "hta",
    about = "HTA Harness: persistent hierarchical task trees with path-scoped snapshots",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hta.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Create a project with an empty snapshot on its active path.
    Create {
        project: String,

        /// Top-level goal recorded in the project config.
        #[arg(long)]
        goal: Option<String>,

        /// Initial active path (defaults to `general`).
        #[arg(long)]
        path: Option<String>,
    },

    /// Replace a path's snapshot with the JSON in a file (`-` for stdin).
    Save {
        project: String,

        #[arg(long)]
        path: Option<String>,

        #[arg(long)]
        file: PathBuf,
    },

    /// Print a path's snapshot as JSON.
    Load {
        project: String,

        #[arg(long)]
        path: Option<String>,

        /// Print the stored body without checksum verification or recovery.
        #[arg(long)]
        raw: bool,
    },

    /// Check a snapshot for orphans, cycles, and duplicate ids.
    Validate {
        project: String,

        #[arg(long)]
        path: Option<String>,
    },

    /// List actionable tasks in dependency order.
    Frontier {
        project: String,

        #[arg(long)]
        path: Option<String>,

        /// List every leaf task, completed or not.
        #[arg(long)]
        all: bool,
    },

    /// Make `path` the project's active path.
    Switch { project: String, path: String },

    /// List a project's stored paths, marking the active one.
    Paths { project: String },

    /// Show database and vector store health.
    Status {
        /// Remove unreadable vectors and clear the corruption flag first.
        #[arg(long)]
        recover: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Create {
            project,
            goal,
            path,
        } => {
            commands::run_create(&cfg, &project, goal.as_deref(), path.as_deref()).await?;
        }
        Commands::Save {
            project,
            path,
            file,
        } => {
            commands::run_save(&cfg, &project, path.as_deref(), &file).await?;
        }
        Commands::Load { project, path, raw } => {
            commands::run_load(&cfg, &project, path.as_deref(), raw).await?;
        }
        Commands::Validate { project, path } => {
            commands::run_validate(&cfg, &project, path.as_deref()).await?;
        }
        Commands::Frontier { project, path, all } => {
            commands::run_frontier(&cfg, &project, path.as_deref(), all).await?;
        }
        Commands::Switch { project, path } => {
            commands::run_switch(&cfg, &project, &path).await?;
        }
        Commands::Paths { project } => {
            commands::run_paths(&cfg, &project).await?;
        }
        Commands::Status { recover } => {
            commands::run_status(&cfg, recover).await?;
        }
    }

    Ok(())
}
