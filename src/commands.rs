//! Implementations of the `hta` subcommands.
//!
//! Each `run_*` function opens what it needs from the [`Config`], performs
//! one library call, and prints a human-readable result. Snapshot bodies
//! are printed as pretty JSON so they can be piped back into `hta save`.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use hta_core::hierarchy::{actionable_tasks, dependency_order, get_leaf_tasks, validate_hierarchy};
use hta_core::models::{Node, TreeSnapshot};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::path_store::PathScopedStore;
use crate::sqlite_store::{SqliteDocumentStore, SqliteVectorBackend};
use crate::vector_adapter::VectorAdapter;

async fn open_store(config: &Config) -> Result<PathScopedStore> {
    let pool = db::open(config).await?;
    Ok(PathScopedStore::with_options(
        Arc::new(SqliteDocumentStore::new(pool)),
        config.store.options(),
    ))
}

async fn load_required(store: &PathScopedStore, project: &str, path: Option<&str>) -> Result<TreeSnapshot> {
    let resolved = store.resolve(project, path).await?;
    store
        .load(project, Some(&resolved))
        .await?
        .with_context(|| format!("No snapshot stored for {}/{}", project, resolved))
}

fn describe(node: &Node) -> String {
    let title = node.title.as_deref().unwrap_or("(untitled)");
    match node.level {
        Some(level) => format!("{:<24} L{}  {}", node.id, level, title),
        None => format!("{:<24} --  {}", node.id, title),
    }
}

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Database initialized successfully.");
    Ok(())
}

pub async fn run_create(
    config: &Config,
    project: &str,
    goal: Option<&str>,
    path: Option<&str>,
) -> Result<()> {
    let store = open_store(config).await?;
    let created = store
        .create_project(project, goal, path)
        .await
        .with_context(|| format!("Failed to create project {}", project))?;
    println!(
        "Created project {} (active path: {})",
        project,
        created.active_path.as_deref().unwrap_or("general")
    );
    Ok(())
}

/// Save a snapshot read from `file`, or from stdin when `file` is `-`.
pub async fn run_save(config: &Config, project: &str, path: Option<&str>, file: &Path) -> Result<()> {
    let body = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read snapshot from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read snapshot file: {}", file.display()))?
    };
    let snapshot = TreeSnapshot::from_json(&body).context("Failed to parse snapshot JSON")?;

    let store = open_store(config).await?;
    let ack = store.save(project, path, &snapshot).await?;
    println!(
        "Saved {}/{} revision {} ({} nodes)",
        ack.project_id,
        ack.path,
        ack.revision,
        snapshot.nodes().len()
    );
    Ok(())
}

pub async fn run_load(config: &Config, project: &str, path: Option<&str>, raw: bool) -> Result<()> {
    let store = open_store(config).await?;
    if raw {
        match store.read_raw(project, path).await? {
            Some(body) => println!("{}", body),
            None => println!("No snapshot stored."),
        }
        return Ok(());
    }
    match store.load(project, path).await? {
        Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        None => println!("No snapshot stored."),
    }
    Ok(())
}

/// Print integrity findings. Fails when any are present.
pub async fn run_validate(config: &Config, project: &str, path: Option<&str>) -> Result<()> {
    let store = open_store(config).await?;
    let snapshot = load_required(&store, project, path).await?;
    let report = validate_hierarchy(snapshot.nodes());

    println!("Nodes:    {}", snapshot.nodes().len());
    println!("Findings: {}", report.findings.len());
    for finding in &report.findings {
        println!("  {}", finding);
    }
    if !report.valid {
        anyhow::bail!("hierarchy has {} integrity finding(s)", report.findings.len());
    }
    println!("Hierarchy is valid.");
    Ok(())
}

/// Print the actionable frontier, or every leaf with `all_leaves`.
pub async fn run_frontier(
    config: &Config,
    project: &str,
    path: Option<&str>,
    all_leaves: bool,
) -> Result<()> {
    let store = open_store(config).await?;
    let snapshot = load_required(&store, project, path).await?;
    let nodes = snapshot.nodes();

    if all_leaves {
        let leaves = get_leaf_tasks(nodes);
        println!("Leaf tasks ({}):", leaves.len());
        for node in leaves {
            let mark = if node.completed { "x" } else { " " };
            println!("  [{}] {}", mark, describe(node));
        }
        return Ok(());
    }

    let actionable = actionable_tasks(nodes);
    println!("Actionable tasks ({}):", actionable.len());
    for node in &actionable {
        println!("  {}", describe(node));
    }

    let order = dependency_order(nodes);
    if !order.blocked.is_empty() {
        println!();
        println!("Blocked by dependency cycles ({}):", order.blocked.len());
        for node in &order.blocked {
            println!("  {}", describe(node));
        }
    }
    Ok(())
}

pub async fn run_switch(config: &Config, project: &str, path: &str) -> Result<()> {
    let store = open_store(config).await?;
    let updated = store.switch_path(project, path).await?;
    println!(
        "Active path for {} is now {}",
        project,
        updated.active_path.as_deref().unwrap_or("general")
    );
    Ok(())
}

pub async fn run_paths(config: &Config, project: &str) -> Result<()> {
    let store = open_store(config).await?;
    let active = store.resolve(project, None).await?;
    let paths = store.list_paths(project).await?;
    if paths.is_empty() {
        println!("No paths stored for {}.", project);
        return Ok(());
    }
    for path in paths {
        let mark = if path == active { "*" } else { " " };
        println!("{} {}", mark, path);
    }
    Ok(())
}

/// Report database location and vector store health, optionally recovering.
pub async fn run_status(config: &Config, recover: bool) -> Result<()> {
    println!("HTA Harness Status");
    println!("====================");
    println!();
    println!("  Database:    {}", config.db.path.display());

    let Some(vector) = &config.vector else {
        println!("  Vectors:     not configured");
        return Ok(());
    };

    let pool = db::open(config).await?;
    let backend = SqliteVectorBackend::new(pool, vector.collection.clone(), vector.dims);
    let adapter = VectorAdapter::new(Arc::new(backend), vector.timeout());

    if recover {
        let report = adapter.recover().await?;
        println!(
            "  Recovery:    scanned {}, removed {}",
            report.scanned,
            report.removed.len()
        );
    }

    let status = adapter.recovery_status().await;
    println!("  Collection:  {} ({} dims)", vector.collection, vector.dims);
    match adapter.count().await {
        Ok(count) => println!("  Vectors:     {}", count),
        Err(e) => println!("  Vectors:     unavailable ({})", e),
    }
    println!("  Status:      {}", serde_json::to_string(&status)?);
    Ok(())
}
