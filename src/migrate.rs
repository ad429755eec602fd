use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create tables and indexes. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Snapshots and project configs, with one retained previous revision
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            project_id TEXT NOT NULL,
            path_name TEXT NOT NULL,
            kind TEXT NOT NULL,
            body TEXT NOT NULL,
            checksum TEXT NOT NULL,
            revision INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            prev_body TEXT,
            prev_checksum TEXT,
            prev_revision INTEGER,
            prev_updated_at INTEGER,
            PRIMARY KEY (project_id, path_name, kind)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vectors are little-endian f64 BLOBs; rowid keeps insertion order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_project_kind ON documents(project_id, kind)")
        .execute(pool)
        .await?;

    Ok(())
}
