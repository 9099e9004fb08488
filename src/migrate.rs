use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect to the configured database and create the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Knowledge base: one row per best practice (or duplicate cluster)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS best_practices (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            platform TEXT,
            category TEXT NOT NULL,
            goal TEXT NOT NULL,
            description TEXT NOT NULL,
            example_text TEXT,
            source_type TEXT NOT NULL,
            source_url TEXT,
            embedding BLOB NOT NULL,
            embedding_model TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            quality_score REAL NOT NULL,
            priority_score REAL NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedding cache: content-addressed by the exact input text
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            input_text TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (input_text, model)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bp_platform ON best_practices(platform)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bp_category ON best_practices(category)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bp_goal ON best_practices(goal)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_bp_active_priority ON best_practices(is_active, priority_score DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_bp_embedding_model ON best_practices(embedding_model)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
