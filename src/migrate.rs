use anyhow::Result;
use sqlx::SqlitePool;

/// Create the lexical index, change-tracking and metadata tables.
///
/// Idempotent. The vector table is owned by
/// [`SqliteVectors`](crate::vector::SqliteVectors) and created only when
/// vector search is enabled.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='notes_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE notes_fts USING fts5(
                path UNINDEXED,
                title,
                body,
                tokenize='porter unicode61'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_meta (
            path TEXT PRIMARY KEY,
            modified_at INTEGER NOT NULL,
            size_bytes INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Read a value from `index_meta`.
pub async fn get_meta(pool: &SqlitePool, key: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
}

/// Insert or replace a value in `index_meta`.
pub async fn set_meta(pool: &SqlitePool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO index_meta (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete a key from `index_meta`.
pub async fn delete_meta(pool: &SqlitePool, key: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM index_meta WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}
