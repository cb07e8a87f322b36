//! Lexical index over the `notes_fts` FTS5 table.
//!
//! Titles and bodies are tokenized with `porter unicode61`, so queries match
//! stemmed forms ("running" finds "run") across Unicode text. Ranking uses the
//! FTS5 `rank` column (BM25, lower is better); [`query`] returns hits already
//! ordered best-first.

use sqlx::{Executor, Row, Sqlite, SqlitePool};

use crate::error::LexicalError;
use crate::models::IndexRecord;

/// Opens a highlighted match inside a snippet.
pub const MATCH_START: &str = ">>>";
/// Closes a highlighted match inside a snippet.
pub const MATCH_END: &str = "<<<";
/// Marks text cut from either side of a snippet.
pub const ELLIPSIS: &str = "...";
/// Maximum snippet length, in tokens.
const SNIPPET_TOKENS: i64 = 48;

/// A ranked lexical match.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub path: String,
    pub title: String,
    pub snippet: String,
    /// Raw FTS5 rank (BM25); lower is better.
    pub rank: f64,
}

/// Replace the record for `path`. Run inside a transaction so readers never
/// see the document missing between the delete and the insert.
pub async fn upsert(
    conn: &mut sqlx::SqliteConnection,
    path: &str,
    title: &str,
    body: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM notes_fts WHERE path = ?")
        .bind(path)
        .execute(&mut *conn)
        .await?;

    sqlx::query("INSERT INTO notes_fts (path, title, body) VALUES (?, ?, ?)")
        .bind(path)
        .bind(title)
        .bind(body)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Delete the record for `path`, if any.
pub async fn remove<'e, E>(executor: E, path: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM notes_fts WHERE path = ?")
        .bind(path)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn clear<'e, E>(executor: E) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM notes_fts").execute(executor).await?;
    Ok(())
}

/// Fetch the stored title and body for `path`.
pub async fn get(pool: &SqlitePool, path: &str) -> Result<Option<IndexRecord>, sqlx::Error> {
    let row = sqlx::query("SELECT path, title, body FROM notes_fts WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| IndexRecord {
        path: row.get("path"),
        title: row.get("title"),
        body: row.get("body"),
    }))
}

pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM notes_fts")
        .fetch_one(pool)
        .await
}

/// Every indexed path, sorted.
pub async fn paths(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT path FROM notes_fts ORDER BY path")
        .fetch_all(pool)
        .await
}

/// Run a full-text query and return up to `limit` hits, best first.
///
/// A blank query returns no hits. Query syntax the engine rejects (for
/// example an unbalanced `"`) yields [`LexicalError::InvalidQuery`].
pub async fn query(
    pool: &SqlitePool,
    text: &str,
    limit: usize,
) -> Result<Vec<LexicalHit>, LexicalError> {
    if text.trim().is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        SELECT path, title, rank,
               snippet(notes_fts, 2, ?, ?, ?, ?) AS snippet
        FROM notes_fts
        WHERE notes_fts MATCH ?
        ORDER BY rank, path
        LIMIT ?
        "#,
    )
    .bind(MATCH_START)
    .bind(MATCH_END)
    .bind(ELLIPSIS)
    .bind(SNIPPET_TOKENS)
    .bind(text)
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(LexicalError::from_match_error)?;

    Ok(rows
        .iter()
        .map(|row| LexicalHit {
            path: row.get("path"),
            title: row.get("title"),
            snippet: row.get("snippet"),
            rank: row.get("rank"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_pool(tmp: &TempDir) -> SqlitePool {
        let pool = crate::store::connect(&tmp.path().join("lex.db")).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_unbalanced_quote_is_invalid_query() {
        let tmp = TempDir::new().unwrap();
        let pool = open_pool(&tmp).await;
        let mut conn = pool.acquire().await.unwrap();
        upsert(&mut conn, "a.md", "A", "alpha beta").await.unwrap();
        drop(conn);

        let err = query(&pool, "\"unclosed alpha", 10).await.unwrap_err();
        assert!(err.is_invalid_query(), "{}", err);
    }

    #[tokio::test]
    async fn test_missing_table_is_store_error() {
        let tmp = TempDir::new().unwrap();
        let pool = open_pool(&tmp).await;
        sqlx::query("DROP TABLE notes_fts")
            .execute(&pool)
            .await
            .unwrap();

        let err = query(&pool, "alpha", 10).await.unwrap_err();
        assert!(matches!(err, LexicalError::Store(_)), "{}", err);
    }
}
