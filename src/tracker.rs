//! Change tracker backed by the `file_meta` table.
//!
//! `file_meta` is the single source of truth for change detection. A row's
//! `modified_at` always matches the version last written to the lexical and
//! vector indexes for that path.

use anyhow::Result;
use sqlx::{Executor, Row, Sqlite};
use std::collections::{HashMap, HashSet};

use crate::models::{DocumentDescriptor, FileMeta};

/// How a listed document relates to what was indexed before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Never indexed.
    New,
    /// Indexed, but the file is newer than the indexed version.
    Changed,
    Unchanged,
}

/// Classify a document given its tracked metadata.
///
/// Ties count as unchanged: some filesystems truncate timestamp precision,
/// and re-indexing on every tie would defeat incremental mode.
pub fn classify(meta: Option<&FileMeta>, modified_at: i64) -> ChangeKind {
    match meta {
        None => ChangeKind::New,
        Some(m) if m.modified_at >= modified_at => ChangeKind::Unchanged,
        Some(_) => ChangeKind::Changed,
    }
}

/// Difference between the tracked state and the current listing.
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// New or changed documents, in listing order.
    pub changed: Vec<(DocumentDescriptor, ChangeKind)>,
    pub unchanged: usize,
    /// Tracked paths missing from the listing, sorted.
    pub deleted: Vec<String>,
}

pub async fn get<'e, E>(executor: E, path: &str) -> Result<Option<FileMeta>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT path, modified_at, size_bytes FROM file_meta WHERE path = ?")
        .bind(path)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(|row| FileMeta {
        path: row.get("path"),
        modified_at: row.get("modified_at"),
        size_bytes: row.get("size_bytes"),
    }))
}

pub async fn put<'e, E>(executor: E, meta: &FileMeta) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO file_meta (path, modified_at, size_bytes) VALUES (?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            modified_at = excluded.modified_at,
            size_bytes = excluded.size_bytes
        "#,
    )
    .bind(&meta.path)
    .bind(meta.modified_at)
    .bind(meta.size_bytes)
    .execute(executor)
    .await?;

    Ok(())
}

/// Delete the row for `path`. Returns whether one existed.
pub async fn remove<'e, E>(executor: E, path: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM file_meta WHERE path = ?")
        .bind(path)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn clear<'e, E>(executor: E) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM file_meta").execute(executor).await?;
    Ok(())
}

async fn all<'e, E>(executor: E) -> Result<HashMap<String, FileMeta>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT path, modified_at, size_bytes FROM file_meta")
        .fetch_all(executor)
        .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let meta = FileMeta {
                path: row.get("path"),
                modified_at: row.get("modified_at"),
                size_bytes: row.get("size_bytes"),
            };
            (meta.path.clone(), meta)
        })
        .collect())
}

pub async fn all_paths<'e, E>(executor: E) -> Result<HashSet<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM file_meta")
        .fetch_all(executor)
        .await?;
    Ok(paths.into_iter().collect())
}

/// Compare the current listing against tracked metadata.
pub async fn diff<'e, E>(executor: E, listing: Vec<DocumentDescriptor>) -> Result<ChangeSet>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut known = all(executor).await?;
    let mut set = ChangeSet::default();

    for descriptor in listing {
        let meta = known.remove(&descriptor.path);
        match classify(meta.as_ref(), descriptor.modified_at) {
            ChangeKind::Unchanged => set.unchanged += 1,
            kind => set.changed.push((descriptor, kind)),
        }
    }

    set.deleted = known.into_keys().collect();
    set.deleted.sort();

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(modified_at: i64) -> FileMeta {
        FileMeta {
            path: "a.md".to_string(),
            modified_at,
            size_bytes: 10,
        }
    }

    #[test]
    fn test_classify_new() {
        assert_eq!(classify(None, 1000), ChangeKind::New);
    }

    #[test]
    fn test_classify_tie_is_unchanged() {
        assert_eq!(classify(Some(&meta(1000)), 1000), ChangeKind::Unchanged);
    }

    #[test]
    fn test_classify_older_file_is_unchanged() {
        assert_eq!(classify(Some(&meta(2000)), 1000), ChangeKind::Unchanged);
    }

    #[test]
    fn test_classify_newer_file_is_changed() {
        assert_eq!(classify(Some(&meta(1000)), 1001), ChangeKind::Changed);
    }
}
