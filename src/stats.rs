//! Index statistics: what is indexed and how much of it has vectors.
//!
//! Used by `kex-mem stats` to confirm that index passes and embedding
//! backfills did what was expected.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::lexical;
use crate::store::IndexStore;

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub documents: i64,
    pub tracked: i64,
    /// `None` when vector search is disabled.
    pub vectors: Option<usize>,
    pub vector_dimension: Option<usize>,
    /// Newest tracked modification time, milliseconds since the epoch.
    pub newest_modified_at: Option<i64>,
}

pub async fn collect(store: &IndexStore) -> Result<IndexStats> {
    let pool = store.pool();

    let documents = lexical::count(pool).await?;
    let tracked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_meta")
        .fetch_one(pool)
        .await?;
    let newest_modified_at: Option<i64> =
        sqlx::query_scalar("SELECT MAX(modified_at) FROM file_meta")
            .fetch_one(pool)
            .await?;

    let (vectors, vector_dimension) = match store.vectors() {
        Some(backend) => (Some(backend.count().await?), Some(backend.dimension())),
        None => (None, None),
    };

    // WAL mode keeps recent writes in the -wal sidecar until checkpoint.
    let mut wal = store.db_path().as_os_str().to_owned();
    wal.push("-wal");
    let db_size_bytes: u64 = [store.db_path(), Path::new(&wal)]
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();

    Ok(IndexStats {
        db_path: store.db_path().display().to_string(),
        db_size_bytes,
        documents,
        tracked,
        vectors,
        vector_dimension,
        newest_modified_at,
    })
}

/// Print a human-readable summary to stdout.
pub fn print(stats: &IndexStats) {
    println!("kex-mem index stats");
    println!("===================");
    println!();
    println!("  Store:       {}", stats.db_path);
    println!("  Size:        {}", format_bytes(stats.db_size_bytes));
    println!();
    println!("  Documents:   {}", stats.documents);
    match (stats.vectors, stats.vector_dimension) {
        (Some(vectors), Some(dim)) => {
            let pct = if stats.documents > 0 {
                (vectors as i64 * 100) / stats.documents
            } else {
                0
            };
            println!(
                "  Embedded:    {} / {} ({}%, {} dims)",
                vectors, stats.documents, pct, dim
            );
        }
        _ => println!("  Embedded:    vector search disabled"),
    }
    let updated = stats
        .newest_modified_at
        .map(format_ms_relative)
        .unwrap_or_else(|| "never".to_string());
    println!("  Last change: {}", updated);
    println!();
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ms_relative(ms: i64) -> String {
    let now = chrono::Utc::now().timestamp_millis();
    let delta = (now - ms) / 1000;

    if delta < 0 {
        return format_ms_iso(ms);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ms_iso(ms)
    }
}

fn format_ms_iso(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_old_timestamp_is_absolute() {
        assert_eq!(format_ms_relative(0), "1970-01-01 00:00");
    }

    #[tokio::test]
    async fn test_collect_counts() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open_at(&tmp.path().join("s.db"), Some(2))
            .await
            .unwrap();
        for (path, ts) in [("a.md", 100), ("b.md", 300)] {
            let doc = Document {
                path: path.to_string(),
                title: path.to_string(),
                body: "text".to_string(),
                modified_at: ts,
                size_bytes: 4,
            };
            store.upsert_document(&doc, Some(&[1.0, 0.0])).await.unwrap();
        }

        let stats = collect(&store).await.unwrap();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.tracked, 2);
        assert_eq!(stats.vectors, Some(2));
        assert_eq!(stats.vector_dimension, Some(2));
        assert_eq!(stats.newest_modified_at, Some(300));
        assert!(stats.db_size_bytes > 0);
    }
}
