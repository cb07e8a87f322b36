//! Document collector: enumerates note files under the collection root and
//! extracts a title and a normalized body from each.
//!
//! A document that is missing, unreadable, or has an empty body after
//! normalization is *absent*; [`Collector::read`] returns `None` for all of
//! those cases and the indexer treats them as a deletion signal.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::models::{Document, DocumentDescriptor};

lazy_static! {
    static ref HEADING_MARKER: Regex = Regex::new(r"^#{1,6}\s+").unwrap();
}

const UNTITLED: &str = "Untitled";

/// Excluded regardless of configuration. Hidden entries cover the store file,
/// which normally lives inside the collection root.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/.*",
    "**/.*/**",
];

pub struct Collector {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl Collector {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate candidate documents, sorted by path.
    ///
    /// Fails when the root is missing or not a directory, so an unmounted or
    /// mistyped root never reads as "every document was deleted".
    pub fn list(&self) -> Result<Vec<DocumentDescriptor>> {
        if !self.root.is_dir() {
            bail!(
                "collection root is not a directory: {}",
                self.root.display()
            );
        }

        let mut items = Vec::new();

        let walker = WalkDir::new(&self.root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(rel_str) = relative_key(&self.root, path) else {
                continue;
            };

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            match stat(path, rel_str) {
                Ok(descriptor) => items.push(descriptor),
                Err(e) => tracing::warn!(path = %path.display(), "skipping file: {}", e),
            }
        }

        // Sort for deterministic ordering
        items.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(items)
    }

    /// Stat a single document by its relative path.
    ///
    /// Returns `Ok(None)` when the file does not exist or is filtered out by
    /// the configured globs. Paths escaping the root are rejected.
    pub fn describe(&self, relative_path: &str) -> Result<Option<DocumentDescriptor>> {
        let key = normalize_key(relative_path)?;
        let location = self.root.join(&key);
        if !location.is_file() || self.exclude.is_match(&key) || !self.include.is_match(&key) {
            return Ok(None);
        }

        match stat(&location, key) {
            Ok(descriptor) => Ok(Some(descriptor)),
            Err(e) => {
                tracing::debug!(path = relative_path, "stat failed: {}", e);
                Ok(None)
            }
        }
    }

    /// Read and normalize a document. `None` means absent.
    pub fn read(&self, descriptor: &DocumentDescriptor) -> Option<Document> {
        let content = match std::fs::read_to_string(&descriptor.location) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(path = %descriptor.path, "read failed, treating as absent: {}", e);
                return None;
            }
        };

        let body = extract_body(&content);
        if body.is_empty() {
            return None;
        }

        Some(Document {
            path: descriptor.path.clone(),
            title: extract_title(&content),
            body,
            modified_at: descriptor.modified_at,
            size_bytes: descriptor.size_bytes,
        })
    }
}

/// First non-empty line; a leading `# ` heading marker is dropped.
pub fn extract_title(content: &str) -> String {
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("# ") {
            return heading.trim().to_string();
        }
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    UNTITLED.to_string()
}

/// Strip heading markers (levels 1–6) from every line, then trim the text.
pub fn extract_body(content: &str) -> String {
    content
        .lines()
        .map(|line| HEADING_MARKER.replace(line, ""))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Turn a root-relative path (`./notes/a.md`) into
/// its corpus key (`notes/a.md`).
///
/// Absolute paths and `..` components are rejected.
pub fn normalize_key(relative_path: &str) -> Result<String> {
    let rel = Path::new(relative_path);
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => bail!(
                "document path must be relative to the collection root: {}",
                relative_path
            ),
        }
    }
    if parts.is_empty() {
        bail!("empty document path");
    }
    Ok(parts.join("/"))
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn stat(path: &Path, key: String) -> Result<DocumentDescriptor> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let modified_at = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;

    Ok(DocumentDescriptor {
        path: key,
        location: path.to_path_buf(),
        modified_at,
        size_bytes: metadata.len() as i64,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
