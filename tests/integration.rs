use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kex_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kex-mem"))
}

fn setup_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let notes = tmp.path().join("memory");
    fs::create_dir_all(notes.join("daily")).unwrap();

    fs::write(
        notes.join("alpha.md"),
        "# Alpha Notes\n\nalpha beta gamma\n\nDecided to use cargo workspaces.",
    )
    .unwrap();
    fs::write(
        notes.join("delta.md"),
        "# Delta Notes\n\ndelta epsilon zeta\n\nWe run the deploy script on Fridays.",
    )
    .unwrap();
    fs::write(
        notes.join("daily").join("2024-01-02.md"),
        "## Standup\n\nReviewed the deployment checklist.",
    )
    .unwrap();
    fs::write(notes.join("scratch.txt"), "alpha outside include globs").unwrap();

    tmp
}

fn run_kex(root: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kex_binary();
    let output = Command::new(&binary)
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("KEX_MEM_LOG")
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kex-mem binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_index_creates_store() {
    let tmp = setup_project();

    let (stdout, stderr, success) = run_kex(tmp.path(), &["index"]);
    assert!(success, "index failed: {}", stderr);
    assert!(stdout.contains("indexed: 3"), "stdout: {}", stdout);
    assert!(tmp.path().join("memory").join(".kex-mem.db").exists());
}

#[test]
fn test_index_twice_skips_unchanged() {
    let tmp = setup_project();

    let (_, _, success) = run_kex(tmp.path(), &["index"]);
    assert!(success);

    let (stdout, _, success) = run_kex(tmp.path(), &["index"]);
    assert!(success);
    assert!(stdout.contains("indexed: 0"), "stdout: {}", stdout);
    assert!(stdout.contains("skipped: 3"), "stdout: {}", stdout);
}

#[test]
fn test_full_index_reports_removed() {
    let tmp = setup_project();
    run_kex(tmp.path(), &["index"]);

    fs::remove_file(tmp.path().join("memory").join("delta.md")).unwrap();
    let (stdout, stderr, success) = run_kex(tmp.path(), &["index", "--full"]);
    assert!(success, "{}", stderr);
    assert!(stdout.contains("indexed: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("removed: 1"), "stdout: {}", stdout);
}

#[test]
fn test_search_keyword() {
    let tmp = setup_project();
    run_kex(tmp.path(), &["index"]);

    let (stdout, stderr, success) = run_kex(tmp.path(), &["search", "alpha"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("alpha.md"), "stdout: {}", stdout);
    assert!(!stdout.contains("delta.md"));
    assert!(!stdout.contains("scratch.txt"));
}

#[test]
fn test_search_stemming() {
    let tmp = setup_project();
    run_kex(tmp.path(), &["index"]);

    let (stdout, _, success) = run_kex(tmp.path(), &["search", "running"]);
    assert!(success);
    assert!(stdout.contains("delta.md"), "stdout: {}", stdout);
}

#[test]
fn test_search_no_results() {
    let tmp = setup_project();
    run_kex(tmp.path(), &["index"]);

    let (stdout, _, success) = run_kex(tmp.path(), &["search", "nonexistent_term"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_invalid_query() {
    let tmp = setup_project();
    run_kex(tmp.path(), &["index"]);

    let (stdout, _, success) = run_kex(tmp.path(), &["search", "\"unclosed"]);
    assert!(success);
    assert!(stdout.contains("Invalid query:"), "stdout: {}", stdout);
    assert!(!stdout.contains("No results."));
}

#[test]
fn test_search_json() {
    let tmp = setup_project();
    run_kex(tmp.path(), &["index"]);

    let (stdout, _, success) = run_kex(tmp.path(), &["search", "checklist", "--json"]);
    assert!(success);

    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = value["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["path"], "daily/2024-01-02.md");
    assert_eq!(hits[0]["lexical_rank"], 1);
    assert!(hits[0]["vector_rank"].is_null());
}

#[test]
fn test_search_deterministic() {
    let tmp = setup_project();
    run_kex(tmp.path(), &["index"]);

    let (first, _, _) = run_kex(tmp.path(), &["search", "notes"]);
    let (second, _, _) = run_kex(tmp.path(), &["search", "notes"]);
    assert_eq!(first, second);
}

#[test]
fn test_index_single_path() {
    let tmp = setup_project();
    run_kex(tmp.path(), &["index"]);

    fs::write(
        tmp.path().join("memory").join("alpha.md"),
        "# Alpha Notes\n\nnow mentions kubernetes",
    )
    .unwrap();
    let (stdout, stderr, success) = run_kex(tmp.path(), &["index", "alpha.md"]);
    assert!(success, "{}", stderr);
    assert!(stdout.contains("indexed: 1"), "stdout: {}", stdout);

    let (stdout, _, _) = run_kex(tmp.path(), &["search", "kubernetes"]);
    assert!(stdout.contains("alpha.md"), "stdout: {}", stdout);
}

#[test]
fn test_config_file_is_read() {
    let tmp = setup_project();
    fs::write(
        tmp.path().join("memory").join("kex-mem.toml"),
        "[index]\ninclude_globs = [\"**/*.md\", \"**/*.txt\"]\n",
    )
    .unwrap();

    let (stdout, stderr, success) = run_kex(tmp.path(), &["index"]);
    assert!(success, "{}", stderr);
    assert!(stdout.contains("indexed: 4"), "stdout: {}", stdout);
}

#[test]
fn test_invalid_config_fails() {
    let tmp = setup_project();
    fs::write(
        tmp.path().join("memory").join("kex-mem.toml"),
        "[retrieval]\nlexical_weight = 2.0\n",
    )
    .unwrap();

    let (_, stderr, success) = run_kex(tmp.path(), &["index"]);
    assert!(!success);
    assert!(stderr.contains("lexical_weight"), "stderr: {}", stderr);
}

#[test]
fn test_stats() {
    let tmp = setup_project();
    run_kex(tmp.path(), &["index"]);

    let (stdout, _, success) = run_kex(tmp.path(), &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:   3"), "stdout: {}", stdout);
    assert!(stdout.contains("vector search disabled"));
}

#[test]
fn test_embed_pending_requires_vectors() {
    let tmp = setup_project();
    run_kex(tmp.path(), &["index"]);

    let (_, stderr, success) = run_kex(tmp.path(), &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("vector search is disabled"), "stderr: {}", stderr);
}
