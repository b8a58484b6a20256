use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn corpus_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("corpus");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    ).unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    ).unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    ).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/corpus.sqlite"

[index]
dir = "{root}/data/index"

[ocr]
mode = "off"

[retrieval]
final_limit = 12
"#,
        root = root.display()
    );

    let config_path = config_dir.join("corpus.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_corpus(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = corpus_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run corpus binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn file(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn ingest(config_path: &Path, name: &str) -> String {
    let path = file(config_path, name);
    let (stdout, stderr, success) =
        run_corpus(config_path, &["ingest", &path, "--workspace", "docs"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

fn field<'a>(stdout: &'a str, key: &str) -> Option<&'a str> {
    stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix(key))
        .map(|v| v.trim_start_matches(':').trim())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_corpus(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/corpus.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_corpus(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_corpus(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_reports_counts() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);

    let stdout = ingest(&config_path, "alpha.md");
    assert!(stdout.contains("skipped: false"));
    assert_eq!(field(&stdout, "pages"), Some("1"));
    assert_eq!(field(&stdout, "chunks"), Some("1"));
    assert!(stdout.trim_end().ends_with("ok"));
}

#[test]
fn test_ingest_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);

    let first = ingest(&config_path, "alpha.md");
    let second = ingest(&config_path, "alpha.md");
    assert!(second.contains("skipped: true"));
    assert_eq!(field(&first, "doc_id"), field(&second, "doc_id"));

    let (status, _, _) = run_corpus(&config_path, &["status", "--workspace", "docs"]);
    assert_eq!(field(&status, "documents"), Some("1"));
}

#[test]
fn test_search_bm25() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);
    for name in ["alpha.md", "beta.md", "gamma.txt"] {
        ingest(&config_path, name);
    }

    let (stdout, stderr, success) = run_corpus(
        &config_path,
        &["search", "kubernetes docker", "--workspace", "docs", "--mode", "bm25"],
    );
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.starts_with("1. ["), "{}", stdout);
    assert!(stdout.lines().next().unwrap().contains("gamma.txt"));
    assert!(!stdout.contains("alpha.md"));
}

#[test]
fn test_hybrid_search_without_embeddings_falls_back_to_bm25() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);
    for name in ["alpha.md", "beta.md", "gamma.txt"] {
        ingest(&config_path, name);
    }

    let (bm25, _, ok1) = run_corpus(
        &config_path,
        &["search", "python learning", "--workspace", "docs", "--mode", "bm25"],
    );
    let (hybrid, stderr, ok2) = run_corpus(
        &config_path,
        &["search", "python learning", "--workspace", "docs"],
    );
    assert!(ok1 && ok2, "search failed: {}", stderr);
    assert_eq!(bm25, hybrid);
    assert!(hybrid.contains("beta.md"));
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);
    for name in ["alpha.md", "beta.md", "gamma.txt"] {
        ingest(&config_path, name);
    }

    let args = ["search", "document", "--workspace", "docs"];
    let (out1, _, _) = run_corpus(&config_path, &args);
    let (out2, _, _) = run_corpus(&config_path, &args);
    assert_eq!(out1, out2);
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);

    let (stdout, _, success) =
        run_corpus(&config_path, &["search", "", "--workspace", "docs"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);
    ingest(&config_path, "alpha.md");

    let (stdout, _, success) = run_corpus(
        &config_path,
        &["search", "xyzzyplugh", "--workspace", "docs"],
    );
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_unknown_mode_errors() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);

    let (_, stderr, success) = run_corpus(
        &config_path,
        &["search", "test", "--workspace", "docs", "--mode", "keyword"],
    );
    assert!(!success);
    assert!(stderr.contains("keyword"), "{}", stderr);
}

#[test]
fn test_get_document() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);
    let stdout = ingest(&config_path, "gamma.txt");
    let doc_id = field(&stdout, "doc_id").unwrap().to_string();

    let (get_out, stderr, success) =
        run_corpus(&config_path, &["get", &doc_id, "--workspace", "docs"]);
    assert!(success, "get failed: {}", stderr);
    assert!(get_out.contains("--- Document ---"));
    assert!(get_out.contains("filename:     gamma.txt"));
    assert!(get_out.contains("--- Chunks (1) ---"));
    assert!(get_out.contains("Kubernetes and Docker"));
}

#[test]
fn test_get_missing_document() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);

    let (_, stderr, success) = run_corpus(
        &config_path,
        &["get", "00000000-0000-0000-0000-000000000000", "--workspace", "docs"],
    );
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_delete_document() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);
    let stdout = ingest(&config_path, "gamma.txt");
    ingest(&config_path, "alpha.md");
    let doc_id = field(&stdout, "doc_id").unwrap().to_string();

    let (del_out, stderr, success) =
        run_corpus(&config_path, &["delete", &doc_id, "--workspace", "docs"]);
    assert!(success, "delete failed: {}", stderr);
    assert!(del_out.contains("ok"));

    let (search_out, _, _) = run_corpus(
        &config_path,
        &["search", "kubernetes", "--workspace", "docs"],
    );
    assert!(search_out.contains("No results."));

    let (status, _, _) = run_corpus(&config_path, &["status", "--workspace", "docs"]);
    assert_eq!(field(&status, "documents"), Some("1"));

    let (_, _, again) = run_corpus(&config_path, &["delete", &doc_id, "--workspace", "docs"]);
    assert!(!again);
}

#[test]
fn test_status_and_rebuild() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);

    let (empty, _, success) = run_corpus(&config_path, &["status", "--workspace", "docs"]);
    assert!(success);
    assert_eq!(field(&empty, "documents"), Some("0"));
    assert_eq!(field(&empty, "bm25 present"), Some("false"));

    for name in ["alpha.md", "beta.md"] {
        ingest(&config_path, name);
    }
    let (status, _, _) = run_corpus(&config_path, &["status", "--workspace", "docs"]);
    assert_eq!(field(&status, "documents"), Some("2"));
    assert_eq!(field(&status, "vectors"), Some("0"));
    assert_eq!(field(&status, "bm25 present"), Some("true"));

    let (rebuild, stderr, success) =
        run_corpus(&config_path, &["rebuild", "--workspace", "docs"]);
    assert!(success, "rebuild failed: {}", stderr);
    assert_eq!(field(&rebuild, "embedded"), Some("0"));
    assert_eq!(field(&rebuild, "bm25 chunks"), Some("2"));
    assert!(rebuild.contains("ok"));
}

#[test]
fn test_invalid_workspace_errors() {
    let (_tmp, config_path) = setup_test_env();
    run_corpus(&config_path, &["init"]);
    let path = file(&config_path, "alpha.md");

    let (_, stderr, success) =
        run_corpus(&config_path, &["ingest", &path, "--workspace", "../up"]);
    assert!(!success);
    assert!(stderr.contains("invalid workspace id"), "{}", stderr);
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_corpus(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
