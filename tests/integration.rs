use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn csync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("csync");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let articles = root.join("articles");
    fs::create_dir_all(&articles).unwrap();
    fs::write(
        articles.join("adding-a-youtube-video.md"),
        "---\ntitle: \"Adding a YouTube video\"\ncreated_at: \"2024-01-05T10:00:00Z\"\nupdated_at: \"2024-02-01T08:30:00Z\"\n---\n\n# Adding a YouTube video\n\nPaste the link into the editor.\n",
    )
    .unwrap();
    fs::write(
        articles.join("billing-faq.md"),
        "---\ncreated_at: 2024-01-01\nupdated_at: 2024-01-01\n---\n\n# Billing FAQ\n",
    )
    .unwrap();
    fs::write(articles.join("draft.md"), "# Draft without frontmatter\n").unwrap();
    fs::write(articles.join("README.md"), "# Articles\n").unwrap();

    let config_content = format!(
        r#"[corpus]
root = "{root}/articles"

[cache]
path = "{root}/.bot_cache.json"

[remote]
vector_store_id = "vs_integration"

[reports]
dir = "{root}/reports"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("csync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_csync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = csync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .env_remove("VECTOR_STORE_ID")
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run csync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_dry_run_lists_plan_without_side_effects() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, success) = run_csync(&config, &["sync", "--dry-run"]);
    assert!(success, "dry run failed: {}", stderr);

    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("documents found: 3"));
    assert!(stdout.contains("adding-a-youtube-video.md (NEW (cold start))"));
    assert!(stdout.contains("draft.md (SKIPPED (missing timestamps))"));
    assert!(!stdout.contains("README.md"));
    assert!(stdout.contains("added: 2"));
    assert!(stdout.contains("skipped: 1"));

    assert!(!tmp.path().join(".bot_cache.json").exists());
    assert!(!tmp.path().join("reports").exists());
}

#[test]
fn test_status_on_fresh_corpus() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, success) = run_csync(&config, &["status"]);
    assert!(success, "status failed: {}", stderr);

    assert!(stdout.contains("Local files: 3"));
    assert!(stdout.contains("Tracked:     0"));
    assert!(stdout.contains("Last sync:   never"));
    assert!(stdout.contains("vs_integration"));
}

#[test]
fn test_status_reports_pending_uploads() {
    let (tmp, config) = setup_test_env();
    fs::write(
        tmp.path().join(".bot_cache.json"),
        r#"{
  "_metadata": {"last_sync_time": "2024-01-10T00:00:00Z", "files_added": 2},
  "billing-faq.md": {"hash": "abc", "file_id": "file-1"},
  "adding-a-youtube-video.md": {"hash": "def", "file_id": null}
}"#,
    )
    .unwrap();

    let (stdout, _stderr, success) = run_csync(&config, &["status"]);
    assert!(success);
    assert!(stdout.contains("Tracked:     2"));
    assert!(stdout.contains("Pending upload (1):"));
    assert!(stdout.contains("    adding-a-youtube-video.md"));
    assert!(stdout.contains("2 added, 0 updated, 0 skipped"));
}

#[test]
fn test_sync_without_api_key_fails() {
    let (tmp, config) = setup_test_env();

    let (_stdout, stderr, success) = run_csync(&config, &["sync"]);
    assert!(!success);
    assert!(stderr.contains("OPENAI_API_KEY"));
    assert!(!tmp.path().join(".bot_cache.json").exists());
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_stdout, stderr, success) = run_csync(&tmp.path().join("nope.toml"), &["status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _config) = setup_test_env();
    let bad = tmp.path().join("config").join("bad.toml");
    fs::write(
        &bad,
        "[corpus]\nroot = \"articles\"\n[ingestion]\npoll_interval_secs = 0\n",
    )
    .unwrap();

    let (_stdout, stderr, success) = run_csync(&bad, &["status"]);
    assert!(!success);
    assert!(stderr.contains("poll_interval_secs"));
}
