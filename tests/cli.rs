use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn lvault_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_lvault"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/lv.sqlite"

[analytics]
backend = "memory"

[ingest]
uploads_dir = "{root}/uploads"

[search]
default_daily_limit = 5

[logging]
level = "warn"
"#,
        root = root.display()
    );
    let config_path = config_dir.join("lvault.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_lvault(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(lvault_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run lvault binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_lvault(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Control-plane database ready"));
    assert!(tmp.path().join("data/lv.sqlite").exists());

    // Idempotent
    let (_, stderr, success) = run_lvault(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_ingest_reports_status_and_lists_upload() {
    let (tmp, config_path) = setup_test_env();
    let csv = tmp.path().join("leads (3).csv");
    fs::write(&csv, "Name,Email\nAda,ada@x.io\nGrace,grace@x.io\n").unwrap();

    let (stdout, stderr, success) = run_lvault(&config_path, &["ingest", csv.to_str().unwrap()]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("status: succeeded"), "{}", stdout);
    assert!(stdout.contains("rows: 2"), "{}", stdout);

    let (stdout, _, success) = run_lvault(&config_path, &["uploads"]);
    assert!(success);
    assert!(stdout.contains("leads (3).csv"));
    assert!(stdout.contains("succeeded"));
}

#[test]
fn test_ingest_failure_is_reported() {
    let (tmp, config_path) = setup_test_env();
    let csv = tmp.path().join("junk.csv");
    fs::write(&csv, "foo,bar\n1,2\n").unwrap();

    let (stdout, _, success) = run_lvault(&config_path, &["ingest", csv.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("status: failed"), "{}", stdout);
    assert!(stdout.contains("no recognized columns in header"));
}

#[test]
fn test_quota_set_and_show() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_lvault(&config_path, &["quota", "--user", "u1"]);
    assert!(success);
    assert!(stdout.contains("0 of 5 searches used"), "{}", stdout);

    let (stdout, _, success) = run_lvault(&config_path, &["quota", "--user", "u1", "--set", "12"]);
    assert!(success);
    assert!(stdout.contains("Daily limit for u1 set to 12."));
    assert!(stdout.contains("0 of 12 searches used"), "{}", stdout);
}

#[test]
fn test_search_against_empty_store() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) =
        run_lvault(&config_path, &["search", "--user", "u1", "--company", "acme"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("0 of 0 results"), "{}", stdout);

    let (stdout, _, success) = run_lvault(&config_path, &["history", "--user", "u1"]);
    assert!(success);
    assert!(stdout.contains("1 total"), "{}", stdout);
    assert!(stdout.contains("company=acme"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[db]\npath = \"x\"\n[ingest]\nbatch_size = 0\n").unwrap();
    let (_, stderr, success) = run_lvault(&bad, &["uploads"]);
    assert!(!success);
    assert!(stderr.contains("batch_size"), "{}", stderr);
}
