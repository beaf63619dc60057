use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docflow_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docflow");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about incremental ingestion.\n\nIt covers ledgers and queues.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.txt"),
        "Beta plain text file.\n\nContains notes about cursors and stage tracking.",
    )
    .unwrap();
    fs::write(files_dir.join("ignored.log"), "not included by globs").unwrap();

    let config_content = format!(
        r#"[storage]
state_dir = "{root}/state"

[chunking]
max_tokens = 700

[scheduler]
interval_days = 1
tick_secs = 1

[connectors.filesystem.docs]
root = "{root}/files"
include_globs = ["**/*.md", "**/*.txt"]
exclude_globs = []
follow_symlinks = false
"#,
        root = root.display()
    );

    let config_path = root.join("docflow.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docflow(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docflow_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docflow binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_scan_queues_new_items_once() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_docflow(&config, &["scan"]);
    assert!(ok, "scan failed: {stderr}");
    assert!(stdout.contains("new items queued: 2"), "stdout: {stdout}");

    // A second scan finds nothing new: queue dedup absorbs the rescan.
    let (stdout, _, ok) = run_docflow(&config, &["scan"]);
    assert!(ok);
    assert!(stdout.contains("new items queued: 0"), "stdout: {stdout}");

    let (stdout, _, ok) = run_docflow(&config, &["queue"]);
    assert!(ok);
    assert!(stdout.contains("Processing queue (2 items):"));
    assert!(stdout.contains("alpha.md"));
    assert!(stdout.contains("beta.txt"));
}

#[test]
fn test_run_processes_backlog_and_is_incremental() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_docflow(&config, &["run"]);
    assert!(ok, "run failed: {stderr}");
    assert!(stdout.contains("processed: 2"), "stdout: {stdout}");
    assert!(stdout.contains("failed: 0"));

    let (stdout, _, ok) = run_docflow(&config, &["queue"]);
    assert!(ok);
    assert!(stdout.contains("Processing queue is empty."));

    // Processed items live in the ledger now; nothing requeues.
    let (stdout, _, ok) = run_docflow(&config, &["scan"]);
    assert!(ok);
    assert!(stdout.contains("new items queued: 0"));

    // With embeddings disabled, files stop halfway (read + chunk done).
    let (stdout, _, ok) = run_docflow(&config, &["status"]);
    assert!(ok);
    assert!(stdout.contains("total files: 2"), "stdout: {stdout}");
    assert!(stdout.contains("in progress: 2"));
    assert!(stdout.contains("overall progress: 50.0%"));
    assert!(stdout.contains("last completed run:"));

    // New content shows up on the next scan.
    fs::write(
        tmp.path().join("files/gamma.md"),
        "# Gamma\n\nA new document.",
    )
    .unwrap();
    let (stdout, _, ok) = run_docflow(&config, &["scan"]);
    assert!(ok);
    assert!(stdout.contains("new items queued: 1"));
}

#[test]
fn test_mark_and_clear() {
    let (_tmp, config) = setup_test_env();
    run_docflow(&config, &["scan"]);

    // Pull an id out of the queue listing.
    let (stdout, _, _) = run_docflow(&config, &["queue"]);
    let id = stdout
        .lines()
        .find(|l| l.contains("alpha.md"))
        .and_then(|l| l.split("(id: ").nth(1))
        .and_then(|l| l.strip_suffix(')'))
        .expect("queue listing should contain an id")
        .to_string();

    let (stdout, stderr, ok) = run_docflow(&config, &["mark", &id]);
    assert!(ok, "mark failed: {stderr}");
    assert!(stdout.contains("marked processed"));

    // Marking an id that is no longer queued is a reported failure.
    let (_, stderr, ok) = run_docflow(&config, &["mark", &id]);
    assert!(!ok);
    assert!(stderr.contains("not found"), "stderr: {stderr}");

    let (stdout, _, ok) = run_docflow(&config, &["clear"]);
    assert!(ok);
    assert!(stdout.contains("queue cleared (1 items dropped)"));

    // The marked item stays in the ledger; the cleared one returns.
    let (stdout, _, ok) = run_docflow(&config, &["scan"]);
    assert!(ok);
    assert!(stdout.contains("new items queued: 1"));
}

#[test]
fn test_sources_listing() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, ok) = run_docflow(&config, &["sources"]);
    assert!(ok);
    assert!(stdout.contains("filesystem:docs"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_reset_drops_stage_state() {
    let (_tmp, config) = setup_test_env();
    run_docflow(&config, &["run"]);

    let (stdout, _, ok) = run_docflow(&config, &["reset"]);
    assert!(ok);
    assert!(stdout.contains("pipeline state reset"));

    let (stdout, _, ok) = run_docflow(&config, &["status"]);
    assert!(ok);
    assert!(stdout.contains("total files: 0"));
}

#[test]
fn test_missing_config_fails() {
    let (_tmp, config) = setup_test_env();
    let missing = config.parent().unwrap().join("nope.toml");
    let (_, stderr, ok) = run_docflow(&missing, &["queue"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"), "stderr: {stderr}");
}
