//! Binary-level tests for the read-only query commands, run against
//! pre-persisted index documents.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use ref_indexer::models::{
    AnalysisMetadata, FileSummary, FilteringStrategy, Relationship, RelationshipType,
    RepositoryIndex,
};
use ref_indexer::store;

fn rix_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rix");
    path
}

fn run_rix(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rix_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rix binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("code_base")).unwrap();

    let config_content = format!(
        r#"[paths]
code_base = "{}/code_base"
indexes = "{}/indexes"
"#,
        root.display(),
        root.display()
    );
    let config_path = root.join("config/rix.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn sample_index(repo_name: &str) -> RepositoryIndex {
    RepositoryIndex {
        repo_name: repo_name.to_string(),
        total_files: 5,
        file_summaries: vec![FileSummary {
            file_path: "src/encoder.py".to_string(),
            file_type: "module".to_string(),
            main_functions: vec!["encode".to_string()],
            key_concepts: vec!["streaming encoder".to_string()],
            dependencies: vec!["numpy".to_string()],
            summary: Some("Implements a streaming encoder.".to_string()),
            lines_of_code: 120,
            last_modified: Default::default(),
            retries: 0,
        }],
        relationships: vec![Relationship {
            source_file_path: "src/encoder.py".to_string(),
            target_file_path: "target/audio/encoder.py".to_string(),
            relationship_type: RelationshipType::DirectMatch,
            confidence_score: 0.9,
            helpful_aspects: vec!["frame loop".to_string()],
            potential_contributions: vec!["reuse encoder".to_string()],
            usage_suggestion: "Adapt the frame loop.".to_string(),
        }],
        analysis_metadata: AnalysisMetadata {
            analysis_date: Default::default(),
            analyzer_version: "0.3.0".to_string(),
            files_before_filtering: 5,
            files_after_filtering: 1,
            filtering_efficiency: 0.8,
            filtering_strategy: FilteringStrategy::SinglePass,
            degraded_files: 0,
            high_confidence_relationships: 1,
        },
    }
}

#[test]
fn test_overview_lists_persisted_indexes() {
    let (tmp, config_path) = setup_test_env();
    let indexes_dir = tmp.path().join("indexes");
    store::write_index(&indexes_dir, &sample_index("whisper-finetune")).unwrap();
    store::write_index(&indexes_dir, &sample_index("llm-serving")).unwrap();

    let (stdout, stderr, success) = run_rix(&config_path, &["overview"]);
    assert!(success, "overview failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("repositories: 2"));
    assert!(stdout.contains("whisper-finetune"));
    assert!(stdout.contains("llm-serving"));
    assert!(stdout.contains("high confidence: 2"));
}

#[test]
fn test_overview_without_indexes_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_rix(&config_path, &["overview"]);
    assert!(!success);
    assert!(stderr.contains("No indexes found"));
}

#[test]
fn test_search_finds_relationship_by_path_token() {
    let (tmp, config_path) = setup_test_env();
    store::write_index(&tmp.path().join("indexes"), &sample_index("whisper-finetune")).unwrap();

    let (stdout, stderr, success) = run_rix(&config_path, &["search", "encoder"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("src/encoder.py"));
    assert!(stdout.contains("target/audio/encoder.py"));
    assert!(stdout.contains("Adapt the frame loop."));
}

#[test]
fn test_search_no_match_reports_cleanly() {
    let (tmp, config_path) = setup_test_env();
    store::write_index(&tmp.path().join("indexes"), &sample_index("whisper-finetune")).unwrap();

    let (stdout, _, success) = run_rix(&config_path, &["search", "kubernetes"]);
    assert!(success);
    assert!(stdout.contains("no matches"));
}

#[test]
fn test_search_respects_top_k() {
    let (tmp, config_path) = setup_test_env();
    let indexes_dir = tmp.path().join("indexes");
    for i in 0..4 {
        store::write_index(&indexes_dir, &sample_index(&format!("repo{i}"))).unwrap();
    }

    let (stdout, _, success) = run_rix(&config_path, &["search", "encoder", "--top-k", "2"]);
    assert!(success);
    let hits = stdout.lines().filter(|l| l.contains("src/encoder.py ->")).count();
    assert_eq!(hits, 2);
}

#[test]
fn test_index_missing_target_structure_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_rix(
        &config_path,
        &["index", "--target-structure", "/nonexistent/plan.txt"],
    );
    assert!(!success);
    assert!(stderr.contains("Failed to read target structure file"));
}

#[test]
fn test_missing_config_fails() {
    let (stdout, stderr, success) = run_rix(Path::new("/nonexistent/rix.toml"), &["overview"]);
    assert!(!success, "expected failure: stdout={}", stdout);
    assert!(stderr.contains("Failed to read config file"));
}
