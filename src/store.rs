//! Persisted index storage: one JSON document per reference repository,
//! keyed by repository name, plus the batch summary report.
//!
//! Writes go through a temp-file-then-rename so a failed write never
//! truncates a previously persisted index. Re-indexing a repository fully
//! replaces its document.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::RepositoryIndex;

const INDEX_SUFFIX: &str = "_index.json";
const SUMMARY_FILE: &str = "indexing_summary.json";

/// Batch report written after a multi-repository indexing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub indexing_completion_time: DateTime<Utc>,
    pub total_repositories_processed: usize,
    /// repo name → persisted index path.
    pub output_files: BTreeMap<String, String>,
}

/// Path of the index document for `repo_name` under `indexes_dir`.
pub fn index_path(indexes_dir: &Path, repo_name: &str) -> PathBuf {
    indexes_dir.join(format!("{}{}", repo_name, INDEX_SUFFIX))
}

/// Persist one repository index, replacing any prior document.
pub fn write_index(indexes_dir: &Path, index: &RepositoryIndex) -> Result<PathBuf> {
    std::fs::create_dir_all(indexes_dir)
        .with_context(|| format!("Failed to create index directory: {}", indexes_dir.display()))?;

    let path = index_path(indexes_dir, &index.repo_name);
    let json = serde_json::to_string_pretty(index)?;
    write_atomic(&path, &json)?;
    Ok(path)
}

/// Load one index document.
pub fn load_index(path: &Path) -> Result<RepositoryIndex> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read index file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse index file: {}", path.display()))
}

/// Load every persisted index under `indexes_dir`, ordered by repo name.
///
/// Unparseable documents are skipped with a warning; the query engine
/// serves whatever is readable.
pub fn load_all_indexes(indexes_dir: &Path) -> Result<Vec<RepositoryIndex>> {
    let mut indexes = Vec::new();

    if !indexes_dir.is_dir() {
        return Ok(indexes);
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(indexes_dir)
        .with_context(|| format!("Failed to read index directory: {}", indexes_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(INDEX_SUFFIX))
        })
        .collect();
    paths.sort();

    for path in paths {
        match load_index(&path) {
            Ok(index) => indexes.push(index),
            Err(e) => log::warn!("skipping unreadable index {}: {e}", path.display()),
        }
    }

    Ok(indexes)
}

/// Write the batch summary report next to the indexes.
pub fn write_summary_report(indexes_dir: &Path, report: &SummaryReport) -> Result<PathBuf> {
    std::fs::create_dir_all(indexes_dir)?;
    let path = indexes_dir.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(report)?;
    write_atomic(&path, &json)?;
    Ok(path)
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write index file: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move index into place: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AnalysisMetadata, FileSummary, FilteringStrategy, Relationship, RelationshipType,
    };
    use tempfile::TempDir;

    fn sample_index(repo_name: &str) -> RepositoryIndex {
        RepositoryIndex {
            repo_name: repo_name.to_string(),
            total_files: 2,
            file_summaries: vec![FileSummary {
                file_path: "src/a.py".to_string(),
                file_type: "module".to_string(),
                main_functions: vec!["run".to_string()],
                key_concepts: vec!["encoding".to_string()],
                dependencies: vec!["numpy".to_string()],
                summary: Some("Encodes things.".to_string()),
                lines_of_code: 42,
                last_modified: Default::default(),
                retries: 1,
            }],
            relationships: vec![Relationship {
                source_file_path: "src/a.py".to_string(),
                target_file_path: "target/enc.py".to_string(),
                relationship_type: RelationshipType::DirectMatch,
                confidence_score: 0.9,
                helpful_aspects: vec!["encoder loop".to_string()],
                potential_contributions: vec!["reuse".to_string()],
                usage_suggestion: "Adapt the loop.".to_string(),
            }],
            analysis_metadata: AnalysisMetadata {
                analysis_date: Default::default(),
                analyzer_version: "0.3.0".to_string(),
                files_before_filtering: 10,
                files_after_filtering: 2,
                filtering_efficiency: 0.8,
                filtering_strategy: FilteringStrategy::SinglePass,
                degraded_files: 0,
                high_confidence_relationships: 1,
            },
        }
    }

    #[test]
    fn test_write_then_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let index = sample_index("repoA");

        let path = write_index(tmp.path(), &index).unwrap();
        assert!(path.ends_with("repoA_index.json"));

        let loaded = load_index(&path).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_rewrite_replaces_prior_index() {
        let tmp = TempDir::new().unwrap();
        let mut index = sample_index("repoA");
        write_index(tmp.path(), &index).unwrap();

        index.total_files = 99;
        index.relationships.clear();
        let path = write_index(tmp.path(), &index).unwrap();

        let loaded = load_index(&path).unwrap();
        assert_eq!(loaded.total_files, 99);
        assert!(loaded.relationships.is_empty());
    }

    #[test]
    fn test_load_all_skips_summary_and_garbage() {
        let tmp = TempDir::new().unwrap();
        write_index(tmp.path(), &sample_index("repoA")).unwrap();
        write_index(tmp.path(), &sample_index("repoB")).unwrap();
        std::fs::write(tmp.path().join("broken_index.json"), "not json").unwrap();
        write_summary_report(
            tmp.path(),
            &SummaryReport {
                indexing_completion_time: Utc::now(),
                total_repositories_processed: 2,
                output_files: BTreeMap::new(),
            },
        )
        .unwrap();

        let indexes = load_all_indexes(tmp.path()).unwrap();
        let names: Vec<&str> = indexes.iter().map(|i| i.repo_name.as_str()).collect();
        assert_eq!(names, vec!["repoA", "repoB"]);
    }

    #[test]
    fn test_load_all_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        assert!(load_all_indexes(&missing).unwrap().is_empty());
    }
}
