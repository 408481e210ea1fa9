//! Core data models used throughout the indexing and retrieval pipeline.
//!
//! These types represent the scanned files, filter candidates, oracle
//! analyses, and relationships that flow from the scanner to the persisted
//! repository index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file discovered by the repository scanner.
///
/// Created during scanning and immutable thereafter. `path` is relative to
/// the repository root and unique within a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: String,
    pub size_bytes: u64,
    pub extension: String,
    pub last_modified: DateTime<Utc>,
}

/// A top-level directory shortlisted by the stage-1 filter.
///
/// Ephemeral: only exists between the directory filter and the file
/// pre-filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryCandidate {
    pub path: String,
    pub code_file_count: usize,
}

/// A file shortlisted by the pre-filter, with the oracle's relevance
/// judgment attached.
#[derive(Debug, Clone, PartialEq)]
pub struct FileCandidate {
    pub path: String,
    pub relevance_reason: String,
    pub confidence: f64,
    pub expected_contribution: String,
}

/// How directly a reference file matches a target need.
///
/// Each variant carries a fixed priority weight used as the primary
/// ranking key: a `DirectMatch` always outranks a `PartialMatch`
/// regardless of confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    DirectMatch,
    PartialMatch,
    Reference,
    Utility,
}

impl RelationshipType {
    /// Fixed priority weight for ranking.
    pub fn weight(self) -> f64 {
        match self {
            RelationshipType::DirectMatch => 1.0,
            RelationshipType::PartialMatch => 0.8,
            RelationshipType::Reference => 0.6,
            RelationshipType::Utility => 0.4,
        }
    }
}

/// A scored relationship between a reference file and the target project.
///
/// `target_file_path` is empty for a generic concept match. Relationships
/// below the configured confidence threshold are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_file_path: String,
    pub target_file_path: String,
    pub relationship_type: RelationshipType,
    pub confidence_score: f64,
    pub helpful_aspects: Vec<String>,
    pub potential_contributions: Vec<String>,
    pub usage_suggestion: String,
}

/// The oracle's structured summary of one analyzed file.
///
/// `summary` is `None` when analysis retries were exhausted; such files are
/// counted as degraded in [`AnalysisMetadata`] instead of failing the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub file_path: String,
    pub file_type: String,
    pub main_functions: Vec<String>,
    pub key_concepts: Vec<String>,
    pub dependencies: Vec<String>,
    pub summary: Option<String>,
    pub lines_of_code: u64,
    pub last_modified: DateTime<Utc>,
    /// Oracle retries spent on this file (transient failures and malformed
    /// responses both count).
    #[serde(default)]
    pub retries: u32,
}

/// Which filtering path produced the analyzed file set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilteringStrategy {
    /// Full tree fit the budget; one pre-filter pass over all files.
    SinglePass,
    /// Tree exceeded the budget; directory filter ran before the pre-filter.
    TwoStage,
    /// Pre-filter returned zero candidates; the full scanned set was
    /// analyzed instead.
    FullSetFallback,
}

/// Aggregate bookkeeping persisted with every repository index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub analysis_date: DateTime<Utc>,
    pub analyzer_version: String,
    pub files_before_filtering: usize,
    pub files_after_filtering: usize,
    /// Fraction of candidate files eliminated before per-file analysis:
    /// `1 - after/before` (0 when nothing was scanned).
    pub filtering_efficiency: f64,
    pub filtering_strategy: FilteringStrategy,
    pub degraded_files: usize,
    pub high_confidence_relationships: usize,
}

/// The persisted unit: one index document per reference repository.
///
/// Created fresh per indexing run and fully replaced on re-run; read-only
/// once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryIndex {
    pub repo_name: String,
    pub total_files: usize,
    pub file_summaries: Vec<FileSummary>,
    pub relationships: Vec<Relationship>,
    pub analysis_metadata: AnalysisMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_type_weights_descend() {
        assert!(RelationshipType::DirectMatch.weight() > RelationshipType::PartialMatch.weight());
        assert!(RelationshipType::PartialMatch.weight() > RelationshipType::Reference.weight());
        assert!(RelationshipType::Reference.weight() > RelationshipType::Utility.weight());
    }

    #[test]
    fn test_relationship_type_serde_snake_case() {
        let json = serde_json::to_string(&RelationshipType::DirectMatch).unwrap();
        assert_eq!(json, "\"direct_match\"");
        let back: RelationshipType = serde_json::from_str("\"partial_match\"").unwrap();
        assert_eq!(back, RelationshipType::PartialMatch);
    }

    #[test]
    fn test_filtering_strategy_serde() {
        let json = serde_json::to_string(&FilteringStrategy::FullSetFallback).unwrap();
        assert_eq!(json, "\"full_set_fallback\"");
    }
}
