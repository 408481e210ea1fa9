//! Retrieval query engine: read-only search over persisted indexes.
//!
//! Serves two operations, both loading whatever index documents exist on
//! disk without ever re-indexing: free-text search over relationships and
//! file summaries, and an aggregate overview of the persisted indexes.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::config::Config;
use crate::mapper;
use crate::models::{FileSummary, Relationship, RepositoryIndex};
use crate::store::load_all_indexes;

/// One search hit: a persisted relationship plus the repository it came
/// from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub repo_name: String,
    pub relationship: Relationship,
}

/// Search persisted relationships for a free-text query.
///
/// A relationship matches when a query token appears in its source or
/// target path, or when the source file's summary overlaps the query
/// (concepts, function names, summary text). Hits are ranked by
/// relationship-type weight then confidence, descending, truncated to
/// `top_k`.
pub fn search_code_references(
    indexes: &[RepositoryIndex],
    query: &str,
    top_k: usize,
) -> Vec<SearchHit> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for index in indexes {
        let summaries: HashMap<&str, &FileSummary> = index
            .file_summaries
            .iter()
            .map(|s| (s.file_path.as_str(), s))
            .collect();

        for relationship in &index.relationships {
            let summary = summaries.get(relationship.source_file_path.as_str());
            if relationship_matches(relationship, summary.copied(), &tokens) {
                hits.push(SearchHit {
                    repo_name: index.repo_name.clone(),
                    relationship: relationship.clone(),
                });
            }
        }
    }

    hits.sort_by(|a, b| {
        mapper::rank(&a.relationship, &b.relationship).then(a.repo_name.cmp(&b.repo_name))
    });
    hits.truncate(top_k);
    hits
}

fn relationship_matches(
    relationship: &Relationship,
    summary: Option<&FileSummary>,
    tokens: &[String],
) -> bool {
    let source = relationship.source_file_path.to_lowercase();
    let target = relationship.target_file_path.to_lowercase();
    if tokens.iter().any(|t| source.contains(t) || target.contains(t)) {
        return true;
    }
    summary.is_some_and(|s| relevance_score(s, tokens) > 0.0)
}

/// Token-overlap relevance of one file summary against a query.
///
/// Concept matches weigh most, then function names, then summary prose and
/// the file path. Zero means no overlap at all.
pub fn relevance_score(summary: &FileSummary, tokens: &[String]) -> f64 {
    let concepts: Vec<String> = summary.key_concepts.iter().map(|c| c.to_lowercase()).collect();
    let functions: Vec<String> = summary.main_functions.iter().map(|f| f.to_lowercase()).collect();
    let prose = summary
        .summary
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let path = summary.file_path.to_lowercase();

    let mut score = 0.0;
    for token in tokens {
        if concepts.iter().any(|c| c.contains(token)) {
            score += 0.3;
        }
        if functions.iter().any(|f| f.contains(token)) {
            score += 0.2;
        }
        if prose.contains(token) {
            score += 0.1;
        }
        if path.contains(token) {
            score += 0.2;
        }
    }
    score
}

fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

// ============ Overview ============

/// Aggregate view of all persisted indexes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexesOverview {
    pub total_repositories: usize,
    pub total_indexed_files: usize,
    pub total_relationships: usize,
    pub high_confidence_relationships: usize,
    pub repositories: Vec<RepositoryOverview>,
}

/// Per-repository slice of the overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryOverview {
    pub repo_name: String,
    pub total_files: usize,
    pub indexed_files: usize,
    pub degraded_files: usize,
    pub relationships: usize,
    pub high_confidence_relationships: usize,
    pub filtering_efficiency: f64,
    pub analysis_date: DateTime<Utc>,
}

/// Summarize the persisted indexes. Read-only; never triggers indexing.
pub fn get_indexes_overview(indexes: &[RepositoryIndex]) -> IndexesOverview {
    let repositories: Vec<RepositoryOverview> = indexes
        .iter()
        .map(|index| RepositoryOverview {
            repo_name: index.repo_name.clone(),
            total_files: index.total_files,
            indexed_files: index.file_summaries.len(),
            degraded_files: index.analysis_metadata.degraded_files,
            relationships: index.relationships.len(),
            high_confidence_relationships: index
                .analysis_metadata
                .high_confidence_relationships,
            filtering_efficiency: index.analysis_metadata.filtering_efficiency,
            analysis_date: index.analysis_metadata.analysis_date,
        })
        .collect();

    IndexesOverview {
        total_repositories: repositories.len(),
        total_indexed_files: repositories.iter().map(|r| r.indexed_files).sum(),
        total_relationships: repositories.iter().map(|r| r.relationships).sum(),
        high_confidence_relationships: repositories
            .iter()
            .map(|r| r.high_confidence_relationships)
            .sum(),
        repositories,
    }
}

// ============ CLI entries ============

/// CLI entry: search persisted relationships and print the hits.
pub fn run_search(cfg: &Config, query: &str, top_k: usize) -> Result<()> {
    let indexes = load_indexes_or_bail(cfg)?;
    let hits = search_code_references(&indexes, query, top_k);

    if hits.is_empty() {
        println!("no matches");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let r = &hit.relationship;
        println!(
            "{}. [{}] {} -> {} ({:?}, {:.2})",
            i + 1,
            hit.repo_name,
            r.source_file_path,
            if r.target_file_path.is_empty() {
                "<concept>"
            } else {
                &r.target_file_path
            },
            r.relationship_type,
            r.confidence_score,
        );
        if !r.usage_suggestion.is_empty() {
            println!("   {}", r.usage_suggestion);
        }
    }
    Ok(())
}

/// CLI entry: print the aggregate overview of persisted indexes.
pub fn run_overview(cfg: &Config) -> Result<()> {
    let indexes = load_indexes_or_bail(cfg)?;
    let overview = get_indexes_overview(&indexes);

    println!("repositories: {}", overview.total_repositories);
    println!("indexed files: {}", overview.total_indexed_files);
    println!("relationships: {}", overview.total_relationships);
    println!(
        "high confidence: {}",
        overview.high_confidence_relationships
    );
    for repo in &overview.repositories {
        println!(
            "  {}: {} files indexed of {}, {} relationships, efficiency {:.2}",
            repo.repo_name,
            repo.indexed_files,
            repo.total_files,
            repo.relationships,
            repo.filtering_efficiency,
        );
    }
    Ok(())
}

fn load_indexes_or_bail(cfg: &Config) -> Result<Vec<RepositoryIndex>> {
    let indexes = load_all_indexes(&cfg.paths.indexes)?;
    if indexes.is_empty() {
        bail!(
            "No indexes found in {}. Run `rix index` first.",
            cfg.paths.indexes.display()
        );
    }
    Ok(indexes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisMetadata, FilteringStrategy, RelationshipType};

    fn summary(path: &str, concepts: &[&str], text: &str) -> FileSummary {
        FileSummary {
            file_path: path.to_string(),
            file_type: "module".to_string(),
            main_functions: vec!["run".to_string()],
            key_concepts: concepts.iter().map(|c| c.to_string()).collect(),
            dependencies: Vec::new(),
            summary: Some(text.to_string()),
            lines_of_code: 5,
            last_modified: Default::default(),
            retries: 0,
        }
    }

    fn relationship(
        source: &str,
        target: &str,
        t: RelationshipType,
        confidence: f64,
    ) -> Relationship {
        Relationship {
            source_file_path: source.to_string(),
            target_file_path: target.to_string(),
            relationship_type: t,
            confidence_score: confidence,
            helpful_aspects: Vec::new(),
            potential_contributions: Vec::new(),
            usage_suggestion: String::new(),
        }
    }

    fn index(repo: &str, summaries: Vec<FileSummary>, rels: Vec<Relationship>) -> RepositoryIndex {
        let high = rels.iter().filter(|r| r.confidence_score >= 0.7).count();
        RepositoryIndex {
            repo_name: repo.to_string(),
            total_files: summaries.len(),
            file_summaries: summaries,
            relationships: rels,
            analysis_metadata: AnalysisMetadata {
                analysis_date: Default::default(),
                analyzer_version: "0.3.0".to_string(),
                files_before_filtering: 10,
                files_after_filtering: 4,
                filtering_efficiency: 0.6,
                filtering_strategy: FilteringStrategy::SinglePass,
                degraded_files: 0,
                high_confidence_relationships: high,
            },
        }
    }

    #[test]
    fn test_search_matches_target_path() {
        let indexes = vec![index(
            "repoA",
            vec![],
            vec![
                relationship("src/enc.py", "target/encoder.py", RelationshipType::Reference, 0.6),
                relationship("src/io.py", "target/loader.py", RelationshipType::Reference, 0.6),
            ],
        )];
        let hits = search_code_references(&indexes, "encoder", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].relationship.target_file_path, "target/encoder.py");
    }

    #[test]
    fn test_search_matches_summary_concepts() {
        let indexes = vec![index(
            "repoA",
            vec![summary("src/train.py", &["gradient descent"], "Trains a model.")],
            vec![relationship("src/train.py", "", RelationshipType::Utility, 0.5)],
        )];
        let hits = search_code_references(&indexes, "gradient", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].relationship.source_file_path, "src/train.py");
    }

    #[test]
    fn test_search_ranks_type_weight_over_confidence() {
        let indexes = vec![index(
            "repoA",
            vec![],
            vec![
                relationship("a.py", "t/enc.py", RelationshipType::Utility, 0.99),
                relationship("b.py", "t/enc.py", RelationshipType::DirectMatch, 0.5),
            ],
        )];
        let hits = search_code_references(&indexes, "enc", 10);
        assert_eq!(hits[0].relationship.source_file_path, "b.py");
        assert_eq!(hits[1].relationship.source_file_path, "a.py");
    }

    #[test]
    fn test_search_truncates_to_top_k() {
        let rels = (0..5)
            .map(|i| {
                relationship(
                    &format!("src/f{i}.py"),
                    "t/enc.py",
                    RelationshipType::Reference,
                    0.5,
                )
            })
            .collect();
        let indexes = vec![index("repoA", vec![], rels)];
        assert_eq!(search_code_references(&indexes, "enc", 2).len(), 2);
    }

    #[test]
    fn test_search_empty_query_matches_nothing() {
        let indexes = vec![index(
            "repoA",
            vec![],
            vec![relationship("a.py", "t/x.py", RelationshipType::Reference, 0.5)],
        )];
        assert!(search_code_references(&indexes, "  ", 10).is_empty());
    }

    #[test]
    fn test_relevance_score_weights_concepts_highest() {
        let s = summary("src/misc.py", &["quantization"], "Other things.");
        let tokens = vec!["quantization".to_string()];
        let concept_score = relevance_score(&s, &tokens);

        let s2 = summary("src/misc.py", &[], "Mentions quantization once.");
        let prose_score = relevance_score(&s2, &tokens);
        assert!(concept_score > prose_score);
        assert!(prose_score > 0.0);
    }

    #[test]
    fn test_overview_aggregates_across_repos() {
        let indexes = vec![
            index(
                "repoA",
                vec![summary("a.py", &[], "x")],
                vec![relationship("a.py", "t/a.py", RelationshipType::DirectMatch, 0.9)],
            ),
            index(
                "repoB",
                vec![summary("b.py", &[], "y"), summary("c.py", &[], "z")],
                vec![relationship("b.py", "t/b.py", RelationshipType::Reference, 0.4)],
            ),
        ];
        let overview = get_indexes_overview(&indexes);
        assert_eq!(overview.total_repositories, 2);
        assert_eq!(overview.total_indexed_files, 3);
        assert_eq!(overview.total_relationships, 2);
        assert_eq!(overview.high_confidence_relationships, 1);
        assert_eq!(overview.repositories[0].repo_name, "repoA");
    }

    #[test]
    fn test_overview_empty_is_zeroes() {
        let overview = get_indexes_overview(&[]);
        assert_eq!(overview.total_repositories, 0);
        assert_eq!(overview.total_relationships, 0);
    }
}
