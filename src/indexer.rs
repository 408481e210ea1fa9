//! Indexing pipeline orchestration.
//!
//! Coordinates the full per-repository flow: scanner → budget guard →
//! (directory filter →) file pre-filter → per-file analysis → relationship
//! mapping → persisted index. Also drives batch runs over every repository
//! in the code base directory and writes the summary report.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::analyzer::analyze_file;
use crate::budget::{plan_for_tree, FilterPlan};
use crate::config::Config;
use crate::filter::{
    prefilter_files, select_directories, MAX_DIRECTORY_ENTRIES, MAX_FILES_PER_DIRECTORY,
};
use crate::mapper::{self, map_relationships};
use crate::models::{
    AnalysisMetadata, FileCandidate, FileRecord, FileSummary, FilteringStrategy, Relationship,
    RepositoryIndex,
};
use crate::oracle::{create_oracle, Oracle, OracleError};
use crate::scanner::{directory_candidates, render_restricted_listing, scan_repository};
use crate::store;

/// Run the indexing pipeline for one repository and return the built index.
///
/// Never fails on per-file trouble: degraded analyses are recorded in the
/// index metadata. Fails only on unscannable roots.
pub async fn index_repository(
    cfg: &Config,
    oracle: Arc<dyn Oracle>,
    repo_root: &Path,
    target_structure: &str,
) -> Result<RepositoryIndex> {
    let repo_name = repo_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "repository".to_string());

    let outcome = scan_repository(repo_root, &cfg.scan)?;
    info!(
        "{}: scanned {} files ({} unreadable paths skipped), tree {} bytes",
        repo_name,
        outcome.files.len(),
        outcome.unreadable_paths,
        outcome.tree.len()
    );

    let (candidates, mut strategy) =
        run_filters(cfg, oracle.as_ref(), &outcome.files, &outcome.tree, target_structure).await;

    let selected: Vec<FileRecord> = if candidates.is_empty() {
        // Zero candidates is a valid outcome: the target may simply be
        // unrelated. Analyze the full scanned set instead of failing.
        info!(
            "{}: pre-filter kept nothing; analyzing the full set of {} files",
            repo_name,
            outcome.files.len()
        );
        strategy = FilteringStrategy::FullSetFallback;
        outcome.files.clone()
    } else {
        let mut records: Vec<FileRecord> = candidates
            .iter()
            .filter_map(|c| outcome.files.iter().find(|r| r.path == c.path).cloned())
            .collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    };

    let files_before = outcome.files.len();
    let files_after = selected.len();

    let (mut summaries, mut relationships) =
        analyze_selected(cfg, oracle, repo_root, &selected, target_structure).await;

    // Persisted content must not depend on processing order.
    summaries.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    relationships.sort_by(mapper::rank);

    let degraded_files = summaries.iter().filter(|s| s.summary.is_none()).count();
    let high_confidence_relationships = relationships
        .iter()
        .filter(|r| r.confidence_score >= cfg.analysis.high_confidence_threshold)
        .count();
    let filtering_efficiency = if files_before == 0 {
        0.0
    } else {
        1.0 - (files_after as f64 / files_before as f64)
    };

    Ok(RepositoryIndex {
        repo_name,
        total_files: files_before,
        file_summaries: summaries,
        relationships,
        analysis_metadata: AnalysisMetadata {
            analysis_date: Utc::now(),
            analyzer_version: env!("CARGO_PKG_VERSION").to_string(),
            files_before_filtering: files_before,
            files_after_filtering: files_after,
            filtering_efficiency,
            filtering_strategy: strategy,
            degraded_files,
            high_confidence_relationships,
        },
    })
}

/// Run the budget guard and the appropriate filter chain.
///
/// Returns the surviving candidates and the strategy that produced them.
/// Filter failures never abort the run; they widen the candidate set.
async fn run_filters(
    cfg: &Config,
    oracle: &dyn Oracle,
    files: &[FileRecord],
    tree: &str,
    target_structure: &str,
) -> (Vec<FileCandidate>, FilteringStrategy) {
    let min_confidence = cfg.analysis.min_confidence_score;

    match plan_for_tree(tree, cfg.scan.large_repo_threshold) {
        FilterPlan::SinglePass => {
            match prefilter_files(oracle, &cfg.oracle, tree, target_structure, min_confidence, files)
                .await
            {
                Ok(candidates) => (candidates, FilteringStrategy::SinglePass),
                Err(OracleError::BudgetExceeded(e)) => {
                    // The guard sized the prompt as acceptable but the
                    // oracle disagreed; escalate to the coarser path
                    // instead of resending the oversized request.
                    warn!("single-pass pre-filter over budget, escalating to two-stage: {e}");
                    two_stage(cfg, oracle, files, tree, target_structure).await
                }
                Err(e) => {
                    warn!("pre-filter failed, falling back to full file set: {e}");
                    (Vec::new(), FilteringStrategy::SinglePass)
                }
            }
        }
        FilterPlan::TwoStage => two_stage(cfg, oracle, files, tree, target_structure).await,
    }
}

async fn two_stage(
    cfg: &Config,
    oracle: &dyn Oracle,
    files: &[FileRecord],
    tree: &str,
    target_structure: &str,
) -> (Vec<FileCandidate>, FilteringStrategy) {
    let dir_candidates = directory_candidates(files, MAX_DIRECTORY_ENTRIES);
    let listing = match select_directories(oracle, &cfg.oracle, &dir_candidates, target_structure)
        .await
    {
        Some(selected) => {
            let dirs: Vec<String> = selected.into_iter().map(|d| d.path).collect();
            render_restricted_listing(files, &dirs, MAX_FILES_PER_DIRECTORY)
        }
        // No usable directory shortlist: stage 2 sees the full tree.
        None => tree.to_string(),
    };

    match prefilter_files(
        oracle,
        &cfg.oracle,
        &listing,
        target_structure,
        cfg.analysis.min_confidence_score,
        files,
    )
    .await
    {
        Ok(candidates) => (candidates, FilteringStrategy::TwoStage),
        Err(e) => {
            warn!("two-stage pre-filter failed, falling back to full file set: {e}");
            (Vec::new(), FilteringStrategy::TwoStage)
        }
    }
}

/// Analyze the selected files and map their relationships.
///
/// Sequential by default, paced by `request_delay_ms`. With concurrency
/// enabled, at most `max_concurrent_files` files are in flight and results
/// are appended to shared accumulators; membership never depends on
/// completion order.
async fn analyze_selected(
    cfg: &Config,
    oracle: Arc<dyn Oracle>,
    repo_root: &Path,
    selected: &[FileRecord],
    target_structure: &str,
) -> (Vec<FileSummary>, Vec<Relationship>) {
    let delay = Duration::from_millis(cfg.analysis.request_delay_ms);

    if !cfg.analysis.enable_concurrent_analysis {
        let mut summaries = Vec::with_capacity(selected.len());
        let mut relationships = Vec::new();

        for (i, record) in selected.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                sleep(delay).await;
            }
            let (summary, rels) =
                process_file(cfg, oracle.as_ref(), repo_root, record, target_structure, delay)
                    .await;
            summaries.push(summary);
            relationships.extend(rels);
        }
        return (summaries, relationships);
    }

    let summaries = Arc::new(Mutex::new(Vec::with_capacity(selected.len())));
    let relationships = Arc::new(Mutex::new(Vec::new()));
    let semaphore = Arc::new(Semaphore::new(cfg.analysis.max_concurrent_files));
    let mut tasks = JoinSet::new();

    for record in selected {
        let cfg = cfg.clone();
        let oracle = Arc::clone(&oracle);
        let root = repo_root.to_path_buf();
        let record = record.clone();
        let target = target_structure.to_string();
        let summaries = Arc::clone(&summaries);
        let relationships = Arc::clone(&relationships);
        let semaphore = Arc::clone(&semaphore);

        tasks.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let (summary, rels) =
                process_file(&cfg, oracle.as_ref(), &root, &record, &target, delay).await;
            // Appends are atomic, so a lock poisoned by a panicked sibling
            // task still holds every result appended before the panic.
            summaries
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(summary);
            relationships
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend(rels);
        });
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!("analysis task panicked: {e}");
        }
    }

    let summaries = Arc::try_unwrap(summaries)
        .expect("accumulator still shared")
        .into_inner()
        .unwrap_or_else(|e| e.into_inner());
    let relationships = Arc::try_unwrap(relationships)
        .expect("accumulator still shared")
        .into_inner()
        .unwrap_or_else(|e| e.into_inner());
    (summaries, relationships)
}

async fn process_file(
    cfg: &Config,
    oracle: &dyn Oracle,
    repo_root: &Path,
    record: &FileRecord,
    target_structure: &str,
    delay: Duration,
) -> (FileSummary, Vec<Relationship>) {
    let content = std::fs::read_to_string(repo_root.join(&record.path)).unwrap_or_else(|e| {
        warn!("could not read {}: {e}", record.path);
        String::new()
    });

    let summary = analyze_file(oracle, &cfg.oracle, &cfg.analysis, record, &content).await;

    if summary.summary.is_some() && !delay.is_zero() {
        sleep(delay).await;
    }
    let relationships = map_relationships(
        oracle,
        &cfg.oracle,
        cfg.analysis.min_confidence_score,
        &summary,
        target_structure,
    )
    .await;

    (summary, relationships)
}

// ============ Batch runs ============

/// Index every repository under `paths.code_base`, continuing past
/// per-repository failures, and write the batch summary report.
///
/// Returns repo name → persisted index path for the successful runs.
pub async fn index_all(
    cfg: &Config,
    oracle: Arc<dyn Oracle>,
    target_structure: &str,
) -> Result<BTreeMap<String, PathBuf>> {
    let code_base = &cfg.paths.code_base;
    if !code_base.is_dir() {
        bail!("Code base path does not exist: {}", code_base.display());
    }

    let mut repos: Vec<PathBuf> = std::fs::read_dir(code_base)
        .with_context(|| format!("Failed to read code base: {}", code_base.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !n.starts_with('.'))
        })
        .collect();
    repos.sort();

    if repos.is_empty() {
        bail!("No repositories found in {}", code_base.display());
    }

    let mut output_files = BTreeMap::new();

    for repo in &repos {
        let result = index_repository(cfg, Arc::clone(&oracle), repo, target_structure).await;
        match result {
            Ok(index) => {
                // Persistence failure is fatal: a run that cannot write its
                // index must not pretend it succeeded.
                let path = store::write_index(&cfg.paths.indexes, &index)?;
                output_files.insert(index.repo_name.clone(), path);
                print_run_summary(&index);
            }
            Err(e) => {
                warn!("failed to index {}: {e}", repo.display());
            }
        }
    }

    let report = store::SummaryReport {
        indexing_completion_time: Utc::now(),
        total_repositories_processed: output_files.len(),
        output_files: output_files
            .iter()
            .map(|(k, v)| (k.clone(), v.display().to_string()))
            .collect(),
    };
    store::write_summary_report(&cfg.paths.indexes, &report)?;

    Ok(output_files)
}

/// CLI entry: index one repository or the whole code base.
pub async fn run_index(cfg: &Config, target_path: &Path, repo: Option<String>) -> Result<()> {
    let target_structure = load_target_structure(target_path)?;
    let oracle = create_oracle(&cfg.oracle)?;

    match repo {
        Some(name) => {
            let repo_root = cfg.paths.code_base.join(&name);
            let index = index_repository(cfg, oracle, &repo_root, &target_structure).await?;
            store::write_index(&cfg.paths.indexes, &index)?;
            print_run_summary(&index);
        }
        None => {
            let output = index_all(cfg, oracle, &target_structure).await?;
            println!("indexed repositories: {}", output.len());
        }
    }
    println!("ok");
    Ok(())
}

fn print_run_summary(index: &RepositoryIndex) {
    let meta = &index.analysis_metadata;
    println!("index {}", index.repo_name);
    println!("  files scanned: {}", meta.files_before_filtering);
    println!("  files analyzed: {}", meta.files_after_filtering);
    println!("  degraded: {}", meta.degraded_files);
    println!("  relationships: {}", index.relationships.len());
    println!("  filtering efficiency: {:.2}", meta.filtering_efficiency);
    println!(
        "  strategy: {}",
        serde_json::to_string(&meta.filtering_strategy)
            .unwrap_or_default()
            .trim_matches('"')
    );
}

// ============ Target structure input ============

/// Read the target project structure from a plain-text file.
///
/// When the file is a larger planning document, the file-tree block is
/// pulled out of the first fenced code block that contains tree-drawing
/// characters; otherwise the whole document is used.
pub fn load_target_structure(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read target structure file: {}", path.display()))?;

    if content.trim().is_empty() {
        bail!("Target structure file is empty: {}", path.display());
    }

    Ok(extract_file_tree(&content).unwrap_or(content))
}

/// Pull the file-tree block out of a fenced code block, if any.
pub fn extract_file_tree(content: &str) -> Option<String> {
    let mut in_fence = false;
    let mut block = String::new();

    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            if in_fence {
                if looks_like_tree(&block) {
                    return Some(block.trim_end().to_string());
                }
                block.clear();
            }
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            block.push_str(line);
            block.push('\n');
        }
    }
    None
}

fn looks_like_tree(block: &str) -> bool {
    let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();
    lines.len() >= 3
        && lines
            .iter()
            .any(|l| l.contains("├──") || l.contains("└──") || l.trim_end().ends_with('/'))
}
