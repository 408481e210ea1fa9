//! Budget-driven filtering stages.
//!
//! Stage 1 ([`select_directories`]) shortlists top-level directories of a
//! large repository; stage 2 ([`prefilter_files`]) shortlists individual
//! files with a relevance confidence. Both degrade gracefully: a filter
//! that returns nothing usable widens the next stage instead of failing
//! the run.

use log::warn;
use serde_json::Value;

use crate::config::OracleConfig;
use crate::models::{DirectoryCandidate, FileCandidate, FileRecord};
use crate::oracle::{request_json, Oracle, OracleError};

/// Stage 1 returns at most this many directories.
pub const MAX_DIRECTORIES: usize = 10;
/// Stage 1 sees at most this many directory entries.
pub const MAX_DIRECTORY_ENTRIES: usize = 100;
/// Stage 2 lists at most this many files per selected directory.
pub const MAX_FILES_PER_DIRECTORY: usize = 50;

// ============ Stage 1: directory filter ============

/// Ask the oracle to shortlist relevant directories.
///
/// Returns `None` when the oracle returns zero directories, none of the
/// returned paths are known, or the call fails outright — the caller then
/// runs stage 2 over the full file list instead.
pub async fn select_directories(
    oracle: &dyn Oracle,
    cfg: &OracleConfig,
    candidates: &[DirectoryCandidate],
    target_structure: &str,
) -> Option<Vec<DirectoryCandidate>> {
    let listing: String = candidates
        .iter()
        .map(|c| format!("{} ({} code files)\n", c.path, c.code_file_count))
        .collect();
    let prompt = directory_filter_prompt(&listing, target_structure);

    let paths = match request_json(oracle, cfg, &prompt, parse_directory_selection).await {
        Ok((paths, _)) => paths,
        Err(e) => {
            warn!("directory filter failed, falling back to full file list: {e}");
            return None;
        }
    };

    let mut selected: Vec<DirectoryCandidate> = paths
        .iter()
        .filter_map(|p| {
            let p = p.trim_matches('/');
            candidates.iter().find(|c| c.path == p).cloned()
        })
        .collect();
    selected.truncate(MAX_DIRECTORIES);

    if selected.is_empty() {
        warn!("directory filter selected no known directories, falling back to full file list");
        None
    } else {
        Some(selected)
    }
}

fn directory_filter_prompt(listing: &str, target_structure: &str) -> String {
    format!(
        "Shortlist the directories of a reference repository that are most \
relevant to a target project.\n\n\
Reference repository directories (depth <= 2, with contained code file counts):\n\
{listing}\n\
Target project structure:\n{target_structure}\n\n\
Respond with a JSON object in this format:\n\
{{\n\
  \"relevant_directories\": [\"dir\", \"dir/subdir\"],\n\
  \"reasoning\": \"short explanation of the selection\"\n\
}}\n\n\
Select at most {MAX_DIRECTORIES} directories. Use the directory paths exactly as listed."
    )
}

fn parse_directory_selection(value: &Value) -> Result<Vec<String>, OracleError> {
    let dirs = value
        .get("relevant_directories")
        .and_then(|d| d.as_array())
        .ok_or_else(|| OracleError::Malformed("missing relevant_directories array".to_string()))?;

    Ok(dirs
        .iter()
        .filter_map(|d| d.as_str())
        .map(|d| d.to_string())
        .collect())
}

// ============ Stage 2: file pre-filter ============

/// Ask the oracle to shortlist relevant files from `listing`.
///
/// The returned candidates are already confidence-thresholded and resolved
/// against the scanned records; unknown paths are dropped. Zero surviving
/// candidates is a valid outcome — the caller falls back to the full file
/// set. A [`OracleError::BudgetExceeded`] propagates so the pipeline can
/// escalate to the two-stage path.
pub async fn prefilter_files(
    oracle: &dyn Oracle,
    cfg: &OracleConfig,
    listing: &str,
    target_structure: &str,
    min_confidence: f64,
    records: &[FileRecord],
) -> Result<Vec<FileCandidate>, OracleError> {
    let prompt = file_prefilter_prompt(listing, target_structure, min_confidence);
    let (candidates, _) = request_json(oracle, cfg, &prompt, parse_file_candidates).await?;

    let thresholded = apply_confidence_threshold(candidates, min_confidence);
    Ok(resolve_candidates(thresholded, records))
}

fn file_prefilter_prompt(listing: &str, target_structure: &str, min_confidence: f64) -> String {
    format!(
        "Shortlist the reference files most likely to help implement the \
target project.\n\n\
Reference files:\n{listing}\n\
Target project structure:\n{target_structure}\n\n\
Respond with a JSON object in this format:\n\
{{\n\
  \"relevant_files\": [\n\
    {{\n\
      \"path\": \"exact/relative/path.py\",\n\
      \"relevance_reason\": \"why this file is relevant\",\n\
      \"confidence\": 0.0,\n\
      \"expected_contribution\": \"what this file should contribute\"\n\
    }}\n\
  ]\n\
}}\n\n\
Only include files with confidence above {min_confidence}. Use file paths \
exactly as listed. An empty list is a valid answer when nothing is relevant."
    )
}

fn parse_file_candidates(value: &Value) -> Result<Vec<FileCandidate>, OracleError> {
    let files = value
        .get("relevant_files")
        .and_then(|f| f.as_array())
        .ok_or_else(|| OracleError::Malformed("missing relevant_files array".to_string()))?;

    let mut candidates = Vec::with_capacity(files.len());
    for item in files {
        let path = item
            .get("path")
            .and_then(|p| p.as_str())
            .ok_or_else(|| OracleError::Malformed("candidate missing path".to_string()))?;
        let confidence = item
            .get("confidence")
            .and_then(|c| c.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        candidates.push(FileCandidate {
            path: path.trim_matches('/').to_string(),
            relevance_reason: str_field(item, "relevance_reason"),
            confidence,
            expected_contribution: str_field(item, "expected_contribution"),
        });
    }
    Ok(candidates)
}

fn str_field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Drop candidates below the confidence threshold. Monotone: re-applying
/// the same threshold to an already-filtered set is a no-op.
pub fn apply_confidence_threshold(
    candidates: Vec<FileCandidate>,
    min_confidence: f64,
) -> Vec<FileCandidate> {
    candidates
        .into_iter()
        .filter(|c| c.confidence >= min_confidence)
        .collect()
}

/// Keep only candidates whose path resolves to a scanned record.
fn resolve_candidates(candidates: Vec<FileCandidate>, records: &[FileRecord]) -> Vec<FileCandidate> {
    candidates
        .into_iter()
        .filter(|c| {
            let known = records.iter().any(|r| r.path == c.path);
            if !known {
                warn!("pre-filter returned unknown path, dropping: {}", c.path);
            }
            known
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedOracle {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(replies: &[&str]) -> Self {
            let mut replies: Vec<String> = replies.iter().map(|s| s.to_string()).collect();
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait]
    impl Oracle for ScriptedOracle {
        async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| OracleError::Transient("script exhausted".to_string()))
        }
    }

    fn fast_config() -> OracleConfig {
        OracleConfig {
            max_retries: 1,
            retry_delay_ms: 0,
            ..OracleConfig::default()
        }
    }

    fn record(path: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            size_bytes: 1,
            extension: "py".to_string(),
            last_modified: Default::default(),
        }
    }

    fn candidate(path: &str, confidence: f64) -> FileCandidate {
        FileCandidate {
            path: path.to_string(),
            relevance_reason: String::new(),
            confidence,
            expected_contribution: String::new(),
        }
    }

    #[test]
    fn test_threshold_drops_low_confidence() {
        let candidates = vec![
            candidate("a.py", 0.9),
            candidate("b.py", 0.2),
            candidate("c.py", 0.5),
        ];
        let kept = apply_confidence_threshold(candidates, 0.3);
        let paths: Vec<&str> = kept.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "c.py"]);
    }

    #[test]
    fn test_threshold_idempotent() {
        let candidates = vec![
            candidate("a.py", 0.9),
            candidate("b.py", 0.2),
            candidate("c.py", 0.5),
        ];
        let once = apply_confidence_threshold(candidates, 0.3);
        let twice = apply_confidence_threshold(once.clone(), 0.3);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_parse_candidates_clamps_confidence() {
        let value: Value = serde_json::from_str(
            r#"{"relevant_files": [{"path": "a.py", "confidence": 1.7}]}"#,
        )
        .unwrap();
        let parsed = parse_file_candidates(&value).unwrap();
        assert!((parsed[0].confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_candidates_missing_array_malformed() {
        let value: Value = serde_json::from_str(r#"{"files": []}"#).unwrap();
        assert!(matches!(
            parse_file_candidates(&value),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn test_resolve_drops_unknown_paths() {
        let records = vec![record("src/a.py")];
        let kept = resolve_candidates(
            vec![candidate("src/a.py", 0.8), candidate("ghost.py", 0.9)],
            &records,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].path, "src/a.py");
    }

    #[tokio::test]
    async fn test_prefilter_empty_list_is_valid() {
        let oracle = ScriptedOracle::new(&[r#"{"relevant_files": []}"#]);
        let records = vec![record("src/a.py")];
        let kept = prefilter_files(&oracle, &fast_config(), "src/a.py\n", "target", 0.3, &records)
            .await
            .unwrap();
        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn test_select_directories_malformed_falls_back() {
        let oracle = ScriptedOracle::new(&["not json", "still not json"]);
        let candidates = vec![DirectoryCandidate {
            path: "src".to_string(),
            code_file_count: 3,
        }];
        let selected = select_directories(&oracle, &fast_config(), &candidates, "target").await;
        assert!(selected.is_none());
    }

    #[tokio::test]
    async fn test_select_directories_keeps_known_and_caps() {
        let reply = r#"{"relevant_directories": ["src", "ghost", "docs/"], "reasoning": "r"}"#;
        let oracle = ScriptedOracle::new(&[reply]);
        let candidates = vec![
            DirectoryCandidate {
                path: "src".to_string(),
                code_file_count: 3,
            },
            DirectoryCandidate {
                path: "docs".to_string(),
                code_file_count: 1,
            },
        ];
        let selected = select_directories(&oracle, &fast_config(), &candidates, "target")
            .await
            .unwrap();
        let paths: Vec<&str> = selected.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["src", "docs"]);
    }

    #[tokio::test]
    async fn test_select_directories_zero_selection_falls_back() {
        let oracle = ScriptedOracle::new(&[r#"{"relevant_directories": []}"#]);
        let candidates = vec![DirectoryCandidate {
            path: "src".to_string(),
            code_file_count: 3,
        }];
        let selected = select_directories(&oracle, &fast_config(), &candidates, "target").await;
        assert!(selected.is_none());
    }
}
