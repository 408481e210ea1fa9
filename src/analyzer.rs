//! Per-file analysis: asks the oracle for a structured summary of one
//! scanned file.
//!
//! Analysis is never fatal to the run. A file whose retries are exhausted
//! comes back as an unanalyzed summary (`summary = None`) and is counted
//! as degraded in the index metadata.

use log::warn;
use serde_json::Value;

use crate::config::{AnalysisConfig, OracleConfig};
use crate::models::{FileRecord, FileSummary};
use crate::oracle::{request_json, Oracle, OracleError};

/// Analyze one file's content, bounded by the configured retry policy.
pub async fn analyze_file(
    oracle: &dyn Oracle,
    oracle_cfg: &OracleConfig,
    analysis_cfg: &AnalysisConfig,
    record: &FileRecord,
    content: &str,
) -> FileSummary {
    let lines_of_code = count_lines_of_code(content);
    let excerpt = truncate_content(content, analysis_cfg.max_content_length);
    let truncated = excerpt.len() < content.len();
    let prompt = analysis_prompt(&record.path, &excerpt, truncated);

    match request_json(oracle, oracle_cfg, &prompt, parse_analysis).await {
        Ok((parsed, retries)) => FileSummary {
            file_path: record.path.clone(),
            file_type: parsed.file_type,
            main_functions: parsed.main_functions,
            key_concepts: parsed.key_concepts,
            dependencies: parsed.dependencies,
            summary: Some(parsed.summary),
            lines_of_code,
            last_modified: record.last_modified,
            retries,
        },
        Err(e) => {
            warn!("analysis failed for {}, recording as unanalyzed: {e}", record.path);
            FileSummary {
                file_path: record.path.clone(),
                file_type: format!("{} file", record.extension),
                main_functions: Vec::new(),
                key_concepts: Vec::new(),
                dependencies: Vec::new(),
                summary: None,
                lines_of_code,
                last_modified: record.last_modified,
                retries: oracle_cfg.max_retries,
            }
        }
    }
}

struct ParsedAnalysis {
    file_type: String,
    main_functions: Vec<String>,
    key_concepts: Vec<String>,
    dependencies: Vec<String>,
    summary: String,
}

fn parse_analysis(value: &Value) -> Result<ParsedAnalysis, OracleError> {
    let file_type = value
        .get("file_type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| OracleError::Malformed("analysis missing file_type".to_string()))?;
    let summary = value
        .get("summary")
        .and_then(|v| v.as_str())
        .ok_or_else(|| OracleError::Malformed("analysis missing summary".to_string()))?;

    Ok(ParsedAnalysis {
        file_type: file_type.to_string(),
        main_functions: string_list(value, "main_functions"),
        key_concepts: string_list(value, "key_concepts"),
        dependencies: string_list(value, "dependencies"),
        summary: summary.to_string(),
    })
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn analysis_prompt(file_path: &str, excerpt: &str, truncated: bool) -> String {
    let marker = if truncated { "\n..." } else { "" };
    format!(
        "Analyze this code file and provide a structured summary.\n\n\
File: {file_path}\n\
Content:\n```\n{excerpt}{marker}\n```\n\n\
Respond with a JSON object in this format:\n\
{{\n\
  \"file_type\": \"description of what type of file this is\",\n\
  \"main_functions\": [\"main\", \"functions\", \"or\", \"classes\"],\n\
  \"key_concepts\": [\"important\", \"concepts\", \"algorithms\", \"patterns\"],\n\
  \"dependencies\": [\"external\", \"libraries\", \"or\", \"imports\"],\n\
  \"summary\": \"2-3 sentence summary of what this file does\"\n\
}}\n\n\
Focus on the core functionality and potential reusability."
    )
}

/// Count non-blank lines.
pub fn count_lines_of_code(content: &str) -> u64 {
    content.lines().filter(|l| !l.trim().is_empty()).count() as u64
}

/// Truncate to at most `max_chars` characters, respecting char boundaries.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}
