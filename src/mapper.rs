//! Relationship mapping: relates one analyzed file to the target project
//! structure, and defines the ranking rule shared with the query engine.

use log::warn;
use serde_json::Value;
use std::cmp::Ordering;

use crate::config::OracleConfig;
use crate::models::{FileSummary, Relationship, RelationshipType};
use crate::oracle::{request_json, Oracle, OracleError};

/// Ask the oracle for relationships between an analyzed file and the
/// target structure.
///
/// Returns only relationships at or above `min_confidence`. Degraded
/// summaries (no analysis available) and failed calls yield an empty list;
/// mapping is never fatal to the run.
pub async fn map_relationships(
    oracle: &dyn Oracle,
    cfg: &OracleConfig,
    min_confidence: f64,
    summary: &FileSummary,
    target_structure: &str,
) -> Vec<Relationship> {
    let Some(summary_text) = &summary.summary else {
        return Vec::new();
    };

    let prompt = relationship_prompt(summary, summary_text, target_structure, min_confidence);
    let source = summary.file_path.clone();

    let relationships =
        match request_json(oracle, cfg, &prompt, |v| parse_relationships(v, &source)).await {
            Ok((rels, _)) => rels,
            Err(e) => {
                warn!("relationship mapping failed for {}: {e}", summary.file_path);
                return Vec::new();
            }
        };

    relationships
        .into_iter()
        .filter(|r| r.confidence_score >= min_confidence)
        .collect()
}

fn relationship_prompt(
    summary: &FileSummary,
    summary_text: &str,
    target_structure: &str,
    min_confidence: f64,
) -> String {
    format!(
        "Analyze the relationship between this existing code file and the \
target project structure.\n\n\
Existing file analysis:\n\
- Path: {}\n\
- Type: {}\n\
- Functions: {}\n\
- Concepts: {}\n\
- Summary: {}\n\n\
Target project structure:\n{}\n\n\
Respond with a JSON object in this format:\n\
{{\n\
  \"relationships\": [\n\
    {{\n\
      \"target_file_path\": \"path/in/target/structure\",\n\
      \"relationship_type\": \"direct_match|partial_match|reference|utility\",\n\
      \"confidence_score\": 0.0,\n\
      \"helpful_aspects\": [\"specific\", \"aspects\", \"that\", \"help\"],\n\
      \"potential_contributions\": [\"how\", \"this\", \"could\", \"contribute\"],\n\
      \"usage_suggestion\": \"how to use this file\"\n\
    }}\n\
  ]\n\
}}\n\n\
Only include relationships with confidence above {}. Leave target_file_path \
empty for a generic concept match. Focus on concrete, actionable connections.",
        summary.file_path,
        summary.file_type,
        summary.main_functions.join(", "),
        summary.key_concepts.join(", "),
        summary_text,
        target_structure,
        min_confidence,
    )
}

fn parse_relationships(value: &Value, source_path: &str) -> Result<Vec<Relationship>, OracleError> {
    let items = value
        .get("relationships")
        .and_then(|r| r.as_array())
        .ok_or_else(|| OracleError::Malformed("missing relationships array".to_string()))?;

    let mut relationships = Vec::with_capacity(items.len());
    for item in items {
        let relationship_type = match item.get("relationship_type").and_then(|t| t.as_str()) {
            Some("direct_match") => RelationshipType::DirectMatch,
            Some("partial_match") => RelationshipType::PartialMatch,
            Some("utility") => RelationshipType::Utility,
            // Unknown or missing types degrade to the weakest named match.
            _ => RelationshipType::Reference,
        };
        let confidence_score = item
            .get("confidence_score")
            .and_then(|c| c.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        relationships.push(Relationship {
            source_file_path: source_path.to_string(),
            target_file_path: item
                .get("target_file_path")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
            relationship_type,
            confidence_score,
            helpful_aspects: string_list(item, "helpful_aspects"),
            potential_contributions: string_list(item, "potential_contributions"),
            usage_suggestion: item
                .get("usage_suggestion")
                .and_then(|u| u.as_str())
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(relationships)
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

/// Ranking rule for relationships: type weight, then confidence, both
/// descending, with path tie-breaks for deterministic output.
pub fn rank(a: &Relationship, b: &Relationship) -> Ordering {
    b.relationship_type
        .weight()
        .partial_cmp(&a.relationship_type.weight())
        .unwrap_or(Ordering::Equal)
        .then(
            b.confidence_score
                .partial_cmp(&a.confidence_score)
                .unwrap_or(Ordering::Equal),
        )
        .then(a.source_file_path.cmp(&b.source_file_path))
        .then(a.target_file_path.cmp(&b.target_file_path))
}
