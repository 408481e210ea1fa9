//! Repository scanner: walks a reference repository and produces the file
//! inventory plus the serialized tree used as the filtering prompt payload.
//!
//! Scanning is a pure read: unreadable paths are counted and skipped, never
//! fatal to the run.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::models::{DirectoryCandidate, FileRecord};

/// Result of scanning one repository.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Accepted files, ordered by relative path.
    pub files: Vec<FileRecord>,
    /// Indented directory/file tree of the accepted files.
    pub tree: String,
    /// Paths that could not be read or stat'ed.
    pub unreadable_paths: u64,
}

pub fn scan_repository(root: &Path, cfg: &ScanConfig) -> Result<ScanOutcome> {
    if !root.is_dir() {
        bail!("Repository root does not exist: {}", root.display());
    }

    let skip_set = build_skip_set(&cfg.skip_directories)?;
    let extensions: Vec<String> = cfg
        .supported_extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    let mut files = Vec::new();
    let mut unreadable: u64 = 0;

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !name.starts_with('.') && !skip_set.is_match(name.as_ref())
    });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => {
                unreadable += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let extension = match path.extension() {
            Some(ext) => ext.to_string_lossy().to_ascii_lowercase(),
            None => continue,
        };
        if !extensions.iter().any(|e| e == &extension) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(_) => {
                unreadable += 1;
                continue;
            }
        };
        if metadata.len() > cfg.max_file_size {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        files.push(FileRecord {
            path: rel_str,
            size_bytes: metadata.len(),
            extension,
            last_modified: modified_time(&metadata),
        });
    }

    // Sort for deterministic ordering; the tree (and therefore the budget
    // decision) must not depend on walk order.
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string());
    let tree = render_tree(&files, &root_name);

    Ok(ScanOutcome {
        files,
        tree,
        unreadable_paths: unreadable,
    })
}

fn modified_time(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    let modified = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let secs = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn build_skip_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ============ Tree serialization ============

#[derive(Default)]
struct TreeNode {
    dirs: BTreeMap<String, TreeNode>,
    files: Vec<String>,
}

/// Serialize the accepted files as an indented tree.
///
/// Two spaces per depth level, directories suffixed with `/`, children
/// sorted name-ascending. Deterministic for a given file set.
pub fn render_tree(files: &[FileRecord], root_name: &str) -> String {
    let mut root = TreeNode::default();
    for record in files {
        let mut node = &mut root;
        let parts: Vec<&str> = record.path.split('/').collect();
        for part in &parts[..parts.len() - 1] {
            node = node.dirs.entry(part.to_string()).or_default();
        }
        node.files.push(parts[parts.len() - 1].to_string());
    }

    let mut out = format!("{}/\n", root_name);
    render_node(&root, 1, &mut out);
    out
}

fn render_node(node: &TreeNode, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for (name, child) in &node.dirs {
        out.push_str(&format!("{}{}/\n", indent, name));
        render_node(child, depth + 1, out);
    }
    let mut files = node.files.clone();
    files.sort();
    for name in files {
        out.push_str(&format!("{}{}\n", indent, name));
    }
}

// ============ Directory candidates (stage-1 payload) ============

/// Collect directories up to depth 2, annotated with the number of code
/// files beneath each, for the stage-1 directory filter.
///
/// Ordered by descending file count (then path) and capped at `max_entries`.
pub fn directory_candidates(files: &[FileRecord], max_entries: usize) -> Vec<DirectoryCandidate> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();

    for record in files {
        let parts: Vec<&str> = record.path.split('/').collect();
        if parts.len() >= 2 {
            *counts.entry(parts[0].to_string()).or_default() += 1;
        }
        if parts.len() >= 3 {
            *counts
                .entry(format!("{}/{}", parts[0], parts[1]))
                .or_default() += 1;
        }
    }

    let mut candidates: Vec<DirectoryCandidate> = counts
        .into_iter()
        .map(|(path, code_file_count)| DirectoryCandidate {
            path,
            code_file_count,
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.code_file_count
            .cmp(&a.code_file_count)
            .then(a.path.cmp(&b.path))
    });
    candidates.truncate(max_entries);
    candidates
}

/// List the files under the selected directories, grouped per directory and
/// capped at `per_dir_cap` entries each. Full relative paths are listed so
/// the oracle can echo them back verbatim.
pub fn render_restricted_listing(
    files: &[FileRecord],
    directories: &[String],
    per_dir_cap: usize,
) -> String {
    let mut out = String::new();
    for dir in directories {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut listed = 0;
        let mut header_written = false;
        for record in files {
            if !record.path.starts_with(&prefix) {
                continue;
            }
            if !header_written {
                out.push_str(&format!("{}\n", prefix));
                header_written = true;
            }
            if listed >= per_dir_cap {
                out.push_str("  ...\n");
                break;
            }
            out.push_str(&format!("  {}\n", record.path));
            listed += 1;
        }
    }
    out
}
