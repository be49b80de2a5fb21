//! Reference resolution and path arithmetic over document ids.
//!
//! Document ids are root-relative, `/`-separated paths without `.` or `..`
//! segments. All path handling here is lexical; the filesystem is only
//! consulted to check that a candidate exists.

use crate::extract::{is_external, split_anchor};
use crate::model::{Edge, EdgeStatus, RawReference};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Normalize a root-relative filesystem path into a document id.
pub fn normalize_id(path: &Path) -> String {
    let mut segments: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => segments.push(s.to_string_lossy().to_string()),
            Component::ParentDir => {
                segments.pop();
            }
            _ => {}
        }
    }
    segments.join("/")
}

/// Directory part of a document id (`""` for top-level documents).
pub fn parent_dir(id: &str) -> &str {
    match id.rfind('/') {
        Some(idx) => &id[..idx],
        None => "",
    }
}

/// Final path segment.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Join `path` onto `base_dir` lexically.
///
/// Returns `None` when the result would climb above the root or is empty.
pub fn join_normalized(base_dir: &str, path: &str) -> Option<String> {
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Path from directory `from_dir` to document `target`, both ids.
pub fn relative_path(from_dir: &str, target: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();

    // Never let the file name itself count as a shared directory
    let dir_len = to.len().saturating_sub(1);
    let common = from
        .iter()
        .zip(to.iter().take(dir_len))
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend(&to[common..]);
    parts.join("/")
}

/// Resolves raw references against a corpus root
#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
}

impl Resolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Resolver { root: root.into() }
    }

    /// Classify one reference.
    pub fn resolve(&self, reference: &RawReference) -> Edge {
        let raw = reference.raw_text.trim();

        if is_external(raw) {
            return Edge {
                reference: reference.clone(),
                to: None,
                status: EdgeStatus::External,
            };
        }

        let (path, _) = split_anchor(raw);
        if path.is_empty() {
            // Intra-document anchor
            return Edge {
                reference: reference.clone(),
                to: Some(reference.source_doc_id.clone()),
                status: EdgeStatus::Valid,
            };
        }

        let to = self.locate(&reference.source_doc_id, path);
        let status = if to.is_some() {
            EdgeStatus::Valid
        } else {
            EdgeStatus::Broken
        };

        debug!(
            source = %reference.source_doc_id,
            line = reference.line_number,
            raw = %reference.raw_text,
            target = ?to,
            "resolved reference"
        );

        Edge {
            reference: reference.clone(),
            to,
            status,
        }
    }

    /// Find the document id an anchor-free path refers to from `source_id`.
    ///
    /// Absolute paths are taken from the corpus root. Anything else is tried
    /// relative to the source document's directory first, then relative to
    /// the root. The first candidate that exists on disk wins.
    pub fn locate(&self, source_id: &str, path: &str) -> Option<String> {
        let path = path.trim();
        let candidates = match path.strip_prefix('/') {
            Some(stripped) => vec![join_normalized("", stripped)],
            None => vec![
                join_normalized(parent_dir(source_id), path),
                join_normalized("", path),
            ],
        };

        candidates
            .into_iter()
            .flatten()
            .find(|id| self.exists(id))
    }

    /// True when `id` names an existing file or directory under the root.
    pub fn exists(&self, id: &str) -> bool {
        self.root.join(id).exists()
    }
}
