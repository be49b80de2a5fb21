//! Broken-reference repair.
//!
//! Repair runs in two steps. [`Repairer::plan`] is read-only: it turns every
//! broken edge into a [`FixCandidate`]. [`apply`] then rewrites files, one
//! task per file, each under an exclusive lock:
//!
//! 1. lock the file and read it completely
//! 2. replace each reference at its exact line and column
//! 3. snapshot the original to `<file>.backup` unless a backup already exists
//! 4. write the new content to a temp file and rename it over the original
//!
//! A file is either fully rewritten or left untouched.

use crate::error::{RefgraphError, Result};
use crate::extract::{split_anchor, Extractor};
use crate::model::{Confidence, Edge, FixCandidate, RefKind};
use crate::resolve::{basename, parent_dir, relative_path, Resolver};
use crate::scan::BasenameIndex;
use fs2::FileExt;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const BACKUP_SUFFIX: &str = "backup";

/// Plans fixes for broken edges
pub struct Repairer<'a> {
    resolver: &'a Resolver,
    extractor: &'a Extractor,
    index: &'a BasenameIndex,
    relocations: &'a BTreeMap<String, String>,
}

impl<'a> Repairer<'a> {
    pub fn new(
        resolver: &'a Resolver,
        extractor: &'a Extractor,
        index: &'a BasenameIndex,
        relocations: &'a BTreeMap<String, String>,
    ) -> Self {
        Repairer {
            resolver,
            extractor,
            index,
            relocations,
        }
    }

    /// One candidate per broken edge, in edge order.
    pub fn plan(&self, edges: &[Edge]) -> Vec<FixCandidate> {
        edges
            .iter()
            .filter(|e| e.is_broken())
            .map(|e| self.candidate(e))
            .collect()
    }

    fn candidate(&self, edge: &Edge) -> FixCandidate {
        let reference = &edge.reference;
        let (path, anchor) = split_anchor(reference.raw_text.trim());

        let relocated = self.relocated_targets(&reference.source_doc_id, path);
        let (confidence, candidates) = if relocated.len() == 1 {
            (Confidence::Exact, relocated)
        } else {
            let matches = self.basename_matches(path);
            if matches.len() == 1 {
                (Confidence::Heuristic, matches)
            } else {
                (Confidence::Ambiguous, matches)
            }
        };

        if confidence == Confidence::Ambiguous {
            debug!(
                source = %reference.source_doc_id,
                raw = %reference.raw_text,
                candidates = candidates.len(),
                "no unique fix"
            );
            return FixCandidate {
                edge: edge.clone(),
                suggested_target: None,
                replacement: None,
                confidence,
                candidates,
            };
        }

        let target = candidates[0].clone();
        match self.rewrite_for(edge, &target, anchor) {
            Some(replacement) => FixCandidate {
                edge: edge.clone(),
                suggested_target: Some(target),
                replacement: Some(replacement),
                confidence,
                candidates,
            },
            None => {
                // The target exists but this syntax cannot express a path to it
                debug!(
                    source = %reference.source_doc_id,
                    raw = %reference.raw_text,
                    target = %target,
                    "fix not expressible in reference syntax"
                );
                FixCandidate {
                    edge: edge.clone(),
                    suggested_target: Some(target),
                    replacement: None,
                    confidence: Confidence::Ambiguous,
                    candidates,
                }
            }
        }
    }

    /// Distinct existing targets reachable through the relocation table.
    fn relocated_targets(&self, source: &str, path: &str) -> Vec<String> {
        let mut targets = BTreeSet::new();
        for (old, new) in self.relocations {
            if old.is_empty() || !path.contains(old.as_str()) {
                continue;
            }
            let moved = path.replace(old.as_str(), new);
            if let Some(target) = self.resolver.locate(source, &moved) {
                targets.insert(target);
            }
        }
        targets.into_iter().collect()
    }

    /// Files sharing the reference's basename, narrowed by path suffix when
    /// the basename alone is not unique.
    fn basename_matches(&self, path: &str) -> Vec<String> {
        let name = basename(path);
        if name.is_empty() {
            return Vec::new();
        }

        let matches = self.index.lookup(name);
        if matches.len() <= 1 {
            return matches.to_vec();
        }

        let suffix: Vec<&str> = path
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .collect();
        if suffix.len() < 2 {
            return matches.to_vec();
        }
        let suffix = suffix.join("/");
        let tail = format!("/{}", suffix);

        let narrowed: Vec<String> = matches
            .iter()
            .filter(|id| **id == suffix || id.ends_with(&tail))
            .cloned()
            .collect();
        if narrowed.len() == 1 {
            narrowed
        } else {
            matches.to_vec()
        }
    }

    /// Replacement text pointing at `target` from the edge's source.
    ///
    /// Links use a path relative to the source document's directory. Bare
    /// tokens are written root-relative first, the way they appear in prose,
    /// then relative. A form is used only if the extractor recognizes it and
    /// it resolves back to `target`.
    fn rewrite_for(&self, edge: &Edge, target: &str, anchor: Option<&str>) -> Option<String> {
        let source = edge.from();
        let relative = relative_path(parent_dir(source), target);
        let forms = if edge.reference.kind == RefKind::BareToken {
            vec![target.to_string(), relative]
        } else {
            vec![relative]
        };

        forms.into_iter().find_map(|form| {
            let text = match anchor {
                Some(anchor) => format!("{}#{}", form, anchor),
                None => form.clone(),
            };
            let round_trips = self.extractor.accepts(edge.reference.kind, &text)
                && self.resolver.locate(source, &form).as_deref() == Some(target);
            (round_trips && text != edge.reference.raw_text).then_some(text)
        })
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AppliedFix {
    pub file: String,
    pub line: usize,
    pub old: String,
    pub new: String,
    pub confidence: Confidence,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousFix {
    pub file: String,
    pub line: usize,
    pub raw_text: String,
    pub candidates: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FailedFix {
    pub file: String,
    pub line: usize,
    pub old: String,
    pub reason: String,
}

/// Outcome of a repair pass
#[derive(Serialize, Debug, Clone, Default)]
pub struct FixLog {
    pub dry_run: bool,
    pub applied: Vec<AppliedFix>,
    pub ambiguous: Vec<AmbiguousFix>,
    pub failed: Vec<FailedFix>,
    /// Backups written during this pass
    pub backups: Vec<String>,
}

impl FixLog {
    /// Applied rewrites grouped by file.
    pub fn by_file(&self) -> BTreeMap<&str, Vec<&AppliedFix>> {
        let mut grouped: BTreeMap<&str, Vec<&AppliedFix>> = BTreeMap::new();
        for fix in &self.applied {
            grouped.entry(fix.file.as_str()).or_default().push(fix);
        }
        grouped
    }

    pub fn files_modified(&self) -> usize {
        self.by_file().len()
    }
}

/// Backup path for a file: `<file>.backup`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    path.with_file_name(name)
}

/// Apply every applicable candidate. Files are rewritten in parallel; each
/// file is handled by exactly one task.
pub fn apply(plan: &[FixCandidate], root: &Path, pool: &ThreadPool, dry_run: bool) -> FixLog {
    let mut log = FixLog {
        dry_run,
        ..FixLog::default()
    };

    let mut by_file: BTreeMap<&str, Vec<&FixCandidate>> = BTreeMap::new();
    for candidate in plan {
        if candidate.is_applicable() {
            by_file.entry(candidate.edge.from()).or_default().push(candidate);
        } else {
            log.ambiguous.push(AmbiguousFix {
                file: candidate.edge.from().to_string(),
                line: candidate.edge.reference.line_number,
                raw_text: candidate.edge.reference.raw_text.clone(),
                candidates: candidate.candidates.clone(),
            });
        }
    }

    if dry_run {
        for fixes in by_file.values() {
            log.applied.extend(dedup_fixes(fixes).into_iter().map(planned));
        }
        return log;
    }

    let files: Vec<(&str, Vec<&FixCandidate>)> = by_file.into_iter().collect();
    let outcomes: Vec<FileOutcome> = pool.install(|| {
        files
            .par_iter()
            .map(|(id, fixes)| rewrite_file(root, id, fixes))
            .collect()
    });

    for outcome in outcomes {
        log.applied.extend(outcome.applied);
        log.failed.extend(outcome.failed);
        log.backups.extend(outcome.backup);
    }
    log
}

#[derive(Default)]
struct FileOutcome {
    applied: Vec<AppliedFix>,
    failed: Vec<FailedFix>,
    backup: Option<String>,
}

fn planned(candidate: &FixCandidate) -> AppliedFix {
    AppliedFix {
        file: candidate.edge.from().to_string(),
        line: candidate.edge.reference.line_number,
        old: candidate.edge.reference.raw_text.clone(),
        new: candidate.replacement.clone().unwrap_or_default(),
        confidence: candidate.confidence,
    }
}

/// One fix per (line, column): reference-style usages share a definition.
fn dedup_fixes<'c>(fixes: &[&'c FixCandidate]) -> Vec<&'c FixCandidate> {
    let mut seen = BTreeSet::new();
    fixes
        .iter()
        .copied()
        .filter(|c| seen.insert((c.edge.reference.line_number, c.edge.reference.column)))
        .collect()
}

fn rewrite_file(root: &Path, id: &str, fixes: &[&FixCandidate]) -> FileOutcome {
    let path = root.join(id);
    let fixes = dedup_fixes(fixes);

    let fail_all = |reason: String| {
        warn!(file = %id, reason = %reason, "leaving file unmodified");
        FileOutcome {
            failed: fixes
                .iter()
                .map(|c| FailedFix {
                    file: id.to_string(),
                    line: c.edge.reference.line_number,
                    old: c.edge.reference.raw_text.clone(),
                    reason: reason.clone(),
                })
                .collect(),
            ..FileOutcome::default()
        }
    };

    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(e) => return fail_all(format!("cannot open: {}", e)),
    };
    if let Err(e) = file.lock_exclusive() {
        return fail_all(format!("cannot lock: {}", e));
    }

    let mut content = String::new();
    if let Err(e) = file.read_to_string(&mut content) {
        return fail_all(format!("cannot read: {}", e));
    }

    let mut outcome = FileOutcome::default();
    let new_content = transform(id, &content, &fixes, &mut outcome);

    if new_content != content {
        match write_with_backup(&path, &content, &new_content) {
            Ok(backup) => {
                info!(file = %id, fixes = outcome.applied.len(), "rewrote references");
                outcome.backup = backup;
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(file = %id, reason = %reason, "leaving file unmodified");
                let applied = std::mem::take(&mut outcome.applied);
                outcome.failed.extend(applied.into_iter().map(|fix| FailedFix {
                    file: fix.file,
                    line: fix.line,
                    old: fix.old,
                    reason: reason.clone(),
                }));
            }
        }
    }

    // Lock released when `file` drops
    drop(file);
    outcome
}

/// Replace each reference at its recorded position.
fn transform(id: &str, content: &str, fixes: &[&FixCandidate], outcome: &mut FileOutcome) -> String {
    let mut lines: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();

    // Right to left within a line so earlier columns stay valid
    let mut ordered: Vec<&FixCandidate> = fixes.to_vec();
    ordered.sort_by(|a, b| {
        let (ra, rb) = (&a.edge.reference, &b.edge.reference);
        ra.line_number
            .cmp(&rb.line_number)
            .then_with(|| rb.column.cmp(&ra.column))
    });

    for candidate in ordered {
        let reference = &candidate.edge.reference;
        let Some(replacement) = &candidate.replacement else {
            continue;
        };
        let (start, end) = reference.span();

        let current = reference
            .line_number
            .checked_sub(1)
            .and_then(|idx| lines.get_mut(idx));
        match current {
            Some(line) if line.get(start..end) == Some(reference.raw_text.as_str()) => {
                line.replace_range(start..end, replacement);
                outcome.applied.push(AppliedFix {
                    file: id.to_string(),
                    line: reference.line_number,
                    old: reference.raw_text.clone(),
                    new: replacement.clone(),
                    confidence: candidate.confidence,
                });
            }
            _ => outcome.failed.push(FailedFix {
                file: id.to_string(),
                line: reference.line_number,
                old: reference.raw_text.clone(),
                reason: "reference no longer at recorded position".to_string(),
            }),
        }
    }

    lines.concat()
}

/// Snapshot `original` unless a backup exists, then atomically replace the file.
fn write_with_backup(path: &Path, original: &str, new_content: &str) -> Result<Option<String>> {
    let backup = backup_path(path);
    let mut created = None;
    if !backup.exists() {
        fs::write(&backup, original).map_err(|e| RefgraphError::io(&backup, e))?;
        created = Some(backup.display().to_string());
    }

    let failure = |reason: String| RefgraphError::WriteFailure {
        path: path.to_path_buf(),
        reason,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| failure(format!("cannot create temp file: {}", e)))?;
    tmp.write_all(new_content.as_bytes())
        .map_err(|e| failure(e.to_string()))?;
    if let Ok(metadata) = fs::metadata(path) {
        // Keep the original mode instead of the temp file's 0600
        if let Err(e) = fs::set_permissions(tmp.path(), metadata.permissions()) {
            warn!(file = %path.display(), error = %e, "could not keep file mode");
        }
    }
    tmp.persist(path).map_err(|e| failure(e.error.to_string()))?;
    Ok(created)
}
