//! JSON and markdown reports.

use crate::config::{FIX_LOG_FILE, REPORT_BASENAME};
use crate::error::{RefgraphError, Result, ScanWarning};
use crate::graph::{Hotspot, Ranked};
use crate::model::{Confidence, EdgeStatus, FixCandidate, RefKind};
use crate::pipeline::Analysis;
use crate::repair::{AmbiguousFix, AppliedFix, FailedFix, FixLog};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Examples listed per broken-reference pattern in the markdown report
const PATTERN_EXAMPLES: usize = 10;

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub documents: usize,
    pub total_references: usize,
    pub valid: usize,
    pub external: usize,
    pub broken: usize,
    pub files_with_broken: usize,
    /// Percent of all references that resolve
    pub validity_rate: f64,
    pub broken_rate: f64,
    pub avg_references_per_document: f64,
    pub cycles: usize,
    pub isolated: usize,
    pub orphaned: usize,
    pub warnings: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BrokenEntry {
    pub line: usize,
    pub raw_text: String,
    pub kind: RefKind,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryStats {
    pub documents: usize,
    pub valid: usize,
    pub external: usize,
    pub broken: usize,
}

/// Shape of a broken reference's raw text
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BrokenPattern {
    ModuleReferences,
    CommandReferences,
    ClaudeReferences,
    ScriptReferences,
    OtherReferences,
}

impl BrokenPattern {
    pub fn classify(raw: &str) -> Self {
        if raw.contains("modules/") {
            BrokenPattern::ModuleReferences
        } else if raw.contains("commands/") {
            BrokenPattern::CommandReferences
        } else if raw.contains(".claude/") {
            BrokenPattern::ClaudeReferences
        } else if raw.contains("scripts/") {
            BrokenPattern::ScriptReferences
        } else {
            BrokenPattern::OtherReferences
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            BrokenPattern::ModuleReferences => "Module References",
            BrokenPattern::CommandReferences => "Command References",
            BrokenPattern::ClaudeReferences => "Claude References",
            BrokenPattern::ScriptReferences => "Script References",
            BrokenPattern::OtherReferences => "Other References",
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PatternBucket {
    pub pattern: BrokenPattern,
    pub count: usize,
    /// (source document, raw reference)
    pub occurrences: Vec<(String, String)>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub file: String,
    pub line: usize,
    pub old: String,
    pub new: String,
    pub confidence: Confidence,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FixSummary {
    pub dry_run: bool,
    pub applied: usize,
    pub ambiguous: usize,
    pub failed: usize,
    pub files_modified: usize,
}

impl From<&FixLog> for FixSummary {
    fn from(log: &FixLog) -> Self {
        FixSummary {
            dry_run: log.dry_run,
            applied: log.applied.len(),
            ambiguous: log.ambiguous.len(),
            failed: log.failed.len(),
            files_modified: log.files_modified(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ValidationReport {
    pub generated_at: String,
    pub root: String,
    pub summary: Summary,
    pub broken_by_file: BTreeMap<String, Vec<BrokenEntry>>,
    /// Closed paths, e.g. `[a.md, b.md, a.md]`
    pub cycles: Vec<Vec<String>>,
    pub most_depended_upon: Vec<Ranked>,
    pub most_dependent: Vec<Ranked>,
    pub isolated: Vec<String>,
    pub orphaned: Vec<String>,
    pub categories: BTreeMap<String, CategoryStats>,
    pub broken_patterns: Vec<PatternBucket>,
    pub hotspots: Vec<Hotspot>,
    pub suggestions: Vec<Suggestion>,
    pub fixes: Option<FixSummary>,
    pub warnings: Vec<ScanWarning>,
}

impl ValidationReport {
    pub fn build(
        analysis: &Analysis,
        suggestions: &[FixCandidate],
        fix_log: Option<&FixLog>,
        top: usize,
    ) -> Self {
        let mut summary = Summary {
            documents: analysis.nodes.len(),
            total_references: analysis.edges.len(),
            cycles: analysis.cycles.len(),
            isolated: analysis.centrality.isolated.len(),
            orphaned: analysis.centrality.orphaned.len(),
            warnings: analysis.warnings.len(),
            ..Summary::default()
        };

        let mut categories: BTreeMap<String, CategoryStats> = BTreeMap::new();
        let mut category_of: BTreeMap<&str, String> = BTreeMap::new();
        for node in &analysis.nodes {
            categories
                .entry(node.category.to_string())
                .or_default()
                .documents += 1;
            category_of.insert(node.id.as_str(), node.category.to_string());
        }

        let mut broken_by_file: BTreeMap<String, Vec<BrokenEntry>> = BTreeMap::new();
        let mut buckets: BTreeMap<BrokenPattern, Vec<(String, String)>> = BTreeMap::new();

        for edge in &analysis.edges {
            let stats = category_of
                .get(edge.from())
                .and_then(|c| categories.get_mut(c));
            match edge.status {
                EdgeStatus::Valid => {
                    summary.valid += 1;
                    if let Some(stats) = stats {
                        stats.valid += 1;
                    }
                }
                EdgeStatus::External => {
                    summary.external += 1;
                    if let Some(stats) = stats {
                        stats.external += 1;
                    }
                }
                EdgeStatus::Broken => {
                    summary.broken += 1;
                    if let Some(stats) = stats {
                        stats.broken += 1;
                    }
                    let raw = &edge.reference.raw_text;
                    broken_by_file
                        .entry(edge.from().to_string())
                        .or_default()
                        .push(BrokenEntry {
                            line: edge.reference.line_number,
                            raw_text: raw.clone(),
                            kind: edge.reference.kind,
                        });
                    buckets
                        .entry(BrokenPattern::classify(raw))
                        .or_default()
                        .push((edge.from().to_string(), raw.clone()));
                }
            }
        }

        summary.files_with_broken = broken_by_file.len();
        if summary.total_references > 0 {
            let total = summary.total_references as f64;
            summary.validity_rate = summary.valid as f64 / total * 100.0;
            summary.broken_rate = summary.broken as f64 / total * 100.0;
        }
        if summary.documents > 0 {
            summary.avg_references_per_document =
                summary.total_references as f64 / summary.documents as f64;
        }

        let broken_patterns = buckets
            .into_iter()
            .map(|(pattern, occurrences)| PatternBucket {
                pattern,
                count: occurrences.len(),
                occurrences,
            })
            .collect();

        let suggestions = suggestions
            .iter()
            .filter(|c| c.is_applicable())
            .filter_map(|c| {
                Some(Suggestion {
                    file: c.edge.from().to_string(),
                    line: c.edge.reference.line_number,
                    old: c.edge.reference.raw_text.clone(),
                    new: c.replacement.clone()?,
                    confidence: c.confidence,
                })
            })
            .collect();

        ValidationReport {
            generated_at: Utc::now().to_rfc3339(),
            root: analysis.root.display().to_string(),
            summary,
            broken_by_file,
            cycles: analysis.cycles.iter().map(|c| c.closed_path()).collect(),
            most_depended_upon: analysis.centrality.most_depended_upon.iter().take(top).cloned().collect(),
            most_dependent: analysis.centrality.most_dependent.iter().take(top).cloned().collect(),
            isolated: analysis.centrality.isolated.clone(),
            orphaned: analysis.centrality.orphaned.clone(),
            categories,
            broken_patterns,
            hotspots: analysis.hotspots.clone(),
            suggestions,
            fixes: fix_log.map(FixSummary::from),
            warnings: analysis.warnings.clone(),
        }
    }

    /// Render the human-readable report.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let s = &self.summary;

        let _ = writeln!(md, "# Reference Validation Report\n");
        let _ = writeln!(md, "Generated: {}\n", self.generated_at);
        let _ = writeln!(md, "Root: `{}`\n", self.root);

        let _ = writeln!(md, "## Summary\n");
        let _ = writeln!(md, "- Total documents: {}", s.documents);
        let _ = writeln!(md, "- Total references: {}", s.total_references);
        let _ = writeln!(md, "- Valid internal references: {}", s.valid);
        let _ = writeln!(md, "- External references: {}", s.external);
        let _ = writeln!(md, "- Broken references: {}", s.broken);
        let _ = writeln!(md, "- Files with broken references: {}", s.files_with_broken);
        let _ = writeln!(md, "- Validity rate: {:.1}%", s.validity_rate);
        let _ = writeln!(md, "- Broken rate: {:.1}%", s.broken_rate);
        let _ = writeln!(md, "- Average references per document: {:.1}", s.avg_references_per_document);
        let _ = writeln!(md, "- Cycles: {}", s.cycles);
        let _ = writeln!(md, "- Isolated documents: {}", s.isolated);
        let _ = writeln!(md, "- Orphaned documents: {}", s.orphaned);
        let _ = writeln!(md, "- Scan warnings: {}\n", s.warnings);

        if let Some(fixes) = &self.fixes {
            let heading = if fixes.dry_run { "Fix Summary (dry run)" } else { "Fix Summary" };
            let _ = writeln!(md, "## {}\n", heading);
            let _ = writeln!(md, "- Applied: {}", fixes.applied);
            let _ = writeln!(md, "- Ambiguous: {}", fixes.ambiguous);
            let _ = writeln!(md, "- Failed: {}", fixes.failed);
            let _ = writeln!(md, "- Files modified: {}\n", fixes.files_modified);
        }

        if !self.broken_by_file.is_empty() {
            let _ = writeln!(md, "## Broken References by File\n");
            for (file, entries) in &self.broken_by_file {
                let _ = writeln!(md, "### {}\n", file);
                for entry in entries {
                    let _ = writeln!(md, "- Line {}: `{}` → `{}`", entry.line, entry.kind, entry.raw_text);
                }
                md.push('\n');
            }
        }

        if !self.cycles.is_empty() {
            let _ = writeln!(md, "## Circular Dependencies\n");
            for (i, cycle) in self.cycles.iter().enumerate() {
                let _ = writeln!(md, "{}. {}", i + 1, cycle.join(" → "));
            }
            md.push('\n');
        }

        render_ranking(&mut md, "Most Referenced Documents", "Referenced by", &self.most_depended_upon);
        render_ranking(&mut md, "Most Dependent Documents", "References", &self.most_dependent);

        render_list(&mut md, "Isolated Documents", &self.isolated);
        render_list(&mut md, "Orphaned Documents", &self.orphaned);

        if !self.categories.is_empty() {
            let _ = writeln!(md, "## Categories\n");
            let _ = writeln!(md, "| Category | Documents | Valid | External | Broken |");
            let _ = writeln!(md, "|---|---:|---:|---:|---:|");
            for (name, stats) in &self.categories {
                let _ = writeln!(
                    md,
                    "| {} | {} | {} | {} | {} |",
                    name, stats.documents, stats.valid, stats.external, stats.broken
                );
            }
            md.push('\n');
        }

        if !self.broken_patterns.is_empty() {
            let _ = writeln!(md, "## Pattern Analysis\n");
            for bucket in &self.broken_patterns {
                let _ = writeln!(md, "### {}\n", bucket.pattern.title());
                for (file, raw) in bucket.occurrences.iter().take(PATTERN_EXAMPLES) {
                    let _ = writeln!(md, "- {}: `{}`", file, raw);
                }
                if bucket.count > PATTERN_EXAMPLES {
                    let _ = writeln!(md, "- ... and {} more", bucket.count - PATTERN_EXAMPLES);
                }
                md.push('\n');
            }
        }

        if !self.hotspots.is_empty() {
            let _ = writeln!(md, "## Hotspots\n");
            for hotspot in &self.hotspots {
                match hotspot {
                    Hotspot::HighBrokenRatio { id, total, broken, ratio } => {
                        let _ = writeln!(
                            md,
                            "- `{}`: {}/{} references broken ({:.0}%)",
                            id,
                            broken,
                            total,
                            ratio * 100.0
                        );
                    }
                    Hotspot::DeepDependencyChain { id, direct, indirect } => {
                        let _ = writeln!(
                            md,
                            "- `{}`: deep dependency chain ({} direct, {} within two hops)",
                            id, direct, indirect
                        );
                    }
                }
            }
            md.push('\n');
        }

        if !self.suggestions.is_empty() {
            let _ = writeln!(md, "## Fix Suggestions\n");
            for suggestion in &self.suggestions {
                let _ = writeln!(
                    md,
                    "- {} line {}: `{}` → `{}` ({})",
                    suggestion.file, suggestion.line, suggestion.old, suggestion.new, suggestion.confidence
                );
            }
            md.push('\n');
        }

        if !self.warnings.is_empty() {
            let _ = writeln!(md, "## Scan Warnings\n");
            for warning in &self.warnings {
                let _ = writeln!(md, "- {}: {}", warning.path, warning.message);
            }
            md.push('\n');
        }

        md
    }
}

fn render_ranking(md: &mut String, title: &str, column: &str, ranked: &[Ranked]) {
    if ranked.is_empty() {
        return;
    }
    let _ = writeln!(md, "## {}\n", title);
    let _ = writeln!(md, "| Document | {} |", column);
    let _ = writeln!(md, "|---|---:|");
    for entry in ranked {
        let _ = writeln!(md, "| `{}` | {} |", entry.id, entry.degree);
    }
    md.push('\n');
}

fn render_list(md: &mut String, title: &str, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    let _ = writeln!(md, "## {}\n", title);
    for id in ids {
        let _ = writeln!(md, "- `{}`", id);
    }
    md.push('\n');
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RefgraphError::io(parent, e))?;
    }
    fs::write(path, content).map_err(|e| RefgraphError::io(path, e))
}

/// Write `reference_validation_report.{json,md}` into `dir`.
pub fn write_reports(dir: &Path, report: &ValidationReport) -> Result<(PathBuf, PathBuf)> {
    let json_path = dir.join(format!("{}.json", REPORT_BASENAME));
    let md_path = dir.join(format!("{}.md", REPORT_BASENAME));

    write_file(&json_path, &serde_json::to_string_pretty(report)?)?;
    write_file(&md_path, &report.to_markdown())?;

    info!(dir = %dir.display(), "wrote validation reports");
    Ok((json_path, md_path))
}

/// On-disk shape of the fix log: rewrites grouped per file
#[derive(Serialize)]
struct FixLogDocument<'a> {
    generated_at: String,
    summary: FixSummary,
    files: BTreeMap<&'a str, Vec<&'a AppliedFix>>,
    ambiguous: &'a [AmbiguousFix],
    failed: &'a [FailedFix],
    backups: &'a [String],
}

pub fn write_fix_log(dir: &Path, log: &FixLog) -> Result<PathBuf> {
    let path = dir.join(FIX_LOG_FILE);
    let document = FixLogDocument {
        generated_at: Utc::now().to_rfc3339(),
        summary: FixSummary::from(log),
        files: log.by_file(),
        ambiguous: &log.ambiguous,
        failed: &log.failed,
        backups: &log.backups,
    };
    write_file(&path, &serde_json::to_string_pretty(&document)?)?;
    info!(path = %path.display(), "wrote fix log");
    Ok(path)
}
