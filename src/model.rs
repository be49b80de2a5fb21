use serde::{Deserialize, Serialize};
use std::fmt;

/// Document category, derived from the path prefix
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Module,
    Command,
    Pattern,
    System,
    Other,
}

impl Category {
    /// Classify a normalized document id.
    ///
    /// A leading `.claude/` is ignored, so `.claude/modules/x.md` and
    /// `modules/x.md` land in the same bucket.
    pub fn from_id(id: &str) -> Self {
        let path = id.strip_prefix(".claude/").unwrap_or(id);
        let mut segments = path.split('/');
        let first = segments.next().unwrap_or_default();

        if path.contains("/patterns/") || first == "patterns" {
            return Category::Pattern;
        }

        match first {
            "modules" => Category::Module,
            "commands" => Category::Command,
            "system" => Category::System,
            _ => Category::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Module => "module",
            Category::Command => "command",
            Category::Pattern => "pattern",
            Category::System => "system",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Surface syntax a reference was found in
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefKind {
    MarkdownLink,
    ReferenceStyleLink,
    BareToken,
    AttributeRef,
    TagRef,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::MarkdownLink => "markdown_link",
            RefKind::ReferenceStyleLink => "reference_style_link",
            RefKind::BareToken => "bare_token",
            RefKind::AttributeRef => "attribute_ref",
            RefKind::TagRef => "tag_ref",
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference exactly as it appears in a document
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RawReference {
    pub source_doc_id: String,
    /// 1-based line holding `raw_text`
    pub line_number: usize,
    /// Byte offset of `raw_text` within its line
    pub column: usize,
    pub raw_text: String,
    pub kind: RefKind,
}

impl RawReference {
    /// Byte span of `raw_text` within its line.
    pub fn span(&self) -> (usize, usize) {
        (self.column, self.column + self.raw_text.len())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DocumentNode {
    pub id: String,
    pub category: Category,
    pub raw_references: Vec<RawReference>,
}

impl DocumentNode {
    pub fn new(id: String, raw_references: Vec<RawReference>) -> Self {
        let category = Category::from_id(&id);
        DocumentNode {
            id,
            category,
            raw_references,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStatus {
    Valid,
    External,
    Broken,
}

/// A resolved reference. `to` is the normalized target id, if any.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Edge {
    pub reference: RawReference,
    pub to: Option<String>,
    pub status: EdgeStatus,
}

impl Edge {
    pub fn from(&self) -> &str {
        &self.reference.source_doc_id
    }

    pub fn is_broken(&self) -> bool {
        self.status == EdgeStatus::Broken
    }
}

/// A closed walk through the reference graph.
///
/// `nodes` holds each member once, in traversal order; the walk closes
/// from the last node back to the first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pub nodes: Vec<String>,
}

impl Cycle {
    /// The cycle as a closed path, e.g. `[a, b, a]`.
    pub fn closed_path(&self) -> Vec<String> {
        let mut path = self.nodes.clone();
        if let Some(first) = self.nodes.first() {
            path.push(first.clone());
        }
        path
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.closed_path().join(" -> "))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Target exists after a relocation-table substitution
    Exact,
    /// Exactly one file on disk matched by basename/suffix
    Heuristic,
    /// Zero or several candidates; never applied
    Ambiguous,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::Exact => "exact",
            Confidence::Heuristic => "heuristic",
            Confidence::Ambiguous => "ambiguous",
        };
        f.write_str(s)
    }
}

/// A proposed repair for one broken edge
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FixCandidate {
    pub edge: Edge,
    /// Target document id the reference should point at
    pub suggested_target: Option<String>,
    /// Replacement text for `edge.reference.raw_text`
    pub replacement: Option<String>,
    pub confidence: Confidence,
    /// Number of on-disk candidates considered (for ambiguous reporting)
    pub candidates: Vec<String>,
}

impl FixCandidate {
    pub fn is_applicable(&self) -> bool {
        self.confidence != Confidence::Ambiguous && self.replacement.is_some()
    }
}
