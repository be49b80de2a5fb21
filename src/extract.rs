//! Reference extraction.
//!
//! Every supported reference syntax is a named [`ExtractionRule`] producing
//! records of one [`RefKind`]. Line-scoped rules run per line; reference-style
//! links need the whole document because the label and its definition live on
//! different lines.

use crate::model::{RawReference, RefKind};
use regex::Regex;
use std::collections::HashMap;

pub const MARKDOWN_LINK_PATTERN: &str = r"\[([^\]]+)\]\(([^)]+)\)";
pub const REFERENCE_LINK_PATTERN: &str = r"\[([^\]]+)\]\[([^\]]+)\]";
pub const REFERENCE_DEF_PATTERN: &str = r"^\[([^\]]+)\]:\s*(.+)$";
pub const BARE_TOKEN_PATTERN: &str =
    r"(modules|patterns|quality|development|security|system|meta|prompt_eng)/[A-Za-z0-9/_-]+\.md";

const EXTERNAL_PREFIXES: [&str; 3] = ["http://", "https://", "mailto:"];

/// True for references that leave the corpus (web links, mail addresses).
pub fn is_external(raw: &str) -> bool {
    let raw = raw.trim();
    EXTERNAL_PREFIXES.iter().any(|p| raw.starts_with(p))
}

/// Split `path#anchor` into its path and optional anchor.
pub fn split_anchor(raw: &str) -> (&str, Option<&str>) {
    match raw.find('#') {
        Some(idx) => (&raw[..idx], Some(&raw[idx + 1..])),
        None => (raw, None),
    }
}

/// A single line-scoped reference syntax
struct ExtractionRule {
    name: String,
    kind: RefKind,
    pattern: Regex,
    /// Capture group holding the referenced path (0 = whole match)
    group: usize,
}

impl ExtractionRule {
    fn new(name: impl Into<String>, kind: RefKind, pattern: &str, group: usize) -> Result<Self, regex::Error> {
        Ok(ExtractionRule {
            name: name.into(),
            kind,
            pattern: Regex::new(pattern)?,
            group,
        })
    }
}

/// A match that has already produced a reference on a line
struct Claimed {
    start: usize,
    end: usize,
}

pub struct Extractor {
    /// Rules that take precedence over bare tokens, in emission order
    rules: Vec<ExtractionRule>,
    bare_token: ExtractionRule,
    reference_link: Regex,
    reference_def: Regex,
    first_attribute: Option<String>,
    first_tag: Option<String>,
}

impl Extractor {
    pub fn new(attribute_names: &[String], tag_names: &[String]) -> Result<Self, regex::Error> {
        let mut rules = vec![ExtractionRule::new(
            "markdown_link",
            RefKind::MarkdownLink,
            MARKDOWN_LINK_PATTERN,
            2,
        )?];

        for name in attribute_names {
            let pattern = format!(r#"\b{}="([^"]+)""#, regex::escape(name));
            rules.push(ExtractionRule::new(
                format!("attribute:{}", name),
                RefKind::AttributeRef,
                &pattern,
                1,
            )?);
        }

        for name in tag_names {
            let tag = regex::escape(name);
            let pattern = format!(r"<{tag}>([^<]+)</{tag}>");
            rules.push(ExtractionRule::new(
                format!("tag:{}", name),
                RefKind::TagRef,
                &pattern,
                1,
            )?);
        }

        Ok(Extractor {
            rules,
            bare_token: ExtractionRule::new("bare_token", RefKind::BareToken, BARE_TOKEN_PATTERN, 0)?,
            reference_link: Regex::new(REFERENCE_LINK_PATTERN)?,
            reference_def: Regex::new(REFERENCE_DEF_PATTERN)?,
            first_attribute: attribute_names.first().cloned(),
            first_tag: tag_names.first().cloned(),
        })
    }

    /// Names of the active rules, in precedence order.
    pub fn rule_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.iter().map(|r| r.name.as_str()).collect();
        names.insert(1, "reference_style_link");
        names.push(self.bare_token.name.as_str());
        names
    }

    /// Extract every reference from a document, ordered by position.
    pub fn extract(&self, doc_id: &str, text: &str) -> Vec<RawReference> {
        let lines: Vec<&str> = text.lines().collect();
        let mut references = Vec::new();
        let mut claimed: HashMap<usize, Vec<Claimed>> = HashMap::new();

        // Inline links, attributes and tags
        for (i, line) in lines.iter().enumerate() {
            for rule in &self.rules {
                for caps in rule.pattern.captures_iter(line) {
                    let (Some(whole), Some(path)) = (caps.get(0), caps.get(rule.group)) else {
                        continue;
                    };
                    let Some((column, raw)) = trimmed_span(line, path.start(), path.end()) else {
                        continue;
                    };
                    references.push(RawReference {
                        source_doc_id: doc_id.to_string(),
                        line_number: i + 1,
                        column,
                        raw_text: raw.to_string(),
                        kind: rule.kind,
                    });
                    claimed.entry(i).or_default().push(Claimed {
                        start: whole.start(),
                        end: whole.end(),
                    });
                }
            }
        }

        self.extract_reference_style(doc_id, &lines, &mut references, &mut claimed);

        // Bare tokens last, skipping anything already covered by another rule
        for (i, line) in lines.iter().enumerate() {
            let taken = claimed.get(&i);
            for m in self.bare_token.pattern.find_iter(line) {
                let Some(start) = bare_token_start(line, m.start()) else {
                    continue;
                };
                let covered = taken
                    .map(|spans| spans.iter().any(|c| c.start <= start && m.end() <= c.end))
                    .unwrap_or(false);
                if covered {
                    continue;
                }
                references.push(RawReference {
                    source_doc_id: doc_id.to_string(),
                    line_number: i + 1,
                    column: start,
                    raw_text: line[start..m.end()].to_string(),
                    kind: RefKind::BareToken,
                });
            }
        }

        references.sort_by(|a, b| {
            (a.line_number, a.column, a.kind).cmp(&(b.line_number, b.column, b.kind))
        });
        references
    }

    /// `[text][label]` usages, recorded where the label's definition puts the path.
    fn extract_reference_style(
        &self,
        doc_id: &str,
        lines: &[&str],
        references: &mut Vec<RawReference>,
        claimed: &mut HashMap<usize, Vec<Claimed>>,
    ) {
        // label -> (line index, column, raw path, definition line length)
        let mut definitions: HashMap<String, (usize, usize, String, usize)> = HashMap::new();
        for (i, line) in lines.iter().enumerate() {
            if let Some(caps) = self.reference_def.captures(line) {
                let (Some(label), Some(url)) = (caps.get(1), caps.get(2)) else {
                    continue;
                };
                if let Some((column, raw)) = trimmed_span(line, url.start(), url.end()) {
                    definitions
                        .entry(label.as_str().to_lowercase())
                        .or_insert((i, column, raw.to_string(), line.len()));
                }
            }
        }

        if definitions.is_empty() {
            return;
        }

        for line in lines {
            for caps in self.reference_link.captures_iter(line) {
                let Some(label) = caps.get(2) else {
                    continue;
                };
                let Some((def_line, column, raw, def_len)) =
                    definitions.get(&label.as_str().to_lowercase())
                else {
                    continue;
                };
                references.push(RawReference {
                    source_doc_id: doc_id.to_string(),
                    line_number: def_line + 1,
                    column: *column,
                    raw_text: raw.clone(),
                    kind: RefKind::ReferenceStyleLink,
                });
                claimed.entry(*def_line).or_default().push(Claimed {
                    start: 0,
                    end: *def_len,
                });
            }
        }
    }

    /// True when the rule for `kind` would capture exactly `text` again.
    ///
    /// Used before rewriting a reference so a fix can never produce text the
    /// extractor no longer recognizes.
    pub fn accepts(&self, kind: RefKind, text: &str) -> bool {
        if text.is_empty() || text.contains('\n') {
            return false;
        }

        let sample = match kind {
            RefKind::MarkdownLink => format!("[x]({})", text),
            RefKind::ReferenceStyleLink => format!("[x][ref]\n[ref]: {}", text),
            RefKind::BareToken => text.to_string(),
            RefKind::AttributeRef => match &self.first_attribute {
                Some(name) => format!("{}=\"{}\"", name, text),
                None => return false,
            },
            RefKind::TagRef => match &self.first_tag {
                Some(name) => format!("<{name}>{text}</{name}>"),
                None => return false,
            },
        };

        let found = self.extract("sample", &sample);
        found.len() == 1 && found[0].kind == kind && found[0].raw_text == text
    }
}

/// Start of the whole path a bare token belongs to.
///
/// A token like `modules/a.md` may be the tail of `.claude/modules/a.md` or
/// `../modules/a.md`; the segments written directly before it are part of the
/// reference. Returns `None` when the path sits inside a URL.
fn bare_token_start(line: &str, start: usize) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut begin = start;
    while begin > 0 && bytes[begin - 1] == b'/' {
        let segment_end = begin - 1;
        let mut segment_start = segment_end;
        while segment_start > 0 && is_path_byte(bytes[segment_start - 1]) {
            segment_start -= 1;
        }
        if segment_start == segment_end {
            break;
        }
        begin = segment_start;
    }

    if begin > 0 && bytes[begin - 1] == b'/' {
        // `scheme://host/...`
        if begin > 1 && matches!(bytes[begin - 2], b'/' | b':') {
            return None;
        }
        begin -= 1;
    }
    Some(begin)
}

fn is_path_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-')
}

/// Trim whitespace from a matched span, returning its new start and text.
fn trimmed_span(line: &str, start: usize, end: usize) -> Option<(usize, &str)> {
    let text = &line[start..end];
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let offset = text.len() - text.trim_start().len();
    Some((start + offset, trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> Extractor {
        Extractor::new(&["module".to_string()], &["canonical_source".to_string()]).unwrap()
    }

    #[test]
    fn test_markdown_link_with_anchor() {
        let refs = extractor().extract("a.md", "intro\nsee [guide](docs/guide.md#setup) now");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, RefKind::MarkdownLink);
        assert_eq!(refs[0].line_number, 2);
        assert_eq!(refs[0].raw_text, "docs/guide.md#setup");
        assert_eq!(refs[0].column, 12);
    }

    #[test]
    fn test_bare_token_inside_link_is_not_double_counted() {
        let refs = extractor().extract("a.md", "[x](modules/a.md)");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, RefKind::MarkdownLink);
        assert_eq!(refs[0].raw_text, "modules/a.md");
    }

    #[test]
    fn test_bare_token_outside_link_is_kept() {
        let refs = extractor().extract("a.md", "[x](other.md) and also modules/a.md");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].kind, RefKind::MarkdownLink);
        assert_eq!(refs[1].kind, RefKind::BareToken);
        assert_eq!(refs[1].raw_text, "modules/a.md");
        assert_eq!(refs[1].column, 23);
    }

    #[test]
    fn test_bare_token_keeps_leading_path_segments() {
        let refs = extractor().extract("a.md", "load .claude/modules/quality/tdd.md first");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].raw_text, ".claude/modules/quality/tdd.md");
        assert_eq!(refs[0].column, 5);

        let refs = extractor().extract("a.md", "see ../modules/a.md or /system/b.md");
        let raws: Vec<&str> = refs.iter().map(|r| r.raw_text.as_str()).collect();
        assert_eq!(raws, vec!["../modules/a.md", "/system/b.md"]);
    }

    #[test]
    fn test_bare_token_inside_url_is_skipped() {
        let refs = extractor().extract("a.md", "mirror at https://example.com/modules/a.md");
        assert!(refs.is_empty());
    }

    #[test]
    fn test_bare_token_prefix_inside_link_is_not_double_counted() {
        let refs = extractor().extract("a.md", "[x](.claude/modules/a.md)");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, RefKind::MarkdownLink);
    }

    #[test]
    fn test_reference_style_link_uses_definition_line() {
        let text = "Read the [guide][g] first.\n\n[g]: patterns/guide.md";
        let refs = extractor().extract("a.md", text);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, RefKind::ReferenceStyleLink);
        assert_eq!(refs[0].line_number, 3);
        assert_eq!(refs[0].column, 5);
        assert_eq!(refs[0].raw_text, "patterns/guide.md");
    }

    #[test]
    fn test_reference_style_labels_are_case_insensitive() {
        let text = "[one][Guide] and [two][guide]\n[GUIDE]: guide.md";
        let refs = extractor().extract("a.md", text);
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| r.line_number == 2 && r.raw_text == "guide.md"));
    }

    #[test]
    fn test_unused_definition_is_not_a_link() {
        let refs = extractor().extract("a.md", "[unused]: notes.md");
        assert!(refs.is_empty());
    }

    #[test]
    fn test_attribute_and_tag_references() {
        let text = "<use module=\"modules/core.md\"/>\n<canonical_source> system/quality/tdd.md </canonical_source>";
        let refs = extractor().extract("a.md", text);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].kind, RefKind::AttributeRef);
        assert_eq!(refs[0].raw_text, "modules/core.md");
        assert_eq!(refs[1].kind, RefKind::TagRef);
        assert_eq!(refs[1].raw_text, "system/quality/tdd.md");
        assert_eq!(refs[1].column, 19);
    }

    #[test]
    fn test_external_and_anchor_links_are_extracted() {
        let refs = extractor().extract("a.md", "[site](https://example.com) [top](#top)");
        assert_eq!(refs.len(), 2);
        assert!(is_external(&refs[0].raw_text));
        assert_eq!(refs[1].raw_text, "#top");
    }

    #[test]
    fn test_is_external() {
        assert!(is_external("https://example.com/a.md"));
        assert!(is_external("http://example.com"));
        assert!(is_external("mailto:someone@example.com"));
        assert!(!is_external("docs/a.md"));
        assert!(!is_external("/docs/a.md"));
    }

    #[test]
    fn test_split_anchor() {
        assert_eq!(split_anchor("a.md#intro"), ("a.md", Some("intro")));
        assert_eq!(split_anchor("#intro"), ("", Some("intro")));
        assert_eq!(split_anchor("a.md"), ("a.md", None));
    }

    #[test]
    fn test_accepts_round_trips_per_kind() {
        let ex = extractor();
        assert!(ex.accepts(RefKind::MarkdownLink, "../new/b.md#x"));
        assert!(!ex.accepts(RefKind::MarkdownLink, "a(b).md"));
        assert!(ex.accepts(RefKind::BareToken, "modules/a.md"));
        assert!(ex.accepts(RefKind::BareToken, "../modules/a.md"));
        assert!(ex.accepts(RefKind::BareToken, ".claude/modules/a.md"));
        assert!(!ex.accepts(RefKind::BareToken, ".claude/lib/a.md"));
        assert!(ex.accepts(RefKind::AttributeRef, "modules/a.md"));
        assert!(ex.accepts(RefKind::TagRef, "system/b.md"));
        assert!(ex.accepts(RefKind::ReferenceStyleLink, "docs/b.md"));
    }

    #[test]
    fn test_rule_names_in_precedence_order() {
        let ex = extractor();
        let names = ex.rule_names();
        assert_eq!(names.first(), Some(&"markdown_link"));
        assert_eq!(names.last(), Some(&"bare_token"));
        assert!(names.contains(&"tag:canonical_source"));
    }
}
