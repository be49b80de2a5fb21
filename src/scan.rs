use crate::config::Config;
use crate::error::{RefgraphError, Result, ScanWarning};
use crate::extract::Extractor;
use crate::model::DocumentNode;
use crate::resolve::{basename, normalize_id};
use ahash::AHashMap;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Every file under the root, keyed by file name
#[derive(Debug, Default, Clone)]
pub struct BasenameIndex {
    by_name: AHashMap<String, Vec<String>>,
}

impl BasenameIndex {
    pub fn insert(&mut self, id: &str) {
        self.by_name
            .entry(basename(id).to_string())
            .or_default()
            .push(id.to_string());
    }

    /// All file ids sharing `name`, sorted.
    pub fn lookup(&self, name: &str) -> &[String] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }

    fn finish(&mut self) {
        for ids in self.by_name.values_mut() {
            ids.sort();
            ids.dedup();
        }
    }
}

/// The scanned corpus: document ids plus a live index of all files
#[derive(Debug, Clone)]
pub struct Corpus {
    pub root: PathBuf,
    /// Document ids, sorted
    pub documents: Vec<String>,
    pub basename_index: BasenameIndex,
    pub warnings: Vec<ScanWarning>,
}

/// Build the bounded worker pool shared by scan and repair.
pub fn worker_pool(jobs: usize) -> Result<ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?)
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Walk the corpus root and collect document ids.
pub fn scan_corpus(root: &Path, config: &Config) -> Result<Corpus> {
    if !root.is_dir() {
        return Err(RefgraphError::InvalidRoot(root.to_path_buf()));
    }

    let ignore_set = build_ignore_set(&config.ignore)?;
    let extensions: HashSet<String> = config
        .extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .collect();

    // Never read our own reports back in
    let report_prefix = config
        .report_dir_in(root)
        .strip_prefix(root)
        .ok()
        .map(normalize_id)
        .filter(|p| !p.is_empty());

    // Build walker: only the configured globs exclude files, so .gitignore
    // and .ignore are not consulted. Dot-directories are skipped unless
    // allow-listed.
    let include_hidden = config.include_hidden.clone();
    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy();
            if is_dir && name.starts_with('.') {
                return include_hidden.iter().any(|h| h.as_str() == name.as_ref());
            }
            true
        });

    let mut documents = Vec::new();
    let mut basename_index = BasenameIndex::default();
    let mut warnings = Vec::new();

    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                warnings.push(ScanWarning {
                    path: root.display().to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let path = entry.path();
        let id = normalize_id(path.strip_prefix(root).unwrap_or(path));
        if id.is_empty() || ignore_set.is_match(&id) {
            continue;
        }
        if let Some(prefix) = &report_prefix {
            if id.starts_with(&format!("{}/", prefix)) {
                continue;
            }
        }

        basename_index.insert(&id);

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if extensions.contains(&ext) {
            documents.push(id);
        }
    }

    documents.sort();
    basename_index.finish();

    debug!(
        root = %root.display(),
        documents = documents.len(),
        files = basename_index.len(),
        "scanned corpus"
    );

    Ok(Corpus {
        root: root.to_path_buf(),
        documents,
        basename_index,
        warnings,
    })
}

/// Read and extract every document on the worker pool.
///
/// Results come back in document order. Unreadable or non-UTF-8 files yield
/// a node with no references plus a warning.
pub fn read_documents(
    corpus: &Corpus,
    extractor: &Extractor,
    pool: &ThreadPool,
) -> (Vec<DocumentNode>, Vec<ScanWarning>) {
    let results: Vec<(DocumentNode, Option<ScanWarning>)> = pool.install(|| {
        corpus
            .documents
            .par_iter()
            .map(|id| read_document(&corpus.root, id, extractor))
            .collect()
    });

    let mut nodes = Vec::with_capacity(results.len());
    let mut warnings = Vec::new();
    for (node, warning) in results {
        nodes.push(node);
        warnings.extend(warning);
    }
    (nodes, warnings)
}

fn read_document(root: &Path, id: &str, extractor: &Extractor) -> (DocumentNode, Option<ScanWarning>) {
    let text = fs::read(root.join(id))
        .map_err(|e| e.to_string())
        .and_then(|bytes| String::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_string()));

    match text {
        Ok(text) => {
            let refs = extractor.extract(id, &text);
            (DocumentNode::new(id.to_string(), refs), None)
        }
        Err(message) => {
            warn!(path = %id, reason = %message, "skipping unreadable document");
            let warning = ScanWarning {
                path: id.to_string(),
                message,
            };
            (DocumentNode::new(id.to_string(), Vec::new()), Some(warning))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_applies_default_ignores() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "a.md", b"");
        write(root, "docs/b.md", b"");
        write(root, "docs/notes.txt", b"");
        write(root, "archive/old.md", b"");
        write(root, "docs/backup-2024/c.md", b"");
        write(root, "internal/reports/reference_validation_report.md", b"");
        write(root, ".git/HEAD.md", b"");
        write(root, ".claude/modules/core.md", b"");

        let corpus = scan_corpus(root, &Config::default()).unwrap();
        assert_eq!(corpus.documents, vec![".claude/modules/core.md", "a.md", "docs/b.md"]);

        // Non-document files are still indexed for repair lookups
        assert_eq!(corpus.basename_index.lookup("notes.txt"), ["docs/notes.txt"]);
        assert!(corpus.basename_index.lookup("old.md").is_empty());
    }

    #[test]
    fn test_scan_rejects_missing_root() {
        let dir = tempdir().unwrap();
        let err = scan_corpus(&dir.path().join("nope"), &Config::default()).unwrap_err();
        assert!(matches!(err, RefgraphError::InvalidRoot(_)));
    }

    #[test]
    fn test_custom_ignore_and_extensions() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "a.md", b"");
        write(root, "b.markdown", b"");
        write(root, "drafts/c.md", b"");

        let config = Config {
            extensions: vec!["md".to_string(), ".markdown".to_string()],
            ignore: vec!["drafts/**".to_string()],
            ..Config::default()
        };
        let corpus = scan_corpus(root, &config).unwrap();
        assert_eq!(corpus.documents, vec!["a.md", "b.markdown"]);
    }

    #[test]
    fn test_gitignore_does_not_hide_documents() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, ".git/HEAD", b"ref: refs/heads/main\n");
        write(root, ".gitignore", b"drafts/\n");
        write(root, ".ignore", b"notes.md\n");
        write(root, "a.md", b"");
        write(root, "notes.md", b"");
        write(root, "drafts/c.md", b"");

        let corpus = scan_corpus(root, &Config::default()).unwrap();
        assert_eq!(corpus.documents, vec!["a.md", "drafts/c.md", "notes.md"]);
    }

    #[test]
    fn test_basename_index_collects_duplicates() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "x/readme.md", b"");
        write(root, "y/readme.md", b"");

        let corpus = scan_corpus(root, &Config::default()).unwrap();
        assert_eq!(corpus.basename_index.lookup("readme.md"), ["x/readme.md", "y/readme.md"]);
        assert_eq!(corpus.basename_index.len(), 2);
    }

    #[test]
    fn test_non_utf8_document_warns_and_continues() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "bad.md", &[0xff, 0xfe, 0x00, 0x5b]);
        write(root, "good.md", b"[x](bad.md)");

        let config = Config::default();
        let corpus = scan_corpus(root, &config).unwrap();
        let extractor = Extractor::new(&config.attribute_names, &config.tag_names).unwrap();
        let pool = worker_pool(2).unwrap();
        let (nodes, warnings) = read_documents(&corpus, &extractor, &pool);

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "bad.md");
        assert!(nodes[0].raw_references.is_empty());
        assert_eq!(nodes[1].raw_references.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].path, "bad.md");
    }
}
