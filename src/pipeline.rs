use crate::config::Config;
use crate::error::{Result, ScanWarning};
use crate::extract::Extractor;
use crate::graph::{build_edges, centrality, find_cycles, hotspots, Centrality, DependencyGraph, Hotspot};
use crate::model::{Cycle, DocumentNode, Edge};
use crate::resolve::Resolver;
use crate::scan::{read_documents, scan_corpus, BasenameIndex};
use rayon::ThreadPool;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Everything one pass over the corpus produces
#[derive(Debug, Clone)]
pub struct Analysis {
    pub root: PathBuf,
    pub nodes: Vec<DocumentNode>,
    pub edges: Vec<Edge>,
    pub graph: DependencyGraph,
    pub cycles: Vec<Cycle>,
    pub centrality: Centrality,
    pub hotspots: Vec<Hotspot>,
    pub warnings: Vec<ScanWarning>,
    pub basename_index: BasenameIndex,
}

impl Analysis {
    pub fn broken_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| e.is_broken())
    }

    pub fn broken_count(&self) -> usize {
        self.broken_edges().count()
    }
}

/// Scan, extract, resolve and analyze the corpus under `root`.
pub fn analyze(root: &Path, config: &Config, extractor: &Extractor, pool: &ThreadPool) -> Result<Analysis> {
    let started = Instant::now();
    debug!(rules = ?extractor.rule_names(), "extraction rules");

    let corpus = scan_corpus(root, config)?;
    let (nodes, read_warnings) = read_documents(&corpus, extractor, pool);

    let resolver = Resolver::new(root);
    let edges = build_edges(&nodes, &resolver);
    let graph = DependencyGraph::build(&nodes, &edges);
    let cycles = find_cycles(&graph);
    let centrality = centrality(&graph);
    let hotspots = hotspots(&graph, &edges);

    let mut warnings = corpus.warnings;
    warnings.extend(read_warnings);

    info!(
        documents = nodes.len(),
        references = edges.len(),
        graph_edges = graph.edge_count(),
        cycles = cycles.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "analysis complete"
    );

    Ok(Analysis {
        root: corpus.root,
        nodes,
        edges,
        graph,
        cycles,
        centrality,
        hotspots,
        warnings,
        basename_index: corpus.basename_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Confidence, EdgeStatus};
    use crate::repair::{apply, Repairer};
    use crate::scan::worker_pool;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::tempdir;

    fn corpus(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    fn run(root: &Path, config: &Config) -> Analysis {
        let extractor = Extractor::new(&config.attribute_names, &config.tag_names).unwrap();
        let pool = worker_pool(2).unwrap();
        analyze(root, config, &extractor, &pool).unwrap()
    }

    /// Plan and apply fixes, returning the fix log.
    fn fix(root: &Path, config: &Config) -> crate::repair::FixLog {
        let analysis = run(root, config);
        let resolver = Resolver::new(root);
        let extractor = Extractor::new(&config.attribute_names, &config.tag_names).unwrap();
        let repairer = Repairer::new(&resolver, &extractor, &analysis.basename_index, &config.relocations);
        let plan = repairer.plan(&analysis.edges);
        let pool = worker_pool(2).unwrap();
        apply(&plan, root, &pool, false)
    }

    fn relocating(old: &str, new: &str) -> Config {
        Config {
            relocations: BTreeMap::from([(old.to_string(), new.to_string())]),
            ..Config::default()
        }
    }

    #[test]
    fn test_relocated_link_is_fixed_and_rescan_is_clean() {
        let dir = corpus(&[("a.md", "see [b](old/b.md)"), ("new/b.md", "")]);
        let config = relocating("old/", "new/");

        let before = run(dir.path(), &config);
        let broken: Vec<&Edge> = before.broken_edges().collect();
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].from(), "a.md");
        assert_eq!(broken[0].reference.line_number, 1);

        let log = fix(dir.path(), &config);
        assert_eq!(log.applied.len(), 1);
        assert_eq!(log.applied[0].confidence, Confidence::Exact);
        assert_eq!(fs::read_to_string(dir.path().join("a.md")).unwrap(), "see [b](new/b.md)");

        assert_eq!(run(dir.path(), &config).broken_count(), 0);
    }

    #[test]
    fn test_mutual_links_form_one_cycle() {
        let dir = corpus(&[("a.md", "[b](b.md)"), ("b.md", "[a](a.md)")]);
        let analysis = run(dir.path(), &Config::default());

        assert_eq!(analysis.cycles.len(), 1);
        assert_eq!(analysis.cycles[0].nodes, vec!["a.md", "b.md"]);
        assert!(analysis.centrality.isolated.is_empty());
        assert_eq!(analysis.centrality.in_degree["a.md"], 1);
        assert_eq!(analysis.centrality.in_degree["b.md"], 1);
    }

    #[test]
    fn test_unknown_target_is_ambiguous_and_untouched() {
        let dir = corpus(&[("a.md", "[x](missing.md)")]);
        let config = Config::default();

        assert_eq!(run(dir.path(), &config).broken_count(), 1);

        let log = fix(dir.path(), &config);
        assert!(log.applied.is_empty());
        assert_eq!(log.ambiguous.len(), 1);
        assert_eq!(fs::read_to_string(dir.path().join("a.md")).unwrap(), "[x](missing.md)");
        assert!(!dir.path().join("a.md.backup").exists());
    }

    #[test]
    fn test_second_fix_run_changes_nothing() {
        let dir = corpus(&[
            ("docs/a.md", "[b](old/b.md)\n[tdd](quality/tdd.md)\nuses modules/core.md\n"),
            ("new/b.md", ""),
            ("system/quality/tdd.md", ""),
            ("modules/shared/core.md", ""),
        ]);
        let config = relocating("old/", "new/");

        let first = fix(dir.path(), &config);
        assert_eq!(first.applied.len(), 3);
        let after_first = fs::read_to_string(dir.path().join("docs/a.md")).unwrap();
        assert_eq!(
            after_first,
            "[b](../new/b.md)\n[tdd](../system/quality/tdd.md)\nuses modules/shared/core.md\n"
        );

        let second = fix(dir.path(), &config);
        assert!(second.applied.is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("docs/a.md")).unwrap(), after_first);
        assert_eq!(run(dir.path(), &config).broken_count(), 0);
    }

    #[test]
    fn test_prefixed_bare_token_is_valid() {
        let dir = corpus(&[
            (".claude/modules/core.md", ""),
            ("README.md", "load .claude/modules/core.md first"),
        ]);
        let analysis = run(dir.path(), &Config::default());

        assert_eq!(analysis.broken_count(), 0);
        assert_eq!(analysis.edges.len(), 1);
        assert_eq!(analysis.edges[0].to.as_deref(), Some(".claude/modules/core.md"));
        assert_eq!(analysis.graph.edge_count(), 1);
    }

    #[test]
    fn test_bare_token_missing_prefix_is_fixed_once() {
        let dir = corpus(&[
            (".claude/modules/core.md", ""),
            ("README.md", "load modules/core.md first"),
        ]);
        let config = Config::default();
        assert_eq!(run(dir.path(), &config).broken_count(), 1);

        let log = fix(dir.path(), &config);
        assert_eq!(log.applied.len(), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "load .claude/modules/core.md first"
        );
        assert_eq!(run(dir.path(), &config).broken_count(), 0);
        assert!(fix(dir.path(), &config).applied.is_empty());
    }

    #[test]
    fn test_duplicate_links_collapse_in_graph_but_not_in_edges() {
        let dir = corpus(&[("a.md", "[b](b.md) [again](b.md)\n[b3](./b.md#x)"), ("b.md", "")]);
        let analysis = run(dir.path(), &Config::default());

        assert_eq!(analysis.edges.len(), 3);
        assert!(analysis.edges.iter().all(|e| e.status == EdgeStatus::Valid));
        assert_eq!(analysis.graph.edge_count(), 1);
        assert_eq!(analysis.centrality.in_degree["b.md"], 1);
    }

    #[test]
    fn test_adjacency_targets_are_scanned_documents() {
        let dir = corpus(&[
            ("a.md", "[b](b.md) [run](scripts/run.sh) [gone](gone.md) [web](https://example.com)"),
            ("b.md", "[self](#top) [arch](archive/old.md)"),
            ("scripts/run.sh", ""),
            ("archive/old.md", ""),
        ]);
        let analysis = run(dir.path(), &Config::default());

        let scanned: Vec<&str> = analysis.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(scanned, vec!["a.md", "b.md"]);
        for id in analysis.graph.nodes() {
            assert!(scanned.contains(&id));
            for target in analysis.graph.neighbors(id) {
                assert!(scanned.contains(&target.as_str()));
            }
        }
        assert_eq!(analysis.graph.edge_count(), 1);
    }

    #[test]
    fn test_rewritten_reference_is_extracted_again() {
        let dir = corpus(&[
            ("commands/task.md", "<use module=\"core.md\"/>\n<canonical_source>tdd.md</canonical_source>\n"),
            ("modules/core.md", ""),
            ("system/tdd.md", ""),
        ]);
        let config = Config::default();

        let log = fix(dir.path(), &config);
        assert_eq!(log.applied.len(), 2);

        let after = run(dir.path(), &config);
        assert_eq!(after.broken_count(), 0);
        let node = after.nodes.iter().find(|n| n.id == "commands/task.md").unwrap();
        let raws: Vec<&str> = node.raw_references.iter().map(|r| r.raw_text.as_str()).collect();
        assert_eq!(raws, vec!["../modules/core.md", "../system/tdd.md"]);
    }
}
