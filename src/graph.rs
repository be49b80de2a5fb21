//! Dependency graph construction and analysis.
//!
//! The graph only follows Valid edges between scanned documents. Broken and
//! external edges stay in the edge list for reporting but never become
//! adjacency entries, so every neighbor is also a key.

use crate::model::{Cycle, DocumentNode, Edge, EdgeStatus};
use crate::resolve::Resolver;
use ahash::AHashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Two-hop dependency count above which a document is flagged
pub const DEEP_CHAIN_THRESHOLD: usize = 10;

static NO_NEIGHBORS: BTreeSet<String> = BTreeSet::new();

/// Resolve every raw reference of every node, in document order.
pub fn build_edges(nodes: &[DocumentNode], resolver: &Resolver) -> Vec<Edge> {
    nodes
        .iter()
        .flat_map(|node| node.raw_references.iter())
        .map(|reference| resolver.resolve(reference))
        .collect()
}

/// Set-of-neighbors view over Valid edges
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyGraph {
    adjacency: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Every scanned node becomes a key; duplicate edges collapse, and
    /// self-references and targets outside the scanned set are dropped.
    pub fn build(nodes: &[DocumentNode], edges: &[Edge]) -> Self {
        let mut adjacency: BTreeMap<String, BTreeSet<String>> = nodes
            .iter()
            .map(|n| (n.id.clone(), BTreeSet::new()))
            .collect();

        for edge in edges {
            if edge.status != EdgeStatus::Valid {
                continue;
            }
            let Some(to) = &edge.to else {
                continue;
            };
            if to == edge.from() || !adjacency.contains_key(to) {
                continue;
            }
            if let Some(targets) = adjacency.get_mut(edge.from()) {
                targets.insert(to.clone());
            }
        }

        DependencyGraph { adjacency }
    }

    /// Node ids in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.adjacency.keys().map(String::as_str)
    }

    pub fn neighbors(&self, id: &str) -> &BTreeSet<String> {
        self.adjacency.get(id).unwrap_or(&NO_NEIGHBORS)
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Distinct (from, to) pairs.
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum()
    }
}

/// Find cycles with a depth-first search that tracks the current path.
///
/// Roots and neighbors are visited in ascending id order, so an unchanged
/// graph always yields the same list. Each back edge to a node on the path
/// reports the path slice from that node; overlapping cycles are reported
/// separately.
pub fn find_cycles(graph: &DependencyGraph) -> Vec<Cycle> {
    let mut cycles = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();

    for start in graph.nodes() {
        if !visited.insert(start) {
            continue;
        }

        let mut path: Vec<&str> = vec![start];
        let mut on_path: HashSet<&str> = HashSet::from([start]);
        let mut frames = vec![graph.neighbors(start).iter()];

        while let Some(frame) = frames.last_mut() {
            match frame.next() {
                Some(next) => {
                    let next = next.as_str();
                    if on_path.contains(next) {
                        if let Some(pos) = path.iter().position(|n| *n == next) {
                            cycles.push(Cycle {
                                nodes: path[pos..].iter().map(|n| n.to_string()).collect(),
                            });
                        }
                    } else if visited.insert(next) {
                        path.push(next);
                        on_path.insert(next);
                        frames.push(graph.neighbors(next).iter());
                    }
                }
                None => {
                    frames.pop();
                    if let Some(done) = path.pop() {
                        on_path.remove(done);
                    }
                }
            }
        }
    }

    cycles
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Ranked {
    pub id: String,
    pub degree: usize,
}

/// Degree-based rankings over the Valid-edge graph
#[derive(Serialize, Debug, Clone, Default)]
pub struct Centrality {
    pub in_degree: BTreeMap<String, usize>,
    pub out_degree: BTreeMap<String, usize>,
    /// Highest in-degree first
    pub most_depended_upon: Vec<Ranked>,
    /// Highest out-degree first
    pub most_dependent: Vec<Ranked>,
    /// No edges in either direction
    pub isolated: Vec<String>,
    /// Never referenced, but referencing others
    pub orphaned: Vec<String>,
}

pub fn centrality(graph: &DependencyGraph) -> Centrality {
    let mut in_degree: BTreeMap<String, usize> =
        graph.nodes().map(|id| (id.to_string(), 0)).collect();
    let mut out_degree = BTreeMap::new();

    for id in graph.nodes() {
        let targets = graph.neighbors(id);
        out_degree.insert(id.to_string(), targets.len());
        for target in targets {
            if let Some(count) = in_degree.get_mut(target) {
                *count += 1;
            }
        }
    }

    let mut isolated = Vec::new();
    let mut orphaned = Vec::new();
    for (id, &incoming) in &in_degree {
        let outgoing = out_degree.get(id).copied().unwrap_or(0);
        if incoming == 0 && outgoing == 0 {
            isolated.push(id.clone());
        } else if incoming == 0 {
            orphaned.push(id.clone());
        }
    }

    Centrality {
        most_depended_upon: rank(&in_degree),
        most_dependent: rank(&out_degree),
        in_degree,
        out_degree,
        isolated,
        orphaned,
    }
}

/// Non-zero degrees, highest first, ties by ascending id.
fn rank(degrees: &BTreeMap<String, usize>) -> Vec<Ranked> {
    let mut ranked: Vec<Ranked> = degrees
        .iter()
        .filter(|(_, &d)| d > 0)
        .map(|(id, &degree)| Ranked {
            id: id.clone(),
            degree,
        })
        .collect();
    ranked.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.id.cmp(&b.id)));
    ranked
}

/// A structurally suspicious document
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hotspot {
    /// More than half of the document's internal references are broken
    HighBrokenRatio {
        id: String,
        total: usize,
        broken: usize,
        ratio: f64,
    },
    /// The document reaches many others within two hops
    DeepDependencyChain {
        id: String,
        direct: usize,
        indirect: usize,
    },
}

pub fn hotspots(graph: &DependencyGraph, edges: &[Edge]) -> Vec<Hotspot> {
    let mut counts: AHashMap<&str, (usize, usize)> = AHashMap::new();
    for edge in edges {
        if edge.status == EdgeStatus::External {
            continue;
        }
        let entry = counts.entry(edge.from()).or_insert((0, 0));
        entry.0 += 1;
        if edge.is_broken() {
            entry.1 += 1;
        }
    }

    let mut found = Vec::new();
    for id in graph.nodes() {
        if let Some(&(total, broken)) = counts.get(id) {
            if total > 0 && broken * 2 > total {
                found.push(Hotspot::HighBrokenRatio {
                    id: id.to_string(),
                    total,
                    broken,
                    ratio: broken as f64 / total as f64,
                });
            }
        }

        let direct = graph.neighbors(id);
        let indirect: BTreeSet<&str> = direct
            .iter()
            .flat_map(|n| graph.neighbors(n).iter())
            .map(String::as_str)
            .filter(|n| *n != id)
            .collect();
        if indirect.len() > DEEP_CHAIN_THRESHOLD {
            found.push(Hotspot::DeepDependencyChain {
                id: id.to_string(),
                direct: direct.len(),
                indirect: indirect.len(),
            });
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RawReference, RefKind};

    fn node(id: &str) -> DocumentNode {
        DocumentNode::new(id.to_string(), Vec::new())
    }

    fn edge(from: &str, to: Option<&str>, status: EdgeStatus) -> Edge {
        Edge {
            reference: RawReference {
                source_doc_id: from.to_string(),
                line_number: 1,
                column: 0,
                raw_text: to.unwrap_or("missing.md").to_string(),
                kind: RefKind::MarkdownLink,
            },
            to: to.map(str::to_string),
            status,
        }
    }

    fn graph(ids: &[&str], links: &[(&str, &str)]) -> DependencyGraph {
        let nodes: Vec<_> = ids.iter().map(|id| node(id)).collect();
        let edges: Vec<_> = links
            .iter()
            .map(|(a, b)| edge(a, Some(*b), EdgeStatus::Valid))
            .collect();
        DependencyGraph::build(&nodes, &edges)
    }

    #[test]
    fn test_adjacency_only_holds_scanned_valid_targets() {
        let nodes = vec![node("a.md"), node("b.md")];
        let edges = vec![
            edge("a.md", Some("b.md"), EdgeStatus::Valid),
            edge("a.md", Some("b.md"), EdgeStatus::Valid),
            edge("a.md", Some("a.md"), EdgeStatus::Valid),
            edge("a.md", Some("scripts/run.sh"), EdgeStatus::Valid),
            edge("a.md", None, EdgeStatus::Broken),
            edge("b.md", None, EdgeStatus::External),
        ];
        let graph = DependencyGraph::build(&nodes, &edges);

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        for id in graph.nodes() {
            for target in graph.neighbors(id) {
                assert!(graph.nodes().any(|n| n == target));
            }
        }
    }

    #[test]
    fn test_two_node_cycle() {
        let g = graph(&["a.md", "b.md"], &[("a.md", "b.md"), ("b.md", "a.md")]);
        let cycles = find_cycles(&g);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].nodes, vec!["a.md", "b.md"]);
        assert_eq!(cycles[0].closed_path(), vec!["a.md", "b.md", "a.md"]);
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let g = graph(
            &["a.md", "b.md", "c.md"],
            &[("a.md", "b.md"), ("b.md", "c.md"), ("a.md", "c.md")],
        );
        assert!(find_cycles(&g).is_empty());
    }

    #[test]
    fn test_overlapping_cycles_reported_independently() {
        let g = graph(
            &["a.md", "b.md", "c.md"],
            &[("a.md", "b.md"), ("b.md", "a.md"), ("b.md", "c.md"), ("c.md", "a.md")],
        );
        let cycles = find_cycles(&g);
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].nodes, vec!["a.md", "b.md"]);
        assert_eq!(cycles[1].nodes, vec!["a.md", "b.md", "c.md"]);
        for cycle in &cycles {
            let unique: HashSet<_> = cycle.nodes.iter().collect();
            assert_eq!(unique.len(), cycle.nodes.len());
        }
    }

    #[test]
    fn test_cycles_are_deterministic() {
        let g = graph(
            &["d.md", "c.md", "b.md", "a.md"],
            &[("d.md", "c.md"), ("c.md", "d.md"), ("b.md", "a.md"), ("a.md", "b.md")],
        );
        let first = find_cycles(&g);
        let second = find_cycles(&g);
        assert_eq!(first, second);
        assert_eq!(first[0].nodes, vec!["a.md", "b.md"]);
        assert_eq!(first[1].nodes, vec!["c.md", "d.md"]);
    }

    #[test]
    fn test_centrality_rankings_and_ties() {
        let g = graph(
            &["a.md", "b.md", "c.md", "d.md", "e.md"],
            &[("a.md", "c.md"), ("b.md", "c.md"), ("a.md", "b.md"), ("d.md", "b.md")],
        );
        let c = centrality(&g);

        assert_eq!(c.in_degree["c.md"], 2);
        assert_eq!(c.in_degree["b.md"], 2);
        assert_eq!(c.most_depended_upon[0], Ranked { id: "b.md".to_string(), degree: 2 });
        assert_eq!(c.most_depended_upon[1], Ranked { id: "c.md".to_string(), degree: 2 });
        assert_eq!(c.most_dependent[0], Ranked { id: "a.md".to_string(), degree: 2 });
        assert_eq!(c.isolated, vec!["e.md"]);
        assert_eq!(c.orphaned, vec!["a.md", "d.md"]);
    }

    #[test]
    fn test_broken_edges_do_not_rescue_isolation() {
        let nodes = vec![node("a.md")];
        let edges = vec![
            edge("a.md", None, EdgeStatus::Broken),
            edge("a.md", None, EdgeStatus::External),
        ];
        let c = centrality(&DependencyGraph::build(&nodes, &edges));
        assert_eq!(c.isolated, vec!["a.md"]);
    }

    #[test]
    fn test_hotspots() {
        let mut ids: Vec<String> = vec!["hub.md".to_string(), "mid.md".to_string()];
        let mut links: Vec<(String, String)> = vec![("hub.md".to_string(), "mid.md".to_string())];
        for i in 0..11 {
            let leaf = format!("leaf{}.md", i);
            links.push(("mid.md".to_string(), leaf.clone()));
            ids.push(leaf);
        }
        let nodes: Vec<_> = ids.iter().map(|id| node(id)).collect();
        let mut edges: Vec<_> = links
            .iter()
            .map(|(a, b)| edge(a, Some(b.as_str()), EdgeStatus::Valid))
            .collect();
        edges.push(edge("leaf0.md", None, EdgeStatus::Broken));
        edges.push(edge("leaf0.md", None, EdgeStatus::External));

        let g = DependencyGraph::build(&nodes, &edges);
        let found = hotspots(&g, &edges);

        assert!(found.contains(&Hotspot::DeepDependencyChain {
            id: "hub.md".to_string(),
            direct: 1,
            indirect: 11,
        }));
        assert!(found.contains(&Hotspot::HighBrokenRatio {
            id: "leaf0.md".to_string(),
            total: 1,
            broken: 1,
            ratio: 1.0,
        }));
        assert_eq!(found.len(), 2);
    }
}
