use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Version stamped into every saved graph. Files carrying anything else go
/// through migration.
pub const SCHEMA_VERSION: &str = "0.7.0";

pub const EXPLORER_LABEL_PREFIX: &str = "📍 ";
pub const TARGET_LABEL_PREFIX: &str = "🎯 ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeGroup {
    Explorer,
    Hop,
    Phantom,
    Target,
    #[default]
    #[serde(other)]
    Unset,
}

impl NodeGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeGroup::Explorer => "explorer",
            NodeGroup::Hop => "hop",
            NodeGroup::Phantom => "phantom",
            NodeGroup::Target => "target",
            NodeGroup::Unset => "unset",
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, NodeGroup::Unset)
    }
}

/// How the running explorer's id was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    /// Public address reported by the lookup service
    Network,
    /// Random id generated because the lookup failed
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "NodeGroup::is_unset")]
    pub group: NodeGroup,
    #[serde(default)]
    pub fqdns: Vec<String>,
    /// Geo service document, or a `{"status": "fail"}` marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_info: Option<Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, label: impl Into<String>, group: NodeGroup) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            group,
            fqdns: Vec::new(),
            geo_info: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub latencies: Vec<f64>,
}

/// Directed `(from, to)` pair. `(a, b)` and `(b, a)` are different edges.
pub type EdgeKey = (String, String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explorer {
    pub id: String,
    pub first_seen: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<IdentitySource>,
}

/// The topology accumulated over every run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub nodes: BTreeMap<String, Node>,
    pub edges: BTreeMap<EdgeKey, Edge>,
    pub explorers: BTreeMap<String, Explorer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphSummary {
    pub nodes: usize,
    pub edges: usize,
    pub explorers: usize,
    pub latency_samples: usize,
    pub by_group: BTreeMap<NodeGroup, usize>,
    pub catalogued: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn edge(&self, from: &str, to: &str) -> Option<&Edge> {
        self.edges.get(&(from.to_string(), to.to_string()))
    }

    /// Insert a node unless one with this id exists. Returns true when created.
    pub fn ensure_node(&mut self, id: &str, label: &str, group: NodeGroup) -> bool {
        if self.nodes.contains_key(id) {
            return false;
        }
        self.nodes
            .insert(id.to_string(), Node::new(id, label, group));
        true
    }

    /// Get or create the edge `from -> to`. `label` only applies on creation.
    ///
    /// Both endpoints must already be nodes.
    pub fn ensure_edge(&mut self, from: &str, to: &str, label: Option<&str>) -> (&mut Edge, bool) {
        debug_assert!(self.nodes.contains_key(from) && self.nodes.contains_key(to));
        let key = (from.to_string(), to.to_string());
        let created = !self.edges.contains_key(&key);
        let edge = self.edges.entry(key).or_insert_with(|| Edge {
            from: from.to_string(),
            to: to.to_string(),
            label: label.map(str::to_string),
            latencies: Vec::new(),
        });
        (edge, created)
    }

    /// Record that `fqdn` resolves to node `id`. Returns true when newly added.
    pub fn add_fqdn(&mut self, id: &str, fqdn: &str) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) if !node.fqdns.iter().any(|f| f == fqdn) => {
                node.fqdns.push(fqdn.to_string());
                true
            }
            _ => false,
        }
    }

    /// Relabel the explorer and target nodes at the end of a run.
    ///
    /// Targets are this run's requested names plus every node already tagged
    /// as a target; a node matches by id or by any of its fqdns.
    pub fn finalize_labels(&mut self, explorer_id: &str, targets: &[String]) {
        if let Some(node) = self.nodes.get_mut(explorer_id) {
            node.group = NodeGroup::Explorer;
            node.label = format!("{}Explorer ({})", EXPLORER_LABEL_PREFIX, explorer_id);
        }

        let mut names: Vec<String> = targets.to_vec();
        names.extend(
            self.nodes
                .values()
                .filter(|n| n.group == NodeGroup::Target)
                .map(|n| n.label.trim_start_matches(TARGET_LABEL_PREFIX).to_string()),
        );

        for node in self.nodes.values_mut() {
            if node.group == NodeGroup::Explorer {
                continue;
            }
            let is_target = names.iter().any(|name| *name == node.id)
                || node.fqdns.iter().any(|fqdn| names.contains(fqdn));
            if is_target {
                let bare = node.label.trim_start_matches(TARGET_LABEL_PREFIX).to_string();
                node.group = NodeGroup::Target;
                node.label = format!("{}{}", TARGET_LABEL_PREFIX, bare);
            }
        }
    }

    pub fn summary(&self) -> GraphSummary {
        let mut by_group = BTreeMap::new();
        for node in self.nodes.values() {
            *by_group.entry(node.group).or_insert(0) += 1;
        }

        GraphSummary {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            explorers: self.explorers.len(),
            latency_samples: self.edges.values().map(|e| e.latencies.len()).sum(),
            by_group,
            catalogued: self.nodes.values().filter(|n| n.geo_info.is_some()).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(ids: &[&str]) -> Graph {
        let mut graph = Graph::new();
        for id in ids {
            graph.ensure_node(id, id, NodeGroup::Hop);
        }
        graph
    }

    #[test]
    fn test_ensure_node_keeps_first_label() {
        let mut graph = Graph::new();
        assert!(graph.ensure_node("10.0.0.1", "first", NodeGroup::Hop));
        assert!(!graph.ensure_node("10.0.0.1", "second", NodeGroup::Phantom));
        let node = graph.node("10.0.0.1").unwrap();
        assert_eq!(node.label, "first");
        assert_eq!(node.group, NodeGroup::Hop);
    }

    #[test]
    fn test_ensure_edge_label_only_on_creation() {
        let mut graph = graph_with(&["a", "b"]);
        let (_, created) = graph.ensure_edge("a", "b", Some("UDP (Default)"));
        assert!(created);
        let (edge, created) = graph.ensure_edge("a", "b", Some("TCP:443"));
        assert!(!created);
        assert_eq!(edge.label.as_deref(), Some("UDP (Default)"));
    }

    #[test]
    fn test_edges_are_directed() {
        let mut graph = graph_with(&["a", "b"]);
        graph.ensure_edge("a", "b", None);
        graph.ensure_edge("b", "a", None);
        assert_eq!(graph.edges.len(), 2);
    }

    #[test]
    fn test_add_fqdn_deduplicates() {
        let mut graph = graph_with(&["1.1.1.1"]);
        assert!(graph.add_fqdn("1.1.1.1", "one.one.one.one"));
        assert!(!graph.add_fqdn("1.1.1.1", "one.one.one.one"));
        assert!(!graph.add_fqdn("9.9.9.9", "quad9"));
        assert_eq!(graph.node("1.1.1.1").unwrap().fqdns, vec!["one.one.one.one"]);
    }

    #[test]
    fn test_finalize_labels_marks_explorer_and_targets() {
        let mut graph = graph_with(&["198.51.100.1", "10.0.0.1", "93.184.216.34"]);
        graph.add_fqdn("93.184.216.34", "example.com");

        graph.finalize_labels("198.51.100.1", &["example.com".to_string()]);

        let explorer = graph.node("198.51.100.1").unwrap();
        assert_eq!(explorer.group, NodeGroup::Explorer);
        assert_eq!(explorer.label, "📍 Explorer (198.51.100.1)");

        let target = graph.node("93.184.216.34").unwrap();
        assert_eq!(target.group, NodeGroup::Target);
        assert_eq!(target.label, "🎯 93.184.216.34");

        assert_eq!(graph.node("10.0.0.1").unwrap().group, NodeGroup::Hop);
    }

    #[test]
    fn test_finalize_labels_is_stable_across_runs() {
        let mut graph = graph_with(&["e", "8.8.8.8"]);
        graph.finalize_labels("e", &["8.8.8.8".to_string()]);
        graph.finalize_labels("e", &[]);
        let target = graph.node("8.8.8.8").unwrap();
        assert_eq!(target.group, NodeGroup::Target);
        assert_eq!(target.label, "🎯 8.8.8.8");
    }

    #[test]
    fn test_unknown_group_reads_as_unset() {
        let node: Node =
            serde_json::from_value(serde_json::json!({"id": "x", "group": "router"})).unwrap();
        assert_eq!(node.group, NodeGroup::Unset);
        assert!(node.fqdns.is_empty());
    }

    #[test]
    fn test_summary_counts() {
        let mut graph = graph_with(&["a", "b"]);
        graph.ensure_node("p", "p", NodeGroup::Phantom);
        graph.ensure_edge("a", "b", None).0.latencies.extend([1.0, 2.0]);
        graph.nodes.get_mut("a").unwrap().geo_info = Some(serde_json::json!({"status": "fail"}));

        let summary = graph.summary();
        assert_eq!(summary.nodes, 3);
        assert_eq!(summary.edges, 1);
        assert_eq!(summary.latency_samples, 2);
        assert_eq!(summary.by_group.get(&NodeGroup::Hop), Some(&2));
        assert_eq!(summary.by_group.get(&NodeGroup::Phantom), Some(&1));
        assert_eq!(summary.catalogued, 1);
    }
}
