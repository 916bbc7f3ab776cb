//! Loading, migrating and saving the graph document.
//!
//! The file is decoded once into a [`StoredDocument`]. A document stamped with
//! [`SCHEMA_VERSION`] is read directly; anything else is a legacy document and
//! is only touched after the operator agrees to migrate it.

use crate::error::{GraphError, Result};
use crate::geo::{ConfirmCallback, GeoCatalog};
use crate::model::{Edge, Explorer, Graph, Node, NodeGroup, SCHEMA_VERSION};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_GRAPH_PATH: &str = "network_graph.graph";

/// On-disk shape of the current schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(alias = "file_version")]
    pub schema_version: String,
    #[serde(default, deserialize_with = "readable_nodes")]
    pub nodes: Vec<Node>,
    #[serde(default, deserialize_with = "readable_edges")]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub explorers: BTreeMap<String, Explorer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl GraphDocument {
    pub fn from_graph(graph: &Graph) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            nodes: graph.nodes.values().cloned().collect(),
            edges: graph.edges.values().cloned().collect(),
            explorers: graph.explorers.clone(),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Key nodes by id and edges by `(from, to)`, dropping edges whose
    /// endpoints are not nodes.
    pub fn into_graph(self) -> Graph {
        let mut graph = Graph::new();
        for node in self.nodes {
            graph.nodes.insert(node.id.clone(), node);
        }

        let mut dropped = 0;
        for edge in self.edges {
            if graph.nodes.contains_key(&edge.from) && graph.nodes.contains_key(&edge.to) {
                graph.edges.insert((edge.from.clone(), edge.to.clone()), edge);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("Dropped {} edges with missing endpoints", dropped);
        }

        graph.explorers = self.explorers;
        graph
    }
}

/// Read a node record field by field. Only a missing or non-string `id` drops
/// it; any other field that doesn't fit falls back to its default.
pub fn read_node(value: &Value) -> Option<Node> {
    let record = value.as_object()?;
    let id = record.get("id")?.as_str()?.to_string();

    let field = |name: &str| record.get(name).filter(|v| !v.is_null()).cloned();
    let label = field("label")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let group = field("group")
        .and_then(|v| serde_json::from_value::<NodeGroup>(v).ok())
        .unwrap_or_default();
    let fqdns = match field("fqdns") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    Some(Node {
        id,
        label,
        group,
        fqdns,
        geo_info: field("geo_info"),
    })
}

fn readable_nodes<'de, D>(deserializer: D) -> std::result::Result<Vec<Node>, D::Error>
where
    D: Deserializer<'de>,
{
    let records = Vec::<Value>::deserialize(deserializer)?;
    let nodes: Vec<Node> = records.iter().filter_map(read_node).collect();
    if nodes.len() < records.len() {
        debug!("Skipped {} node records without an id", records.len() - nodes.len());
    }
    Ok(nodes)
}

// A bad edge record costs that edge only, never the document
fn readable_edges<'de, D>(deserializer: D) -> std::result::Result<Vec<Edge>, D::Error>
where
    D: Deserializer<'de>,
{
    let records = Vec::<Value>::deserialize(deserializer)?;
    let edges: Vec<Edge> = records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<Edge>(record) {
            Ok(edge) => Some(edge),
            Err(e) => {
                debug!("Skipping unreadable edge record: {}", e);
                None
            }
        })
        .collect();
    Ok(edges)
}

/// A graph file decoded just far enough to know how to read it.
#[derive(Debug, Clone)]
pub enum StoredDocument {
    Current(GraphDocument),
    Legacy {
        version: Option<String>,
        body: Map<String, Value>,
    },
}

impl StoredDocument {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(body) = value else {
            return Err(GraphError::Malformed("top level is not an object".to_string()));
        };

        let version = body
            .get("schema_version")
            .or_else(|| body.get("file_version"))
            .and_then(Value::as_str)
            .map(str::to_string);

        if version.as_deref() == Some(SCHEMA_VERSION) {
            let document = serde_json::from_value(Value::Object(body))?;
            Ok(StoredDocument::Current(document))
        } else {
            Ok(StoredDocument::Legacy { version, body })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationAbort {
    /// The legacy document has a shape we can't read
    Unrecognized,
    /// The operator declined the cataloguing migration requires
    CatalogDeclined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphOrigin {
    New,
    Existing,
    /// The file was unreadable and has been replaced by an empty graph
    Recovered,
    Migrated { from_version: Option<String> },
}

#[derive(Debug)]
pub enum LoadOutcome {
    Ready { graph: Graph, origin: GraphOrigin },
    LegacyDeclined { version: Option<String> },
    MigrationAborted(MigrationAbort),
}

#[derive(Deserialize)]
struct LegacyEdge {
    from: Option<String>,
    to: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    latencies: Vec<f64>,
}

impl LegacyEdge {
    fn into_edge(self, key: Option<(String, String)>) -> Option<Edge> {
        let (from, to) = match key {
            Some(pair) => pair,
            None => (self.from?, self.to?),
        };
        Some(Edge {
            from,
            to,
            label: self.label,
            latencies: self.latencies,
        })
    }
}

/// Rebuild a legacy document in the current shape.
///
/// The node table may be an object keyed by id or a list, and an absent one is
/// empty. Returns `None` for any other shape. Nodes without an `id` are
/// dropped; edges keyed `"from-to"` are split on the first `-`.
pub fn migrate_legacy(body: &Map<String, Value>) -> Option<Graph> {
    let legacy_nodes: Vec<&Value> = match body.get("nodes") {
        Some(Value::Object(nodes)) => nodes.values().collect(),
        Some(Value::Array(nodes)) => nodes.iter().collect(),
        None | Some(Value::Null) => Vec::new(),
        Some(other) => {
            warn!("Legacy graph has an unreadable node table: {}", other);
            return None;
        }
    };

    let mut graph = Graph::new();
    for value in legacy_nodes {
        match read_node(value) {
            Some(node) => {
                graph.nodes.insert(node.id.clone(), node);
            }
            None => debug!("Dropping corrupt legacy node: {}", value),
        }
    }

    let legacy_edges: Vec<(Option<&str>, &Value)> = match body.get("edges") {
        Some(Value::Object(edges)) => edges.iter().map(|(k, v)| (Some(k.as_str()), v)).collect(),
        Some(Value::Array(edges)) => edges.iter().map(|v| (None, v)).collect(),
        _ => Vec::new(),
    };

    for (key, value) in legacy_edges {
        let pair = key
            .and_then(|k| k.split_once('-'))
            .map(|(from, to)| (from.to_string(), to.to_string()));
        let edge = serde_json::from_value::<LegacyEdge>(value.clone())
            .ok()
            .and_then(|legacy| legacy.into_edge(pair));
        match edge {
            Some(edge) => {
                graph.edges.insert((edge.from.clone(), edge.to.clone()), edge);
            }
            None => debug!("Dropping unreadable legacy edge {:?}", key),
        }
    }

    if let Some(Value::Object(explorers)) = body.get("explorers") {
        for (id, value) in explorers {
            if let Ok(explorer) = serde_json::from_value::<Explorer>(value.clone()) {
                graph.explorers.insert(id.clone(), explorer);
            }
        }
    }

    info!(
        "Read legacy graph: {} nodes, {} edges, {} explorers",
        graph.nodes.len(),
        graph.edges.len(),
        graph.explorers.len()
    );
    Some(graph)
}

/// The graph file on disk.
#[derive(Debug, Clone)]
pub struct GraphStore {
    path: PathBuf,
}

impl GraphStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Decode the file without acting on it. `Ok(None)` when there is no file.
    pub fn read_document(&self) -> Result<Option<StoredDocument>> {
        match fs::read(&self.path) {
            Ok(bytes) => StoredDocument::decode(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the graph, migrating legacy files when the operator agrees.
    ///
    /// Only an unreadable file is an error. A corrupt document is replaced by
    /// an empty graph, and a declined or impossible migration is reported as
    /// an outcome with nothing written.
    pub async fn load(&self, catalog: &GeoCatalog, confirm: &ConfirmCallback) -> Result<LoadOutcome> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No graph at {}, starting a new one", self.path.display());
                return Ok(LoadOutcome::Ready {
                    graph: Graph::new(),
                    origin: GraphOrigin::New,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let document = match StoredDocument::decode(&bytes) {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    "Graph file {} is corrupt ({}); starting a new one",
                    self.path.display(),
                    e
                );
                return Ok(LoadOutcome::Ready {
                    graph: Graph::new(),
                    origin: GraphOrigin::Recovered,
                });
            }
        };

        match document {
            StoredDocument::Current(document) => {
                let graph = document.into_graph();
                info!(
                    "Loaded {} nodes and {} edges from {}",
                    graph.nodes.len(),
                    graph.edges.len(),
                    self.path.display()
                );
                Ok(LoadOutcome::Ready {
                    graph,
                    origin: GraphOrigin::Existing,
                })
            }
            StoredDocument::Legacy { version, body } => {
                self.migrate(version, &body, catalog, confirm).await
            }
        }
    }

    async fn migrate(
        &self,
        version: Option<String>,
        body: &Map<String, Value>,
        catalog: &GeoCatalog,
        confirm: &ConfirmCallback,
    ) -> Result<LoadOutcome> {
        let shown = version.as_deref().unwrap_or("unknown");
        warn!(
            "Graph file version {} does not match {}",
            shown, SCHEMA_VERSION
        );

        let question = format!(
            "Graph file version {} is incompatible with {}. Migrate and catalogue it?",
            shown, SCHEMA_VERSION
        );
        if !confirm(question.as_str()) {
            return Ok(LoadOutcome::LegacyDeclined { version });
        }

        let Some(mut graph) = migrate_legacy(body) else {
            return Ok(LoadOutcome::MigrationAborted(MigrationAbort::Unrecognized));
        };

        if !catalog.catalog(&mut graph, confirm).await {
            info!("Migration cancelled; {} left unchanged", self.path.display());
            return Ok(LoadOutcome::MigrationAborted(MigrationAbort::CatalogDeclined));
        }

        Ok(LoadOutcome::Ready {
            graph,
            origin: GraphOrigin::Migrated {
                from_version: version,
            },
        })
    }

    /// Write the whole graph, stamped with the current schema version.
    pub fn save(&self, graph: &Graph) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let document = GraphDocument::from_graph(graph);
        let text = serde_json::to_string_pretty(&document)?;
        fs::write(&self.path, text)?;

        info!(
            "Saved {} nodes and {} edges to {}",
            document.nodes.len(),
            document.edges.len(),
            self.path.display()
        );
        Ok(())
    }
}
