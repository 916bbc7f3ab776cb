//! Folding parsed probe runs into the shared topology.
//!
//! A run is walked in hop order from the explorer. Consecutive unanswered hops
//! between two responding hops collapse into a single phantom node whose id
//! depends only on the two responding hops, so every run that bridges the same
//! pair reuses it.

use crate::model::{Graph, NodeGroup};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracemap_probe::{Hop, HopRecord, RespondingHop};
use tracing::debug;

/// What one merge added to the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub nodes_added: usize,
    pub edges_added: usize,
    pub latencies_recorded: usize,
}

impl MergeStats {
    pub fn absorb(&mut self, other: MergeStats) {
        self.nodes_added += other.nodes_added;
        self.edges_added += other.edges_added;
        self.latencies_recorded += other.latencies_recorded;
    }
}

/// Id of the phantom node bridging `from` and `to`.
pub fn phantom_id(from: &str, to: &str) -> String {
    format!("phantom_{}_{}", from, to)
}

struct LastHop {
    id: String,
    latency: Option<f64>,
}

/// Merge one probe run into `graph`.
///
/// Not idempotent: merging the same run twice appends its latency samples
/// again, but never duplicates a node or an edge.
pub fn merge_hops(
    graph: &mut Graph,
    explorer_id: &str,
    protocol: &str,
    hops: &[HopRecord],
) -> MergeStats {
    let mut stats = MergeStats::default();
    let mut last = LastHop {
        id: explorer_id.to_string(),
        latency: Some(0.0),
    };
    let mut phantom_run = 0usize;

    for record in hops {
        match record {
            HopRecord::TargetInfo { fqdn, resolved_ip } => {
                if graph.add_fqdn(resolved_ip, fqdn) {
                    debug!("{} resolves to {}", fqdn, resolved_ip);
                }
            }
            HopRecord::Hop(Hop::Phantom) => phantom_run += 1,
            HopRecord::Hop(Hop::Responsive(hop)) => {
                if graph.ensure_node(&hop.ip, &hop.host, NodeGroup::Hop) {
                    stats.nodes_added += 1;
                }

                if phantom_run > 0 {
                    bridge(graph, &last, hop, phantom_run, &mut stats);
                    phantom_run = 0;
                } else {
                    let (edge, created) = graph.ensure_edge(&last.id, &hop.ip, Some(protocol));
                    if created {
                        stats.edges_added += 1;
                    }
                    if let Some(latency) = hop.latency {
                        edge.latencies.push(latency);
                        stats.latencies_recorded += 1;
                    }
                }

                last = LastHop {
                    id: hop.ip.clone(),
                    latency: hop.latency,
                };
            }
        }
    }

    if phantom_run > 0 {
        debug!(
            "Discarding {} trailing unanswered hops after {}",
            phantom_run, last.id
        );
    }

    stats
}

/// Link `last -> phantom -> hop` for a run of unanswered hops.
fn bridge(
    graph: &mut Graph,
    last: &LastHop,
    hop: &RespondingHop,
    run_length: usize,
    stats: &mut MergeStats,
) {
    let phantom = phantom_id(&last.id, &hop.ip);
    let label = format!("Phantom vertex ({} hops)", run_length);
    if graph.ensure_node(&phantom, &label, NodeGroup::Phantom) {
        stats.nodes_added += 1;
    }

    // The unanswered span can't be timed; both legs get the mean of its ends
    let sample = match (last.latency, hop.latency) {
        (Some(a), Some(b)) => Some((a + b) / 2.0),
        _ => None,
    };

    for (from, to) in [(last.id.as_str(), phantom.as_str()), (phantom.as_str(), hop.ip.as_str())] {
        let (edge, created) = graph.ensure_edge(from, to, None);
        if created {
            stats.edges_added += 1;
        }
        if let Some(sample) = sample {
            edge.latencies.push(sample);
            stats.latencies_recorded += 1;
        }
    }
}

/// The graph shared by concurrently completing probe tasks.
///
/// Every merge holds the lock for the whole run, so hop sequences from
/// different tasks never interleave.
#[derive(Debug, Clone)]
pub struct SharedGraph {
    inner: Arc<Mutex<Graph>>,
}

impl SharedGraph {
    pub fn new(graph: Graph) -> Self {
        Self {
            inner: Arc::new(Mutex::new(graph)),
        }
    }

    pub async fn merge(&self, explorer_id: &str, protocol: &str, hops: &[HopRecord]) -> MergeStats {
        let mut graph = self.inner.lock().await;
        merge_hops(&mut graph, explorer_id, protocol, hops)
    }

    pub async fn snapshot(&self) -> Graph {
        self.inner.lock().await.clone()
    }

    /// Take the graph back, cloning only if another handle is still alive.
    pub async fn into_inner(self) -> Graph {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().await.clone(),
        }
    }
}
