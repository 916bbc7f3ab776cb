// One full run: load, identify, catalogue, explore, finalise, save

use crate::error::Result;
use crate::explore::{ExploreOptions, ExploreProgressCallback, ExploreSummary, execute_exploration};
use crate::geo::{
    ConfirmCallback, DEFAULT_GEO_DELAY_MS, DEFAULT_GEO_ENDPOINT, DEFAULT_HTTP_TIMEOUT_SECS,
    GeoCatalog,
};
use crate::identity::{DEFAULT_IDENTITY_ENDPOINT, ExplorerIdentity, IdentityResolver, register_explorer};
use crate::merge::SharedGraph;
use crate::model::GraphSummary;
use crate::store::{DEFAULT_GRAPH_PATH, GraphOrigin, GraphStore, LoadOutcome, MigrationAbort};
use std::path::PathBuf;
use std::time::Duration;
use tracemap_probe::runner::{DEFAULT_PROBE_PROGRAM, DEFAULT_PROBE_TIMEOUT_SECS};
use tracemap_probe::{ProbeRunner, build_probe_tasks};
use tracing::info;

/// Everything a run needs to know, usually built from command line flags.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub graph_path: PathBuf,
    /// Nothing is probed when empty
    pub targets: Vec<String>,
    pub queries: u32,
    pub icmp: bool,
    pub tcp_ports: Vec<u16>,
    pub probe_program: String,
    pub probe_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub geo_endpoint: String,
    pub geo_delay: Duration,
    pub identity_endpoint: String,
    pub show_progress_bars: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            graph_path: PathBuf::from(DEFAULT_GRAPH_PATH),
            targets: Vec::new(),
            queries: 1,
            icmp: false,
            tcp_ports: Vec::new(),
            probe_program: DEFAULT_PROBE_PROGRAM.to_string(),
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            geo_endpoint: DEFAULT_GEO_ENDPOINT.to_string(),
            geo_delay: Duration::from_millis(DEFAULT_GEO_DELAY_MS),
            identity_endpoint: DEFAULT_IDENTITY_ENDPOINT.to_string(),
            show_progress_bars: true,
        }
    }
}

#[derive(Debug)]
pub enum SessionOutcome {
    Saved {
        origin: GraphOrigin,
        identity: ExplorerIdentity,
        /// False when the operator skipped cataloguing; exploration is skipped too
        catalogued: bool,
        exploration: Option<ExploreSummary>,
        summary: GraphSummary,
    },
    /// Legacy file left alone at the operator's request
    LegacyDeclined { version: Option<String> },
    MigrationAborted(MigrationAbort),
}

/// Run one session against the graph file in `config`.
///
/// Errors are limited to an unreadable file, a failed save, or an HTTP
/// client that cannot be built. Declined prompts are outcomes, not errors.
pub async fn run_session(
    config: SessionConfig,
    confirm: ConfirmCallback,
    progress_callback: Option<ExploreProgressCallback>,
) -> Result<SessionOutcome> {
    let store = GraphStore::new(&config.graph_path);
    let catalog = GeoCatalog::with_timeout(config.http_timeout_secs)?
        .with_endpoint(config.geo_endpoint.clone())
        .with_delay(config.geo_delay)
        .with_progress_bars(config.show_progress_bars);

    let (mut graph, origin) = match store.load(&catalog, &confirm).await? {
        LoadOutcome::Ready { graph, origin } => (graph, origin),
        LoadOutcome::LegacyDeclined { version } => {
            return Ok(SessionOutcome::LegacyDeclined { version });
        }
        LoadOutcome::MigrationAborted(reason) => {
            return Ok(SessionOutcome::MigrationAborted(reason));
        }
    };

    let resolver = IdentityResolver::new(config.http_timeout_secs)?
        .with_endpoint(config.identity_endpoint.clone());
    let identity = resolver.resolve().await;
    if register_explorer(&mut graph, &identity) {
        info!("New explorer {} recorded", identity.id);
    }

    if !catalog.catalog(&mut graph, &confirm).await {
        store.save(&graph)?;
        return Ok(SessionOutcome::Saved {
            origin,
            identity,
            catalogued: false,
            exploration: None,
            summary: graph.summary(),
        });
    }

    let exploration = if config.targets.is_empty() {
        None
    } else {
        let runner = ProbeRunner::new()
            .with_program(config.probe_program.clone())
            .with_timeout(config.probe_timeout_secs);
        let options = ExploreOptions {
            targets: config.targets.clone(),
            tasks: build_probe_tasks(config.queries, config.icmp, &config.tcp_ports),
            show_progress_bars: config.show_progress_bars,
        };

        let shared = SharedGraph::new(graph);
        let summary =
            execute_exploration(&shared, &identity.id, &runner, options, progress_callback).await;
        graph = shared.into_inner().await;
        Some(summary)
    };

    graph.finalize_labels(&identity.id, &config.targets);
    store.save(&graph)?;

    Ok(SessionOutcome::Saved {
        origin,
        identity,
        catalogued: true,
        exploration,
        summary: graph.summary(),
    })
}
