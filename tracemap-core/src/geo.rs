// Geolocation cataloguing for public addresses in the graph

use crate::error::Result;
use crate::model::Graph;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use serde_json::{Value, json};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_GEO_ENDPOINT: &str = "http://ip-api.com/json";
/// Field mask understood by ip-api.com
pub const GEO_FIELDS: &str = "17557273";
pub const DEFAULT_GEO_DELAY_MS: u64 = 1500;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Asks the operator a yes/no question.
pub type ConfirmCallback = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// True for syntactically valid IPv4 addresses outside private, loopback,
/// link-local and other non-routable ranges.
pub fn is_public_ipv4(id: &str) -> bool {
    match id.parse::<Ipv4Addr>() {
        Ok(ip) => {
            !(ip.is_private()
                || ip.is_loopback()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
                || ip.is_multicast())
        }
        Err(_) => false,
    }
}

/// Ids of public-address nodes that have never been looked up.
///
/// A stored failure marker counts as looked up, so failed addresses are not
/// selected again.
pub fn select_uncatalogued(graph: &Graph) -> Vec<String> {
    graph
        .nodes
        .values()
        .filter(|node| node.geo_info.is_none() && is_public_ipv4(&node.id))
        .map(|node| node.id.clone())
        .collect()
}

pub fn failure_marker(message: &str) -> Value {
    json!({ "status": "fail", "message": message })
}

/// Client for the geolocation service.
#[derive(Debug, Clone)]
pub struct GeoCatalog {
    client: Client,
    endpoint: String,
    delay: Duration,
    show_progress_bars: bool,
}

impl GeoCatalog {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT_SECS)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tracemap/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: DEFAULT_GEO_ENDPOINT.to_string(),
            delay: Duration::from_millis(DEFAULT_GEO_DELAY_MS),
            show_progress_bars: false,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Pause between consecutive lookups.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_progress_bars(mut self, show: bool) -> Self {
        self.show_progress_bars = show;
        self
    }

    /// Look up one address. Errors become a failure marker instead of propagating.
    pub async fn lookup(&self, ip: &str) -> Value {
        match self.fetch(ip).await {
            Ok(document) => document,
            Err(e) => {
                warn!("Geo lookup for {} failed: {}", ip, e);
                failure_marker(&e.to_string())
            }
        }
    }

    async fn fetch(&self, ip: &str) -> Result<Value> {
        let url = format!(
            "{}/{}?lang=en&fields={}",
            self.endpoint.trim_end_matches('/'),
            ip,
            GEO_FIELDS
        );
        debug!("Fetching {}", url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json::<Value>().await?)
    }

    /// Catalogue every uncatalogued public node, one request at a time.
    ///
    /// Returns false only when the operator declines; individual lookup
    /// failures are stored as markers and still count as done.
    pub async fn catalog(&self, graph: &mut Graph, confirm: &ConfirmCallback) -> bool {
        let pending = select_uncatalogued(graph);
        if pending.is_empty() {
            info!("All public addresses are already catalogued");
            return true;
        }

        let question = format!(
            "Found {} uncatalogued public addresses. Fetch their geolocation now?",
            pending.len()
        );
        if !confirm(question.as_str()) {
            warn!(
                "Skipped cataloguing {} addresses; the map will be saved without them",
                pending.len()
            );
            return false;
        }

        let progress_bar = self.progress_bar(pending.len() as u64);

        for (index, ip) in pending.iter().enumerate() {
            if index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(ref pb) = progress_bar {
                pb.set_message(format!("Looking up {}", ip));
            }

            let document = self.lookup(ip).await;
            if let Some(node) = graph.nodes.get_mut(ip) {
                node.geo_info = Some(document);
            }

            if let Some(ref pb) = progress_bar {
                pb.inc(1);
            }
        }

        if let Some(ref pb) = progress_bar {
            pb.finish_with_message(format!("Catalogued {} addresses", pending.len()));
        }
        info!("Catalogued {} addresses", pending.len());
        true
    }

    fn progress_bar(&self, len: u64) -> Option<ProgressBar> {
        if !self.show_progress_bars {
            return None;
        }
        let pb = ProgressBar::new(len);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{msg} [{bar:40.cyan/blue}] {pos}/{len} [{elapsed}<{eta}]")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        Some(pb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeGroup;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    fn answer(value: bool) -> ConfirmCallback {
        Arc::new(move |_: &str| value)
    }

    fn graph_with(ids: &[&str]) -> Graph {
        let mut graph = Graph::new();
        for id in ids {
            graph.ensure_node(id, id, NodeGroup::Hop);
        }
        graph
    }

    fn catalog_for(server: &MockServer) -> GeoCatalog {
        GeoCatalog::new()
            .unwrap()
            .with_endpoint(server.uri())
            .with_delay(Duration::ZERO)
    }

    #[test]
    fn test_is_public_ipv4() {
        assert!(is_public_ipv4("8.8.8.8"));
        assert!(is_public_ipv4("172.32.0.1"));
        assert!(!is_public_ipv4("10.1.2.3"));
        assert!(!is_public_ipv4("172.16.0.1"));
        assert!(!is_public_ipv4("172.31.255.255"));
        assert!(!is_public_ipv4("192.168.0.1"));
        assert!(!is_public_ipv4("127.0.0.1"));
        assert!(!is_public_ipv4("999.1.1.1"));
        assert!(!is_public_ipv4("phantom_8.8.8.8_1.1.1.1"));
        assert!(!is_public_ipv4("6f1c6a1e-0000-4000-8000-000000000000"));
    }

    #[test]
    fn test_select_skips_catalogued_and_failed() {
        let mut graph = graph_with(&["8.8.8.8", "1.1.1.1", "9.9.9.9", "10.0.0.1"]);
        graph.nodes.get_mut("1.1.1.1").unwrap().geo_info = Some(json!({"status": "success"}));
        graph.nodes.get_mut("9.9.9.9").unwrap().geo_info = Some(failure_marker("timeout"));

        assert_eq!(select_uncatalogued(&graph), vec!["8.8.8.8"]);
    }

    #[tokio::test]
    async fn test_nothing_to_catalog_skips_confirmation() {
        let asked = Arc::new(AtomicUsize::new(0));
        let asked_clone = asked.clone();
        let confirm: ConfirmCallback = Arc::new(move |_: &str| {
            asked_clone.fetch_add(1, Ordering::SeqCst);
            false
        });
        let mut graph = graph_with(&["10.0.0.1", "192.168.1.1"]);

        let done = GeoCatalog::new().unwrap().catalog(&mut graph, &confirm).await;

        assert!(done);
        assert_eq!(asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_declined_catalog_leaves_graph_untouched() {
        let mut graph = graph_with(&["8.8.8.8"]);

        let done = GeoCatalog::new().unwrap().catalog(&mut graph, &answer(false)).await;

        assert!(!done);
        assert!(graph.node("8.8.8.8").unwrap().geo_info.is_none());
    }

    #[tokio::test]
    async fn test_catalog_stores_documents_verbatim() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/8.8.8.8"))
            .and(query_param("fields", GEO_FIELDS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "country": "United States",
                "isp": "Google LLC"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut graph = graph_with(&["8.8.8.8", "10.0.0.1"]);
        let done = catalog_for(&mock_server).catalog(&mut graph, &answer(true)).await;

        assert!(done);
        let geo = graph.node("8.8.8.8").unwrap().geo_info.clone().unwrap();
        assert_eq!(geo["country"], "United States");
        assert_eq!(geo["isp"], "Google LLC");
        assert!(graph.node("10.0.0.1").unwrap().geo_info.is_none());
    }

    #[tokio::test]
    async fn test_failed_lookup_is_marked_and_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.1.1.1"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/8.8.8.8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let catalog = catalog_for(&mock_server);
        let mut graph = graph_with(&["1.1.1.1", "8.8.8.8"]);

        assert!(catalog.catalog(&mut graph, &answer(true)).await);
        let marker = graph.node("1.1.1.1").unwrap().geo_info.clone().unwrap();
        assert_eq!(marker["status"], "fail");
        assert!(marker["message"].as_str().is_some());

        // A second pass finds nothing left to do
        assert!(select_uncatalogued(&graph).is_empty());
        assert!(catalog.catalog(&mut graph, &answer(true)).await);
    }

    #[tokio::test]
    async fn test_unreachable_service_yields_failure_marker() {
        let catalog = GeoCatalog::with_timeout(1)
            .unwrap()
            .with_endpoint("http://127.0.0.1:9")
            .with_delay(Duration::ZERO);

        let marker = catalog.lookup("8.8.8.8").await;

        assert_eq!(marker["status"], "fail");
    }
}
