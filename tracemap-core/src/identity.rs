use crate::error::{GraphError, Result};
use crate::model::{Explorer, Graph, IdentitySource, Node, NodeGroup};
use reqwest::Client;
use std::time::Duration;
use tracemap_probe::hop::is_dotted_quad;
use tracing::{info, warn};

pub const DEFAULT_IDENTITY_ENDPOINT: &str = "https://ifconfig.me/ip";

/// Who is running the probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerIdentity {
    pub id: String,
    pub source: IdentitySource,
}

impl ExplorerIdentity {
    pub fn network(ip: impl Into<String>) -> Self {
        Self {
            id: ip.into(),
            source: IdentitySource::Network,
        }
    }

    /// Fresh random id. Not stable across runs.
    pub fn anonymous() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: IdentitySource::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.source == IdentitySource::Anonymous
    }
}

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    client: Client,
    endpoint: String,
}

impl IdentityResolver {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tracemap/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: DEFAULT_IDENTITY_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Resolve our public address, falling back to an anonymous id.
    pub async fn resolve(&self) -> ExplorerIdentity {
        match self.fetch().await {
            Ok(ip) => {
                info!("Explorer identified as {}", ip);
                ExplorerIdentity::network(ip)
            }
            Err(e) => {
                let identity = ExplorerIdentity::anonymous();
                warn!(
                    "Could not resolve public address ({}); using anonymous id {}",
                    e, identity.id
                );
                identity
            }
        }
    }

    async fn fetch(&self) -> Result<String> {
        let body = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let ip = body.trim();
        if !is_dotted_quad(ip) {
            return Err(GraphError::InvalidAddress(ip.to_string()));
        }
        Ok(ip.to_string())
    }
}

/// Record the explorer and its node the first time it is seen.
/// Returns true when the explorer is new to this graph.
pub fn register_explorer(graph: &mut Graph, identity: &ExplorerIdentity) -> bool {
    if !graph.nodes.contains_key(&identity.id) {
        graph.nodes.insert(
            identity.id.clone(),
            Node::new(
                identity.id.clone(),
                format!("Explorer ({})", identity.id),
                NodeGroup::Explorer,
            ),
        );
    }

    if graph.explorers.contains_key(&identity.id) {
        return false;
    }
    graph.explorers.insert(
        identity.id.clone(),
        Explorer {
            id: identity.id.clone(),
            first_seen: chrono::Utc::now().to_rfc3339(),
            source: Some(identity.source),
        },
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    async fn resolver_answering(template: ResponseTemplate) -> (MockServer, IdentityResolver) {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(template)
            .mount(&mock_server)
            .await;
        let resolver = IdentityResolver::new(2)
            .unwrap()
            .with_endpoint(format!("{}/ip", mock_server.uri()));
        (mock_server, resolver)
    }

    #[tokio::test]
    async fn test_resolves_public_address() {
        let (_server, resolver) =
            resolver_answering(ResponseTemplate::new(200).set_body_string("203.0.113.9\n")).await;

        let identity = resolver.resolve().await;

        assert_eq!(identity, ExplorerIdentity::network("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_invalid_body_falls_back_to_anonymous() {
        let (_server, resolver) =
            resolver_answering(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
                .await;

        let identity = resolver.resolve().await;

        assert!(identity.is_anonymous());
        assert!(uuid::Uuid::parse_str(&identity.id).is_ok());
    }

    #[tokio::test]
    async fn test_http_error_falls_back_to_anonymous() {
        let (_server, resolver) = resolver_answering(ResponseTemplate::new(500)).await;

        assert!(resolver.resolve().await.is_anonymous());
    }

    #[test]
    fn test_anonymous_ids_differ() {
        assert_ne!(ExplorerIdentity::anonymous().id, ExplorerIdentity::anonymous().id);
    }

    #[test]
    fn test_register_explorer_once() {
        let mut graph = Graph::new();
        let identity = ExplorerIdentity::network("203.0.113.9");

        assert!(register_explorer(&mut graph, &identity));
        let first_seen = graph.explorers["203.0.113.9"].first_seen.clone();
        assert!(!register_explorer(&mut graph, &identity));

        assert_eq!(graph.explorers.len(), 1);
        assert_eq!(graph.explorers["203.0.113.9"].first_seen, first_seen);
        assert_eq!(
            graph.explorers["203.0.113.9"].source,
            Some(IdentitySource::Network)
        );
        let node = graph.node("203.0.113.9").unwrap();
        assert_eq!(node.group, NodeGroup::Explorer);
        assert_eq!(node.label, "Explorer (203.0.113.9)");
    }

    #[test]
    fn test_register_keeps_existing_node() {
        let mut graph = Graph::new();
        graph.ensure_node("203.0.113.9", "core-router", NodeGroup::Hop);

        register_explorer(&mut graph, &ExplorerIdentity::network("203.0.113.9"));

        assert_eq!(graph.node("203.0.113.9").unwrap().label, "core-router");
        assert_eq!(graph.explorers.len(), 1);
    }
}
