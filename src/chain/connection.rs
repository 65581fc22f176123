//! Node connection with liveness probing and lazy reconnect
//!
//! The connection moves through three phases:
//! - `Unconfigured` until the first successful `configure`
//! - `Connected` while probes succeed
//! - `Degraded` after a failed probe, until a reconnect succeeds

use crate::error::{GatewayError, GatewayResult};
use crate::metrics;

use ethers::providers::{Http, JsonRpcClient, Middleware, Provider, ProviderError};
use ethers::types::U256;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Builds a transport client for a node URL
pub type Dialer<C> = Arc<dyn Fn(&str) -> GatewayResult<C> + Send + Sync>;

/// Configured endpoint as seen from outside
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEndpoint {
    pub url: String,
    pub live: bool,
}

/// Result of a successful configure or probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub url: String,
    pub chain_id: u64,
    pub block_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Unconfigured,
    Connected,
    Degraded,
}

/// Handle to a node that passed its last liveness probe
pub struct LiveNode<C: JsonRpcClient> {
    url: String,
    chain_id: u64,
    provider: Arc<Provider<C>>,
    rpc_timeout: Duration,
}

impl<C: JsonRpcClient> Clone for LiveNode<C> {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            chain_id: self.chain_id,
            provider: self.provider.clone(),
            rpc_timeout: self.rpc_timeout,
        }
    }
}

impl<C: JsonRpcClient> LiveNode<C> {
    pub fn provider(&self) -> &Provider<C> {
        &self.provider
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run a node call bounded by the RPC timeout, classifying failures
    pub async fn request<T, F>(&self, operation: &str, call: F) -> GatewayResult<T>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match timeout(self.rpc_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!("Node call {} failed on {}: {}", operation, self.url, e);
                Err(GatewayError::from_provider(e))
            }
            Err(_) => Err(GatewayError::Connection(format!(
                "{} timed out after {:?}",
                operation, self.rpc_timeout
            ))),
        }
    }
}

enum ConnectionState<C: JsonRpcClient> {
    Unconfigured,
    Connected(LiveNode<C>),
    Degraded { url: String },
}

impl<C: JsonRpcClient> ConnectionState<C> {
    fn phase(&self) -> ConnectionPhase {
        match self {
            ConnectionState::Unconfigured => ConnectionPhase::Unconfigured,
            ConnectionState::Connected(_) => ConnectionPhase::Connected,
            ConnectionState::Degraded { .. } => ConnectionPhase::Degraded,
        }
    }
}

/// Owns the node endpoint and the live client for a gateway session
pub struct NodeConnection<C: JsonRpcClient> {
    dialer: Dialer<C>,
    state: RwLock<ConnectionState<C>>,
    probe_timeout: Duration,
    rpc_timeout: Duration,
}

impl NodeConnection<Http> {
    /// Connection over plain HTTP JSON-RPC
    pub fn http(probe_timeout: Duration, rpc_timeout: Duration) -> Self {
        Self::new(Arc::new(dial_http), probe_timeout, rpc_timeout)
    }
}

fn dial_http(url: &str) -> GatewayResult<Http> {
    url.trim()
        .parse::<Http>()
        .map_err(|e| GatewayError::Connection(format!("Invalid node URL {}: {}", url, e)))
}

impl<C: JsonRpcClient + 'static> NodeConnection<C> {
    pub fn new(dialer: Dialer<C>, probe_timeout: Duration, rpc_timeout: Duration) -> Self {
        Self {
            dialer,
            state: RwLock::new(ConnectionState::Unconfigured),
            probe_timeout,
            rpc_timeout,
        }
    }

    /// Replace the endpoint after a successful probe.
    ///
    /// A failed probe leaves the previous endpoint untouched.
    pub async fn configure(&self, url: &str) -> GatewayResult<NodeStatus> {
        let url = url.trim();
        if url.is_empty() {
            return Err(GatewayError::Connection("Node URL is empty".to_string()));
        }

        let (node, block_number) = self.connect(url).await?;
        let status = NodeStatus {
            url: node.url.clone(),
            chain_id: node.chain_id,
            block_number,
        };

        *self.state.write().await = ConnectionState::Connected(node);
        metrics::record_connection_phase(ConnectionPhase::Connected);
        info!(
            "Node configured: {} (chain {}, block {})",
            status.url, status.chain_id, status.block_number
        );

        Ok(status)
    }

    /// Return a live node, reconnecting once if the cached client stopped answering
    pub async fn ensure_connected(&self) -> GatewayResult<LiveNode<C>> {
        let cached = match &*self.state.read().await {
            ConnectionState::Unconfigured => {
                return Err(GatewayError::Connection(
                    "No node configured".to_string(),
                ))
            }
            ConnectionState::Connected(node) => Some(node.clone()),
            ConnectionState::Degraded { .. } => None,
        };

        let failed = match cached {
            Some(node) => match self.probe(&node).await {
                Ok(_) => return Ok(node),
                Err(e) => {
                    warn!("Liveness probe failed for {}: {}", node.url, e);
                    Some(node.provider)
                }
            },
            None => None,
        };

        let url = {
            let mut state = self.state.write().await;
            let url = match &*state {
                ConnectionState::Unconfigured => {
                    return Err(GatewayError::Connection(
                        "No node configured".to_string(),
                    ))
                }
                ConnectionState::Connected(node) => {
                    let stale = failed
                        .as_ref()
                        .is_some_and(|provider| Arc::ptr_eq(provider, &node.provider));
                    if !stale {
                        // Replaced by a configure or reconnect since our probe
                        return Ok(node.clone());
                    }
                    node.url.clone()
                }
                ConnectionState::Degraded { url } => url.clone(),
            };
            *state = ConnectionState::Degraded { url: url.clone() };
            metrics::record_connection_phase(ConnectionPhase::Degraded);
            url
        };

        // Dial without holding the lock
        let (node, block_number) = match self.connect(&url).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("Reconnect to {} failed: {}", url, e);
                return Err(e);
            }
        };

        let mut state = self.state.write().await;
        let still_degraded = match &*state {
            ConnectionState::Degraded { url: current } => *current == url,
            // Another task reconnected or reconfigured meanwhile
            ConnectionState::Connected(current) => return Ok(current.clone()),
            ConnectionState::Unconfigured => false,
        };
        if !still_degraded {
            return Err(GatewayError::Connection(format!(
                "Endpoint changed while reconnecting to {}",
                url
            )));
        }

        info!("Reconnected to {} at block {}", url, block_number);
        *state = ConnectionState::Connected(node.clone());
        metrics::record_connection_phase(ConnectionPhase::Connected);
        Ok(node)
    }

    /// Current lifecycle phase
    pub async fn phase(&self) -> ConnectionPhase {
        self.state.read().await.phase()
    }

    /// Configured endpoint, if any
    pub async fn endpoint(&self) -> Option<NodeEndpoint> {
        match &*self.state.read().await {
            ConnectionState::Unconfigured => None,
            ConnectionState::Connected(node) => Some(NodeEndpoint {
                url: node.url.clone(),
                live: true,
            }),
            ConnectionState::Degraded { url } => Some(NodeEndpoint {
                url: url.clone(),
                live: false,
            }),
        }
    }

    /// Dial, probe and fetch the chain id
    async fn connect(&self, url: &str) -> GatewayResult<(LiveNode<C>, u64)> {
        let client = (self.dialer)(url)?;
        let mut node = LiveNode {
            url: url.to_string(),
            chain_id: 0,
            provider: Arc::new(Provider::new(client)),
            rpc_timeout: self.rpc_timeout,
        };

        let block_number = self.probe(&node).await?;

        let chain_id = node
            .request("chain id", node.provider().get_chainid())
            .await
            .map_err(|e| {
                GatewayError::Connection(format!("Failed to fetch chain id from {}: {}", url, e))
            })?;
        if chain_id > U256::from(u64::MAX) {
            return Err(GatewayError::Connection(format!(
                "Node {} reported an out-of-range chain id {}",
                url, chain_id
            )));
        }
        node.chain_id = chain_id.as_u64();

        debug!("Connected to {} (chain {})", url, node.chain_id);
        Ok((node, block_number))
    }

    /// Liveness probe: latest block number within the probe timeout
    async fn probe(&self, node: &LiveNode<C>) -> GatewayResult<u64> {
        match timeout(self.probe_timeout, node.provider().get_block_number()).await {
            Ok(Ok(block)) => Ok(block.as_u64()),
            Ok(Err(e)) => Err(GatewayError::Connection(format!(
                "Node {} is unreachable: {}",
                node.url, e
            ))),
            Err(_) => Err(GatewayError::Connection(format!(
                "Node {} did not answer within {:?}",
                node.url, self.probe_timeout
            ))),
        }
    }
}
