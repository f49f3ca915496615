//! Cluster configuration.
//!
//! Assembles a cluster in a fixed order (images, network, clients, nodes),
//! drives the nodes through their lifecycle and tears everything down
//! again. The lifecycle is tracked in [`ClusterState`]; an operation invoked
//! from the wrong stage fails with [`HarnessError::InvalidState`] before
//! touching the runtime.
//!
//! ```text
//! Uninitialized -> NetworkReady -> MembersConstructed -> NodesRunning
//!               -> NodesStopped -> TornDown
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::node::{Node, NodeLaunch};
use crate::runtime::{ContainerRuntime, NetworkHandle};
use crate::topology::MemberLayout;

/// Lifecycle stage of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// Nothing exists yet.
    Uninitialized,
    /// The cluster network exists.
    NetworkReady,
    /// Clients and nodes are described; no node container exists.
    MembersConstructed,
    /// Every node container is created and started.
    NodesRunning,
    /// Every node is stopped and its logs were inspected.
    NodesStopped,
    /// Node containers and the network are gone.
    TornDown,
}

/// A versioned cluster of nodes and clients on one network.
pub struct ClusterConfiguration {
    version: String,
    network: NetworkHandle,
    nodes: Vec<Node>,
    clients: Vec<Client>,
    settle_delay: Duration,
    state: ClusterState,
    runtime: Arc<dyn ContainerRuntime>,
}

impl std::fmt::Debug for ClusterConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfiguration")
            .field("version", &self.version)
            .field("network", &self.network)
            .field("nodes", &self.nodes)
            .field("clients", &self.clients)
            .field("state", &self.state)
            .finish()
    }
}

impl ClusterConfiguration {
    /// Two paired nodes (`NodeA`, `NodeB`) and `client1`.
    pub async fn minimal(
        runtime: Arc<dyn ContainerRuntime>,
        version: &str,
        config: &HarnessConfig,
    ) -> Result<Self> {
        Self::new(runtime, version, config, MemberLayout::minimal(), "minimal").await
    }

    /// Three fully meshed nodes (`NodeA..NodeC`) and `client1..client3`.
    pub async fn medium(
        runtime: Arc<dyn ContainerRuntime>,
        version: &str,
        config: &HarnessConfig,
    ) -> Result<Self> {
        Self::new(runtime, version, config, MemberLayout::medium(), "medium").await
    }

    /// `nodes` fully meshed nodes and `clients` clients.
    pub async fn performance(
        runtime: Arc<dyn ContainerRuntime>,
        version: &str,
        config: &HarnessConfig,
        clients: usize,
        nodes: usize,
    ) -> Result<Self> {
        let layout = MemberLayout::performance(clients, nodes);
        Self::new(runtime, version, config, layout, "performance").await
    }

    /// Any validated layout. The network is labelled after its topology.
    pub async fn custom(
        runtime: Arc<dyn ContainerRuntime>,
        version: &str,
        config: &HarnessConfig,
        layout: MemberLayout,
    ) -> Result<Self> {
        let label = layout.topology.label();
        Self::new(runtime, version, config, layout, label).await
    }

    /// Assemble a cluster.
    ///
    /// Both versioned images and the layout are checked before anything is
    /// created. The network is named `<prefix>_<label>_<version>`.
    pub async fn new(
        runtime: Arc<dyn ContainerRuntime>,
        version: &str,
        config: &HarnessConfig,
        layout: MemberLayout,
        label: &str,
    ) -> Result<Self> {
        let node_image = config.node_image(version);
        let client_image = config.client_image(version);
        for image in [&node_image, &client_image] {
            if !runtime.image_exists(image).await? {
                error!(image = %image, "build all images before running the harness");
                return Err(HarnessError::MissingImage {
                    image: image.clone(),
                });
            }
            debug!(image = %image, "image exists");
        }
        let peer_names = layout.peer_names()?;

        let network_name = format!("{}_{}_{}", config.images.network_prefix, label, version);
        let network = runtime.create_network(&network_name).await?;
        debug!(network = %network_name, state = ?ClusterState::NetworkReady, "network created");

        info!("initializing clients");
        let clients = layout
            .clients
            .iter()
            .map(|name| {
                Client::new(
                    name.as_str(),
                    client_image.as_str(),
                    network.clone(),
                    config.binaries.client.as_str(),
                    config.timing.client_wait_timeout(),
                    Arc::clone(&runtime),
                )
            })
            .collect();

        info!("initializing nodes");
        let launch = NodeLaunch {
            binary: config.binaries.node.clone(),
            delay: Duration::from_secs(config.timing.node_launch_delay_secs),
            stop_timeout: config.timing.node_stop_timeout(),
        };
        let nodes = layout
            .nodes
            .iter()
            .zip(peer_names)
            .map(|(name, peers)| {
                let mut node = Node::new(
                    name.as_str(),
                    node_image.as_str(),
                    network.clone(),
                    launch.clone(),
                    Arc::clone(&runtime),
                );
                node.known_nodes(peers);
                node
            })
            .collect();

        Ok(Self {
            version: version.to_string(),
            network,
            nodes,
            clients,
            settle_delay: config.timing.settle_delay(),
            state: ClusterState::MembersConstructed,
            runtime,
        })
    }

    /// Override the launch delay of every node. Only possible before the
    /// nodes are started; otherwise the cluster is left unchanged.
    pub fn set_launch_delay(&mut self, delay: Duration) -> Result<()> {
        self.require(ClusterState::MembersConstructed)?;
        for node in &mut self.nodes {
            node.set_launch_delay(delay);
        }
        Ok(())
    }

    /// Version under test.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Cluster network.
    pub fn network(&self) -> &NetworkHandle {
        &self.network
    }

    /// Current lifecycle stage.
    pub fn state(&self) -> ClusterState {
        self.state
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Clients in creation order.
    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Result<&Node> {
        self.nodes
            .iter()
            .find(|node| node.name() == name)
            .ok_or_else(|| HarnessError::UnknownMember(name.to_string()))
    }

    /// Look up a client by name.
    pub fn client_mut(&mut self, name: &str) -> Result<&mut Client> {
        self.clients
            .iter_mut()
            .find(|client| client.name() == name)
            .ok_or_else(|| HarnessError::UnknownMember(name.to_string()))
    }

    /// Borrow a client for a run against a node.
    pub fn client_and_node(&mut self, client: &str, node: &str) -> Result<(&mut Client, &Node)> {
        let node = self
            .nodes
            .iter()
            .find(|n| n.name() == node)
            .ok_or_else(|| HarnessError::UnknownMember(node.to_string()))?;
        let client = self
            .clients
            .iter_mut()
            .find(|c| c.name() == client)
            .ok_or_else(|| HarnessError::UnknownMember(client.to_string()))?;
        Ok((client, node))
    }

    /// Create every node, then start every node, then wait the settle delay.
    pub async fn start_nodes(&mut self) -> Result<()> {
        self.require(ClusterState::MembersConstructed)?;
        info!("starting nodes");
        for node in &mut self.nodes {
            node.create().await?;
        }
        for node in &self.nodes {
            node.start().await?;
        }
        debug!(secs = self.settle_delay.as_secs(), "waiting for nodes to settle");
        tokio::time::sleep(self.settle_delay).await;
        self.state = ClusterState::NodesRunning;
        Ok(())
    }

    /// Stop every node, then inspect every node's logs.
    ///
    /// All nodes are stopped and inspected even if one fails; the first
    /// failure is returned.
    pub async fn stop_nodes(&mut self) -> Result<()> {
        self.require(ClusterState::NodesRunning)?;
        info!("stopping nodes");
        let mut first_error = None;
        for node in &self.nodes {
            if let Err(e) = node.halt().await {
                warn!(node = %node.name(), error = %e, "failed to stop node");
                first_error.get_or_insert(e);
            }
        }
        for node in &self.nodes {
            if let Err(e) = node.check_logs().await {
                first_error.get_or_insert(e);
            }
        }
        self.state = ClusterState::NodesStopped;
        first_error.map_or(Ok(()), Err)
    }

    /// Remove every node container, then the network.
    pub async fn clean_up(&mut self) -> Result<()> {
        self.require(ClusterState::NodesStopped)?;
        info!("cleaning up");
        self.tear_down().await
    }

    /// Remove whatever exists, from any stage.
    pub async fn emergency_clean_up(&mut self) -> Result<()> {
        if self.state == ClusterState::TornDown {
            return Ok(());
        }
        warn!(state = ?self.state, "emergency clean up");
        self.tear_down().await
    }

    async fn tear_down(&mut self) -> Result<()> {
        let mut first_error = None;
        for node in &mut self.nodes {
            if let Err(e) = node.clean_up().await {
                warn!(node = %node.name(), error = %e, "failed to remove node");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.runtime.remove_network(&self.network).await {
            warn!(network = %self.network.name(), error = %e, "failed to remove network");
            first_error.get_or_insert(e);
        }
        self.state = ClusterState::TornDown;
        first_error.map_or(Ok(()), Err)
    }

    fn require(&self, expected: ClusterState) -> Result<()> {
        if self.state != expected {
            return Err(HarnessError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }
}
