//! Node controller.
//!
//! Owns the container of one redbackup node: builds its launch command
//! from the peers it must know, creates and starts it, stops it and checks
//! its logs, and removes it.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::inspect::check_log_for_errors;
use crate::runtime::{ContainerRuntime, LogStreams, NetworkHandle, UnitHandle, UnitSpec};

/// Diagnostic environment for node units.
pub const NODE_ENV: [&str; 2] = ["RUST_BACKTRACE=1", "RUST_LOG=redbackup=info"];

/// How a node's binary is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLaunch {
    /// Path of the node binary inside the image.
    pub binary: String,
    /// Sleep before the binary starts, so peer hostnames resolve first.
    pub delay: Duration,
    /// Graceful stop timeout.
    pub stop_timeout: Duration,
}

/// A redbackup node running in its own container.
pub struct Node {
    name: String,
    image: String,
    network: NetworkHandle,
    peers: Vec<String>,
    launch: NodeLaunch,
    runtime: Arc<dyn ContainerRuntime>,
    unit: Option<UnitHandle>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("peers", &self.peers)
            .field("unit", &self.unit)
            .finish()
    }
}

impl Node {
    /// Describe a node. Nothing is created until [`Node::create`].
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        network: NetworkHandle,
        launch: NodeLaunch,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let name = name.into();
        debug!(node = %name, "setting up node");
        Self {
            name,
            image: image.into(),
            network,
            peers: Vec::new(),
            launch,
            runtime,
            unit: None,
        }
    }

    /// Node name, also its hostname on the cluster network.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Peers advertised at launch, in order.
    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Whether the container exists.
    pub fn is_created(&self) -> bool {
        self.unit.is_some()
    }

    /// Add peers to advertise at launch. The node itself is skipped, and so
    /// are peers it already knows.
    pub fn known_nodes<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for peer in peers {
            let peer = peer.into();
            if peer != self.name && !self.peers.contains(&peer) {
                self.peers.push(peer);
            }
        }
    }

    /// Change the launch delay. Takes effect at the next [`Node::create`].
    pub fn set_launch_delay(&mut self, delay: Duration) {
        self.launch.delay = delay;
    }

    /// Launch command: sleep, then the node binary with one `-k` per peer.
    pub fn launch_command(&self) -> Vec<String> {
        let mut command = format!(
            "sleep {}; {}",
            self.launch.delay.as_secs(),
            self.launch.binary
        );
        for peer in &self.peers {
            command.push_str(" -k ");
            command.push_str(peer);
        }
        debug!(node = %self.name, command = %command, "launch command");
        vec!["bash".to_string(), "-c".to_string(), command]
    }

    /// Create the container and attach it to the cluster network.
    pub async fn create(&mut self) -> Result<()> {
        let spec = UnitSpec {
            image: self.image.clone(),
            entrypoint: self.launch_command(),
            name: self.name.clone(),
            env: NODE_ENV.iter().map(|s| s.to_string()).collect(),
        };
        let unit = self.runtime.create(&spec).await?;
        // bind before connecting so clean_up can remove a half-wired unit
        let unit = self.unit.insert(unit);
        self.runtime.connect(&self.network, unit).await?;
        debug!(node = %self.name, unit = %unit, "node created");
        Ok(())
    }

    /// Start the created container. Returns without waiting for readiness.
    pub async fn start(&self) -> Result<()> {
        debug!(node = %self.name, "starting node");
        self.runtime.start(self.unit()?).await
    }

    /// Stop the container within the stop timeout, without inspecting logs.
    pub async fn halt(&self) -> Result<()> {
        debug!(node = %self.name, "stopping node");
        self.runtime
            .stop(self.unit()?, self.launch.stop_timeout)
            .await
    }

    /// Fail if the node's output contains error or warning markers.
    pub async fn check_logs(&self) -> Result<()> {
        let output = self.runtime.logs(self.unit()?, LogStreams::ALL).await?;
        check_log_for_errors(&self.name, &output)
    }

    /// Stop the node, then check its logs.
    pub async fn stop(&self) -> Result<()> {
        self.halt().await?;
        self.check_logs().await
    }

    /// Remove the container. Only valid after [`Node::stop`].
    pub async fn clean_up(&mut self) -> Result<()> {
        debug!(node = %self.name, "cleaning up node");
        if let Some(unit) = self.unit.as_ref() {
            self.runtime.remove(unit).await?;
            self.unit = None;
        }
        Ok(())
    }

    fn unit(&self) -> Result<&UnitHandle> {
        self.unit
            .as_ref()
            .ok_or_else(|| HarnessError::Runtime(format!("node {} has not been created", self.name)))
    }
}
