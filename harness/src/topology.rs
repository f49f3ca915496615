//! Cluster topologies.
//!
//! Nodes learn their peers from `-k` flags at launch, so the whole
//! adjacency must be known before the first node is created. A
//! [`Topology`] turns a node count into that adjacency once; new layouts
//! only need a new variant.

use std::collections::HashSet;

use crate::error::{HarnessError, Result};

/// How nodes are wired to each other.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Topology {
    /// Every node knows every other node.
    #[default]
    FullMesh,
    /// The center knows every node; every other node knows only the center.
    Star {
        /// Index of the center node.
        center: usize,
    },
    /// Explicit symmetric pairs of node indices.
    Pairs(Vec<(usize, usize)>),
}

impl Topology {
    /// Short name used in network names.
    pub fn label(&self) -> &'static str {
        match self {
            Topology::FullMesh => "mesh",
            Topology::Star { .. } => "star",
            Topology::Pairs(_) => "pairs",
        }
    }

    /// Peer indices for each of `n` nodes, in ascending order.
    ///
    /// A node never lists itself. Out-of-range indices are rejected.
    pub fn adjacency(&self, n: usize) -> Result<Vec<Vec<usize>>> {
        let mut peers = vec![Vec::new(); n];
        match self {
            Topology::FullMesh => {
                for (i, list) in peers.iter_mut().enumerate() {
                    list.extend((0..n).filter(|&j| j != i));
                }
            }
            Topology::Star { center } => {
                check_index(*center, n)?;
                for i in (0..n).filter(|&i| i != *center) {
                    peers[*center].push(i);
                    peers[i].push(*center);
                }
            }
            Topology::Pairs(pairs) => {
                for &(a, b) in pairs {
                    check_index(a, n)?;
                    check_index(b, n)?;
                    if a == b {
                        return Err(HarnessError::Topology(format!(
                            "node {} cannot be paired with itself",
                            a
                        )));
                    }
                    if !peers[a].contains(&b) {
                        peers[a].push(b);
                    }
                    if !peers[b].contains(&a) {
                        peers[b].push(a);
                    }
                }
                for list in &mut peers {
                    list.sort_unstable();
                }
            }
        }
        Ok(peers)
    }
}

fn check_index(index: usize, n: usize) -> Result<()> {
    if index >= n {
        return Err(HarnessError::Topology(format!(
            "node index {} out of range for {} nodes",
            index, n
        )));
    }
    Ok(())
}

/// Names and wiring of a cluster, validated before anything is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberLayout {
    /// Node names, in creation order. Names double as hostnames.
    pub nodes: Vec<String>,
    /// Client names.
    pub clients: Vec<String>,
    /// Node wiring.
    pub topology: Topology,
}

impl MemberLayout {
    /// Build a layout, rejecting empty or duplicate names.
    pub fn new(nodes: Vec<String>, clients: Vec<String>, topology: Topology) -> Result<Self> {
        let mut seen = HashSet::new();
        for name in nodes.iter().chain(clients.iter()) {
            if name.is_empty() {
                return Err(HarnessError::Topology("member names must not be empty".into()));
            }
            if !seen.insert(name.as_str()) {
                return Err(HarnessError::Topology(format!(
                    "duplicate member name {}",
                    name
                )));
            }
        }
        topology.adjacency(nodes.len())?;
        Ok(Self {
            nodes,
            clients,
            topology,
        })
    }

    /// Two nodes paired with each other and one client.
    pub fn minimal() -> Self {
        Self {
            nodes: names(&["NodeA", "NodeB"]),
            clients: names(&["client1"]),
            topology: Topology::Pairs(vec![(0, 1)]),
        }
    }

    /// Three fully meshed nodes and three clients.
    pub fn medium() -> Self {
        Self {
            nodes: names(&["NodeA", "NodeB", "NodeC"]),
            clients: names(&["client1", "client2", "client3"]),
            topology: Topology::FullMesh,
        }
    }

    /// `nodes` fully meshed nodes (`Node1..`) and `clients` clients (`Client1..`).
    pub fn performance(clients: usize, nodes: usize) -> Self {
        Self {
            nodes: (1..=nodes).map(|i| format!("Node{}", i)).collect(),
            clients: (1..=clients).map(|i| format!("Client{}", i)).collect(),
            topology: Topology::FullMesh,
        }
    }

    /// Peer names for every node, in node order.
    pub fn peer_names(&self) -> Result<Vec<Vec<String>>> {
        let adjacency = self.topology.adjacency(self.nodes.len())?;
        Ok(adjacency
            .into_iter()
            .map(|peers| peers.into_iter().map(|j| self.nodes[j].clone()).collect())
            .collect())
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
