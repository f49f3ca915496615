//! # redbackup-harness
//!
//! Docker-based integration and performance harness for redbackup.
//!
//! The harness provisions a versioned cluster of redbackup nodes and
//! clients as containers on a private network, then drives end-to-end
//! scenarios against it:
//! - Nodes run continuously and learn their peers at launch
//! - Clients run one short-lived container per command, chaining state
//!   through committed images
//! - Every unit's output is checked for `ERROR`/`WARN` markers
//! - Restored trees are compared byte for byte with their source
//!
//! ## Architecture
//!
//! ```text
//!             ┌──────────────────────────┐
//!             │   ClusterConfiguration   │
//!             └────┬───────────────┬─────┘
//!                  │               │
//!            ┌─────┴────┐    ┌─────┴────┐
//!            │   Node   │    │  Client  │
//!            └─────┬────┘    └─────┬────┘
//!                  │  ContainerRuntime
//!          ┌───────┴───────┬───────┴───────┐
//!          │ DockerRuntime │  MockRuntime  │
//!          └───────────────┴───────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use redbackup_harness::{
//!     backup_and_restore, parse_expiration, DockerRuntime, HarnessConfig, TestData,
//!     DEFAULT_EXPIRATION,
//! };
//!
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! let data = TestData::generated()?;
//! let expiration = parse_expiration(DEFAULT_EXPIRATION)?;
//! backup_and_restore(runtime, "v0.3.1", &HarnessConfig::default(), data.path(), &expiration).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backup;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod inspect;
pub mod node;
pub mod payload;
pub mod runtime;
pub mod scenarios;
pub mod topology;
pub mod tree;

pub use backup::{parse_expiration, Backup, DEFAULT_EXPIRATION};
pub use client::{Client, CompletedRun, PreparedRun, RunningRun};
pub use cluster::{ClusterConfiguration, ClusterState};
pub use config::{ConfigError, HarnessConfig};
pub use error::{HarnessError, Result};
pub use node::Node;
pub use runtime::{ContainerRuntime, DockerRuntime, MockRuntime};
pub use scenarios::{
    backup_and_restore, concurrent_backup_performance, replicated_backup_and_restore,
    PerformanceOptions, PerformanceReport, TestData,
};
pub use topology::{MemberLayout, Topology};
pub use tree::{are_dir_trees_equal, compare_trees, TreeDiff};
