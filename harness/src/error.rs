//! Error types for the redbackup harness.
//!
//! Every failure a scenario can hit maps to one variant: missing images
//! abort setup, non-zero exits and log markers fail the unit that produced
//! them, and a restored tree that differs from its source fails
//! verification. Nothing is retried.

use std::path::PathBuf;

use thiserror::Error;

use crate::cluster::ClusterState;
use crate::config::ConfigError;
use crate::tree::TreeDiff;

/// Errors that can occur while driving a cluster.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Docker API error.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Runtime failure that did not come from the Docker API.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A versioned image required by the cluster does not exist.
    #[error("image {image} not found, build all images before running the harness")]
    MissingImage {
        /// Full image reference (`repo:tag`).
        image: String,
    },

    /// A unit exited with a non-zero code.
    #[error("{unit} exited with code {exit_code}")]
    ExecFailed {
        /// Unit name.
        unit: String,
        /// Exit code reported by the runtime.
        exit_code: i64,
    },

    /// Error or warning markers were found in a unit's output.
    #[error("problems found during execution of {unit}:\n{}", .lines.join("\n"))]
    LogProblems {
        /// Unit name.
        unit: String,
        /// Every offending line, in output order.
        lines: Vec<String>,
    },

    /// A restored tree does not match the tree it was backed up from.
    #[error("restored tree {} differs from {}: {diff}", .restored.display(), .expected.display())]
    TreeMismatch {
        /// Local source tree.
        expected: PathBuf,
        /// Tree extracted from the unit.
        restored: PathBuf,
        /// Itemized differences.
        diff: TreeDiff,
    },

    /// A unit did not finish within its bound.
    #[error("{unit} did not finish within {secs}s")]
    Timeout {
        /// Unit name.
        unit: String,
        /// The bound that was exceeded.
        secs: u64,
    },

    /// A cluster operation was invoked from the wrong lifecycle stage.
    #[error("cluster is {actual:?}, operation requires {expected:?}")]
    InvalidState {
        /// Stage the operation requires.
        expected: ClusterState,
        /// Stage the cluster is in.
        actual: ClusterState,
    },

    /// An expiration is not in `YYYY-MM-DDTHH:MM` form.
    #[error("invalid expiration {value:?}: {source}")]
    Expiration {
        /// The rejected input.
        value: String,
        /// Parse failure.
        source: chrono::ParseError,
    },

    /// No node or client with the given name exists in the cluster.
    #[error("unknown cluster member: {0}")]
    UnknownMember(String),

    /// Topology or member layout is inconsistent.
    #[error("invalid topology: {0}")]
    Topology(String),

    /// An observed outcome did not match the scenario's expectation.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
