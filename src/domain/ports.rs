//! Domain Ports - Core trait definitions for the cluster orchestrator
//!
//! These traits define the boundaries between the orchestration logic and the
//! virtualization host. Adapters implement these traits to provide concrete
//! functionality; tests substitute scripted fakes.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Timeout Budgets
// =============================================================================

/// Time budget for read-only remote queries
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Time budget for state-changing remote commands (joins, package work)
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(240);

/// Time budget for cheap availability probes
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Node Types
// =============================================================================

/// Role a node plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// First cluster member; sponsors joins and serves the share
    Primary,
    /// Additional cluster member joined via token
    Secondary,
    /// Consumer VM mounting the share, not a cluster member
    Client,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Secondary => write!(f, "secondary"),
            NodeRole::Client => write!(f, "client"),
        }
    }
}

/// Provisioning outcome for a requested node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Created,
    Failed,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Created => write!(f, "created"),
            NodeStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A requested cluster member, immutable once issued to provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Instance name, unique within the cluster
    pub name: String,
    /// Virtual CPU count
    pub cpus: u32,
    /// Memory size with unit suffix (e.g., "2G")
    pub memory: String,
    /// Disk size with unit suffix (e.g., "10G")
    pub disk: String,
    /// Base OS image (e.g., "22.04")
    pub image: String,
    /// Role within the cluster
    pub role: NodeRole,
}

/// An observed/managed cluster member
///
/// Live state (power state, addresses) is never stored here; it is fetched
/// on demand from the instance provider so stale assumptions cannot leak
/// into a later run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// The spec this node was provisioned from
    pub spec: NodeSpec,
    /// Provisioning outcome
    pub status: NodeStatus,
    /// When provisioning completed
    pub provisioned_at: chrono::DateTime<chrono::Utc>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn is_primary(&self) -> bool {
        self.spec.role == NodeRole::Primary
    }
}

/// Live instance state as reported by the virtualization host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Instance name
    pub name: String,
    /// Power state (e.g., "Running", "Stopped")
    #[serde(default)]
    pub state: String,
    /// IPv4 addresses, first entry is the management address
    #[serde(default)]
    pub ipv4: Vec<String>,
    /// Reported OS release
    #[serde(default)]
    pub release: String,
}

// =============================================================================
// Remote Executor Port
// =============================================================================

/// Port for running commands inside a named instance
///
/// Failure is a return value at this boundary, never a panic. Spawn errors,
/// timeouts, and non-zero exits all surface the same way so callers apply a
/// single policy per call site.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a side-effecting command on the named instance
    ///
    /// Returns `Error::Transport` when the command could not run, timed out
    /// within the caller-supplied budget, or exited non-zero.
    async fn execute(&self, node: &str, argv: &[&str], timeout: Duration) -> Result<()>;

    /// Run a read-only command on the named instance and capture stdout
    ///
    /// Returns `None` on any failure. Callers cannot distinguish a broken
    /// transport from genuinely empty state here and must treat absence as
    /// "presence unknown, assume absent".
    async fn execute_captured(&self, node: &str, argv: &[&str], timeout: Duration)
        -> Option<String>;
}

// =============================================================================
// Instance Provider Port
// =============================================================================

/// Port for instance lifecycle operations on the virtualization host
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    /// Check that the virtualization host tooling responds
    async fn is_available(&self) -> bool;

    /// Launch an instance from a spec, returning once it is running
    ///
    /// Launching a name that already exists is a success (the existing
    /// instance is reused), so repeated deploys converge instead of failing.
    async fn launch(&self, spec: &NodeSpec) -> Result<()>;

    /// List all instances known to the host
    async fn instances(&self) -> Result<Vec<InstanceInfo>>;

    /// Check whether a named instance exists
    async fn instance_exists(&self, name: &str) -> Result<bool> {
        Ok(self.instances().await?.iter().any(|i| i.name == name))
    }

    /// First IPv4 address of a named instance, if it has one
    async fn instance_ip(&self, name: &str) -> Option<String>;

    /// Stop and delete the named instances, then purge deleted state
    async fn remove_instances(&self, names: &[String]) -> Result<()>;
}

// =============================================================================
// Reconciler Port
// =============================================================================

/// Port for idempotent per-resource reconciliation
///
/// Orchestration always consults `exists` before `apply`, so an `apply` may
/// assume the resource is absent. `exists` must be side-effect free and must
/// read absence out of unreadable state rather than erroring.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Short resource label used in step logging
    fn resource(&self) -> &str;

    /// Report whether the resource is already present on the node
    async fn exists(&self, node: &str) -> bool;

    /// Perform the creating action on the node
    async fn apply(&self, node: &str) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ExecutorRef = Arc<dyn RemoteExecutor>;
pub type InstanceProviderRef = Arc<dyn InstanceProvider>;
