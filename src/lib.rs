//! MicroCeph Orchestrator - Automated Storage Cluster Deployment
//!
//! Deploys a multi-node MicroCeph cluster on local Multipass VMs: member
//! provisioning, cluster membership, OSD attachment, CephFS creation and
//! mounting, and a Samba export, with an optional consumer VM mounting the
//! share over CIFS.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Cluster Orchestrator                       │
//! │   provision -> membership -> osds -> filesystem -> mount         │
//! │                                          -> client (optional)    │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                           Reconcilers                            │
//! │  ┌────────────┐ ┌─────┐ ┌─────────────┐ ┌───────┐ ┌───────────┐ │
//! │  │ membership │ │ osd │ │ pools + fs  │ │ mount │ │   share   │ │
//! │  └────────────┘ └─────┘ └─────────────┘ └───────┘ └───────────┘ │
//! ├──────────────────────────────────────────────────────────────────┤
//! │         Convergence Poller            Table Parser               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │               RemoteExecutor / InstanceProvider                  │
//! │                      (Multipass adapter)                         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every resource goes through the same cycle: check whether it already
//! exists, create it only when absent. Rerunning a deploy against a
//! converged cluster therefore performs no actions.
//!
//! # Modules
//!
//! - [`orchestrator`]: Deploy state machine and cluster lifecycle
//! - [`reconcile`]: Idempotent per-resource reconcilers
//! - [`convergence`]: Bounded polling for resources that settle slowly
//! - [`table`]: Text table parsing for CLI output
//! - [`multipass`]: Multipass adapter implementing the host ports
//! - [`hypervisor`]: Host hypervisor preflight
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod convergence;
pub mod domain;
pub mod error;
pub mod hypervisor;
pub mod multipass;
pub mod orchestrator;
pub mod reconcile;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use convergence::{PollConfig, Readiness};

pub use domain::ports::{
    ExecutorRef, InstanceInfo, InstanceProvider, InstanceProviderRef, Node, NodeRole, NodeSpec,
    NodeStatus, Reconciler, RemoteExecutor,
};

pub use error::{Error, Result};

pub use multipass::{MultipassClient, MultipassConfig};

pub use orchestrator::{
    ClusterConfig, ClusterOrchestrator, ClusterStatus, DeployPhase, DeploySummary,
    OrchestratorConfig,
};

pub use reconcile::{FilesystemConfig, ShareConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
