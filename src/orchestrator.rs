//! Cluster Orchestrator - the deploy state machine
//!
//! Drives a deployment through its phases in order: provision the member
//! VMs, establish cluster membership, attach one OSD per member, create the
//! filesystem, mount and export it, and optionally provision a consumer VM.
//! Phases run strictly in sequence on the calling task; a phase starts only
//! after the previous one succeeded, and the first phase error ends the run
//! in `Failed`.
//!
//! Every phase is built from reconcilers, so a rerun against an already
//! converged cluster settles into pure reads and performs no actions.

use crate::convergence::PollConfig;
use crate::domain::ports::{
    ExecutorRef, InstanceInfo, InstanceProviderRef, Node, NodeRole, NodeSpec, NodeStatus,
    Reconciler,
};
use crate::error::{Error, Result};
use crate::reconcile::{
    ClientAccessReconciler, FilesystemConfig, FilesystemReconciler, MembershipReconciler,
    MountReconciler, OsdReconciler, PoolPairReconciler, ShareConfig, ShareReconciler,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Name of the consumer VM
pub const CLIENT_NAME: &str = "ceph-client";

// =============================================================================
// Cluster Configuration
// =============================================================================

/// Shape and sizing of the cluster VMs
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Name prefix for members; full names are `<base_name>-<n>` from one
    pub base_name: String,
    /// Number of members; the first is the primary
    pub node_count: u32,
    /// Virtual CPUs per member
    pub cpus: u32,
    /// Memory per member, with unit suffix
    pub memory: String,
    /// Disk per member, with unit suffix
    pub disk: String,
    /// Base OS image for every VM
    pub image: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            base_name: "ceph-node".into(),
            node_count: 2,
            cpus: 2,
            memory: "2G".into(),
            disk: "10G".into(),
            image: "22.04".into(),
        }
    }
}

impl ClusterConfig {
    /// Name of the member at `index`, counted from zero
    pub fn node_name(&self, index: u32) -> String {
        format!("{}-{}", self.base_name, index + 1)
    }

    /// Name of the primary, always the first member
    pub fn primary_name(&self) -> String {
        self.node_name(0)
    }

    /// Specs for all members in provisioning order, primary first
    pub fn node_specs(&self) -> Vec<NodeSpec> {
        (0..self.node_count)
            .map(|index| NodeSpec {
                name: self.node_name(index),
                cpus: self.cpus,
                memory: self.memory.clone(),
                disk: self.disk.clone(),
                image: self.image.clone(),
                role: if index == 0 {
                    NodeRole::Primary
                } else {
                    NodeRole::Secondary
                },
            })
            .collect()
    }

    /// Spec for the consumer VM, sized smaller than members
    pub fn client_spec(&self) -> NodeSpec {
        NodeSpec {
            name: CLIENT_NAME.into(),
            cpus: 1,
            memory: "1G".into(),
            disk: "5G".into(),
            image: self.image.clone(),
            role: NodeRole::Client,
        }
    }

    /// Whether an instance name belongs to this cluster
    ///
    /// Ownership is by name prefix, so members beyond the currently
    /// configured count are still recognized when tearing down or
    /// inspecting a cluster deployed with a different size.
    pub fn owns_instance(&self, name: &str) -> bool {
        name == CLIENT_NAME || name.starts_with(&self.base_name)
    }
}

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Everything a deploy run needs, assembled up front
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Cluster shape and sizing
    pub cluster: ClusterConfig,
    /// Filesystem and pool naming
    pub filesystem: FilesystemConfig,
    /// Share identity and credentials
    pub share: ShareConfig,
    /// Delay and budget settings for convergence waits
    pub poll: PollConfig,
    /// Also provision the consumer VM after the cluster converges
    pub with_client: bool,
}

// =============================================================================
// Deploy Phase
// =============================================================================

/// Phase of a deploy run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    ProvisioningNodes,
    EstablishingMembership,
    AttachingOsds,
    CreatingFilesystem,
    MountingFilesystem,
    ProvisioningClient,
    Done,
    Failed,
}

impl std::fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeployPhase::ProvisioningNodes => "provisioning nodes",
            DeployPhase::EstablishingMembership => "establishing membership",
            DeployPhase::AttachingOsds => "attaching osds",
            DeployPhase::CreatingFilesystem => "creating filesystem",
            DeployPhase::MountingFilesystem => "mounting filesystem",
            DeployPhase::ProvisioningClient => "provisioning client",
            DeployPhase::Done => "done",
            DeployPhase::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

// =============================================================================
// Deploy Summary
// =============================================================================

/// One VM's name, role, and management address
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub role: NodeRole,
    pub address: Option<String>,
}

/// Endpoint and credential summary for a completed deploy
#[derive(Debug, Clone, Serialize)]
pub struct DeploySummary {
    /// Members in provisioning order
    pub nodes: Vec<NodeReport>,
    /// The consumer VM, when one was requested
    pub client: Option<NodeReport>,
    /// UNC path of the export, when the primary has an address
    pub share_path: Option<String>,
    pub share_name: String,
    pub username: String,
    pub password: String,
    pub mount_point: String,
}

/// Live view of the cluster VMs and membership
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    /// Cluster-owned instances known to the virtualization host
    pub instances: Vec<InstanceInfo>,
    /// Member names as the primary's member table reports them
    pub members: Vec<String>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Deploys and manages one storage cluster
pub struct ClusterOrchestrator {
    config: OrchestratorConfig,
    filesystem: Arc<FilesystemConfig>,
    share: Arc<ShareConfig>,
    executor: ExecutorRef,
    instances: InstanceProviderRef,
    /// Members tracked by the current run, in provisioning order
    nodes: Vec<Node>,
    phase: DeployPhase,
}

impl ClusterOrchestrator {
    /// Create an orchestrator over the given host ports
    pub fn new(
        config: OrchestratorConfig,
        executor: ExecutorRef,
        instances: InstanceProviderRef,
    ) -> Self {
        let filesystem = Arc::new(config.filesystem.clone());
        let share = Arc::new(config.share.clone());
        Self {
            config,
            filesystem,
            share,
            executor,
            instances,
            nodes: Vec::new(),
            phase: DeployPhase::ProvisioningNodes,
        }
    }

    /// Current phase of the deploy run
    pub fn phase(&self) -> DeployPhase {
        self.phase
    }

    /// Run the full deploy to completion
    pub async fn deploy(&mut self) -> Result<DeploySummary> {
        if let Err(err) = self.run_phases().await {
            error!("Deploy failed while {}: {}", self.phase, err);
            self.phase = DeployPhase::Failed;
            return Err(err);
        }
        self.phase = DeployPhase::Done;
        info!("Deploy complete");
        Ok(self.summarize().await)
    }

    async fn run_phases(&mut self) -> Result<()> {
        self.enter(DeployPhase::ProvisioningNodes);
        self.provision_nodes().await?;
        self.enter(DeployPhase::EstablishingMembership);
        self.establish_membership().await?;
        self.enter(DeployPhase::AttachingOsds);
        self.attach_osds().await?;
        self.enter(DeployPhase::CreatingFilesystem);
        self.create_filesystem().await?;
        self.enter(DeployPhase::MountingFilesystem);
        self.mount_filesystem().await?;
        if self.config.with_client {
            self.enter(DeployPhase::ProvisioningClient);
            self.provision_client().await?;
        }
        Ok(())
    }

    fn enter(&mut self, phase: DeployPhase) {
        self.phase = phase;
        info!("Phase started: {}", phase);
    }

    /// One idempotence step: skip when present, create when absent
    async fn reconcile_on(&self, reconciler: &dyn Reconciler, node: &str) -> Result<()> {
        if reconciler.exists(node).await {
            info!("{} on {} already present, skipping", reconciler.resource(), node);
            return Ok(());
        }
        info!("Creating {} on {}", reconciler.resource(), node);
        reconciler.apply(node).await
    }

    /// Launch every member VM, primary first
    ///
    /// Launch failures do not stop the loop; every requested member gets its
    /// attempt, and the shortfall is reported once at the end.
    async fn provision_nodes(&mut self) -> Result<()> {
        let specs = self.config.cluster.node_specs();
        let requested = specs.len();
        self.nodes.clear();

        for spec in specs {
            let status = match self.instances.launch(&spec).await {
                Ok(()) => {
                    info!("Provisioned node {} ({})", spec.name, spec.role);
                    NodeStatus::Created
                }
                Err(err) => {
                    error!("Provisioning {} failed: {}", spec.name, err);
                    NodeStatus::Failed
                }
            };
            self.nodes.push(Node {
                spec,
                status,
                provisioned_at: chrono::Utc::now(),
            });
        }

        let succeeded = self
            .nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Created)
            .count();
        if succeeded < requested {
            return Err(Error::PartialSuccess {
                succeeded,
                requested,
            });
        }
        Ok(())
    }

    /// Join every member into the cluster sponsored by the primary
    ///
    /// The member table is read once up front. The primary never joins (it
    /// bootstrapped the cluster at launch), already-listed members are
    /// skipped, and the first join failure aborts the remaining joins.
    async fn establish_membership(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::PreconditionUnmet(
                "no provisioned nodes to form a cluster from".into(),
            ));
        }

        let primary = self.config.cluster.primary_name();
        let membership = MembershipReconciler::new(
            Arc::clone(&self.executor),
            &primary,
            &self.config.cluster.base_name,
        );

        let joined = membership.joined_nodes().await;
        if self.nodes.iter().all(|node| joined.contains(node.name())) {
            info!("All nodes are already cluster members");
            return Ok(());
        }

        for node in &self.nodes {
            if node.is_primary() {
                continue;
            }
            if joined.contains(node.name()) {
                info!("Node {} is already a member, skipping join", node.name());
                continue;
            }
            membership.apply(node.name()).await?;
        }
        Ok(())
    }

    /// Attach one OSD per member
    ///
    /// An attach failure aborts the phase. A successful attach that is still
    /// not visible in the disk table only warns, since listing lag is not
    /// worth failing a deploy over.
    async fn attach_osds(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::PreconditionUnmet(
                "no provisioned nodes to attach osds to".into(),
            ));
        }

        let osds = OsdReconciler::new(Arc::clone(&self.executor));
        for node in &self.nodes {
            let name = node.name();
            if osds.exists(name).await {
                info!("Node {} already has an osd, skipping", name);
                continue;
            }
            osds.apply(name).await?;
            if !osds.exists(name).await {
                warn!("OSD on {} not visible after attach", name);
            }
        }
        Ok(())
    }

    /// Create the backing pool pair and the filesystem on the primary
    async fn create_filesystem(&self) -> Result<()> {
        let primary = self.config.cluster.primary_name();
        let pools =
            PoolPairReconciler::new(Arc::clone(&self.executor), Arc::clone(&self.filesystem));
        self.reconcile_on(&pools, &primary).await?;

        let filesystem =
            FilesystemReconciler::new(Arc::clone(&self.executor), Arc::clone(&self.filesystem));
        self.reconcile_on(&filesystem, &primary).await
    }

    /// Mount the filesystem on every member and export it from the primary
    ///
    /// Per-node mount failures are logged and the loop continues; one bad
    /// mount should not take down an otherwise converged deploy. The share
    /// export is likewise best effort.
    async fn mount_filesystem(&self) -> Result<()> {
        let primary = self.config.cluster.primary_name();
        let mounts = MountReconciler::new(
            Arc::clone(&self.executor),
            Arc::clone(&self.filesystem),
            &primary,
            &self.share.mount_point,
            self.config.poll.clone(),
        );
        for node in &self.nodes {
            if let Err(err) = self.reconcile_on(&mounts, node.name()).await {
                warn!("Mount on {} failed, continuing: {}", node.name(), err);
            }
        }

        let share = ShareReconciler::new(Arc::clone(&self.executor), Arc::clone(&self.share));
        if let Err(err) = self.reconcile_on(&share, &primary).await {
            error!("Share configuration on {} failed: {}", primary, err);
        }
        Ok(())
    }

    /// Provision the consumer VM and mount the export on it
    async fn provision_client(&self) -> Result<()> {
        let spec = self.config.cluster.client_spec();
        self.instances.launch(&spec).await?;

        let primary = self.config.cluster.primary_name();
        let address = self
            .instances
            .instance_ip(&primary)
            .await
            .ok_or_else(|| {
                Error::PreconditionUnmet(format!("primary {} has no reachable address", primary))
            })?;

        let access = ClientAccessReconciler::new(
            Arc::clone(&self.executor),
            Arc::clone(&self.share),
            &address,
        );
        self.reconcile_on(&access, &spec.name).await
    }

    async fn summarize(&self) -> DeploySummary {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            nodes.push(NodeReport {
                name: node.name().to_string(),
                role: node.spec.role,
                address: self.instances.instance_ip(node.name()).await,
            });
        }

        let client = if self.config.with_client {
            Some(NodeReport {
                name: CLIENT_NAME.to_string(),
                role: NodeRole::Client,
                address: self.instances.instance_ip(CLIENT_NAME).await,
            })
        } else {
            None
        };

        let primary_address = nodes
            .iter()
            .find(|node| node.role == NodeRole::Primary)
            .and_then(|node| node.address.clone());
        let share_path =
            primary_address.map(|ip| format!(r"\\{}\{}", ip, self.share.share_name));

        DeploySummary {
            nodes,
            client,
            share_path,
            share_name: self.share.share_name.clone(),
            username: self.share.username.clone(),
            password: self.share.password.clone(),
            mount_point: self.share.mount_point.clone(),
        }
    }

    /// Remove every VM the cluster owns
    ///
    /// Only names the host actually knows are removed, so tearing down a
    /// half-built cluster succeeds. Returns the names that were removed.
    pub async fn destroy(&self) -> Result<Vec<String>> {
        let targets: Vec<String> = self
            .instances
            .instances()
            .await?
            .into_iter()
            .map(|instance| instance.name)
            .filter(|name| self.config.cluster.owns_instance(name))
            .collect();

        if targets.is_empty() {
            info!("No cluster instances to remove");
            return Ok(targets);
        }
        self.instances.remove_instances(&targets).await?;
        info!("Removed {} instances", targets.len());
        Ok(targets)
    }

    /// Live instance states plus the member table as the primary sees it
    pub async fn status(&self) -> Result<ClusterStatus> {
        let instances: Vec<InstanceInfo> = self
            .instances
            .instances()
            .await?
            .into_iter()
            .filter(|instance| self.config.cluster.owns_instance(&instance.name))
            .collect();

        let primary = self.config.cluster.primary_name();
        let membership = MembershipReconciler::new(
            Arc::clone(&self.executor),
            &primary,
            &self.config.cluster.base_name,
        );
        let members = membership.joined_nodes().await.into_iter().collect();

        Ok(ClusterStatus { instances, members })
    }
}
