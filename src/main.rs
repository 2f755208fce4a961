//! MicroCeph Orchestrator
//!
//! Deploys a MicroCeph storage cluster on local VMs, from blank host to a
//! mounted CephFS filesystem exported over Samba, in one command.
//!
//! ```text
//! provision nodes -> establish membership -> attach OSDs
//!     -> create filesystem -> mount + export -> (optional) client VM
//! ```
//!
//! Every phase reconciles toward the desired state, so re-running `deploy`
//! against a live cluster performs no actions.

use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use microceph_orchestrator::{
    hypervisor, ClusterConfig, ClusterOrchestrator, Error, ExecutorRef, FilesystemConfig,
    InstanceProvider, InstanceProviderRef, MultipassClient, MultipassConfig, OrchestratorConfig,
    PollConfig, Result, ShareConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// MicroCeph Orchestrator - Automated Storage Cluster Deployment
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy the cluster, or converge an existing one
    Deploy(DeployArgs),
    /// Remove every cluster VM and purge its state
    Destroy(DestroyArgs),
    /// Show cluster VMs and membership
    Status(StatusArgs),
}

#[derive(Args, Debug)]
struct DeployArgs {
    /// Number of cluster members
    #[arg(long, env = "CLUSTER_NODES", default_value = "2")]
    nodes: u32,

    /// Name prefix for cluster members
    #[arg(long, env = "CLUSTER_BASE_NAME", default_value = "ceph-node")]
    base_name: String,

    /// Virtual CPUs per member
    #[arg(long, env = "CLUSTER_CPUS", default_value = "2")]
    cpus: u32,

    /// Memory per member
    #[arg(long, env = "CLUSTER_RAM", default_value = "2G")]
    ram: String,

    /// Disk per member
    #[arg(long, env = "CLUSTER_DISK", default_value = "10G")]
    disk: String,

    /// Ubuntu image to launch
    #[arg(long, env = "CLUSTER_OS", default_value = "22.04")]
    os: String,

    /// Also provision a client VM that mounts the share over CIFS
    #[arg(long, env = "WITH_CLIENT")]
    with_client: bool,

    /// Samba share name
    #[arg(long, env = "SHARE_NAME", default_value = "CephFS")]
    share_name: String,

    /// Samba account used to access the share
    #[arg(long, env = "SHARE_USER", default_value = "sambauser")]
    share_user: String,

    /// Password for the Samba account
    #[arg(long, env = "SHARE_PASSWORD", default_value = "samba123")]
    share_password: String,

    /// Where the filesystem is mounted and exported from
    #[arg(long, env = "MOUNT_POINT", default_value = "/mnt/cephfs")]
    mount_point: String,
}

#[derive(Args, Debug)]
struct DestroyArgs {
    /// Name prefix of the cluster to remove
    #[arg(long, env = "CLUSTER_BASE_NAME", default_value = "ceph-node")]
    base_name: String,

    /// Skip the confirmation step
    #[arg(long)]
    yes: bool,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Name prefix of the cluster to inspect
    #[arg(long, env = "CLUSTER_BASE_NAME", default_value = "ceph-node")]
    base_name: String,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli);

    match cli.command {
        Command::Deploy(args) => deploy(args).await?,
        Command::Destroy(args) => destroy(args).await?,
        Command::Status(args) => status(args).await?,
    }
    Ok(())
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn deploy(args: DeployArgs) -> Result<()> {
    info!("Starting MicroCeph cluster deployment");
    info!("  Version: {}", microceph_orchestrator::VERSION);
    info!(
        "  Nodes: {} x {} vCPU / {} RAM / {} disk",
        args.nodes, args.cpus, args.ram, args.disk
    );
    info!("  Image: Ubuntu {}", args.os);
    info!("  With client: {}", args.with_client);

    let multipass = connect().await?;
    let detail = hypervisor::require().await?;
    info!("Hypervisor: {}", detail);

    let config = OrchestratorConfig {
        cluster: ClusterConfig {
            base_name: args.base_name,
            node_count: args.nodes,
            cpus: args.cpus,
            memory: args.ram,
            disk: args.disk,
            image: args.os,
        },
        filesystem: FilesystemConfig::default(),
        share: ShareConfig {
            share_name: args.share_name,
            username: args.share_user,
            password: args.share_password,
            mount_point: args.mount_point,
        },
        poll: PollConfig::default(),
        with_client: args.with_client,
    };

    let mut orchestrator = ClusterOrchestrator::new(
        config,
        Arc::clone(&multipass) as ExecutorRef,
        multipass as InstanceProviderRef,
    );

    let summary = orchestrator.deploy().await?;

    println!();
    println!("{}", "=".repeat(60));
    println!("Deployment complete");
    println!("{}", "=".repeat(60));
    for node in &summary.nodes {
        println!(
            "  {} ({}): {}",
            node.name,
            node.role,
            node.address.as_deref().unwrap_or("no address")
        );
    }
    if let Some(client) = &summary.client {
        println!(
            "  {} ({}): {}",
            client.name,
            client.role,
            client.address.as_deref().unwrap_or("no address")
        );
    }
    println!();
    println!("  Share name:  {}", summary.share_name);
    println!("  Username:    {}", summary.username);
    println!("  Password:    {}", summary.password);
    println!("  Mount point: {}", summary.mount_point);
    if let Some(path) = &summary.share_path {
        println!("  Share path:  {}", path);
    }
    println!("{}", "=".repeat(60));

    Ok(())
}

async fn destroy(args: DestroyArgs) -> Result<()> {
    if !args.yes {
        println!(
            "This removes every '{}' VM and the client VM, then purges their disks.",
            args.base_name
        );
        println!("Re-run with --yes to confirm.");
        return Ok(());
    }

    let multipass = connect().await?;
    let orchestrator = orchestrator_for(&args.base_name, multipass);

    let removed = orchestrator.destroy().await?;
    if removed.is_empty() {
        println!("No cluster instances found.");
    } else {
        println!("Removed: {}", removed.join(", "));
    }
    Ok(())
}

async fn status(args: StatusArgs) -> Result<()> {
    let multipass = connect().await?;
    let orchestrator = orchestrator_for(&args.base_name, multipass);

    let status = orchestrator.status().await?;
    if status.instances.is_empty() {
        println!("No cluster instances found.");
        return Ok(());
    }

    println!("Instances:");
    for instance in &status.instances {
        let address = instance.ipv4.first().map(String::as_str).unwrap_or("-");
        println!("  {} [{}] {}", instance.name, instance.state, address);
    }
    if status.members.is_empty() {
        println!("Cluster members: none reported");
    } else {
        println!("Cluster members: {}", status.members.join(", "));
    }
    Ok(())
}

/// Fail early when the multipass CLI itself is missing or wedged
async fn connect() -> Result<Arc<MultipassClient>> {
    let multipass = Arc::new(MultipassClient::new(MultipassConfig::default()));
    if !multipass.is_available().await {
        return Err(Error::Configuration(
            "multipass is not installed or not responding".to_string(),
        ));
    }
    Ok(multipass)
}

fn orchestrator_for(base_name: &str, multipass: Arc<MultipassClient>) -> ClusterOrchestrator {
    let config = OrchestratorConfig {
        cluster: ClusterConfig {
            base_name: base_name.to_string(),
            ..ClusterConfig::default()
        },
        ..OrchestratorConfig::default()
    };
    ClusterOrchestrator::new(
        config,
        Arc::clone(&multipass) as ExecutorRef,
        multipass as InstanceProviderRef,
    )
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
