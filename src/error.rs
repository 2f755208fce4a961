//! Error types for the MicroCeph orchestrator
//!
//! Provides structured error types for all components including instance
//! provisioning, cluster membership, filesystem setup, and the remote
//! execution transport.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No supported hypervisor found: {0}")]
    HypervisorUnavailable(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("Remote command failed on {node}: {detail}")]
    Transport { node: String, detail: String },

    #[error("Instance launch failed for {name}: {reason}")]
    LaunchFailed { name: String, reason: String },

    // =========================================================================
    // Cluster Errors
    // =========================================================================
    #[error("No join token issued for {node}")]
    TokenUnavailable { node: String },

    #[error("Precondition unmet: {0}")]
    PreconditionUnmet(String),

    #[error("Only {succeeded} of {requested} nodes provisioned")]
    PartialSuccess { succeeded: usize, requested: usize },

    // =========================================================================
    // Convergence Errors
    // =========================================================================
    #[error("Timed out after {}s waiting for {what}", .budget.as_secs())]
    TimeoutExceeded { what: String, budget: Duration },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML render error: {0}")]
    YamlRender(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error came from the remote transport rather than
    /// cluster logic. Read-only queries absorb these as "state unknown";
    /// write actions surface them.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::LaunchFailed { .. })
    }

    /// Check if a later run could succeed without operator intervention
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Configuration(_) | Error::HypervisorUnavailable(_)
        )
    }
}

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, Error>;
