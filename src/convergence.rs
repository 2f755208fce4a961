//! Bounded convergence polling
//!
//! Creation commands return as soon as the request is accepted, not when the
//! resource is usable. This module provides the generic wait primitive used
//! to bridge that gap: repeatedly probe, delay between attempts, and give up
//! once a hard wall-clock budget is spent.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Verdict of a single readiness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The resource is usable
    Ready,
    /// The resource reported an explicit in-progress marker
    Settling,
    /// Probe output was missing or unrecognized
    Unknown,
}

/// Delay and budget settings for a convergence wait
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Hard wall-clock budget for the whole wait
    pub budget: Duration,
    /// Delay before the next attempt after an inconclusive probe
    pub interval: Duration,
    /// Longer delay while the resource reports it is still settling
    pub settle_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(300),
            interval: Duration::from_secs(5),
            settle_interval: Duration::from_secs(10),
        }
    }
}

/// Repeatedly invoke `probe` until it reports ready or the budget is spent
///
/// Attempts run only while elapsed time is under the budget; once the
/// deadline passes, no further probe runs and `TimeoutExceeded` is returned.
/// `what` names the awaited condition in logs and the timeout error.
pub async fn poll_until_ready<F, Fut>(what: &str, config: &PollConfig, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Readiness>,
{
    let started = Instant::now();
    while started.elapsed() < config.budget {
        match probe().await {
            Readiness::Ready => {
                debug!(
                    what,
                    elapsed_secs = started.elapsed().as_secs(),
                    "condition reached"
                );
                return Ok(());
            }
            Readiness::Settling => {
                debug!(what, "still settling, delaying next probe");
                tokio::time::sleep(config.settle_interval).await;
            }
            Readiness::Unknown => {
                debug!(what, "probe inconclusive, delaying next probe");
                tokio::time::sleep(config.interval).await;
            }
        }
    }
    Err(Error::TimeoutExceeded {
        what: what.to_string(),
        budget: config.budget,
    })
}
