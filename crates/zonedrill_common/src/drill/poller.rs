//! Convergence poller
//!
//! `Waiting -> Converged | TimedOut | Cancelled`. Every tick samples the
//! scheduler from scratch:
//!
//! ```text
//! converged = running == desired
//!             && every running instance resolves to a subnet in the target set
//! ```
//!
//! An instance whose placement cannot be resolved counts against convergence,
//! and is reported separately from instances that resolved outside the target
//! so "still converging" can be told apart from "scheduler is stuck".

use super::backoff::PollConfig;
use crate::cancel::CancelToken;
use crate::error::{ApiError, DrillError, Result, Step};
use crate::providers::{ComputeCluster, NetworkTopologyApi};
use crate::types::{
    ConvergenceObservation, InstanceId, Placement, PlacementRecord, ServiceKey, SubnetId,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why a tick did not converge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pending {
    pub running_count: u32,
    pub desired_count: u32,
    /// Resolved, but to a subnet outside the target set
    pub outside_target: Vec<PlacementRecord>,
    /// Placement could not be determined this tick
    pub unresolved: Vec<InstanceId>,
    /// The tick could not sample the scheduler at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_error: Option<String>,
}

impl Pending {
    pub fn count_matches(&self) -> bool {
        self.api_error.is_none() && self.running_count == self.desired_count
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        if let Some(err) = &self.api_error {
            return format!("scheduler unavailable: {}", err);
        }
        let mut parts = Vec::new();
        if self.running_count != self.desired_count {
            parts.push(format!(
                "running {}/{}",
                self.running_count, self.desired_count
            ));
        }
        if !self.outside_target.is_empty() {
            parts.push(format!("{} outside target", self.outside_target.len()));
        }
        if !self.unresolved.is_empty() {
            parts.push(format!("{} unresolved", self.unresolved.len()));
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Converged,
    Pending(Pending),
}

/// Evaluate the convergence predicate against one observation
pub fn evaluate(observation: &ConvergenceObservation, target: &BTreeSet<SubnetId>) -> Verdict {
    let outside_target: Vec<PlacementRecord> = observation
        .resolved()
        .filter(|record| !target.contains(&record.resolved_subnet))
        .cloned()
        .collect();
    let unresolved = observation.unresolved();

    if observation.running_count == observation.desired_count
        && outside_target.is_empty()
        && unresolved.is_empty()
    {
        return Verdict::Converged;
    }

    Verdict::Pending(Pending {
        running_count: observation.running_count,
        desired_count: observation.desired_count,
        outside_target,
        unresolved,
        api_error: None,
    })
}

/// Terminal state of a convergence wait
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConvergenceOutcome {
    Converged {
        observation: ConvergenceObservation,
        ticks: u32,
        elapsed_ms: u64,
    },
    TimedOut {
        last: Option<ConvergenceObservation>,
        pending: Option<Pending>,
        ticks: u32,
        elapsed_ms: u64,
    },
    Cancelled {
        last: Option<ConvergenceObservation>,
        ticks: u32,
        elapsed_ms: u64,
    },
}

impl ConvergenceOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceOutcome::Converged { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConvergenceOutcome::Converged { .. } => "converged",
            ConvergenceOutcome::TimedOut { .. } => "timed_out",
            ConvergenceOutcome::Cancelled { .. } => "cancelled",
        }
    }

    pub fn ticks(&self) -> u32 {
        match self {
            ConvergenceOutcome::Converged { ticks, .. }
            | ConvergenceOutcome::TimedOut { ticks, .. }
            | ConvergenceOutcome::Cancelled { ticks, .. } => *ticks,
        }
    }

    /// Latest observation, if any tick sampled the scheduler
    pub fn observation(&self) -> Option<&ConvergenceObservation> {
        match self {
            ConvergenceOutcome::Converged { observation, .. } => Some(observation),
            ConvergenceOutcome::TimedOut { last, .. }
            | ConvergenceOutcome::Cancelled { last, .. } => last.as_ref(),
        }
    }
}

enum TickError {
    /// Counted as a pending tick
    Transient(ApiError),
    Fatal(DrillError),
}

/// Take one fresh sample of the scheduler. Any error other than
/// `Unavailable` is fatal.
async fn observe(
    cluster: &dyn ComputeCluster,
    network: &dyn NetworkTopologyApi,
    key: &ServiceKey,
) -> std::result::Result<ConvergenceObservation, TickError> {
    // Only an unreachable scheduler is worth another tick
    let classify = |e: ApiError| match e {
        ApiError::Unavailable(_) => TickError::Transient(e),
        other => TickError::Fatal(DrillError::from_api(key, Step::Poll, other)),
    };

    let description = cluster.describe_service(key).await.map_err(classify)?;
    let instances = cluster.list_running_instances(key).await.map_err(classify)?;

    let resolutions = join_all(
        instances
            .iter()
            .map(|id| network.resolve_instance_placement(key, id)),
    )
    .await;

    let placements = instances
        .iter()
        .zip(resolutions)
        .map(|(id, resolution)| match resolution {
            Ok(record) => Placement::Resolved(record),
            Err(e) => Placement::Unresolved {
                instance_id: id.clone(),
                reason: e.to_string(),
            },
        })
        .collect();

    Ok(ConvergenceObservation {
        desired_count: description.desired_count,
        running_count: instances.len() as u32,
        placements,
    })
}

/// Poll until the service converges on `target`, the deadline or tick cap
/// passes, or `cancel` is raised. Never touches the applied configuration.
pub async fn wait_for_convergence(
    cluster: &dyn ComputeCluster,
    network: &dyn NetworkTopologyApi,
    key: &ServiceKey,
    target: &BTreeSet<SubnetId>,
    config: &PollConfig,
    cancel: &CancelToken,
) -> Result<ConvergenceOutcome> {
    let started = Instant::now();
    let deadline = started + config.deadline;
    let elapsed_ms = || started.elapsed().as_millis() as u64;

    let mut ticks: u32 = 0;
    let mut last: Option<ConvergenceObservation> = None;
    let mut pending: Option<Pending> = None;

    loop {
        if cancel.is_cancelled() {
            info!(cluster = %key.cluster, service = %key.service, step = "poll", ticks, "Convergence wait cancelled");
            return Ok(ConvergenceOutcome::Cancelled {
                last,
                ticks,
                elapsed_ms: elapsed_ms(),
            });
        }

        ticks += 1;
        match observe(cluster, network, key).await {
            Ok(observation) => match evaluate(&observation, target) {
                Verdict::Converged => {
                    info!(
                        cluster = %key.cluster,
                        service = %key.service,
                        step = "poll",
                        ticks,
                        running = observation.running_count,
                        "Service converged"
                    );
                    return Ok(ConvergenceOutcome::Converged {
                        observation,
                        ticks,
                        elapsed_ms: elapsed_ms(),
                    });
                }
                Verdict::Pending(reason) => {
                    info!(
                        cluster = %key.cluster,
                        service = %key.service,
                        step = "poll",
                        tick = ticks,
                        running = observation.running_count,
                        desired = observation.desired_count,
                        "Waiting: {}",
                        reason.summary()
                    );
                    last = Some(observation);
                    pending = Some(reason);
                }
            },
            Err(TickError::Transient(api_error)) => {
                warn!(
                    cluster = %key.cluster,
                    service = %key.service,
                    step = "poll",
                    tick = ticks,
                    "Tick could not sample scheduler: {}", api_error
                );
                pending = Some(Pending {
                    api_error: Some(api_error.to_string()),
                    ..Default::default()
                });
            }
            Err(TickError::Fatal(fatal)) => return Err(fatal),
        }

        let now = Instant::now();
        if config.ticks_exhausted(ticks) || now >= deadline {
            warn!(
                cluster = %key.cluster,
                service = %key.service,
                step = "poll",
                ticks,
                "Convergence not reached before the bound; configuration left as applied"
            );
            return Ok(ConvergenceOutcome::TimedOut {
                last,
                pending,
                ticks,
                elapsed_ms: elapsed_ms(),
            });
        }

        let delay: Duration = config.delay(ticks - 1).min(deadline - now);
        debug!(delay_ms = delay.as_millis() as u64, "Sleeping before next tick");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {}
        }
    }
}
