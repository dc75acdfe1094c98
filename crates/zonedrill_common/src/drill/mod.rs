//! Failover / restore reconciliation controller
//!
//! Failover: snapshot -> plan -> apply -> evict -> poll.
//! Restore:  load snapshot -> apply original subnets -> poll.
//!
//! Steps run strictly in sequence for one (cluster, service) pair. The
//! apply call is acknowledged before eviction starts, and eviction finishes
//! before the first poll tick. Nothing here ever rolls back an applied
//! configuration.

pub mod applier;
pub mod backoff;
pub mod evictor;
pub mod planner;
pub mod poller;
pub mod report;
pub mod snapshotter;

pub use backoff::PollConfig;
pub use evictor::EvictionReport;
pub use poller::{evaluate, ConvergenceOutcome, Pending, Verdict};
pub use report::DrillReport;

use crate::cancel::CancelToken;
use crate::error::{DrillError, Result, Step};
use crate::notify::{publish_detached, Notifier};
use crate::providers::{ComputeCluster, NetworkTopologyApi};
use crate::snapshot::SnapshotStore;
use crate::types::{AvailabilityZone, Operation, ServiceKey};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct DrillController {
    cluster: Arc<dyn ComputeCluster>,
    network: Arc<dyn NetworkTopologyApi>,
    store: Arc<dyn SnapshotStore>,
    notifier: Option<Arc<dyn Notifier>>,
    subject_prefix: String,
    /// Notifications spawned but not yet awaited
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    poll: PollConfig,
    region: String,
}

impl DrillController {
    pub fn new(
        cluster: Arc<dyn ComputeCluster>,
        network: Arc<dyn NetworkTopologyApi>,
        store: Arc<dyn SnapshotStore>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            network,
            store,
            notifier: None,
            subject_prefix: "[zonedrill]".to_string(),
            in_flight: Mutex::new(Vec::new()),
            poll: PollConfig::default(),
            region: region.into(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>, subject_prefix: &str) -> Self {
        self.notifier = Some(notifier);
        self.subject_prefix = subject_prefix.to_string();
        self
    }

    /// Simulate the loss of `excluded_az` for the service and wait for the
    /// scheduler to settle on the remaining zones.
    pub async fn failover(
        &self,
        key: &ServiceKey,
        excluded_az: &AvailabilityZone,
        cancel: &CancelToken,
    ) -> Result<DrillReport> {
        let started_at = Utc::now();
        info!(cluster = %key.cluster, service = %key.service, az = %excluded_az, "Starting failover drill");
        self.notify(
            key,
            Operation::Failover,
            "started",
            format!("Removing {} from {} in {}", excluded_az, key, self.region),
        );

        let result = self.run_failover(key, excluded_az, cancel, started_at).await;
        self.notify_result(key, Operation::Failover, &result);
        result
    }

    async fn run_failover(
        &self,
        key: &ServiceKey,
        excluded_az: &AvailabilityZone,
        cancel: &CancelToken,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<DrillReport> {
        let topology =
            snapshotter::capture(self.cluster.as_ref(), self.store.as_ref(), key, &self.region)
                .await?;

        let plan = match planner::plan(self.network.as_ref(), key, &topology, excluded_az).await {
            Ok(plan) => plan,
            Err(e) => {
                self.drop_unused_snapshot(key);
                return Err(e);
            }
        };
        self.record_excluded_zone(key, excluded_az)?;

        if let Err(e) = applier::apply(
            self.cluster.as_ref(),
            key,
            Step::Apply,
            &plan.target_subnets,
            &topology.security_groups,
        )
        .await
        {
            // A rejected update changed nothing; any other failure may have
            if matches!(e, DrillError::Apply { .. }) {
                self.drop_unused_snapshot(key);
            }
            return Err(e);
        }

        let eviction =
            evictor::evict(self.cluster.as_ref(), self.network.as_ref(), key, excluded_az).await?;

        let outcome = poller::wait_for_convergence(
            self.cluster.as_ref(),
            self.network.as_ref(),
            key,
            &plan.target_subnets,
            &self.poll,
            cancel,
        )
        .await?;

        Ok(DrillReport {
            key: key.clone(),
            region: self.region.clone(),
            operation: Operation::Failover,
            target_subnets: plan.target_subnets.clone(),
            plan: Some(plan),
            eviction: Some(eviction),
            outcome,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Return the service to the topology saved by the last failover
    pub async fn restore(&self, key: &ServiceKey, cancel: &CancelToken) -> Result<DrillReport> {
        let started_at = Utc::now();
        info!(cluster = %key.cluster, service = %key.service, "Starting restore");

        let result = self.run_restore(key, cancel, started_at).await;
        self.notify_result(key, Operation::Restore, &result);
        result
    }

    async fn run_restore(
        &self,
        key: &ServiceKey,
        cancel: &CancelToken,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<DrillReport> {
        let snapshot = snapshotter::load_for_restore(self.store.as_ref(), key)?;
        if snapshot.region != self.region {
            warn!(
                cluster = %key.cluster,
                service = %key.service,
                saved = %snapshot.region,
                current = %self.region,
                "Snapshot was captured in a different region"
            );
        }

        // Security groups are carried forward as they are now, not as saved
        let current = self
            .cluster
            .describe_service(key)
            .await
            .map_err(|e| DrillError::from_api(key, Step::Restore, e))?;
        let security_groups = match current.network {
            Some(network) => network.security_groups,
            None => {
                return Err(DrillError::Lookup {
                    key: key.clone(),
                    step: Step::Restore,
                    reason: "service has no per-instance network configuration".to_string(),
                })
            }
        };

        applier::apply(
            self.cluster.as_ref(),
            key,
            Step::Restore,
            &snapshot.subnets,
            &security_groups,
        )
        .await?;

        let outcome = poller::wait_for_convergence(
            self.cluster.as_ref(),
            self.network.as_ref(),
            key,
            &snapshot.subnets,
            &self.poll,
            cancel,
        )
        .await?;

        if outcome.is_converged() {
            self.store.mark_consumed(key, Utc::now())?;
            info!(cluster = %key.cluster, service = %key.service, "Snapshot retired after restore");
        } else {
            info!(
                cluster = %key.cluster,
                service = %key.service,
                outcome = outcome.as_str(),
                "Restore did not converge; snapshot kept for another attempt"
            );
        }

        Ok(DrillReport {
            key: key.clone(),
            region: self.region.clone(),
            operation: Operation::Restore,
            plan: None,
            target_subnets: snapshot.subnets,
            eviction: None,
            outcome,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Wait up to `timeout` for notifications still being delivered.
    /// Returns how many were still pending when the wait gave up.
    pub async fn flush_notifications(&self, timeout: Duration) -> usize {
        let handles: Vec<JoinHandle<()>> = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
            in_flight.drain(..).collect()
        };
        if handles.is_empty() {
            return 0;
        }

        let total = handles.len();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut abandoned = 0;
        for handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            warn!(abandoned, total, "Notifications still in flight after {:?}", timeout);
        } else {
            debug!(total, "Notifications delivered");
        }
        abandoned
    }

    /// Nothing was mutated, so the fresh snapshot has nothing to restore
    fn drop_unused_snapshot(&self, key: &ServiceKey) {
        match self.store.remove(key) {
            Ok(_) => debug!(cluster = %key.cluster, service = %key.service, "Discarded unused snapshot"),
            Err(e) => warn!(cluster = %key.cluster, service = %key.service, "Could not discard snapshot: {}", e),
        }
    }

    fn record_excluded_zone(&self, key: &ServiceKey, az: &AvailabilityZone) -> Result<()> {
        if let Some(mut snapshot) = self.store.load(key)? {
            snapshot.excluded_az = Some(az.clone());
            self.store.save(&snapshot)?;
        }
        Ok(())
    }

    fn notify(&self, key: &ServiceKey, operation: Operation, event: &str, message: String) {
        if let Some(notifier) = &self.notifier {
            let subject = format!("{} {} {} {}", self.subject_prefix, operation, key, event);
            let handle = publish_detached(notifier, subject, message);
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
            in_flight.retain(|h| !h.is_finished());
            in_flight.push(handle);
        }
    }

    fn notify_result(&self, key: &ServiceKey, operation: Operation, result: &Result<DrillReport>) {
        match result {
            Ok(report) => self.notify(key, operation, report.outcome.as_str(), report.summary()),
            Err(e) => self.notify(key, operation, "failed", e.to_string()),
        }
    }
}
