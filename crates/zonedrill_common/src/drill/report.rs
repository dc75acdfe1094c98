//! Drill report - what a failover or restore did and where instances ended up

use super::evictor::EvictionReport;
use super::poller::ConvergenceOutcome;
use crate::types::{ExclusionPlan, Operation, Placement, PlacementRecord, ServiceKey, SubnetId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillReport {
    pub key: ServiceKey,
    pub region: String,
    pub operation: Operation,
    /// Only set for failover
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExclusionPlan>,
    pub target_subnets: BTreeSet<SubnetId>,
    /// Only set for failover
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction: Option<EvictionReport>,
    pub outcome: ConvergenceOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DrillReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_converged()
    }

    /// Final instance -> subnet -> zone mapping from the last observation
    pub fn placements(&self) -> Vec<PlacementRecord> {
        self.outcome
            .observation()
            .map(|obs| {
                obs.placements
                    .iter()
                    .filter_map(|p| match p {
                        Placement::Resolved(record) => Some(record.clone()),
                        Placement::Unresolved { .. } => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds().max(0)
    }

    /// Notification body
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{} of {} in {}: {} after {} tick(s), {}s",
            self.operation,
            self.key,
            self.region,
            self.outcome.as_str(),
            self.outcome.ticks(),
            self.duration_secs()
        )];
        if let Some(plan) = &self.plan {
            lines.push(format!(
                "excluded {} ({} of {} subnets removed)",
                plan.excluded_az,
                plan.excluded_subnets().len(),
                plan.original_subnets.len()
            ));
        }
        if let Some(eviction) = &self.eviction {
            lines.push(format!("evicted {} instance(s)", eviction.count()));
        }
        for record in self.placements() {
            lines.push(format!(
                "  {} -> {} ({})",
                record.instance_id, record.resolved_subnet, record.resolved_az
            ));
        }
        lines.join("\n")
    }
}
