//! Stale placement evictor - stops instances still running in the failed zone
//!
//! Only an instance positively resolved to the excluded zone is stopped.
//! Anything that cannot be resolved is skipped.

use crate::error::{DrillError, Result, Step};
use crate::providers::{ComputeCluster, NetworkTopologyApi};
use crate::types::{AvailabilityZone, InstanceId, ServiceKey};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What the evictor did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    pub stopped: Vec<InstanceId>,
    /// Placement could not be resolved; left running
    pub skipped_unresolved: Vec<InstanceId>,
    /// In the excluded zone but the stop call failed
    pub stop_failed: Vec<InstanceId>,
}

impl EvictionReport {
    pub fn count(&self) -> usize {
        self.stopped.len()
    }
}

pub fn eviction_reason(az: &AvailabilityZone) -> String {
    format!("zonedrill: availability zone {} removed from service placement", az)
}

pub async fn evict(
    cluster: &dyn ComputeCluster,
    network: &dyn NetworkTopologyApi,
    key: &ServiceKey,
    excluded_az: &AvailabilityZone,
) -> Result<EvictionReport> {
    let instances = cluster
        .list_running_instances(key)
        .await
        .map_err(|e| DrillError::from_api(key, Step::Evict, e))?;

    let resolutions = join_all(
        instances
            .iter()
            .map(|id| network.resolve_instance_placement(key, id)),
    )
    .await;

    let reason = eviction_reason(excluded_az);
    let mut report = EvictionReport::default();

    for (id, resolution) in instances.iter().zip(resolutions) {
        let record = match resolution {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    cluster = %key.cluster,
                    service = %key.service,
                    step = "evict",
                    instance = %id,
                    "Placement unresolved, not evicting: {}", e
                );
                report.skipped_unresolved.push(id.clone());
                continue;
            }
        };

        if &record.resolved_az != excluded_az {
            debug!(instance = %id, az = %record.resolved_az, "Instance outside excluded zone");
            continue;
        }

        match cluster.stop_instance(key, id, &reason).await {
            Ok(()) => report.stopped.push(id.clone()),
            Err(e) => {
                warn!(
                    cluster = %key.cluster,
                    service = %key.service,
                    step = "evict",
                    instance = %id,
                    "Stop request failed: {}", e
                );
                report.stop_failed.push(id.clone());
            }
        }
    }

    info!(
        cluster = %key.cluster,
        service = %key.service,
        step = "evict",
        az = %excluded_az,
        stopped = report.stopped.len(),
        skipped = report.skipped_unresolved.len(),
        failed = report.stop_failed.len(),
        "Eviction finished"
    );
    Ok(report)
}
