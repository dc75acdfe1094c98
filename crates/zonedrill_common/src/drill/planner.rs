//! Zone exclusion planner

use crate::error::{DrillError, Result, Step};
use crate::providers::{NetworkTopologyApi, SubnetFilter};
use crate::types::{AvailabilityZone, ExclusionPlan, NetworkTopology, ServiceKey, Subnet, SubnetId};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Compute `topology.subnets \ zone_subnets`.
///
/// `zone_subnets` are the subnets the network provider places in
/// `excluded_az`. Fails with `InfeasiblePlan` when nothing would remain.
pub fn plan_exclusion(
    key: &ServiceKey,
    topology: &NetworkTopology,
    excluded_az: &AvailabilityZone,
    zone_subnets: &[Subnet],
) -> Result<ExclusionPlan> {
    let in_zone: BTreeSet<&SubnetId> = zone_subnets
        .iter()
        .filter(|s| &s.availability_zone == excluded_az)
        .map(|s| &s.id)
        .collect();

    let target_subnets: BTreeSet<SubnetId> = topology
        .subnets
        .iter()
        .filter(|id| !in_zone.contains(id))
        .cloned()
        .collect();

    if target_subnets.is_empty() {
        return Err(DrillError::InfeasiblePlan {
            key: key.clone(),
            excluded_az: excluded_az.clone(),
            subnet_count: topology.subnets.len(),
        });
    }

    Ok(ExclusionPlan {
        excluded_az: excluded_az.clone(),
        original_subnets: topology.subnets.clone(),
        target_subnets,
    })
}

/// Resolve the zone's subnets through the network provider and plan
pub async fn plan(
    network: &dyn NetworkTopologyApi,
    key: &ServiceKey,
    topology: &NetworkTopology,
    excluded_az: &AvailabilityZone,
) -> Result<ExclusionPlan> {
    let zone_subnets = network
        .describe_subnets(&SubnetFilter::in_zone(excluded_az))
        .await
        .map_err(|e| DrillError::from_api(key, Step::Plan, e))?;

    let plan = plan_exclusion(key, topology, excluded_az, &zone_subnets)?;
    let excluded = plan.excluded_subnets();
    if excluded.is_empty() {
        warn!(
            cluster = %key.cluster,
            service = %key.service,
            step = "plan",
            az = %excluded_az,
            "No configured subnet is in the excluded zone; failover will not change placement"
        );
    } else {
        info!(
            cluster = %key.cluster,
            service = %key.service,
            step = "plan",
            az = %excluded_az,
            excluded = excluded.len(),
            remaining = plan.target_subnets.len(),
            "Planned zone exclusion"
        );
    }
    Ok(plan)
}
