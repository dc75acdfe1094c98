//! Configuration applier - pushes a subnet set and forces a redeployment

use crate::error::{ApiError, DrillError, Result, Step};
use crate::providers::{ComputeCluster, NetworkConfigUpdate};
use crate::types::{SecurityGroupId, ServiceKey, SubnetId};
use std::collections::BTreeSet;
use tracing::info;

/// Register `target_subnets` for the service, carrying `security_groups`
/// forward unchanged. Returns once the scheduler acknowledged the intent;
/// placement is observed separately.
///
/// A synchronous rejection is an `Apply` error and is not retried.
pub async fn apply(
    cluster: &dyn ComputeCluster,
    key: &ServiceKey,
    step: Step,
    target_subnets: &BTreeSet<SubnetId>,
    security_groups: &BTreeSet<SecurityGroupId>,
) -> Result<()> {
    let update = NetworkConfigUpdate {
        subnets: target_subnets.clone(),
        security_groups: security_groups.clone(),
        force_new_deployment: true,
    };

    cluster
        .update_service_network(key, &update)
        .await
        .map_err(|e| match e {
            ApiError::Rejected(reason) => DrillError::Apply {
                key: key.clone(),
                step,
                reason,
            },
            other => DrillError::from_api(key, step, other),
        })?;

    info!(
        cluster = %key.cluster,
        service = %key.service,
        step = %step,
        subnets = %join(target_subnets),
        "Applied network configuration with forced redeployment"
    );
    Ok(())
}

fn join(ids: &BTreeSet<SubnetId>) -> String {
    ids.iter().map(SubnetId::as_str).collect::<Vec<_>>().join(",")
}
