//! Collaborator abstractions: the compute scheduler and the network provider.
//!
//! Production code uses `HttpSchedulerClient`, which speaks JSON to a scheduler
//! gateway. Tests and `--simulate` runs use `FakeScheduler`, an in-memory
//! scheduler with configurable convergence behaviour.

pub mod fake;
pub mod http;

pub use fake::{FakeCall, FakeScheduler, FakeSchedulerBuilder};
pub use http::HttpSchedulerClient;

use crate::error::ApiError;
use crate::types::{
    AvailabilityZone, InstanceId, PlacementRecord, SecurityGroupId, ServiceDescription,
    ServiceKey, Subnet, SubnetId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Structured network update sent to the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfigUpdate {
    pub subnets: BTreeSet<SubnetId>,
    pub security_groups: BTreeSet<SecurityGroupId>,
    pub force_new_deployment: bool,
}

/// Subnet query filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<AvailabilityZone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<SubnetId>>,
}

impl SubnetFilter {
    pub fn in_zone(az: &AvailabilityZone) -> Self {
        Self {
            availability_zone: Some(az.clone()),
            ids: None,
        }
    }

    pub fn matches(&self, subnet: &Subnet) -> bool {
        let az_ok = self
            .availability_zone
            .as_ref()
            .map_or(true, |az| *az == subnet.availability_zone);
        let id_ok = self
            .ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&subnet.id));
        az_ok && id_ok
    }
}

/// Compute scheduler operations the controller needs
#[async_trait]
pub trait ComputeCluster: Send + Sync {
    async fn describe_service(&self, key: &ServiceKey) -> ApiResult<ServiceDescription>;

    async fn list_running_instances(&self, key: &ServiceKey) -> ApiResult<Vec<InstanceId>>;

    /// Register a new network configuration. Does not wait for placement.
    async fn update_service_network(
        &self,
        key: &ServiceKey,
        update: &NetworkConfigUpdate,
    ) -> ApiResult<()>;

    async fn stop_instance(
        &self,
        key: &ServiceKey,
        instance: &InstanceId,
        reason: &str,
    ) -> ApiResult<()>;
}

/// Network provider operations the controller needs
#[async_trait]
pub trait NetworkTopologyApi: Send + Sync {
    async fn describe_subnets(&self, filter: &SubnetFilter) -> ApiResult<Vec<Subnet>>;

    /// Resolve the subnet and zone an instance's network interface sits in
    async fn resolve_instance_placement(
        &self,
        key: &ServiceKey,
        instance: &InstanceId,
    ) -> ApiResult<PlacementRecord>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        let subnet = Subnet::new("s1", "az-a");
        assert!(SubnetFilter::default().matches(&subnet));
        assert!(SubnetFilter::in_zone(&"az-a".into()).matches(&subnet));
        assert!(!SubnetFilter::in_zone(&"az-b".into()).matches(&subnet));

        let by_id = SubnetFilter {
            availability_zone: None,
            ids: Some(vec!["s2".into()]),
        };
        assert!(!by_id.matches(&subnet));
    }
}
