//! In-memory scheduler for deterministic drills
//!
//! `FakeScheduler` implements both `ComputeCluster` and `NetworkTopologyApi`.
//! It models just enough of a container scheduler to exercise the controller:
//!
//! - a network update or a stopped instance schedules a reconcile
//! - the reconcile happens after `settle_after` further `describe_service`
//!   calls (one per poll tick), replacing instances that sit outside the
//!   configured subnets and launching new ones round-robin across them
//! - a frozen scheduler never reconciles
//!
//! ## Example
//!
//! ```rust,ignore
//! let fake = FakeScheduler::builder()
//!     .subnet("s1", "az-a")
//!     .subnet("s2", "az-b")
//!     .service(key.clone(), 2, &["s1", "s2"], &["sg-1"], &["s2", "s2"])
//!     .settle_after(1)
//!     .build();
//! ```

use super::{ApiResult, ComputeCluster, NetworkConfigUpdate, NetworkTopologyApi, SubnetFilter};
use crate::error::ApiError;
use crate::types::{
    InstanceId, NetworkTopology, PlacementRecord, SecurityGroupId, ServiceDescription, ServiceKey,
    Subnet, SubnetId,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// One collaborator call, in the order the fake received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    Describe(ServiceKey),
    List(ServiceKey),
    Update(ServiceKey),
    Stop(ServiceKey, InstanceId),
    DescribeSubnets,
    Resolve(InstanceId),
}

#[derive(Debug, Clone)]
struct FakeService {
    desired_count: u32,
    network: Option<NetworkTopology>,
    instances: BTreeMap<InstanceId, SubnetId>,
    /// Describe calls left before the next reconcile
    pending_reconcile: Option<u32>,
}

#[derive(Debug, Default)]
struct FakeState {
    subnets: Vec<Subnet>,
    services: HashMap<ServiceKey, FakeService>,
    next_instance: u64,
    settle_after: u32,
    frozen: bool,
    update_error: Option<ApiError>,
    unresolvable: HashSet<InstanceId>,
    updates: Vec<(ServiceKey, NetworkConfigUpdate)>,
    stopped: Vec<(ServiceKey, InstanceId, String)>,
    describe_calls: usize,
    describe_error: Option<ApiError>,
    calls: Vec<FakeCall>,
}

impl FakeState {
    fn zone_of(&self, subnet: &SubnetId) -> Option<&Subnet> {
        self.subnets.iter().find(|s| &s.id == subnet)
    }

    fn launch_id(&mut self) -> InstanceId {
        self.next_instance += 1;
        InstanceId::new(format!("task-{:04}", self.next_instance))
    }

    fn schedule_reconcile(&mut self, key: &ServiceKey) {
        let settle = self.settle_after;
        if let Some(service) = self.services.get_mut(key) {
            service.pending_reconcile = Some(settle);
        }
    }

    /// Count down and, when due, bring the service to its desired placement
    fn tick(&mut self, key: &ServiceKey) {
        if self.frozen {
            return;
        }
        let due = match self.services.get_mut(key) {
            Some(service) => match service.pending_reconcile {
                Some(0) => {
                    service.pending_reconcile = None;
                    true
                }
                Some(n) => {
                    service.pending_reconcile = Some(n - 1);
                    false
                }
                None => false,
            },
            None => false,
        };
        if due {
            self.reconcile(key);
        }
    }

    fn reconcile(&mut self, key: &ServiceKey) {
        let Some(service) = self.services.get(key) else {
            return;
        };
        let allowed: Vec<SubnetId> = service
            .network
            .as_ref()
            .map(|n| n.subnets.iter().cloned().collect())
            .unwrap_or_default();
        if allowed.is_empty() {
            return;
        }

        let mut kept: BTreeMap<InstanceId, SubnetId> = service
            .instances
            .iter()
            .filter(|(_, subnet)| allowed.contains(subnet))
            .map(|(id, subnet)| (id.clone(), subnet.clone()))
            .collect();
        let desired = service.desired_count as usize;

        while kept.len() > desired {
            let last = kept.keys().next_back().cloned();
            if let Some(id) = last {
                kept.remove(&id);
            }
        }
        let mut slot = 0usize;
        while kept.len() < desired {
            let id = self.launch_id();
            kept.insert(id, allowed[slot % allowed.len()].clone());
            slot += 1;
        }

        if let Some(service) = self.services.get_mut(key) {
            service.instances = kept;
        }
    }
}

/// In-memory scheduler and network provider
#[derive(Debug, Clone)]
pub struct FakeScheduler {
    state: Arc<Mutex<FakeState>>,
}

impl FakeScheduler {
    pub fn builder() -> FakeSchedulerBuilder {
        FakeSchedulerBuilder::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every network update received, in order
    pub fn updates(&self) -> Vec<(ServiceKey, NetworkConfigUpdate)> {
        self.state().updates.clone()
    }

    /// Every stop request received, in order
    pub fn stopped(&self) -> Vec<(ServiceKey, InstanceId, String)> {
        self.state().stopped.clone()
    }

    pub fn describe_calls(&self) -> usize {
        self.state().describe_calls
    }

    /// Every call received, in order
    pub fn calls(&self) -> Vec<FakeCall> {
        self.state().calls.clone()
    }

    /// Make every following `describe_service` fail with `error`
    pub fn fail_describe(&self, error: Option<ApiError>) {
        self.state().describe_error = error;
    }

    /// Currently configured topology for a service
    pub fn topology(&self, key: &ServiceKey) -> Option<NetworkTopology> {
        self.state().services.get(key).and_then(|s| s.network.clone())
    }

    /// Current instance -> subnet map for a service
    pub fn instances(&self, key: &ServiceKey) -> BTreeMap<InstanceId, SubnetId> {
        self.state()
            .services
            .get(key)
            .map(|s| s.instances.clone())
            .unwrap_or_default()
    }

    pub fn set_frozen(&self, frozen: bool) {
        self.state().frozen = frozen;
    }

    pub fn set_settle_after(&self, ticks: u32) {
        self.state().settle_after = ticks;
    }

    /// Make every following network update fail with `Rejected(reason)`
    pub fn reject_updates(&self, reason: Option<&str>) {
        self.fail_updates(reason.map(|r| ApiError::Rejected(r.to_string())));
    }

    pub fn fail_updates(&self, error: Option<ApiError>) {
        self.state().update_error = error;
    }

    pub fn mark_unresolvable(&self, instance: &InstanceId) {
        self.state().unresolvable.insert(instance.clone());
    }

    pub fn clear_unresolvable(&self) {
        self.state().unresolvable.clear();
    }

    /// Drop a running instance into `subnet` without scheduling a reconcile
    pub fn place_instance(&self, key: &ServiceKey, subnet: &str) -> InstanceId {
        let mut state = self.state();
        let id = state.launch_id();
        if let Some(service) = state.services.get_mut(key) {
            service.instances.insert(id.clone(), SubnetId::new(subnet));
        }
        id
    }
}

#[async_trait]
impl ComputeCluster for FakeScheduler {
    async fn describe_service(&self, key: &ServiceKey) -> ApiResult<ServiceDescription> {
        let mut state = self.state();
        state.describe_calls += 1;
        state.calls.push(FakeCall::Describe(key.clone()));
        if let Some(error) = state.describe_error.clone() {
            return Err(error);
        }
        state.tick(key);
        let service = state
            .services
            .get(key)
            .ok_or_else(|| ApiError::NotFound(format!("service {} does not exist", key)))?;
        Ok(ServiceDescription {
            desired_count: service.desired_count,
            running_count: service.instances.len() as u32,
            network: service.network.clone(),
        })
    }

    async fn list_running_instances(&self, key: &ServiceKey) -> ApiResult<Vec<InstanceId>> {
        let mut state = self.state();
        state.calls.push(FakeCall::List(key.clone()));
        let service = state
            .services
            .get(key)
            .ok_or_else(|| ApiError::NotFound(format!("service {} does not exist", key)))?;
        Ok(service.instances.keys().cloned().collect())
    }

    async fn update_service_network(
        &self,
        key: &ServiceKey,
        update: &NetworkConfigUpdate,
    ) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(FakeCall::Update(key.clone()));
        if let Some(error) = state.update_error.clone() {
            return Err(error);
        }
        if let Some(unknown) = update
            .subnets
            .iter()
            .find(|id| state.zone_of(id).is_none())
        {
            return Err(ApiError::Rejected(format!("subnet {} does not exist", unknown)));
        }
        let service = state
            .services
            .get_mut(key)
            .ok_or_else(|| ApiError::NotFound(format!("service {} does not exist", key)))?;
        service.network = Some(NetworkTopology {
            subnets: update.subnets.clone(),
            security_groups: update.security_groups.clone(),
        });
        state.updates.push((key.clone(), update.clone()));
        if update.force_new_deployment {
            state.schedule_reconcile(key);
        }
        Ok(())
    }

    async fn stop_instance(
        &self,
        key: &ServiceKey,
        instance: &InstanceId,
        reason: &str,
    ) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(FakeCall::Stop(key.clone(), instance.clone()));
        let service = state
            .services
            .get_mut(key)
            .ok_or_else(|| ApiError::NotFound(format!("service {} does not exist", key)))?;
        if service.instances.remove(instance).is_none() {
            return Err(ApiError::NotFound(format!("instance {} is not running", instance)));
        }
        state
            .stopped
            .push((key.clone(), instance.clone(), reason.to_string()));
        state.schedule_reconcile(key);
        Ok(())
    }
}

#[async_trait]
impl NetworkTopologyApi for FakeScheduler {
    async fn describe_subnets(&self, filter: &SubnetFilter) -> ApiResult<Vec<Subnet>> {
        let mut state = self.state();
        state.calls.push(FakeCall::DescribeSubnets);
        Ok(state
            .subnets
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn resolve_instance_placement(
        &self,
        key: &ServiceKey,
        instance: &InstanceId,
    ) -> ApiResult<PlacementRecord> {
        let mut state = self.state();
        state.calls.push(FakeCall::Resolve(instance.clone()));
        if state.unresolvable.contains(instance) {
            return Err(ApiError::NotFound(format!(
                "network interface for {} is not attached",
                instance
            )));
        }
        let subnet = state
            .services
            .get(key)
            .and_then(|s| s.instances.get(instance))
            .ok_or_else(|| ApiError::NotFound(format!("instance {} is not running", instance)))?;
        let resolved = state
            .zone_of(subnet)
            .ok_or_else(|| ApiError::NotFound(format!("subnet {} does not exist", subnet)))?;
        Ok(PlacementRecord {
            instance_id: instance.clone(),
            resolved_subnet: resolved.id.clone(),
            resolved_az: resolved.availability_zone.clone(),
        })
    }
}

/// Builder for `FakeScheduler`
#[derive(Debug, Default)]
pub struct FakeSchedulerBuilder {
    state: FakeState,
}

impl FakeSchedulerBuilder {
    pub fn subnet(mut self, id: &str, az: &str) -> Self {
        self.state.subnets.push(Subnet::new(id, az));
        self
    }

    /// Add a service with its topology and one running instance per entry of
    /// `placed_in`
    pub fn service(
        mut self,
        key: ServiceKey,
        desired_count: u32,
        subnets: &[&str],
        security_groups: &[&str],
        placed_in: &[&str],
    ) -> Self {
        let network = NetworkTopology {
            subnets: subnets.iter().map(|s| SubnetId::from(*s)).collect(),
            security_groups: security_groups
                .iter()
                .map(|s| SecurityGroupId::from(*s))
                .collect(),
        };
        let mut instances = BTreeMap::new();
        for subnet in placed_in {
            let id = self.state.launch_id();
            instances.insert(id, SubnetId::from(*subnet));
        }
        self.state.services.insert(
            key,
            FakeService {
                desired_count,
                network: Some(network),
                instances,
                pending_reconcile: None,
            },
        );
        self
    }

    /// A service deployed without per-instance networking
    pub fn bridge_service(mut self, key: ServiceKey, desired_count: u32) -> Self {
        self.state.services.insert(
            key,
            FakeService {
                desired_count,
                network: None,
                instances: BTreeMap::new(),
                pending_reconcile: None,
            },
        );
        self
    }

    pub fn settle_after(mut self, ticks: u32) -> Self {
        self.state.settle_after = ticks;
        self
    }

    pub fn frozen(mut self, frozen: bool) -> Self {
        self.state.frozen = frozen;
        self
    }

    pub fn build(self) -> FakeScheduler {
        FakeScheduler {
            state: Arc::new(Mutex::new(self.state)),
        }
    }
}
