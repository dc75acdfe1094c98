//! Core data model for zone failover drills.
//!
//! Identifiers are thin newtypes over the provider's string ids. Sets use
//! `BTreeSet` so that reports and persisted snapshots have a stable order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Network provider subnet identifier
    SubnetId
);
string_id!(
    /// Network provider security group identifier
    SecurityGroupId
);
string_id!(
    /// Scheduler-assigned id of a running instance (task)
    InstanceId
);
string_id!(
    /// Availability zone name, e.g. `eu-west-1b`
    AvailabilityZone
);

/// Identity of one (cluster, service) pair. Snapshots are keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    pub cluster: String,
    pub service: String,
}

impl ServiceKey {
    pub fn new(cluster: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            service: service.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.service)
    }
}

/// Network attachment of a service
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub subnets: BTreeSet<SubnetId>,
    pub security_groups: BTreeSet<SecurityGroupId>,
}

/// Subnet reference data resolved from the network provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: SubnetId,
    pub availability_zone: AvailabilityZone,
}

impl Subnet {
    pub fn new(id: impl Into<String>, az: impl Into<String>) -> Self {
        Self {
            id: SubnetId::new(id),
            availability_zone: AvailabilityZone::new(az),
        }
    }
}

/// What the scheduler reports about a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub desired_count: u32,
    pub running_count: u32,
    /// `None` when the service is not deployed with per-instance networking
    pub network: Option<NetworkTopology>,
}

/// Where one running instance currently sits. Derived per poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub instance_id: InstanceId,
    pub resolved_subnet: SubnetId,
    pub resolved_az: AvailabilityZone,
}

/// Result of resolving one instance. Unresolved instances never count as placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Placement {
    Resolved(PlacementRecord),
    Unresolved { instance_id: InstanceId, reason: String },
}

impl Placement {
    pub fn instance_id(&self) -> &InstanceId {
        match self {
            Placement::Resolved(record) => &record.instance_id,
            Placement::Unresolved { instance_id, .. } => instance_id,
        }
    }
}

/// Target topology with one zone's subnets removed. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionPlan {
    pub excluded_az: AvailabilityZone,
    pub original_subnets: BTreeSet<SubnetId>,
    pub target_subnets: BTreeSet<SubnetId>,
}

impl ExclusionPlan {
    /// Subnets the plan removes
    pub fn excluded_subnets(&self) -> BTreeSet<SubnetId> {
        self.original_subnets
            .difference(&self.target_subnets)
            .cloned()
            .collect()
    }
}

/// One poll sample. Replaced wholesale on every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceObservation {
    pub desired_count: u32,
    pub running_count: u32,
    pub placements: Vec<Placement>,
}

impl ConvergenceObservation {
    pub fn resolved(&self) -> impl Iterator<Item = &PlacementRecord> {
        self.placements.iter().filter_map(|p| match p {
            Placement::Resolved(record) => Some(record),
            Placement::Unresolved { .. } => None,
        })
    }

    pub fn unresolved(&self) -> Vec<InstanceId> {
        self.placements
            .iter()
            .filter_map(|p| match p {
                Placement::Unresolved { instance_id, .. } => Some(instance_id.clone()),
                Placement::Resolved(_) => None,
            })
            .collect()
    }
}

/// Which drill operation produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Failover,
    Restore,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Failover => "failover",
            Operation::Restore => "restore",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
