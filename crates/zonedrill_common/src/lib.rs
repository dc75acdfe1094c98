//! Zonedrill Common - availability zone failover drills for scheduled services
//!
//! Removes one zone's subnets from a service's placement, evicts instances
//! still running there, waits for the scheduler to converge, and later puts
//! the original topology back.

pub mod cancel;
pub mod config;
pub mod drill;
pub mod error;
pub mod notify;
pub mod providers;
pub mod snapshot;
pub mod types;

pub use cancel::CancelToken;
pub use config::DrillConfig;
pub use drill::{ConvergenceOutcome, DrillController, DrillReport, PollConfig};
pub use error::{ApiError, DrillError, Result, Step};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, PersistedSnapshot, SnapshotStore};
pub use types::*;
