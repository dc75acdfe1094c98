//! Error types for zonedrill.

use crate::types::{AvailabilityZone, ServiceKey};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Controller step, carried on errors so an operator knows where a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Snapshot,
    Plan,
    Apply,
    Evict,
    Poll,
    Restore,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Snapshot => "snapshot",
            Step::Plan => "plan",
            Step::Apply => "apply",
            Step::Evict => "evict",
            Step::Poll => "poll",
            Step::Restore => "restore",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by scheduler and network adapters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

/// Fatal drill errors. Resolution failures and timeouts are not errors.
#[derive(Error, Debug)]
pub enum DrillError {
    #[error("[{step}] {key}: service lookup failed: {reason}")]
    Lookup {
        key: ServiceKey,
        step: Step,
        reason: String,
    },

    #[error("[plan] {key}: excluding {excluded_az} would remove all {subnet_count} configured subnets")]
    InfeasiblePlan {
        key: ServiceKey,
        excluded_az: AvailabilityZone,
        subnet_count: usize,
    },

    #[error("[{step}] {key}: scheduler rejected network update: {reason}")]
    Apply {
        key: ServiceKey,
        step: Step,
        reason: String,
    },

    #[error("[restore] {key}: no saved topology found; run failover first")]
    MissingSnapshot { key: ServiceKey },

    #[error("[snapshot] {key}: unconsumed snapshot from {captured_at} exists; restore or discard it first")]
    Conflict {
        key: ServiceKey,
        captured_at: DateTime<Utc>,
    },

    #[error("[{step}] {key}: {source}")]
    Api {
        key: ServiceKey,
        step: Step,
        #[source]
        source: ApiError,
    },

    #[error("snapshot store error at {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt snapshot at {}: {source}", path.display())]
    SnapshotFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl DrillError {
    /// Map an adapter error into a drill error for `key` at `step`.
    ///
    /// `NotFound` becomes a lookup failure; everything else keeps the adapter
    /// error as its source.
    pub fn from_api(key: &ServiceKey, step: Step, err: ApiError) -> Self {
        match err {
            ApiError::NotFound(reason) => DrillError::Lookup {
                key: key.clone(),
                step,
                reason,
            },
            other => DrillError::Api {
                key: key.clone(),
                step,
                source: other,
            },
        }
    }

    /// Stable short code used in logs and JSON output
    pub fn code(&self) -> &'static str {
        match self {
            DrillError::Lookup { .. } => "lookup",
            DrillError::InfeasiblePlan { .. } => "infeasible_plan",
            DrillError::Apply { .. } => "apply",
            DrillError::MissingSnapshot { .. } => "missing_snapshot",
            DrillError::Conflict { .. } => "conflict",
            DrillError::Api { .. } => "api",
            DrillError::Store { .. } => "store",
            DrillError::SnapshotFormat { .. } => "snapshot_format",
            DrillError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, DrillError>;
