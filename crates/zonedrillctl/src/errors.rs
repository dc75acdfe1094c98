//! Exit codes for zonedrillctl

use zonedrill_common::{ConvergenceOutcome, DrillError};

/// Drill converged, or a bookkeeping command succeeded
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for general errors (API, snapshot I/O, apply rejected)
pub const EXIT_GENERAL_ERROR: i32 = 1;

/// Deadline or tick cap reached before convergence
pub const EXIT_TIMED_OUT: i32 = 2;

/// Interrupted by the operator
pub const EXIT_CANCELLED: i32 = 3;

/// Bad arguments or unreadable config
pub const EXIT_USAGE: i32 = 64;

/// An unconsumed snapshot already exists for the service
pub const EXIT_CONFLICT: i32 = 65;

/// Restore requested without a saved snapshot
pub const EXIT_MISSING_SNAPSHOT: i32 = 66;

/// Excluding the zone would leave the service without subnets
pub const EXIT_INFEASIBLE_PLAN: i32 = 67;

pub fn exit_code_for_outcome(outcome: &ConvergenceOutcome) -> i32 {
    match outcome {
        ConvergenceOutcome::Converged { .. } => EXIT_SUCCESS,
        ConvergenceOutcome::TimedOut { .. } => EXIT_TIMED_OUT,
        ConvergenceOutcome::Cancelled { .. } => EXIT_CANCELLED,
    }
}

pub fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<DrillError>() {
        Some(DrillError::Conflict { .. }) => EXIT_CONFLICT,
        Some(DrillError::MissingSnapshot { .. }) => EXIT_MISSING_SNAPSHOT,
        Some(DrillError::InfeasiblePlan { .. }) => EXIT_INFEASIBLE_PLAN,
        Some(DrillError::Config(_)) => EXIT_USAGE,
        _ => EXIT_GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonedrill_common::ServiceKey;

    #[test]
    fn test_drill_errors_map_to_distinct_codes() {
        let key = ServiceKey::new("c", "s");
        let conflict = anyhow::Error::new(DrillError::Conflict {
            key: key.clone(),
            captured_at: chrono::Utc::now(),
        });
        let missing = anyhow::Error::new(DrillError::MissingSnapshot { key: key.clone() });
        let infeasible = anyhow::Error::new(DrillError::InfeasiblePlan {
            key,
            excluded_az: "az-b".into(),
            subnet_count: 2,
        });

        assert_eq!(exit_code_for_error(&conflict), EXIT_CONFLICT);
        assert_eq!(exit_code_for_error(&missing), EXIT_MISSING_SNAPSHOT);
        assert_eq!(exit_code_for_error(&infeasible), EXIT_INFEASIBLE_PLAN);
        assert_eq!(exit_code_for_error(&anyhow::anyhow!("boom")), EXIT_GENERAL_ERROR);
    }

    #[test]
    fn test_context_does_not_hide_drill_error() {
        let err = anyhow::Error::new(DrillError::Config("bad toml".into())).context("loading config");
        assert_eq!(exit_code_for_error(&err), EXIT_USAGE);
    }
}
