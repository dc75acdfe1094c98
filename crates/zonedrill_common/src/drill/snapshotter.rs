//! Topology snapshotter - records the service's network before any mutation

use crate::error::{DrillError, Result, Step};
use crate::providers::ComputeCluster;
use crate::snapshot::{PersistedSnapshot, SnapshotStore, SNAPSHOT_VERSION};
use crate::types::{NetworkTopology, ServiceKey};
use chrono::Utc;
use tracing::info;

/// Read the current topology and persist it under `key`.
///
/// Fails with `Conflict` if an unconsumed snapshot already exists, and with
/// `Lookup` if the service is missing or has no per-instance networking.
/// The snapshot is on disk before this returns.
pub async fn capture(
    cluster: &dyn ComputeCluster,
    store: &dyn SnapshotStore,
    key: &ServiceKey,
    region: &str,
) -> Result<NetworkTopology> {
    if let Some(existing) = store.load_active(key)? {
        return Err(DrillError::Conflict {
            key: key.clone(),
            captured_at: existing.captured_at,
        });
    }

    let description = cluster
        .describe_service(key)
        .await
        .map_err(|e| DrillError::from_api(key, Step::Snapshot, e))?;

    let topology = match description.network {
        Some(network) if !network.subnets.is_empty() => network,
        _ => {
            return Err(DrillError::Lookup {
                key: key.clone(),
                step: Step::Snapshot,
                reason: "service has no per-instance network configuration".to_string(),
            })
        }
    };

    store.save(&PersistedSnapshot {
        version: SNAPSHOT_VERSION,
        cluster: key.cluster.clone(),
        service: key.service.clone(),
        region: region.to_string(),
        subnets: topology.subnets.clone(),
        security_groups: topology.security_groups.clone(),
        excluded_az: None,
        captured_at: Utc::now(),
        consumed_at: None,
    })?;

    info!(
        cluster = %key.cluster,
        service = %key.service,
        step = "snapshot",
        subnets = topology.subnets.len(),
        security_groups = topology.security_groups.len(),
        "Captured network topology"
    );
    Ok(topology)
}

/// Load the snapshot a restore should return to
pub fn load_for_restore(store: &dyn SnapshotStore, key: &ServiceKey) -> Result<PersistedSnapshot> {
    store
        .load_active(key)?
        .ok_or_else(|| DrillError::MissingSnapshot { key: key.clone() })
}

/// Drop a saved snapshot so a new failover may start. Returns whether one existed.
pub fn discard(store: &dyn SnapshotStore, key: &ServiceKey) -> Result<bool> {
    let removed = store.remove(key)?;
    if removed {
        info!(cluster = %key.cluster, service = %key.service, step = "snapshot", "Snapshot discarded");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FakeScheduler;
    use crate::snapshot::MemorySnapshotStore;

    fn key() -> ServiceKey {
        ServiceKey::new("drill", "web")
    }

    fn fake() -> FakeScheduler {
        FakeScheduler::builder()
            .subnet("s1", "az-a")
            .subnet("s2", "az-b")
            .service(key(), 1, &["s1", "s2"], &["sg-1"], &["s1"])
            .bridge_service(ServiceKey::new("drill", "legacy"), 1)
            .build()
    }

    #[tokio::test]
    async fn test_capture_persists_before_returning() {
        let fake = fake();
        let store = MemorySnapshotStore::new();
        let topology = capture(&fake, &store, &key(), "eu-west-1").await.unwrap();

        let saved = store.load(&key()).unwrap().unwrap();
        assert_eq!(saved.subnets, topology.subnets);
        assert_eq!(saved.security_groups, topology.security_groups);
        assert_eq!(saved.region, "eu-west-1");
    }

    #[tokio::test]
    async fn test_capture_conflicts_with_unconsumed_snapshot() {
        let fake = fake();
        let store = MemorySnapshotStore::new();
        capture(&fake, &store, &key(), "r").await.unwrap();
        let err = capture(&fake, &store, &key(), "r").await.unwrap_err();
        assert!(matches!(err, DrillError::Conflict { .. }));

        store.mark_consumed(&key(), Utc::now()).unwrap();
        capture(&fake, &store, &key(), "r").await.unwrap();
    }

    #[tokio::test]
    async fn test_capture_rejects_missing_or_bridged_service() {
        let fake = fake();
        let store = MemorySnapshotStore::new();

        let err = capture(&fake, &store, &ServiceKey::new("drill", "ghost"), "r")
            .await
            .unwrap_err();
        assert!(matches!(err, DrillError::Lookup { .. }));

        let err = capture(&fake, &store, &ServiceKey::new("drill", "legacy"), "r")
            .await
            .unwrap_err();
        assert!(matches!(err, DrillError::Lookup { .. }));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_restore_without_snapshot() {
        let store = MemorySnapshotStore::new();
        let err = load_for_restore(&store, &key()).unwrap_err();
        assert!(matches!(err, DrillError::MissingSnapshot { .. }));
    }
}
