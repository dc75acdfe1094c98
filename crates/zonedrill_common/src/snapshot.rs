//! Persisted pre-failover topology, keyed by (cluster, service)
//!
//! One JSON file per key under the snapshot directory. The file name is the
//! sanitised cluster and service names plus a digest of the exact key, so two
//! keys that sanitise to the same text still never share a file.
//!
//! All writes are atomic: temp file + fsync + rename.

use crate::error::{DrillError, Result};
use crate::types::{AvailabilityZone, SecurityGroupId, ServiceKey, SubnetId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Current snapshot schema version
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    /// Schema version for migration
    pub version: u32,
    pub cluster: String,
    pub service: String,
    pub region: String,
    pub subnets: BTreeSet<SubnetId>,
    pub security_groups: BTreeSet<SecurityGroupId>,
    /// Zone the failover excluded, once planned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_az: Option<AvailabilityZone>,
    pub captured_at: DateTime<Utc>,
    /// Set when a restore completed; a consumed snapshot is retired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl PersistedSnapshot {
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.cluster.clone(), self.service.clone())
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    /// Get age in human-readable format
    pub fn format_age(&self) -> String {
        let age_secs = (Utc::now() - self.captured_at).num_seconds().max(0) as u64;
        if age_secs < 60 {
            format!("{}s ago", age_secs)
        } else if age_secs < 3600 {
            format!("{}m ago", age_secs / 60)
        } else if age_secs < 86_400 {
            format!("{}h ago", age_secs / 3600)
        } else {
            format!("{}d ago", age_secs / 86_400)
        }
    }
}

/// Durable store for pre-failover snapshots
pub trait SnapshotStore: Send + Sync {
    fn load(&self, key: &ServiceKey) -> Result<Option<PersistedSnapshot>>;

    /// Insert or overwrite the snapshot for its key
    fn save(&self, snapshot: &PersistedSnapshot) -> Result<()>;

    /// Returns whether a snapshot existed
    fn remove(&self, key: &ServiceKey) -> Result<bool>;

    fn list(&self) -> Result<Vec<PersistedSnapshot>>;

    /// Snapshot that has not been consumed by a restore yet
    fn load_active(&self, key: &ServiceKey) -> Result<Option<PersistedSnapshot>> {
        Ok(self.load(key)?.filter(|s| !s.is_consumed()))
    }

    fn mark_consumed(&self, key: &ServiceKey, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut snapshot) = self.load(key)? {
            snapshot.consumed_at = Some(at);
            self.save(&snapshot)?;
        }
        Ok(())
    }
}

/// File name for a key: readable prefix + 12 hex chars of SHA-256
pub fn snapshot_file_name(key: &ServiceKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.cluster.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.service.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!(
        "{}__{}__{}.json",
        sanitize(&key.cluster),
        sanitize(&key.service),
        &digest[..12]
    )
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .rev()
        .take(48)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Write data to a file atomically using temp file + rename
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}

/// Snapshot store backed by a directory of JSON files
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &ServiceKey) -> PathBuf {
        self.dir.join(snapshot_file_name(key))
    }

    fn read(&self, path: &Path) -> Result<PersistedSnapshot> {
        let content = fs::read_to_string(path).map_err(|source| DrillError::Store {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| DrillError::SnapshotFormat {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, key: &ServiceKey) -> Result<Option<PersistedSnapshot>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        self.read(&path).map(Some)
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.key());
        let content =
            serde_json::to_vec_pretty(snapshot).map_err(|source| DrillError::SnapshotFormat {
                path: path.clone(),
                source,
            })?;
        atomic_write(&path, &content).map_err(|source| DrillError::Store { path, source })
    }

    fn remove(&self, key: &ServiceKey) -> Result<bool> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(DrillError::Store { path, source }),
        }
    }

    fn list(&self) -> Result<Vec<PersistedSnapshot>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(DrillError::Store {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| DrillError::Store {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            snapshots.push(self.read(&path)?);
        }
        snapshots.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(snapshots)
    }
}

/// In-process snapshot store
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<ServiceKey, PersistedSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, key: &ServiceKey) -> Result<Option<PersistedSnapshot>> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(snapshot.key(), snapshot.clone());
        Ok(())
    }

    fn remove(&self, key: &ServiceKey) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.remove(key).is_some())
    }

    fn list(&self) -> Result<Vec<PersistedSnapshot>> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let mut snapshots: Vec<_> = entries.values().cloned().collect();
        snapshots.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(snapshots)
    }
}
