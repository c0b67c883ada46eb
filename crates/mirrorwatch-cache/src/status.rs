//! RBD mirror status data model
//!
//! Mirrors the JSON document printed by
//! `rbd mirror pool status <pool> --verbose --format json`. Missing fields
//! decode to their defaults; malformed documents are rejected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a pool resource (its Kubernetes `metadata.uid`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolUid(String);

impl PoolUid {
    /// Wrap a UID string
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// The raw UID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cached mirror status for one pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStatusRecord {
    /// Pool name (as given to `rbd`)
    pub pool_name: String,
    /// Namespace of the CephBlockPool resource
    pub pool_namespace: String,
    /// Last successfully fetched status
    pub mirror_status: MirrorStatus,
}

/// Verbose mirror status of a pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorStatus {
    /// Pool-wide health summary
    pub summary: PoolSummary,
    /// rbd-mirror daemons serving the pool
    pub daemons: Vec<DaemonStatus>,
    /// Per-image status
    pub images: Vec<ImageStatus>,
}

/// Pool-wide health summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSummary {
    /// Overall health ("OK", "WARNING", "ERROR", "UNKNOWN")
    pub health: String,
    /// Health of the rbd-mirror daemons
    pub daemon_health: String,
    /// Health of the mirrored images
    pub image_health: String,
    /// Number of images in each replication state
    pub states: ImageStateCounts,
}

/// Number of images in each replication state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageStateCounts {
    pub unknown: u64,
    pub error: u64,
    pub syncing: u64,
    pub starting_replay: u64,
    pub replaying: u64,
    pub stopping_replay: u64,
    pub stopped: u64,
}

impl ImageStateCounts {
    /// Total number of images across all states
    pub fn total(&self) -> u64 {
        self.unknown
            + self.error
            + self.syncing
            + self.starting_replay
            + self.replaying
            + self.stopping_replay
            + self.stopped
    }
}

/// An rbd-mirror daemon instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonStatus {
    pub service_id: String,
    pub instance_id: String,
    pub client_id: String,
    pub hostname: String,
    /// Ceph release the daemon runs
    pub ceph_version: String,
    /// Whether this daemon is the pool's leader
    pub leader: bool,
    pub health: String,
}

/// Mirror status of a single image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageStatus {
    pub name: String,
    pub global_id: String,
    /// Local replication state, e.g. "up+stopped"
    pub state: String,
    pub description: String,
    /// Daemon currently handling the image
    pub daemon_service: DaemonService,
    /// Timestamp of the last state update, as printed by rbd
    pub last_update: String,
    /// State as seen from each remote peer
    pub peer_sites: Vec<PeerSite>,
}

/// Daemon handling an image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonService {
    pub service_id: String,
    pub instance_id: String,
    pub daemon_id: String,
    pub hostname: String,
}

/// Image state on a remote peer site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSite {
    pub site_name: String,
    pub mirror_uuids: String,
    pub state: String,
    pub description: String,
    pub last_update: String,
}

/// Replay progress embedded in a snapshot-mirroring peer description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSiteDescription {
    pub bytes_per_second: f64,
    pub bytes_per_snapshot: f64,
    pub local_snapshot_timestamp: i64,
    pub remote_snapshot_timestamp: i64,
    pub replay_state: String,
}

impl PeerSite {
    /// Decode the JSON payload of a snapshot-mirroring description.
    ///
    /// rbd prints descriptions like `replaying, {"bytes_per_second":0.0,...}`.
    /// Returns `None` when there is no JSON object or it does not decode.
    pub fn replay_description(&self) -> Option<PeerSiteDescription> {
        let start = self.description.find('{')?;
        serde_json::from_str(&self.description[start..]).ok()
    }
}

/// Decode `rbd mirror pool status` JSON output.
pub fn decode_status(output: &[u8]) -> Result<MirrorStatus, serde_json::Error> {
    serde_json::from_slice(output)
}
