//! Event-driven cache of RBD mirror pool status
//!
//! [`MirrorStore`] consumes CephBlockPool lifecycle events and keeps the
//! latest `rbd mirror pool status` for every pool with mirroring enabled,
//! keyed by the pool's UID. All map mutation goes through one exclusive lock,
//! and records are always replaced whole.
//!
//! Reads are limited to [`MirrorStore::records`], a locked iteration over the
//! current records. The generic lookup methods of
//! [`ResourceStore`](crate::ResourceStore) are intentionally empty.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use kube::ResourceExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use mirrorwatch_common::crd::CephBlockPool;
use mirrorwatch_common::Error;

use crate::bootstrap::{ensure_ceph_config, CephConfigPaths};
use crate::credentials::CredentialResolver;
use crate::fetcher::StatusSource;
use crate::status::{MirrorStatus, PoolStatusRecord, PoolUid};
use crate::Result;

type PoolMap = HashMap<PoolUid, PoolStatusRecord>;

/// How [`MirrorStore::resync`] holds the store lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResyncMode {
    /// Hold the lock for the whole sweep, including every `rbd` call.
    /// Add and delete events wait until the sweep finishes.
    #[default]
    HoldLock,
    /// Snapshot under a short lock, fetch unlocked, then lock per entry to
    /// commit. Entries deleted mid-sweep stay deleted, and entries refreshed
    /// by an event mid-sweep keep the event's status.
    PerEntry,
}

/// Outcome of a resync sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    /// Entries whose status was refreshed
    pub refreshed: usize,
    /// Entries left stale because credentials or fetch failed
    pub failed: usize,
    /// Entries changed or removed by a concurrent event before their result
    /// was committed (per-entry mode only)
    pub skipped: usize,
}

/// Locked, read-only view of the cached records
pub struct PoolRecords<'a> {
    guard: MutexGuard<'a, PoolMap>,
}

impl PoolRecords<'_> {
    /// Iterate over `(uid, record)` pairs in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = (&PoolUid, &PoolStatusRecord)> + '_ {
        self.guard.iter()
    }

    /// Number of cached pools
    pub fn len(&self) -> usize {
        self.guard.len()
    }

    /// Whether no pools are cached
    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}

/// Cache of mirror status for every mirrored CephBlockPool
pub struct MirrorStore {
    pools: Mutex<PoolMap>,
    credentials: CredentialResolver,
    status: Arc<dyn StatusSource>,
    resync_mode: ResyncMode,
}

impl MirrorStore {
    /// Prepare the local Ceph config and create an empty store.
    ///
    /// Fails with [`Error::BootstrapFatal`] when the config files cannot be
    /// created; the store is unusable without them.
    pub fn new(
        ceph_config: &CephConfigPaths,
        credentials: CredentialResolver,
        status: Arc<dyn StatusSource>,
    ) -> Result<Self> {
        ensure_ceph_config(ceph_config)?;
        Ok(Self {
            pools: Mutex::new(HashMap::new()),
            credentials,
            status,
            resync_mode: ResyncMode::default(),
        })
    }

    /// Use `mode` for resync sweeps
    pub fn with_resync_mode(mut self, mode: ResyncMode) -> Self {
        self.resync_mode = mode;
        self
    }

    /// Credential resolver, for forcing a refresh after key rotation
    pub fn credentials(&self) -> &CredentialResolver {
        &self.credentials
    }

    /// Lock the store and return a read-only view of all records.
    ///
    /// Every other operation waits while the view is alive; drop it promptly.
    pub async fn records(&self) -> PoolRecords<'_> {
        PoolRecords {
            guard: self.pools.lock().await,
        }
    }

    /// Number of cached pools
    pub async fn len(&self) -> usize {
        self.pools.lock().await.len()
    }

    /// Whether no pools are cached
    pub async fn is_empty(&self) -> bool {
        self.pools.lock().await.is_empty()
    }

    /// Fetch and store status for a pool that was created or changed.
    ///
    /// Pools with mirroring disabled are skipped without error; an existing
    /// entry for such a pool is kept until the pool is deleted. On failure
    /// the store is not modified.
    pub async fn add_pool(&self, pool: &CephBlockPool) -> Result<()> {
        let uid = pool_uid(pool)?;
        let name = pool.name_any();
        let namespace = pool_namespace(pool)?;

        if !pool.mirroring_enabled() {
            info!(
                pool = %name,
                namespace = %namespace,
                "Skipping rbd mirror status update because mirroring is disabled"
            );
            return Ok(());
        }

        let mirror_status = self.fetch(&name, &namespace).await.map_err(|e| {
            warn!(pool = %name, namespace = %namespace, error = %e, "Failed to fetch rbd mirror status");
            e
        })?;

        self.pools.lock().await.insert(
            uid.clone(),
            PoolStatusRecord {
                pool_name: name.clone(),
                pool_namespace: namespace.clone(),
                mirror_status,
            },
        );
        debug!(pool = %name, namespace = %namespace, uid = %uid, "Stored rbd mirror status");
        Ok(())
    }

    /// Same as [`add_pool`](Self::add_pool)
    pub async fn update_pool(&self, pool: &CephBlockPool) -> Result<()> {
        self.add_pool(pool).await
    }

    /// Forget a deleted pool. Unknown pools are ignored.
    pub async fn delete_pool(&self, pool: &CephBlockPool) -> Result<()> {
        let uid = pool_uid(pool)?;
        if self.pools.lock().await.remove(&uid).is_some() {
            debug!(pool = %pool.name_any(), uid = %uid, "Removed rbd mirror status");
        }
        Ok(())
    }

    /// Clear the store and add `pools` in order.
    ///
    /// Stops at the first failing pool and returns its error. Pools before it
    /// stay in the store; pools after it are never fetched.
    pub async fn replace_pools(&self, pools: &[CephBlockPool]) -> Result<()> {
        self.clear().await;
        for pool in pools {
            self.add_pool(pool).await?;
        }
        Ok(())
    }

    /// Drop every entry in `namespace`, then add `pools` in order.
    ///
    /// Entries of other namespaces are untouched. Failure handling matches
    /// [`replace_pools`](Self::replace_pools).
    pub async fn replace_namespace_pools(
        &self,
        namespace: &str,
        pools: &[CephBlockPool],
    ) -> Result<()> {
        self.pools
            .lock()
            .await
            .retain(|_, record| record.pool_namespace != namespace);
        for pool in pools {
            self.add_pool(pool).await?;
        }
        Ok(())
    }

    /// Re-fetch status for every cached pool.
    ///
    /// Per-pool failures are logged and counted; the stale record is kept.
    pub async fn resync(&self) -> ResyncSummary {
        let started = Instant::now();
        info!(mode = ?self.resync_mode, "RBD mirror store resync started");

        let summary = match self.resync_mode {
            ResyncMode::HoldLock => self.resync_holding_lock().await,
            ResyncMode::PerEntry => self.resync_per_entry().await,
        };

        info!(
            refreshed = summary.refreshed,
            failed = summary.failed,
            skipped = summary.skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "RBD mirror store resync ended"
        );
        summary
    }

    pub(crate) async fn clear(&self) {
        self.pools.lock().await.clear();
    }

    async fn resync_holding_lock(&self) -> ResyncSummary {
        let mut summary = ResyncSummary::default();
        let mut pools = self.pools.lock().await;

        for (uid, name, namespace) in snapshot(&pools) {
            match self.fetch(&name, &namespace).await {
                Ok(mirror_status) => {
                    pools.insert(
                        uid,
                        PoolStatusRecord {
                            pool_name: name,
                            pool_namespace: namespace,
                            mirror_status,
                        },
                    );
                    summary.refreshed += 1;
                }
                Err(e) => {
                    warn!(pool = %name, namespace = %namespace, error = %e, "Resync failed, keeping previous status");
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    async fn resync_per_entry(&self) -> ResyncSummary {
        let mut summary = ResyncSummary::default();
        let entries: Vec<(PoolUid, PoolStatusRecord)> = self
            .pools
            .lock()
            .await
            .iter()
            .map(|(uid, record)| (uid.clone(), record.clone()))
            .collect();

        for (uid, seen) in entries {
            let mirror_status = match self.fetch(&seen.pool_name, &seen.pool_namespace).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(pool = %seen.pool_name, namespace = %seen.pool_namespace, error = %e, "Resync failed, keeping previous status");
                    summary.failed += 1;
                    continue;
                }
            };

            // Commit only over the record the fetch started from; a concurrent
            // add or delete of the same pool is newer than this result
            let mut pools = self.pools.lock().await;
            match pools.get_mut(&uid) {
                Some(record) if *record == seen => {
                    record.mirror_status = mirror_status;
                    summary.refreshed += 1;
                }
                Some(_) => {
                    debug!(pool = %seen.pool_name, uid = %uid, "Pool updated during resync, dropping result");
                    summary.skipped += 1;
                }
                None => {
                    debug!(pool = %seen.pool_name, uid = %uid, "Pool deleted during resync, dropping result");
                    summary.skipped += 1;
                }
            }
        }

        summary
    }

    async fn fetch(&self, name: &str, namespace: &str) -> Result<MirrorStatus> {
        let credentials = self.credentials.resolve(namespace).await?;
        self.status.fetch(name, &credentials).await
    }
}

fn snapshot(pools: &PoolMap) -> Vec<(PoolUid, String, String)> {
    pools
        .iter()
        .map(|(uid, record)| {
            (
                uid.clone(),
                record.pool_name.clone(),
                record.pool_namespace.clone(),
            )
        })
        .collect()
}

fn pool_uid(pool: &CephBlockPool) -> Result<PoolUid> {
    pool.uid()
        .map(PoolUid::new)
        .ok_or_else(|| Error::MissingMetadata {
            name: pool.name_any(),
            field: "uid".to_string(),
        })
}

fn pool_namespace(pool: &CephBlockPool) -> Result<String> {
    pool.namespace().ok_or_else(|| Error::MissingMetadata {
        name: pool.name_any(),
        field: "namespace".to_string(),
    })
}
