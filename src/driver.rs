//! Drives the cache from per-namespace CephBlockPool watch streams
//!
//! One watch runs per allowed namespace. Its events map onto store
//! operations scoped to that namespace:
//! - `Init` / `InitApply` / `InitDone` buffer the relist and apply it with a
//!   single namespace replace
//! - `Apply` adds (or updates) one pool
//! - `Delete` removes one pool
//!
//! A pool whose add fails is queued and retried on every resync tick until it
//! is stored, replaced by a newer event, or deleted. When a relist replace
//! fails part way, every listed pool is re-added individually so the pools
//! after the failing one are not lost.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use mirrorwatch_cache::{MirrorStore, ResyncSummary};
use mirrorwatch_common::crd::CephBlockPool;
use mirrorwatch_common::{Error, Result};

/// A watch event tagged with the namespace its watch is scoped to
pub type NamespacedEvent = (
    String,
    std::result::Result<Event<CephBlockPool>, watcher::Error>,
);

/// Store operations the driver needs
#[async_trait]
pub trait PoolSink: Send + Sync {
    /// Add or update a pool
    async fn add_pool(&self, pool: &CephBlockPool) -> Result<()>;
    /// Remove a pool
    async fn delete_pool(&self, pool: &CephBlockPool) -> Result<()>;
    /// Replace all pools of one namespace
    async fn replace_namespace_pools(&self, namespace: &str, pools: &[CephBlockPool])
        -> Result<()>;
    /// Refresh every pool
    async fn resync(&self) -> ResyncSummary;
}

#[async_trait]
impl PoolSink for MirrorStore {
    async fn add_pool(&self, pool: &CephBlockPool) -> Result<()> {
        MirrorStore::add_pool(self, pool).await
    }

    async fn delete_pool(&self, pool: &CephBlockPool) -> Result<()> {
        MirrorStore::delete_pool(self, pool).await
    }

    async fn replace_namespace_pools(
        &self,
        namespace: &str,
        pools: &[CephBlockPool],
    ) -> Result<()> {
        MirrorStore::replace_namespace_pools(self, namespace, pools).await
    }

    async fn resync(&self) -> ResyncSummary {
        MirrorStore::resync(self).await
    }
}

/// Translates one namespace's watch events into store calls
pub struct PoolEventHandler<S> {
    sink: Arc<S>,
    namespace: String,
    initial: Vec<CephBlockPool>,
    /// Pools whose last add failed, by UID
    pending: BTreeMap<String, CephBlockPool>,
}

impl<S: PoolSink> PoolEventHandler<S> {
    /// Handler for the watch on `namespace`, writing into `sink`
    pub fn new(sink: Arc<S>, namespace: impl Into<String>) -> Self {
        Self {
            sink,
            namespace: namespace.into(),
            initial: Vec::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Number of pools waiting for a retry
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Apply one watch event
    pub async fn handle(&mut self, event: Event<CephBlockPool>) {
        match event {
            Event::Init => {
                debug!(namespace = %self.namespace, "CephBlockPool relist started");
                self.initial.clear();
            }
            Event::InitApply(pool) => self.initial.push(pool),
            Event::InitDone => self.apply_relist().await,
            Event::Apply(pool) => self.add(pool).await,
            Event::Delete(pool) => {
                if let Some(uid) = pool.uid() {
                    self.pending.remove(&uid);
                }
                if let Err(e) = self.sink.delete_pool(&pool).await {
                    warn!(pool = %pool.name_any(), error = %e, "Failed to remove rbd mirror status");
                }
            }
        }
    }

    /// Try every queued pool again
    pub async fn retry_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        debug!(namespace = %self.namespace, count = self.pending.len(), "Retrying queued pools");
        let pools = std::mem::take(&mut self.pending);
        for pool in pools.into_values() {
            self.add(pool).await;
        }
    }

    async fn apply_relist(&mut self) {
        let pools = std::mem::take(&mut self.initial);
        // The relist is authoritative; anything still queued is listed again
        self.pending.clear();
        info!(
            namespace = %self.namespace,
            count = pools.len(),
            "CephBlockPool relist complete, replacing namespace"
        );

        if let Err(e) = self
            .sink
            .replace_namespace_pools(&self.namespace, &pools)
            .await
        {
            warn!(
                namespace = %self.namespace,
                error = %e,
                "Namespace replace stopped early, adding pools individually"
            );
            for pool in pools {
                self.add(pool).await;
            }
        }
    }

    async fn add(&mut self, pool: CephBlockPool) {
        let uid = pool.uid();
        match self.sink.add_pool(&pool).await {
            Ok(()) => {
                if let Some(uid) = uid {
                    self.pending.remove(&uid);
                }
            }
            Err(e) => {
                log_add_failure(&pool, &e);
                // Without a UID the pool can never be stored
                if let Some(uid) = uid {
                    self.pending.insert(uid, pool);
                }
            }
        }
    }
}

fn log_add_failure(pool: &CephBlockPool, e: &Error) {
    if e.is_credential_error() {
        error!(
            pool = %pool.name_any(),
            namespace = ?pool.namespace(),
            error = %e,
            "Credentials unavailable, pool queued for retry"
        );
    } else {
        warn!(
            pool = %pool.name_any(),
            namespace = ?pool.namespace(),
            error = %e,
            "Failed to update rbd mirror status, pool queued for retry"
        );
    }
}

/// Build the watch config for CephBlockPools
pub fn watcher_config(field_selector: Option<&str>) -> watcher::Config {
    let config = watcher::Config::default();
    match field_selector {
        Some(selector) => config.fields(selector),
        None => config,
    }
}

/// One backoff-wrapped CephBlockPool watch per namespace, merged into one stream
pub fn namespaced_events(
    client: Client,
    namespaces: &[String],
    field_selector: Option<&str>,
) -> impl Stream<Item = NamespacedEvent> + Send {
    let config = watcher_config(field_selector);
    futures::stream::select_all(namespaces.iter().map(|namespace| {
        let api: Api<CephBlockPool> = Api::namespaced(client.clone(), namespace);
        let namespace = namespace.clone();
        watcher::watcher(api, config.clone())
            .default_backoff()
            .map(move |event| (namespace.clone(), event))
            .boxed()
    }))
}

/// Consume `events` and run periodic resyncs until the stream ends.
///
/// The first resync fires one full `resync_interval` after start; the initial
/// relist already fetches every pool. Each tick resyncs cached pools, then
/// retries queued ones.
pub async fn run<S, E>(sink: Arc<S>, events: E, resync_interval: Duration)
where
    S: PoolSink,
    E: Stream<Item = NamespacedEvent>,
{
    let mut handlers: HashMap<String, PoolEventHandler<S>> = HashMap::new();
    let mut events = std::pin::pin!(events);

    let mut ticker = interval_at(Instant::now() + resync_interval, resync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(resync_interval_secs = resync_interval.as_secs(), "Pool watch started");

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some((namespace, Ok(event))) => {
                    handlers
                        .entry(namespace.clone())
                        .or_insert_with(|| PoolEventHandler::new(Arc::clone(&sink), namespace))
                        .handle(event)
                        .await;
                }
                Some((namespace, Err(e))) => {
                    warn!(namespace = %namespace, error = %e, "CephBlockPool watch error, will retry");
                }
                None => {
                    info!("CephBlockPool watch stream ended");
                    return;
                }
            },
            _ = ticker.tick() => {
                sink.resync().await;
                for handler in handlers.values_mut() {
                    handler.retry_pending().await;
                }
            }
        }
    }
}
