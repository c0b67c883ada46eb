//! Live cache of Ceph RBD mirror pool status
//!
//! The cache is fed CephBlockPool lifecycle events and keeps the output of
//! `rbd mirror pool status --verbose` for every pool that has mirroring
//! enabled. Consumers (metrics exporters, status endpoints) read it through
//! [`MirrorStore::records`].
//!
//! # Components
//!
//! - [`bootstrap`]: creates the `ceph.conf` and keyring `rbd` needs
//! - [`credentials`]: per-namespace monitor credentials from the Rook secret
//!   and CSI config map, cached until invalidated
//! - [`fetcher`]: runs `rbd` and decodes its JSON output
//! - [`store`]: the UID-keyed cache and its add/update/delete/replace/resync
//!   operations
//! - [`contract`]: the same operations over untyped `DynamicObject`s
//!
//! # Example
//!
//! ```ignore
//! let resolver = CredentialResolver::new(
//!     Arc::new(KubeRecordSource::new(client)),
//!     ["openshift-storage"],
//! );
//! let fetcher = RbdStatusFetcher::new(Arc::new(ProcessRunner::default()));
//! let store = MirrorStore::new(&CephConfigPaths::default(), resolver, Arc::new(fetcher))?;
//!
//! store.add_pool(&pool).await?;
//! for (uid, record) in store.records().await.iter() {
//!     println!("{uid}: {}", record.mirror_status.summary.health);
//! }
//! ```

pub mod bootstrap;
pub mod contract;
pub mod credentials;
pub mod fetcher;
pub mod status;
pub mod store;

pub use bootstrap::{ensure_ceph_config, CephConfigPaths};
pub use contract::ResourceStore;
pub use credentials::{
    ClusterConfigRecord, CredentialInput, CredentialResolver, KubeRecordSource, RecordSource,
};
pub use fetcher::{CommandRunner, ProcessRunner, RbdStatusFetcher, StatusSource};
pub use status::{MirrorStatus, PoolStatusRecord, PoolUid};
pub use store::{MirrorStore, PoolRecords, ResyncMode, ResyncSummary};

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, mirrorwatch_common::Error>;
