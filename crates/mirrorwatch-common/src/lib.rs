//! Common types for mirrorwatch: errors, CRDs, well-known names, and logging

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-known Rook resources
// =============================================================================

/// Secret holding the Ceph admin key in each storage namespace
pub const MON_SECRET_NAME: &str = "rook-ceph-mon";

/// Data key of the Ceph admin key within [`MON_SECRET_NAME`]
pub const MON_SECRET_KEY: &str = "ceph-secret";

/// ConfigMap holding the CSI cluster configuration
pub const CSI_CONFIG_MAP_NAME: &str = "rook-ceph-csi-config";

/// Data key of the CSI cluster config JSON within [`CSI_CONFIG_MAP_NAME`]
pub const CSI_CONFIG_KEY: &str = "csi-cluster-config-json";

/// Ceph client identity used for status queries
pub const CEPH_CLIENT_ID: &str = "admin";
