//! Custom resource types consumed by mirrorwatch
//!
//! These mirror the subset of Rook's CRDs that the cache reads. Rook owns and
//! installs the CRDs; mirrorwatch never applies them.

mod block_pool;

pub use block_pool::{CephBlockPool, CephBlockPoolSpec, CephBlockPoolStatus, MirroringSpec};
