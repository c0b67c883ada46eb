//! mirrorwatch - keeps a live cache of RBD mirror pool status
//!
//! The binary watches CephBlockPool resources and feeds them into a
//! [`mirrorwatch_cache::MirrorStore`], which runs `rbd mirror pool status`
//! for every mirrored pool and periodically refreshes the results.

pub mod config;
pub mod driver;
