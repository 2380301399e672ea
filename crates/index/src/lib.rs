//! World-space index: a multi-resolution quad tree of per-owner buckets.
//!
//! # Invariants
//! - An entity added at the root sits in the bucket of every cluster on its
//!   descent path, down to the finest scale. Coarse viewport queries stop
//!   early and still see it.
//! - Every non-root cluster is one scale below its parent and centered on
//!   one of the parent's child centers.
//! - Clusters are created lazily and deleted once they hold no data; the
//!   root is permanent.
//!
//! The index never locks. Whoever owns the world serializes mutations.

mod bucket;
mod chunk;
mod cluster;
mod config;
mod error;
mod tree;
mod view;

pub use bucket::{Bucket, Member, Placement};
pub use chunk::Chunk;
pub use cluster::{Cluster, QUADRANTS};
pub use config::IndexConfig;
pub use error::IndexError;
pub use tree::{ClusterTree, TreeStats};
pub use view::{Delegate, EdgeDelegate, ViewEntry, ViewMap, ViewSource};
