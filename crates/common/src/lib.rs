//! Shared types for the railworld crates: identifiers, entity kinds and the
//! planar `Point` primitive used by the spatial index.

mod geo;
mod types;

pub use geo::{Point, square_half};
pub use types::{ChunkId, ClusterId, EntityId, EntityKind, OwnerId};
