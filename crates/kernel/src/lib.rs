//! World kernel: the authoritative registry of entities and the spatial index
//! built over it.
//!
//! # Invariants
//! - All state mutations flow through explicit operations, and every
//!   mutation keeps the index in step with the registry.
//! - Iteration order is deterministic (BTreeMap).

mod entity;
mod error;
pub mod world;

pub use entity::{EntityRecord, Shape};
pub use error::WorldError;
pub use world::{World, WorldEvent};
