use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an entity in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The player/account an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

impl OwnerId {
    /// Owner of world-generated entities (residences, companies, agents).
    pub const NONE: OwnerId = OwnerId(0);
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

/// Handle of a cluster inside the index registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cl{}", self.0)
    }
}

/// Handle of a bucket (chunk) inside the index registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub u32);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Every kind of entity the simulation knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    RailNode,
    RailEdge,
    Station,
    Platform,
    Gate,
    Residence,
    Company,
    Train,
    Human,
    Player,
    RailLine,
    LineTask,
    Step,
    Track,
    Transport,
}

impl EntityKind {
    /// Whether entities of this kind have a place in the world and are indexed.
    ///
    /// Players, lines and routing artifacts are bookkeeping only.
    pub fn is_spatial(self) -> bool {
        !matches!(
            self,
            EntityKind::Player
                | EntityKind::RailLine
                | EntityKind::LineTask
                | EntityKind::Step
                | EntityKind::Track
                | EntityKind::Transport
        )
    }

    /// Directed kinds are anchored at their originating endpoint.
    pub fn is_directed(self) -> bool {
        matches!(self, EntityKind::RailEdge)
    }

    /// Two-letter tag used in log output.
    pub fn short(self) -> &'static str {
        match self {
            EntityKind::RailNode => "rn",
            EntityKind::RailEdge => "re",
            EntityKind::Station => "st",
            EntityKind::Platform => "pf",
            EntityKind::Gate => "gt",
            EntityKind::Residence => "r",
            EntityKind::Company => "c",
            EntityKind::Train => "tr",
            EntityKind::Human => "h",
            EntityKind::Player => "o",
            EntityKind::RailLine => "l",
            EntityKind::LineTask => "lt",
            EntityKind::Step => "s",
            EntityKind::Track => "tk",
            EntityKind::Transport => "x",
        }
    }
}
