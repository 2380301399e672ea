use serde::{Deserialize, Serialize};

use railworld_common::{EntityId, EntityKind, OwnerId, Point};

/// Where an entity is in the world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// A located entity.
    Point(Point),
    /// A directed link between two rail nodes, anchored at `from`.
    Edge { from: EntityId, to: EntityId },
    /// Bookkeeping entity with no place in the world.
    Abstract,
}

/// Per-entity data stored in the world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub kind: EntityKind,
    pub owner: OwnerId,
    pub shape: Shape,
}

impl EntityRecord {
    pub fn new(kind: EntityKind, owner: OwnerId, shape: Shape) -> Self {
        Self { kind, owner, shape }
    }

    /// The entity's own position, if it has one.
    pub fn point(&self) -> Option<Point> {
        match self.shape {
            Shape::Point(p) => Some(p),
            _ => None,
        }
    }

    /// Whether this is an edge touching `node` at either end.
    pub fn touches(&self, node: EntityId) -> bool {
        matches!(self.shape, Shape::Edge { from, to } if from == node || to == node)
    }

    /// Whether this is an edge leaving `node`.
    pub fn leaves(&self, node: EntityId) -> bool {
        matches!(self.shape, Shape::Edge { from, .. } if from == node)
    }

    /// Whether the shape fits the kind: edges for directed kinds, points for
    /// other spatial kinds, nothing for bookkeeping kinds.
    pub fn is_well_formed(&self) -> bool {
        match self.shape {
            Shape::Edge { .. } => self.kind.is_directed(),
            Shape::Point(_) => self.kind.is_spatial() && !self.kind.is_directed(),
            Shape::Abstract => !self.kind.is_spatial(),
        }
    }
}
