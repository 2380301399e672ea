use railworld_common::{EntityId, EntityKind, OwnerId, Point};
use railworld_index::IndexError;

/// Errors from world operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldError {
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),
    #[error("shape does not fit a {0:?}")]
    ShapeMismatch(EntityKind),
    #[error("entity {0} is not a rail node")]
    NotANode(EntityId),
    #[error("entity {0} cannot be moved")]
    Immovable(EntityId),
    #[error("{0} is outside the world")]
    OutOfWorld(Point),
    #[error("{owner} still owns {count} entities")]
    OwnerHasEntities { owner: OwnerId, count: usize },
    #[error(transparent)]
    Index(#[from] IndexError),
}
