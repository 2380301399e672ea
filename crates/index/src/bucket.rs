use railworld_common::{ChunkId, ClusterId, EntityId, EntityKind, OwnerId, Point};

use crate::ViewMap;

/// An entity as the index sees it.
///
/// `point` is the representative position: the entity's own position, or the
/// originating endpoint's position for directed kinds. `None` when the
/// position cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub id: EntityId,
    pub owner: OwnerId,
    pub kind: EntityKind,
    pub point: Option<Point>,
    /// Target endpoint's position for directed kinds.
    pub to: Option<Point>,
}

impl Placement {
    pub fn new(id: EntityId, owner: OwnerId, kind: EntityKind, point: Point) -> Self {
        Self {
            id,
            owner,
            kind,
            point: Some(point),
            to: None,
        }
    }

    /// A directed entity running from `from` to `to`, indexed at `from`.
    pub fn edge(id: EntityId, owner: OwnerId, kind: EntityKind, from: Point, to: Point) -> Self {
        Self {
            to: Some(to),
            ..Self::new(id, owner, kind, from)
        }
    }
}

/// What a bucket records about each entity it holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Member {
    pub kind: EntityKind,
    pub point: Point,
    pub to: Option<Point>,
}

impl Member {
    pub fn at(kind: EntityKind, point: Point) -> Self {
        Self {
            kind,
            point,
            to: None,
        }
    }
}

/// Per-(cluster, owner) collection of entities.
///
/// The cluster tree owns its buckets and drives their whole lifecycle:
/// it creates one the first time an owner's entity lands in a cluster and
/// calls [`Bucket::delete`] before dropping it.
pub trait Bucket {
    /// Allocate an empty bucket for `owner` living in cluster `home`, whose
    /// square is centered at `center` with side `2^scale`.
    fn create(id: ChunkId, owner: OwnerId, home: ClusterId, center: Point, scale: i32) -> Self
    where
        Self: Sized;

    fn id(&self) -> ChunkId;

    fn owner(&self) -> OwnerId;

    fn has(&self, entity: EntityId) -> bool;

    /// Insert or refresh an entity.
    fn add(&mut self, entity: EntityId, member: Member);

    /// Returns `true` if the entity was held.
    fn remove(&mut self, entity: EntityId) -> bool;

    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;

    /// Release everything the bucket holds.
    fn delete(&mut self);

    /// Write every held entity into `target`.
    fn export(&self, target: &mut ViewMap);
}
