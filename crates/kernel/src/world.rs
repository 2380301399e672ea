use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use railworld_common::{EntityId, EntityKind, OwnerId, Point};
use railworld_index::{Chunk, ClusterTree, IndexConfig, Placement, ViewMap};

use crate::{EntityRecord, Shape, WorldError};

/// An event record produced by every mutation to the world.
///
/// Replaying the log into a fresh world rebuilds both the registry and the
/// index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    /// Entity was spawned.
    Spawned { id: EntityId, record: EntityRecord },
    /// Entity was despawned. Carries the data it had.
    Despawned { id: EntityId, record: EntityRecord },
    /// Entity moved.
    Moved { id: EntityId, old: Point, new: Point },
    /// Simulation advanced one tick with the given seed.
    Stepped { tick: u64, seed: u64 },
}

/// The authoritative world state and its spatial index.
///
/// There is no global instance: the service layer owns one `World` and
/// passes it (behind its own lock) to every operation. The index is only
/// ever touched from here, so it always mirrors the registry.
#[derive(Debug, Clone)]
pub struct World {
    entities: BTreeMap<EntityId, EntityRecord>,
    tick: u64,
    /// Seed for deterministic RNG. Advanced each step for reproducibility.
    seed: u64,
    /// Append-only event log of all mutations.
    event_log: Vec<WorldEvent>,
    index: ClusterTree<Chunk>,
}

impl World {
    /// Create an empty world at tick 0 with seed 0.
    pub fn new(config: IndexConfig) -> Result<Self, WorldError> {
        Self::with_seed(config, 0)
    }

    /// Create a world with a specific seed for deterministic replay.
    pub fn with_seed(config: IndexConfig, seed: u64) -> Result<Self, WorldError> {
        Ok(Self {
            entities: BTreeMap::new(),
            tick: 0,
            seed,
            event_log: Vec::new(),
            index: ClusterTree::new(config)?,
        })
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    /// Drop the oldest events so at most `keep` remain. Returns how many
    /// were dropped.
    pub fn trim_events(&mut self, keep: usize) -> usize {
        let excess = self.event_log.len().saturating_sub(keep);
        self.event_log.drain(..excess);
        excess
    }

    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    pub fn entities(&self) -> &BTreeMap<EntityId, EntityRecord> {
        &self.entities
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityRecord> {
        self.entities.get(&id)
    }

    pub fn index(&self) -> &ClusterTree<Chunk> {
        &self.index
    }

    /// Whether `p` falls inside the root square.
    pub fn contains_point(&self, p: Point) -> bool {
        p.is_finite() && p.is_in(0.0, 0.0, self.index.config().max_scale as f64)
    }

    /// The index's view of an entity: edges resolve to their origin node.
    pub fn placement(&self, id: EntityId) -> Option<Placement> {
        let record = self.entities.get(&id)?;
        let node = |n: EntityId| self.entities.get(&n).and_then(EntityRecord::point);
        let (point, to) = match record.shape {
            Shape::Point(p) => (Some(p), None),
            Shape::Edge { from, to } => (node(from), node(to)),
            Shape::Abstract => (None, None),
        };
        Some(Placement {
            id,
            owner: record.owner,
            kind: record.kind,
            point,
            to,
        })
    }

    /// Spawn a new entity. Returns its id.
    pub fn spawn(
        &mut self,
        kind: EntityKind,
        owner: OwnerId,
        shape: Shape,
    ) -> Result<EntityId, WorldError> {
        let id = EntityId::new();
        self.spawn_with_id(id, EntityRecord::new(kind, owner, shape))?;
        Ok(id)
    }

    /// Spawn an entity with a specific id (used for replay).
    pub fn spawn_with_id(&mut self, id: EntityId, record: EntityRecord) -> Result<(), WorldError> {
        if self.entities.contains_key(&id) {
            return Err(WorldError::DuplicateEntity(id));
        }
        if !record.is_well_formed() {
            return Err(WorldError::ShapeMismatch(record.kind));
        }
        match record.shape {
            Shape::Point(p) if !self.contains_point(p) => return Err(WorldError::OutOfWorld(p)),
            Shape::Edge { from, to } => {
                self.require_node(from)?;
                self.require_node(to)?;
            }
            _ => {}
        }

        self.entities.insert(id, record);
        if let Some(placement) = self.placement(id) {
            self.index.add(&placement);
        }
        tracing::debug!(entity = %id, kind = record.kind.short(), owner = %record.owner, "spawned");
        self.event_log.push(WorldEvent::Spawned { id, record });
        Ok(())
    }

    fn require_node(&self, id: EntityId) -> Result<(), WorldError> {
        match self.entities.get(&id) {
            Some(r) if r.kind == EntityKind::RailNode => Ok(()),
            Some(_) => Err(WorldError::NotANode(id)),
            None => Err(WorldError::UnknownEntity(id)),
        }
    }

    /// Remove an entity and everything that cannot exist without it: edges
    /// touching a despawned rail node go first.
    pub fn despawn(&mut self, id: EntityId) -> Result<EntityRecord, WorldError> {
        let record = *self.entities.get(&id).ok_or(WorldError::UnknownEntity(id))?;
        if record.kind == EntityKind::RailNode {
            let edges: Vec<EntityId> = self
                .entities
                .iter()
                .filter(|(_, r)| r.touches(id))
                .map(|(e, _)| *e)
                .collect();
            for edge in edges {
                self.despawn(edge)?;
            }
        }

        if let Some(placement) = self.placement(id) {
            self.index.remove(&placement);
        }
        self.entities.remove(&id);
        tracing::debug!(entity = %id, kind = record.kind.short(), "despawned");
        self.event_log.push(WorldEvent::Despawned { id, record });
        Ok(record)
    }

    /// Relocate a located entity and re-index it. Moving a rail node also
    /// re-indexes every edge touching it, since edges carry both endpoints.
    pub fn move_to(&mut self, id: EntityId, to: Point) -> Result<(), WorldError> {
        let record = self.entities.get_mut(&id).ok_or(WorldError::UnknownEntity(id))?;
        let Shape::Point(old) = record.shape else {
            return Err(WorldError::Immovable(id));
        };
        if !(to.is_finite() && to.is_in(0.0, 0.0, self.index.config().max_scale as f64)) {
            return Err(WorldError::OutOfWorld(to));
        }
        record.shape = Shape::Point(to);
        let kind = record.kind;

        let mut moved = vec![id];
        if kind == EntityKind::RailNode {
            moved.extend(
                self.entities
                    .iter()
                    .filter(|(_, r)| r.touches(id))
                    .map(|(e, _)| *e),
            );
        }
        for entity in moved {
            if let Some(placement) = self.placement(entity) {
                self.index.update(&placement);
            }
        }

        tracing::trace!(entity = %id, %old, new = %to, "moved");
        self.event_log.push(WorldEvent::Moved { id, old, new: to });
        Ok(())
    }

    /// Advance the simulation by one tick.
    pub fn step(&mut self) {
        self.tick += 1;
        self.seed = splitmix64(self.seed);
        self.event_log.push(WorldEvent::Stepped {
            tick: self.tick,
            seed: self.seed,
        });
    }

    /// Everything visible in the square of side `2^scale` centered at
    /// `(cx, cy)`, descending `span` levels below `scale`.
    pub fn view(&self, cx: f64, cy: f64, scale: f64, span: f64) -> ViewMap {
        let mut view = ViewMap::new();
        self.index.view_map(&mut view, cx, cy, scale, span);
        view
    }

    /// The chunk holding `id` at exactly `scale`.
    pub fn find_chunk(&self, id: EntityId, scale: i32) -> Option<&Chunk> {
        let record = self.entities.get(&id)?;
        self.index.find_chunk(id, record.owner, scale)
    }

    /// Succeeds when nothing `owner` placed remains in the world or the index.
    pub fn check_owner_clear(&self, owner: OwnerId) -> Result<(), WorldError> {
        let count = self
            .entities
            .values()
            .filter(|r| r.owner == owner && r.kind.is_spatial())
            .count();
        if count > 0 {
            return Err(WorldError::OwnerHasEntities { owner, count });
        }
        let stale = self
            .index
            .clusters()
            .filter(|c| c.bucket(owner).is_some())
            .count();
        if stale > 0 {
            tracing::warn!(%owner, clusters = stale, "index still holds buckets for owner");
            return Err(WorldError::OwnerHasEntities {
                owner,
                count: stale,
            });
        }
        Ok(())
    }

    /// Rebuild a world from a sequence of events.
    ///
    /// Every event goes through the regular operations, so the index is
    /// rebuilt along with the registry and the new log matches `events`.
    pub fn replay(config: IndexConfig, events: &[WorldEvent]) -> Result<Self, WorldError> {
        let mut world = Self::new(config)?;
        for event in events {
            match event {
                WorldEvent::Spawned { id, record } => world.spawn_with_id(*id, *record)?,
                WorldEvent::Despawned { id, .. } => {
                    // edges removed by a cascade were logged before their node
                    if world.entities.contains_key(id) {
                        world.despawn(*id)?;
                    }
                }
                WorldEvent::Moved { id, new, .. } => world.move_to(*id, *new)?,
                WorldEvent::Stepped { tick, seed } => {
                    world.tick = *tick;
                    world.seed = *seed;
                    world.event_log.push(event.clone());
                }
            }
        }
        Ok(world)
    }

    /// Compute a deterministic hash of the world state for comparison.
    /// Uses canonical (BTreeMap) iteration order.
    pub fn state_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        let mix = |h: &mut u64, bytes: &[u8]| {
            for &b in bytes {
                *h ^= b as u64;
                *h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        mix(&mut h, &self.tick.to_le_bytes());
        mix(&mut h, &self.seed.to_le_bytes());
        for (id, record) in &self.entities {
            mix(&mut h, id.0.as_bytes());
            mix(&mut h, &record.owner.0.to_le_bytes());
            mix(&mut h, record.kind.short().as_bytes());
            match record.shape {
                Shape::Point(p) => {
                    mix(&mut h, &p.x.to_le_bytes());
                    mix(&mut h, &p.y.to_le_bytes());
                }
                Shape::Edge { from, to } => {
                    mix(&mut h, from.0.as_bytes());
                    mix(&mut h, to.0.as_bytes());
                }
                Shape::Abstract => {}
            }
        }
        h
    }
}

/// Splitmix64 step, used to advance the world seed each tick.
pub fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use railworld_index::Bucket;

    fn world() -> World {
        World::new(IndexConfig {
            max_scale: 8,
            min_scale: 2,
        })
        .unwrap()
    }

    fn at(x: f64, y: f64) -> Shape {
        Shape::Point(Point::new(x, y))
    }

    const P1: OwnerId = OwnerId(1);

    #[test]
    fn world_starts_empty() {
        let w = world();
        assert_eq!(w.tick(), 0);
        assert_eq!(w.entity_count(), 0);
        assert_eq!(w.index().cluster_count(), 1);
    }

    #[test]
    fn spawn_indexes_and_despawn_unindexes() {
        let mut w = world();
        let id = w.spawn(EntityKind::Station, P1, at(10.0, 10.0)).unwrap();
        assert_eq!(w.entity_count(), 1);
        assert!(w.find_chunk(id, 2).is_some());
        assert!(w.view(0.0, 0.0, 8.0, 0.0).contains(id));

        w.despawn(id).unwrap();
        assert_eq!(w.entity_count(), 0);
        assert!(w.find_chunk(id, 2).is_none());
        assert_eq!(w.index().cluster_count(), 1);
    }

    #[test]
    fn spawn_outside_world_is_rejected() {
        let mut w = world();
        let err = w.spawn(EntityKind::Residence, OwnerId::NONE, at(500.0, 0.0));
        assert_eq!(err, Err(WorldError::OutOfWorld(Point::new(500.0, 0.0))));
        assert_eq!(w.entity_count(), 0);
    }

    #[test]
    fn spawn_with_mismatched_shape_is_rejected() {
        let mut w = world();
        assert_eq!(
            w.spawn(EntityKind::RailEdge, P1, at(1.0, 1.0)),
            Err(WorldError::ShapeMismatch(EntityKind::RailEdge))
        );
    }

    #[test]
    fn players_are_registered_but_not_indexed() {
        let mut w = world();
        w.spawn(EntityKind::Player, P1, Shape::Abstract).unwrap();
        assert_eq!(w.entity_count(), 1);
        assert_eq!(w.index().bucket_count(), 0);
    }

    #[test]
    fn edge_is_indexed_at_origin_node() {
        let mut w = world();
        let a = w.spawn(EntityKind::RailNode, P1, at(10.0, 10.0)).unwrap();
        let b = w.spawn(EntityKind::RailNode, P1, at(-40.0, 60.0)).unwrap();
        let e = w
            .spawn(EntityKind::RailEdge, P1, Shape::Edge { from: a, to: b })
            .unwrap();

        let edge_path = w.index().clusters_containing(e, P1);
        assert_eq!(edge_path, w.index().clusters_containing(a, P1));
        assert_ne!(edge_path, w.index().clusters_containing(b, P1));
    }

    #[test]
    fn edge_needs_existing_nodes() {
        let mut w = world();
        let a = w.spawn(EntityKind::RailNode, P1, at(10.0, 10.0)).unwrap();
        let st = w.spawn(EntityKind::Station, P1, at(12.0, 10.0)).unwrap();
        let ghost = EntityId::new();
        assert_eq!(
            w.spawn(EntityKind::RailEdge, P1, Shape::Edge { from: a, to: ghost }),
            Err(WorldError::UnknownEntity(ghost))
        );
        assert_eq!(
            w.spawn(EntityKind::RailEdge, P1, Shape::Edge { from: a, to: st }),
            Err(WorldError::NotANode(st))
        );
    }

    #[test]
    fn despawning_node_cascades_to_edges() {
        let mut w = world();
        let a = w.spawn(EntityKind::RailNode, P1, at(10.0, 10.0)).unwrap();
        let b = w.spawn(EntityKind::RailNode, P1, at(20.0, 10.0)).unwrap();
        let ab = w
            .spawn(EntityKind::RailEdge, P1, Shape::Edge { from: a, to: b })
            .unwrap();
        let ba = w
            .spawn(EntityKind::RailEdge, P1, Shape::Edge { from: b, to: a })
            .unwrap();

        w.despawn(a).unwrap();
        assert!(w.get(ab).is_none());
        assert!(w.get(ba).is_none());
        assert!(w.get(b).is_some());
        assert!(w.index().clusters_containing(ba, P1).is_empty());
    }

    #[test]
    fn moving_node_reindexes_outgoing_edges() {
        let mut w = world();
        let a = w.spawn(EntityKind::RailNode, P1, at(10.0, 10.0)).unwrap();
        let b = w.spawn(EntityKind::RailNode, P1, at(20.0, 10.0)).unwrap();
        let ab = w
            .spawn(EntityKind::RailEdge, P1, Shape::Edge { from: a, to: b })
            .unwrap();

        w.move_to(a, Point::new(-90.0, -90.0)).unwrap();
        assert_eq!(
            w.index().clusters_containing(ab, P1),
            w.index().clusters_containing(a, P1)
        );
        let leaf = w.find_chunk(ab, 2).unwrap();
        assert_eq!(leaf.member(ab).unwrap().point, Point::new(-90.0, -90.0));
    }

    #[test]
    fn moving_node_updates_incoming_edge_targets() {
        let mut w = world();
        let a = w.spawn(EntityKind::RailNode, P1, at(10.0, 10.0)).unwrap();
        let b = w.spawn(EntityKind::RailNode, P1, at(20.0, 10.0)).unwrap();
        let ab = w
            .spawn(EntityKind::RailEdge, P1, Shape::Edge { from: a, to: b })
            .unwrap();
        assert_eq!(w.placement(ab).unwrap().to, Some(Point::new(20.0, 10.0)));

        w.move_to(b, Point::new(-50.0, 10.0)).unwrap();
        assert_eq!(w.placement(ab).unwrap().to, Some(Point::new(-50.0, 10.0)));
        let leaf = w.find_chunk(ab, 2).unwrap();
        assert_eq!(leaf.member(ab).unwrap().to, Some(Point::new(-50.0, 10.0)));
    }

    #[test]
    fn view_links_edges_between_chunks() {
        let mut w = world();
        let a = w.spawn(EntityKind::RailNode, P1, at(10.0, 10.0)).unwrap();
        let b = w.spawn(EntityKind::RailNode, P1, at(-50.0, 10.0)).unwrap();
        let ab = w
            .spawn(EntityKind::RailEdge, P1, Shape::Edge { from: a, to: b })
            .unwrap();

        // exports the scale-6 chunks, side 64
        let view = w.view(0.0, 0.0, 8.0, 1.0);
        let home = w.find_chunk(a, 6).unwrap().id();
        let peer = w.find_chunk(b, 6).unwrap().id();
        assert_ne!(home, peer);

        let out: Vec<_> = view.out_edges(home).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].offset, (-1, 0));
        assert_eq!(out[0].peer_center, Point::new(-32.0, 32.0));
        assert_eq!(out[0].peer, Some(peer));
        assert_eq!(out[0].members, vec![ab]);
        assert_eq!(out[0].from, Point::new(10.0, 10.0));
        assert_eq!(out[0].to, Point::new(-50.0, 10.0));
        assert_eq!(view.in_edges(peer).count(), 1);
        assert_eq!(view.in_edges(home).count(), 0);
    }

    #[test]
    fn move_validation() {
        let mut w = world();
        let a = w.spawn(EntityKind::RailNode, P1, at(10.0, 10.0)).unwrap();
        let b = w.spawn(EntityKind::RailNode, P1, at(20.0, 10.0)).unwrap();
        let ab = w
            .spawn(EntityKind::RailEdge, P1, Shape::Edge { from: a, to: b })
            .unwrap();

        assert_eq!(w.move_to(ab, Point::ORIGIN), Err(WorldError::Immovable(ab)));
        assert_eq!(
            w.move_to(a, Point::new(0.0, 1000.0)),
            Err(WorldError::OutOfWorld(Point::new(0.0, 1000.0)))
        );
        let ghost = EntityId::new();
        assert_eq!(w.move_to(ghost, Point::ORIGIN), Err(WorldError::UnknownEntity(ghost)));
    }

    #[test]
    fn step_advances_tick_and_seed() {
        let mut w = World::with_seed(IndexConfig::default(), 42).unwrap();
        w.step();
        w.step();
        assert_eq!(w.tick(), 2);
        assert_eq!(w.seed(), splitmix64(splitmix64(42)));
    }

    #[test]
    fn owner_clear_check() {
        let mut w = world();
        let id = w.spawn(EntityKind::Company, P1, at(3.0, 3.0)).unwrap();
        assert_eq!(
            w.check_owner_clear(P1),
            Err(WorldError::OwnerHasEntities { owner: P1, count: 1 })
        );
        w.despawn(id).unwrap();
        assert!(w.check_owner_clear(P1).is_ok());
    }

    #[test]
    fn events_are_recorded() {
        let mut w = world();
        let id = w.spawn(EntityKind::Human, OwnerId::NONE, at(1.0, 1.0)).unwrap();
        w.move_to(id, Point::new(2.0, 2.0)).unwrap();
        w.step();
        w.despawn(id).unwrap();
        assert_eq!(w.events().len(), 4);
        assert_eq!(w.drain_events().len(), 4);
        assert!(w.events().is_empty());
    }

    #[test]
    fn trim_keeps_newest_events() {
        let mut w = world();
        for _ in 0..10 {
            w.step();
        }
        assert_eq!(w.trim_events(3), 7);
        assert_eq!(w.events().len(), 3);
        assert!(matches!(w.events()[0], WorldEvent::Stepped { tick: 8, .. }));
        assert_eq!(w.trim_events(5), 0);
        assert_eq!(w.trim_events(0), 3);
        assert!(w.events().is_empty());
    }

    #[test]
    fn replay_rebuilds_registry_and_index() {
        let config = IndexConfig {
            max_scale: 8,
            min_scale: 2,
        };
        let mut w = World::with_seed(config, 7).unwrap();
        let mut nodes = Vec::new();
        for i in 0..12 {
            let p = at(-100.0 + i as f64 * 17.0, 50.0 - i as f64 * 9.0);
            nodes.push(w.spawn(EntityKind::RailNode, OwnerId(i / 4), p).unwrap());
        }
        for pair in nodes.windows(2) {
            let owner = w.get(pair[0]).unwrap().owner;
            if owner == w.get(pair[1]).unwrap().owner {
                w.spawn(EntityKind::RailEdge, owner, Shape::Edge { from: pair[0], to: pair[1] })
                    .unwrap();
            }
        }
        w.move_to(nodes[3], Point::new(5.0, 5.0)).unwrap();
        w.despawn(nodes[0]).unwrap();
        w.step();

        let replayed = World::replay(config, w.events()).unwrap();
        assert_eq!(replayed.state_hash(), w.state_hash());
        assert_eq!(replayed.index().stats(), w.index().stats());
        assert_eq!(replayed.events(), w.events());
    }
}
