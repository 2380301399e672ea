use glam::DVec2;
use std::collections::BTreeMap;

use railworld_common::{ChunkId, ClusterId, EntityId, EntityKind, OwnerId, Point};

use crate::{Bucket, Delegate, EdgeDelegate, Member, ViewEntry, ViewMap, ViewSource};

/// Kinds that collapse into a delegate when a chunk is exported.
const DELEGATED: [EntityKind; 3] = [
    EntityKind::RailNode,
    EntityKind::Residence,
    EntityKind::Company,
];

/// Default bucket: the entities one owner has inside one cluster.
#[derive(Debug, Clone)]
pub struct Chunk {
    id: ChunkId,
    owner: OwnerId,
    home: ClusterId,
    center: Point,
    scale: i32,
    members: BTreeMap<EntityId, Member>,
}

impl Chunk {
    pub fn home(&self) -> ClusterId {
        self.home
    }

    pub fn center(&self) -> Point {
        self.center
    }

    pub fn scale(&self) -> i32 {
        self.scale
    }

    pub fn member(&self, entity: EntityId) -> Option<&Member> {
        self.members.get(&entity)
    }

    pub fn members(&self) -> impl Iterator<Item = (&EntityId, &Member)> {
        self.members.iter()
    }

    /// Summary of this chunk's members of `kind`, positioned at their mean.
    pub fn delegate(&self, kind: EntityKind) -> Option<Delegate> {
        let mut sum = DVec2::ZERO;
        let mut members = Vec::new();
        for (id, m) in self.members.iter().filter(|(_, m)| m.kind == kind) {
            sum += m.point.as_dvec2();
            members.push(*id);
        }
        if members.is_empty() {
            return None;
        }
        Some(Delegate {
            chunk: self.id,
            owner: self.owner,
            kind,
            scale: self.scale,
            point: Point::from(sum / members.len() as f64),
            members,
        })
    }

    /// Representative rail node of this chunk at its scale.
    pub fn rail_node(&self) -> Option<Delegate> {
        self.delegate(EntityKind::RailNode)
    }

    /// Which same-scale square `p` falls in, relative to this chunk's square.
    /// `(0, 0)` is the chunk's own square.
    pub fn square_offset(&self, p: Point) -> (i64, i64) {
        let side = (self.scale as f64).exp2();
        let half = side / 2.0;
        (
            ((p.x - (self.center.x - half)) / side).floor() as i64,
            ((p.y - (self.center.y - half)) / side).floor() as i64,
        )
    }

    /// Directed members leaving this chunk's square, one delegate per target
    /// square. Members whose target stays inside the square are left out.
    pub fn edge_delegates(&self) -> Vec<EdgeDelegate> {
        let mut groups: BTreeMap<(i64, i64), (DVec2, DVec2, Vec<EntityId>)> = BTreeMap::new();
        for (id, m) in &self.members {
            let Some(to) = m.to else {
                continue;
            };
            let offset = self.square_offset(to);
            if offset == (0, 0) {
                continue;
            }
            let group = groups
                .entry(offset)
                .or_insert((DVec2::ZERO, DVec2::ZERO, Vec::new()));
            group.0 += m.point.as_dvec2();
            group.1 += to.as_dvec2();
            group.2.push(*id);
        }

        let side = (self.scale as f64).exp2();
        groups
            .into_iter()
            .map(|(offset, (from, to, members))| {
                let n = members.len() as f64;
                EdgeDelegate {
                    chunk: self.id,
                    owner: self.owner,
                    scale: self.scale,
                    offset,
                    peer_center: Point::new(
                        self.center.x + offset.0 as f64 * side,
                        self.center.y + offset.1 as f64 * side,
                    ),
                    peer: None,
                    from: Point::from(from / n),
                    to: Point::from(to / n),
                    members,
                }
            })
            .collect()
    }
}

impl Bucket for Chunk {
    fn create(id: ChunkId, owner: OwnerId, home: ClusterId, center: Point, scale: i32) -> Self {
        Self {
            id,
            owner,
            home,
            center,
            scale,
            members: BTreeMap::new(),
        }
    }

    fn id(&self) -> ChunkId {
        self.id
    }

    fn owner(&self) -> OwnerId {
        self.owner
    }

    fn has(&self, entity: EntityId) -> bool {
        self.members.contains_key(&entity)
    }

    fn add(&mut self, entity: EntityId, member: Member) {
        self.members.insert(entity, member);
    }

    fn remove(&mut self, entity: EntityId) -> bool {
        self.members.remove(&entity).is_some()
    }

    fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn len(&self) -> usize {
        self.members.len()
    }

    fn delete(&mut self) {
        tracing::trace!(chunk = %self.id, cluster = %self.home, members = self.members.len(), "deleting chunk");
        self.members.clear();
    }

    fn export(&self, target: &mut ViewMap) {
        target.record_source(ViewSource {
            cluster: self.home,
            chunk: self.id,
            owner: self.owner,
            scale: self.scale,
        });
        for (id, m) in &self.members {
            target.insert(ViewEntry {
                id: *id,
                owner: self.owner,
                kind: m.kind,
                point: m.point,
                scale: self.scale,
            });
        }
        for kind in DELEGATED {
            if let Some(d) = self.delegate(kind) {
                target.push_delegate(d);
            }
        }
        for d in self.edge_delegates() {
            target.push_edge_delegate(d);
        }
    }
}
