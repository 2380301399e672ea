use serde::Serialize;
use std::collections::BTreeMap;

use railworld_common::{ChunkId, ClusterId, EntityId, EntityKind, OwnerId, Point};

/// One visible entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewEntry {
    pub id: EntityId,
    pub owner: OwnerId,
    pub kind: EntityKind,
    pub point: Point,
    /// Scale of the cluster that exported the entry.
    pub scale: i32,
}

/// A bucket that contributed to a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewSource {
    pub cluster: ClusterId,
    pub chunk: ChunkId,
    pub owner: OwnerId,
    pub scale: i32,
}

/// Summary of all members of one kind in one bucket.
///
/// At coarse zoom levels a client draws delegates instead of individual
/// entities: a bucket's rail nodes collapse into one node at their mean
/// position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delegate {
    pub chunk: ChunkId,
    pub owner: OwnerId,
    pub kind: EntityKind,
    pub scale: i32,
    pub point: Point,
    pub members: Vec<EntityId>,
}

impl Delegate {
    pub fn count(&self) -> usize {
        self.members.len()
    }
}

/// Directed members of one chunk whose targets fall in one neighbouring
/// square of the same scale, drawn as a single chunk-to-chunk link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeDelegate {
    pub chunk: ChunkId,
    pub owner: OwnerId,
    pub scale: i32,
    /// Position of the target square relative to the chunk's own, in squares.
    pub offset: (i64, i64),
    /// Center of the target square.
    pub peer_center: Point,
    /// The owner's chunk in the target square, filled in by the tree.
    pub peer: Option<ChunkId>,
    /// Mean position of the edges' origins.
    pub from: Point,
    /// Mean position of the edges' targets.
    pub to: Point,
    pub members: Vec<EntityId>,
}

impl EdgeDelegate {
    pub fn count(&self) -> usize {
        self.members.len()
    }
}

/// Accumulator filled by a viewport query.
///
/// Entries are keyed by entity id, so an entity exported by several
/// buckets appears once.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ViewMap {
    entries: BTreeMap<EntityId, ViewEntry>,
    sources: Vec<ViewSource>,
    delegates: Vec<Delegate>,
    edge_delegates: Vec<EdgeDelegate>,
}

impl ViewMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entity. Returns `false` if it was already present.
    pub fn insert(&mut self, entry: ViewEntry) -> bool {
        if self.entries.contains_key(&entry.id) {
            return false;
        }
        self.entries.insert(entry.id, entry);
        true
    }

    pub fn record_source(&mut self, source: ViewSource) {
        self.sources.push(source);
    }

    pub fn push_delegate(&mut self, delegate: Delegate) {
        self.delegates.push(delegate);
    }

    pub fn push_edge_delegate(&mut self, delegate: EdgeDelegate) {
        self.edge_delegates.push(delegate);
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&ViewEntry> {
        self.entries.get(&id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ViewEntry> {
        self.entries.values()
    }

    pub fn sources(&self) -> &[ViewSource] {
        &self.sources
    }

    pub fn delegates(&self) -> &[Delegate] {
        &self.delegates
    }

    pub fn edge_delegates(&self) -> &[EdgeDelegate] {
        &self.edge_delegates
    }

    pub(crate) fn edge_delegates_mut(&mut self) -> &mut [EdgeDelegate] {
        &mut self.edge_delegates
    }

    /// Links leaving `chunk`.
    pub fn out_edges(&self, chunk: ChunkId) -> impl Iterator<Item = &EdgeDelegate> {
        self.edge_delegates.iter().filter(move |d| d.chunk == chunk)
    }

    /// Links arriving at `chunk` from other chunks.
    pub fn in_edges(&self, chunk: ChunkId) -> impl Iterator<Item = &EdgeDelegate> {
        self.edge_delegates
            .iter()
            .filter(move |d| d.peer == Some(chunk))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: EntityId) -> ViewEntry {
        ViewEntry {
            id,
            owner: OwnerId(1),
            kind: EntityKind::Station,
            point: Point::ORIGIN,
            scale: 4,
        }
    }

    #[test]
    fn duplicate_entries_are_ignored() {
        let mut view = ViewMap::new();
        let id = EntityId::new();
        assert!(view.insert(entry(id)));
        assert!(!view.insert(entry(id)));
        assert_eq!(view.len(), 1);
        assert!(view.contains(id));
    }

    #[test]
    fn empty_view() {
        let view = ViewMap::new();
        assert!(view.is_empty());
        assert!(view.sources().is_empty());
        assert!(view.delegates().is_empty());
        assert!(view.edge_delegates().is_empty());
    }

    #[test]
    fn edge_delegates_split_by_direction() {
        let mut view = ViewMap::new();
        let link = |chunk: u32, peer: Option<u32>| EdgeDelegate {
            chunk: ChunkId(chunk),
            owner: OwnerId(1),
            scale: 4,
            offset: (1, 0),
            peer_center: Point::new(24.0, 8.0),
            peer: peer.map(ChunkId),
            from: Point::new(8.0, 8.0),
            to: Point::new(24.0, 8.0),
            members: vec![EntityId::new()],
        };
        view.push_edge_delegate(link(1, Some(2)));
        view.push_edge_delegate(link(2, Some(1)));
        view.push_edge_delegate(link(1, None));

        assert_eq!(view.out_edges(ChunkId(1)).count(), 2);
        assert_eq!(view.in_edges(ChunkId(1)).count(), 1);
        assert_eq!(view.in_edges(ChunkId(2)).next().map(|d| d.chunk), Some(ChunkId(1)));
        assert_eq!(view.in_edges(ChunkId(3)).count(), 0);
    }
}
