use std::collections::BTreeMap;

use railworld_common::{ChunkId, ClusterId, EntityId, OwnerId, Point};

use crate::cluster::{Link, QUADRANTS, slot};
use crate::{Bucket, Chunk, Cluster, IndexConfig, IndexError, Member, Placement, ViewMap};

/// Size summary of a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub clusters: usize,
    pub buckets: usize,
    /// Total bucket memberships across all levels.
    pub placements: usize,
    /// Finest scale any existing cluster reaches.
    pub finest_scale: i32,
}

/// The world-space index: a registry of clusters forming a quad tree rooted
/// at a single world root.
///
/// Clusters refer to each other by [`ClusterId`]. Children are owned through
/// the registry and parents are plain handles, so deleting a subtree never
/// has to break a reference cycle.
///
/// The tree has no interior locking. Callers serialize mutations and hold
/// at least a read lock while querying.
#[derive(Debug, Clone)]
pub struct ClusterTree<B: Bucket = Chunk> {
    config: IndexConfig,
    clusters: BTreeMap<ClusterId, Cluster<B>>,
    root: ClusterId,
    next_cluster: u32,
    next_chunk: u32,
}

impl<B: Bucket> ClusterTree<B> {
    /// Create a tree holding only the root cluster, centered at the origin.
    pub fn new(config: IndexConfig) -> Result<Self, IndexError> {
        config.validate()?;
        let mut tree = Self {
            config,
            clusters: BTreeMap::new(),
            root: ClusterId(0),
            next_cluster: 0,
            next_chunk: 0,
        };
        tree.root = tree.new_child(None, 0, 0);
        Ok(tree)
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn root(&self) -> ClusterId {
        self.root
    }

    pub fn get(&self, id: ClusterId) -> Option<&Cluster<B>> {
        self.clusters.get(&id)
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Cluster<B>> {
        self.clusters.values()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.clusters.values().map(|c| c.buckets.len()).sum()
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            clusters: self.clusters.len(),
            buckets: self.bucket_count(),
            placements: self
                .clusters
                .values()
                .flat_map(|c| c.buckets.values())
                .map(|b| b.len())
                .sum(),
            finest_scale: self
                .clusters
                .values()
                .map(|c| c.scale())
                .min()
                .unwrap_or(self.config.max_scale),
        }
    }

    fn cluster(&self, id: ClusterId) -> &Cluster<B> {
        self.clusters
            .get(&id)
            .unwrap_or_else(|| panic!("cluster {id} missing from registry"))
    }

    fn cluster_mut(&mut self, id: ClusterId) -> &mut Cluster<B> {
        self.clusters
            .get_mut(&id)
            .unwrap_or_else(|| panic!("cluster {id} missing from registry"))
    }

    /// Allocate a cluster and register it.
    ///
    /// Without a parent the new cluster is a root at `max_scale`; the tree
    /// makes exactly one of those when it is built. Otherwise it
    /// sits one scale below `parent`, in the quadrant selected by `dx, dy`
    /// (each `-1` or `+1`), and is recorded in the parent's child slot.
    pub fn new_child(&mut self, parent: Option<ClusterId>, dx: i32, dy: i32) -> ClusterId {
        let id = ClusterId(self.next_cluster);
        self.next_cluster += 1;

        let (center, scale) = match parent {
            None => {
                assert!(self.clusters.is_empty(), "tree already has root {}", self.root);
                (Point::ORIGIN, self.config.max_scale)
            }
            Some(p) => {
                let p = self.cluster(p);
                assert!(p.can_subdivide(), "{p} is at the finest scale");
                assert!(p.child(dx, dy).is_none(), "{p} already has a child at ({dx}, {dy})");
                let len = 2f64.powi(p.scale() - 2);
                (p.center().offset(dx, dy, len), p.scale() - 1)
            }
        };
        if let Some(p) = parent {
            self.cluster_mut(p).set_child(dx, dy, id);
        }

        let cluster = Cluster::new(id, center, scale, parent, self.config.min_scale);
        tracing::debug!(cluster = %id, scale, %center, "created cluster");
        self.clusters.insert(id, cluster);
        id
    }

    fn find_or_create_child(&mut self, id: ClusterId, dx: i32, dy: i32) -> ClusterId {
        match self.cluster(id).child(dx, dy) {
            Some(child) => child,
            None => self.new_child(Some(id), dx, dy),
        }
    }

    /// Index an entity from the root down.
    pub fn add(&mut self, placement: &Placement) {
        self.add_from(self.root, placement);
    }

    /// Index an entity in `from` and every descendant whose square contains
    /// its point, creating clusters on the way.
    pub fn add_from(&mut self, from: ClusterId, placement: &Placement) {
        if !placement.kind.is_spatial() {
            return;
        }
        let Some(point) = placement.point.filter(Point::is_finite) else {
            tracing::warn!(entity = %placement.id, kind = ?placement.kind, "no position to index");
            return;
        };
        self.insert(from, placement, point);
    }

    fn insert(&mut self, id: ClusterId, placement: &Placement, point: Point) {
        let owner = placement.owner;
        let (center, scale, centers) = {
            let cl = self.cluster(id);
            if !cl.contains(&point) {
                tracing::warn!(entity = %placement.id, %point, cluster = %cl, "entity is out of bounds");
            }
            (cl.center(), cl.scale(), cl.child_centers())
        };

        if self.cluster(id).bucket(owner).is_none() {
            let chunk = self.alloc_chunk();
            self.cluster_mut(id).resolve(B::create(chunk, owner, id, center, scale));
            tracing::trace!(cluster = %id, %owner, %chunk, "created bucket");
        }
        if let Some(bucket) = self.cluster_mut(id).buckets.get_mut(&owner) {
            bucket.add(
                placement.id,
                Member {
                    kind: placement.kind,
                    point,
                    to: placement.to,
                },
            );
        }

        let Some(centers) = centers else {
            return;
        };
        for (dx, dy) in QUADRANTS {
            let c = centers[slot(dy)][slot(dx)];
            if point.is_in(c.x, c.y, (scale - 1) as f64) {
                let child = self.find_or_create_child(id, dx, dy);
                self.insert(child, placement, point);
            }
        }
    }

    fn alloc_chunk(&mut self) -> ChunkId {
        let id = ChunkId(self.next_chunk);
        self.next_chunk += 1;
        id
    }

    /// Remove an entity from the root down.
    pub fn remove(&mut self, placement: &Placement) {
        self.remove_from(self.root, placement);
    }

    /// Remove an entity from `from` and from every descendant holding it.
    ///
    /// Emptied buckets are deleted, and so are emptied clusters other than
    /// the root, which detaches them from their parents. Ancestors of `from`
    /// are not touched, so removal must start where the matching `add` did.
    pub fn remove_from(&mut self, from: ClusterId, placement: &Placement) {
        if !placement.kind.is_spatial() {
            return;
        }
        self.scrub(from, placement.id, placement.owner);
    }

    fn scrub(&mut self, id: ClusterId, entity: EntityId, owner: OwnerId) {
        let holders: Vec<ClusterId> = self
            .cluster(id)
            .children()
            .filter(|c| self.cluster(*c).bucket(owner).is_some_and(|b| b.has(entity)))
            .collect();

        let emptied = match self.cluster_mut(id).buckets.get_mut(&owner) {
            Some(bucket) => {
                bucket.remove(entity);
                bucket.is_empty()
            }
            None => false,
        };
        for child in holders {
            self.scrub(child, entity, owner);
        }

        if emptied {
            if let Some(mut bucket) = self.cluster_mut(id).unresolve(Link::Bucket(owner)) {
                bucket.delete();
            }
        }
        let cl = self.cluster(id);
        if !cl.is_root() && !cl.has_data() && self.check_delete(id).is_ok() {
            self.destroy(id);
        }
    }

    /// Re-index an entity whose position changed: remove then add, from the root.
    pub fn update(&mut self, placement: &Placement) {
        self.update_from(self.root, placement);
    }

    pub fn update_from(&mut self, from: ClusterId, placement: &Placement) {
        self.remove_from(from, placement);
        // the starting cluster may have been emptied and deleted
        if self.clusters.contains_key(&from) {
            self.add_from(from, placement);
        } else {
            self.add(placement);
        }
    }

    /// The bucket holding `entity` for `owner` at exactly `scale`, if any.
    pub fn find_chunk(&self, entity: EntityId, owner: OwnerId, scale: i32) -> Option<&B> {
        self.find_chunk_from(self.root, entity, owner, scale)
    }

    pub fn find_chunk_from(
        &self,
        from: ClusterId,
        entity: EntityId,
        owner: OwnerId,
        scale: i32,
    ) -> Option<&B> {
        let cl = self.clusters.get(&from)?;
        if cl.scale() == scale {
            return cl.bucket(owner).filter(|b| b.has(entity));
        }
        if cl.scale() < scale {
            return None;
        }
        cl.children()
            .find_map(|child| self.find_chunk_from(child, entity, owner, scale))
    }

    /// Clusters whose `owner` bucket holds `entity`, root first.
    pub fn clusters_containing(&self, entity: EntityId, owner: OwnerId) -> Vec<ClusterId> {
        let mut found = Vec::new();
        self.collect_holders(self.root, entity, owner, &mut found);
        found
    }

    fn collect_holders(
        &self,
        id: ClusterId,
        entity: EntityId,
        owner: OwnerId,
        found: &mut Vec<ClusterId>,
    ) {
        let cl = self.cluster(id);
        if cl.bucket(owner).is_some_and(|b| b.has(entity)) {
            found.push(id);
        }
        for child in cl.children() {
            self.collect_holders(child, entity, owner, found);
        }
    }

    /// Export everything visible in the square of side `2^scale` centered at
    /// `(cx, cy)` into `target`.
    ///
    /// The walk stops at the first intersecting cluster finer than
    /// `scale - span` and exports its buckets whole.
    pub fn view_map(&self, target: &mut ViewMap, cx: f64, cy: f64, scale: f64, span: f64) {
        let _span = tracing::debug_span!("view_map", cx, cy, scale, span).entered();
        self.view_from(self.root, target, cx, cy, scale, span);
        self.link_edge_peers(target);
        tracing::trace!(entries = target.len(), sources = target.sources().len(), "view complete");
    }

    fn view_from(
        &self,
        id: ClusterId,
        target: &mut ViewMap,
        cx: f64,
        cy: f64,
        scale: f64,
        span: f64,
    ) {
        let cl = self.cluster(id);
        if !cl.intersects_with(cx, cy, scale) {
            return;
        }
        if (cl.scale() as f64) < scale - span {
            for (_, bucket) in cl.buckets() {
                bucket.export(target);
            }
        } else {
            for child in cl.children() {
                self.view_from(child, target, cx, cy, scale, span);
            }
        }
    }

    /// Point each unresolved edge delegate at its owner's chunk in the target
    /// square, when one exists.
    fn link_edge_peers(&self, target: &mut ViewMap) {
        for link in target.edge_delegates_mut() {
            if link.peer.is_some() {
                continue;
            }
            link.peer = self
                .locate(link.peer_center, link.scale)
                .and_then(|id| self.cluster(id).bucket(link.owner))
                .map(|b| b.id());
        }
    }

    /// The existing cluster at exactly `scale` whose square contains `point`.
    pub fn locate(&self, point: Point, scale: i32) -> Option<ClusterId> {
        let mut id = self.root;
        loop {
            let cl = self.cluster(id);
            if cl.scale() < scale || !cl.contains(&point) {
                return None;
            }
            if cl.scale() == scale {
                return Some(id);
            }
            id = QUADRANTS.iter().find_map(|&(dx, dy)| {
                let c = cl.child_center(dx, dy)?;
                if point.is_in(c.x, c.y, (cl.scale() - 1) as f64) {
                    cl.child(dx, dy)
                } else {
                    None
                }
            })?;
        }
    }

    /// Succeeds only if no cluster in the subtree rooted at `id` holds data.
    pub fn check_delete(&self, id: ClusterId) -> Result<(), IndexError> {
        let cl = self.clusters.get(&id).ok_or(IndexError::UnknownCluster(id))?;
        if cl.has_data() {
            return Err(IndexError::DataExists { cluster: id });
        }
        for child in cl.children() {
            self.check_delete(child)?;
        }
        Ok(())
    }

    /// Delete a cluster with its whole subtree and all their buckets.
    ///
    /// This does not consult [`ClusterTree::check_delete`]; callers that must
    /// not lose data check first. The root cannot be deleted.
    pub fn delete(&mut self, id: ClusterId) -> Result<(), IndexError> {
        if id == self.root {
            return Err(IndexError::RootIsPermanent(id));
        }
        if !self.clusters.contains_key(&id) {
            return Err(IndexError::UnknownCluster(id));
        }
        self.destroy(id);
        Ok(())
    }

    fn destroy(&mut self, id: ClusterId) {
        let children: Vec<ClusterId> = self.cluster(id).children().collect();
        for child in children {
            self.destroy(child);
        }

        let owners: Vec<OwnerId> = self.cluster(id).buckets.keys().copied().collect();
        for owner in owners {
            if let Some(mut bucket) = self.cluster_mut(id).unresolve(Link::Bucket(owner)) {
                bucket.delete();
            }
        }

        self.before_delete(id);
        self.clusters.remove(&id);
        tracing::debug!(cluster = %id, "deleted cluster");
    }

    fn before_delete(&mut self, id: ClusterId) {
        if let Some(parent) = self.cluster(id).parent() {
            self.cluster_mut(parent).unresolve(Link::Child(id));
        }
    }
}
