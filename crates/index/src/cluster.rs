use std::collections::BTreeMap;
use std::fmt;

use railworld_common::{ClusterId, OwnerId, Point, square_half};

use crate::Bucket;

/// Quadrant directions in visiting order: north-west, north-east,
/// south-west, south-east.
pub const QUADRANTS: [(i32, i32); 4] = [(-1, -1), (1, -1), (-1, 1), (1, 1)];

/// Maps a direction in `{-1, +1}` to a slot index in `{0, 1}`.
pub fn slot(d: i32) -> usize {
    assert!(d == -1 || d == 1, "direction must be -1 or +1, got {d}");
    usize::from(d > 0)
}

/// Something a cluster holds a reference to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Child(ClusterId),
    Bucket(OwnerId),
}

/// A node of the spatial tree covering a `2^scale` square.
#[derive(Debug, Clone)]
pub struct Cluster<B> {
    id: ClusterId,
    center: Point,
    scale: i32,
    parent: Option<ClusterId>,
    children: [[Option<ClusterId>; 2]; 2],
    pub(crate) buckets: BTreeMap<OwnerId, B>,
    child_centers: Option<[[Point; 2]; 2]>,
}

impl<B: Bucket> Cluster<B> {
    pub(crate) fn new(
        id: ClusterId,
        center: Point,
        scale: i32,
        parent: Option<ClusterId>,
        min_scale: i32,
    ) -> Self {
        let child_centers = (scale > min_scale).then(|| {
            let len = 2f64.powi(scale - 2);
            let mut centers = [[center; 2]; 2];
            for (dx, dy) in QUADRANTS {
                centers[slot(dy)][slot(dx)] = center.offset(dx, dy, len);
            }
            centers
        });
        Self {
            id,
            center,
            scale,
            parent,
            children: [[None; 2]; 2],
            buckets: BTreeMap::new(),
            child_centers,
        }
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub fn center(&self) -> Point {
        self.center
    }

    pub fn scale(&self) -> i32 {
        self.scale
    }

    pub fn parent(&self) -> Option<ClusterId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether this cluster may have children (it is above the finest scale).
    pub fn can_subdivide(&self) -> bool {
        self.child_centers.is_some()
    }

    pub fn child(&self, dx: i32, dy: i32) -> Option<ClusterId> {
        self.children[slot(dy)][slot(dx)]
    }

    /// Existing children in quadrant order.
    pub fn children(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.children.iter().flatten().flatten().copied()
    }

    pub fn child_center(&self, dx: i32, dy: i32) -> Option<Point> {
        self.child_centers.map(|c| c[slot(dy)][slot(dx)])
    }

    pub fn child_centers(&self) -> Option<[[Point; 2]; 2]> {
        self.child_centers
    }

    pub fn bucket(&self, owner: OwnerId) -> Option<&B> {
        self.buckets.get(&owner)
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&OwnerId, &B)> {
        self.buckets.iter()
    }

    pub fn has_data(&self) -> bool {
        !self.buckets.is_empty()
    }

    /// Whether `p` lies inside the square this cluster covers.
    pub fn contains(&self, p: &Point) -> bool {
        p.is_in(self.center.x, self.center.y, self.scale as f64)
    }

    /// Closed-interval overlap between this cluster's square and the square
    /// of side `2^scale` centered at `(cx, cy)`. Touching edges overlap.
    pub fn intersects_with(&self, cx: f64, cy: f64, scale: f64) -> bool {
        let my = square_half(self.scale as f64);
        let other = square_half(scale);

        (self.center.x - my).max(cx - other) <= (self.center.x + my).min(cx + other)
            && (self.center.y - my).max(cy - other) <= (self.center.y + my).min(cy + other)
    }

    pub(crate) fn set_child(&mut self, dx: i32, dy: i32, child: ClusterId) {
        self.children[slot(dy)][slot(dx)] = Some(child);
    }

    /// Attach a bucket. Two buckets for one owner is a wiring bug.
    pub(crate) fn resolve(&mut self, bucket: B) {
        let owner = bucket.owner();
        if self.buckets.insert(owner, bucket).is_some() {
            panic!("{} already holds a bucket for {owner}", self.id);
        }
    }

    /// Drop a reference. Detaching something this cluster does not hold is a
    /// wiring bug.
    pub(crate) fn unresolve(&mut self, link: Link) -> Option<B> {
        match link {
            Link::Child(child) => {
                let id = self.id;
                let held = self
                    .children
                    .iter_mut()
                    .flatten()
                    .find(|s| **s == Some(child))
                    .unwrap_or_else(|| panic!("{child} is not a child of {id}"));
                *held = None;
                None
            }
            Link::Bucket(owner) => self.buckets.remove(&owner),
        }
    }
}

impl<B> fmt::Display for Cluster<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(s{})[", self.id, self.scale)?;
        for (i, owner) in self.buckets.keys().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{owner}")?;
        }
        write!(f, "]{}", self.center)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Chunk;
    use railworld_common::ChunkId;

    fn cluster(center: Point, scale: i32) -> Cluster<Chunk> {
        Cluster::new(ClusterId(0), center, scale, None, 2)
    }

    #[test]
    fn slots_map_directions() {
        assert_eq!(slot(-1), 0);
        assert_eq!(slot(1), 1);
    }

    #[test]
    fn child_centers_are_offset_by_quarter_side() {
        let cl = cluster(Point::ORIGIN, 8);
        // 2^(8-2) = 64
        assert_eq!(cl.child_center(-1, -1), Some(Point::new(-64.0, -64.0)));
        assert_eq!(cl.child_center(1, -1), Some(Point::new(64.0, -64.0)));
        assert_eq!(cl.child_center(-1, 1), Some(Point::new(-64.0, 64.0)));
        assert_eq!(cl.child_center(1, 1), Some(Point::new(64.0, 64.0)));
    }

    #[test]
    fn finest_cluster_has_no_child_centers() {
        let cl = cluster(Point::ORIGIN, 2);
        assert!(!cl.can_subdivide());
        assert_eq!(cl.child_center(1, 1), None);
    }

    #[test]
    fn intersects_when_touching_edge_or_corner() {
        // scale 2 spans [-2, 2]
        let cl = cluster(Point::ORIGIN, 2);
        // edge contact at x = 2
        assert!(cl.intersects_with(3.0, 0.0, 1.0));
        // corner contact at (2, 2)
        assert!(cl.intersects_with(3.0, 3.0, 1.0));
        // gap of 0.5
        assert!(!cl.intersects_with(3.5, 0.0, 1.0));
        assert!(!cl.intersects_with(0.0, -3.5, 1.0));
    }

    #[test]
    fn intersects_when_query_contains_cluster() {
        let cl = cluster(Point::new(100.0, 100.0), 3);
        assert!(cl.intersects_with(0.0, 0.0, 10.0));
    }

    #[test]
    fn contains_uses_own_scale() {
        let cl = cluster(Point::ORIGIN, 4);
        assert!(cl.contains(&Point::new(7.9, -8.0)));
        assert!(!cl.contains(&Point::new(8.0, 0.0)));
    }

    #[test]
    fn unresolve_child_clears_slot() {
        let mut cl = cluster(Point::ORIGIN, 8);
        cl.set_child(1, -1, ClusterId(5));
        assert_eq!(cl.child(1, -1), Some(ClusterId(5)));
        cl.unresolve(Link::Child(ClusterId(5)));
        assert_eq!(cl.child(1, -1), None);
        assert_eq!(cl.children().count(), 0);
    }

    #[test]
    #[should_panic(expected = "is not a child of")]
    fn unresolve_foreign_child_panics() {
        let mut cl = cluster(Point::ORIGIN, 8);
        cl.unresolve(Link::Child(ClusterId(9)));
    }

    #[test]
    #[should_panic(expected = "already holds a bucket")]
    fn resolve_twice_for_one_owner_panics() {
        let mut cl = cluster(Point::ORIGIN, 8);
        cl.resolve(Chunk::create(ChunkId(1), OwnerId(1), ClusterId(0), Point::ORIGIN, 8));
        cl.resolve(Chunk::create(ChunkId(2), OwnerId(1), ClusterId(0), Point::ORIGIN, 8));
    }

    #[test]
    fn display_lists_owners() {
        let mut cl = cluster(Point::ORIGIN, 8);
        cl.resolve(Chunk::create(ChunkId(1), OwnerId(1), ClusterId(0), Point::ORIGIN, 8));
        cl.resolve(Chunk::create(ChunkId(2), OwnerId(4), ClusterId(0), Point::ORIGIN, 8));
        assert_eq!(cl.to_string(), "cl0(s8)[o1,o4](0.0,0.0)");
    }
}
