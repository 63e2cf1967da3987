//! Loose quad-tree for broad-phase collision candidates.
//!
//! # Partitioning policy
//!
//! The tree covers a square root region. A node holds the indices of the
//! objects filed in it; when it holds more than [`NODE_CAPACITY`] objects and
//! is shallower than [`MAX_DEPTH`], it splits into four equal quadrants and
//! every object whose box fits entirely inside one quadrant moves down.
//! Objects straddling a quadrant boundary stay at the parent. Each object is
//! therefore filed in exactly one node.
//!
//! # Pair completeness
//!
//! [`QuadTree::iterate_pairs`] reports every pair filed in the same node and
//! every pair where one object is filed in an ancestor of the other's node.
//! Two boxes in disjoint subtrees lie in quadrants that share at most an
//! edge, so they cannot overlap with positive area: no true overlap is ever
//! missed, and no pair is reported twice.
//!
//! # Out-of-extent objects
//!
//! An object that does not fit inside the root region is retained at the root
//! node ([`Placement::RetainedAtRoot`]). It is never dropped and still pairs
//! with every other object in the tree, so leaving the room extent cannot
//! hide a collision.

use tracing::debug;

use crate::bounds::BoundingBox;
use crate::SpatialError;

/// Objects a node holds before it splits.
pub const NODE_CAPACITY: usize = 8;

/// Maximum depth of the tree (the root is depth 0).
pub const MAX_DEPTH: u32 = 6;

// ---------------------------------------------------------------------------
// Bounded
// ---------------------------------------------------------------------------

/// Anything with an axis-aligned bounding box.
pub trait Bounded {
    /// The object's current bounds in world units.
    fn bounds(&self) -> BoundingBox;
}

impl Bounded for BoundingBox {
    fn bounds(&self) -> BoundingBox {
        *self
    }
}

/// Where [`QuadTree::place`] filed an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The object lies within the root extent and was filed normally.
    Contained,
    /// The object extends beyond the root extent and was kept at the root.
    RetainedAtRoot,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Node {
    region: BoundingBox,
    depth: u32,
    /// Indices into `QuadTree::nodes`, in quadrant order SW, SE, NW, NE.
    children: Option<[usize; 4]>,
    /// Indices into `QuadTree::objects`.
    members: Vec<usize>,
}

impl Node {
    fn new(region: BoundingBox, depth: u32) -> Self {
        Self {
            region,
            depth,
            children: None,
            members: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// QuadTree
// ---------------------------------------------------------------------------

/// A loose quad-tree over [`Bounded`] objects.
///
/// Objects are owned by the tree. Callers that move objects update them via
/// [`objects_mut`](Self::objects_mut) and then call
/// [`reevaluate`](Self::reevaluate) before iterating pairs.
#[derive(Debug, Clone)]
pub struct QuadTree<T> {
    extent: BoundingBox,
    objects: Vec<T>,
    nodes: Vec<Node>,
    node_capacity: usize,
    max_depth: u32,
}

impl<T: Bounded> QuadTree<T> {
    /// Create an empty tree covering `extent`.
    ///
    /// The root region is the square anchored at the extent's bottom-left
    /// corner whose side is the longer side of `extent`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::InvalidExtent`] if either side is not positive
    /// and finite.
    pub fn new(extent: BoundingBox) -> Result<Self, SpatialError> {
        Self::with_policy(extent, NODE_CAPACITY, MAX_DEPTH)
    }

    /// Create an empty tree with an explicit split threshold and depth limit.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::InvalidExtent`] if either side is not positive
    /// and finite.
    pub fn with_policy(
        extent: BoundingBox,
        node_capacity: usize,
        max_depth: u32,
    ) -> Result<Self, SpatialError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(extent.width) || !valid(extent.height) || !extent.x.is_finite() || !extent.y.is_finite() {
            return Err(SpatialError::InvalidExtent {
                width: extent.width,
                height: extent.height,
            });
        }
        let side = extent.width.max(extent.height);
        let root = BoundingBox::new(extent.x, extent.y, side, side);
        Ok(Self {
            extent: root,
            objects: Vec::new(),
            nodes: vec![Node::new(root, 0)],
            node_capacity: node_capacity.max(1),
            max_depth,
        })
    }

    /// Insert an object.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::NonFiniteBounds`] if the object's bounds
    /// contain NaN or infinity; the object is not inserted.
    pub fn place(&mut self, object: T) -> Result<Placement, SpatialError> {
        let bounds = object.bounds();
        if !bounds.is_finite() {
            return Err(SpatialError::NonFiniteBounds { bounds });
        }
        let index = self.objects.len();
        self.objects.push(object);
        Ok(self.file(index, bounds))
    }

    /// Re-partition every object from scratch using its current bounds.
    ///
    /// Call once per frame after objects have moved and before
    /// [`iterate_pairs`](Self::iterate_pairs). Objects whose bounds became
    /// non-finite are kept at the root so they remain visible to pair
    /// iteration.
    pub fn reevaluate(&mut self) {
        self.nodes.clear();
        self.nodes.push(Node::new(self.extent, 0));
        for index in 0..self.objects.len() {
            let bounds = self.objects[index].bounds();
            if bounds.is_finite() {
                self.file(index, bounds);
            } else {
                self.nodes[0].members.push(index);
            }
        }
    }

    /// Invoke `callback(a, b)` once for every candidate pair.
    ///
    /// Candidates are pairs filed in the same node or in an
    /// ancestor/descendant relation. The set is conservative: callers check
    /// exact overlap themselves.
    pub fn iterate_pairs<F: FnMut(&T, &T)>(&self, mut callback: F) {
        let mut ancestors: Vec<usize> = Vec::new();
        self.walk_pairs(0, &mut ancestors, &mut callback);
    }

    /// Invoke `callback` for every object whose bounds overlap `region`.
    pub fn query<F: FnMut(&T)>(&self, region: &BoundingBox, mut callback: F) {
        let mut stack = vec![0usize];
        while let Some(node_index) = stack.pop() {
            let node = &self.nodes[node_index];
            for &member in &node.members {
                let object = &self.objects[member];
                if object.bounds().overlaps(region) {
                    callback(object);
                }
            }
            if let Some(children) = node.children {
                for child in children {
                    if self.nodes[child].region.intersects(region) {
                        stack.push(child);
                    }
                }
            }
        }
    }

    /// Number of objects in the tree.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the tree holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Remove every object, keeping the root extent.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.nodes.clear();
        self.nodes.push(Node::new(self.extent, 0));
    }

    /// Keep only the objects for which `keep` returns `true`, then
    /// re-partition.
    pub fn retain<F: FnMut(&T) -> bool>(&mut self, keep: F) {
        self.objects.retain(keep);
        self.reevaluate();
    }

    /// All objects, in insertion order.
    pub fn objects(&self) -> &[T] {
        &self.objects
    }

    /// Mutable access to the objects, e.g. to refresh their bounds.
    ///
    /// The partition is stale until [`reevaluate`](Self::reevaluate) runs.
    pub fn objects_mut(&mut self) -> &mut [T] {
        &mut self.objects
    }

    /// The square root region.
    pub fn extent(&self) -> BoundingBox {
        self.extent
    }

    /// Depth of the deepest node currently allocated.
    pub fn depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Number of nodes currently allocated.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of objects filed directly at the root node.
    pub fn root_population(&self) -> usize {
        self.nodes[0].members.len()
    }

    // -- internals ------------------------------------------------------------

    /// File object `index` with `bounds`, descending as far as it fits.
    fn file(&mut self, index: usize, bounds: BoundingBox) -> Placement {
        if !self.extent.contains(&bounds) {
            debug!(?bounds, extent = ?self.extent, "object outside quad-tree extent; retained at root");
            self.nodes[0].members.push(index);
            return Placement::RetainedAtRoot;
        }

        let mut node_index = 0;
        loop {
            match self.nodes[node_index].children {
                Some(children) => match children
                    .iter()
                    .copied()
                    .find(|&c| self.nodes[c].region.contains(&bounds))
                {
                    Some(child) => node_index = child,
                    None => break,
                },
                None => break,
            }
        }

        self.nodes[node_index].members.push(index);
        self.maybe_split(node_index);
        Placement::Contained
    }

    fn maybe_split(&mut self, node_index: usize) {
        let node = &self.nodes[node_index];
        if node.children.is_some()
            || node.members.len() <= self.node_capacity
            || node.depth >= self.max_depth
        {
            return;
        }

        let region = node.region;
        let depth = node.depth + 1;
        let half = region.width * 0.5;
        let quadrants = [
            BoundingBox::new(region.x, region.y, half, half),
            BoundingBox::new(region.x + half, region.y, half, half),
            BoundingBox::new(region.x, region.y + half, half, half),
            BoundingBox::new(region.x + half, region.y + half, half, half),
        ];

        let first = self.nodes.len();
        for quadrant in quadrants {
            self.nodes.push(Node::new(quadrant, depth));
        }
        let children = [first, first + 1, first + 2, first + 3];
        self.nodes[node_index].children = Some(children);

        let members = std::mem::take(&mut self.nodes[node_index].members);
        let mut moved_into = Vec::new();
        for member in members {
            let bounds = self.objects[member].bounds();
            match children
                .iter()
                .copied()
                .find(|&c| self.nodes[c].region.contains(&bounds))
            {
                Some(child) => {
                    self.nodes[child].members.push(member);
                    moved_into.push(child);
                }
                None => self.nodes[node_index].members.push(member),
            }
        }

        moved_into.sort_unstable();
        moved_into.dedup();
        for child in moved_into {
            self.maybe_split(child);
        }
    }

    fn walk_pairs<F: FnMut(&T, &T)>(
        &self,
        node_index: usize,
        ancestors: &mut Vec<usize>,
        callback: &mut F,
    ) {
        let node = &self.nodes[node_index];
        for (i, &a) in node.members.iter().enumerate() {
            for &b in &node.members[i + 1..] {
                callback(&self.objects[a], &self.objects[b]);
            }
            for &b in ancestors.iter() {
                callback(&self.objects[b], &self.objects[a]);
            }
        }

        if let Some(children) = node.children {
            let pushed = node.members.len();
            ancestors.extend_from_slice(&node.members);
            for child in children {
                self.walk_pairs(child, ancestors, callback);
            }
            ancestors.truncate(ancestors.len() - pushed);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Tagged {
        id: usize,
        bounds: BoundingBox,
    }

    impl Bounded for Tagged {
        fn bounds(&self) -> BoundingBox {
            self.bounds
        }
    }

    fn tagged(id: usize, x: f64, y: f64, size: f64) -> Tagged {
        Tagged {
            id,
            bounds: BoundingBox::new(x, y, size, size),
        }
    }

    fn collect_pairs(tree: &QuadTree<Tagged>) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        tree.iterate_pairs(|a, b| pairs.push((a.id.min(b.id), a.id.max(b.id))));
        pairs.sort_unstable();
        pairs
    }

    // -- 1. Construction ------------------------------------------------------

    #[test]
    fn new_tree_is_empty_and_square() {
        let tree: QuadTree<Tagged> = QuadTree::new(BoundingBox::new(0.0, 0.0, 4.0, 2.0)).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.extent(), BoundingBox::new(0.0, 0.0, 4.0, 4.0));
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn zero_extent_is_rejected() {
        let result: Result<QuadTree<Tagged>, _> = QuadTree::new(BoundingBox::new(0.0, 0.0, 0.0, 1.0));
        assert!(matches!(result, Err(SpatialError::InvalidExtent { .. })));
    }

    #[test]
    fn nan_bounds_are_rejected() {
        let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0)).unwrap();
        let result = tree.place(tagged(0, f64::NAN, 0.0, 0.1));
        assert!(matches!(result, Err(SpatialError::NonFiniteBounds { .. })));
        assert!(tree.is_empty());
    }

    // -- 2. Splitting ---------------------------------------------------------

    #[test]
    fn crowded_node_splits() {
        let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 8.0, 8.0)).unwrap();
        for i in 0..(NODE_CAPACITY + 4) {
            tree.place(tagged(i, 0.1 + i as f64 * 0.3, 0.1, 0.1)).unwrap();
        }
        assert!(tree.node_count() > 1, "root should have split");
        assert!(tree.depth() >= 1);
    }

    #[test]
    fn straddling_object_stays_at_parent() {
        let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 8.0, 8.0)).unwrap();
        for i in 0..NODE_CAPACITY {
            tree.place(tagged(i, 0.5 + i as f64 * 0.2, 0.5, 0.1)).unwrap();
        }
        // Crosses the vertical midline, so no quadrant can hold it.
        tree.place(tagged(99, 3.9, 0.5, 0.4)).unwrap();
        assert!(tree.node_count() > 1);
        assert_eq!(tree.root_population(), 1);
    }

    #[test]
    fn depth_is_bounded() {
        let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0)).unwrap();
        for i in 0..200 {
            tree.place(tagged(i, 0.0, 0.0, 1e-6)).unwrap();
        }
        assert!(tree.depth() <= MAX_DEPTH);
    }

    // -- 3. Pair iteration ----------------------------------------------------

    #[test]
    fn overlapping_pair_is_reported_once() {
        let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 4.0, 4.0)).unwrap();
        tree.place(tagged(0, 1.0, 1.0, 0.5)).unwrap();
        tree.place(tagged(1, 1.2, 1.2, 0.5)).unwrap();
        tree.reevaluate();
        assert_eq!(collect_pairs(&tree), vec![(0, 1)]);
    }

    #[test]
    fn pairs_across_levels_are_found() {
        let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 8.0, 8.0)).unwrap();
        for i in 0..NODE_CAPACITY + 1 {
            tree.place(tagged(i, 0.25 + i as f64 * 0.25, 0.25, 0.1)).unwrap();
        }
        // Large box at the root overlapping the first small one.
        tree.place(Tagged {
            id: 100,
            bounds: BoundingBox::new(0.2, 0.2, 5.0, 0.2),
        })
        .unwrap();
        tree.reevaluate();

        let pairs = collect_pairs(&tree);
        assert!(pairs.contains(&(0, 100)));
        let mut dedup = pairs.clone();
        dedup.dedup();
        assert_eq!(dedup.len(), pairs.len(), "no pair may repeat");
    }

    #[test]
    fn reevaluate_tracks_moved_objects() {
        let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 8.0, 8.0)).unwrap();
        for i in 0..NODE_CAPACITY + 2 {
            tree.place(tagged(i, i as f64 * 0.7, 0.1, 0.2)).unwrap();
        }
        tree.place(tagged(50, 7.0, 7.0, 0.2)).unwrap();
        tree.reevaluate();
        assert!(!collect_pairs(&tree).iter().any(|&(a, b)| a == 0 && b == 50));

        // Move object 50 on top of object 0.
        for object in tree.objects_mut() {
            if object.id == 50 {
                object.bounds = BoundingBox::new(0.05, 0.15, 0.2, 0.2);
            }
        }
        tree.reevaluate();
        assert!(collect_pairs(&tree).contains(&(0, 50)));
    }

    // -- 4. Out-of-extent policy ----------------------------------------------

    #[test]
    fn objects_outside_extent_are_retained_at_root() {
        let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 2.0, 2.0)).unwrap();
        let placement = tree.place(tagged(0, -1.0, -1.0, 0.5)).unwrap();
        assert_eq!(placement, Placement::RetainedAtRoot);
        let placement = tree.place(tagged(1, -0.8, -0.8, 0.5)).unwrap();
        assert_eq!(placement, Placement::RetainedAtRoot);
        let placement = tree.place(tagged(2, 0.5, 0.5, 0.2)).unwrap();
        assert_eq!(placement, Placement::Contained);
        tree.reevaluate();

        assert_eq!(tree.len(), 3);
        // The two escaped objects still collide with each other.
        assert!(collect_pairs(&tree).contains(&(0, 1)));
    }

    #[test]
    fn object_straddling_the_extent_pairs_with_inside_objects() {
        let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 4.0, 4.0)).unwrap();
        for i in 0..NODE_CAPACITY + 1 {
            tree.place(tagged(i, 3.0 + (i % 3) as f64 * 0.3, 3.0 + (i / 3) as f64 * 0.3, 0.1)).unwrap();
        }
        let placement = tree.place(tagged(77, 3.9, 3.0, 0.5)).unwrap();
        assert_eq!(placement, Placement::RetainedAtRoot);
        tree.reevaluate();

        // Retained at the root, it is an ancestor of every other object.
        let with_77 = collect_pairs(&tree).iter().filter(|&&(_, b)| b == 77).count();
        assert_eq!(with_77, NODE_CAPACITY + 1);
    }

    // -- 5. Query / retain ----------------------------------------------------

    #[test]
    fn query_returns_only_overlapping_objects() {
        let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 4.0, 4.0)).unwrap();
        tree.place(tagged(0, 0.1, 0.1, 0.2)).unwrap();
        tree.place(tagged(1, 3.0, 3.0, 0.2)).unwrap();
        tree.reevaluate();

        let mut hits = Vec::new();
        tree.query(&BoundingBox::new(0.0, 0.0, 1.0, 1.0), |o| hits.push(o.id));
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn retain_drops_objects() {
        let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 4.0, 4.0)).unwrap();
        tree.place(tagged(0, 0.1, 0.1, 0.2)).unwrap();
        tree.place(tagged(1, 0.2, 0.2, 0.2)).unwrap();
        tree.retain(|o| o.id != 1);
        assert_eq!(tree.len(), 1);
        assert!(collect_pairs(&tree).is_empty());
    }

    #[test]
    fn clear_keeps_extent() {
        let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 4.0, 4.0)).unwrap();
        tree.place(tagged(0, 0.1, 0.1, 0.2)).unwrap();
        tree.clear();
        assert!(tree.is_empty());
        assert_eq!(tree.extent(), BoundingBox::new(0.0, 0.0, 4.0, 4.0));
    }
}
