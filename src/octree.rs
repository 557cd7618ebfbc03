//! Sparse octree addressed by location codes.
//!
//! A node's code is its parent's code shifted left by three bits with the octant
//! (0..=7) in the low bits. The root is `1`, so the depth of any code can be read
//! off its highest set bit. Only nodes some agent was inserted under exist.

use deps::*;

use bevy::utils::HashMap;

use crate::math::*;

pub type LocationCode = u64;

pub const ROOT_CODE: LocationCode = 1;
/// 3 bits per level on top of the root bit in a `u64`.
pub const MAX_DEPTH_LIMIT: u8 = 21;
/// Leaf entries stored inline before the list spills to the heap.
pub const LEAF_INLINE_CAPACITY: usize = 16;

#[inline]
pub fn child_code(parent: LocationCode, octant: u8) -> LocationCode {
    debug_assert!(octant < 8);
    (parent << 3) | octant as LocationCode
}

#[inline]
pub fn parent_code(code: LocationCode) -> LocationCode {
    code >> 3
}

#[inline]
pub fn code_depth(code: LocationCode) -> u8 {
    debug_assert!(code != 0, "zero is not a location code");
    ((63 - code.leading_zeros()) / 3) as u8
}

/// Bit 0 is set for the upper half along x, bit 1 along y, bit 2 along z.
#[inline]
pub fn octant_index(point: TVec3, center: TVec3) -> u8 {
    (point.x >= center.x) as u8 | ((point.y >= center.y) as u8) << 1 | ((point.z >= center.z) as u8) << 2
}

#[inline]
fn octant_min(min: TVec3, half: TReal, octant: u8) -> TVec3 {
    min + TVec3::new(
        (octant & 1) as TReal * half,
        ((octant >> 1) & 1) as TReal * half,
        ((octant >> 2) & 1) as TReal * half,
    )
}

#[derive(Debug, Clone)]
pub struct OctreeNode {
    pub min: TVec3,
    pub size: TReal,
    /// Agents inserted at or below this node.
    pub count: u32,
    pub child_mask: u8,
    /// Only populated at the deepest level.
    pub entities: SVec<[(u32, TVec3); LEAF_INLINE_CAPACITY]>,
}

impl OctreeNode {
    fn new(min: TVec3, size: TReal) -> Self {
        Self {
            min,
            size,
            count: 0,
            child_mask: 0,
            entities: SVec::new(),
        }
    }

    #[inline]
    pub fn center(&self) -> TVec3 {
        self.min + TVec3::splat(self.size * 0.5)
    }

    #[inline]
    pub fn contains(&self, point: TVec3) -> bool {
        let max = self.min + TVec3::splat(self.size);
        point.cmpge(self.min).all() && point.cmple(max).all()
    }

    #[inline]
    pub fn has_child(&self, octant: u8) -> bool {
        self.child_mask & (1 << octant) != 0
    }

    #[inline]
    fn intersects_sphere(&self, center: TVec3, radius: TReal) -> bool {
        let closest = center.clamp(self.min, self.min + TVec3::splat(self.size));
        closest.distance_squared(center) <= radius * radius
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Indexed { leaf: LocationCode },
    /// The point lies outside the root cube.
    OutOfBounds,
    /// The leaf already holds `max_entities_per_node` agents.
    Overflow { leaf: LocationCode },
}

#[derive(Debug, Clone)]
pub struct Octree {
    nodes: HashMap<LocationCode, OctreeNode>,
    max_depth: u8,
    leaf_capacity: usize,
    /// Agents refused by the last rebuild.
    dropped: Vec<u32>,
}

impl Octree {
    pub fn new(min: TVec3, size: TReal, max_depth: u8, leaf_capacity: usize) -> Self {
        let mut tree = Self {
            nodes: HashMap::default(),
            max_depth: max_depth.clamp(1, MAX_DEPTH_LIMIT),
            leaf_capacity: leaf_capacity.max(1),
            dropped: Vec::new(),
        };
        tree.reset(min, size);
        tree
    }

    pub fn from_config(config: &crate::config::OctreeConfig) -> Self {
        Self::new(
            TVec3::ZERO,
            1.,
            config.max_depth,
            config.max_entities_per_node,
        )
    }

    /// Drops every node and starts over with a root cube at `min` with edge `size`.
    pub fn reset(&mut self, min: TVec3, size: TReal) {
        self.nodes.clear();
        self.dropped.clear();
        self.nodes.insert(ROOT_CODE, OctreeNode::new(min, size));
    }

    /// Re-indexes all `positions` under a root cube fitted around them.
    ///
    /// Returns the ids that couldn't be indexed.
    pub fn rebuild(&mut self, positions: &[TVec3]) -> &[u32] {
        let (min, max) = positions.iter().fold(
            (TVec3::splat(TReal::INFINITY), TVec3::splat(TReal::NEG_INFINITY)),
            |(min, max), p| (min.min(*p), max.max(*p)),
        );
        let (min, size) = if positions.is_empty() {
            (TVec3::ZERO, 1.)
        } else {
            // pad so points on the max faces stay inside after float rounding
            let size = (max - min).max_element().max(1e-3) * 1.001;
            (min - TVec3::splat(size * 5e-4), size * 1.001)
        };
        self.reset(min, size);

        let mut dropped = std::mem::take(&mut self.dropped);
        for (ii, pos) in positions.iter().enumerate() {
            match self.insert(ii as u32, *pos) {
                Insertion::Indexed { .. } => {}
                Insertion::OutOfBounds | Insertion::Overflow { .. } => dropped.push(ii as u32),
            }
        }
        if !dropped.is_empty() {
            tracing::warn!(
                count = dropped.len(),
                capacity = self.leaf_capacity,
                "octree leaves full, agents left out of the spatial index"
            );
        }
        self.dropped = dropped;
        &self.dropped
    }

    /// The code of the deepest node `point` falls under, whether or not it exists yet.
    pub fn locate(&self, point: TVec3) -> Option<LocationCode> {
        let root = self.nodes.get(&ROOT_CODE)?;
        if !root.contains(point) {
            return None;
        }
        let mut code = ROOT_CODE;
        let mut min = root.min;
        let mut size = root.size;
        for _ in 0..self.max_depth {
            let half = size * 0.5;
            let octant = octant_index(point, min + TVec3::splat(half));
            code = child_code(code, octant);
            min = octant_min(min, half, octant);
            size = half;
        }
        Some(code)
    }

    pub fn insert(&mut self, id: u32, point: TVec3) -> Insertion {
        let leaf = match self.locate(point) {
            Some(leaf) => leaf,
            None => return Insertion::OutOfBounds,
        };
        if let Some(node) = self.nodes.get(&leaf) {
            if node.entities.len() >= self.leaf_capacity {
                return Insertion::Overflow { leaf };
            }
        }

        let (mut min, mut size) = match self.nodes.get(&ROOT_CODE) {
            Some(root) => (root.min, root.size),
            None => return Insertion::OutOfBounds,
        };
        let mut code = ROOT_CODE;
        for _ in 0..self.max_depth {
            let half = size * 0.5;
            let octant = octant_index(point, min + TVec3::splat(half));
            let node = self
                .nodes
                .entry(code)
                .or_insert_with(|| OctreeNode::new(min, size));
            node.count += 1;
            node.child_mask |= 1 << octant;
            code = child_code(code, octant);
            min = octant_min(min, half, octant);
            size = half;
        }
        debug_assert_eq!(code, leaf);
        let node = self
            .nodes
            .entry(leaf)
            .or_insert_with(|| OctreeNode::new(min, size));
        node.count += 1;
        node.entities.push((id, point));
        Insertion::Indexed { leaf }
    }

    #[inline]
    pub fn node(&self, code: LocationCode) -> Option<&OctreeNode> {
        self.nodes.get(&code)
    }

    #[inline]
    pub fn root(&self) -> &OctreeNode {
        &self.nodes[&ROOT_CODE]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    pub fn dropped(&self) -> &[u32] {
        &self.dropped
    }

    /// Appends the ids of all indexed agents within `radius` of `point` to `out`.
    pub fn query_neighbors(&self, point: TVec3, radius: TReal, out: &mut Vec<u32>) {
        let radius_sq = radius * radius;
        let mut stack: SVec<[LocationCode; 64]> = SVec::new();
        if self.root().intersects_sphere(point, radius) {
            stack.push(ROOT_CODE);
        }
        while let Some(code) = stack.pop() {
            let node = match self.nodes.get(&code) {
                Some(node) => node,
                None => continue,
            };
            for (id, pos) in node.entities.iter() {
                if pos.distance_squared(point) <= radius_sq {
                    out.push(*id);
                }
            }
            for octant in 0..8 {
                if !node.has_child(octant) {
                    continue;
                }
                let child = child_code(code, octant);
                if let Some(child_node) = self.nodes.get(&child) {
                    if child_node.intersects_sphere(point, radius) {
                        stack.push(child);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    fn unit_tree(depth: u8, capacity: usize) -> Octree {
        Octree::new(TVec3::ZERO, 8., depth, capacity)
    }

    #[test]
    fn code_helpers() {
        assert_eq!(code_depth(ROOT_CODE), 0);
        let c = child_code(ROOT_CODE, 5);
        assert_eq!(c, 0b1101);
        assert_eq!(code_depth(c), 1);
        assert_eq!(parent_code(c), ROOT_CODE);
        let deep = child_code(child_code(c, 7), 0);
        assert_eq!(code_depth(deep), 3);
        assert_eq!(parent_code(parent_code(deep)), c);
    }

    #[test]
    fn octants() {
        let c = TVec3::splat(4.);
        assert_eq!(octant_index(TVec3::new(1., 1., 1.), c), 0);
        assert_eq!(octant_index(TVec3::new(5., 1., 1.), c), 1);
        assert_eq!(octant_index(TVec3::new(1., 5., 1.), c), 2);
        assert_eq!(octant_index(TVec3::new(1., 1., 5.), c), 4);
        assert_eq!(octant_index(TVec3::new(5., 5., 5.), c), 7);
    }

    #[test]
    fn same_point_same_path() {
        let mut tree = unit_tree(4, 8);
        let p = TVec3::new(1.3, 6.1, 2.9);
        let a = tree.insert(0, p);
        let b = tree.insert(1, p);
        assert_eq!(a, b);
        let leaf = match a {
            Insertion::Indexed { leaf } => leaf,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(code_depth(leaf), 4);

        // every node on the path exists, links to its child and counts both agents
        let mut code = leaf;
        while code != ROOT_CODE {
            let parent = parent_code(code);
            let octant = (code & 7) as u8;
            assert_eq!(code, child_code(parent, octant));
            let parent_node = tree.node(parent).unwrap();
            assert!(parent_node.has_child(octant));
            assert_eq!(tree.node(code).unwrap().count, 2);
            assert!(tree.node(code).unwrap().contains(p));
            code = parent;
        }
        assert_eq!(tree.root().count, 2);
        assert_eq!(tree.node(leaf).unwrap().entities.len(), 2);
        // root + one node per level
        assert_eq!(tree.node_count(), 5);
    }

    #[test]
    fn inserted_path_halves_down_to_leaf() {
        let mut tree = unit_tree(4, 8);
        let p = TVec3::new(1.3, 6.1, 2.9);
        let leaf = match tree.insert(0, p) {
            Insertion::Indexed { leaf } => leaf,
            other => panic!("unexpected {other:?}"),
        };
        let node = tree.node(leaf).unwrap();
        assert_eq!(node.size, 0.5);
        assert!(node.min.abs_diff_eq(TVec3::new(1., 6., 2.5), 1e-6));
        let parent = tree.node(parent_code(leaf)).unwrap();
        assert_eq!(parent.size, 1.);
        assert!(parent.min.abs_diff_eq(TVec3::new(1., 6., 2.), 1e-6));
        assert!(parent.entities.is_empty());
    }

    #[test]
    fn refuses_out_of_bounds() {
        let mut tree = unit_tree(3, 8);
        assert_eq!(tree.insert(0, TVec3::new(-0.1, 1., 1.)), Insertion::OutOfBounds);
        assert_eq!(tree.insert(0, TVec3::new(1., 9., 1.)), Insertion::OutOfBounds);
        assert_eq!(tree.root().count, 0);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn overflow_caps_leaf() {
        let mut tree = unit_tree(2, 3);
        let p = TVec3::splat(0.5);
        for ii in 0..3 {
            assert!(matches!(tree.insert(ii, p), Insertion::Indexed { .. }));
        }
        let leaf = tree.locate(p).unwrap();
        assert_eq!(tree.insert(3, p), Insertion::Overflow { leaf });
        // refused inserts leave the counts alone
        assert_eq!(tree.root().count, 3);
        assert_eq!(tree.node(leaf).unwrap().entities.len(), 3);
    }

    #[test]
    fn rebuild_reports_dropped() {
        let mut tree = unit_tree(3, 2);
        let positions = vec![TVec3::ZERO; 5];
        let dropped = tree.rebuild(&positions).to_vec();
        assert_eq!(dropped, vec![2, 3, 4]);
        assert_eq!(tree.root().count, 2);

        let spread: Vec<_> = (0..5).map(|ii| TVec3::splat(ii as TReal * 3.)).collect();
        assert!(tree.rebuild(&spread).is_empty());
        assert_eq!(tree.root().count, 5);
        for p in spread {
            assert!(tree.root().contains(p));
        }
    }

    #[test]
    fn query_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let positions: Vec<TVec3> = (0..400)
            .map(|_| {
                TVec3::new(
                    rng.gen_range(-20.0..20.0),
                    rng.gen_range(-5.0..5.0),
                    rng.gen_range(-20.0..20.0),
                )
            })
            .collect();
        let mut tree = Octree::new(TVec3::ZERO, 1., 5, 64);
        assert!(tree.rebuild(&positions).is_empty());

        let mut found = Vec::new();
        for (ii, p) in positions.iter().enumerate().step_by(17) {
            let radius = 1. + (ii % 5) as TReal;
            found.clear();
            tree.query_neighbors(*p, radius, &mut found);
            found.sort_unstable();
            let expected: Vec<u32> = positions
                .iter()
                .enumerate()
                .filter(|(_, q)| q.distance_squared(*p) <= radius * radius)
                .map(|(jj, _)| jj as u32)
                .collect();
            assert_eq!(found, expected);
        }
    }
}
