use std::collections::{BTreeMap, HashMap};

use common::{Aabb, BoundingSphere, MeshVert, MAX_CLUSTER_VERTICES};
use glam::Vec3;

use super::edge_topology::EdgeTopology;
use crate::{
    encode::quantize::QuantizedPositions,
    lod::{ClusterIndex, GroupIndex},
};

/// A run of consecutive triangles sharing one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaterialRange {
    pub range_start: u32,
    pub range_length: u32,
    pub material_index: u32,
}

/// A bounded patch of triangles with its own vertex space.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    pub verts: Vec<MeshVert>,
    pub indexes: Vec<u32>,
    /// One per triangle.
    pub material_indexes: Vec<u32>,
    /// Per directed edge, set when no opposite edge exists inside this cluster.
    pub boundary_edges: Vec<bool>,
    /// Per directed edge, number of matching edges found in other clusters of the same level.
    pub external_edges: Vec<u8>,
    /// Clusters of the same level sharing edges with this one, with the shared edge count.
    pub adjacent_clusters: BTreeMap<ClusterIndex, u32>,
    pub material_ranges: Vec<MaterialRange>,

    pub bounds: Aabb,
    pub sphere_bounds: BoundingSphere,
    pub lod_bounds: BoundingSphere,
    pub surface_area: f32,
    /// Area weighted centroid of the triangles.
    pub centroid: Vec3,
    pub lod_error: f32,
    /// Longest edge.
    pub edge_length: f32,

    pub guid: u64,
    pub mip_level: u32,
    /// Group this cluster is a member of.
    pub group_index: Option<GroupIndex>,
    /// Group whose reduction produced this cluster. `None` for leaves.
    pub generating_group_index: Option<GroupIndex>,

    pub quantized: QuantizedPositions,
}

/// Murmur3 64 bit finaliser.
pub fn murmur_mix(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

pub fn hash_combine(a: u64, b: u64) -> u64 {
    murmur_mix(
        a ^ b
            .wrapping_add(0x9e37_79b9_7f4a_7c15)
            .wrapping_add(a << 6)
            .wrapping_add(a >> 2),
    )
}

/// Per edge data reordered to follow a new triangle order.
pub fn remap_edges<T: Copy>(order: &[usize], edges: &[T]) -> Vec<T> {
    order
        .iter()
        .flat_map(|&t| [edges[t * 3], edges[t * 3 + 1], edges[t * 3 + 2]])
        .collect()
}

impl Cluster {
    /// Gather `triangles` of an indexed mesh into a fresh local vertex space,
    /// deduplicating by source vertex index.
    pub fn from_triangles(
        verts: &[MeshVert],
        indexes: &[u32],
        material_indexes: &[u32],
        triangles: impl IntoIterator<Item = u32>,
        mip_level: u32,
        guid: u64,
    ) -> Self {
        let mut cluster = Cluster {
            guid,
            mip_level,
            ..Default::default()
        };
        let mut old_to_new = HashMap::new();

        for tri in triangles {
            let tri = tri as usize;
            for &old in &indexes[tri * 3..tri * 3 + 3] {
                let new = *old_to_new.entry(old).or_insert_with(|| {
                    cluster.verts.push(verts[old as usize]);
                    cluster.verts.len() as u32 - 1
                });
                cluster.indexes.push(new);
            }
            cluster.material_indexes.push(material_indexes[tri]);
        }

        cluster.external_edges = vec![0; cluster.indexes.len()];
        cluster.find_boundary_edges();
        cluster.bound();
        cluster.lod_bounds = cluster.sphere_bounds;
        cluster
    }

    /// Union of sibling clusters, welding vertices that are bitwise identical.
    /// Keeps the children's external edge counts for border locking.
    pub fn merge<'a>(children: impl IntoIterator<Item = &'a Cluster>) -> Self {
        let mut merged = Cluster::default();
        let mut vert_hash: HashMap<_, u32> = HashMap::new();
        let mut guids = Vec::new();
        let mut lod_spheres = Vec::new();
        let mut mip_level = 0;

        for child in children {
            for &i in &child.indexes {
                let v = child.verts[i as usize];
                let new = *vert_hash.entry(v.key()).or_insert_with(|| {
                    merged.verts.push(v);
                    merged.verts.len() as u32 - 1
                });
                merged.indexes.push(new);
            }
            merged
                .material_indexes
                .extend_from_slice(&child.material_indexes);
            merged
                .external_edges
                .extend_from_slice(&child.external_edges);
            merged.lod_error = merged.lod_error.max(child.lod_error);
            mip_level = mip_level.max(child.mip_level);
            guids.push(child.guid);
            lod_spheres.push(child.lod_bounds);
        }

        guids.sort_unstable();
        merged.guid = guids.into_iter().fold(0, hash_combine);
        merged.mip_level = mip_level + 1;

        merged.find_boundary_edges();
        merged.bound();
        merged.lod_bounds = BoundingSphere::from_spheres(&lod_spheres);
        merged
    }

    pub fn num_tris(&self) -> usize {
        self.indexes.len() / 3
    }

    pub fn num_verts(&self) -> usize {
        self.verts.len()
    }

    pub fn triangle(&self, tri: usize) -> [u32; 3] {
        [
            self.indexes[tri * 3],
            self.indexes[tri * 3 + 1],
            self.indexes[tri * 3 + 2],
        ]
    }

    pub fn position(&self, vert: u32) -> Vec3 {
        self.verts[vert as usize].position()
    }

    pub fn find_boundary_edges(&mut self) {
        let topology = EdgeTopology::new(&self.verts, &self.indexes);
        self.boundary_edges = (0..self.indexes.len() as u32)
            .map(|e| topology.is_boundary(e))
            .collect();
    }

    /// Boundary edges shared with a cluster outside the current group must not move.
    pub fn locked_vertices(&self) -> Vec<bool> {
        let mut locked = vec![false; self.verts.len()];
        for edge in 0..self.indexes.len() {
            if self.boundary_edges[edge] && self.external_edges.get(edge).is_some_and(|&n| n > 0) {
                let tri = edge / 3;
                let corner = edge % 3;
                locked[self.indexes[tri * 3 + corner] as usize] = true;
                locked[self.indexes[tri * 3 + (corner + 1) % 3] as usize] = true;
            }
        }
        locked
    }

    /// Recompute bounds, area, centroid and edge length from the current geometry.
    pub fn bound(&mut self) {
        self.bounds = Aabb::from_points(self.verts.iter().map(MeshVert::position));
        self.sphere_bounds = BoundingSphere::from_points(self.verts.iter().map(MeshVert::position));

        self.surface_area = 0.0;
        self.edge_length = 0.0;
        let mut weighted_center = Vec3::ZERO;

        for tri in 0..self.num_tris() {
            let [a, b, c] = self.triangle(tri).map(|i| self.position(i));
            let area = 0.5 * (b - a).cross(c - a).length();
            self.surface_area += area;
            weighted_center += (a + b + c) * (area / 3.0);

            for (p0, p1) in [(a, b), (b, c), (c, a)] {
                self.edge_length = self.edge_length.max(p0.distance(p1));
            }
        }

        self.centroid = if self.surface_area > 0.0 {
            weighted_center / self.surface_area
        } else {
            self.bounds.center()
        };
    }

    /// Drop triangles that reference one vertex more than once.
    pub fn remove_degenerate_triangles(&mut self) {
        let mut kept = 0;
        for tri in 0..self.num_tris() {
            let [a, b, c] = self.triangle(tri);
            if a == b || b == c || c == a {
                continue;
            }
            self.indexes.copy_within(tri * 3..tri * 3 + 3, kept * 3);
            self.material_indexes[kept] = self.material_indexes[tri];
            for k in 0..3 {
                if let Some(b) = self.boundary_edges.get(tri * 3 + k).copied() {
                    self.boundary_edges[kept * 3 + k] = b;
                }
                if let Some(e) = self.external_edges.get(tri * 3 + k).copied() {
                    self.external_edges[kept * 3 + k] = e;
                }
            }
            kept += 1;
        }
        self.indexes.truncate(kept * 3);
        self.material_indexes.truncate(kept);
        self.boundary_edges.truncate(kept * 3);
        self.external_edges.truncate(kept * 3);
    }

    /// Group triangles by material, most used first, and record the ranges.
    pub fn build_material_ranges(&mut self) {
        let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
        for &m in &self.material_indexes {
            *counts.entry(m).or_default() += 1;
        }

        let mut order: Vec<usize> = (0..self.num_tris()).collect();
        order.sort_by_key(|&t| {
            let m = self.material_indexes[t];
            (std::cmp::Reverse(counts[&m]), m)
        });

        let indexes = order
            .iter()
            .flat_map(|&t| self.triangle(t))
            .collect();
        let material_indexes: Vec<u32> = order.iter().map(|&t| self.material_indexes[t]).collect();
        if self.boundary_edges.len() == self.indexes.len() {
            self.boundary_edges = remap_edges(&order, &self.boundary_edges);
        }
        if self.external_edges.len() == self.indexes.len() {
            self.external_edges = remap_edges(&order, &self.external_edges);
        }
        self.indexes = indexes;

        self.material_ranges.clear();
        for (t, &m) in material_indexes.iter().enumerate() {
            match self.material_ranges.last_mut() {
                Some(r) if r.material_index == m => r.range_length += 1,
                _ => self.material_ranges.push(MaterialRange {
                    range_start: t as u32,
                    range_length: 1,
                    material_index: m,
                }),
            }
        }
        self.material_indexes = material_indexes;
    }

    pub fn exceeds_vertex_limit(&self) -> bool {
        self.verts.len() > MAX_CLUSTER_VERTICES
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::edge_topology::test::quad;

    #[test]
    fn test_from_triangles_dedups_by_index() {
        let (verts, indexes) = quad();
        let c = Cluster::from_triangles(&verts, &indexes, &[0, 0], 0..2, 0, 7);
        assert_eq!(c.num_verts(), 6);
        assert_eq!(c.num_tris(), 2);
        assert_eq!(c.guid, 7);
        assert!((c.surface_area - 1.0).abs() < 1e-6);
        assert!((c.centroid - Vec3::new(0.5, 0.5, 0.0)).length() < 1e-6);
        // Only the diagonal is interior.
        assert_eq!(c.boundary_edges.iter().filter(|&&b| !b).count(), 2);
    }

    #[test]
    fn test_merge_welds_and_raises_mip() {
        let (verts, indexes) = quad();
        let a = Cluster::from_triangles(&verts, &indexes, &[0, 1], [0], 0, 1);
        let b = Cluster::from_triangles(&verts, &indexes, &[0, 1], [1], 2, 2);
        let m = Cluster::merge([&a, &b]);

        assert_eq!(m.num_verts(), 4);
        assert_eq!(m.num_tris(), 2);
        assert_eq!(m.mip_level, 3);
        assert_eq!(m.material_indexes, vec![0, 1]);
        assert_eq!(m.boundary_edges.iter().filter(|&&b| !b).count(), 2);

        let m2 = Cluster::merge([&a, &b]);
        assert_eq!(m.guid, m2.guid);
        assert_ne!(m.guid, Cluster::merge([&a]).guid);
    }

    #[test]
    fn test_material_ranges_most_used_first() {
        let (verts, _) = quad();
        let indexes = vec![0, 1, 2, 3, 4, 5, 0, 1, 2];
        let mut c = Cluster::from_triangles(&verts, &indexes, &[3, 1, 1], 0..3, 0, 0);
        c.build_material_ranges();
        assert_eq!(c.material_indexes, vec![1, 1, 3]);
        assert_eq!(
            c.material_ranges,
            vec![
                MaterialRange {
                    range_start: 0,
                    range_length: 2,
                    material_index: 1
                },
                MaterialRange {
                    range_start: 2,
                    range_length: 1,
                    material_index: 3
                }
            ]
        );
    }

    #[test]
    fn test_remove_degenerate() {
        let (verts, indexes) = quad();
        let mut c = Cluster::from_triangles(&verts, &indexes, &[0, 0], 0..2, 0, 0);
        c.indexes[3..6].copy_from_slice(&[0, 0, 1]);
        c.remove_degenerate_triangles();
        assert_eq!(c.num_tris(), 1);
        assert_eq!(c.boundary_edges.len(), 3);
    }
}
