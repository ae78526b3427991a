use common::{CONSTRAINED_CLUSTER_CACHE_SIZE, MAX_CLUSTER_VERTICES};
use rayon::prelude::*;

use crate::{
    lod::ClusterDag,
    mesh::cluster::{hash_combine, remap_edges, Cluster},
};

/// Score for reusing a vertex at each position of the trailing window, most recent first.
const CACHE_WEIGHT_TABLE: [i32; CONSTRAINED_CLUSTER_CACHE_SIZE] = [
    577, 616, 641, 512, 614, 635, 478, 651, //
    65, 213, 719, 490, 213, 726, 863, 745, //
    172, 939, 805, 885, 958, 1208, 1319, 1318, //
    1475, 1779, 2342, 159, 2307, 1998, 1211, 932,
];

/// Set of triangles as 64 bit words.
#[derive(Clone)]
struct TriangleSet(Vec<u64>);

impl TriangleSet {
    fn new(num_tris: usize) -> Self {
        Self(vec![0; num_tris.div_ceil(64)])
    }
    fn insert(&mut self, tri: usize) {
        self.0[tri / 64] |= 1 << (tri % 64);
    }
    fn remove(&mut self, tri: usize) {
        self.0[tri / 64] &= !(1 << (tri % 64));
    }
    fn union_with(&mut self, other: &TriangleSet) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= b;
        }
    }
    fn first(&self) -> Option<usize> {
        self.0
            .iter()
            .enumerate()
            .find(|(_, &w)| w != 0)
            .map(|(i, w)| i * 64 + w.trailing_zeros() as usize)
    }
    /// Members of `self & other`, ascending.
    fn intersection<'a>(&'a self, other: &'a TriangleSet) -> impl Iterator<Item = usize> + 'a {
        self.0
            .iter()
            .zip(&other.0)
            .enumerate()
            .flat_map(|(i, (&a, &b))| {
                let mut mask = a & b;
                std::iter::from_fn(move || {
                    (mask != 0).then(|| {
                        let bit = mask.trailing_zeros() as usize;
                        mask &= mask - 1;
                        i * 64 + bit
                    })
                })
            })
    }
}

impl Cluster {
    /// Reorder triangles within each material range so every vertex reference stays inside the
    /// decoder's trailing window, duplicating vertices that would fall out of it.
    ///
    /// Needs material ranges. Vertices no triangle references are dropped.
    pub fn constrain(&mut self) {
        let num_tris = self.num_tris();
        let num_verts = self.verts.len();

        let mut vertex_tris = vec![TriangleSet::new(num_tris); num_verts];
        for tri in 0..num_tris {
            for v in self.triangle(tri) {
                vertex_tris[v as usize].insert(tri);
            }
            debug_assert!({
                let [a, b, c] = self.triangle(tri);
                a != b && b != c && c != a
            });
        }

        let mut enabled = TriangleSet::new(num_tris);
        let mut touched = TriangleSet::new(num_tris);

        let mut old_to_new: Vec<Option<u32>> = vec![None; num_verts];
        let mut new_to_old: Vec<u32> = Vec::with_capacity(num_verts);
        let mut new_indexes = Vec::with_capacity(self.indexes.len());
        let mut tri_order = Vec::with_capacity(num_tris);

        for range in &self.material_ranges {
            let start = range.range_start as usize;
            for tri in start..start + range.range_length as usize {
                enabled.insert(tri);
            }

            loop {
                let num_new = new_to_old.len() as u32;
                let score_vertex = |v: u32| -> i32 {
                    old_to_new[v as usize]
                        .map(|new| (num_new - 1 - new) as usize)
                        .and_then(|position| CACHE_WEIGHT_TABLE.get(position).copied())
                        .unwrap_or(0)
                };

                // Ties keep the lowest triangle.
                let mut best: Option<(usize, i32)> = None;
                for tri in touched.intersection(&enabled) {
                    let score: i32 = self.triangle(tri).into_iter().map(score_vertex).sum();
                    if score > best.map_or(0, |(_, s)| s) {
                        best = Some((tri, score));
                    }
                }

                // Nothing warm, perhaps a separate component. Restart from the first open triangle.
                let Some(tri) = best.map(|(t, _)| t).or_else(|| enabled.first()) else {
                    break;
                };

                let old = self.triangle(tri);
                for v in old {
                    touched.union_with(&vertex_tris[v as usize]);
                }

                // Duplicating one vertex can push another out of the window, so repeat until stable.
                let mut test_num_new =
                    num_new + old.iter().filter(|&&v| old_to_new[v as usize].is_none()).count() as u32;
                'window: loop {
                    for &v in &old {
                        if let Some(new) = old_to_new[v as usize] {
                            if test_num_new - new >= CONSTRAINED_CLUSTER_CACHE_SIZE as u32 {
                                old_to_new[v as usize] = None;
                                test_num_new += 1;
                                continue 'window;
                            }
                        }
                    }
                    break;
                }

                for v in old {
                    let new = *old_to_new[v as usize].get_or_insert_with(|| {
                        new_to_old.push(v);
                        new_to_old.len() as u32 - 1
                    });
                    new_indexes.push(new);
                }
                tri_order.push(tri);
                enabled.remove(tri);
            }
        }
        debug_assert_eq!(tri_order.len(), num_tris);

        self.verts = new_to_old.iter().map(|&v| self.verts[v as usize]).collect();
        self.indexes = new_indexes;
        self.material_indexes = tri_order.iter().map(|&t| self.material_indexes[t]).collect();
        if self.boundary_edges.len() == num_tris * 3 {
            self.boundary_edges = remap_edges(&tri_order, &self.boundary_edges);
        }
        if self.external_edges.len() == num_tris * 3 {
            self.external_edges = remap_edges(&tri_order, &self.external_edges);
        }
    }

    /// Whether every vertex reference is within the trailing window of the highest vertex seen so far.
    pub fn satisfies_cache_window(&self) -> bool {
        let mut max_index = 0;
        (0..self.num_tris()).all(|tri| {
            let t = self.triangle(tri);
            max_index = t.into_iter().fold(max_index, u32::max);
            t.iter()
                .all(|&i| ((max_index - i) as usize) < CONSTRAINED_CLUSTER_CACHE_SIZE)
        })
    }

    /// Copy of a run of this cluster's triangles, constrained on its own.
    fn triangle_range(&self, start: usize, len: usize, part: u64) -> Cluster {
        let mut out = Cluster {
            verts: self.verts.clone(),
            indexes: self.indexes[start * 3..(start + len) * 3].to_vec(),
            material_indexes: self.material_indexes[start..start + len].to_vec(),
            boundary_edges: self.boundary_edges.get(start * 3..(start + len) * 3).map_or_else(Vec::new, <[bool]>::to_vec),
            external_edges: self.external_edges.get(start * 3..(start + len) * 3).map_or_else(Vec::new, <[u8]>::to_vec),
            guid: hash_combine(self.guid, part),
            ..self.clone()
        };
        out.build_material_ranges();
        out.constrain();
        out.bound();
        out
    }

    /// Constrain, halving by triangle count while the result has too many vertices.
    pub fn constrain_and_split(mut self) -> Vec<Cluster> {
        self.remove_degenerate_triangles();
        self.build_material_ranges();
        self.constrain();
        if !self.exceeds_vertex_limit() || self.num_tris() < 2 {
            return vec![self];
        }

        let half = self.num_tris() / 2;
        let a = self.triangle_range(0, half, 0);
        let b = self.triangle_range(half, self.num_tris() - half, 1);
        let mut out = a.split_until_fits();
        out.extend(b.split_until_fits());
        out
    }

    fn split_until_fits(self) -> Vec<Cluster> {
        if self.exceeds_vertex_limit() {
            self.constrain_and_split()
        } else {
            vec![self]
        }
    }
}

/// Constrain every cluster of the DAG. Clusters split for having more than
/// [`MAX_CLUSTER_VERTICES`] vertices keep their slot with the first piece, and the rest join
/// the same group.
pub fn constrain_clusters(dag: &mut ClusterDag) {
    let old_tris: usize = dag.clusters.iter().map(Cluster::num_tris).sum();
    let old_verts: usize = dag.clusters.iter().map(Cluster::num_verts).sum();
    let num_old_clusters = dag.clusters.len();

    let pieces: Vec<Vec<Cluster>> = std::mem::take(&mut dag.clusters)
        .into_par_iter()
        .map(Cluster::constrain_and_split)
        .collect();

    let mut extra = Vec::new();
    for mut split in pieces {
        let rest = split.split_off(1);
        dag.clusters.extend(split);
        extra.push(rest);
    }

    let (mut new_tris, mut new_verts) = (0, 0);
    for c in &dag.clusters {
        new_tris += c.num_tris();
        new_verts += c.num_verts();
    }

    for (i, rest) in extra.into_iter().enumerate() {
        for piece in rest {
            match dag.clusters[i].group_index {
                Some(group) => {
                    dag.add_to_group(group, piece);
                }
                None => dag.clusters.push(piece),
            }
        }
    }
    debug_assert!(dag.clusters.iter().all(|c| c.num_verts() <= MAX_CLUSTER_VERTICES));

    let tris_with_splits: usize = dag.clusters.iter().map(Cluster::num_tris).sum();
    let verts_with_splits: usize = dag.clusters.iter().map(Cluster::num_verts).sum();
    log::info!("Constrained clusters:");
    log::info!("  Input: {num_old_clusters} clusters, {old_tris} triangles and {old_verts} vertices");
    log::info!("  Output without splits: {num_old_clusters} clusters, {new_tris} triangles and {new_verts} vertices");
    log::info!(
        "  Output with splits: {} clusters, {tris_with_splits} triangles and {verts_with_splits} vertices",
        dag.clusters.len()
    );
}

#[cfg(test)]
mod test {
    use common::MeshVert;
    use glam::{vec3, Vec3};

    use super::*;

    fn triangle_soup(num_tris: u32) -> Cluster {
        let verts: Vec<MeshVert> = (0..num_tris * 3)
            .map(|i| {
                let t = (i / 3) as f32;
                let corner = [vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0)]
                    [(i % 3) as usize];
                MeshVert::new(corner + vec3(t * 2.0, 0.0, 0.0), Vec3::Z)
            })
            .collect();
        let indexes: Vec<u32> = (0..num_tris * 3).collect();
        let materials = vec![0; num_tris as usize];
        Cluster::from_triangles(&verts, &indexes, &materials, 0..num_tris, 0, 7)
    }

    fn strip(num_quads: u32) -> Cluster {
        let verts: Vec<MeshVert> = (0..=num_quads)
            .flat_map(|x| {
                [0.0, 1.0].map(|y| MeshVert::new(vec3(x as f32, y, 0.0), Vec3::Z))
            })
            .collect();
        let mut indexes = Vec::new();
        for x in 0..num_quads {
            let i = x * 2;
            indexes.extend([i, i + 2, i + 3, i, i + 3, i + 1]);
        }
        let materials: Vec<u32> = (0..num_quads * 2).map(|t| t % 3).collect();
        Cluster::from_triangles(&verts, &indexes, &materials, 0..num_quads * 2, 0, 1)
    }

    #[test]
    fn test_constrain_keeps_triangles() {
        let mut c = strip(64);
        let before: Vec<[[u32; 3]; 3]> = (0..c.num_tris())
            .map(|t| {
                let mut key = c.triangle(t).map(|i| c.verts[i as usize].position_key());
                key.sort_unstable();
                key
            })
            .collect();
        c.build_material_ranges();
        c.constrain();
        assert_eq!(c.num_tris(), 128);
        assert!(c.satisfies_cache_window());

        let mut after: Vec<[[u32; 3]; 3]> = (0..c.num_tris())
            .map(|t| {
                let mut key = c.triangle(t).map(|i| c.verts[i as usize].position_key());
                key.sort_unstable();
                key
            })
            .collect();
        let mut before = before;
        before.sort_unstable();
        after.sort_unstable();
        assert_eq!(before, after);

        // Material ranges still describe the triangle order.
        for r in &c.material_ranges {
            let tris = r.range_start as usize..(r.range_start + r.range_length) as usize;
            assert!(c.material_indexes[tris].iter().all(|&m| m == r.material_index));
        }
    }

    #[test]
    fn test_soup_splits_in_two() {
        let soup = triangle_soup(128);
        assert_eq!(soup.num_verts(), 384);

        let pieces = soup.constrain_and_split();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces.iter().map(Cluster::num_tris).sum::<usize>(), 128);
        for p in &pieces {
            assert!(p.satisfies_cache_window());
            assert!(p.num_verts() <= MAX_CLUSTER_VERTICES);
        }
        assert_ne!(pieces[0].guid, pieces[1].guid);
    }

    #[test]
    fn test_small_cluster_not_split() {
        let pieces = strip(8).constrain_and_split();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].num_verts(), 18);
    }
}
