use std::{collections::HashMap, ops::Range};

use common::{BoundingSphere, VertexFormat};
use glam::Vec3;
use partitioner::{add_locality_links, DisjointSet, Graph};
use rayon::prelude::*;

use super::{ClusterIndex, GroupIndex};
use crate::{mesh::cluster::Cluster, BuildError, BuildSettings};

/// Siblings from the same reduction are pulled together this much harder.
const SIBLING_WEIGHT: u32 = 16;
/// Every adjacency gets at least this weight.
const ADJACENCY_BASE_WEIGHT: u32 = 4;
const LOCALITY_WEIGHT: u32 = 1;

/// Sibling clusters reduced together, and the bounds and error range in which they are drawn.
#[derive(Debug, Clone)]
pub struct ClusterGroup {
    pub children: Vec<ClusterIndex>,
    /// Contains every child cluster.
    pub bounds: BoundingSphere,
    /// Contains the LOD bounds of every child, and so of everything below.
    pub lod_bounds: BoundingSphere,
    /// Smallest error of a child. -1 if any child is a leaf.
    pub min_lod_error: f32,
    /// Error of the clusters this group was reduced to. Infinite for the root.
    pub max_parent_lod_error: f32,
    pub mip_level: u32,
    pub is_root: bool,

    pub page_index_start: u32,
    pub page_index_num: u32,
    /// Indexes of this group's parts, in page order.
    pub parts: Vec<u32>,
}

impl ClusterGroup {
    fn new(
        clusters: &[Cluster],
        children: Vec<ClusterIndex>,
        max_parent_lod_error: f32,
        lod_bounds: BoundingSphere,
    ) -> Self {
        let bounds = BoundingSphere::from_spheres(
            children.iter().map(|c| &clusters[c.index()].sphere_bounds),
        );
        let min_lod_error = children
            .iter()
            .map(|c| {
                let c = &clusters[c.index()];
                if c.generating_group_index.is_none() {
                    -1.0
                } else {
                    c.lod_error
                }
            })
            .fold(f32::INFINITY, f32::min);
        let mip_level = children
            .iter()
            .map(|c| clusters[c.index()].mip_level)
            .max()
            .unwrap_or(0);

        Self {
            children,
            bounds,
            lod_bounds,
            min_lod_error,
            max_parent_lod_error,
            mip_level,
            is_root: false,
            page_index_start: 0,
            page_index_num: 0,
            parts: Vec::new(),
        }
    }
}

/// Clusters and groups of every level, leaves first.
#[derive(Debug, Clone, Default)]
pub struct ClusterDag {
    pub clusters: Vec<Cluster>,
    pub groups: Vec<ClusterGroup>,
    pub num_leaf_clusters: usize,
    pub root_group: Option<GroupIndex>,
    /// Number of reduction levels above the leaves.
    pub depth: u32,
}

/// Output of reducing one group.
struct Reduction {
    parents: Vec<Cluster>,
    error: f32,
    lod_bounds: BoundingSphere,
}

impl ClusterDag {
    pub fn cluster(&self, index: ClusterIndex) -> &Cluster {
        &self.clusters[index.index()]
    }

    pub fn group(&self, index: GroupIndex) -> &ClusterGroup {
        &self.groups[index.index()]
    }

    pub fn is_leaf(&self, index: ClusterIndex) -> bool {
        self.cluster(index).generating_group_index.is_none()
    }

    /// Reduce `leaves` level by level until a single root group remains.
    pub fn build(
        leaves: Vec<Cluster>,
        settings: &BuildSettings,
        format: VertexFormat,
    ) -> Result<Self, BuildError> {
        let mut dag = ClusterDag {
            num_leaf_clusters: leaves.len(),
            clusters: leaves,
            ..Default::default()
        };

        let mut level = 0..dag.clusters.len();
        loop {
            let n = level.len();
            if n <= 1 || dag.depth >= settings.max_dag_levels {
                dag.add_root(level);
                break;
            }

            let groups = if n <= settings.max_group_size {
                vec![level.clone().map(|i| ClusterIndex(i as u32)).collect()]
            } else {
                dag.find_adjacency(level.clone());
                dag.group_level(level.clone(), settings)?
            };

            let reductions = groups
                .par_iter()
                .map(|children| dag.reduce_group(children, settings, format))
                .collect::<Result<Vec<_>, _>>()?;

            let next_start = dag.clusters.len();
            let num_groups = groups.len();
            for (children, reduction) in groups.into_iter().zip(reductions) {
                dag.add_group(children, reduction);
            }
            let next = next_start..dag.clusters.len();

            log::info!(
                "Level {}: {} clusters reduced in {} groups to {} clusters",
                dag.depth,
                n,
                num_groups,
                next.len()
            );
            dag.depth += 1;

            if next.len() >= n {
                log::warn!(
                    "Level {} did not shrink ({} -> {} clusters), closing the hierarchy",
                    dag.depth,
                    n,
                    next.len()
                );
                dag.add_root(next);
                break;
            }
            level = next;
        }

        Ok(dag)
    }

    /// Count matching boundary edges between clusters of one level.
    fn find_adjacency(&mut self, level: Range<usize>) {
        type EdgeKey = ([u32; 3], [u32; 3]);
        let mut edge_hash: HashMap<EdgeKey, Vec<ClusterIndex>> = HashMap::new();

        let edge_key = |c: &Cluster, edge: usize| -> Option<EdgeKey> {
            let tri = edge / 3;
            let p0 = c.verts[c.indexes[edge] as usize].position_key();
            let p1 = c.verts[c.indexes[tri * 3 + (edge % 3 + 1) % 3] as usize].position_key();
            (p0 != p1).then_some((p0, p1))
        };

        for ci in level.clone() {
            let c = &self.clusters[ci];
            for edge in (0..c.indexes.len()).filter(|&e| c.boundary_edges[e]) {
                if let Some(key) = edge_key(c, edge) {
                    edge_hash
                        .entry(key)
                        .or_default()
                        .push(ClusterIndex(ci as u32));
                }
            }
        }

        let start = level.start;
        self.clusters[level]
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, c)| {
                let me = ClusterIndex((start + i) as u32);
                c.external_edges = vec![0; c.indexes.len()];
                c.adjacent_clusters.clear();

                for edge in 0..c.indexes.len() {
                    if !c.boundary_edges[edge] {
                        continue;
                    }
                    let Some((p0, p1)) = edge_key(c, edge) else {
                        continue;
                    };
                    let Some(matches) = edge_hash.get(&(p1, p0)) else {
                        continue;
                    };
                    for &other in matches.iter().filter(|&&o| o != me) {
                        c.external_edges[edge] = c.external_edges[edge].saturating_add(1);
                        *c.adjacent_clusters.entry(other).or_default() += 1;
                    }
                }
            });
    }

    /// Partition one level's clusters into groups along their shared edges.
    fn group_level(
        &self,
        level: Range<usize>,
        settings: &BuildSettings,
    ) -> Result<Vec<Vec<ClusterIndex>>, BuildError> {
        let n = level.len();
        let local = |c: ClusterIndex| c.index() - level.start;

        let mut graph = Graph::with_vertices(n);
        let mut islands = DisjointSet::new(n);
        for i in 0..n {
            let c = &self.clusters[level.start + i];
            for (&other, &count) in &c.adjacent_clusters {
                let j = local(other);
                islands.union(i as u32, j as u32);
                if i >= j {
                    continue;
                }
                let o = &self.clusters[other.index()];
                let siblings = c.generating_group_index.is_some()
                    && c.generating_group_index == o.generating_group_index;
                let weight = count * if siblings { SIBLING_WEIGHT } else { 1 } + ADJACENCY_BASE_WEIGHT;
                graph.add_edge(i as u32, j as u32, weight)?;
            }
        }

        let centers: Vec<Vec3> = self.clusters[level.clone()]
            .iter()
            .map(|c| c.sphere_bounds.center())
            .collect();
        add_locality_links(
            &mut graph,
            &centers,
            &islands.roots(),
            settings.partitioning.locality_neighbours(),
            LOCALITY_WEIGHT,
        )?;

        let partition = settings.partitioning.partition_strict(
            &graph,
            settings.min_group_size,
            settings.max_group_size,
        )?;

        Ok(partition
            .parts()
            .map(|part| {
                part.iter()
                    .map(|&i| ClusterIndex((level.start + i as usize) as u32))
                    .collect()
            })
            .collect())
    }

    /// Merge, simplify and re-split one group's clusters.
    fn reduce_group(
        &self,
        children: &[ClusterIndex],
        settings: &BuildSettings,
        format: VertexFormat,
    ) -> Result<Reduction, BuildError> {
        let mut sorted: Vec<&Cluster> = children.iter().map(|&c| self.cluster(c)).collect();
        sorted.sort_by_key(|c| c.guid);

        let mut merged = Cluster::merge(sorted.iter().copied());
        let child_error = merged.lod_error;
        let lod_bounds = merged.lod_bounds;

        let cluster_size = settings.cluster_size;
        let num_parents = merged.indexes.len().div_ceil(cluster_size * 6);

        let mut error = 0.0f32;
        let mut parents = Vec::new();
        let mut target_size = cluster_size - 2;
        while target_size > cluster_size / 2 {
            error = error.max(merged.simplify(
                num_parents * target_size,
                format,
                settings.lock_mesh_borders,
            ));

            if merged.num_tris() <= cluster_size {
                parents = vec![merged.clone()];
                break;
            }

            parents = merged.split(cluster_size, &settings.partitioning)?;
            if parents.len() <= num_parents {
                break;
            }
            log::trace!(
                "Group of {} clusters split into {} parents, wanted {num_parents}",
                children.len(),
                parents.len()
            );
            target_size -= 2;
        }
        if parents.is_empty() {
            parents = merged.split(cluster_size, &settings.partitioning)?;
        }

        Ok(Reduction {
            parents,
            error: error.max(child_error),
            lod_bounds,
        })
    }

    fn add_group(&mut self, mut children: Vec<ClusterIndex>, reduction: Reduction) {
        let group_index = GroupIndex(self.groups.len() as u32);
        children.sort_by_key(|&c| self.cluster(c).guid);

        for &c in &children {
            self.clusters[c.index()].group_index = Some(group_index);
        }
        let group = ClusterGroup::new(
            &self.clusters,
            children,
            reduction.error,
            reduction.lod_bounds,
        );

        for mut parent in reduction.parents {
            parent.lod_error = reduction.error;
            parent.lod_bounds = reduction.lod_bounds;
            parent.generating_group_index = Some(group_index);
            self.clusters.push(parent);
        }
        self.groups.push(group);
    }

    fn add_root(&mut self, level: Range<usize>) {
        let group_index = GroupIndex(self.groups.len() as u32);
        let children: Vec<ClusterIndex> = level.map(|i| ClusterIndex(i as u32)).collect();
        for &c in &children {
            self.clusters[c.index()].group_index = Some(group_index);
        }

        let lod_bounds = BoundingSphere::from_spheres(
            children.iter().map(|c| &self.clusters[c.index()].lod_bounds),
        );
        let mut root = ClusterGroup::new(&self.clusters, children, f32::INFINITY, lod_bounds);
        root.min_lod_error = -1.0;
        root.mip_level += 1;
        root.is_root = true;

        self.groups.push(root);
        self.root_group = Some(group_index);
    }

    /// Append a cluster to an existing group, for clusters split after the build.
    pub fn add_to_group(&mut self, group: GroupIndex, cluster: Cluster) -> ClusterIndex {
        let index = ClusterIndex(self.clusters.len() as u32);
        self.clusters.push(cluster);
        self.groups[group.index()].children.push(index);
        index
    }
}

#[cfg(test)]
pub mod test {
    use common::MeshVert;
    use glam::vec3;

    use super::*;
    use crate::mesh::partition::build_leaf_clusters;

    /// Gently curved `n` x `n` grid of quads.
    pub fn sheet(n: u32) -> (Vec<MeshVert>, Vec<u32>) {
        let verts = (0..=n)
            .flat_map(|y| {
                (0..=n).map(move |x| {
                    let (fx, fy) = (x as f32, y as f32);
                    MeshVert::new(vec3(fx, fy, (fx * 0.3).sin() * (fy * 0.2).cos()), Vec3::Z)
                })
            })
            .collect();
        let mut indexes = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let i = y * (n + 1) + x;
                indexes.extend([i, i + 1, i + n + 2, i, i + n + 2, i + n + 1]);
            }
        }
        (verts, indexes)
    }

    pub fn sheet_dag(n: u32, settings: &BuildSettings) -> ClusterDag {
        let (verts, indexes) = sheet(n);
        let materials = vec![0; indexes.len() / 3];
        let leaves = build_leaf_clusters(
            &verts,
            &indexes,
            &materials,
            settings.cluster_size,
            &settings.partitioning,
        )
        .unwrap();
        ClusterDag::build(leaves, settings, VertexFormat::default()).unwrap()
    }

    fn build(n: u32) -> ClusterDag {
        sheet_dag(n, &BuildSettings::default())
    }

    #[test]
    fn test_single_root() {
        let dag = build(48);
        let root = dag.root_group.unwrap();
        assert_eq!(dag.groups.iter().filter(|g| g.is_root).count(), 1);
        assert_eq!(dag.group(root).max_parent_lod_error, f32::INFINITY);
        assert_eq!(dag.group(root).min_lod_error, -1.0);
        assert!(dag.depth >= 1);

        // Every cluster is in exactly one group.
        let mut membership = vec![0; dag.clusters.len()];
        for g in &dag.groups {
            for c in &g.children {
                membership[c.index()] += 1;
            }
        }
        assert!(membership.iter().all(|&m| m == 1));
    }

    #[test]
    fn test_errors_are_monotonic() {
        let dag = build(48);
        for (ci, c) in dag.clusters.iter().enumerate() {
            let owner = dag.group(c.group_index.unwrap());
            if let Some(g) = c.generating_group_index {
                let generating = dag.group(g);
                assert_eq!(c.lod_error, generating.max_parent_lod_error);
                assert!(generating.max_parent_lod_error <= owner.max_parent_lod_error, "{ci}");
                assert!(c.mip_level > generating.mip_level);
            }
            assert!(owner.min_lod_error <= owner.max_parent_lod_error);
        }
    }

    #[test]
    fn test_group_bounds_contain_children() {
        let dag = build(40);
        for g in &dag.groups {
            for c in &g.children {
                let c = dag.cluster(*c);
                g.bounds.assert_contains_sphere(&c.sphere_bounds);
                g.lod_bounds.assert_contains_sphere(&c.lod_bounds);
            }
        }
    }
}
