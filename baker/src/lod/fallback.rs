//! A single static mesh cut from the DAG, for renderers that cannot stream clusters.

use common::MeshVert;

use super::{ClusterDag, ClusterIndex};

/// Flat triangle mesh made from one consistent cut through the DAG.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackMesh {
    pub verts: Vec<MeshVert>,
    pub indexes: Vec<u32>,
    pub material_indexes: Vec<u32>,
    /// Error threshold the cut was taken at.
    pub lod_error: f32,
}

impl FallbackMesh {
    pub fn num_tris(&self) -> usize {
        self.indexes.len() / 3
    }
}

impl ClusterDag {
    /// Error of a cluster for cut selection, with leaves below any real error.
    fn cut_error(&self, index: ClusterIndex) -> f32 {
        if self.is_leaf(index) {
            -1.0
        } else {
            self.cluster(index).lod_error
        }
    }

    /// Clusters drawn when the tolerated error is `threshold`: those at or below it whose
    /// group was reduced to something above it.
    pub fn cut(&self, threshold: f32) -> Vec<ClusterIndex> {
        (0..self.clusters.len() as u32)
            .map(ClusterIndex)
            .filter(|&c| {
                let Some(group) = self.cluster(c).group_index else {
                    return false;
                };
                self.cut_error(c) <= threshold && self.group(group).max_parent_lod_error > threshold
            })
            .collect()
    }

    fn cut_triangles(&self, threshold: f32) -> usize {
        self.cut(threshold)
            .into_iter()
            .map(|c| self.cluster(c).num_tris())
            .sum()
    }

    /// The cut whose triangle count is closest to `target_tris`.
    pub fn fallback_mesh(&self, target_tris: usize) -> FallbackMesh {
        let mut thresholds: Vec<f32> = (0..self.clusters.len() as u32)
            .map(|c| self.cut_error(ClusterIndex(c)))
            .collect();
        thresholds.sort_unstable_by(f32::total_cmp);
        thresholds.dedup();

        // Triangle count only falls as the threshold rises.
        let first_fitting =
            thresholds.partition_point(|&t| self.cut_triangles(t) > target_tris);
        // The closest count is either side of the boundary. Ties go to the finer cut.
        let threshold = [first_fitting.checked_sub(1), Some(first_fitting)]
            .into_iter()
            .flatten()
            .filter_map(|i| thresholds.get(i).copied())
            .min_by_key(|&t| self.cut_triangles(t).abs_diff(target_tris))
            .unwrap_or(-1.0);

        let mut mesh = FallbackMesh {
            lod_error: threshold.max(0.0),
            ..Default::default()
        };
        for c in self.cut(threshold) {
            let cluster = self.cluster(c);
            let base = mesh.verts.len() as u32;
            mesh.verts.extend_from_slice(&cluster.verts);
            mesh.indexes.extend(cluster.indexes.iter().map(|i| i + base));
            mesh.material_indexes
                .extend_from_slice(&cluster.material_indexes);
        }

        log::debug!(
            "Fallback mesh of {} triangles at error {}",
            mesh.num_tris(),
            mesh.lod_error
        );
        mesh
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{lod::dag::test::sheet_dag, BuildSettings};

    #[test]
    fn test_full_detail_cut_is_the_leaves() {
        let dag = sheet_dag(32, &BuildSettings::default());
        let leaves: usize = dag.clusters[..dag.num_leaf_clusters]
            .iter()
            .map(|c| c.num_tris())
            .sum();
        let mesh = dag.fallback_mesh(leaves);
        assert_eq!(mesh.num_tris(), leaves);
        assert_eq!(mesh.lod_error, 0.0);
    }

    #[test]
    fn test_cuts_cover_each_group_once() {
        let dag = sheet_dag(40, &BuildSettings::default());
        let full = dag.fallback_mesh(usize::MAX).num_tris();
        let coarse = dag.fallback_mesh(1);
        assert!(coarse.num_tris() < full);
        assert!(coarse.lod_error > 0.0);
        assert_eq!(coarse.material_indexes.len(), coarse.num_tris());
        assert!(coarse.indexes.iter().all(|&i| (i as usize) < coarse.verts.len()));

        // A cut at infinite error is exactly the root group.
        let root = dag.group(dag.root_group.unwrap());
        let mut cut = dag.cut(f32::MAX);
        cut.sort();
        let mut children = root.children.clone();
        children.sort();
        assert_eq!(cut, children);
    }
}
