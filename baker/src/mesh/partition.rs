use common::MeshVert;
use glam::Vec3;
use partitioner::{add_locality_links, Graph, Partition, PartitioningConfig, PartitioningError};
use rayon::prelude::*;

use super::{
    cluster::{hash_combine, Cluster},
    edge_topology::EdgeTopology,
};

/// Pull of one shared edge between two triangles.
const TRIANGLE_EDGE_WEIGHT: u32 = 4 * 65;
const LOCALITY_WEIGHT: u32 = 1;

/// Triangles of a cluster are kept within `cluster_size - CLUSTER_SIZE_SLACK..=cluster_size`.
const CLUSTER_SIZE_SLACK: usize = 4;

/// Triangle adjacency through shared edges, plus locality links between disconnected islands.
pub fn triangle_graph(
    verts: &[MeshVert],
    indexes: &[u32],
    config: &PartitioningConfig,
) -> Result<Graph, PartitioningError> {
    let topology = EdgeTopology::new(verts, indexes);
    let num_tris = indexes.len() / 3;
    let mut graph = Graph::with_vertices(num_tris);

    let mut links = Vec::new();
    for edge in 0..indexes.len() as u32 {
        topology.for_all_opposite(edge, |other| {
            if edge / 3 < other / 3 {
                links.push((edge / 3, other / 3));
            }
        });
    }
    for (a, b) in links {
        graph.add_edge(a, b, TRIANGLE_EDGE_WEIGHT)?;
    }

    let islands = topology.islands().roots();
    let centers: Vec<Vec3> = indexes
        .chunks_exact(3)
        .map(|t| t.iter().map(|&i| verts[i as usize].position()).sum::<Vec3>() / 3.0)
        .collect();
    add_locality_links(
        &mut graph,
        &centers,
        &islands,
        config.locality_neighbours(),
        LOCALITY_WEIGHT,
    )?;

    Ok(graph)
}

pub fn partition_triangles(
    verts: &[MeshVert],
    indexes: &[u32],
    cluster_size: usize,
    config: &PartitioningConfig,
) -> Result<Partition, PartitioningError> {
    let graph = triangle_graph(verts, indexes, config)?;
    config.partition_strict(
        &graph,
        cluster_size.saturating_sub(CLUSTER_SIZE_SLACK),
        cluster_size,
    )
}

fn range_guid(range: &std::ops::Range<usize>) -> u64 {
    ((range.start as u64) << 32) | range.end as u64
}

/// Cut the input mesh into the leaf clusters.
pub fn build_leaf_clusters(
    verts: &[MeshVert],
    indexes: &[u32],
    material_indexes: &[u32],
    cluster_size: usize,
    config: &PartitioningConfig,
) -> Result<Vec<Cluster>, PartitioningError> {
    let partition = partition_triangles(verts, indexes, cluster_size, config)?;

    let clusters = partition
        .ranges
        .par_iter()
        .map(|range| {
            Cluster::from_triangles(
                verts,
                indexes,
                material_indexes,
                partition.indexes[range.clone()].iter().copied(),
                0,
                range_guid(range),
            )
        })
        .collect();

    Ok(clusters)
}

impl Cluster {
    /// Cut this cluster into pieces of at most `cluster_size` triangles.
    pub fn split(
        &self,
        cluster_size: usize,
        config: &PartitioningConfig,
    ) -> Result<Vec<Cluster>, PartitioningError> {
        let partition = partition_triangles(&self.verts, &self.indexes, cluster_size, config)?;
        Ok(self.split_by(&partition))
    }

    pub fn split_by(&self, partition: &Partition) -> Vec<Cluster> {
        partition
            .ranges
            .iter()
            .map(|range| {
                let mut child = Cluster::from_triangles(
                    &self.verts,
                    &self.indexes,
                    &self.material_indexes,
                    partition.indexes[range.clone()].iter().copied(),
                    self.mip_level,
                    hash_combine(self.guid, range_guid(range)),
                );
                child.lod_error = self.lod_error;
                child
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use glam::vec3;

    use super::*;

    fn strip(num_quads: u32, offset: Vec3) -> (Vec<MeshVert>, Vec<u32>) {
        let mut verts = Vec::new();
        let mut indexes = Vec::new();
        for x in 0..=num_quads {
            for y in 0..2 {
                verts.push(MeshVert::new(offset + vec3(x as f32, y as f32, 0.0), Vec3::Z));
            }
        }
        for x in 0..num_quads {
            let i = x * 2;
            indexes.extend([i, i + 2, i + 3, i, i + 3, i + 1]);
        }
        (verts, indexes)
    }

    #[test]
    fn test_leaf_clusters_conserve_triangles() {
        let (verts, indexes) = strip(200, Vec3::ZERO);
        let materials = vec![0; 400];
        let clusters =
            build_leaf_clusters(&verts, &indexes, &materials, 128, &PartitioningConfig::default())
                .unwrap();

        assert_eq!(clusters.iter().map(Cluster::num_tris).sum::<usize>(), 400);
        assert!(clusters.iter().all(|c| c.num_tris() <= 128));
        let mut guids: Vec<u64> = clusters.iter().map(|c| c.guid).collect();
        guids.dedup();
        assert_eq!(guids.len(), clusters.len());
    }

    #[test]
    fn test_islands_get_locality_links() {
        let (mut verts, mut indexes) = strip(2, Vec3::ZERO);
        let (v2, i2) = strip(2, vec3(0.0, 3.0, 0.0));
        let base = verts.len() as u32;
        verts.extend(v2);
        indexes.extend(i2.iter().map(|i| i + base));

        let graph = triangle_graph(&verts, &indexes, &PartitioningConfig::default()).unwrap();
        assert!(graph
            .vertices
            .iter()
            .flat_map(|v| &v.edges)
            .any(|e| e.locality));
        assert_eq!(graph.vertices[0].weigh_to(1), TRIANGLE_EDGE_WEIGHT);
    }
}
