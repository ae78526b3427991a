//! Read side of the page disk layout. All offsets stored in a page are relative to its first byte.

use bytemuck::Pod;
use thiserror::Error;

use crate::{
    packed::{ClusterDiskHeader, PackedCluster, PageDiskHeader, UvRange},
    MAX_CLUSTER_VERTICES,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("page truncated reading {len} bytes at offset {offset}")]
    Truncated { offset: usize, len: usize },
    #[error("cluster {cluster} out of range for a page with {num_clusters} clusters")]
    ClusterOutOfRange { cluster: usize, num_clusters: usize },
}

fn read<T: Pod>(bytes: &[u8], offset: usize) -> Result<T, PageError> {
    let len = std::mem::size_of::<T>();
    bytes
        .get(offset..offset + len)
        .map(bytemuck::pod_read_unaligned)
        .ok_or(PageError::Truncated { offset, len })
}

fn read_slice<T: Pod>(bytes: &[u8], offset: usize, count: usize) -> Result<Vec<T>, PageError> {
    let size = std::mem::size_of::<T>();
    (0..count).map(|i| read(bytes, offset + i * size)).collect()
}

/// Borrowed view over one encoded page.
#[derive(Debug)]
pub struct PageView<'a> {
    bytes: &'a [u8],
    pub header: PageDiskHeader,
    pub clusters: Vec<ClusterDiskHeader>,
}

impl<'a> PageView<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, PageError> {
        let header: PageDiskHeader = read(bytes, 0)?;
        let clusters = read_slice(
            bytes,
            std::mem::size_of::<PageDiskHeader>(),
            header.num_clusters as usize,
        )?;
        Ok(Self {
            bytes,
            header,
            clusters,
        })
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Start of the raw float4 block that mirrors the GPU page.
    pub fn soa_offset(&self) -> usize {
        std::mem::size_of::<PageDiskHeader>()
            + self.clusters.len() * std::mem::size_of::<ClusterDiskHeader>()
    }

    fn check_cluster(&self, cluster: usize) -> Result<(), PageError> {
        if cluster < self.clusters.len() {
            Ok(())
        } else {
            Err(PageError::ClusterOutOfRange {
                cluster,
                num_clusters: self.clusters.len(),
            })
        }
    }

    /// Gather the eight float4 rows of a cluster back into one record.
    pub fn packed_cluster(&self, cluster: usize) -> Result<PackedCluster, PageError> {
        self.check_cluster(cluster)?;
        let n = self.clusters.len();
        let mut rows = [[0u32; 4]; PackedCluster::FLOAT4S];
        for (r, row) in rows.iter_mut().enumerate() {
            *row = read(self.bytes, self.soa_offset() + (r * n + cluster) * 16)?;
        }
        Ok(bytemuck::cast(rows))
    }

    /// Dwords of the material range table, which follows the cluster rows.
    pub fn material_table(&self) -> Result<Vec<u32>, PageError> {
        let start = self.soa_offset() + self.clusters.len() * PackedCluster::SIZE;
        let end = self.header.decode_info_offset as usize;
        read_slice(self.bytes, start, end.saturating_sub(start) / 4)
    }

    pub fn uv_range(&self, cluster: usize, uv: usize) -> Result<UvRange, PageError> {
        self.check_cluster(cluster)?;
        let index = cluster * self.header.num_tex_coords as usize + uv;
        read(
            self.bytes,
            self.header.decode_info_offset as usize + index * std::mem::size_of::<UvRange>(),
        )
    }

    /// Raw triangle indices, three bytes per triangle.
    pub fn indices(&self, cluster: usize) -> Result<&'a [u8], PageError> {
        let packed = self.packed_cluster(cluster)?;
        let offset = self.clusters[cluster].index_data_offset as usize;
        let len = packed.num_tris() as usize * 3;
        self.bytes
            .get(offset..offset + len)
            .ok_or(PageError::Truncated { offset, len })
    }

    /// Whether `vertex` of `cluster` was coded as a reference into an earlier cluster.
    pub fn is_vertex_ref(&self, cluster: usize, vertex: usize) -> Result<bool, PageError> {
        self.check_cluster(cluster)?;
        let bit = cluster * MAX_CLUSTER_VERTICES + vertex;
        let word: u32 = read(
            self.bytes,
            self.header.vertex_ref_bitmask_offset as usize + (bit / 32) * 4,
        )?;
        Ok(word & (1 << (bit % 32)) != 0)
    }

    pub fn vertex_refs(&self, cluster: usize) -> Result<Vec<u32>, PageError> {
        self.check_cluster(cluster)?;
        let h = &self.clusters[cluster];
        read_slice(
            self.bytes,
            h.vertex_ref_data_offset as usize,
            h.num_vertex_refs as usize,
        )
    }

    /// Packed `z << 20 | y << 10 | x` positions of the vertices coded in this cluster.
    pub fn positions(&self, cluster: usize) -> Result<Vec<u32>, PageError> {
        let packed = self.packed_cluster(cluster)?;
        let h = &self.clusters[cluster];
        let coded = packed.num_verts() as usize - h.num_vertex_refs as usize;
        read_slice(self.bytes, h.position_data_offset as usize, coded)
    }

    /// Attribute bits of the coded vertices, each vertex padded to whole dwords.
    pub fn attributes(&self, cluster: usize) -> Result<&'a [u8], PageError> {
        let packed = self.packed_cluster(cluster)?;
        let h = &self.clusters[cluster];
        let coded = packed.num_verts() as usize - h.num_vertex_refs as usize;
        let offset = h.attribute_data_offset as usize;
        let len = coded * packed.bits_per_attribute().div_ceil(32) as usize * 4;
        self.bytes
            .get(offset..offset + len)
            .ok_or(PageError::Truncated { offset, len })
    }
}
