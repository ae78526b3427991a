//! Fixed layout records shared between the page encoder and any consumer of the resource.
//! Every record is plain old data, so pages are built and read with `bytemuck`.

use bytemuck::{Pod, Zeroable};

use crate::{
    MAX_CLUSTERS_PER_PAGE_BITS, MAX_GROUP_PARTS_BITS, MAX_HIERARCHY_CHILDREN,
    MAX_HIERARCHY_CHILDREN_BITS,
};

/// GPU cluster record, 8 x 16 bytes. Stored structure-of-arrays within a page.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PackedCluster {
    // 0
    pub quantized_pos_start: [u32; 3],
    pub position_offset: u32,
    // 1
    pub mesh_bounds_min: [f32; 3],
    pub index_offset: u32,
    // 2
    pub mesh_bounds_delta: [f32; 3],
    pub num_verts_num_tris_bits_per_index_pos_shift: u32,
    // 3
    pub lod_bounds: [f32; 4],
    // 4
    pub box_bounds_center: [f32; 3],
    pub lod_error_and_edge_length: u32,
    // 5
    pub box_bounds_extent: [f32; 3],
    pub flags: u32,
    // 6
    pub attribute_offset_bits_per_attribute: u32,
    pub decode_info_offset_num_uvs_color_mode: u32,
    pub uv_prec: u32,
    pub packed_material_info: u32,
    // 7
    pub color_min: u32,
    pub color_bits_group_index: u32,
    pub pad: [u32; 2],
}

impl PackedCluster {
    pub const SIZE: usize = std::mem::size_of::<Self>();
    pub const FLOAT4S: usize = Self::SIZE / 16;

    pub fn set_num_verts_tris(
        &mut self,
        num_verts: u32,
        num_tris: u32,
        bits_per_index: u32,
        pos_shift: u32,
    ) {
        debug_assert!(num_verts < 512 && num_tris < 256 && bits_per_index < 16 && pos_shift < 32);
        self.num_verts_num_tris_bits_per_index_pos_shift =
            num_verts | (num_tris << 9) | (bits_per_index << (9 + 8)) | (pos_shift << (9 + 8 + 4));
    }

    pub fn num_verts(&self) -> u32 {
        self.num_verts_num_tris_bits_per_index_pos_shift & 0x1ff
    }
    pub fn num_tris(&self) -> u32 {
        (self.num_verts_num_tris_bits_per_index_pos_shift >> 9) & 0xff
    }
    pub fn bits_per_index(&self) -> u32 {
        (self.num_verts_num_tris_bits_per_index_pos_shift >> 17) & 0xf
    }
    pub fn pos_shift(&self) -> u32 {
        self.num_verts_num_tris_bits_per_index_pos_shift >> 21
    }

    pub fn set_attribute_offset(&mut self, offset: u32, bits_per_attribute: u32) {
        debug_assert!(offset < (1 << 22) && bits_per_attribute < (1 << 10));
        self.attribute_offset_bits_per_attribute = offset | (bits_per_attribute << 22);
    }
    pub fn attribute_offset(&self) -> u32 {
        self.attribute_offset_bits_per_attribute & 0x3f_ffff
    }
    pub fn bits_per_attribute(&self) -> u32 {
        self.attribute_offset_bits_per_attribute >> 22
    }

    pub fn set_decode_info(&mut self, offset: u32, num_uvs: u32, color_mode: u32) {
        debug_assert!(offset < (1 << 22) && num_uvs < 8 && color_mode < 4);
        self.decode_info_offset_num_uvs_color_mode = offset | (num_uvs << 22) | (color_mode << 25);
    }
    pub fn decode_info_offset(&self) -> u32 {
        self.decode_info_offset_num_uvs_color_mode & 0x3f_ffff
    }
    pub fn num_uvs(&self) -> u32 {
        (self.decode_info_offset_num_uvs_color_mode >> 22) & 0x7
    }
    pub fn color_mode(&self) -> u32 {
        (self.decode_info_offset_num_uvs_color_mode >> 25) & 0x3
    }
}

/// Texture coordinate decode record, one per cluster per UV channel.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UvRange {
    pub min: [f32; 2],
    pub scale: [f32; 2],
    pub gap_start: [i32; 2],
    pub gap_length: [i32; 2],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable, bincode::Encode, bincode::Decode)]
pub struct PackedHierarchyNodeMisc {
    pub min_lod_error_max_parent_lod_error: u32,
    pub child_start_reference: u32,
    pub resource_page_index_num_pages_group_part_size: u32,
}

/// A 64 way node of the culling hierarchy.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, bincode::Encode, bincode::Decode)]
pub struct PackedHierarchyNode {
    pub lod_bounds: [[f32; 4]; MAX_HIERARCHY_CHILDREN],
    pub bounds: [[f32; 4]; MAX_HIERARCHY_CHILDREN],
    pub misc: [PackedHierarchyNodeMisc; MAX_HIERARCHY_CHILDREN],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PageDiskHeader {
    pub num_clusters: u32,
    pub gpu_size: u32,
    pub num_raw_float4s: u32,
    pub num_tex_coords: u32,
    pub decode_info_offset: u32,
    pub vertex_ref_bitmask_offset: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ClusterDiskHeader {
    pub index_data_offset: u32,
    pub vertex_ref_data_offset: u32,
    pub position_data_offset: u32,
    pub attribute_data_offset: u32,
    pub num_vertex_refs: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FixupChunkHeader {
    pub num_clusters: u16,
    pub num_hierarchy_fixups: u16,
    pub num_cluster_fixups: u16,
    pub pad: u16,
}

/// Enables a hierarchy slot once every page of its group is resident.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct HierarchyFixup {
    pub page_index: u32,
    pub hierarchy_node_and_child_index: u32,
    pub cluster_group_part_start_index: u32,
    pub page_dependency_start_and_num: u32,
}

impl HierarchyFixup {
    pub fn new(
        page_index: u32,
        node_index: u32,
        child_index: u32,
        cluster_group_part_start_index: u32,
        dependency_start: u32,
        dependency_num: u32,
    ) -> Self {
        debug_assert!((child_index as usize) < MAX_HIERARCHY_CHILDREN);
        Self {
            page_index,
            hierarchy_node_and_child_index: (node_index << MAX_HIERARCHY_CHILDREN_BITS)
                | child_index,
            cluster_group_part_start_index,
            page_dependency_start_and_num: (dependency_start << MAX_GROUP_PARTS_BITS)
                | dependency_num,
        }
    }

    pub fn node_index(&self) -> u32 {
        self.hierarchy_node_and_child_index >> MAX_HIERARCHY_CHILDREN_BITS
    }
    pub fn child_index(&self) -> u32 {
        self.hierarchy_node_and_child_index & (MAX_HIERARCHY_CHILDREN as u32 - 1)
    }
}

/// Clears the leaf flag of a cluster once the pages holding its finer children are resident.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ClusterFixup {
    pub page_and_cluster_index: u32,
    pub page_dependency_start_and_num: u32,
}

impl ClusterFixup {
    pub fn new(page_index: u32, cluster_index: u32, dependency_start: u32, dependency_num: u32) -> Self {
        debug_assert!(cluster_index < (1 << MAX_CLUSTERS_PER_PAGE_BITS));
        Self {
            page_and_cluster_index: (page_index << MAX_CLUSTERS_PER_PAGE_BITS) | cluster_index,
            page_dependency_start_and_num: (dependency_start << MAX_GROUP_PARTS_BITS)
                | dependency_num,
        }
    }

    pub fn page_index(&self) -> u32 {
        self.page_and_cluster_index >> MAX_CLUSTERS_PER_PAGE_BITS
    }
    pub fn cluster_index(&self) -> u32 {
        self.page_and_cluster_index & ((1 << MAX_CLUSTERS_PER_PAGE_BITS) - 1)
    }
}

/// Everything a page needs patched when it is streamed in. Only ever read on the CPU.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FixupChunk {
    pub num_clusters: u32,
    pub hierarchy_fixups: Vec<HierarchyFixup>,
    pub cluster_fixups: Vec<ClusterFixup>,
}

impl FixupChunk {
    pub fn header(&self) -> FixupChunkHeader {
        FixupChunkHeader {
            num_clusters: self.num_clusters as u16,
            num_hierarchy_fixups: self.hierarchy_fixups.len() as u16,
            num_cluster_fixups: self.cluster_fixups.len() as u16,
            pad: 0,
        }
    }

    pub fn byte_size(&self) -> usize {
        std::mem::size_of::<FixupChunkHeader>()
            + self.hierarchy_fixups.len() * std::mem::size_of::<HierarchyFixup>()
            + self.cluster_fixups.len() * std::mem::size_of::<ClusterFixup>()
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(bytemuck::bytes_of(&self.header()));
        out.extend_from_slice(bytemuck::cast_slice(&self.hierarchy_fixups));
        out.extend_from_slice(bytemuck::cast_slice(&self.cluster_fixups));
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header_size = std::mem::size_of::<FixupChunkHeader>();
        let header: FixupChunkHeader =
            bytemuck::pod_read_unaligned(bytes.get(..header_size)?);

        let hierarchy_size = std::mem::size_of::<HierarchyFixup>();
        let hierarchy_fixups = (0..header.num_hierarchy_fixups as usize)
            .map(|i| {
                let at = header_size + i * hierarchy_size;
                bytes.get(at..at + hierarchy_size).map(bytemuck::pod_read_unaligned)
            })
            .collect::<Option<Vec<HierarchyFixup>>>()?;

        let cluster_start = header_size + hierarchy_fixups.len() * hierarchy_size;
        let cluster_size = std::mem::size_of::<ClusterFixup>();
        let cluster_fixups = (0..header.num_cluster_fixups as usize)
            .map(|i| {
                let at = cluster_start + i * cluster_size;
                bytes.get(at..at + cluster_size).map(bytemuck::pod_read_unaligned)
            })
            .collect::<Option<Vec<ClusterFixup>>>()?;

        Some(Self {
            num_clusters: header.num_clusters as u32,
            hierarchy_fixups,
            cluster_fixups,
        })
    }
}
