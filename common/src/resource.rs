use bincode::{Decode, Encode};

use crate::{
    asset::Asset,
    packed::{FixupChunk, PackedHierarchyNode},
    VertexFormat,
};

/// Where a page lives inside the resource's bulk data, and which other pages it needs resident.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct PageStreamingState {
    pub bulk_offset: u32,
    pub bulk_size: u32,
    pub page_uncompressed_size: u32,
    pub dependencies_start: u32,
    pub dependencies_num: u32,
}

/// Summary figures gathered while building, logged by the baker and kept with the resource.
#[derive(Debug, Default, Clone, PartialEq, Encode, Decode)]
pub struct BuildStats {
    pub num_input_triangles: u32,
    pub num_input_vertices: u32,
    pub num_leaf_clusters: u32,
    pub num_leaf_triangles: u32,
    pub num_clusters: u32,
    pub num_groups: u32,
    pub num_pages: u32,
    pub num_hierarchy_nodes: u32,
    pub dag_depth: u32,
    pub root_page_size: u32,
    pub streamable_size: u32,
    /// Set when position quantization hit its iteration cap and fell back to a fixed shift.
    pub quantization_fallback: bool,
}

/// Final product of a build: the root page, the streamable pages and the hierarchy that indexes them.
#[derive(Debug, Default, Clone, PartialEq, Encode, Decode)]
pub struct StreamingResource {
    /// Bulk bytes of the root pages. Always resident.
    pub root_data: Vec<u8>,
    /// Bulk bytes of every other page, concatenated.
    pub streamable_pages: Vec<u8>,
    pub page_streaming_states: Vec<PageStreamingState>,
    pub hierarchy_nodes: Vec<PackedHierarchyNode>,
    pub page_dependencies: Vec<u32>,
    pub num_root_pages: u32,
    pub vertex_format: VertexFormat,
    pub stats: BuildStats,
}

impl Asset for StreamingResource {}

impl StreamingResource {
    pub fn num_pages(&self) -> usize {
        self.page_streaming_states.len()
    }

    pub fn is_root_page(&self, page: usize) -> bool {
        page < self.num_root_pages as usize
    }

    /// Bulk bytes of `page`: its fixup chunk followed by the page itself.
    pub fn page_bulk(&self, page: usize) -> Option<&[u8]> {
        let state = self.page_streaming_states.get(page)?;
        let data = if self.is_root_page(page) {
            &self.root_data
        } else {
            &self.streamable_pages
        };
        let start = state.bulk_offset as usize;
        data.get(start..start + state.bulk_size as usize)
    }

    /// The encoded page without its leading fixup chunk.
    pub fn page_data(&self, page: usize) -> Option<&[u8]> {
        let bulk = self.page_bulk(page)?;
        let size = self.page_streaming_states[page].page_uncompressed_size as usize;
        bulk.get(bulk.len().checked_sub(size)?..)
    }

    pub fn fixup_chunk(&self, page: usize) -> Option<FixupChunk> {
        FixupChunk::parse(self.page_bulk(page)?)
    }

    pub fn dependencies(&self, page: usize) -> &[u32] {
        self.page_streaming_states
            .get(page)
            .and_then(|s| {
                let start = s.dependencies_start as usize;
                self.page_dependencies
                    .get(start..start + s.dependencies_num as usize)
            })
            .unwrap_or(&[])
    }
}
