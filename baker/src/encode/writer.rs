//! Final byte layout of every page, the fixups applied when pages stream in, and the bulk
//! buffers of the resource.

use std::collections::HashMap;

use common::{
    packed::{
        ClusterDiskHeader, ClusterFixup, FixupChunk, HierarchyFixup, PackedCluster,
        PackedHierarchyNode, PageDiskHeader, UvRange,
    },
    resource::{BuildStats, PageStreamingState, StreamingResource},
    VertexFormat, CLUSTER_FLAG_LEAF, MAX_CLUSTER_VERTICES, MESH_VERT_WORDS,
    NORMAL_QUANTIZATION_BITS, NUM_ROOT_PAGES, VERTEX_COLOR_MODE_VARIABLE,
};
use half::f16;
use rayon::prelude::*;

use super::{
    bit_writer::BitWriter,
    encoding_info::{pack_normal, EncodingInfo},
    material::{log_material_stats, pack_material_info},
    pages::{is_root_page, remove_root_pages, Page, PageLayout},
};
use crate::{lod::ClusterDag, mesh::cluster::Cluster};

fn pack_cluster(cluster: &Cluster, info: &EncodingInfo, format: VertexFormat) -> PackedCluster {
    let q = &cluster.quantized;
    let mut packed: PackedCluster = bytemuck::Zeroable::zeroed();

    packed.quantized_pos_start = q.start.to_array();
    packed.mesh_bounds_min = q.mesh_bounds_min.to_array();
    packed.mesh_bounds_delta = q.mesh_bounds_delta.to_array();
    packed.set_num_verts_tris(
        cluster.num_verts() as u32,
        cluster.num_tris() as u32,
        info.bits_per_index,
        q.shift,
    );
    packed.lod_bounds = cluster.lod_bounds.packed().to_array();
    packed.box_bounds_center = cluster.bounds.center().to_array();
    packed.box_bounds_extent = cluster.bounds.extent().to_array();
    packed.lod_error_and_edge_length = f16::from_f32(cluster.lod_error).to_bits() as u32
        | ((f16::from_f32(cluster.edge_length).to_bits() as u32) << 16);
    packed.flags = CLUSTER_FLAG_LEAF;
    packed.uv_prec = info.uv_prec;

    let [r, g, b, a] = info.color_min.map(u32::from);
    packed.color_min = r | (g << 8) | (b << 16) | (a << 24);
    let [r, g, b, a] = info.color_bits;
    let group = cluster.group_index.map_or(0, |g| g.0 & 0xffff);
    packed.color_bits_group_index = r | (g << 4) | (b << 8) | (a << 12) | (group << 16);

    packed.set_decode_info(0, format.num_uvs, info.color_mode);
    packed
}

/// Geometry streams of one page, appended cluster by cluster.
#[derive(Default)]
struct PageGeometry {
    index_data: Vec<u8>,
    vertex_ref_bitmask: Vec<u32>,
    vertex_refs: Vec<u32>,
    positions: Vec<u8>,
    attributes: Vec<u8>,
    coded_per_cluster: Vec<u32>,
    refs_per_cluster: Vec<u32>,
    /// Vertex data to `cluster << 8 | coded index` of its first occurrence in the page.
    unique: HashMap<[u32; MESH_VERT_WORDS], u32>,
}

impl PageGeometry {
    /// Vertices already coded by an earlier cluster of the page become references to it.
    fn encode_cluster(&mut self, local_cluster: u32, cluster: &Cluster, info: &EncodingInfo) {
        let words_before = self.vertex_ref_bitmask.len();
        self.vertex_ref_bitmask
            .resize(words_before + MAX_CLUSTER_VERTICES / 32, 0);

        let mut coded = Vec::new();
        let mut num_refs = 0;
        for (v, vert) in cluster.verts.iter().enumerate() {
            match self.unique.get(&vert.key()) {
                Some(&first) => {
                    let delta = local_cluster - (first >> 8);
                    self.vertex_refs.push((delta << 8) | (first & 0xff));
                    let bit = local_cluster as usize * MAX_CLUSTER_VERTICES + v;
                    self.vertex_ref_bitmask[bit / 32] |= 1 << (bit % 32);
                    num_refs += 1;
                }
                None => {
                    self.unique
                        .insert(vert.key(), (local_cluster << 8) | coded.len() as u32);
                    coded.push(v);
                }
            }
        }

        self.index_data
            .extend(cluster.indexes.iter().map(|&i| i as u8));

        for &v in &coded {
            self.positions
                .extend_from_slice(&cluster.quantized.packed(v).to_le_bytes());
        }

        let mut writer = BitWriter::new(&mut self.attributes);
        for &v in &coded {
            let vert = &cluster.verts[v];
            writer.put_bits(
                pack_normal(vert.normal(), NORMAL_QUANTIZATION_BITS),
                2 * NORMAL_QUANTIZATION_BITS,
            );
            if info.color_mode == VERTEX_COLOR_MODE_VARIABLE {
                let color = vert.color_bytes();
                for c in 0..4 {
                    writer.put_bits((color[c] - info.color_min[c]) as u32, info.color_bits[c]);
                }
            }
            for (channel, uv_info) in info.uv_infos.iter().enumerate() {
                writer.put_bits(uv_info.encode(vert.uv(channel)), uv_info.num_bits());
            }
            writer.flush(4);
        }

        self.coded_per_cluster.push(coded.len() as u32);
        self.refs_per_cluster.push(num_refs);
    }
}

fn align(bytes: &mut Vec<u8>, alignment: usize) {
    bytes.resize(bytes.len().next_multiple_of(alignment), 0);
}

fn put<T: bytemuck::Pod>(bytes: &mut Vec<u8>, offset: usize, value: &T) {
    let src = bytemuck::bytes_of(value);
    bytes[offset..offset + src.len()].copy_from_slice(src);
}

fn encode_page(
    page_index: u32,
    page: &Page,
    layout: &PageLayout,
    dag: &ClusterDag,
    infos: &[EncodingInfo],
    format: VertexFormat,
) -> Vec<u8> {
    let num_clusters = page.num_clusters as usize;
    let clusters_dwords = page.num_clusters * (PackedCluster::SIZE as u32 / 4);

    let mut packed_clusters = Vec::with_capacity(num_clusters);
    let mut material_table = Vec::new();
    let mut decode_infos: Vec<UvRange> = Vec::new();
    let mut geometry = PageGeometry::default();
    let mut gpu_offsets = page.gpu_sizes.offsets();

    for part in page.parts().map(|p| &layout.parts[p]) {
        for (position, &c) in part.clusters.iter().enumerate() {
            let cluster = dag.cluster(c);
            let info = &infos[c.index()];
            let local = part.page_cluster_offset + position as u32;
            debug_assert_eq!(local as usize, packed_clusters.len());

            let mut packed = pack_cluster(cluster, info, format);
            packed.packed_material_info =
                pack_material_info(cluster, &mut material_table, clusters_dwords);
            packed.index_offset = gpu_offsets.index;
            packed.position_offset = gpu_offsets.position;
            packed.set_attribute_offset(gpu_offsets.attribute, info.bits_per_attribute);
            packed.set_decode_info(gpu_offsets.decode_info, format.num_uvs, info.color_mode);

            // Finer clusters already in this page need no fixup.
            if let Some(generating) = cluster.generating_group_index {
                let g = dag.group(generating);
                if g.page_index_start == page_index && g.page_index_num == 1 {
                    packed.flags &= !CLUSTER_FLAG_LEAF;
                }
            }

            gpu_offsets += info.gpu_sizes;
            decode_infos.extend(info.uv_infos.iter().map(|u| u.range));
            geometry.encode_cluster(local, cluster, info);
            packed_clusters.push(packed);
        }
    }
    debug_assert_eq!(gpu_offsets.attribute, page.gpu_sizes.total());

    material_table.resize(material_table.len().next_multiple_of(4), 0);

    let mut bytes = Vec::new();
    let mut header = PageDiskHeader {
        num_clusters: page.num_clusters,
        gpu_size: page.gpu_sizes.total(),
        num_raw_float4s: page.num_clusters
            * (PackedCluster::SIZE as u32 + format.num_uvs * std::mem::size_of::<UvRange>() as u32)
            / 16
            + material_table.len() as u32 / 4,
        num_tex_coords: format.num_uvs,
        ..Default::default()
    };
    bytes.extend_from_slice(bytemuck::bytes_of(&header));

    let cluster_headers_offset = bytes.len();
    let mut cluster_headers = vec![ClusterDiskHeader::default(); num_clusters];
    bytes.extend_from_slice(bytemuck::cast_slice(&cluster_headers));

    for row in 0..PackedCluster::FLOAT4S {
        for packed in &packed_clusters {
            let words: &[u8] = bytemuck::bytes_of(packed);
            bytes.extend_from_slice(&words[row * 16..row * 16 + 16]);
        }
    }
    bytes.extend_from_slice(bytemuck::cast_slice(&material_table));

    header.decode_info_offset = bytes.len() as u32;
    bytes.extend_from_slice(bytemuck::cast_slice(&decode_infos));

    let mut offset = bytes.len() as u32;
    for (h, packed) in cluster_headers.iter_mut().zip(&packed_clusters) {
        h.index_data_offset = offset;
        offset += packed.num_tris() * 3;
    }
    bytes.extend_from_slice(&geometry.index_data);
    align(&mut bytes, 4);

    header.vertex_ref_bitmask_offset = bytes.len() as u32;
    bytes.extend_from_slice(bytemuck::cast_slice(&geometry.vertex_ref_bitmask));

    let mut offset = bytes.len() as u32;
    for (i, h) in cluster_headers.iter_mut().enumerate() {
        h.vertex_ref_data_offset = offset;
        h.num_vertex_refs = geometry.refs_per_cluster[i];
        offset += geometry.refs_per_cluster[i] * 4;
    }
    bytes.extend_from_slice(bytemuck::cast_slice(&geometry.vertex_refs));

    let mut offset = bytes.len() as u32;
    for (i, h) in cluster_headers.iter_mut().enumerate() {
        h.position_data_offset = offset;
        offset += geometry.coded_per_cluster[i] * 4;
    }
    bytes.extend_from_slice(&geometry.positions);

    let mut offset = bytes.len() as u32;
    for (i, (h, packed)) in cluster_headers.iter_mut().zip(&packed_clusters).enumerate() {
        h.attribute_data_offset = offset;
        offset += geometry.coded_per_cluster[i] * packed.bits_per_attribute().div_ceil(32) * 4;
    }
    bytes.extend_from_slice(&geometry.attributes);
    debug_assert_eq!(offset as usize, bytes.len());

    put(&mut bytes, 0, &header);
    let headers: &[u8] = bytemuck::cast_slice(&cluster_headers);
    bytes[cluster_headers_offset..cluster_headers_offset + headers.len()].copy_from_slice(headers);
    bytes
}

/// Hierarchy fixups of every page, then the cluster fixups each generating group's pages apply
/// to the clusters it generated.
fn build_fixup_chunks(dag: &ClusterDag, layout: &PageLayout) -> Vec<FixupChunk> {
    let mut chunks: Vec<FixupChunk> = layout
        .pages
        .iter()
        .map(|page| {
            let mut chunk = FixupChunk {
                num_clusters: page.num_clusters,
                ..Default::default()
            };
            for part in page.parts().map(|p| &layout.parts[p]) {
                let group = dag.group(part.group_index);
                let (dep_start, dep_num) =
                    remove_root_pages(group.page_index_start, group.page_index_num);
                chunk.hierarchy_fixups.extend(group.parts.iter().map(|&p| {
                    let other = &layout.parts[p as usize];
                    HierarchyFixup::new(
                        other.page_index,
                        other.hierarchy_node_index,
                        other.hierarchy_child_index,
                        other.page_cluster_offset,
                        dep_start,
                        dep_num,
                    )
                }));
            }
            chunk
        })
        .collect();

    for part in &layout.parts {
        for (position, &c) in part.clusters.iter().enumerate() {
            let Some(generating) = dag.cluster(c).generating_group_index else {
                continue;
            };
            let g = dag.group(generating);
            if g.page_index_start == part.page_index && g.page_index_num == 1 {
                continue;
            }
            let (dep_start, dep_num) = remove_root_pages(g.page_index_start, g.page_index_num);
            let fixup = ClusterFixup::new(
                part.page_index,
                part.page_cluster_offset + position as u32,
                dep_start,
                dep_num,
            );
            for page in g.page_index_start..g.page_index_start + g.page_index_num {
                chunks[page as usize].cluster_fixups.push(fixup);
            }
        }
    }
    chunks
}

/// Pages a page's cluster fixups write into, without root pages or itself.
fn page_dependencies(page: u32, chunk: &FixupChunk) -> Vec<u32> {
    let mut dependencies = Vec::new();
    for fixup in &chunk.cluster_fixups {
        let target = fixup.page_index();
        if is_root_page(target) || target == page || dependencies.contains(&target) {
            continue;
        }
        dependencies.push(target);
    }
    dependencies
}

/// Encode every page and lay them out as root and streamable bulk data.
pub fn write_pages(
    dag: &ClusterDag,
    layout: &PageLayout,
    infos: &[EncodingInfo],
    hierarchy_nodes: Vec<PackedHierarchyNode>,
    format: VertexFormat,
) -> StreamingResource {
    log_material_stats(&dag.clusters);

    let chunks = build_fixup_chunks(dag, layout);
    let pages: Vec<Vec<u8>> = layout
        .pages
        .par_iter()
        .enumerate()
        .map(|(i, page)| encode_page(i as u32, page, layout, dag, infos, format))
        .collect();

    let mut resource = StreamingResource {
        hierarchy_nodes,
        num_root_pages: NUM_ROOT_PAGES.min(layout.num_pages()),
        vertex_format: format,
        ..Default::default()
    };

    let mut fixup_size = 0;
    for (i, (chunk, data)) in chunks.iter().zip(&pages).enumerate() {
        let dependencies = page_dependencies(i as u32, chunk);
        let bulk = if is_root_page(i as u32) {
            &mut resource.root_data
        } else {
            &mut resource.streamable_pages
        };

        let bulk_offset = bulk.len();
        chunk.write_to(bulk);
        bulk.extend_from_slice(data);
        fixup_size += chunk.byte_size();

        resource.page_streaming_states.push(PageStreamingState {
            bulk_offset: bulk_offset as u32,
            bulk_size: (bulk.len() - bulk_offset) as u32,
            page_uncompressed_size: data.len() as u32,
            dependencies_start: resource.page_dependencies.len() as u32,
            dependencies_num: dependencies.len() as u32,
        });
        resource.page_dependencies.extend(dependencies);
    }

    let num_pages = pages.len().max(1);
    let gpu_size: u32 = layout.pages.iter().map(|p| p.gpu_sizes.total()).sum();
    let disk_size = resource.root_data.len() + resource.streamable_pages.len();
    log::info!("{} pages written", pages.len());
    log::info!(
        "GPU size: {gpu_size} bytes, {:.1} bytes per page",
        gpu_size as f32 / num_pages as f32
    );
    log::info!(
        "Disk size: {disk_size} bytes, {:.1} bytes per page, {fixup_size} bytes of fixups",
        disk_size as f32 / num_pages as f32
    );

    resource.stats = BuildStats {
        num_pages: pages.len() as u32,
        num_hierarchy_nodes: resource.hierarchy_nodes.len() as u32,
        root_page_size: resource.root_data.len() as u32,
        streamable_size: resource.streamable_pages.len() as u32,
        ..Default::default()
    };
    resource
}

#[cfg(test)]
mod test {
    use common::page::PageView;

    use super::*;
    use crate::{
        encode::{constrain::constrain_clusters, hierarchy::build_hierarchy, pages::assign_clusters_to_pages},
        lod::dag::test::sheet_dag,
        BuildSettings,
    };

    fn encode(settings: &BuildSettings) -> (ClusterDag, PageLayout, StreamingResource) {
        let mut dag = sheet_dag(40, settings);
        constrain_clusters(&mut dag);
        let format = VertexFormat::default();
        let infos: Vec<EncodingInfo> = dag.clusters.iter().map(|c| EncodingInfo::new(c, format)).collect();
        let mut layout = assign_clusters_to_pages(&mut dag, &infos, settings).unwrap();
        let nodes = build_hierarchy(&dag, &mut layout.parts);
        let resource = write_pages(&dag, &layout, &infos, nodes, format);
        (dag, layout, resource)
    }

    fn small_pages() -> BuildSettings {
        BuildSettings {
            page_gpu_size: 8 * 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_pages_parse() {
        let (dag, layout, resource) = encode(&small_pages());
        assert_eq!(resource.num_pages(), layout.pages.len());
        assert!(resource.num_pages() > 2);
        assert!(!resource.root_data.is_empty());

        for (i, page) in layout.pages.iter().enumerate() {
            let view = PageView::parse(resource.page_data(i).unwrap()).unwrap();
            assert_eq!(view.num_clusters(), page.num_clusters as usize);
            assert_eq!(view.header.gpu_size, page.gpu_sizes.total());

            let chunk = resource.fixup_chunk(i).unwrap();
            assert_eq!(chunk.num_clusters, page.num_clusters);

            for part in page.parts().map(|p| &layout.parts[p]) {
                for (pos, &c) in part.clusters.iter().enumerate() {
                    let local = part.page_cluster_offset as usize + pos;
                    let cluster = dag.cluster(c);
                    let packed = view.packed_cluster(local).unwrap();
                    assert_eq!(packed.num_tris() as usize, cluster.num_tris());
                    assert_eq!(packed.num_verts() as usize, cluster.num_verts());

                    let indices = view.indices(local).unwrap();
                    assert!(indices.iter().zip(&cluster.indexes).all(|(&a, &b)| a as u32 == b));

                    let refs = view.vertex_refs(local).unwrap();
                    let num_refs = (0..cluster.num_verts())
                        .filter(|&v| view.is_vertex_ref(local, v).unwrap())
                        .count();
                    assert_eq!(refs.len(), num_refs);
                    for r in refs {
                        assert!((r >> 8) as usize <= local);
                    }
                    assert_eq!(view.positions(local).unwrap().len(), cluster.num_verts() - num_refs);
                }
            }
        }
    }

    #[test]
    fn test_dependencies_point_to_earlier_pages() {
        let (_, _, resource) = encode(&small_pages());
        for page in 0..resource.num_pages() {
            for &dep in resource.dependencies(page) {
                assert!((dep as usize) < page);
                assert!(!resource.is_root_page(dep as usize));
            }
        }
        assert!(resource.dependencies(0).is_empty());
    }

    #[test]
    fn test_cluster_fixups_cover_out_of_page_children() {
        let (dag, layout, resource) = encode(&small_pages());
        let chunks: Vec<FixupChunk> = (0..resource.num_pages()).map(|p| resource.fixup_chunk(p).unwrap()).collect();
        for part in &layout.parts {
            for (pos, &c) in part.clusters.iter().enumerate() {
                let Some(gen) = dag.cluster(c).generating_group_index else {
                    continue;
                };
                let g = dag.group(gen);
                let local = part.page_cluster_offset + pos as u32;
                let packed = PageView::parse(resource.page_data(part.page_index as usize).unwrap())
                    .unwrap()
                    .packed_cluster(local as usize)
                    .unwrap();
                let in_page = g.page_index_start == part.page_index && g.page_index_num == 1;
                assert_eq!(packed.flags & CLUSTER_FLAG_LEAF == 0, in_page);
                if !in_page {
                    for page in g.page_index_start..g.page_index_start + g.page_index_num {
                        assert!(chunks[page as usize]
                            .cluster_fixups
                            .iter()
                            .any(|f| f.page_index() == part.page_index && f.cluster_index() == local));
                    }
                }
            }
        }
    }
}
