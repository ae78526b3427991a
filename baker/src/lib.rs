pub mod encode;
mod error;
pub mod lod;
pub mod mesh;
pub mod mesh_io;
mod settings;

use common::{
    Aabb, MeshVert, StreamingResource, VertexFormat, MAX_CLUSTER_MATERIALS, MAX_UVS,
};
use rayon::prelude::*;

use encode::{
    constrain::constrain_clusters,
    encoding_info::{check_page_capacity, EncodingInfo},
    hierarchy::build_hierarchy,
    pages::assign_clusters_to_pages,
    quantize::quantize_positions,
    writer::write_pages,
};
pub use error::{BuildError, InputError};
pub use lod::{fallback::FallbackMesh, ClusterDag};
use mesh::partition::build_leaf_clusters;
pub use settings::BuildSettings;

/// Everything a build produces.
#[derive(Debug, Clone)]
pub struct BakedMesh {
    pub resource: StreamingResource,
    /// The cluster DAG behind the resource, after constraining and quantization.
    pub dag: ClusterDag,
    /// A single static cut for consumers that cannot stream.
    pub fallback: FallbackMesh,
}

/// Reject malformed meshes before any work is done.
pub fn validate_input(
    verts: &[MeshVert],
    indexes: &[u32],
    material_indexes: &[u32],
    format: VertexFormat,
) -> Result<(), InputError> {
    if format.num_uvs as usize > MAX_UVS {
        return Err(InputError::TooManyUvs(format.num_uvs));
    }
    if indexes.is_empty() {
        return Err(InputError::Empty);
    }
    if indexes.len() % 3 != 0 {
        return Err(InputError::IndexCount(indexes.len()));
    }
    let num_tris = indexes.len() / 3;
    if material_indexes.len() != num_tris {
        return Err(InputError::MaterialCount {
            materials: material_indexes.len(),
            triangles: num_tris,
        });
    }

    for (triangle, tri) in indexes.chunks_exact(3).enumerate() {
        if let Some(&index) = tri.iter().find(|&&i| i as usize >= verts.len()) {
            return Err(InputError::IndexOutOfRange {
                triangle,
                index,
                num_vertices: verts.len(),
            });
        }
        if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
            return Err(InputError::RepeatedVertex(triangle));
        }
        let material = material_indexes[triangle];
        if material >= MAX_CLUSTER_MATERIALS {
            return Err(InputError::MaterialOutOfRange {
                triangle,
                material,
                max: MAX_CLUSTER_MATERIALS,
            });
        }
    }

    // Indices are relative to the start of `verts`, so the lowest one must be vertex 0.
    // An index buffer still offset into a larger shared vertex buffer fails here.
    if let Some(&first) = indexes.iter().min() {
        if first != 0 {
            return Err(InputError::FirstVertexOffset(first));
        }
    }

    if let Some(v) = verts.iter().position(|v| !v.position().is_finite()) {
        return Err(InputError::NonFinitePosition(v));
    }
    Ok(())
}

/// UV channels up to the last one holding any data, and colors if any vertex is not white.
pub fn infer_format(verts: &[MeshVert]) -> VertexFormat {
    let num_uvs = (0..MAX_UVS)
        .rev()
        .find(|&ch| verts.iter().any(|v| v.uvs[ch] != [0.0; 2]))
        .map_or(0, |ch| ch + 1);
    VertexFormat {
        num_uvs: num_uvs as u32,
        has_colors: verts.iter().any(|v| v.color != [1.0; 4]),
    }
}

/// Build the streaming resource for a mesh, with the vertex format inferred from its vertices.
pub fn build(
    verts: &[MeshVert],
    indexes: &[u32],
    material_indexes: &[u32],
    settings: &BuildSettings,
) -> Result<BakedMesh, BuildError> {
    build_with_format(verts, indexes, material_indexes, infer_format(verts), settings)
}

pub fn build_with_format(
    verts: &[MeshVert],
    indexes: &[u32],
    material_indexes: &[u32],
    format: VertexFormat,
    settings: &BuildSettings,
) -> Result<BakedMesh, BuildError> {
    settings.validate()?;
    validate_input(verts, indexes, material_indexes, format)?;
    check_page_capacity(settings, format)?;

    let num_input_tris = indexes.len() / 3;
    let leaves = build_leaf_clusters(
        verts,
        indexes,
        material_indexes,
        settings.cluster_size,
        &settings.partitioning,
    )?;
    let num_leaf_tris: usize = leaves.iter().map(|c| c.num_tris()).sum();
    log::info!(
        "{} leaf clusters from {} triangles",
        leaves.len(),
        num_input_tris
    );

    let mut dag = ClusterDag::build(leaves, settings, format)?;

    let target_tris = (settings.target_triangle_percent * num_input_tris as f32).round() as usize;
    let fallback = dag.fallback_mesh(target_tris.max(1));

    constrain_clusters(&mut dag);

    let mut mesh_bounds = Aabb::default();
    for c in &dag.clusters {
        mesh_bounds.include(&c.bounds);
    }
    let report = quantize_positions(
        &mut dag.clusters,
        &mesh_bounds,
        settings.min_position_shift(),
        settings.quantization_iteration_cap,
    );

    let infos: Vec<EncodingInfo> = dag
        .clusters
        .par_iter()
        .map(|c| EncodingInfo::new(c, format))
        .collect();

    let mut layout = assign_clusters_to_pages(&mut dag, &infos, settings)?;
    let hierarchy = build_hierarchy(&dag, &mut layout.parts);
    let mut resource = write_pages(&dag, &layout, &infos, hierarchy, format);

    let stats = &mut resource.stats;
    stats.num_input_triangles = num_input_tris as u32;
    stats.num_input_vertices = verts.len() as u32;
    stats.num_leaf_clusters = dag.num_leaf_clusters as u32;
    stats.num_leaf_triangles = num_leaf_tris as u32;
    stats.num_clusters = dag.clusters.len() as u32;
    stats.num_groups = dag.groups.len() as u32;
    stats.dag_depth = dag.depth;
    stats.quantization_fallback = report.fallback;
    log::info!("{stats:?}");

    Ok(BakedMesh {
        resource,
        dag,
        fallback,
    })
}

#[cfg(test)]
mod test {
    use glam::{vec2, vec3, Vec3, Vec4};

    use super::*;

    fn triangle() -> Vec<MeshVert> {
        [Vec3::ZERO, Vec3::X, Vec3::Y]
            .map(|p| MeshVert::new(p, Vec3::Z))
            .to_vec()
    }

    #[test]
    fn test_validate_input() {
        let verts = triangle();
        let format = VertexFormat::default();
        assert_eq!(validate_input(&verts, &[0, 1, 2], &[0], format), Ok(()));
        assert_eq!(validate_input(&verts, &[], &[], format), Err(InputError::Empty));
        assert_eq!(
            validate_input(&verts, &[0, 1], &[0], format),
            Err(InputError::IndexCount(2))
        );
        assert_eq!(
            validate_input(&verts, &[0, 1, 3], &[0], format),
            Err(InputError::IndexOutOfRange {
                triangle: 0,
                index: 3,
                num_vertices: 3
            })
        );
        assert_eq!(
            validate_input(&verts, &[0, 1, 1], &[0], format),
            Err(InputError::RepeatedVertex(0))
        );
        assert_eq!(
            validate_input(&verts, &[0, 1, 2], &[64], format),
            Err(InputError::MaterialOutOfRange {
                triangle: 0,
                material: 64,
                max: 64
            })
        );
        assert_eq!(
            validate_input(&verts, &[0, 1, 2], &[0, 0], format),
            Err(InputError::MaterialCount {
                materials: 2,
                triangles: 1
            })
        );
        assert_eq!(
            validate_input(
                &verts,
                &[0, 1, 2],
                &[0],
                VertexFormat {
                    num_uvs: 5,
                    has_colors: false
                }
            ),
            Err(InputError::TooManyUvs(5))
        );

        let mut bad = verts.clone();
        bad[1].pos[2] = f32::NAN;
        assert_eq!(
            validate_input(&bad, &[0, 1, 2], &[0], format),
            Err(InputError::NonFinitePosition(1))
        );
    }

    #[test]
    fn test_first_vertex_offset() {
        let mut verts = triangle();
        verts.extend(triangle().into_iter().map(|mut v| {
            v.pos[2] = 1.0;
            v
        }));
        let format = VertexFormat::default();

        // Only the second triangle, still indexed as if it sat after the first.
        assert_eq!(
            validate_input(&verts, &[3, 4, 5], &[0], format),
            Err(InputError::FirstVertexOffset(3))
        );
        assert_eq!(validate_input(&verts, &[3, 4, 5, 0, 1, 2], &[0, 0], format), Ok(()));
        assert_eq!(validate_input(&verts, &[4, 5, 0], &[0], format), Ok(()));
    }

    #[test]
    fn test_infer_format() {
        let mut verts = triangle();
        assert_eq!(infer_format(&verts), VertexFormat::default());

        verts[2] = verts[2].with_uv(1, vec2(0.5, 0.5));
        verts[0] = verts[0].with_color(Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(
            infer_format(&verts),
            VertexFormat {
                num_uvs: 2,
                has_colors: true
            }
        );
    }

    #[test]
    fn test_single_triangle() {
        let verts = [vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.5)]
            .map(|p| MeshVert::new(p, Vec3::Z))
            .to_vec();
        let baked = build(&verts, &[0, 1, 2], &[3], &BuildSettings::default()).unwrap();

        assert_eq!(baked.dag.clusters.len(), 1);
        assert_eq!(baked.dag.groups.len(), 1);
        assert_eq!(baked.resource.num_pages(), 1);
        assert!(baked.resource.is_root_page(0));
        assert!(baked.resource.page_dependencies.is_empty());
        assert!(baked.resource.streamable_pages.is_empty());
        assert_eq!(baked.resource.hierarchy_nodes.len(), 1);
        assert_eq!(baked.fallback.num_tris(), 1);
        assert_eq!(baked.fallback.material_indexes, vec![3]);
    }
}
