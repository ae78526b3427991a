//! Source meshes in, fallback meshes out.

use std::{collections::HashMap, path::Path};

use anyhow::{bail, Context};
use common::{tri_mesh::TriMesh, MeshVert};
use obj::{Group, IndexTuple, ObjData, Object, SimplePolygon};

use crate::FallbackMesh;

/// Load a `.glb`, `.gltf` or `.obj` file.
pub fn load_mesh(path: impl AsRef<Path>) -> anyhow::Result<TriMesh> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("glb" | "gltf") => TriMesh::from_gltf(path),
        Some("obj") => {
            let obj = obj::Obj::load(path).with_context(|| format!("loading {}", path.display()))?;
            let mesh = tri_mesh_from_obj(&obj.data);
            if mesh.indices.is_empty() {
                bail!("no triangles in {}", path.display());
            }
            Ok(mesh)
        }
        _ => bail!("unsupported mesh format: {}", path.display()),
    }
}

/// Fan triangulate every polygon. Each group becomes a material, numbered by first appearance.
pub fn tri_mesh_from_obj(data: &ObjData) -> TriMesh {
    let mut mesh = TriMesh::default();
    let mut verts: HashMap<(usize, Option<usize>, Option<usize>), u32> = HashMap::new();
    let mut materials: HashMap<&str, u32> = HashMap::new();
    let mut missing_normals = false;

    for group in data.objects.iter().flat_map(|o| &o.groups) {
        let next = materials.len() as u32;
        let material = *materials.entry(group.name.as_str()).or_insert(next);

        for SimplePolygon(corners) in &group.polys {
            let mut index = |&IndexTuple(p, t, n): &IndexTuple| {
                *verts.entry((p, t, n)).or_insert_with(|| {
                    let mut v = MeshVert {
                        pos: data.position[p],
                        ..Default::default()
                    };
                    match n {
                        Some(n) => v.normal = data.normal[n],
                        None => missing_normals = true,
                    }
                    if let Some(t) = t {
                        v.uvs[0] = data.texture[t];
                        mesh.format.num_uvs = 1;
                    }
                    mesh.verts.push(v);
                    mesh.verts.len() as u32 - 1
                })
            };

            let ids: Vec<u32> = corners.iter().map(&mut index).collect();
            for i in 1..ids.len().saturating_sub(1) {
                mesh.indices.extend([ids[0], ids[i], ids[i + 1]]);
                mesh.material_indices.push(material);
            }
        }
    }

    if missing_normals {
        mesh.compute_normals();
    }
    mesh
}

/// One object holding the fallback triangles, with positions, normals and first UVs.
pub fn fallback_to_obj(mesh: &FallbackMesh) -> ObjData {
    let mut group = Group::new("fallback".to_owned());
    group.polys = mesh
        .indexes
        .chunks_exact(3)
        .map(|t| {
            SimplePolygon(
                t.iter()
                    .map(|&i| IndexTuple(i as usize, Some(i as usize), Some(i as usize)))
                    .collect(),
            )
        })
        .collect();

    let mut object = Object::new("fallback".to_owned());
    object.groups.push(group);

    ObjData {
        position: mesh.verts.iter().map(|v| v.pos).collect(),
        texture: mesh.verts.iter().map(|v| v.uvs[0]).collect(),
        normal: mesh.verts.iter().map(|v| v.normal).collect(),
        objects: vec![object],
        ..Default::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn quad_obj() -> ObjData {
        let mut group = Group::new("stone".to_owned());
        group.polys.push(SimplePolygon(
            (0..4).map(|i| IndexTuple(i, Some(i), None)).collect(),
        ));
        let mut object = Object::new("quad".to_owned());
        object.groups.push(group);
        ObjData {
            position: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            texture: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            objects: vec![object],
            ..Default::default()
        }
    }

    #[test]
    fn test_quad_is_fanned() {
        let mesh = tri_mesh_from_obj(&quad_obj());
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.material_indices, vec![0, 0]);
        assert_eq!(mesh.format.num_uvs, 1);
        assert!(mesh.verts.iter().all(|v| v.normal == [0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_fallback_export() {
        let source = tri_mesh_from_obj(&quad_obj());
        let fallback = FallbackMesh {
            verts: source.verts.clone(),
            indexes: source.indices.clone(),
            material_indexes: source.material_indices.clone(),
            lod_error: 0.0,
        };
        let data = fallback_to_obj(&fallback);
        assert_eq!(data.position.len(), 4);
        assert_eq!(data.objects[0].groups[0].polys.len(), 2);
        assert_eq!(tri_mesh_from_obj(&data).indices, fallback.indexes);
    }
}
