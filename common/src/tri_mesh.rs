use std::collections::HashMap;

use anyhow::{bail, Context};
use glam::Vec3;

use crate::{MeshVert, VertexFormat, MAX_UVS};

/// Flat triangle soup ready to hand to the baker.
#[derive(Debug, Default, Clone)]
pub struct TriMesh {
    pub verts: Vec<MeshVert>,
    pub indices: Vec<u32>,
    /// One material per triangle.
    pub material_indices: Vec<u32>,
    pub format: VertexFormat,
}

impl TriMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Load every triangle primitive of every mesh in a glTF file.
    /// Materials are numbered in the order they are first seen.
    pub fn from_gltf(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let (doc, buffers, _) =
            gltf::import(path).with_context(|| format!("importing {}", path.display()))?;

        let mut mesh = TriMesh::default();
        let mut materials = HashMap::new();
        let mut missing_normals = false;

        for p in doc.meshes().flat_map(|m| m.primitives()) {
            if p.mode() != gltf::mesh::Mode::Triangles {
                log::warn!("Skipping non triangle primitive in {}", path.display());
                continue;
            }

            let reader = p.reader(|buffer| Some(&buffers[buffer.index()]));
            let Some(positions) = reader.read_positions() else {
                bail!("primitive without positions in {}", path.display());
            };

            let base = mesh.verts.len();
            mesh.verts.extend(positions.map(|pos| MeshVert {
                pos,
                ..Default::default()
            }));
            let verts = &mut mesh.verts[base..];

            match reader.read_normals() {
                Some(normals) => verts
                    .iter_mut()
                    .zip(normals)
                    .for_each(|(v, n)| v.normal = n),
                None => missing_normals = true,
            }

            if let Some(colors) = reader.read_colors(0) {
                mesh.format.has_colors = true;
                verts
                    .iter_mut()
                    .zip(colors.into_rgba_f32())
                    .for_each(|(v, c)| v.color = c);
            }

            for set in 0..MAX_UVS {
                let Some(uvs) = reader.read_tex_coords(set as u32) else {
                    break;
                };
                mesh.format.num_uvs = mesh.format.num_uvs.max(set as u32 + 1);
                verts
                    .iter_mut()
                    .zip(uvs.into_f32())
                    .for_each(|(v, uv)| v.uvs[set] = uv);
            }

            let start = mesh.indices.len();
            match reader.read_indices() {
                Some(indices) => mesh
                    .indices
                    .extend(indices.into_u32().map(|i| i + base as u32)),
                None => mesh.indices.extend(base as u32..mesh.verts.len() as u32),
            }

            let next = materials.len() as u32;
            let material = *materials.entry(p.material().index()).or_insert(next);
            let tris = (mesh.indices.len() - start) / 3;
            mesh.material_indices
                .extend(std::iter::repeat(material).take(tris));
        }

        if mesh.indices.is_empty() {
            bail!("no triangles in {}", path.display());
        }
        if missing_normals {
            mesh.compute_normals();
        }

        Ok(mesh)
    }

    /// Replace normals with area weighted face normals.
    pub fn compute_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.verts.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|i| self.verts[tri[i] as usize].position());
            let n = (b - a).cross(c - a);
            for &i in tri {
                normals[i as usize] += n;
            }
        }
        for (v, n) in self.verts.iter_mut().zip(normals) {
            v.normal = n.try_normalize().unwrap_or(Vec3::Z).into();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_compute_normals() {
        let mut mesh = TriMesh {
            verts: [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
                .map(|pos| MeshVert {
                    pos,
                    normal: [0.0; 3],
                    ..Default::default()
                })
                .to_vec(),
            indices: vec![0, 1, 2],
            material_indices: vec![0],
            format: VertexFormat::default(),
        };
        mesh.compute_normals();
        for v in &mesh.verts {
            assert_eq!(v.normal(), Vec3::Z);
        }
    }
}
