pub mod asset;
pub mod bounding_sphere;
pub mod bounds;
pub mod mesh_vert;
pub mod packed;
pub mod page;
pub mod resource;
pub mod tri_mesh;

pub use bounding_sphere::BoundingSphere;
pub use bounds::Aabb;
pub use mesh_vert::{MeshVert, VertexFormat, MAX_UVS, MESH_VERT_WORDS};
pub use resource::{BuildStats, PageStreamingState, StreamingResource};

/// Hard cap on triangles a single cluster may hold.
pub const MAX_CLUSTER_TRIANGLES: usize = 128;
/// Indices are stored in a byte, and the vertex reference bitmask has a fixed width.
pub const MAX_CLUSTER_VERTICES: usize = 256;
pub const MAX_CLUSTER_MATERIALS: u32 = 64;
/// Trailing vertex window a decoder keeps warm.
pub const CONSTRAINED_CLUSTER_CACHE_SIZE: usize = 32;

pub const POSITION_QUANTIZATION_BITS: u32 = 10;
pub const POSITION_QUANTIZATION_MASK: u32 = (1 << POSITION_QUANTIZATION_BITS) - 1;
/// Bits per octahedral axis, so a normal takes twice this.
pub const NORMAL_QUANTIZATION_BITS: u32 = 6;
pub const MAX_TEXCOORD_QUANTIZATION_BITS: u32 = 10;

pub const NUM_ROOT_PAGES: u32 = 1;
pub const CLUSTER_PAGE_GPU_SIZE: u32 = 128 * 1024;
pub const MAX_CLUSTERS_PER_PAGE_BITS: u32 = 8;
pub const MAX_CLUSTERS_PER_PAGE: u32 = 1 << MAX_CLUSTERS_PER_PAGE_BITS;
pub const MAX_CLUSTERS_PER_GROUP_BITS: u32 = 9;
pub const MAX_CLUSTERS_PER_GROUP: u32 = (1 << MAX_CLUSTERS_PER_GROUP_BITS) - 1;
pub const MAX_GROUP_PARTS_BITS: u32 = 3;
pub const MAX_GROUP_PARTS_MASK: u32 = (1 << MAX_GROUP_PARTS_BITS) - 1;
pub const MAX_RESOURCE_PAGES_BITS: u32 = 20;
pub const MAX_HIERARCHY_CHILDREN_BITS: u32 = 6;
pub const MAX_HIERARCHY_CHILDREN: usize = 1 << MAX_HIERARCHY_CHILDREN_BITS;

pub const INVALID_INDEX: u32 = u32::MAX;

pub const CLUSTER_FLAG_LEAF: u32 = 0x1;

pub const VERTEX_COLOR_MODE_WHITE: u32 = 0;
pub const VERTEX_COLOR_MODE_CONSTANT: u32 = 1;
pub const VERTEX_COLOR_MODE_VARIABLE: u32 = 2;

/// Interleave the low 10 bits of `x` with two zero bits between each.
pub fn morton_code3(x: u32) -> u32 {
    let mut x = x & 0x3ff;
    x = (x | (x << 16)) & 0x030000ff;
    x = (x | (x << 8)) & 0x0300f00f;
    x = (x | (x << 4)) & 0x030c30c3;
    x = (x | (x << 2)) & 0x09249249;
    x
}

/// 30 bit Morton code for a point, with each axis quantized to 10 bits within `bounds`.
pub fn morton_xyz(point: glam::Vec3, bounds: &Aabb) -> u32 {
    let size = bounds.size();
    let scaled = (point - bounds.min) / size.max(glam::Vec3::splat(f32::MIN_POSITIVE)) * 1023.0
        + 0.5;
    let q = |v: f32| (v as i32).clamp(0, 1023) as u32;
    (morton_code3(q(scaled.z)) << 2) | (morton_code3(q(scaled.y)) << 1) | morton_code3(q(scaled.x))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_morton_interleave() {
        assert_eq!(morton_code3(0b1), 0b1);
        assert_eq!(morton_code3(0b11), 0b1001);
        assert_eq!(morton_code3(0x3ff), 0x09249249);
    }

    #[test]
    fn test_morton_orders_by_axis() {
        let bounds = Aabb::from_points([glam::Vec3::ZERO, glam::Vec3::ONE]);
        let a = morton_xyz(glam::Vec3::ZERO, &bounds);
        let b = morton_xyz(glam::vec3(1.0, 0.0, 0.0), &bounds);
        let c = morton_xyz(glam::vec3(0.0, 0.0, 1.0), &bounds);
        assert_eq!(a, 0);
        assert!(b < c);
    }
}
