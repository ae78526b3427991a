//! Per cluster bit widths and section sizes, decided before clusters are placed in pages.

use common::{
    packed::{PackedCluster, UvRange},
    VertexFormat, MAX_CLUSTER_MATERIALS, MAX_CLUSTER_VERTICES, MAX_TEXCOORD_QUANTIZATION_BITS,
    NORMAL_QUANTIZATION_BITS, POSITION_QUANTIZATION_BITS, VERTEX_COLOR_MODE_CONSTANT,
    VERTEX_COLOR_MODE_VARIABLE, VERTEX_COLOR_MODE_WHITE,
};
use glam::{IVec2, Vec2, Vec3};

use super::{material::material_table_size, PageSections};
use crate::{mesh::cluster::Cluster, BuildError, BuildSettings};

const SMALL_NUMBER: f32 = 1e-8;
/// Texture coordinate steps per unit for leaves. Coarser clusters get a quarter of this.
const LEAF_TEXCOORD_PRECISION: f32 = (1 << 14) as f32;
const PARENT_TEXCOORD_PRECISION: f32 = (1 << 12) as f32;
/// Two 5 bit offsets follow the base index of each triangle.
const TRIANGLE_OFFSET_BITS: u32 = 2 * 5;

/// `ceil(log2(x))`, with 0 for `x <= 1`.
pub fn ceil_log_two(x: u32) -> u32 {
    if x <= 1 {
        0
    } else {
        32 - (x - 1).leading_zeros()
    }
}

fn dword_aligned_bytes(bits: u32) -> u32 {
    bits.div_ceil(32) * 4
}

/// Quantization of one texture coordinate channel within a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UvInfo {
    pub range: UvRange,
    pub min: Vec2,
    pub rcp_delta: Vec2,
    /// Steps across the whole range, before the gap is removed.
    pub steps: IVec2,
    pub bits: [u32; 2],
}

impl UvInfo {
    /// Texture coordinates are stored relative to the cluster's UV rectangle. Seams make that
    /// rectangle large and sparse, so the largest gap along each axis is cut out of the coded range.
    fn new(uvs: impl Iterator<Item = Vec2>, is_leaf: bool) -> Self {
        let (mut u, mut v): (Vec<f32>, Vec<f32>) = uvs.map(|uv| (uv.x, uv.y)).unzip();
        u.sort_unstable_by(f32::total_cmp);
        v.sort_unstable_by(f32::total_cmp);
        let (Some(&u0), Some(&v0)) = (u.first(), v.first()) else {
            return Self::default();
        };

        let largest_gap = |values: &[f32]| -> (f32, f32) {
            let mut gap = (values[0], values[0]);
            for w in values.windows(2) {
                if w[1] - w[0] > gap.1 - gap.0 {
                    gap = (w[0], w[1]);
                }
            }
            gap
        };
        let (gap_start_u, gap_end_u) = largest_gap(&u);
        let (gap_start_v, gap_end_v) = largest_gap(&v);
        let gap_start = Vec2::new(gap_start_u, gap_start_v);
        let gap_end = Vec2::new(gap_end_u, gap_end_v);

        let min = Vec2::new(u0, v0);
        let max = Vec2::new(u[u.len() - 1], v[v.len() - 1]);
        let delta = max - min;
        let rcp = |d: f32| if d > SMALL_NUMBER { 1.0 / d } else { 0.0 };
        let rcp_delta = Vec2::new(rcp(delta.x), rcp(delta.y));

        let non_gap_length = (delta - (gap_end - gap_start)).max(Vec2::ZERO);
        let normalized_gap_start = (gap_start - min) * rcp_delta;
        let normalized_gap_end = (gap_end - min) * rcp_delta;
        let normalized_non_gap_length = non_gap_length * rcp_delta;

        let precision = if is_leaf {
            LEAF_TEXCOORD_PRECISION
        } else {
            PARENT_TEXCOORD_PRECISION
        };

        let mut range = UvRange {
            min: min.to_array(),
            ..Default::default()
        };
        let mut bits = [0; 2];
        let mut steps = IVec2::ZERO;
        for axis in 0..2 {
            let axis_bits = ceil_log_two((non_gap_length[axis] * precision).ceil() as u32)
                .min(MAX_TEXCOORD_QUANTIZATION_BITS);
            let max_value = (1i32 << axis_bits) - 1;

            let n = if normalized_non_gap_length[axis] > SMALL_NUMBER {
                (max_value - 2) as f32 / normalized_non_gap_length[axis]
            } else {
                0.0
            };
            let n = n.clamp(max_value as f32, 0xffff as f32) as i32;

            let (mut gap_start, mut gap_length) = (max_value + 1, 0);
            if n > max_value {
                gap_start = (normalized_gap_start[axis] * n as f32 + 0.5) as i32 + 1;
                let gap_end = (normalized_gap_end[axis] * n as f32 + 0.5) as i32;
                gap_length = (gap_end - gap_start).max(0);
            }

            range.scale[axis] = if n > 0 { delta[axis] / n as f32 } else { 0.0 };
            range.gap_start[axis] = gap_start;
            range.gap_length[axis] = gap_length;
            bits[axis] = axis_bits;
            steps[axis] = n;
        }

        Self {
            range,
            min,
            rcp_delta,
            steps,
            bits,
        }
    }

    pub fn num_bits(&self) -> u32 {
        self.bits[0] + self.bits[1]
    }

    /// Packed `v << bits_u | u`.
    pub fn encode(&self, uv: Vec2) -> u32 {
        let normalized = ((uv - self.min) * self.rcp_delta).clamp(Vec2::ZERO, Vec2::ONE);
        let mut coded = [0u32; 2];
        for axis in 0..2 {
            let mut x = (normalized[axis] * self.steps[axis] as f32 + 0.5) as i32;
            if x >= self.range.gap_start[axis] {
                debug_assert!(x >= self.range.gap_start[axis] + self.range.gap_length[axis]);
                x -= self.range.gap_length[axis];
            }
            let max_value = (1i32 << self.bits[axis]) - 1;
            coded[axis] = x.clamp(0, max_value) as u32;
        }
        (coded[1] << self.bits[0]) | coded[0]
    }
}

/// How one cluster's vertices and triangles are coded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingInfo {
    pub bits_per_index: u32,
    pub bits_per_attribute: u32,
    /// 4 bits U and 4 bits V per channel.
    pub uv_prec: u32,
    pub color_mode: u32,
    pub color_min: [u8; 4],
    pub color_bits: [u32; 4],
    pub gpu_sizes: PageSections,
    pub uv_infos: Vec<UvInfo>,
}

impl EncodingInfo {
    pub fn new(cluster: &Cluster, format: VertexFormat) -> Self {
        let num_verts = cluster.num_verts() as u32;
        let num_tris = cluster.num_tris() as u32;
        debug_assert!(num_verts > 0);
        let is_leaf = cluster.generating_group_index.is_none();

        let bits_per_index = ceil_log_two(num_verts);
        let mut info = EncodingInfo {
            bits_per_index,
            bits_per_attribute: 2 * NORMAL_QUANTIZATION_BITS,
            color_mode: VERTEX_COLOR_MODE_WHITE,
            color_min: [255; 4],
            ..Default::default()
        };

        if format.has_colors {
            let mut lo = [255u8; 4];
            let mut hi = [0u8; 4];
            for v in &cluster.verts {
                for (c, &x) in v.color_bytes().iter().enumerate() {
                    lo[c] = lo[c].min(x);
                    hi[c] = hi[c].max(x);
                }
            }
            let bits: [u32; 4] = std::array::from_fn(|c| ceil_log_two((hi[c] - lo[c]) as u32 + 1));
            let num_color_bits: u32 = bits.iter().sum();

            info.bits_per_attribute += num_color_bits;
            info.color_min = lo;
            info.color_bits = bits;
            info.color_mode = if num_color_bits > 0 {
                VERTEX_COLOR_MODE_VARIABLE
            } else if lo == [255; 4] {
                VERTEX_COLOR_MODE_WHITE
            } else {
                VERTEX_COLOR_MODE_CONSTANT
            };
        }

        for channel in 0..format.num_uvs as usize {
            let uv_info = UvInfo::new(cluster.verts.iter().map(|v| v.uv(channel)), is_leaf);
            info.uv_prec |= ((uv_info.bits[1] << 4) | uv_info.bits[0]) << (channel * 8);
            info.bits_per_attribute += uv_info.num_bits();
            info.uv_infos.push(uv_info);
        }

        info.gpu_sizes = PageSections {
            cluster: PackedCluster::SIZE as u32,
            material_table: material_table_size(cluster) * 4,
            decode_info: format.num_uvs * std::mem::size_of::<UvRange>() as u32,
            index: dword_aligned_bytes(num_tris * (bits_per_index + TRIANGLE_OFFSET_BITS)),
            position: dword_aligned_bytes(num_verts * 3 * POSITION_QUANTIZATION_BITS),
            attribute: dword_aligned_bytes(num_verts * info.bits_per_attribute),
        };
        info
    }

    /// Bytes of one vertex's attributes on disk, where each vertex starts on a dword.
    pub fn bytes_per_attribute(&self) -> u32 {
        dword_aligned_bytes(self.bits_per_attribute)
    }
}

/// GPU bytes of the largest cluster the settings allow.
pub fn max_cluster_gpu_size(settings: &BuildSettings, format: VertexFormat) -> u32 {
    let num_tris = settings.cluster_size as u32;
    let num_verts = MAX_CLUSTER_VERTICES as u32;
    let color_bits = if format.has_colors { 4 * 8 } else { 0 };
    let bits_per_attribute = 2 * NORMAL_QUANTIZATION_BITS
        + color_bits
        + format.num_uvs * 2 * MAX_TEXCOORD_QUANTIZATION_BITS;

    let sizes = PageSections {
        cluster: PackedCluster::SIZE as u32,
        material_table: MAX_CLUSTER_MATERIALS.min(num_tris) * 4,
        decode_info: format.num_uvs * std::mem::size_of::<UvRange>() as u32,
        index: dword_aligned_bytes(num_tris * (ceil_log_two(num_verts) + TRIANGLE_OFFSET_BITS)),
        position: dword_aligned_bytes(num_verts * 3 * POSITION_QUANTIZATION_BITS),
        attribute: dword_aligned_bytes(num_verts * bits_per_attribute),
    };
    sizes.total()
}

/// Reject settings under which a single cluster might not fit in a page.
pub fn check_page_capacity(settings: &BuildSettings, format: VertexFormat) -> Result<(), BuildError> {
    let cluster_bytes = max_cluster_gpu_size(settings, format);
    if cluster_bytes > settings.page_gpu_size {
        return Err(BuildError::PageOverflow {
            cluster_bytes,
            page_bytes: settings.page_gpu_size,
        });
    }
    Ok(())
}

fn octahedron_encode(n: Vec3) -> Vec2 {
    let n = n / n.abs().element_sum();
    if n.z < 0.0 {
        let sign = |x: f32| if x >= 0.0 { 1.0 } else { -1.0 };
        Vec2::new((1.0 - n.y.abs()) * sign(n.x), (1.0 - n.x.abs()) * sign(n.y))
    } else {
        Vec2::new(n.x, n.y)
    }
}

pub fn octahedron_decode(x: u32, y: u32, bits: u32) -> Vec3 {
    let max_value = ((1 << bits) - 1) as f32;
    let mut fx = x as f32 * (2.0 / max_value) - 1.0;
    let mut fy = y as f32 * (2.0 / max_value) - 1.0;
    let fz = 1.0 - fx.abs() - fy.abs();
    let t = (-fz).clamp(0.0, 1.0);
    fx += if fx >= 0.0 { -t } else { t };
    fy += if fy >= 0.0 { -t } else { t };
    Vec3::new(fx, fy, fz).normalize_or_zero()
}

/// Octahedral normal with `bits` per axis, picking whichever of the four nearest codes decodes
/// closest to `normal`. Packed `y << bits | x`.
pub fn pack_normal(normal: Vec3, bits: u32) -> u32 {
    let max_value = (1i32 << bits) - 1;
    let normal = normal.try_normalize().unwrap_or(Vec3::Z);
    let coord = octahedron_encode(normal);

    let scale = 0.5 * max_value as f32;
    let nx = ((coord.x * scale + scale) as i32).clamp(0, max_value);
    let ny = ((coord.y * scale + scale) as i32).clamp(0, max_value);

    let mut best = (f32::MAX, nx as u32, ny as u32);
    for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        let (tx, ty) = (nx + dx, ny + dy);
        if tx > max_value || ty > max_value {
            continue;
        }
        let error = (1.0 - octahedron_decode(tx as u32, ty as u32, bits).dot(normal)).abs();
        if error < best.0 {
            best = (error, tx as u32, ty as u32);
        }
    }
    (best.2 << bits) | best.1
}

#[cfg(test)]
mod test {
    use common::MeshVert;
    use glam::{vec3, Vec4};

    use super::*;
    use crate::mesh::edge_topology::test::quad;

    #[test]
    fn test_ceil_log_two() {
        assert_eq!(ceil_log_two(0), 0);
        assert_eq!(ceil_log_two(1), 0);
        assert_eq!(ceil_log_two(2), 1);
        assert_eq!(ceil_log_two(3), 2);
        assert_eq!(ceil_log_two(256), 8);
        assert_eq!(ceil_log_two(257), 9);
    }

    #[test]
    fn test_normals_round_trip() {
        for n in [
            Vec3::X,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
            vec3(1.0, 2.0, -3.0).normalize(),
            vec3(-0.3, 0.1, 0.9).normalize(),
        ] {
            let packed = pack_normal(n, NORMAL_QUANTIZATION_BITS);
            assert!(packed < 1 << (2 * NORMAL_QUANTIZATION_BITS));
            let mask = (1 << NORMAL_QUANTIZATION_BITS) - 1;
            let decoded = octahedron_decode(packed & mask, packed >> NORMAL_QUANTIZATION_BITS, NORMAL_QUANTIZATION_BITS);
            assert!(decoded.dot(n) > 0.99, "{n} decoded to {decoded}");
        }
    }

    #[test]
    fn test_uv_gap_is_removed() {
        // Two islands at either end of UV space.
        let uvs = [0.0, 0.01, 0.02, 0.98, 0.99, 1.0].map(|u| Vec2::new(u, 0.5));
        let info = UvInfo::new(uvs.iter().copied(), true);
        assert_eq!(info.bits[1], 0);
        assert!(info.range.gap_length[0] > 0);
        assert!(info.bits[0] <= MAX_TEXCOORD_QUANTIZATION_BITS);

        let coded: Vec<u32> = uvs.iter().map(|&uv| info.encode(uv)).collect();
        assert!(coded.windows(2).all(|w| w[0] <= w[1]));
        assert!(coded.iter().all(|&c| c < 1 << info.num_bits()));
        // Values past the gap decode back past it.
        let decode = |c: u32| {
            let mut x = c as i32;
            if x >= info.range.gap_start[0] {
                x += info.range.gap_length[0];
            }
            info.range.min[0] + x as f32 * info.range.scale[0]
        };
        for (uv, &c) in uvs.iter().zip(&coded) {
            assert!((decode(c) - uv.x).abs() < 0.01, "{} vs {}", decode(c), uv.x);
        }
    }

    #[test]
    fn test_color_modes() {
        let (verts, indexes) = quad();
        let materials = vec![0, 0];
        let format = VertexFormat {
            num_uvs: 0,
            has_colors: true,
        };

        let white = Cluster::from_triangles(&verts, &indexes, &materials, 0..2, 0, 0);
        assert_eq!(EncodingInfo::new(&white, format).color_mode, VERTEX_COLOR_MODE_WHITE);

        let red: Vec<MeshVert> = verts.iter().map(|v| v.with_color(Vec4::new(1.0, 0.0, 0.0, 1.0))).collect();
        let constant = Cluster::from_triangles(&red, &indexes, &materials, 0..2, 0, 0);
        let info = EncodingInfo::new(&constant, format);
        assert_eq!(info.color_mode, VERTEX_COLOR_MODE_CONSTANT);
        assert_eq!(info.color_min, [255, 0, 0, 255]);

        let mut varied = red;
        varied[0] = varied[0].with_color(Vec4::new(0.0, 0.0, 0.0, 1.0));
        let variable = Cluster::from_triangles(&varied, &indexes, &materials, 0..2, 0, 0);
        let info = EncodingInfo::new(&variable, format);
        assert_eq!(info.color_mode, VERTEX_COLOR_MODE_VARIABLE);
        assert_eq!(info.color_bits, [8, 0, 0, 0]);
        assert_eq!(info.bits_per_attribute, 12 + 8);
    }

    #[test]
    fn test_page_capacity() {
        let format = VertexFormat {
            num_uvs: 2,
            has_colors: true,
        };
        let mut settings = BuildSettings::default();
        assert!(check_page_capacity(&settings, format).is_ok());

        settings.page_gpu_size = 4096;
        assert!(matches!(
            check_page_capacity(&settings, format),
            Err(BuildError::PageOverflow { page_bytes: 4096, .. })
        ));
    }
}
