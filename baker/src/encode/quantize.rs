use std::collections::HashMap;

use common::{Aabb, POSITION_QUANTIZATION_BITS, POSITION_QUANTIZATION_MASK};
use glam::{UVec3, Vec3};
use rayon::prelude::*;

use crate::mesh::cluster::Cluster;

/// Largest f32 below `u32::MAX`.
const FLOAT_UINT32_MAX: f32 = 4_294_967_040.0;
/// Shift at which any 32 bit range fits the position bits.
pub const FALLBACK_SHIFT: u32 = 32 - POSITION_QUANTIZATION_BITS;

/// Cluster positions as offsets from a shared integer origin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuantizedPositions {
    /// Per vertex, each axis at most [`POSITION_QUANTIZATION_MASK`].
    pub positions: Vec<UVec3>,
    pub start: UVec3,
    pub shift: u32,
    pub mesh_bounds_min: Vec3,
    /// Size of one quantization step, scaled by the shift.
    pub mesh_bounds_delta: Vec3,
}

impl QuantizedPositions {
    /// Position on the 32 bit mesh grid.
    pub fn grid_position(&self, vertex: usize) -> UVec3 {
        (self.positions[vertex] + self.start) << self.shift
    }

    pub fn decode(&self, vertex: usize) -> Vec3 {
        (self.positions[vertex] + self.start).as_vec3() * self.mesh_bounds_delta
            + self.mesh_bounds_min
    }

    /// Packed `z << 20 | y << 10 | x`.
    pub fn packed(&self, vertex: usize) -> u32 {
        let p = self.positions[vertex];
        (p.z << (POSITION_QUANTIZATION_BITS * 2)) | (p.y << POSITION_QUANTIZATION_BITS) | p.x
    }
}

/// Round a 32 bit grid position to `shift` fewer bits.
pub fn quantize_uint(v: UVec3, shift: u32) -> UVec3 {
    let rounding = if shift > 0 { 1u64 << (shift - 1) } else { 0 };
    let q = |x: u32| ((x as u64 + rounding).min(u32::MAX as u64) >> shift) as u32;
    UVec3::new(q(v.x), q(v.y), q(v.z))
}

/// Map a position inside `bounds` onto the full 32 bit grid.
fn grid_position(p: Vec3, bounds: &Aabb) -> UVec3 {
    let size = bounds.size();
    let axis = |p: f32, min: f32, size: f32| -> u32 {
        let unit = if size > 0.0 { (p - min) / size } else { 0.0 };
        (unit as f64 * u32::MAX as f64 + 0.5).clamp(0.0, u32::MAX as f64) as u32
    };
    UVec3::new(
        axis(p.x, bounds.min.x, size.x),
        axis(p.y, bounds.min.y, size.y),
        axis(p.z, bounds.min.z, size.z),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizationReport {
    /// Passes over all clusters until no vertex needed a coarser shift.
    pub iterations: u32,
    /// Convergence was not reached within the cap and every cluster uses [`FALLBACK_SHIFT`].
    pub fallback: bool,
}

struct ClusterGrid {
    positions: Vec<UVec3>,
    ids: Vec<u32>,
    shift: u32,
    start: UVec3,
}

/// Smallest shift from `min_shift` at which `positions` span at most the position mask.
fn fitting_shift(positions: &[UVec3], min_shift: u32) -> u32 {
    let (min, max) = positions
        .iter()
        .fold((UVec3::MAX, UVec3::ZERO), |(lo, hi), &p| (lo.min(p), hi.max(p)));
    let mut shift = min_shift;
    while shift < FALLBACK_SHIFT
        && (quantize_uint(max, shift) - quantize_uint(min, shift)).max_element()
            > POSITION_QUANTIZATION_MASK
    {
        shift += 1;
    }
    shift
}

/// Quantize every cluster's positions to 10 bits per axis around a per cluster origin.
///
/// A vertex shared by several clusters is quantized at the coarsest shift any of them needs, so
/// all of them decode it to the same point. Raising one cluster's shift can raise a shared
/// vertex and so another cluster, so passes repeat until nothing changes, for at most
/// `iteration_cap` passes before falling back to [`FALLBACK_SHIFT`] everywhere.
pub fn quantize_positions(
    clusters: &mut [Cluster],
    mesh_bounds: &Aabb,
    min_shift: u32,
    iteration_cap: u32,
) -> QuantizationReport {
    let min_shift = min_shift.min(FALLBACK_SHIFT);

    // Identify vertices by grid position, in cluster order.
    let mut position_ids: HashMap<UVec3, u32> = HashMap::new();
    let mut grids: Vec<ClusterGrid> = clusters
        .iter()
        .map(|c| {
            let positions: Vec<UVec3> = c
                .verts
                .iter()
                .map(|v| grid_position(v.position(), mesh_bounds))
                .collect();
            let ids = positions
                .iter()
                .map(|&p| {
                    let next = position_ids.len() as u32;
                    *position_ids.entry(p).or_insert(next)
                })
                .collect();
            let shift = fitting_shift(&positions, min_shift);
            ClusterGrid {
                positions,
                ids,
                shift,
                start: UVec3::ZERO,
            }
        })
        .collect();

    let mut id_shift = vec![0u32; position_ids.len()];
    let mut iterations = 0;
    let mut changed = true;
    while changed && iterations < iteration_cap {
        changed = false;
        iterations += 1;

        for grid in &mut grids {
            loop {
                let mut lo = UVec3::MAX;
                let mut hi = UVec3::ZERO;
                for (&p, &id) in grid.positions.iter().zip(&grid.ids) {
                    let vertex_shift = &mut id_shift[id as usize];
                    if grid.shift > *vertex_shift {
                        *vertex_shift = grid.shift;
                        changed = true;
                    }
                    let q = quantize_uint(p, *vertex_shift) << (*vertex_shift - grid.shift);
                    lo = lo.min(q);
                    hi = hi.max(q);
                }

                if (hi - lo).max_element() <= POSITION_QUANTIZATION_MASK
                    || grid.shift >= FALLBACK_SHIFT
                {
                    grid.start = lo;
                    break;
                }
                grid.shift += 1;
            }
        }
    }

    let fallback = changed;
    if fallback {
        log::warn!(
            "Position quantization did not settle in {iteration_cap} passes, using shift {FALLBACK_SHIFT} for all clusters"
        );
        id_shift.fill(FALLBACK_SHIFT);
        for grid in &mut grids {
            grid.shift = FALLBACK_SHIFT;
            grid.start = grid
                .positions
                .iter()
                .fold(UVec3::MAX, |lo, &p| lo.min(quantize_uint(p, FALLBACK_SHIFT)));
        }
    } else {
        log::debug!("Position quantization settled after {iterations} passes");
    }

    let step = mesh_bounds.size() / FLOAT_UINT32_MAX;
    clusters
        .par_iter_mut()
        .zip(grids.par_iter())
        .for_each(|(cluster, grid)| {
            let positions = grid
                .positions
                .iter()
                .zip(&grid.ids)
                .map(|(&p, &id)| {
                    let vertex_shift = id_shift[id as usize];
                    debug_assert!(vertex_shift >= grid.shift);
                    let q = quantize_uint(p, vertex_shift) << (vertex_shift - grid.shift);
                    let q = q - grid.start;
                    debug_assert!(q.max_element() <= POSITION_QUANTIZATION_MASK);
                    q
                })
                .collect();

            cluster.quantized = QuantizedPositions {
                positions,
                start: grid.start,
                shift: grid.shift,
                mesh_bounds_min: mesh_bounds.min,
                mesh_bounds_delta: step * (1u32 << grid.shift) as f32,
            };
        });

    QuantizationReport {
        iterations,
        fallback,
    }
}

#[cfg(test)]
mod test {
    use common::MeshVert;
    use glam::vec3;

    use super::*;

    fn cluster(points: &[Vec3]) -> Cluster {
        let verts: Vec<MeshVert> = points.iter().map(|&p| MeshVert::new(p, Vec3::Z)).collect();
        let indexes: Vec<u32> = (0..points.len() as u32).collect();
        let materials = vec![0; points.len() / 3];
        Cluster::from_triangles(&verts, &indexes, &materials, 0..points.len() as u32 / 3, 0, 0)
    }

    fn mesh_bounds(clusters: &[Cluster]) -> Aabb {
        let mut b = Aabb::default();
        for c in clusters {
            b.include(&c.bounds);
        }
        b
    }

    #[test]
    fn test_requantize_is_identity() {
        let v = UVec3::new(123_456_789, 4_000_000_000, 77);
        for shift in [0, 5, 12, 22] {
            let q = quantize_uint(v, shift);
            assert_eq!(quantize_uint(q << shift, shift), q);
        }
        assert_eq!(quantize_uint(UVec3::splat(u32::MAX), 22), UVec3::splat(1023));
    }

    #[test]
    fn test_positions_fit_and_decode() {
        let mut clusters = vec![
            cluster(&[vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0)]),
            cluster(&[vec3(100.0, 0.0, 0.0), vec3(100.5, 0.0, 0.0), vec3(100.0, 0.5, 3.0)]),
        ];
        let bounds = mesh_bounds(&clusters);
        let report = quantize_positions(&mut clusters, &bounds, 0, 32);
        assert!(!report.fallback);

        for c in &clusters {
            let q = &c.quantized;
            assert_eq!(q.positions.len(), c.verts.len());
            for (i, v) in c.verts.iter().enumerate() {
                assert!(q.positions[i].max_element() <= POSITION_QUANTIZATION_MASK);
                let error = (q.decode(i) - v.position()).abs().max_element();
                assert!(error <= q.mesh_bounds_delta.max_element(), "{error}");

                let grid = q.grid_position(i);
                assert_eq!(quantize_uint(grid, q.shift), q.positions[i] + q.start);
            }
        }
    }

    #[test]
    fn test_shared_vertex_agrees() {
        // A small cluster and a large one share a corner.
        let shared = vec3(1.0, 1.0, 0.0);
        let mut clusters = vec![
            cluster(&[shared, vec3(1.001, 1.0, 0.0), vec3(1.0, 1.001, 0.0)]),
            cluster(&[shared, vec3(50.0, 0.0, 0.0), vec3(0.0, 50.0, 7.0)]),
        ];
        let bounds = mesh_bounds(&clusters);
        let report = quantize_positions(&mut clusters, &bounds, 0, 32);
        assert!(!report.fallback);
        assert!(report.iterations >= 2);

        let a = &clusters[0].quantized;
        let b = &clusters[1].quantized;
        assert!(a.shift < b.shift);
        assert_eq!(a.grid_position(0), b.grid_position(0));
        assert_eq!(a.decode(0), b.decode(0));
    }

    #[test]
    fn test_iteration_cap_falls_back() {
        let mut clusters = vec![cluster(&[
            vec3(0.0, 0.0, 0.0),
            vec3(1.0, 0.0, 0.0),
            vec3(0.0, 1.0, 0.0),
        ])];
        let bounds = mesh_bounds(&clusters);
        let report = quantize_positions(&mut clusters, &bounds, 0, 1);
        assert!(report.fallback);
        assert_eq!(clusters[0].quantized.shift, FALLBACK_SHIFT);
        assert!(clusters[0]
            .quantized
            .positions
            .iter()
            .all(|p| p.max_element() <= POSITION_QUANTIZATION_MASK));
    }

    #[test]
    fn test_min_shift_is_respected() {
        let mut clusters = vec![cluster(&[
            vec3(0.0, 0.0, 0.0),
            vec3(1.0, 0.0, 0.0),
            vec3(0.0, 1.0, 0.0),
        ])];
        let bounds = mesh_bounds(&clusters);
        quantize_positions(&mut clusters, &bounds, 20, 32);
        assert!(clusters[0].quantized.shift >= 20);
    }
}
