//! Greedy half edge collapse with position quadrics and attribute distances.
//!
//! Collapses run in passes. Each pass ranks every legal collapse by cost, then applies them in
//! order while skipping any collapse whose neighbourhood was already touched in that pass, so the
//! costs computed at the start of the pass stay exact.

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use common::{MeshVert, VertexFormat};
use glam::DVec3;

use super::{
    cluster::Cluster,
    quadric::{Plane, Quadric},
};

const DESIRED_TRIANGLE_SIZE: f32 = 0.25;
const THRESH_POINTS_ARE_SAME: f32 = 0.00002;
const THRESH_UVS_ARE_SAME: f32 = 1.0 / 1024.0;
const NORMAL_WEIGHT: f64 = 1.0;
const COLOR_WEIGHT: f64 = 0.0625;
/// Relative weight of the planes that keep open borders in place.
const BORDER_WEIGHT: f64 = 10.0;

fn exponent(f: f32) -> i32 {
    ((f.to_bits() >> 23) & 0xff) as i32 - 127
}

/// Power of two that brings the average triangle to roughly [`DESIRED_TRIANGLE_SIZE`].
pub fn position_scale(surface_area: f32, num_tris: usize) -> f32 {
    let size = (surface_area / num_tris.max(1) as f32)
        .sqrt()
        .max(THRESH_POINTS_ARE_SAME);
    2f32.powi(exponent(DESIRED_TRIANGLE_SIZE) - exponent(size))
}

#[derive(Debug, Clone)]
struct AttributeWeights {
    normal: f64,
    color: f64,
    uvs: Vec<f64>,
}

impl AttributeWeights {
    fn new(verts: &[MeshVert], tris: &[[u32; 3]], format: VertexFormat) -> Self {
        let num_tris = tris.len().max(1) as f32;
        let uvs = (0..format.num_uvs as usize)
            .map(|uv| {
                let area: f32 = tris
                    .iter()
                    .map(|t| {
                        let [a, b, c] = t.map(|i| verts[i as usize].uv(uv));
                        0.5 * (b - a).perp_dot(c - a).abs()
                    })
                    .sum();
                let size = (area / num_tris).sqrt().max(THRESH_UVS_ARE_SAME);
                1.0 / (128.0 * size as f64)
            })
            .collect();

        Self {
            normal: NORMAL_WEIGHT,
            color: if format.has_colors { COLOR_WEIGHT } else { 0.0 },
            uvs,
        }
    }

    fn distance_squared(&self, a: &MeshVert, b: &MeshVert) -> f64 {
        let mut d = (a.normal() - b.normal()).as_dvec3().length_squared() * self.normal * self.normal;
        if self.color > 0.0 {
            d += (a.color() - b.color()).as_dvec4().length_squared() * self.color * self.color;
        }
        for (uv, w) in self.uvs.iter().enumerate() {
            d += (a.uv(uv) - b.uv(uv)).as_dvec2().length_squared() * w * w;
        }
        d
    }
}

/// Adjacency rebuilt at the start of every pass.
struct PassContext {
    /// Live triangles around each position.
    pos_tris: Vec<Vec<usize>>,
    /// Directed position edges of live triangles.
    edges: HashMap<(u32, u32), u32>,
    border_count: Vec<u32>,
    locked: Vec<bool>,
}

impl PassContext {
    fn is_border(&self, p: u32, q: u32) -> bool {
        self.edges.contains_key(&(p, q)) != self.edges.contains_key(&(q, p))
    }
}

/// Ranking of a candidate collapse. Greater is better: lower cost, then the lower `(from, to)` pair.
#[derive(Clone, Copy, Debug)]
struct CollapseCost {
    cost: f64,
    from: u32,
    to: u32,
}

impl CollapseCost {
    fn new(cost: f64, from: u32, to: u32) -> Self {
        CollapseCost { cost, from, to }
    }

    fn error(&self) -> f64 {
        self.cost
    }
}

impl Ord for CollapseCost {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| (other.from, other.to).cmp(&(self.from, self.to)))
    }
}

impl PartialOrd for CollapseCost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CollapseCost {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CollapseCost {}

struct Collapse {
    from: u32,
    to: u32,
    /// Every wedge at `from` and the wedge at `to` it is replaced with.
    wedges: Vec<(u32, u32)>,
}

struct Simplifier<'a> {
    verts: &'a [MeshVert],
    weights: AttributeWeights,
    /// Scaled position of each vertex.
    positions: Vec<DVec3>,
    /// Lowest vertex sharing each vertex's position.
    pos_id: Vec<u32>,
    quadrics: Vec<Quadric>,
    input_locked: Vec<bool>,
    tris: Vec<[u32; 3]>,
    alive: Vec<bool>,
    num_alive: usize,
}

impl<'a> Simplifier<'a> {
    fn new(
        verts: &'a [MeshVert],
        indexes: &[u32],
        locked: &[bool],
        format: VertexFormat,
        scale: f32,
    ) -> Self {
        let tris: Vec<[u32; 3]> = indexes
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();

        let mut first_at = HashMap::new();
        let pos_id: Vec<u32> = verts
            .iter()
            .enumerate()
            .map(|(i, v)| *first_at.entry(v.position_key()).or_insert(i as u32))
            .collect();

        let positions: Vec<DVec3> = verts
            .iter()
            .map(|v| (v.position() * scale).as_dvec3())
            .collect();

        let mut input_locked = vec![false; verts.len()];
        for (v, &l) in locked.iter().enumerate() {
            if l {
                input_locked[pos_id[v] as usize] = true;
            }
        }

        let mut s = Self {
            weights: AttributeWeights::new(verts, &tris, format),
            verts,
            quadrics: vec![Quadric::default(); positions.len()],
            positions,
            pos_id,
            input_locked,
            alive: vec![true; tris.len()],
            num_alive: tris.len(),
            tris,
        };
        s.build_quadrics();
        s
    }

    fn pos(&self, v: u32) -> u32 {
        self.pos_id[v as usize]
    }

    fn build_quadrics(&mut self) {
        let mut directed = HashSet::new();
        for t in &self.tris {
            for k in 0..3 {
                directed.insert((self.pos(t[k]), self.pos(t[(k + 1) % 3])));
            }
        }

        for t in 0..self.tris.len() {
            let [a, b, c] = self.tris[t].map(|v| self.pos(v));
            let [pa, pb, pc] = [a, b, c].map(|p| self.positions[p as usize]);
            let Some(plane) = Plane::through_triangle(pa, pb, pc) else {
                continue;
            };
            let area = 0.5 * (pb - pa).cross(pc - pa).length();
            for p in [a, b, c] {
                self.quadrics[p as usize].add_plane(plane, area);
            }

            for (p, q) in [(a, b), (b, c), (c, a)] {
                if directed.contains(&(q, p)) {
                    continue;
                }
                let (pp, pq) = (self.positions[p as usize], self.positions[q as usize]);
                let edge = pq - pp;
                let Some(normal) = edge.cross(plane.normal).try_normalize() else {
                    continue;
                };
                let border = Plane::through_point(normal, pp);
                let weight = edge.length_squared() * BORDER_WEIGHT;
                self.quadrics[p as usize].add_plane(border, weight);
                self.quadrics[q as usize].add_plane(border, weight);
            }
        }
    }

    fn build_context(&mut self) -> PassContext {
        // Triangles that lost their area to earlier collapses.
        for t in 0..self.tris.len() {
            if !self.alive[t] || self.num_alive <= 1 {
                continue;
            }
            let [a, b, c] = self.tris[t].map(|v| self.pos(v));
            if a == b || b == c || c == a {
                self.alive[t] = false;
                self.num_alive -= 1;
            }
        }

        let n = self.positions.len();
        let mut pos_tris = vec![Vec::new(); n];
        let mut edges = HashMap::new();
        for t in (0..self.tris.len()).filter(|&t| self.alive[t]) {
            let p = self.tris[t].map(|v| self.pos(v));
            for k in 0..3 {
                pos_tris[p[k] as usize].push(t);
                *edges.entry((p[k], p[(k + 1) % 3])).or_insert(0) += 1;
            }
        }

        let mut ctx = PassContext {
            pos_tris,
            edges,
            border_count: vec![0; n],
            locked: self.input_locked.clone(),
        };

        let border_edges: Vec<(u32, u32)> = ctx
            .edges
            .keys()
            .filter(|&&(p, q)| !ctx.edges.contains_key(&(q, p)))
            .copied()
            .collect();
        for (p, q) in border_edges {
            ctx.border_count[p as usize] += 1;
            ctx.border_count[q as usize] += 1;
        }

        for p in 0..n {
            if ctx.pos_tris[p].is_empty() {
                continue;
            }
            let mut wedges: Vec<u32> = ctx.pos_tris[p]
                .iter()
                .flat_map(|&t| self.tris[t])
                .filter(|&v| self.pos(v) == p as u32)
                .collect();
            wedges.sort_unstable();
            wedges.dedup();

            // Non manifold borders and heavily split attributes stay put.
            let border = ctx.border_count[p];
            if wedges.len() > 2 || (border != 0 && border != 2) {
                ctx.locked[p] = true;
            }
        }
        ctx
    }

    fn evaluate(&self, ctx: &PassContext, from: u32, to: u32) -> Option<(f64, Collapse)> {
        if ctx.locked[from as usize] {
            return None;
        }
        // Border vertices may only slide along their border.
        if ctx.border_count[from as usize] > 0 && !ctx.is_border(from, to) {
            return None;
        }

        let mut wedges: Vec<(u32, u32)> = Vec::new();
        let mut all_wedges = Vec::new();
        let mut shared = 0;
        let mut opposite = Vec::new();
        for &t in &ctx.pos_tris[from as usize] {
            let tri = self.tris[t];
            let Some(wa) = tri.iter().copied().find(|&v| self.pos(v) == from) else {
                continue;
            };
            all_wedges.push(wa);
            let Some(wb) = tri.iter().copied().find(|&v| self.pos(v) == to) else {
                continue;
            };
            shared += 1;
            opposite.extend(
                tri.iter()
                    .map(|&v| self.pos(v))
                    .filter(|&p| p != from && p != to),
            );
            match wedges.iter().find(|(a, _)| *a == wa) {
                Some(&(_, b)) if b != wb => return None,
                Some(_) => (),
                None => wedges.push((wa, wb)),
            }
        }
        if shared == 0 || shared > 2 || self.num_alive <= shared {
            return None;
        }
        all_wedges.sort_unstable();
        all_wedges.dedup();
        if all_wedges.len() != wedges.len() {
            return None;
        }

        // Link condition: the only shared neighbours are the apexes of the collapsing triangles.
        let neighbours = |p: u32| -> HashSet<u32> {
            ctx.pos_tris[p as usize]
                .iter()
                .flat_map(|&t| self.tris[t].map(|v| self.pos(v)))
                .filter(|&q| q != p)
                .collect()
        };
        let common: HashSet<u32> = neighbours(from)
            .intersection(&neighbours(to))
            .copied()
            .collect();
        let opposite: HashSet<u32> = opposite.into_iter().collect();
        if common != opposite {
            return None;
        }

        // Reject collapses that flip a surviving triangle.
        let target = self.positions[to as usize];
        for &t in &ctx.pos_tris[from as usize] {
            let p = self.tris[t].map(|v| self.pos(v));
            if p.contains(&to) {
                continue;
            }
            let before = p.map(|q| self.positions[q as usize]);
            let after = p.map(|q| {
                if q == from {
                    target
                } else {
                    self.positions[q as usize]
                }
            });
            let n0 = (before[1] - before[0]).cross(before[2] - before[0]);
            let n1 = (after[1] - after[0]).cross(after[2] - after[0]);
            if n0.length_squared() > 0.0 && n0.dot(n1) <= 0.0 {
                return None;
            }
        }

        let mut quadric = self.quadrics[from as usize];
        quadric += self.quadrics[to as usize];
        let position_error = quadric.error(target);

        let attribute_error = wedges
            .iter()
            .map(|&(a, b)| {
                self.weights
                    .distance_squared(&self.verts[a as usize], &self.verts[b as usize])
            })
            .sum::<f64>()
            / wedges.len() as f64;

        Some((
            position_error + attribute_error,
            Collapse { from, to, wedges },
        ))
    }

    fn apply(&mut self, ctx: &PassContext, collapse: &Collapse) {
        for &t in &ctx.pos_tris[collapse.from as usize] {
            if !self.alive[t] {
                continue;
            }
            for v in self.tris[t].iter_mut() {
                if let Some(&(_, b)) = collapse.wedges.iter().find(|(a, _)| *a == *v) {
                    *v = b;
                }
            }
            let [a, b, c] = self.tris[t];
            if a == b || b == c || c == a {
                self.alive[t] = false;
                self.num_alive -= 1;
            }
        }

        let from = self.quadrics[collapse.from as usize];
        self.quadrics[collapse.to as usize] += from;
    }

    /// Run passes until at most `target` triangles remain or nothing more can collapse.
    /// Returns the largest collapse cost accepted.
    fn run(&mut self, target: usize) -> f64 {
        let mut max_error = 0.0f64;

        while self.num_alive > target {
            let ctx = self.build_context();
            if self.num_alive <= target {
                break;
            }

            let mut pairs: Vec<(u32, u32)> = ctx
                .edges
                .keys()
                .filter(|(p, q)| p != q)
                .map(|&(p, q)| (p.min(q), p.max(q)))
                .collect();
            pairs.sort_unstable();
            pairs.dedup();

            let mut candidates: Vec<(CollapseCost, Collapse)> = pairs
                .into_iter()
                .filter_map(|(p, q)| {
                    let forward = self.evaluate(&ctx, p, q);
                    let backward = self.evaluate(&ctx, q, p);
                    let best = match (forward, backward) {
                        (Some(f), Some(b)) => {
                            if CollapseCost::new(f.0, p, q) >= CollapseCost::new(b.0, q, p) {
                                f
                            } else {
                                b
                            }
                        }
                        (f, b) => f.or(b)?,
                    };
                    let key = CollapseCost::new(best.0, best.1.from, best.1.to);
                    Some((key, best.1))
                })
                .collect();
            candidates.sort_unstable_by(|a, b| b.0.cmp(&a.0));

            let mut dirty = vec![false; self.positions.len()];
            let mut collapsed = 0;
            for (cost, collapse) in &candidates {
                if self.num_alive <= target {
                    break;
                }
                if dirty[collapse.from as usize] || dirty[collapse.to as usize] {
                    continue;
                }

                for p in [collapse.from, collapse.to] {
                    for &t in &ctx.pos_tris[p as usize] {
                        for v in self.tris[t] {
                            dirty[self.pos(v) as usize] = true;
                        }
                    }
                }

                self.apply(&ctx, collapse);
                max_error = max_error.max(cost.error());
                collapsed += 1;
            }

            if collapsed == 0 {
                log::debug!(
                    "Simplification stalled at {} triangles, target {target}",
                    self.num_alive
                );
                break;
            }
        }
        max_error
    }
}

/// Simplify an indexed mesh in place to at most `target_tris` triangles where possible.
///
/// Vertices flagged in `locked` never move. Returns the largest error introduced, in the units of
/// the input positions, or 0 when the mesh is already small enough.
pub fn simplify(
    verts: &mut Vec<MeshVert>,
    indexes: &mut Vec<u32>,
    material_indexes: &mut Vec<u32>,
    locked: &[bool],
    format: VertexFormat,
    target_tris: usize,
    surface_area: f32,
) -> f32 {
    let num_tris = indexes.len() / 3;
    let target_tris = target_tris.max(1);
    if num_tris <= target_tris {
        return 0.0;
    }

    let scale = position_scale(surface_area, num_tris);
    let mut simplifier = Simplifier::new(verts, indexes, locked, format, scale);
    let error = simplifier.run(target_tris);

    let mut new_index = vec![u32::MAX; verts.len()];
    let mut used = vec![false; verts.len()];
    let kept: Vec<usize> = (0..simplifier.tris.len())
        .filter(|&t| simplifier.alive[t])
        .collect();
    for &t in &kept {
        for v in simplifier.tris[t] {
            used[v as usize] = true;
        }
    }

    let mut new_verts = Vec::with_capacity(verts.len());
    for (v, _) in used.iter().enumerate().filter(|&(_, &u)| u) {
        new_index[v] = new_verts.len() as u32;
        let mut vert = verts[v];
        vert.normal = glam::Vec3::from(vert.normal)
            .try_normalize()
            .unwrap_or(glam::Vec3::Z)
            .into();
        vert.color = vert.color.map(|c| c.clamp(0.0, 1.0));
        new_verts.push(vert);
    }

    *indexes = kept
        .iter()
        .flat_map(|&t| simplifier.tris[t].map(|v| new_index[v as usize]))
        .collect();
    *material_indexes = kept.iter().map(|&t| material_indexes[t]).collect();
    *verts = new_verts;

    (error.sqrt() / scale as f64) as f32
}

impl Cluster {
    /// Simplify towards `target_tris`, keeping edges shared with clusters outside the group fixed.
    pub fn simplify(&mut self, target_tris: usize, format: VertexFormat, lock_mesh_borders: bool) -> f32 {
        let mut locked = self.locked_vertices();
        if lock_mesh_borders {
            for (edge, _) in self.boundary_edges.iter().enumerate().filter(|&(_, &b)| b) {
                let tri = edge / 3;
                locked[self.indexes[edge] as usize] = true;
                locked[self.indexes[tri * 3 + (edge % 3 + 1) % 3] as usize] = true;
            }
        }

        let error = simplify(
            &mut self.verts,
            &mut self.indexes,
            &mut self.material_indexes,
            &locked,
            format,
            target_tris,
            self.surface_area,
        );

        self.external_edges = vec![0; self.indexes.len()];
        self.find_boundary_edges();
        self.bound();
        error
    }
}
