use std::collections::HashMap;

use common::MeshVert;
use partitioner::DisjointSet;
use rayon::prelude::*;

/// Directed edge `3 * triangle + corner`, running from `corner` to the next corner.
pub type EdgeIndex = u32;

pub fn edge_positions(verts: &[MeshVert], indexes: &[u32], edge: EdgeIndex) -> ([u32; 3], [u32; 3]) {
    let tri = edge as usize / 3;
    let corner = edge as usize % 3;
    let v0 = indexes[tri * 3 + corner] as usize;
    let v1 = indexes[tri * 3 + (corner + 1) % 3] as usize;
    (verts[v0].position_key(), verts[v1].position_key())
}

/// Opposite edge matching over a triangle soup, keyed on exact positions so welded and unwelded
/// vertices behave the same.
#[derive(Debug, Clone)]
pub struct EdgeTopology {
    /// Lowest index opposite edge, or `None` on a boundary or zero length edge.
    pub direct: Vec<Option<EdgeIndex>>,
    /// Further opposite edges where more than two triangles meet.
    pub extended: HashMap<EdgeIndex, Vec<EdgeIndex>>,
}

impl EdgeTopology {
    pub fn new(verts: &[MeshVert], indexes: &[u32]) -> Self {
        let num_edges = indexes.len() as u32;

        // Inserted in index order, so every bucket is sorted.
        let mut hash: HashMap<([u32; 3], [u32; 3]), Vec<EdgeIndex>> =
            HashMap::with_capacity(indexes.len());
        for edge in 0..num_edges {
            let (p0, p1) = edge_positions(verts, indexes, edge);
            if p0 != p1 {
                hash.entry((p0, p1)).or_default().push(edge);
            }
        }

        let matches: Vec<&[EdgeIndex]> = (0..num_edges)
            .into_par_iter()
            .map(|edge| {
                let (p0, p1) = edge_positions(verts, indexes, edge);
                if p0 == p1 {
                    return &[][..];
                }
                hash.get(&(p1, p0)).map_or(&[][..], |m| m.as_slice())
            })
            .collect();

        let mut extended = HashMap::new();
        let direct = matches
            .iter()
            .enumerate()
            .map(|(edge, m)| {
                if m.len() > 1 {
                    extended.insert(edge as EdgeIndex, m[1..].to_vec());
                }
                m.first().copied()
            })
            .collect();

        Self { direct, extended }
    }

    pub fn num_edges(&self) -> usize {
        self.direct.len()
    }

    pub fn is_boundary(&self, edge: EdgeIndex) -> bool {
        self.direct[edge as usize].is_none()
    }

    /// Visit every opposite edge of `edge`, lowest first.
    pub fn for_all_opposite(&self, edge: EdgeIndex, mut f: impl FnMut(EdgeIndex)) {
        if let Some(direct) = self.direct[edge as usize] {
            f(direct);
            if let Some(extra) = self.extended.get(&edge) {
                extra.iter().copied().for_each(f);
            }
        }
    }

    /// Connected components of triangles joined through shared edges.
    pub fn islands(&self) -> DisjointSet {
        let mut set = DisjointSet::new(self.direct.len() / 3);
        for edge in 0..self.direct.len() as u32 {
            self.for_all_opposite(edge, |other| set.union(edge / 3, other / 3));
        }
        set
    }
}
