use std::collections::VecDeque;

use crate::PartitioningError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GraphEdge {
    pub dst: u32,
    pub weight: u32,
    /// Spatial proximity link rather than shared topology.
    pub locality: bool,
}

#[derive(Clone, Debug, Default)]
pub struct GraphVertex {
    pub edges: Vec<GraphEdge>,
}

impl GraphVertex {
    pub fn weigh_to(&self, ox: u32) -> u32 {
        self.edges
            .iter()
            .find(|e| e.dst == ox)
            .map_or(0, |e| e.weight)
    }

    pub fn has_neighbour(&self, ox: u32) -> bool {
        self.edges.iter().any(|e| e.dst == ox)
    }

    /// Sum of all edge weights.
    pub fn degree(&self) -> u64 {
        self.edges.iter().map(|e| e.weight as u64).sum()
    }
}

/// Undirected weighted graph stored as symmetric adjacency lists.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub vertices: Vec<GraphVertex>,
}

impl Graph {
    pub fn with_vertices(count: usize) -> Self {
        Self {
            vertices: vec![GraphVertex::default(); count],
        }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.vertices.iter().map(|v| v.edges.len()).sum::<usize>() / 2
    }

    fn check(&self, a: u32, b: u32) -> Result<(), PartitioningError> {
        let n = self.vertices.len() as u32;
        if a >= n || b >= n || a == b {
            return Err(PartitioningError::InvalidEdge { vertex: a, dst: b });
        }
        Ok(())
    }

    fn link(&mut self, a: u32, b: u32, weight: u32, locality: bool) {
        let edges = &mut self.vertices[a as usize].edges;
        match edges.iter_mut().find(|e| e.dst == b) {
            Some(e) => e.weight += weight,
            None => edges.push(GraphEdge {
                dst: b,
                weight,
                locality,
            }),
        }
    }

    /// Add `weight` between `a` and `b`, accumulating onto an existing edge.
    pub fn add_edge(&mut self, a: u32, b: u32, weight: u32) -> Result<(), PartitioningError> {
        self.check(a, b)?;
        self.link(a, b, weight, false);
        self.link(b, a, weight, false);
        Ok(())
    }

    /// Add a proximity link. Vertices already joined by any edge are left alone.
    pub fn add_locality_edge(
        &mut self,
        a: u32,
        b: u32,
        weight: u32,
    ) -> Result<(), PartitioningError> {
        self.check(a, b)?;
        if !self.vertices[a as usize].has_neighbour(b) {
            self.link(a, b, weight, true);
            self.link(b, a, weight, true);
        }
        Ok(())
    }

    /// Summed weights of all edges between differing parts. `part_of` maps vertex to part.
    pub fn calculate_edge_cut(&self, part_of: &[u32]) -> u64 {
        let mut edge_cut = 0;
        for (i, v) in self.vertices.iter().enumerate() {
            for e in &v.edges {
                if part_of[i] != part_of[e.dst as usize] {
                    edge_cut += e.weight as u64;
                }
            }
        }
        edge_cut / 2
    }

    /// Size of each part, indexed by part.
    pub fn partition_sizes(&self, part_of: &[u32]) -> Vec<u32> {
        let mut sizes = vec![0u32; part_of.iter().max().map_or(0, |&m| m as usize + 1)];
        for &p in part_of {
            sizes[p as usize] += 1;
        }
        sizes
    }

    /// Number of directly connected patches within `part`. Ideally 1.
    pub fn count_partition_parts(&self, part_of: &[u32], part: u32) -> u32 {
        let mut parts = 0;
        let mut visited = vec![false; self.vertices.len()];
        let mut queue = VecDeque::new();

        for start in 0..self.vertices.len() {
            if part_of[start] != part || visited[start] {
                continue;
            }
            // Each new starting point means that we have one part more.
            parts += 1;
            visited[start] = true;
            queue.push_back(start);

            while let Some(vx) = queue.pop_front() {
                for e in &self.vertices[vx].edges {
                    let dst = e.dst as usize;
                    if !e.locality && !visited[dst] && part_of[dst] == part {
                        visited[dst] = true;
                        queue.push_back(dst);
                    }
                }
            }
        }
        parts
    }
}
