use std::{cmp::Reverse, ops::Range};

use metis::{Idx, Real};
use priority_queue::PriorityQueue;

use crate::{Graph, PartitioningError};

/// Part counts at or above this always bisect with the loose imbalance factor.
const LOOSE_PART_COUNT: usize = 128;
/// `METIS_OPTION_UFACTOR` when the size window leaves slack, in thousandths.
const LOOSE_UFACTOR: Idx = 200;
const TIGHT_UFACTOR: Idx = 1;

/// Tuning for the recursive bisection partitioner.
/// [`None`] values resolve to the defaults below, or to the METIS default where noted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitioningConfig {
    /// Specifies the number of iterations for the refinement algorithms at each stage of the uncoarsening process.
    /// METIS default is 10.
    /// `METIS_OPTION_NITER`
    pub refinement_iterations: Option<i32>,
    /// Specifies the seed for the random number generator.
    /// Default is 42, so that repeated builds produce identical parts.
    /// `METIS_OPTION_SEED`
    pub rng_seed: Option<i32>,
    /// Items scanned either side in Morton order when adding locality links.
    /// Default is 16.
    pub locality_neighbours: Option<usize>,
}

impl PartitioningConfig {
    pub const DEFAULT_RNG_SEED: i32 = 42;
    pub const DEFAULT_LOCALITY_NEIGHBOURS: usize = 16;

    pub fn rng_seed(&self) -> i32 {
        self.rng_seed.unwrap_or(Self::DEFAULT_RNG_SEED)
    }

    pub fn locality_neighbours(&self) -> usize {
        self.locality_neighbours
            .unwrap_or(Self::DEFAULT_LOCALITY_NEIGHBOURS)
    }

    /// Split `graph` into parts of `min_size..=max_size` vertices, minimising the weight of cut edges.
    ///
    /// Fewer than `min_size` vertices produce one undersized part. When the sizes cannot all be
    /// honoured, `max_size` always is and `min_size` is relaxed.
    pub fn partition_strict(
        &self,
        graph: &Graph,
        min_size: usize,
        max_size: usize,
    ) -> Result<Partition, PartitioningError> {
        if max_size == 0 || min_size > max_size {
            return Err(PartitioningError::InvalidSizes {
                min: min_size,
                max: max_size,
            });
        }

        let mut indexes: Vec<u32> = (0..graph.len() as u32).collect();
        let mut ranges = Vec::with_capacity(graph.len().div_ceil(max_size));

        if graph.len() < min_size && !graph.is_empty() {
            log::trace!(
                "Partitioning {} items below minimum part size {min_size}",
                graph.len()
            );
        }

        let mut bisector = Bisector {
            graph,
            config: self,
            local: vec![u32::MAX; graph.len()],
        };
        bisector.recurse(&mut indexes, 0, min_size, max_size, &mut ranges)?;

        Ok(Partition { indexes, ranges })
    }
}

/// Items reordered so that each part is a contiguous range of `indexes`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub indexes: Vec<u32>,
    pub ranges: Vec<Range<usize>>,
}

impl Partition {
    pub fn num_parts(&self) -> usize {
        self.ranges.len()
    }

    pub fn part(&self, i: usize) -> &[u32] {
        &self.indexes[self.ranges[i].clone()]
    }

    pub fn parts(&self) -> impl Iterator<Item = &[u32]> + '_ {
        self.ranges.iter().map(|r| &self.indexes[r.clone()])
    }

    /// Part of every item, indexed by item.
    pub fn part_of(&self) -> Vec<u32> {
        let mut part_of = vec![0; self.indexes.len()];
        for (p, part) in self.parts().enumerate() {
            for &i in part {
                part_of[i as usize] = p as u32;
            }
        }
        part_of
    }
}

/// Compressed adjacency of the items being bisected, in the layout METIS expects.
/// Neighbours of each item are sorted by local index.
#[derive(Debug, Default)]
struct LocalGraph {
    xadj: Vec<Idx>,
    adjncy: Vec<Idx>,
    adjwgt: Vec<Idx>,
}

impl LocalGraph {
    fn len(&self) -> usize {
        self.xadj.len() - 1
    }

    fn neighbours(&self, v: usize) -> impl Iterator<Item = (usize, i64)> + '_ {
        let r = self.xadj[v] as usize..self.xadj[v + 1] as usize;
        self.adjncy[r.clone()]
            .iter()
            .zip(&self.adjwgt[r])
            .map(|(&u, &w)| (u as usize, w as i64))
    }
}

struct Bisector<'a> {
    graph: &'a Graph,
    config: &'a PartitioningConfig,
    /// Graph vertex to position in the current item slice.
    local: Vec<u32>,
}

impl Bisector<'_> {
    fn recurse(
        &mut self,
        items: &mut [u32],
        offset: usize,
        min_size: usize,
        max_size: usize,
        ranges: &mut Vec<Range<usize>>,
    ) -> Result<(), PartitioningError> {
        let n = items.len();
        if n == 0 {
            return Ok(());
        }
        if n <= max_size {
            ranges.push(offset..offset + n);
            return Ok(());
        }

        let num_parts = n.div_ceil(max_size);
        let left_parts = num_parts / 2;
        let right_parts = num_parts - left_parts;

        // Left side must itself split into `left_parts` parts of legal size, and so must the right.
        let mut lo = n.saturating_sub(right_parts * max_size).max(left_parts * min_size);
        let mut hi = (left_parts * max_size).min(n.saturating_sub(right_parts * min_size));
        if lo > hi {
            lo = n.saturating_sub(right_parts * max_size);
            hi = left_parts * max_size;
        }
        let lo = lo.max(1);
        let hi = hi.min(n - 1);
        let target = (n * left_parts / num_parts).clamp(lo, hi);

        let loose = num_parts >= LOOSE_PART_COUNT || max_size / min_size.max(1) > 1;
        let left = self.bisect(items, lo, hi, target, loose)?;

        let mut split: Vec<u32> = items
            .iter()
            .zip(&left)
            .filter(|&(_, &l)| l)
            .map(|(&i, _)| i)
            .collect();
        let k = split.len();
        split.extend(
            items
                .iter()
                .zip(&left)
                .filter(|&(_, &l)| !l)
                .map(|(&i, _)| i),
        );
        items.copy_from_slice(&split);

        let (a, b) = items.split_at_mut(k);
        self.recurse(a, offset, min_size, max_size, ranges)?;
        self.recurse(b, offset + k, min_size, max_size, ranges)
    }

    fn local_graph(&mut self, items: &[u32]) -> LocalGraph {
        for (l, &g) in items.iter().enumerate() {
            self.local[g as usize] = l as u32;
        }

        let mut local = LocalGraph {
            xadj: Vec::with_capacity(items.len() + 1),
            ..Default::default()
        };
        let mut row = Vec::new();
        for &g in items {
            local.xadj.push(local.adjncy.len() as Idx);

            row.clear();
            row.extend(self.graph.vertices[g as usize].edges.iter().filter_map(|e| {
                let l = self.local[e.dst as usize];
                (l != u32::MAX).then_some((l as Idx, e.weight.clamp(1, Idx::MAX as u32) as Idx))
            }));
            row.sort_unstable();

            for &(u, w) in &row {
                local.adjncy.push(u);
                local.adjwgt.push(w);
            }
        }
        local.xadj.push(local.adjncy.len() as Idx);

        for &g in items {
            self.local[g as usize] = u32::MAX;
        }
        local
    }

    /// Choose a left side of `lo..=hi` items, aiming for `target`.
    fn bisect(
        &mut self,
        items: &[u32],
        lo: usize,
        hi: usize,
        target: usize,
        loose: bool,
    ) -> Result<Vec<bool>, PartitioningError> {
        let local = self.local_graph(items);
        let n = local.len();

        let mut left: Vec<bool> = if local.adjncy.is_empty() {
            // Nothing to cut, so keep input order.
            (0..n).map(|v| v < target).collect()
        } else {
            let left_weight = target as Real / n as Real;
            let tpwgts = [left_weight, 1.0 - left_weight];
            let mut part = vec![0 as Idx; n];

            let mut metis_graph = metis::Graph::new(1, 2, &local.xadj, &local.adjncy)
                .map_err(|e| PartitioningError::Metis(e.to_string()))?
                .set_adjwgt(&local.adjwgt)
                .set_tpwgts(&tpwgts)
                .set_option(metis::option::Seed(self.config.rng_seed()))
                .set_option(metis::option::UFactor(if loose {
                    LOOSE_UFACTOR
                } else {
                    TIGHT_UFACTOR
                }));
            if let Some(iterations) = self.config.refinement_iterations {
                metis_graph = metis_graph.set_option(metis::option::NIter(iterations));
            }
            let edge_cut = metis_graph
                .part_recursive(&mut part)
                .map_err(|e| PartitioningError::Metis(e.to_string()))?;
            log::trace!("Bisected {n} items toward {target}, cut {edge_cut}");

            part.iter().map(|&p| p == 0).collect()
        };

        rebalance(&local, &mut left, lo, hi);
        Ok(left)
    }
}

/// Reduction in cut weight from moving `v` to the other side.
fn gain(graph: &LocalGraph, left: &[bool], v: usize) -> i64 {
    graph
        .neighbours(v)
        .map(|(u, w)| if left[u] == left[v] { -w } else { w })
        .sum()
}

/// Move the cheapest vertices across until the left side holds `lo..=hi` items.
/// Ties go to the lowest item.
fn rebalance(graph: &LocalGraph, left: &mut [bool], lo: usize, hi: usize) {
    let mut count = left.iter().filter(|&&l| l).count();
    if (lo..=hi).contains(&count) {
        return;
    }

    // Grow the left side when short, shrink it when over.
    let from_left = count > hi;
    let mut queue = PriorityQueue::new();
    for v in 0..graph.len() {
        if left[v] == from_left {
            queue.push(v, (gain(graph, left, v), Reverse(v)));
        }
    }

    while !(lo..=hi).contains(&count) {
        let Some((v, _)) = queue.pop() else {
            break;
        };
        left[v] = !from_left;
        if from_left {
            count -= 1;
        } else {
            count += 1;
        }

        for (u, _) in graph.neighbours(v) {
            if left[u] == from_left {
                queue.change_priority(&u, (gain(graph, left, u), Reverse(u)));
            }
        }
    }
}

#[cfg(test)]
pub mod test {
    use std::error::Error;

    use super::*;

    /// `w` by `h` grid of items with 4-neighbour edges.
    pub fn grid_graph(w: u32, h: u32) -> Graph {
        let mut g = Graph::with_vertices((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                if x + 1 < w {
                    g.add_edge(i, i + 1, 1).unwrap();
                }
                if y + 1 < h {
                    g.add_edge(i, i + w, 1).unwrap();
                }
            }
        }
        g
    }

    fn assert_covers(p: &Partition, n: usize) {
        let mut seen = p.indexes.clone();
        seen.sort();
        assert_eq!(seen, (0..n as u32).collect::<Vec<_>>());
        assert_eq!(p.ranges.iter().map(|r| r.len()).sum::<usize>(), n);
        for w in p.ranges.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
    }

    #[test]
    fn test_grid_part_sizes() -> Result<(), Box<dyn Error>> {
        let g = grid_graph(20, 10);
        let p = PartitioningConfig::default().partition_strict(&g, 8, 32)?;

        assert_covers(&p, 200);
        assert!(p.num_parts() >= 200 / 32);
        for r in &p.ranges {
            assert!((8..=32).contains(&r.len()), "{r:?}");
        }

        // Far below the 370 edges of the grid.
        assert!(g.calculate_edge_cut(&p.part_of()) < 150);
        Ok(())
    }

    #[test]
    fn test_two_islands_split_cleanly() -> Result<(), Box<dyn Error>> {
        let mut g = grid_graph(4, 4);
        let offset = g.len() as u32;
        g.vertices.extend(grid_graph(4, 4).vertices.into_iter().map(|mut v| {
            v.edges.iter_mut().for_each(|e| e.dst += offset);
            v
        }));
        g.add_locality_edge(3, offset, 1)?;

        let p = PartitioningConfig::default().partition_strict(&g, 8, 16)?;

        assert_eq!(p.num_parts(), 2);
        let part_of = p.part_of();
        assert_eq!(g.calculate_edge_cut(&part_of), 1);
        Ok(())
    }

    #[test]
    fn test_undersized_single_part() {
        let g = grid_graph(2, 2);
        let p = PartitioningConfig::default()
            .partition_strict(&g, 8, 32)
            .unwrap();
        assert_eq!(p.ranges, vec![0..4]);

        let empty = PartitioningConfig::default()
            .partition_strict(&Graph::default(), 8, 32)
            .unwrap();
        assert!(empty.ranges.is_empty());
    }

    #[test]
    fn test_edgeless_items() {
        let g = Graph::with_vertices(300);
        let p = PartitioningConfig::default()
            .partition_strict(&g, 124, 128)
            .unwrap();
        assert_covers(&p, 300);
        assert!(p.ranges.iter().all(|r| r.len() <= 128));
    }

    #[test]
    fn test_deterministic() {
        let g = grid_graph(33, 17);
        let a = PartitioningConfig::default().partition_strict(&g, 8, 32);
        let b = PartitioningConfig::default().partition_strict(&g, 8, 32);
        assert_eq!(a, b);
    }

    #[test]
    fn test_seeded_partition_is_repeatable() -> Result<(), Box<dyn Error>> {
        let g = grid_graph(40, 25);
        let config = PartitioningConfig {
            rng_seed: Some(7),
            refinement_iterations: Some(4),
            ..Default::default()
        };
        let a = config.partition_strict(&g, 24, 32)?;
        let b = config.clone().partition_strict(&g, 24, 32)?;

        assert_eq!(a, b);
        assert_covers(&a, 1000);
        assert!(a.ranges.iter().all(|r| r.len() <= 32));
        Ok(())
    }

    #[test]
    fn test_rebalance_moves_cheapest_first() {
        // Path 0 - 1 - 2 - 3 - 4 - 5 with everything on the right.
        let mut g = Graph::with_vertices(6);
        for i in 0..5 {
            g.add_edge(i, i + 1, 1).unwrap();
        }
        let mut bisector = Bisector {
            graph: &g,
            config: &PartitioningConfig::default(),
            local: vec![u32::MAX; 6],
        };
        let local = bisector.local_graph(&[0, 1, 2, 3, 4, 5]);
        assert_eq!(local.xadj, vec![0, 1, 3, 5, 7, 9, 10]);

        let mut left = vec![false; 6];
        rebalance(&local, &mut left, 3, 3);

        // Ends cost one edge, then each neighbour of the grown side costs nothing.
        assert_eq!(left.iter().filter(|&&l| l).count(), 3);
        assert_eq!(left, vec![true, true, true, false, false, false]);
        assert_eq!(g.calculate_edge_cut(&[0, 0, 0, 1, 1, 1]), 1);
    }

    #[test]
    fn test_invalid_sizes() {
        let g = grid_graph(2, 2);
        assert_eq!(
            PartitioningConfig::default().partition_strict(&g, 9, 8),
            Err(PartitioningError::InvalidSizes { min: 9, max: 8 })
        );
    }
}
