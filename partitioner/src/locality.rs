use common::{morton_xyz, Aabb};
use glam::Vec3;

use crate::{Graph, PartitioningError};

/// Link every item to its nearest spatial neighbour on a different island, found by scanning a
/// window of `neighbours` items either side in Morton order.
///
/// Lets the partitioner pull together geometry that is close but not topologically connected.
/// Nothing is added when every item shares one island.
pub fn add_locality_links(
    graph: &mut Graph,
    centers: &[Vec3],
    island_of: &[u32],
    neighbours: usize,
    weight: u32,
) -> Result<(), PartitioningError> {
    debug_assert_eq!(centers.len(), graph.len());
    debug_assert_eq!(island_of.len(), graph.len());

    let Some(&first) = island_of.first() else {
        return Ok(());
    };
    if island_of.iter().all(|&i| i == first) {
        return Ok(());
    }

    let bounds = Aabb::from_points(centers.iter().copied());
    let mut sorted: Vec<(u32, u32)> = centers
        .iter()
        .enumerate()
        .map(|(i, &c)| (morton_xyz(c, &bounds), i as u32))
        .collect();
    sorted.sort_unstable();

    for (at, &(_, item)) in sorted.iter().enumerate() {
        let lo = at.saturating_sub(neighbours);
        let hi = (at + neighbours + 1).min(sorted.len());

        let mut closest: Option<(f32, u32)> = None;
        for &(_, other) in &sorted[lo..hi] {
            if island_of[other as usize] == island_of[item as usize] {
                continue;
            }
            let d = centers[item as usize].distance_squared(centers[other as usize]);
            // Lowest index wins ties.
            let better = match closest {
                None => true,
                Some((best, best_i)) => d < best || (d == best && other < best_i),
            };
            if better {
                closest = Some((d, other));
            }
        }

        if let Some((_, other)) = closest {
            graph.add_locality_edge(item, other, weight)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use glam::vec3;

    use super::*;

    #[test]
    fn test_links_nearest_other_island() {
        let centers = [
            vec3(0.0, 0.0, 0.0),
            vec3(0.1, 0.0, 0.0),
            vec3(5.0, 0.0, 0.0),
            vec3(0.3, 0.0, 0.0),
        ];
        let mut graph = Graph::with_vertices(4);
        add_locality_links(&mut graph, &centers, &[0, 0, 2, 3], 16, 1).unwrap();

        // 0 and 1 share an island, so both reach for 3.
        assert!(graph.vertices[0].has_neighbour(3));
        assert!(graph.vertices[1].has_neighbour(3));
        assert!(!graph.vertices[0].has_neighbour(1));
        assert!(graph.vertices[2].has_neighbour(3));
    }

    #[test]
    fn test_single_island_untouched() {
        let centers = [Vec3::ZERO, Vec3::ONE];
        let mut graph = Graph::with_vertices(2);
        add_locality_links(&mut graph, &centers, &[0, 0], 16, 1).unwrap();
        assert_eq!(graph.edge_count(), 0);
    }
}
