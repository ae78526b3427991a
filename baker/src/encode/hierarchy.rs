//! The culling hierarchy: a 64 way tree over group parts, built bottom up with k-means.

use common::{
    packed::{PackedHierarchyNode, PackedHierarchyNodeMisc},
    BoundingSphere, INVALID_INDEX, MAX_CLUSTERS_PER_GROUP, MAX_CLUSTERS_PER_GROUP_BITS,
    MAX_GROUP_PARTS_BITS, MAX_HIERARCHY_CHILDREN,
};
use glam::Vec3;
use half::f16;
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::pages::{remove_root_pages, GroupPart};
use crate::lod::ClusterDag;

const KMEANS_SEED: u64 = 1234;
const KMEANS_ITERATIONS: usize = 10;

/// Tree under construction. Nodes index into a flat list, children before parents.
#[derive(Debug, Clone)]
enum Node {
    GroupPart { part: u32, bound: BoundingSphere },
    /// A node whose children are all group parts.
    Leaf { children: Vec<usize>, bound: BoundingSphere },
    InnerNode { children: Vec<usize>, bound: BoundingSphere },
}

impl Node {
    fn bound(&self) -> &BoundingSphere {
        match self {
            Node::GroupPart { bound, .. } | Node::Leaf { bound, .. } | Node::InnerNode { bound, .. } => bound,
        }
    }

    fn with_children(nodes: &[Node], children: Vec<usize>) -> Node {
        let bound = BoundingSphere::from_spheres(children.iter().map(|&c| nodes[c].bound()));
        if children.iter().all(|&c| matches!(nodes[c], Node::GroupPart { .. })) {
            Node::Leaf { children, bound }
        } else {
            Node::InnerNode { children, bound }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    bounds: BoundingSphere,
    lod_bounds: BoundingSphere,
    min_lod_error: f32,
    max_parent_lod_error: f32,
    child_start: u32,
    /// Zero for an unused slot.
    num_children: u32,
    part: Option<u32>,
}

#[derive(Debug, Clone, Default)]
struct HierarchyNode {
    slots: Vec<Slot>,
}

/// Group `count` nodes starting at `base` into `count / 64` clusters of exactly 64 by proximity.
fn kmeans(nodes: &[Node], base: usize, count: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let num_clusters = count / MAX_HIERARCHY_CHILDREN;
    let center = |i: usize| nodes[base + i].bound().center();

    let mut centers: Vec<Vec3> = (0..num_clusters)
        .map(|_| center(rng.gen_range(0..count)))
        .collect();
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); num_clusters];

    for _ in 0..KMEANS_ITERATIONS {
        let mut sums = vec![Vec3::ZERO; num_clusters];
        members.iter_mut().for_each(Vec::clear);

        for node in 0..count {
            let p = center(node);
            let best = (0..num_clusters)
                .filter(|&c| members[c].len() < MAX_HIERARCHY_CHILDREN)
                .min_by(|&a, &b| {
                    p.distance_squared(centers[a])
                        .total_cmp(&p.distance_squared(centers[b]))
                })
                .unwrap_or(node % num_clusters);
            sums[best] += p;
            members[best].push(node);
        }

        for (c, sum) in centers.iter_mut().zip(sums) {
            *c = sum / MAX_HIERARCHY_CHILDREN as f32;
        }
    }
    members
}

/// Flat node list ending in the root.
fn build_tree(parts: &[GroupPart]) -> Vec<Node> {
    let mut nodes: Vec<Node> = parts
        .iter()
        .enumerate()
        .map(|(i, p)| Node::GroupPart {
            part: i as u32,
            bound: p.bounds,
        })
        .collect();
    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);

    let mut base = 0;
    let mut level_len = nodes.len();
    while level_len > MAX_HIERARCHY_CHILDREN {
        let in_clusters = level_len.div_ceil(MAX_HIERARCHY_CHILDREN);
        let out_clusters = (in_clusters * 7 / 8).max(1);
        let out_nodes = out_clusters * MAX_HIERARCHY_CHILDREN;

        // Smallest nodes are merged first, large ones wait for a coarser level.
        nodes[base..].sort_by(|a, b| a.bound().radius().total_cmp(&b.bound().radius()));

        for members in kmeans(&nodes, base, out_nodes, &mut rng) {
            debug_assert_eq!(members.len(), MAX_HIERARCHY_CHILDREN);
            let children = members.into_iter().map(|m| base + m).collect();
            let node = Node::with_children(&nodes, children);
            nodes.push(node);
        }

        base += out_nodes;
        level_len = level_len - out_nodes + out_clusters;
    }

    if level_len > 1 || parts.len() == 1 {
        let node = Node::with_children(&nodes, (base..base + level_len).collect());
        nodes.push(node);
    }
    nodes
}

/// Write `node` and everything below it, depth first. Returns the written node's index.
fn write_node(
    out: &mut Vec<HierarchyNode>,
    nodes: &[Node],
    node: usize,
    dag: &ClusterDag,
    parts: &mut [GroupPart],
) -> u32 {
    let (Node::Leaf { children, .. } | Node::InnerNode { children, .. }) = &nodes[node] else {
        unreachable!("group parts are written by their parent");
    };
    debug_assert!(!children.is_empty() && children.len() <= MAX_HIERARCHY_CHILDREN);

    let index = out.len() as u32;
    out.push(HierarchyNode::default());

    for (child_index, &child) in children.iter().enumerate() {
        let slot = match &nodes[child] {
            Node::GroupPart { part, bound } => {
                let p = &mut parts[*part as usize];
                let group = dag.group(p.group_index);
                p.hierarchy_node_index = index;
                p.hierarchy_child_index = child_index as u32;
                Slot {
                    bounds: *bound,
                    lod_bounds: group.lod_bounds,
                    min_lod_error: group.min_lod_error,
                    max_parent_lod_error: group.max_parent_lod_error,
                    child_start: INVALID_INDEX,
                    num_children: p.clusters.len() as u32,
                    part: Some(*part),
                }
            }
            Node::Leaf { .. } | Node::InnerNode { .. } => {
                let child_node = write_node(out, nodes, child, dag, parts);
                let grandchildren = &out[child_node as usize].slots;
                Slot {
                    bounds: BoundingSphere::from_spheres(grandchildren.iter().map(|s| &s.bounds)),
                    lod_bounds: BoundingSphere::from_spheres(
                        grandchildren.iter().map(|s| &s.lod_bounds),
                    ),
                    min_lod_error: grandchildren
                        .iter()
                        .map(|s| s.min_lod_error)
                        .fold(f32::MAX, f32::min),
                    max_parent_lod_error: grandchildren
                        .iter()
                        .map(|s| s.max_parent_lod_error)
                        .fold(0.0, f32::max),
                    child_start: child_node,
                    num_children: MAX_CLUSTERS_PER_GROUP,
                    part: None,
                }
            }
        };
        out[index as usize].slots.push(slot);
    }
    index
}

fn pack_node(node: &HierarchyNode, dag: &ClusterDag, parts: &[GroupPart]) -> PackedHierarchyNode {
    let mut packed: PackedHierarchyNode = bytemuck::Zeroable::zeroed();
    for (i, slot) in node.slots.iter().enumerate() {
        packed.lod_bounds[i] = slot.lod_bounds.packed().to_array();
        packed.bounds[i] = slot.bounds.packed().to_array();

        let resource = match slot.part {
            Some(part) => {
                let group = dag.group(parts[part as usize].group_index);
                let (start, num) = remove_root_pages(group.page_index_start, group.page_index_num);
                (start << (MAX_CLUSTERS_PER_GROUP_BITS + MAX_GROUP_PARTS_BITS))
                    | (num << MAX_CLUSTERS_PER_GROUP_BITS)
                    | slot.num_children
            }
            None => INVALID_INDEX,
        };

        packed.misc[i] = PackedHierarchyNodeMisc {
            min_lod_error_max_parent_lod_error: f16::from_f32(slot.min_lod_error).to_bits() as u32
                | ((f16::from_f32(slot.max_parent_lod_error).to_bits() as u32) << 16),
            child_start_reference: slot.child_start,
            resource_page_index_num_pages_group_part_size: resource,
        };
    }
    packed
}

/// Build the hierarchy over every part, recording each part's node and slot. The root is node 0.
pub fn build_hierarchy(dag: &ClusterDag, parts: &mut [GroupPart]) -> Vec<PackedHierarchyNode> {
    if parts.is_empty() {
        return Vec::new();
    }
    let nodes = build_tree(parts);

    let mut out = Vec::new();
    write_node(&mut out, &nodes, nodes.len() - 1, dag, parts);

    log::info!("Hierarchy: {} nodes over {} parts", out.len(), parts.len());
    out.iter().map(|n| pack_node(n, dag, parts)).collect()
}
