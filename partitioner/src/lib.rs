//! Weighted graph partitioning into parts of bounded size, by recursive METIS bisection.

mod disjoint_set;
mod graph;
mod locality;
mod partition;

pub use disjoint_set::DisjointSet;
pub use graph::{Graph, GraphEdge, GraphVertex};
pub use locality::add_locality_links;
pub use partition::{Partition, PartitioningConfig};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitioningError {
    #[error("Part size bounds {min}..={max} are empty")]
    InvalidSizes { min: usize, max: usize },
    #[error("Edge {vertex} -> {dst} is out of range or a self loop")]
    InvalidEdge { vertex: u32, dst: u32 },
    #[error("METIS rejected the bisection: {0}")]
    Metis(String),
}
