use partitioner::PartitioningError;
use thiserror::Error;

/// Reasons an input mesh is rejected before any work is done.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("Mesh has no triangles")]
    Empty,
    #[error("Index count {0} is not a multiple of 3")]
    IndexCount(usize),
    #[error("Index {index} of triangle {triangle} is out of range of {num_vertices} vertices")]
    IndexOutOfRange {
        triangle: usize,
        index: u32,
        num_vertices: usize,
    },
    #[error("Triangle {0} references the same vertex more than once")]
    RepeatedVertex(usize),
    #[error("Triangle {triangle} has material {material}, the cap is {max}")]
    MaterialOutOfRange {
        triangle: usize,
        material: u32,
        max: u32,
    },
    #[error("{materials} material indices given for {triangles} triangles")]
    MaterialCount { materials: usize, triangles: usize },
    #[error("Lowest referenced vertex is {0}, indices must start at vertex 0")]
    FirstVertexOffset(u32),
    #[error("Vertex {0} has a non finite position")]
    NonFinitePosition(usize),
    #[error("{0} UV channels requested, at most {max} are supported", max = common::MAX_UVS)]
    TooManyUvs(u32),
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Invalid input mesh: {0}")]
    InputValidation(#[from] InputError),
    #[error("A cluster can need {cluster_bytes} bytes, which does not fit a {page_bytes} byte page")]
    PageOverflow { cluster_bytes: u32, page_bytes: u32 },
    #[error("Group {group} spans {pages} pages, a hierarchy slot addresses at most {max}")]
    GroupSpansTooManyPages { group: u32, pages: u32, max: u32 },
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    #[error("Partitioning failed: {0}")]
    Partitioning(#[from] PartitioningError),
}
