pub mod cluster;
pub mod edge_topology;
pub mod partition;
pub mod quadric;
pub mod simplify;
