pub mod dag;
pub mod fallback;

pub use dag::{ClusterDag, ClusterGroup};

/// Index into [`ClusterDag::clusters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClusterIndex(pub u32);

/// Index into [`ClusterDag::groups`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GroupIndex(pub u32);

impl ClusterIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl GroupIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
