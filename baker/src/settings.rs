use common::{
    CLUSTER_PAGE_GPU_SIZE, MAX_CLUSTERS_PER_GROUP, MAX_CLUSTERS_PER_PAGE, MAX_CLUSTER_TRIANGLES,
};
use partitioner::PartitioningConfig;

use crate::BuildError;

/// Everything that steers a build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSettings {
    /// Fraction of the input triangles kept in the fallback mesh, in `(0, 1]`.
    pub target_triangle_percent: f32,
    /// Bits of precision kept for positions relative to the mesh bounds.
    /// Clamped to `10..=32`; positions are never quantized finer than `32 - bits` shifts.
    pub position_precision_bits: u32,
    /// Maximum triangles per cluster.
    pub cluster_size: usize,
    pub min_group_size: usize,
    pub max_group_size: usize,
    /// Reduction stops and the remaining clusters become the root after this many levels.
    pub max_dag_levels: u32,
    pub page_gpu_size: u32,
    pub max_clusters_per_page: u32,
    /// Passes of shared vertex shift propagation before falling back to a fixed shift.
    pub quantization_iteration_cap: u32,
    /// Keep the outer border of the mesh fixed during simplification.
    pub lock_mesh_borders: bool,
    pub partitioning: PartitioningConfig,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            target_triangle_percent: 1.0,
            position_precision_bits: 22,
            cluster_size: MAX_CLUSTER_TRIANGLES,
            min_group_size: 8,
            max_group_size: 32,
            max_dag_levels: 64,
            page_gpu_size: CLUSTER_PAGE_GPU_SIZE,
            max_clusters_per_page: MAX_CLUSTERS_PER_PAGE,
            quantization_iteration_cap: 32,
            lock_mesh_borders: false,
            partitioning: PartitioningConfig::default(),
        }
    }
}

impl BuildSettings {
    /// Smallest position shift allowed by `position_precision_bits`.
    pub fn min_position_shift(&self) -> u32 {
        32 - self.position_precision_bits.clamp(10, 32)
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        let invalid = |msg: String| Err(BuildError::InvalidSettings(msg));

        if !(self.target_triangle_percent > 0.0 && self.target_triangle_percent <= 1.0) {
            return invalid(format!(
                "target_triangle_percent {} is outside (0, 1]",
                self.target_triangle_percent
            ));
        }
        if !(8..=MAX_CLUSTER_TRIANGLES).contains(&self.cluster_size) {
            return invalid(format!(
                "cluster_size {} is outside 8..={MAX_CLUSTER_TRIANGLES}",
                self.cluster_size
            ));
        }
        if self.min_group_size < 2 || self.min_group_size > self.max_group_size {
            return invalid(format!(
                "group sizes {}..={} are invalid",
                self.min_group_size, self.max_group_size
            ));
        }
        // Group cluster counts are packed into a fixed width hierarchy field.
        if self.max_group_size > MAX_CLUSTERS_PER_GROUP as usize {
            return invalid(format!(
                "max_group_size {} exceeds {MAX_CLUSTERS_PER_GROUP}",
                self.max_group_size
            ));
        }
        if self.max_clusters_per_page == 0 || self.max_clusters_per_page > MAX_CLUSTERS_PER_PAGE {
            return invalid(format!(
                "max_clusters_per_page {} is outside 1..={MAX_CLUSTERS_PER_PAGE}",
                self.max_clusters_per_page
            ));
        }
        if self.quantization_iteration_cap == 0 {
            return invalid("quantization_iteration_cap must be at least 1".to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_min_position_shift() {
        let mut settings = BuildSettings::default();
        assert_eq!(settings.min_position_shift(), 10);
        settings.position_precision_bits = 4;
        assert_eq!(settings.min_position_shift(), 22);
        settings.position_precision_bits = 40;
        assert_eq!(settings.min_position_shift(), 0);
    }

    #[test]
    fn test_group_size_fits_hierarchy_field() {
        let settings = BuildSettings {
            max_group_size: MAX_CLUSTERS_PER_GROUP as usize,
            ..Default::default()
        };
        assert!(settings.validate().is_ok());

        let settings = BuildSettings {
            max_group_size: MAX_CLUSTERS_PER_GROUP as usize + 1,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(BuildError::InvalidSettings(msg)) if msg.contains("max_group_size")
        ));
    }

    #[test]
    fn test_validate() {
        assert!(BuildSettings::default().validate().is_ok());
        let settings = BuildSettings {
            target_triangle_percent: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        let settings = BuildSettings {
            min_group_size: 40,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
