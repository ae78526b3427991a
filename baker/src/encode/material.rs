//! Per cluster material assignment: up to three ranges inline, otherwise a slice of the page's
//! material table.

use common::{MAX_CLUSTER_MATERIALS, MAX_CLUSTER_TRIANGLES};

use crate::mesh::cluster::Cluster;

const MAX_INLINE_RANGES: usize = 3;
const MAX_TABLE_OFFSET: u32 = 1 << 19;

/// Inline ranges store `length - 1` in the low 7 bits, and zero there marks a table reference,
/// so a leading single triangle range must go through the table.
fn fits_inline(cluster: &Cluster) -> bool {
    cluster.material_ranges.len() <= MAX_INLINE_RANGES
        && cluster
            .material_ranges
            .first()
            .map_or(true, |r| r.range_length > 1)
}

/// Dwords this cluster adds to the page's material table.
pub fn material_table_size(cluster: &Cluster) -> u32 {
    if fits_inline(cluster) {
        0
    } else {
        cluster.material_ranges.len() as u32
    }
}

pub fn pack_table_range(tri_start: u32, tri_length: u32, material_index: u32) -> u32 {
    debug_assert!(tri_start <= MAX_CLUSTER_TRIANGLES as u32);
    debug_assert!(tri_length <= MAX_CLUSTER_TRIANGLES as u32);
    debug_assert!(material_index < MAX_CLUSTER_MATERIALS);
    tri_start | (tri_length << 8) | (material_index << 16)
}

fn pack_inline(ranges: [(u32, u32); 3]) -> u32 {
    let [(length0, index0), (length1, index1), (_, index2)] = ranges;
    debug_assert!(length0 > 1 && length0 <= MAX_CLUSTER_TRIANGLES as u32);
    (length0 - 1)
        | (index0 << 7)
        | (length1.saturating_sub(1) << 13)
        | (index1 << 20)
        | (index2 << 26)
}

fn pack_table_reference(offset: u32, length: u32) -> u32 {
    debug_assert!(offset < MAX_TABLE_OFFSET);
    debug_assert!(length > 0 && length < 64);
    (offset << 7) | (length << 26)
}

/// Pack the cluster's material ranges, appending to `table` when they do not fit inline.
/// `table_start` is the dword offset of the table within the page.
pub fn pack_material_info(cluster: &Cluster, table: &mut Vec<u32>, table_start: u32) -> u32 {
    debug_assert_eq!(
        cluster.material_ranges.iter().map(|r| r.range_length).sum::<u32>() as usize,
        cluster.num_tris()
    );

    if fits_inline(cluster) {
        let mut ranges = [(0, 0); 3];
        for (slot, r) in ranges.iter_mut().zip(&cluster.material_ranges) {
            *slot = (r.range_length, r.material_index);
        }
        pack_inline(ranges)
    } else {
        let offset = table.len() as u32 + table_start;
        table.extend(
            cluster
                .material_ranges
                .iter()
                .map(|r| pack_table_range(r.range_start, r.range_length, r.material_index)),
        );
        pack_table_reference(offset, cluster.material_ranges.len() as u32)
    }
}

/// Histogram of material ranges per cluster, for the build log.
pub fn log_material_stats<'a>(clusters: impl IntoIterator<Item = &'a Cluster>) {
    let mut histogram = [0u32; 4];
    let mut total = 0;
    for c in clusters {
        histogram[c.material_ranges.len().min(histogram.len() - 1)] += 1;
        total += 1;
    }
    log::info!(
        "Material ranges over {total} clusters: 1: {}, 2: {}, 3+: {}",
        histogram[1],
        histogram[2],
        histogram[3]
    );
}

#[cfg(test)]
mod test {
    use crate::mesh::cluster::MaterialRange;

    use super::*;

    fn with_ranges(ranges: &[(u32, u32)]) -> Cluster {
        let mut cluster = Cluster::default();
        let mut start = 0;
        for &(length, material) in ranges {
            cluster.material_ranges.push(MaterialRange {
                range_start: start,
                range_length: length,
                material_index: material,
            });
            cluster.material_indexes.extend(std::iter::repeat(material).take(length as usize));
            start += length;
        }
        cluster.indexes = vec![0; start as usize * 3];
        cluster
    }

    #[test]
    fn test_inline() {
        let cluster = with_ranges(&[(100, 5), (20, 9), (8, 63)]);
        let mut table = Vec::new();
        let packed = pack_material_info(&cluster, &mut table, 0);
        assert!(table.is_empty());
        assert_eq!(material_table_size(&cluster), 0);
        assert_eq!(packed & 0x7f, 99);
        assert_eq!((packed >> 7) & 0x3f, 5);
        assert_eq!((packed >> 13) & 0x7f, 19);
        assert_eq!((packed >> 20) & 0x3f, 9);
        assert_eq!(packed >> 26, 63);
    }

    #[test]
    fn test_table() {
        let cluster = with_ranges(&[(4, 1), (3, 2), (2, 3), (1, 4)]);
        let mut table = vec![0xdead];
        let packed = pack_material_info(&cluster, &mut table, 32);
        assert_eq!(material_table_size(&cluster), 4);
        assert_eq!(packed & 0x7f, 0);
        assert_eq!((packed >> 7) & 0x7ffff, 33);
        assert_eq!(packed >> 26, 4);
        assert_eq!(table.len(), 5);
        assert_eq!(table[4], pack_table_range(9, 1, 4));
    }

    #[test]
    fn test_single_triangle_uses_table() {
        let cluster = with_ranges(&[(1, 7)]);
        let mut table = Vec::new();
        let packed = pack_material_info(&cluster, &mut table, 0);
        assert_eq!(material_table_size(&cluster), 1);
        assert_eq!(table, vec![pack_table_range(0, 1, 7)]);
        assert_eq!(packed & 0x7f, 0);
    }
}
