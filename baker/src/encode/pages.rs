//! Packing clusters into fixed size pages, group by group.

use common::{Aabb, BoundingSphere, MAX_CLUSTERS_PER_GROUP, MAX_GROUP_PARTS_MASK, NUM_ROOT_PAGES};
use glam::Vec3;

use super::{encoding_info::EncodingInfo, PageSections};
use crate::{
    lod::{ClusterDag, ClusterIndex, GroupIndex},
    BuildError, BuildSettings,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub parts_start: usize,
    pub parts_num: usize,
    pub num_clusters: u32,
    pub gpu_sizes: PageSections,
}

impl Page {
    pub fn parts(&self) -> std::ops::Range<usize> {
        self.parts_start..self.parts_start + self.parts_num
    }
}

/// The clusters of one group that landed in one page. A group split across pages has one part
/// per page.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPart {
    pub clusters: Vec<ClusterIndex>,
    pub bounds: BoundingSphere,
    pub page_index: u32,
    pub group_index: GroupIndex,
    pub hierarchy_node_index: u32,
    pub hierarchy_child_index: u32,
    /// Index of the part's first cluster within its page.
    pub page_cluster_offset: u32,
}

impl GroupPart {
    pub fn new(group_index: GroupIndex, page_index: u32, page_cluster_offset: u32) -> Self {
        Self {
            clusters: Vec::new(),
            bounds: BoundingSphere::default(),
            page_index,
            group_index,
            hierarchy_node_index: 0,
            hierarchy_child_index: 0,
            page_cluster_offset,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    pub pages: Vec<Page>,
    pub parts: Vec<GroupPart>,
}

impl PageLayout {
    pub fn num_pages(&self) -> u32 {
        self.pages.len() as u32
    }
}

pub fn is_root_page(page: u32) -> bool {
    page < NUM_ROOT_PAGES
}

/// Clip root pages off the front of a page range. Root pages are always resident.
pub fn remove_root_pages(start: u32, num: u32) -> (u32, u32) {
    let end = start + num;
    let start = start.max(NUM_ROOT_PAGES);
    (start, end.saturating_sub(start))
}

/// Order children along a fixed diagonal so neighbouring clusters share pages.
fn sort_group_children(dag: &mut ClusterDag) {
    let ClusterDag {
        clusters, groups, ..
    } = dag;
    for group in groups {
        group.children.sort_by(|&a, &b| {
            let (a, b) = (&clusters[a.index()], &clusters[b.index()]);
            let da = a.sphere_bounds.center().dot(Vec3::ONE);
            let db = b.sphere_bounds.center().dot(Vec3::ONE);
            da.total_cmp(&db).then(a.guid.cmp(&b.guid))
        });
    }
}

/// Coarsest groups first, then Morton order. Every cluster's generating group is finer, so
/// pages only ever depend on earlier pages.
pub fn group_permutation(dag: &ClusterDag) -> Vec<GroupIndex> {
    let centers = Aabb::from_points(dag.groups.iter().map(|g| g.lod_bounds.center()));
    let mut order: Vec<(u32, u32, GroupIndex)> = dag
        .groups
        .iter()
        .enumerate()
        .map(|(i, g)| {
            (
                g.mip_level,
                common::morton_xyz(g.lod_bounds.center(), &centers),
                GroupIndex(i as u32),
            )
        })
        .collect();
    order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
    order.into_iter().map(|(_, _, g)| g).collect()
}

/// Fill pages greedily with whole groups in permutation order, splitting a group into parts
/// where it crosses a page boundary.
///
/// Fails when a group needs more pages than a hierarchy slot can address.
pub fn assign_clusters_to_pages(
    dag: &mut ClusterDag,
    infos: &[EncodingInfo],
    settings: &BuildSettings,
) -> Result<PageLayout, BuildError> {
    sort_group_children(dag);
    let permutation = group_permutation(dag);

    let mut pages = vec![Page::default()];
    let mut parts: Vec<GroupPart> = Vec::new();

    for group_index in permutation {
        let mut group_start_page = None;
        for &cluster in &dag.group(group_index).children {
            let sizes = infos[cluster.index()].gpu_sizes;

            let mut page = pages.len() - 1;
            if pages[page].gpu_sizes.total() + sizes.total() > settings.page_gpu_size
                || pages[page].num_clusters + 1 > settings.max_clusters_per_page
            {
                pages.push(Page::default());
                page += 1;
            }

            let needs_part = pages[page].parts_num == 0
                || parts.last().map(|p| p.group_index) != Some(group_index);
            if needs_part {
                if pages[page].parts_num == 0 {
                    pages[page].parts_start = parts.len();
                }
                pages[page].parts_num += 1;
                parts.push(GroupPart::new(
                    group_index,
                    page as u32,
                    pages[page].num_clusters,
                ));
            }

            if let Some(part) = parts.last_mut() {
                part.clusters.push(cluster);
                debug_assert!(part.clusters.len() <= MAX_CLUSTERS_PER_GROUP as usize);
            }
            group_start_page.get_or_insert(page as u32);

            pages[page].gpu_sizes += sizes;
            pages[page].num_clusters += 1;
        }

        let start = group_start_page.unwrap_or(pages.len() as u32 - 1);
        let group = &mut dag.groups[group_index.index()];
        group.page_index_start = start;
        group.page_index_num = pages.len() as u32 - start;
        if group.page_index_num > MAX_GROUP_PARTS_MASK {
            return Err(BuildError::GroupSpansTooManyPages {
                group: group_index.0,
                pages: group.page_index_num,
                max: MAX_GROUP_PARTS_MASK,
            });
        }
    }

    for (i, part) in parts.iter_mut().enumerate() {
        part.bounds = BoundingSphere::from_spheres(
            part.clusters
                .iter()
                .map(|&c| &dag.cluster(c).sphere_bounds),
        );
        dag.groups[part.group_index.index()].parts.push(i as u32);
    }

    log::info!(
        "Assigned {} clusters to {} pages in {} parts",
        dag.clusters.len(),
        pages.len(),
        parts.len()
    );
    Ok(PageLayout { pages, parts })
}

#[cfg(test)]
mod test {
    use common::{VertexFormat, MAX_CLUSTERS_PER_PAGE};

    use super::*;
    use crate::{encode::constrain::constrain_clusters, lod::dag::test::sheet_dag};

    fn layout(settings: &BuildSettings) -> (ClusterDag, PageLayout) {
        let mut dag = sheet_dag(48, settings);
        constrain_clusters(&mut dag);
        let infos: Vec<EncodingInfo> = dag
            .clusters
            .iter()
            .map(|c| EncodingInfo::new(c, VertexFormat::default()))
            .collect();
        let layout = assign_clusters_to_pages(&mut dag, &infos, settings).unwrap();
        (dag, layout)
    }

    #[test]
    fn test_remove_root_pages() {
        assert_eq!(remove_root_pages(0, 1), (1, 0));
        assert_eq!(remove_root_pages(0, 3), (1, 2));
        assert_eq!(remove_root_pages(4, 2), (4, 2));
    }

    #[test]
    fn test_every_cluster_placed_once() {
        let settings = BuildSettings {
            page_gpu_size: 8 * 1024,
            ..Default::default()
        };
        let (dag, layout) = layout(&settings);

        let mut placed = vec![0; dag.clusters.len()];
        for part in &layout.parts {
            for c in &part.clusters {
                placed[c.index()] += 1;
            }
        }
        assert!(placed.iter().all(|&n| n == 1));

        assert!(layout.pages.len() > 1);
        for page in &layout.pages {
            assert!(page.gpu_sizes.total() <= settings.page_gpu_size);
            assert!(page.num_clusters <= MAX_CLUSTERS_PER_PAGE);
            let in_parts: usize = page.parts().map(|p| layout.parts[p].clusters.len()).sum();
            assert_eq!(in_parts, page.num_clusters as usize);
        }
    }

    #[test]
    fn test_root_group_first_and_groups_contiguous() {
        let (dag, layout) = layout(&BuildSettings::default());
        let root = dag.root_group.unwrap();
        assert_eq!(layout.parts[0].group_index, root);
        assert_eq!(dag.group(root).page_index_start, 0);

        for (gi, g) in dag.groups.iter().enumerate() {
            let pages: Vec<u32> = g.parts.iter().map(|&p| layout.parts[p as usize].page_index).collect();
            assert_eq!(pages.len() as u32, g.page_index_num, "group {gi}");
            for (i, &page) in pages.iter().enumerate() {
                assert_eq!(page, g.page_index_start + i as u32);
            }
        }
    }

    #[test]
    fn test_generating_groups_are_not_earlier() {
        let settings = BuildSettings {
            page_gpu_size: 8 * 1024,
            ..Default::default()
        };
        let (dag, _) = layout(&settings);
        for g in &dag.groups {
            for &c in &g.children {
                if let Some(gen) = dag.cluster(c).generating_group_index {
                    assert!(dag.group(gen).page_index_start >= g.page_index_start);
                }
            }
        }
    }
}
