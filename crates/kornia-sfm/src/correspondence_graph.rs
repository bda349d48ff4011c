use std::collections::HashMap;

use crate::{
    point3d::TrackElement,
    types::{image_pair_to_pair_id, ImageId, ImagePairId, Point2DIdx},
};

/// Source of the raw, geometrically verified keypoint correspondences.
///
/// The scene borrows an implementation between
/// [`set_up`](crate::reconstruction::Reconstruction::set_up) and
/// [`tear_down`](crate::reconstruction::Reconstruction::tear_down) to keep the
/// per-pair triangulation statistics up to date.
pub trait CorrespondenceGraph {
    /// All keypoints of other images corresponding to the given keypoint.
    fn find_correspondences(
        &self,
        image_id: ImageId,
        point2d_idx: Point2DIdx,
    ) -> Vec<TrackElement>;

    /// The number of keypoints of the image with at least one correspondence.
    fn num_correspondences_for_image(&self, image_id: ImageId) -> usize;

    /// The number of correspondences between two images.
    fn num_correspondences_between_images(&self, image_id1: ImageId, image_id2: ImageId)
        -> usize;
}

/// A correspondence graph held fully in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorrespondenceGraph {
    correspondences: HashMap<ImageId, HashMap<Point2DIdx, Vec<TrackElement>>>,
    pair_counts: HashMap<ImagePairId, usize>,
}

impl InMemoryCorrespondenceGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the matching keypoint pairs between two distinct images.
    ///
    /// Each entry of `matches` is `(point2d_idx in image 1, point2d_idx in image 2)`.
    pub fn add_correspondences(
        &mut self,
        image_id1: ImageId,
        image_id2: ImageId,
        matches: &[(Point2DIdx, Point2DIdx)],
    ) {
        if image_id1 == image_id2 {
            log::warn!("ignoring self-correspondences of image {}", image_id1);
            return;
        }

        for &(idx1, idx2) in matches {
            self.correspondences
                .entry(image_id1)
                .or_default()
                .entry(idx1)
                .or_default()
                .push(TrackElement::new(image_id2, idx2));
            self.correspondences
                .entry(image_id2)
                .or_default()
                .entry(idx2)
                .or_default()
                .push(TrackElement::new(image_id1, idx1));
        }

        *self
            .pair_counts
            .entry(image_pair_to_pair_id(image_id1, image_id2))
            .or_default() += matches.len();
    }

    /// The number of correspondences for every image pair.
    pub fn image_pairs(&self) -> impl Iterator<Item = (ImagePairId, usize)> + '_ {
        self.pair_counts.iter().map(|(&id, &count)| (id, count))
    }
}

impl CorrespondenceGraph for InMemoryCorrespondenceGraph {
    fn find_correspondences(
        &self,
        image_id: ImageId,
        point2d_idx: Point2DIdx,
    ) -> Vec<TrackElement> {
        self.correspondences
            .get(&image_id)
            .and_then(|corrs| corrs.get(&point2d_idx))
            .cloned()
            .unwrap_or_default()
    }

    fn num_correspondences_for_image(&self, image_id: ImageId) -> usize {
        self.correspondences
            .get(&image_id)
            .map_or(0, |corrs| corrs.len())
    }

    fn num_correspondences_between_images(
        &self,
        image_id1: ImageId,
        image_id2: ImageId,
    ) -> usize {
        self.pair_counts
            .get(&image_pair_to_pair_id(image_id1, image_id2))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_graph() {
        let mut graph = InMemoryCorrespondenceGraph::new();
        graph.add_correspondences(1, 2, &[(0, 3), (1, 4)]);
        graph.add_correspondences(2, 3, &[(3, 0)]);
        graph.add_correspondences(3, 3, &[(0, 0)]);

        assert_eq!(
            graph.find_correspondences(2, 3),
            vec![TrackElement::new(1, 0), TrackElement::new(3, 0)]
        );
        assert!(graph.find_correspondences(1, 9).is_empty());
        assert_eq!(graph.num_correspondences_for_image(2), 2);
        assert_eq!(graph.num_correspondences_between_images(2, 1), 2);
        assert_eq!(graph.num_correspondences_between_images(1, 3), 0);
        assert_eq!(graph.image_pairs().count(), 2);
    }
}
