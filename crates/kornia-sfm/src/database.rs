use std::collections::HashMap;

use crate::{
    camera::Camera,
    correspondence_graph::InMemoryCorrespondenceGraph,
    image::Image,
    types::{image_pair_to_pair_id, ImageId, ImagePairId},
};

/// Snapshot of the feature database consumed when loading a scene.
///
/// Holds the cameras, the images with their keypoints and the number of
/// verified correspondences for each image pair.
#[derive(Debug, Clone, Default)]
pub struct DatabaseCache {
    cameras: Vec<Camera>,
    images: Vec<Image>,
    image_pairs: HashMap<ImagePairId, usize>,
}

impl DatabaseCache {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a camera to the snapshot.
    pub fn add_camera(&mut self, camera: Camera) {
        self.cameras.push(camera);
    }

    /// Add an image to the snapshot.
    pub fn add_image(&mut self, image: Image) {
        self.images.push(image);
    }

    /// Set the number of correspondences between two images.
    pub fn set_num_correspondences(
        &mut self,
        image_id1: ImageId,
        image_id2: ImageId,
        num_correspondences: usize,
    ) {
        self.image_pairs.insert(
            image_pair_to_pair_id(image_id1, image_id2),
            num_correspondences,
        );
    }

    /// Copy the per-pair correspondence counts of a correspondence graph.
    pub fn with_correspondence_graph(mut self, graph: &InMemoryCorrespondenceGraph) -> Self {
        self.image_pairs.extend(graph.image_pairs());
        self
    }

    /// The cameras of the snapshot.
    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    /// The images of the snapshot.
    pub fn images(&self) -> &[Image] {
        &self.images
    }

    /// The number of correspondences for each image pair.
    pub fn image_pairs(&self) -> &HashMap<ImagePairId, usize> {
        &self.image_pairs
    }

    /// Find an image by name. Note that this uses linear search.
    pub fn find_image_with_name(&self, name: &str) -> Option<&Image> {
        self.images.iter().find(|image| image.name == name)
    }
}
