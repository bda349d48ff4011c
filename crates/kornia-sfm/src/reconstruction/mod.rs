mod colors;
mod filter;
mod track;
mod transform;

pub use colors::{PixelSampler, RgbImage};
pub use transform::SceneBounds;

use std::collections::{HashMap, HashSet};

use crate::{
    camera::Camera,
    correspondence_graph::CorrespondenceGraph,
    database::DatabaseCache,
    error::{Entity, SceneError},
    image::Image,
    point3d::{Point3D, TrackElement},
    types::{
        image_pair_to_pair_id, pair_id_to_image_pair, CameraId, ImageId, ImagePairId, Point3DId,
        MAX_NUM_IMAGES,
    },
};

// Pair ids are only injective for image ids below `MAX_NUM_IMAGES`.
fn check_image_id(image_id: ImageId) -> Result<(), SceneError> {
    if image_id as u64 >= MAX_NUM_IMAGES {
        return Err(SceneError::InvalidArgument(format!(
            "image id {image_id} exceeds the maximum of {}",
            MAX_NUM_IMAGES - 1
        )));
    }
    Ok(())
}

/// Correspondence statistics of one unordered pair of images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImagePairStat {
    /// The number of triangulated correspondences between the two images.
    pub num_tri_corrs: usize,
    /// The number of raw correspondences between the two images.
    pub num_total_corrs: usize,
}

/// In-memory model of a sparse reconstruction.
///
/// Relates cameras, posed images with their keypoints and triangulated 3D points.
/// Every mutation keeps the point tracks and the per-keypoint back-references
/// in agreement: a track element `(image, keypoint)` of point `p` exists if and
/// only if that keypoint refers back to `p`.
///
/// The correspondence graph is borrowed for the lifetime `'g` between
/// [`Reconstruction::set_up`] and [`Reconstruction::tear_down`].
#[derive(Clone, Default)]
pub struct Reconstruction<'g> {
    correspondence_graph: Option<&'g dyn CorrespondenceGraph>,
    torn_down: bool,
    cameras: HashMap<CameraId, Camera>,
    images: HashMap<ImageId, Image>,
    points3d: HashMap<Point3DId, Point3D>,
    image_pair_stats: HashMap<ImagePairId, ImagePairStat>,
    // registered images in registration order
    reg_image_ids: Vec<ImageId>,
    // largest point id handed out so far
    max_point3d_id: Point3DId,
}

impl std::fmt::Debug for Reconstruction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconstruction")
            .field("has_correspondence_graph", &self.correspondence_graph.is_some())
            .field("torn_down", &self.torn_down)
            .field("num_cameras", &self.cameras.len())
            .field("num_images", &self.images.len())
            .field("num_reg_images", &self.reg_image_ids.len())
            .field("num_points3d", &self.points3d.len())
            .field("num_image_pairs", &self.image_pair_stats.len())
            .finish()
    }
}

impl<'g> Reconstruction<'g> {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of cameras.
    #[inline]
    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    /// The number of images.
    #[inline]
    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    /// The number of registered images.
    #[inline]
    pub fn num_reg_images(&self) -> usize {
        self.reg_image_ids.len()
    }

    /// The number of 3D points.
    #[inline]
    pub fn num_points3d(&self) -> usize {
        self.points3d.len()
    }

    /// The number of image pairs with statistics.
    #[inline]
    pub fn num_image_pairs(&self) -> usize {
        self.image_pair_stats.len()
    }

    /// Get a camera by id.
    pub fn camera(&self, camera_id: CameraId) -> Result<&Camera, SceneError> {
        self.cameras
            .get(&camera_id)
            .ok_or_else(|| SceneError::not_found(Entity::Camera, camera_id))
    }

    /// Get an image by id.
    pub fn image(&self, image_id: ImageId) -> Result<&Image, SceneError> {
        self.images
            .get(&image_id)
            .ok_or_else(|| SceneError::not_found(Entity::Image, image_id))
    }

    /// Get an image by id for updating its pose or name.
    pub fn image_mut(&mut self, image_id: ImageId) -> Result<&mut Image, SceneError> {
        self.images
            .get_mut(&image_id)
            .ok_or_else(|| SceneError::not_found(Entity::Image, image_id))
    }

    /// Get a 3D point by id.
    pub fn point3d(&self, point3d_id: Point3DId) -> Result<&Point3D, SceneError> {
        self.points3d
            .get(&point3d_id)
            .ok_or_else(|| SceneError::not_found(Entity::Point3D, point3d_id))
    }

    /// Get a 3D point by id for updating its position, color or error.
    pub fn point3d_mut(&mut self, point3d_id: Point3DId) -> Result<&mut Point3D, SceneError> {
        self.points3d
            .get_mut(&point3d_id)
            .ok_or_else(|| SceneError::not_found(Entity::Point3D, point3d_id))
    }

    /// Get the statistics of an image pair. The order of the ids does not matter.
    pub fn image_pair(
        &self,
        image_id1: ImageId,
        image_id2: ImageId,
    ) -> Result<&ImagePairStat, SceneError> {
        self.image_pair_by_id(image_pair_to_pair_id(image_id1, image_id2))
    }

    /// Get the statistics of an image pair by its pair id.
    pub fn image_pair_by_id(&self, pair_id: ImagePairId) -> Result<&ImagePairStat, SceneError> {
        self.image_pair_stats
            .get(&pair_id)
            .ok_or_else(|| SceneError::not_found(Entity::ImagePair, pair_id))
    }

    /// All cameras.
    pub fn cameras(&self) -> &HashMap<CameraId, Camera> {
        &self.cameras
    }

    /// All images.
    pub fn images(&self) -> &HashMap<ImageId, Image> {
        &self.images
    }

    /// The registered images in registration order.
    pub fn reg_image_ids(&self) -> &[ImageId] {
        &self.reg_image_ids
    }

    /// All 3D points.
    pub fn points3d(&self) -> &HashMap<Point3DId, Point3D> {
        &self.points3d
    }

    /// All image pair statistics.
    pub fn image_pairs(&self) -> &HashMap<ImagePairId, ImagePairStat> {
        &self.image_pair_stats
    }

    /// Identifiers of all 3D points.
    pub fn point3d_ids(&self) -> HashSet<Point3DId> {
        self.points3d.keys().copied().collect()
    }

    /// Check whether a camera exists.
    #[inline]
    pub fn exists_camera(&self, camera_id: CameraId) -> bool {
        self.cameras.contains_key(&camera_id)
    }

    /// Check whether an image exists.
    #[inline]
    pub fn exists_image(&self, image_id: ImageId) -> bool {
        self.images.contains_key(&image_id)
    }

    /// Check whether a 3D point exists.
    #[inline]
    pub fn exists_point3d(&self, point3d_id: Point3DId) -> bool {
        self.points3d.contains_key(&point3d_id)
    }

    /// Check whether statistics exist for an image pair.
    #[inline]
    pub fn exists_image_pair(&self, pair_id: ImagePairId) -> bool {
        self.image_pair_stats.contains_key(&pair_id)
    }

    /// Check whether an image is registered.
    pub fn is_image_registered(&self, image_id: ImageId) -> Result<bool, SceneError> {
        Ok(self.image(image_id)?.is_registered())
    }

    /// Whether [`Reconstruction::tear_down`] has been called.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Populate the scene from a database snapshot.
    ///
    /// Cameras and images that are not in the scene yet are added, images as
    /// unregistered with empty tracks. Images that already exist must agree in
    /// their number of keypoints. The raw correspondence counts of the
    /// snapshot become the pair statistics.
    pub fn load(&mut self, database: &DatabaseCache) -> Result<(), SceneError> {
        if self.torn_down {
            return Err(SceneError::Precondition(
                "cannot load into a scene that has been torn down".to_string(),
            ));
        }

        for camera in database.cameras() {
            if !self.exists_camera(camera.camera_id) {
                self.add_camera(camera.clone())?;
            }
        }

        for image in database.images() {
            match self.images.get(&image.image_id) {
                Some(existing) => {
                    if existing.name != image.name
                        || existing.num_points2d() != image.num_points2d()
                    {
                        return Err(SceneError::InvalidArgument(format!(
                            "image {} does not match its database entry",
                            image.image_id
                        )));
                    }
                }
                None => {
                    let mut image = image.clone();
                    image.registered = false;
                    image.num_points3d = 0;
                    image.points2d.iter_mut().for_each(|p| p.point3d_id = None);
                    self.add_image(image)?;
                }
            }
        }

        for (&pair_id, &num_corrs) in database.image_pairs() {
            self.image_pair_stats.entry(pair_id).or_default().num_total_corrs = num_corrs;
        }

        log::info!(
            "loaded {} cameras, {} images and {} image pairs",
            self.num_cameras(),
            self.num_images(),
            self.num_image_pairs()
        );

        Ok(())
    }

    /// Bind the correspondence graph used while triangulating.
    ///
    /// The triangulated correspondence counts are recomputed for the points
    /// already in the scene, e.g. after reading a model from disk.
    ///
    /// The graph must outlive the scene's use of it, which ends at
    /// [`Reconstruction::tear_down`]. Fails once the scene has been torn down.
    pub fn set_up(
        &mut self,
        correspondence_graph: &'g dyn CorrespondenceGraph,
    ) -> Result<(), SceneError> {
        if self.torn_down {
            return Err(SceneError::Precondition(
                "cannot set up a scene that has been torn down".to_string(),
            ));
        }

        for image in self.images.values_mut() {
            image.num_correspondences =
                correspondence_graph.num_correspondences_for_image(image.image_id);
        }

        self.correspondence_graph = Some(correspondence_graph);
        self.recount_tri_observations();
        log::info!("set up scene with {} images", self.num_images());

        Ok(())
    }

    /// Finalize the scene after reconstruction.
    ///
    /// Drops every unregistered image and every camera not used by a remaining
    /// image, and releases the correspondence graph. Dropped images can no
    /// longer be registered; the scene cannot be set up again.
    pub fn tear_down(&mut self) {
        let num_images = self.images.len();
        let num_cameras = self.cameras.len();

        let unregistered = self
            .images
            .values()
            .filter(|image| !image.registered)
            .map(|image| image.image_id)
            .collect::<Vec<_>>();
        for image_id in unregistered {
            self.delete_image_observations(image_id);
            self.images.remove(&image_id);
        }

        let used_cameras = self
            .images
            .values()
            .map(|image| image.camera_id)
            .collect::<HashSet<_>>();
        self.cameras
            .retain(|camera_id, _| used_cameras.contains(camera_id));

        self.correspondence_graph = None;
        self.torn_down = true;

        log::info!(
            "tore down scene, dropped {} images and {} cameras",
            num_images - self.images.len(),
            num_cameras - self.cameras.len()
        );
    }

    /// Add a new camera.
    pub fn add_camera(&mut self, camera: Camera) -> Result<(), SceneError> {
        if self.exists_camera(camera.camera_id) {
            return Err(SceneError::InvalidArgument(format!(
                "camera {} already exists",
                camera.camera_id
            )));
        }
        camera.verify_params()?;
        self.cameras.insert(camera.camera_id, camera);
        Ok(())
    }

    /// Replace the parameters of a camera, e.g. after refinement.
    pub fn set_camera_params(
        &mut self,
        camera_id: CameraId,
        params: Vec<f64>,
    ) -> Result<(), SceneError> {
        let camera = self
            .cameras
            .get_mut(&camera_id)
            .ok_or_else(|| SceneError::not_found(Entity::Camera, camera_id))?;
        let previous = std::mem::replace(&mut camera.params, params);
        if let Err(err) = camera.verify_params() {
            camera.params = previous;
            return Err(err);
        }
        Ok(())
    }

    /// Add a new image. Its camera must already exist and its id must be
    /// below [`MAX_NUM_IMAGES`].
    pub fn add_image(&mut self, image: Image) -> Result<(), SceneError> {
        check_image_id(image.image_id)?;
        if !self.exists_camera(image.camera_id) {
            return Err(SceneError::InvalidArgument(format!(
                "image {} refers to unknown camera {}",
                image.image_id, image.camera_id
            )));
        }
        if self.exists_image(image.image_id) {
            return Err(SceneError::InvalidArgument(format!(
                "image {} already exists",
                image.image_id
            )));
        }
        if image.num_points3d > 0 {
            return Err(SceneError::InvalidArgument(format!(
                "image {} carries links to 3D points",
                image.image_id
            )));
        }

        if image.registered {
            self.reg_image_ids.push(image.image_id);
        }
        self.images.insert(image.image_id, image);

        Ok(())
    }

    /// Find an image by name. Note that this uses linear search.
    pub fn find_image_with_name(&self, name: &str) -> Option<&Image> {
        self.images.values().find(|image| image.name == name)
    }

    /// Find the registered images shared with another scene, matched by name.
    ///
    /// Returns `(id in self, id in other)` pairs in the registration order of `self`.
    pub fn find_common_reg_image_ids(&self, other: &Reconstruction) -> Vec<(ImageId, ImageId)> {
        self.reg_image_ids
            .iter()
            .filter_map(|image_id| {
                let image = self.images.get(image_id)?;
                let other_image = other.find_image_with_name(&image.name)?;
                other_image
                    .is_registered()
                    .then_some((*image_id, other_image.image_id))
            })
            .collect()
    }

    /// Renumber the images to the ids of the database entries with the same name.
    ///
    /// Tracks, the registration order and the pair statistics are remapped too.
    pub fn transcribe_image_ids_to_database(
        &mut self,
        database: &DatabaseCache,
    ) -> Result<(), SceneError> {
        let mut old_to_new = HashMap::with_capacity(self.images.len());
        let mut new_ids = HashSet::with_capacity(self.images.len());
        for image in self.images.values() {
            let database_image = database.find_image_with_name(&image.name).ok_or_else(|| {
                SceneError::InvalidArgument(format!(
                    "image with name {} does not exist in database",
                    image.name
                ))
            })?;
            check_image_id(database_image.image_id)?;
            if !new_ids.insert(database_image.image_id) {
                return Err(SceneError::InvalidArgument(format!(
                    "database image {} matches more than one image",
                    database_image.image_id
                )));
            }
            old_to_new.insert(image.image_id, database_image.image_id);
        }

        self.images = std::mem::take(&mut self.images)
            .into_values()
            .map(|mut image| {
                image.image_id = old_to_new[&image.image_id];
                (image.image_id, image)
            })
            .collect();

        for image_id in self.reg_image_ids.iter_mut() {
            *image_id = old_to_new[&*image_id];
        }

        for point3d in self.points3d.values_mut() {
            point3d.track = point3d
                .track
                .iter()
                .map(|el| TrackElement::new(old_to_new[&el.image_id], el.point2d_idx))
                .collect();
        }

        self.image_pair_stats = std::mem::take(&mut self.image_pair_stats)
            .into_iter()
            .filter_map(|(pair_id, stat)| {
                let (image_id1, image_id2) = pair_id_to_image_pair(pair_id);
                let new_id1 = old_to_new.get(&image_id1)?;
                let new_id2 = old_to_new.get(&image_id2)?;
                Some((image_pair_to_pair_id(*new_id1, *new_id2), stat))
            })
            .collect();

        Ok(())
    }

    fn ensure_correspondence_graph(&self) -> Result<&'g dyn CorrespondenceGraph, SceneError> {
        if self.torn_down {
            return Err(SceneError::Precondition(
                "the scene has been torn down".to_string(),
            ));
        }
        self.correspondence_graph.ok_or_else(|| {
            SceneError::Precondition("no correspondence graph has been set up".to_string())
        })
    }
}
