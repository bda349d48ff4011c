use glam::DVec3;

use crate::{
    error::SceneError,
    geometry::Rigid3d,
    types::{CameraId, ImageId, Point2DIdx, Point3DId},
};

/// A 2D keypoint of an image and its optional link to a triangulated 3D point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2D {
    /// Pixel coordinates (x, y)
    pub xy: [f64; 2],
    /// The 3D point this keypoint was triangulated into, if any
    pub point3d_id: Option<Point3DId>,
}

impl Point2D {
    /// Create an untriangulated keypoint.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            xy: [x, y],
            point3d_id: None,
        }
    }

    /// Whether the keypoint is linked to a 3D point.
    #[inline]
    pub fn has_point3d(&self) -> bool {
        self.point3d_id.is_some()
    }
}

/// Represents an image with its pose and keypoints.
///
/// The keypoint back-references are owned by the scene: only the
/// [`Reconstruction`](crate::reconstruction::Reconstruction) links and unlinks them,
/// so they always agree with the 3D point tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub(crate) image_id: ImageId,
    /// Image name, relative to the image root folder
    pub name: String,
    pub(crate) camera_id: CameraId,
    /// Pose of the camera as `cam_from_world`
    pub cam_from_world: Rigid3d,
    pub(crate) registered: bool,
    pub(crate) points2d: Vec<Point2D>,
    pub(crate) num_points3d: usize,
    pub(crate) num_correspondences: usize,
}

impl Image {
    /// Create a new unregistered image with the given untriangulated keypoints.
    pub fn new(
        image_id: ImageId,
        name: impl Into<String>,
        camera_id: CameraId,
        points2d: Vec<[f64; 2]>,
    ) -> Self {
        Self {
            image_id,
            name: name.into(),
            camera_id,
            cam_from_world: Rigid3d::IDENTITY,
            registered: false,
            points2d: points2d
                .into_iter()
                .map(|xy| Point2D::new(xy[0], xy[1]))
                .collect(),
            num_points3d: 0,
            num_correspondences: 0,
        }
    }

    /// Image id
    #[inline]
    pub fn image_id(&self) -> ImageId {
        self.image_id
    }

    /// Id of the camera that took the image.
    #[inline]
    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    /// Whether the image is part of the current reconstruction.
    #[inline]
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// The keypoints of the image.
    pub fn points2d(&self) -> &[Point2D] {
        &self.points2d
    }

    /// The number of keypoints.
    #[inline]
    pub fn num_points2d(&self) -> usize {
        self.points2d.len()
    }

    /// The number of keypoints linked to a 3D point.
    #[inline]
    pub fn num_points3d(&self) -> usize {
        self.num_points3d
    }

    /// The number of keypoints with at least one raw correspondence.
    #[inline]
    pub fn num_correspondences(&self) -> usize {
        self.num_correspondences
    }

    /// Get a keypoint by index.
    pub fn point2d(&self, point2d_idx: Point2DIdx) -> Result<&Point2D, SceneError> {
        self.points2d.get(point2d_idx as usize).ok_or_else(|| {
            SceneError::InvalidArgument(format!(
                "keypoint {} out of range for image {} with {} keypoints",
                point2d_idx,
                self.image_id,
                self.points2d.len()
            ))
        })
    }

    /// Position of the camera center in world coordinates.
    pub fn projection_center(&self) -> DVec3 {
        self.cam_from_world.inverse().translation
    }

    /// Direction of the optical axis in world coordinates.
    pub fn viewing_direction(&self) -> DVec3 {
        self.cam_from_world.rotation.inverse() * DVec3::Z
    }

    pub(crate) fn set_point3d_for_point2d(&mut self, point2d_idx: Point2DIdx, id: Point3DId) {
        let point2d = &mut self.points2d[point2d_idx as usize];
        if point2d.point3d_id.is_none() {
            self.num_points3d += 1;
        }
        point2d.point3d_id = Some(id);
    }

    pub(crate) fn reset_point3d_for_point2d(&mut self, point2d_idx: Point2DIdx) {
        let point2d = &mut self.points2d[point2d_idx as usize];
        if point2d.point3d_id.take().is_some() {
            self.num_points3d -= 1;
        }
    }
}
