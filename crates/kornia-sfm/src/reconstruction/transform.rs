use std::collections::HashSet;

use glam::{DQuat, DVec3};

use super::Reconstruction;
use crate::{
    error::SceneError,
    geometry::Sim3d,
    options::NormalizeOptions,
    types::{CameraId, ImageId},
};

/// Robust extent of a set of anchors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneBounds {
    /// Lower corner of the trimmed axis-aligned box.
    pub min: DVec3,
    /// Upper corner of the trimmed axis-aligned box.
    pub max: DVec3,
    /// Mean of the anchors inside the trimmed range, per axis.
    pub centroid: DVec3,
}

impl SceneBounds {
    /// Size of the trimmed box along each axis.
    pub fn extent(&self) -> DVec3 {
        self.max - self.min
    }
}

// Per-axis [p0, p1] percentile range and the mean of the coordinates inside it.
fn trimmed_bounds(anchors: &[DVec3], p0: f64, p1: f64) -> Result<SceneBounds, SceneError> {
    if !(0.0..=1.0).contains(&p0) || !(0.0..=1.0).contains(&p1) || p0 > p1 {
        return Err(SceneError::InvalidArgument(format!(
            "percentiles must satisfy 0 <= p0 <= p1 <= 1, got p0 = {p0} and p1 = {p1}"
        )));
    }
    if anchors.is_empty() {
        return Err(SceneError::Precondition(
            "cannot compute bounds without anchors".to_string(),
        ));
    }

    let last = (anchors.len() - 1) as f64;
    let idx0 = (p0 * last) as usize;
    let idx1 = (p1 * last) as usize;

    let mut min = DVec3::ZERO;
    let mut max = DVec3::ZERO;
    let mut centroid = DVec3::ZERO;

    for axis in 0..3 {
        let mut coords = anchors.iter().map(|a| a[axis]).collect::<Vec<_>>();
        coords.sort_by(f64::total_cmp);

        let lo = coords[idx0];
        let hi = coords[idx1];
        let (sum, count) = coords
            .iter()
            .filter(|&&c| c >= lo && c <= hi)
            .fold((0.0, 0usize), |(sum, count), &c| (sum + c, count + 1));

        min[axis] = lo;
        max[axis] = hi;
        // the range always contains lo, so count is at least one
        centroid[axis] = sum / count as f64;
    }

    Ok(SceneBounds { min, max, centroid })
}

impl<'g> Reconstruction<'g> {
    fn anchors(&self, use_images: bool) -> Vec<DVec3> {
        if use_images {
            self.reg_image_ids
                .iter()
                .filter_map(|image_id| self.images.get(image_id))
                .map(|image| image.projection_center())
                .collect()
        } else {
            self.points3d.values().map(|point3d| point3d.xyz).collect()
        }
    }

    /// Trimmed bounding box and centroid of the 3D points or of the
    /// registered camera centers.
    pub fn compute_bounds_and_centroid(
        &self,
        p0: f64,
        p1: f64,
        use_images: bool,
    ) -> Result<SceneBounds, SceneError> {
        trimmed_bounds(&self.anchors(use_images), p0, p1)
    }

    /// Trimmed centroid of the 3D points.
    pub fn compute_centroid(&self, p0: f64, p1: f64) -> Result<DVec3, SceneError> {
        Ok(self.compute_bounds_and_centroid(p0, p1, false)?.centroid)
    }

    /// Trimmed bounding box of the 3D points as `(min, max)`.
    pub fn compute_bounding_box(&self, p0: f64, p1: f64) -> Result<(DVec3, DVec3), SceneError> {
        let bounds = self.compute_bounds_and_centroid(p0, p1, false)?;
        Ok((bounds.min, bounds.max))
    }

    /// Center the scene at the trimmed centroid and scale it so that the
    /// trimmed extent along its largest axis equals `options.extent`.
    ///
    /// Returns the applied transform. Fails with [`SceneError::Precondition`]
    /// if fewer than two anchors are available.
    pub fn normalize(&mut self, options: &NormalizeOptions) -> Result<Sim3d, SceneError> {
        let anchors = self.anchors(options.use_images);
        if anchors.len() < 2 {
            return Err(SceneError::Precondition(format!(
                "normalization needs at least 2 anchors, got {}",
                anchors.len()
            )));
        }

        let bounds = trimmed_bounds(&anchors, options.p0, options.p1)?;
        let old_extent = bounds.extent().max_element();
        let scale = if old_extent < f64::EPSILON {
            1.0
        } else {
            options.extent / old_extent
        };

        let new_from_old_world = Sim3d::new(scale, DQuat::IDENTITY, -scale * bounds.centroid);
        self.transform(&new_from_old_world);

        log::debug!(
            "normalized scene with scale {} and centroid {:?}",
            scale,
            bounds.centroid
        );

        Ok(new_from_old_world)
    }

    /// Apply a similarity transform to every image pose and every 3D point.
    pub fn transform(&mut self, new_from_old_world: &Sim3d) {
        for image in self.images.values_mut() {
            image.cam_from_world = new_from_old_world.transform_pose(&image.cam_from_world);
        }
        for point3d in self.points3d.values_mut() {
            point3d.xyz = new_from_old_world.transform_point(point3d.xyz);
        }
    }

    /// Extract the sub-scene inside an axis-aligned box given as `(min, max)`.
    ///
    /// The result holds the points inside the box, the images observing them
    /// and the cameras of those images. Identifiers, registration order and
    /// the point id generator are preserved. The result has no
    /// correspondence graph and no pair statistics.
    pub fn crop(&self, bbox: (DVec3, DVec3)) -> Reconstruction<'static> {
        let (min, max) = bbox;
        let inside = |xyz: DVec3| xyz.cmpge(min).all() && xyz.cmple(max).all();

        let mut cropped = Reconstruction::new();
        cropped.max_point3d_id = self.max_point3d_id;

        let points3d = self
            .points3d
            .iter()
            .filter(|(_, point3d)| inside(point3d.xyz))
            .collect::<Vec<_>>();

        let image_ids = points3d
            .iter()
            .flat_map(|(_, point3d)| point3d.track.iter().map(|el| el.image_id))
            .collect::<HashSet<ImageId>>();
        let camera_ids = image_ids
            .iter()
            .filter_map(|image_id| self.images.get(image_id))
            .map(|image| image.camera_id)
            .collect::<HashSet<CameraId>>();

        for camera_id in camera_ids {
            if let Some(camera) = self.cameras.get(&camera_id) {
                cropped.cameras.insert(camera_id, camera.clone());
            }
        }
        for &image_id in &image_ids {
            if let Some(image) = self.images.get(&image_id) {
                let mut image = image.clone();
                image.points2d.iter_mut().for_each(|p| p.point3d_id = None);
                image.num_points3d = 0;
                cropped.images.insert(image_id, image);
            }
        }
        cropped.reg_image_ids = self
            .reg_image_ids
            .iter()
            .copied()
            .filter(|image_id| image_ids.contains(image_id))
            .collect();

        for (&point3d_id, point3d) in points3d {
            cropped.insert_point3d(
                point3d_id,
                point3d.xyz,
                point3d.track.clone(),
                point3d.color,
                point3d.error,
            );
        }

        log::debug!(
            "cropped {} of {} points3D and {} of {} images",
            cropped.num_points3d(),
            self.num_points3d(),
            cropped.num_images(),
            self.num_images()
        );

        cropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        camera::{Camera, CameraModelId},
        geometry::Rigid3d,
        image::Image,
        point3d::{Track, TrackElement},
    };
    use approx::assert_relative_eq;

    // a row of cameras looking down +z at points on a plane
    fn scene() -> Result<Reconstruction<'static>, SceneError> {
        let mut scene = Reconstruction::new();
        scene.add_camera(Camera::new(
            1,
            CameraModelId::SimplePinhole,
            100,
            100,
            vec![100.0, 50.0, 50.0],
        )?)?;
        scene.add_camera(Camera::new(
            2,
            CameraModelId::SimplePinhole,
            100,
            100,
            vec![80.0, 50.0, 50.0],
        )?)?;
        for image_id in 1..=4 {
            let camera_id = if image_id == 4 { 2 } else { 1 };
            let mut image = Image::new(
                image_id,
                format!("{image_id}.png"),
                camera_id,
                vec![[0.0, 0.0]; 4],
            );
            image.cam_from_world =
                Rigid3d::new(DQuat::IDENTITY, DVec3::new(-(image_id as f64), 0.0, 0.0));
            scene.add_image(image)?;
            scene.register_image(image_id)?;
        }
        for (idx, x) in [0.0, 1.0, 2.0, 3.0].into_iter().enumerate() {
            let images = if idx == 3 { [3, 4] } else { [1, 2] };
            let track = images
                .iter()
                .map(|&image_id| TrackElement::new(image_id, idx as u32))
                .collect::<Track>();
            scene.add_point3d_with_id(idx as u64 + 1, DVec3::new(x, x, 5.0), track, [0, 0, 0])?;
        }
        Ok(scene)
    }

    #[test]
    fn test_bounds_and_centroid() -> Result<(), SceneError> {
        let scene = scene()?;

        let bounds = scene.compute_bounds_and_centroid(0.0, 1.0, false)?;
        assert_eq!(bounds.min, DVec3::new(0.0, 0.0, 5.0));
        assert_eq!(bounds.max, DVec3::new(3.0, 3.0, 5.0));
        assert_relative_eq!(bounds.centroid.x, 1.5);

        // trimming drops the extreme anchors
        let (min, max) = scene.compute_bounding_box(0.34, 0.66)?;
        assert_eq!(min.x, 1.0);
        assert_eq!(max.x, 1.0);
        assert_relative_eq!(scene.compute_centroid(0.34, 0.66)?.y, 1.0);

        let cameras = scene.compute_bounds_and_centroid(0.0, 1.0, true)?;
        assert_relative_eq!(cameras.min.x, 1.0);
        assert_relative_eq!(cameras.max.x, 4.0);

        assert!(matches!(
            scene.compute_bounds_and_centroid(0.9, 0.1, false),
            Err(SceneError::InvalidArgument(_))
        ));
        assert!(matches!(
            Reconstruction::new().compute_centroid(0.0, 1.0),
            Err(SceneError::Precondition(_))
        ));
        Ok(())
    }

    #[test]
    fn test_normalize() -> Result<(), SceneError> {
        let mut scene = scene()?;
        let options = NormalizeOptions {
            extent: 6.0,
            p0: 0.0,
            p1: 1.0,
            use_images: false,
        };
        let tform = scene.normalize(&options)?;
        assert_relative_eq!(tform.scale, 2.0);

        let bounds = scene.compute_bounds_and_centroid(0.0, 1.0, false)?;
        assert_relative_eq!(bounds.centroid.length(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(bounds.extent().max_element(), 6.0, epsilon = 1e-12);

        // the cameras keep observing their points from the same direction
        let image = scene.image(1)?;
        let point = scene.point3d(1)?;
        let in_cam = image.cam_from_world.transform_point(point.xyz);
        assert_relative_eq!(in_cam.z, 10.0, epsilon = 1e-12);
        assert_relative_eq!(in_cam.x, 2.0 * (0.0 - 1.0), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_normalize_needs_two_anchors() -> Result<(), SceneError> {
        let mut scene = scene()?;
        for image_id in [1, 2, 3] {
            scene.deregister_image(image_id)?;
        }
        assert!(matches!(
            scene.normalize(&NormalizeOptions::default()),
            Err(SceneError::Precondition(_))
        ));
        Ok(())
    }

    #[test]
    fn test_transform_identity() -> Result<(), SceneError> {
        let mut scene = scene()?;
        let before = scene.clone();
        scene.transform(&Sim3d::IDENTITY);
        for (image_id, image) in scene.images() {
            let center = image.projection_center();
            let expected = before.image(*image_id)?.projection_center();
            assert_relative_eq!(center.distance(expected), 0.0, epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_crop() -> Result<(), SceneError> {
        let scene = scene()?;
        let cropped = scene.crop((DVec3::new(2.5, 2.5, 0.0), DVec3::new(4.0, 4.0, 10.0)));

        assert_eq!(cropped.num_points3d(), 1);
        assert!(cropped.exists_point3d(4));
        assert_eq!(cropped.num_images(), 2);
        assert_eq!(cropped.reg_image_ids(), &[3, 4]);
        assert_eq!(cropped.num_cameras(), 2);
        assert_eq!(cropped.image(3)?.num_points3d(), 1);
        cropped.assert_consistency();

        let empty = scene.crop((DVec3::splat(10.0), DVec3::splat(20.0)));
        assert_eq!(empty.num_points3d(), 0);
        assert_eq!(empty.num_images(), 0);
        assert_eq!(empty.num_cameras(), 0);
        Ok(())
    }
}
