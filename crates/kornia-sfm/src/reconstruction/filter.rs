use std::collections::HashSet;

use super::Reconstruction;
use crate::{
    geometry::{
        calculate_squared_reprojection_error, calculate_triangulation_angle,
        has_point_positive_depth,
    },
    options::{FilterOptions, ImageFilterOptions, ReprojErrorPolicy, TriAnglePolicy},
    point3d::{Point3D, TrackElement},
    types::{ImageId, Point3DId},
};

impl<'g> Reconstruction<'g> {
    /// Run the reprojection error filter and then the triangulation angle
    /// filter on the given points.
    ///
    /// Returns the number of removed observations.
    pub fn filter_points3d(
        &mut self,
        options: &FilterOptions,
        point3d_ids: &HashSet<Point3DId>,
    ) -> usize {
        self.filter_points3d_with_large_reprojection_error(
            options.max_reproj_error,
            point3d_ids,
            options.reproj_error_policy,
        ) + self.filter_points3d_with_small_triangulation_angle(
            options.min_tri_angle,
            point3d_ids,
            options.tri_angle_policy,
        )
    }

    /// Filter the points observed by any of the given images.
    pub fn filter_points3d_in_images(
        &mut self,
        options: &FilterOptions,
        image_ids: &HashSet<ImageId>,
    ) -> usize {
        let point3d_ids = image_ids
            .iter()
            .filter_map(|image_id| self.images.get(image_id))
            .flat_map(|image| image.points2d.iter().filter_map(|p| p.point3d_id))
            .collect::<HashSet<_>>();
        self.filter_points3d(options, &point3d_ids)
    }

    /// Filter every point of the scene.
    pub fn filter_all_points3d(&mut self, options: &FilterOptions) -> usize {
        let point3d_ids = self.point3d_ids();
        self.filter_points3d(options, &point3d_ids)
    }

    /// Delete the points whose reprojection error exceeds `max_reproj_error`
    /// pixels or which lie behind one of their observing cameras.
    ///
    /// The cached error of the surviving points is updated. Returns the number
    /// of removed observations.
    pub fn filter_points3d_with_large_reprojection_error(
        &mut self,
        max_reproj_error: f64,
        point3d_ids: &HashSet<Point3DId>,
        policy: ReprojErrorPolicy,
    ) -> usize {
        let num_observations = self.compute_num_observations();

        let mut rejected = Vec::new();
        for &point3d_id in point3d_ids {
            let Some(point3d) = self.points3d.get(&point3d_id) else {
                continue;
            };
            if point3d.track.is_empty() {
                continue;
            }

            let Some(errors) = self.reprojection_errors(point3d) else {
                rejected.push(point3d_id);
                continue;
            };
            let mean = errors.iter().sum::<f64>() / errors.len() as f64;
            let worst = errors.iter().copied().fold(0.0, f64::max);
            let reject = match policy {
                ReprojErrorPolicy::Mean => mean > max_reproj_error,
                ReprojErrorPolicy::Max => worst > max_reproj_error,
            };

            if reject {
                rejected.push(point3d_id);
            } else if let Some(point3d) = self.points3d.get_mut(&point3d_id) {
                point3d.error = mean;
            }
        }

        for point3d_id in &rejected {
            self.remove_point3d(*point3d_id);
        }

        let num_filtered = num_observations - self.compute_num_observations();
        log::debug!(
            "filtered {} points3D with {} observations by reprojection error",
            rejected.len(),
            num_filtered
        );
        num_filtered
    }

    /// Delete the points seen under a triangulation angle below
    /// `min_tri_angle` degrees.
    ///
    /// With [`TriAnglePolicy::BestPair`] a point survives if any pair of its
    /// observing cameras reaches the angle, with [`TriAnglePolicy::AllPairs`]
    /// only if every pair does. Pairs of observations in the same image are
    /// ignored. Returns the number of removed observations.
    pub fn filter_points3d_with_small_triangulation_angle(
        &mut self,
        min_tri_angle: f64,
        point3d_ids: &HashSet<Point3DId>,
        policy: TriAnglePolicy,
    ) -> usize {
        let num_observations = self.compute_num_observations();
        let min_tri_angle_rad = min_tri_angle.to_radians();

        let mut rejected = Vec::new();
        for &point3d_id in point3d_ids {
            let Some(point3d) = self.points3d.get(&point3d_id) else {
                continue;
            };
            if point3d.track.len() < 2 {
                continue;
            }

            let centers = point3d
                .track
                .iter()
                .filter_map(|el| {
                    let image = self.images.get(&el.image_id)?;
                    Some((el.image_id, image.projection_center()))
                })
                .collect::<Vec<_>>();

            let mut angles = centers.iter().enumerate().flat_map(|(i, (image_id1, c1))| {
                centers[i + 1..]
                    .iter()
                    .filter(move |(image_id2, _)| image_id1 != image_id2)
                    .map(move |(_, c2)| calculate_triangulation_angle(*c1, *c2, point3d.xyz))
            });

            let keep = match policy {
                TriAnglePolicy::BestPair => angles.any(|angle| angle >= min_tri_angle_rad),
                TriAnglePolicy::AllPairs => angles.all(|angle| angle >= min_tri_angle_rad),
            };
            if !keep {
                rejected.push(point3d_id);
            }
        }

        for point3d_id in &rejected {
            self.remove_point3d(*point3d_id);
        }

        let num_filtered = num_observations - self.compute_num_observations();
        log::debug!(
            "filtered {} points3D with {} observations by triangulation angle",
            rejected.len(),
            num_filtered
        );
        num_filtered
    }

    /// Delete every single observation whose point lies behind the observing camera.
    ///
    /// Points left with fewer than two observations are deleted. Returns the
    /// number of removed observations.
    pub fn filter_observations_with_negative_depth(&mut self) -> usize {
        let num_observations = self.compute_num_observations();

        let images = &self.images;
        let behind = self
            .points3d
            .iter()
            .flat_map(|(&point3d_id, point3d)| {
                point3d.track.iter().filter_map(move |el| {
                    let image = images.get(&el.image_id)?;
                    (!has_point_positive_depth(&image.cam_from_world, point3d.xyz))
                        .then_some((*el, point3d_id))
                })
            })
            .collect::<Vec<(TrackElement, Point3DId)>>();

        for (el, point3d_id) in behind {
            // a cascade may already have removed the point
            if self.linked_point3d(el) == Some(point3d_id) {
                self.remove_observation(el, point3d_id);
            }
        }

        let num_filtered = num_observations - self.compute_num_observations();
        log::debug!("filtered {} observations with negative depth", num_filtered);
        num_filtered
    }

    /// Deregister the images without 3D points or with implausible cameras.
    ///
    /// Returns the deregistered image ids in registration order.
    pub fn filter_images(&mut self, options: &ImageFilterOptions) -> Vec<ImageId> {
        let filtered = self
            .reg_image_ids
            .iter()
            .copied()
            .filter(|image_id| {
                let Some(image) = self.images.get(image_id) else {
                    return false;
                };
                let bogus_camera = self.cameras.get(&image.camera_id).is_some_and(|camera| {
                    camera.has_bogus_params(
                        options.min_focal_length_ratio,
                        options.max_focal_length_ratio,
                        options.max_extra_param,
                    )
                });
                image.num_points3d == 0 || bogus_camera
            })
            .collect::<Vec<_>>();

        for &image_id in &filtered {
            self.delete_image_observations(image_id);
            if let Some(image) = self.images.get_mut(&image_id) {
                image.registered = false;
            }
        }
        self.reg_image_ids.retain(|image_id| !filtered.contains(image_id));

        log::debug!("filtered {} images", filtered.len());
        filtered
    }

    /// Total number of observations over all tracks.
    pub fn compute_num_observations(&self) -> usize {
        self.points3d.values().map(|p| p.track.len()).sum()
    }

    /// Mean number of observations per 3D point, zero without points.
    pub fn compute_mean_track_length(&self) -> f64 {
        if self.points3d.is_empty() {
            return 0.0;
        }
        self.compute_num_observations() as f64 / self.points3d.len() as f64
    }

    /// Mean number of linked keypoints per registered image, zero without
    /// registered images.
    pub fn compute_mean_observations_per_reg_image(&self) -> f64 {
        if self.reg_image_ids.is_empty() {
            return 0.0;
        }
        let num_observations = self
            .reg_image_ids
            .iter()
            .filter_map(|image_id| self.images.get(image_id))
            .map(|image| image.num_points3d)
            .sum::<usize>();
        num_observations as f64 / self.reg_image_ids.len() as f64
    }

    /// Mean of the cached reprojection errors of the points that have one.
    pub fn compute_mean_reprojection_error(&self) -> f64 {
        let (sum, count) = self
            .points3d
            .values()
            .filter(|p| p.has_error())
            .fold((0.0, 0usize), |(sum, count), p| (sum + p.error, count + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Recompute the cached mean reprojection error of every point.
    ///
    /// Observations behind their camera are skipped; a point without any
    /// usable observation gets an unknown (negative) error.
    pub fn update_point3d_errors(&mut self) {
        let errors = self
            .points3d
            .iter()
            .map(|(&point3d_id, point3d)| {
                let errors = point3d
                    .track
                    .iter()
                    .filter_map(|el| self.reprojection_error(point3d, *el))
                    .collect::<Vec<_>>();
                let error = if errors.is_empty() {
                    -1.0
                } else {
                    errors.iter().sum::<f64>() / errors.len() as f64
                };
                (point3d_id, error)
            })
            .collect::<Vec<_>>();

        for (point3d_id, error) in errors {
            if let Some(point3d) = self.points3d.get_mut(&point3d_id) {
                point3d.error = error;
            }
        }
    }

    // None if any observation sees the point behind the camera.
    fn reprojection_errors(&self, point3d: &Point3D) -> Option<Vec<f64>> {
        point3d
            .track
            .iter()
            .map(|el| self.reprojection_error(point3d, *el))
            .collect()
    }

    fn reprojection_error(&self, point3d: &Point3D, el: TrackElement) -> Option<f64> {
        let Some(image) = self.images.get(&el.image_id) else {
            panic!("track element {el:?} refers to a missing image");
        };
        let Some(camera) = self.cameras.get(&image.camera_id) else {
            panic!("image {} refers to a missing camera", el.image_id);
        };
        let point2d = image.points2d.get(el.point2d_idx as usize)?;
        calculate_squared_reprojection_error(
            point2d.xy,
            point3d.xyz,
            &image.cam_from_world,
            camera,
        )
        .map(f64::sqrt)
    }
}
