use std::collections::HashSet;

use glam::DVec3;

use super::{ImagePairStat, Reconstruction};
use crate::{
    error::{Entity, SceneError},
    point3d::{Point3D, Track, TrackElement},
    types::{image_pair_to_pair_id, ImageId, Point2DIdx, Point3DId},
};

impl<'g> Reconstruction<'g> {
    /// Add a new 3D point and link every observation of its track.
    ///
    /// Requires a bound correspondence graph. Fails if the track has fewer than
    /// two observations, refers to an unknown image or keypoint, or uses a
    /// keypoint that is already linked to a 3D point.
    pub fn add_point3d(
        &mut self,
        xyz: DVec3,
        track: Track,
        color: [u8; 3],
    ) -> Result<Point3DId, SceneError> {
        self.ensure_correspondence_graph()?;
        self.validate_new_track(&track)?;

        let point3d_id = self.max_point3d_id + 1;
        self.insert_point3d(point3d_id, xyz, track, color, -1.0);

        Ok(point3d_id)
    }

    /// Add a 3D point with a known identifier, e.g. when reading a scene.
    ///
    /// Does not require a correspondence graph. The identifier generator is
    /// advanced past `point3d_id` so it is never handed out again.
    pub fn add_point3d_with_id(
        &mut self,
        point3d_id: Point3DId,
        xyz: DVec3,
        track: Track,
        color: [u8; 3],
    ) -> Result<(), SceneError> {
        if self.exists_point3d(point3d_id) {
            return Err(SceneError::InvalidArgument(format!(
                "point3D {point3d_id} already exists"
            )));
        }
        self.validate_new_track(&track)?;
        self.insert_point3d(point3d_id, xyz, track, color, -1.0);
        Ok(())
    }

    /// Add an observation to an existing 3D point.
    ///
    /// Requires a bound correspondence graph. The triangulated correspondence
    /// count of every pair between the observing image and the images already
    /// observing the point through a raw correspondence is incremented.
    pub fn add_observation(
        &mut self,
        point3d_id: Point3DId,
        track_el: TrackElement,
    ) -> Result<(), SceneError> {
        self.ensure_correspondence_graph()?;
        if !self.exists_point3d(point3d_id) {
            return Err(SceneError::not_found(Entity::Point3D, point3d_id));
        }
        self.validate_free_keypoint(track_el)?;

        self.link_keypoint(track_el, point3d_id);
        if let Some(point3d) = self.points3d.get_mut(&point3d_id) {
            point3d.track.add_element(track_el.image_id, track_el.point2d_idx);
        }
        self.set_observation_as_triangulated(track_el, true);

        Ok(())
    }

    /// Merge two 3D points into a new one and return its identifier.
    ///
    /// The new position and color are the track-length weighted averages of the
    /// two points, the new track is the concatenation of both tracks. Both
    /// source points are deleted.
    pub fn merge_points3d(
        &mut self,
        point3d_id1: Point3DId,
        point3d_id2: Point3DId,
    ) -> Result<Point3DId, SceneError> {
        self.ensure_correspondence_graph()?;
        if point3d_id1 == point3d_id2 {
            return Err(SceneError::InvalidArgument(format!(
                "cannot merge point3D {point3d_id1} with itself"
            )));
        }

        let point3d1 = self.point3d(point3d_id1)?;
        let point3d2 = self.point3d(point3d_id2)?;

        let weight1 = point3d1.track.len() as f64;
        let weight2 = point3d2.track.len() as f64;
        let total = weight1 + weight2;

        let xyz = (weight1 * point3d1.xyz + weight2 * point3d2.xyz) / total;
        let color = std::array::from_fn(|c| {
            ((weight1 * point3d1.color[c] as f64 + weight2 * point3d2.color[c] as f64) / total)
                .round() as u8
        });
        let track = point3d1
            .track
            .iter()
            .chain(point3d2.track.iter())
            .copied()
            .collect::<Track>();

        self.remove_point3d(point3d_id1);
        self.remove_point3d(point3d_id2);

        let merged_id = self.max_point3d_id + 1;
        self.insert_point3d(merged_id, xyz, track, color, -1.0);

        log::debug!(
            "merged point3D {} and {} into {}",
            point3d_id1,
            point3d_id2,
            merged_id
        );

        Ok(merged_id)
    }

    /// Delete a 3D point and all references to it in the observing images.
    pub fn delete_point3d(&mut self, point3d_id: Point3DId) -> Result<(), SceneError> {
        if !self.exists_point3d(point3d_id) {
            return Err(SceneError::not_found(Entity::Point3D, point3d_id));
        }
        self.remove_point3d(point3d_id);
        Ok(())
    }

    /// Delete one observation of a 3D point.
    ///
    /// If the track of the point would be left with a single observation, the
    /// entire point is deleted.
    pub fn delete_observation(
        &mut self,
        image_id: ImageId,
        point2d_idx: Point2DIdx,
    ) -> Result<(), SceneError> {
        let point2d = self.image(image_id)?.point2d(point2d_idx)?;
        let point3d_id = point2d.point3d_id.ok_or_else(|| {
            SceneError::InvalidArgument(format!(
                "keypoint {point2d_idx} of image {image_id} is not linked to a point3D"
            ))
        })?;
        self.remove_observation(TrackElement::new(image_id, point2d_idx), point3d_id);
        Ok(())
    }

    /// Delete all keypoints of all images and all 3D points.
    ///
    /// Only poses and cameras are kept.
    pub fn delete_all_points2d_and_points3d(&mut self) {
        self.points3d.clear();
        for image in self.images.values_mut() {
            image.points2d.clear();
            image.num_points3d = 0;
        }
        for stat in self.image_pair_stats.values_mut() {
            stat.num_tri_corrs = 0;
        }
    }

    /// Register an existing image. Registering twice has no effect.
    pub fn register_image(&mut self, image_id: ImageId) -> Result<(), SceneError> {
        let image = self.image_mut(image_id)?;
        if !image.registered {
            image.registered = true;
            self.reg_image_ids.push(image_id);
        }
        Ok(())
    }

    /// Deregister an existing image and delete all its observations.
    ///
    /// Points left with a single observation are deleted.
    pub fn deregister_image(&mut self, image_id: ImageId) -> Result<(), SceneError> {
        if !self.exists_image(image_id) {
            return Err(SceneError::not_found(Entity::Image, image_id));
        }

        self.delete_image_observations(image_id);

        if let Some(image) = self.images.get_mut(&image_id) {
            image.registered = false;
        }
        self.reg_image_ids.retain(|&id| id != image_id);

        Ok(())
    }

    /// Panic if the tracks and the keypoint back-references disagree.
    ///
    /// A mismatch means the scene has been corrupted by a bug in this crate.
    pub fn assert_consistency(&self) {
        for (&point3d_id, point3d) in &self.points3d {
            assert!(
                point3d.track.len() != 1,
                "point3D {point3d_id} has a single observation"
            );
            assert!(
                point3d_id <= self.max_point3d_id,
                "point3D {point3d_id} is ahead of the id generator"
            );

            let mut seen = HashSet::with_capacity(point3d.track.len());
            for el in &point3d.track {
                assert!(seen.insert(*el), "point3D {point3d_id} observes {el:?} twice");
                let linked = self
                    .images
                    .get(&el.image_id)
                    .and_then(|image| image.points2d.get(el.point2d_idx as usize))
                    .and_then(|point2d| point2d.point3d_id);
                assert_eq!(
                    linked,
                    Some(point3d_id),
                    "keypoint {el:?} does not refer back to point3D {point3d_id}"
                );
            }
        }

        for (&image_id, image) in &self.images {
            let mut num_points3d = 0;
            for (idx, point2d) in image.points2d.iter().enumerate() {
                let Some(point3d_id) = point2d.point3d_id else {
                    continue;
                };
                num_points3d += 1;
                let el = TrackElement::new(image_id, idx as Point2DIdx);
                let observed = self
                    .points3d
                    .get(&point3d_id)
                    .is_some_and(|point3d| point3d.track.iter().any(|other| *other == el));
                assert!(
                    observed,
                    "keypoint {el:?} refers to point3D {point3d_id} which does not observe it"
                );
            }
            assert_eq!(
                num_points3d, image.num_points3d,
                "image {image_id} miscounts its linked keypoints"
            );
        }

        let reg_image_ids = self.reg_image_ids.iter().collect::<HashSet<_>>();
        assert_eq!(
            reg_image_ids.len(),
            self.reg_image_ids.len(),
            "duplicate registered image"
        );
        for (image_id, image) in &self.images {
            assert_eq!(
                image.registered,
                reg_image_ids.contains(image_id),
                "image {image_id} registration flag disagrees with the registered list"
            );
        }
        assert!(
            self.reg_image_ids.iter().all(|id| self.images.contains_key(id)),
            "registered list refers to a missing image"
        );
    }

    /// Delete every observation held by an image.
    pub(crate) fn delete_image_observations(&mut self, image_id: ImageId) {
        let Some(image) = self.images.get(&image_id) else {
            return;
        };
        let observations = image
            .points2d
            .iter()
            .enumerate()
            .filter(|(_, point2d)| point2d.has_point3d())
            .map(|(idx, _)| idx as Point2DIdx)
            .collect::<Vec<_>>();

        for point2d_idx in observations {
            // an earlier cascade may already have unlinked this keypoint
            let linked = self
                .images
                .get(&image_id)
                .and_then(|image| image.points2d.get(point2d_idx as usize))
                .and_then(|point2d| point2d.point3d_id);
            if let Some(point3d_id) = linked {
                self.remove_observation(TrackElement::new(image_id, point2d_idx), point3d_id);
            }
        }
    }

    /// Insert a point without observations. Only used for visualization imports.
    pub(crate) fn insert_untracked_point3d(&mut self, xyz: DVec3, color: [u8; 3]) -> Point3DId {
        let point3d_id = self.max_point3d_id + 1;
        self.insert_point3d(point3d_id, xyz, Track::new(), color, -1.0);
        point3d_id
    }

    /// Insert a point without observations under a known id, e.g. when
    /// reading back a scene that holds imported points.
    pub(crate) fn insert_untracked_point3d_with_id(
        &mut self,
        point3d_id: Point3DId,
        xyz: DVec3,
        color: [u8; 3],
    ) -> Result<(), SceneError> {
        if self.exists_point3d(point3d_id) {
            return Err(SceneError::InvalidArgument(format!(
                "point3D {point3d_id} already exists"
            )));
        }
        self.insert_point3d(point3d_id, xyz, Track::new(), color, -1.0);
        Ok(())
    }

    fn validate_new_track(&self, track: &Track) -> Result<(), SceneError> {
        if track.len() < 2 {
            return Err(SceneError::InvalidArgument(format!(
                "a point3D needs at least 2 observations, got {}",
                track.len()
            )));
        }
        let mut seen = HashSet::with_capacity(track.len());
        for el in track {
            if !seen.insert(*el) {
                return Err(SceneError::InvalidArgument(format!(
                    "track observes {el:?} twice"
                )));
            }
            self.validate_free_keypoint(*el)?;
        }
        Ok(())
    }

    fn validate_free_keypoint(&self, el: TrackElement) -> Result<(), SceneError> {
        let image = self.images.get(&el.image_id).ok_or_else(|| {
            SceneError::InvalidArgument(format!(
                "track element refers to unknown image {}",
                el.image_id
            ))
        })?;
        if let Some(point3d_id) = image.point2d(el.point2d_idx)?.point3d_id {
            return Err(SceneError::InvalidArgument(format!(
                "keypoint {} of image {} is already linked to point3D {}",
                el.point2d_idx, el.image_id, point3d_id
            )));
        }
        Ok(())
    }

    // Callers validate the track first.
    pub(super) fn insert_point3d(
        &mut self,
        point3d_id: Point3DId,
        xyz: DVec3,
        track: Track,
        color: [u8; 3],
        error: f64,
    ) {
        for el in &track {
            self.link_keypoint(*el, point3d_id);
        }
        let elements = track.elements().to_vec();

        self.points3d.insert(
            point3d_id,
            Point3D {
                xyz,
                color,
                error,
                track,
            },
        );
        self.max_point3d_id = self.max_point3d_id.max(point3d_id);

        for el in elements {
            self.set_observation_as_triangulated(el, false);
        }
    }

    pub(super) fn remove_point3d(&mut self, point3d_id: Point3DId) {
        let Some(point3d) = self.points3d.get(&point3d_id) else {
            return;
        };
        let elements = point3d.track.elements().to_vec();

        // the statistics compare links, so they are updated before unlinking
        for &el in &elements {
            self.reset_tri_observations(el, true);
        }
        for el in elements {
            self.unlink_keypoint(el, point3d_id);
        }

        self.points3d.remove(&point3d_id);
    }

    pub(super) fn remove_observation(&mut self, el: TrackElement, point3d_id: Point3DId) {
        let track_len = match self.points3d.get(&point3d_id) {
            Some(point3d) => point3d.track.len(),
            None => panic!("keypoint {el:?} refers to missing point3D {point3d_id}"),
        };

        if track_len <= 2 {
            self.remove_point3d(point3d_id);
            return;
        }

        self.reset_tri_observations(el, false);
        if let Some(point3d) = self.points3d.get_mut(&point3d_id) {
            let removed = point3d.track.delete_element(el.image_id, el.point2d_idx);
            assert!(removed, "point3D {point3d_id} does not observe {el:?}");
        }
        self.unlink_keypoint(el, point3d_id);
    }

    fn link_keypoint(&mut self, el: TrackElement, point3d_id: Point3DId) {
        match self.images.get_mut(&el.image_id) {
            Some(image) => image.set_point3d_for_point2d(el.point2d_idx, point3d_id),
            None => panic!("track element {el:?} refers to a missing image"),
        }
    }

    fn unlink_keypoint(&mut self, el: TrackElement, point3d_id: Point3DId) {
        let Some(image) = self.images.get_mut(&el.image_id) else {
            panic!("track element {el:?} refers to a missing image");
        };
        let linked = image
            .points2d
            .get(el.point2d_idx as usize)
            .and_then(|point2d| point2d.point3d_id);
        assert_eq!(
            linked,
            Some(point3d_id),
            "keypoint {el:?} does not refer back to point3D {point3d_id}"
        );
        image.reset_point3d_for_point2d(el.point2d_idx);
    }

    pub(super) fn linked_point3d(&self, el: TrackElement) -> Option<Point3DId> {
        self.images
            .get(&el.image_id)
            .and_then(|image| image.points2d.get(el.point2d_idx as usize))
            .and_then(|point2d| point2d.point3d_id)
    }

    // Counts each triangulated raw correspondence once. A new point is counted
    // from the lower image id of each correspondence; a continued point counts
    // every correspondence of the new observation.
    fn set_observation_as_triangulated(&mut self, el: TrackElement, is_continued_point3d: bool) {
        let Some(graph) = self.correspondence_graph else {
            return;
        };
        let Some(point3d_id) = self.linked_point3d(el) else {
            return;
        };

        for corr in graph.find_correspondences(el.image_id, el.point2d_idx) {
            if corr.image_id == el.image_id
                || self.linked_point3d(corr) != Some(point3d_id)
                || !(is_continued_point3d || el.image_id < corr.image_id)
            {
                continue;
            }

            let stat = self
                .image_pair_stats
                .entry(image_pair_to_pair_id(el.image_id, corr.image_id))
                .or_insert_with(|| ImagePairStat {
                    num_tri_corrs: 0,
                    num_total_corrs: graph
                        .num_correspondences_between_images(el.image_id, corr.image_id),
                });
            stat.num_tri_corrs += 1;
            assert!(
                stat.num_tri_corrs <= stat.num_total_corrs,
                "image pair ({}, {}) has more triangulated than total correspondences",
                el.image_id,
                corr.image_id
            );
        }
    }

    fn reset_tri_observations(&mut self, el: TrackElement, is_deleted_point3d: bool) {
        let Some(graph) = self.correspondence_graph else {
            return;
        };
        let Some(point3d_id) = self.linked_point3d(el) else {
            return;
        };

        for corr in graph.find_correspondences(el.image_id, el.point2d_idx) {
            if corr.image_id == el.image_id
                || self.linked_point3d(corr) != Some(point3d_id)
                || (is_deleted_point3d && el.image_id >= corr.image_id)
            {
                continue;
            }

            let pair_id = image_pair_to_pair_id(el.image_id, corr.image_id);
            match self.image_pair_stats.get_mut(&pair_id) {
                Some(stat) if stat.num_tri_corrs > 0 => stat.num_tri_corrs -= 1,
                _ => panic!(
                    "image pair ({}, {}) lost a triangulated correspondence it never counted",
                    el.image_id, corr.image_id
                ),
            }
        }
    }

    /// Recount the triangulated correspondences of all pairs from scratch.
    pub(crate) fn recount_tri_observations(&mut self) {
        for stat in self.image_pair_stats.values_mut() {
            stat.num_tri_corrs = 0;
        }
        let elements = self
            .points3d
            .values()
            .flat_map(|point3d| point3d.track.iter().copied())
            .collect::<Vec<_>>();
        for el in elements {
            self.set_observation_as_triangulated(el, false);
        }
    }
}
