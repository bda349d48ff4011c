use glam::DVec3;

use crate::types::{ImageId, Point2DIdx};

/// One observation of a 3D point: a keypoint of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackElement {
    /// The observing image
    pub image_id: ImageId,
    /// The keypoint index inside the observing image
    pub point2d_idx: Point2DIdx,
}

impl TrackElement {
    /// Create a new track element.
    pub fn new(image_id: ImageId, point2d_idx: Point2DIdx) -> Self {
        Self {
            image_id,
            point2d_idx,
        }
    }
}

/// The ordered list of observations triangulated into one 3D point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    elements: Vec<TrackElement>,
}

impl Track {
    /// Create an empty track.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of observations.
    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if the track has no observations.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The observations of the track.
    pub fn elements(&self) -> &[TrackElement] {
        &self.elements
    }

    /// Append an observation.
    pub fn add_element(&mut self, image_id: ImageId, point2d_idx: Point2DIdx) {
        self.elements.push(TrackElement::new(image_id, point2d_idx));
    }

    /// Remove the observation of the given keypoint, if present.
    pub(crate) fn delete_element(&mut self, image_id: ImageId, point2d_idx: Point2DIdx) -> bool {
        let before = self.elements.len();
        self.elements
            .retain(|el| !(el.image_id == image_id && el.point2d_idx == point2d_idx));
        before != self.elements.len()
    }

    /// Iterate over the observations.
    pub fn iter(&self) -> std::slice::Iter<'_, TrackElement> {
        self.elements.iter()
    }
}

impl From<Vec<TrackElement>> for Track {
    fn from(elements: Vec<TrackElement>) -> Self {
        Self { elements }
    }
}

impl FromIterator<TrackElement> for Track {
    fn from_iter<I: IntoIterator<Item = TrackElement>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Track {
    type Item = &'a TrackElement;
    type IntoIter = std::slice::Iter<'a, TrackElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

/// A triangulated 3D point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point3D {
    /// Position in world coordinates
    pub xyz: DVec3,
    /// RGB color
    pub color: [u8; 3],
    /// Cached mean reprojection error in pixels, negative if unknown
    pub error: f64,
    pub(crate) track: Track,
}

impl Point3D {
    /// The observations of the point.
    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Whether the cached reprojection error has been computed.
    pub fn has_error(&self) -> bool {
        self.error >= 0.0
    }
}
