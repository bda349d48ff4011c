use serde::{Deserialize, Serialize};

/// Parameters of [`Reconstruction::normalize`](crate::reconstruction::Reconstruction::normalize).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeOptions {
    /// Target extent of the trimmed anchor distribution along its largest axis.
    pub extent: f64,
    /// Lower percentile of the anchors kept per axis, in `[0, 1]`.
    pub p0: f64,
    /// Upper percentile of the anchors kept per axis, in `[0, 1]`.
    pub p1: f64,
    /// Anchor on the registered camera centers instead of the 3D points.
    pub use_images: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            extent: 10.0,
            p0: 0.1,
            p1: 0.9,
            use_images: true,
        }
    }
}

/// How the per-observation reprojection errors of a point are aggregated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprojErrorPolicy {
    /// Reject a point if the mean error exceeds the threshold.
    #[default]
    Mean,
    /// Reject a point if any observation error exceeds the threshold.
    Max,
}

/// How the pairwise triangulation angles of a point are aggregated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriAnglePolicy {
    /// Keep a point if at least one pair of observing cameras reaches the angle.
    #[default]
    BestPair,
    /// Keep a point only if every pair of observing cameras reaches the angle.
    AllPairs,
}

/// Parameters of the 3D point filters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Maximum reprojection error in pixels.
    pub max_reproj_error: f64,
    /// Minimum triangulation angle in degrees.
    pub min_tri_angle: f64,
    /// Aggregation of the reprojection errors.
    pub reproj_error_policy: ReprojErrorPolicy,
    /// Aggregation of the triangulation angles.
    pub tri_angle_policy: TriAnglePolicy,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            max_reproj_error: 4.0,
            min_tri_angle: 1.5,
            reproj_error_policy: ReprojErrorPolicy::default(),
            tri_angle_policy: TriAnglePolicy::default(),
        }
    }
}

/// Parameters of [`Reconstruction::filter_images`].
///
/// [`Reconstruction::filter_images`]: crate::reconstruction::Reconstruction::filter_images
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageFilterOptions {
    /// Minimum ratio of focal length to the largest image dimension.
    pub min_focal_length_ratio: f64,
    /// Maximum ratio of focal length to the largest image dimension.
    pub max_focal_length_ratio: f64,
    /// Maximum absolute value of any distortion parameter.
    pub max_extra_param: f64,
}

impl Default for ImageFilterOptions {
    fn default() -> Self {
        Self {
            min_focal_length_ratio: 0.1,
            max_focal_length_ratio: 10.0,
            max_extra_param: 1.0,
        }
    }
}
