use glam::{DQuat, DVec3};

use crate::camera::Camera;

/// Rigid transformation in 3D: rotation + translation.
///
/// Images store their pose as `cam_from_world`, i.e. `x_cam = R * x_world + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rigid3d {
    /// Rotation as a unit quaternion
    pub rotation: DQuat,
    /// Translation vector
    pub translation: DVec3,
}

impl Default for Rigid3d {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Rigid3d {
    /// Identity transformation
    pub const IDENTITY: Self = Self {
        rotation: DQuat::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create from a rotation and a translation.
    pub fn new(rotation: DQuat, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create from a quaternion given as `[qw, qx, qy, qz]` and a translation.
    ///
    /// The quaternion is normalized unless it already has unit length.
    pub fn from_wxyz(qvec: [f64; 4], tvec: [f64; 3]) -> Self {
        let rotation = DQuat::from_xyzw(qvec[1], qvec[2], qvec[3], qvec[0]);
        let rotation = if (rotation.length_squared() - 1.0).abs() > 1e-12 {
            rotation.normalize()
        } else {
            rotation
        };
        Self {
            rotation,
            translation: DVec3::from_array(tvec),
        }
    }

    /// The rotation quaternion as `[qw, qx, qy, qz]`.
    pub fn wxyz(&self) -> [f64; 4] {
        [
            self.rotation.w,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        ]
    }

    /// Apply the transformation to a point.
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// Inverse transformation
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }
}

impl std::ops::Mul for Rigid3d {
    type Output = Rigid3d;

    fn mul(self, rhs: Self) -> Self::Output {
        Rigid3d {
            rotation: (self.rotation * rhs.rotation).normalize(),
            translation: self.rotation * rhs.translation + self.translation,
        }
    }
}

/// Similarity transformation in 3D: scale + rotation + translation.
///
/// Used as `new_from_old_world`, i.e. `x_new = s * R * x_old + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sim3d {
    /// Uniform scale factor
    pub scale: f64,
    /// Rotation as a unit quaternion
    pub rotation: DQuat,
    /// Translation vector
    pub translation: DVec3,
}

impl Default for Sim3d {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Sim3d {
    /// Identity transformation
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        rotation: DQuat::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create from scale, rotation and translation.
    pub fn new(scale: f64, rotation: DQuat, translation: DVec3) -> Self {
        Self {
            scale,
            rotation,
            translation,
        }
    }

    /// Apply the transformation to a point.
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.scale * (self.rotation * point) + self.translation
    }

    /// Inverse transformation
    pub fn inverse(&self) -> Self {
        let scale = 1.0 / self.scale;
        let rotation = self.rotation.inverse();
        Self {
            scale,
            rotation,
            translation: -scale * (rotation * self.translation),
        }
    }

    /// Express a `cam_from_world` pose in the new world frame.
    ///
    /// The camera frame is rescaled along with the world so the result stays rigid.
    pub fn transform_pose(&self, cam_from_world: &Rigid3d) -> Rigid3d {
        let old_from_new = self.inverse();
        let rotation = (cam_from_world.rotation * old_from_new.rotation).normalize();
        let translation =
            cam_from_world.rotation * old_from_new.translation + cam_from_world.translation;
        Rigid3d {
            rotation,
            translation: translation * self.scale,
        }
    }
}

/// Angle between the two viewing rays from `center1` and `center2` to `point`.
///
/// The result is in radians and folded into `[0, pi / 2]`, so the direction of
/// the rays does not matter.
pub fn calculate_triangulation_angle(center1: DVec3, center2: DVec3, point: DVec3) -> f64 {
    let baseline_length_squared = center1.distance_squared(center2);
    let ray_length_squared1 = point.distance_squared(center1);
    let ray_length_squared2 = point.distance_squared(center2);

    let denominator = 2.0 * (ray_length_squared1 * ray_length_squared2).sqrt();
    if denominator == 0.0 {
        return 0.0;
    }

    let nominator = ray_length_squared1 + ray_length_squared2 - baseline_length_squared;
    let angle = (nominator / denominator).clamp(-1.0, 1.0).acos().abs();
    angle.min(std::f64::consts::PI - angle)
}

/// Squared pixel distance between an observation and the projection of `xyz`.
///
/// Returns `None` if the point has non-positive depth in the camera.
pub fn calculate_squared_reprojection_error(
    point2d: [f64; 2],
    xyz: DVec3,
    cam_from_world: &Rigid3d,
    camera: &Camera,
) -> Option<f64> {
    let point_in_cam = cam_from_world.transform_point(xyz);
    let projected = camera.img_from_cam(point_in_cam.to_array())?;
    let dx = projected[0] - point2d[0];
    let dy = projected[1] - point2d[1];
    Some(dx * dx + dy * dy)
}

/// Whether a point lies in front of the camera.
pub fn has_point_positive_depth(cam_from_world: &Rigid3d, xyz: DVec3) -> bool {
    cam_from_world.transform_point(xyz).z > f64::EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraModelId;
    use approx::assert_relative_eq;

    fn assert_vec_eq(a: DVec3, b: DVec3) {
        assert_relative_eq!(a.x, b.x, epsilon = 1e-9);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-9);
        assert_relative_eq!(a.z, b.z, epsilon = 1e-9);
    }

    #[test]
    fn test_rigid_inverse() {
        let pose = Rigid3d::new(
            DQuat::from_axis_angle(DVec3::Y, 0.3),
            DVec3::new(1.0, 2.0, 3.0),
        );
        let point = DVec3::new(-0.5, 0.2, 4.0);
        let roundtrip = pose.inverse().transform_point(pose.transform_point(point));
        assert_vec_eq(roundtrip, point);

        let identity = pose * pose.inverse();
        assert_vec_eq(identity.translation, DVec3::ZERO);
    }

    #[test]
    fn test_wxyz_roundtrip() {
        let pose = Rigid3d::from_wxyz([1.0, 0.0, 0.0, 0.0], [1.0, 2.0, 3.0]);
        assert_eq!(pose.wxyz(), [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(pose.translation, DVec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_sim3_inverse() {
        let sim = Sim3d::new(
            2.5,
            DQuat::from_axis_angle(DVec3::X, 0.7),
            DVec3::new(0.1, -4.0, 2.0),
        );
        let point = DVec3::new(1.0, 2.0, 3.0);
        assert_vec_eq(sim.inverse().transform_point(sim.transform_point(point)), point);
    }

    #[test]
    fn test_sim3_transform_pose_preserves_projection() {
        let cam_from_world = Rigid3d::new(
            DQuat::from_axis_angle(DVec3::Z, 0.2),
            DVec3::new(0.5, 0.0, 5.0),
        );
        let sim = Sim3d::new(
            3.0,
            DQuat::from_axis_angle(DVec3::Y, -0.4),
            DVec3::new(1.0, 1.0, -2.0),
        );
        let point = DVec3::new(0.3, -0.2, 1.0);

        let cam_from_new_world = sim.transform_pose(&cam_from_world);
        let before = cam_from_world.transform_point(point);
        let after = cam_from_new_world.transform_point(sim.transform_point(point));

        // the camera frame is scaled with the scene, the direction is unchanged
        assert_vec_eq(after, before * sim.scale);
    }

    #[test]
    fn test_triangulation_angle() {
        let angle = calculate_triangulation_angle(
            DVec3::new(-1.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 0.0, 1.0),
        );
        assert_relative_eq!(angle, std::f64::consts::FRAC_PI_2, epsilon = 1e-12);

        let angle = calculate_triangulation_angle(DVec3::ZERO, DVec3::ZERO, DVec3::Z);
        assert_relative_eq!(angle, 0.0);
    }

    #[test]
    fn test_reprojection_error() -> Result<(), crate::error::SceneError> {
        let camera = Camera::new(
            1,
            CameraModelId::SimplePinhole,
            100,
            100,
            vec![100.0, 50.0, 50.0],
        )?;
        let pose = Rigid3d::IDENTITY;
        let error =
            calculate_squared_reprojection_error([53.0, 54.0], DVec3::Z, &pose, &camera).unwrap();
        assert_relative_eq!(error, 25.0);
        assert!(
            calculate_squared_reprojection_error([50.0, 50.0], -DVec3::Z, &pose, &camera).is_none()
        );
        assert!(!has_point_positive_depth(&pose, -DVec3::Z));
        Ok(())
    }
}
