use crate::{error::SceneError, types::CameraId};

/// Represents a camera model id.
///
/// The numeric values are the ones stored in the binary scene format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraModelId {
    /// Simple pinhole camera model: f, cx, cy
    SimplePinhole = 0,
    /// Pinhole camera model: fx, fy, cx, cy
    Pinhole = 1,
    /// Simplified radial camera model: f, cx, cy, k
    SimpleRadial = 2,
    /// Radial camera model: f, cx, cy, k1, k2
    Radial = 3,
    /// OpenCV camera model: fx, fy, cx, cy, k1, k2, p1, p2
    OpenCV = 4,
}

impl CameraModelId {
    /// The textual name of the model.
    pub fn name(&self) -> &'static str {
        match self {
            CameraModelId::SimplePinhole => "SIMPLE_PINHOLE",
            CameraModelId::Pinhole => "PINHOLE",
            CameraModelId::SimpleRadial => "SIMPLE_RADIAL",
            CameraModelId::Radial => "RADIAL",
            CameraModelId::OpenCV => "OPENCV",
        }
    }

    /// Parse a model from its textual name.
    pub fn from_name(name: &str) -> Result<Self, SceneError> {
        match name {
            "SIMPLE_PINHOLE" => Ok(CameraModelId::SimplePinhole),
            "PINHOLE" => Ok(CameraModelId::Pinhole),
            "SIMPLE_RADIAL" => Ok(CameraModelId::SimpleRadial),
            "RADIAL" => Ok(CameraModelId::Radial),
            "OPENCV" => Ok(CameraModelId::OpenCV),
            _ => Err(SceneError::Parse(format!("Invalid camera model: {name}"))),
        }
    }

    /// Parse a model from its numeric id.
    pub fn from_id(id: i32) -> Result<Self, SceneError> {
        match id {
            0 => Ok(CameraModelId::SimplePinhole),
            1 => Ok(CameraModelId::Pinhole),
            2 => Ok(CameraModelId::SimpleRadial),
            3 => Ok(CameraModelId::Radial),
            4 => Ok(CameraModelId::OpenCV),
            _ => Err(SceneError::Parse(format!("Invalid camera model id: {id}"))),
        }
    }

    /// The number of parameters of the model.
    pub fn num_params(&self) -> usize {
        match self {
            CameraModelId::SimplePinhole => 3,
            CameraModelId::Pinhole => 4,
            CameraModelId::SimpleRadial => 4,
            CameraModelId::Radial => 5,
            CameraModelId::OpenCV => 8,
        }
    }

    fn focal_length_idxs(&self) -> &'static [usize] {
        match self {
            CameraModelId::SimplePinhole
            | CameraModelId::SimpleRadial
            | CameraModelId::Radial => &[0],
            CameraModelId::Pinhole | CameraModelId::OpenCV => &[0, 1],
        }
    }

    fn principal_point_idxs(&self) -> [usize; 2] {
        match self {
            CameraModelId::SimplePinhole
            | CameraModelId::SimpleRadial
            | CameraModelId::Radial => [1, 2],
            CameraModelId::Pinhole | CameraModelId::OpenCV => [2, 3],
        }
    }

    fn extra_params_idxs(&self) -> std::ops::Range<usize> {
        match self {
            CameraModelId::SimplePinhole | CameraModelId::Pinhole => 0..0,
            CameraModelId::SimpleRadial => 3..4,
            CameraModelId::Radial => 3..5,
            CameraModelId::OpenCV => 4..8,
        }
    }
}

/// Represents a camera with its intrinsic and distortion parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Camera id
    pub camera_id: CameraId,
    /// Camera model id
    pub model_id: CameraModelId,
    /// Image width
    pub width: usize,
    /// Image height
    pub height: usize,
    /// Camera parameters, laid out as documented on [`CameraModelId`].
    pub params: Vec<f64>,
}

impl Camera {
    /// Create a new camera, checking the number of parameters against the model.
    pub fn new(
        camera_id: CameraId,
        model_id: CameraModelId,
        width: usize,
        height: usize,
        params: Vec<f64>,
    ) -> Result<Self, SceneError> {
        let camera = Self {
            camera_id,
            model_id,
            width,
            height,
            params,
        };
        camera.verify_params()?;
        Ok(camera)
    }

    /// Check that the parameter vector matches the camera model.
    pub fn verify_params(&self) -> Result<(), SceneError> {
        if self.params.len() != self.model_id.num_params() {
            return Err(SceneError::InvalidArgument(format!(
                "camera {} of model {} expects {} params, got {}",
                self.camera_id,
                self.model_id.name(),
                self.model_id.num_params(),
                self.params.len()
            )));
        }
        Ok(())
    }

    /// Focal length along the x axis.
    pub fn focal_length_x(&self) -> f64 {
        self.params[self.model_id.focal_length_idxs()[0]]
    }

    /// Focal length along the y axis.
    pub fn focal_length_y(&self) -> f64 {
        let idxs = self.model_id.focal_length_idxs();
        self.params[idxs[idxs.len() - 1]]
    }

    /// Principal point (cx, cy).
    pub fn principal_point(&self) -> (f64, f64) {
        let [ix, iy] = self.model_id.principal_point_idxs();
        (self.params[ix], self.params[iy])
    }

    /// The distortion parameters of the camera.
    pub fn extra_params(&self) -> &[f64] {
        &self.params[self.model_id.extra_params_idxs()]
    }

    /// Whether the camera parameters are implausible.
    ///
    /// The focal lengths are compared to the largest image dimension and the
    /// distortion parameters to `max_extra_param` in absolute value.
    pub fn has_bogus_params(
        &self,
        min_focal_length_ratio: f64,
        max_focal_length_ratio: f64,
        max_extra_param: f64,
    ) -> bool {
        let max_size = self.width.max(self.height) as f64;
        let bogus_focal = self.model_id.focal_length_idxs().iter().any(|&i| {
            let ratio = self.params[i] / max_size;
            !(min_focal_length_ratio..=max_focal_length_ratio).contains(&ratio)
        });
        let bogus_extra = self
            .extra_params()
            .iter()
            .any(|p| p.abs() > max_extra_param);
        bogus_focal || bogus_extra
    }

    /// Project a point in camera coordinates to pixel coordinates.
    ///
    /// Returns `None` if the point is on or behind the image plane.
    pub fn img_from_cam(&self, point: [f64; 3]) -> Option<[f64; 2]> {
        if point[2] <= f64::EPSILON {
            return None;
        }

        // normalized image plane coordinates
        let u = point[0] / point[2];
        let v = point[1] / point[2];

        let (du, dv) = self.distortion(u, v);
        let (cx, cy) = self.principal_point();

        Some([
            self.focal_length_x() * (u + du) + cx,
            self.focal_length_y() * (v + dv) + cy,
        ])
    }

    /// Distortion offset of a point in the normalized image plane.
    fn distortion(&self, u: f64, v: f64) -> (f64, f64) {
        let extra = self.extra_params();
        let r2 = u * u + v * v;
        match self.model_id {
            CameraModelId::SimplePinhole | CameraModelId::Pinhole => (0.0, 0.0),
            CameraModelId::SimpleRadial => {
                let radial = extra[0] * r2;
                (u * radial, v * radial)
            }
            CameraModelId::Radial => {
                let radial = extra[0] * r2 + extra[1] * r2 * r2;
                (u * radial, v * radial)
            }
            CameraModelId::OpenCV => {
                let (k1, k2, p1, p2) = (extra[0], extra[1], extra[2], extra[3]);
                let radial = k1 * r2 + k2 * r2 * r2;
                let uv = u * v;
                (
                    u * radial + 2.0 * p1 * uv + p2 * (r2 + 2.0 * u * u),
                    v * radial + 2.0 * p2 * uv + p1 * (r2 + 2.0 * v * v),
                )
            }
        }
    }
}
