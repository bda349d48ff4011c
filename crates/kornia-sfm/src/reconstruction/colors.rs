use std::collections::HashMap;

use glam::DVec3;

use super::Reconstruction;
use crate::{
    error::{Entity, SceneError},
    image::Image,
    types::{ImageId, Point3DId},
};

/// Source of pixel colors for an image.
pub trait PixelSampler {
    /// Interpolated RGB color at the continuous pixel position `(x, y)`, with
    /// pixel centers at integer coordinates. `None` outside the image.
    fn sample(&self, x: f64, y: f64) -> Option<[f64; 3]>;
}

/// An interleaved 8-bit RGB image sampled with bilinear interpolation.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbImage {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl RgbImage {
    /// Create an image from row-major interleaved RGB data.
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self, SceneError> {
        if data.len() != width * height * 3 {
            return Err(SceneError::InvalidArgument(format!(
                "expected {} bytes for a {}x{} RGB image, got {}",
                width * height * 3,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    fn pixel(&self, col: usize, row: usize) -> [f64; 3] {
        let base = (row * self.width + col) * 3;
        [
            self.data[base] as f64,
            self.data[base + 1] as f64,
            self.data[base + 2] as f64,
        ]
    }
}

impl PixelSampler for RgbImage {
    fn sample(&self, x: f64, y: f64) -> Option<[f64; 3]> {
        if self.width == 0
            || self.height == 0
            || x < 0.0
            || y < 0.0
            || x > (self.width - 1) as f64
            || y > (self.height - 1) as f64
        {
            return None;
        }

        let col0 = x.trunc() as usize;
        let row0 = y.trunc() as usize;
        let col1 = (col0 + 1).min(self.width - 1);
        let row1 = (row0 + 1).min(self.height - 1);

        let frac_x = x.fract();
        let frac_y = y.fract();

        let w00 = (1.0 - frac_x) * (1.0 - frac_y);
        let w01 = frac_x * (1.0 - frac_y);
        let w10 = (1.0 - frac_x) * frac_y;
        let w11 = frac_x * frac_y;

        let p00 = self.pixel(col0, row0);
        let p01 = self.pixel(col1, row0);
        let p10 = self.pixel(col0, row1);
        let p11 = self.pixel(col1, row1);

        Some(std::array::from_fn(|k| {
            p00[k] * w00 + p01[k] * w01 + p10[k] * w10 + p11[k] * w11
        }))
    }
}

fn to_color(rgb: DVec3) -> [u8; 3] {
    let rgb = rgb.round().clamp(DVec3::ZERO, DVec3::splat(255.0));
    [rgb.x as u8, rgb.y as u8, rgb.z as u8]
}

impl<'g> Reconstruction<'g> {
    /// Color the black 3D points observed by an image from its pixels.
    ///
    /// Keypoint coordinates use the pixel corner convention, so the sampler
    /// is queried half a pixel up and left. Returns the number of recolored points.
    pub fn extract_colors_for_image(
        &mut self,
        image_id: ImageId,
        sampler: &dyn PixelSampler,
    ) -> Result<usize, SceneError> {
        let image = self
            .images
            .get(&image_id)
            .ok_or_else(|| SceneError::not_found(Entity::Image, image_id))?;

        let mut num_colored = 0;
        for point2d in &image.points2d {
            let Some(point3d_id) = point2d.point3d_id else {
                continue;
            };
            let Some(point3d) = self.points3d.get_mut(&point3d_id) else {
                continue;
            };
            if point3d.color != [0, 0, 0] {
                continue;
            }
            if let Some(rgb) = sampler.sample(point2d.xy[0] - 0.5, point2d.xy[1] - 0.5) {
                point3d.color = to_color(DVec3::from_array(rgb));
                num_colored += 1;
            }
        }

        Ok(num_colored)
    }

    /// Color every 3D point with the mean color over its observations in
    /// the registered images.
    ///
    /// `load` provides the pixels of an image; images it cannot provide are
    /// skipped with a warning. Points without any sample become black.
    pub fn extract_colors_for_all_images<S, F>(&mut self, mut load: F)
    where
        S: PixelSampler,
        F: FnMut(&Image) -> Option<S>,
    {
        let mut color_sums: HashMap<Point3DId, (DVec3, usize)> = HashMap::new();

        for image_id in &self.reg_image_ids {
            let Some(image) = self.images.get(image_id) else {
                continue;
            };
            let Some(sampler) = load(image) else {
                log::warn!("could not read pixels of image {}", image.name);
                continue;
            };

            for point2d in &image.points2d {
                let Some(point3d_id) = point2d.point3d_id else {
                    continue;
                };
                if let Some(rgb) = sampler.sample(point2d.xy[0] - 0.5, point2d.xy[1] - 0.5) {
                    let entry = color_sums.entry(point3d_id).or_insert((DVec3::ZERO, 0));
                    entry.0 += DVec3::from_array(rgb);
                    entry.1 += 1;
                }
            }
        }

        for (point3d_id, point3d) in self.points3d.iter_mut() {
            point3d.color = match color_sums.get(point3d_id) {
                Some((sum, count)) => to_color(*sum / *count as f64),
                None => [0, 0, 0],
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        camera::{Camera, CameraModelId},
        point3d::{Track, TrackElement},
    };

    fn scene() -> Result<Reconstruction<'static>, SceneError> {
        let mut scene = Reconstruction::new();
        scene.add_camera(Camera::new(
            1,
            CameraModelId::SimplePinhole,
            2,
            2,
            vec![1.0, 1.0, 1.0],
        )?)?;
        scene.add_image(Image::new(1, "a.png", 1, vec![[0.5, 0.5], [1.5, 1.5]]))?;
        scene.add_image(Image::new(2, "b.png", 1, vec![[0.5, 0.5], [1.5, 1.5]]))?;
        scene.register_image(1)?;
        scene.register_image(2)?;
        for idx in 0..2 {
            let track = Track::from(vec![TrackElement::new(1, idx), TrackElement::new(2, idx)]);
            scene.add_point3d_with_id(idx as u64 + 1, DVec3::Z, track, [0, 0, 0])?;
        }
        Ok(scene)
    }

    #[test]
    fn test_bilinear_sample() -> Result<(), SceneError> {
        let image = RgbImage::new(2, 1, vec![0, 0, 0, 100, 200, 255])?;
        assert_eq!(image.sample(0.0, 0.0), Some([0.0, 0.0, 0.0]));
        assert_eq!(image.sample(0.5, 0.0), Some([50.0, 100.0, 127.5]));
        assert_eq!(image.sample(1.5, 0.0), None);
        assert!(RgbImage::new(2, 2, vec![0; 3]).is_err());
        Ok(())
    }

    #[test]
    fn test_extract_colors_for_image() -> Result<(), SceneError> {
        let mut scene = scene()?;
        scene.point3d_mut(2)?.color = [1, 2, 3];

        let red = RgbImage::new(2, 2, [255u8, 0, 0].repeat(4))?;
        assert_eq!(scene.extract_colors_for_image(1, &red)?, 1);
        assert_eq!(scene.point3d(1)?.color, [255, 0, 0]);
        // only black points are recolored
        assert_eq!(scene.point3d(2)?.color, [1, 2, 3]);

        assert!(scene.extract_colors_for_image(7, &red).is_err());
        Ok(())
    }

    #[test]
    fn test_extract_colors_for_all_images() -> Result<(), SceneError> {
        let mut scene = scene()?;
        let red = RgbImage::new(2, 2, [200u8, 0, 0].repeat(4))?;
        let blue = RgbImage::new(2, 2, [0u8, 0, 100].repeat(4))?;

        scene.extract_colors_for_all_images(|image| match image.name.as_str() {
            "a.png" => Some(red.clone()),
            "b.png" => Some(blue.clone()),
            _ => None,
        });
        assert_eq!(scene.point3d(1)?.color, [100, 0, 50]);

        // a missing image drops its samples from the mean
        scene.extract_colors_for_all_images(|image| (image.name == "b.png").then(|| blue.clone()));
        assert_eq!(scene.point3d(2)?.color, [0, 0, 100]);
        Ok(())
    }
}
