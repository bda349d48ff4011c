/// Binary scene format.
pub mod binary;

/// PLY point cloud export and import.
pub mod ply;

/// Text scene format.
pub mod text;

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use glam::DVec3;

use crate::{
    camera::{Camera, CameraModelId},
    error::SceneError,
    geometry::Rigid3d,
    image::Image,
    point3d::{Track, TrackElement},
    reconstruction::Reconstruction,
    types::{CameraId, ImageId, Point2DIdx, Point3DId},
};

/// Keypoint link value meaning "no 3D point".
pub const INVALID_POINT3D_ID: Point3DId = Point3DId::MAX;

pub(crate) const CAMERAS_TXT: &str = "cameras.txt";
pub(crate) const IMAGES_TXT: &str = "images.txt";
pub(crate) const POINTS3D_TXT: &str = "points3D.txt";
pub(crate) const CAMERAS_BIN: &str = "cameras.bin";
pub(crate) const IMAGES_BIN: &str = "images.bin";
pub(crate) const POINTS3D_BIN: &str = "points3D.bin";

/// A camera as stored on disk.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct CameraRecord {
    /// Camera id
    pub camera_id: CameraId,
    /// Numeric camera model id
    pub model_id: i32,
    /// Image width
    pub width: u64,
    /// Image height
    pub height: u64,
    /// Model parameters
    pub params: Vec<f64>,
}

/// A keypoint as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, bincode::Encode, bincode::Decode)]
pub struct Point2DRecord {
    /// Pixel coordinates
    pub xy: [f64; 2],
    /// Linked point, [`INVALID_POINT3D_ID`] if none
    pub point3d_id: Point3DId,
}

/// An image as stored on disk.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct ImageRecord {
    /// Image id
    pub image_id: ImageId,
    /// `cam_from_world` rotation as `[qw, qx, qy, qz]`
    pub qvec: [f64; 4],
    /// `cam_from_world` translation
    pub tvec: [f64; 3],
    /// Camera id
    pub camera_id: CameraId,
    /// Registration flag
    pub registered: bool,
    /// Image name
    pub name: String,
    /// Keypoints
    pub points2d: Vec<Point2DRecord>,
}

/// A 3D point as stored on disk.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct Point3DRecord {
    /// Point id
    pub point3d_id: Point3DId,
    /// Position in world coordinates
    pub xyz: [f64; 3],
    /// RGB color
    pub color: [u8; 3],
    /// Mean reprojection error, negative if unknown
    pub error: f64,
    /// Observations as `(image_id, point2d_idx)`
    pub track: Vec<(ImageId, Point2DIdx)>,
}

/// All records of a scene, in the order they are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneRecords {
    /// Cameras sorted by id
    pub cameras: Vec<CameraRecord>,
    /// Registered images in registration order, then the others sorted by id
    pub images: Vec<ImageRecord>,
    /// Points sorted by id
    pub points3d: Vec<Point3DRecord>,
}

impl SceneRecords {
    /// Flatten a scene into records.
    pub fn from_scene(scene: &Reconstruction) -> Self {
        let mut cameras = scene
            .cameras()
            .values()
            .map(|camera| CameraRecord {
                camera_id: camera.camera_id,
                model_id: camera.model_id as i32,
                width: camera.width as u64,
                height: camera.height as u64,
                params: camera.params.clone(),
            })
            .collect::<Vec<_>>();
        cameras.sort_by_key(|c| c.camera_id);

        let mut unregistered = scene
            .images()
            .values()
            .filter(|image| !image.is_registered())
            .collect::<Vec<_>>();
        unregistered.sort_by_key(|image| image.image_id());

        let images = scene
            .reg_image_ids()
            .iter()
            .filter_map(|image_id| scene.images().get(image_id))
            .chain(unregistered)
            .map(|image| ImageRecord {
                image_id: image.image_id(),
                qvec: image.cam_from_world.wxyz(),
                tvec: image.cam_from_world.translation.to_array(),
                camera_id: image.camera_id(),
                registered: image.is_registered(),
                name: image.name.clone(),
                points2d: image
                    .points2d()
                    .iter()
                    .map(|p| Point2DRecord {
                        xy: p.xy,
                        point3d_id: p.point3d_id.unwrap_or(INVALID_POINT3D_ID),
                    })
                    .collect(),
            })
            .collect();

        let mut points3d = scene
            .points3d()
            .iter()
            .map(|(&point3d_id, point3d)| Point3DRecord {
                point3d_id,
                xyz: point3d.xyz.to_array(),
                color: point3d.color,
                error: point3d.error,
                track: point3d
                    .track()
                    .iter()
                    .map(|el| (el.image_id, el.point2d_idx))
                    .collect(),
            })
            .collect::<Vec<_>>();
        points3d.sort_by_key(|p| p.point3d_id);

        Self {
            cameras,
            images,
            points3d,
        }
    }

    /// Assemble a scene from records.
    ///
    /// The keypoint links stored with the images must agree with the tracks
    /// stored with the points.
    pub fn into_scene(self) -> Result<Reconstruction<'static>, SceneError> {
        let mut scene = Reconstruction::new();

        for record in self.cameras {
            scene.add_camera(Camera::new(
                record.camera_id,
                CameraModelId::from_id(record.model_id)?,
                record.width as usize,
                record.height as usize,
                record.params,
            )?)?;
        }

        for record in &self.images {
            let mut image = Image::new(
                record.image_id,
                record.name.clone(),
                record.camera_id,
                record.points2d.iter().map(|p| p.xy).collect(),
            );
            image.cam_from_world = Rigid3d::from_wxyz(record.qvec, record.tvec);
            scene.add_image(image)?;
            if record.registered {
                scene.register_image(record.image_id)?;
            }
        }

        for record in self.points3d {
            let xyz = DVec3::from_array(record.xyz);
            if record.track.is_empty() {
                scene.insert_untracked_point3d_with_id(record.point3d_id, xyz, record.color)?;
            } else {
                let track = record
                    .track
                    .iter()
                    .map(|&(image_id, point2d_idx)| TrackElement::new(image_id, point2d_idx))
                    .collect::<Track>();
                scene.add_point3d_with_id(record.point3d_id, xyz, track, record.color)?;
            }
            scene.point3d_mut(record.point3d_id)?.error = record.error;
        }

        for record in &self.images {
            let image = scene.image(record.image_id)?;
            let points2d = record.points2d.iter().zip(image.points2d());
            for (idx, (stored, linked)) in points2d.enumerate() {
                let stored =
                    (stored.point3d_id != INVALID_POINT3D_ID).then_some(stored.point3d_id);
                if stored != linked.point3d_id {
                    return Err(SceneError::Parse(format!(
                        "keypoint {} of image {} refers to point3D {:?} but the tracks say {:?}",
                        idx, record.image_id, stored, linked.point3d_id
                    )));
                }
            }
        }

        Ok(scene)
    }
}

// A fully written sibling temporary file waiting to replace its destination.
pub(crate) struct StagedFile {
    file: tempfile::NamedTempFile,
    path: PathBuf,
}

impl StagedFile {
    pub(crate) fn persist(self) -> Result<(), SceneError> {
        let Self { file, path } = self;
        file.persist(&path)
            .map_err(|e| SceneError::io(path.as_path(), e.error))?;
        Ok(())
    }
}

pub(crate) fn stage_file<F>(path: &Path, write: F) -> Result<StagedFile, SceneError>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<(), SceneError>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file = tempfile::NamedTempFile::new_in(dir).map_err(|e| SceneError::io(dir, e))?;

    {
        let mut writer = BufWriter::new(file.as_file());
        write(&mut writer)?;
        writer.flush().map_err(|e| SceneError::io(path, e))?;
    }

    Ok(StagedFile {
        file,
        path: path.to_path_buf(),
    })
}

// Write to a sibling temporary file and move it over the destination, so a
// failure never leaves a partially written file behind.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> Result<(), SceneError>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<(), SceneError>,
{
    stage_file(path, write)?.persist()
}

// Files of one scene are only moved into place once all of them are written.
// A failed write drops the staged files and leaves the previous scene intact.
pub(crate) fn persist_all(staged: Vec<StagedFile>) -> Result<(), SceneError> {
    for file in staged {
        file.persist()?;
    }
    Ok(())
}

impl Reconstruction<'static> {
    /// Read a scene from a directory.
    ///
    /// The binary files are used when all three exist, the text files otherwise.
    ///
    /// The files do not store the point id generator. New points continue
    /// after the largest id read, so ids of points deleted before the scene
    /// was written can be handed out again.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let path = path.as_ref();
        if [CAMERAS_BIN, IMAGES_BIN, POINTS3D_BIN]
            .iter()
            .all(|name| path.join(name).is_file())
        {
            Self::read_binary(path)
        } else if [CAMERAS_TXT, IMAGES_TXT, POINTS3D_TXT]
            .iter()
            .all(|name| path.join(name).is_file())
        {
            Self::read_text(path)
        } else {
            Err(SceneError::io(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no complete binary or text scene in directory",
                ),
            ))
        }
    }

    /// Read a scene from the text files of a directory.
    pub fn read_text(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let scene = text::read_records(path.as_ref())?.into_scene()?;
        log::info!(
            "read scene with {} images and {} points3D from {}",
            scene.num_images(),
            scene.num_points3d(),
            path.as_ref().display()
        );
        Ok(scene)
    }

    /// Read a scene from the binary files of a directory.
    pub fn read_binary(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let scene = binary::read_records(path.as_ref())?.into_scene()?;
        log::info!(
            "read scene with {} images and {} points3D from {}",
            scene.num_images(),
            scene.num_points3d(),
            path.as_ref().display()
        );
        Ok(scene)
    }
}

impl Reconstruction<'_> {
    /// Write the scene to an existing directory in the binary format.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        self.write_binary(path)
    }

    /// Write the scene to an existing directory in the text format.
    pub fn write_text(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        text::write_records(path.as_ref(), &SceneRecords::from_scene(self))?;
        log::info!("wrote text scene to {}", path.as_ref().display());
        Ok(())
    }

    /// Write the scene to an existing directory in the binary format.
    pub fn write_binary(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        binary::write_records(path.as_ref(), &SceneRecords::from_scene(self))?;
        log::info!("wrote binary scene to {}", path.as_ref().display());
        Ok(())
    }

    /// Create the sub-directories of `path` implied by the image names.
    pub fn create_image_dirs(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let path = path.as_ref();
        for image in self.images().values() {
            if let Some(parent) = path.join(&image.name).parent() {
                std::fs::create_dir_all(parent).map_err(|e| SceneError::io(parent, e))?;
            }
        }
        Ok(())
    }
}
