use std::{fs::File, io::BufReader, path::Path};

use bincode::{
    config::{Configuration, Fixint, LittleEndian, Limit},
    Decode, Encode,
};

use super::{
    persist_all, stage_file, CameraRecord, ImageRecord, Point3DRecord, SceneRecords, StagedFile,
    CAMERAS_BIN, IMAGES_BIN, POINTS3D_BIN,
};
use crate::error::SceneError;

// Little-endian, fixed-width integers; sequences and strings are prefixed by
// their length as u64.
fn config() -> Configuration<LittleEndian, Fixint> {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

/// Upper bound on the memory claimed while decoding a single file.
///
/// Length prefixes that would exceed it fail with
/// [`bincode::error::DecodeError::LimitExceeded`] before anything is allocated.
pub const MAX_DECODE_BYTES: usize = u32::MAX as usize;

fn decode_config() -> Configuration<LittleEndian, Fixint, Limit<MAX_DECODE_BYTES>> {
    config().with_limit::<MAX_DECODE_BYTES>()
}

fn read_vec<T: Decode<()>>(path: &Path) -> Result<Vec<T>, SceneError> {
    let file = File::open(path).map_err(|e| SceneError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let records = bincode::decode_from_std_read(&mut reader, decode_config())?;
    Ok(records)
}

fn stage_vec<T: Encode>(path: &Path, records: &[T]) -> Result<StagedFile, SceneError> {
    stage_file(path, |writer| {
        bincode::encode_into_std_write(records, writer, config())?;
        Ok(())
    })
}

fn write_vec<T: Encode>(path: &Path, records: &[T]) -> Result<(), SceneError> {
    stage_vec(path, records)?.persist()
}

/// Read the cameras.bin file.
pub fn read_cameras_bin(path: impl AsRef<Path>) -> Result<Vec<CameraRecord>, SceneError> {
    read_vec(path.as_ref())
}

/// Read the images.bin file.
pub fn read_images_bin(path: impl AsRef<Path>) -> Result<Vec<ImageRecord>, SceneError> {
    read_vec(path.as_ref())
}

/// Read the points3D.bin file.
pub fn read_points3d_bin(path: impl AsRef<Path>) -> Result<Vec<Point3DRecord>, SceneError> {
    read_vec(path.as_ref())
}

/// Write the cameras.bin file.
pub fn write_cameras_bin(
    path: impl AsRef<Path>,
    cameras: &[CameraRecord],
) -> Result<(), SceneError> {
    write_vec(path.as_ref(), cameras)
}

/// Write the images.bin file.
pub fn write_images_bin(path: impl AsRef<Path>, images: &[ImageRecord]) -> Result<(), SceneError> {
    write_vec(path.as_ref(), images)
}

/// Write the points3D.bin file.
pub fn write_points3d_bin(
    path: impl AsRef<Path>,
    points3d: &[Point3DRecord],
) -> Result<(), SceneError> {
    write_vec(path.as_ref(), points3d)
}

pub(crate) fn read_records(dir: &Path) -> Result<SceneRecords, SceneError> {
    Ok(SceneRecords {
        cameras: read_cameras_bin(dir.join(CAMERAS_BIN))?,
        images: read_images_bin(dir.join(IMAGES_BIN))?,
        points3d: read_points3d_bin(dir.join(POINTS3D_BIN))?,
    })
}

pub(crate) fn write_records(dir: &Path, records: &SceneRecords) -> Result<(), SceneError> {
    persist_all(vec![
        stage_vec(&dir.join(CAMERAS_BIN), &records.cameras)?,
        stage_vec(&dir.join(IMAGES_BIN), &records.images)?,
        stage_vec(&dir.join(POINTS3D_BIN), &records.points3d)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{io::tests::scene, reconstruction::Reconstruction};

    #[test]
    fn test_camera_record_layout() -> Result<(), Box<dyn std::error::Error>> {
        let record = CameraRecord {
            camera_id: 1,
            model_id: 0,
            width: 640,
            height: 480,
            params: vec![500.0, 320.0, 240.0],
        };
        let bytes = bincode::encode_to_vec(vec![record.clone()], config())?;

        // count, id, model, width, height, param count, params
        assert_eq!(bytes.len(), 8 + 4 + 4 + 8 + 8 + 8 + 3 * 8);
        assert_eq!(&bytes[..8], &1u64.to_le_bytes());
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes());

        let (decoded, _): (Vec<CameraRecord>, usize) =
            bincode::decode_from_slice(&bytes, config())?;
        assert_eq!(decoded, vec![record]);
        Ok(())
    }

    #[test]
    fn test_binary_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let scene = scene()?;
        scene.write(dir.path())?;
        assert!(dir.path().join(CAMERAS_BIN).is_file());

        let restored = Reconstruction::read(dir.path())?;
        assert_eq!(
            SceneRecords::from_scene(&restored),
            SceneRecords::from_scene(&scene)
        );
        assert_eq!(restored.reg_image_ids(), scene.reg_image_ids());
        restored.assert_consistency();
        Ok(())
    }

    #[test]
    fn test_binary_preferred_over_text() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut scene = scene()?;
        scene.write_text(dir.path())?;
        scene.delete_point3d(9)?;
        scene.write_binary(dir.path())?;

        let restored = Reconstruction::read(dir.path())?;
        assert_eq!(restored.num_points3d(), 1);
        Ok(())
    }

    #[test]
    fn test_truncated_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        scene()?.write(dir.path())?;
        let path = dir.path().join(IMAGES_BIN);
        let bytes = std::fs::read(&path)?;
        std::fs::write(&path, &bytes[..bytes.len() / 2])?;

        assert!(matches!(
            Reconstruction::read(dir.path()),
            Err(SceneError::Decode(_))
        ));
        Ok(())
    }

    #[test]
    fn test_oversized_length_prefix() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        scene()?.write(dir.path())?;
        let path = dir.path().join(POINTS3D_BIN);
        let valid = std::fs::read(&path)?;

        for count in [u64::MAX / 4, 1 << 40] {
            let mut bytes = valid.clone();
            bytes[..8].copy_from_slice(&count.to_le_bytes());
            std::fs::write(&path, &bytes)?;
            assert!(matches!(
                Reconstruction::read(dir.path()),
                Err(SceneError::Decode(
                    bincode::error::DecodeError::LimitExceeded
                ))
            ));
        }

        // nested sequences are bounded as well: the params of the first camera
        let path = dir.path().join(CAMERAS_BIN);
        let mut bytes = std::fs::read(&path)?;
        bytes[32..40].copy_from_slice(&(u64::MAX / 8).to_le_bytes());
        std::fs::write(&path, &bytes)?;
        assert!(matches!(
            read_cameras_bin(&path),
            Err(SceneError::Decode(bincode::error::DecodeError::LimitExceeded))
        ));
        Ok(())
    }

    #[test]
    fn test_failed_write_keeps_previous_scene() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let scene = scene()?;
        scene.write(dir.path())?;
        let previous = std::fs::read(dir.path().join(CAMERAS_BIN))?;

        let mut changed = scene.clone();
        let mut params = changed.camera(1)?.params.clone();
        params[0] = 1000.0;
        changed.set_camera_params(1, params)?;
        let records = SceneRecords::from_scene(&changed);
        assert_ne!(records.cameras, SceneRecords::from_scene(&scene).cameras);

        // the second file fails after the first one was staged
        let staged = stage_vec(&dir.path().join(CAMERAS_BIN), &records.cameras)
            .and_then(|cameras| {
                let images = stage_file(&dir.path().join(IMAGES_BIN), |_| {
                    Err(SceneError::InvalidArgument("disk full".to_string()))
                })?;
                Ok(vec![cameras, images])
            });
        assert!(staged.is_err());

        // no leftover temporary files and the old scene is untouched
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 3);
        assert_eq!(std::fs::read(dir.path().join(CAMERAS_BIN))?, previous);
        let restored = Reconstruction::read(dir.path())?;
        assert_eq!(
            SceneRecords::from_scene(&restored),
            SceneRecords::from_scene(&scene)
        );
        Ok(())
    }
}
