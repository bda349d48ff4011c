use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    path::Path,
};

use super::{
    persist_all, stage_file, CameraRecord, ImageRecord, Point2DRecord, Point3DRecord,
    SceneRecords, StagedFile, CAMERAS_TXT, IMAGES_TXT, INVALID_POINT3D_ID, POINTS3D_TXT,
};
use crate::{
    camera::CameraModelId,
    error::SceneError,
    types::{ImageId, Point2DIdx},
};

/// Read the cameras.txt file and return its camera records.
///
/// One camera per line: `CAMERA_ID MODEL WIDTH HEIGHT PARAMS[]`.
pub fn read_cameras_txt(path: impl AsRef<Path>) -> Result<Vec<CameraRecord>, SceneError> {
    data_lines(path.as_ref())?
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_camera_line(line))
        .collect()
}

/// Read the images.txt file and return its image records.
///
/// Two lines per image: `IMAGE_ID QW QX QY QZ TX TY TZ CAMERA_ID REGISTERED NAME`
/// followed by the keypoints as `X Y POINT3D_ID` triples, `-1` for none.
pub fn read_images_txt(path: impl AsRef<Path>) -> Result<Vec<ImageRecord>, SceneError> {
    data_lines(path.as_ref())?
        .chunks(2)
        .map(|chunk| match chunk {
            [line1, line2] => parse_image_lines(line1, line2),
            _ => Err(SceneError::Parse(
                "Invalid number of lines for an image".to_string(),
            )),
        })
        .collect()
}

/// Read the points3D.txt file and return its point records.
///
/// One point per line: `POINT3D_ID X Y Z R G B ERROR TRACK[]` with the track
/// as `IMAGE_ID POINT2D_IDX` pairs.
pub fn read_points3d_txt(path: impl AsRef<Path>) -> Result<Vec<Point3DRecord>, SceneError> {
    data_lines(path.as_ref())?
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_point3d_line(line))
        .collect()
}

/// Write the cameras.txt file.
pub fn write_cameras_txt(
    path: impl AsRef<Path>,
    cameras: &[CameraRecord],
) -> Result<(), SceneError> {
    stage_cameras_txt(path.as_ref(), cameras)?.persist()
}

fn stage_cameras_txt(path: &Path, cameras: &[CameraRecord]) -> Result<StagedFile, SceneError> {
    stage_file(path, |writer| {
        let mut content = String::new();
        content.push_str("# Camera list with one line of data per camera:\n");
        content.push_str("#   CAMERA_ID, MODEL, WIDTH, HEIGHT, PARAMS[]\n");
        content.push_str(&format!("# Number of cameras: {}\n", cameras.len()));
        for camera in cameras {
            let model = CameraModelId::from_id(camera.model_id)?;
            content.push_str(&format!(
                "{} {} {} {}",
                camera.camera_id,
                model.name(),
                camera.width,
                camera.height
            ));
            for param in &camera.params {
                content.push_str(&format!(" {param}"));
            }
            content.push('\n');
        }
        writer
            .write_all(content.as_bytes())
            .map_err(|e| SceneError::io(path, e))
    })
}

/// Write the images.txt file.
///
/// Image names may contain spaces but no line breaks.
pub fn write_images_txt(path: impl AsRef<Path>, images: &[ImageRecord]) -> Result<(), SceneError> {
    stage_images_txt(path.as_ref(), images)?.persist()
}

fn stage_images_txt(path: &Path, images: &[ImageRecord]) -> Result<StagedFile, SceneError> {
    stage_file(path, |writer| {
        let mut content = String::new();
        content.push_str("# Image list with two lines of data per image:\n");
        content.push_str(
            "#   IMAGE_ID, QW, QX, QY, QZ, TX, TY, TZ, CAMERA_ID, REGISTERED, NAME\n",
        );
        content.push_str("#   POINTS2D[] as (X, Y, POINT3D_ID)\n");
        content.push_str(&format!("# Number of images: {}\n", images.len()));
        for image in images {
            if image.name.contains(['\n', '\r']) {
                return Err(SceneError::InvalidArgument(format!(
                    "name of image {} contains a line break",
                    image.image_id
                )));
            }
            let [qw, qx, qy, qz] = image.qvec;
            let [tx, ty, tz] = image.tvec;
            content.push_str(&format!(
                "{} {qw} {qx} {qy} {qz} {tx} {ty} {tz} {} {} {}\n",
                image.image_id,
                image.camera_id,
                u8::from(image.registered),
                image.name
            ));
            let points2d = image
                .points2d
                .iter()
                .map(|p| {
                    let point3d_id = if p.point3d_id == INVALID_POINT3D_ID {
                        "-1".to_string()
                    } else {
                        p.point3d_id.to_string()
                    };
                    format!("{} {} {}", p.xy[0], p.xy[1], point3d_id)
                })
                .collect::<Vec<_>>();
            content.push_str(&points2d.join(" "));
            content.push('\n');
        }
        writer
            .write_all(content.as_bytes())
            .map_err(|e| SceneError::io(path, e))
    })
}

/// Write the points3D.txt file.
pub fn write_points3d_txt(
    path: impl AsRef<Path>,
    points3d: &[Point3DRecord],
) -> Result<(), SceneError> {
    stage_points3d_txt(path.as_ref(), points3d)?.persist()
}

fn stage_points3d_txt(
    path: &Path,
    points3d: &[Point3DRecord],
) -> Result<StagedFile, SceneError> {
    stage_file(path, |writer| {
        let mut content = String::new();
        content.push_str("# 3D point list with one line of data per point:\n");
        content.push_str(
            "#   POINT3D_ID, X, Y, Z, R, G, B, ERROR, TRACK[] as (IMAGE_ID, POINT2D_IDX)\n",
        );
        content.push_str(&format!("# Number of points: {}\n", points3d.len()));
        for point3d in points3d {
            let [x, y, z] = point3d.xyz;
            let [r, g, b] = point3d.color;
            content.push_str(&format!(
                "{} {x} {y} {z} {r} {g} {b} {}",
                point3d.point3d_id, point3d.error
            ));
            for (image_id, point2d_idx) in &point3d.track {
                content.push_str(&format!(" {image_id} {point2d_idx}"));
            }
            content.push('\n');
        }
        writer
            .write_all(content.as_bytes())
            .map_err(|e| SceneError::io(path, e))
    })
}

pub(crate) fn read_records(dir: &Path) -> Result<SceneRecords, SceneError> {
    Ok(SceneRecords {
        cameras: read_cameras_txt(dir.join(CAMERAS_TXT))?,
        images: read_images_txt(dir.join(IMAGES_TXT))?,
        points3d: read_points3d_txt(dir.join(POINTS3D_TXT))?,
    })
}

pub(crate) fn write_records(dir: &Path, records: &SceneRecords) -> Result<(), SceneError> {
    persist_all(vec![
        stage_cameras_txt(&dir.join(CAMERAS_TXT), &records.cameras)?,
        stage_images_txt(&dir.join(IMAGES_TXT), &records.images)?,
        stage_points3d_txt(&dir.join(POINTS3D_TXT), &records.points3d)?,
    ])
}

// All lines except comments. Empty lines are kept since an image without
// keypoints has an empty second line.
fn data_lines(path: &Path) -> Result<Vec<String>, SceneError> {
    let file = File::open(path).map_err(|e| SceneError::io(path, e))?;
    let reader = BufReader::new(file);

    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| SceneError::io(path, e))?;
        if !line.trim_start().starts_with('#') {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// Utility functions for parsing the text files
fn parse_part<T: std::str::FromStr>(s: &str) -> Result<T, SceneError>
where
    T::Err: std::fmt::Display,
{
    s.parse::<T>()
        .map_err(|e| SceneError::Parse(format!("{}: {}", s, e)))
}

fn parse_camera_line(line: &str) -> Result<CameraRecord, SceneError> {
    let parts = line.split_whitespace().collect::<Vec<_>>();

    if parts.len() < 5 {
        return Err(SceneError::Parse(format!(
            "Invalid number of camera parts: {}",
            parts.len()
        )));
    }

    Ok(CameraRecord {
        camera_id: parse_part(parts[0])?,
        model_id: CameraModelId::from_name(parts[1])? as i32,
        width: parse_part(parts[2])?,
        height: parse_part(parts[3])?,
        params: parts[4..]
            .iter()
            .map(|s| parse_part(s))
            .collect::<Result<Vec<_>, _>>()?,
    })
}

/// Parse the two lines of an image.
/// NOTE: the name is the remainder of the first line and may contain spaces.
fn parse_image_lines(line1: &str, line2: &str) -> Result<ImageRecord, SceneError> {
    let mut parts = line1.trim_start().splitn(11, ' ');
    let mut next = || {
        parts
            .next()
            .ok_or_else(|| SceneError::Parse(format!("Incomplete image line: {line1}")))
    };

    let image_id = parse_part(next()?)?;
    let qvec = [
        parse_part(next()?)?,
        parse_part(next()?)?,
        parse_part(next()?)?,
        parse_part(next()?)?,
    ];
    let tvec = [
        parse_part(next()?)?,
        parse_part(next()?)?,
        parse_part(next()?)?,
    ];
    let camera_id = parse_part(next()?)?;
    let registered = match next()? {
        "1" => true,
        "0" => false,
        other => {
            return Err(SceneError::Parse(format!(
                "Invalid registration flag: {other}"
            )))
        }
    };
    let name = next()?.to_string();

    let parts = line2.split_whitespace().collect::<Vec<_>>();
    if parts.len() % 3 != 0 {
        return Err(SceneError::Parse(format!(
            "Invalid number of keypoint parts for image {image_id}: {}",
            parts.len()
        )));
    }
    let points2d = parts
        .chunks_exact(3)
        .map(|chunk| -> Result<Point2DRecord, SceneError> {
            let point3d_id = match chunk[2] {
                "-1" => INVALID_POINT3D_ID,
                id => parse_part(id)?,
            };
            Ok(Point2DRecord {
                xy: [parse_part(chunk[0])?, parse_part(chunk[1])?],
                point3d_id,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ImageRecord {
        image_id,
        qvec,
        tvec,
        camera_id,
        registered,
        name,
        points2d,
    })
}

fn parse_point3d_line(line: &str) -> Result<Point3DRecord, SceneError> {
    let parts = line.split_whitespace().collect::<Vec<_>>();

    if parts.len() < 8 || (parts.len() - 8) % 2 != 0 {
        return Err(SceneError::Parse(format!(
            "Invalid number of point3D parts: {}",
            parts.len()
        )));
    }

    Ok(Point3DRecord {
        point3d_id: parse_part(parts[0])?,
        xyz: [
            parse_part(parts[1])?,
            parse_part(parts[2])?,
            parse_part(parts[3])?,
        ],
        color: [
            parse_part(parts[4])?,
            parse_part(parts[5])?,
            parse_part(parts[6])?,
        ],
        error: parse_part(parts[7])?,
        track: parts[8..]
            .chunks_exact(2)
            .map(|chunk| -> Result<(ImageId, Point2DIdx), SceneError> {
                Ok((parse_part(chunk[0])?, parse_part(chunk[1])?))
            })
            .collect::<Result<Vec<_>, _>>()?,
    })
}
