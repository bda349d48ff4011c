use std::{
    fs::File,
    io::{BufRead, BufReader, Read, Write},
    path::Path,
};

use glam::DVec3;

use super::write_atomic;
use crate::{error::SceneError, reconstruction::Reconstruction};

/// A colored point of a PLY point cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlyPoint {
    /// Position
    pub xyz: [f64; 3],
    /// RGB color
    pub color: [u8; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PlyDataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl PlyDataType {
    fn size(&self) -> usize {
        match self {
            PlyDataType::Float32 | PlyDataType::Int32 | PlyDataType::UInt32 => 4,
            PlyDataType::Float64 => 8,
            PlyDataType::Int16 | PlyDataType::UInt16 => 2,
            PlyDataType::Int8 | PlyDataType::UInt8 => 1,
        }
    }

    fn read_le(&self, bytes: &[u8]) -> f64 {
        match self {
            PlyDataType::Int8 => i8::from_le_bytes([bytes[0]]) as f64,
            PlyDataType::UInt8 => bytes[0] as f64,
            PlyDataType::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            PlyDataType::UInt16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            PlyDataType::Int32 => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            PlyDataType::UInt32 => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            PlyDataType::Float32 => {
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            PlyDataType::Float64 => f64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]),
        }
    }
}

struct PlyProperty {
    name: String,
    data_type: PlyDataType,
}

struct PlyHeader {
    format: PlyFormat,
    vertex_count: usize,
    properties: Vec<PlyProperty>,
}

impl PlyHeader {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }
}

fn parse_data_type(type_str: &str) -> Result<PlyDataType, SceneError> {
    match type_str {
        "float" | "float32" => Ok(PlyDataType::Float32),
        "double" | "float64" => Ok(PlyDataType::Float64),
        "char" | "int8" => Ok(PlyDataType::Int8),
        "uchar" | "uint8" => Ok(PlyDataType::UInt8),
        "short" | "int16" => Ok(PlyDataType::Int16),
        "ushort" | "uint16" => Ok(PlyDataType::UInt16),
        "int" | "int32" => Ok(PlyDataType::Int32),
        "uint" | "uint32" => Ok(PlyDataType::UInt32),
        _ => Err(SceneError::Parse(format!(
            "Unsupported PLY property type: {type_str}"
        ))),
    }
}

fn parse_header<R: BufRead>(reader: &mut R, path: &Path) -> Result<PlyHeader, SceneError> {
    let mut line = String::new();
    let mut is_ply = false;
    let mut format = None;
    let mut vertex_count = None;
    let mut in_vertex_element = false;
    let mut properties = Vec::new();

    loop {
        line.clear();
        if reader
            .read_line(&mut line)
            .map_err(|e| SceneError::io(path, e))?
            == 0
        {
            return Err(SceneError::Parse("PLY header has no end_header".to_string()));
        }
        let trimmed = line.trim();

        if trimmed == "ply" {
            is_ply = true;
        } else if trimmed == "end_header" {
            break;
        } else if let Some(rest) = trimmed.strip_prefix("format ") {
            format = match rest.split_whitespace().next() {
                Some("ascii") => Some(PlyFormat::Ascii),
                Some("binary_little_endian") => Some(PlyFormat::BinaryLittleEndian),
                _ => {
                    return Err(SceneError::Parse(format!(
                        "Unsupported PLY format: {rest}"
                    )))
                }
            };
        } else if let Some(rest) = trimmed.strip_prefix("element ") {
            let parts = rest.split_whitespace().collect::<Vec<_>>();
            in_vertex_element = parts.first() == Some(&"vertex");
            if in_vertex_element {
                let count = parts.get(1).ok_or_else(|| {
                    SceneError::Parse("PLY vertex element without count".to_string())
                })?;
                vertex_count = Some(count.parse::<usize>().map_err(|e| {
                    SceneError::Parse(format!("{count}: {e}"))
                })?);
            }
        } else if let Some(rest) = trimmed.strip_prefix("property ") {
            // only the scalar properties of the vertex element are needed
            let parts = rest.split_whitespace().collect::<Vec<_>>();
            if in_vertex_element && parts.len() == 2 {
                properties.push(PlyProperty {
                    name: parts[1].to_string(),
                    data_type: parse_data_type(parts[0])?,
                });
            }
        }
    }

    if !is_ply {
        return Err(SceneError::Parse("Missing PLY magic".to_string()));
    }

    Ok(PlyHeader {
        format: format.ok_or_else(|| SceneError::Parse("Missing PLY format".to_string()))?,
        vertex_count: vertex_count
            .ok_or_else(|| SceneError::Parse("Missing PLY vertex element".to_string()))?,
        properties,
    })
}

/// Read the vertices of a PLY file as colored points.
///
/// Supports the ascii and binary little-endian formats. The vertex element
/// must come first and carry `x`, `y`, `z`; missing `red`, `green`, `blue`
/// properties read as black.
pub fn read_ply(path: impl AsRef<Path>) -> Result<Vec<PlyPoint>, SceneError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| SceneError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let header = parse_header(&mut reader, path)?;

    let position = ["x", "y", "z"].map(|name| header.index_of(name));
    let [Some(ix), Some(iy), Some(iz)] = position else {
        return Err(SceneError::Parse(
            "PLY vertices need x, y and z properties".to_string(),
        ));
    };
    let color = ["red", "green", "blue"].map(|name| header.index_of(name));

    let to_point = |values: &[f64]| PlyPoint {
        xyz: [values[ix], values[iy], values[iz]],
        color: color.map(|idx| idx.map_or(0, |i| values[i].clamp(0.0, 255.0) as u8)),
    };

    // the vertex count is not trusted for preallocation
    let mut points = Vec::new();
    match header.format {
        PlyFormat::BinaryLittleEndian => {
            let stride = header.properties.iter().map(|p| p.data_type.size()).sum();
            let mut buffer = vec![0u8; stride];
            let mut values = vec![0.0; header.properties.len()];
            for _ in 0..header.vertex_count {
                reader
                    .read_exact(&mut buffer)
                    .map_err(|e| SceneError::io(path, e))?;
                let mut offset = 0;
                for (value, property) in values.iter_mut().zip(&header.properties) {
                    let size = property.data_type.size();
                    *value = property.data_type.read_le(&buffer[offset..offset + size]);
                    offset += size;
                }
                points.push(to_point(&values));
            }
        }
        PlyFormat::Ascii => {
            let mut lines = reader.lines();
            for _ in 0..header.vertex_count {
                let line = lines
                    .next()
                    .ok_or_else(|| SceneError::Parse("PLY file ends early".to_string()))?
                    .map_err(|e| SceneError::io(path, e))?;
                let values = line
                    .split_whitespace()
                    .map(|s| {
                        s.parse::<f64>()
                            .map_err(|e| SceneError::Parse(format!("{s}: {e}")))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if values.len() < header.properties.len() {
                    return Err(SceneError::Parse(format!(
                        "PLY vertex has {} values, expected {}",
                        values.len(),
                        header.properties.len()
                    )));
                }
                points.push(to_point(&values));
            }
        }
    }

    Ok(points)
}

/// Write colored points as a binary little-endian PLY file with double
/// precision positions and 8-bit colors.
pub fn write_ply(path: impl AsRef<Path>, points: &[PlyPoint]) -> Result<(), SceneError> {
    let path = path.as_ref();
    write_atomic(path, |writer| {
        let header = format!(
            "ply\n\
             format binary_little_endian 1.0\n\
             element vertex {}\n\
             property double x\n\
             property double y\n\
             property double z\n\
             property uchar red\n\
             property uchar green\n\
             property uchar blue\n\
             end_header\n",
            points.len()
        );

        let mut bytes = Vec::with_capacity(header.len() + points.len() * 27);
        bytes.extend_from_slice(header.as_bytes());
        for point in points {
            for coord in point.xyz {
                bytes.extend_from_slice(&coord.to_le_bytes());
            }
            bytes.extend_from_slice(&point.color);
        }

        writer
            .write_all(&bytes)
            .map_err(|e| SceneError::io(path, e))
    })
}

impl Reconstruction<'_> {
    /// The 3D points as a colored point cloud, sorted by point id.
    pub fn convert_to_ply(&self) -> Vec<PlyPoint> {
        let mut points3d = self.points3d().iter().collect::<Vec<_>>();
        points3d.sort_by_key(|(point3d_id, _)| **point3d_id);
        points3d
            .into_iter()
            .map(|(_, point3d)| PlyPoint {
                xyz: point3d.xyz.to_array(),
                color: point3d.color,
            })
            .collect()
    }

    /// Export the 3D points as a binary PLY point cloud.
    pub fn write_ply(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        write_ply(path.as_ref(), &self.convert_to_ply())?;
        log::info!(
            "wrote {} points3D to {}",
            self.num_points3d(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Replace all 3D points with the vertices of a PLY file.
    ///
    /// The imported points have no observations, so the scene cannot be used
    /// to continue a reconstruction afterwards.
    pub fn import_ply(&mut self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let points = read_ply(path)?;
        self.import_ply_points(&points)
    }

    /// Replace all 3D points with the given points, without observations.
    pub fn import_ply_points(&mut self, points: &[PlyPoint]) -> Result<(), SceneError> {
        for point3d_id in self.point3d_ids() {
            self.delete_point3d(point3d_id)?;
        }
        for point in points {
            self.insert_untracked_point3d(DVec3::from_array(point.xyz), point.color);
        }
        log::info!("imported {} points3D", points.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tests::scene;

    #[test]
    fn test_parse_header() -> Result<(), SceneError> {
        let text = "ply\nformat ascii 1.0\ncomment made by hand\nelement vertex 2\n\
                    property float x\nproperty float y\nproperty float z\n\
                    element face 1\nproperty list uchar int vertex_indices\nend_header\n";
        let mut reader = BufReader::new(text.as_bytes());
        let header = parse_header(&mut reader, Path::new("mem"))?;
        assert_eq!(header.format, PlyFormat::Ascii);
        assert_eq!(header.vertex_count, 2);
        assert_eq!(header.properties.len(), 3);
        assert_eq!(header.properties[2].name, "z");

        let mut reader = BufReader::new("ply\nformat binary_big_endian 1.0\n".as_bytes());
        assert!(parse_header(&mut reader, Path::new("mem")).is_err());
        Ok(())
    }

    #[test]
    fn test_write_and_read_ply() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("points.ply");

        let scene = scene()?;
        scene.write_ply(&path)?;

        let points = read_ply(&path)?;
        assert_eq!(points, scene.convert_to_ply());
        assert_eq!(points[0].xyz, [0.5, 1.0 / 3.0, 4.0]);
        assert_eq!(points[1].color, [255, 0, 1]);
        Ok(())
    }

    #[test]
    fn test_read_ascii_ply() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("points.ply");
        std::fs::write(
            &path,
            "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\n\
             property float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\n\
             end_header\n1 2 3 10 20 30\n-1 0.5 2 0 0 255\n",
        )?;

        let points = read_ply(&path)?;
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].xyz, [-1.0, 0.5, 2.0]);
        assert_eq!(points[0].color, [10, 20, 30]);
        Ok(())
    }

    #[test]
    fn test_read_ply_oversized_vertex_count() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("points.ply");
        std::fs::write(
            &path,
            "ply\nformat ascii 1.0\nelement vertex 4611686018427387903\nproperty float x\n\
             property float y\nproperty float z\nend_header\n1 2 3\n",
        )?;
        assert!(matches!(read_ply(&path), Err(SceneError::Parse(_))));

        let header = "ply\nformat binary_little_endian 1.0\n\
                      element vertex 4611686018427387903\nproperty double x\n\
                      property double y\nproperty double z\nend_header\n";
        let mut bytes = header.as_bytes().to_vec();
        bytes.extend([1.0f64, 2.0, 3.0].iter().flat_map(|v| v.to_le_bytes()));
        std::fs::write(&path, bytes)?;
        assert!(matches!(read_ply(&path), Err(SceneError::Io { .. })));
        Ok(())
    }

    #[test]
    fn test_import_ply() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("points.ply");
        let points = vec![
            PlyPoint {
                xyz: [1.0, 2.0, 3.0],
                color: [1, 2, 3],
            };
            3
        ];
        write_ply(&path, &points)?;

        let mut scene = scene()?;
        scene.import_ply(&path)?;
        assert_eq!(scene.num_points3d(), 3);
        assert!(scene.points3d().values().all(|p| p.track().is_empty()));
        // the old points and their links are gone, ids are not reused
        assert!(!scene.exists_point3d(7));
        assert!(scene.point3d_ids().iter().all(|&id| id > 9));
        assert_eq!(scene.image(3)?.num_points3d(), 0);
        scene.assert_consistency();
        Ok(())
    }
}
