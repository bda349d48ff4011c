#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Camera models and intrinsics.
pub mod camera;

/// Feature correspondences between images.
pub mod correspondence_graph;

/// Cached database contents used to populate a scene.
pub mod database;

/// Error types for the scene model.
pub mod error;

/// Rigid and similarity transforms and the geometric checks on them.
pub mod geometry;

/// Images and their 2D keypoints.
pub mod image;

/// Reading and writing scenes as text, binary and PLY files.
pub mod io;

/// Options for normalization and filtering.
pub mod options;

/// 3D points and their tracks.
pub mod point3d;

/// The reconstruction scene and its operations.
pub mod reconstruction;

/// Identifier types.
pub mod types;

pub use camera::{Camera, CameraModelId};
pub use correspondence_graph::{CorrespondenceGraph, InMemoryCorrespondenceGraph};
pub use database::DatabaseCache;
pub use error::{Entity, SceneError};
pub use geometry::{Rigid3d, Sim3d};
pub use image::{Image, Point2D};
pub use point3d::{Point3D, Track, TrackElement};
pub use reconstruction::{ImagePairStat, Reconstruction};
pub use types::{CameraId, ImageId, ImagePairId, Point2DIdx, Point3DId};
