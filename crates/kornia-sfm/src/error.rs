use std::path::PathBuf;

/// The kind of entity a failed lookup was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    /// A camera in the camera registry.
    Camera,
    /// An image in the image registry.
    Image,
    /// A 3D point in the point registry.
    Point3D,
    /// A statistic record for a pair of images.
    ImagePair,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Entity::Camera => "camera",
            Entity::Image => "image",
            Entity::Point3D => "point3D",
            Entity::ImagePair => "image pair",
        };
        write!(f, "{name}")
    }
}

/// Error types for the scene model.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// An identifier is absent from its registry.
    #[error("{entity} with id {id} not found")]
    NotFound {
        /// The registry that was searched.
        entity: Entity,
        /// The identifier that was looked up.
        id: u64,
    },

    /// Malformed argument, e.g. an out-of-range keypoint or an ambiguous triangulation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The scene is not in a state where the operation is allowed.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Error reading or writing a file.
    #[error("error reading or writing {path}")]
    Io {
        /// The path that failed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed file content.
    #[error("Parse error {0}")]
    Parse(String),

    /// Failed to encode a binary record.
    #[error("Failed to encode binary record")]
    Encode(#[from] bincode::error::EncodeError),

    /// Failed to decode a binary record.
    #[error("Failed to decode binary record")]
    Decode(#[from] bincode::error::DecodeError),
}

impl SceneError {
    pub(crate) fn not_found(entity: Entity, id: impl Into<u64>) -> Self {
        SceneError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SceneError::Io {
            path: path.into(),
            source,
        }
    }
}
