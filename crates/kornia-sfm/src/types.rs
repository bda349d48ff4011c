/// Unique identifier of a camera.
pub type CameraId = u32;

/// Unique identifier of an image.
pub type ImageId = u32;

/// Index of a 2D keypoint inside its image.
pub type Point2DIdx = u32;

/// Unique identifier of a 3D point. Never reused after deletion.
pub type Point3DId = u64;

/// Order-independent identifier of a pair of images.
pub type ImagePairId = u64;

/// Upper bound (exclusive) for image identifiers that can take part in a pair id.
pub const MAX_NUM_IMAGES: u64 = 2_147_483_647;

/// Compute the canonical identifier of an unordered image pair.
///
/// The smaller id is always encoded first, so `(a, b)` and `(b, a)` map to the
/// same value. The mapping is injective for ids below [`MAX_NUM_IMAGES`].
///
/// Example:
///
/// ```
/// use kornia_sfm::types::image_pair_to_pair_id;
///
/// assert_eq!(image_pair_to_pair_id(3, 7), image_pair_to_pair_id(7, 3));
/// ```
pub fn image_pair_to_pair_id(image_id1: ImageId, image_id2: ImageId) -> ImagePairId {
    let (a, b) = if image_id1 > image_id2 {
        (image_id2, image_id1)
    } else {
        (image_id1, image_id2)
    };
    debug_assert!((b as u64) < MAX_NUM_IMAGES);
    MAX_NUM_IMAGES * a as u64 + b as u64
}

/// Recover the (smaller, larger) image ids encoded in a pair identifier.
pub fn pair_id_to_image_pair(pair_id: ImagePairId) -> (ImageId, ImageId) {
    let image_id2 = (pair_id % MAX_NUM_IMAGES) as ImageId;
    let image_id1 = ((pair_id - image_id2 as u64) / MAX_NUM_IMAGES) as ImageId;
    (image_id1, image_id2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_id_symmetric() {
        for (a, b) in [(0, 1), (1, 2), (5, 3), (100, 2_000_000)] {
            assert_eq!(image_pair_to_pair_id(a, b), image_pair_to_pair_id(b, a));
        }
    }

    #[test]
    fn test_pair_id_decode() {
        let pair_id = image_pair_to_pair_id(42, 7);
        assert_eq!(pair_id_to_image_pair(pair_id), (7, 42));
        let pair_id = image_pair_to_pair_id(0, (MAX_NUM_IMAGES - 1) as ImageId);
        assert_eq!(
            pair_id_to_image_pair(pair_id),
            (0, (MAX_NUM_IMAGES - 1) as ImageId)
        );
    }

    #[test]
    fn test_pair_id_injective() {
        let mut seen = std::collections::HashSet::new();
        for a in 0..40 {
            for b in (a + 1)..40 {
                assert!(seen.insert(image_pair_to_pair_id(a, b)));
            }
        }
    }
}
