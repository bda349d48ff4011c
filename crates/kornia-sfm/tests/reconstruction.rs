use approx::assert_relative_eq;
use glam::{DQuat, DVec3};
use rand::{rngs::StdRng, Rng, SeedableRng};

use kornia_sfm::{
    options::{FilterOptions, NormalizeOptions},
    Camera, CameraModelId, Image, InMemoryCorrespondenceGraph, Reconstruction, Rigid3d,
    SceneError, Track, TrackElement,
};

const NUM_POINTS: u32 = 5;

fn center_of(image_id: u32) -> DVec3 {
    DVec3::new(2.0 * image_id as f64 - 4.0, 0.0, 0.0)
}

fn point_of(k: u32) -> DVec3 {
    DVec3::new(k as f64 - 2.0, 0.5, 6.0)
}

// three images on a line looking down +z, every image sees every point
fn posed_scene(graph: &InMemoryCorrespondenceGraph) -> Result<Reconstruction<'_>, SceneError> {
    let mut scene = Reconstruction::new();
    scene.add_camera(Camera::new(
        1,
        CameraModelId::SimplePinhole,
        100,
        80,
        vec![100.0, 50.0, 40.0],
    )?)?;
    scene.add_camera(Camera::new(
        2,
        CameraModelId::Pinhole,
        100,
        80,
        vec![110.0, 105.0, 50.0, 40.0],
    )?)?;

    for image_id in 1..=3 {
        let camera_id = if image_id == 3 { 2 } else { 1 };
        let cam_from_world = Rigid3d::new(DQuat::IDENTITY, -center_of(image_id));
        let camera = scene.camera(camera_id)?;
        let keypoints = (0..NUM_POINTS)
            .map(|k| {
                let p = cam_from_world.transform_point(point_of(k));
                camera
                    .img_from_cam(p.to_array())
                    .ok_or_else(|| SceneError::InvalidArgument("behind camera".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let name = format!("images/{image_id}.jpg");
        let mut image = Image::new(image_id, name, camera_id, keypoints);
        image.cam_from_world = cam_from_world;
        scene.add_image(image)?;
        scene.register_image(image_id)?;
    }

    scene.set_up(graph)?;
    for k in 0..NUM_POINTS {
        let track = (1..=3).map(|image_id| TrackElement::new(image_id, k)).collect::<Track>();
        scene.add_point3d(point_of(k), track, [10 * k as u8, 0, 0])?;
    }

    Ok(scene)
}

fn matching_graph(num_images: u32, num_keypoints: u32) -> InMemoryCorrespondenceGraph {
    let mut graph = InMemoryCorrespondenceGraph::new();
    let matches = (0..num_keypoints).map(|k| (k, k)).collect::<Vec<_>>();
    for image_id1 in 1..=num_images {
        for image_id2 in image_id1 + 1..=num_images {
            graph.add_correspondences(image_id1, image_id2, &matches);
        }
    }
    graph
}

#[test]
fn test_scene_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    let graph = matching_graph(3, NUM_POINTS);
    let mut scene = posed_scene(&graph)?;
    scene.assert_consistency();

    assert_eq!(scene.num_points3d(), 5);
    for (image_id1, image_id2) in [(1, 2), (1, 3), (2, 3)] {
        let stat = scene.image_pair(image_id1, image_id2)?;
        assert_eq!(stat.num_tri_corrs, 5);
        assert_eq!(stat.num_total_corrs, 5);
    }

    scene.update_point3d_errors();
    assert!(scene.compute_mean_reprojection_error() < 1e-9);
    assert_relative_eq!(scene.compute_mean_track_length(), 3.0);

    // dropping the middle image leaves every point with two observations
    scene.deregister_image(2)?;
    scene.assert_consistency();
    assert_eq!(scene.reg_image_ids(), &[1, 3]);
    assert_eq!(scene.num_points3d(), 5);
    assert_eq!(scene.compute_num_observations(), 10);
    assert_eq!(scene.image(2)?.num_points3d(), 0);
    assert_eq!(scene.image_pair(1, 2)?.num_tri_corrs, 0);
    assert_eq!(scene.image_pair(2, 3)?.num_tri_corrs, 0);
    assert_eq!(scene.image_pair(1, 3)?.num_tri_corrs, 5);

    let sim3d = scene.normalize(&NormalizeOptions {
        extent: 10.0,
        p0: 0.0,
        p1: 1.0,
        use_images: true,
    })?;
    assert_relative_eq!(sim3d.scale, 2.5);
    let bounds = scene.compute_bounds_and_centroid(0.0, 1.0, true)?;
    assert_relative_eq!(bounds.centroid.length(), 0.0, epsilon = 1e-12);
    assert_relative_eq!(bounds.extent().max_element(), 10.0, epsilon = 1e-12);
    assert_relative_eq!(scene.point3d(1)?.xyz.z, 15.0, epsilon = 1e-12);

    // a similarity transform keeps the observations in place
    scene.update_point3d_errors();
    assert!(scene.compute_mean_reprojection_error() < 1e-9);
    assert_eq!(scene.filter_all_points3d(&FilterOptions::default()), 0);

    let dir = tempfile::tempdir()?;
    scene.write(dir.path())?;
    let restored = Reconstruction::read(dir.path())?;
    restored.assert_consistency();
    assert_eq!(restored.num_images(), 3);
    assert_eq!(restored.reg_image_ids(), scene.reg_image_ids());
    assert_eq!(restored.point3d_ids(), scene.point3d_ids());
    for image_id in [1, 3] {
        let restored_center = restored.image(image_id)?.projection_center();
        let center = scene.image(image_id)?.projection_center();
        assert_relative_eq!(restored_center.x, center.x, epsilon = 1e-12);
        assert_relative_eq!(restored_center.z, center.z, epsilon = 1e-12);
    }

    scene.tear_down();
    assert!(scene.is_torn_down());
    assert_eq!(scene.num_images(), 2);
    assert_eq!(scene.num_cameras(), 2);
    assert!(matches!(
        scene.set_up(&graph),
        Err(SceneError::Precondition(_))
    ));
    Ok(())
}

#[test]
fn test_random_edits_keep_scene_consistent() -> Result<(), Box<dyn std::error::Error>> {
    const NUM_IMAGES: u32 = 4;
    const NUM_KEYPOINTS: u32 = 8;

    let graph = matching_graph(NUM_IMAGES, NUM_KEYPOINTS);
    let mut scene = Reconstruction::new();
    scene.add_camera(Camera::new(
        1,
        CameraModelId::SimplePinhole,
        100,
        100,
        vec![100.0, 50.0, 50.0],
    )?)?;
    for image_id in 1..=NUM_IMAGES {
        scene.add_image(Image::new(
            image_id,
            format!("{image_id}.png"),
            1,
            vec![[50.0, 50.0]; NUM_KEYPOINTS as usize],
        ))?;
        scene.register_image(image_id)?;
    }
    scene.set_up(&graph)?;

    let mut rng = StdRng::seed_from_u64(7);
    let mut max_point3d_id = 0;

    for _ in 0..500 {
        let mut point3d_ids = scene.point3d_ids().into_iter().collect::<Vec<_>>();
        point3d_ids.sort_unstable();
        let image_id = rng.random_range(1..=NUM_IMAGES);
        let point2d_idx = rng.random_range(0..NUM_KEYPOINTS);
        let is_free = !scene.image(image_id)?.point2d(point2d_idx)?.has_point3d();

        match rng.random_range(0..6) {
            0 => {
                let track = (1..=NUM_IMAGES)
                    .filter(|&id| {
                        scene
                            .image(id)
                            .and_then(|image| image.point2d(point2d_idx))
                            .is_ok_and(|point2d| !point2d.has_point3d())
                    })
                    .map(|id| TrackElement::new(id, point2d_idx))
                    .collect::<Track>();
                if track.len() >= 2 {
                    let point3d_id = scene.add_point3d(DVec3::Z, track, [0, 0, 0])?;
                    assert!(point3d_id > max_point3d_id);
                    max_point3d_id = point3d_id;
                }
            }
            1 if is_free && !point3d_ids.is_empty() => {
                let point3d_id = point3d_ids[rng.random_range(0..point3d_ids.len())];
                scene.add_observation(point3d_id, TrackElement::new(image_id, point2d_idx))?;
            }
            2 if !is_free => scene.delete_observation(image_id, point2d_idx)?,
            3 if point3d_ids.len() >= 2 => {
                let i = rng.random_range(0..point3d_ids.len() - 1);
                let merged_id = scene.merge_points3d(point3d_ids[i], point3d_ids[i + 1])?;
                assert!(merged_id > max_point3d_id);
                max_point3d_id = merged_id;
            }
            4 if !point3d_ids.is_empty() => {
                scene.delete_point3d(point3d_ids[rng.random_range(0..point3d_ids.len())])?
            }
            5 => {
                if scene.is_image_registered(image_id)? {
                    scene.deregister_image(image_id)?;
                } else {
                    scene.register_image(image_id)?;
                }
            }
            _ => {}
        }

        scene.assert_consistency();
        for stat in scene.image_pairs().values() {
            assert!(stat.num_tri_corrs <= stat.num_total_corrs);
        }
    }

    // the incremental statistics agree with a full recount
    let mut recounted = scene.clone();
    recounted.set_up(&graph)?;
    assert_eq!(recounted.image_pairs(), scene.image_pairs());
    Ok(())
}

#[test]
fn test_repeated_writes_are_identical() -> Result<(), Box<dyn std::error::Error>> {
    let graph = matching_graph(3, NUM_POINTS);
    let mut scene = posed_scene(&graph)?;
    scene.register_image(1)?;
    assert_eq!(scene.reg_image_ids(), &[1, 2, 3]);

    let first = tempfile::tempdir()?;
    let second = tempfile::tempdir()?;
    scene.write_text(first.path())?;
    Reconstruction::read(first.path())?.write_text(second.path())?;

    for name in ["cameras.txt", "images.txt", "points3D.txt"] {
        assert_eq!(
            std::fs::read_to_string(first.path().join(name))?,
            std::fs::read_to_string(second.path().join(name))?,
            "{name} changed after a round trip"
        );
    }
    Ok(())
}
