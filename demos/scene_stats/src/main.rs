use argh::FromArgs;
use std::path::PathBuf;

use kornia_sfm::{
    options::{FilterOptions, NormalizeOptions},
    Reconstruction,
};

#[derive(FromArgs)]
/// Read a sparse reconstruction, clean it up and print its statistics
struct Args {
    /// path to the folder with the cameras, images and points3D files
    #[argh(option, short = 'i')]
    input_path: PathBuf,

    /// path to write the processed reconstruction to
    #[argh(option, short = 'o')]
    output_path: Option<PathBuf>,

    /// optional JSON file with the 3D point filter options
    #[argh(option)]
    filter_options: Option<PathBuf>,

    /// filter 3D points with large errors or small triangulation angles
    #[argh(switch)]
    filter: bool,

    /// center and rescale the scene to the given extent
    #[argh(option)]
    normalize: Option<f64>,

    /// write the output as text instead of binary
    #[argh(switch)]
    text: bool,

    /// also export the 3D points to this PLY file
    #[argh(option)]
    ply_path: Option<PathBuf>,
}

fn print_stats(scene: &Reconstruction) {
    println!("cameras: {}", scene.num_cameras());
    println!(
        "images: {} ({} registered)",
        scene.num_images(),
        scene.num_reg_images()
    );
    println!("points3D: {}", scene.num_points3d());
    println!("observations: {}", scene.compute_num_observations());
    println!("mean track length: {:.3}", scene.compute_mean_track_length());
    println!(
        "mean observations per image: {:.3}",
        scene.compute_mean_observations_per_reg_image()
    );
    println!(
        "mean reprojection error: {:.3}px",
        scene.compute_mean_reprojection_error()
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut scene = Reconstruction::read(&args.input_path)?;
    scene.assert_consistency();
    scene.update_point3d_errors();

    if args.filter {
        let options = match &args.filter_options {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => FilterOptions::default(),
        };
        let num_filtered = scene.filter_all_points3d(&options)
            + scene.filter_observations_with_negative_depth();
        log::info!("filtered {} observations", num_filtered);
    }

    if let Some(extent) = args.normalize {
        let sim3d = scene.normalize(&NormalizeOptions {
            extent,
            ..Default::default()
        })?;
        log::info!("normalized with scale {}", sim3d.scale);
    }

    print_stats(&scene);

    if let Some(output_path) = &args.output_path {
        std::fs::create_dir_all(output_path)?;
        if args.text {
            scene.write_text(output_path)?;
        } else {
            scene.write_binary(output_path)?;
        }
    }

    if let Some(ply_path) = &args.ply_path {
        scene.write_ply(ply_path)?;
    }

    Ok(())
}
