//! Command-line entry point for the rig calibration refiner.
//!
//! Reads a rig configuration and an image-list manifest, brackets and
//! matches the images, refines the rig, and writes the optimized
//! configuration, image list, and inlier map.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::Parser;

use rig_core::Real;
use rig_features::{detect_match_features, save_inlier_match_pairs, FeatureDetectorKind};
use rig_pipeline::bracket::lookup_images_and_brackets;
use rig_pipeline::config::{IntrinsicsSelection, RefinerConfig};
use rig_pipeline::input::read_image_and_depth_data;
use rig_pipeline::io::{read_rig_config, write_image_list, write_rig_config};
use rig_pipeline::poses::calc_world_to_cam_transforms;
use rig_pipeline::refine::RigRefiner;

/// Joint calibration of a multi-sensor camera rig.
#[derive(Debug, Parser)]
#[command(author, version, about = "Multi-sensor camera rig calibration refiner")]
struct Args {
    /// Plain text rig configuration to start from.
    #[arg(long)]
    rig_config: PathBuf,

    /// Image list manifest: image, sensor id, timestamp, depth, pose.
    #[arg(long)]
    image_list: PathBuf,

    /// Where to save the optimized configuration and matches.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Feature detector, sift or surf.
    #[arg(long, default_value = "sift")]
    feature_detector: String,

    /// How many images forward in time to match each image against.
    #[arg(long, default_value_t = 10)]
    num_overlaps: usize,

    /// Reprojection threshold for matches made before optimization.
    #[arg(long, default_value_t = 300.0)]
    initial_max_reprojection_error: Real,

    /// Threads for feature detection and matching.
    #[arg(long, default_value_t = 8)]
    num_match_threads: usize,

    /// Threads for the solver.
    #[arg(long, default_value_t = 16)]
    num_opt_threads: usize,

    /// Bracket length: maximum gap between consecutive reference frames.
    #[arg(long, default_value_t = 0.6)]
    bracket_len: Real,

    /// Cauchy robust threshold, in pixels (or weighted meters).
    #[arg(long, default_value_t = 3.0)]
    robust_threshold: Real,

    /// Solver iterations per pass.
    #[arg(long, default_value_t = 20)]
    num_iterations: usize,

    /// Stop when the variables change by less than this.
    #[arg(long, default_value_t = 1e-12)]
    parameter_tolerance: Real,

    /// Optimization passes; outliers are removed after each pass.
    #[arg(long, default_value_t = 2)]
    refiner_num_passes: usize,

    /// Flag features with reprojection error above this after each pass.
    #[arg(long, default_value_t = 25.0)]
    max_reprojection_error: Real,

    /// Flag triangulated points with ray convergence below this, degrees.
    #[arg(long, default_value_t = 0.5)]
    refiner_min_angle: Real,

    /// Flag reference-sensor pixels this close to the image boundary.
    #[arg(long, default_value_t = 0)]
    num_exclude_boundary_pixels: u32,

    /// Weight for the depth-to-triangulation constraint.
    #[arg(long, default_value_t = 1000.0)]
    depth_tri_weight: Real,

    /// Use a depth cloud only within this time of its image.
    #[arg(long, default_value_t = 0.2)]
    max_image_to_depth_diff: Real,

    /// Do not let timestamp offsets move by more than this.
    #[arg(long, default_value_t = 1.0)]
    timestamp_offsets_max_change: Real,

    /// Float the depth-cloud scale.
    #[arg(long)]
    float_scale: bool,

    /// Float the reference poses.
    #[arg(long)]
    float_sparse_map: bool,

    /// Float the per-sensor timestamp offsets.
    #[arg(long)]
    float_timestamp_offsets: bool,

    /// Model depth-to-image as an arbitrary affine transform.
    #[arg(long)]
    affine_depth_to_image: bool,

    /// Do not model extrinsics; camera poses vary independently.
    #[arg(long)]
    no_extrinsics: bool,

    /// With --no-extrinsics, float the non-reference camera poses.
    #[arg(long)]
    float_nonref_cameras: bool,

    /// Intrinsics to float, one entry per sensor:
    /// 'sensor_name:focal_length optical_center distortion'.
    #[arg(long)]
    intrinsics_to_float: Vec<String>,

    /// Sensors whose extrinsics to float, plus optionally depth_to_image.
    /// For example: 'haz_cam sci_cam depth_to_image'.
    #[arg(long, default_value = "")]
    extrinsics_to_float: String,

    /// Restrict a sensor to listed timestamps:
    /// 'sensor_name:/path/to/timestamps.txt'.
    #[arg(long)]
    use_timestamps: Vec<String>,

    /// Re-register the map using control points at the end.
    #[arg(long)]
    registration: bool,

    /// Hugin .pto file with registration control points.
    #[arg(long)]
    hugin_file: Option<PathBuf>,

    /// XYZ file with measured control point coordinates.
    #[arg(long)]
    xyz_file: Option<PathBuf>,

    /// Save the interest point matches.
    #[arg(long)]
    save_matches: bool,

    /// Print verbose information about matching.
    #[arg(long)]
    verbose: bool,
}

fn build_config(args: &Args, rig: &rig_core::RigSet) -> Result<RefinerConfig> {
    let mut cfg = RefinerConfig {
        num_overlaps: args.num_overlaps,
        initial_max_reprojection_error: args.initial_max_reprojection_error,
        num_match_threads: args.num_match_threads,
        save_matches: args.save_matches,
        out_dir: args.out_dir.clone(),
        verbose: args.verbose,
        bracket_len: args.bracket_len,
        timestamp_offsets_max_change: args.timestamp_offsets_max_change,
        max_image_to_depth_diff: args.max_image_to_depth_diff,
        robust_threshold: args.robust_threshold,
        num_iterations: args.num_iterations,
        parameter_tolerance: args.parameter_tolerance,
        num_opt_threads: args.num_opt_threads,
        refiner_num_passes: args.refiner_num_passes,
        max_reprojection_error: args.max_reprojection_error,
        refiner_min_angle: args.refiner_min_angle,
        num_exclude_boundary_pixels: args.num_exclude_boundary_pixels,
        depth_tri_weight: args.depth_tri_weight,
        float_scale: args.float_scale,
        float_sparse_map: args.float_sparse_map,
        float_timestamp_offsets: args.float_timestamp_offsets,
        affine_depth_to_image: args.affine_depth_to_image,
        no_extrinsics: args.no_extrinsics,
        float_nonref_cameras: args.float_nonref_cameras,
        registration: args.registration,
        hugin_file: args.hugin_file.clone(),
        xyz_file: args.xyz_file.clone(),
        ..Default::default()
    };

    cfg.feature.detector = FeatureDetectorKind::parse(&args.feature_detector)?;

    cfg.extrinsics_to_float = args
        .extrinsics_to_float
        .split_whitespace()
        .map(str::to_string)
        .collect();

    // Per-sensor intrinsics selections, by sensor name.
    if !args.intrinsics_to_float.is_empty() {
        let mut selections = vec![IntrinsicsSelection::default(); rig.num_sensors()];
        for entry in &args.intrinsics_to_float {
            let (name, list) = entry
                .split_once(':')
                .with_context(|| format!("expecting sensor_name:intrinsics, got: {entry}"))?;
            let sensor = rig
                .sensors
                .iter()
                .find(|s| s.name == name)
                .with_context(|| format!("unknown sensor in --intrinsics-to-float: {name}"))?;
            selections[sensor.id] = IntrinsicsSelection::parse(list)?;
        }
        cfg.intrinsics_to_float = selections;
    }

    // Per-sensor timestamp whitelists.
    let mut whitelists = BTreeMap::new();
    for entry in &args.use_timestamps {
        let (name, path) = entry
            .split_once(':')
            .with_context(|| format!("expecting sensor_name:file, got: {entry}"))?;
        let sensor = rig
            .sensors
            .iter()
            .find(|s| s.name == name)
            .with_context(|| format!("unknown sensor in --use-timestamps: {name}"))?;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read timestamp list: {path}"))?;
        let timestamps = content
            .split_whitespace()
            .map(|tok| tok.parse::<Real>().context("cannot parse a timestamp"))
            .collect::<Result<Vec<_>>>()?;
        whitelists.insert(sensor.id, timestamps);
    }
    cfg.sensor_timestamps_to_use = whitelists;

    Ok(cfg)
}

fn run() -> Result<()> {
    let args = Args::parse();

    // The solver draws its internal parallelism from the global pool.
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.num_opt_threads)
        .build_global()
        .ok();

    let rig = read_rig_config(&args.rig_config)?;
    let cfg = build_config(&args, &rig)?;
    cfg.validate(rig.num_sensors(), false)?;

    let data = read_image_and_depth_data(&args.image_list, &rig)?;
    let bracketed = lookup_images_and_brackets(&rig, &data, &cfg.bracket_config())?;

    // Initial camera poses for the geometric match filter: from the rig when
    // one is known, otherwise from the per-image manifest poses.
    let world_to_cam = if rig.have_rig_transforms && !cfg.no_extrinsics {
        calc_world_to_cam_transforms(&rig, &bracketed.cams, &data.world_to_ref, &data.ref_timestamps)?
    } else {
        ensure!(
            cfg.no_extrinsics,
            "the rig configuration has no ref_to_sensor transforms; \
             run with --no-extrinsics or provide initial extrinsics"
        );
        bracketed.world_to_cam_init.clone()
    };

    let sensor_params: Vec<_> = rig.sensors.iter().map(|s| s.params.clone()).collect();
    let matching = detect_match_features(
        &bracketed.cams,
        &sensor_params,
        &world_to_cam,
        &cfg.match_config(),
    )?;

    let ref_image_paths: Vec<String> = data.per_sensor[rig.ref_sensor_id]
        .images
        .iter()
        .map(|e| e.path.clone())
        .collect();

    let mut refiner = RigRefiner::new(
        &cfg,
        rig,
        bracketed,
        matching.keypoints,
        matching.tracks,
        data.world_to_ref.clone(),
        data.ref_timestamps.clone(),
        None,
    )?;
    refiner.run()?;

    if cfg.registration {
        if let (Some(hugin), Some(xyz)) = (&cfg.hugin_file, &cfg.xyz_file) {
            refiner.register(hugin, xyz, &ref_image_paths)?;
        }
    }

    if let Some(out_dir) = &cfg.out_dir {
        std::fs::create_dir_all(out_dir)?;

        write_rig_config(&out_dir.join("rig_config.txt"), !cfg.no_extrinsics, refiner.rig())?;
        write_image_list(
            &out_dir.join("images.txt"),
            refiner.cams(),
            refiner.world_to_cam(),
        )?;

        let sensor_params: Vec<_> = refiner
            .rig()
            .sensors
            .iter()
            .map(|s| s.params.clone())
            .collect();
        rig_pipeline::io::write_inlier_nvm(
            &out_dir.join("cameras.nvm"),
            &sensor_params,
            refiner.cams(),
            refiner.world_to_cam(),
            refiner.keypoints(),
            refiner.tracks(),
            refiner.inliers(),
            refiner.landmarks(),
        )?;

        if cfg.save_matches {
            save_inlier_match_pairs(
                refiner.cams(),
                cfg.num_overlaps,
                refiner.tracks(),
                refiner.keypoints(),
                refiner.inliers(),
                out_dir,
            )?;
        }
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
