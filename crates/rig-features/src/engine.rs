//! Detection and matching over all overlapping image pairs, and fusion of
//! the results into tracks.

use anyhow::{ensure, Context, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;

use opencv::core::Mat;

use rig_core::{CamImage, Iso3, KeypointVec, SensorParams, Track, Vec2};

use crate::detect::{detect_features, FeatureConfig};
use crate::matchfile::{match_file_name, write_match_file};
use crate::matching::{match_features_with_cams, MatchPair};
use crate::tracks::build_tracks;

/// Options of the detect-and-match stage.
#[derive(Debug, Clone)]
pub struct MatchEngineConfig {
    pub feature: FeatureConfig,
    /// How many images forward in time to match each image against.
    pub num_overlaps: usize,
    /// Reprojection threshold of the geometric pre-filter, in pixels.
    pub initial_max_reprojection_error: f64,
    /// Worker pool size for detection and matching.
    pub num_match_threads: usize,
    /// Write raw match files under `<out_dir>/matches`.
    pub save_matches: bool,
    pub out_dir: Option<PathBuf>,
    pub verbose: bool,
}

impl Default for MatchEngineConfig {
    fn default() -> Self {
        Self {
            feature: FeatureConfig::default(),
            num_overlaps: 10,
            initial_max_reprojection_error: 300.0,
            num_match_threads: 8,
            save_matches: false,
            out_dir: None,
            verbose: false,
        }
    }
}

/// Canonicalized keypoints and fused tracks.
#[derive(Debug, Clone)]
pub struct MatchingOutput {
    /// Distorted keypoint coordinates per acquisition; feature ids index
    /// into these lists.
    pub keypoints: KeypointVec,
    /// Fused, conflict-free tracks: `pid -> {cid -> fid}`.
    pub tracks: Vec<Track>,
}

/// Detect features in every image and match all ordered pairs `(i, j)` with
/// `j in (i, i + num_overlaps]`, filtering with the current pose estimates.
///
/// Detection tasks write only into their own slot; matching tasks share one
/// result mutex, acquired for the final insertion and for verbose logging so
/// messages do not interleave. Descriptor matrices are released as soon as
/// matching completes.
pub fn detect_match_features(
    cams: &[CamImage],
    sensor_params: &[SensorParams],
    world_to_cam: &[Iso3],
    cfg: &MatchEngineConfig,
) -> Result<MatchingOutput> {
    ensure!(
        cams.len() == world_to_cam.len(),
        "there must be as many camera poses as acquisitions"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.num_match_threads)
        .build()
        .context("cannot build the matching thread pool")?;

    log::info!(
        "Using {} threads for feature detection and matching.",
        cfg.num_match_threads
    );

    log::info!("Detecting features.");
    let detected: Vec<(Mat, Vec<Vec2>)> = pool.install(|| {
        cams.par_iter()
            .map(|cam| detect_features(&cam.image, &cfg.feature, cfg.verbose))
            .collect::<Result<Vec<_>>>()
    })?;

    let (descriptors, keypoints): (Vec<Mat>, Vec<Vec<Vec2>>) = detected.into_iter().unzip();

    let mut image_pairs = Vec::new();
    for i in 0..cams.len() {
        for j in (i + 1)..cams.len().min(i + cfg.num_overlaps + 1) {
            image_pairs.push((i, j));
        }
    }

    log::info!("Matching features.");
    let matches: Mutex<BTreeMap<(usize, usize), MatchPair>> = Mutex::new(BTreeMap::new());
    pool.install(|| {
        image_pairs.par_iter().try_for_each(|&(i, j)| -> Result<()> {
            let pair = match_features_with_cams(
                &sensor_params[cams[i].sensor_id],
                &sensor_params[cams[j].sensor_id],
                &world_to_cam[i],
                &world_to_cam[j],
                cfg.initial_max_reprojection_error,
                &descriptors[i],
                &descriptors[j],
                &keypoints[i],
                &keypoints[j],
            )?;

            let mut guard = matches.lock();
            if cfg.verbose {
                log::info!("Number of matches for pair {i} {j}: {}", pair.len());
            }
            guard.insert((i, j), pair);
            Ok(())
        })
    })?;
    let matches = matches.into_inner();

    // The descriptor matrices are the largest transient objects.
    drop(descriptors);

    if cfg.save_matches {
        save_raw_matches(cams, &matches, cfg)?;
    }

    // Give every distinct distorted keypoint within one acquisition a unique
    // feature id, ordered by (x, y).
    let mut keypoint_vec: KeypointVec = vec![Vec::new(); cams.len()];
    for ((left, right), pair) in &matches {
        for (lp, rp) in pair.left.iter().zip(&pair.right) {
            keypoint_vec[*left].push((lp.x, lp.y));
            keypoint_vec[*right].push((rp.x, rp.y));
        }
    }
    for list in keypoint_vec.iter_mut() {
        list.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        list.dedup();
    }

    let fid_of = |cid: usize, x: f32, y: f32| -> usize {
        keypoint_vec[cid]
            .binary_search_by(|probe| probe.0.total_cmp(&x).then(probe.1.total_cmp(&y)))
            .unwrap_or_else(|_| panic!("keypoint ({x}, {y}) missing from acquisition {cid}"))
    };

    let mut pairwise: BTreeMap<(usize, usize), Vec<(usize, usize)>> = BTreeMap::new();
    for (&(left, right), pair) in &matches {
        let fused = pair
            .left
            .iter()
            .zip(&pair.right)
            .map(|(lp, rp)| (fid_of(left, lp.x, lp.y), fid_of(right, rp.x, rp.y)))
            .collect();
        pairwise.insert((left, right), fused);
    }
    drop(matches);

    let tracks = build_tracks(&pairwise);
    ensure!(
        !tracks.is_empty(),
        "no tracks left after filtering; perhaps the images are too dissimilar"
    );

    Ok(MatchingOutput {
        keypoints: keypoint_vec,
        tracks,
    })
}

fn save_raw_matches(
    cams: &[CamImage],
    matches: &BTreeMap<(usize, usize), MatchPair>,
    cfg: &MatchEngineConfig,
) -> Result<()> {
    let out_dir = cfg
        .out_dir
        .as_ref()
        .context("cannot save matches if no output directory was provided")?;
    let match_dir = out_dir.join("matches");
    std::fs::create_dir_all(&match_dir)?;

    for (&(left, right), pair) in matches {
        let match_file = match_file_name(
            &match_dir,
            &cams[left].image_path,
            &cams[right].image_path,
            "",
        )?;
        log::info!(
            "Writing: {} {} {}",
            cams[left].image_path,
            cams[right].image_path,
            match_file.display()
        );
        write_match_file(&match_file, &pair.left, &pair.right)?;
    }
    Ok(())
}
