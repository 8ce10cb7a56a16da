//! Keypoint and descriptor detection (SIFT or SURF).

use anyhow::{Context, Result};
use image::GrayImage;
use opencv::core::{no_array, KeyPoint, Mat, Vector};
use opencv::features2d::SIFT;
use opencv::prelude::*;
use opencv::xfeatures2d::SURF;

use rig_core::Vec2;

/// Supported feature detectors. SIFT does much better than SURF on
/// low-texture depth-sensor intensity images, hence the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeatureDetectorKind {
    #[default]
    Sift,
    Surf,
}

impl FeatureDetectorKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sift" => Ok(FeatureDetectorKind::Sift),
            "surf" => Ok(FeatureDetectorKind::Surf),
            other => anyhow::bail!("unknown feature detector: {other}"),
        }
    }
}

/// Detection options.
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    pub detector: FeatureDetectorKind,
    pub sift_n_features: i32,
    pub sift_octave_layers: i32,
    pub sift_contrast_threshold: f64,
    pub sift_edge_threshold: f64,
    pub sift_sigma: f64,
    /// Equalize the image histogram before detection.
    pub histogram_equalization: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            detector: FeatureDetectorKind::Sift,
            sift_n_features: 10000,
            sift_octave_layers: 3,
            sift_contrast_threshold: 0.02,
            sift_edge_threshold: 10.0,
            sift_sigma: 1.6,
            histogram_equalization: false,
        }
    }
}

/// Convert a grayscale buffer into an owned OpenCV matrix.
pub(crate) fn gray_to_mat(img: &GrayImage) -> Result<Mat> {
    let (w, h) = img.dimensions();
    let view = Mat::new_rows_cols_with_data(h as i32, w as i32, img.as_raw().as_slice())
        .context("cannot wrap image buffer")?;
    Ok(view.try_clone()?)
}

/// Detect keypoints and compute descriptors for one image.
///
/// Returns the descriptor matrix (one row per keypoint) and the distorted
/// pixel coordinates of the keypoints.
pub fn detect_features(
    image: &GrayImage,
    cfg: &FeatureConfig,
    verbose: bool,
) -> Result<(Mat, Vec<Vec2>)> {
    let mut mat = gray_to_mat(image)?;
    if cfg.histogram_equalization {
        let mut equalized = Mat::default();
        opencv::imgproc::equalize_hist(&mat, &mut equalized)?;
        mat = equalized;
    }

    let mut keypoints = Vector::<KeyPoint>::new();
    let mut descriptors = Mat::default();

    match cfg.detector {
        FeatureDetectorKind::Sift => {
            let mut sift = SIFT::create(
                cfg.sift_n_features,
                cfg.sift_octave_layers,
                cfg.sift_contrast_threshold,
                cfg.sift_edge_threshold,
                cfg.sift_sigma,
            )?;
            sift.detect_and_compute(&mat, &no_array(), &mut keypoints, &mut descriptors, false)?;
        }
        FeatureDetectorKind::Surf => {
            let mut surf = SURF::create(100.0, 4, 3, false, false)?;
            surf.detect_and_compute(&mat, &no_array(), &mut keypoints, &mut descriptors, false)?;
        }
    }

    if verbose {
        log::info!("Features detected {}", keypoints.len());
    }

    let pts = keypoints
        .iter()
        .map(|kp| Vec2::new(kp.pt().x as f64, kp.pt().y as f64))
        .collect();
    Ok((descriptors, pts))
}
