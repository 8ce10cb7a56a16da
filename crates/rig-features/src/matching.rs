//! Pairwise feature matching with a geometric pre-filter and affine RANSAC.

use anyhow::Result;
use opencv::calib3d;
use opencv::core::{DMatch, Mat, Point2f, Vector};
use opencv::features2d::BFMatcher;
use opencv::prelude::*;

use rig_core::{triangulate_pair, Iso3, Pt3, SensorParams, Vec2};

use crate::matchfile::InterestPoint;

/// Lowe ratio between the best and second-best descriptor distance.
const MATCH_RATIO: f32 = 0.8;
/// Affine RANSAC settings; affine works better than homography here.
const RANSAC_REPROJ_THRESHOLD: f64 = 20.0;
const RANSAC_MAX_ITERS: usize = 10000;
const RANSAC_CONFIDENCE: f64 = 0.8;

/// Matched interest points of one ordered image pair.
#[derive(Debug, Clone, Default)]
pub struct MatchPair {
    pub left: Vec<InterestPoint>,
    pub right: Vec<InterestPoint>,
}

impl MatchPair {
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

fn knn_ratio_matches(left_descriptors: &Mat, right_descriptors: &Mat) -> Result<Vec<DMatch>> {
    if left_descriptors.rows() == 0 || right_descriptors.rows() == 0 {
        return Ok(Vec::new());
    }

    let matcher = BFMatcher::create(opencv::core::NORM_L2, false)?;
    let mut knn = Vector::<Vector<DMatch>>::new();
    matcher.knn_train_match(
        left_descriptors,
        right_descriptors,
        &mut knn,
        2,
        &Mat::default(),
        false,
    )?;

    let mut matches = Vec::new();
    for pair in knn.iter() {
        if pair.len() < 2 {
            continue;
        }
        let best = pair.get(0)?;
        let second = pair.get(1)?;
        if best.distance < MATCH_RATIO * second.distance {
            matches.push(best);
        }
    }
    Ok(matches)
}

/// Project a world point into a sensor, returning the distorted pixel.
fn project_to_distorted(params: &SensorParams, world_to_cam: &Iso3, x: &rig_core::Vec3) -> Vec2 {
    let pc = world_to_cam.transform_point(&Pt3::from(*x));
    let undist = Vec2::new(
        params.focal_length * pc.x / pc.z,
        params.focal_length * pc.y / pc.z,
    );
    params.undistorted_centered_to_distorted(undist)
}

/// Match one ordered image pair, filtering with the current pose estimates.
///
/// Descriptor matching is followed by a geometric pre-filter: each candidate
/// is triangulated with the current cameras, reprojected into both images,
/// and rejected when either reprojection error exceeds
/// `initial_max_reprojection_error` (NaN or infinite values also reject the
/// candidate). Surviving candidates go through a 2-D affine RANSAC and only
/// its inliers are returned.
#[allow(clippy::too_many_arguments)]
pub fn match_features_with_cams(
    left_params: &SensorParams,
    right_params: &SensorParams,
    left_world_to_cam: &Iso3,
    right_world_to_cam: &Iso3,
    initial_max_reprojection_error: f64,
    left_descriptors: &Mat,
    right_descriptors: &Mat,
    left_keypoints: &[Vec2],
    right_keypoints: &[Vec2],
) -> Result<MatchPair> {
    let cv_matches = knn_ratio_matches(left_descriptors, right_descriptors)?;

    let mut left_vec = Vector::<Point2f>::new();
    let mut right_vec = Vector::<Point2f>::new();
    let mut filtered: Vec<DMatch> = Vec::new();

    for m in &cv_matches {
        let dist_left = left_keypoints[m.query_idx as usize];
        let dist_right = right_keypoints[m.train_idx as usize];

        let undist_left = left_params.distorted_to_undistorted_centered(dist_left);
        let undist_right = right_params.distorted_to_undistorted_centered(dist_right);

        let x = triangulate_pair(
            left_params.focal_length,
            right_params.focal_length,
            left_world_to_cam,
            right_world_to_cam,
            &undist_left,
            &undist_right,
        );

        let left_reproj = project_to_distorted(left_params, left_world_to_cam, &x);
        let right_reproj = project_to_distorted(right_params, right_world_to_cam, &x);

        // NaN or Inf anywhere makes these comparisons false.
        let is_good = (dist_left - left_reproj).norm() <= initial_max_reprojection_error
            && (dist_right - right_reproj).norm() <= initial_max_reprojection_error;
        if !is_good {
            continue;
        }

        left_vec.push(Point2f::new(dist_left.x as f32, dist_left.y as f32));
        right_vec.push(Point2f::new(dist_right.x as f32, dist_right.y as f32));
        filtered.push(*m);
    }

    if filtered.is_empty() {
        return Ok(MatchPair::default());
    }

    let mut inlier_mask = Mat::default();
    calib3d::estimate_affine_2d(
        &left_vec,
        &right_vec,
        &mut inlier_mask,
        calib3d::RANSAC,
        RANSAC_REPROJ_THRESHOLD,
        RANSAC_MAX_ITERS,
        RANSAC_CONFIDENCE,
        10,
    )?;

    let mut pair = MatchPair::default();
    for (j, m) in filtered.iter().enumerate() {
        if *inlier_mask.at::<u8>(j as i32)? == 0 {
            continue;
        }
        pair.left.push(InterestPoint::from_keypoint(
            left_keypoints[m.query_idx as usize],
            descriptor_row(left_descriptors, m.query_idx)?,
        ));
        pair.right.push(InterestPoint::from_keypoint(
            right_keypoints[m.train_idx as usize],
            descriptor_row(right_descriptors, m.train_idx)?,
        ));
    }

    Ok(pair)
}

fn descriptor_row(descriptors: &Mat, row: i32) -> Result<Vec<f32>> {
    let mut out = Vec::with_capacity(descriptors.cols() as usize);
    for col in 0..descriptors.cols() {
        out.push(*descriptors.at_2d::<f32>(row, col)?);
    }
    Ok(out)
}
