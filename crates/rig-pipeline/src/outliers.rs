//! Per-pass outlier flagging.
//!
//! Order matters: the convergence-angle filter runs before the
//! reprojection-error filter, because the angle depends only on geometry
//! while the reprojection filter would first remove rays that form the
//! triangulated points.

use rig_core::{CamImage, InlierMask, Iso3, KeypointVec, Pt3, Real, RigSet, Track, Vec2, Vec3};

use crate::refine::ResidualIndex;

/// Flag reference-sensor keypoints within `num_exclude_boundary_pixels` of
/// any image edge. This helps when switching distortion models for the
/// reference sensor.
pub fn flag_outliers_by_exclusion_dist(
    rig: &RigSet,
    num_exclude_boundary_pixels: u32,
    cams: &[CamImage],
    tracks: &[Track],
    keypoints: &KeypointVec,
    inliers: &mut InlierMask,
) {
    let excl = num_exclude_boundary_pixels as Real;

    for (pid, track) in tracks.iter().enumerate() {
        for (&cid, &fid) in track {
            if !rig.is_ref(cams[cid].sensor_id) {
                continue;
            }
            let params = &rig.sensors[cams[cid].sensor_id].params;
            let [width, height] = params.distorted_size;
            let (x, y) = keypoints[cid][fid];
            let (x, y) = (x as Real, y as Real);
            if x < excl
                || x > width as Real - 1.0 - excl
                || y < excl
                || y > height as Real - 1.0 - excl
            {
                inliers.set_outlier(pid, cid, fid);
            }
        }
    }
}

/// Flag outliers by ray-convergence angle, then by reprojection error.
///
/// The cameras in `world_to_cam` and the residual vector must be up-to-date
/// with the current optimization state.
#[allow(clippy::too_many_arguments)]
pub fn flag_outliers_by_angle_and_reproj(
    refiner_min_angle: Real,
    max_reprojection_error: Real,
    tracks: &[Track],
    world_to_cam: &[Iso3],
    xyz_vec: &[Vec3],
    residual_index: &ResidualIndex,
    residuals: &[f64],
    inliers: &mut InlierMask,
) {
    let mut num_outliers_by_angle = 0usize;
    let mut num_total_features = 0usize;

    for (pid, track) in tracks.iter().enumerate() {
        // Largest angle between any two rays converging on this landmark.
        let mut max_rays_angle: Real = 0.0;

        for (&cid1, &fid1) in track {
            if !inliers.is_inlier(pid, cid1, fid1) {
                continue;
            }
            num_total_features += 1;

            let ctr1 = world_to_cam[cid1].inverse().transform_point(&Pt3::origin());
            let ray1 = (xyz_vec[pid] - ctr1.coords).normalize();

            for (&cid2, &fid2) in track {
                if cid2 <= cid1 {
                    continue;
                }
                if !inliers.is_inlier(pid, cid2, fid2) {
                    continue;
                }

                let ctr2 = world_to_cam[cid2].inverse().transform_point(&Pt3::origin());
                let ray2 = (xyz_vec[pid] - ctr2.coords).normalize();

                let angle = ray1.dot(&ray2).acos().to_degrees();
                if !angle.is_finite() {
                    continue;
                }
                max_rays_angle = max_rays_angle.max(angle);
            }
        }

        if max_rays_angle >= refiner_min_angle {
            continue; // well-conditioned track
        }

        for (&cid, &fid) in track {
            if !inliers.is_inlier(pid, cid, fid) {
                continue;
            }
            num_outliers_by_angle += 1;
            inliers.set_outlier(pid, cid, fid);
        }
    }

    log::info!(
        "Removed {} outlier features with small angle of convergence, out of {} ({:.4} %)",
        num_outliers_by_angle,
        num_total_features,
        percentage(num_outliers_by_angle, num_total_features)
    );

    let mut num_outliers_reproj = 0usize;
    num_total_features = 0;
    for (pid, track) in tracks.iter().enumerate() {
        for (&cid, &fid) in track {
            if !inliers.is_inlier(pid, cid, fid) {
                continue;
            }
            num_total_features += 1;

            let idx = residual_index.pixel_residual(pid, cid, fid);
            let err = Vec2::new(residuals[idx], residuals[idx + 1]).norm();
            // NaN never passes this comparison, so NaN residuals are flagged.
            let is_good = err <= max_reprojection_error;
            if !is_good {
                num_outliers_reproj += 1;
                inliers.set_outlier(pid, cid, fid);
            }
        }
    }

    log::info!(
        "Removed {} outlier features using reprojection error, out of {} ({:.4} %)",
        num_outliers_reproj,
        num_total_features,
        percentage(num_outliers_reproj, num_total_features)
    );
}

fn percentage(num: usize, denom: usize) -> Real {
    if denom == 0 {
        return 0.0;
    }
    100.0 * num as Real / denom as Real
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_core::{AffineXf, RigSensor, SensorParams};

    fn one_sensor_rig() -> RigSet {
        RigSet::new(
            0,
            vec![RigSensor {
                id: 0,
                name: "nav_cam".into(),
                params: SensorParams::new(600.0, [320.0, 240.0], vec![], [640, 480], [640, 480])
                    .unwrap(),
                ref_to_sensor: Iso3::identity(),
                depth_to_image: AffineXf::identity(),
                timestamp_offset: 0.0,
            }],
            true,
        )
        .unwrap()
    }

    fn ref_cam(index: usize) -> CamImage {
        CamImage {
            sensor_id: 0,
            timestamp: index as Real,
            ref_timestamp: index as Real,
            beg_ref_index: index,
            end_ref_index: index,
            image: image::GrayImage::new(1, 1),
            image_path: format!("nav_cam/{index}.jpg"),
            depth: None,
        }
    }

    #[test]
    fn boundary_pixels_are_excluded() {
        let rig = one_sensor_rig();
        let cams = vec![ref_cam(0), ref_cam(1)];
        // One keypoint well inside, one within 10 px of the right edge.
        let keypoints: KeypointVec = vec![vec![(320.0, 240.0)], vec![(635.0, 240.0)]];
        let tracks = vec![Track::from([(0usize, 0usize), (1, 0)])];
        let mut inliers = InlierMask::all_inliers(&tracks);

        flag_outliers_by_exclusion_dist(&rig, 10, &cams, &tracks, &keypoints, &mut inliers);
        assert!(inliers.is_inlier(0, 0, 0));
        assert!(!inliers.is_inlier(0, 1, 0));
    }

    #[test]
    fn small_convergence_angle_kills_whole_track() {
        let tracks = vec![Track::from([(0usize, 0usize), (1, 0)])];
        let mut inliers = InlierMask::all_inliers(&tracks);

        // Two nearly coincident cameras far from the landmark: tiny angle.
        let world_to_cam = vec![Iso3::identity(), Iso3::translation(1e-5, 0.0, 0.0)];
        let xyz = vec![Vec3::new(0.0, 0.0, 100.0)];
        let index = ResidualIndex::for_test(&tracks);
        let residuals = vec![0.0; 4];

        flag_outliers_by_angle_and_reproj(
            0.5,
            25.0,
            &tracks,
            &world_to_cam,
            &xyz,
            &index,
            &residuals,
            &mut inliers,
        );
        assert_eq!(inliers.num_inliers(0), 0);
    }

    #[test]
    fn large_reprojection_error_flags_single_observation() {
        let tracks = vec![Track::from([(0usize, 0usize), (1, 0)])];
        let mut inliers = InlierMask::all_inliers(&tracks);

        // Wide baseline: the angle filter passes.
        let world_to_cam = vec![Iso3::identity(), Iso3::translation(1.0, 0.0, 0.0)];
        let xyz = vec![Vec3::new(0.0, 0.0, 2.0)];
        let index = ResidualIndex::for_test(&tracks);
        let residuals = vec![0.1, 0.1, 40.0, 0.0];

        flag_outliers_by_angle_and_reproj(
            0.5,
            25.0,
            &tracks,
            &world_to_cam,
            &xyz,
            &index,
            &residuals,
            &mut inliers,
        );
        assert!(inliers.is_inlier(0, 0, 0));
        assert!(!inliers.is_inlier(0, 1, 0));
    }
}
