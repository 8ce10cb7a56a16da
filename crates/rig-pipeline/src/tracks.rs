//! Re-triangulation of every track from its current inlier observations.

use rig_core::{
    is_bad_xyz, triangulate_rays, CamImage, InlierMask, Iso3, KeypointVec, Real, RigSet, Track,
    Vec2, Vec3,
};

/// Triangulate every track using the current inliers.
///
/// Tracks with fewer than two surviving inliers cannot be triangulated and
/// every one of their observations becomes an outlier; so do tracks whose
/// triangulation comes back NaN or infinite.
pub fn multi_view_triangulation(
    rig: &RigSet,
    cams: &[CamImage],
    world_to_cam: &[Iso3],
    tracks: &[Track],
    keypoints: &KeypointVec,
    inliers: &mut InlierMask,
) -> Vec<Vec3> {
    let mut xyz_vec = vec![Vec3::zeros(); tracks.len()];

    for (pid, track) in tracks.iter().enumerate() {
        let mut focals: Vec<Real> = Vec::new();
        let mut poses: Vec<Iso3> = Vec::new();
        let mut pixels: Vec<Vec2> = Vec::new();

        for (&cid, &fid) in track {
            if !inliers.is_inlier(pid, cid, fid) {
                continue;
            }
            let params = &rig.sensors[cams[cid].sensor_id].params;
            let (x, y) = keypoints[cid][fid];
            let undist =
                params.distorted_to_undistorted_centered(Vec2::new(x as Real, y as Real));

            focals.push(params.focal_length);
            poses.push(world_to_cam[cid]);
            pixels.push(undist);
        }

        if pixels.len() < 2 {
            // Not enough rays; every remaining observation goes too.
            inliers.set_track_outlier(pid);
            continue;
        }

        let xyz = triangulate_rays(&focals, &poses, &pixels);
        if is_bad_xyz(&xyz) {
            inliers.set_track_outlier(pid);
            continue;
        }
        xyz_vec[pid] = xyz;
    }

    xyz_vec
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rig_core::{AffineXf, Pt3, RigSensor, SensorParams};
    use std::collections::BTreeMap;

    fn one_sensor_rig(focal: Real) -> RigSet {
        let nav = RigSensor {
            id: 0,
            name: "nav_cam".into(),
            params: SensorParams::new(focal, [0.0, 0.0], vec![], [640, 480], [640, 480]).unwrap(),
            ref_to_sensor: Iso3::identity(),
            depth_to_image: AffineXf::identity(),
            timestamp_offset: 0.0,
        };
        RigSet::new(0, vec![nav], true).unwrap()
    }

    fn ref_cam(ts: Real, index: usize) -> CamImage {
        CamImage {
            sensor_id: 0,
            timestamp: ts,
            ref_timestamp: ts,
            beg_ref_index: index,
            end_ref_index: index,
            image: image::GrayImage::new(1, 1),
            image_path: format!("nav_cam/{ts}.jpg"),
            depth: None,
        }
    }

    #[test]
    fn consistent_track_triangulates_and_keeps_inliers() {
        let focal = 500.0;
        let rig = one_sensor_rig(focal);
        let cams = vec![ref_cam(0.0, 0), ref_cam(1.0, 1)];
        let world_to_cam = vec![Iso3::identity(), Iso3::translation(-0.4, 0.0, 0.0)];
        let x = Vec3::new(0.1, -0.2, 3.0);

        let project = |w2c: &Iso3| {
            let pc = w2c.transform_point(&Pt3::from(x));
            (
                (focal * pc.x / pc.z) as f32,
                (focal * pc.y / pc.z) as f32,
            )
        };
        let keypoints: KeypointVec = vec![vec![project(&world_to_cam[0])], vec![project(&world_to_cam[1])]];
        let tracks = vec![Track::from([(0usize, 0usize), (1, 0)])];
        let mut inliers = InlierMask::all_inliers(&tracks);

        let xyz = multi_view_triangulation(&rig, &cams, &world_to_cam, &tracks, &keypoints, &mut inliers);
        assert_relative_eq!(xyz[0], x, epsilon = 1e-4);
        assert_eq!(inliers.num_inliers(0), 2);
    }

    #[test]
    fn single_observation_track_is_flagged_outlier() {
        let rig = one_sensor_rig(500.0);
        let cams = vec![ref_cam(0.0, 0), ref_cam(1.0, 1)];
        let world_to_cam = vec![Iso3::identity(), Iso3::translation(-0.4, 0.0, 0.0)];
        let keypoints: KeypointVec = vec![vec![(5.0, 5.0)], vec![(6.0, 6.0)]];

        let tracks = vec![BTreeMap::from([(0usize, 0usize), (1, 0)])];
        let mut inliers = InlierMask::all_inliers(&tracks);
        inliers.set_outlier(0, 1, 0);

        multi_view_triangulation(&rig, &cams, &world_to_cam, &tracks, &keypoints, &mut inliers);
        // Triangulation was skipped and the lone remaining observation went.
        assert_eq!(inliers.num_inliers(0), 0);
    }
}
