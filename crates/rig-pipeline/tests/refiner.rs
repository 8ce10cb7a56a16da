//! End-to-end refiner scenarios on synthetic, perfectly consistent rigs.

use image::GrayImage;
use nalgebra::Translation3;
use rig_core::{
    AffineXf, CamImage, DepthCloud, DepthRecord, Iso3, KeypointVec, Pt3, Real, RigSensor, RigSet,
    SensorParams, Track, Vec2, Vec3,
};
use rig_pipeline::bracket::BracketedCams;
use rig_pipeline::config::RefinerConfig;
use rig_pipeline::refine::RigRefiner;

const FOCAL: Real = 512.0;
const CENTER: [Real; 2] = [320.0, 240.0];
const DEPTH: Real = 4.0;

fn identity_rig() -> RigSet {
    let params = SensorParams::new(FOCAL, CENTER, vec![], [640, 480], [640, 480]).unwrap();
    let nav = RigSensor {
        id: 0,
        name: "nav_cam".into(),
        params: params.clone(),
        ref_to_sensor: Iso3::identity(),
        depth_to_image: AffineXf::identity(),
        timestamp_offset: 0.0,
    };
    let sci = RigSensor {
        id: 1,
        name: "sci_cam".into(),
        params,
        ref_to_sensor: Iso3::identity(),
        depth_to_image: AffineXf::identity(),
        timestamp_offset: 0.0,
    };
    RigSet::new(0, vec![nav, sci], true).unwrap()
}

/// Ground-truth landmarks on a grid, all coordinates exactly representable.
fn landmarks() -> Vec<Vec3> {
    let mut pts = Vec::new();
    for &x in &[-0.5, 0.0, 0.5] {
        for &y in &[-0.375, 0.0, 0.375] {
            pts.push(Vec3::new(x, y, DEPTH));
        }
    }
    pts
}

fn world_to_cam_at(cam_x: Real) -> Iso3 {
    Iso3::from_parts(Translation3::new(-cam_x, 0.0, 0.0), rig_core::Quat::identity())
}

fn project(params: &SensorParams, w2c: &Iso3, x: &Vec3) -> Vec2 {
    let pc = w2c.transform_point(&Pt3::from(*x));
    let undist = Vec2::new(
        params.focal_length * pc.x / pc.z,
        params.focal_length * pc.y / pc.z,
    );
    params.undistorted_centered_to_distorted(undist)
}

fn cam(sensor_id: usize, ts: Real, beg: usize, end: usize) -> CamImage {
    CamImage {
        sensor_id,
        timestamp: ts,
        ref_timestamp: ts,
        beg_ref_index: beg,
        end_ref_index: end,
        image: GrayImage::new(4, 3),
        image_path: format!(
            "{}/{ts}.jpg",
            if sensor_id == 0 { "nav_cam" } else { "sci_cam" }
        ),
        depth: None,
    }
}

/// Two reference acquisitions and one non-reference in the middle, all
/// perfectly consistent with identity extrinsics and no distortion.
struct Scenario {
    rig: RigSet,
    bracketed: BracketedCams,
    keypoints: KeypointVec,
    tracks: Vec<Track>,
    world_to_ref: Vec<Iso3>,
    ref_timestamps: Vec<Real>,
    truth: Vec<Vec3>,
    poses: Vec<Iso3>,
}

fn identity_scenario() -> Scenario {
    let rig = identity_rig();
    let truth = landmarks();

    // The reference camera moves along x; the sci acquisition sits exactly
    // at the bracket midpoint, so its interpolated pose is the average.
    let ref_timestamps = vec![0.0, 1.0];
    let world_to_ref = vec![world_to_cam_at(0.0), world_to_cam_at(0.5)];
    let poses = vec![
        world_to_cam_at(0.0),
        world_to_cam_at(0.25),
        world_to_cam_at(0.5),
    ];

    let cams = vec![cam(0, 0.0, 0, 0), cam(1, 0.5, 0, 1), cam(0, 1.0, 1, 1)];

    let params = &rig.sensors[0].params;
    let mut keypoints: KeypointVec = vec![Vec::new(); cams.len()];
    let mut tracks = Vec::new();
    for (pid, x) in truth.iter().enumerate() {
        let mut track = Track::new();
        for (cid, pose) in poses.iter().enumerate() {
            let pix = project(params, pose, x);
            keypoints[cid].push((pix.x as f32, pix.y as f32));
            track.insert(cid, pid);
        }
        tracks.push(track);
    }

    let bracketed = BracketedCams {
        cams,
        world_to_cam_init: poses.clone(),
        min_timestamp_offset: vec![-1.0e+100; 2],
        max_timestamp_offset: vec![1.0e+100; 2],
    };

    Scenario {
        rig,
        bracketed,
        keypoints,
        tracks,
        world_to_ref,
        ref_timestamps,
        truth,
        poses,
    }
}

fn max_reproj_residual(s: &Scenario, refiner: &RigRefiner) -> Real {
    let params = &refiner.rig().sensors[0].params;
    let mut worst: Real = 0.0;
    for (pid, track) in refiner.tracks().iter().enumerate() {
        for (&cid, &fid) in track {
            if !refiner.inliers().is_inlier(pid, cid, fid) {
                continue;
            }
            let pix = project(params, &refiner.world_to_cam()[cid], &refiner.landmarks()[pid]);
            let (kx, ky) = s.keypoints[cid][fid];
            let err = (pix - Vec2::new(kx as Real, ky as Real)).norm();
            worst = worst.max(err);
        }
    }
    worst
}

#[test]
fn noise_free_identity_rig_keeps_all_inliers() {
    let s = identity_scenario();
    let cfg = RefinerConfig {
        refiner_num_passes: 1,
        depth_tri_weight: 0.0,
        ..Default::default()
    };

    let mut refiner = RigRefiner::new(
        &cfg,
        s.rig.clone(),
        s.bracketed.clone(),
        s.keypoints.clone(),
        s.tracks.clone(),
        s.world_to_ref.clone(),
        s.ref_timestamps.clone(),
        None,
    )
    .unwrap();
    refiner.run().unwrap();

    for (pid, track) in refiner.tracks().iter().enumerate() {
        assert_eq!(refiner.inliers().num_inliers(pid), track.len());
    }
    for (got, want) in refiner.landmarks().iter().zip(&s.truth) {
        assert!((got - want).norm() < 1e-6, "landmark off: {got} vs {want}");
    }
    assert!(
        max_reproj_residual(&s, &refiner) <= 1e-8,
        "noise-free residuals must vanish"
    );

    // The bracketing invariant survives the pass.
    for cam in refiner.cams() {
        let beg = s.ref_timestamps[cam.beg_ref_index];
        let end = s.ref_timestamps[cam.end_ref_index];
        assert!(beg <= cam.timestamp && cam.timestamp <= end);
    }
}

#[test]
fn single_perturbed_keypoint_is_the_only_outlier() {
    let mut s = identity_scenario();
    // Displace one sci-cam keypoint of track 0 by 100 px.
    s.keypoints[1][0].0 += 100.0;

    let cfg = RefinerConfig {
        refiner_num_passes: 1,
        depth_tri_weight: 0.0,
        ..Default::default()
    };

    let mut refiner = RigRefiner::new(
        &cfg,
        s.rig.clone(),
        s.bracketed.clone(),
        s.keypoints.clone(),
        s.tracks.clone(),
        s.world_to_ref.clone(),
        s.ref_timestamps.clone(),
        None,
    )
    .unwrap();
    refiner.run().unwrap();

    for (pid, track) in refiner.tracks().iter().enumerate() {
        for (&cid, &fid) in track {
            let expect_inlier = !(pid == 0 && cid == 1);
            assert_eq!(
                refiner.inliers().is_inlier(pid, cid, fid),
                expect_inlier,
                "unexpected inlier state for ({pid}, {cid}, {fid})"
            );
        }
    }
}

#[test]
fn zero_iterations_change_nothing() {
    let s = identity_scenario();
    let cfg = RefinerConfig {
        refiner_num_passes: 1,
        num_iterations: 0,
        depth_tri_weight: 0.0,
        ..Default::default()
    };

    let mut refiner = RigRefiner::new(
        &cfg,
        s.rig.clone(),
        s.bracketed.clone(),
        s.keypoints.clone(),
        s.tracks.clone(),
        s.world_to_ref.clone(),
        s.ref_timestamps.clone(),
        None,
    )
    .unwrap();
    refiner.run().unwrap();

    for (got, want) in refiner.world_to_ref().iter().zip(&s.world_to_ref) {
        assert_eq!(got, want);
    }
    for (sensor, orig) in refiner.rig().sensors.iter().zip(&s.rig.sensors) {
        assert_eq!(sensor.params, orig.params);
        assert_eq!(sensor.ref_to_sensor, orig.ref_to_sensor);
        assert_eq!(sensor.timestamp_offset, orig.timestamp_offset);
    }
    // Triangulation still ran; the landmarks land on the ground truth.
    for (got, want) in refiner.landmarks().iter().zip(&s.truth) {
        assert!((got - want).norm() < 1e-6);
    }
}

#[test]
fn consistent_depth_cloud_leaves_no_depth_residual() {
    let mut s = identity_scenario();

    // Build a depth cloud for the sci acquisition holding exactly the
    // camera-frame landmark at each keypoint pixel (depth_to_image is the
    // identity with scale 1).
    let sci_pose = &s.poses[1];
    let mut data = vec![[0.0f32; 3]; 640 * 480];
    for (pid, x) in s.truth.iter().enumerate() {
        let (kx, ky) = s.keypoints[1][pid];
        let (col, row) = (kx.round() as usize, ky.round() as usize);
        let pc = sci_pose.transform_point(&Pt3::from(*x));
        data[row * 640 + col] = [pc.x as f32, pc.y as f32, pc.z as f32];
    }
    s.bracketed.cams[1].depth = Some(DepthRecord {
        cloud: DepthCloud::new(480, 640, data),
        timestamp: 0.5,
        path: "sci_cam/0.5.pc".into(),
    });

    let cfg = RefinerConfig {
        refiner_num_passes: 1,
        ..Default::default()
    };

    let mut refiner = RigRefiner::new(
        &cfg,
        s.rig.clone(),
        s.bracketed.clone(),
        s.keypoints.clone(),
        s.tracks.clone(),
        s.world_to_ref.clone(),
        s.ref_timestamps.clone(),
        None,
    )
    .unwrap();
    refiner.run().unwrap();

    // The depth measurements are only f32-exact; the landmarks stay at the
    // ground truth to that precision and nothing is flagged.
    for (pid, track) in refiner.tracks().iter().enumerate() {
        assert_eq!(refiner.inliers().num_inliers(pid), track.len());
    }
    for (got, want) in refiner.landmarks().iter().zip(&s.truth) {
        assert!((got - want).norm() < 1e-4, "landmark off: {got} vs {want}");
    }
}

#[test]
fn inlier_mask_is_monotone_across_passes() {
    let mut s = identity_scenario();
    s.keypoints[1][0].0 += 100.0;

    let cfg = RefinerConfig {
        refiner_num_passes: 2,
        depth_tri_weight: 0.0,
        ..Default::default()
    };

    let mut refiner = RigRefiner::new(
        &cfg,
        s.rig.clone(),
        s.bracketed.clone(),
        s.keypoints.clone(),
        s.tracks.clone(),
        s.world_to_ref.clone(),
        s.ref_timestamps.clone(),
        None,
    )
    .unwrap();
    refiner.run().unwrap();

    // The perturbed observation stays out; the rest stays in.
    assert!(!refiner.inliers().is_inlier(0, 1, 0));
    assert_eq!(refiner.inliers().num_inliers(0), 2);
}
