//! Registration: control points re-anchor the map, and reprojection
//! residuals are invariant to the world-frame change.

use image::GrayImage;
use nalgebra::Rotation3;
use rig_core::{
    AffineXf, CamImage, Iso3, KeypointVec, Pt3, Real, RigSensor, RigSet, SensorParams, Track,
    Vec2, Vec3,
};
use rig_pipeline::bracket::BracketedCams;
use rig_pipeline::config::RefinerConfig;
use rig_pipeline::refine::RigRefiner;

const FOCAL: Real = 512.0;

fn one_sensor_rig() -> RigSet {
    let params = SensorParams::new(FOCAL, [320.0, 240.0], vec![], [640, 480], [640, 480]).unwrap();
    RigSet::new(
        0,
        vec![RigSensor {
            id: 0,
            name: "nav_cam".into(),
            params,
            ref_to_sensor: Iso3::identity(),
            depth_to_image: AffineXf {
                linear: 1.1 * rig_core::Mat3::identity(),
                translation: Vec3::new(0.01, 0.0, 0.0),
            },
            timestamp_offset: 0.0,
        }],
        true,
    )
    .unwrap()
}

fn project(w2c: &Iso3, x: &Vec3) -> Vec2 {
    let pc = w2c.transform_point(&Pt3::from(*x));
    Vec2::new(
        FOCAL * pc.x / pc.z + 320.0,
        FOCAL * pc.y / pc.z + 240.0,
    )
}

fn reproj_residuals(refiner: &RigRefiner, keypoints: &KeypointVec) -> Vec<Real> {
    let mut out = Vec::new();
    for (pid, track) in refiner.tracks().iter().enumerate() {
        for (&cid, &fid) in track {
            let pix = project(&refiner.world_to_cam()[cid], &refiner.landmarks()[pid]);
            let (kx, ky) = keypoints[cid][fid];
            out.push((pix - Vec2::new(kx as Real, ky as Real)).norm());
        }
    }
    out
}

#[test]
fn registration_rescales_every_buffer_and_keeps_residuals() {
    let rig = one_sensor_rig();

    let truth = vec![
        Vec3::new(-0.5, -0.25, 4.0),
        Vec3::new(0.5, 0.0, 4.0),
        Vec3::new(0.0, 0.375, 4.0),
        Vec3::new(-0.25, 0.25, 4.0),
    ];

    let world_to_ref = vec![Iso3::identity(), Iso3::translation(-0.5, 0.0, 0.0)];
    let ref_timestamps = vec![0.0, 1.0];
    let ref_paths = vec!["nav_cam/0.0.jpg".to_string(), "nav_cam/1.0.jpg".to_string()];

    let cams: Vec<CamImage> = (0..2)
        .map(|i| CamImage {
            sensor_id: 0,
            timestamp: ref_timestamps[i],
            ref_timestamp: ref_timestamps[i],
            beg_ref_index: i,
            end_ref_index: i,
            image: GrayImage::new(4, 3),
            image_path: ref_paths[i].clone(),
            depth: None,
        })
        .collect();

    let mut keypoints: KeypointVec = vec![Vec::new(); 2];
    let mut tracks = Vec::new();
    for (pid, x) in truth.iter().enumerate() {
        let mut track = Track::new();
        for (cid, pose) in world_to_ref.iter().enumerate() {
            let pix = project(pose, x);
            keypoints[cid].push((pix.x as f32, pix.y as f32));
            track.insert(cid, pid);
        }
        tracks.push(track);
    }

    let bracketed = BracketedCams {
        cams,
        world_to_cam_init: world_to_ref.clone(),
        min_timestamp_offset: vec![-1.0e+100],
        max_timestamp_offset: vec![1.0e+100],
    };

    let cfg = RefinerConfig {
        refiner_num_passes: 1,
        num_iterations: 0,
        depth_tri_weight: 0.0,
        ..Default::default()
    };

    let mut refiner = RigRefiner::new(
        &cfg,
        rig,
        bracketed,
        keypoints.clone(),
        tracks,
        world_to_ref,
        ref_timestamps,
        None,
    )
    .unwrap();
    refiner.run().unwrap();

    let residuals_before = reproj_residuals(&refiner, &keypoints);

    // Control points: every landmark observed in both reference images; the
    // measured coordinates live in a world scaled by 2, rotated about z, and
    // shifted.
    let similarity_rot = Rotation3::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2);
    let map_scale = 2.0;
    let shift = Vec3::new(5.0, -1.0, 0.5);

    let dir = tempfile::tempdir().unwrap();
    let hugin_path = dir.path().join("reg.pto");
    let xyz_path = dir.path().join("reg.xyz");

    let mut hugin = String::new();
    for path in &ref_paths {
        hugin.push_str(&format!("i w640 h480 f0 n\"{path}\"\n"));
    }
    let mut xyz_text = String::from("# measured world points\n");
    for (pid, x) in truth.iter().enumerate() {
        let (lx, ly) = keypoints[0][pid];
        let (rx, ry) = keypoints[1][pid];
        hugin.push_str(&format!("c n0 N1 x{lx} y{ly} X{rx} Y{ry} t0\n"));
        let measured = map_scale * (similarity_rot * x) + shift;
        xyz_text.push_str(&format!("{} {} {}\n", measured.x, measured.y, measured.z));
    }
    std::fs::write(&hugin_path, hugin).unwrap();
    std::fs::write(&xyz_path, xyz_text).unwrap();

    let depth_linear_before = refiner.rig().sensors[0].depth_to_image.linear;
    let transform = refiner.register(&hugin_path, &xyz_path, &ref_paths).unwrap();
    // The landmarks were re-triangulated from exact pixels, so the
    // similarity solve recovers the synthetic transform.
    assert!((transform.scale() - map_scale).abs() < 1e-6);

    // Landmarks moved into the measured world frame.
    for (got, x) in refiner.landmarks().iter().zip(&truth) {
        let want = map_scale * (similarity_rot * x) + shift;
        assert!((got - want).norm() < 1e-6, "landmark {got} vs {want}");
    }

    // The depth-to-image transform picked up the scale, linear and
    // translation both.
    let sensor = &refiner.rig().sensors[0];
    assert!((sensor.depth_to_image.linear - map_scale * depth_linear_before).norm() < 1e-9);
    assert!((sensor.depth_to_image.translation - Vec3::new(0.02, 0.0, 0.0)).norm() < 1e-9);

    // Reprojection residuals are unchanged by the world-frame change.
    let residuals_after = reproj_residuals(&refiner, &keypoints);
    for (a, b) in residuals_before.iter().zip(&residuals_after) {
        assert!((a - b).abs() < 1e-6, "residual changed: {a} vs {b}");
    }
}
