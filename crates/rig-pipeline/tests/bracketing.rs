//! Bracketing behavior: midpoint preference, bracket-length boundary,
//! derived timestamp-offset bounds, and depth association.

use std::collections::BTreeMap;

use image::GrayImage;
use rig_core::{AffineXf, DepthCloud, Iso3, Real, RigSensor, RigSet, SensorParams};
use rig_pipeline::bracket::{lookup_images_and_brackets, BracketConfig};
use rig_pipeline::input::{DepthEntry, ImageEntry, LoadedData, SensorData};

fn two_sensor_rig(offset: Real) -> RigSet {
    let params = SensorParams::new(600.0, [320.0, 240.0], vec![], [640, 480], [640, 480]).unwrap();
    let nav = RigSensor {
        id: 0,
        name: "nav_cam".into(),
        params: params.clone(),
        ref_to_sensor: Iso3::identity(),
        depth_to_image: AffineXf::identity(),
        timestamp_offset: 0.0,
    };
    let haz = RigSensor {
        id: 1,
        name: "haz_cam".into(),
        params,
        ref_to_sensor: Iso3::translation(0.05, 0.0, 0.0),
        depth_to_image: AffineXf::identity(),
        timestamp_offset: offset,
    };
    RigSet::new(0, vec![nav, haz], true).unwrap()
}

fn image_entry(sensor: &str, ts: Real) -> ImageEntry {
    ImageEntry {
        timestamp: ts,
        path: format!("{sensor}/{ts}.jpg"),
        image: GrayImage::new(4, 3),
        world_to_cam: Iso3::translation(ts, 0.0, 0.0),
    }
}

fn loaded(rig: &RigSet, nav_ts: &[Real], haz_ts: &[Real]) -> LoadedData {
    let nav = SensorData {
        images: nav_ts.iter().map(|&t| image_entry("nav_cam", t)).collect(),
        depths: Vec::new(),
    };
    let haz = SensorData {
        images: haz_ts.iter().map(|&t| image_entry("haz_cam", t)).collect(),
        depths: Vec::new(),
    };
    LoadedData {
        per_sensor: vec![nav, haz],
        ref_timestamps: nav_ts.to_vec(),
        world_to_ref: nav_ts.iter().map(|&t| Iso3::translation(t, 0.0, 0.0)).collect(),
    }
}

#[test]
fn acquisition_closest_to_midpoint_wins() {
    let rig = two_sensor_rig(0.0);
    let data = loaded(&rig, &[0.0, 0.5], &[0.05, 0.22, 0.45]);
    let cfg = BracketConfig::default();

    let out = lookup_images_and_brackets(&rig, &data, &cfg).unwrap();
    let haz: Vec<_> = out.cams.iter().filter(|c| c.sensor_id == 1).collect();
    assert_eq!(haz.len(), 1);
    assert_eq!(haz[0].timestamp, 0.22);
    assert_eq!(haz[0].beg_ref_index, 0);
    assert_eq!(haz[0].end_ref_index, 1);
}

#[test]
fn bracket_length_boundary_is_accepted() {
    let rig = two_sensor_rig(0.0);
    let data = loaded(&rig, &[0.0, 0.6], &[0.3]);
    // The reference gap equals the bracket length exactly.
    let cfg = BracketConfig {
        bracket_len: 0.6,
        ..Default::default()
    };

    let out = lookup_images_and_brackets(&rig, &data, &cfg).unwrap();
    assert!(out.cams.iter().any(|c| c.sensor_id == 1));
}

#[test]
fn too_large_gap_discards_the_acquisition() {
    // Reference timestamps [0, 10] with bracket length 1: the middle
    // acquisition cannot be bracketed, and with no other haz images the
    // bracketing fails loudly.
    let rig = two_sensor_rig(0.0);
    let data = loaded(&rig, &[0.0, 10.0], &[5.0]);
    let cfg = BracketConfig {
        bracket_len: 1.0,
        ..Default::default()
    };

    let err = lookup_images_and_brackets(&rig, &data, &cfg).unwrap_err();
    assert!(err.to_string().contains("could not bracket"));
}

#[test]
fn bracketing_invariant_holds_with_offsets() {
    let offset = 0.07;
    let rig = two_sensor_rig(offset);
    let data = loaded(&rig, &[10.0, 10.4, 10.8], &[10.2 + offset, 10.6 + offset]);
    let cfg = BracketConfig::default();

    let out = lookup_images_and_brackets(&rig, &data, &cfg).unwrap();
    for cam in out.cams.iter().filter(|c| c.sensor_id == 1) {
        let beg = data.ref_timestamps[cam.beg_ref_index];
        let end = data.ref_timestamps[cam.end_ref_index];
        assert!(beg + offset <= cam.timestamp && cam.timestamp <= end + offset);
        assert!(end - beg <= cfg.bracket_len);
        assert_eq!(cam.ref_timestamp, cam.timestamp - offset);
    }

    // The derived bounds contain the initial offset after shrinking.
    assert!(out.min_timestamp_offset[1] <= offset);
    assert!(offset <= out.max_timestamp_offset[1]);
    assert!(out.min_timestamp_offset[1] > offset - 0.3);
    assert!(out.max_timestamp_offset[1] < offset + 0.3);
}

#[test]
fn sorted_by_reference_clock() {
    let offset = -0.5;
    let rig = two_sensor_rig(offset);
    let data = loaded(&rig, &[10.0, 10.4], &[10.2 + offset]);
    let out = lookup_images_and_brackets(&rig, &data, &BracketConfig::default()).unwrap();

    let ref_times: Vec<Real> = out.cams.iter().map(|c| c.ref_timestamp).collect();
    let mut sorted = ref_times.clone();
    sorted.sort_by(Real::total_cmp);
    assert_eq!(ref_times, sorted);
}

#[test]
fn nearby_depth_cloud_is_attached() {
    let rig = two_sensor_rig(0.0);
    let mut data = loaded(&rig, &[0.0, 0.5], &[0.25]);
    data.per_sensor[1].depths = vec![
        DepthEntry {
            timestamp: 0.05,
            path: "haz_cam/0.05.pc".into(),
            cloud: DepthCloud::new(1, 1, vec![[1.0, 1.0, 1.0]]),
        },
        DepthEntry {
            timestamp: 0.27,
            path: "haz_cam/0.27.pc".into(),
            cloud: DepthCloud::new(1, 1, vec![[2.0, 2.0, 2.0]]),
        },
    ];

    let out = lookup_images_and_brackets(&rig, &data, &BracketConfig::default()).unwrap();
    let haz = out.cams.iter().find(|c| c.sensor_id == 1).unwrap();
    let depth = haz.depth.as_ref().expect("depth cloud should attach");
    assert_eq!(depth.timestamp, 0.27);
}

#[test]
fn far_depth_cloud_is_rejected() {
    let rig = two_sensor_rig(0.0);
    let mut data = loaded(&rig, &[0.0, 0.5], &[0.25]);
    data.per_sensor[1].depths = vec![DepthEntry {
        timestamp: 3.0,
        path: "haz_cam/3.0.pc".into(),
        cloud: DepthCloud::new(1, 1, vec![[1.0, 1.0, 1.0]]),
    }];

    let cfg = BracketConfig {
        max_image_to_depth_diff: 0.2,
        ..Default::default()
    };
    let out = lookup_images_and_brackets(&rig, &data, &cfg).unwrap();
    let haz = out.cams.iter().find(|c| c.sensor_id == 1).unwrap();
    assert!(haz.depth.is_none());
}

#[test]
fn timestamp_whitelist_skips_other_acquisitions() {
    let rig = two_sensor_rig(0.0);
    // Two bracketable haz acquisitions in separate gaps.
    let data = loaded(&rig, &[0.0, 0.5, 1.0], &[0.25, 0.75]);
    let cfg = BracketConfig {
        sensor_timestamps_to_use: BTreeMap::from([(1usize, vec![0.75])]),
        ..Default::default()
    };

    let out = lookup_images_and_brackets(&rig, &data, &cfg).unwrap();
    let haz: Vec<_> = out.cams.iter().filter(|c| c.sensor_id == 1).collect();
    assert_eq!(haz.len(), 1);
    assert_eq!(haz[0].timestamp, 0.75);
}

#[test]
fn reference_frames_are_self_bracketing() {
    let rig = two_sensor_rig(0.0);
    let data = loaded(&rig, &[0.0, 0.5], &[0.25]);
    let out = lookup_images_and_brackets(&rig, &data, &BracketConfig::default()).unwrap();

    for cam in out.cams.iter().filter(|c| c.sensor_id == 0) {
        assert!(cam.is_self_bracketed());
        assert_eq!(cam.timestamp, cam.ref_timestamp);
    }
}
