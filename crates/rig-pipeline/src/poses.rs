//! Recomputing world-to-camera transforms for every acquisition from the
//! current parameter state.

use anyhow::{ensure, Context, Result};

use rig_core::{calc_world_to_cam, CamImage, Iso3, Real, RigSet};

/// Compute the world-to-camera transform of every acquisition by
/// interpolating the reference poses and applying the extrinsics.
pub fn calc_world_to_cam_transforms(
    rig: &RigSet,
    cams: &[CamImage],
    world_to_ref: &[Iso3],
    ref_timestamps: &[Real],
) -> Result<Vec<Iso3>> {
    ensure!(
        world_to_ref.len() == ref_timestamps.len(),
        "must have as many reference timestamps as reference cameras"
    );

    cams.iter()
        .map(|cam| {
            let sensor = &rig.sensors[cam.sensor_id];
            calc_world_to_cam(
                &world_to_ref[cam.beg_ref_index],
                &world_to_ref[cam.end_ref_index],
                &sensor.ref_to_sensor,
                ref_timestamps[cam.beg_ref_index],
                ref_timestamps[cam.end_ref_index],
                sensor.timestamp_offset,
                cam.timestamp,
            )
            .with_context(|| {
                format!(
                    "acquisition of sensor {} at {:.17} fell outside its bracket",
                    sensor.name, cam.timestamp
                )
            })
        })
        .collect()
}
