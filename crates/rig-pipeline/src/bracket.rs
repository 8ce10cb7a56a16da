//! Bracketing: for every non-reference acquisition, find the two
//! reference-sensor frames that straddle it in time.
//!
//! The traversal is monotone: each sensor keeps a scan cursor that advances
//! but never rewinds, committed only when a candidate wins. Between two
//! reference frames no further apart than the bracket length, the
//! acquisition closest to the bracket midpoint is chosen — that leaves the
//! most room to move the timestamp offset later.

use anyhow::{bail, ensure, Result};
use std::collections::BTreeMap;

use rig_core::{CamImage, DepthRecord, Iso3, Real, RigSet};

use crate::input::LoadedData;

/// Bracketing options.
#[derive(Debug, Clone)]
pub struct BracketConfig {
    /// Maximum time gap between consecutive reference frames for them to
    /// bracket another sensor's acquisition.
    pub bracket_len: Real,
    /// Half-width of the allowed change of each timestamp offset.
    pub timestamp_offsets_max_change: Real,
    /// Maximum time distance between an image and its depth cloud.
    pub max_image_to_depth_diff: Real,
    /// Optional per-sensor whitelists of acquisition timestamps.
    pub sensor_timestamps_to_use: BTreeMap<usize, Vec<Real>>,
}

impl Default for BracketConfig {
    fn default() -> Self {
        Self {
            bracket_len: 0.6,
            timestamp_offsets_max_change: 1.0,
            max_image_to_depth_diff: 0.2,
            sensor_timestamps_to_use: BTreeMap::new(),
        }
    }
}

/// Output of bracketing: the selected acquisitions, sorted by
/// reference-clock time, their initial poses, and the timestamp-offset
/// bounds derived from the bracketing.
#[derive(Debug, Clone)]
pub struct BracketedCams {
    pub cams: Vec<CamImage>,
    /// Initial world-to-camera poses from the manifest, aligned with `cams`.
    pub world_to_cam_init: Vec<Iso3>,
    /// Per sensor, the range the timestamp offset may move without breaking
    /// any bracket, shrunk by a small epsilon.
    pub min_timestamp_offset: Vec<Real>,
    pub max_timestamp_offset: Vec<Real>,
}

/// Margin subtracted from the offset bounds: timestamps are large absolute
/// values, so later additions and subtractions can lose precision.
const OFFSET_BOUND_MARGIN: Real = 1.0e-5;

pub fn lookup_images_and_brackets(
    rig: &RigSet,
    data: &LoadedData,
    cfg: &BracketConfig,
) -> Result<BracketedCams> {
    log::info!("Looking up the images and bracketing the timestamps.");

    let num_ref = data.ref_timestamps.len();
    let num_sensors = rig.num_sensors();
    ensure!(num_ref > 0, "no reference acquisitions to bracket against");

    let mut entries: Vec<(CamImage, Iso3)> = Vec::new();
    let mut min_offset = vec![-1.0e+100; num_sensors];
    let mut max_offset = vec![1.0e+100; num_sensors];

    // Per-sensor scan cursors; they only advance.
    let mut image_cursor = vec![0usize; num_sensors];
    let mut depth_cursor = vec![0usize; num_sensors];

    for beg_ref_it in 0..num_ref {
        // The final reference frame brackets against itself.
        let mut end_ref_it = beg_ref_it + 1;
        let last_timestamp = end_ref_it == num_ref;
        if last_timestamp {
            end_ref_it = beg_ref_it;
        }

        for sensor_id in 0..num_sensors {
            let offset = rig.sensors[sensor_id].timestamp_offset;

            let picked = if rig.is_ref(sensor_id) {
                let entry = &data.per_sensor[sensor_id].images[beg_ref_it];
                ensure!(
                    entry.timestamp == data.ref_timestamps[beg_ref_it],
                    "cannot look up camera at time {:.17}",
                    data.ref_timestamps[beg_ref_it]
                );
                Some((
                    beg_ref_it,
                    CamImage {
                        sensor_id,
                        timestamp: entry.timestamp,
                        ref_timestamp: entry.timestamp,
                        beg_ref_index: beg_ref_it,
                        end_ref_index: beg_ref_it,
                        image: entry.image.clone(),
                        image_path: entry.path.clone(),
                        depth: None,
                    },
                ))
            } else {
                // Convert the bracketing timestamps to this sensor's clock.
                let beg_timestamp = data.ref_timestamps[beg_ref_it] + offset;
                let end_timestamp = data.ref_timestamps[end_ref_it] + offset;

                if end_timestamp < beg_timestamp {
                    bail!("ref timestamps must be in strictly increasing order");
                }
                if end_timestamp == beg_timestamp && !last_timestamp {
                    bail!("ref timestamps must be in strictly increasing order");
                }
                if end_timestamp - beg_timestamp > cfg.bracket_len {
                    continue; // must respect the bracket length
                }

                let mid_timestamp = (beg_timestamp + end_timestamp) / 2.0;
                let images = &data.per_sensor[sensor_id].images;

                // Scan forward from the cursor; commit it only on success.
                let mut pos = image_cursor[sensor_id];
                while pos < images.len() && images[pos].timestamp < beg_timestamp {
                    pos += 1;
                }
                let mut best: Option<usize> = None;
                let mut best_dist = Real::INFINITY;
                let mut probe = pos;
                while probe < images.len() && images[probe].timestamp <= end_timestamp {
                    let dist = (images[probe].timestamp - mid_timestamp).abs();
                    if dist < best_dist {
                        best_dist = dist;
                        best = Some(probe);
                    }
                    probe += 1;
                }

                match best {
                    None => continue, // bracketing failed for this gap
                    Some(idx) => {
                        image_cursor[sensor_id] = idx;
                        let entry = &images[idx];
                        Some((
                            idx,
                            CamImage {
                                sensor_id,
                                timestamp: entry.timestamp,
                                ref_timestamp: entry.timestamp - offset,
                                beg_ref_index: beg_ref_it,
                                end_ref_index: end_ref_it,
                                image: entry.image.clone(),
                                image_path: entry.path.clone(),
                                depth: None,
                            },
                        ))
                    }
                }
            };

            let (entry_idx, mut cam) = match picked {
                Some(v) => v,
                None => continue,
            };

            // Honor the per-sensor timestamp whitelist.
            if let Some(allowed) = cfg.sensor_timestamps_to_use.get(&sensor_id) {
                if !allowed.is_empty() && !allowed.contains(&cam.timestamp) {
                    log::info!(
                        "For {} skipping timestamp: {:.17}",
                        rig.sensors[sensor_id].name,
                        cam.timestamp
                    );
                    continue;
                }
            }

            if !rig.is_ref(sensor_id) {
                // The acquisition was chosen so that
                //   ref_ts[beg] + offset <= cam.timestamp <= ref_ts[end] + offset.
                // Track how far the offset may move while these still hold.
                min_offset[sensor_id] = min_offset[sensor_id]
                    .max(cam.timestamp - data.ref_timestamps[cam.end_ref_index]);
                max_offset[sensor_id] = max_offset[sensor_id]
                    .min(cam.timestamp - data.ref_timestamps[cam.beg_ref_index]);
            }

            // Attach the nearest depth cloud in time, if close enough.
            let depths = &data.per_sensor[sensor_id].depths;
            if !depths.is_empty() {
                let mut q = depth_cursor[sensor_id];
                while q + 1 < depths.len()
                    && (depths[q + 1].timestamp - cam.timestamp).abs()
                        <= (depths[q].timestamp - cam.timestamp).abs()
                {
                    q += 1;
                }
                if (depths[q].timestamp - cam.timestamp).abs() <= cfg.max_image_to_depth_diff {
                    depth_cursor[sensor_id] = q;
                    cam.depth = Some(DepthRecord {
                        cloud: depths[q].cloud.clone(),
                        timestamp: depths[q].timestamp,
                        path: depths[q].path.clone(),
                    });
                }
            }

            let pose = data.per_sensor[sensor_id].images[entry_idx].world_to_cam;
            entries.push((cam, pose));
        }
    }

    // Every sensor must contribute at least one image.
    let mut num_images = vec![0usize; num_sensors];
    for (cam, _) in &entries {
        num_images[cam.sensor_id] += 1;
    }
    let mut is_good = true;
    for sensor_id in 0..num_sensors {
        log::info!(
            "Number of found images for camera: {}: {}",
            rig.sensors[sensor_id].name,
            num_images[sensor_id]
        );
        if num_images[sensor_id] == 0 {
            is_good = false;
        }
    }
    if !is_good {
        bail!("could not bracket all images; cannot continue");
    }

    // Clamp the derived bounds by the allowed change and tighten a bit.
    log::info!("Timestamp offset allowed ranges based on current bracketing:");
    for sensor_id in 0..num_sensors {
        if rig.is_ref(sensor_id) {
            continue; // bounds don't make sense here
        }
        let initial = rig.sensors[sensor_id].timestamp_offset;
        min_offset[sensor_id] =
            min_offset[sensor_id].max(initial - cfg.timestamp_offsets_max_change);
        max_offset[sensor_id] =
            max_offset[sensor_id].min(initial + cfg.timestamp_offsets_max_change);

        min_offset[sensor_id] += OFFSET_BOUND_MARGIN;
        max_offset[sensor_id] -= OFFSET_BOUND_MARGIN;
        log::info!(
            "{}: [{:.8}, {:.8}]",
            rig.sensors[sensor_id].name,
            min_offset[sensor_id],
            max_offset[sensor_id]
        );
    }

    // Sort by timestamp on the reference clock; matching relies on images
    // close in time being close in the list. The bracketing indices keep
    // pointing into the unchanged reference timeline.
    entries.sort_by(|a, b| a.0.ref_timestamp.total_cmp(&b.0.ref_timestamp));
    let (cams, world_to_cam_init) = entries.into_iter().unzip();

    Ok(BracketedCams {
        cams,
        world_to_cam_init,
        min_timestamp_offset: min_offset,
        max_timestamp_offset: max_offset,
    })
}
