//! Loading of images, depth clouds, and initial poses from the image-list
//! manifest.

use anyhow::{bail, ensure, Context, Result};
use image::imageops::FilterType;
use image::GrayImage;
use std::path::Path;

use rig_core::{DepthCloud, Iso3, Quat, Real, RigSet, SensorParams};

use crate::io::image_list::{read_image_list, ImageListRow};
use crate::io::xyz_grid::read_xyz_grid;

/// One loaded acquisition of a sensor, before bracketing.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub timestamp: Real,
    pub path: String,
    pub image: GrayImage,
    /// Initial world-to-camera pose from the manifest.
    pub world_to_cam: Iso3,
}

/// One loaded depth cloud of a sensor.
#[derive(Debug, Clone)]
pub struct DepthEntry {
    pub timestamp: Real,
    pub path: String,
    pub cloud: DepthCloud,
}

/// All acquisitions of one sensor, in chronological order.
#[derive(Debug, Clone, Default)]
pub struct SensorData {
    pub images: Vec<ImageEntry>,
    pub depths: Vec<DepthEntry>,
}

/// Everything the pipeline loads before bracketing.
#[derive(Debug, Clone)]
pub struct LoadedData {
    /// Per sensor id, chronological images and depth clouds.
    pub per_sensor: Vec<SensorData>,
    /// Timestamps of the reference-sensor acquisitions.
    pub ref_timestamps: Vec<Real>,
    /// World-to-reference poses, aligned with `ref_timestamps`.
    pub world_to_ref: Vec<Iso3>,
}

/// Resize a loaded image to the configured distorted size if needed.
///
/// Full-resolution images can be blurry enough to defeat interest-point
/// matching, hence the calibrated size wins.
pub fn adjust_image_size(params: &SensorParams, image: GrayImage) -> GrayImage {
    let [w, h] = params.distorted_size;
    if image.dimensions() == (w, h) {
        return image;
    }
    image::imageops::resize(&image, w, h, FilterType::Triangle)
}

fn rigid_from_manifest(row: &ImageListRow) -> Iso3 {
    let rot = Quat::from_rotation_matrix(&nalgebra::Rotation3::from_matrix_unchecked(
        row.world_to_cam.linear,
    ));
    Iso3::from_parts(
        nalgebra::Translation3::from(row.world_to_cam.translation),
        rot,
    )
}

/// Read the images, depth clouds, and their metadata listed in a manifest.
pub fn read_image_and_depth_data(image_list: &Path, rig: &RigSet) -> Result<LoadedData> {
    log::info!("Reading: {}", image_list.display());
    let rows = read_image_list(image_list)?;

    let mut per_sensor: Vec<SensorData> = vec![SensorData::default(); rig.num_sensors()];

    for row in &rows {
        ensure!(
            row.sensor_id < rig.num_sensors(),
            "sensor id {} in {} is not described by the rig configuration",
            row.sensor_id,
            image_list.display()
        );
        let params = &rig.sensors[row.sensor_id].params;

        let image = image::open(&row.image_path)
            .with_context(|| format!("cannot read image: {}", row.image_path))?
            .into_luma8();
        let image = adjust_image_size(params, image);

        per_sensor[row.sensor_id].images.push(ImageEntry {
            timestamp: row.timestamp,
            path: row.image_path.clone(),
            image,
            world_to_cam: rigid_from_manifest(row),
        });

        if let Some(depth_path) = &row.depth_path {
            let cloud = read_xyz_grid(Path::new(depth_path))?;
            per_sensor[row.sensor_id].depths.push(DepthEntry {
                timestamp: row.timestamp,
                path: depth_path.clone(),
                cloud,
            });
        }
    }

    finalize_loaded_data(rig, per_sensor)
}

/// Sort per-sensor entries chronologically, reject duplicate timestamps, and
/// extract the reference timeline.
pub fn finalize_loaded_data(rig: &RigSet, mut per_sensor: Vec<SensorData>) -> Result<LoadedData> {
    for (sensor_id, data) in per_sensor.iter_mut().enumerate() {
        data.images
            .sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        data.depths
            .sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        for pair in data.images.windows(2) {
            if pair[0].timestamp == pair[1].timestamp {
                bail!(
                    "duplicate timestamp {:.17} for sensor id {}",
                    pair[0].timestamp,
                    sensor_id
                );
            }
        }
        for pair in data.depths.windows(2) {
            if pair[0].timestamp == pair[1].timestamp {
                bail!(
                    "duplicate timestamp {:.17} for sensor id {}",
                    pair[0].timestamp,
                    sensor_id
                );
            }
        }
    }

    let ref_data = &per_sensor[rig.ref_sensor_id];
    ensure!(
        !ref_data.images.is_empty(),
        "no images found for the reference sensor"
    );

    let ref_timestamps = ref_data.images.iter().map(|e| e.timestamp).collect();
    let world_to_ref = ref_data.images.iter().map(|e| e.world_to_cam).collect();

    Ok(LoadedData {
        per_sensor,
        ref_timestamps,
        world_to_ref,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_core::{AffineXf, RigSensor};

    fn small_rig() -> RigSet {
        let nav = RigSensor {
            id: 0,
            name: "nav_cam".into(),
            params: SensorParams::new(600.0, [4.0, 3.0], vec![], [8, 6], [8, 6]).unwrap(),
            ref_to_sensor: Iso3::identity(),
            depth_to_image: AffineXf::identity(),
            timestamp_offset: 0.0,
        };
        RigSet::new(0, vec![nav], true).unwrap()
    }

    fn entry(ts: Real) -> ImageEntry {
        ImageEntry {
            timestamp: ts,
            path: format!("nav_cam/{ts}.jpg"),
            image: GrayImage::new(8, 6),
            world_to_cam: Iso3::identity(),
        }
    }

    #[test]
    fn duplicate_timestamps_are_fatal() {
        let rig = small_rig();
        let data = SensorData {
            images: vec![entry(1.0), entry(1.0)],
            depths: Vec::new(),
        };
        assert!(finalize_loaded_data(&rig, vec![data]).is_err());
    }

    #[test]
    fn reference_timeline_is_chronological() {
        let rig = small_rig();
        let data = SensorData {
            images: vec![entry(2.0), entry(1.0), entry(3.0)],
            depths: Vec::new(),
        };
        let loaded = finalize_loaded_data(&rig, vec![data]).unwrap();
        assert_eq!(loaded.ref_timestamps, vec![1.0, 2.0, 3.0]);
        assert_eq!(loaded.world_to_ref.len(), 3);
    }

    #[test]
    fn image_resize_matches_configured_size() {
        let params = SensorParams::new(600.0, [4.0, 3.0], vec![], [8, 6], [8, 6]).unwrap();
        let resized = adjust_image_size(&params, GrayImage::new(16, 12));
        assert_eq!(resized.dimensions(), (8, 6));
    }
}
