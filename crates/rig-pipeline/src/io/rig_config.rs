//! The rig-configuration text format.
//!
//! Line-oriented, `#` comments and blank lines skipped. The file starts with
//! `ref_sensor_id: 0` and then carries one tagged block per sensor, in id
//! order. An all-zero `ref_to_sensor_transform` signals that no initial rig
//! is known.

use anyhow::{bail, ensure, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use rig_core::{AffineXf, DistortionKind, Iso3, RigSensor, RigSet, SensorParams};

struct ConfigLines {
    lines: std::vec::IntoIter<String>,
}

impl ConfigLines {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open file for reading: {}", path.display()))?;
        let lines = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Self {
            lines: lines.into_iter(),
        })
    }

    /// Next non-comment, non-blank line split into tokens, or `None` at EOF.
    fn next_tokens(&mut self) -> Option<Vec<String>> {
        for line in self.lines.by_ref() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Some(trimmed.split_whitespace().map(str::to_string).collect());
        }
        None
    }

    /// Read the values following `tag`; validates the count when requested.
    fn read_vals(&mut self, tag: &str, desired_num: Option<usize>) -> Result<Vec<String>> {
        let tokens = self
            .next_tokens()
            .with_context(|| format!("could not read value for: {tag}"))?;
        ensure!(
            tokens[0] == tag,
            "could not read value for: {tag}, found: {}",
            tokens[0]
        );
        let vals: Vec<String> = tokens[1..].to_vec();
        if let Some(want) = desired_num {
            ensure!(
                vals.len() == want,
                "read an incorrect number of values for: {tag}"
            );
        }
        Ok(vals)
    }

    fn read_floats(&mut self, tag: &str, desired_num: Option<usize>) -> Result<Vec<f64>> {
        self.read_vals(tag, desired_num)?
            .iter()
            .map(|v| {
                v.parse()
                    .with_context(|| format!("cannot parse a number for: {tag}"))
            })
            .collect()
    }
}

/// Read a rig configuration.
pub fn read_rig_config(path: &Path) -> Result<RigSet> {
    log::info!("Reading: {}", path.display());
    let mut lines = ConfigLines::open(path)?;

    let ref_vals = lines.read_floats("ref_sensor_id:", Some(1))?;
    let ref_sensor_id = ref_vals[0] as usize;

    let mut have_rig_transforms = true;
    let mut sensors = Vec::new();

    loop {
        // No more sensors at EOF.
        let id_tokens = match lines.next_tokens() {
            Some(tokens) => tokens,
            None => break,
        };
        ensure!(
            id_tokens[0] == "sensor_id:" && id_tokens.len() == 2,
            "expecting a sensor_id: line, got: {}",
            id_tokens.join(" ")
        );
        let sensor_id: usize = id_tokens[1].parse().context("cannot parse sensor_id")?;
        ensure!(
            sensor_id == sensors.len(),
            "expecting to read sensor id: {}",
            sensors.len()
        );

        let name = lines.read_vals("sensor_name:", Some(1))?[0].clone();
        let focal_length = lines.read_floats("focal_length:", Some(1))?[0];
        let center = lines.read_floats("optical_center:", Some(2))?;
        let distortion = lines.read_floats("distortion_coeffs:", None)?;

        let kind = DistortionKind::from_len(distortion.len())?;
        let typ = lines.read_vals("distortion_type:", Some(1))?[0].clone();
        ensure!(
            typ == kind.config_name(),
            "with {} distortion coefficients, distortion type must be: {}",
            distortion.len(),
            kind.config_name()
        );

        let image_size = lines.read_floats("image_size:", Some(2))?;
        let undist_size = lines.read_floats("undistorted_image_size:", Some(2))?;

        let ref_to_sensor_vals = lines.read_floats("ref_to_sensor_transform:", Some(12))?;
        let ref_to_sensor_aff = AffineXf::from_array(&ref_to_sensor_vals)?;
        if have_rig_transforms && ref_to_sensor_aff.is_zero() {
            log::info!("Found that ref_to_sensor_transform is zero. Will ignore it.");
            have_rig_transforms = false;
        }

        let depth_vals = lines.read_floats("depth_to_image_transform:", Some(12))?;
        let depth_to_image = AffineXf::from_array(&depth_vals)?;

        let timestamp_offset = lines.read_floats("ref_to_sensor_timestamp_offset:", Some(1))?[0];

        let params = SensorParams::new(
            focal_length,
            [center[0], center[1]],
            distortion,
            [image_size[0] as u32, image_size[1] as u32],
            [undist_size[0] as u32, undist_size[1] as u32],
        )?;

        sensors.push(RigSensor {
            id: sensor_id,
            name,
            params,
            ref_to_sensor: affine_to_rigid(&ref_to_sensor_aff),
            depth_to_image,
            timestamp_offset,
        });
    }

    if sensors.is_empty() {
        bail!("no sensors found in: {}", path.display());
    }

    Ok(RigSet::new(ref_sensor_id, sensors, have_rig_transforms)?)
}

/// Interpret a 12-value transform as rigid; the rotation comes from the
/// linear part as-is (configuration transforms are orthonormal).
fn affine_to_rigid(t: &AffineXf) -> Iso3 {
    if t.is_zero() {
        return Iso3::identity();
    }
    let rot = rig_core::Quat::from_rotation_matrix(&nalgebra::Rotation3::from_matrix_unchecked(
        t.linear,
    ));
    Iso3::from_parts(nalgebra::Translation3::from(t.translation), rot)
}

fn floats_to_str(vals: &[f64]) -> String {
    vals.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write the rig configuration.
///
/// With `model_rig` false the `ref_to_sensor_transform` entries are written
/// as zeros: without a rig, the transforms between sensors are meaningless.
pub fn write_rig_config(path: &Path, model_rig: bool, rig: &RigSet) -> Result<()> {
    log::info!("Writing: {}", path.display());
    let file = File::create(path)
        .with_context(|| format!("cannot open file for writing: {}", path.display()))?;
    let mut f = BufWriter::new(file);

    writeln!(f, "ref_sensor_id: {}", rig.ref_sensor_id)?;

    for sensor in &rig.sensors {
        writeln!(f)?;
        writeln!(f, "sensor_id: {}", sensor.id)?;
        writeln!(f, "sensor_name: {}", sensor.name)?;
        writeln!(f, "focal_length: {}", sensor.params.focal_length)?;
        writeln!(
            f,
            "optical_center: {}",
            floats_to_str(&sensor.params.optical_center)
        )?;
        writeln!(
            f,
            "distortion_coeffs: {}",
            floats_to_str(&sensor.params.distortion)
        )?;
        writeln!(
            f,
            "distortion_type: {}",
            sensor.params.distortion_kind().config_name()
        )?;
        writeln!(
            f,
            "image_size: {} {}",
            sensor.params.distorted_size[0], sensor.params.distorted_size[1]
        )?;
        writeln!(
            f,
            "undistorted_image_size: {} {}",
            sensor.params.undistorted_size[0], sensor.params.undistorted_size[1]
        )?;

        let ref_to_sensor = if model_rig {
            AffineXf::from_rigid(&sensor.ref_to_sensor)
        } else {
            AffineXf::zero()
        };
        writeln!(
            f,
            "ref_to_sensor_transform: {}",
            floats_to_str(&ref_to_sensor.to_array())
        )?;
        writeln!(
            f,
            "depth_to_image_transform: {}",
            floats_to_str(&sensor.depth_to_image.to_array())
        )?;
        writeln!(
            f,
            "ref_to_sensor_timestamp_offset: {}",
            sensor.timestamp_offset
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Translation3;
    use rig_core::{array_to_rigid, rigid_to_array, Quat};

    fn sample_rig() -> RigSet {
        let nav = RigSensor {
            id: 0,
            name: "nav_cam".to_string(),
            params: SensorParams::new(621.04, [580.56, 512.65], vec![0.998693], [1280, 960], [1500, 1200]).unwrap(),
            ref_to_sensor: Iso3::identity(),
            depth_to_image: AffineXf::identity(),
            timestamp_offset: 0.0,
        };
        let haz = RigSensor {
            id: 1,
            name: "haz_cam".to_string(),
            params: SensorParams::new(
                210.80,
                [120.33, 85.88],
                vec![-0.259598, -0.084888, 0.003542, -0.000236],
                [224, 171],
                [250, 200],
            )
            .unwrap(),
            ref_to_sensor: Iso3::from_parts(
                Translation3::new(0.071, 0.003, -0.022),
                Quat::from_scaled_axis(nalgebra::Vector3::new(0.01, -0.03, 0.002)),
            ),
            depth_to_image: AffineXf {
                linear: 0.95 * rig_core::Mat3::identity(),
                translation: rig_core::Vec3::new(0.001, -0.002, 0.0005),
            },
            timestamp_offset: -0.3459,
        };
        RigSet::new(0, vec![nav, haz], true).unwrap()
    }

    #[test]
    fn write_then_read_preserves_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig_config.txt");

        let rig = sample_rig();
        write_rig_config(&path, true, &rig).unwrap();
        let back = read_rig_config(&path).unwrap();

        assert!(back.have_rig_transforms);
        assert_eq!(back.num_sensors(), 2);
        for (a, b) in rig.sensors.iter().zip(&back.sensors) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.params, b.params);
            assert_eq!(rigid_to_array(&a.ref_to_sensor), rigid_to_array(&b.ref_to_sensor));
            assert_eq!(a.depth_to_image.to_array(), b.depth_to_image.to_array());
            assert_eq!(a.timestamp_offset, b.timestamp_offset);
        }
    }

    #[test]
    fn second_write_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.txt");
        let second = dir.path().join("b.txt");

        let rig = sample_rig();
        write_rig_config(&first, true, &rig).unwrap();
        let back = read_rig_config(&first).unwrap();
        write_rig_config(&second, true, &back).unwrap();

        assert_eq!(
            std::fs::read(&first).unwrap(),
            std::fs::read(&second).unwrap()
        );
    }

    #[test]
    fn zero_rig_transform_disables_the_rig() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig_config.txt");

        let rig = sample_rig();
        write_rig_config(&path, false, &rig).unwrap();
        let back = read_rig_config(&path).unwrap();
        assert!(!back.have_rig_transforms);
    }

    #[test]
    fn mismatched_distortion_type_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig_config.txt");
        std::fs::write(
            &path,
            "ref_sensor_id: 0\n\
             sensor_id: 0\n\
             sensor_name: nav_cam\n\
             focal_length: 600\n\
             optical_center: 320 240\n\
             distortion_coeffs: 0.9\n\
             distortion_type: radtan\n",
        )
        .unwrap();
        assert!(read_rig_config(&path).is_err());
    }

    #[test]
    fn array_to_rigid_roundtrip_through_config_values() {
        let pose = Iso3::from_parts(
            Translation3::new(0.4, -0.1, 0.9),
            Quat::from_scaled_axis(nalgebra::Vector3::new(0.2, 0.1, -0.05)),
        );
        let arr = rigid_to_array(&pose);
        let back = array_to_rigid(&arr).unwrap();
        assert_eq!(rigid_to_array(&back), arr);
    }
}
