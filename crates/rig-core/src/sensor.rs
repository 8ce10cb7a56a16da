//! Sensor descriptors for a rigid multi-sensor rig.

use thiserror::Error;

use crate::camera::SensorParams;
use crate::math::{Iso3, Real};
use crate::transform::AffineXf;

#[derive(Debug, Error)]
pub enum RigError {
    #[error("the reference sensor id must be 0, got {0}")]
    BadRefSensorId(usize),
    #[error("expecting to read sensor id {expected}, got {got}")]
    NonSequentialSensorId { expected: usize, got: usize },
    #[error("the transform from the reference sensor to itself must be the identity")]
    RefTransformNotIdentity,
    #[error("a rig must have at least one sensor")]
    Empty,
}

/// Fixed per-sensor description: identity, intrinsics, rig placement, depth
/// registration, and clock offset relative to the reference sensor.
#[derive(Debug, Clone)]
pub struct RigSensor {
    /// Sensor id; the reference sensor has id 0.
    pub id: usize,
    pub name: String,
    pub params: SensorParams,
    /// Rigid transform from the reference sensor to this sensor. Identity for
    /// the reference sensor.
    pub ref_to_sensor: Iso3,
    /// Transform from depth-cloud coordinates to image coordinates; rigid
    /// with scale, or arbitrary affine.
    pub depth_to_image: AffineXf,
    /// Additive shift converting this sensor's timestamps to reference-clock
    /// time: `ref_ts = wall_ts - offset`.
    pub timestamp_offset: Real,
}

/// The full rig: reference sensor id plus one descriptor per sensor.
///
/// `have_rig_transforms` is false when the configuration carried the all-zero
/// "no initial rig known" sentinel; sensor poses must then be recovered
/// independently per acquisition.
#[derive(Debug, Clone)]
pub struct RigSet {
    pub ref_sensor_id: usize,
    pub sensors: Vec<RigSensor>,
    pub have_rig_transforms: bool,
}

impl RigSet {
    pub fn new(
        ref_sensor_id: usize,
        sensors: Vec<RigSensor>,
        have_rig_transforms: bool,
    ) -> Result<Self, RigError> {
        if ref_sensor_id != 0 {
            return Err(RigError::BadRefSensorId(ref_sensor_id));
        }
        if sensors.is_empty() {
            return Err(RigError::Empty);
        }
        for (i, sensor) in sensors.iter().enumerate() {
            if sensor.id != i {
                return Err(RigError::NonSequentialSensorId {
                    expected: i,
                    got: sensor.id,
                });
            }
        }
        if have_rig_transforms && sensors[ref_sensor_id].ref_to_sensor != Iso3::identity() {
            return Err(RigError::RefTransformNotIdentity);
        }
        Ok(Self {
            ref_sensor_id,
            sensors,
            have_rig_transforms,
        })
    }

    pub fn num_sensors(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_ref(&self, sensor_id: usize) -> bool {
        sensor_id == self.ref_sensor_id
    }
}
