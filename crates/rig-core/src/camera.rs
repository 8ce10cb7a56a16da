//! Sensor camera model: one focal length, principal point, and a distortion
//! vector whose length selects the model (0 = none, 1 = FOV fisheye,
//! 4/5 = radtan).
//!
//! Two pixel spaces are used throughout the engine:
//! - *distorted* pixels: what the sensor measures, principal point included;
//! - *undistorted centered* pixels: ideal pinhole projection scaled by the
//!   focal length, with the principal point at the origin.

use nalgebra::RealField;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{Real, Vec2};

/// Number of fixed-point iterations for radtan undistortion.
const UNDISTORT_ITERS: usize = 8;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("expecting 0, 1, 4, or 5 distortion coefficients, got {0}")]
    BadDistortionLength(usize),
}

/// Distortion model, selected by the length of the coefficient vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistortionKind {
    /// No distortion (empty coefficient vector).
    None,
    /// One-coefficient FOV (fisheye) model.
    Fov,
    /// OpenCV radial-tangential model, `k1 k2 p1 p2 [k3]`.
    RadTan,
}

impl DistortionKind {
    pub fn from_len(len: usize) -> Result<Self, CameraError> {
        match len {
            0 => Ok(DistortionKind::None),
            1 => Ok(DistortionKind::Fov),
            4 | 5 => Ok(DistortionKind::RadTan),
            other => Err(CameraError::BadDistortionLength(other)),
        }
    }

    /// Tag used by the rig configuration file.
    pub fn config_name(self) -> &'static str {
        match self {
            DistortionKind::None => "none",
            DistortionKind::Fov => "fisheye",
            DistortionKind::RadTan => "radtan",
        }
    }
}

/// Intrinsic parameters of one sensor.
///
/// The x and y focal lengths are assumed equal; loaders average them if they
/// ever differ upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorParams {
    pub focal_length: Real,
    pub optical_center: [Real; 2],
    pub distortion: Vec<Real>,
    /// Width and height of the distorted (as-acquired) images.
    pub distorted_size: [u32; 2],
    /// Width and height of the undistorted image plane.
    pub undistorted_size: [u32; 2],
}

impl SensorParams {
    pub fn new(
        focal_length: Real,
        optical_center: [Real; 2],
        distortion: Vec<Real>,
        distorted_size: [u32; 2],
        undistorted_size: [u32; 2],
    ) -> Result<Self, CameraError> {
        DistortionKind::from_len(distortion.len())?;
        Ok(Self {
            focal_length,
            optical_center,
            distortion,
            distorted_size,
            undistorted_size,
        })
    }

    pub fn distortion_kind(&self) -> DistortionKind {
        // The length was validated at construction time.
        match self.distortion.len() {
            0 => DistortionKind::None,
            1 => DistortionKind::Fov,
            _ => DistortionKind::RadTan,
        }
    }

    pub fn optical_center_vec(&self) -> Vec2 {
        Vec2::new(self.optical_center[0], self.optical_center[1])
    }

    /// Distorted pixel -> undistorted centered pixel.
    pub fn distorted_to_undistorted_centered(&self, dist_pix: Vec2) -> Vec2 {
        let n = (dist_pix - self.optical_center_vec()) / self.focal_length;
        let nu = undistort_normalized(&self.distortion, n);
        nu * self.focal_length
    }

    /// Undistorted centered pixel -> distorted pixel.
    pub fn undistorted_centered_to_distorted(&self, undist_c: Vec2) -> Vec2 {
        let n = undist_c / self.focal_length;
        let (dx, dy) = distort_normalized(&self.distortion, n.x, n.y);
        Vec2::new(dx, dy) * self.focal_length + self.optical_center_vec()
    }
}

/// Apply the forward distortion model to normalized coordinates.
///
/// Generic over the scalar so the solver can differentiate through it (the
/// autodiff scalar is not `Copy`, hence the clones); the coefficient slice
/// length selects the model (0 / 1 / 4 / 5).
pub fn distort_normalized<T: RealField>(coeffs: &[T], x: T, y: T) -> (T, T) {
    match coeffs.len() {
        0 => (x, y),
        1 => distort_fov(coeffs[0].clone(), x, y),
        4 | 5 => {
            let k3 = if coeffs.len() == 5 {
                coeffs[4].clone()
            } else {
                T::zero()
            };
            distort_radtan(
                coeffs[0].clone(),
                coeffs[1].clone(),
                coeffs[2].clone(),
                coeffs[3].clone(),
                k3,
                x,
                y,
            )
        }
        other => unreachable!("invalid distortion length {other}"),
    }
}

/// Invert the distortion model on normalized coordinates.
pub fn undistort_normalized(coeffs: &[Real], n_dist: Vec2) -> Vec2 {
    match coeffs.len() {
        0 => n_dist,
        1 => undistort_fov(coeffs[0], n_dist),
        4 | 5 => {
            let k3 = if coeffs.len() == 5 { coeffs[4] } else { 0.0 };
            undistort_radtan(coeffs[0], coeffs[1], coeffs[2], coeffs[3], k3, n_dist)
        }
        other => unreachable!("invalid distortion length {other}"),
    }
}

/// FOV (Devernay-Faugeras) fisheye model with a single coefficient `w`.
fn distort_fov<T: RealField>(w: T, x: T, y: T) -> (T, T) {
    let eps = T::from_f64(1e-12).unwrap();
    if w.clone().abs() < eps {
        return (x, y);
    }
    let ru = (x.clone() * x.clone() + y.clone() * y.clone()).sqrt();
    if ru < eps {
        return (x, y);
    }
    let two = T::from_f64(2.0).unwrap();
    let half = T::from_f64(0.5).unwrap();
    let rd = (ru.clone() * two * (w.clone() * half).tan()).atan() / w;
    let s = rd / ru;
    (x * s.clone(), y * s)
}

fn undistort_fov(w: Real, n_dist: Vec2) -> Vec2 {
    if w.abs() < 1e-12 {
        return n_dist;
    }
    let rd = n_dist.norm();
    if rd < 1e-12 {
        return n_dist;
    }
    let ru = (rd * w).tan() / (2.0 * (0.5 * w).tan());
    n_dist * (ru / rd)
}

/// OpenCV radial-tangential distortion, coefficient order `k1 k2 p1 p2 k3`.
fn distort_radtan<T: RealField>(k1: T, k2: T, p1: T, p2: T, k3: T, x: T, y: T) -> (T, T) {
    let r2 = x.clone() * x.clone() + y.clone() * y.clone();
    let r4 = r2.clone() * r2.clone();
    let r6 = r4.clone() * r2.clone();

    let radial = T::one() + k1 * r2.clone() + k2 * r4 + k3 * r6;

    let two = T::one() + T::one();
    let xy = x.clone() * y.clone();
    let x_tan = two.clone() * p1.clone() * xy.clone()
        + p2.clone() * (r2.clone() + two.clone() * x.clone() * x.clone());
    let y_tan = p1 * (r2 + two.clone() * y.clone() * y.clone()) + two * p2 * xy;

    (x * radial.clone() + x_tan, y * radial + y_tan)
}

fn undistort_radtan(k1: Real, k2: Real, p1: Real, p2: Real, k3: Real, n_dist: Vec2) -> Vec2 {
    let mut x = n_dist.x;
    let mut y = n_dist.y;
    for _ in 0..UNDISTORT_ITERS {
        let (xd, yd) = distort_radtan(k1, k2, p1, p2, k3, x, y);
        x -= xd - n_dist.x;
        y -= yd - n_dist.y;
    }
    Vec2::new(x, y)
}
