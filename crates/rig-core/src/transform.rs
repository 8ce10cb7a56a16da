//! Rigid and affine transform codecs, and bracketed pose interpolation.
//!
//! Rigid transforms are serialized to 7 scalars `[qx, qy, qz, qw, tx, ty, tz]`
//! (the layout the solver's SE(3) manifold expects), affine transforms to 12
//! scalars (row-major 3×3 linear part followed by the translation).

use nalgebra::{Quaternion, Rotation3, Translation3};
use thiserror::Error;

use crate::math::{Iso3, Mat3, Quat, Real, Vec3};

/// Number of scalars in a serialized rigid transform.
pub const NUM_RIGID_PARAMS: usize = 7;
/// Number of scalars in a serialized affine transform.
pub const NUM_AFFINE_PARAMS: usize = 12;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("interpolation parameter {0} out of [0, 1]; acquisition not bracketed by its reference frames")]
    AlphaOutOfBounds(Real),
    #[error("expected {expected} scalars for a serialized transform, got {got}")]
    BadLength { expected: usize, got: usize },
}

/// General affine 3D transform: an arbitrary linear part plus a translation.
///
/// Used for the depth-to-image transforms (rigid-with-scale or fully affine)
/// and for the registration similarity. Rig poses stay rigid ([`Iso3`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineXf {
    pub linear: Mat3,
    pub translation: Vec3,
}

impl AffineXf {
    pub fn identity() -> Self {
        Self {
            linear: Mat3::identity(),
            translation: Vec3::zeros(),
        }
    }

    /// The all-zero transform, used as the "no initial rig known" sentinel in
    /// rig configuration files.
    pub fn zero() -> Self {
        Self {
            linear: Mat3::zeros(),
            translation: Vec3::zeros(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.linear == Mat3::zeros() && self.translation == Vec3::zeros()
    }

    pub fn from_rigid(t: &Iso3) -> Self {
        Self {
            linear: *t.rotation.to_rotation_matrix().matrix(),
            translation: t.translation.vector,
        }
    }

    pub fn apply(&self, p: &Vec3) -> Vec3 {
        self.linear * p + self.translation
    }

    /// Scale factor of a similarity transform: the cube root of the linear
    /// part's determinant.
    pub fn scale(&self) -> Real {
        self.linear.determinant().cbrt()
    }

    /// Serialize to 12 scalars: row-major linear part, then translation.
    pub fn to_array(&self) -> [Real; NUM_AFFINE_PARAMS] {
        let l = &self.linear;
        let t = &self.translation;
        [
            l[(0, 0)],
            l[(0, 1)],
            l[(0, 2)],
            l[(1, 0)],
            l[(1, 1)],
            l[(1, 2)],
            l[(2, 0)],
            l[(2, 1)],
            l[(2, 2)],
            t.x,
            t.y,
            t.z,
        ]
    }

    pub fn from_array(v: &[Real]) -> Result<Self, TransformError> {
        if v.len() != NUM_AFFINE_PARAMS {
            return Err(TransformError::BadLength {
                expected: NUM_AFFINE_PARAMS,
                got: v.len(),
            });
        }
        Ok(Self {
            linear: Mat3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]),
            translation: Vec3::new(v[9], v[10], v[11]),
        })
    }
}

impl Default for AffineXf {
    fn default() -> Self {
        Self::identity()
    }
}

/// Serialize a rigid transform to `[qx, qy, qz, qw, tx, ty, tz]`.
pub fn rigid_to_array(t: &Iso3) -> [Real; NUM_RIGID_PARAMS] {
    let q = t.rotation.into_inner();
    let tr = t.translation.vector;
    [
        q.coords[0], q.coords[1], q.coords[2], q.coords[3], tr.x, tr.y, tr.z,
    ]
}

/// Deserialize a rigid transform from `[qx, qy, qz, qw, tx, ty, tz]`.
///
/// The quaternion is normalized on the way in, so the round trip is exact for
/// unit-quaternion input.
pub fn array_to_rigid(v: &[Real]) -> Result<Iso3, TransformError> {
    if v.len() != NUM_RIGID_PARAMS {
        return Err(TransformError::BadLength {
            expected: NUM_RIGID_PARAMS,
            got: v.len(),
        });
    }
    let quat = Quaternion::new(v[3], v[0], v[1], v[2]);
    let rot = Quat::from_quaternion(quat);
    Ok(Iso3::from_parts(
        Translation3::new(v[4], v[5], v[6]),
        rot,
    ))
}

/// Linearly interpolate between two rigid transforms.
///
/// Translations interpolate componentwise, rotations by unit-quaternion
/// slerp. `alpha = 0` returns `beg` verbatim and `alpha = 1` returns `end`.
pub fn interp_rigid(alpha: Real, beg: &Iso3, end: &Iso3) -> Iso3 {
    if alpha == 0.0 {
        return *beg;
    }
    if alpha == 1.0 {
        return *end;
    }
    let t = beg.translation.vector * (1.0 - alpha) + end.translation.vector * alpha;
    let q = beg
        .rotation
        .try_slerp(&end.rotation, alpha, 1e-12)
        .unwrap_or(beg.rotation);
    Iso3::from_parts(Translation3::from(t), q)
}

/// Interpolated world-to-camera transform for a bracketed acquisition.
///
/// When `beg_ref_ts == end_ref_ts` the acquisition *is* a reference frame:
/// `beg_world_to_ref` is returned directly and `ref_to_cam` is ignored (it is
/// the identity for the reference sensor).
///
/// The subtraction order in the interpolation parameter is load-bearing:
/// timestamps are large absolute values, so the two timestamps must be
/// subtracted from each other before the offset is applied.
pub fn calc_world_to_cam(
    beg_world_to_ref: &Iso3,
    end_world_to_ref: &Iso3,
    ref_to_cam: &Iso3,
    beg_ref_ts: Real,
    end_ref_ts: Real,
    ref_to_cam_offset: Real,
    cam_ts: Real,
) -> Result<Iso3, TransformError> {
    if beg_ref_ts == end_ref_ts {
        return Ok(*beg_world_to_ref);
    }

    let alpha = ((cam_ts - beg_ref_ts) - ref_to_cam_offset) / (end_ref_ts - beg_ref_ts);
    if !(0.0..=1.0).contains(&alpha) {
        return Err(TransformError::AlphaOutOfBounds(alpha));
    }

    let interp = interp_rigid(alpha, beg_world_to_ref, end_world_to_ref);
    Ok(ref_to_cam * interp)
}

/// Apply a similarity transform `T(x) = s·R·x + t` to a set of
/// world-to-camera transforms.
///
/// Each camera keeps a rigid pose: the new linear part is
/// `L_old · (T.linear / s)⁻¹` and the new translation
/// `s·t_old − L_new·t_T`, with `s = det(T.linear)^(1/3)`.
pub fn transform_cameras(t: &AffineXf, world_to_cam: &mut [Iso3]) {
    let scale = t.scale();
    // The linear part of a similarity is scale times a rotation, so the
    // inverse of the de-scaled part is its transpose.
    let rot_inv = (t.linear / scale).transpose();

    for w2c in world_to_cam.iter_mut() {
        let new_linear = w2c.rotation.to_rotation_matrix().matrix() * rot_inv;
        let new_rot = Quat::from_rotation_matrix(&Rotation3::from_matrix_unchecked(new_linear));
        let new_trans = scale * w2c.translation.vector - new_linear * t.translation;
        *w2c = Iso3::from_parts(Translation3::from(new_trans), new_rot);
    }
}

/// Apply a transform to a set of points.
pub fn transform_points(t: &AffineXf, xyz: &mut [Vec3]) {
    for p in xyz.iter_mut() {
        *p = t.apply(p);
    }
}

/// Apply a registration transform to the rig extrinsics.
///
/// Only the scale matters here, as the extrinsics relate coordinate systems
/// of sensors on the same rig.
pub fn transform_rig(t: &AffineXf, ref_to_cam: &mut [Iso3]) {
    let scale = t.scale();
    for r2c in ref_to_cam.iter_mut() {
        r2c.translation.vector *= scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Pt3;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn sample_pose() -> Iso3 {
        let rot = Quat::from_scaled_axis(Vector3::new(0.1, -0.2, 0.3));
        Iso3::from_parts(Translation3::new(1.0, -2.0, 0.5), rot)
    }

    #[test]
    fn rigid_array_roundtrip_is_identity() {
        let pose = sample_pose();
        let arr = rigid_to_array(&pose);
        let back = array_to_rigid(&arr).unwrap();
        assert_relative_eq!(pose.to_matrix(), back.to_matrix(), epsilon = 1e-14);
    }

    #[test]
    fn affine_array_roundtrip() {
        let t = AffineXf {
            linear: Mat3::new(1.0, 0.2, 0.0, -0.1, 2.0, 0.3, 0.0, 0.1, 0.5),
            translation: Vec3::new(4.0, 5.0, 6.0),
        };
        let back = AffineXf::from_array(&t.to_array()).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn bad_transform_length_is_rejected() {
        assert!(array_to_rigid(&[0.0; 6]).is_err());
        assert!(AffineXf::from_array(&[0.0; 11]).is_err());
    }

    #[test]
    fn interp_endpoints_are_verbatim() {
        let beg = sample_pose();
        let end = Iso3::from_parts(
            Translation3::new(-1.0, 0.0, 2.0),
            Quat::from_scaled_axis(Vector3::new(-0.3, 0.1, 0.0)),
        );
        assert_eq!(interp_rigid(0.0, &beg, &end), beg);
        assert_eq!(interp_rigid(1.0, &beg, &end), end);
    }

    #[test]
    fn interp_midpoint_translation_is_average() {
        let beg = Iso3::translation(0.0, 0.0, 0.0);
        let end = Iso3::translation(2.0, 4.0, -6.0);
        let mid = interp_rigid(0.5, &beg, &end);
        assert_relative_eq!(
            mid.translation.vector,
            Vec3::new(1.0, 2.0, -3.0),
            epsilon = 1e-14
        );
    }

    #[test]
    fn world_to_cam_rejects_out_of_bracket_times() {
        let pose = sample_pose();
        let err = calc_world_to_cam(&pose, &pose, &Iso3::identity(), 10.0, 11.0, 0.0, 12.5);
        assert!(matches!(err, Err(TransformError::AlphaOutOfBounds(_))));
    }

    #[test]
    fn reference_acquisition_uses_begin_pose_directly() {
        let beg = sample_pose();
        let extr = Iso3::translation(0.5, 0.0, 0.0);
        // Equal bracket timestamps mark a reference acquisition; the
        // extrinsic must not be applied.
        let got = calc_world_to_cam(&beg, &beg, &extr, 10.0, 10.0, 0.0, 10.0).unwrap();
        assert_eq!(got, beg);
    }

    #[test]
    fn transform_cameras_is_consistent_with_transform_points() {
        // A camera observing a point keeps observing the transformed point at
        // the same (scaled) camera coordinates.
        let similarity = AffineXf {
            linear: 2.0 * *Rotation3::from_euler_angles(0.2, -0.1, 0.4).matrix(),
            translation: Vec3::new(1.0, 2.0, 3.0),
        };
        let mut cams = vec![sample_pose()];
        let mut pts = vec![Vec3::new(0.3, -0.4, 2.0)];

        let before = cams[0] * Pt3::from(pts[0]);
        transform_cameras(&similarity, &mut cams);
        transform_points(&similarity, &mut pts);
        let after = cams[0] * Pt3::from(pts[0]);

        assert_relative_eq!(after.coords, 2.0 * before.coords, epsilon = 1e-10);
    }
}
