//! Residual evaluators for the rig cost model.
//!
//! All evaluators are generic over `RealField` so the backend can run them on
//! its autodiff scalar; the same code evaluates plain `f64` residuals for the
//! statistics and the reprojection-error outlier filter. The autodiff scalar
//! is not `Copy`, hence the pervasive clones.

use nalgebra::{DVector, Matrix3, Quaternion, RealField, UnitQuaternion, Vector3};

use rig_core::distort_normalized;

use crate::ir::FactorKind;

fn se3_parts<T: RealField>(v: &DVector<T>) -> (UnitQuaternion<T>, Vector3<T>) {
    debug_assert_eq!(v.len(), 7, "SE3 block must have 7 params");
    let quat = Quaternion::new(v[3].clone(), v[0].clone(), v[1].clone(), v[2].clone());
    let rot = UnitQuaternion::from_quaternion(quat);
    let t = Vector3::new(v[4].clone(), v[5].clone(), v[6].clone());
    (rot, t)
}

fn vec3_const<T: RealField>(v: &[f64; 3]) -> Vector3<T> {
    Vector3::new(
        T::from_f64(v[0]).unwrap(),
        T::from_f64(v[1]).unwrap(),
        T::from_f64(v[2]).unwrap(),
    )
}

/// Interpolated world-to-camera transform for a bracketed acquisition.
///
/// Equal bracket timestamps mark a reference acquisition: the begin pose is
/// used directly and the extrinsic block is ignored. Otherwise the reference
/// pose is interpolated at the acquisition's reference-clock time and the
/// extrinsic is applied. Timestamps are subtracted from each other before the
/// offset enters, to keep precision at large absolute times.
fn interp_world_to_cam<T: RealField>(
    beg: &DVector<T>,
    end: &DVector<T>,
    ref_to_cam: &DVector<T>,
    beg_ref_ts: f64,
    end_ref_ts: f64,
    cam_ts: f64,
    offset: T,
) -> (UnitQuaternion<T>, Vector3<T>) {
    let (beg_q, beg_t) = se3_parts(beg);
    if beg_ref_ts == end_ref_ts {
        return (beg_q, beg_t);
    }

    let (end_q, end_t) = se3_parts(end);
    let (extr_q, extr_t) = se3_parts(ref_to_cam);

    let alpha = (T::from_f64(cam_ts - beg_ref_ts).unwrap() - offset)
        / T::from_f64(end_ref_ts - beg_ref_ts).unwrap();

    let t = beg_t * (T::one() - alpha.clone()) + end_t * alpha.clone();
    let q = beg_q
        .try_slerp(&end_q, alpha, T::default_epsilon())
        .unwrap_or(beg_q);

    let q_wc = extr_q.clone() * q;
    let t_wc = extr_q.transform_vector(&t) + extr_t;
    (q_wc, t_wc)
}

fn depth_to_image_parts<T: RealField>(v: &DVector<T>, affine: bool) -> (Matrix3<T>, Vector3<T>) {
    if affine {
        debug_assert_eq!(v.len(), 12, "affine block must have 12 params");
        let linear = Matrix3::new(
            v[0].clone(),
            v[1].clone(),
            v[2].clone(),
            v[3].clone(),
            v[4].clone(),
            v[5].clone(),
            v[6].clone(),
            v[7].clone(),
            v[8].clone(),
        );
        (linear, Vector3::new(v[9].clone(), v[10].clone(), v[11].clone()))
    } else {
        let (q, t) = se3_parts(v);
        (q.to_rotation_matrix().into_inner(), t)
    }
}

/// Transport a measured depth point to world coordinates:
/// `world_to_cam⁻¹ ∘ depth_to_image ∘ scale`.
fn depth_point_in_world<T: RealField>(
    params: &[DVector<T>],
    depth_xyz: &[f64; 3],
    beg_ref_ts: f64,
    end_ref_ts: f64,
    cam_ts: f64,
    affine_depth: bool,
    offset: T,
) -> Vector3<T> {
    let (q_wc, t_wc) = interp_world_to_cam(
        &params[0],
        &params[1],
        &params[2],
        beg_ref_ts,
        end_ref_ts,
        cam_ts,
        offset,
    );

    let (linear, trans) = depth_to_image_parts(&params[3], affine_depth);
    let scale = params[4][0].clone();

    let m = vec3_const::<T>(depth_xyz);
    let m_cam = linear * m * scale + trans;
    q_wc.inverse_transform_vector(&(m_cam - t_wc))
}

impl FactorKind {
    /// Evaluate the residual for this factor. `params` must follow the
    /// layout documented on the variant (validated by the IR).
    pub fn residuals<T: RealField>(&self, params: &[DVector<T>]) -> DVector<T> {
        match self {
            FactorKind::BracketedReproj {
                dist_pix,
                beg_ref_ts,
                end_ref_ts,
                cam_ts,
                dist_len,
            } => {
                let (q_wc, t_wc) = interp_world_to_cam(
                    &params[0],
                    &params[1],
                    &params[2],
                    *beg_ref_ts,
                    *end_ref_ts,
                    *cam_ts,
                    params[4][0].clone(),
                );

                let x = Vector3::new(
                    params[3][0].clone(),
                    params[3][1].clone(),
                    params[3][2].clone(),
                );
                let pc = q_wc.transform_vector(&x) + t_wc;

                let eps = T::from_f64(1e-12).unwrap();
                let z_safe = if pc.z > eps { pc.z.clone() } else { eps };
                let x_norm = pc.x.clone() / z_safe.clone();
                let y_norm = pc.y.clone() / z_safe;

                let coeffs: Vec<T> = if *dist_len > 0 {
                    params[7].iter().cloned().collect()
                } else {
                    Vec::new()
                };
                let (xd, yd) = distort_normalized(&coeffs, x_norm, y_norm);

                let focal = params[5][0].clone();
                let cx = params[6][0].clone();
                let cy = params[6][1].clone();
                let u = focal.clone() * xd + cx;
                let v = focal * yd + cy;

                nalgebra::dvector![
                    u - T::from_f64(dist_pix[0]).unwrap(),
                    v - T::from_f64(dist_pix[1]).unwrap()
                ]
            }
            FactorKind::BracketedDepthTri {
                weight,
                depth_xyz,
                beg_ref_ts,
                end_ref_ts,
                cam_ts,
                affine_depth,
            } => {
                let m_world = depth_point_in_world(
                    params,
                    depth_xyz,
                    *beg_ref_ts,
                    *end_ref_ts,
                    *cam_ts,
                    *affine_depth,
                    params[6][0].clone(),
                );
                let x = Vector3::new(
                    params[5][0].clone(),
                    params[5][1].clone(),
                    params[5][2].clone(),
                );
                let w = T::from_f64(*weight).unwrap();
                let r = (x - m_world) * w;
                nalgebra::dvector![r.x.clone(), r.y.clone(), r.z.clone()]
            }
            FactorKind::BracketedDepthMesh {
                weight,
                depth_xyz,
                mesh_xyz,
                beg_ref_ts,
                end_ref_ts,
                cam_ts,
                affine_depth,
            } => {
                let m_world = depth_point_in_world(
                    params,
                    depth_xyz,
                    *beg_ref_ts,
                    *end_ref_ts,
                    *cam_ts,
                    *affine_depth,
                    params[5][0].clone(),
                );
                let w = T::from_f64(*weight).unwrap();
                let r = (vec3_const::<T>(mesh_xyz) - m_world) * w;
                nalgebra::dvector![r.x.clone(), r.y.clone(), r.z.clone()]
            }
            FactorKind::XyzAnchor { weight, ref_xyz } => {
                let p = Vector3::new(
                    params[0][0].clone(),
                    params[0][1].clone(),
                    params[0][2].clone(),
                );
                let w = T::from_f64(*weight).unwrap();
                let r = (p - vec3_const::<T>(ref_xyz)) * w;
                nalgebra::dvector![r.x.clone(), r.y.clone(), r.z.clone()]
            }
        }
    }
}
