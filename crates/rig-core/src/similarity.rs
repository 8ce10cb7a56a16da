//! Similarity fitting: the rotation + translation + scale best mapping one
//! ordered point set onto another (Kabsch algorithm with a scale estimate).

use nalgebra::Matrix3xX;

use crate::math::{Mat3, Real, Vec3};
use crate::transform::AffineXf;

/// Find the similarity `T(x) = s·R·x + t` minimizing `Σ‖T·in_i − out_i‖²`
/// over two ordered point sets of equal size.
///
/// The scale is estimated first from the ratio of consecutive-point distance
/// sums; when either sum is non-positive (fewer than two distinct points) the
/// identity transform is returned.
pub fn find_similarity_transform(in_pts: &[Vec3], out_pts: &[Vec3]) -> AffineXf {
    assert_eq!(
        in_pts.len(),
        out_pts.len(),
        "similarity fit needs point sets of equal size"
    );

    let mut local_in = Matrix3xX::<Real>::zeros(in_pts.len());
    let mut local_out = Matrix3xX::<Real>::zeros(out_pts.len());
    for (i, (a, b)) in in_pts.iter().zip(out_pts.iter()).enumerate() {
        local_in.set_column(i, a);
        local_out.set_column(i, b);
    }

    // Scale from sums of consecutive distances, then bring the output set to
    // the input scale.
    let mut dist_in = 0.0;
    let mut dist_out = 0.0;
    for col in 0..in_pts.len().saturating_sub(1) {
        dist_in += (local_in.column(col + 1) - local_in.column(col)).norm();
        dist_out += (local_out.column(col + 1) - local_out.column(col)).norm();
    }
    if dist_in <= 0.0 || dist_out <= 0.0 {
        return AffineXf::identity();
    }
    let scale = dist_out / dist_in;
    local_out /= scale;

    // Subtract centroids.
    let n = in_pts.len() as Real;
    let in_ctr: Vec3 = local_in.column_sum() / n;
    let out_ctr: Vec3 = local_out.column_sum() / n;
    for col in 0..in_pts.len() {
        let a = local_in.column(col) - in_ctr;
        let b = local_out.column(col) - out_ctr;
        local_in.set_column(col, &a);
        local_out.set_column(col, &b);
    }

    let cov: Mat3 = &local_in * local_out.transpose();
    let svd = cov.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return AffineXf::identity(),
    };

    let v = v_t.transpose();
    let d = if (v * u.transpose()).determinant() > 0.0 {
        1.0
    } else {
        -1.0
    };
    let mut sign = Mat3::identity();
    sign[(2, 2)] = d;
    let rot = v * sign * u.transpose();

    AffineXf {
        linear: scale * rot,
        translation: scale * (out_ctr - rot * in_ctr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    #[test]
    fn recovers_rotation_scale_translation() {
        // Rotate 90 degrees about z, scale by 2, translate by (5, 0, 0).
        let in_pts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        let rot = Rotation3::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let out_pts: Vec<Vec3> = in_pts
            .iter()
            .map(|p| 2.0 * (rot * p) + Vec3::new(5.0, 0.0, 0.0))
            .collect();

        let t = find_similarity_transform(&in_pts, &out_pts);

        assert_relative_eq!(t.scale(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(t.linear / t.scale(), *rot.matrix(), epsilon = 1e-12);
        assert_relative_eq!(t.translation, Vec3::new(5.0, 0.0, 0.0), epsilon = 1e-10);
        for (a, b) in in_pts.iter().zip(out_pts.iter()) {
            assert!((t.apply(a) - b).norm() < 1e-10);
        }
    }

    #[test]
    fn degenerate_input_returns_identity() {
        let pts = vec![Vec3::new(1.0, 1.0, 1.0); 4];
        let t = find_similarity_transform(&pts, &pts);
        assert_eq!(t, AffineXf::identity());
    }

    #[test]
    fn reflection_is_avoided() {
        // A noisy near-planar set must still produce a proper rotation.
        let in_pts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.001),
        ];
        let t = find_similarity_transform(&in_pts, &in_pts);
        assert_relative_eq!((t.linear / t.scale()).determinant(), 1.0, epsilon = 1e-9);
    }
}
