//! Multi-view triangulation from undistorted, centered pixels.

use nalgebra::DMatrix;

use crate::math::{Iso3, Real, Vec2, Vec3};

/// Sentinel returned when triangulation fails; the caller flags all
/// participating features as outliers.
pub fn bad_triangulation() -> Vec3 {
    Vec3::repeat(Real::INFINITY)
}

/// Returns true if any component of the point is NaN or infinite.
pub fn is_bad_xyz(p: &Vec3) -> bool {
    p.iter().any(|v| !v.is_finite())
}

/// Triangulate `n >= 2` rays given per-ray focal lengths, world-to-camera
/// transforms, and undistorted centered pixels.
///
/// A linear DLT solve over the normalized pinhole matrices
/// `K_i [R_i | t_i]` with `K_i = diag(f_i, f_i, 1)` minimizes the algebraic
/// reprojection residual. When the homogeneous solve is degenerate or the
/// minimum depth along any ray is negative, the sentinel
/// [`bad_triangulation`] is returned.
pub fn triangulate_rays(focals: &[Real], world_to_cam: &[Iso3], pixels: &[Vec2]) -> Vec3 {
    assert!(
        focals.len() == world_to_cam.len() && focals.len() == pixels.len(),
        "all triangulation inputs must have the same length"
    );
    assert!(focals.len() >= 2, "at least two rays must be triangulated");

    let n = focals.len();
    let mut design = DMatrix::<Real>::zeros(2 * n, 4);

    for i in 0..n {
        let f = focals[i];
        let rot = world_to_cam[i].rotation.to_rotation_matrix();
        let r = rot.matrix();
        let t = world_to_cam[i].translation.vector;

        // Rows of P = diag(f, f, 1) [R | t].
        let p0 = [f * r[(0, 0)], f * r[(0, 1)], f * r[(0, 2)], f * t.x];
        let p1 = [f * r[(1, 0)], f * r[(1, 1)], f * r[(1, 2)], f * t.y];
        let p2 = [r[(2, 0)], r[(2, 1)], r[(2, 2)], t.z];

        let (x, y) = (pixels[i].x, pixels[i].y);
        for c in 0..4 {
            design[(2 * i, c)] = x * p2[c] - p0[c];
            design[(2 * i + 1, c)] = y * p2[c] - p1[c];
        }
    }

    let svd = design.svd(false, true);
    let v_t = match svd.v_t {
        Some(v_t) => v_t,
        None => return bad_triangulation(),
    };

    // A well-posed problem has a one-dimensional nullspace. A vanishing
    // second-smallest singular value means the rays do not determine a point.
    let sv = &svd.singular_values;
    if sv[sv.len() - 2] <= 1e-12 * sv[0] {
        return bad_triangulation();
    }

    let h = v_t.row(v_t.nrows() - 1);
    if h[3].abs() <= Real::EPSILON * h.norm() {
        return bad_triangulation();
    }
    let xyz = Vec3::new(h[0] / h[3], h[1] / h[3], h[2] / h[3]);

    // Reject points that end up behind any camera.
    for w2c in world_to_cam {
        let depth = (w2c.rotation * xyz + w2c.translation.vector).z;
        if depth < 0.0 {
            return bad_triangulation();
        }
    }

    xyz
}

/// Triangulate two rays emanating from given undistorted and centered pixels.
pub fn triangulate_pair(
    focal1: Real,
    focal2: Real,
    world_to_cam1: &Iso3,
    world_to_cam2: &Iso3,
    pix1: &Vec2,
    pix2: &Vec2,
) -> Vec3 {
    triangulate_rays(
        &[focal1, focal2],
        &[*world_to_cam1, *world_to_cam2],
        &[*pix1, *pix2],
    )
}
