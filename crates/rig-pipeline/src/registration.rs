//! Registration of the reference map to world coordinates from user-picked
//! control points.
//!
//! Control points come from a Hugin `.pto` project (`i` lines name images,
//! `c` lines give `nL nR xL yL xR yR`); a companion XYZ file holds one
//! measured world point per control point. All control-point images must be
//! reference-sensor images.

use anyhow::{bail, ensure, Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rig_core::{
    find_similarity_transform, transform_cameras, triangulate_rays, AffineXf, Iso3, Real,
    SensorParams, Vec2, Vec3,
};

/// One control point: left/right image indices and pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct ControlPoint {
    pub left_image: usize,
    pub right_image: usize,
    pub left_pix: Vec2,
    pub right_pix: Vec2,
}

/// Parse images and control points out of a Hugin project file.
pub fn parse_hugin_control_points(path: &Path) -> Result<(Vec<String>, Vec<ControlPoint>)> {
    let file = File::open(path)
        .with_context(|| format!("could not open hugin file: {}", path.display()))?;

    let mut images = Vec::new();
    let mut points = Vec::new();

    for line in BufReader::new(file).lines() {
        let line = line?;

        if let Some(rest) = line.strip_prefix("i ") {
            // The image name is quoted after an n token: i ... n"name"
            let start = rest
                .find("n\"")
                .with_context(|| format!("invalid line in hugin file: {line}"))?;
            let name: String = rest[start + 2..]
                .chars()
                .take_while(|&c| c != '"')
                .collect();
            images.push(name);
        }

        if let Some(rest) = line.strip_prefix("c ") {
            // Out of a line like `c n0 N1 x367 y240 X144.18 Y243.04 t0` keep
            // the six leading numbers: left/right image index, left x/y,
            // right x/y.
            let cleaned: String = rest
                .chars()
                .map(|c| if c.is_ascii_alphabetic() { ' ' } else { c })
                .collect();
            let vals: Vec<Real> = cleaned
                .split_whitespace()
                .map(|tok| tok.parse::<Real>())
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("could not scan control point line: {line}"))?;
            ensure!(
                vals.len() >= 6,
                "could not scan control point line: {line}"
            );
            ensure!(
                vals[0] != vals[1],
                "the left and right images must be distinct; offending line: {line}"
            );
            points.push(ControlPoint {
                left_image: vals[0] as usize,
                right_image: vals[1] as usize,
                left_pix: Vec2::new(vals[2], vals[3]),
                right_pix: Vec2::new(vals[4], vals[5]),
            });
        }
    }

    Ok((images, points))
}

/// Parse a file with one `x y z` triple per line; `#` comments and commas
/// are tolerated.
pub fn parse_xyz(path: &Path) -> Result<Vec<Vec3>> {
    let file = File::open(path)
        .with_context(|| format!("could not open xyz file: {}", path.display()))?;

    let mut points = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?.replace(',', " ");
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let vals: Vec<Real> = trimmed
            .split_whitespace()
            .map(|tok| tok.parse::<Real>())
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("could not scan xyz line: '{trimmed}'"))?;
        ensure!(vals.len() == 3, "could not scan xyz line: '{trimmed}'");
        points.push(Vec3::new(vals[0], vals[1], vals[2]));
    }
    Ok(points)
}

/// Find the transform from the map's abstract coordinate system to the
/// world, given control points and corresponding world measurements, and
/// apply it to the reference poses.
///
/// All control-point images must be reference-sensor acquisitions present in
/// `ref_image_paths` (aligned with `world_to_ref`); images missing from the
/// map are dropped with a warning, and fewer than 3 usable control points is
/// fatal.
pub fn registration_transform(
    hugin_file: &Path,
    xyz_file: &Path,
    ref_params: &SensorParams,
    ref_image_paths: &[String],
    world_to_ref: &mut [Iso3],
) -> Result<AffineXf> {
    ensure!(
        ref_image_paths.len() == world_to_ref.len(),
        "there must be as many reference image names as reference poses"
    );

    let (images, mut control_points) = parse_hugin_control_points(hugin_file)?;
    let user_xyz = parse_xyz(xyz_file)?;
    ensure!(
        control_points.len() == user_xyz.len(),
        "could not parse an equal number of control points and xyz coordinates; \
         their numbers are {} vs {}",
        control_points.len(),
        user_xyz.len()
    );

    let path_to_cid: HashMap<&str, usize> = ref_image_paths
        .iter()
        .enumerate()
        .map(|(cid, path)| (path.as_str(), cid))
        .collect();

    // Map the hugin image indices to map indices, dropping missing images.
    let mut image_to_cid: Vec<Option<usize>> = Vec::with_capacity(images.len());
    for image in &images {
        let cid = path_to_cid.get(image.as_str()).copied();
        if cid.is_none() {
            log::warn!("Will ignore image missing from map: {image}");
        }
        image_to_cid.push(cid);
    }

    let mut user_points = Vec::new();
    let mut kept_xyz = Vec::new();
    for (cp, xyz) in control_points.drain(..).zip(user_xyz) {
        if cp.left_image >= image_to_cid.len() || cp.right_image >= image_to_cid.len() {
            bail!(
                "invalid image indices in the hugin file: {} {}",
                cp.left_image,
                cp.right_image
            );
        }
        if let (Some(left_cid), Some(right_cid)) = (
            image_to_cid[cp.left_image],
            image_to_cid[cp.right_image],
        ) {
            user_points.push((left_cid, right_cid, cp.left_pix, cp.right_pix));
            kept_xyz.push(xyz);
        }
    }

    if user_points.len() < 3 {
        bail!(
            "must have at least 3 points to apply registration, got: {}",
            user_points.len()
        );
    }

    // Triangulate each control point in the map's coordinate system.
    let mut unreg_xyz = Vec::with_capacity(user_points.len());
    for &(left_cid, right_cid, left_pix, right_pix) in &user_points {
        let undist_left = ref_params.distorted_to_undistorted_centered(left_pix);
        let undist_right = ref_params.distorted_to_undistorted_centered(right_pix);
        let xyz = triangulate_rays(
            &[ref_params.focal_length, ref_params.focal_length],
            &[world_to_ref[left_cid], world_to_ref[right_cid]],
            &[undist_left, undist_right],
        );
        unreg_xyz.push(xyz);
    }

    let mean_err = unreg_xyz
        .iter()
        .zip(&kept_xyz)
        .map(|(a, b)| (a - b).norm())
        .sum::<Real>()
        / kept_xyz.len() as Real;
    log::info!("Mean absolute error before registration: {mean_err} meters");

    let transform = find_similarity_transform(&unreg_xyz, &kept_xyz);
    transform_cameras(&transform, world_to_ref);

    let scale = transform.scale();
    let mean_err_after = unreg_xyz
        .iter()
        .zip(&kept_xyz)
        .map(|(a, b)| (transform.apply(a) - b).norm())
        .sum::<Real>()
        / kept_xyz.len() as Real;
    log::info!("Registration transform (to measured world coordinates).");
    log::info!("Rotation:\n{}", transform.linear / scale);
    log::info!("Scale: {scale}");
    log::info!("Translation: {}", transform.translation.transpose());
    log::info!("Mean absolute error after registration: {mean_err_after} meters");

    Ok(transform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hugin_parsing_extracts_images_and_points() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reg.pto");
        std::fs::write(
            &path,
            "# hugin project\n\
             i w1280 h960 f0 n\"nav_cam/10.1.jpg\"\n\
             i w1280 h960 f0 n\"nav_cam/10.9.jpg\"\n\
             c n0 N1 x367 y240 X144.183010710425 Y243.04008545843 t0\n",
        )
        .unwrap();

        let (images, points) = parse_hugin_control_points(&path).unwrap();
        assert_eq!(images, vec!["nav_cam/10.1.jpg", "nav_cam/10.9.jpg"]);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].left_image, 0);
        assert_eq!(points[0].right_image, 1);
        assert_eq!(points[0].left_pix, Vec2::new(367.0, 240.0));
        assert!((points[0].right_pix.x - 144.183010710425).abs() < 1e-12);
    }

    #[test]
    fn identical_control_images_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reg.pto");
        std::fs::write(&path, "c n0 N0 x1 y2 X3 Y4 t0\n").unwrap();
        assert!(parse_hugin_control_points(&path).is_err());
    }

    #[test]
    fn xyz_parsing_skips_comments_and_commas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.xyz");
        std::fs::write(&path, "# measured\n1, 2, 3\n\n4 5 6\n").unwrap();
        let pts = parse_xyz(&path).unwrap();
        assert_eq!(pts, vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)]);
    }
}
