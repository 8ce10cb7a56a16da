//! The NVM landmark-and-pose format.
//!
//! First line `NVM_V3`; then the camera count and one line per camera
//! (`filename focal qw qx qy qz cx cy cz d1 d2`, with `(cx, cy, cz)` the
//! camera center `-Rᵀt`; the distortion values are ignored on read and
//! written as zeros); then the point count and one line per point
//! (`X Y Z r g b n_obs` followed by `n_obs` tuples `cid fid u v`). Keypoints
//! are stored relative to the optical center.

use anyhow::{anyhow, bail, ensure, Context, Result};
use nalgebra::Translation3;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use rig_core::{
    CamImage, InlierMask, Iso3, KeypointVec, Quat, Real, SensorParams, Track, Vec2, Vec3,
};

/// In-memory NVM content.
#[derive(Debug, Clone, Default)]
pub struct NvmData {
    pub filenames: Vec<String>,
    pub focal_lengths: Vec<Real>,
    pub world_to_cam: Vec<Iso3>,
    /// Keypoints per camera, indexed by fid.
    pub keypoints: Vec<Vec<Vec2>>,
    pub tracks: Vec<Track>,
    pub xyz: Vec<Vec3>,
}

struct Tokens<'a> {
    iter: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn next(&mut self) -> Result<&'a str> {
        self.iter.next().ok_or_else(|| anyhow!("unexpected end of NVM file"))
    }

    fn next_f64(&mut self) -> Result<f64> {
        let tok = self.next()?;
        tok.parse()
            .with_context(|| format!("cannot parse NVM number: {tok}"))
    }

    fn next_usize(&mut self) -> Result<usize> {
        let tok = self.next()?;
        tok.parse()
            .with_context(|| format!("cannot parse NVM integer: {tok}"))
    }
}

/// Read an NVM file.
pub fn read_nvm(path: &Path) -> Result<NvmData> {
    let file = File::open(path)
        .with_context(|| format!("cannot open file for reading: {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut header = String::new();
    reader.read_line(&mut header)?;
    if !header.starts_with("NVM_V3") {
        bail!("file doesn't start with NVM_V3 token: {}", path.display());
    }

    let mut body = String::new();
    std::io::Read::read_to_string(&mut reader, &mut body)?;
    let mut tokens = Tokens {
        iter: body.split_whitespace(),
    };

    let num_cams = tokens.next_usize()?;
    ensure!(num_cams >= 1, "NVM file is missing cameras");

    let mut data = NvmData::default();
    for _ in 0..num_cams {
        data.filenames.push(tokens.next()?.to_string());
        data.focal_lengths.push(tokens.next_f64()?);

        let qw = tokens.next_f64()?;
        let qx = tokens.next_f64()?;
        let qy = tokens.next_f64()?;
        let qz = tokens.next_f64()?;
        let center = Vec3::new(tokens.next_f64()?, tokens.next_f64()?, tokens.next_f64()?);
        // Skip the two distortion values.
        tokens.next_f64()?;
        tokens.next_f64()?;

        let rot = Quat::from_quaternion(nalgebra::Quaternion::new(qw, qx, qy, qz));
        // The file stores the camera center c; the translation is -R c.
        let t = -(rot.transform_vector(&center));
        data.world_to_cam
            .push(Iso3::from_parts(Translation3::from(t), rot));
        data.keypoints.push(Vec::new());
    }

    let num_points = tokens.next_usize()?;
    ensure!(num_points >= 1, "the NVM file has no triangulated points");

    for pid in 0..num_points {
        let xyz = Vec3::new(tokens.next_f64()?, tokens.next_f64()?, tokens.next_f64()?);
        // Color, unused.
        for _ in 0..3 {
            tokens.next_f64()?;
        }
        let num_measures = tokens.next_usize()?;
        ensure!(num_measures >= 2, "unable to correctly read PID: {pid}");

        let mut track = Track::new();
        for _ in 0..num_measures {
            let cid = tokens.next_usize()?;
            let fid = tokens.next_usize()?;
            let u = tokens.next_f64()?;
            let v = tokens.next_f64()?;

            ensure!(cid < num_cams, "NVM measurement references camera {cid}");
            track.insert(cid, fid);
            let keypoints = &mut data.keypoints[cid];
            if keypoints.len() <= fid {
                keypoints.resize(fid + 1, Vec2::zeros());
            }
            keypoints[fid] = Vec2::new(u, v);
        }
        data.tracks.push(track);
        data.xyz.push(xyz);
    }

    Ok(data)
}

/// Write an NVM file. A single focal length per camera and no distortion are
/// assumed; only poses, keypoints, and tracks are stored.
pub fn write_nvm(path: &Path, data: &NvmData) -> Result<()> {
    ensure!(
        data.filenames.len() == data.world_to_cam.len()
            && data.filenames.len() == data.keypoints.len()
            && data.filenames.len() == data.focal_lengths.len(),
        "unequal camera counts in NVM data"
    );
    ensure!(
        data.tracks.len() == data.xyz.len(),
        "unequal numbers of tracks and triangulated points"
    );

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    log::info!("Writing: {}", path.display());
    let file = File::create(path)
        .with_context(|| format!("cannot open file for writing: {}", path.display()))?;
    let mut f = BufWriter::new(file);

    writeln!(f, "NVM_V3")?;
    writeln!(f, "{}", data.filenames.len())?;
    for cid in 0..data.filenames.len() {
        let w2c = &data.world_to_cam[cid];
        let q = w2c.rotation.into_inner();
        let center = -(w2c.rotation.inverse_transform_vector(&w2c.translation.vector));
        writeln!(
            f,
            "{} {} {} {} {} {} {} {} {} 0 0",
            data.filenames[cid],
            data.focal_lengths[cid],
            q.w,
            q.i,
            q.j,
            q.k,
            center.x,
            center.y,
            center.z
        )?;
    }

    writeln!(f, "{}", data.tracks.len())?;
    for (track, xyz) in data.tracks.iter().zip(&data.xyz) {
        ensure!(track.len() >= 2, "NVM tracks must have at least 2 measurements");
        write!(f, "{} {} {} 0 0 0 {}", xyz.x, xyz.y, xyz.z, track.len())?;
        for (&cid, &fid) in track {
            let pt = data.keypoints[cid][fid];
            write!(f, " {} {} {} {}", cid, fid, pt.x, pt.y)?;
        }
        writeln!(f)?;
    }
    Ok(())
}

/// Write the current inliers in NVM format.
///
/// Keypoints are shifted to be relative to each sensor's optical center, and
/// feature ids are renumbered per camera to cover only the written
/// observations. Tracks with fewer than two surviving inliers are dropped.
#[allow(clippy::too_many_arguments)]
pub fn write_inlier_nvm(
    path: &Path,
    sensor_params: &[SensorParams],
    cams: &[CamImage],
    world_to_cam: &[Iso3],
    keypoints: &KeypointVec,
    tracks: &[Track],
    inliers: &InlierMask,
    xyz: &[Vec3],
) -> Result<()> {
    ensure!(
        world_to_cam.len() == cams.len(),
        "expecting as many world-to-camera transforms as cameras"
    );
    ensure!(
        keypoints.len() == cams.len(),
        "expecting as many sets of keypoints as cameras"
    );
    ensure!(
        tracks.len() == xyz.len(),
        "expecting as many tracks as triangulated points"
    );

    let mut data = NvmData {
        filenames: cams.iter().map(|c| c.image_path.clone()).collect(),
        focal_lengths: cams
            .iter()
            .map(|c| sensor_params[c.sensor_id].focal_length)
            .collect(),
        world_to_cam: world_to_cam.to_vec(),
        keypoints: vec![Vec::new(); cams.len()],
        tracks: Vec::new(),
        xyz: Vec::new(),
    };

    for (pid, track) in tracks.iter().enumerate() {
        let mut nvm_track = Track::new();
        for (&cid, &fid) in track {
            if !inliers.is_inlier(pid, cid, fid) {
                continue;
            }
            let (x, y) = keypoints[cid][fid];
            let center = sensor_params[cams[cid].sensor_id].optical_center_vec();
            let shifted = Vec2::new(x as Real - center.x, y as Real - center.y);

            nvm_track.insert(cid, data.keypoints[cid].len());
            data.keypoints[cid].push(shifted);
        }

        if nvm_track.len() >= 2 {
            data.tracks.push(nvm_track);
            data.xyz.push(xyz[pid]);
        }
    }

    write_nvm(path, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn sample_data() -> NvmData {
        let pose0 = Iso3::from_parts(
            Translation3::new(0.1, -0.2, 1.0),
            Quat::from_scaled_axis(Vector3::new(0.05, 0.02, -0.1)),
        );
        let pose1 = Iso3::from_parts(
            Translation3::new(-0.4, 0.3, 0.9),
            Quat::from_scaled_axis(Vector3::new(-0.02, 0.07, 0.03)),
        );
        NvmData {
            filenames: vec!["nav_cam/10.0.jpg".into(), "nav_cam/10.5.jpg".into()],
            focal_lengths: vec![600.0, 600.0],
            world_to_cam: vec![pose0, pose1],
            keypoints: vec![
                vec![Vec2::new(10.5, -3.25), Vec2::new(0.0, 7.75)],
                vec![Vec2::new(-100.125, 55.5)],
            ],
            tracks: vec![Track::from([(0, 0), (1, 0)]), Track::from([(0, 1), (1, 0)])],
            xyz: vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(-0.5, 0.25, 4.0)],
        }
    }

    #[test]
    fn roundtrip_preserves_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.nvm");

        let data = sample_data();
        write_nvm(&path, &data).unwrap();
        let back = read_nvm(&path).unwrap();

        assert_eq!(back.filenames, data.filenames);
        assert_eq!(back.tracks, data.tracks);
        for (a, b) in data.xyz.iter().zip(&back.xyz) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
        // Pose quaternions may differ only by sign.
        for (a, b) in data.world_to_cam.iter().zip(&back.world_to_cam) {
            assert_relative_eq!(a.to_matrix(), b.to_matrix(), epsilon = 1e-9);
        }
        // Keypoint pixels are preserved exactly.
        assert_eq!(back.keypoints, data.keypoints);
    }

    #[test]
    fn missing_header_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.nvm");
        std::fs::write(&path, "NOT_NVM\n1\n").unwrap();
        assert!(read_nvm(&path).is_err());
    }
}
