//! Legacy binary interest-point match files.
//!
//! A match file holds two equal-length interest point lists:
//! `u64 n1, u64 n2`, then `n1` left records and `n2` right records. Each
//! record is `x y` (f32), `ix iy` (i32), `orientation scale interest` (f32),
//! `polarity` (one byte), `octave scale_lvl` (u32), then a `u64` descriptor
//! length and that many f32 values. All little-endian.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use rig_core::{CamImage, InlierMask, KeypointVec, Track, Vec2};

use crate::matching::MatchPair;

/// An interest point in the legacy storage format.
#[derive(Debug, Clone, PartialEq)]
pub struct InterestPoint {
    /// Subpixel (col, row) location.
    pub x: f32,
    pub y: f32,
    /// Integer location, for viewers that want it.
    pub ix: i32,
    pub iy: i32,
    pub orientation: f32,
    pub scale: f32,
    pub interest: f32,
    pub polarity: bool,
    pub octave: u32,
    pub scale_lvl: u32,
    pub descriptor: Vec<f32>,
}

impl InterestPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            ix: x.round() as i32,
            iy: y.round() as i32,
            orientation: 0.0,
            scale: 1.0,
            interest: 0.0,
            polarity: false,
            octave: 0,
            scale_lvl: 1,
            descriptor: Vec::new(),
        }
    }

    pub fn from_keypoint(pt: Vec2, descriptor: Vec<f32>) -> Self {
        let mut ip = Self::new(pt.x as f32, pt.y as f32);
        ip.descriptor = descriptor;
        ip
    }
}

fn write_ip_record(w: &mut impl Write, p: &InterestPoint) -> Result<()> {
    w.write_all(&p.x.to_le_bytes())?;
    w.write_all(&p.y.to_le_bytes())?;
    w.write_all(&p.ix.to_le_bytes())?;
    w.write_all(&p.iy.to_le_bytes())?;
    w.write_all(&p.orientation.to_le_bytes())?;
    w.write_all(&p.scale.to_le_bytes())?;
    w.write_all(&p.interest.to_le_bytes())?;
    w.write_all(&[p.polarity as u8])?;
    w.write_all(&p.octave.to_le_bytes())?;
    w.write_all(&p.scale_lvl.to_le_bytes())?;
    w.write_all(&(p.descriptor.len() as u64).to_le_bytes())?;
    for d in &p.descriptor {
        w.write_all(&d.to_le_bytes())?;
    }
    Ok(())
}

fn read_f32(r: &mut impl Read) -> Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn read_i32(r: &mut impl Read) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_ip_record(r: &mut impl Read) -> Result<InterestPoint> {
    let x = read_f32(r)?;
    let y = read_f32(r)?;
    let ix = read_i32(r)?;
    let iy = read_i32(r)?;
    let orientation = read_f32(r)?;
    let scale = read_f32(r)?;
    let interest = read_f32(r)?;
    let mut polarity = [0u8; 1];
    r.read_exact(&mut polarity)?;
    let octave = read_u32(r)?;
    let scale_lvl = read_u32(r)?;
    let len = read_u64(r)? as usize;
    let mut descriptor = Vec::with_capacity(len);
    for _ in 0..len {
        descriptor.push(read_f32(r)?);
    }
    Ok(InterestPoint {
        x,
        y,
        ix,
        iy,
        orientation,
        scale,
        interest,
        polarity: polarity[0] != 0,
        octave,
        scale_lvl,
        descriptor,
    })
}

/// Write a match file.
pub fn write_match_file(path: &Path, ip1: &[InterestPoint], ip2: &[InterestPoint]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("cannot open file for writing: {}", path.display()))?;
    let mut w = BufWriter::new(file);
    w.write_all(&(ip1.len() as u64).to_le_bytes())?;
    w.write_all(&(ip2.len() as u64).to_le_bytes())?;
    for p in ip1 {
        write_ip_record(&mut w, p)?;
    }
    for p in ip2 {
        write_ip_record(&mut w, p)?;
    }
    Ok(())
}

/// Read a match file back.
pub fn read_match_file(path: &Path) -> Result<(Vec<InterestPoint>, Vec<InterestPoint>)> {
    let file = File::open(path)
        .with_context(|| format!("cannot open file for reading: {}", path.display()))?;
    let mut r = BufReader::new(file);
    let n1 = read_u64(&mut r)? as usize;
    let n2 = read_u64(&mut r)? as usize;
    let mut ip1 = Vec::with_capacity(n1);
    for _ in 0..n1 {
        ip1.push(read_ip_record(&mut r)?);
    }
    let mut ip2 = Vec::with_capacity(n2);
    for _ in 0..n2 {
        ip2.push(read_ip_record(&mut r)?);
    }
    Ok((ip1, ip2))
}

/// Form the match file name for an image pair.
///
/// Image paths have the form `cam_name/image_stem.ext`; the camera names are
/// kept in the file name so that two cameras with same-named images cannot
/// collide: `<dir>/<left_cam>-<left_stem>__<right_cam>-<right_stem><suffix>.match`.
pub fn match_file_name(
    match_dir: &Path,
    left_image: &str,
    right_image: &str,
    suffix: &str,
) -> Result<PathBuf> {
    let cam_and_stem = |image: &str| -> Result<(String, String)> {
        let path = Path::new(image);
        let cam = path
            .parent()
            .and_then(|p| p.file_stem())
            .and_then(|s| s.to_str())
            .unwrap_or("");
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        if cam.is_empty() || stem.is_empty() {
            anyhow::bail!("the image name must have the form cam_name/image, got: {image}");
        }
        Ok((cam.to_string(), stem.to_string()))
    };

    let (left_cam, left_stem) = cam_and_stem(left_image)?;
    let (right_cam, right_stem) = cam_and_stem(right_image)?;

    Ok(match_dir.join(format!(
        "{left_cam}-{left_stem}__{right_cam}-{right_stem}{suffix}.match"
    )))
}

/// Save the inlier matches of every image pair occurring in the tracks.
///
/// For each pair `(cid1, cid2)` with `cid1 < cid2 < cid1 + num_overlaps + 1`
/// (all pairs when `num_overlaps` is 0), the observations of the tracks that
/// are still inliers in both images are written with the `-inliers` suffix.
pub fn save_inlier_match_pairs(
    cams: &[CamImage],
    num_overlaps: usize,
    tracks: &[Track],
    keypoints: &KeypointVec,
    inliers: &InlierMask,
    out_dir: &Path,
) -> Result<()> {
    let mut matches: BTreeMap<(usize, usize), MatchPair> = BTreeMap::new();

    for (pid, track) in tracks.iter().enumerate() {
        for (&cid1, &fid1) in track {
            for (&cid2, &fid2) in track {
                let in_overlap = num_overlaps == 0 || cid2 < cid1 + num_overlaps + 1;
                if !(cid1 < cid2 && in_overlap) {
                    continue;
                }
                if !inliers.is_inlier(pid, cid1, fid1) || !inliers.is_inlier(pid, cid2, fid2) {
                    continue;
                }
                let entry = matches.entry((cid1, cid2)).or_default();
                let (x1, y1) = keypoints[cid1][fid1];
                let (x2, y2) = keypoints[cid2][fid2];
                entry.left.push(InterestPoint::new(x1, y1));
                entry.right.push(InterestPoint::new(x2, y2));
            }
        }
    }

    let match_dir = out_dir.join("matches");
    std::fs::create_dir_all(&match_dir)?;

    for ((cid1, cid2), pair) in &matches {
        let match_file = match_file_name(
            &match_dir,
            &cams[*cid1].image_path,
            &cams[*cid2].image_path,
            "-inliers",
        )?;
        log::info!(
            "Writing: {} {} {}",
            cams[*cid1].image_path,
            cams[*cid2].image_path,
            match_file.display()
        );
        write_match_file(&match_file, &pair.left, &pair.right)?;
    }
    Ok(())
}
