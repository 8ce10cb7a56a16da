//! The image-list manifest: one acquisition per non-comment line,
//! `image_path sensor_id timestamp depth_path world_to_cam(12 floats)`.

use anyhow::{bail, ensure, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use rig_core::{AffineXf, CamImage, Iso3, Real};

/// Sentinel depth path marking an acquisition without a depth cloud.
pub const NO_DEPTH_FILE: &str = "none";

/// One parsed manifest row.
#[derive(Debug, Clone)]
pub struct ImageListRow {
    pub image_path: String,
    pub sensor_id: usize,
    pub timestamp: Real,
    /// `None` when the depth column holds the sentinel.
    pub depth_path: Option<String>,
    pub world_to_cam: AffineXf,
}

/// Recover the timestamp encoded in an image basename.
///
/// Image basenames must begin with a decimal digit; the leading numeric part
/// of the stem is the timestamp.
pub fn timestamp_from_filename(image_path: &str) -> Result<Real> {
    let stem = Path::new(image_path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    ensure!(
        stem.starts_with(|c: char| c.is_ascii_digit()),
        "image name (without directory) must start with digits, got: {stem}"
    );
    let numeric: String = stem
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let numeric = numeric.trim_end_matches('.');
    numeric
        .parse()
        .with_context(|| format!("cannot parse a timestamp out of image name: {stem}"))
}

/// Read an image-list manifest.
pub fn read_image_list(path: &Path) -> Result<Vec<ImageListRow>> {
    let file = File::open(path)
        .with_context(|| format!("cannot open file for reading: {}", path.display()))?;

    let mut rows = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.len() != 4 + 12 {
            bail!(
                "expecting image, sensor id, timestamp, depth, and 12 transform values on line {} of {}",
                line_no + 1,
                path.display()
            );
        }

        let image_path = tokens[0].to_string();
        let sensor_id: isize = tokens[1]
            .parse()
            .with_context(|| format!("cannot parse the sensor id on line {}", line_no + 1))?;
        ensure!(sensor_id >= 0, "the sensor id must be non-negative");
        let timestamp: Real = tokens[2]
            .parse()
            .with_context(|| format!("cannot parse the timestamp on line {}", line_no + 1))?;
        let depth_path = if tokens[3] == NO_DEPTH_FILE {
            None
        } else {
            Some(tokens[3].to_string())
        };

        let mut vals = [0.0; 12];
        for (slot, tok) in vals.iter_mut().zip(&tokens[4..]) {
            *slot = tok
                .parse()
                .with_context(|| format!("cannot parse transform value on line {}", line_no + 1))?;
        }

        // The basename doubles as a timestamp; enforce the convention here
        // so bracketing can rely on it.
        timestamp_from_filename(&image_path)?;

        rows.push(ImageListRow {
            image_path,
            sensor_id: sensor_id as usize,
            timestamp,
            depth_path,
            world_to_cam: AffineXf::from_array(&vals)?,
        });
    }
    Ok(rows)
}

fn affine_to_str(t: &AffineXf) -> String {
    t.to_array()
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write the image-list manifest for a set of acquisitions.
pub fn write_image_list(path: &Path, cams: &[CamImage], world_to_cam: &[Iso3]) -> Result<()> {
    ensure!(
        cams.len() == world_to_cam.len(),
        "there must be as many camera poses as acquisitions"
    );
    let file = File::create(path)
        .with_context(|| format!("cannot open file for writing: {}", path.display()))?;
    let mut w = BufWriter::new(file);

    writeln!(w, "# image_file sensor_id timestamp depth_file world_to_image")?;
    for (cam, w2c) in cams.iter().zip(world_to_cam) {
        let depth_path = cam
            .depth
            .as_ref()
            .map(|d| d.path.as_str())
            .unwrap_or(NO_DEPTH_FILE);
        writeln!(
            w,
            "{} {} {} {} {}",
            cam.image_path,
            cam.sensor_id,
            cam.timestamp,
            depth_path,
            affine_to_str(&AffineXf::from_rigid(w2c))
        )?;
    }
    Ok(())
}
