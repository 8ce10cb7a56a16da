//! Acquisition, depth-cloud, track, and inlier-mask containers.
//!
//! All per-track containers use ordered maps so that iteration order — and
//! with it feature/track id assignment — is deterministic for identical
//! inputs.

use std::collections::BTreeMap;

use image::GrayImage;

use crate::math::{Real, Vec2, Vec3};

/// A depth cloud: a 2-D grid of 3-vectors with `(0, 0, 0)` marking invalid
/// pixels, aligned with a sensor image.
#[derive(Debug, Clone)]
pub struct DepthCloud {
    rows: usize,
    cols: usize,
    data: Vec<[f32; 3]>,
}

impl DepthCloud {
    pub fn new(rows: usize, cols: usize, data: Vec<[f32; 3]>) -> Self {
        assert_eq!(data.len(), rows * cols, "depth grid size mismatch");
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn at(&self, row: usize, col: usize) -> [f32; 3] {
        self.data[row * self.cols + col]
    }

    pub fn data(&self) -> &[[f32; 3]] {
        &self.data
    }

    /// Nearest-neighbor depth lookup at a distorted pixel.
    ///
    /// Returns `None` for invalid `(0, 0, 0)` measurements and for lookups
    /// outside the grid. A rounded coordinate equal to `cols` or `rows` is
    /// "no data", not an error.
    pub fn value_at(&self, dist_pix: Vec2) -> Option<Vec3> {
        let col = dist_pix.x.round();
        let row = dist_pix.y.round();
        if col < 0.0 || row < 0.0 || col > self.cols as Real || row > self.rows as Real {
            return None;
        }
        let (col, row) = (col as usize, row as usize);
        if col == self.cols || row == self.rows {
            return None;
        }
        let v = self.at(row, col);
        if v == [0.0, 0.0, 0.0] {
            return None;
        }
        Some(Vec3::new(v[0] as Real, v[1] as Real, v[2] as Real))
    }
}

/// Depth cloud associated with an acquisition, with its own timestamp.
#[derive(Debug, Clone)]
pub struct DepthRecord {
    pub cloud: DepthCloud,
    pub timestamp: Real,
    pub path: String,
}

/// One camera acquisition: a (sensor, timestamp) image sample together with
/// its bracketing reference-frame indices and optional depth cloud.
#[derive(Debug, Clone)]
pub struct CamImage {
    pub sensor_id: usize,
    /// Wall-clock timestamp on the sensor's own clock.
    pub timestamp: Real,
    /// Timestamp converted to the reference clock:
    /// `timestamp - sensor.timestamp_offset`.
    pub ref_timestamp: Real,
    /// Index of the left bracketing reference frame. Equal to
    /// `end_ref_index` when the acquisition is itself a reference frame.
    pub beg_ref_index: usize,
    /// Index of the right bracketing reference frame.
    pub end_ref_index: usize,
    pub image: GrayImage,
    pub image_path: String,
    pub depth: Option<DepthRecord>,
}

impl CamImage {
    pub fn is_self_bracketed(&self) -> bool {
        self.beg_ref_index == self.end_ref_index
    }

    pub fn depth_value(&self, dist_pix: Vec2) -> Option<Vec3> {
        self.depth.as_ref().and_then(|d| d.cloud.value_at(dist_pix))
    }
}

/// Distorted keypoint coordinates per acquisition; a feature id (`fid`) is an
/// index into the inner list.
pub type KeypointVec = Vec<Vec<(f32, f32)>>;

/// One track: acquisition index (`cid`) to feature index (`fid`). Each `cid`
/// appears at most once.
pub type Track = BTreeMap<usize, usize>;

/// Monotone per-observation inlier marker: once an observation is flagged as
/// outlier it never becomes an inlier again (the only mutation offered is
/// [`InlierMask::set_outlier`]).
#[derive(Debug, Clone)]
pub struct InlierMask {
    entries: Vec<BTreeMap<usize, BTreeMap<usize, bool>>>,
}

impl InlierMask {
    /// Build a mask with every observation of every track an inlier.
    pub fn all_inliers(tracks: &[Track]) -> Self {
        let entries = tracks
            .iter()
            .map(|track| {
                track
                    .iter()
                    .map(|(&cid, &fid)| (cid, BTreeMap::from([(fid, true)])))
                    .collect()
            })
            .collect();
        Self { entries }
    }

    pub fn num_tracks(&self) -> usize {
        self.entries.len()
    }

    pub fn is_inlier(&self, pid: usize, cid: usize, fid: usize) -> bool {
        *self
            .entry(pid, cid, fid)
            .unwrap_or_else(|| panic!("inlier mask has no entry for ({pid}, {cid}, {fid})"))
    }

    pub fn set_outlier(&mut self, pid: usize, cid: usize, fid: usize) {
        let slot = self.entries[pid]
            .get_mut(&cid)
            .and_then(|m| m.get_mut(&fid))
            .unwrap_or_else(|| panic!("inlier mask has no entry for ({pid}, {cid}, {fid})"));
        *slot = false;
    }

    /// Flag every observation of a track as outlier.
    pub fn set_track_outlier(&mut self, pid: usize) {
        for fid_map in self.entries[pid].values_mut() {
            for slot in fid_map.values_mut() {
                *slot = false;
            }
        }
    }

    /// Number of observations of a track still marked inlier.
    pub fn num_inliers(&self, pid: usize) -> usize {
        self.entries[pid]
            .values()
            .flat_map(|m| m.values())
            .filter(|&&v| v)
            .count()
    }

    fn entry(&self, pid: usize, cid: usize, fid: usize) -> Option<&bool> {
        self.entries.get(pid)?.get(&cid)?.get(&fid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_lookup_edges() {
        let mut data = vec![[0.0f32; 3]; 4];
        data[1] = [1.0, 2.0, 3.0]; // row 0, col 1
        let cloud = DepthCloud::new(2, 2, data);

        assert_eq!(
            cloud.value_at(Vec2::new(1.2, 0.1)),
            Some(Vec3::new(1.0, 2.0, 3.0))
        );
        // Invalid (0,0,0) measurement.
        assert_eq!(cloud.value_at(Vec2::new(0.0, 0.0)), None);
        // Rounding up to exactly (cols, rows) is "no data", not fatal.
        assert_eq!(cloud.value_at(Vec2::new(1.6, 1.6)), None);
        // Far out of range is also no data.
        assert_eq!(cloud.value_at(Vec2::new(10.0, 0.0)), None);
        assert_eq!(cloud.value_at(Vec2::new(-3.0, 0.0)), None);
    }

    #[test]
    fn inlier_mask_is_monotone() {
        let track: Track = BTreeMap::from([(0, 5), (2, 7)]);
        let mut mask = InlierMask::all_inliers(&[track]);

        assert!(mask.is_inlier(0, 0, 5));
        assert_eq!(mask.num_inliers(0), 2);

        mask.set_outlier(0, 0, 5);
        assert!(!mask.is_inlier(0, 0, 5));
        assert!(mask.is_inlier(0, 2, 7));
        assert_eq!(mask.num_inliers(0), 1);

        mask.set_track_outlier(0);
        assert_eq!(mask.num_inliers(0), 0);
    }

    #[test]
    #[should_panic(expected = "no entry")]
    fn inlier_mask_rejects_foreign_fid() {
        let track: Track = BTreeMap::from([(0, 5)]);
        let mask = InlierMask::all_inliers(&[track]);
        mask.is_inlier(0, 0, 6);
    }
}
