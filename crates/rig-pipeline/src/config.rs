//! Runtime configuration for the refiner.
//!
//! One immutable structure carries every option; it is validated up front so
//! impossible combinations fail before any work happens.

use anyhow::{ensure, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use rig_core::Real;
use rig_features::{FeatureConfig, MatchEngineConfig};

use crate::bracket::BracketConfig;

/// Name under which the depth-to-image transforms can be selected for
/// floating in `extrinsics_to_float`.
pub const DEPTH_TO_IMAGE_NAME: &str = "depth_to_image";

/// Which intrinsics of one sensor to optimize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntrinsicsSelection {
    pub focal_length: bool,
    pub optical_center: bool,
    pub distortion: bool,
}

impl IntrinsicsSelection {
    /// Parse a quoted list like `"focal_length optical_center distortion"`.
    pub fn parse(list: &str) -> Result<Self> {
        let mut sel = Self::default();
        for token in list.split_whitespace() {
            match token {
                "focal_length" => sel.focal_length = true,
                "optical_center" => sel.optical_center = true,
                "distortion" => sel.distortion = true,
                other => anyhow::bail!("unknown intrinsic to float: {other}"),
            }
        }
        Ok(sel)
    }

    pub fn any(&self) -> bool {
        self.focal_length || self.optical_center || self.distortion
    }
}

/// All refiner options. Defaults match the field documentation.
#[derive(Debug, Clone)]
pub struct RefinerConfig {
    /// Feature detection options.
    pub feature: FeatureConfig,
    /// How many images close and forward in time to match each image to.
    pub num_overlaps: usize,
    /// Reprojection threshold when matches are created, before cameras are
    /// optimized. Use a big value if the initial cameras are not trusted.
    pub initial_max_reprojection_error: Real,
    /// Worker pool size for feature detection/matching.
    pub num_match_threads: usize,
    /// Save interest point matches (raw and inliers).
    pub save_matches: bool,
    /// Output directory for matches and calibration results.
    pub out_dir: Option<PathBuf>,
    /// Print verbose information about matching.
    pub verbose: bool,

    /// Maximum gap between consecutive reference frames used for bracketing.
    pub bracket_len: Real,
    /// Do not let timestamp offsets move by more than this.
    pub timestamp_offsets_max_change: Real,
    /// Use a depth cloud only if within this distance in time from its
    /// sensor image.
    pub max_image_to_depth_diff: Real,
    /// Optional per-sensor whitelists of acquisition timestamps.
    pub sensor_timestamps_to_use: BTreeMap<usize, Vec<Real>>,

    /// Cauchy robustifier scale; residuals much larger than this are
    /// exponentially attenuated.
    pub robust_threshold: Real,
    /// Solver iterations per pass.
    pub num_iterations: usize,
    /// Stop when the optimization variables change by less than this.
    pub parameter_tolerance: Real,
    /// Threads for the solver's internal parallelism.
    pub num_opt_threads: usize,
    /// Optimization passes; outliers are removed after every pass.
    pub refiner_num_passes: usize,
    /// Remove interest points whose reprojection error exceeds this after a
    /// pass, in pixels.
    pub max_reprojection_error: Real,
    /// Remove triangulated points whose rays converge at less than this
    /// angle, in degrees.
    pub refiner_min_angle: Real,
    /// Flag reference-sensor pixels this close to the image boundary.
    pub num_exclude_boundary_pixels: u32,

    /// Weight tying depth measurements to triangulated points.
    pub depth_tri_weight: Real,
    /// Weight tying triangulated points to the mesh.
    pub mesh_tri_weight: Real,
    /// Weight tying depth clouds to the mesh.
    pub depth_mesh_weight: Real,
    /// Ray-mesh search range, in meters.
    pub min_ray_dist: Real,
    pub max_ray_dist: Real,

    /// Optimize the depth-cloud scale (not with affine depth-to-image).
    pub float_scale: bool,
    /// Optimize the reference poses.
    pub float_sparse_map: bool,
    /// Optimize the per-sensor timestamp offsets.
    pub float_timestamp_offsets: bool,
    /// Model depth-to-image as an arbitrary affine transform rather than
    /// rotation times scale.
    pub affine_depth_to_image: bool,
    /// Do not model extrinsics; each camera pose varies on its own.
    pub no_extrinsics: bool,
    /// With `no_extrinsics`, float the non-reference camera poses.
    pub float_nonref_cameras: bool,

    /// Per sensor id, which intrinsics to float; missing entries float
    /// nothing.
    pub intrinsics_to_float: Vec<IntrinsicsSelection>,
    /// Sensor names whose extrinsics to float, plus optionally
    /// [`DEPTH_TO_IMAGE_NAME`].
    pub extrinsics_to_float: BTreeSet<String>,

    /// Re-register the map at the end using these control points.
    pub registration: bool,
    pub hugin_file: Option<PathBuf>,
    pub xyz_file: Option<PathBuf>,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            feature: FeatureConfig::default(),
            num_overlaps: 10,
            initial_max_reprojection_error: 300.0,
            num_match_threads: 8,
            save_matches: false,
            out_dir: None,
            verbose: false,
            bracket_len: 0.6,
            timestamp_offsets_max_change: 1.0,
            max_image_to_depth_diff: 0.2,
            sensor_timestamps_to_use: BTreeMap::new(),
            robust_threshold: 3.0,
            num_iterations: 20,
            parameter_tolerance: 1e-12,
            num_opt_threads: 16,
            refiner_num_passes: 2,
            max_reprojection_error: 25.0,
            refiner_min_angle: 0.5,
            num_exclude_boundary_pixels: 0,
            depth_tri_weight: 1000.0,
            mesh_tri_weight: 0.0,
            depth_mesh_weight: 0.0,
            min_ray_dist: 0.0,
            max_ray_dist: 100.0,
            float_scale: false,
            float_sparse_map: false,
            float_timestamp_offsets: false,
            affine_depth_to_image: false,
            no_extrinsics: false,
            float_nonref_cameras: false,
            intrinsics_to_float: Vec::new(),
            extrinsics_to_float: BTreeSet::new(),
            registration: false,
            hugin_file: None,
            xyz_file: None,
        }
    }
}

impl RefinerConfig {
    /// Fail fast on missing inputs and impossible flag combinations.
    pub fn validate(&self, num_sensors: usize, have_mesh: bool) -> Result<()> {
        ensure!(self.robust_threshold > 0.0, "the robust threshold must be positive");
        ensure!(self.bracket_len > 0.0, "bracket length must be positive");
        ensure!(self.num_overlaps >= 1, "number of overlaps must be positive");
        ensure!(
            self.timestamp_offsets_max_change >= 0.0,
            "the timestamp offsets max change must be non-negative"
        );
        ensure!(
            self.refiner_min_angle > 0.0,
            "the min triangulation angle must be positive"
        );
        ensure!(self.depth_tri_weight >= 0.0, "the depth weight must be non-negative");
        ensure!(self.mesh_tri_weight >= 0.0, "the mesh weight must be non-negative");
        ensure!(
            self.depth_mesh_weight >= 0.0,
            "the depth mesh weight must be non-negative"
        );
        ensure!(
            self.intrinsics_to_float.is_empty() || self.intrinsics_to_float.len() == num_sensors,
            "intrinsics_to_float must name every sensor or none"
        );
        ensure!(
            !(self.float_scale && self.affine_depth_to_image),
            "float_scale and affine_depth_to_image should not be used together; \
             with an affine transform the scale is always floated"
        );
        if self.float_scale && !self.affine_depth_to_image {
            ensure!(
                self.extrinsics_to_float.contains(DEPTH_TO_IMAGE_NAME),
                "cannot float the scale of depth_to_image unless {DEPTH_TO_IMAGE_NAME} \
                 is part of extrinsics_to_float"
            );
        }
        ensure!(
            !(self.float_nonref_cameras && !self.no_extrinsics),
            "float_nonref_cameras must be used only with no_extrinsics"
        );
        ensure!(
            !(self.no_extrinsics && self.float_timestamp_offsets),
            "cannot float timestamp offsets with no_extrinsics"
        );
        ensure!(
            !(self.save_matches && self.out_dir.is_none()),
            "cannot save matches if no output directory was provided"
        );
        if self.mesh_tri_weight > 0.0 || self.depth_mesh_weight > 0.0 {
            ensure!(
                have_mesh,
                "mesh weights are set but no mesh was provided"
            );
        }
        if self.registration {
            ensure!(
                self.hugin_file.is_some() && self.xyz_file.is_some(),
                "in order to register the map, the hugin and xyz files must be specified"
            );
        }
        Ok(())
    }

    /// Which intrinsics of sensor `sensor_id` to float.
    pub fn intrinsics_selection(&self, sensor_id: usize) -> IntrinsicsSelection {
        self.intrinsics_to_float
            .get(sensor_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn bracket_config(&self) -> BracketConfig {
        BracketConfig {
            bracket_len: self.bracket_len,
            timestamp_offsets_max_change: self.timestamp_offsets_max_change,
            max_image_to_depth_diff: self.max_image_to_depth_diff,
            sensor_timestamps_to_use: self.sensor_timestamps_to_use.clone(),
        }
    }

    pub fn match_config(&self) -> MatchEngineConfig {
        MatchEngineConfig {
            feature: self.feature.clone(),
            num_overlaps: self.num_overlaps,
            initial_max_reprojection_error: self.initial_max_reprojection_error,
            num_match_threads: self.num_match_threads,
            save_matches: self.save_matches,
            out_dir: self.out_dir.clone(),
            verbose: self.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RefinerConfig::default().validate(2, false).unwrap();
    }

    #[test]
    fn impossible_combinations_fail_fast() {
        let mut cfg = RefinerConfig {
            float_scale: true,
            affine_depth_to_image: true,
            ..Default::default()
        };
        assert!(cfg.validate(2, false).is_err());

        cfg = RefinerConfig {
            float_nonref_cameras: true,
            ..Default::default()
        };
        assert!(cfg.validate(2, false).is_err());

        cfg = RefinerConfig {
            no_extrinsics: true,
            float_timestamp_offsets: true,
            ..Default::default()
        };
        assert!(cfg.validate(2, false).is_err());

        cfg = RefinerConfig {
            mesh_tri_weight: 10.0,
            ..Default::default()
        };
        assert!(cfg.validate(2, false).is_err());
        assert!(cfg.validate(2, true).is_ok());

        cfg = RefinerConfig {
            save_matches: true,
            ..Default::default()
        };
        assert!(cfg.validate(2, false).is_err());
    }

    #[test]
    fn float_scale_requires_depth_to_image_selection() {
        let mut cfg = RefinerConfig {
            float_scale: true,
            ..Default::default()
        };
        assert!(cfg.validate(2, false).is_err());
        cfg.extrinsics_to_float.insert(DEPTH_TO_IMAGE_NAME.into());
        assert!(cfg.validate(2, false).is_ok());
    }

    #[test]
    fn intrinsics_selection_parses_quoted_list() {
        let sel = IntrinsicsSelection::parse("focal_length distortion").unwrap();
        assert!(sel.focal_length && sel.distortion && !sel.optical_center);
        assert!(IntrinsicsSelection::parse("focal").is_err());
        assert!(!IntrinsicsSelection::parse("").unwrap().any());
    }
}
