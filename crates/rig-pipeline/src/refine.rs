//! The optimization driver: assembles residual blocks over all inliers,
//! applies the parameter freezing policy, runs the solver for the configured
//! number of passes, and re-triangulates and flags outliers between passes.
//!
//! The driver owns the sensor descriptors, acquisitions, tracks, landmark
//! array, inlier mask, and parameter state for the duration of a run; the
//! other components borrow them.

use anyhow::{ensure, Context, Result};
use nalgebra::DVector;
use std::collections::{BTreeMap, HashMap};

use rig_core::{
    array_to_rigid, rigid_to_array, AffineXf, CamImage, InlierMask, Iso3, KeypointVec, Real,
    RigSet, SensorParams, Track, Vec2, Vec3, NUM_RIGID_PARAMS,
};
use rig_optim::{
    evaluate_residuals, residual_names, residual_stats, solve_problem, BackendSolveOptions, Bound,
    FactorKind, FixedMask, ManifoldKind, ParamId, ProblemIR, ResidualBlock, RobustLoss,
};

use crate::bracket::BracketedCams;
use crate::config::{RefinerConfig, DEPTH_TO_IMAGE_NAME};
use crate::mesh::{bad_mesh_xyz, mesh_triangulations, MeshCache, RayMeshIntersector};
use crate::outliers::flag_outliers_by_angle_and_reproj;
use crate::poses::calc_world_to_cam_transforms;
use crate::tracks::multi_view_triangulation;

/// Location of each observation's pixel residual in the flat residual
/// vector, populated while residual blocks are created.
#[derive(Debug, Clone, Default)]
pub struct ResidualIndex {
    per_obs: Vec<BTreeMap<usize, BTreeMap<usize, usize>>>,
}

impl ResidualIndex {
    fn new(num_tracks: usize) -> Self {
        Self {
            per_obs: vec![BTreeMap::new(); num_tracks],
        }
    }

    fn insert(&mut self, pid: usize, cid: usize, fid: usize, index: usize) {
        self.per_obs[pid].entry(cid).or_default().insert(fid, index);
    }

    /// Index of the first of the two pixel residual scalars of an
    /// observation. Panics for observations that contributed no residual.
    pub fn pixel_residual(&self, pid: usize, cid: usize, fid: usize) -> usize {
        *self.per_obs[pid]
            .get(&cid)
            .and_then(|m| m.get(&fid))
            .unwrap_or_else(|| panic!("no pixel residual recorded for ({pid}, {cid}, {fid})"))
    }

    #[cfg(test)]
    pub(crate) fn for_test(tracks: &[Track]) -> Self {
        let mut index = Self::new(tracks.len());
        let mut count = 0;
        for (pid, track) in tracks.iter().enumerate() {
            for (&cid, &fid) in track {
                index.insert(pid, cid, fid, count);
                count += 2;
            }
        }
        index
    }
}

/// Incrementally built problem: IR, initial values, and the name cache.
struct ProblemBuilder {
    ir: ProblemIR,
    initial: HashMap<String, DVector<f64>>,
    ids: HashMap<String, ParamId>,
    num_residual_scalars: usize,
}

impl ProblemBuilder {
    fn new() -> Self {
        Self {
            ir: ProblemIR::new(),
            initial: HashMap::new(),
            ids: HashMap::new(),
            num_residual_scalars: 0,
        }
    }

    /// Add a parameter block once; later calls with the same name reuse it.
    fn block(
        &mut self,
        name: String,
        manifold: ManifoldKind,
        fixed: FixedMask,
        bounds: Option<Vec<Bound>>,
        values: &[f64],
    ) -> ParamId {
        if let Some(id) = self.ids.get(&name) {
            return *id;
        }
        let id = self
            .ir
            .add_param_block(name.clone(), values.len(), manifold, fixed, bounds);
        self.initial
            .insert(name.clone(), DVector::from_row_slice(values));
        self.ids.insert(name, id);
        id
    }

    fn residual(&mut self, block: ResidualBlock) {
        self.num_residual_scalars += block.factor.residual_dim();
        self.ir.add_residual_block(block);
    }
}

/// The refiner: all state of one calibration run.
pub struct RigRefiner<'a> {
    cfg: &'a RefinerConfig,
    rig: RigSet,
    cams: Vec<CamImage>,
    keypoints: KeypointVec,
    tracks: Vec<Track>,
    world_to_ref: Vec<Iso3>,
    ref_timestamps: Vec<Real>,
    min_timestamp_offset: Vec<Real>,
    max_timestamp_offset: Vec<Real>,
    mesh: Option<&'a dyn RayMeshIntersector>,

    world_to_cam: Vec<Iso3>,
    xyz: Vec<Vec3>,
    inliers: InlierMask,
    depth_to_image_scales: Vec<Real>,
    orig_ref_params: SensorParams,
}

impl<'a> RigRefiner<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &'a RefinerConfig,
        mut rig: RigSet,
        bracketed: BracketedCams,
        keypoints: KeypointVec,
        tracks: Vec<Track>,
        world_to_ref: Vec<Iso3>,
        ref_timestamps: Vec<Real>,
        mesh: Option<&'a dyn RayMeshIntersector>,
    ) -> Result<Self> {
        cfg.validate(rig.num_sensors(), mesh.is_some())?;
        ensure!(
            world_to_ref.len() == ref_timestamps.len(),
            "must have as many ref cam timestamps as ref cameras"
        );
        ensure!(
            keypoints.len() == bracketed.cams.len(),
            "there must be as many keypoint sets as acquisitions"
        );

        // Separate the depth-to-image scale so it can be locked (or floated)
        // independently of the rotation; it is multiplied back at the end.
        let mut depth_to_image_scales = Vec::with_capacity(rig.num_sensors());
        for sensor in rig.sensors.iter_mut() {
            let scale = sensor.depth_to_image.scale();
            sensor.depth_to_image.linear /= scale;
            depth_to_image_scales.push(scale);
        }

        let orig_ref_params = rig.sensors[rig.ref_sensor_id].params.clone();

        let mut inliers = InlierMask::all_inliers(&tracks);
        crate::outliers::flag_outliers_by_exclusion_dist(
            &rig,
            cfg.num_exclude_boundary_pixels,
            &bracketed.cams,
            &tracks,
            &keypoints,
            &mut inliers,
        );

        let num_tracks = tracks.len();
        Ok(Self {
            cfg,
            rig,
            cams: bracketed.cams,
            keypoints,
            tracks,
            world_to_ref,
            ref_timestamps,
            min_timestamp_offset: bracketed.min_timestamp_offset,
            max_timestamp_offset: bracketed.max_timestamp_offset,
            mesh,
            world_to_cam: bracketed.world_to_cam_init,
            xyz: vec![Vec3::zeros(); num_tracks],
            inliers,
            depth_to_image_scales,
            orig_ref_params,
        })
    }

    /// Run all optimization passes, then reinstate the depth scales and
    /// bring `world_to_cam` up to date.
    pub fn run(&mut self) -> Result<()> {
        for pass in 0..self.cfg.refiner_num_passes {
            log::info!(
                "Optimization pass {} / {}",
                pass + 1,
                self.cfg.refiner_num_passes
            );
            self.run_pass()?;
        }

        // Put back the scale in depth_to_image.
        for (sensor, scale) in self
            .rig
            .sensors
            .iter_mut()
            .zip(&self.depth_to_image_scales)
        {
            sensor.depth_to_image.linear *= *scale;
        }

        self.update_world_to_cam()?;
        Ok(())
    }

    fn run_pass(&mut self) -> Result<()> {
        self.update_world_to_cam()?;

        self.xyz = multi_view_triangulation(
            &self.rig,
            &self.cams,
            &self.world_to_cam,
            &self.tracks,
            &self.keypoints,
            &mut self.inliers,
        );

        let mesh_cache = self.mesh.map(|mesh| {
            mesh_triangulations(
                &self.rig,
                &self.cams,
                &self.world_to_cam,
                &self.tracks,
                &self.keypoints,
                &self.inliers,
                mesh,
                self.cfg.min_ray_dist,
                self.cfg.max_ray_dist,
            )
        });

        let (builder, residual_index) = self.build_problem(mesh_cache.as_ref())?;
        let ProblemBuilder { ir, initial, .. } = builder;
        ir.validate()?;

        let names = residual_names(&ir);
        let before = evaluate_residuals(&ir, &initial)?;
        residual_stats(&before, &names, "before opt");

        let solution = if self.cfg.num_iterations == 0 {
            initial.clone()
        } else {
            let opts = BackendSolveOptions {
                max_iters: self.cfg.num_iterations,
                verbosity: if self.cfg.verbose { 1 } else { 0 },
                parameter_tolerance: self.cfg.parameter_tolerance,
                function_tolerance: 1e-16,
            };
            solve_problem(&ir, &initial, &opts)?.params
        };

        self.copy_back(&solution)?;

        let after = evaluate_residuals(&ir, &solution)?;
        residual_stats(&after, &names, "after opt");

        // Outlier flagging needs up-to-date cameras and residuals.
        self.update_world_to_cam()?;
        flag_outliers_by_angle_and_reproj(
            self.cfg.refiner_min_angle,
            self.cfg.max_reprojection_error,
            &self.tracks,
            &self.world_to_cam,
            &self.xyz,
            &residual_index,
            &after,
            &mut self.inliers,
        );

        Ok(())
    }

    fn update_world_to_cam(&mut self) -> Result<()> {
        if !self.cfg.no_extrinsics {
            self.world_to_cam = calc_world_to_cam_transforms(
                &self.rig,
                &self.cams,
                &self.world_to_ref,
                &self.ref_timestamps,
            )?;
        }
        // Without extrinsics each camera pose varies on its own and is kept
        // current by the copy-back.
        Ok(())
    }

    /// Assemble the residual block set over all inliers and apply the
    /// freezing policy.
    fn build_problem(
        &self,
        mesh_cache: Option<&MeshCache>,
    ) -> Result<(ProblemBuilder, ResidualIndex)> {
        let cfg = self.cfg;
        let rig = &self.rig;
        let mut b = ProblemBuilder::new();
        let mut index = ResidualIndex::new(self.tracks.len());

        let se3_mask = |float: bool| {
            if float {
                FixedMask::all_free()
            } else {
                FixedMask::all_fixed(NUM_RIGID_PARAMS)
            }
        };
        let euclid_mask = |float: bool, dim: usize| {
            if float {
                FixedMask::all_free()
            } else {
                FixedMask::all_fixed(dim)
            }
        };

        let identity = b.block(
            "identity".to_string(),
            ManifoldKind::SE3,
            FixedMask::all_fixed(NUM_RIGID_PARAMS),
            None,
            &rigid_to_array(&Iso3::identity()),
        );

        for (pid, track) in self.tracks.iter().enumerate() {
            let mut xyz_id = None;

            for (&cid, &fid) in track {
                if !self.inliers.is_inlier(pid, cid, fid) {
                    continue;
                }

                let cam = &self.cams[cid];
                let sensor_id = cam.sensor_id;
                let sensor = &rig.sensors[sensor_id];
                let is_ref = rig.is_ref(sensor_id);

                let float_extr = !cfg.no_extrinsics
                    && !is_ref
                    && cfg.extrinsics_to_float.contains(&sensor.name);
                let float_offset =
                    cfg.float_timestamp_offsets && !is_ref && !cfg.no_extrinsics;
                let float_d2i = cfg.extrinsics_to_float.contains(DEPTH_TO_IMAGE_NAME);
                let float_depth_scale = cfg.float_scale && !cfg.affine_depth_to_image;
                let sel = cfg.intrinsics_selection(sensor_id);

                // Bracketing blocks and timestamps. Without extrinsics the
                // camera's own pose stands in for the left bracket and the
                // timestamps collapse, which routes around interpolation.
                let (beg_id, end_id, beg_ts, end_ts, cam_ts);
                if !cfg.no_extrinsics {
                    let beg_index = cam.beg_ref_index;
                    let end_index = cam.end_ref_index;
                    beg_id = b.block(
                        format!("world_to_ref/{beg_index}"),
                        ManifoldKind::SE3,
                        se3_mask(cfg.float_sparse_map),
                        None,
                        &rigid_to_array(&self.world_to_ref[beg_index]),
                    );
                    // The right bracket of a reference acquisition is a
                    // placeholder and stays frozen.
                    end_id = if is_ref {
                        identity
                    } else {
                        b.block(
                            format!("world_to_ref/{end_index}"),
                            ManifoldKind::SE3,
                            se3_mask(cfg.float_sparse_map),
                            None,
                            &rigid_to_array(&self.world_to_ref[end_index]),
                        )
                    };
                    beg_ts = self.ref_timestamps[beg_index];
                    end_ts = self.ref_timestamps[end_index];
                    cam_ts = cam.timestamp;
                } else {
                    let float_pose = if is_ref {
                        cfg.float_sparse_map
                    } else {
                        cfg.float_nonref_cameras
                    };
                    beg_id = b.block(
                        format!("world_to_cam/{cid}"),
                        ManifoldKind::SE3,
                        se3_mask(float_pose),
                        None,
                        &rigid_to_array(&self.world_to_cam[cid]),
                    );
                    end_id = identity;
                    beg_ts = cam.timestamp;
                    end_ts = cam.timestamp;
                    cam_ts = cam.timestamp;
                }

                let extr_id = b.block(
                    format!("ref_to_cam/{sensor_id}"),
                    ManifoldKind::SE3,
                    se3_mask(float_extr),
                    None,
                    &rigid_to_array(&sensor.ref_to_sensor),
                );

                let offset_bounds = if float_offset {
                    Some(vec![Bound {
                        idx: 0,
                        lower: self.min_timestamp_offset[sensor_id],
                        upper: self.max_timestamp_offset[sensor_id],
                    }])
                } else {
                    None
                };
                let offset_id = b.block(
                    format!("offset/{sensor_id}"),
                    ManifoldKind::Euclidean,
                    euclid_mask(float_offset, 1),
                    offset_bounds,
                    &[sensor.timestamp_offset],
                );

                let focal_id = b.block(
                    format!("focal/{sensor_id}"),
                    ManifoldKind::Euclidean,
                    euclid_mask(sel.focal_length, 1),
                    None,
                    &[sensor.params.focal_length],
                );
                let center_id = b.block(
                    format!("optical_center/{sensor_id}"),
                    ManifoldKind::Euclidean,
                    euclid_mask(sel.optical_center, 2),
                    None,
                    &sensor.params.optical_center,
                );
                let dist_len = sensor.params.distortion.len();
                let dist_id = (dist_len > 0).then(|| {
                    b.block(
                        format!("distortion/{sensor_id}"),
                        ManifoldKind::Euclidean,
                        euclid_mask(sel.distortion, dist_len),
                        None,
                        &sensor.params.distortion,
                    )
                });

                let xyz_block = *xyz_id.get_or_insert_with(|| {
                    b.block(
                        format!("xyz/{pid}"),
                        ManifoldKind::Euclidean,
                        FixedMask::all_free(),
                        None,
                        self.xyz[pid].as_slice(),
                    )
                });

                let (kx, ky) = self.keypoints[cid][fid];
                let dist_pix = Vec2::new(kx as Real, ky as Real);

                // Bracketed reprojection residual.
                index.insert(pid, cid, fid, b.num_residual_scalars);
                let mut params = vec![
                    beg_id, end_id, extr_id, xyz_block, offset_id, focal_id, center_id,
                ];
                if let Some(dist_id) = dist_id {
                    params.push(dist_id);
                }
                b.residual(ResidualBlock {
                    params,
                    loss: RobustLoss::Cauchy {
                        scale: cfg.robust_threshold,
                    },
                    factor: FactorKind::BracketedReproj {
                        dist_pix: [dist_pix.x, dist_pix.y],
                        beg_ref_ts: beg_ts,
                        end_ref_ts: end_ts,
                        cam_ts,
                        dist_len,
                    },
                    names: vec![
                        format!("{}_pix_x", sensor.name),
                        format!("{}_pix_y", sensor.name),
                    ],
                });

                // Depth-bearing residuals need a valid measurement at this
                // pixel.
                let depth_xyz = cam.depth_value(dist_pix);
                let depth_blocks = |b: &mut ProblemBuilder| {
                    let d2i_id = if cfg.affine_depth_to_image {
                        b.block(
                            format!("depth_to_image/{sensor_id}"),
                            ManifoldKind::Euclidean,
                            euclid_mask(float_d2i, 12),
                            None,
                            &sensor.depth_to_image.to_array(),
                        )
                    } else {
                        let rigid = Iso3::from_parts(
                            nalgebra::Translation3::from(sensor.depth_to_image.translation),
                            rig_core::Quat::from_rotation_matrix(
                                &nalgebra::Rotation3::from_matrix_unchecked(
                                    sensor.depth_to_image.linear,
                                ),
                            ),
                        );
                        b.block(
                            format!("depth_to_image/{sensor_id}"),
                            ManifoldKind::SE3,
                            se3_mask(float_d2i),
                            None,
                            &rigid_to_array(&rigid),
                        )
                    };
                    let scale_id = b.block(
                        format!("depth_scale/{sensor_id}"),
                        ManifoldKind::Euclidean,
                        euclid_mask(float_depth_scale, 1),
                        None,
                        &[self.depth_to_image_scales[sensor_id]],
                    );
                    (d2i_id, scale_id)
                };

                if cfg.depth_tri_weight > 0.0 {
                    if let Some(m) = depth_xyz {
                        let (d2i_id, scale_id) = depth_blocks(&mut b);
                        b.residual(ResidualBlock {
                            params: vec![
                                beg_id, end_id, extr_id, d2i_id, scale_id, xyz_block, offset_id,
                            ],
                            loss: RobustLoss::Cauchy {
                                scale: cfg.robust_threshold,
                            },
                            factor: FactorKind::BracketedDepthTri {
                                weight: cfg.depth_tri_weight,
                                depth_xyz: [m.x, m.y, m.z],
                                beg_ref_ts: beg_ts,
                                end_ref_ts: end_ts,
                                cam_ts,
                                affine_depth: cfg.affine_depth_to_image,
                            },
                            names: vec![
                                "depth_tri_x_m".to_string(),
                                "depth_tri_y_m".to_string(),
                                "depth_tri_z_m".to_string(),
                            ],
                        });
                    }
                }

                if cfg.depth_mesh_weight > 0.0 {
                    if let (Some(cache), Some(m)) = (mesh_cache, depth_xyz) {
                        let mesh_xyz = cache.obs_xyz(pid, cid, fid);
                        if mesh_xyz != bad_mesh_xyz() {
                            let (d2i_id, scale_id) = depth_blocks(&mut b);
                            b.residual(ResidualBlock {
                                params: vec![
                                    beg_id, end_id, extr_id, d2i_id, scale_id, offset_id,
                                ],
                                loss: RobustLoss::Cauchy {
                                    scale: cfg.robust_threshold,
                                },
                                factor: FactorKind::BracketedDepthMesh {
                                    weight: cfg.depth_mesh_weight,
                                    depth_xyz: [m.x, m.y, m.z],
                                    mesh_xyz: [mesh_xyz.x, mesh_xyz.y, mesh_xyz.z],
                                    beg_ref_ts: beg_ts,
                                    end_ref_ts: end_ts,
                                    cam_ts,
                                    affine_depth: cfg.affine_depth_to_image,
                                },
                                names: vec![
                                    "depth_mesh_x_m".to_string(),
                                    "depth_mesh_y_m".to_string(),
                                    "depth_mesh_z_m".to_string(),
                                ],
                            });
                        }
                    }
                }
            } // end iterating over the observations of this track

            // Anchor the triangulated point to the average mesh intersection.
            if cfg.mesh_tri_weight > 0.0 {
                if let (Some(cache), Some(xyz_block)) = (mesh_cache, xyz_id) {
                    let avg = cache.per_track[pid];
                    if avg != bad_mesh_xyz() {
                        b.residual(ResidualBlock {
                            params: vec![xyz_block],
                            loss: RobustLoss::Cauchy {
                                scale: cfg.robust_threshold,
                            },
                            factor: FactorKind::XyzAnchor {
                                weight: cfg.mesh_tri_weight,
                                ref_xyz: [avg.x, avg.y, avg.z],
                            },
                            names: vec![
                                "mesh_tri_x_m".to_string(),
                                "mesh_tri_y_m".to_string(),
                                "mesh_tri_z_m".to_string(),
                            ],
                        });
                    }
                }
            }
        }

        Ok((b, index))
    }

    /// Copy optimized scalars back into the structured representations.
    fn copy_back(&mut self, solution: &HashMap<String, DVector<f64>>) -> Result<()> {
        let take = |name: &str| solution.get(name).map(|v| v.as_slice().to_vec());

        if !self.cfg.no_extrinsics {
            for (i, pose) in self.world_to_ref.iter_mut().enumerate() {
                if let Some(vals) = take(&format!("world_to_ref/{i}")) {
                    *pose = array_to_rigid(&vals)?;
                }
            }
        } else {
            for cid in 0..self.cams.len() {
                if let Some(vals) = take(&format!("world_to_cam/{cid}")) {
                    self.world_to_cam[cid] = array_to_rigid(&vals)?;
                    // Keep the reference timeline in sync: it is part of the
                    // map that gets written out.
                    if self.rig.is_ref(self.cams[cid].sensor_id) {
                        self.world_to_ref[self.cams[cid].beg_ref_index] = self.world_to_cam[cid];
                    }
                }
            }
        }

        for sensor_id in 0..self.rig.num_sensors() {
            let sensor = &mut self.rig.sensors[sensor_id];
            if let Some(vals) = take(&format!("focal/{sensor_id}")) {
                sensor.params.focal_length = vals[0];
            }
            if let Some(vals) = take(&format!("optical_center/{sensor_id}")) {
                sensor.params.optical_center = [vals[0], vals[1]];
            }
            if let Some(vals) = take(&format!("distortion/{sensor_id}")) {
                sensor.params.distortion = vals;
            }
            if let Some(vals) = take(&format!("ref_to_cam/{sensor_id}")) {
                sensor.ref_to_sensor = array_to_rigid(&vals)?;
            }
            if let Some(vals) = take(&format!("depth_to_image/{sensor_id}")) {
                sensor.depth_to_image = if self.cfg.affine_depth_to_image {
                    AffineXf::from_array(&vals)?
                } else {
                    AffineXf::from_rigid(&array_to_rigid(&vals)?)
                };
            }
            if let Some(vals) = take(&format!("depth_scale/{sensor_id}")) {
                self.depth_to_image_scales[sensor_id] = vals[0];
            }
            if let Some(vals) = take(&format!("offset/{sensor_id}")) {
                sensor.timestamp_offset = vals[0];
            }
        }

        // The solver collapses fx and fy into a single focal length; when
        // the reference intrinsics were not floated (or nothing ran), that
        // conversion must not persist.
        if !self.cfg.intrinsics_selection(self.rig.ref_sensor_id).any()
            || self.cfg.num_iterations == 0
        {
            self.rig.sensors[self.rig.ref_sensor_id].params = self.orig_ref_params.clone();
        }

        for (pid, xyz) in self.xyz.iter_mut().enumerate() {
            if let Some(vals) = take(&format!("xyz/{pid}")) {
                *xyz = Vec3::new(vals[0], vals[1], vals[2]);
            }
        }

        Ok(())
    }

    /// Apply the registration transform found from control points to every
    /// buffer: reference poses, camera poses, landmarks, extrinsic
    /// translations, and the depth-to-image transforms.
    pub fn register(
        &mut self,
        hugin_file: &std::path::Path,
        xyz_file: &std::path::Path,
        ref_image_paths: &[String],
    ) -> Result<AffineXf> {
        let ref_params = self.rig.sensors[self.rig.ref_sensor_id].params.clone();
        let transform = crate::registration::registration_transform(
            hugin_file,
            xyz_file,
            &ref_params,
            ref_image_paths,
            &mut self.world_to_ref,
        )
        .context("registration failed")?;

        let map_scale = transform.scale();
        log::info!("Registration resulted in a scale adjustment of: {map_scale}");

        rig_core::transform_points(&transform, &mut self.xyz);

        // The extrinsics are rigid: only their translations pick up the
        // scale. The depth-to-image transform is affine: both parts scale.
        let mut extrinsics: Vec<Iso3> =
            self.rig.sensors.iter().map(|s| s.ref_to_sensor).collect();
        rig_core::transform_rig(&transform, &mut extrinsics);
        for (sensor, extr) in self.rig.sensors.iter_mut().zip(extrinsics) {
            sensor.ref_to_sensor = extr;
            sensor.depth_to_image.linear *= map_scale;
            sensor.depth_to_image.translation *= map_scale;
        }

        if self.cfg.no_extrinsics {
            rig_core::transform_cameras(&transform, &mut self.world_to_cam);
        } else {
            self.update_world_to_cam()?;
        }

        Ok(transform)
    }

    pub fn rig(&self) -> &RigSet {
        &self.rig
    }

    pub fn cams(&self) -> &[CamImage] {
        &self.cams
    }

    pub fn keypoints(&self) -> &KeypointVec {
        &self.keypoints
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn world_to_cam(&self) -> &[Iso3] {
        &self.world_to_cam
    }

    pub fn world_to_ref(&self) -> &[Iso3] {
        &self.world_to_ref
    }

    pub fn landmarks(&self) -> &[Vec3] {
        &self.xyz
    }

    pub fn inliers(&self) -> &InlierMask {
        &self.inliers
    }
}
