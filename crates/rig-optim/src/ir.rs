//! Backend-agnostic optimization problem representation.
//!
//! Parameter blocks are named scalar vectors with an optional manifold,
//! per-index fixing, and per-index bounds; residual blocks reference them by
//! id. Backends compile this IR into solver-specific problems.

use anyhow::{ensure, Result};
use std::collections::HashSet;

use rig_core::{NUM_AFFINE_PARAMS, NUM_RIGID_PARAMS};

/// Identifier for a parameter block, stable within one [`ProblemIR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(pub usize);

/// Supported manifold types for parameter blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifoldKind {
    /// Standard Euclidean vector space.
    Euclidean,
    /// SE(3) pose stored as `[qx, qy, qz, qw, tx, ty, tz]`.
    SE3,
}

impl ManifoldKind {
    pub fn compatible_dim(self, dim: usize) -> bool {
        match self {
            ManifoldKind::Euclidean => true,
            ManifoldKind::SE3 => dim == NUM_RIGID_PARAMS,
        }
    }
}

/// Bounds for a single parameter index, applied after each solver update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub idx: usize,
    pub lower: f64,
    pub upper: f64,
}

/// Fixed parameter mask for a block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FixedMask {
    fixed_indices: HashSet<usize>,
}

impl FixedMask {
    pub fn all_free() -> Self {
        Self::default()
    }

    pub fn all_fixed(dim: usize) -> Self {
        Self {
            fixed_indices: (0..dim).collect(),
        }
    }

    pub fn is_fixed(&self, idx: usize) -> bool {
        self.fixed_indices.contains(&idx)
    }

    pub fn is_all_fixed(&self, dim: usize) -> bool {
        self.fixed_indices.len() == dim
    }

    pub fn is_empty(&self) -> bool {
        self.fixed_indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.fixed_indices.iter().copied()
    }
}

/// Robust loss applied to a residual block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RobustLoss {
    #[default]
    None,
    Huber {
        scale: f64,
    },
    Cauchy {
        scale: f64,
    },
}

/// Rig-calibration factor kinds. Each implies its parameter layout and
/// residual dimension; timestamps are stored in the factor, parameters stay
/// free to move.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorKind {
    /// Bracketed reprojection: distorted-pixel measurement minus the
    /// projection of a world point through the time-interpolated pose.
    ///
    /// Parameters: `[beg_world_to_ref (SE3), end_world_to_ref (SE3),
    /// ref_to_cam (SE3), xyz (3), time_offset (1), focal (1),
    /// optical_center (2)]` plus a trailing `distortion (dist_len)` block
    /// when `dist_len > 0`.
    BracketedReproj {
        dist_pix: [f64; 2],
        beg_ref_ts: f64,
        end_ref_ts: f64,
        cam_ts: f64,
        dist_len: usize,
    },
    /// Bracketed depth-triangulation agreement: a measured depth point,
    /// transported depth -> image -> world, minus the triangulated point.
    ///
    /// Parameters: `[beg_world_to_ref (SE3), end_world_to_ref (SE3),
    /// ref_to_cam (SE3), depth_to_image (SE3 or 12-affine),
    /// depth_scale (1), xyz (3), time_offset (1)]`.
    BracketedDepthTri {
        weight: f64,
        depth_xyz: [f64; 3],
        beg_ref_ts: f64,
        end_ref_ts: f64,
        cam_ts: f64,
        affine_depth: bool,
    },
    /// Bracketed depth-mesh agreement: like depth-triangulation but against
    /// a fixed mesh intersection point instead of the free world point.
    ///
    /// Parameters: `[beg_world_to_ref (SE3), end_world_to_ref (SE3),
    /// ref_to_cam (SE3), depth_to_image (SE3 or 12-affine),
    /// depth_scale (1), time_offset (1)]`.
    BracketedDepthMesh {
        weight: f64,
        depth_xyz: [f64; 3],
        mesh_xyz: [f64; 3],
        beg_ref_ts: f64,
        end_ref_ts: f64,
        cam_ts: f64,
        affine_depth: bool,
    },
    /// Anchor a world point to a fixed reference point.
    ///
    /// Parameters: `[xyz (3)]`.
    XyzAnchor { weight: f64, ref_xyz: [f64; 3] },
}

impl FactorKind {
    pub fn residual_dim(&self) -> usize {
        match self {
            FactorKind::BracketedReproj { .. } => 2,
            FactorKind::BracketedDepthTri { .. } => 3,
            FactorKind::BracketedDepthMesh { .. } => 3,
            FactorKind::XyzAnchor { .. } => 3,
        }
    }

    /// The weight baked into the residual; stats divide it back out.
    pub fn scale(&self) -> f64 {
        match self {
            FactorKind::BracketedReproj { .. } => 1.0,
            FactorKind::BracketedDepthTri { weight, .. } => *weight,
            FactorKind::BracketedDepthMesh { weight, .. } => *weight,
            FactorKind::XyzAnchor { weight, .. } => *weight,
        }
    }
}

/// Parameter block definition.
#[derive(Debug, Clone)]
pub struct ParamBlock {
    pub id: ParamId,
    pub name: String,
    pub dim: usize,
    pub manifold: ManifoldKind,
    pub fixed: FixedMask,
    pub bounds: Option<Vec<Bound>>,
}

/// Residual block definition. The order of `params` must match the factor's
/// expected layout; `names` has one entry per residual scalar and feeds the
/// percentile statistics.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    pub params: Vec<ParamId>,
    pub loss: RobustLoss,
    pub factor: FactorKind,
    pub names: Vec<String>,
}

/// Backend-agnostic optimization problem.
#[derive(Debug, Default, Clone)]
pub struct ProblemIR {
    pub params: Vec<ParamBlock>,
    pub residuals: Vec<ResidualBlock>,
}

impl ProblemIR {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_param_block(
        &mut self,
        name: impl Into<String>,
        dim: usize,
        manifold: ManifoldKind,
        fixed: FixedMask,
        bounds: Option<Vec<Bound>>,
    ) -> ParamId {
        let id = ParamId(self.params.len());
        self.params.push(ParamBlock {
            id,
            name: name.into(),
            dim,
            manifold,
            fixed,
            bounds,
        });
        id
    }

    pub fn add_residual_block(&mut self, residual: ResidualBlock) {
        self.residuals.push(residual);
    }

    /// Total number of residual scalars, in block insertion order.
    pub fn num_residuals(&self) -> usize {
        self.residuals
            .iter()
            .map(|r| r.factor.residual_dim())
            .sum()
    }

    fn check_block(&self, id: ParamId, dim: usize, manifold: ManifoldKind) -> Result<()> {
        let block = &self.params[id.0];
        ensure!(
            block.dim == dim && block.manifold == manifold,
            "param block {} has dim {} manifold {:?}, expected dim {} manifold {:?}",
            block.name,
            block.dim,
            block.manifold,
            dim,
            manifold
        );
        Ok(())
    }

    /// Validate internal consistency and factor layouts.
    pub fn validate(&self) -> Result<()> {
        for (idx, param) in self.params.iter().enumerate() {
            ensure!(
                param.id.0 == idx,
                "param id mismatch: expected {}, got {:?}",
                idx,
                param.id
            );
            ensure!(
                param.manifold.compatible_dim(param.dim),
                "param {} manifold {:?} incompatible with dim {}",
                param.name,
                param.manifold,
                param.dim
            );
            for fixed_idx in param.fixed.iter() {
                ensure!(
                    fixed_idx < param.dim,
                    "param {} fixed index {} out of range",
                    param.name,
                    fixed_idx
                );
            }
            if let Some(bounds) = &param.bounds {
                for bound in bounds {
                    ensure!(
                        bound.idx < param.dim,
                        "param {} bound index {} out of range",
                        param.name,
                        bound.idx
                    );
                    ensure!(
                        bound.lower <= bound.upper,
                        "param {} bound lower {} > upper {}",
                        param.name,
                        bound.lower,
                        bound.upper
                    );
                }
            }
        }

        for (r_idx, residual) in self.residuals.iter().enumerate() {
            ensure!(
                residual.names.len() == residual.factor.residual_dim(),
                "residual {} has {} names for {} residual scalars",
                r_idx,
                residual.names.len(),
                residual.factor.residual_dim()
            );
            for param in &residual.params {
                ensure!(
                    param.0 < self.params.len(),
                    "residual {} references missing param {:?}",
                    r_idx,
                    param
                );
            }

            match &residual.factor {
                FactorKind::BracketedReproj { dist_len, .. } => {
                    let expected = if *dist_len > 0 { 8 } else { 7 };
                    ensure!(
                        residual.params.len() == expected,
                        "bracketed reprojection factor requires {} params, got {}",
                        expected,
                        residual.params.len()
                    );
                    for i in 0..3 {
                        self.check_block(residual.params[i], NUM_RIGID_PARAMS, ManifoldKind::SE3)?;
                    }
                    self.check_block(residual.params[3], 3, ManifoldKind::Euclidean)?;
                    self.check_block(residual.params[4], 1, ManifoldKind::Euclidean)?;
                    self.check_block(residual.params[5], 1, ManifoldKind::Euclidean)?;
                    self.check_block(residual.params[6], 2, ManifoldKind::Euclidean)?;
                    if *dist_len > 0 {
                        self.check_block(residual.params[7], *dist_len, ManifoldKind::Euclidean)?;
                    }
                }
                FactorKind::BracketedDepthTri { affine_depth, .. } => {
                    ensure!(
                        residual.params.len() == 7,
                        "bracketed depth factor requires 7 params, got {}",
                        residual.params.len()
                    );
                    for i in 0..3 {
                        self.check_block(residual.params[i], NUM_RIGID_PARAMS, ManifoldKind::SE3)?;
                    }
                    self.check_depth_to_image(residual.params[3], *affine_depth)?;
                    self.check_block(residual.params[4], 1, ManifoldKind::Euclidean)?;
                    self.check_block(residual.params[5], 3, ManifoldKind::Euclidean)?;
                    self.check_block(residual.params[6], 1, ManifoldKind::Euclidean)?;
                }
                FactorKind::BracketedDepthMesh { affine_depth, .. } => {
                    ensure!(
                        residual.params.len() == 6,
                        "bracketed depth-mesh factor requires 6 params, got {}",
                        residual.params.len()
                    );
                    for i in 0..3 {
                        self.check_block(residual.params[i], NUM_RIGID_PARAMS, ManifoldKind::SE3)?;
                    }
                    self.check_depth_to_image(residual.params[3], *affine_depth)?;
                    self.check_block(residual.params[4], 1, ManifoldKind::Euclidean)?;
                    self.check_block(residual.params[5], 1, ManifoldKind::Euclidean)?;
                }
                FactorKind::XyzAnchor { .. } => {
                    ensure!(
                        residual.params.len() == 1,
                        "xyz anchor factor requires 1 param, got {}",
                        residual.params.len()
                    );
                    self.check_block(residual.params[0], 3, ManifoldKind::Euclidean)?;
                }
            }
        }

        Ok(())
    }

    fn check_depth_to_image(&self, id: ParamId, affine: bool) -> Result<()> {
        if affine {
            self.check_block(id, NUM_AFFINE_PARAMS, ManifoldKind::Euclidean)
        } else {
            self.check_block(id, NUM_RIGID_PARAMS, ManifoldKind::SE3)
        }
    }
}
