//! Non-linear least-squares cost model for rig calibration.
//!
//! The problem is described as a backend-agnostic IR — named parameter
//! blocks plus residual blocks referencing them — and compiled onto the
//! tiny-solver Levenberg-Marquardt backend. Residual evaluators are generic
//! over the scalar type so the backend differentiates them automatically.

/// tiny-solver backend adapter.
pub mod backend;
/// Residual evaluators, generic over the scalar for autodiff.
pub mod factors;
/// Problem intermediate representation.
pub mod ir;
/// Raw residual evaluation and percentile statistics.
pub mod residuals;

pub use backend::{solve_problem, BackendSolution, BackendSolveOptions};
pub use ir::{
    Bound, FactorKind, FixedMask, ManifoldKind, ParamBlock, ParamId, ProblemIR, ResidualBlock,
    RobustLoss,
};
pub use residuals::{evaluate_residuals, residual_names, residual_stats};
