//! tiny-solver backend: compiles the IR into a tiny-solver problem and runs
//! Levenberg-Marquardt with a sparse Cholesky linear solver.

use anyhow::{anyhow, ensure, Result};
use nalgebra::DVector;
use std::collections::HashMap;
use std::sync::Arc;

use tiny_solver::factors::Factor;
use tiny_solver::loss_functions::{CauchyLoss, HuberLoss, Loss};
use tiny_solver::manifold::se3::SE3Manifold;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::{linear::sparse::LinearSolverType, LevenbergMarquardtOptimizer};

use crate::ir::{FactorKind, ManifoldKind, ProblemIR, ResidualBlock, RobustLoss};

/// Backend solver options.
#[derive(Debug, Clone)]
pub struct BackendSolveOptions {
    /// Maximum number of LM iterations.
    pub max_iters: usize,
    /// Backend verbosity level.
    pub verbosity: usize,
    /// Stop when the relative error decrease falls below this.
    pub parameter_tolerance: f64,
    /// Stop when the absolute error decrease falls below this.
    pub function_tolerance: f64,
}

impl Default for BackendSolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 20,
            verbosity: 0,
            parameter_tolerance: 1e-12,
            function_tolerance: 1e-16,
        }
    }
}

/// Solver output: optimized parameter vectors keyed by block name.
#[derive(Debug, Clone)]
pub struct BackendSolution {
    pub params: HashMap<String, DVector<f64>>,
}

/// One factor wrapping an IR factor kind; tiny-solver differentiates the
/// generic residual automatically.
#[derive(Debug, Clone)]
struct IrFactor {
    kind: FactorKind,
}

impl<T: nalgebra::RealField> Factor<T> for IrFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        self.kind.residuals(params)
    }
}

fn compile_loss(loss: RobustLoss) -> Result<Option<Box<dyn Loss + Send>>> {
    match loss {
        RobustLoss::None => Ok(None),
        RobustLoss::Huber { scale } => {
            ensure!(scale > 0.0, "Huber scale must be positive");
            Ok(Some(Box::new(HuberLoss::new(scale))))
        }
        RobustLoss::Cauchy { scale } => {
            ensure!(scale > 0.0, "Cauchy scale must be positive");
            Ok(Some(Box::new(CauchyLoss::new(scale))))
        }
    }
}

fn compile(ir: &ProblemIR, initial: &HashMap<String, DVector<f64>>) -> Result<Problem> {
    ir.validate()?;

    let mut problem = Problem::new();

    for param in &ir.params {
        let init = initial.get(&param.name).ok_or_else(|| {
            anyhow!(
                "initial values missing parameter {} (id {:?})",
                param.name,
                param.id
            )
        })?;
        ensure!(
            init.len() == param.dim,
            "initial dimension mismatch for {}: expected {}, got {}",
            param.name,
            param.dim,
            init.len()
        );

        match param.manifold {
            ManifoldKind::Euclidean => {}
            ManifoldKind::SE3 => {
                if param.fixed.is_empty() {
                    problem.set_variable_manifold(&param.name, Arc::new(SE3Manifold));
                } else if !param.fixed.is_all_fixed(param.dim) {
                    return Err(anyhow!(
                        "cannot partially fix SE3 block {}; freeze all 7 scalars or none",
                        param.name
                    ));
                }
                // Fully fixed SE3 blocks stay Euclidean; every index is
                // pinned below, so the manifold never matters.
            }
        }

        for idx in param.fixed.iter() {
            problem.fix_variable(&param.name, idx);
        }

        if let Some(bounds) = &param.bounds {
            for bound in bounds {
                problem.set_variable_bounds(&param.name, bound.idx, bound.lower, bound.upper);
            }
        }
    }

    for residual in &ir.residuals {
        let (factor, loss) = compile_residual(residual)?;
        let param_names: Vec<String> = residual
            .params
            .iter()
            .map(|id| ir.params[id.0].name.clone())
            .collect();
        let param_refs: Vec<&str> = param_names.iter().map(|s| s.as_str()).collect();
        problem.add_residual_block(
            residual.factor.residual_dim(),
            &param_refs,
            Box::new(factor),
            loss,
        );
    }

    Ok(problem)
}

fn compile_residual(residual: &ResidualBlock) -> Result<(IrFactor, Option<Box<dyn Loss + Send>>)> {
    let loss = compile_loss(residual.loss)?;
    Ok((
        IrFactor {
            kind: residual.factor.clone(),
        },
        loss,
    ))
}

fn to_optimizer_options(opts: &BackendSolveOptions) -> OptimizerOptions {
    OptimizerOptions {
        max_iteration: opts.max_iters,
        verbosity_level: opts.verbosity,
        linear_solver_type: LinearSolverType::SparseCholesky,
        min_abs_error_decrease_threshold: opts.function_tolerance,
        min_rel_error_decrease_threshold: opts.parameter_tolerance,
        ..OptimizerOptions::default()
    }
}

/// Compile and solve the IR with the provided initial parameters.
pub fn solve_problem(
    ir: &ProblemIR,
    initial: &HashMap<String, DVector<f64>>,
    opts: &BackendSolveOptions,
) -> Result<BackendSolution> {
    let problem = compile(ir, initial)?;
    let optimizer = LevenbergMarquardtOptimizer::default();
    let options = to_optimizer_options(opts);
    let params = optimizer
        .optimize(&problem, initial, Some(options))
        .ok_or_else(|| anyhow!("the solver failed to produce a solution"))?;

    Ok(BackendSolution { params })
}
