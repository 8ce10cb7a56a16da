//! Raw residual evaluation and percentile statistics.
//!
//! Residuals are evaluated without the robust loss, in block insertion
//! order, and divided by each block's weight so that the reported values are
//! in natural units (pixels or meters).

use anyhow::{anyhow, Result};
use nalgebra::DVector;
use std::collections::{BTreeMap, HashMap};

use crate::ir::ProblemIR;

/// Evaluate every residual scalar at the given parameter values.
///
/// Returns the flat residual vector; entry `i` corresponds to the `i`-th
/// name returned by [`residual_names`].
pub fn evaluate_residuals(
    ir: &ProblemIR,
    params: &HashMap<String, DVector<f64>>,
) -> Result<Vec<f64>> {
    let mut residuals = Vec::with_capacity(ir.num_residuals());

    for block in &ir.residuals {
        let block_params: Vec<DVector<f64>> = block
            .params
            .iter()
            .map(|id| {
                let name = &ir.params[id.0].name;
                params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| anyhow!("missing parameter values for block {name}"))
            })
            .collect::<Result<_>>()?;

        let r = block.factor.residuals::<f64>(&block_params);
        let scale = block.factor.scale();
        residuals.extend(r.iter().map(|v| v / scale));
    }

    Ok(residuals)
}

/// Flat list of residual names, aligned with [`evaluate_residuals`].
pub fn residual_names(ir: &ProblemIR) -> Vec<String> {
    ir.residuals
        .iter()
        .flat_map(|block| block.names.iter().cloned())
        .collect()
}

/// Log the 25, 50, 75, and 100th percentile of absolute residuals, grouped
/// by residual name.
pub fn residual_stats(residuals: &[f64], names: &[String], tag: &str) {
    assert_eq!(
        residuals.len(),
        names.len(),
        "there must be as many residuals as residual names"
    );

    let mut by_name: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for (r, name) in residuals.iter().zip(names) {
        by_name.entry(name.as_str()).or_default().push(r.abs());
    }

    log::info!("The 25, 50, 75, and 100th percentile residual stats {tag}");
    for (name, mut vals) in by_name {
        vals.sort_by(f64::total_cmp);
        let len = vals.len();
        if len == 0 {
            log::info!("{name}: none (0 residuals)");
            continue;
        }
        let it1 = (0.25 * len as f64) as usize;
        let it2 = (0.50 * len as f64) as usize;
        let it3 = (0.75 * len as f64) as usize;
        log::info!(
            "{name}: {:.5} {:.5} {:.5} {:.5} ({len} residuals)",
            vals[it1],
            vals[it2],
            vals[it3],
            vals[len - 1]
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FactorKind, FixedMask, ManifoldKind, ResidualBlock, RobustLoss};

    #[test]
    fn residuals_are_reported_in_natural_units() {
        let mut ir = ProblemIR::new();
        let xyz = ir.add_param_block(
            "xyz/0",
            3,
            ManifoldKind::Euclidean,
            FixedMask::all_free(),
            None,
        );
        ir.add_residual_block(ResidualBlock {
            params: vec![xyz],
            loss: RobustLoss::None,
            factor: FactorKind::XyzAnchor {
                weight: 1000.0,
                ref_xyz: [0.0, 0.0, 0.0],
            },
            names: vec![
                "depth_tri_x_m".into(),
                "depth_tri_y_m".into(),
                "depth_tri_z_m".into(),
            ],
        });

        let mut params = HashMap::new();
        params.insert(
            "xyz/0".to_string(),
            DVector::from_row_slice(&[0.5, 0.0, -0.25]),
        );

        // The weight of 1000 is divided back out.
        let r = evaluate_residuals(&ir, &params).unwrap();
        assert_eq!(r, vec![0.5, 0.0, -0.25]);
        assert_eq!(residual_names(&ir).len(), 3);
    }
}
