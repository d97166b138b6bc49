//! Least-squares problem definition.
//!
//! The [`Problem`] trait is the interface between the residual builders in
//! the fit engine and the Levenberg-Marquardt solver. Problems provide
//! residual evaluation; the Jacobian defaults to a forward finite-difference
//! approximation with a scale-adapted step.

use ndarray::{Array1, Array2};

use crate::error::{Result, ZarcError};

/// Default step size for finite differences.
const DEFAULT_EPSILON: f64 = 1e-8;

/// A nonlinear least-squares problem.
pub trait Problem {
    /// Evaluate the residual vector at the given parameters.
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Number of parameters in the problem.
    fn parameter_count(&self) -> usize;

    /// Number of residuals in the problem.
    fn residual_count(&self) -> usize;

    /// Evaluate the Jacobian `J[i,j] = ∂residual[i]/∂param[j]`.
    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>>
    where
        Self: Sized,
    {
        finite_difference_jacobian(self, params, None)
    }

    /// Sum of squared residuals at the given parameters.
    fn eval_cost(&self, params: &Array1<f64>) -> Result<f64> {
        let residuals = self.eval(params)?;
        Ok(residuals.iter().map(|r| r.powi(2)).sum())
    }
}

/// Forward finite-difference Jacobian with a step adapted to each
/// parameter's magnitude.
pub fn finite_difference_jacobian(
    problem: &dyn Problem,
    params: &Array1<f64>,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    let eps = epsilon.unwrap_or(DEFAULT_EPSILON);
    let n_params = params.len();
    let n_residuals = problem.residual_count();

    let residuals = problem.eval(params)?;
    if residuals.len() != n_residuals {
        return Err(ZarcError::DimensionMismatch(format!(
            "expected {} residuals, got {}",
            n_residuals,
            residuals.len()
        )));
    }

    let mut jac = Array2::zeros((n_residuals, n_params));

    for j in 0..n_params {
        let param_j = params[j];
        let eps_j = if param_j.abs() > eps {
            param_j.abs() * eps
        } else {
            eps
        };

        let mut perturbed = params.clone();
        perturbed[j] += eps_j;

        let residuals_perturbed = problem.eval(&perturbed)?;
        for i in 0..n_residuals {
            jac[[i, j]] = (residuals_perturbed[i] - residuals[i]) / eps_j;
        }
    }

    Ok(jac)
}
