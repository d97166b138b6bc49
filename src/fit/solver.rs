//! Levenberg-Marquardt solver.
//!
//! Damped normal-equations LM: solve `(JᵀJ + λI) δ = -Jᵀr`, accept steps
//! that reduce the cost, adapt λ otherwise. The linear system goes through
//! Cholesky with a QR fallback for ill-conditioned iterates. A cancel token
//! is polled once per iteration; cancellation and budget exhaustion both
//! surface as unsuccessful results carrying the last iterate.

use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::{Array1, Array2};

use crate::error::{Result, ZarcError};
use crate::fit::problem::Problem;

/// Convergence and damping settings.
#[derive(Debug, Clone)]
pub struct LmConfig {
    /// Maximum number of accepted iterations. Default: 100
    pub max_iterations: usize,

    /// Tolerance for relative change in cost. Default: 1e-8
    pub ftol: f64,

    /// Tolerance for change in parameter values. Default: 1e-8
    pub xtol: f64,

    /// Tolerance for gradient norm. Default: 1e-8
    pub gtol: f64,

    /// Initial value for the damping parameter. Default: 1e-3
    pub initial_lambda: f64,

    /// Factor by which to increase lambda on a rejected step. Default: 10.0
    pub lambda_up_factor: f64,

    /// Factor by which to decrease lambda on an accepted step. Default: 0.1
    pub lambda_down_factor: f64,

    /// Minimum value for lambda. Default: 1e-10
    pub min_lambda: f64,

    /// Maximum value for lambda. Default: 1e10
    pub max_lambda: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            initial_lambda: 1e-3,
            lambda_up_factor: 10.0,
            lambda_down_factor: 0.1,
            min_lambda: 1e-10,
            max_lambda: 1e10,
        }
    }
}

/// Result of a solver run. `success = false` covers budget exhaustion,
/// damping saturation and cancellation; `params` is always the best
/// iterate seen.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Parameter values at the last accepted iterate
    pub params: Array1<f64>,

    /// Residuals at the last accepted iterate
    pub residuals: Array1<f64>,

    /// Sum of squared residuals
    pub cost: f64,

    /// Number of accepted iterations
    pub iterations: usize,

    /// Number of residual evaluations
    pub func_evals: usize,

    /// Whether the optimization converged
    pub success: bool,

    /// A message describing the outcome
    pub message: String,
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: LmConfig,
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.config.ftol = ftol;
        self
    }

    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.config.xtol = xtol;
        self
    }

    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.config.gtol = gtol;
        self
    }

    /// Minimize the sum of squared residuals for the given problem.
    pub fn minimize<P: Problem>(&self, problem: &P, initial_params: Array1<f64>) -> Result<LmResult> {
        let never = AtomicBool::new(false);
        self.minimize_with_cancel(problem, initial_params, &never)
    }

    /// Minimize with a cooperative cancel token, polled between iterations.
    pub fn minimize_with_cancel<P: Problem>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
        cancel: &AtomicBool,
    ) -> Result<LmResult> {
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params {
            return Err(ZarcError::DimensionMismatch(format!(
                "expected {} parameters, got {}",
                n_params,
                initial_params.len()
            )));
        }

        let mut params = initial_params;
        let mut lambda = self.config.initial_lambda;

        let mut residuals = problem.eval(&params)?;
        let mut func_evals = 1;
        let mut cost: f64 = residuals.iter().map(|r| r.powi(2)).sum();

        if !cost.is_finite() {
            return Ok(self.unsuccessful(
                params,
                residuals,
                cost,
                0,
                func_evals,
                "Initial residuals are not finite".to_string(),
            ));
        }

        let mut iterations = 0;

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(self.unsuccessful(
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    "Cancelled by request".to_string(),
                ));
            }

            let jacobian = problem.jacobian(&params)?;
            func_evals += n_params;

            // Gradient g = Jᵀ r
            let gradient = jacobian.t().dot(&residuals);
            let gradient_norm = gradient.iter().map(|g| g.powi(2)).sum::<f64>().sqrt();
            if gradient_norm < self.config.gtol {
                return Ok(LmResult {
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    success: true,
                    message: format!(
                        "Gradient convergence: ||g|| = {:.2e} < {:.2e}",
                        gradient_norm, self.config.gtol
                    ),
                });
            }

            let step = match calculate_step(&jacobian, &residuals, lambda) {
                Some(step) => step,
                None => {
                    lambda = (lambda * self.config.lambda_up_factor).min(self.config.max_lambda);
                    if lambda >= self.config.max_lambda {
                        return Ok(self.unsuccessful(
                            params,
                            residuals,
                            cost,
                            iterations,
                            func_evals,
                            "Failed to calculate step, and lambda reached maximum".to_string(),
                        ));
                    }
                    continue;
                }
            };

            let new_params = &params + &step;
            let new_residuals = problem.eval(&new_params)?;
            func_evals += 1;
            let new_cost: f64 = new_residuals.iter().map(|r| r.powi(2)).sum();

            if new_cost.is_finite() && new_cost < cost {
                // Step accepted
                let param_change = step.iter().map(|x| x.abs()).fold(f64::NAN, f64::max);
                let cost_change = (cost - new_cost) / cost.max(1e-10);

                params = new_params;
                residuals = new_residuals;
                let old_cost = cost;
                cost = new_cost;
                lambda = (lambda * self.config.lambda_down_factor).max(self.config.min_lambda);
                iterations += 1;

                if param_change < self.config.xtol {
                    return Ok(LmResult {
                        params,
                        residuals,
                        cost,
                        iterations,
                        func_evals,
                        success: true,
                        message: format!(
                            "Parameter convergence: |dx| = {:.2e} < {:.2e}",
                            param_change, self.config.xtol
                        ),
                    });
                }
                if cost_change < self.config.ftol {
                    return Ok(LmResult {
                        params,
                        residuals,
                        cost,
                        iterations,
                        func_evals,
                        success: true,
                        message: format!(
                            "Cost convergence: |df|/|f| = {:.2e} < {:.2e} (f {:.3e} -> {:.3e})",
                            cost_change, self.config.ftol, old_cost, cost
                        ),
                    });
                }
                if iterations >= self.config.max_iterations {
                    return Ok(self.unsuccessful(
                        params,
                        residuals,
                        cost,
                        iterations,
                        func_evals,
                        format!("Maximum iterations ({}) reached", self.config.max_iterations),
                    ));
                }
            } else {
                // Step rejected
                lambda = (lambda * self.config.lambda_up_factor).min(self.config.max_lambda);
                if lambda >= self.config.max_lambda {
                    return Ok(self.unsuccessful(
                        params,
                        residuals,
                        cost,
                        iterations,
                        func_evals,
                        "Failed to decrease cost, and lambda reached maximum".to_string(),
                    ));
                }
            }
        }
    }

    fn unsuccessful(
        &self,
        params: Array1<f64>,
        residuals: Array1<f64>,
        cost: f64,
        iterations: usize,
        func_evals: usize,
        message: String,
    ) -> LmResult {
        LmResult {
            params,
            residuals,
            cost,
            iterations,
            func_evals,
            success: false,
            message,
        }
    }
}

/// Solve `(JᵀJ + λI) δ = -Jᵀr`. Cholesky first; Householder QR on the
/// damped matrix when the normal equations are not positive definite.
fn calculate_step(jacobian: &Array2<f64>, residuals: &Array1<f64>, lambda: f64) -> Option<Array1<f64>> {
    let jt = jacobian.t();
    let mut a = jt.dot(jacobian);
    let n = a.nrows();
    for i in 0..n {
        a[[i, i]] += lambda;
    }
    let b = jt.dot(residuals).mapv(|v| -v);

    solve_cholesky(&a, &b).or_else(|| solve_qr(&a, &b))
}

/// In-place Cholesky factorization and solve. Returns None when the matrix
/// is not positive definite.
fn solve_cholesky(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = a.clone();

    for k in 0..n {
        for j in 0..k {
            let ljk = l[[k, j]];
            l[[k, k]] -= ljk * ljk;
        }
        if l[[k, k]] <= 0.0 || !l[[k, k]].is_finite() {
            return None;
        }
        let akk_sqrt = l[[k, k]].sqrt();
        l[[k, k]] = akk_sqrt;

        for i in k + 1..n {
            for j in 0..k {
                let tmp = l[[i, j]] * l[[k, j]];
                l[[i, k]] -= tmp;
            }
            l[[i, k]] /= akk_sqrt;
        }
    }

    // Forward substitution L y = b
    let mut y = b.clone();
    for i in 0..n {
        for j in 0..i {
            let tmp = l[[i, j]] * y[j];
            y[i] -= tmp;
        }
        y[i] /= l[[i, i]];
    }

    // Backward substitution Lᵀ x = y
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = y[i];
        for j in (i + 1)..n {
            let tmp = l[[j, i]] * x[j];
            x[i] -= tmp;
        }
        x[i] /= l[[i, i]];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

/// Householder QR solve of a square system.
fn solve_qr(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut r = a.clone();
    let mut qtb = b.clone();

    for k in 0..n {
        // Householder vector for column k
        let mut norm = 0.0;
        for i in k..n {
            norm += r[[i, k]] * r[[i, k]];
        }
        let norm = norm.sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return None;
        }

        let alpha = if r[[k, k]] > 0.0 { -norm } else { norm };
        let mut v = Array1::zeros(n);
        v[k] = r[[k, k]] - alpha;
        for i in k + 1..n {
            v[i] = r[[i, k]];
        }
        let vtv: f64 = (k..n).map(|i| v[i] * v[i]).sum();
        if vtv == 0.0 {
            continue;
        }

        // Apply H = I - 2 v vᵀ / vᵀv to R and to b
        for j in k..n {
            let dot: f64 = (k..n).map(|i| v[i] * r[[i, j]]).sum();
            let factor = 2.0 * dot / vtv;
            for i in k..n {
                r[[i, j]] -= factor * v[i];
            }
        }
        let dot: f64 = (k..n).map(|i| v[i] * qtb[i]).sum();
        let factor = 2.0 * dot / vtv;
        for i in k..n {
            qtb[i] -= factor * v[i];
        }
    }

    // Back substitution R x = Qᵀ b
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = qtb[i];
        for j in (i + 1)..n {
            sum -= r[[i, j]] * x[j];
        }
        if r[[i, i]] == 0.0 || !r[[i, i]].is_finite() {
            return None;
        }
        x[i] = sum / r[[i, i]];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}
