//! Maximum Likelihood Estimation

use crate::optimizer::{LbfgsbOptimizer, LossSurface, OptimizationResult, OptimizerConfig};
use lf_core::{Error, FitResult, Loss, ParamValues, Parameter, Result};
use nalgebra::DMatrix;

/// Maximum Likelihood Estimator
///
/// Minimizes a [`Loss`] over a list of parameters and estimates uncertainties
/// from the Hessian at the minimum.
#[derive(Debug, Clone, Default)]
pub struct MaximumLikelihoodEstimator {
    config: OptimizerConfig,
}

impl MaximumLikelihoodEstimator {
    /// Create a new MLE with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create MLE with custom optimizer configuration
    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Access the optimizer configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Fit all floating parameters the loss depends on, starting from their initial values.
    pub fn fit<L: Loss + ?Sized>(&self, loss: &L) -> Result<FitResult> {
        let params = loss.dependent_parameters()?.to_vec();
        self.fit_params(loss, &params)
    }

    /// Fit an explicit list of parameters, starting from their initial values.
    pub fn fit_params<L: Loss + ?Sized>(&self, loss: &L, params: &[Parameter]) -> Result<FitResult> {
        self.fit_from(loss, params, &ParamValues::new())
    }

    /// Fit `params` starting from `start`.
    ///
    /// `start` also pins every parameter that is not being fitted.
    pub fn fit_from<L: Loss + ?Sized>(
        &self,
        loss: &L,
        params: &[Parameter],
        start: &ParamValues,
    ) -> Result<FitResult> {
        if params.is_empty() {
            return Err(Error::Validation("no parameters to fit".into()));
        }
        tracing::info!(n_params = params.len(), "MLE fit start");

        let result = self.fit_minimum(loss, params, start)?;
        let hessian = compute_hessian(&LossSurface::new(loss, params, start), &result.parameters)?;
        let n = params.len();

        let scale = 2.0 * loss.errordef();
        let (uncertainties, covariance) = match invert_hessian(&hessian, n) {
            Some(cov) => {
                let cov = cov * scale;
                let unc = (0..n).map(|i| cov[(i, i)].sqrt()).collect();
                // nalgebra is column-major; the covariance is symmetric.
                (unc, Some(cov.iter().copied().collect()))
            }
            None => {
                tracing::warn!("Hessian inversion failed, using diagonal approximation");
                (diagonal_uncertainties(&hessian, scale), None)
            }
        };

        tracing::info!(nll = result.fval, converged = result.converged, "MLE fit done");
        Ok(FitResult {
            parameter_names: params.iter().map(|p| p.name().to_string()).collect(),
            parameters: result.parameters,
            uncertainties,
            covariance,
            nll: result.fval,
            converged: result.converged,
            n_evaluations: result.n_evaluations,
            message: result.message,
        })
    }

    /// Minimize only: no Hessian, no uncertainties.
    pub fn fit_minimum<L: Loss + ?Sized>(
        &self,
        loss: &L,
        params: &[Parameter],
        start: &ParamValues,
    ) -> Result<OptimizationResult> {
        LbfgsbOptimizer::new(self.config.clone()).minimize(loss, params, start)
    }
}

/// Forward differences of the analytic gradient, symmetrized.
///
/// Steps backwards for parameters sitting at their upper bound.
fn compute_hessian<L: Loss + ?Sized>(surface: &LossSurface<'_, L>, best: &[f64]) -> Result<DMatrix<f64>> {
    let n = best.len();
    let bounds = surface.bounds();
    let (_, grad_center) = surface.value_and_grad(best)?;
    let mut hessian = DMatrix::zeros(n, n);

    for j in 0..n {
        let mut eps = 1e-4 * best[j].abs().max(1.0);
        if best[j] + eps > bounds[j].1 {
            eps = -eps;
        }
        let mut shifted = best.to_vec();
        shifted[j] += eps;
        let (_, grad_shift) = surface.value_and_grad(&shifted)?;
        for i in 0..n {
            hessian[(i, j)] = (grad_shift[i] - grad_center[i]) / eps;
        }
    }

    let ht = hessian.transpose();
    hessian = (&hessian + &ht) * 0.5;
    Ok(hessian)
}

/// Damped Cholesky inverse; `None` unless every variance is finite and positive.
fn invert_hessian(hessian: &DMatrix<f64>, n: usize) -> Option<DMatrix<f64>> {
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut h_damped = hessian.clone();
    let mut damping = 0.0_f64;
    for _ in 0..10 {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
            let cov = chol.solve(&identity);
            if (0..n).all(|i| cov[(i, i)].is_finite() && cov[(i, i)] > 0.0) {
                return Some(cov);
            }
            return None;
        }
        let next = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        for i in 0..n {
            h_damped[(i, i)] += next - damping;
        }
        damping = next;
    }
    None
}

fn diagonal_uncertainties(hessian: &DMatrix<f64>, scale: f64) -> Vec<f64> {
    (0..hessian.nrows()).map(|i| (scale / hessian[(i, i)].abs().max(1e-12)).sqrt()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lf_core::ParamSet;

    /// `0.5 * ((a - 1)^2 / 0.04 + (b + 2)^2 / 0.25)`: a Gaussian NLL with known errors.
    struct Quadratic {
        a: Parameter,
        b: Parameter,
    }

    impl Loss for Quadratic {
        fn value(&self, values: &ParamValues) -> Result<f64> {
            let (a, b) = (values.get(&self.a), values.get(&self.b));
            Ok(0.5 * ((a - 1.0).powi(2) / 0.04 + (b + 2.0).powi(2) / 0.25))
        }

        fn value_and_grad(&self, values: &ParamValues, wrt: &[Parameter]) -> Result<(f64, Vec<f64>)> {
            let (a, b) = (values.get(&self.a), values.get(&self.b));
            let grad = wrt
                .iter()
                .map(|p| {
                    if *p == self.a {
                        (a - 1.0) / 0.04
                    } else if *p == self.b {
                        (b + 2.0) / 0.25
                    } else {
                        0.0
                    }
                })
                .collect();
            Ok((self.value(values)?, grad))
        }

        fn dependent_parameters(&self) -> Result<ParamSet> {
            let mut set = ParamSet::new();
            set.insert(self.a.clone())?;
            set.insert(self.b.clone())?;
            Ok(set)
        }
    }

    fn loss() -> Quadratic {
        Quadratic {
            a: Parameter::bounded("a", 0.0, -5.0, 5.0).unwrap(),
            b: Parameter::bounded("b", 0.0, -5.0, 5.0).unwrap(),
        }
    }

    #[test]
    fn test_fit_recovers_minimum_and_errors() {
        let fit = MaximumLikelihoodEstimator::new().fit(&loss()).unwrap();
        assert!(fit.converged, "{}", fit.message);
        assert_eq!(fit.parameter_names, vec!["a".to_string(), "b".to_string()]);
        assert_relative_eq!(fit.value("a").unwrap(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(fit.value("b").unwrap(), -2.0, epsilon = 1e-5);
        assert_relative_eq!(fit.error("a").unwrap(), 0.2, epsilon = 1e-4);
        assert_relative_eq!(fit.error("b").unwrap(), 0.5, epsilon = 1e-4);
        assert_relative_eq!(fit.correlation(0, 1).unwrap(), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_fit_from_pins_other_parameters() {
        let l = loss();
        let start = ParamValues::new().with(&l.b, 3.0);
        let fit = MaximumLikelihoodEstimator::new()
            .fit_from(&l, std::slice::from_ref(&l.a), &start)
            .unwrap();
        assert_eq!(fit.parameters.len(), 1);
        assert_relative_eq!(fit.parameters[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(fit.nll, 0.5 * 25.0 / 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_parameter_list() {
        let err = MaximumLikelihoodEstimator::new().fit_params(&loss(), &[]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
