//! Common data types for lossfit

use crate::{ParamValues, Parameter};
use serde::{Deserialize, Serialize};

/// Fit result containing parameter estimates and uncertainties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Names of the fitted parameters (same order as `parameters`).
    pub parameter_names: Vec<String>,

    /// Best-fit parameter values
    pub parameters: Vec<f64>,

    /// Parameter uncertainties (sqrt of covariance diagonal); NaN if unavailable.
    pub uncertainties: Vec<f64>,

    /// Covariance matrix (row-major, N×N). `None` if Hessian inversion failed.
    pub covariance: Option<Vec<f64>>,

    /// Loss value at minimum
    pub nll: f64,

    /// Convergence status
    pub converged: bool,

    /// Number of function evaluations
    pub n_evaluations: usize,

    /// Optimizer termination message.
    pub message: String,
}

impl FitResult {
    /// Index of a parameter by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parameter_names.iter().position(|n| n == name)
    }

    /// Best-fit value of a parameter.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.index_of(name).map(|i| self.parameters[i])
    }

    /// Uncertainty of a parameter.
    pub fn error(&self, name: &str) -> Option<f64> {
        self.index_of(name).and_then(|i| self.uncertainties.get(i).copied())
    }

    /// Get correlation matrix element (i, j). Returns `None` if covariance is unavailable.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.parameters.len();
        if i >= n || j >= n {
            return None;
        }
        let sigma_i = self.uncertainties[i];
        let sigma_j = self.uncertainties[j];
        if !(sigma_i > 0.0 && sigma_j > 0.0) {
            return None;
        }
        Some(cov[i * n + j] / (sigma_i * sigma_j))
    }

    /// Evaluation context positioned at the best-fit point.
    ///
    /// `params` supplies the handles; entries whose names are not part of the
    /// result keep their initial values.
    pub fn to_values(&self, params: &[Parameter]) -> ParamValues {
        let mut out = ParamValues::new();
        for p in params {
            if let Some(v) = self.value(p.name()) {
                out.set(p, v);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn result() -> FitResult {
        FitResult {
            parameter_names: vec!["a".into(), "b".into()],
            parameters: vec![1.0, 2.0],
            uncertainties: vec![0.1, 0.2],
            covariance: Some(vec![0.01, 0.01, 0.01, 0.04]),
            nll: 123.45,
            converged: true,
            n_evaluations: 100,
            message: "converged".into(),
        }
    }

    #[test]
    fn test_fit_result_lookup() {
        let r = result();
        assert_eq!(r.value("b"), Some(2.0));
        assert_eq!(r.error("a"), Some(0.1));
        assert_eq!(r.value("c"), None);
    }

    #[test]
    fn test_correlation() {
        let r = result();
        let rho = r.correlation(0, 1).unwrap();
        assert_relative_eq!(rho, 0.5, epsilon = 1e-12);
        assert_relative_eq!(r.correlation(1, 1).unwrap(), 1.0, epsilon = 1e-12);
        assert!(r.correlation(0, 2).is_none());
    }

    #[test]
    fn test_to_values() {
        let r = result();
        let a = Parameter::new("a", 0.0);
        let c = Parameter::new("c", 7.0);
        let values = r.to_values(&[a.clone(), c.clone()]);
        assert_eq!(values.get(&a), 1.0);
        assert_eq!(values.get(&c), 7.0);
    }
}
