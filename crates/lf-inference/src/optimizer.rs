//! Bounded minimization of a [`Loss`].
//!
//! The loss is seen as a function of the values of an ordered list of
//! [`Parameter`]s; their bounds form the box. argmin drives an L-BFGS with a
//! More-Thuente line search. Trial points are clamped into the box and gradient
//! components pushing through an active bound are dropped.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use lf_core::{Error, Loss, ParamValues, Parameter, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Stopping rules and memory size for [`LbfgsbOptimizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Gradient-norm tolerance; the cost tolerance is a tenth of it.
    pub tol: f64,
    /// Number of stored correction pairs
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// Outcome of [`LbfgsbOptimizer::minimize`].
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best values, in the order of the fitted parameters.
    pub parameters: Vec<f64>,
    /// Loss at `parameters`.
    pub fval: f64,
    /// Iterations performed
    pub n_iter: u64,
    /// Distinct points at which the loss (with gradient) was evaluated.
    pub n_evaluations: usize,
    /// Whether argmin reported convergence
    pub converged: bool,
    /// argmin termination status.
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_evaluations={}, converged={})",
            self.fval, self.n_iter, self.n_evaluations, self.converged
        )
    }
}

struct Evaluation {
    x: Vec<f64>,
    value: f64,
    grad: Vec<f64>,
}

/// A [`Loss`] restricted to the box spanned by `params`.
///
/// Parameters outside `params` keep their value in `base`. argmin asks for
/// the cost and the gradient at the same point, so the last evaluation is
/// reused.
pub(crate) struct LossSurface<'a, L: Loss + ?Sized> {
    loss: &'a L,
    params: &'a [Parameter],
    base: &'a ParamValues,
    bounds: Vec<(f64, f64)>,
    last: Mutex<Option<Evaluation>>,
    n_evaluations: Arc<AtomicUsize>,
}

impl<'a, L: Loss + ?Sized> LossSurface<'a, L> {
    pub(crate) fn new(loss: &'a L, params: &'a [Parameter], base: &'a ParamValues) -> Self {
        Self {
            loss,
            params,
            base,
            bounds: params.iter().map(Parameter::bounds).collect(),
            last: Mutex::new(None),
            n_evaluations: Arc::default(),
        }
    }

    pub(crate) fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    fn clamp(&self, x: &[f64]) -> Vec<f64> {
        x.iter().zip(&self.bounds).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
    }

    /// Loss and gradient at `x` clamped into the box.
    pub(crate) fn value_and_grad(&self, x: &[f64]) -> Result<(f64, Vec<f64>)> {
        let x = self.clamp(x);
        let mut last =
            self.last.lock().map_err(|_| Error::Computation("loss surface cache poisoned".into()))?;
        if let Some(hit) = last.as_ref().filter(|hit| hit.x == x) {
            return Ok((hit.value, hit.grad.clone()));
        }
        let mut values = self.base.clone();
        values.assign(self.params, &x)?;
        let (value, grad) = self.loss.value_and_grad(&values, self.params)?;
        self.n_evaluations.fetch_add(1, Ordering::Relaxed);
        *last = Some(Evaluation { x, value, grad: grad.clone() });
        Ok((value, grad))
    }

    /// Gradient with components pointing out of the box at active bounds zeroed.
    fn projected_gradient(&self, x: &[f64]) -> Result<Vec<f64>> {
        const EPS: f64 = 1e-12;
        let (_, mut g) = self.value_and_grad(x)?;
        for ((gi, &xi), &(lo, hi)) in g.iter_mut().zip(&self.clamp(x)).zip(&self.bounds) {
            if (xi <= lo + EPS && *gi > 0.0) || (xi >= hi - EPS && *gi < 0.0) {
                *gi = 0.0;
            }
        }
        Ok(g)
    }
}

fn to_argmin(e: Error) -> argmin::core::Error {
    argmin::core::Error::msg(e.to_string())
}

impl<L: Loss + ?Sized> CostFunction for LossSurface<'_, L> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.value_and_grad(x).map(|(value, _)| value).map_err(to_argmin)
    }
}

impl<L: Loss + ?Sized> Gradient for LossSurface<'_, L> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, x: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.projected_gradient(x).map_err(to_argmin)
    }
}

/// L-BFGS with box constraints taken from parameter bounds.
#[derive(Debug, Clone, Default)]
pub struct LbfgsbOptimizer {
    config: OptimizerConfig,
}

impl LbfgsbOptimizer {
    /// Create an optimizer with the given configuration
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `loss` over `params`, starting from their values in `start`.
    ///
    /// Every other parameter is held at its value in `start`.
    pub fn minimize<L: Loss + ?Sized>(
        &self,
        loss: &L,
        params: &[Parameter],
        start: &ParamValues,
    ) -> Result<OptimizationResult> {
        if params.is_empty() {
            return Err(Error::Validation("no parameters to minimize over".into()));
        }
        let surface = LossSurface::new(loss, params, start);
        let init = surface.clamp(&start.vector(params));
        let bounds = surface.bounds().to_vec();
        let n_evaluations = Arc::clone(&surface.n_evaluations);

        // argmin's default cost tolerance (~EPS) is far too strict for NLL scales.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.m)
            .with_tolerance_grad(self.config.tol)
            .and_then(|s| s.with_tolerance_cost(tol_cost))
            .map_err(|e| Error::Validation(format!("invalid optimizer configuration: {e}")))?;

        tracing::debug!(
            params = ?params.iter().map(Parameter::name).collect::<Vec<_>>(),
            max_iter = self.config.max_iter,
            "L-BFGS start"
        );
        let res = Executor::new(surface, solver)
            .configure(|state| state.param(init).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("minimization failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("minimizer returned no parameters".into()))?;
        let parameters =
            best.iter().zip(&bounds).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect();
        let fval = state.get_best_cost();
        let n_iter = state.get_iter();
        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(
                TerminationReason::SolverConverged | TerminationReason::TargetCostReached
            )
        );
        let message = termination.to_string();
        let n_evaluations = n_evaluations.load(Ordering::Relaxed);
        tracing::debug!(fval, n_iter, n_evaluations, converged, "L-BFGS done: {message}");

        Ok(OptimizationResult { parameters, fval, n_iter, n_evaluations, converged, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lf_core::ParamSet;

    /// `(x - 2)^2 + (y - 3)^2`, counting evaluations.
    struct Bowl {
        x: Parameter,
        y: Parameter,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Bowl {
        fn new(x: (f64, f64, f64), y: (f64, f64, f64)) -> Self {
            Self {
                x: Parameter::bounded("x", x.0, x.1, x.2).unwrap(),
                y: Parameter::bounded("y", y.0, y.1, y.2).unwrap(),
                calls: Default::default(),
            }
        }
    }

    impl Loss for Bowl {
        fn value(&self, values: &ParamValues) -> Result<f64> {
            let (x, y) = (values.get(&self.x), values.get(&self.y));
            Ok((x - 2.0).powi(2) + (y - 3.0).powi(2))
        }

        fn value_and_grad(&self, values: &ParamValues, wrt: &[Parameter]) -> Result<(f64, Vec<f64>)> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let (x, y) = (values.get(&self.x), values.get(&self.y));
            let grad = wrt
                .iter()
                .map(|p| match p.name() {
                    "x" => 2.0 * (x - 2.0),
                    "y" => 2.0 * (y - 3.0),
                    _ => 0.0,
                })
                .collect();
            Ok((self.value(values)?, grad))
        }

        fn dependent_parameters(&self) -> Result<ParamSet> {
            let mut set = ParamSet::new();
            set.insert(self.x.clone())?;
            set.insert(self.y.clone())?;
            Ok(set)
        }
    }

    #[test]
    fn test_unconstrained_minimum() {
        let bowl = Bowl::new((0.0, -10.0, 10.0), (0.0, -10.0, 10.0));
        let params = [bowl.x.clone(), bowl.y.clone()];
        let optimizer = LbfgsbOptimizer::new(OptimizerConfig { max_iter: 100, tol: 1e-6, m: 10 });
        let result = optimizer.minimize(&bowl, &params, &ParamValues::new()).unwrap();

        assert!(result.converged, "should converge: {}", result.message);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.fval, 0.0, epsilon = 1e-6);
        assert!(result.n_evaluations > 0);
        // cost and gradient at one point share a loss evaluation
        assert_eq!(result.n_evaluations, bowl.calls.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn test_parameter_bounds_form_the_box() {
        // Constrained optimum in x in [3, 5], y in [1, 2] is (3, 2).
        let bowl = Bowl::new((4.0, 3.0, 5.0), (1.5, 1.0, 2.0));
        let params = [bowl.x.clone(), bowl.y.clone()];
        let result =
            LbfgsbOptimizer::default().minimize(&bowl, &params, &ParamValues::new()).unwrap();

        assert_relative_eq!(result.parameters[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 2.0, epsilon = 1e-4);
        assert!(result.converged, "should converge at the bound: {}", result.message);
    }

    #[test]
    fn test_start_outside_box_is_clamped_and_others_pinned() {
        let bowl = Bowl::new((0.0, -10.0, 10.0), (0.0, -10.0, 10.0));
        let start = ParamValues::new().with(&bowl.x, 50.0).with(&bowl.y, 7.0);
        let result = LbfgsbOptimizer::default()
            .minimize(&bowl, std::slice::from_ref(&bowl.x), &start)
            .unwrap();

        assert_eq!(result.parameters.len(), 1);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.fval, 16.0, epsilon = 1e-6);
    }

    #[test]
    fn test_no_parameters_is_validation_error() {
        let bowl = Bowl::new((0.0, -1.0, 1.0), (0.0, -1.0, 1.0));
        let err = LbfgsbOptimizer::default().minimize(&bowl, &[], &ParamValues::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let cfg: OptimizerConfig = serde_json::from_str(r#"{"max_iter": 50}"#).unwrap();
        assert_eq!(cfg, OptimizerConfig { max_iter: 50, ..OptimizerConfig::default() });
    }
}
