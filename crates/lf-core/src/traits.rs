//! Core traits for lossfit
//!
//! The [`Loss`] trait is the seam between loss construction (`lf-unbinned`)
//! and minimization (`lf-inference`): the minimizer only ever sees a scalar
//! objective, its gradient and the set of parameters it depends on.

use crate::{ParamSet, ParamValues, Parameter, Result};

/// Scalar objective over named parameters.
pub trait Loss: Send + Sync {
    /// Evaluate the loss at the values in `values`.
    fn value(&self, values: &ParamValues) -> Result<f64>;

    /// Evaluate the loss and its gradient with respect to `wrt` (same order).
    ///
    /// Parameters outside `wrt` are held at their value in `values`.
    fn value_and_grad(&self, values: &ParamValues, wrt: &[Parameter]) -> Result<(f64, Vec<f64>)>;

    /// Floating parameters that influence the loss.
    fn dependent_parameters(&self) -> Result<ParamSet>;

    /// Change in loss corresponding to one standard deviation (0.5 for an NLL).
    fn errordef(&self) -> f64 {
        0.5
    }
}
