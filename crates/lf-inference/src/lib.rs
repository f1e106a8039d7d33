//! # lf-inference
//!
//! Minimization of lossfit losses.
//!
//! This crate provides:
//! - [`LbfgsbOptimizer`]: L-BFGS (argmin) over a [`lf_core::Loss`], boxed by parameter bounds.
//! - [`MaximumLikelihoodEstimator`]: fits any [`lf_core::Loss`] and estimates
//!   uncertainties from the Hessian at the minimum.
//!
//! It depends only on the `Loss` seam from `lf-core`, not on how losses are built.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Maximum-likelihood estimation via L-BFGS-B.
pub mod mle;
/// Bounded L-BFGS over the parameters of a loss.
pub mod optimizer;

pub use mle::MaximumLikelihoodEstimator;
pub use optimizer::{LbfgsbOptimizer, OptimizationResult, OptimizerConfig};
