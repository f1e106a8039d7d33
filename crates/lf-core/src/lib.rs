//! # lf-core
//!
//! Core types shared by the lossfit crates: the error taxonomy, canonical fit
//! domains, parameter handles with their evaluation context, the [`Loss`]
//! interface consumed by minimizers and the [`FitResult`] they produce.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod limits;
pub mod params;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use limits::{Bound, Domain, Limits};
pub use params::{ParamSet, ParamValues, Parameter, ParameterSpec};
pub use traits::Loss;
pub use types::FitResult;
