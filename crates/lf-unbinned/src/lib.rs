//! # lf-unbinned
//!
//! Event-level (unbinned) loss construction for lossfit.
//!
//! This crate provides:
//! - A columnar [`EventStore`] (SoA layout) for observations.
//! - Normalized PDF kernels ([`UnbinnedPdf`]) and the shared [`Pdf`] handle.
//! - [`UnbinnedNll`] terms with parameter priors ([`Constraints`]).
//! - [`SimultaneousLoss`], built by [`compose`] or `+`, which sums terms.
//! - A versioned [`document`] format with an explicit PDF converter registry.
//!
//! Every loss implements [`lf_core::Loss`], so it can be minimized via `lf-inference`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constraint;
pub mod document;
pub mod event_store;
pub mod nll;
pub mod pdf;
pub mod simultaneous;

mod math;

pub use constraint::{Constraint, Constraints};
pub use document::{LossDocument, PdfConverter, PdfRegistry};
pub use event_store::EventStore;
pub use nll::UnbinnedNll;
pub use pdf::{ExponentialPdf, GaussianPdf, Pdf, ShapeParam, SumPdf, UnbinnedPdf};
pub use simultaneous::{NllTerms, SimultaneousLoss, compose};
