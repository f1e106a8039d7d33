//! Unbinned probability density functions (PDFs).
//!
//! Two layers:
//! - [`UnbinnedPdf`] kernels compute normalized log-densities from a plain
//!   parameter slice, the way a compute backend would.
//! - [`Pdf`] is the shared handle the loss engine works with: a named kernel
//!   whose parameter slots are bound to [`Parameter`]s or constants.

use crate::event_store::EventStore;
use lf_core::{Domain, Error, ParamSet, ParamValues, Parameter, Result};
use std::fmt;
use std::sync::Arc;

mod exponential;
mod gaussian;
mod sum;

pub use exponential::ExponentialPdf;
pub use gaussian::GaussianPdf;
pub use sum::SumPdf;

/// Trait for normalized PDFs used in event-level likelihoods.
///
/// Axis `k` of the `domain` passed to the batch methods bounds the observable
/// `observables()[k]`; the density is normalized over that region and is zero
/// outside of it.
pub trait UnbinnedPdf: Send + Sync + fmt::Debug {
    /// Type tag used by the serialization registry.
    fn type_tag(&self) -> &'static str;

    /// Number of shape parameters for this PDF.
    fn n_params(&self) -> usize;

    /// Observable names required by this PDF (stable order).
    fn observables(&self) -> &[String];

    /// True for PDFs assembled from other PDFs.
    fn is_functor(&self) -> bool {
        false
    }

    /// True if the density can only be normalized on a finite range.
    fn needs_finite_domain(&self) -> bool {
        false
    }

    /// Evaluate `log p(x | params)` for all events in the store.
    ///
    /// `out` must have length `events.n_events()`.
    fn log_prob_batch(
        &self,
        events: &EventStore,
        domain: &Domain,
        params: &[f64],
        out: &mut [f64],
    ) -> Result<()>;

    /// Evaluate `log p(x|params)` and its gradient w.r.t the shape parameters.
    ///
    /// - `out_logp` must have length `events.n_events()`.
    /// - `out_grad` must have length `events.n_events() * self.n_params()` and is laid out as
    ///   row-major `[event0_param0, event0_param1, ..., event1_param0, ...]`.
    fn log_prob_grad_batch(
        &self,
        events: &EventStore,
        domain: &Domain,
        params: &[f64],
        out_logp: &mut [f64],
        out_grad: &mut [f64],
    ) -> Result<()>;

    /// `d/dx log p(x | params)` for a one-dimensional PDF.
    ///
    /// Defaults to central differences.
    fn dlog_prob_dx(&self, x: f64, domain: &Domain, params: &[f64]) -> Result<f64> {
        let obs = self.observables();
        if obs.len() != 1 {
            return Err(Error::NotImplemented(format!(
                "dlog_prob_dx needs a one-dimensional PDF, got {} observables",
                obs.len()
            )));
        }
        let eps = 1e-6 * x.abs().max(1.0);
        let name = obs[0].as_str();
        let mut lp = [0.0f64; 1];
        let plus = EventStore::single(&[name], &[x + eps])?;
        self.log_prob_batch(&plus, domain, params, &mut lp)?;
        let f_plus = lp[0];
        let minus = EventStore::single(&[name], &[x - eps])?;
        self.log_prob_batch(&minus, domain, params, &mut lp)?;
        Ok((f_plus - lp[0]) / (2.0 * eps))
    }
}

pub(crate) fn check_out_lengths(
    who: &str,
    n_events: usize,
    n_params: usize,
    out_logp: &[f64],
    out_grad: Option<&[f64]>,
) -> Result<()> {
    if out_logp.len() != n_events {
        return Err(Error::Validation(format!(
            "{who} out_logp length mismatch: expected {n_events}, got {}",
            out_logp.len()
        )));
    }
    if let Some(g) = out_grad
        && g.len() != n_events * n_params
    {
        return Err(Error::Validation(format!(
            "{who} out_grad length mismatch: expected {}, got {}",
            n_events * n_params,
            g.len()
        )));
    }
    Ok(())
}

/// Value bound to one kernel parameter slot.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeParam {
    /// Constant value.
    Constant(f64),
    /// Model parameter.
    Param(Parameter),
}

impl ShapeParam {
    /// Current value under `values`.
    pub fn value(&self, values: &ParamValues) -> f64 {
        match self {
            ShapeParam::Constant(v) => *v,
            ShapeParam::Param(p) => values.get(p),
        }
    }

    /// The bound parameter, if any.
    pub fn parameter(&self) -> Option<&Parameter> {
        match self {
            ShapeParam::Constant(_) => None,
            ShapeParam::Param(p) => Some(p),
        }
    }
}

impl From<f64> for ShapeParam {
    fn from(v: f64) -> Self {
        ShapeParam::Constant(v)
    }
}

impl From<Parameter> for ShapeParam {
    fn from(p: Parameter) -> Self {
        ShapeParam::Param(p)
    }
}

impl From<&Parameter> for ShapeParam {
    fn from(p: &Parameter) -> Self {
        ShapeParam::Param(p.clone())
    }
}

struct PdfInner {
    name: String,
    kernel: Arc<dyn UnbinnedPdf>,
    own_params: Vec<ShapeParam>,
    components: Vec<Pdf>,
    /// `own_params` followed by every component's slots: the kernel's parameter order.
    slots: Vec<ShapeParam>,
}

/// Shared PDF handle.
///
/// Cloning is cheap; equality is identity (two handles are equal when they
/// refer to the same PDF object).
#[derive(Clone)]
pub struct Pdf(Arc<PdfInner>);

impl Pdf {
    /// Assemble a PDF from a kernel, its own parameter slots and components.
    ///
    /// The kernel's parameter order must be `own_params` followed by the
    /// components' slots in order.
    pub fn from_parts(
        name: impl Into<String>,
        kernel: Arc<dyn UnbinnedPdf>,
        own_params: Vec<ShapeParam>,
        components: Vec<Pdf>,
    ) -> Result<Self> {
        let name = name.into();
        if kernel.is_functor() == components.is_empty() {
            return Err(Error::Validation(format!(
                "pdf '{name}': functor kernels need components and plain kernels must have none"
            )));
        }
        let mut slots = own_params.clone();
        for c in &components {
            slots.extend(c.slots().iter().cloned());
        }
        if slots.len() != kernel.n_params() {
            return Err(Error::Value(format!(
                "pdf '{name}': kernel '{}' expects {} parameters, got {}",
                kernel.type_tag(),
                kernel.n_params(),
                slots.len()
            )));
        }
        Ok(Self(Arc::new(PdfInner { name, kernel, own_params, components, slots })))
    }

    /// Plain (non-functor) PDF.
    pub fn new(
        name: impl Into<String>,
        kernel: Arc<dyn UnbinnedPdf>,
        params: Vec<ShapeParam>,
    ) -> Result<Self> {
        Self::from_parts(name, kernel, params, Vec::new())
    }

    /// Gaussian over `observable`, truncated to the evaluation domain.
    pub fn gaussian(
        name: impl Into<String>,
        observable: impl Into<String>,
        mu: impl Into<ShapeParam>,
        sigma: impl Into<ShapeParam>,
    ) -> Self {
        let kernel: Arc<dyn UnbinnedPdf> = Arc::new(GaussianPdf::new(observable));
        let slots = vec![mu.into(), sigma.into()];
        Self(Arc::new(PdfInner {
            name: name.into(),
            kernel,
            own_params: slots.clone(),
            components: Vec::new(),
            slots,
        }))
    }

    /// `exp(lambda * x)` over `observable`, normalized on the (finite) evaluation domain.
    pub fn exponential(
        name: impl Into<String>,
        observable: impl Into<String>,
        lambda: impl Into<ShapeParam>,
    ) -> Self {
        let kernel: Arc<dyn UnbinnedPdf> = Arc::new(ExponentialPdf::new(observable));
        let slots = vec![lambda.into()];
        Self(Arc::new(PdfInner {
            name: name.into(),
            kernel,
            own_params: slots.clone(),
            components: Vec::new(),
            slots,
        }))
    }

    /// Weighted sum `sum_k f_k p_k`; the last fraction is `1 - sum(fracs)`.
    pub fn sum(name: impl Into<String>, components: Vec<Pdf>, fracs: Vec<ShapeParam>) -> Result<Self> {
        let kernels: Vec<Arc<dyn UnbinnedPdf>> =
            components.iter().map(|c| c.kernel().clone()).collect();
        let kernel: Arc<dyn UnbinnedPdf> = Arc::new(SumPdf::new(kernels)?);
        Self::from_parts(name, kernel, fracs, components)
    }

    /// PDF name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Underlying kernel.
    pub fn kernel(&self) -> &Arc<dyn UnbinnedPdf> {
        &self.0.kernel
    }

    /// Kernel type tag.
    pub fn type_tag(&self) -> &'static str {
        self.0.kernel.type_tag()
    }

    /// Observables this PDF reads (axis order of its domain).
    pub fn observables(&self) -> &[String] {
        self.0.kernel.observables()
    }

    /// Parameter slots owned directly by this PDF (fractions for a sum).
    pub fn own_params(&self) -> &[ShapeParam] {
        &self.0.own_params
    }

    /// Component PDFs of a functor; empty otherwise.
    pub fn components(&self) -> &[Pdf] {
        &self.0.components
    }

    /// All parameter slots in kernel order.
    pub fn slots(&self) -> &[ShapeParam] {
        &self.0.slots
    }

    /// True if this PDF is composed of other PDFs.
    pub fn is_functor(&self) -> bool {
        self.0.kernel.is_functor()
    }

    fn slot_values(&self, values: &ParamValues) -> Vec<f64> {
        self.0.slots.iter().map(|s| s.value(values)).collect()
    }

    /// Log-densities of every event in `events` over `domain`.
    pub fn log_prob(
        &self,
        events: &EventStore,
        domain: &Domain,
        values: &ParamValues,
        out: &mut [f64],
    ) -> Result<()> {
        self.0.kernel.log_prob_batch(events, domain, &self.slot_values(values), out)
    }

    /// Log-densities and their gradient w.r.t. [`Pdf::slots`] (row-major per event).
    pub fn log_prob_grad(
        &self,
        events: &EventStore,
        domain: &Domain,
        values: &ParamValues,
        out_logp: &mut [f64],
        out_grad: &mut [f64],
    ) -> Result<()> {
        self.0.kernel.log_prob_grad_batch(
            events,
            domain,
            &self.slot_values(values),
            out_logp,
            out_grad,
        )
    }

    /// Densities of every event in `events` over `domain`.
    pub fn evaluate(
        &self,
        events: &EventStore,
        domain: &Domain,
        values: &ParamValues,
    ) -> Result<Vec<f64>> {
        let mut out = vec![0.0f64; events.n_events()];
        self.log_prob(events, domain, values, &mut out)?;
        for v in &mut out {
            *v = v.exp();
        }
        Ok(out)
    }

    /// Log-density at a single point, normalized over an unbounded domain.
    pub fn log_prob_at_point(&self, point: &[f64], values: &ParamValues) -> Result<f64> {
        let names: Vec<&str> = self.observables().iter().map(|s| s.as_str()).collect();
        let events = EventStore::single(&names, point)?;
        let mut out = [0.0f64; 1];
        self.log_prob(&events, &Domain::unbounded(names.len()), values, &mut out)?;
        Ok(out[0])
    }

    /// Density at a scalar value over an unbounded domain.
    pub fn evaluate_at_point(&self, x: f64, values: &ParamValues) -> Result<f64> {
        Ok(self.log_prob_at_point(&[x], values)?.exp())
    }

    /// `d/dx log p(x)` over an unbounded domain (one-dimensional PDFs only).
    pub fn dlog_prob_dx(&self, x: f64, values: &ParamValues) -> Result<f64> {
        self.0.kernel.dlog_prob_dx(x, &Domain::unbounded(1), &self.slot_values(values))
    }

    /// Parameters this PDF depends on, including those of its components.
    pub fn dependent_parameters(&self, only_floating: bool) -> Result<ParamSet> {
        let mut set = ParamSet::new();
        for p in self.0.slots.iter().filter_map(ShapeParam::parameter) {
            if !only_floating || p.is_floating() {
                set.insert(p.clone())?;
            }
        }
        Ok(set)
    }
}

impl PartialEq for Pdf {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Pdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pdf")
            .field("name", &self.0.name)
            .field("type", &self.type_tag())
            .field("observables", &self.observables())
            .field("params", &self.0.slots)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pdf_identity_equality() {
        let a = Pdf::gaussian("g", "x", 0.0, 1.0);
        let b = Pdf::gaussian("g", "x", 0.0, 1.0);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_dependent_parameters_filters_fixed() {
        let mu = Parameter::new("mu", 0.0);
        let sigma = Parameter::fixed("sigma", 1.0);
        let g = Pdf::gaussian("g", "x", &mu, &sigma);
        assert_eq!(g.dependent_parameters(true).unwrap().names(), vec!["mu".to_string()]);
        assert_eq!(g.dependent_parameters(false).unwrap().len(), 2);
    }

    #[test]
    fn test_evaluate_at_point_is_unbounded_normal() {
        let g = Pdf::gaussian("prior", "x", 1.6, 0.2);
        let v = g.evaluate_at_point(1.6, &ParamValues::new()).unwrap();
        let expected = 1.0 / (0.2 * (2.0 * std::f64::consts::PI).sqrt());
        assert_relative_eq!(v, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_from_parts_checks_param_count() {
        let kernel: Arc<dyn UnbinnedPdf> = Arc::new(GaussianPdf::new("x"));
        let err = Pdf::new("g", kernel, vec![ShapeParam::Constant(0.0)]).unwrap_err();
        assert!(matches!(err, Error::Value(_)));
    }

    #[test]
    fn test_sum_collects_component_parameters() {
        let mu = Parameter::new("mu", 0.0);
        let lam = Parameter::new("lam", -0.5);
        let frac = Parameter::bounded("frac", 0.3, 0.0, 1.0).unwrap();
        let s = Pdf::sum(
            "model",
            vec![Pdf::gaussian("sig", "x", &mu, 1.0), Pdf::exponential("bkg", "x", &lam)],
            vec![(&frac).into()],
        )
        .unwrap();
        assert!(s.is_functor());
        assert_eq!(s.slots().len(), 4);
        assert_eq!(
            s.dependent_parameters(true).unwrap().names(),
            vec!["frac".to_string(), "lam".to_string(), "mu".to_string()]
        );
    }
}
