//! Unbinned negative log-likelihood term.

use crate::constraint::Constraints;
use crate::event_store::EventStore;
use crate::pdf::Pdf;
use lf_core::{Domain, Error, Limits, Loss, ParamSet, ParamValues, Parameter, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// One NLL term: PDFs evaluated on their datasets over their fit ranges, plus priors.
///
/// `pdfs[i]`, `data[i]` and `fit_ranges[i]` describe the `i`-th part of the
/// term. The term is immutable after construction; composing terms creates a
/// [`crate::SimultaneousLoss`].
#[derive(Debug, Clone, PartialEq)]
pub struct UnbinnedNll {
    pdfs: Vec<Pdf>,
    data: Vec<Arc<EventStore>>,
    fit_ranges: Vec<Domain>,
    constraints: Constraints,
}

impl UnbinnedNll {
    /// Single-part term without constraints.
    pub fn new(
        pdf: Pdf,
        data: impl Into<Arc<EventStore>>,
        fit_range: impl Into<Limits>,
    ) -> Result<Self> {
        Self::from_parts(vec![pdf], vec![data.into()], vec![fit_range.into()], Constraints::new())
    }

    /// Multi-part term. The three sequences must have the same, non-zero length.
    pub fn from_parts(
        pdfs: Vec<Pdf>,
        data: Vec<Arc<EventStore>>,
        fit_ranges: Vec<Limits>,
        constraints: Constraints,
    ) -> Result<Self> {
        if pdfs.is_empty() {
            return Err(Error::Value("an NLL term needs at least one pdf".into()));
        }
        if pdfs.len() != data.len() || pdfs.len() != fit_ranges.len() {
            return Err(Error::Value(format!(
                "pdf, data and fit_range must have the same length, got {}, {} and {}",
                pdfs.len(),
                data.len(),
                fit_ranges.len()
            )));
        }

        let mut domains = Vec::with_capacity(fit_ranges.len());
        for ((pdf, events), limits) in pdfs.iter().zip(&data).zip(fit_ranges) {
            for obs in pdf.observables() {
                if events.column(obs).is_none() {
                    return Err(Error::Validation(format!(
                        "pdf '{}' needs observable '{obs}', which the data does not provide",
                        pdf.name()
                    )));
                }
            }
            let domain = Domain::from_limits(limits, None)?;
            let n_obs = pdf.observables().len();
            if let Some(&d) = domain.dims().iter().find(|&&d| d >= n_obs) {
                return Err(Error::Value(format!(
                    "fit range for pdf '{}' bounds axis {d}, but the pdf has {n_obs} observables",
                    pdf.name()
                )));
            }
            domains.push(domain);
        }

        let term = Self { pdfs, data, fit_ranges: domains, constraints };
        term.all_parameters()?;
        Ok(term)
    }

    /// Add priors; a parameter constrained twice is an error.
    pub fn with_constraints(
        mut self,
        pairs: impl IntoIterator<Item = (Parameter, Pdf)>,
    ) -> Result<Self> {
        let extra = Constraints::from_pairs(pairs)?;
        self.constraints.merge(&extra)?;
        self.all_parameters()?;
        Ok(self)
    }

    /// Every parameter the term references, fixed ones included.
    ///
    /// Fails with [`Error::Validation`] when two different parameters share a name.
    pub fn all_parameters(&self) -> Result<ParamSet> {
        let mut set = ParamSet::new();
        for pdf in &self.pdfs {
            set.union(&pdf.dependent_parameters(false)?)?;
        }
        set.union(&self.constraints.all_parameters()?)?;
        Ok(set)
    }

    /// PDFs, one per part.
    pub fn pdfs(&self) -> &[Pdf] {
        &self.pdfs
    }

    /// Datasets, one per part.
    pub fn data(&self) -> &[Arc<EventStore>] {
        &self.data
    }

    /// Canonical fit ranges, one per part.
    pub fn fit_ranges(&self) -> &[Domain] {
        &self.fit_ranges
    }

    /// Priors attached to this term.
    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Number of parts.
    pub fn n_parts(&self) -> usize {
        self.pdfs.len()
    }

    fn parts(&self) -> impl Iterator<Item = (&Pdf, &EventStore, &Domain)> {
        self.pdfs
            .iter()
            .zip(&self.data)
            .zip(&self.fit_ranges)
            .map(|((p, d), r)| (p, d.as_ref(), r))
    }

    /// Data contribution only: `-sum_i w_i log p(x_i)` over all parts.
    pub fn data_nll(&self, values: &ParamValues) -> Result<f64> {
        let mut total = 0.0;
        for (pdf, events, domain) in self.parts() {
            let mut logp = vec![0.0f64; events.n_events()];
            pdf.log_prob(events, domain, values, &mut logp)?;
            total += weighted_sum(&logp, events.weights());
        }
        Ok(-total)
    }
}

/// `sum_i w_i x_i`; zero-weight events are skipped so that `0 * -inf` stays out of the sum.
fn weighted_sum(logp: &[f64], weights: Option<&[f64]>) -> f64 {
    match weights {
        None => logp.iter().sum(),
        Some(w) => logp.iter().zip(w).filter(|(_, w)| **w != 0.0).map(|(lp, w)| w * lp).sum(),
    }
}

impl Loss for UnbinnedNll {
    fn value(&self, values: &ParamValues) -> Result<f64> {
        Ok(self.data_nll(values)? + self.constraints.nll(values)?)
    }

    fn value_and_grad(&self, values: &ParamValues, wrt: &[Parameter]) -> Result<(f64, Vec<f64>)> {
        let index: HashMap<&str, usize> =
            wrt.iter().enumerate().map(|(i, p)| (p.name(), i)).collect();
        let mut grad = vec![0.0f64; wrt.len()];
        let mut logp_total = 0.0;

        for (pdf, events, domain) in self.parts() {
            let n = events.n_events();
            let slot_index: Vec<Option<usize>> = pdf
                .slots()
                .iter()
                .map(|s| s.parameter().and_then(|p| index.get(p.name()).copied()))
                .collect();
            let ns = slot_index.len();

            let mut logp = vec![0.0f64; n];
            let mut dlogp = vec![0.0f64; n * ns];
            pdf.log_prob_grad(events, domain, values, &mut logp, &mut dlogp)?;
            logp_total += weighted_sum(&logp, events.weights());

            for (s, idx) in slot_index.iter().enumerate() {
                let Some(i) = *idx else { continue };
                let column = (0..n).map(|e| dlogp[e * ns + s]).collect::<Vec<_>>();
                grad[i] -= weighted_sum(&column, events.weights());
            }
        }

        let index_of = |name: &str| index.get(name).copied();
        let mut constraint_total = 0.0;
        for c in self.constraints.iter() {
            constraint_total += c.nll_and_grad(values, &index_of, &mut grad)?;
        }

        Ok((-logp_total + constraint_total, grad))
    }

    fn dependent_parameters(&self) -> Result<ParamSet> {
        let mut set = ParamSet::new();
        for pdf in &self.pdfs {
            set.union(&pdf.dependent_parameters(true)?)?;
        }
        set.union(&self.constraints.dependent_parameters()?)?;
        Ok(set)
    }
}
