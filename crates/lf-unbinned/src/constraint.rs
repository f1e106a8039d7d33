//! Prior constraints on single parameters.
//!
//! A constraint pairs a [`Parameter`] with a one-dimensional [`Pdf`] and adds
//! `-log p(value)` to the owning loss term. The constraint PDF is evaluated on
//! an unbounded domain; the term's own fit range never applies to it.

use crate::event_store::EventStore;
use crate::pdf::Pdf;
use lf_core::{Domain, Error, ParamSet, ParamValues, Parameter, Result};
use std::collections::BTreeMap;

/// A prior density on one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    param: Parameter,
    pdf: Pdf,
}

impl Constraint {
    /// Create a constraint. The PDF must be a plain one-dimensional density
    /// that normalizes on the whole real line.
    pub fn new(param: Parameter, pdf: Pdf) -> Result<Self> {
        if pdf.is_functor() {
            return Err(Error::Domain(format!(
                "constraint on '{}' uses composite pdf '{}'; constraints must be single-pdf priors",
                param.name(),
                pdf.name()
            )));
        }
        if pdf.observables().len() != 1 {
            return Err(Error::Domain(format!(
                "constraint on '{}' uses pdf '{}' over {} observables; a prior needs exactly one",
                param.name(),
                pdf.name(),
                pdf.observables().len()
            )));
        }
        if pdf.kernel().needs_finite_domain() {
            return Err(Error::Domain(format!(
                "constraint on '{}' uses pdf '{}' ({}), which cannot be normalized on an unbounded range",
                param.name(),
                pdf.name(),
                pdf.type_tag()
            )));
        }
        Ok(Self { param, pdf })
    }

    /// Constrained parameter.
    pub fn param(&self) -> &Parameter {
        &self.param
    }

    /// Prior density.
    pub fn pdf(&self) -> &Pdf {
        &self.pdf
    }

    /// `-log p(value)` at the parameter's current value.
    pub fn nll(&self, values: &ParamValues) -> Result<f64> {
        let x = values.get(&self.param);
        Ok(-self.pdf.log_prob_at_point(&[x], values)?)
    }

    /// `-log p(value)`, accumulating its gradient into `grad`.
    ///
    /// `index_of` maps a parameter name to its position in `grad`; parameters
    /// it does not know are skipped.
    pub(crate) fn nll_and_grad(
        &self,
        values: &ParamValues,
        index_of: &dyn Fn(&str) -> Option<usize>,
        grad: &mut [f64],
    ) -> Result<f64> {
        let x = values.get(&self.param);
        let point = EventStore::single(&[self.pdf.observables()[0].as_str()], &[x])?;
        let domain = Domain::unbounded(1);
        let n_slots = self.pdf.slots().len();
        let mut lp = [0.0f64; 1];
        let mut dlp = vec![0.0f64; n_slots];
        self.pdf.log_prob_grad(&point, &domain, values, &mut lp, &mut dlp)?;

        if let Some(i) = index_of(self.param.name()) {
            grad[i] -= self.pdf.dlog_prob_dx(x, values)?;
        }
        for (slot, d) in self.pdf.slots().iter().zip(&dlp) {
            if let Some(p) = slot.parameter()
                && let Some(i) = index_of(p.name())
            {
                grad[i] -= d;
            }
        }
        Ok(-lp[0])
    }
}

/// Constraints keyed by parameter name; at most one per parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    by_param: BTreeMap<String, Constraint>,
}

impl Constraints {
    /// No constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(parameter, pdf)` pairs, rejecting repeated parameters.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Parameter, Pdf)>) -> Result<Self> {
        let mut out = Self::new();
        for (param, pdf) in pairs {
            out.insert(Constraint::new(param, pdf)?)?;
        }
        Ok(out)
    }

    /// Add one constraint; a second constraint on the same parameter is an error.
    pub fn insert(&mut self, c: Constraint) -> Result<()> {
        let name = c.param().name().to_string();
        if self.by_param.contains_key(&name) {
            return Err(Error::DuplicateConstraint(name));
        }
        self.by_param.insert(name, c);
        Ok(())
    }

    /// Union with `other`; any shared parameter is an error and leaves `self` unchanged.
    pub fn merge(&mut self, other: &Constraints) -> Result<()> {
        if let Some(name) = other.by_param.keys().find(|k| self.by_param.contains_key(*k)) {
            return Err(Error::DuplicateConstraint(name.clone()));
        }
        for (k, c) in &other.by_param {
            self.by_param.insert(k.clone(), c.clone());
        }
        Ok(())
    }

    /// Constraint on a parameter, if any.
    pub fn get(&self, param: &Parameter) -> Option<&Constraint> {
        self.by_param.get(param.name())
    }

    /// Number of constrained parameters.
    pub fn len(&self) -> usize {
        self.by_param.len()
    }

    /// True if nothing is constrained.
    pub fn is_empty(&self) -> bool {
        self.by_param.is_empty()
    }

    /// Constraints in parameter-name order.
    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.by_param.values()
    }

    /// Sum of `-log p(value)` over all constraints.
    pub fn nll(&self, values: &ParamValues) -> Result<f64> {
        let mut total = 0.0;
        for c in self.by_param.values() {
            total += c.nll(values)?;
        }
        Ok(total)
    }

    /// Every constrained parameter and every parameter of the priors, fixed ones included.
    pub fn all_parameters(&self) -> Result<ParamSet> {
        let mut set = ParamSet::new();
        for c in self.by_param.values() {
            set.insert(c.param().clone())?;
            set.union(&c.pdf().dependent_parameters(false)?)?;
        }
        Ok(set)
    }

    /// Floating constrained parameters plus floating parameters of the priors.
    pub fn dependent_parameters(&self) -> Result<ParamSet> {
        let mut set = ParamSet::new();
        for c in self.by_param.values() {
            if c.param().is_floating() {
                set.insert(c.param().clone())?;
            }
            set.union(&c.pdf().dependent_parameters(true)?)?;
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constraint_nll_matches_log_density() {
        let mu = Parameter::new("mu", 1.2);
        let prior = Pdf::gaussian("mu_prior", "mu_obs", 1.6, 0.2);
        let c = Constraint::new(mu.clone(), prior.clone()).unwrap();
        let values = ParamValues::new();
        let expected = -prior.evaluate_at_point(1.2, &values).unwrap().ln();
        assert_relative_eq!(c.nll(&values).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_functor_constraint_is_domain_error() {
        let mu = Parameter::new("mu", 0.0);
        let sum = Pdf::sum(
            "mix",
            vec![Pdf::gaussian("a", "x", 0.0, 1.0), Pdf::gaussian("b", "x", 1.0, 1.0)],
            vec![0.5.into()],
        )
        .unwrap();
        let err = Constraint::new(mu, sum).unwrap_err();
        assert!(matches!(err, Error::Domain(_)));
    }

    #[test]
    fn test_prior_needing_finite_range_is_domain_error() {
        let lam = Parameter::new("lam", -0.5);
        let err = Constraint::new(lam, Pdf::exponential("lam_prior", "x", -1.0)).unwrap_err();
        assert!(matches!(err, Error::Domain(ref m) if m.contains("lam_prior")));
    }

    #[test]
    fn test_duplicate_within_pairs() {
        let mu = Parameter::new("mu", 0.0);
        let err = Constraints::from_pairs([
            (mu.clone(), Pdf::gaussian("p1", "x", 0.0, 1.0)),
            (mu, Pdf::gaussian("p2", "x", 0.0, 2.0)),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateConstraint(ref n) if n == "mu"));
    }

    #[test]
    fn test_merge_rejects_overlap_and_keeps_state() {
        let a = Parameter::new("a", 0.0);
        let b = Parameter::new("b", 0.0);
        let mut left = Constraints::from_pairs([(a.clone(), Pdf::gaussian("pa", "x", 0.0, 1.0))])
            .unwrap();
        let right = Constraints::from_pairs([
            (b.clone(), Pdf::gaussian("pb", "x", 0.0, 1.0)),
            (a.clone(), Pdf::gaussian("pa2", "x", 0.0, 1.0)),
        ])
        .unwrap();
        assert!(matches!(left.merge(&right), Err(Error::DuplicateConstraint(_))));
        assert_eq!(left.len(), 1);

        let disjoint =
            Constraints::from_pairs([(b.clone(), Pdf::gaussian("pb", "x", 0.0, 1.0))]).unwrap();
        left.merge(&disjoint).unwrap();
        assert_eq!(left.len(), 2);
        assert!(left.get(&b).is_some());
    }

    #[test]
    fn test_constraint_gradient_matches_finite_difference() {
        let mu = Parameter::new("mu", 1.3);
        let prior = Pdf::gaussian("prior", "x", 1.6, 0.2);
        let c = Constraint::new(mu.clone(), prior).unwrap();
        let values = ParamValues::new();
        let mut grad = [0.0];
        let index_of = |n: &str| (n == "mu").then_some(0);
        c.nll_and_grad(&values, &index_of, &mut grad).unwrap();

        let eps = 1e-6;
        let up = c.nll(&ParamValues::new().with(&mu, 1.3 + eps)).unwrap();
        let down = c.nll(&ParamValues::new().with(&mu, 1.3 - eps)).unwrap();
        assert_relative_eq!(grad[0], (up - down) / (2.0 * eps), epsilon = 1e-5);
    }
}
