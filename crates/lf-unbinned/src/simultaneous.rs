//! Simultaneous losses: sums of independent NLL terms.
//!
//! [`compose`] is the single construction path. It flattens its inputs eagerly,
//! so a [`SimultaneousLoss`] never holds another composite. It merges the
//! terms' constraints, refusing a parameter constrained by two terms, and
//! refuses a parameter name bound to two different parameters. The `+`
//! operators are thin sugar over it and return `Result<SimultaneousLoss>`:
//!
//! ```ignore
//! let total = ((a + b)? + c)?;
//! ```

use crate::constraint::Constraints;
use crate::event_store::EventStore;
use crate::nll::UnbinnedNll;
use crate::pdf::Pdf;
use lf_core::{Domain, Error, Loss, ParamSet, ParamValues, Parameter, Result};
use std::ops::Add;
use std::sync::Arc;

/// Anything that flattens to a list of NLL terms.
pub trait NllTerms {
    /// Flattened terms, in evaluation order.
    fn terms(&self) -> &[UnbinnedNll];
}

impl NllTerms for UnbinnedNll {
    fn terms(&self) -> &[UnbinnedNll] {
        std::slice::from_ref(self)
    }
}

impl NllTerms for SimultaneousLoss {
    fn terms(&self) -> &[UnbinnedNll] {
        &self.terms
    }
}

/// Sum of NLL terms with merged constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct SimultaneousLoss {
    terms: Vec<UnbinnedNll>,
    constraints: Constraints,
}

/// Flatten `losses` into one [`SimultaneousLoss`].
pub fn compose<'a, I, L>(losses: I) -> Result<SimultaneousLoss>
where
    I: IntoIterator<Item = &'a L>,
    L: NllTerms + ?Sized + 'a,
{
    let mut terms = Vec::new();
    let mut constraints = Constraints::new();
    let mut params = ParamSet::new();
    for loss in losses {
        for term in loss.terms() {
            constraints.merge(term.constraints())?;
            params.union(&term.all_parameters()?)?;
            terms.push(term.clone());
        }
    }
    if terms.is_empty() {
        return Err(Error::Value("cannot compose an empty list of losses".into()));
    }
    tracing::debug!(
        n_terms = terms.len(),
        n_constraints = constraints.len(),
        n_params = params.len(),
        "composed simultaneous loss"
    );
    Ok(SimultaneousLoss { terms, constraints })
}

impl SimultaneousLoss {
    /// Flattened terms.
    pub fn terms(&self) -> &[UnbinnedNll] {
        &self.terms
    }

    /// PDFs of all terms, concatenated in term order.
    pub fn pdfs(&self) -> Vec<Pdf> {
        self.terms.iter().flat_map(|t| t.pdfs().iter().cloned()).collect()
    }

    /// Datasets of all terms, concatenated in term order.
    pub fn data(&self) -> Vec<Arc<EventStore>> {
        self.terms.iter().flat_map(|t| t.data().iter().cloned()).collect()
    }

    /// Fit ranges of all terms, concatenated in term order.
    pub fn fit_ranges(&self) -> Vec<Domain> {
        self.terms.iter().flat_map(|t| t.fit_ranges().iter().cloned()).collect()
    }

    /// Union of the terms' constraints.
    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }
}

impl Loss for SimultaneousLoss {
    fn value(&self, values: &ParamValues) -> Result<f64> {
        let mut total = 0.0;
        for term in &self.terms {
            total += term.value(values)?;
        }
        Ok(total)
    }

    fn value_and_grad(&self, values: &ParamValues, wrt: &[Parameter]) -> Result<(f64, Vec<f64>)> {
        let mut total = 0.0;
        let mut grad = vec![0.0f64; wrt.len()];
        for term in &self.terms {
            let (v, g) = term.value_and_grad(values, wrt)?;
            total += v;
            for (acc, gi) in grad.iter_mut().zip(g) {
                *acc += gi;
            }
        }
        Ok((total, grad))
    }

    fn dependent_parameters(&self) -> Result<ParamSet> {
        let mut set = ParamSet::new();
        for term in &self.terms {
            set.union(&term.dependent_parameters()?)?;
        }
        Ok(set)
    }
}

macro_rules! impl_add {
    ($lhs:ty, $rhs:ty) => {
        impl Add<$rhs> for $lhs {
            type Output = Result<SimultaneousLoss>;

            fn add(self, rhs: $rhs) -> Self::Output {
                let parts: [&dyn NllTerms; 2] = [&self, &rhs];
                compose(parts)
            }
        }

        impl<'a, 'b> Add<&'b $rhs> for &'a $lhs {
            type Output = Result<SimultaneousLoss>;

            fn add(self, rhs: &'b $rhs) -> Self::Output {
                let parts: [&dyn NllTerms; 2] = [self, rhs];
                compose(parts)
            }
        }

        impl<'b> Add<&'b $rhs> for $lhs {
            type Output = Result<SimultaneousLoss>;

            fn add(self, rhs: &'b $rhs) -> Self::Output {
                let parts: [&dyn NllTerms; 2] = [&self, rhs];
                compose(parts)
            }
        }

        impl<'a> Add<$rhs> for &'a $lhs {
            type Output = Result<SimultaneousLoss>;

            fn add(self, rhs: $rhs) -> Self::Output {
                let parts: [&dyn NllTerms; 2] = [self, &rhs];
                compose(parts)
            }
        }
    };
}

impl_add!(UnbinnedNll, UnbinnedNll);
impl_add!(UnbinnedNll, SimultaneousLoss);
impl_add!(SimultaneousLoss, UnbinnedNll);
impl_add!(SimultaneousLoss, SimultaneousLoss);

#[cfg(test)]
mod tests {
    use super::*;

    fn term(name: &str, x: f64) -> UnbinnedNll {
        let pdf = Pdf::gaussian(name, "x", 0.0, 1.0);
        UnbinnedNll::new(pdf, EventStore::from_values("x", vec![x]).unwrap(), (-5.0, 5.0)).unwrap()
    }

    #[test]
    fn test_compose_flattens() {
        let (a, b, c) = (term("a", 0.1), term("b", 0.2), term("c", 0.3));
        let ab = (&a + &b).unwrap();
        let parts: [&dyn NllTerms; 2] = [&ab, &c];
        let nested = compose(parts).unwrap();
        let flat = compose([&a, &b, &c]).unwrap();
        assert_eq!(nested, flat);
        assert_eq!(nested.terms().len(), 3);
    }

    #[test]
    fn test_empty_compose_is_error() {
        let none: [&UnbinnedNll; 0] = [];
        assert!(matches!(compose(none), Err(Error::Value(_))));
    }

    #[test]
    fn test_owned_add() {
        let total = ((term("a", 0.0) + term("b", 1.0)).unwrap() + term("c", 2.0)).unwrap();
        assert_eq!(total.pdfs().len(), 3);
        assert_eq!(total.pdfs()[2].name(), "c");
    }

    #[test]
    fn test_mixed_operand_add() {
        let (a, b, c) = (term("a", 0.1), term("b", 0.2), term("c", 0.3));
        let left = ((&a + &b).unwrap() + &c).unwrap();
        let right = (&a + (&b + c.clone()).unwrap()).unwrap();
        let owned_rhs = (a.clone() + &b).unwrap();
        assert_eq!(left, right);
        assert_eq!(left.terms().len(), 3);
        assert_eq!(owned_rhs.terms(), &[a, b]);
    }
}
