use crate::event_store::EventStore;
use crate::math::log_diff_exp;
use crate::pdf::{UnbinnedPdf, check_out_lengths};
use lf_core::{Domain, Error, Result};

/// Exponential-family PDF `p(x) ∝ exp(λ x)` normalized on the evaluation domain.
///
/// `λ` may take any real value, so the domain must be finite on this axis.
#[derive(Debug, Clone)]
pub struct ExponentialPdf {
    observables: [String; 1],
}

impl ExponentialPdf {
    /// Create a new exponential PDF over the given observable.
    pub fn new(observable: impl Into<String>) -> Self {
        Self { observables: [observable.into()] }
    }
}

impl UnbinnedPdf for ExponentialPdf {
    fn type_tag(&self) -> &'static str {
        "exponential"
    }

    fn n_params(&self) -> usize {
        1
    }

    fn observables(&self) -> &[String] {
        &self.observables
    }

    fn needs_finite_domain(&self) -> bool {
        true
    }

    fn log_prob_batch(
        &self,
        events: &EventStore,
        domain: &Domain,
        params: &[f64],
        out: &mut [f64],
    ) -> Result<()> {
        let mut tmp_grad = vec![0.0f64; events.n_events()];
        self.log_prob_grad_batch(events, domain, params, out, &mut tmp_grad)
    }

    fn log_prob_grad_batch(
        &self,
        events: &EventStore,
        domain: &Domain,
        params: &[f64],
        out_logp: &mut [f64],
        out_grad: &mut [f64],
    ) -> Result<()> {
        if params.len() != 1 {
            return Err(Error::Validation(format!(
                "ExponentialPdf expects 1 param (lambda), got {}",
                params.len()
            )));
        }
        let lambda = params[0];
        if !lambda.is_finite() {
            return Err(Error::Validation(format!(
                "ExponentialPdf parameter must be finite, got lambda={lambda}"
            )));
        }
        let n = events.n_events();
        check_out_lengths("ExponentialPdf", n, 1, out_logp, Some(out_grad))?;

        let xs = events.require_column(&self.observables[0])?;
        let (a, b) = domain.axis_bounds(0);
        if !(a.is_finite() && b.is_finite() && a < b) {
            return Err(Error::Validation(format!(
                "ExponentialPdf needs a finite range with low < high, got ({a}, {b})"
            )));
        }

        // logZ = log ∫_a^b exp(λ x) dx
        let (log_z, ex) = logz_and_ex(lambda, a, b);

        for (i, &x) in xs.iter().enumerate() {
            if x < a || x > b {
                out_logp[i] = f64::NEG_INFINITY;
                out_grad[i] = 0.0;
            } else {
                out_logp[i] = lambda * x - log_z;
                out_grad[i] = x - ex;
            }
        }

        Ok(())
    }
}

/// Return `(logZ, E[x])` for `p(x) ∝ exp(λ x)` on a finite `[a, b]` with `a < b`.
fn logz_and_ex(lambda: f64, a: f64, b: f64) -> (f64, f64) {
    let uniform = ((b - a).ln(), 0.5 * (a + b));
    if lambda.abs() < 1e-12 {
        return uniform;
    }

    let t_a = lambda * a;
    let t_b = lambda * b;
    let (hi_t, lo_t, x_hi, x_lo) = if t_b >= t_a { (t_b, t_a, b, a) } else { (t_a, t_b, a, b) };
    if hi_t == lo_t {
        return uniform;
    }
    let log_z = log_diff_exp(hi_t, lo_t) - lambda.abs().ln();

    // E[x] = d/dλ logZ = (x_hi - x_lo*r)/(1-r) - 1/λ, where r=exp(lo-hi).
    let r = (lo_t - hi_t).exp();
    let denom = 1.0 - r;
    if denom <= 0.0 {
        return uniform;
    }
    let ex = (x_hi - x_lo * r) / denom - 1.0 / lambda;
    (log_z, ex)
}
