use crate::event_store::EventStore;
use crate::math::{standard_normal_cdf, standard_normal_logpdf, standard_normal_pdf, z_times_pdf};
use crate::pdf::{UnbinnedPdf, check_out_lengths};
use lf_core::{Domain, Error, Result};

/// Truncated Gaussian PDF `N(μ, σ)` normalized on the evaluation domain.
///
/// Shape parameters: `[mu, sigma]`. With an unbounded domain this is the plain
/// normal density.
#[derive(Debug, Clone)]
pub struct GaussianPdf {
    observables: [String; 1],
}

impl GaussianPdf {
    /// Create a new Gaussian PDF over the given observable.
    pub fn new(observable: impl Into<String>) -> Self {
        Self { observables: [observable.into()] }
    }

    fn check_params(params: &[f64]) -> Result<(f64, f64)> {
        if params.len() != 2 {
            return Err(Error::Validation(format!(
                "GaussianPdf expects 2 params (mu, sigma), got {}",
                params.len()
            )));
        }
        let (mu, sigma) = (params[0], params[1]);
        if !mu.is_finite() || !sigma.is_finite() || sigma <= 0.0 {
            return Err(Error::Validation(format!(
                "GaussianPdf parameters must be finite with sigma > 0, got mu={mu}, sigma={sigma}"
            )));
        }
        Ok((mu, sigma))
    }
}

impl UnbinnedPdf for GaussianPdf {
    fn type_tag(&self) -> &'static str {
        "gauss"
    }

    fn n_params(&self) -> usize {
        2
    }

    fn observables(&self) -> &[String] {
        &self.observables
    }

    fn log_prob_batch(
        &self,
        events: &EventStore,
        domain: &Domain,
        params: &[f64],
        out: &mut [f64],
    ) -> Result<()> {
        let mut tmp_grad = vec![0.0f64; events.n_events() * self.n_params()];
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
        let (mu, sigma) = Self::check_params(params)?;
        let n = events.n_events();
        check_out_lengths("GaussianPdf", n, self.n_params(), out_logp, Some(out_grad))?;

        let xs = events.require_column(&self.observables[0])?;
        let (a, b) = domain.axis_bounds(0);

        let inv_sigma = 1.0 / sigma;
        let z_a = (a - mu) * inv_sigma;
        let z_b = (b - mu) * inv_sigma;

        // Normalization constant Z = Phi(z_b) - Phi(z_a).
        let mut z = standard_normal_cdf(z_b) - standard_normal_cdf(z_a);
        if !z.is_finite() || z <= 0.0 {
            // Underflow/degenerate: keep cost finite; this corresponds to extreme truncation.
            z = f64::MIN_POSITIVE;
        }
        let log_z = z.ln();

        // Derivatives of logZ; the boundary terms vanish on infinite sides.
        let dlogz_dmu = (standard_normal_pdf(z_a) - standard_normal_pdf(z_b)) * inv_sigma / z;
        let dlogz_dsigma = (z_times_pdf(z_a) - z_times_pdf(z_b)) * inv_sigma / z;
        let log_sigma = sigma.ln();

        for (i, &x) in xs.iter().enumerate() {
            let base = i * 2;
            if x < a || x > b {
                out_logp[i] = f64::NEG_INFINITY;
                out_grad[base] = 0.0;
                out_grad[base + 1] = 0.0;
                continue;
            }
            let z_x = (x - mu) * inv_sigma;
            out_logp[i] = standard_normal_logpdf(z_x) - log_sigma - log_z;
            // d/dmu logp = (z/σ) - d/dmu logZ
            out_grad[base] = z_x * inv_sigma - dlogz_dmu;
            // d/dsigma logp = ((z^2 - 1)/σ) - d/dsigma logZ
            out_grad[base + 1] = (z_x * z_x - 1.0) * inv_sigma - dlogz_dsigma;
        }

        Ok(())
    }

    fn dlog_prob_dx(&self, x: f64, domain: &Domain, params: &[f64]) -> Result<f64> {
        let (mu, sigma) = Self::check_params(params)?;
        let (a, b) = domain.axis_bounds(0);
        if x < a || x > b {
            return Ok(0.0);
        }
        Ok(-(x - mu) / (sigma * sigma))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn store(xs: Vec<f64>) -> EventStore {
        EventStore::from_values("x", xs).unwrap()
    }

    #[test]
    fn test_unbounded_matches_normal_logpdf() {
        let pdf = GaussianPdf::new("x");
        let events = store(vec![-1.0, 0.5, 3.0]);
        let mut out = vec![0.0; 3];
        pdf.log_prob_batch(&events, &Domain::unbounded(1), &[0.5, 2.0], &mut out).unwrap();
        for (&x, &lp) in [-1.0f64, 0.5, 3.0].iter().zip(&out) {
            let z = (x - 0.5) / 2.0;
            let expected = -0.5 * z * z - 2.0f64.ln() - 0.5 * (2.0 * std::f64::consts::PI).ln();
            assert_relative_eq!(lp, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_truncation_renormalizes() {
        let pdf = GaussianPdf::new("x");
        let domain = Domain::from_limits((0.0, f64::INFINITY), None).unwrap();
        let events = store(vec![1.0]);
        let mut out = [0.0];
        pdf.log_prob_batch(&events, &domain, &[0.0, 1.0], &mut out).unwrap();
        // Half-normal: density doubles relative to the full normal.
        let full = -0.5 - 0.5 * (2.0 * std::f64::consts::PI).ln();
        assert_relative_eq!(out[0], full + 2.0f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_outside_domain_is_zero_density() {
        let pdf = GaussianPdf::new("x");
        let domain = Domain::from_limits((0.0, 1.0), None).unwrap();
        let mut out = [0.0];
        pdf.log_prob_batch(&store(vec![2.0]), &domain, &[0.5, 1.0], &mut out).unwrap();
        assert_eq!(out[0], f64::NEG_INFINITY);
    }

    #[test]
    fn test_invalid_sigma() {
        let pdf = GaussianPdf::new("x");
        let mut out = [0.0];
        let err =
            pdf.log_prob_batch(&store(vec![0.0]), &Domain::unbounded(1), &[0.0, 0.0], &mut out);
        assert!(err.is_err());
    }

    #[test]
    fn test_dlog_prob_dx_analytic() {
        let pdf = GaussianPdf::new("x");
        let d = pdf.dlog_prob_dx(2.0, &Domain::unbounded(1), &[1.0, 0.5]).unwrap();
        assert_relative_eq!(d, -4.0, epsilon = 1e-12);
    }
}
