use crate::event_store::EventStore;
use crate::math::logsumexp;
use crate::pdf::{UnbinnedPdf, check_out_lengths};
use lf_core::{Domain, Error, Result};
use std::sync::Arc;

/// Weighted sum of normalized PDFs over the same observables.
///
/// `p(x) = Σ_k f_k p_k(x)` with `f_{K-1} = 1 - Σ_{k<K-1} f_k`. Parameter layout:
/// the `K-1` free fractions followed by each component's parameters in order.
#[derive(Debug, Clone)]
pub struct SumPdf {
    components: Vec<Arc<dyn UnbinnedPdf>>,
    offsets: Vec<usize>,
    n_params: usize,
}

impl SumPdf {
    /// Build from component kernels (at least two, identical observables).
    pub fn new(components: Vec<Arc<dyn UnbinnedPdf>>) -> Result<Self> {
        if components.len() < 2 {
            return Err(Error::Validation(format!(
                "SumPdf needs at least 2 components, got {}",
                components.len()
            )));
        }
        let obs = components[0].observables();
        if let Some(bad) = components.iter().find(|c| c.observables() != obs) {
            return Err(Error::Validation(format!(
                "SumPdf components must share observables: {:?} vs {:?}",
                obs,
                bad.observables()
            )));
        }
        let mut offsets = Vec::with_capacity(components.len());
        let mut n_params = components.len() - 1;
        for c in &components {
            offsets.push(n_params);
            n_params += c.n_params();
        }
        Ok(Self { components, offsets, n_params })
    }

    fn fractions(&self, params: &[f64]) -> Result<Vec<f64>> {
        let k = self.components.len();
        let mut fracs = params[..k - 1].to_vec();
        for (i, &f) in fracs.iter().enumerate() {
            if !(0.0..=1.0).contains(&f) {
                return Err(Error::Validation(format!(
                    "SumPdf fraction {i} must lie in [0, 1], got {f}"
                )));
            }
        }
        let last = 1.0 - fracs.iter().sum::<f64>();
        if last < -1e-12 {
            return Err(Error::Validation(format!(
                "SumPdf fractions sum to {} > 1",
                1.0 - last
            )));
        }
        fracs.push(last.max(0.0));
        Ok(fracs)
    }
}

impl UnbinnedPdf for SumPdf {
    fn type_tag(&self) -> &'static str {
        "sum"
    }

    fn n_params(&self) -> usize {
        self.n_params
    }

    fn observables(&self) -> &[String] {
        self.components[0].observables()
    }

    fn is_functor(&self) -> bool {
        true
    }

    fn log_prob_batch(
        &self,
        events: &EventStore,
        domain: &Domain,
        params: &[f64],
        out: &mut [f64],
    ) -> Result<()> {
        let mut tmp_grad = vec![0.0f64; events.n_events() * self.n_params];
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
        if params.len() != self.n_params {
            return Err(Error::Validation(format!(
                "SumPdf expects {} params, got {}",
                self.n_params,
                params.len()
            )));
        }
        let n = events.n_events();
        check_out_lengths("SumPdf", n, self.n_params, out_logp, Some(out_grad))?;

        let fracs = self.fractions(params)?;
        let k = self.components.len();

        let mut logps: Vec<Vec<f64>> = Vec::with_capacity(k);
        let mut dlogps: Vec<Vec<f64>> = Vec::with_capacity(k);
        for (c, &off) in self.components.iter().zip(&self.offsets) {
            let np = c.n_params();
            let mut lp = vec![0.0f64; n];
            let mut dlp = vec![0.0f64; n * np];
            c.log_prob_grad_batch(events, domain, &params[off..off + np], &mut lp, &mut dlp)?;
            logps.push(lp);
            dlogps.push(dlp);
        }

        let log_fracs: Vec<f64> =
            fracs.iter().map(|&f| if f > 0.0 { f.ln() } else { f64::NEG_INFINITY }).collect();
        let mut terms = vec![0.0f64; k];
        let mut q = vec![0.0f64; k];
        for i in 0..n {
            for p in 0..k {
                terms[p] = log_fracs[p] + logps[p][i];
            }
            let logf = logsumexp(&terms);
            out_logp[i] = logf;

            let row = &mut out_grad[i * self.n_params..(i + 1) * self.n_params];
            if !logf.is_finite() {
                row.fill(0.0);
                continue;
            }
            for p in 0..k {
                q[p] = (logps[p][i] - logf).exp();
            }
            // d logp / d f_j = (p_j - p_last) / p
            for j in 0..k - 1 {
                row[j] = q[j] - q[k - 1];
            }
            // d logp / d θ_p = f_p p_p / p * d log p_p / d θ_p
            for (p, c) in self.components.iter().enumerate() {
                let np = c.n_params();
                let r = fracs[p] * q[p];
                let off = self.offsets[p];
                for m in 0..np {
                    row[off + m] = r * dlogps[p][i * np + m];
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{ExponentialPdf, GaussianPdf};
    use approx::assert_relative_eq;

    fn kernel() -> SumPdf {
        SumPdf::new(vec![Arc::new(GaussianPdf::new("x")), Arc::new(ExponentialPdf::new("x"))])
            .unwrap()
    }

    #[test]
    fn test_mixture_density() {
        let pdf = kernel();
        let domain = Domain::from_limits((0.0, 10.0), None).unwrap();
        let events = EventStore::from_values("x", vec![4.0]).unwrap();
        let params = [0.25, 5.0, 1.0, -0.3];

        let mut lp_g = [0.0];
        GaussianPdf::new("x").log_prob_batch(&events, &domain, &[5.0, 1.0], &mut lp_g).unwrap();
        let mut lp_e = [0.0];
        ExponentialPdf::new("x").log_prob_batch(&events, &domain, &[-0.3], &mut lp_e).unwrap();

        let mut out = [0.0];
        pdf.log_prob_batch(&events, &domain, &params, &mut out).unwrap();
        let expected = (0.25 * lp_g[0].exp() + 0.75 * lp_e[0].exp()).ln();
        assert_relative_eq!(out[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_bad_fractions() {
        let pdf = kernel();
        let domain = Domain::from_limits((0.0, 10.0), None).unwrap();
        let events = EventStore::from_values("x", vec![4.0]).unwrap();
        let mut out = [0.0];
        assert!(pdf.log_prob_batch(&events, &domain, &[1.5, 5.0, 1.0, -0.3], &mut out).is_err());
    }

    #[test]
    fn test_observable_mismatch() {
        let err = SumPdf::new(vec![Arc::new(GaussianPdf::new("x")), Arc::new(GaussianPdf::new("y"))]);
        assert!(err.is_err());
    }
}
