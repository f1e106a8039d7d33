//! Numerically stable helpers shared by the PDF kernels.

use statrs::function::erf::erfc;
use std::f64::consts::SQRT_2;

/// `ln(sqrt(2π))`.
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Standard normal log-density.
#[inline]
pub(crate) fn standard_normal_logpdf(z: f64) -> f64 {
    -0.5 * z * z - LN_SQRT_2PI
}

/// Standard normal density; exactly 0 at `±inf`.
#[inline]
pub(crate) fn standard_normal_pdf(z: f64) -> f64 {
    if z.is_infinite() { 0.0 } else { standard_normal_logpdf(z).exp() }
}

/// Standard normal CDF via `erfc` (accurate in the lower tail).
#[inline]
pub(crate) fn standard_normal_cdf(z: f64) -> f64 {
    if z == f64::NEG_INFINITY {
        return 0.0;
    }
    if z == f64::INFINITY {
        return 1.0;
    }
    0.5 * erfc(-z / SQRT_2)
}

/// `z * phi(z)`, taken as 0 at `±inf`.
#[inline]
pub(crate) fn z_times_pdf(z: f64) -> f64 {
    if z.is_infinite() { 0.0 } else { z * standard_normal_pdf(z) }
}

/// `log(exp(a) - exp(b))` for `a >= b`.
#[inline]
pub(crate) fn log_diff_exp(a: f64, b: f64) -> f64 {
    if b == f64::NEG_INFINITY {
        return a;
    }
    a + (-(b - a).exp()).ln_1p()
}

/// `log(sum(exp(x)))` over a slice; `-inf` for an empty or all `-inf` input.
pub(crate) fn logsumexp(xs: &[f64]) -> f64 {
    let m = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if m == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if m == f64::INFINITY {
        return f64::INFINITY;
    }
    m + xs.iter().map(|&x| (x - m).exp()).sum::<f64>().ln()
}
