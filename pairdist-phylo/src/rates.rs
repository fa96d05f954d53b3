//! Discrete gamma model of among-site rate heterogeneity.
//!
//! The continuous gamma has shape α and rate β aliased to α, so the mean
//! rate is 1. It is cut into `ncat` equiprobable categories and each
//! category is represented by its conditional mean (Yang 1994).

use pairdist_core::{PairdistError, Result};

/// Bounds used when the shape parameter is optimised.
pub const ALPHA_BOUNDS: (f64, f64) = (0.05, 100.0);

/// Discretised gamma rate distribution.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GammaRates {
    ncat: usize,
    alpha: f64,
    rates: Vec<f64>,
}

impl GammaRates {
    /// Build a discrete gamma with `ncat` categories and shape `alpha`.
    ///
    /// # Examples
    ///
    /// ```
    /// use pairdist_phylo::rates::GammaRates;
    ///
    /// let g = GammaRates::new(4, 0.5).unwrap();
    /// let mean: f64 = g.rates().iter().sum::<f64>() / 4.0;
    /// assert!((mean - 1.0).abs() < 1e-9);
    /// ```
    pub fn new(ncat: usize, alpha: f64) -> Result<Self> {
        if ncat == 0 {
            return Err(PairdistError::InvalidInput(
                "number of rate categories must be at least 1".into(),
            ));
        }
        validate_alpha(alpha)?;
        Ok(Self {
            ncat,
            alpha,
            rates: discretise(ncat, alpha),
        })
    }

    /// A single category of rate 1 (no rate heterogeneity).
    pub fn uniform() -> Self {
        Self {
            ncat: 1,
            alpha: 1.0,
            rates: vec![1.0],
        }
    }

    pub fn ncat(&self) -> usize {
        self.ncat
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// The rate parameter, aliased to the shape.
    pub fn beta(&self) -> f64 {
        self.alpha
    }

    /// Per-category rate multipliers, in increasing order.
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// Probability of each category (always `1/ncat`).
    pub fn probability(&self) -> f64 {
        1.0 / self.ncat as f64
    }

    /// Change the shape parameter and recompute the category rates.
    pub fn set_alpha(&mut self, alpha: f64) -> Result<()> {
        validate_alpha(alpha)?;
        self.alpha = alpha;
        self.rates = discretise(self.ncat, alpha);
        Ok(())
    }

    /// Whether there is anything to optimise.
    pub fn is_variable(&self) -> bool {
        self.ncat > 1
    }
}

impl Default for GammaRates {
    /// Four categories with α = 1.
    fn default() -> Self {
        Self {
            ncat: 4,
            alpha: 1.0,
            rates: discretise(4, 1.0),
        }
    }
}

fn validate_alpha(alpha: f64) -> Result<()> {
    if !(alpha.is_finite() && alpha > 0.0) {
        return Err(PairdistError::InvalidInput(format!(
            "gamma shape must be positive and finite, got {}",
            alpha
        )));
    }
    Ok(())
}

/// Conditional-mean rates of `ncat` equiprobable gamma categories.
fn discretise(ncat: usize, alpha: f64) -> Vec<f64> {
    if ncat == 1 {
        return vec![1.0];
    }
    let k = ncat as f64;
    // With β = α, the mean of x over (q_{i-1}, q_i) is K·[P(α+1, αq_i) − P(α+1, αq_{i-1})].
    let mut prev = 0.0;
    let mut rates = Vec::with_capacity(ncat);
    for i in 1..=ncat {
        let upper = if i == ncat {
            1.0
        } else {
            let y = gamma_quantile(alpha, i as f64 / k);
            reg_lower_gamma(alpha + 1.0, y)
        };
        rates.push(k * (upper - prev));
        prev = upper;
    }
    let mean = rates.iter().sum::<f64>() / k;
    if mean > 0.0 {
        for r in rates.iter_mut() {
            *r /= mean;
        }
    }
    rates
}

// ── Incomplete gamma ──

/// Natural log of the gamma function (Lanczos approximation, g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 8] = [
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];
    use std::f64::consts::PI;

    if x < 0.5 {
        // Reflection formula: Γ(x) = π / (sin(πx) · Γ(1-x))
        (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut ag = 0.99999999999980993_f64;
        for (i, &c) in COEFFS.iter().enumerate() {
            ag += c / (x + i as f64 + 1.0);
        }
        let t = x + 7.5;
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}

/// Regularized lower incomplete gamma P(a, x) for `a > 0`, `x >= 0`.
pub fn reg_lower_gamma(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x.is_infinite() {
        return 1.0;
    }
    if x < a + 1.0 {
        series(a, x)
    } else {
        1.0 - continued_fraction(a, x)
    }
}

/// Series expansion for P(a, x).
fn series(a: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 2000;
    const EPS: f64 = 1e-15;
    let ln_prefix = a * x.ln() - x - ln_gamma(a);

    let mut sum = 1.0 / a;
    let mut term = sum;
    for n in 1..=MAX_ITER {
        term *= x / (a + n as f64);
        sum += term;
        if term.abs() < sum.abs() * EPS {
            break;
        }
    }
    (sum * ln_prefix.exp()).min(1.0)
}

/// Continued fraction for Q(a, x) = 1 - P(a, x) via modified Lentz's method.
fn continued_fraction(a: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 2000;
    const EPS: f64 = 1e-15;
    const TINY: f64 = 1e-300;
    let ln_prefix = a * x.ln() - x - ln_gamma(a);

    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..=MAX_ITER {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    (h * ln_prefix.exp()).clamp(0.0, 1.0)
}

/// Quantile of the unit-rate gamma with shape `a`: the `x` with P(a, x) = p.
///
/// Safeguarded Newton iteration on `ln x`, falling back to bisection
/// whenever a step leaves the current bracket.
pub fn gamma_quantile(a: f64, p: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let mut lo = f64::MIN_POSITIVE.ln();
    let mut hi = (a + 10.0 * a.sqrt() + 10.0).ln();
    while reg_lower_gamma(a, hi.exp()) < p {
        hi += 1.0;
    }
    let ln_norm = ln_gamma(a);

    let mut lx = 0.5 * (lo + hi);
    for _ in 0..300 {
        let x = lx.exp();
        let f = reg_lower_gamma(a, x) - p;
        if f < 0.0 {
            lo = lx;
        } else {
            hi = lx;
        }
        // dP/d(ln x) = x · pdf(x)
        let slope = (a * lx - x - ln_norm).exp();
        let newton = lx - f / slope;
        let next = if slope > 0.0 && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
        if (next - lx).abs() < 1e-13 || hi - lo < 1e-13 {
            return next.exp();
        }
        lx = next;
    }
    lx.exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_category_is_unit_rate() {
        let g = GammaRates::new(1, 0.3).unwrap();
        assert_eq!(g.rates(), &[1.0]);
        assert!(!g.is_variable());
    }

    #[test]
    fn rates_average_to_one() {
        for &alpha in &[0.05, 0.2, 0.5, 1.0, 2.0, 10.0, 100.0] {
            for ncat in [2, 4, 8] {
                let g = GammaRates::new(ncat, alpha).unwrap();
                let mean: f64 = g.rates().iter().sum::<f64>() / ncat as f64;
                assert!((mean - 1.0).abs() < 1e-9, "alpha {} ncat {} mean {}", alpha, ncat, mean);
                assert!(g.rates().windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }

    #[test]
    fn known_discretisation() {
        // Yang (1994), alpha = 0.5, four categories.
        let g = GammaRates::new(4, 0.5).unwrap();
        let expected = [0.0334, 0.2519, 0.8203, 2.8944];
        for (r, e) in g.rates().iter().zip(expected) {
            assert!((r - e).abs() < 1e-3, "rate {} vs {}", r, e);
        }
    }

    #[test]
    fn beta_aliases_alpha() {
        let mut g = GammaRates::default();
        assert_eq!(g.ncat(), 4);
        g.set_alpha(2.5).unwrap();
        assert_eq!(g.beta(), 2.5);
        assert!(g.set_alpha(-1.0).is_err());
        assert!(GammaRates::new(0, 1.0).is_err());
    }

    #[test]
    fn large_alpha_approaches_uniform() {
        let g = GammaRates::new(4, 100.0).unwrap();
        for r in g.rates() {
            assert!((r - 1.0).abs() < 0.25, "rate {}", r);
        }
    }

    #[test]
    fn incomplete_gamma_exponential_case() {
        // P(1, x) = 1 - e^{-x}
        for &x in &[0.1, 1.0, 3.0, 10.0] {
            let p = reg_lower_gamma(1.0, x);
            assert!((p - (1.0 - (-x).exp())).abs() < 1e-12, "x {} p {}", x, p);
        }
    }

    #[test]
    fn quantile_inverts_cdf() {
        for &a in &[0.05, 0.5, 1.0, 4.0, 50.0] {
            for &p in &[0.01, 0.25, 0.5, 0.75, 0.99] {
                let x = gamma_quantile(a, p);
                let back = reg_lower_gamma(a, x);
                assert!((back - p).abs() < 1e-9, "a {} p {} x {} back {}", a, p, x, back);
            }
        }
    }

    #[test]
    fn ln_gamma_integers() {
        assert!(ln_gamma(1.0).abs() < 1e-10);
        assert!((ln_gamma(5.0) - 24.0f64.ln()).abs() < 1e-10);
    }
}
