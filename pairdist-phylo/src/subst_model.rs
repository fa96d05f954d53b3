//! Substitution model contract for N-state time-reversible models.
//!
//! Every model is described by a symmetric exchangeability matrix S and
//! equilibrium frequencies π. The rate matrix is `Q_ij = S_ij π_j`
//! (rows sum to zero) scaled so the mean rate `-Σ π_i Q_ii` is 1.
//! Transition probabilities come from the eigensystem of the symmetrised
//! matrix `B = Π^½ Q Π^-½`.

use pairdist_core::{PairdistError, Result};

/// Smallest equilibrium frequency kept before renormalising.
pub const MIN_FREQUENCY: f64 = 1e-8;

/// A named, bounded, real-valued model parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: &'static str,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Parameter {
    pub fn new(name: &'static str, value: f64, bounds: (f64, f64)) -> Self {
        Self {
            name,
            value,
            lower: bounds.0,
            upper: bounds.1,
        }
    }
}

/// Trait for substitution models of any state count.
///
/// Implementors own their parameters and keep a [`ReversibleCore`] in sync
/// with them; everything derived (rate matrix, transition probabilities and
/// their branch-length derivatives) is provided on top of the core.
pub trait SubstitutionModel: Send + Sync {
    /// Model name as accepted by [`crate::factory::create_model`].
    fn name(&self) -> &str;

    /// Exchangeabilities, frequencies and eigensystem.
    fn core(&self) -> &ReversibleCore;

    /// Free parameters with their current values and bounds.
    fn parameters(&self) -> Vec<Parameter>;

    /// Set a named parameter.
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()>;

    /// Replace the equilibrium frequencies.
    fn set_frequencies(&mut self, freqs: &[f64]) -> Result<()>;

    fn clone_box(&self) -> Box<dyn SubstitutionModel>;

    /// Number of character states (4 for DNA, 20 for protein).
    fn n_states(&self) -> usize {
        self.core().n_states()
    }

    /// Equilibrium frequencies, one per state.
    fn frequencies(&self) -> &[f64] {
        self.core().frequencies()
    }

    /// Symmetric exchangeability matrix S (zero diagonal).
    fn exchangeabilities(&self) -> Vec<Vec<f64>> {
        self.core().exchangeabilities()
    }

    /// Instantaneous rate matrix Q, normalised to mean rate 1.
    fn rate_matrix(&self) -> Vec<Vec<f64>> {
        let core = self.core();
        to_rows(&core.rate_matrix, core.n_states())
    }

    /// Transition probability matrix P(t) = exp(Qt).
    fn transition_probs(&self, t: f64) -> Vec<Vec<f64>> {
        let n = self.n_states();
        let mut p = vec![0.0; n * n];
        self.core().eigen().probabilities_into(t, &mut p);
        to_rows(&p, n)
    }

    /// P(t) together with its first and second derivatives in `t`.
    fn transition_derivatives(&self, t: f64) -> TransitionDerivatives {
        let n = self.n_states();
        let mut d = TransitionDerivatives::zeros(n);
        self.core()
            .eigen()
            .derivatives_into(t, &mut d.p, &mut d.d1, &mut d.d2);
        d
    }

    /// Value of a named parameter.
    fn parameter(&self, name: &str) -> Result<f64> {
        self.parameters()
            .into_iter()
            .find(|p| p.name == name)
            .map(|p| p.value)
            .ok_or_else(|| {
                PairdistError::InvalidInput(format!(
                    "model {} has no parameter '{}'",
                    self.name(),
                    name
                ))
            })
    }

    /// Number of free parameters in the model (excludes branch lengths).
    fn n_free_params(&self) -> usize {
        self.parameters().len()
    }
}

impl Clone for Box<dyn SubstitutionModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl std::fmt::Debug for dyn SubstitutionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubstitutionModel")
            .field("name", &self.name())
            .field("n_states", &self.n_states())
            .finish()
    }
}

/// Flat row-major P(t), dP/dt and d²P/dt².
#[derive(Debug, Clone)]
pub struct TransitionDerivatives {
    pub n: usize,
    pub p: Vec<f64>,
    pub d1: Vec<f64>,
    pub d2: Vec<f64>,
}

impl TransitionDerivatives {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            p: vec![0.0; n * n],
            d1: vec![0.0; n * n],
            d2: vec![0.0; n * n],
        }
    }
}

/// Exchangeabilities, frequencies and the derived rate matrix and
/// eigensystem of a reversible model.
#[derive(Debug, Clone)]
pub struct ReversibleCore {
    n: usize,
    exchangeabilities: Vec<f64>,
    frequencies: Vec<f64>,
    rate_matrix: Vec<f64>,
    eigen: Eigensystem,
}

impl ReversibleCore {
    /// Build from a flat symmetric `n × n` exchangeability matrix and `n`
    /// frequencies.
    pub fn new(exchangeabilities: Vec<f64>, frequencies: &[f64]) -> Result<Self> {
        let n = frequencies.len();
        if exchangeabilities.len() != n * n {
            return Err(PairdistError::Dimension {
                expected: n * n,
                found: exchangeabilities.len(),
            });
        }
        let frequencies = normalise_frequencies(frequencies)?;
        Ok(Self::from_valid(exchangeabilities, frequencies))
    }

    /// Build from inputs already known to be well formed: `n * n`
    /// exchangeabilities and strictly positive frequencies summing to 1.
    pub(crate) fn from_valid(exchangeabilities: Vec<f64>, frequencies: Vec<f64>) -> Self {
        let n = frequencies.len();
        let rate_matrix = build_rate_matrix(&exchangeabilities, &frequencies);
        let eigen = Eigensystem::new(&rate_matrix, &frequencies);
        Self {
            n,
            exchangeabilities,
            frequencies,
            rate_matrix,
            eigen,
        }
    }

    pub fn n_states(&self) -> usize {
        self.n
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn exchangeabilities(&self) -> Vec<Vec<f64>> {
        to_rows(&self.exchangeabilities, self.n)
    }

    pub fn eigen(&self) -> &Eigensystem {
        &self.eigen
    }
}

/// Check length and sign, floor at [`MIN_FREQUENCY`] and rescale to sum 1.
pub fn normalise_frequencies(freqs: &[f64]) -> Result<Vec<f64>> {
    if freqs.iter().any(|f| !f.is_finite() || *f < 0.0) {
        return Err(PairdistError::InvalidInput(
            "frequencies must be finite and non-negative".into(),
        ));
    }
    let floored: Vec<f64> = freqs.iter().map(|f| f.max(MIN_FREQUENCY)).collect();
    let total: f64 = floored.iter().sum();
    Ok(floored.into_iter().map(|f| f / total).collect())
}

/// Build a normalized rate matrix Q from exchangeabilities S and frequencies π.
///
/// Q\[i\]\[j\] = S\[i\]\[j\] * π\[j\] for i != j, rows sum to 0,
/// normalized so -Σ π_i Q_ii = 1.
pub(crate) fn build_rate_matrix(exchangeabilities: &[f64], freqs: &[f64]) -> Vec<f64> {
    let n = freqs.len();
    let mut q = vec![0.0; n * n];
    for i in 0..n {
        let mut off_diag = 0.0;
        for j in 0..n {
            if i != j {
                q[i * n + j] = exchangeabilities[i * n + j] * freqs[j];
                off_diag += q[i * n + j];
            }
        }
        q[i * n + i] = -off_diag;
    }

    let mu: f64 = (0..n).map(|i| -freqs[i] * q[i * n + i]).sum();
    if mu > 0.0 {
        for v in q.iter_mut() {
            *v /= mu;
        }
    }
    q
}

/// Spectral decomposition `Q = R Λ L` of a reversible rate matrix, with
/// `L = R^-1`, so that `P(t) = R exp(Λt) L`.
#[derive(Debug, Clone)]
pub struct Eigensystem {
    n: usize,
    values: Vec<f64>,
    right: Vec<f64>,
    left: Vec<f64>,
}

impl Eigensystem {
    /// Decompose a flat rate matrix via its symmetrised form.
    pub fn new(q: &[f64], freqs: &[f64]) -> Self {
        let n = freqs.len();
        let sqrt_pi: Vec<f64> = freqs.iter().map(|f| f.sqrt()).collect();

        // Symmetrize: B = diag(sqrt(pi)) * Q * diag(1/sqrt(pi))
        let mut b = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                b[i * n + j] = sqrt_pi[i] * q[i * n + j] / sqrt_pi[j];
            }
        }
        // Clean up rounding so Jacobi sees an exactly symmetric matrix.
        for i in 0..n {
            for j in (i + 1)..n {
                let m = 0.5 * (b[i * n + j] + b[j * n + i]);
                b[i * n + j] = m;
                b[j * n + i] = m;
            }
        }

        let (values, u) = jacobi_eigen(b, n);

        let mut right = vec![0.0; n * n];
        let mut left = vec![0.0; n * n];
        for i in 0..n {
            for k in 0..n {
                right[i * n + k] = u[i * n + k] / sqrt_pi[i];
                left[k * n + i] = u[i * n + k] * sqrt_pi[i];
            }
        }
        Self {
            n,
            values,
            right,
            left,
        }
    }

    pub fn n_states(&self) -> usize {
        self.n
    }

    pub fn eigenvalues(&self) -> &[f64] {
        &self.values
    }

    /// Right eigenvectors `R`, row-major (`R[i * n + k]`).
    pub fn right(&self) -> &[f64] {
        &self.right
    }

    /// Left eigenvectors `L = R^-1`, row-major (`L[k * n + j]`).
    pub fn left(&self) -> &[f64] {
        &self.left
    }

    /// Write P(t) row-major into `out`. Negative round-off is clamped to 0.
    pub fn probabilities_into(&self, t: f64, out: &mut [f64]) {
        let n = self.n;
        let exps: Vec<f64> = self.values.iter().map(|&l| (l * t).exp()).collect();
        for i in 0..n {
            for j in 0..n {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += self.right[i * n + k] * exps[k] * self.left[k * n + j];
                }
                out[i * n + j] = sum.max(0.0);
            }
        }
    }

    /// Write P(t), dP/dt and d²P/dt² row-major.
    pub fn derivatives_into(&self, t: f64, p: &mut [f64], d1: &mut [f64], d2: &mut [f64]) {
        let n = self.n;
        let exps: Vec<f64> = self.values.iter().map(|&l| (l * t).exp()).collect();
        for i in 0..n {
            for j in 0..n {
                let (mut s0, mut s1, mut s2) = (0.0, 0.0, 0.0);
                for k in 0..n {
                    let w = self.right[i * n + k] * exps[k] * self.left[k * n + j];
                    let l = self.values[k];
                    s0 += w;
                    s1 += w * l;
                    s2 += w * l * l;
                }
                p[i * n + j] = s0.max(0.0);
                d1[i * n + j] = s1;
                d2[i * n + j] = s2;
            }
        }
    }
}

/// Cyclic Jacobi eigendecomposition of a flat symmetric `n × n` matrix.
///
/// Returns `(eigenvalues, eigenvectors)` where `eigenvectors[i * n + k]` is
/// the i-th component of the k-th eigenvector.
pub(crate) fn jacobi_eigen(mut a: Vec<f64>, n: usize) -> (Vec<f64>, Vec<f64>) {
    const MAX_SWEEPS: usize = 100;

    let mut v = vec![0.0; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }
    let scale: f64 = a.iter().map(|x| x * x).sum::<f64>().max(f64::MIN_POSITIVE);

    for _ in 0..MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| a[i * n + j] * a[i * n + j])
            .sum();
        if off <= 1e-30 * scale {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[p * n + q];
                if apq.abs() < f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[q * n + q] - a[p * n + p]) / (2.0 * apq);
                let t = if theta >= 0.0 {
                    1.0 / (theta + (theta * theta + 1.0).sqrt())
                } else {
                    -1.0 / (-theta + (theta * theta + 1.0).sqrt())
                };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[k * n + p];
                    let akq = a[k * n + q];
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p * n + k];
                    let aqk = a[q * n + k];
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[k * n + p];
                    let vkq = v[k * n + q];
                    v[k * n + p] = c * vkp - s * vkq;
                    v[k * n + q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let values = (0..n).map(|i| a[i * n + i]).collect();
    (values, v)
}

/// Split a flat row-major matrix into rows.
pub(crate) fn to_rows(flat: &[f64], n: usize) -> Vec<Vec<f64>> {
    flat.chunks(n.max(1)).map(|r| r.to_vec()).collect()
}

/// Flatten a square matrix given as rows, checking its shape.
pub(crate) fn flatten_square(rows: &[Vec<f64>], n: usize) -> Result<Vec<f64>> {
    if rows.len() != n {
        return Err(PairdistError::Dimension {
            expected: n,
            found: rows.len(),
        });
    }
    let mut flat = Vec::with_capacity(n * n);
    for row in rows {
        if row.len() != n {
            return Err(PairdistError::Dimension {
                expected: n,
                found: row.len(),
            });
        }
        flat.extend_from_slice(row);
    }
    Ok(flat)
}
