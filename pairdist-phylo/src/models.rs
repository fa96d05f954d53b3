//! Nucleotide substitution models.
//!
//! All models share the GTR parameterisation over the ACGT state order.
//! Exchangeabilities are named after the GTR convention:
//! `a` = C↔T, `b` = A↔T, `c` = G↔T, `d` = A↔C, `e` = C↔G, with A↔G fixed
//! at 1. Base frequencies are expressed through `theta` = G+C,
//! `theta1` = A/(A+T) and `theta2` = G/(G+C).

use pairdist_core::{PairdistError, Result};

use crate::subst_model::{Parameter, ReversibleCore, SubstitutionModel};

/// Number of nucleotide states in DNA models.
pub const NUM_STATES: usize = 4;

/// Bounds for kappa-like ratios and GTR exchangeabilities.
pub const RATE_BOUNDS: (f64, f64) = (1e-3, 100.0);

/// Bounds for the GC-content and within-class frequency ratios.
pub const THETA_BOUNDS: (f64, f64) = (1e-3, 1.0 - 1e-3);

/// Names of the GTR exchangeability parameters.
pub const GTR_NAMES: [&str; 5] = ["a", "b", "c", "d", "e"];

const A: usize = 0;
const C: usize = 1;
const G: usize = 2;
const T: usize = 3;

/// Map a nucleotide byte to an index (A=0, C=1, G=2, T=3).
///
/// Accepts both upper and lower case. Returns `None` for non-standard bases.
pub fn nucleotide_index(b: u8) -> Option<usize> {
    match b.to_ascii_uppercase() {
        b'A' => Some(A),
        b'C' => Some(C),
        b'G' => Some(G),
        b'T' | b'U' => Some(T),
        _ => None,
    }
}

/// The nucleotide model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NucleotideKind {
    Jc69,
    K80,
    Hky85,
    Tn93,
    T92,
    F84,
    Gtr,
}

impl NucleotideKind {
    pub fn name(&self) -> &'static str {
        match self {
            NucleotideKind::Jc69 => "JC69",
            NucleotideKind::K80 => "K80",
            NucleotideKind::Hky85 => "HKY85",
            NucleotideKind::Tn93 => "TN93",
            NucleotideKind::T92 => "T92",
            NucleotideKind::F84 => "F84",
            NucleotideKind::Gtr => "GTR",
        }
    }

    /// Whether the base frequencies are free parameters.
    pub fn has_free_frequencies(&self) -> bool {
        !matches!(self, NucleotideKind::Jc69 | NucleotideKind::K80)
    }
}

/// Parameter values for every nucleotide family. Unused fields sit at their
/// neutral values.
#[derive(Debug, Clone, PartialEq)]
struct NucleotideParams {
    kappa: f64,
    kappa1: f64,
    kappa2: f64,
    /// GTR exchangeabilities a..e.
    gtr: [f64; 5],
    theta: f64,
    theta1: f64,
    theta2: f64,
}

impl Default for NucleotideParams {
    fn default() -> Self {
        Self {
            kappa: 1.0,
            kappa1: 1.0,
            kappa2: 1.0,
            gtr: [1.0; 5],
            theta: 0.5,
            theta1: 0.5,
            theta2: 0.5,
        }
    }
}

impl NucleotideParams {
    fn frequencies(&self) -> [f64; 4] {
        let (th, th1, th2) = (self.theta, self.theta1, self.theta2);
        let mut f = [0.0; 4];
        f[A] = th1 * (1.0 - th);
        f[C] = (1.0 - th2) * th;
        f[G] = th2 * th;
        f[T] = (1.0 - th1) * (1.0 - th);
        f
    }

    fn set_frequencies(&mut self, f: &[f64]) {
        let gc = f[C] + f[G];
        let at = f[A] + f[T];
        self.theta = gc;
        self.theta1 = if at > 0.0 { f[A] / at } else { 0.5 };
        self.theta2 = if gc > 0.0 { f[G] / gc } else { 0.5 };
    }
}

/// A 4-state time-reversible nucleotide model.
///
/// # Examples
///
/// ```
/// use pairdist_phylo::models::{NucleotideKind, NucleotideModel};
/// use pairdist_phylo::subst_model::SubstitutionModel;
///
/// let mut hky = NucleotideModel::new(NucleotideKind::Hky85);
/// hky.set_parameter("kappa", 4.0).unwrap();
/// let p = hky.transition_probs(0.1);
/// assert!(p[0][2] > p[0][1]); // transitions outpace transversions
/// ```
#[derive(Debug, Clone)]
pub struct NucleotideModel {
    kind: NucleotideKind,
    params: NucleotideParams,
    core: ReversibleCore,
}

impl NucleotideModel {
    /// Build a model at its default parameter values (all ratios 1, uniform
    /// base frequencies).
    pub fn new(kind: NucleotideKind) -> Self {
        let params = NucleotideParams::default();
        let core = build_core(kind, &params);
        Self { kind, params, core }
    }

    pub fn jc69() -> Self {
        Self::new(NucleotideKind::Jc69)
    }

    /// K80 with transition/transversion ratio `kappa`.
    pub fn k80(kappa: f64) -> Result<Self> {
        let mut m = Self::new(NucleotideKind::K80);
        m.set_parameter("kappa", kappa)?;
        Ok(m)
    }

    /// HKY85 with ratio `kappa` and base frequencies (ACGT order).
    pub fn hky85(kappa: f64, freqs: &[f64]) -> Result<Self> {
        let mut m = Self::new(NucleotideKind::Hky85);
        m.set_parameter("kappa", kappa)?;
        m.set_frequencies(freqs)?;
        Ok(m)
    }

    /// GTR with exchangeabilities `a..e` and base frequencies.
    pub fn gtr(rates: [f64; 5], freqs: &[f64]) -> Result<Self> {
        let mut m = Self::new(NucleotideKind::Gtr);
        m.set_gtr_rates(rates)?;
        m.set_frequencies(freqs)?;
        Ok(m)
    }

    pub fn kind(&self) -> NucleotideKind {
        self.kind
    }

    /// GTR exchangeabilities `a..e` (only meaningful for GTR).
    pub fn gtr_rates(&self) -> [f64; 5] {
        self.params.gtr
    }

    /// Replace the GTR exchangeabilities `a..e`.
    pub fn set_gtr_rates(&mut self, rates: [f64; 5]) -> Result<()> {
        if self.kind != NucleotideKind::Gtr {
            return Err(PairdistError::Config(format!(
                "exchangeabilities can only be set on GTR, not {}",
                self.kind.name()
            )));
        }
        for r in rates {
            check_positive("GTR rate", r)?;
        }
        let mut params = self.params.clone();
        params.gtr = rates;
        self.rebuild(params);
        Ok(())
    }

    fn rebuild(&mut self, params: NucleotideParams) {
        self.core = build_core(self.kind, &params);
        self.params = params;
    }
}

impl SubstitutionModel for NucleotideModel {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn core(&self) -> &ReversibleCore {
        &self.core
    }

    fn parameters(&self) -> Vec<Parameter> {
        let p = &self.params;
        let thetas = || {
            vec![
                Parameter::new("theta", p.theta, THETA_BOUNDS),
                Parameter::new("theta1", p.theta1, THETA_BOUNDS),
                Parameter::new("theta2", p.theta2, THETA_BOUNDS),
            ]
        };
        match self.kind {
            NucleotideKind::Jc69 => Vec::new(),
            NucleotideKind::K80 => vec![Parameter::new("kappa", p.kappa, RATE_BOUNDS)],
            NucleotideKind::Hky85 | NucleotideKind::F84 => {
                let mut v = vec![Parameter::new("kappa", p.kappa, RATE_BOUNDS)];
                v.extend(thetas());
                v
            }
            NucleotideKind::Tn93 => {
                let mut v = vec![
                    Parameter::new("kappa1", p.kappa1, RATE_BOUNDS),
                    Parameter::new("kappa2", p.kappa2, RATE_BOUNDS),
                ];
                v.extend(thetas());
                v
            }
            NucleotideKind::T92 => vec![
                Parameter::new("kappa", p.kappa, RATE_BOUNDS),
                Parameter::new("theta", p.theta, THETA_BOUNDS),
            ],
            NucleotideKind::Gtr => {
                let mut v: Vec<Parameter> = GTR_NAMES
                    .into_iter()
                    .zip(p.gtr)
                    .map(|(name, value)| Parameter::new(name, value, RATE_BOUNDS))
                    .collect();
                v.extend(thetas());
                v
            }
        }
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        if !self.parameters().iter().any(|p| p.name == name) {
            return Err(PairdistError::InvalidInput(format!(
                "model {} has no parameter '{}'",
                self.kind.name(),
                name
            )));
        }
        let mut params = self.params.clone();
        match name {
            "kappa" => params.kappa = check_positive(name, value)?,
            "kappa1" => params.kappa1 = check_positive(name, value)?,
            "kappa2" => params.kappa2 = check_positive(name, value)?,
            "theta" => params.theta = check_proportion(name, value)?,
            "theta1" => params.theta1 = check_proportion(name, value)?,
            "theta2" => params.theta2 = check_proportion(name, value)?,
            _ => {
                let idx = GTR_NAMES
                    .iter()
                    .position(|&n| n == name)
                    .ok_or_else(|| PairdistError::InvalidInput(format!("unknown parameter '{}'", name)))?;
                params.gtr[idx] = check_positive(name, value)?;
            }
        }
        self.rebuild(params);
        Ok(())
    }

    fn set_frequencies(&mut self, freqs: &[f64]) -> Result<()> {
        if freqs.len() != NUM_STATES {
            return Err(PairdistError::Dimension {
                expected: NUM_STATES,
                found: freqs.len(),
            });
        }
        if !self.kind.has_free_frequencies() {
            return Err(PairdistError::Config(format!(
                "model {} has fixed equal base frequencies",
                self.kind.name()
            )));
        }
        let normalised = crate::subst_model::normalise_frequencies(freqs)?;
        let mut params = self.params.clone();
        params.set_frequencies(&normalised);
        if self.kind == NucleotideKind::T92 {
            params.theta1 = 0.5;
            params.theta2 = 0.5;
        }
        self.rebuild(params);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn SubstitutionModel> {
        Box::new(self.clone())
    }
}

fn check_positive(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(PairdistError::InvalidInput(format!(
            "{} must be positive and finite, got {}",
            name, value
        )))
    }
}

fn check_proportion(name: &str, value: f64) -> Result<f64> {
    if value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(PairdistError::InvalidInput(format!(
            "{} must lie strictly between 0 and 1, got {}",
            name, value
        )))
    }
}

/// Exchangeabilities and frequencies for a family at the given parameters.
///
/// Thetas are kept strictly inside (0, 1), so every frequency is positive.
fn build_core(kind: NucleotideKind, p: &NucleotideParams) -> ReversibleCore {
    let freqs = match kind {
        NucleotideKind::Jc69 | NucleotideKind::K80 => [0.25; 4],
        _ => p.frequencies(),
    };

    // Rates for the six unordered pairs.
    let (mut ac, mut ag, mut at, mut cg, mut ct, mut gt) = (1.0, 1.0, 1.0, 1.0, 1.0, 1.0);
    match kind {
        NucleotideKind::Jc69 => {}
        NucleotideKind::K80 | NucleotideKind::Hky85 | NucleotideKind::T92 => {
            ag = p.kappa;
            ct = p.kappa;
        }
        NucleotideKind::Tn93 => {
            ag = p.kappa1;
            ct = p.kappa2;
        }
        NucleotideKind::F84 => {
            let purines = freqs[A] + freqs[G];
            let pyrimidines = freqs[C] + freqs[T];
            ag = 1.0 + p.kappa / purines;
            ct = 1.0 + p.kappa / pyrimidines;
        }
        NucleotideKind::Gtr => {
            let [a, b, c, d, e] = p.gtr;
            ct = a;
            at = b;
            gt = c;
            ac = d;
            cg = e;
        }
    }

    let mut s = vec![0.0; NUM_STATES * NUM_STATES];
    let mut put = |i: usize, j: usize, v: f64| {
        s[i * NUM_STATES + j] = v;
        s[j * NUM_STATES + i] = v;
    };
    put(A, C, ac);
    put(A, G, ag);
    put(A, T, at);
    put(C, G, cg);
    put(C, T, ct);
    put(G, T, gt);

    ReversibleCore::from_valid(s, freqs.to_vec())
}

/// JC69 transition probability matrix for a given branch length `t`.
///
/// - P(same) = 1/4 + 3/4 * e^{-4t/3}
/// - P(diff) = 1/4 - 1/4 * e^{-4t/3}
pub fn jc69_probability(t: f64) -> [[f64; 4]; 4] {
    let e = (-4.0 * t / 3.0).exp();
    let p_same = 0.25 + 0.75 * e;
    let p_diff = 0.25 - 0.25 * e;

    let mut p = [[p_diff; 4]; 4];
    for (i, row) in p.iter_mut().enumerate() {
        row[i] = p_same;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nucleotide_index_standard() {
        assert_eq!(nucleotide_index(b'a'), Some(0));
        assert_eq!(nucleotide_index(b'G'), Some(2));
        assert_eq!(nucleotide_index(b'U'), Some(3));
        assert_eq!(nucleotide_index(b'N'), None);
    }

    #[test]
    fn jc69_matches_closed_form() {
        let m = NucleotideModel::jc69();
        for &t in &[0.0, 0.05, 0.3, 2.0] {
            let p = m.transition_probs(t);
            let exact = jc69_probability(t);
            for i in 0..4 {
                for j in 0..4 {
                    assert!((p[i][j] - exact[i][j]).abs() < 1e-10, "t {} [{}][{}]", t, i, j);
                }
            }
        }
    }

    #[test]
    fn k80_kappa_one_is_jc() {
        let k80 = NucleotideModel::k80(1.0).unwrap();
        let jc = NucleotideModel::jc69();
        let (a, b) = (k80.transition_probs(0.4), jc.transition_probs(0.4));
        for i in 0..4 {
            for j in 0..4 {
                assert!((a[i][j] - b[i][j]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn hky_frequencies_round_trip_through_thetas() {
        let freqs = [0.1, 0.2, 0.3, 0.4];
        let m = NucleotideModel::hky85(2.0, &freqs).unwrap();
        for (a, b) in m.frequencies().iter().zip(freqs) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!((m.parameter("theta").unwrap() - 0.5).abs() < 1e-12);
        assert!((m.parameter("theta1").unwrap() - 0.2).abs() < 1e-12);
        assert!((m.parameter("theta2").unwrap() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn gtr_exchangeabilities_follow_letter_convention() {
        let m = NucleotideModel::gtr([2.0, 3.0, 4.0, 5.0, 6.0], &[0.25; 4]).unwrap();
        let s = m.exchangeabilities();
        assert_eq!(s[C][T], 2.0);
        assert_eq!(s[A][T], 3.0);
        assert_eq!(s[G][T], 4.0);
        assert_eq!(s[A][C], 5.0);
        assert_eq!(s[C][G], 6.0);
        assert_eq!(s[A][G], 1.0);
        assert_eq!(s[G][A], 1.0);
    }

    #[test]
    fn tn93_separates_purine_and_pyrimidine_transitions() {
        let mut m = NucleotideModel::new(NucleotideKind::Tn93);
        m.set_parameter("kappa1", 5.0).unwrap();
        m.set_parameter("kappa2", 2.0).unwrap();
        let s = m.exchangeabilities();
        assert_eq!(s[A][G], 5.0);
        assert_eq!(s[C][T], 2.0);
    }

    #[test]
    fn f84_exchangeabilities_depend_on_frequencies() {
        let mut m = NucleotideModel::new(NucleotideKind::F84);
        m.set_parameter("kappa", 1.0).unwrap();
        let s = m.exchangeabilities();
        // Uniform frequencies: purines and pyrimidines each 0.5.
        assert!((s[A][G] - 3.0).abs() < 1e-12);
        assert!((s[C][T] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn t92_keeps_symmetric_frequencies() {
        let mut m = NucleotideModel::new(NucleotideKind::T92);
        m.set_frequencies(&[0.1, 0.3, 0.4, 0.2]).unwrap();
        let f = m.frequencies();
        assert!((f[C] - f[G]).abs() < 1e-12);
        assert!((f[A] - f[T]).abs() < 1e-12);
        assert!((f[C] + f[G] - 0.7).abs() < 1e-12);
    }

    #[test]
    fn parameter_validation() {
        let mut m = NucleotideModel::new(NucleotideKind::Hky85);
        assert!(m.set_parameter("kappa", -1.0).is_err());
        assert!(m.set_parameter("theta", 1.5).is_err());
        assert!(m.set_parameter("kappa1", 2.0).is_err());
        assert!(NucleotideModel::jc69().clone_box().parameters().is_empty());
        let mut jc = NucleotideModel::jc69();
        assert!(jc.set_frequencies(&[0.1, 0.2, 0.3, 0.4]).is_err());
        assert!(m.set_frequencies(&[0.5, 0.5]).is_err());
    }

    #[test]
    fn free_parameter_counts() {
        assert_eq!(NucleotideModel::new(NucleotideKind::Jc69).n_free_params(), 0);
        assert_eq!(NucleotideModel::new(NucleotideKind::K80).n_free_params(), 1);
        assert_eq!(NucleotideModel::new(NucleotideKind::Hky85).n_free_params(), 4);
        assert_eq!(NucleotideModel::new(NucleotideKind::Tn93).n_free_params(), 5);
        assert_eq!(NucleotideModel::new(NucleotideKind::T92).n_free_params(), 2);
        assert_eq!(NucleotideModel::new(NucleotideKind::Gtr).n_free_params(), 8);
    }
}
