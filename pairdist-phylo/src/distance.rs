//! Pairwise evolutionary distances and their variances.
//!
//! Two estimators fill the same pair of matrices:
//!
//! - a closed-form Jukes-Cantor correction with its delta-method variance,
//!   which needs no model;
//! - a per-pair maximum-likelihood branch length under the current
//!   substitution and rate models, with the inverse observed information as
//!   its variance.

use std::convert::Infallible;

use log::info;
use pairdist_core::{PairdistError, Result};
use pairdist_seq::alphabet::is_gap;
use pairdist_seq::{Alignment, DataType};

use crate::likelihood::pair_likelihood;
use crate::optimize::{newton_maximise, OptimiserConfig};
use crate::rates::GammaRates;
use crate::subst_model::SubstitutionModel;

/// Floor applied to every variance estimate.
pub const VARMIN: f64 = 1e-6;

/// Distance reported when the closed-form estimator is undefined.
pub const DISTMAX: f64 = 10000.0;

/// Square matrix of pairwise values with the sequence names attached.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistanceMatrix {
    names: Vec<String>,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// An all-zero matrix over `names`.
    pub fn zeros(names: Vec<String>) -> Self {
        let n = names.len();
        Self {
            names,
            values: vec![0.0; n * n],
        }
    }

    /// Build from nested rows, which must form an `n x n` square where
    /// `n = names.len()`.
    pub fn from_rows(names: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let n = names.len();
        if rows.len() != n {
            return Err(PairdistError::Dimension {
                expected: n,
                found: rows.len(),
            });
        }
        let mut values = Vec::with_capacity(n * n);
        for row in rows {
            if row.len() != n {
                return Err(PairdistError::Dimension {
                    expected: n,
                    found: row.len(),
                });
            }
            values.extend_from_slice(row);
        }
        Ok(Self { names, values })
    }

    pub fn size(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.size() + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        let n = self.size();
        self.values[i * n + j] = value;
    }

    /// Set both `(i, j)` and `(j, i)`.
    pub fn set_symmetric(&mut self, i: usize, j: usize, value: f64) {
        self.set(i, j, value);
        self.set(j, i, value);
    }

    /// Nested rows, as handed back to callers.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        let n = self.size();
        if n == 0 {
            return Vec::new();
        }
        self.values.chunks(n).map(|r| r.to_vec()).collect()
    }

    pub fn is_symmetric(&self, tol: f64) -> bool {
        let n = self.size();
        (0..n).all(|i| (0..i).all(|j| (self.get(i, j) - self.get(j, i)).abs() <= tol))
    }

    /// Pack `variances` below the diagonal and `self` on and above it.
    pub fn pack_with_variances(&self, variances: &DistanceMatrix) -> Result<DistanceMatrix> {
        if variances.size() != self.size() {
            return Err(PairdistError::Dimension {
                expected: self.size(),
                found: variances.size(),
            });
        }
        let n = self.size();
        let mut packed = self.clone();
        for i in 0..n {
            for j in 0..i {
                packed.set(i, j, variances.get(i, j));
            }
        }
        Ok(packed)
    }
}

/// A distance matrix and the matching variance matrix.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistanceEstimates {
    pub distances: DistanceMatrix,
    pub variances: DistanceMatrix,
}

/// Floors and optimiser settings shared by both estimators.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceOptions {
    pub var_min: f64,
    pub dist_max: f64,
    /// Settings for the per-pair branch-length search. Its `branch_bounds`
    /// bound the ML distance.
    pub optimiser: OptimiserConfig,
}

impl Default for DistanceOptions {
    fn default() -> Self {
        Self {
            var_min: VARMIN,
            dist_max: DISTMAX,
            optimiser: OptimiserConfig::for_distances(),
        }
    }
}

/// Count `(differences, comparable sites)` between two aligned rows.
///
/// Every position where the rows differ is a difference, including a gap
/// against a residue; two gaps are equal whatever the gap symbol. A site is
/// comparable only when neither byte is a gap. Residues are compared
/// literally, so two different ambiguity codes count as a difference.
pub fn count_differences(a: &[u8], b: &[u8]) -> (usize, usize) {
    let mut d = 0;
    let mut g = 0;
    for (&x, &y) in a.iter().zip(b) {
        match (is_gap(x), is_gap(y)) {
            (true, true) => {}
            (false, false) => {
                g += 1;
                if !x.eq_ignore_ascii_case(&y) {
                    d += 1;
                }
            }
            _ => d += 1,
        }
    }
    (d, g)
}

fn proportion(d: usize, g: usize) -> f64 {
    if g > 0 {
        d as f64 / g as f64
    } else {
        0.0
    }
}

/// Jukes-Cantor distance for `d` differences over `g` sites and `s` states.
///
/// Returns `dist_max` once the log argument is no longer positive.
///
/// # Examples
///
/// ```
/// use pairdist_phylo::distance::{jc_distance, DISTMAX};
///
/// assert_eq!(jc_distance(0, 100, 4, DISTMAX), 0.0);
/// assert_eq!(jc_distance(75, 100, 4, DISTMAX), DISTMAX);
/// ```
pub fn jc_distance(d: usize, g: usize, s: usize, dist_max: f64) -> f64 {
    let p = proportion(d, g);
    let s = s as f64;
    let arg = 1.0 - s / (s - 1.0) * p;
    if p == 0.0 {
        0.0
    } else if arg > 0.0 {
        -((s - 1.0) / s) * arg.ln()
    } else {
        dist_max
    }
}

/// Delta-method variance of [`jc_distance`], floored at `var_min`.
///
/// Undefined values (no comparable sites, saturation) also take the floor.
pub fn jc_variance(d: usize, g: usize, s: usize, var_min: f64) -> f64 {
    let p = proportion(d, g);
    let s = s as f64;
    let arg = 1.0 - s / (s - 1.0) * p;
    let var = p * (1.0 - p) / (g as f64 * arg * arg);
    if var.is_finite() && var > var_min {
        var
    } else {
        var_min
    }
}

/// Closed-form distances and variances for every pair of sequences.
pub fn fast_distances(alignment: &Alignment, options: &DistanceOptions) -> DistanceEstimates {
    let s = alignment.data_type().n_states();
    let filled = fill_pairs(alignment, |i, j| {
        let (d, g) = count_differences(alignment.row(i), alignment.row(j));
        Ok::<_, Infallible>((
            jc_distance(d, g, s, options.dist_max),
            jc_variance(d, g, s, options.var_min),
        ))
    });
    let estimates = match filled {
        Ok(estimates) => estimates,
        Err(never) => match never {},
    };
    info!(
        "computed fast distances for {} sequences over {} sites",
        alignment.len(),
        alignment.n_sites()
    );
    estimates
}

/// Maximum-likelihood distance and variance between two aligned rows.
///
/// Gaps count as unknown states.
pub fn ml_pair_distance(
    a: &[u8],
    b: &[u8],
    data_type: DataType,
    model: &dyn SubstitutionModel,
    rates: &GammaRates,
    options: &DistanceOptions,
) -> Result<(f64, f64)> {
    let start = start_length(a, b, options.optimiser.branch_bounds.0);
    optimise_pair(a, b, start, data_type, model, rates, options)
}

/// Maximum-likelihood distances and variances for every pair of sequences.
pub fn ml_distances(
    alignment: &Alignment,
    model: &dyn SubstitutionModel,
    rates: &GammaRates,
    options: &DistanceOptions,
) -> Result<DistanceEstimates> {
    let data_type = alignment.data_type();
    if model.n_states() != data_type.n_states() {
        return Err(PairdistError::Config(format!(
            "model {} has {} states but the alignment is {}",
            model.name(),
            model.n_states(),
            data_type
        )));
    }
    let masked = alignment.with_gaps_as_unknown();
    let lo = options.optimiser.branch_bounds.0;
    let estimates = fill_pairs(alignment, |i, j| {
        let start = start_length(alignment.row(i), alignment.row(j), lo);
        optimise_pair(masked.row(i), masked.row(j), start, data_type, model, rates, options)
    })?;
    info!(
        "computed ML distances for {} sequences under {} ({} rate categories)",
        alignment.len(),
        model.name(),
        rates.ncat()
    );
    Ok(estimates)
}

/// The p-distance, raised to `min_length`.
fn start_length(a: &[u8], b: &[u8], min_length: f64) -> f64 {
    let (d, g) = count_differences(a, b);
    if g == 0 {
        min_length
    } else {
        min_length.max(proportion(d, g))
    }
}

fn optimise_pair(
    a: &[u8],
    b: &[u8],
    start: f64,
    data_type: DataType,
    model: &dyn SubstitutionModel,
    rates: &GammaRates,
    options: &DistanceOptions,
) -> Result<(f64, f64)> {
    let config = &options.optimiser;
    let lik = pair_likelihood(a, b, data_type, model, rates)?;
    let best = newton_maximise(
        |t| lik.evaluate(t),
        start,
        config.branch_bounds,
        config.tolerance,
        config.max_evaluations,
        config.max_halvings,
    );
    // A flat likelihood (no comparable sites) has no usable curvature.
    let var = 1.0 / -best.curvature;
    let var = if var.is_finite() && var > options.var_min {
        var
    } else {
        options.var_min
    };
    Ok((best.x, var))
}

/// Evaluate `pair(i, j)` for every `i < j` and mirror the results.
fn fill_pairs<F, E>(alignment: &Alignment, pair: F) -> std::result::Result<DistanceEstimates, E>
where
    F: Fn(usize, usize) -> std::result::Result<(f64, f64), E> + Sync,
    E: Send,
{
    let n = alignment.len();

    #[cfg(feature = "parallel")]
    let rows = {
        use rayon::prelude::*;
        (0..n)
            .into_par_iter()
            .map(|i| ((i + 1)..n).map(|j| pair(i, j)).collect::<std::result::Result<Vec<_>, E>>())
            .collect::<std::result::Result<Vec<_>, E>>()?
    };

    #[cfg(not(feature = "parallel"))]
    let rows = (0..n)
        .map(|i| ((i + 1)..n).map(|j| pair(i, j)).collect::<std::result::Result<Vec<_>, E>>())
        .collect::<std::result::Result<Vec<_>, E>>()?;

    let mut distances = DistanceMatrix::zeros(alignment.names());
    let mut variances = DistanceMatrix::zeros(alignment.names());
    for (i, row) in rows.into_iter().enumerate() {
        for (offset, (dist, var)) in row.into_iter().enumerate() {
            let j = i + 1 + offset;
            distances.set_symmetric(i, j, dist);
            variances.set_symmetric(i, j, var);
        }
    }
    Ok(DistanceEstimates {
        distances,
        variances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::create_model;
    use crate::likelihood::MIN_BRANCH_LENGTH;

    fn dna(pairs: &[(&str, &str)]) -> Alignment {
        Alignment::from_pairs(pairs.iter().copied(), DataType::Dna).unwrap()
    }

    #[test]
    fn identical_sequences_fast() {
        let aln = dna(&[("a", "ACGTACGTAC"), ("b", "ACGTACGTAC")]);
        let est = fast_distances(&aln, &DistanceOptions::default());
        assert!(est.distances.get(0, 1).abs() < 1e-12);
        assert_eq!(est.variances.get(0, 1), VARMIN);
        assert_eq!(est.distances.get(0, 0), 0.0);
    }

    #[test]
    fn jc_matches_closed_form() {
        // 1 difference in 10 sites
        let aln = dna(&[("a", "ACGTACGTAC"), ("b", "ACGTACGTAA")]);
        let est = fast_distances(&aln, &DistanceOptions::default());
        let p: f64 = 0.1;
        let expected = -0.75 * (1.0 - 4.0 / 3.0 * p).ln();
        assert!((est.distances.get(0, 1) - expected).abs() < 1e-12);
        let var = p * (1.0 - p) / (10.0 * (1.0 - 4.0 / 3.0 * p).powi(2));
        assert!((est.variances.get(1, 0) - var).abs() < 1e-12);
    }

    #[test]
    fn gap_against_residue_differs() {
        assert_eq!(count_differences(b"AC-TA", b"AGGT."), (3, 3));
        assert_eq!(count_differences(b"A-.T", b"A.-T"), (0, 2));
        assert_eq!(count_differences(b"----", b"ACGT"), (4, 0));
    }

    #[test]
    fn gapped_pair_uses_ungapped_sites_as_denominator() {
        // d = 2 (both gap columns), g = 8
        let aln = dna(&[("x", "ACGT--ACGT"), ("y", "ACGTAAACGT"), ("z", "ACGTAAACGA")]);
        let est = fast_distances(&aln, &DistanceOptions::default());
        let p: f64 = 0.25;
        let arg = 1.0 - 4.0 / 3.0 * p;
        let expected = -0.75 * arg.ln();
        assert!((est.distances.get(0, 1) - expected).abs() < 1e-12);
        assert!((est.distances.get(0, 1) - 0.30409883108112323).abs() < 1e-12);
        let var = p * (1.0 - p) / (8.0 * arg * arg);
        assert!((est.variances.get(0, 1) - var).abs() < 1e-12);
        assert!(est.distances.is_symmetric(0.0));
    }

    #[test]
    fn heavily_gapped_pairs_stay_finite() {
        // p = 2/2 saturates; a fully gapped row has no comparable sites.
        let aln = dna(&[("a", "AC--"), ("b", "--GT"), ("c", "----"), ("d", "ACGT")]);
        let est = fast_distances(&aln, &DistanceOptions::default());
        assert_eq!(est.distances.get(0, 3), DISTMAX);
        assert_eq!(est.variances.get(0, 3), VARMIN);
        assert_eq!(est.distances.get(2, 3), 0.0);
        assert_eq!(est.variances.get(2, 3), VARMIN);
        assert_eq!(est.distances.get(0, 1), 0.0);
        for i in 0..4 {
            for j in 0..4 {
                assert!(est.distances.get(i, j).is_finite());
                assert!(est.variances.get(i, j).is_finite());
            }
        }
    }

    #[test]
    fn ml_distances_on_gapped_alignment() {
        let aln = dna(&[
            ("a", "ACGT--ACGTACGGTAACGT"),
            ("b", "ACGTTTACGAACGGTAACGA"),
            ("c", "--------------------"),
            ("d", "ACGAT-ACGAACGGTTACG-"),
        ]);
        let model = create_model("K80").unwrap();
        let est = ml_distances(&aln, model.as_ref(), &GammaRates::uniform(), &DistanceOptions::default())
            .unwrap();
        assert!(est.distances.is_symmetric(0.0));
        for i in 0..4 {
            for j in 0..4 {
                let d = est.distances.get(i, j);
                let v = est.variances.get(i, j);
                assert!(d.is_finite() && d >= 0.0, "d({}, {}) = {}", i, j, d);
                assert!(v.is_finite(), "v({}, {}) = {}", i, j, v);
            }
        }
        let ab = est.distances.get(0, 1);
        assert!(ab > 0.0 && ab < 1.0, "a-b {}", ab);
    }

    #[test]
    fn saturation_gives_distmax() {
        let aln = dna(&[("a", "AAAA"), ("b", "CCCC")]);
        let est = fast_distances(&aln, &DistanceOptions::default());
        assert_eq!(est.distances.get(0, 1), DISTMAX);
        assert_eq!(est.variances.get(0, 1), VARMIN);
        assert_eq!(jc_distance(3, 4, 4, DISTMAX), DISTMAX);
    }

    #[test]
    fn no_comparable_sites() {
        assert_eq!(jc_distance(0, 0, 4, DISTMAX), 0.0);
        assert_eq!(jc_variance(0, 0, 4, VARMIN), VARMIN);
        assert_eq!(jc_distance(5, 0, 4, DISTMAX), 0.0);
        assert_eq!(jc_variance(5, 0, 4, VARMIN), VARMIN);
        // p = 3/4 puts the log argument at exactly zero.
        assert_eq!(jc_distance(3, 4, 4, DISTMAX), DISTMAX);
        assert_eq!(jc_variance(3, 4, 4, VARMIN), VARMIN);
        // Gap differences can push p past 1.
        assert_eq!(jc_variance(3, 2, 4, VARMIN), VARMIN);
    }

    #[test]
    fn protein_uses_twenty_states() {
        let d = jc_distance(1, 10, 20, DISTMAX);
        let expected = -(19.0 / 20.0) * (1.0 - 20.0 / 19.0 * 0.1f64).ln();
        assert!((d - expected).abs() < 1e-12);
    }

    #[test]
    fn pack_places_variances_below_diagonal() {
        let aln = dna(&[("a", "ACGTACGTAC"), ("b", "ACGTACGTAA"), ("c", "ACCTACGTTA")]);
        let est = fast_distances(&aln, &DistanceOptions::default());
        let packed = est.distances.pack_with_variances(&est.variances).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if j < i {
                    est.variances.get(i, j)
                } else {
                    est.distances.get(i, j)
                };
                assert_eq!(packed.get(i, j), expected);
            }
        }
    }

    #[test]
    fn from_rows_checks_shape() {
        let names = vec!["a".to_string(), "b".to_string()];
        let ok = DistanceMatrix::from_rows(names.clone(), &[vec![0.0, 1.0], vec![1.0, 0.0]]);
        assert_eq!(ok.unwrap().to_rows(), vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
        let bad = DistanceMatrix::from_rows(names.clone(), &[vec![0.0, 1.0]]);
        assert!(matches!(
            bad,
            Err(PairdistError::Dimension { expected: 2, found: 1 })
        ));
        let ragged = DistanceMatrix::from_rows(names, &[vec![0.0], vec![1.0, 0.0]]);
        assert!(ragged.is_err());
    }

    #[test]
    fn ml_identical_is_minimum_length() {
        let aln = dna(&[("a", "ACGTACGTACGTTGCA"), ("b", "ACGTACGTACGTTGCA")]);
        let model = create_model("JC69").unwrap();
        let est = ml_distances(&aln, model.as_ref(), &GammaRates::uniform(), &DistanceOptions::default())
            .unwrap();
        assert!((est.distances.get(0, 1) - MIN_BRANCH_LENGTH).abs() < 1e-9);
        assert!(est.variances.get(0, 1) >= VARMIN);
    }

    #[test]
    fn ml_jc_agrees_with_closed_form() {
        let aln = dna(&[
            ("a", "ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT"),
            ("b", "ACGTACTTACGTACGAACGTACGTTCGTACGTACCTACGT"),
        ]);
        let model = create_model("JC69").unwrap();
        let opts = DistanceOptions::default();
        let ml = ml_distances(&aln, model.as_ref(), &GammaRates::uniform(), &opts).unwrap();
        let fast = fast_distances(&aln, &opts);
        assert!(
            (ml.distances.get(0, 1) - fast.distances.get(0, 1)).abs() < 1e-4,
            "ml {} vs fast {}",
            ml.distances.get(0, 1),
            fast.distances.get(0, 1)
        );
        // Observed information equals the delta-method variance for JC.
        let rel = (ml.variances.get(0, 1) - fast.variances.get(0, 1)).abs() / fast.variances.get(0, 1);
        assert!(rel < 1e-2, "relative variance error {}", rel);
    }

    #[test]
    fn ml_rejects_protein_model_on_dna() {
        let aln = dna(&[("a", "ACGT"), ("b", "ACGA")]);
        let model = create_model("WAG01").unwrap();
        let res = ml_distances(&aln, model.as_ref(), &GammaRates::uniform(), &DistanceOptions::default());
        assert!(matches!(res, Err(PairdistError::Config(_))));
    }

    #[test]
    fn ml_pair_handles_gaps() {
        let model = create_model("HKY85").unwrap();
        let rates = GammaRates::new(4, 0.5).unwrap();
        let (d, v) = ml_pair_distance(
            b"ACGT--ACGTACGGTA",
            b"ACGTTTACGAACGGTA",
            DataType::Dna,
            model.as_ref(),
            &rates,
            &DistanceOptions::default(),
        )
        .unwrap();
        assert!(d > 0.0 && d < 1.0, "distance {}", d);
        assert!(v >= VARMIN);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        fn rows() -> impl Strategy<Value = Vec<String>> {
            proptest::collection::vec("[ACGT-]{12}", 2..6)
        }

        proptest! {
            #[test]
            fn fast_matrices_are_symmetric(seqs in rows()) {
                let pairs: Vec<(String, String)> = seqs
                    .iter()
                    .enumerate()
                    .map(|(i, s)| (format!("s{}", i), s.clone()))
                    .collect();
                let aln = Alignment::from_pairs(pairs, DataType::Dna).unwrap();
                let est = fast_distances(&aln, &DistanceOptions::default());
                prop_assert!(est.distances.is_symmetric(0.0));
                prop_assert!(est.variances.is_symmetric(0.0));
                for i in 0..aln.len() {
                    prop_assert_eq!(est.distances.get(i, i), 0.0);
                    for j in 0..aln.len() {
                        prop_assert!(est.distances.get(i, j) >= 0.0);
                        if i != j {
                            prop_assert!(est.variances.get(i, j) >= VARMIN);
                        }
                    }
                }
            }
        }
    }
}
