//! Numerical optimisation: one-dimensional maximisers and the
//! fixed-topology parameter sweep.
//!
//! Every accepted step is non-decreasing in the objective, so repeated
//! calls never move the likelihood backwards.

use log::debug;
use pairdist_core::Result;

use crate::distance::DISTMAX;
use crate::likelihood::{TreeLikelihood, MIN_BRANCH_LENGTH};
use crate::rates::{GammaRates, ALPHA_BOUNDS};
use crate::subst_model::SubstitutionModel;
use crate::tree::NodeId;

/// Step tolerance for branch-length Newton iterations inside sweeps.
const BRANCH_STEP_TOLERANCE: f64 = 1e-6;

/// Tolerance on the log scale for Brent searches over model parameters.
const LOG_PARAM_TOLERANCE: f64 = 1e-4;

/// Iteration cap for a single Brent search.
const BRENT_MAX_ITERATIONS: usize = 100;

/// Stopping rules shared by the distance, parameter and topology optimisers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptimiserConfig {
    /// Step tolerance (distances) or absolute lnL improvement (sweeps).
    pub tolerance: f64,
    /// Cap on objective evaluations per optimisation call.
    pub max_evaluations: usize,
    /// Maximum parameter sweeps per call.
    pub max_sweeps: usize,
    /// Maximum step halvings in a Newton iteration.
    pub max_halvings: usize,
    /// Maximum NNI rounds.
    pub max_rounds: usize,
    /// Allowed range for branch lengths.
    pub branch_bounds: (f64, f64),
}

impl Default for OptimiserConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            max_evaluations: 1_000_000,
            max_sweeps: 10,
            max_halvings: 10,
            max_rounds: 10,
            branch_bounds: (MIN_BRANCH_LENGTH, DISTMAX),
        }
    }
}

impl OptimiserConfig {
    /// Settings for pairwise ML distances: tight step tolerance.
    pub fn for_distances() -> Self {
        Self {
            tolerance: 1e-6,
            ..Self::default()
        }
    }
}

/// Tracks objective evaluations against a cap.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    used: usize,
    cap: usize,
}

impl Budget {
    pub fn new(cap: usize) -> Self {
        Self { used: 0, cap }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.cap.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.cap
    }

    pub fn spend(&mut self, n: usize) {
        self.used = self.used.saturating_add(n);
    }
}

/// Outcome of a one-dimensional maximisation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Optimum {
    pub x: f64,
    pub value: f64,
    /// Second derivative at `x` (NaN for derivative-free searches).
    pub curvature: f64,
    pub evaluations: usize,
}

/// Maximise `f` over `[lo, hi]` with safeguarded Newton steps.
///
/// `f` returns `(value, first derivative, second derivative)`. A Newton
/// step is taken where the curvature is negative; otherwise the point is
/// doubled or halved in the direction of the gradient. A step that fails to
/// strictly improve is halved up to `max_halvings` times. Iteration stops once the
/// accepted step is shorter than `tol`, no improving step exists, or
/// `max_evals` evaluations have been spent.
pub fn newton_maximise<F>(
    mut f: F,
    x0: f64,
    bounds: (f64, f64),
    tol: f64,
    max_evals: usize,
    max_halvings: usize,
) -> Optimum
where
    F: FnMut(f64) -> (f64, f64, f64),
{
    let (lo, hi) = bounds;
    let mut x = x0.clamp(lo, hi);
    let (mut fx, mut g, mut h) = f(x);
    let mut evals = 1;

    while evals < max_evals {
        if !fx.is_finite() && fx != f64::NEG_INFINITY {
            break;
        }
        let mut step = if h < 0.0 && g.is_finite() {
            -g / h
        } else if g > 0.0 {
            x.abs().max(tol)
        } else if g < 0.0 {
            -0.5 * x.abs().max(tol)
        } else {
            break;
        };

        let mut accepted = None;
        for _ in 0..=max_halvings {
            let candidate = (x + step).clamp(lo, hi);
            if (candidate - x).abs() < tol || evals >= max_evals {
                break;
            }
            let (fc, gc, hc) = f(candidate);
            evals += 1;
            if fc > fx {
                accepted = Some((candidate, fc, gc, hc));
                break;
            }
            step *= 0.5;
        }

        match accepted {
            Some((xn, fn_, gn, hn)) => {
                let moved = (xn - x).abs();
                x = xn;
                fx = fn_;
                g = gn;
                h = hn;
                if moved < tol {
                    break;
                }
            }
            None => break,
        }
    }

    Optimum {
        x,
        value: fx,
        curvature: h,
        evaluations: evals,
    }
}

/// Maximise `f` on `[lo, hi]` by Brent's golden-section and parabolic
/// search, starting from `x0`.
///
/// The returned value is never below `f(x0)`.
pub fn brent_maximise<F>(mut f: F, lo: f64, hi: f64, x0: f64, tol: f64, max_evals: usize) -> Optimum
where
    F: FnMut(f64) -> f64,
{
    const CGOLD: f64 = 0.381_966_011_250_105_1;
    const ZEPS: f64 = 1e-10;

    // Minimise the negation.
    let mut neg = |x: f64| {
        let v = f(x);
        if v.is_nan() {
            f64::INFINITY
        } else {
            -v
        }
    };

    let (mut a, mut b) = (lo.min(hi), lo.max(hi));
    let mut x = x0.clamp(a, b);
    let (mut w, mut v) = (x, x);
    let mut fx = neg(x);
    let (mut fw, mut fv) = (fx, fx);
    let mut evals = 1;
    let (mut d, mut e) = (0.0f64, 0.0f64);

    for _ in 0..BRENT_MAX_ITERATIONS {
        if evals >= max_evals {
            break;
        }
        let xm = 0.5 * (a + b);
        let tol1 = tol * x.abs() + ZEPS;
        let tol2 = 2.0 * tol1;
        if (x - xm).abs() <= tol2 - 0.5 * (b - a) {
            break;
        }

        let mut golden = true;
        if e.abs() > tol1 {
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let etemp = e;
            e = d;
            if !(p.abs() >= (0.5 * q * etemp).abs() || p <= q * (a - x) || p >= q * (b - x)) {
                d = p / q;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = tol1.copysign(xm - x);
                }
                golden = false;
            }
        }
        if golden {
            e = if x >= xm { a - x } else { b - x };
            d = CGOLD * e;
        }

        let u = if d.abs() >= tol1 { x + d } else { x + tol1.copysign(d) };
        let fu = neg(u);
        evals += 1;

        if fu <= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }

    Optimum {
        x,
        value: -fx,
        curvature: f64::NAN,
        evaluations: evals,
    }
}

/// Newton-optimise the listed branch lengths one after another.
///
/// Each branch gets a fresh likelihood function built from the current
/// state of every other branch. Returns the final log-likelihood.
pub fn optimise_branches(
    lik: &mut TreeLikelihood,
    model: &dyn SubstitutionModel,
    rates: &GammaRates,
    branches: &[NodeId],
    config: &OptimiserConfig,
    budget: &mut Budget,
) -> Result<f64> {
    let mut lnl = lik.log_likelihood(model, rates)?;
    budget.spend(1);
    for &id in branches {
        if budget.is_exhausted() {
            break;
        }
        let f = lik.branch_function(model, rates, id)?;
        let t0 = lik.branch_length(id);
        let best = newton_maximise(
            |t| f.evaluate(t),
            t0,
            config.branch_bounds,
            BRANCH_STEP_TOLERANCE,
            budget.remaining(),
            config.max_halvings,
        );
        budget.spend(best.evaluations);
        if best.value >= lnl {
            lik.set_branch_length(id, best.x)?;
            lnl = best.value;
        }
    }
    Ok(lnl)
}

/// Brent-optimise every free model parameter and, when there is more than
/// one category, the gamma shape. Returns the final log-likelihood.
pub fn optimise_model_parameters(
    lik: &TreeLikelihood,
    model: &mut dyn SubstitutionModel,
    rates: &mut GammaRates,
    budget: &mut Budget,
) -> Result<f64> {
    let mut lnl = lik.log_likelihood(model, rates)?;
    budget.spend(1);

    for param in model.parameters() {
        if budget.is_exhausted() {
            break;
        }
        let start = param.value;
        let best = {
            let objective = |y: f64| {
                if model.set_parameter(param.name, y.exp()).is_err() {
                    return f64::NEG_INFINITY;
                }
                lik.log_likelihood(&*model, &*rates).unwrap_or(f64::NEG_INFINITY)
            };
            brent_maximise(
                objective,
                param.lower.ln(),
                param.upper.ln(),
                start.clamp(param.lower, param.upper).ln(),
                LOG_PARAM_TOLERANCE,
                budget.remaining(),
            )
        };
        budget.spend(best.evaluations);
        if best.value >= lnl {
            model.set_parameter(param.name, best.x.exp())?;
            lnl = best.value;
        } else {
            model.set_parameter(param.name, start)?;
        }
    }

    if rates.is_variable() && !budget.is_exhausted() {
        let start = rates.alpha();
        let mut trial = rates.clone();
        let best = brent_maximise(
            |y| {
                if trial.set_alpha(y.exp()).is_err() {
                    return f64::NEG_INFINITY;
                }
                lik.log_likelihood(&*model, &trial).unwrap_or(f64::NEG_INFINITY)
            },
            ALPHA_BOUNDS.0.ln(),
            ALPHA_BOUNDS.1.ln(),
            start.clamp(ALPHA_BOUNDS.0, ALPHA_BOUNDS.1).ln(),
            LOG_PARAM_TOLERANCE,
            budget.remaining(),
        );
        budget.spend(best.evaluations);
        if best.value >= lnl {
            rates.set_alpha(best.x.exp())?;
            lnl = best.value;
        }
    }
    Ok(lnl)
}

/// Sweep every branch length until a sweep gains less than
/// `config.tolerance`. Model and rates stay fixed.
pub fn optimise_branch_lengths(
    lik: &mut TreeLikelihood,
    model: &dyn SubstitutionModel,
    rates: &GammaRates,
    config: &OptimiserConfig,
    budget: &mut Budget,
) -> Result<f64> {
    let branches = lik.branches();
    let mut lnl = lik.log_likelihood(model, rates)?;
    budget.spend(1);
    for sweep in 0..config.max_sweeps {
        if budget.is_exhausted() {
            break;
        }
        let before = lnl;
        lnl = optimise_branches(lik, model, rates, &branches, config, budget)?.max(lnl);
        debug!("branch sweep {}: lnL {:.6} -> {:.6}", sweep + 1, before, lnl);
        if lnl - before < config.tolerance {
            break;
        }
    }
    Ok(lnl)
}

/// Optimise branch lengths (unless `fix_branch_lengths`), model parameters
/// and the gamma shape in sweeps until a sweep gains less than
/// `config.tolerance`, `config.max_sweeps` is reached or the evaluation cap
/// runs out. Returns the final log-likelihood.
pub fn optimise_parameters(
    lik: &mut TreeLikelihood,
    model: &mut dyn SubstitutionModel,
    rates: &mut GammaRates,
    fix_branch_lengths: bool,
    config: &OptimiserConfig,
    budget: &mut Budget,
) -> Result<f64> {
    let mut lnl = lik.log_likelihood(model, rates)?;
    budget.spend(1);
    for sweep in 0..config.max_sweeps {
        if budget.is_exhausted() {
            break;
        }
        let before = lnl;
        if !fix_branch_lengths {
            let branches = lik.branches();
            lnl = optimise_branches(lik, model, rates, &branches, config, budget)?;
        }
        lnl = optimise_model_parameters(lik, model, rates, budget)?.max(lnl);
        debug!(
            "parameter sweep {}: lnL {:.6} -> {:.6} ({} evaluations)",
            sweep + 1,
            before,
            lnl,
            budget.used()
        );
        if lnl - before < config.tolerance {
            break;
        }
    }
    Ok(lnl)
}
