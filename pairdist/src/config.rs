//! Per-engine tuning knobs.

use pairdist_phylo::simulation::DEFAULT_SEED;
use pairdist_phylo::{DistanceOptions, OptimiserConfig, DISTMAX, MIN_BRANCH_LENGTH, VARMIN};

/// Numerical settings for an [`Engine`](crate::Engine).
///
/// The defaults reproduce the classic constants: variances floored at
/// [`VARMIN`], distances capped at [`DISTMAX`] and branch lengths kept above
/// [`MIN_BRANCH_LENGTH`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Floor for distance variances.
    pub var_min: f64,
    /// Value reported for saturated or undefined distances.
    pub dist_max: f64,
    /// Smallest branch length the optimisers will propose.
    pub min_branch_length: f64,
    /// Newton settings for pairwise ML distances.
    pub distance_optimiser: OptimiserConfig,
    /// Sweep settings for `optimise_parameters`.
    pub parameter_optimiser: OptimiserConfig,
    /// Round settings for `optimise_topology`.
    pub topology_optimiser: OptimiserConfig,
    /// Seed for the simulation random number generator.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            var_min: VARMIN,
            dist_max: DISTMAX,
            min_branch_length: MIN_BRANCH_LENGTH,
            distance_optimiser: OptimiserConfig::for_distances(),
            parameter_optimiser: OptimiserConfig::default(),
            topology_optimiser: OptimiserConfig::default(),
            seed: DEFAULT_SEED,
        }
    }
}

impl EngineConfig {
    fn bounded(&self, base: &OptimiserConfig) -> OptimiserConfig {
        OptimiserConfig {
            branch_bounds: (self.min_branch_length, self.dist_max),
            ..base.clone()
        }
    }

    /// Options for the distance estimators.
    pub fn distance_options(&self) -> DistanceOptions {
        DistanceOptions {
            var_min: self.var_min,
            dist_max: self.dist_max,
            optimiser: self.bounded(&self.distance_optimiser),
        }
    }

    pub fn parameter_config(&self) -> OptimiserConfig {
        self.bounded(&self.parameter_optimiser)
    }

    pub fn topology_config(&self) -> OptimiserConfig {
        self.bounded(&self.topology_optimiser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let cfg = EngineConfig::default();
        let opts = cfg.distance_options();
        assert_eq!(opts.var_min, VARMIN);
        assert_eq!(opts.dist_max, DISTMAX);
        assert_eq!(opts.optimiser.branch_bounds, (MIN_BRANCH_LENGTH, DISTMAX));
        assert!((opts.optimiser.tolerance - 1e-6).abs() < 1e-15);
        assert!((cfg.parameter_config().tolerance - 1e-3).abs() < 1e-15);
        assert_eq!(cfg.topology_config().max_rounds, 10);
    }

    #[test]
    fn overrides_flow_into_bounds() {
        let cfg = EngineConfig {
            min_branch_length: 1e-4,
            dist_max: 5.0,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.parameter_config().branch_bounds, (1e-4, 5.0));
        assert_eq!(cfg.distance_options().optimiser.branch_bounds, (1e-4, 5.0));
    }

    #[cfg(feature = "cli")]
    #[test]
    fn partial_json_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"seed": 7}"#).unwrap();
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.var_min, VARMIN);
    }
}
