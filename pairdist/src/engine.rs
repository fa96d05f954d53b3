//! The stateful analysis surface.
//!
//! An [`Engine`] owns one alignment, at most one substitution model, a
//! discrete gamma rate model and whatever has been derived from them:
//! distance and variance matrices, a likelihood bound to a tree, a simulator
//! and the last simulated alignment. Derived state lives in `Option` fields
//! and is dropped whenever its inputs change.
//!
//! Every operation validates its arguments before touching state, so a
//! failed call leaves the engine as it was.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use log::{debug, info, warn};
use pairdist_core::{PairdistError, Result};
use pairdist_phylo::construct::bionj;
use pairdist_phylo::factory::{check_compatible, create_model, is_protein_model};
use pairdist_phylo::newick::{self, TreeSource};
use pairdist_phylo::optimize::{self, Budget};
use pairdist_phylo::tree_search::nni_search;
use pairdist_phylo::{
    fast_distances, ml_distances, DistanceMatrix, GammaRates, PhyloTree, SequenceSimulator, SimRng,
    SubstitutionModel, TreeLikelihood,
};
use pairdist_seq::{Alignment, AlignmentFormat, DataType};

use crate::config::EngineConfig;

/// Ordering convention for the six nucleotide exchange rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateOrder {
    /// `{A-C, A-G, A-T, C-G, C-T, G-T}`.
    Acgt,
    /// GTR letters `{a, b, c, d, e}` = `{T-C, T-A, T-G, C-A, C-G}`, with A-G fixed at 1.
    Tcag,
}

impl FromStr for RateOrder {
    type Err = PairdistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "acgt" => Ok(RateOrder::Acgt),
            "tcag" => Ok(RateOrder::Tcag),
            other => Err(PairdistError::Config(format!(
                "unrecognised rate order '{}': accepted orders are acgt and tcag",
                other
            ))),
        }
    }
}

fn no_model() -> PairdistError {
    PairdistError::Config("no model of evolution available; call set_model first".into())
}

fn no_likelihood() -> PairdistError {
    PairdistError::Uninitialised("likelihood has not been initialised".into())
}

fn no_distances() -> PairdistError {
    PairdistError::NotComputed("distances have not been computed".into())
}

fn no_variances() -> PairdistError {
    PairdistError::NotComputed("variances have not been computed".into())
}

/// Alignment, model, rates and everything derived from them.
///
/// # Examples
///
/// ```
/// use pairdist::Engine;
/// use pairdist_seq::DataType;
///
/// let mut engine = Engine::from_sequences(
///     vec![
///         ("a", "ACGTACGTACGTACGTACGT"),
///         ("b", "ACGTACGAACGTACGTACGT"),
///         ("c", "ACGAACGAACGTTCGTACGT"),
///         ("d", "TCGAACGAACCTTCGTACCT"),
///     ],
///     DataType::Dna,
/// )
/// .unwrap();
/// engine.set_model("HKY85").unwrap();
/// engine.compute_distances().unwrap();
/// let tree = engine.get_nj_tree().unwrap();
/// engine.initialise_likelihood(&tree).unwrap();
/// let lnl = engine.optimise_parameters(false).unwrap();
/// assert!(lnl < 0.0);
/// ```
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    alignment: Alignment,
    model: Option<Box<dyn SubstitutionModel>>,
    model_name: Option<String>,
    rates: GammaRates,
    distances: Option<DistanceMatrix>,
    variances: Option<DistanceMatrix>,
    likelihood: Option<TreeLikelihood>,
    simulator: Option<SequenceSimulator>,
    simulated: Option<Alignment>,
    rng: SimRng,
}

impl Engine {
    /// Wrap an alignment with default settings and rates (4 categories, α = 1).
    pub fn new(alignment: Alignment) -> Self {
        Self::with_config(alignment, EngineConfig::default())
    }

    pub fn with_config(alignment: Alignment, config: EngineConfig) -> Self {
        let rng = SimRng::new(config.seed);
        Self {
            config,
            alignment,
            model: None,
            model_name: None,
            rates: GammaRates::default(),
            distances: None,
            variances: None,
            likelihood: None,
            simulator: None,
            simulated: None,
            rng,
        }
    }

    /// Build from in-memory `(name, sequence)` pairs.
    pub fn from_sequences<I, N, S>(pairs: I, data_type: DataType) -> Result<Self>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: AsRef<[u8]>,
    {
        Ok(Self::new(Alignment::from_pairs(pairs, data_type)?))
    }

    /// Read an alignment file. `interleaved` only applies to PHYLIP.
    pub fn from_file(
        path: impl AsRef<Path>,
        format: AlignmentFormat,
        data_type: DataType,
        interleaved: bool,
    ) -> Result<Self> {
        let alignment = Alignment::read(path, format, data_type, interleaved)?;
        info!(
            "read {} {} sequences of length {}",
            alignment.len(),
            data_type.name(),
            alignment.n_sites()
        );
        Ok(Self::new(alignment))
    }

    /// Read an alignment file and try to install `model`.
    ///
    /// A failure to read the file is an error. A model that cannot be set is
    /// logged and handed back next to the engine, which is left without a
    /// model.
    pub fn from_file_with_model(
        path: impl AsRef<Path>,
        format: AlignmentFormat,
        data_type: DataType,
        model: &str,
        interleaved: bool,
    ) -> Result<(Self, Option<PairdistError>)> {
        let mut engine = Self::from_file(path, format, data_type, interleaved)?;
        let failure = match engine.set_model(model) {
            Ok(()) => None,
            Err(e) => {
                warn!("could not set model {}: {}", model, e);
                Some(e)
            }
        };
        Ok((engine, failure))
    }

    /// Replace the alignment with the contents of a file.
    ///
    /// Distances and likelihood are cleared. A model whose state count no
    /// longer fits the new data type is dropped.
    pub fn read_alignment(
        &mut self,
        path: impl AsRef<Path>,
        format: AlignmentFormat,
        data_type: DataType,
        interleaved: bool,
    ) -> Result<()> {
        let alignment = Alignment::read(path, format, data_type, interleaved)?;
        let stale = self
            .model
            .as_ref()
            .is_some_and(|m| m.n_states() != data_type.n_states());
        if stale {
            warn!(
                "dropping model {}: it does not apply to {} data",
                self.model_name.as_deref().unwrap_or("?"),
                data_type.name()
            );
            self.model = None;
            self.model_name = None;
        }
        self.alignment = alignment;
        self.clear_distances();
        self.clear_likelihood();
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn alignment(&self) -> &Alignment {
        &self.alignment
    }

    // -- model and rates ----------------------------------------------------

    /// Install the model called `name`.
    pub fn set_model(&mut self, name: &str) -> Result<()> {
        let data_type = self.alignment.data_type();
        check_compatible(data_type, name)?;
        let model = create_model(name)?;
        if model.n_states() != data_type.n_states() {
            return Err(PairdistError::Config(format!(
                "model {} has {} states but the alignment is {}",
                name,
                model.n_states(),
                data_type.name()
            )));
        }
        debug!("model set to {}", name);
        self.model = Some(model);
        self.model_name = Some(name.to_string());
        self.clear_distances();
        self.clear_likelihood();
        Ok(())
    }

    pub fn model(&self) -> Option<&dyn SubstitutionModel> {
        self.model.as_deref()
    }

    /// Name the current model was requested under.
    pub fn get_model(&self) -> Result<&str> {
        self.model_name.as_deref().ok_or_else(no_model)
    }

    fn require_model(&self) -> Result<&dyn SubstitutionModel> {
        self.model.as_deref().ok_or_else(no_model)
    }

    fn require_nucleotide_model(&self) -> Result<&dyn SubstitutionModel> {
        let model = self.require_model()?;
        if is_protein_model(model) {
            return Err(PairdistError::Config(
                "Protein model disallowed: exchange rates can only be read or set on nucleotide models"
                    .into(),
            ));
        }
        Ok(model)
    }

    /// Set the GTR exchange rates.
    ///
    /// With [`RateOrder::Acgt`], `values` holds all six rates and is scaled
    /// so that A-G is 1. With [`RateOrder::Tcag`], `values` holds `a..e`;
    /// anything past the fifth value is ignored. Models without a given
    /// rate parameter reject it with `InvalidInput`.
    pub fn set_rates(&mut self, values: &[f64], order: RateOrder) -> Result<()> {
        let model = self.require_nucleotide_model()?;
        let assignments = match order {
            RateOrder::Acgt => {
                if values.len() != 6 {
                    return Err(PairdistError::Dimension {
                        expected: 6,
                        found: values.len(),
                    });
                }
                let ag = values[1];
                if !(ag.is_finite() && ag > 0.0) {
                    return Err(PairdistError::InvalidInput(format!(
                        "A-G rate must be positive to normalise by, got {}",
                        ag
                    )));
                }
                [
                    ("a", values[4] / ag),
                    ("b", values[2] / ag),
                    ("c", values[5] / ag),
                    ("d", values[0] / ag),
                    ("e", values[3] / ag),
                ]
            }
            RateOrder::Tcag => {
                if values.len() < 5 {
                    return Err(PairdistError::Dimension {
                        expected: 5,
                        found: values.len(),
                    });
                }
                [
                    ("a", values[0]),
                    ("b", values[1]),
                    ("c", values[2]),
                    ("d", values[3]),
                    ("e", values[4]),
                ]
            }
        };
        let mut candidate = model.clone_box();
        for (name, value) in assignments {
            candidate.set_parameter(name, value)?;
        }
        self.model = Some(candidate);
        self.clear_distances();
        self.clear_likelihood();
        Ok(())
    }

    /// Current exchange rates, six values in the requested order.
    ///
    /// [`RateOrder::Acgt`] is normalised so that G-T is 1;
    /// [`RateOrder::Tcag`] reports `a..e` followed by the fixed A-G rate.
    pub fn get_rates(&self, order: RateOrder) -> Result<Vec<f64>> {
        let model = self.require_nucleotide_model()?;
        let a = model.parameter("a")?;
        let b = model.parameter("b")?;
        let c = model.parameter("c")?;
        let d = model.parameter("d")?;
        let e = model.parameter("e")?;
        Ok(match order {
            RateOrder::Acgt => vec![d / c, 1.0 / c, b / c, e / c, a / c, 1.0],
            RateOrder::Tcag => vec![a, b, c, d, e, 1.0],
        })
    }

    /// Set the equilibrium frequencies (4 for DNA, 20 for protein).
    pub fn set_frequencies(&mut self, freqs: &[f64]) -> Result<()> {
        let model = self.require_model()?;
        let required = self.alignment.data_type().n_states();
        if freqs.len() != required {
            return Err(PairdistError::Config(format!(
                "frequencies vector is the wrong length (dna: 4; aa: 20): expected {}, found {}",
                required,
                freqs.len()
            )));
        }
        let mut candidate = model.clone_box();
        candidate.set_frequencies(freqs)?;
        self.model = Some(candidate);
        self.clear_distances();
        self.clear_likelihood();
        Ok(())
    }

    pub fn get_frequencies(&self) -> Result<Vec<f64>> {
        Ok(self.require_model()?.frequencies().to_vec())
    }

    pub fn get_exchangeabilities(&self) -> Result<Vec<Vec<f64>>> {
        Ok(self.require_model()?.exchangeabilities())
    }

    /// Replace the rate model with `ncat` gamma categories of shape `alpha`.
    pub fn set_gamma(&mut self, ncat: usize, alpha: f64) -> Result<()> {
        self.rates = GammaRates::new(ncat, alpha)?;
        self.clear_distances();
        self.clear_likelihood();
        Ok(())
    }

    /// Change the gamma shape.
    ///
    /// Distances are cleared. The likelihood stays bound because it reads
    /// the rates on every evaluation.
    pub fn set_alpha(&mut self, alpha: f64) -> Result<()> {
        self.rates.set_alpha(alpha)?;
        self.clear_distances();
        Ok(())
    }

    pub fn get_alpha(&self) -> f64 {
        self.rates.alpha()
    }

    pub fn rates(&self) -> &GammaRates {
        &self.rates
    }

    // -- distances ----------------------------------------------------------

    /// Pairwise maximum-likelihood distances and variances under the
    /// current model and rates.
    pub fn compute_distances(&mut self) -> Result<()> {
        let model = self.require_model()?;
        let estimates = ml_distances(
            &self.alignment,
            model,
            &self.rates,
            &self.config.distance_options(),
        )?;
        self.distances = Some(estimates.distances);
        self.variances = Some(estimates.variances);
        Ok(())
    }

    /// Closed-form Jukes-Cantor distances and variances. Needs no model.
    pub fn fast_compute_distances(&mut self) {
        let estimates = fast_distances(&self.alignment, &self.config.distance_options());
        self.distances = Some(estimates.distances);
        self.variances = Some(estimates.variances);
    }

    /// Install an externally computed distance matrix.
    ///
    /// The matrix must be n×n for the n sequences. Only the distances are
    /// replaced; any stored variances are kept.
    pub fn set_distance_matrix(&mut self, rows: &[Vec<f64>]) -> Result<()> {
        let matrix = DistanceMatrix::from_rows(self.alignment.names(), rows)?;
        self.distances = Some(matrix);
        Ok(())
    }

    pub fn distance_matrix(&self) -> Option<&DistanceMatrix> {
        self.distances.as_ref()
    }

    pub fn get_distances(&self) -> Result<Vec<Vec<f64>>> {
        Ok(self.distances.as_ref().ok_or_else(no_distances)?.to_rows())
    }

    pub fn get_variances(&self) -> Result<Vec<Vec<f64>>> {
        Ok(self.variances.as_ref().ok_or_else(no_variances)?.to_rows())
    }

    /// Distances above the diagonal, variances below it.
    pub fn get_distance_variance_matrix(&self) -> Result<Vec<Vec<f64>>> {
        let distances = self.distances.as_ref().ok_or_else(no_distances)?;
        let variances = self.variances.as_ref().ok_or_else(no_variances)?;
        Ok(distances.pack_with_variances(variances)?.to_rows())
    }

    // -- trees --------------------------------------------------------------

    /// BioNJ tree from the stored distances, as Newick.
    ///
    /// The join variances start from the distances themselves; the estimated
    /// variance matrix is reported but does not steer the tree.
    pub fn get_nj_tree(&self) -> Result<String> {
        let distances = self.distances.as_ref().ok_or_else(no_distances)?;
        let tree = bionj(distances, None)?;
        Ok(newick::write(&tree))
    }

    /// BioNJ tree from a caller-supplied matrix. Stored state is untouched.
    pub fn get_nj_tree_from(&self, rows: &[Vec<f64>]) -> Result<String> {
        let matrix = DistanceMatrix::from_rows(self.alignment.names(), rows)?;
        let tree = bionj(&matrix, None)?;
        Ok(newick::write(&tree))
    }

    // -- likelihood ---------------------------------------------------------

    /// Bind the likelihood to a tree given as a file path or Newick text.
    pub fn initialise_likelihood(&mut self, tree: &str) -> Result<()> {
        self.require_model()?;
        let tree = TreeSource::resolve(tree)?.load()?;
        self.bind_likelihood(&tree)
    }

    pub fn initialise_likelihood_from_newick(&mut self, newick_text: &str) -> Result<()> {
        self.require_model()?;
        let tree = newick::parse(newick_text)?;
        self.bind_likelihood(&tree)
    }

    pub fn initialise_likelihood_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.require_model()?;
        let tree = newick::read_newick_file(path)?;
        self.bind_likelihood(&tree)
    }

    fn bind_likelihood(&mut self, tree: &PhyloTree) -> Result<()> {
        let model = self.require_model()?;
        let likelihood = TreeLikelihood::new(tree, &self.alignment.with_gaps_as_unknown())?;
        let lnl = likelihood.log_likelihood(model, &self.rates)?;
        info!(
            "likelihood bound to a {}-leaf tree, lnL = {:.4}",
            tree.leaf_count(),
            lnl
        );
        self.likelihood = Some(likelihood);
        Ok(())
    }

    /// Optimise model parameters, the gamma shape and (unless fixed) branch
    /// lengths. Returns the new log-likelihood.
    pub fn optimise_parameters(&mut self, fix_branch_lengths: bool) -> Result<f64> {
        let config = self.config.parameter_config();
        let likelihood = self.likelihood.as_mut().ok_or_else(no_likelihood)?;
        let model = self.model.as_mut().ok_or_else(no_model)?;
        let mut budget = Budget::new(config.max_evaluations);
        let result = optimize::optimise_parameters(
            likelihood,
            model.as_mut(),
            &mut self.rates,
            fix_branch_lengths,
            &config,
            &mut budget,
        );
        // Model parameters may have moved even if a later step failed.
        self.clear_distances();
        let lnl = result?;
        info!(
            "parameter optimisation finished: lnL = {:.4} after {} evaluations",
            lnl,
            budget.used()
        );
        Ok(lnl)
    }

    /// NNI search from the bound tree. Returns the new log-likelihood.
    pub fn optimise_topology(&mut self, fix_model_params: bool) -> Result<f64> {
        let config = self.config.topology_config();
        let likelihood = self.likelihood.as_mut().ok_or_else(no_likelihood)?;
        let model = self.model.as_mut().ok_or_else(no_model)?;
        let mut budget = Budget::new(config.max_evaluations);
        let result = nni_search(
            likelihood,
            model.as_mut(),
            &mut self.rates,
            fix_model_params,
            &config,
            &mut budget,
        );
        if !fix_model_params {
            self.clear_distances();
        }
        result
    }

    /// Log-likelihood of the bound tree under the current model and rates.
    pub fn get_likelihood(&self) -> Result<f64> {
        let likelihood = self.likelihood.as_ref().ok_or_else(no_likelihood)?;
        likelihood.log_likelihood(self.require_model()?, &self.rates)
    }

    /// The bound tree with its current branch lengths, as Newick.
    pub fn get_tree(&self) -> Result<String> {
        let likelihood = self.likelihood.as_ref().ok_or_else(no_likelihood)?;
        Ok(newick::write(likelihood.tree()))
    }

    // -- simulation ---------------------------------------------------------

    fn build_simulator(&self, tree: &str) -> Result<SequenceSimulator> {
        self.require_model()?;
        let tree = TreeSource::resolve(tree)?.load()?;
        SequenceSimulator::new(&tree)
    }

    /// Bind a simulator to a tree given as a file path or Newick text.
    pub fn set_simulator(&mut self, tree: &str) -> Result<()> {
        self.simulator = Some(self.build_simulator(tree)?);
        Ok(())
    }

    /// Simulate `nsites` columns on the simulator's tree under the current
    /// model and rates.
    pub fn simulate(&mut self, nsites: usize) -> Result<Vec<(String, String)>> {
        let simulator = self.simulator.as_ref().ok_or_else(|| {
            PairdistError::Uninitialised("no simulator has been set; call set_simulator first".into())
        })?;
        let model = self.model.as_deref().ok_or_else(no_model)?;
        let alignment = simulator.simulate(model, &self.rates, nsites, &mut self.rng)?;
        let pairs = alignment.to_pairs();
        self.simulated = Some(alignment);
        Ok(pairs)
    }

    /// Bind a simulator to `tree` and simulate on it.
    pub fn simulate_on(&mut self, nsites: usize, tree: &str) -> Result<Vec<(String, String)>> {
        let simulator = self.build_simulator(tree)?;
        let model = self.model.as_deref().ok_or_else(no_model)?;
        let alignment = simulator.simulate(model, &self.rates, nsites, &mut self.rng)?;
        let pairs = alignment.to_pairs();
        self.simulator = Some(simulator);
        self.simulated = Some(alignment);
        Ok(pairs)
    }

    pub fn get_simulated_sequences(&self) -> Result<Vec<(String, String)>> {
        self.simulated
            .as_ref()
            .map(Alignment::to_pairs)
            .ok_or_else(|| PairdistError::NotComputed("no sequences have been simulated".into()))
    }

    /// Write the last simulated alignment.
    pub fn write_alignment(
        &self,
        path: impl AsRef<Path>,
        format: AlignmentFormat,
        interleaved: bool,
    ) -> Result<()> {
        let simulated = self.simulated.as_ref().ok_or_else(|| {
            PairdistError::NotComputed("no simulated alignment to write".into())
        })?;
        simulated.write(path, format, interleaved)
    }

    /// Restart the simulation random number generator.
    pub fn set_seed(&mut self, seed: u64) {
        self.config.seed = seed;
        self.rng = SimRng::new(seed);
    }

    // -- alignment accessors ------------------------------------------------

    pub fn get_names(&self) -> Vec<String> {
        self.alignment.names()
    }

    pub fn get_number_of_sequences(&self) -> usize {
        self.alignment.len()
    }

    pub fn get_alignment_length(&self) -> usize {
        self.alignment.n_sites()
    }

    pub fn is_dna(&self) -> bool {
        self.alignment.data_type() == DataType::Dna
    }

    pub fn is_protein(&self) -> bool {
        self.alignment.data_type() == DataType::Protein
    }

    fn clear_distances(&mut self) {
        self.distances = None;
        self.variances = None;
    }

    fn clear_likelihood(&mut self) {
        self.likelihood = None;
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sequences x {} sites ({}), model {}, gamma {} x alpha {}",
            self.alignment.len(),
            self.alignment.n_sites(),
            self.alignment.data_type().name(),
            self.model_name.as_deref().unwrap_or("none"),
            self.rates.ncat(),
            self.rates.alpha()
        )
    }
}
