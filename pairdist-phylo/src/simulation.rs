//! Sequence evolution along a fixed tree.
//!
//! Each site draws a rate category uniformly and a root state from the
//! model's equilibrium frequencies, then evolves down every branch with
//! `P(t * r_c)`. Random numbers come from a seeded xorshift generator, so a
//! given seed always reproduces the same alignment.

use log::debug;
use pairdist_core::{PairdistError, Result};
use pairdist_seq::{Alignment, DataType, SequenceRecord};

use crate::rates::GammaRates;
use crate::subst_model::SubstitutionModel;
use crate::tree::{NodeId, PhyloTree};

/// Seed used when none is configured.
pub const DEFAULT_SEED: u64 = 0x5EED_2024;

/// Xorshift64 pseudo-random number generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        // Xorshift requires a nonzero state.
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform draw in `[0, 1)`, from the top 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform index in `0..n`; `n` must be positive.
    pub fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

impl Default for SimRng {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

/// First index whose cumulative probability reaches `u`.
fn sample_state(cumulative: &[f64], u: f64) -> usize {
    for (i, &c) in cumulative.iter().enumerate() {
        if u <= c {
            return i;
        }
    }
    // Rounding can leave u just above the last entry.
    cumulative.len() - 1
}

fn cumulative_from_row(row: &[f64]) -> Vec<f64> {
    let mut cum = Vec::with_capacity(row.len());
    let mut acc = 0.0;
    for &p in row {
        acc += p;
        cum.push(acc);
    }
    if let Some(last) = cum.last_mut() {
        *last = 1.0;
    }
    cum
}

/// A simulator bound to one tree.
#[derive(Debug, Clone)]
pub struct SequenceSimulator {
    tree: PhyloTree,
    names: Vec<(NodeId, String)>,
}

impl SequenceSimulator {
    /// Bind `tree`. Leaves are reported in pre-order; unnamed leaves are
    /// called `leaf_<id>`.
    pub fn new(tree: &PhyloTree) -> Result<Self> {
        let names: Vec<(NodeId, String)> = tree
            .iter_preorder()
            .filter_map(|id| tree.get_node(id).filter(|n| n.is_leaf()).map(|n| (id, n)))
            .map(|(id, n)| (id, n.name.clone().unwrap_or_else(|| format!("leaf_{}", id))))
            .collect();
        if names.len() < 2 {
            return Err(PairdistError::InvalidInput(
                "simulation tree needs at least two leaves".into(),
            ));
        }
        Ok(Self {
            tree: tree.clone(),
            names,
        })
    }

    pub fn tree(&self) -> &PhyloTree {
        &self.tree
    }

    /// Leaf names in output order.
    pub fn leaf_names(&self) -> Vec<String> {
        self.names.iter().map(|(_, n)| n.clone()).collect()
    }

    /// Simulate `nsites` columns under `model` and `rates`.
    ///
    /// # Examples
    ///
    /// ```
    /// use pairdist_phylo::factory::create_model;
    /// use pairdist_phylo::newick;
    /// use pairdist_phylo::rates::GammaRates;
    /// use pairdist_phylo::simulation::{SequenceSimulator, SimRng};
    ///
    /// let tree = newick::parse("((A:0.1,B:0.2):0.3,C:0.4);").unwrap();
    /// let sim = SequenceSimulator::new(&tree).unwrap();
    /// let model = create_model("HKY85").unwrap();
    /// let mut rng = SimRng::new(42);
    /// let aln = sim.simulate(model.as_ref(), &GammaRates::uniform(), 100, &mut rng).unwrap();
    /// assert_eq!(aln.len(), 3);
    /// assert_eq!(aln.n_sites(), 100);
    /// ```
    pub fn simulate(
        &self,
        model: &dyn SubstitutionModel,
        rates: &GammaRates,
        nsites: usize,
        rng: &mut SimRng,
    ) -> Result<Alignment> {
        if nsites == 0 {
            return Err(PairdistError::InvalidInput(
                "number of simulated sites must be > 0".into(),
            ));
        }
        let n_states = model.n_states();
        let data_type = DataType::from_n_states(n_states).ok_or_else(|| {
            PairdistError::Config(format!(
                "model {} has {} states, which matches no alphabet",
                model.name(),
                n_states
            ))
        })?;
        let ncat = rates.ncat();

        let categories: Vec<usize> = (0..nsites).map(|_| rng.below(ncat)).collect();

        let eq_cum = cumulative_from_row(model.frequencies());
        let root = self.tree.root();
        let mut node_seqs: Vec<Option<Vec<usize>>> = vec![None; self.tree.node_count()];
        node_seqs[root] = Some(
            (0..nsites)
                .map(|_| sample_state(&eq_cum, rng.next_f64()))
                .collect(),
        );

        let mut n_substitutions = 0usize;
        for node_id in self.tree.iter_preorder() {
            if node_id == root {
                continue;
            }
            let Some(node) = self.tree.get_node(node_id) else {
                continue;
            };
            let Some(parent_id) = node.parent else {
                continue;
            };
            let t = node.branch_length.unwrap_or(0.0).max(0.0);

            // Cumulative rows per category, per parent state.
            let cum_rows: Vec<Vec<Vec<f64>>> = rates
                .rates()
                .iter()
                .map(|&r| {
                    model
                        .transition_probs(t * r)
                        .iter()
                        .map(|row| cumulative_from_row(row))
                        .collect()
                })
                .collect();

            let parent_seq = node_seqs[parent_id].as_ref().ok_or_else(|| {
                PairdistError::Other(format!("node {} visited before its parent", node_id))
            })?;
            let mut child_seq = Vec::with_capacity(nsites);
            for (site, &parent_state) in parent_seq.iter().enumerate() {
                let rows = &cum_rows[categories[site]];
                let child_state = sample_state(&rows[parent_state], rng.next_f64());
                if child_state != parent_state {
                    n_substitutions += 1;
                }
                child_seq.push(child_state);
            }
            node_seqs[node_id] = Some(child_seq);
        }

        let states = data_type.states();
        let mut records = Vec::with_capacity(self.names.len());
        for (leaf, name) in &self.names {
            let seq = node_seqs[*leaf].as_ref().ok_or_else(|| {
                PairdistError::Other(format!("leaf {} received no sequence", name))
            })?;
            records.push(SequenceRecord::new(
                name.clone(),
                seq.iter().map(|&s| states[s]).collect::<Vec<u8>>(),
            ));
        }
        debug!(
            "simulated {} sites on {} leaves under {} ({} substitutions)",
            nsites,
            records.len(),
            model.name(),
            n_substitutions
        );
        Alignment::new(data_type, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{fast_distances, DistanceOptions};
    use crate::factory::create_model;
    use crate::newick;

    fn balanced_tree() -> PhyloTree {
        newick::parse("((A:0.1,B:0.1):0.1,(C:0.1,D:0.1):0.1);").unwrap()
    }

    #[test]
    fn uniform_draws_exclude_one() {
        let mut rng = SimRng::new(11);
        let mut sum = 0.0;
        for _ in 0..100_000 {
            let u = rng.next_f64();
            assert!((0.0..1.0).contains(&u), "{u}");
            sum += u;
        }
        assert!((sum / 100_000.0 - 0.5).abs() < 0.01);
        // Largest possible draw stays below one.
        assert!(((u64::MAX >> 11) as f64 / (1u64 << 53) as f64) < 1.0);
    }

    #[test]
    fn leaf_count_and_order() {
        let tree = newick::parse("((B:0.1,A:0.1):0.1,(D:0.1,C:0.1):0.1);").unwrap();
        let sim = SequenceSimulator::new(&tree).unwrap();
        let model = create_model("JC69").unwrap();
        let aln = sim
            .simulate(model.as_ref(), &GammaRates::uniform(), 50, &mut SimRng::new(3))
            .unwrap();
        assert_eq!(aln.names(), vec!["B", "A", "D", "C"]);
        assert_eq!(aln.data_type(), DataType::Dna);
    }

    #[test]
    fn zero_branches_identical_sequences() {
        let tree = newick::parse("((A:0,B:0):0,(C:0,D:0):0);").unwrap();
        let sim = SequenceSimulator::new(&tree).unwrap();
        let model = create_model("JC69").unwrap();
        let aln = sim
            .simulate(model.as_ref(), &GammaRates::new(4, 0.5).unwrap(), 500, &mut SimRng::new(99))
            .unwrap();
        for i in 1..aln.len() {
            assert_eq!(aln.row(0), aln.row(i));
        }
    }

    #[test]
    fn same_seed_same_output() {
        let sim = SequenceSimulator::new(&balanced_tree()).unwrap();
        let model = create_model("GTR").unwrap();
        let rates = GammaRates::new(4, 1.0).unwrap();
        let a = sim.simulate(model.as_ref(), &rates, 200, &mut SimRng::new(7)).unwrap();
        let b = sim.simulate(model.as_ref(), &rates, 200, &mut SimRng::new(7)).unwrap();
        let c = sim.simulate(model.as_ref(), &rates, 200, &mut SimRng::new(8)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn protein_model_gives_protein_alignment() {
        let sim = SequenceSimulator::new(&balanced_tree()).unwrap();
        let model = create_model("LG08").unwrap();
        let aln = sim
            .simulate(model.as_ref(), &GammaRates::uniform(), 100, &mut SimRng::new(1))
            .unwrap();
        assert_eq!(aln.data_type(), DataType::Protein);
        assert_eq!(aln.n_sites(), 100);
    }

    #[test]
    fn zero_sites_rejected() {
        let sim = SequenceSimulator::new(&balanced_tree()).unwrap();
        let model = create_model("JC69").unwrap();
        let res = sim.simulate(model.as_ref(), &GammaRates::uniform(), 0, &mut SimRng::new(1));
        assert!(res.is_err());
        let single = PhyloTree::new();
        assert!(SequenceSimulator::new(&single).is_err());
    }

    #[test]
    fn fast_distances_track_path_lengths() {
        let tree = newick::parse("((A:0.05,B:0.15):0.1,(C:0.2,D:0.05):0.1);").unwrap();
        let sim = SequenceSimulator::new(&tree).unwrap();
        let model = create_model("JC69").unwrap();
        let aln = sim
            .simulate(model.as_ref(), &GammaRates::uniform(), 20_000, &mut SimRng::new(2024))
            .unwrap();
        let est = fast_distances(&aln, &DistanceOptions::default());
        let names = aln.names();
        for i in 0..names.len() {
            for j in (i + 1)..names.len() {
                let a = tree.find_leaf(&names[i]).unwrap();
                let b = tree.find_leaf(&names[j]).unwrap();
                let truth = tree.path_length(a, b).unwrap();
                let d = est.distances.get(i, j);
                assert!(
                    (d - truth).abs() < 0.03,
                    "{}-{}: estimated {} vs path {}",
                    names[i],
                    names[j],
                    d,
                    truth
                );
            }
        }
    }

    #[test]
    fn rng_is_uniform_enough() {
        let mut rng = SimRng::new(11);
        let mut counts = [0usize; 4];
        for _ in 0..40_000 {
            counts[rng.below(4)] += 1;
        }
        for &c in &counts {
            assert!((c as f64 - 10_000.0).abs() < 500.0, "{:?}", counts);
        }
        assert_eq!(SimRng::new(0), SimRng::new(1));
    }
}
