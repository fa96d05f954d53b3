//! Phylogenetic inference for pairdist.
//!
//! - **Trees**: arena-backed [`PhyloTree`] with Newick reading and writing
//! - **Substitution models**: the [`SubstitutionModel`] contract, the DNA
//!   family from JC69 to GTR, empirical protein matrices and
//!   [`create_model`] for construction by name
//! - **Rate heterogeneity**: discrete gamma [`GammaRates`]
//! - **Distances**: closed-form Jukes-Cantor and per-pair maximum-likelihood
//!   estimates with variances
//! - **Tree building**: BioNJ and neighbor-joining
//! - **Likelihood**: Felsenstein pruning with exact branch derivatives
//! - **Optimisation**: Newton and Brent searches, parameter sweeps and NNI
//! - **Simulation**: sequence evolution along a tree
//!
//! # Example
//!
//! ```
//! use pairdist_phylo::{bionj, create_model, fast_distances, DistanceOptions, GammaRates, TreeLikelihood};
//! use pairdist_seq::{Alignment, DataType};
//!
//! let aln = Alignment::from_pairs(
//!     vec![
//!         ("a", "ACGTACGTACGTACGT"),
//!         ("b", "ACGTACGAACGTACGT"),
//!         ("c", "ACGAACGAACGTTCGT"),
//!         ("d", "TCGAACGAACCTTCGT"),
//!     ],
//!     DataType::Dna,
//! )
//! .unwrap();
//! let est = fast_distances(&aln, &DistanceOptions::default());
//! let tree = bionj(&est.distances, Some(&est.variances)).unwrap();
//! assert_eq!(tree.leaf_count(), 4);
//!
//! let model = create_model("HKY85").unwrap();
//! let lik = TreeLikelihood::new(&tree, &aln).unwrap();
//! let lnl = lik.log_likelihood(model.as_ref(), &GammaRates::uniform()).unwrap();
//! assert!(lnl < 0.0);
//! ```

pub mod construct;
pub mod distance;
pub mod factory;
pub mod likelihood;
pub mod models;
pub mod newick;
pub mod optimize;
pub mod protein_models;
pub mod rates;
pub mod simulation;
pub mod subst_model;
pub mod tree;
pub mod tree_search;

pub use construct::{bionj, neighbor_joining, JoinMethod};
pub use distance::{
    fast_distances, ml_distances, DistanceEstimates, DistanceMatrix, DistanceOptions, DISTMAX, VARMIN,
};
pub use factory::{check_compatible, create_model};
pub use likelihood::{TreeLikelihood, MIN_BRANCH_LENGTH};
pub use newick::TreeSource;
pub use optimize::{Budget, OptimiserConfig};
pub use rates::GammaRates;
pub use simulation::{SequenceSimulator, SimRng};
pub use subst_model::SubstitutionModel;
pub use tree::{Node, NodeId, PhyloTree};
pub use tree_search::nni_search;
