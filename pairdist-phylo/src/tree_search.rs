//! Nearest-neighbour-interchange topology search.
//!
//! Around an internal edge `(p, c)` the four subtrees are `c`'s two
//! children and a sibling `s` of `c` under `p`. Swapping `s` with either
//! child gives the two alternative topologies. A swap is kept when
//! re-optimising the five branches around the edge beats the current
//! log-likelihood by more than the tolerance.

use log::{debug, info};
use pairdist_core::{PairdistError, Result};

use crate::likelihood::TreeLikelihood;
use crate::optimize::{optimise_branch_lengths, optimise_branches, optimise_parameters, Budget, OptimiserConfig};
use crate::rates::GammaRates;
use crate::subst_model::SubstitutionModel;
use crate::tree::{Node, NodeId, PhyloTree};

/// Exchange `sibling` (a child of `parent`) with `nephew` (a child of
/// `child`). Node ids and branch lengths are preserved; each moved subtree
/// keeps the length of the branch above it.
pub fn nni_swap(
    tree: &PhyloTree,
    parent_id: NodeId,
    child_id: NodeId,
    sibling_id: NodeId,
    nephew_id: NodeId,
) -> Result<PhyloTree> {
    let node = |id: NodeId| {
        tree.get_node(id)
            .ok_or_else(|| PairdistError::InvalidInput(format!("node {} out of range", id)))
    };
    let (parent, child) = (node(parent_id)?, node(child_id)?);
    if child.parent != Some(parent_id) || child_id == sibling_id {
        return Err(PairdistError::InvalidInput(format!(
            "node {} is not a child of {}",
            child_id, parent_id
        )));
    }
    if !parent.children.contains(&sibling_id) {
        return Err(PairdistError::InvalidInput(format!(
            "node {} is not a child of {}",
            sibling_id, parent_id
        )));
    }
    if !child.children.contains(&nephew_id) {
        return Err(PairdistError::InvalidInput(format!(
            "node {} is not a child of {}",
            nephew_id, child_id
        )));
    }

    let mut nodes: Vec<Node> = tree.nodes().to_vec();

    nodes[child_id].children.retain(|&c| c != nephew_id);
    nodes[child_id].children.push(sibling_id);

    nodes[parent_id].children.retain(|&c| c != sibling_id);
    nodes[parent_id].children.push(nephew_id);

    nodes[sibling_id].parent = Some(child_id);
    nodes[nephew_id].parent = Some(parent_id);

    PhyloTree::from_nodes(nodes, tree.root())
}

/// Edges `(parent, child)` where `child` is a non-root node with exactly
/// two children. The parent may be a multifurcating root.
pub fn collect_internal_edges(tree: &PhyloTree) -> Vec<(NodeId, NodeId)> {
    tree.iter_preorder()
        .filter_map(|id| {
            let node = tree.get_node(id)?;
            let parent_id = node.parent?;
            let parent = tree.get_node(parent_id)?;
            (node.children.len() == 2 && parent.children.len() >= 2).then_some((parent_id, id))
        })
        .collect()
}

/// The (up to) five branches touching edge `(parent, child)`: the edge
/// itself, the branches below `child`, the other branches below `parent`
/// and the branch above `parent` when it is not the root.
fn edge_neighbourhood(tree: &PhyloTree, parent_id: NodeId, child_id: NodeId) -> Vec<NodeId> {
    let mut branches = vec![child_id];
    if let Some(child) = tree.get_node(child_id) {
        branches.extend(child.children.iter().copied());
    }
    if let Some(parent) = tree.get_node(parent_id) {
        branches.extend(parent.children.iter().copied().filter(|&c| c != child_id));
        if parent.parent.is_some() {
            branches.push(parent_id);
        }
    }
    branches
}

/// The two alternative swaps at an internal edge, or none when the edge
/// has no sibling to exchange.
fn candidate_swaps(tree: &PhyloTree, parent_id: NodeId, child_id: NodeId) -> Vec<(NodeId, NodeId)> {
    let (Some(parent), Some(child)) = (tree.get_node(parent_id), tree.get_node(child_id)) else {
        return Vec::new();
    };
    let Some(&sibling) = parent.children.iter().find(|&&c| c != child_id) else {
        return Vec::new();
    };
    child.children.iter().map(|&nephew| (sibling, nephew)).collect()
}

/// Hill-climb with NNI moves, returning the final log-likelihood.
///
/// Branch lengths of the starting tree are optimised first. Each round
/// scans every internal edge, restarting after every accepted
/// swap, until no swap improves. If anything was accepted the branch
/// lengths (with `fix_model_params`) or all parameters are then
/// re-optimised and another round starts, up to `config.max_rounds`.
pub fn nni_search(
    lik: &mut TreeLikelihood,
    model: &mut dyn SubstitutionModel,
    rates: &mut GammaRates,
    fix_model_params: bool,
    config: &OptimiserConfig,
    budget: &mut Budget,
) -> Result<f64> {
    let mut lnl = lik.log_likelihood(model, rates)?;
    budget.spend(1);

    for round in 0..config.max_rounds {
        if round == 0 {
            // Candidates are compared against a tree with settled lengths.
            lnl = optimise_branch_lengths(lik, model, rates, config, budget)?.max(lnl);
        }
        let mut accepted = 0usize;

        'scan: loop {
            for (parent_id, child_id) in collect_internal_edges(lik.tree()) {
                for (sibling, nephew) in candidate_swaps(lik.tree(), parent_id, child_id) {
                    if budget.is_exhausted() {
                        break 'scan;
                    }
                    let swapped = nni_swap(lik.tree(), parent_id, child_id, sibling, nephew)?;
                    let previous = lik.replace_tree(swapped)?;
                    let local = edge_neighbourhood(lik.tree(), parent_id, child_id);
                    let candidate = optimise_branches(lik, model, rates, &local, config, budget)?;
                    if candidate > lnl + config.tolerance {
                        debug!(
                            "NNI at edge {}-{} (swap {} with {}): lnL {:.6} -> {:.6}",
                            parent_id, child_id, sibling, nephew, lnl, candidate
                        );
                        lnl = candidate;
                        accepted += 1;
                        continue 'scan;
                    }
                    lik.replace_tree(previous)?;
                }
            }
            break;
        }

        if accepted == 0 {
            break;
        }
        let polished = if fix_model_params {
            optimise_branch_lengths(lik, model, rates, config, budget)?
        } else {
            optimise_parameters(lik, model, rates, false, config, budget)?
        };
        lnl = polished.max(lnl);
        debug!("NNI round {}: {} swaps accepted, lnL {:.6}", round + 1, accepted, lnl);
        if budget.is_exhausted() {
            break;
        }
    }

    info!("topology search finished at lnL {:.6}", lnl);
    Ok(lnl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::create_model;
    use crate::newick;
    use crate::simulation::{SequenceSimulator, SimRng};
    use pairdist_seq::{Alignment, DataType};

    /// Leaves sharing a parent, as sorted pairs.
    fn cherries(tree: &PhyloTree) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for id in tree.internal_nodes().into_iter().chain(std::iter::once(tree.root())) {
            let node = tree.get_node(id).unwrap();
            let names: Vec<String> = node
                .children
                .iter()
                .filter_map(|&c| tree.get_node(c).filter(|n| n.is_leaf()).and_then(|n| n.name.clone()))
                .collect();
            if names.len() == 2 {
                let (a, b) = (names[0].clone(), names[1].clone());
                out.push(if a < b { (a, b) } else { (b, a) });
            }
        }
        out.sort();
        out
    }

    #[test]
    fn swap_preserves_leaves_and_lengths() {
        let tree = newick::parse("((A:0.1,B:0.2):0.3,C:0.4,D:0.5);").unwrap();
        let root = tree.root();
        let ab = tree.get_node(tree.find_leaf("A").unwrap()).unwrap().parent.unwrap();
        let c = tree.find_leaf("C").unwrap();
        let a = tree.find_leaf("A").unwrap();
        let swapped = nni_swap(&tree, root, ab, c, a).unwrap();
        assert_eq!(swapped.leaf_count(), 4);
        assert_eq!(swapped.get_node(c).unwrap().parent, Some(ab));
        assert_eq!(swapped.get_node(a).unwrap().parent, Some(root));
        assert!((swapped.total_branch_length() - tree.total_branch_length()).abs() < 1e-12);
        assert!((swapped.branch_length(c) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn swap_rejects_unrelated_nodes() {
        let tree = newick::parse("((A:0.1,B:0.2):0.3,C:0.4,D:0.5);").unwrap();
        let root = tree.root();
        let a = tree.find_leaf("A").unwrap();
        let c = tree.find_leaf("C").unwrap();
        let d = tree.find_leaf("D").unwrap();
        assert!(nni_swap(&tree, root, a, c, d).is_err());
    }

    #[test]
    fn internal_edges_of_unrooted_quartet() {
        let tree = newick::parse("((A:0.1,B:0.2):0.3,C:0.4,D:0.5);").unwrap();
        let edges = collect_internal_edges(&tree);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].0, tree.root());
        assert_eq!(candidate_swaps(&tree, edges[0].0, edges[0].1).len(), 2);
        assert_eq!(edge_neighbourhood(&tree, edges[0].0, edges[0].1).len(), 5);
    }

    #[test]
    fn fixes_a_wrong_quartet() {
        let aln = Alignment::from_pairs(
            vec![
                ("A", "AAACCCAAACCCGGGTTTAAACCCGTGTACAC"),
                ("B", "CCCAAACCCAAATTTGGGCCCAAATGTGCACA"),
                ("C", "AAACCCAAACCCGGGTTTAAACCCGTGTACAC"),
                ("D", "CCCAAACCCAAATTTGGGCCCAAATGTGCACA"),
            ],
            DataType::Dna,
        )
        .unwrap();
        let tree = newick::parse("((A:0.1,B:0.1):0.1,C:0.1,D:0.1);").unwrap();
        let mut lik = TreeLikelihood::new(&tree, &aln).unwrap();
        let mut model = create_model("JC69").unwrap();
        let mut rates = GammaRates::uniform();
        let before = lik.log_likelihood(model.as_ref(), &rates).unwrap();
        let mut budget = Budget::new(1_000_000);
        let after = nni_search(
            &mut lik,
            model.as_mut(),
            &mut rates,
            true,
            &OptimiserConfig::default(),
            &mut budget,
        )
        .unwrap();
        assert!(after > before);
        let check = lik.log_likelihood(model.as_ref(), &rates).unwrap();
        assert!((check - after).abs() < 1e-6);
        let pairs = cherries(lik.tree());
        assert!(
            pairs.contains(&("A".to_string(), "C".to_string()))
                || pairs.contains(&("B".to_string(), "D".to_string())),
            "cherries {:?}",
            pairs
        );
    }

    #[test]
    fn recovers_simulated_topology() {
        let truth = newick::parse(
            "(((A:0.05,B:0.05):0.1,(C:0.05,D:0.05):0.1):0.1,(E:0.05,F:0.05):0.1);",
        )
        .unwrap();
        let gen = create_model("HKY85").unwrap();
        let sim = SequenceSimulator::new(&truth).unwrap();
        let aln = sim
            .simulate(gen.as_ref(), &GammaRates::uniform(), 3000, &mut SimRng::new(17))
            .unwrap();

        // One interchange away: B is grouped with (C,D) instead of A.
        let start = newick::parse("((B:0.1,(C:0.1,D:0.1):0.1):0.1,A:0.1,(E:0.1,F:0.1):0.1);").unwrap();
        let mut lik = TreeLikelihood::new(&start, &aln).unwrap();
        let mut model = create_model("HKY85").unwrap();
        let mut rates = GammaRates::uniform();
        let mut budget = Budget::new(1_000_000);
        nni_search(
            &mut lik,
            model.as_mut(),
            &mut rates,
            false,
            &OptimiserConfig::default(),
            &mut budget,
        )
        .unwrap();

        let expected: Vec<(String, String)> = vec![("A", "B"), ("C", "D"), ("E", "F")]
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        assert_eq!(cherries(lik.tree()), expected);
    }

    #[test]
    fn zero_rounds_changes_nothing() {
        let aln = Alignment::from_pairs(
            vec![("A", "ACGTAC"), ("B", "ACGTTC"), ("C", "ACCTAC"), ("D", "TCGTAC")],
            DataType::Dna,
        )
        .unwrap();
        let tree = newick::parse("((A:0.1,B:0.1):0.1,C:0.1,D:0.1);").unwrap();
        let mut lik = TreeLikelihood::new(&tree, &aln).unwrap();
        let mut model = create_model("JC69").unwrap();
        let mut rates = GammaRates::uniform();
        let before = lik.log_likelihood(model.as_ref(), &rates).unwrap();
        let config = OptimiserConfig {
            max_rounds: 0,
            ..OptimiserConfig::default()
        };
        let after = nni_search(&mut lik, model.as_mut(), &mut rates, true, &config, &mut Budget::new(10))
            .unwrap();
        assert_eq!(before, after);
    }
}
