//! Distance-based tree construction.
//!
//! BioNJ (Gascuel 1997) and classic neighbor-joining share one
//! agglomeration loop. Both produce an unrooted tree whose root is the
//! central node joining the last three clusters.

use log::debug;
use pairdist_core::{PairdistError, Result};

use crate::distance::DistanceMatrix;
use crate::tree::{Node, NodeId, PhyloTree};

/// How merged clusters inherit distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMethod {
    /// Saitou and Nei: the new node sits at the midpoint of the reduction.
    NeighborJoining,
    /// Variance-weighted reduction.
    BioNj,
}

/// Build a BioNJ tree.
///
/// Without a variance matrix the distances themselves serve as variances.
///
/// # Examples
///
/// ```
/// use pairdist_phylo::construct::bionj;
/// use pairdist_phylo::distance::DistanceMatrix;
///
/// let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
/// let rows = vec![
///     vec![0.0, 0.3, 0.5],
///     vec![0.3, 0.0, 0.4],
///     vec![0.5, 0.4, 0.0],
/// ];
/// let dm = DistanceMatrix::from_rows(names, &rows).unwrap();
/// let tree = bionj(&dm, None).unwrap();
/// assert_eq!(tree.leaf_count(), 3);
/// assert!((tree.total_branch_length() - 0.6).abs() < 1e-12);
/// ```
pub fn bionj(distances: &DistanceMatrix, variances: Option<&DistanceMatrix>) -> Result<PhyloTree> {
    agglomerate(distances, variances, JoinMethod::BioNj)
}

/// Build a classic neighbor-joining tree.
pub fn neighbor_joining(distances: &DistanceMatrix) -> Result<PhyloTree> {
    agglomerate(distances, None, JoinMethod::NeighborJoining)
}

/// Run the agglomeration loop with the chosen reduction.
pub fn agglomerate(
    distances: &DistanceMatrix,
    variances: Option<&DistanceMatrix>,
    method: JoinMethod,
) -> Result<PhyloTree> {
    let n = distances.size();
    validate_inputs(distances, variances)?;

    // Expand into full working matrices.
    let mut dist = distances.to_rows();
    let mut var = match (method, variances) {
        (JoinMethod::BioNj, Some(v)) => v.to_rows(),
        _ => dist.clone(),
    };

    let mut nodes: Vec<Node> = Vec::new();
    let mut active: Vec<NodeId> = Vec::new();
    for name in distances.names() {
        let id = nodes.len();
        nodes.push(Node::new(id, Some(name.clone())));
        active.push(id);
    }

    if n == 2 {
        let half = dist[0][1].max(0.0) / 2.0;
        let root = join(&mut nodes, &[(active[0], half), (active[1], half)]);
        return PhyloTree::from_nodes(nodes, root);
    }

    let mut n_active = n;
    while n_active > 3 {
        let r = n_active as f64;

        let mut sums = vec![0.0; n_active];
        for i in 0..n_active {
            for j in 0..n_active {
                sums[i] += dist[i][j];
            }
        }

        // First strictly smaller Q wins, so ties keep the smallest (i, j).
        let (mut min_i, mut min_j) = (0, 1);
        let mut min_q = f64::INFINITY;
        for i in 0..n_active {
            for j in (i + 1)..n_active {
                let q = (r - 2.0) * dist[i][j] - sums[i] - sums[j];
                if q < min_q {
                    min_q = q;
                    min_i = i;
                    min_j = j;
                }
            }
        }

        let d_ij = dist[min_i][min_j];
        let b_i = d_ij / 2.0 + (sums[min_i] - sums[min_j]) / (2.0 * (r - 2.0));
        let b_j = d_ij - b_i;

        let lambda = match method {
            JoinMethod::NeighborJoining => 0.5,
            JoinMethod::BioNj => {
                let v_ij = var[min_i][min_j];
                if v_ij == 0.0 {
                    0.5
                } else {
                    let spread: f64 = (0..n_active)
                        .filter(|&k| k != min_i && k != min_j)
                        .map(|k| var[min_j][k] - var[min_i][k])
                        .sum();
                    (0.5 + spread / (2.0 * (r - 2.0) * v_ij)).clamp(0.0, 1.0)
                }
            }
        };

        let new_id = join(
            &mut nodes,
            &[(active[min_i], b_i.max(0.0)), (active[min_j], b_j.max(0.0))],
        );

        // New node replaces min_i
        let v_ij = var[min_i][min_j];
        for k in 0..n_active {
            if k == min_i || k == min_j {
                continue;
            }
            let d_new = lambda * (dist[min_i][k] - b_i) + (1.0 - lambda) * (dist[min_j][k] - b_j);
            dist[min_i][k] = d_new;
            dist[k][min_i] = d_new;
            let v_new =
                lambda * var[min_i][k] + (1.0 - lambda) * var[min_j][k] - lambda * (1.0 - lambda) * v_ij;
            var[min_i][k] = v_new;
            var[k][min_i] = v_new;
        }
        active[min_i] = new_id;

        // Remove min_j by swapping with last
        let last = n_active - 1;
        if min_j != last {
            active[min_j] = active[last];
            for k in 0..n_active {
                dist[min_j][k] = dist[last][k];
                dist[k][min_j] = dist[k][last];
                var[min_j][k] = var[last][k];
                var[k][min_j] = var[k][last];
            }
            dist[min_j][min_j] = 0.0;
            var[min_j][min_j] = 0.0;
        }
        n_active -= 1;

        debug!(
            "joined clusters at Q = {:.6} (lambda {:.3}), {} remain",
            min_q, lambda, n_active
        );
    }

    // Star the last three around the central root.
    let (d01, d02, d12) = (dist[0][1], dist[0][2], dist[1][2]);
    let root = join(
        &mut nodes,
        &[
            (active[0], ((d01 + d02 - d12) / 2.0).max(0.0)),
            (active[1], ((d01 + d12 - d02) / 2.0).max(0.0)),
            (active[2], ((d02 + d12 - d01) / 2.0).max(0.0)),
        ],
    );
    PhyloTree::from_nodes(nodes, root)
}

/// Push a new unnamed node adopting `children` with the given lengths.
fn join(nodes: &mut Vec<Node>, children: &[(NodeId, f64)]) -> NodeId {
    let id = nodes.len();
    let mut parent = Node::new(id, None);
    for &(child, length) in children {
        nodes[child].parent = Some(id);
        nodes[child].branch_length = Some(length);
        parent.children.push(child);
    }
    nodes.push(parent);
    id
}

fn validate_inputs(distances: &DistanceMatrix, variances: Option<&DistanceMatrix>) -> Result<()> {
    let n = distances.size();
    if n < 2 {
        return Err(PairdistError::InvalidInput(
            "need at least 2 taxa to build a tree".into(),
        ));
    }
    if let Some(v) = variances {
        if v.size() != n {
            return Err(PairdistError::Dimension {
                expected: n,
                found: v.size(),
            });
        }
    }
    for i in 0..n {
        for j in 0..n {
            if !distances.get(i, j).is_finite() {
                return Err(PairdistError::InvalidInput(format!(
                    "distance between {} and {} is not finite",
                    distances.names()[i],
                    distances.names()[j]
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}", (b'A' + i as u8) as char)).collect()
    }

    fn make_dm(rows: &[&[f64]]) -> DistanceMatrix {
        let rows: Vec<Vec<f64>> = rows.iter().map(|r| r.to_vec()).collect();
        DistanceMatrix::from_rows(names(rows.len()), &rows).unwrap()
    }

    /// Unrooted ((A:2,B:3):2,(C:4,D:5)).
    fn additive_four() -> DistanceMatrix {
        make_dm(&[
            &[0.0, 5.0, 8.0, 9.0],
            &[5.0, 0.0, 9.0, 10.0],
            &[8.0, 9.0, 0.0, 9.0],
            &[9.0, 10.0, 9.0, 0.0],
        ])
    }

    fn assert_additive(tree: &PhyloTree, dm: &DistanceMatrix) {
        for i in 0..dm.size() {
            for j in (i + 1)..dm.size() {
                let a = tree.find_leaf(&dm.names()[i]).unwrap();
                let b = tree.find_leaf(&dm.names()[j]).unwrap();
                let path = tree.path_length(a, b).unwrap();
                assert!(
                    (path - dm.get(i, j)).abs() < 1e-9,
                    "path {}-{} = {}, expected {}",
                    i,
                    j,
                    path,
                    dm.get(i, j)
                );
            }
        }
    }

    #[test]
    fn two_taxa_split_the_distance() {
        let dm = make_dm(&[&[0.0, 4.0], &[4.0, 0.0]]);
        let tree = bionj(&dm, None).unwrap();
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(tree.node_count(), 3);
        for &leaf in &tree.leaves() {
            assert!((tree.branch_length(leaf) - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn three_taxa_total_length() {
        let dm = make_dm(&[&[0.0, 5.0, 9.0], &[5.0, 0.0, 10.0], &[9.0, 10.0, 0.0]]);
        let tree = bionj(&dm, None).unwrap();
        assert_eq!(tree.leaf_count(), 3);
        assert!((tree.total_branch_length() - 12.0).abs() < 1e-12);
        assert_additive(&tree, &dm);
        assert_eq!(tree.get_node(tree.root()).unwrap().children.len(), 3);
    }

    #[test]
    fn one_taxon_is_an_error() {
        let dm = make_dm(&[&[0.0]]);
        assert!(matches!(bionj(&dm, None), Err(PairdistError::InvalidInput(_))));
    }

    #[test]
    fn recovers_additive_tree() {
        let dm = additive_four();
        let tree = bionj(&dm, None).unwrap();
        assert_additive(&tree, &dm);
        let nj = neighbor_joining(&dm).unwrap();
        assert_additive(&nj, &dm);
        let a = tree.find_leaf("A").unwrap();
        let b = tree.find_leaf("B").unwrap();
        assert_eq!(
            tree.get_node(a).unwrap().parent,
            tree.get_node(b).unwrap().parent,
            "A and B should be cherries"
        );
    }

    #[test]
    fn explicit_variances_are_used() {
        let dm = additive_four();
        let flat = make_dm(&[
            &[0.0, 1.0, 1.0, 1.0],
            &[1.0, 0.0, 1.0, 1.0],
            &[1.0, 1.0, 0.0, 1.0],
            &[1.0, 1.0, 1.0, 0.0],
        ]);
        // An additive matrix is recovered whatever the weighting.
        let tree = bionj(&dm, Some(&flat)).unwrap();
        assert_additive(&tree, &dm);

        let wrong = make_dm(&[&[0.0, 1.0], &[1.0, 0.0]]);
        assert!(matches!(
            bionj(&dm, Some(&wrong)),
            Err(PairdistError::Dimension { expected: 4, found: 2 })
        ));
    }

    #[test]
    fn negative_lengths_are_clamped() {
        // Violates the triangle inequality.
        let dm = make_dm(&[
            &[0.0, 1.0, 10.0, 10.0],
            &[1.0, 0.0, 10.0, 1.0],
            &[10.0, 10.0, 0.0, 1.0],
            &[10.0, 1.0, 1.0, 0.0],
        ]);
        let tree = bionj(&dm, None).unwrap();
        for id in tree.iter_preorder() {
            if let Some(bl) = tree.get_node(id).unwrap().branch_length {
                assert!(bl >= 0.0, "negative branch length: {}", bl);
            }
        }
    }

    #[test]
    fn non_finite_distance_rejected() {
        let dm = make_dm(&[&[0.0, f64::NAN], &[f64::NAN, 0.0]]);
        assert!(bionj(&dm, None).is_err());
    }

    #[test]
    fn newick_output_is_trimmed() {
        let tree = bionj(&additive_four(), None).unwrap();
        let text = newick::write(&tree);
        assert!(text.ends_with(';'));
        let back = newick::parse(&text).unwrap();
        assert_eq!(back.leaf_count(), 4);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        fn matrix() -> impl Strategy<Value = DistanceMatrix> {
            (2usize..12).prop_flat_map(|n| {
                proptest::collection::vec(0.0f64..5.0, n * (n - 1) / 2).prop_map(move |upper| {
                    let mut rows = vec![vec![0.0; n]; n];
                    let mut k = 0;
                    for i in 0..n {
                        for j in (i + 1)..n {
                            rows[i][j] = upper[k];
                            rows[j][i] = upper[k];
                            k += 1;
                        }
                    }
                    let names = (0..n).map(|i| format!("t{}", i)).collect();
                    DistanceMatrix::from_rows(names, &rows).unwrap()
                })
            })
        }

        proptest! {
            #[test]
            fn every_taxon_becomes_a_leaf(dm in matrix()) {
                let tree = bionj(&dm, None).unwrap();
                prop_assert_eq!(tree.leaf_count(), dm.size());
                for id in tree.iter_preorder() {
                    if let Some(bl) = tree.get_node(id).unwrap().branch_length {
                        prop_assert!(bl >= 0.0);
                    }
                }
                let mut leaves = tree.leaf_names();
                leaves.sort();
                let mut expected = dm.names().to_vec();
                expected.sort();
                prop_assert_eq!(leaves, expected);
            }
        }
    }
}
