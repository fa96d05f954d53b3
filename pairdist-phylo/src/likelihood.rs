//! Felsenstein pruning likelihood over compressed site patterns.
//!
//! A [`TreeLikelihood`] binds one unrooted tree to the alignment columns of
//! its leaves. The substitution model and rate categories are passed to
//! every evaluation, so the state never holds a stale copy of either.
//!
//! Conditional vectors are laid out as `((c * n_patterns) + k) * n_states + x`
//! for category `c`, pattern `k` and state `x`, and rescaled per pattern
//! when they underflow.

use std::collections::HashMap;

use log::warn;
use pairdist_core::{PairdistError, Result};
use pairdist_seq::{Alignment, DataType};

use crate::rates::GammaRates;
use crate::subst_model::{Eigensystem, SubstitutionModel};
use crate::tree::{NodeId, PhyloTree};

/// Shortest branch length used anywhere in likelihood computations.
pub const MIN_BRANCH_LENGTH: f64 = 1e-6;

/// Per-pattern rescaling kicks in when the largest entry falls below this.
const SCALE_THRESHOLD: f64 = 1e-50;

/// Site-pattern likelihood bound to a fixed tree and alignment.
#[derive(Debug, Clone)]
pub struct TreeLikelihood {
    tree: PhyloTree,
    data_type: DataType,
    n_states: usize,
    weights: Vec<f64>,
    /// Tip vectors per node id (`None` for internal nodes), `n_patterns * n_states`.
    tips: Vec<Option<Vec<f64>>>,
}

/// Conditional vectors for every node from one full traversal.
struct Partials {
    down: Vec<Vec<f64>>,
    down_scale: Vec<Vec<f64>>,
    up: Vec<Vec<f64>>,
    up_scale: Vec<Vec<f64>>,
}

impl TreeLikelihood {
    /// Bind `tree` to `alignment`.
    ///
    /// The tree is unrooted first. Every leaf must carry a distinct name
    /// present in the alignment; sequences absent from the tree are ignored.
    /// Missing or negative branch lengths are replaced by
    /// [`MIN_BRANCH_LENGTH`].
    pub fn new(tree: &PhyloTree, alignment: &Alignment) -> Result<Self> {
        let mut tree = tree.unroot()?;
        let leaves = tree.leaves();
        if leaves.len() < 2 {
            return Err(PairdistError::InvalidInput(
                "likelihood tree needs at least two leaves".into(),
            ));
        }

        let mut rows = Vec::with_capacity(leaves.len());
        let mut seen = HashMap::new();
        for &leaf in &leaves {
            let name = tree
                .get_node(leaf)
                .and_then(|n| n.name.clone())
                .ok_or_else(|| PairdistError::InvalidInput("tree has an unnamed leaf".into()))?;
            let row = alignment.position(&name).ok_or_else(|| {
                PairdistError::InvalidInput(format!("leaf '{}' has no sequence in the alignment", name))
            })?;
            if seen.insert(name.clone(), leaf).is_some() {
                return Err(PairdistError::InvalidInput(format!(
                    "leaf name '{}' appears more than once in the tree",
                    name
                )));
            }
            rows.push(row);
        }
        if alignment.len() > leaves.len() {
            warn!(
                "{} sequences are not in the tree and will be ignored",
                alignment.len() - leaves.len()
            );
        }

        let ids: Vec<NodeId> = tree.nodes().iter().map(|n| n.id).collect();
        let root = tree.root();
        for id in ids {
            if id == root {
                continue;
            }
            match tree.get_node(id).and_then(|n| n.branch_length) {
                Some(t) if t >= MIN_BRANCH_LENGTH => {}
                other => {
                    if other.map_or(true, |t| t < 0.0) {
                        warn!("branch above node {} has no usable length; using {}", id, MIN_BRANCH_LENGTH);
                    }
                    tree.set_branch_length(id, MIN_BRANCH_LENGTH)?;
                }
            }
        }

        let data_type = alignment.data_type();
        let n_states = data_type.n_states();
        let (columns, weights) = compress_patterns(alignment, &rows);
        let n_patterns = weights.len();

        let mut tips = vec![None; tree.node_count()];
        for (leaf_idx, &leaf) in leaves.iter().enumerate() {
            let mut tip = vec![0.0; n_patterns * n_states];
            for (k, column) in columns.iter().enumerate() {
                data_type.fill_tip(column[leaf_idx], &mut tip[k * n_states..(k + 1) * n_states]);
            }
            tips[leaf] = Some(tip);
        }

        Ok(Self {
            tree,
            data_type,
            n_states,
            weights,
            tips,
        })
    }

    /// The bound (unrooted) tree with current branch lengths.
    pub fn tree(&self) -> &PhyloTree {
        &self.tree
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn n_patterns(&self) -> usize {
        self.weights.len()
    }

    /// Number of alignment columns behind each pattern.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// All non-root nodes; each names the branch above it.
    pub fn branches(&self) -> Vec<NodeId> {
        let root = self.tree.root();
        self.tree.iter_preorder().filter(|&id| id != root).collect()
    }

    pub fn branch_length(&self, id: NodeId) -> f64 {
        self.tree.branch_length(id)
    }

    pub fn set_branch_length(&mut self, id: NodeId, length: f64) -> Result<()> {
        if id == self.tree.root() {
            return Err(PairdistError::InvalidInput("the root has no branch".into()));
        }
        self.tree.set_branch_length(id, length.max(MIN_BRANCH_LENGTH))
    }

    /// Replace the topology with one over the same node ids, returning the
    /// previous tree.
    pub(crate) fn replace_tree(&mut self, tree: PhyloTree) -> Result<PhyloTree> {
        if tree.node_count() != self.tree.node_count() {
            return Err(PairdistError::InvalidInput(format!(
                "replacement tree has {} nodes, expected {}",
                tree.node_count(),
                self.tree.node_count()
            )));
        }
        Ok(std::mem::replace(&mut self.tree, tree))
    }

    /// Log-likelihood of the alignment under `model` and `rates`.
    pub fn log_likelihood(&self, model: &dyn SubstitutionModel, rates: &GammaRates) -> Result<f64> {
        self.check_model(model)?;
        let pmats = self.transition_matrices(model.core().eigen(), rates);
        let (down, scale, _) = self.down_pass(&pmats, rates.ncat());
        Ok(self.root_log_likelihood(model.frequencies(), rates.ncat(), &down, &scale))
    }

    /// Per-pattern log-likelihoods (unweighted).
    pub fn pattern_log_likelihoods(
        &self,
        model: &dyn SubstitutionModel,
        rates: &GammaRates,
    ) -> Result<Vec<f64>> {
        self.check_model(model)?;
        let ncat = rates.ncat();
        let pmats = self.transition_matrices(model.core().eigen(), rates);
        let (down, scale, _) = self.down_pass(&pmats, ncat);
        let root = self.tree.root();
        Ok((0..self.n_patterns())
            .map(|k| self.root_site_log_likelihood(model.frequencies(), ncat, &down[root], &scale[root], k))
            .collect())
    }

    /// The likelihood as a function of the length of the branch above `id`,
    /// with every other branch held fixed.
    pub fn branch_function(
        &self,
        model: &dyn SubstitutionModel,
        rates: &GammaRates,
        id: NodeId,
    ) -> Result<BranchLikelihood> {
        self.check_model(model)?;
        if id == self.tree.root() || id >= self.tree.node_count() {
            return Err(PairdistError::InvalidInput(format!("node {} has no branch", id)));
        }
        let partials = self.partials(model, rates);
        let npat = self.n_patterns();
        let scales: Vec<f64> = (0..npat)
            .map(|k| partials.up_scale[id][k] + partials.down_scale[id][k])
            .collect();
        Ok(BranchLikelihood::from_vectors(
            model.core().eigen(),
            rates,
            &partials.up[id],
            &partials.down[id],
            npat,
            self.weights.clone(),
            scales,
        ))
    }

    /// Log-likelihood with first and second derivatives with respect to the
    /// length of the branch above `id`.
    pub fn branch_derivatives(
        &self,
        model: &dyn SubstitutionModel,
        rates: &GammaRates,
        id: NodeId,
    ) -> Result<(f64, f64, f64)> {
        let f = self.branch_function(model, rates, id)?;
        Ok(f.evaluate(self.branch_length(id)))
    }

    fn check_model(&self, model: &dyn SubstitutionModel) -> Result<()> {
        if model.n_states() != self.n_states {
            return Err(PairdistError::InvalidInput(format!(
                "model {} has {} states but the data are {} ({} states)",
                model.name(),
                model.n_states(),
                self.data_type,
                self.n_states
            )));
        }
        Ok(())
    }

    /// `P(t_v · r_c)` for every node v (empty at the root), `ncat * s * s`.
    fn transition_matrices(&self, eigen: &Eigensystem, rates: &GammaRates) -> Vec<Vec<f64>> {
        let s = self.n_states;
        let root = self.tree.root();
        self.tree
            .nodes()
            .iter()
            .map(|node| {
                if node.id == root {
                    return Vec::new();
                }
                let t = self.tree.branch_length(node.id);
                let mut out = vec![0.0; rates.ncat() * s * s];
                for (c, &r) in rates.rates().iter().enumerate() {
                    eigen.probabilities_into(t * r, &mut out[c * s * s..(c + 1) * s * s]);
                }
                out
            })
            .collect()
    }

    /// Post-order pass: conditional vectors, their log scales and the
    /// message `P_v · down_v` each node sends to its parent.
    fn down_pass(&self, pmats: &[Vec<f64>], ncat: usize) -> (Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<Vec<f64>>) {
        let s = self.n_states;
        let npat = self.n_patterns();
        let len = ncat * npat * s;
        let n_nodes = self.tree.node_count();
        let mut down = vec![Vec::new(); n_nodes];
        let mut scale = vec![Vec::new(); n_nodes];
        let mut message = vec![Vec::new(); n_nodes];
        let root = self.tree.root();

        for id in self.tree.iter_postorder() {
            let node = &self.tree.nodes()[id];
            let (vec, sc) = if let Some(tip) = &self.tips[id] {
                let mut v = Vec::with_capacity(len);
                for _ in 0..ncat {
                    v.extend_from_slice(tip);
                }
                (v, vec![0.0; npat])
            } else {
                let mut v = vec![1.0; len];
                let mut sc = vec![0.0; npat];
                for &child in &node.children {
                    for (a, b) in v.iter_mut().zip(&message[child]) {
                        *a *= b;
                    }
                    for (a, b) in sc.iter_mut().zip(&scale[child]) {
                        *a += b;
                    }
                }
                rescale(&mut v, &mut sc, ncat, npat, s);
                (v, sc)
            };
            if id != root {
                let mut msg = vec![0.0; len];
                propagate(&pmats[id], &vec, &mut msg, ncat, npat, s, false);
                message[id] = msg;
            }
            down[id] = vec;
            scale[id] = sc;
        }
        (down, scale, message)
    }

    fn partials(&self, model: &dyn SubstitutionModel, rates: &GammaRates) -> Partials {
        let s = self.n_states;
        let ncat = rates.ncat();
        let npat = self.n_patterns();
        let len = ncat * npat * s;
        let pmats = self.transition_matrices(model.core().eigen(), rates);
        let (down, down_scale, message) = self.down_pass(&pmats, ncat);

        let n_nodes = self.tree.node_count();
        let mut up = vec![Vec::new(); n_nodes];
        let mut up_scale = vec![Vec::new(); n_nodes];
        // Outside vector at each node: probability of everything outside its
        // subtree given its state.
        let mut outside: Vec<Vec<f64>> = vec![Vec::new(); n_nodes];
        let mut outside_scale: Vec<Vec<f64>> = vec![Vec::new(); n_nodes];

        let root = self.tree.root();
        let freqs = model.frequencies();
        let mut root_out = vec![0.0; len];
        for chunk in root_out.chunks_mut(s) {
            chunk.copy_from_slice(freqs);
        }
        outside[root] = root_out;
        outside_scale[root] = vec![0.0; npat];

        for id in self.tree.iter_preorder() {
            let node = &self.tree.nodes()[id];
            for &child in &node.children {
                let mut v = outside[id].clone();
                let mut sc = outside_scale[id].clone();
                for &sib in node.children.iter().filter(|&&c| c != child) {
                    for (a, b) in v.iter_mut().zip(&message[sib]) {
                        *a *= b;
                    }
                    for (a, b) in sc.iter_mut().zip(&down_scale[sib]) {
                        *a += b;
                    }
                }
                rescale(&mut v, &mut sc, ncat, npat, s);
                if !self.tree.nodes()[child].is_leaf() {
                    let mut out = vec![0.0; len];
                    propagate(&pmats[child], &v, &mut out, ncat, npat, s, true);
                    outside[child] = out;
                    outside_scale[child] = sc.clone();
                }
                up[child] = v;
                up_scale[child] = sc;
            }
        }

        Partials {
            down,
            down_scale,
            up,
            up_scale,
        }
    }

    fn root_log_likelihood(&self, freqs: &[f64], ncat: usize, down: &[Vec<f64>], scale: &[Vec<f64>]) -> f64 {
        let root = self.tree.root();
        let mut lnl = 0.0;
        for (k, &w) in self.weights.iter().enumerate() {
            lnl += w * self.root_site_log_likelihood(freqs, ncat, &down[root], &scale[root], k);
        }
        lnl
    }

    fn root_site_log_likelihood(&self, freqs: &[f64], ncat: usize, down: &[f64], scale: &[f64], k: usize) -> f64 {
        let s = self.n_states;
        let npat = self.n_patterns();
        let mut site = 0.0;
        for c in 0..ncat {
            let base = (c * npat + k) * s;
            site += freqs
                .iter()
                .zip(&down[base..base + s])
                .map(|(f, d)| f * d)
                .sum::<f64>();
        }
        site /= ncat as f64;
        if site > 0.0 {
            site.ln() + scale[k]
        } else {
            f64::NEG_INFINITY
        }
    }
}

/// `out[c,k,x] = Σ_z P_c[x][z] v[c,k,z]`, or with `transpose`
/// `out[c,k,x] = Σ_y v[c,k,y] P_c[y][x]`.
fn propagate(p: &[f64], v: &[f64], out: &mut [f64], ncat: usize, npat: usize, s: usize, transpose: bool) {
    for c in 0..ncat {
        let pc = &p[c * s * s..(c + 1) * s * s];
        for k in 0..npat {
            let base = (c * npat + k) * s;
            let src = &v[base..base + s];
            for x in 0..s {
                let mut sum = 0.0;
                for z in 0..s {
                    let pxz = if transpose { pc[z * s + x] } else { pc[x * s + z] };
                    sum += pxz * src[z];
                }
                out[base + x] = sum;
            }
        }
    }
}

/// Divide each pattern by its maximum when that maximum underflows,
/// accumulating the log factor.
fn rescale(v: &mut [f64], scale: &mut [f64], ncat: usize, npat: usize, s: usize) {
    for k in 0..npat {
        let mut max = 0.0f64;
        for c in 0..ncat {
            let base = (c * npat + k) * s;
            for &x in &v[base..base + s] {
                max = max.max(x);
            }
        }
        if max > 0.0 && max < SCALE_THRESHOLD {
            for c in 0..ncat {
                let base = (c * npat + k) * s;
                for x in &mut v[base..base + s] {
                    *x /= max;
                }
            }
            scale[k] += max.ln();
        }
    }
}

/// Unique columns over the given rows, in first-seen order, with counts.
fn compress_patterns(alignment: &Alignment, rows: &[usize]) -> (Vec<Vec<u8>>, Vec<f64>) {
    let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut columns = Vec::new();
    let mut weights = Vec::new();
    for site in 0..alignment.n_sites() {
        let column: Vec<u8> = rows.iter().map(|&r| alignment.row(r)[site]).collect();
        match index.get(&column) {
            Some(&k) => weights[k] += 1.0,
            None => {
                index.insert(column.clone(), columns.len());
                columns.push(column);
                weights.push(1.0);
            }
        }
    }
    (columns, weights)
}

/// Likelihood along a single branch, every other quantity held fixed.
///
/// Stored in spectral form: for category `c`, pattern `k` and eigenvalue
/// `λ_m`, `L_k(t) = Σ_c (1/K) Σ_m a[c,k,m] exp(λ_m r_c t)`, which makes each
/// evaluation linear in the number of states.
#[derive(Debug, Clone)]
pub struct BranchLikelihood {
    ncat: usize,
    n_states: usize,
    eigenvalues: Vec<f64>,
    rates: Vec<f64>,
    coefficients: Vec<f64>,
    weights: Vec<f64>,
    scales: Vec<f64>,
}

impl BranchLikelihood {
    /// Build from the vectors on either side of the branch: `upper` is
    /// conditioned on the state at the parent end, `lower` on the child end.
    fn from_vectors(
        eigen: &Eigensystem,
        rates: &GammaRates,
        upper: &[f64],
        lower: &[f64],
        npat: usize,
        weights: Vec<f64>,
        scales: Vec<f64>,
    ) -> Self {
        let s = eigen.n_states();
        let ncat = rates.ncat();
        let (right, left) = (eigen.right(), eigen.left());
        let mut coefficients = vec![0.0; ncat * npat * s];
        for c in 0..ncat {
            for k in 0..npat {
                let base = (c * npat + k) * s;
                let u = &upper[base..base + s];
                let d = &lower[base..base + s];
                for m in 0..s {
                    let ur: f64 = (0..s).map(|x| u[x] * right[x * s + m]).sum();
                    let ld: f64 = (0..s).map(|z| left[m * s + z] * d[z]).sum();
                    coefficients[base + m] = ur * ld;
                }
            }
        }
        Self {
            ncat,
            n_states: s,
            eigenvalues: eigen.eigenvalues().to_vec(),
            rates: rates.rates().to_vec(),
            coefficients,
            weights,
            scales,
        }
    }

    /// `(lnL, dlnL/dt, d²lnL/dt²)` at branch length `t`.
    pub fn evaluate(&self, t: f64) -> (f64, f64, f64) {
        let s = self.n_states;
        let npat = self.weights.len();
        let cat_weight = 1.0 / self.ncat as f64;

        let mut growth = vec![0.0; self.ncat * s];
        let mut exps = vec![0.0; self.ncat * s];
        for c in 0..self.ncat {
            for m in 0..s {
                let g = self.eigenvalues[m] * self.rates[c];
                growth[c * s + m] = g;
                exps[c * s + m] = (g * t).exp();
            }
        }

        let (mut lnl, mut d1, mut d2) = (0.0, 0.0, 0.0);
        for k in 0..npat {
            let (mut l0, mut l1, mut l2) = (0.0, 0.0, 0.0);
            for c in 0..self.ncat {
                let base = (c * npat + k) * s;
                for m in 0..s {
                    let e = self.coefficients[base + m] * exps[c * s + m];
                    let g = growth[c * s + m];
                    l0 += e;
                    l1 += e * g;
                    l2 += e * g * g;
                }
            }
            l0 *= cat_weight;
            l1 *= cat_weight;
            l2 *= cat_weight;
            if l0 <= 0.0 {
                return (f64::NEG_INFINITY, 0.0, 0.0);
            }
            let w = self.weights[k];
            let r1 = l1 / l0;
            lnl += w * (l0.ln() + self.scales[k]);
            d1 += w * r1;
            d2 += w * (l2 / l0 - r1 * r1);
        }
        (lnl, d1, d2)
    }
}

/// Two-sequence likelihood as a function of the distance between them.
///
/// Columns are compressed into patterns and gaps count as unknown states.
pub fn pair_likelihood(
    a: &[u8],
    b: &[u8],
    data_type: DataType,
    model: &dyn SubstitutionModel,
    rates: &GammaRates,
) -> Result<BranchLikelihood> {
    let s = data_type.n_states();
    if model.n_states() != s {
        return Err(PairdistError::InvalidInput(format!(
            "model {} has {} states but the data are {}",
            model.name(),
            model.n_states(),
            data_type
        )));
    }
    if a.len() != b.len() {
        return Err(PairdistError::InvalidInput(format!(
            "sequences differ in length: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let mut index: HashMap<(u8, u8), usize> = HashMap::new();
    let mut pairs = Vec::new();
    let mut weights = Vec::new();
    for (&x, &y) in a.iter().zip(b) {
        match index.get(&(x, y)) {
            Some(&k) => weights[k] += 1.0,
            None => {
                index.insert((x, y), pairs.len());
                pairs.push((x, y));
                weights.push(1.0);
            }
        }
    }

    let npat = pairs.len();
    let ncat = rates.ncat();
    let freqs = model.frequencies();
    let mut upper = vec![0.0; ncat * npat * s];
    let mut lower = vec![0.0; ncat * npat * s];
    let mut tip = vec![0.0; s];
    for (k, &(x, y)) in pairs.iter().enumerate() {
        for c in 0..ncat {
            let base = (c * npat + k) * s;
            data_type.fill_tip(x, &mut tip);
            for i in 0..s {
                upper[base + i] = freqs[i] * tip[i];
            }
            data_type.fill_tip(y, &mut lower[base..base + s]);
        }
    }

    Ok(BranchLikelihood::from_vectors(
        model.core().eigen(),
        rates,
        &upper,
        &lower,
        npat,
        weights,
        vec![0.0; npat],
    ))
}
