//! Core phylogenetic tree data structures.
//!
//! Uses arena-style storage: nodes live in a flat `Vec<Node>` and are
//! referenced by `NodeId` (a `usize` index). Unrooted trees are stored with
//! a multifurcating (usually trifurcating) root node.

use pairdist_core::{PairdistError, Result, Summarizable};

/// Index into the tree's node arena.
pub type NodeId = usize;

/// A single node in a phylogenetic tree.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Index of this node in the arena.
    pub id: NodeId,
    /// Parent node (None for root).
    pub parent: Option<NodeId>,
    /// Child nodes.
    pub children: Vec<NodeId>,
    /// Branch length from this node to its parent.
    pub branch_length: Option<f64>,
    /// Taxon or clade label.
    pub name: Option<String>,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: Option<String>) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
            branch_length: None,
            name,
        }
    }

    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True if this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// True if this node has both parent and children.
    pub fn is_internal(&self) -> bool {
        !self.is_leaf() && !self.is_root()
    }
}

/// A phylogenetic tree stored as an arena of nodes.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhyloTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl PhyloTree {
    /// Create a new tree with a single unnamed root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(0, None)],
            root: 0,
        }
    }

    /// Create a tree from pre-built nodes and a root index.
    ///
    /// This is used by the Newick parser and tree construction algorithms.
    pub fn from_nodes(nodes: Vec<Node>, root: NodeId) -> Result<Self> {
        if nodes.is_empty() {
            return Err(PairdistError::InvalidInput("empty node list".into()));
        }
        if root >= nodes.len() {
            return Err(PairdistError::InvalidInput(format!(
                "root index {} out of range ({})",
                root,
                nodes.len()
            )));
        }
        Ok(Self { nodes, root })
    }

    /// Add a child to `parent` and return its `NodeId`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: Option<String>,
        branch_length: Option<f64>,
    ) -> Result<NodeId> {
        if parent >= self.nodes.len() {
            return Err(PairdistError::InvalidInput(format!(
                "parent index {} out of range ({})",
                parent,
                self.nodes.len()
            )));
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent: Some(parent),
            children: Vec::new(),
            branch_length,
            name,
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    /// Access a node by id.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Mutable access to a node by id.
    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// All nodes in arena order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaf nodes.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// All leaf node ids, in arena order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    /// All internal (non-leaf, non-root) node ids.
    pub fn internal_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_internal())
            .map(|n| n.id)
            .collect()
    }

    /// Branch length above `id`, treating a missing length as zero.
    pub fn branch_length(&self, id: NodeId) -> f64 {
        self.nodes
            .get(id)
            .and_then(|n| n.branch_length)
            .unwrap_or(0.0)
    }

    /// Set the branch length above `id`.
    pub fn set_branch_length(&mut self, id: NodeId, length: f64) -> Result<()> {
        let node = self.nodes.get_mut(id).ok_or_else(|| {
            PairdistError::InvalidInput(format!("node id {} out of range", id))
        })?;
        node.branch_length = Some(length);
        Ok(())
    }

    /// Sum of all branch lengths (the root's own length is ignored).
    pub fn total_branch_length(&self) -> f64 {
        self.nodes
            .iter()
            .filter(|n| n.id != self.root)
            .filter_map(|n| n.branch_length)
            .sum()
    }

    /// Pre-order (parent before children) traversal yielding node ids.
    pub fn iter_preorder(&self) -> PreorderIter<'_> {
        PreorderIter {
            tree: self,
            stack: vec![self.root],
        }
    }

    /// Post-order (children before parent) traversal yielding node ids.
    pub fn iter_postorder(&self) -> PostorderIter {
        // Build postorder sequence by reversing a modified preorder
        // (visit right children first, then reverse the whole thing).
        let mut result = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            result.push(id);
            for &child in &self.nodes[id].children {
                stack.push(child);
            }
        }
        result.reverse();
        PostorderIter {
            sequence: result,
            pos: 0,
        }
    }

    /// Most recent common ancestor of two nodes.
    pub fn mrca(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        if a >= self.nodes.len() || b >= self.nodes.len() {
            return Err(PairdistError::InvalidInput("node id out of range".into()));
        }
        let ancestors_a: Vec<NodeId> = self.ancestors(a).collect();
        Ok(self
            .ancestors(b)
            .find(|id| ancestors_a.contains(id))
            .unwrap_or(self.root))
    }

    /// Sum of branch lengths on the path between two nodes.
    pub fn path_length(&self, a: NodeId, b: NodeId) -> Result<f64> {
        let m = self.mrca(a, b)?;
        let climb = |from: NodeId| -> f64 {
            self.ancestors(from)
                .take_while(|&id| id != m)
                .map(|id| self.branch_length(id))
                .sum()
        };
        Ok(climb(a) + climb(b))
    }

    /// The node itself followed by each ancestor up to the root.
    fn ancestors(&self, start: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(start), move |&id| self.nodes[id].parent)
    }

    /// Sorted list of leaf names (leaves without names are excluded).
    pub fn leaf_names(&self) -> Vec<String> {
        let mut names = self.leaf_names_preorder();
        names.sort();
        names
    }

    /// Leaf names in pre-order, the order in which a Newick string lists them.
    pub fn leaf_names_preorder(&self) -> Vec<String> {
        self.iter_preorder()
            .filter(|&id| self.nodes[id].is_leaf())
            .filter_map(|id| self.nodes[id].name.clone())
            .collect()
    }

    /// Id of the leaf called `name`.
    pub fn find_leaf(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.is_leaf() && n.name.as_deref() == Some(name))
            .map(|n| n.id)
    }

    /// Remove a bifurcating root.
    ///
    /// When the root has exactly two children and one of them is internal,
    /// that child becomes the new root and absorbs its sibling, whose branch
    /// becomes the sum of the two root branches. Trees that are already
    /// unrooted, or two-leaf trees, are returned unchanged.
    pub fn unroot(&self) -> Result<PhyloTree> {
        let root = &self.nodes[self.root];
        if root.children.len() != 2 {
            return Ok(self.clone());
        }
        let (left, right) = (root.children[0], root.children[1]);
        let (keep, other) = if !self.nodes[left].is_leaf() {
            (left, right)
        } else if !self.nodes[right].is_leaf() {
            (right, left)
        } else {
            return Ok(self.clone());
        };

        let joined = self.branch_length(left) + self.branch_length(right);
        let mut nodes = self.nodes.clone();
        nodes[keep].parent = None;
        nodes[keep].branch_length = None;
        nodes[keep].children.push(other);
        nodes[other].parent = Some(keep);
        nodes[other].branch_length = Some(joined);
        compact(nodes, keep)
    }
}

/// Rebuild a tree from the nodes reachable from `root`, renumbering ids.
pub(crate) fn compact(nodes: Vec<Node>, root: NodeId) -> Result<PhyloTree> {
    let mut live = vec![false; nodes.len()];
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if id >= nodes.len() || live[id] {
            continue;
        }
        live[id] = true;
        stack.extend(nodes[id].children.iter().copied());
    }

    let mut old_to_new = vec![0usize; nodes.len()];
    let mut next = 0;
    for (old, &is_live) in live.iter().enumerate() {
        if is_live {
            old_to_new[old] = next;
            next += 1;
        }
    }

    let new_nodes = nodes
        .into_iter()
        .filter(|n| live[n.id])
        .map(|n| Node {
            id: old_to_new[n.id],
            parent: n.parent.filter(|&p| live[p]).map(|p| old_to_new[p]),
            children: n
                .children
                .iter()
                .filter(|&&c| live[c])
                .map(|&c| old_to_new[c])
                .collect(),
            branch_length: n.branch_length,
            name: n.name,
        })
        .collect();
    PhyloTree::from_nodes(new_nodes, old_to_new[root])
}

impl Default for PhyloTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Summarizable for PhyloTree {
    fn summary(&self) -> String {
        let leaves = self.leaf_count();
        let internal = self.node_count() - leaves;
        format!(
            "PhyloTree: {} nodes ({} leaves, {} internal), length {:.6}",
            self.node_count(),
            leaves,
            internal,
            self.total_branch_length()
        )
    }
}

/// Pre-order iterator over node ids.
pub struct PreorderIter<'a> {
    tree: &'a PhyloTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for PreorderIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        // Push children in reverse order so leftmost is visited first.
        for &child in self.tree.nodes[id].children.iter().rev() {
            self.stack.push(child);
        }
        Some(id)
    }
}

/// Post-order iterator over node ids.
pub struct PostorderIter {
    sequence: Vec<NodeId>,
    pos: usize,
}

impl Iterator for PostorderIter {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = *self.sequence.get(self.pos)?;
        self.pos += 1;
        Some(id)
    }
}
