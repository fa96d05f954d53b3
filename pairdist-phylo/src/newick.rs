//! Newick format parser and writer, plus tree-source resolution.
//!
//! Supports the standard Newick grammar:
//! ```text
//! tree     = subtree ';'
//! subtree  = '(' children ')' label | label
//! children = subtree (',' subtree)*
//! label    = name? (':' length)?
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::tree::{Node, NodeId, PhyloTree};
use pairdist_core::{PairdistError, Result};

/// Parse a Newick format string into a `PhyloTree`.
pub fn parse(input: &str) -> Result<PhyloTree> {
    let mut parser = Parser::new(input.as_bytes());
    let (nodes, root) = parser.parse_tree()?;
    PhyloTree::from_nodes(nodes, root)
}

/// Read the first tree from a Newick file.
pub fn read_newick_file(path: impl AsRef<Path>) -> Result<PhyloTree> {
    let text = fs::read_to_string(path.as_ref())?;
    parse(text.trim())
}

/// Serialize a `PhyloTree` to a Newick format string.
pub fn write(tree: &PhyloTree) -> String {
    let mut buf = String::new();
    write_subtree(tree, tree.root(), &mut buf);
    buf.push(';');
    buf
}

/// Where a tree comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeSource {
    /// Literal Newick text.
    Text(String),
    /// Path to a Newick file.
    Path(PathBuf),
}

impl TreeSource {
    /// Classify a user-supplied string.
    ///
    /// An existing file path wins. Otherwise a string that starts with `(`
    /// and ends with `;` is literal Newick. Anything else is rejected with
    /// "Couldn't understand this tree".
    pub fn resolve(arg: &str) -> Result<TreeSource> {
        let path = Path::new(arg);
        if path.is_file() {
            return Ok(TreeSource::Path(path.to_path_buf()));
        }
        let trimmed = arg.trim();
        if trimmed.starts_with('(') && trimmed.ends_with(';') {
            return Ok(TreeSource::Text(trimmed.to_string()));
        }
        Err(PairdistError::Parse(format!(
            "Couldn't understand this tree: '{}' is neither a file nor a Newick string",
            arg
        )))
    }

    /// Parse the tree this source points at.
    pub fn load(&self) -> Result<PhyloTree> {
        match self {
            TreeSource::Text(text) => parse(text),
            TreeSource::Path(path) => read_newick_file(path),
        }
    }
}

fn write_subtree(tree: &PhyloTree, id: NodeId, buf: &mut String) {
    let Some(node) = tree.get_node(id) else {
        return;
    };
    if !node.children.is_empty() {
        buf.push('(');
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                buf.push(',');
            }
            write_subtree(tree, child, buf);
        }
        buf.push(')');
    }
    if let Some(ref name) = node.name {
        buf.push_str(name);
    }
    if let (Some(len), false) = (node.branch_length, node.is_root()) {
        buf.push(':');
        // Use enough precision but strip trailing zeros
        let s = format!("{:.10}", len);
        let s = s.trim_end_matches('0');
        let s = s.trim_end_matches('.');
        buf.push_str(s);
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<Node>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            nodes: Vec::new(),
        }
    }

    fn parse_tree(&mut self) -> Result<(Vec<Node>, NodeId)> {
        self.skip_whitespace();
        let root = self.parse_subtree(None)?;
        self.skip_whitespace();
        if self.peek() != Some(b';') {
            return Err(PairdistError::Parse(
                "expected ';' at end of Newick string".into(),
            ));
        }
        self.pos += 1;
        Ok((std::mem::take(&mut self.nodes), root))
    }

    fn parse_subtree(&mut self, parent: Option<NodeId>) -> Result<NodeId> {
        self.skip_whitespace();
        let id = self.alloc_node(parent);

        if self.peek() == Some(b'(') {
            self.pos += 1;
            loop {
                let child = self.parse_subtree(Some(id))?;
                self.nodes[id].children.push(child);
                self.skip_whitespace();
                if self.peek() == Some(b',') {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            if self.peek() != Some(b')') {
                return Err(PairdistError::Parse("expected ')' in Newick string".into()));
            }
            self.pos += 1;
        }

        self.parse_label(id)?;
        Ok(id)
    }

    fn parse_label(&mut self, id: NodeId) -> Result<()> {
        self.skip_whitespace();
        let name = self.parse_name();
        if !name.is_empty() {
            self.nodes[id].name = Some(name);
        }
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace();
            let len_str = self.parse_float_str();
            if len_str.is_empty() {
                return Err(PairdistError::Parse("expected number after ':'".into()));
            }
            let len: f64 = len_str.parse().map_err(|_| {
                PairdistError::Parse(format!("invalid branch length: '{}'", len_str))
            })?;
            self.nodes[id].branch_length = Some(len);
        }
        Ok(())
    }

    fn parse_name(&mut self) -> String {
        if self.peek() == Some(b'\'') {
            return self.parse_quoted_name();
        }
        let start = self.pos;
        while let Some(b) = self.peek() {
            match b {
                b':' | b',' | b')' | b'(' | b';' | b' ' | b'\t' | b'\n' | b'\r' => break,
                _ => self.pos += 1,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn parse_quoted_name(&mut self) -> String {
        self.pos += 1;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'\'' {
                break;
            }
            self.pos += 1;
        }
        let name = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        if self.peek() == Some(b'\'') {
            self.pos += 1;
        }
        name
    }

    fn parse_float_str(&mut self) -> String {
        let start = self.pos;
        while let Some(b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E') = self.peek() {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn alloc_node(&mut self, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        let mut node = Node::new(id, None);
        node.parent = parent;
        self.nodes.push(node);
        id
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.peek() {
            self.pos += 1;
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn leaf_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9]{0,5}"
    }

    /// Caterpillar trees with 2-6 leaves and branch lengths.
    fn caterpillar() -> impl Strategy<Value = String> {
        proptest::collection::vec((leaf_name(), 0.0f64..5.0), 2..=6).prop_map(|leaves| {
            let label = |(n, l): &(String, f64)| format!("{}:{}", n, l);
            let mut s = format!("({},{})", label(&leaves[0]), label(&leaves[1]));
            for leaf in &leaves[2..] {
                s = format!("({}:0.5,{})", s, label(leaf));
            }
            s.push(';');
            s
        })
    }

    proptest! {
        #[test]
        fn roundtrip_preserves_leaves_and_length(newick in caterpillar()) {
            let tree = parse(&newick).unwrap();
            let tree2 = parse(&write(&tree)).unwrap();
            prop_assert_eq!(tree.leaf_names(), tree2.leaf_names());
            prop_assert!((tree.total_branch_length() - tree2.total_branch_length()).abs() < 1e-8);
        }

        #[test]
        fn parse_does_not_panic(s in "\\PC{0,100}") {
            let _ = parse(&s);
        }
    }
}
