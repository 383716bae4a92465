use super::tokens::{TokenSequence, WILDCARD};
use super::types::ClusterId;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Inner or leaf node of the prefix tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    children: AHashMap<String, NodeId>,
    wildcard: Option<NodeId>,
    /// Candidate clusters; only populated on leaves
    clusters: Vec<ClusterId>,
}

impl Node {
    fn fan_out(&self) -> usize {
        self.children.len() + usize::from(self.wildcard.is_some())
    }
}

/// Fixed-depth prefix tree routing token sequences to candidate clusters
///
/// The first layer is keyed by token count, the following `depth - 2`
/// layers by the leading tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixTree {
    depth: usize,
    nodes: Vec<Node>,
    by_length: BTreeMap<usize, NodeId>,
}

impl PrefixTree {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            nodes: Vec::new(),
            by_length: BTreeMap::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn branch_len(&self, seq: &TokenSequence) -> usize {
        self.depth.saturating_sub(2).min(seq.len())
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    fn alloc(&mut self) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::default());
        id
    }

    /// Follow literal children, falling back to the wildcard child.
    /// Returns `None` when neither exists at some level.
    pub fn search(&self, seq: &TokenSequence) -> Option<NodeId> {
        let mut current = *self.by_length.get(&seq.len())?;
        for token in &seq.tokens()[..self.branch_len(seq)] {
            let node = self.node(current);
            current = match node.children.get(token) {
                Some(child) => *child,
                None => node.wildcard?,
            };
        }
        Some(current)
    }

    /// Candidate clusters held by a leaf
    pub fn candidates(&self, leaf: NodeId) -> &[ClusterId] {
        &self.node(leaf).clusters
    }

    /// Find or build the path for `seq` and register `cluster` at its leaf.
    /// Returns the number of candidates the leaf held before insertion.
    pub fn insert(&mut self, seq: &TokenSequence, cluster: ClusterId, max_children: usize) -> usize {
        let mut current = match self.by_length.get(&seq.len()) {
            Some(id) => *id,
            None => {
                let id = self.alloc();
                self.by_length.insert(seq.len(), id);
                id
            }
        };

        for i in 0..self.branch_len(seq) {
            let token = &seq.tokens()[i];
            current = self.step_or_create(current, token, max_children);
        }

        let leaf = self.node_mut(current);
        let before = leaf.clusters.len();
        leaf.clusters.push(cluster);
        before
    }

    fn step_or_create(&mut self, current: NodeId, token: &str, max_children: usize) -> NodeId {
        let node = self.node(current);
        if let Some(child) = node.children.get(token) {
            return *child;
        }

        let parameter_like = token == WILDCARD || token.chars().any(|c| c.is_ascii_digit());
        let literal_room = match node.wildcard {
            _ if parameter_like => false,
            Some(_) => node.fan_out() < max_children,
            // Keep the last slot for the wildcard child
            None => node.fan_out() + 1 < max_children,
        };

        if literal_room {
            let child = self.alloc();
            self.node_mut(current).children.insert(token.to_string(), child);
            child
        } else {
            self.wildcard_child(current)
        }
    }

    fn wildcard_child(&mut self, current: NodeId) -> NodeId {
        if let Some(child) = self.node(current).wildcard {
            return child;
        }
        let child = self.alloc();
        self.node_mut(current).wildcard = Some(child);
        child
    }
}
