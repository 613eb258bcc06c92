//! Arena-backed phylogenetic tree: nodes, edges and their linkage.
//!
//! # Structure
//! - Every node and every edge lives in an arena owned by the [`Tree`] and is
//!   referenced by [`NodeId`] / [`EdgeId`].
//! - Forward links (parent → ordered children) own the structure; the
//!   child → parent link and the edge tail are lookup-only back-references.
//! - Each node owns exactly one edge, the one connecting it to its parent.
//!   The seed node's edge has no tail.
//! - Nodes detached by an edit stay in the arena (so undo tokens remain valid)
//!   but are no longer reachable from the seed node.
//!
//! All structural edits go through [`Tree`] methods so the parent pointer,
//! the edge tail and the child list are always updated together.

pub mod edit;
mod measure;
pub mod newick;
mod splits;
pub mod traversal;

pub use edit::{RemovalStep, RemovalUndo};
pub use newick::NewickOptions;
pub use traversal::{AncestorIter, EdgeIter, LeafIter, LevelOrderIter, PostorderIter, PreorderIter};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use crate::bitset::Bitset;
use crate::distance_matrix::PhylogeneticDistanceMatrix;
use crate::error::{PhyloError, Result};
use crate::taxon::{Taxon, TaxonNamespace};

/// Index of a node in its tree's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Index of an edge in its tree's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl EdgeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A vertex of the tree.
///
/// Structural fields are read-only from outside the crate; use the [`Tree`]
/// editing methods to change them.
#[derive(Debug, Clone)]
pub struct Node {
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    edge: EdgeId,
    taxon: Option<Taxon>,
    label: Option<String>,
    age: Option<f64>,
}

impl Node {
    /// Ordered children; order is preserved by traversal and Newick output.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// The edge connecting this node to its parent.
    pub fn edge(&self) -> EdgeId {
        self.edge
    }

    pub fn taxon(&self) -> Option<&Taxon> {
        self.taxon.as_ref()
    }

    pub fn set_taxon(&mut self, taxon: Option<Taxon>) {
        self.taxon = taxon;
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    /// Age annotation written by [`Tree::add_ages_to_nodes`].
    pub fn age(&self) -> Option<f64> {
        self.age
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_internal(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Directed link from a tail (parent) node to a head node.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// `None` means unweighted: no contribution to weighted sums,
    /// one step in path-length counts.
    pub length: Option<f64>,
    /// Split bitmask written by [`Tree::encode_bipartitions`].
    pub split_bitmask: Option<Bitset>,
    tail_node: Option<NodeId>,
    head_node: NodeId,
}

impl Edge {
    pub fn tail_node(&self) -> Option<NodeId> {
        self.tail_node
    }

    pub fn head_node(&self) -> NodeId {
        self.head_node
    }
}

/// A rooted or unrooted phylogenetic tree sharing a taxon namespace.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    seed_node: Option<NodeId>,
    /// Whether the seed node is a biological root.
    pub is_rooted: bool,
    pub label: Option<String>,
    namespace: Arc<TaxonNamespace>,
    split_edges: HashMap<Bitset, EdgeId>,
}

impl Index<NodeId> for Tree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}

impl Index<EdgeId> for Tree {
    type Output = Edge;

    fn index(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }
}

// ============================================================================
// Construction and accessors
// ============================================================================
impl Tree {
    /// Creates a tree consisting of a single, unattached seed node.
    pub fn new(namespace: Arc<TaxonNamespace>) -> Self {
        let mut tree = Tree::empty(namespace);
        let seed = tree.new_node(None);
        tree.seed_node = Some(seed);
        tree
    }

    /// Creates a tree without any node.
    pub fn empty(namespace: Arc<TaxonNamespace>) -> Self {
        Tree {
            nodes: Vec::new(),
            edges: Vec::new(),
            seed_node: None,
            is_rooted: false,
            label: None,
            namespace,
            split_edges: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> &Arc<TaxonNamespace> {
        &self.namespace
    }

    /// The node from which the whole tree springs.
    ///
    /// # Errors
    /// [`PhyloError::EmptyTree`] if the tree has no node.
    pub fn seed_node(&self) -> Result<NodeId> {
        self.seed_node.ok_or(PhyloError::EmptyTree)
    }

    /// [`PhyloError::Structural`] unless `id` addresses a node of this
    /// tree's arena.
    pub(crate) fn check_node(&self, id: NodeId) -> Result<()> {
        if id.0 >= self.nodes.len() {
            return Err(PhyloError::Structural(format!(
                "node {id} is not part of this tree"
            )));
        }
        Ok(())
    }

    /// Makes a parentless node the seed node.
    pub fn set_seed_node(&mut self, node: NodeId) -> Result<()> {
        self.check_node(node)?;
        if self.nodes[node.0].parent.is_some() {
            return Err(PhyloError::Structural(format!(
                "node {node} has a parent and cannot become the seed node"
            )));
        }
        self.seed_node = Some(node);
        self.split_edges.clear();
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Mutable access to non-structural node data (taxon, label).
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    /// Mutable access to edge length and split bitmask.
    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.edges[id.0]
    }

    /// The edge subtending `node`.
    pub fn edge_of(&self, node: NodeId) -> &Edge {
        &self.edges[self.nodes[node.0].edge.0]
    }

    pub fn edge_length(&self, node: NodeId) -> Option<f64> {
        self.edge_of(node).length
    }

    pub fn set_edge_length(&mut self, node: NodeId, length: Option<f64>) {
        let edge = self.nodes[node.0].edge;
        self.edges[edge.0].length = length;
    }

    /// Allocates a detached node with a fresh edge.
    pub fn new_node(&mut self, taxon: Option<Taxon>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let edge = EdgeId(self.edges.len());
        self.edges.push(Edge {
            length: None,
            split_bitmask: None,
            tail_node: None,
            head_node: id,
        });
        self.nodes.push(Node {
            children: Vec::new(),
            parent: None,
            edge,
            taxon,
            label: None,
            age: None,
        });
        id
    }

    /// Creates a node and appends it as the last child of `parent`.
    pub fn new_child(
        &mut self,
        parent: NodeId,
        taxon: Option<Taxon>,
        edge_length: Option<f64>,
    ) -> NodeId {
        let child = self.new_node(taxon);
        self.attach(parent, child, edge_length, None);
        child
    }

    /// Split bitmask → edge registry written by [`Tree::encode_bipartitions`].
    pub fn split_edges(&self) -> &HashMap<Bitset, EdgeId> {
        &self.split_edges
    }
}

// ============================================================================
// Low-level linkage (crate-internal)
// ============================================================================
impl Tree {
    /// Detaches `node` from its parent, if any. Returns the former parent and
    /// the position `node` had in its child list.
    pub(crate) fn detach(&mut self, node: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.nodes[node.0].parent?;
        let siblings = &mut self.nodes[parent.0].children;
        let pos = siblings.iter().position(|&c| c == node)?;
        siblings.remove(pos);
        self.nodes[node.0].parent = None;
        let edge = self.nodes[node.0].edge;
        self.edges[edge.0].tail_node = None;
        Some((parent, pos))
    }

    /// Detaches `node` from any parent, then attaches it under `parent` at
    /// `pos` (appended when `None` or past the end).
    pub(crate) fn attach(
        &mut self,
        parent: NodeId,
        node: NodeId,
        edge_length: Option<f64>,
        pos: Option<usize>,
    ) {
        self.detach(node);
        let children = &mut self.nodes[parent.0].children;
        match pos {
            Some(p) if p < children.len() => children.insert(p, node),
            _ => children.push(node),
        }
        self.nodes[node.0].parent = Some(parent);
        let edge = self.nodes[node.0].edge;
        self.edges[edge.0].tail_node = Some(parent);
        if edge_length.is_some() {
            self.edges[edge.0].length = edge_length;
        }
    }

    /// Moves edge `edge` under `node`, keeping the edge's head consistent.
    pub(crate) fn set_node_edge(&mut self, node: NodeId, edge: EdgeId) {
        self.nodes[node.0].edge = edge;
        self.edges[edge.0].head_node = node;
        self.edges[edge.0].tail_node = self.nodes[node.0].parent;
    }

    pub(crate) fn set_age(&mut self, node: NodeId, age: Option<f64>) {
        self.nodes[node.0].age = age;
    }
}

/// Adds `donor` onto `target` when both lengths are present.
///
/// Returns whether `target` changed; a missing length on either side leaves
/// the target untouched.
pub(crate) fn absorb_length(target: &mut Option<f64>, donor: Option<f64>) -> bool {
    match (target.as_mut(), donor) {
        (Some(t), Some(d)) => {
            *t += d;
            true
        }
        _ => false,
    }
}

// ============================================================================
// Queries
// ============================================================================
impl Tree {
    /// Nodes in pre-order for which `filter` holds.
    pub fn nodes(&self, filter: impl Fn(&Node) -> bool) -> Vec<NodeId> {
        self.preorder_node_iter()
            .filter(|&id| filter(&self[id]))
            .collect()
    }

    /// Leaves in post-order.
    pub fn leaf_nodes(&self) -> Vec<NodeId> {
        self.leaf_iter().collect()
    }

    pub fn internal_nodes(&self) -> Vec<NodeId> {
        self.nodes(Node::is_internal)
    }

    /// Number of nodes reachable from the seed node.
    pub fn num_nodes(&self) -> usize {
        self.preorder_node_iter().count()
    }

    /// First node (pre-order) for which `filter` holds.
    pub fn find_node(&self, filter: impl Fn(&Node) -> bool) -> Option<NodeId> {
        self.preorder_node_iter().find(|&id| filter(&self[id]))
    }

    pub fn find_node_for_taxon(&self, taxon: &Taxon) -> Option<NodeId> {
        self.find_node(|n| n.taxon() == Some(taxon))
    }

    /// First node (pre-order) whose taxon satisfies `filter`.
    pub fn find_taxon_node(&self, filter: impl Fn(&Taxon) -> bool) -> Option<NodeId> {
        self.find_node(|n| n.taxon().is_some_and(|t| filter(t)))
    }

    /// Snapshot of the nodes currently in the tree.
    pub fn get_node_set(&self) -> HashSet<NodeId> {
        self.preorder_node_iter().collect()
    }

    /// Snapshot of the edges currently in the tree (including the seed edge).
    pub fn get_edge_set(&self) -> HashSet<EdgeId> {
        self.preorder_edge_iter().collect()
    }

    /// Most-recent common ancestor of two nodes, walking both ancestor chains
    /// (each inclusive of the node itself).
    ///
    /// Returns `None` when the nodes are in disconnected components.
    pub fn mrca_of(&self, node1: NodeId, node2: NodeId) -> Option<NodeId> {
        let chain2: HashSet<NodeId> = self.ancestor_iter(node2, true).collect();
        self.ancestor_iter(node1, true).find(|a| chain2.contains(a))
    }

    /// Number of ancestors between `node` and the root.
    pub fn level(&self, node: NodeId) -> usize {
        self.ancestor_iter(node, false).count()
    }

    /// Child edges of `node` followed by its own edge.
    pub fn incident_edges(&self, node: NodeId) -> Vec<EdgeId> {
        let n = &self[node];
        let mut edges: Vec<EdgeId> = n.children.iter().map(|&c| self[c].edge).collect();
        edges.push(n.edge);
        edges
    }

    /// Children of `node` followed by its parent (if any).
    pub fn adjacent_nodes(&self, node: NodeId) -> Vec<NodeId> {
        let n = &self[node];
        let mut adjacent = n.children.clone();
        adjacent.extend(n.parent);
        adjacent
    }

    /// All edges sharing a node with `edge`.
    pub fn adjacent_edges(&self, edge: EdgeId) -> Vec<EdgeId> {
        let e = &self[edge];
        let mut adjacent: Vec<EdgeId> = self
            .incident_edges(e.head_node)
            .into_iter()
            .filter(|&x| x != edge)
            .collect();
        if let Some(tail) = e.tail_node {
            adjacent.extend(self.incident_edges(tail).into_iter().filter(|&x| x != edge));
        }
        adjacent
    }

    /// True if the edge's head node is a leaf.
    pub fn is_terminal_edge(&self, edge: EdgeId) -> bool {
        self[self[edge].head_node].is_leaf()
    }

    pub fn is_internal_edge(&self, edge: EdgeId) -> bool {
        self[self[edge].head_node].is_internal()
    }

    /// Builds the all-pairs distance matrix over this tree's leaf taxa.
    pub fn phylogenetic_distance_matrix(&self) -> Result<PhylogeneticDistanceMatrix> {
        PhylogeneticDistanceMatrix::from_tree(self)
    }
}

// ============================================================================
// Taxa management
// ============================================================================
impl Tree {
    /// Builds a new namespace from the taxa on this tree (sorted by label)
    /// and rebinds the tree to it.
    pub fn infer_taxon_namespace(&mut self) -> Arc<TaxonNamespace> {
        let mut labels: Vec<String> = self
            .postorder_node_iter()
            .filter_map(|id| self[id].taxon().map(|t| t.label().to_string()))
            .collect();
        labels.sort();
        labels.dedup();

        let namespace = TaxonNamespace::shared();
        for label in &labels {
            namespace.get_or_create(label);
        }
        self.normalize_taxa(Arc::clone(&namespace));
        namespace
    }

    /// Reassigns every taxon to the taxon with the same label in `namespace`.
    pub fn normalize_taxa(&mut self, namespace: Arc<TaxonNamespace>) {
        let nodes: Vec<NodeId> = self.postorder_node_iter().collect();
        for id in nodes {
            if let Some(old) = self.nodes[id.0].taxon.take() {
                self.nodes[id.0].taxon = Some(namespace.get_or_create(old.label()));
            }
        }
        self.namespace = namespace;
        // bit positions are namespace indices, so old masks are stale
        self.split_edges.clear();
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::six_taxon_tree;
    use super::*;

    #[test]
    fn test_linkage_invariants_after_construction() {
        let (tree, ids) = six_taxon_tree();
        tree.debug_check_tree(false).unwrap();

        let ab = ids[2];
        let a = ids[3];
        assert_eq!(tree[a].parent(), Some(ab));
        assert_eq!(tree.edge_of(a).tail_node(), Some(ab));
        assert_eq!(tree.edge_of(a).head_node(), a);
        assert_eq!(tree[ab].children(), &[ids[3], ids[4]]);
        assert!(tree.edge_of(ids[0]).tail_node().is_none());
    }

    #[test]
    fn test_empty_tree() {
        let tree = Tree::empty(TaxonNamespace::shared());
        assert!(matches!(tree.seed_node(), Err(PhyloError::EmptyTree)));
        assert_eq!(tree.num_nodes(), 0);
        assert!(tree.leaf_nodes().is_empty());
    }

    #[test]
    fn test_default_tree_has_single_seed() {
        let tree = Tree::new(TaxonNamespace::shared());
        let seed = tree.seed_node().unwrap();
        assert!(tree[seed].is_leaf());
        assert_eq!(tree.leaf_nodes(), vec![seed]);
    }

    #[test]
    fn test_queries() {
        let (tree, ids) = six_taxon_tree();
        let ns = tree.namespace();

        assert_eq!(tree.num_nodes(), 11);
        assert_eq!(tree.leaf_nodes().len(), 6);
        assert_eq!(tree.internal_nodes().len(), 5);
        assert_eq!(tree.get_node_set().len(), 11);
        assert_eq!(tree.get_edge_set().len(), 11);

        let e = ns.get("e").unwrap();
        assert_eq!(tree.find_node_for_taxon(&e), Some(ids[9]));
        assert_eq!(tree.find_taxon_node(|t| t.label() == "c"), Some(ids[5]));
        assert_eq!(tree.find_node(|n| n.children().len() == 2), Some(ids[0]));

        assert_eq!(tree.mrca_of(ids[3], ids[5]), Some(ids[1]));
        assert_eq!(tree.mrca_of(ids[3], ids[10]), Some(ids[0]));
        assert_eq!(tree.mrca_of(ids[3], ids[3]), Some(ids[3]));
        assert_eq!(tree.mrca_of(ids[2], ids[4]), Some(ids[2]));

        assert_eq!(tree.level(ids[0]), 0);
        assert_eq!(tree.level(ids[3]), 3);

        assert_eq!(tree.adjacent_nodes(ids[2]), vec![ids[3], ids[4], ids[1]]);
        let ab_edge = tree[ids[2]].edge();
        assert_eq!(tree.incident_edges(ids[2]).len(), 3);
        // two child edges of ab, plus c's edge and abc's edge at the tail
        assert_eq!(tree.adjacent_edges(ab_edge).len(), 4);
        assert!(tree.is_internal_edge(ab_edge));
        assert!(tree.is_terminal_edge(tree[ids[3]].edge()));
    }

    #[test]
    fn test_infer_and_normalize_taxa() {
        let (mut tree, ids) = six_taxon_tree();
        let old_a = tree[ids[3]].taxon().cloned().unwrap();

        let ns = tree.infer_taxon_namespace();
        let labels: Vec<String> = ns.taxa().iter().map(|t| t.label().to_string()).collect();
        assert_eq!(labels, vec!["a", "b", "c", "d", "e", "f"]);

        let new_a = tree[ids[3]].taxon().cloned().unwrap();
        assert_ne!(old_a, new_a);
        assert_eq!(new_a.label(), "a");
        assert!(Arc::ptr_eq(tree.namespace(), &ns));
    }
}
