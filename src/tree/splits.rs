//! Split (bipartition) encoding and the structural self-check.
//!
//! # Overview
//! The split bitmask of an edge has bit *i* set iff the taxon with namespace
//! index *i* sits below the edge's head node. Masks are built bottom-up: a
//! leaf contributes its own bit, an internal node the union of its children.
//!
//! ```text
//!           root          root edge : {A,B,C,D}  (full-taxa mask)
//!          /    \
//!        n1      D        n1 edge   : {A,B,C}
//!       /  \
//!      A    n2            n2 edge   : {B,C}
//!          /  \
//!         B    C
//! ```

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{EdgeId, NodeId, Tree};
use crate::bitset::Bitset;
use crate::error::{PhyloError, Result};

impl Tree {
    /// Computes the split bitmask of every edge in the tree without storing
    /// anything, keyed by the edge's head node.
    ///
    /// Masks are sized for the current namespace. Leaves without a taxon
    /// contribute no bit.
    pub fn compute_split_bitmasks(&self) -> HashMap<NodeId, Bitset> {
        let words = Bitset::words_for(self.namespace.len());
        let mut masks: HashMap<NodeId, Bitset> = HashMap::new();
        for id in self.postorder_node_iter() {
            let node = &self[id];
            let mask = if node.is_leaf() {
                match node.taxon() {
                    Some(t) => Bitset::singleton(t.index(), words),
                    None => Bitset::zeros(words),
                }
            } else {
                let mut mask = Bitset::zeros(words);
                for child in &node.children {
                    if let Some(m) = masks.get(child) {
                        mask.or_assign(m);
                    }
                }
                mask
            };
            masks.insert(id, mask);
        }
        masks
    }

    /// Writes the split bitmask onto every edge and rebuilds the
    /// mask → edge registry.
    ///
    /// # Errors
    /// [`PhyloError::InvalidTree`] if a leaf has no taxon.
    pub fn encode_bipartitions(&mut self) -> Result<()> {
        if let Some(leaf) = self.leaf_iter().find(|&id| self[id].taxon().is_none()) {
            return Err(PhyloError::InvalidTree(format!(
                "leaf {leaf} has no taxon and cannot be encoded"
            )));
        }
        let masks = self.compute_split_bitmasks();
        let order: Vec<NodeId> = self.postorder_node_iter().collect();
        self.split_edges.clear();
        for id in order {
            let edge = self[id].edge;
            let mask = masks.get(&id).cloned();
            if let Some(m) = &mask {
                self.split_edges.insert(m.clone(), edge);
            }
            self.edges[edge.0].split_bitmask = mask;
        }
        debug!(splits = self.split_edges.len(), "encoded bipartitions");
        Ok(())
    }

    /// The full-taxa mask, i.e. the split bitmask of the seed edge.
    pub fn taxa_mask(&self) -> Option<&Bitset> {
        let seed = self.seed_node?;
        self.edge_of(seed).split_bitmask.as_ref()
    }

    /// Verifies linkage invariants, and optionally split invariants, by an
    /// explicit-stack walk from the seed node.
    ///
    /// Checked:
    /// - the seed has no parent and its edge has no tail;
    /// - no node or edge is reached twice;
    /// - every edge's head is its node and its tail is the node's parent;
    /// - every child points back to its parent;
    /// - with `check_splits`: each mask is within the full-taxa mask, equals
    ///   the union of the child masks (or the leaf's own bit), is registered
    ///   to its edge, and every registered edge is in the tree.
    pub fn debug_check_tree(&self, check_splits: bool) -> Result<()> {
        let Some(seed) = self.seed_node else {
            return Ok(());
        };
        let invalid = |msg: String| Err(PhyloError::InvalidTree(msg));

        if self[seed].parent.is_some() {
            return invalid(format!("seed node {seed} has a parent"));
        }
        if self.edge_of(seed).tail_node.is_some() {
            return invalid(format!("seed node {seed} edge has a tail"));
        }

        let taxa_mask = if check_splits {
            match self.taxa_mask() {
                Some(m) => Some(m.clone()),
                None => return invalid("splits are not encoded".to_string()),
            }
        } else {
            None
        };

        let mut seen_nodes: HashSet<NodeId> = HashSet::new();
        let mut seen_edges: HashSet<EdgeId> = HashSet::new();
        let mut stack = vec![seed];
        while let Some(id) = stack.pop() {
            if !seen_nodes.insert(id) {
                return invalid(format!("node {id} reached twice"));
            }
            let node = &self[id];
            let edge_id = node.edge;
            if !seen_edges.insert(edge_id) {
                return invalid(format!("edge of node {id} reached twice"));
            }
            let edge = &self[edge_id];
            if edge.head_node != id {
                return invalid(format!("edge of node {id} has head {}", edge.head_node));
            }
            if edge.tail_node != node.parent {
                return invalid(format!("edge tail of node {id} disagrees with its parent"));
            }
            for &child in &node.children {
                if self[child].parent != Some(id) {
                    return invalid(format!("child {child} does not point back to {id}"));
                }
                stack.push(child);
            }

            if let Some(universe) = &taxa_mask {
                let Some(mask) = &edge.split_bitmask else {
                    return invalid(format!("edge of node {id} has no split bitmask"));
                };
                if !mask.is_subset_of(universe) {
                    return invalid(format!("split of node {id} exceeds the taxa mask"));
                }
                let expected = match (node.is_leaf(), node.taxon()) {
                    (true, Some(t)) => Bitset::singleton(t.index(), universe.0.len()),
                    (true, None) => Bitset::zeros(universe.0.len()),
                    (false, _) => {
                        let mut union = Bitset::zeros(universe.0.len());
                        for &child in &node.children {
                            if let Some(m) = &self.edge_of(child).split_bitmask {
                                union.or_assign(m);
                            }
                        }
                        union
                    }
                };
                if &expected != mask {
                    return invalid(format!("split of node {id} disagrees with its children"));
                }
                if self.split_edges.get(mask) != Some(&edge_id) {
                    return invalid(format!("split of node {id} is not registered to its edge"));
                }
            }
        }

        if check_splits {
            if let Some(stale) = self.split_edges.values().find(|e| !seen_edges.contains(e)) {
                return invalid(format!("registered edge {} is not in the tree", stale.0));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::six_taxon_tree;
    use super::*;

    fn mask_of(tree: &Tree, labels: &[&str]) -> Bitset {
        let mut mask = Bitset::zeros(1);
        for label in labels {
            mask.set(tree.namespace().get(label).unwrap().index());
        }
        mask
    }

    #[test]
    fn test_encode_bipartitions() {
        let (mut tree, ids) = six_taxon_tree();
        tree.encode_bipartitions().unwrap();

        assert_eq!(tree.taxa_mask(), Some(&Bitset::full(6)));
        assert_eq!(
            tree.edge_of(ids[1]).split_bitmask,
            Some(mask_of(&tree, &["a", "b", "c"]))
        );
        let ef = mask_of(&tree, &["e", "f"]);
        assert_eq!(tree.split_edges()[&ef], tree[ids[8]].edge());
        assert_eq!(tree.split_edges().len(), 11);
        tree.debug_check_tree(true).unwrap();
    }

    #[test]
    fn test_encode_rejects_leaf_without_taxon() {
        let (mut tree, ids) = six_taxon_tree();
        tree.new_child(ids[8], None, Some(1.0));
        assert!(matches!(
            tree.encode_bipartitions(),
            Err(PhyloError::InvalidTree(_))
        ));
    }

    #[test]
    fn test_debug_check_detects_stale_split() {
        let (mut tree, ids) = six_taxon_tree();
        tree.encode_bipartitions().unwrap();
        let wrong = mask_of(&tree, &["a"]);
        let edge = tree[ids[2]].edge();
        tree.edge_mut(edge).split_bitmask = Some(wrong);
        assert!(tree.debug_check_tree(false).is_ok());
        assert!(matches!(
            tree.debug_check_tree(true),
            Err(PhyloError::InvalidTree(_))
        ));
    }

    #[test]
    fn test_debug_check_requires_encoding() {
        let (tree, _) = six_taxon_tree();
        assert!(tree.debug_check_tree(true).is_err());
    }
}
