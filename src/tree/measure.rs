//! Path lengths, tree length and node ages.

use std::collections::HashMap;

use tracing::debug;

use super::{NodeId, Tree};
use crate::error::{PhyloError, Result};

impl Tree {
    /// Sum of all edge lengths, including the seed edge. Missing lengths
    /// count as zero.
    pub fn length(&self) -> f64 {
        self.preorder_edge_iter()
            .filter_map(|e| self[e].length)
            .sum()
    }

    /// Sum of edge lengths from `node` up to and including the root's edge.
    pub fn distance_from_root(&self, node: NodeId) -> f64 {
        self.ancestor_iter(node, true)
            .filter_map(|a| self.edge_length(a))
            .sum()
    }

    /// Largest path length from `node` down to any leaf below it.
    pub fn distance_from_tip(&self, node: NodeId) -> f64 {
        let mut below: HashMap<NodeId, f64> = HashMap::new();
        for id in self.postorder_iter_from(node) {
            let dist = self[id]
                .children
                .iter()
                .map(|c| below.get(c).copied().unwrap_or(0.0) + self.edge_length(*c).unwrap_or(0.0))
                .fold(0.0, f64::max);
            below.insert(id, dist);
        }
        below.get(&node).copied().unwrap_or(0.0)
    }

    /// Annotates every node with its age: zero for leaves, otherwise the age
    /// of the first child plus that child's edge length.
    ///
    /// Every other child must agree within `ultrametricity_precision`; a
    /// negative precision disables the check.
    ///
    /// # Errors
    /// - [`PhyloError::EmptyTree`] if the tree has no node.
    /// - [`PhyloError::Ultrametricity`] on the first disagreeing child.
    pub fn add_ages_to_nodes(&mut self, ultrametricity_precision: f64) -> Result<()> {
        self.seed_node()?;
        let order: Vec<NodeId> = self.postorder_node_iter().collect();
        for id in order {
            let children = self[id].children.clone();
            let Some((&first, rest)) = children.split_first() else {
                self.set_age(id, Some(0.0));
                continue;
            };
            let through = |tree: &Tree, child: NodeId| {
                tree[child].age.unwrap_or(0.0) + tree.edge_length(child).unwrap_or(0.0)
            };
            let age = through(self, first);
            if ultrametricity_precision >= 0.0 {
                for &child in rest {
                    let observed = through(self, child);
                    if (age - observed).abs() > ultrametricity_precision {
                        debug!(node = %id, expected = age, observed, "ultrametricity violated");
                        return Err(PhyloError::Ultrametricity {
                            expected: age,
                            observed,
                        });
                    }
                }
            }
            self.set_age(id, Some(age));
        }
        Ok(())
    }

    /// Ages of all internal nodes, oldest first (requires
    /// [`Tree::add_ages_to_nodes`]).
    pub fn internal_node_ages(&self) -> Vec<f64> {
        let mut ages: Vec<f64> = self
            .preorder_node_iter()
            .filter(|&id| self[id].is_internal())
            .filter_map(|id| self[id].age)
            .collect();
        ages.sort_by(|a, b| b.total_cmp(a));
        ages
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::six_taxon_tree;
    use super::*;
    use crate::taxon::TaxonNamespace;

    #[test]
    fn test_length_and_root_distance() {
        let (tree, ids) = six_taxon_tree();
        assert_eq!(tree.length(), 12.0);
        assert_eq!(tree.distance_from_root(ids[3]), 3.0);
        assert_eq!(tree.distance_from_root(ids[7]), 3.0);
        assert_eq!(tree.distance_from_root(ids[0]), 0.0);
    }

    #[test]
    fn test_distance_from_tip() {
        let (tree, ids) = six_taxon_tree();
        assert_eq!(tree.distance_from_tip(ids[0]), 3.0);
        assert_eq!(tree.distance_from_tip(ids[2]), 1.0);
        assert_eq!(tree.distance_from_tip(ids[3]), 0.0);
    }

    #[test]
    fn test_ages_on_ultrametric_tree() {
        let (mut tree, ids) = six_taxon_tree();
        tree.add_ages_to_nodes(1e-7).unwrap();
        assert_eq!(tree[ids[0]].age(), Some(3.0));
        assert_eq!(tree[ids[1]].age(), Some(2.0));
        assert_eq!(tree[ids[3]].age(), Some(0.0));
        assert_eq!(tree.internal_node_ages(), vec![3.0, 2.0, 2.0, 1.0, 1.0]);
    }

    #[test]
    fn test_ages_reject_non_ultrametric() {
        let (mut tree, ids) = six_taxon_tree();
        tree.set_edge_length(ids[5], Some(2.5));
        let err = tree.add_ages_to_nodes(1e-7).unwrap_err();
        assert!(matches!(
            err,
            PhyloError::Ultrametricity { expected, observed } if expected == 2.0 && observed == 2.5
        ));

        // a negative precision skips the check
        tree.add_ages_to_nodes(-1.0).unwrap();
        assert_eq!(tree[ids[1]].age(), Some(2.0));
    }

    #[test]
    fn test_ages_on_empty_tree() {
        let mut tree = Tree::empty(TaxonNamespace::shared());
        assert!(matches!(tree.add_ages_to_nodes(0.0), Err(PhyloError::EmptyTree)));
    }
}
