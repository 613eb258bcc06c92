//! Split snapshots of trees for tree-to-tree comparison.
//!
//! # Overview
//! A [`SplitSnapshot`] captures every split (bipartition) of a tree along
//! with its branch length. It is immutable, so snapshots of many trees can be
//! compared in parallel.
//!
//! # Bit positions come from the namespace
//! Bit *i* stands for the taxon with namespace index *i*. Trees compared
//! with each other must therefore share one [`TaxonNamespace`], which
//! guarantees that the same taxon always lands on the same bit.
//!
//! [`TaxonNamespace`]: crate::taxon::TaxonNamespace

use std::collections::{HashMap, HashSet};

use crate::bitset::Bitset;
use crate::error::{PhyloError, Result};
use crate::tree::Tree;

/// An immutable snapshot of all splits in a phylogenetic tree.
///
/// # Canonicalization
/// In an unrooted tree, {A,B}|{C,D} can be written from either side. We
/// always store the side that does NOT contain the anchor taxon (the taxon
/// with the lowest index in the tree), so equal splits get equal bitsets.
/// Rooted trees keep the clade below each edge as is.
///
/// When two edges map to the same canonical split (the two edges hanging
/// from a bifurcating base of an unrooted tree), their lengths are summed.
#[derive(Debug, Clone)]
pub struct SplitSnapshot {
    /// All non-empty splits except the full-taxa mask.
    pub parts: HashSet<Bitset>,

    /// Branch length of each split; missing lengths count as 0.0.
    pub lengths: HashMap<Bitset, f64>,

    /// Union of all leaf taxa of the tree.
    pub taxa_mask: Bitset,

    /// Number of u64 words in each bitset.
    pub words: usize,

    pub rooted: bool,
}

impl SplitSnapshot {
    /// Extracts a snapshot from `tree`.
    ///
    /// # Algorithm
    /// 1. Compute the split bitmask of every edge bottom-up.
    /// 2. Skip the seed edge, and edges whose mask is empty or full.
    /// 3. For unrooted trees, flip splits containing the anchor taxon.
    /// 4. Accumulate the branch length per split.
    ///
    /// # Errors
    /// - [`PhyloError::EmptyTree`] if the tree has no node.
    /// - [`PhyloError::InvalidTree`] if a leaf has no taxon.
    pub fn from_tree(tree: &Tree) -> Result<Self> {
        let seed = tree.seed_node()?;
        if let Some(leaf) = tree.leaf_iter().find(|&id| tree[id].taxon().is_none()) {
            return Err(PhyloError::InvalidTree(format!(
                "leaf {leaf} has no taxon, splits are undefined"
            )));
        }

        let masks = tree.compute_split_bitmasks();
        let words = Bitset::words_for(tree.namespace().len());
        let taxa_mask = masks
            .get(&seed)
            .cloned()
            .unwrap_or_else(|| Bitset::zeros(words));
        let anchor = taxa_mask.first_set();
        let rooted = tree.is_rooted;

        let mut parts = HashSet::new();
        let mut lengths: HashMap<Bitset, f64> = HashMap::new();
        for id in tree.preorder_node_iter().filter(|&id| id != seed) {
            let Some(mask) = masks.get(&id) else {
                continue;
            };
            if mask.is_empty() || *mask == taxa_mask {
                continue;
            }
            let split = match anchor {
                Some(bit) if !rooted && mask.is_set(bit) => mask.complement_within(&taxa_mask),
                _ => mask.clone(),
            };
            *lengths.entry(split.clone()).or_insert(0.0) += tree.edge_length(id).unwrap_or(0.0);
            parts.insert(split);
        }

        Ok(SplitSnapshot {
            parts,
            lengths,
            taxa_mask,
            words,
            rooted,
        })
    }

    /// Splits present in both snapshots.
    pub fn shared_parts<'a>(&'a self, other: &'a SplitSnapshot) -> impl Iterator<Item = &'a Bitset> {
        self.parts.intersection(&other.parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tree_from_newick;
    use crate::taxon::TaxonNamespace;

    fn mask(tree: &Tree, labels: &[&str]) -> Bitset {
        let mut mask = Bitset::zeros(1);
        for label in labels {
            mask.set(tree.namespace().get(label).unwrap().index());
        }
        mask
    }

    /// ```text
    ///              root
    ///             /    \
    ///         node1     E
    ///         /   \
    ///     node2    D
    ///     /   \
    ///    A    node3
    ///         /   \
    ///        B     C
    /// ```
    ///
    /// Namespace order: A=0, B=1, C=2, D=3, E=4
    ///
    /// | Node  | Raw       | Has A? | Canonical        |
    /// |-------|-----------|--------|------------------|
    /// | node3 | {B,C}     | NO     | {B,C}            |
    /// | node2 | {A,B,C}   | YES    | {D,E}            |
    /// | node1 | {A,B,C,D} | YES    | {E}, same as E's |
    #[test]
    fn test_unrooted_canonical_splits() {
        let ns = TaxonNamespace::shared();
        let tree = tree_from_newick("(((A:1,(B:1,C:1):2):3,D:1):4,E:5);", &ns).unwrap();
        let snap = SplitSnapshot::from_tree(&tree).unwrap();

        assert!(!snap.rooted);
        assert_eq!(snap.taxa_mask, Bitset::full(5));
        assert!(snap.parts.contains(&mask(&tree, &["B", "C"])));
        assert!(snap.parts.contains(&mask(&tree, &["D", "E"])));
        // node1's edge and E's edge are the same split around the base
        assert_eq!(snap.lengths[&mask(&tree, &["E"])], 9.0);
        assert_eq!(snap.lengths[&mask(&tree, &["D", "E"])], 3.0);
        // leaf A is flipped to everything-but-A
        assert!(snap.parts.contains(&mask(&tree, &["B", "C", "D", "E"])));
        assert!(!snap.parts.iter().any(|p| p.is_set(0)));
    }

    #[test]
    fn test_rooted_keeps_clades() {
        let ns = TaxonNamespace::shared();
        let tree = tree_from_newick("[&R]((A:1,B:1):1,(C:1,D:1):1);", &ns).unwrap();
        let snap = SplitSnapshot::from_tree(&tree).unwrap();

        assert!(snap.rooted);
        assert!(snap.parts.contains(&mask(&tree, &["A", "B"])));
        assert!(snap.parts.contains(&mask(&tree, &["C", "D"])));
        assert_eq!(snap.parts.len(), 6);
    }

    #[test]
    fn test_same_topology_different_order() {
        let ns = TaxonNamespace::shared();
        let t1 = tree_from_newick("((A:1,B:1):1,(C:1,D:1):1);", &ns).unwrap();
        let t2 = tree_from_newick("((D:1,C:1):1,(B:1,A:1):1);", &ns).unwrap();
        let s1 = SplitSnapshot::from_tree(&t1).unwrap();
        let s2 = SplitSnapshot::from_tree(&t2).unwrap();
        assert_eq!(s1.parts, s2.parts);
        assert_eq!(s1.shared_parts(&s2).count(), s1.parts.len());
    }

    #[test]
    fn test_leaf_without_taxon_is_rejected() {
        let ns = TaxonNamespace::shared();
        let mut tree = tree_from_newick("((A:1,B:1):1,C:1);", &ns).unwrap();
        let seed = tree.seed_node().unwrap();
        tree.new_child(seed, None, Some(1.0));
        assert!(matches!(
            SplitSnapshot::from_tree(&tree),
            Err(PhyloError::InvalidTree(_))
        ));
    }
}
