//! Tree-to-tree distances over split snapshots.
//!
//! Three measures are provided:
//!
//! 1. **Symmetric difference** (unweighted Robinson-Foulds): the number of
//!    splits found in exactly one of the two trees.
//!
//! 2. **Weighted Robinson-Foulds**: for shared splits, adds
//!    |length_a - length_b|; for unique splits, adds the full length.
//!
//! 3. **Euclidean distance** (Kuhner-Felsenstein branch score): like weighted
//!    RF but with squared differences, sqrt(Σ(length_a - length_b)²).
//!
//! The tree-level functions require both trees to share one taxon namespace.

use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{PhyloError, Result};
use crate::snapshot::SplitSnapshot;
use crate::tree::Tree;

fn snapshots(tree_a: &Tree, tree_b: &Tree) -> Result<(SplitSnapshot, SplitSnapshot)> {
    if !Arc::ptr_eq(tree_a.namespace(), tree_b.namespace()) {
        return Err(PhyloError::InvalidTree(
            "trees must share a taxon namespace to be compared".to_string(),
        ));
    }
    Ok((SplitSnapshot::from_tree(tree_a)?, SplitSnapshot::from_tree(tree_b)?))
}

/// Number of splits present in exactly one of the two trees.
///
/// # Algorithm
/// RF = |A| + |B| - 2|A ∩ B|, where A and B are the split sets.
///
/// # Example
/// ```text
/// Tree 1:  ((A,B),(C,D))     Splits: {A,B}|{C,D}
/// Tree 2:  ((A,C),(B,D))     Splits: {A,C}|{B,D}
///
/// Intersection: 0 splits match
/// RF = 1 + 1 - 2*0 = 2
/// ```
pub fn symmetric_difference(tree_a: &Tree, tree_b: &Tree) -> Result<usize> {
    let (a, b) = snapshots(tree_a, tree_b)?;
    Ok(symmetric_difference_from_snapshots(&a, &b))
}

pub fn symmetric_difference_from_snapshots(a: &SplitSnapshot, b: &SplitSnapshot) -> usize {
    let inter = a.shared_parts(b).count();
    a.parts.len() + b.parts.len() - 2 * inter
}

/// Weighted Robinson-Foulds distance between two trees.
///
/// # Example
/// ```text
/// Tree 1: ((A:1.0,B:1.0):2.0,(C:1.0,D:1.0):2.0);
/// Tree 2: ((A:1.5,B:1.0):3.0,(C:0.5,D:1.0):2.0);
///
/// Shared split {A,B}|{C,D}: |4.0 - 5.0| = 1.0 (base edges summed)
/// Leaf A: 0.5, leaf C: 0.5
/// Total: 2.0
/// ```
pub fn weighted_robinson_foulds(tree_a: &Tree, tree_b: &Tree) -> Result<f64> {
    let (a, b) = snapshots(tree_a, tree_b)?;
    Ok(weighted_rf_from_snapshots(&a, &b))
}

/// Per-split length pairs over the union of both split sets; a split
/// missing from one side pairs with 0.0.
fn length_pairs<'a>(
    a: &'a SplitSnapshot,
    b: &'a SplitSnapshot,
) -> impl Iterator<Item = (f64, f64)> + 'a {
    let from_a = a.parts.iter().map(move |part| {
        let length_a = a.lengths.get(part).copied().unwrap_or(0.0);
        let length_b = b.lengths.get(part).copied().unwrap_or(0.0);
        (length_a, length_b)
    });
    let only_b = b
        .parts
        .iter()
        .filter(move |part| !a.parts.contains(*part))
        .map(move |part| (0.0, b.lengths.get(part).copied().unwrap_or(0.0)));
    from_a.chain(only_b)
}

pub fn weighted_rf_from_snapshots(a: &SplitSnapshot, b: &SplitSnapshot) -> f64 {
    length_pairs(a, b).map(|(la, lb)| (la - lb).abs()).sum()
}

/// Euclidean (Kuhner-Felsenstein branch score) distance between two trees.
///
/// # Properties
/// - More sensitive to large branch length differences than weighted RF
/// - Range: [0, ∞)
pub fn euclidean_distance(tree_a: &Tree, tree_b: &Tree) -> Result<f64> {
    let (a, b) = snapshots(tree_a, tree_b)?;
    Ok(euclidean_from_snapshots(&a, &b))
}

pub fn euclidean_from_snapshots(a: &SplitSnapshot, b: &SplitSnapshot) -> f64 {
    length_pairs(a, b)
        .map(|(la, lb)| (la - lb) * (la - lb))
        .sum::<f64>()
        .sqrt()
}

/// Tree comparison measure selectable from the CLI and Python bindings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TreeMetric {
    SymmetricDifference,
    WeightedRobinsonFoulds,
    Euclidean,
}

impl TreeMetric {
    pub fn between(self, a: &SplitSnapshot, b: &SplitSnapshot) -> f64 {
        match self {
            TreeMetric::SymmetricDifference => symmetric_difference_from_snapshots(a, b) as f64,
            TreeMetric::WeightedRobinsonFoulds => weighted_rf_from_snapshots(a, b),
            TreeMetric::Euclidean => euclidean_from_snapshots(a, b),
        }
    }
}

/// Snapshots every tree (in parallel), in input order.
pub fn build_snapshots(trees: &[Tree]) -> Result<Vec<SplitSnapshot>> {
    trees.par_iter().map(SplitSnapshot::from_tree).collect()
}

/// Square matrix of `metric` between all snapshots, computed in parallel
/// across pairs.
pub fn pairwise_matrix(snapshots: &[SplitSnapshot], metric: TreeMetric) -> Vec<Vec<f64>> {
    let n = snapshots.len();
    let pairs: Vec<(usize, usize, f64)> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| (i + 1..n).map(move |j| (i, j)))
        .map(|(i, j)| (i, j, metric.between(&snapshots[i], &snapshots[j])))
        .collect();

    let mut matrix = vec![vec![0.0; n]; n];
    for (i, j, d) in pairs {
        matrix[i][j] = d;
        matrix[j][i] = d;
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tree_from_newick;
    use crate::taxon::TaxonNamespace;
    use itertools::Itertools;

    const WEIGHTED_RF_1: &str = "((t5:0.161175,t6:0.161175):0.392293,((t4:0.104381,(t2:0.075411,t1:0.075411):0.028969):0.065840,t3:0.170221):0.383247);";
    const WEIGHTED_RF_2: &str = "((t5:2.161175,t6:0.161175):0.392293,((t4:0.104381,(t2:0.075411,t1:0.075411):1):0.065840,t3:0.170221):0.383247);";

    #[test]
    fn test_weighted_rf_example() {
        let ns = TaxonNamespace::shared();
        let tree1 = tree_from_newick(WEIGHTED_RF_1, &ns).unwrap();
        let tree2 = tree_from_newick(WEIGHTED_RF_2, &ns).unwrap();

        let wrf = weighted_robinson_foulds(&tree1, &tree2).unwrap();
        assert!((wrf - 2.971031).abs() < 1e-9, "weighted RF was {wrf}");
        assert_eq!(symmetric_difference(&tree1, &tree2).unwrap(), 0);

        let expected = (2.0f64.powi(2) + 0.971031f64.powi(2)).sqrt();
        assert!((euclidean_distance(&tree1, &tree2).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_distinct_namespaces_are_rejected() {
        let tree1 = tree_from_newick(WEIGHTED_RF_1, &TaxonNamespace::shared()).unwrap();
        let tree2 = tree_from_newick(WEIGHTED_RF_1, &TaxonNamespace::shared()).unwrap();
        assert!(matches!(
            symmetric_difference(&tree1, &tree2),
            Err(PhyloError::InvalidTree(_))
        ));
    }

    #[test]
    fn test_docs_example() {
        let ns = TaxonNamespace::shared();
        let tree1 = tree_from_newick("((A:1.0,B:1.0):2.0,(C:1.0,D:1.0):2.0);", &ns).unwrap();
        let tree2 = tree_from_newick("((A:1.5,B:1.0):3.0,(C:0.5,D:1.0):2.0);", &ns).unwrap();
        assert!((weighted_robinson_foulds(&tree1, &tree2).unwrap() - 2.0).abs() < 1e-12);

        let tree3 = tree_from_newick("((A:1,C:1):1,(B:1,D:1):1);", &ns).unwrap();
        assert_eq!(symmetric_difference(&tree1, &tree3).unwrap(), 2);
    }

    const TREEDIST: [&str; 12] = [
        "(A:0.1,(B:0.1,(H:0.1,(D:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,((J:0.1,H:0.1):0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,(H:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((F:0.1,I:0.1):0.1,(G:0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((F:0.1,I:0.1):0.1,(G:0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,(H:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
    ];

    // Symmetric differences according to
    // https://evolution.genetics.washington.edu/phylip/doc/treedist.html
    const TREEDIST_RF: [[usize; 12]; 12] = [
        [0, 4, 2, 10, 10, 10, 10, 10, 10, 10, 2, 10],
        [4, 0, 2, 10, 8, 10, 8, 10, 8, 10, 2, 10],
        [2, 2, 0, 10, 10, 10, 10, 10, 10, 10, 0, 10],
        [10, 10, 10, 0, 2, 2, 4, 2, 4, 0, 10, 2],
        [10, 8, 10, 2, 0, 4, 2, 4, 2, 2, 10, 4],
        [10, 10, 10, 2, 4, 0, 2, 2, 4, 2, 10, 2],
        [10, 8, 10, 4, 2, 2, 0, 4, 2, 4, 10, 4],
        [10, 10, 10, 2, 4, 2, 4, 0, 2, 2, 10, 0],
        [10, 8, 10, 4, 2, 4, 2, 2, 0, 4, 10, 2],
        [10, 10, 10, 0, 2, 2, 4, 2, 4, 0, 10, 2],
        [2, 2, 0, 10, 10, 10, 10, 10, 10, 10, 0, 10],
        [10, 10, 10, 2, 4, 2, 4, 0, 2, 2, 10, 0],
    ];

    #[test]
    fn test_treedist_pairs() {
        let ns = TaxonNamespace::shared();
        let trees: Vec<Tree> = TREEDIST
            .iter()
            .map(|s| tree_from_newick(s, &ns).unwrap())
            .collect();

        for (i, j) in (0..trees.len()).tuple_combinations() {
            let rf = symmetric_difference(&trees[i], &trees[j]).unwrap();
            assert_eq!(rf, TREEDIST_RF[i][j], "trees {i} and {j}");

            // every branch is 0.1 long, so both weighted measures follow RF
            let wrf = weighted_robinson_foulds(&trees[i], &trees[j]).unwrap();
            assert!((wrf - 0.1 * rf as f64).abs() < 1e-9);
            let ed = euclidean_distance(&trees[i], &trees[j]).unwrap();
            assert!((ed - 0.1 * (rf as f64).sqrt()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_pairwise_matrix() {
        let ns = TaxonNamespace::shared();
        let trees: Vec<Tree> = TREEDIST[..4]
            .iter()
            .map(|s| tree_from_newick(s, &ns).unwrap())
            .collect();
        let snaps = build_snapshots(&trees).unwrap();
        let matrix = pairwise_matrix(&snaps, TreeMetric::SymmetricDifference);

        for (i, j) in (0..4).cartesian_product(0..4) {
            assert_eq!(matrix[i][j], TREEDIST_RF[i][j] as f64);
        }
    }
}
