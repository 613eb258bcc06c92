//! Python binding layer.
//!
//! Provides Python functions for patristic distance matrices, community
//! statistics and pairwise tree distances.

use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use std::path::PathBuf;

use crate::community::{self, CommunityTable};
use crate::distance_matrix::{DistanceOptions, PhylogeneticDistanceMatrix};
use crate::distances::{build_snapshots, pairwise_matrix, TreeMetric};
use crate::error::PhyloError;
use crate::io::{read_trees, tree_from_newick};
use crate::snapshot::SplitSnapshot;
use crate::taxon::TaxonNamespace;
use crate::tree::Tree;

impl From<PhyloError> for PyErr {
    fn from(err: PhyloError) -> PyErr {
        match err {
            PhyloError::Io(e) => PyIOError::new_err(e.to_string()),
            other => PyValueError::new_err(other.to_string()),
        }
    }
}

fn matrix_from_newick(newick: &str) -> PyResult<PhylogeneticDistanceMatrix> {
    let namespace = TaxonNamespace::shared();
    let tree = tree_from_newick(newick, &namespace)?;
    Ok(PhylogeneticDistanceMatrix::from_tree(&tree)?)
}

/// Compute the patristic distance matrix of the leaf taxa of one tree.
///
/// Args:
///     newick: Tree in Newick format
///     weighted: Sum branch lengths when True, count edges when False (default: True)
///
/// Returns:
///     A tuple of (taxon_labels, distance_matrix)
///
/// Raises:
///     ValueError: If the Newick string cannot be parsed or the tree is empty
#[pyfunction]
#[pyo3(signature = (newick, weighted=true))]
fn patristic_matrix(newick: &str, weighted: bool) -> PyResult<(Vec<String>, Vec<Vec<f64>>)> {
    let pdm = matrix_from_newick(newick)?;
    Ok(pdm.as_table(weighted))
}

/// Compute mean pairwise distance (MPD) and mean nearest taxon distance
/// (MNTD) for every sample of a community table.
///
/// Args:
///     newick: Tree in Newick format
///     samples: Sample names (table rows)
///     taxa: Taxon labels (table columns)
///     abundances: One row of abundances per sample; positive means present
///     weighted: Use branch lengths when True, edge counts when False (default: True)
///     normalize: Divide by tree length (or edge count) (default: False)
///
/// Returns:
///     A list of (sample, n_taxa, mpd, mntd); mpd and mntd are None when
///     fewer than two taxa of the sample are in the tree
///
/// Raises:
///     ValueError: If the table shape is inconsistent or the tree is invalid
#[pyfunction]
#[pyo3(signature = (newick, samples, taxa, abundances, weighted=true, normalize=false))]
fn community_statistics(
    newick: &str,
    samples: Vec<String>,
    taxa: Vec<String>,
    abundances: Vec<Vec<f64>>,
    weighted: bool,
    normalize: bool,
) -> PyResult<Vec<(String, usize, Option<f64>, Option<f64>)>> {
    if samples.len() != abundances.len() || abundances.iter().any(|row| row.len() != taxa.len()) {
        return Err(PyValueError::new_err(
            "abundances must have one row per sample and one column per taxon",
        ));
    }
    let table = CommunityTable {
        samples,
        taxa,
        abundances,
    };
    let pdm = matrix_from_newick(newick)?;
    let options = DistanceOptions {
        weighted,
        normalize_by_tree_size: normalize,
    };
    let stats = community::community_statistics(&pdm, &table, options)?;
    Ok(stats
        .into_iter()
        .map(|s| (s.sample, s.num_taxa, s.mpd, s.mntd))
        .collect())
}

/// Compute pairwise tree distances from multiple tree files.
///
/// Args:
///     paths: List of file paths to BEAST/NEXUS or Newick tree files
///     metric: "rf", "weighted_rf" or "euclidean" (default: "rf")
///     burnin_trees: Number of trees to skip at the beginning of each file (default: 0)
///     burnin_states: Minimum STATE value to keep trees (default: 0)
///     use_real_taxa: Use TRANSLATE block for taxon names when available (default: True)
///
/// Returns:
///     A tuple of (tree_names, distance_matrix)
///
/// Raises:
///     ValueError: If no trees are found, trees have different leaf sets, or sanity checks fail
#[pyfunction]
#[pyo3(signature = (paths, metric="rf", burnin_trees=0, burnin_states=0, use_real_taxa=true))]
fn pairwise_tree_distances(
    paths: Vec<String>,
    metric: &str,
    burnin_trees: usize,
    burnin_states: usize,
    use_real_taxa: bool,
) -> PyResult<(Vec<String>, Vec<Vec<f64>>)> {
    let metric = match metric {
        "rf" => TreeMetric::SymmetricDifference,
        "weighted_rf" => TreeMetric::WeightedRobinsonFoulds,
        "euclidean" => TreeMetric::Euclidean,
        other => {
            return Err(PyValueError::new_err(format!(
                "unknown metric '{other}', expected rf, weighted_rf or euclidean"
            )))
        }
    };

    let (tree_names, trees) = read_all_trees(&paths, burnin_trees, burnin_states, use_real_taxa)?;
    let snapshots = build_snapshots(&trees)?;
    sanity_check_snapshots(&snapshots)?;

    Ok((tree_names, pairwise_matrix(&snapshots, metric)))
}

/// Reads trees from all files into one shared namespace.
fn read_all_trees(
    paths: &[String],
    burnin_trees: usize,
    burnin_states: usize,
    use_real_taxa: bool,
) -> PyResult<(Vec<String>, Vec<Tree>)> {
    let namespace = TaxonNamespace::shared();
    let mut all_tree_names = Vec::new();
    let mut all_trees = Vec::new();

    for (file_idx, path) in paths.iter().enumerate() {
        let named_trees = read_trees(
            PathBuf::from(path),
            burnin_trees,
            burnin_states,
            use_real_taxa,
            &namespace,
        )?;

        if named_trees.is_empty() {
            return Err(PyValueError::new_err(format!(
                "No trees found in file '{}' after burnin removal",
                path
            )));
        }

        for (name, tree) in named_trees {
            all_tree_names.push(format!("file{}_{}", file_idx, name));
            all_trees.push(tree);
        }
    }

    Ok((all_tree_names, all_trees))
}

fn sanity_check_snapshots(snapshots: &[SplitSnapshot]) -> PyResult<()> {
    if snapshots.len() < 2 {
        return Err(PyValueError::new_err(
            "Need at least 2 trees to compute pairwise distances",
        ));
    }

    let first = &snapshots[0].taxa_mask;
    for (idx, snap) in snapshots.iter().enumerate().skip(1) {
        if snap.taxa_mask.count_ones() != first.count_ones() {
            return Err(PyValueError::new_err(format!(
                "Tree {} has {} leaves, but tree 0 has {} leaves. All trees must have the same number of leaves.",
                idx,
                snap.taxa_mask.count_ones(),
                first.count_ones()
            )));
        }
        if !snap.taxa_mask.is_subset_of(first) || !first.is_subset_of(&snap.taxa_mask) {
            return Err(PyValueError::new_err(format!(
                "Tree {} has different leaf set than tree 0. All trees must have the same taxa.",
                idx
            )));
        }
    }

    Ok(())
}

/// Python module definition
#[pymodule]
fn rust_python_phylo_distances(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(patristic_matrix, m)?)?;
    m.add_function(wrap_pyfunction!(community_statistics, m)?)?;
    m.add_function(wrap_pyfunction!(pairwise_tree_distances, m)?)?;
    Ok(())
}
