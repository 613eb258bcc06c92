//! All-pairs patristic distances, path step counts and MRCAs over the leaf
//! taxa of one tree, plus the community statistics built on them.
//!
//! # Overview
//! The matrix is computed once from a [`Tree`] and is read-only afterwards,
//! apart from [`PhylogeneticDistanceMatrix::shuffle_taxa`]. Tables are
//! indexed by *slot*: each mapped taxon owns one slot, assigned in leaf
//! post-order at build time.
//!
//! # Algorithm
//! 1. Collect the leaves (post-order) and their taxa.
//! 2. Sum edge lengths into the tree length and count the edges below the
//!    root.
//! 3. For every leaf, record its ancestor chain with the cumulative length
//!    and step count from the leaf.
//! 4. For every pair of leaves, the first node of one chain found in the
//!    other is the MRCA; distance and steps are the two cumulative values at
//!    that node added together.
//!
//! Building costs O(L² · depth) for L leaves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{PhyloError, Result};
use crate::taxon::{Taxon, TaxonNamespace};
use crate::tree::{NodeId, Tree};

/// How pairwise distances enter MPD / MNTD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistanceOptions {
    /// Sum of edge lengths when true, number of edges otherwise.
    pub weighted: bool,
    /// Divide by the tree length (weighted) or the edge count (unweighted).
    pub normalize_by_tree_size: bool,
}

impl Default for DistanceOptions {
    fn default() -> Self {
        DistanceOptions {
            weighted: true,
            normalize_by_tree_size: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhylogeneticDistanceMatrix {
    namespace: Arc<TaxonNamespace>,
    /// slot → taxon
    taxa: Vec<Taxon>,
    /// taxon → slot
    slots: HashMap<Taxon, usize>,
    distances: Vec<Vec<f64>>,
    path_steps: Vec<Vec<usize>>,
    mrca: Vec<Vec<NodeId>>,
    tree_length: f64,
    num_edges: usize,
    num_unweighted_edges: usize,
}

/// One ancestor of a leaf with the path length and step count up to it.
struct ChainLink {
    node: NodeId,
    length: f64,
    steps: usize,
}

impl PhylogeneticDistanceMatrix {
    /// Computes the matrix for every leaf taxon of `tree`.
    ///
    /// Leaves without a taxon are skipped; a taxon carried by more than one
    /// leaf is mapped to the first of them (post-order).
    ///
    /// # Errors
    /// [`PhyloError::EmptyTree`] if the tree has no node.
    pub fn from_tree(tree: &Tree) -> Result<Self> {
        tree.seed_node()?;

        let mut taxa: Vec<Taxon> = Vec::new();
        let mut slots: HashMap<Taxon, usize> = HashMap::new();
        let mut leaves: Vec<NodeId> = Vec::new();
        for leaf in tree.leaf_iter() {
            let Some(taxon) = tree[leaf].taxon() else {
                warn!(node = %leaf, "skipping leaf without taxon");
                continue;
            };
            if slots.contains_key(taxon) {
                warn!(taxon = %taxon, "taxon found on more than one leaf, keeping the first");
                continue;
            }
            slots.insert(taxon.clone(), taxa.len());
            taxa.push(taxon.clone());
            leaves.push(leaf);
        }

        let mut tree_length = 0.0;
        let mut num_edges = 0;
        let mut num_unweighted_edges = 0;
        for edge in tree.preorder_edge_iter() {
            let edge = &tree[edge];
            if let Some(len) = edge.length {
                tree_length += len;
            }
            if edge.tail_node().is_some() {
                num_edges += 1;
                if edge.length.is_none() {
                    num_unweighted_edges += 1;
                }
            }
        }
        if num_unweighted_edges > 0 {
            warn!(
                count = num_unweighted_edges,
                "edges without length contribute nothing to patristic distances"
            );
        }

        let chains: Vec<Vec<ChainLink>> = leaves
            .iter()
            .map(|&leaf| Self::ancestor_chain(tree, leaf))
            .collect();
        let lookups: Vec<HashMap<NodeId, (f64, usize)>> = chains
            .iter()
            .map(|chain| {
                chain
                    .iter()
                    .map(|link| (link.node, (link.length, link.steps)))
                    .collect()
            })
            .collect();

        let n = taxa.len();
        let mut distances = vec![vec![0.0; n]; n];
        let mut path_steps = vec![vec![0usize; n]; n];
        let mut mrca: Vec<Vec<NodeId>> = leaves.iter().map(|&leaf| vec![leaf; n]).collect();
        for (i, j) in (0..n).tuple_combinations() {
            let (link, (length_j, steps_j)) = chains[i]
                .iter()
                .find_map(|link| lookups[j].get(&link.node).map(|&other| (link, other)))
                .ok_or_else(|| {
                    PhyloError::Structural(format!(
                        "taxa '{}' and '{}' share no ancestor",
                        taxa[i], taxa[j]
                    ))
                })?;
            let distance = link.length + length_j;
            let steps = link.steps + steps_j;
            distances[i][j] = distance;
            distances[j][i] = distance;
            path_steps[i][j] = steps;
            path_steps[j][i] = steps;
            mrca[i][j] = link.node;
            mrca[j][i] = link.node;
        }

        debug!(taxa = n, tree_length, num_edges, "built phylogenetic distance matrix");
        Ok(PhylogeneticDistanceMatrix {
            namespace: Arc::clone(tree.namespace()),
            taxa,
            slots,
            distances,
            path_steps,
            mrca,
            tree_length,
            num_edges,
            num_unweighted_edges,
        })
    }

    fn ancestor_chain(tree: &Tree, leaf: NodeId) -> Vec<ChainLink> {
        let mut chain = Vec::new();
        let mut length = 0.0;
        let mut steps = 0;
        for node in tree.ancestor_iter(leaf, true) {
            chain.push(ChainLink {
                node,
                length,
                steps,
            });
            length += tree.edge_length(node).unwrap_or(0.0);
            steps += 1;
        }
        chain
    }

    fn slot(&self, taxon: &Taxon) -> Result<usize> {
        self.slots
            .get(taxon)
            .copied()
            .ok_or_else(|| PhyloError::UnmappedTaxon(taxon.label().to_string()))
    }

    pub fn namespace(&self) -> &Arc<TaxonNamespace> {
        &self.namespace
    }

    /// Mapped taxa in slot order.
    pub fn mapped_taxa(&self) -> &[Taxon] {
        &self.taxa
    }

    pub fn contains(&self, taxon: &Taxon) -> bool {
        self.slots.contains_key(taxon)
    }

    /// Sum of edge lengths on the path between two taxa.
    pub fn patristic_distance(&self, taxon1: &Taxon, taxon2: &Taxon) -> Result<f64> {
        Ok(self.distances[self.slot(taxon1)?][self.slot(taxon2)?])
    }

    /// Number of edges on the path between two taxa.
    pub fn path_edge_count(&self, taxon1: &Taxon, taxon2: &Taxon) -> Result<usize> {
        Ok(self.path_steps[self.slot(taxon1)?][self.slot(taxon2)?])
    }

    /// Most-recent common ancestor of two taxa; a taxon's own leaf when
    /// both are the same.
    pub fn mrca(&self, taxon1: &Taxon, taxon2: &Taxon) -> Result<NodeId> {
        Ok(self.mrca[self.slot(taxon1)?][self.slot(taxon2)?])
    }

    /// Patristic distance when `weighted`, path edge count otherwise.
    pub fn distance(&self, taxon1: &Taxon, taxon2: &Taxon, weighted: bool) -> Result<f64> {
        let (i, j) = (self.slot(taxon1)?, self.slot(taxon2)?);
        Ok(self.slot_distance(
            i,
            j,
            DistanceOptions {
                weighted,
                normalize_by_tree_size: false,
            },
        ))
    }

    fn slot_distance(&self, i: usize, j: usize, options: DistanceOptions) -> f64 {
        match (options.weighted, options.normalize_by_tree_size) {
            (true, false) => self.distances[i][j],
            (true, true) => self.distances[i][j] / self.tree_length,
            (false, false) => self.path_steps[i][j] as f64,
            (false, true) => self.path_steps[i][j] as f64 / self.num_edges as f64,
        }
    }

    /// Every unordered pair of distinct mapped taxa exactly once, in a stable
    /// order.
    pub fn iter_distinct_taxon_pairs(&self) -> impl Iterator<Item = (&Taxon, &Taxon)> + '_ {
        self.taxa.iter().tuple_combinations()
    }

    /// Patristic distances of all distinct pairs.
    pub fn distances(&self) -> Vec<f64> {
        (0..self.taxa.len())
            .tuple_combinations()
            .map(|(i, j)| self.distances[i][j])
            .collect()
    }

    pub fn sum_of_distances(&self) -> f64 {
        self.distances().iter().sum()
    }

    /// The pair of taxa separated by the longest path.
    pub fn max_pairwise_distance_taxa(&self) -> Option<(Taxon, Taxon)> {
        (0..self.taxa.len())
            .tuple_combinations()
            .max_by(|&(a, b), &(c, d)| self.distances[a][b].total_cmp(&self.distances[c][d]))
            .map(|(i, j)| (self.taxa[i].clone(), self.taxa[j].clone()))
    }

    /// Sum of all edge lengths of the source tree (seed edge included).
    pub fn tree_length(&self) -> f64 {
        self.tree_length
    }

    /// Number of edges below the root of the source tree.
    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    /// True if some edge below the root had no length.
    pub fn has_missing_lengths(&self) -> bool {
        self.num_unweighted_edges > 0
    }

    fn filtered_slots(&self, filter: impl Fn(&Taxon) -> bool) -> Result<Vec<usize>> {
        let slots: Vec<usize> = (0..self.taxa.len())
            .filter(|&s| filter(&self.taxa[s]))
            .collect();
        if slots.len() < 2 {
            return Err(PhyloError::InsufficientTaxa(slots.len()));
        }
        Ok(slots)
    }

    /// Mean of the weighted distances over all distinct pairs of taxa
    /// accepted by `filter` (MPD).
    pub fn mean_pairwise_distance(&self, filter: impl Fn(&Taxon) -> bool) -> Result<f64> {
        self.mean_pairwise_distance_with(filter, DistanceOptions::default())
    }

    /// MPD with explicit distance options.
    ///
    /// # Errors
    /// [`PhyloError::InsufficientTaxa`] if fewer than two taxa pass `filter`.
    pub fn mean_pairwise_distance_with(
        &self,
        filter: impl Fn(&Taxon) -> bool,
        options: DistanceOptions,
    ) -> Result<f64> {
        let slots = self.filtered_slots(filter)?;
        let (sum, count) = slots
            .iter()
            .tuple_combinations()
            .fold((0.0, 0usize), |(sum, count), (&i, &j)| {
                (sum + self.slot_distance(i, j, options), count + 1)
            });
        Ok(sum / count as f64)
    }

    /// Mean over the taxa accepted by `filter` of the distance to their
    /// nearest other accepted taxon (MNTD).
    pub fn mean_nearest_taxon_distance(&self, filter: impl Fn(&Taxon) -> bool) -> Result<f64> {
        self.mean_nearest_taxon_distance_with(filter, DistanceOptions::default())
    }

    /// MNTD with explicit distance options.
    ///
    /// # Errors
    /// [`PhyloError::InsufficientTaxa`] if fewer than two taxa pass `filter`.
    pub fn mean_nearest_taxon_distance_with(
        &self,
        filter: impl Fn(&Taxon) -> bool,
        options: DistanceOptions,
    ) -> Result<f64> {
        let slots = self.filtered_slots(filter)?;
        let total: f64 = slots
            .iter()
            .map(|&i| {
                slots
                    .iter()
                    .filter(|&&j| j != i)
                    .map(|&j| self.slot_distance(i, j, options))
                    .fold(f64::INFINITY, f64::min)
            })
            .sum();
        Ok(total / slots.len() as f64)
    }

    /// Randomly permutes which taxon owns which slot and returns the
    /// permutation (a bijection on the mapped taxa).
    ///
    /// The tables are untouched: applying the returned map to the leaf taxa
    /// of the source tree and rebuilding yields a matrix equal to this one.
    pub fn shuffle_taxa<R: Rng + ?Sized>(&mut self, rng: &mut R) -> HashMap<Taxon, Taxon> {
        let mut shuffled = self.taxa.clone();
        shuffled.shuffle(rng);
        let mapping: HashMap<Taxon, Taxon> = self.taxa.iter().cloned().zip(shuffled).collect();
        self.taxa = self
            .taxa
            .iter()
            .map(|t| mapping.get(t).cloned().unwrap_or_else(|| t.clone()))
            .collect();
        self.slots = self
            .taxa
            .iter()
            .enumerate()
            .map(|(slot, t)| (t.clone(), slot))
            .collect();
        debug!(taxa = self.taxa.len(), "shuffled taxa");
        mapping
    }

    /// Labels in slot order with the full square matrix, for tabular export.
    pub fn as_table(&self, weighted: bool) -> (Vec<String>, Vec<Vec<f64>>) {
        let labels = self.taxa.iter().map(|t| t.label().to_string()).collect();
        let n = self.taxa.len();
        let options = DistanceOptions {
            weighted,
            normalize_by_tree_size: false,
        };
        let rows = (0..n)
            .map(|i| (0..n).map(|j| self.slot_distance(i, j, options)).collect())
            .collect();
        (labels, rows)
    }
}

/// Element-wise mean of several matrices over the taxa of the first one,
/// labelled in its slot order.
///
/// # Errors
/// - [`PhyloError::EmptyTree`] if `matrices` is empty.
/// - [`PhyloError::UnmappedTaxon`] if a later matrix lacks one of the taxa.
pub fn mean_distance_table(
    matrices: &[PhylogeneticDistanceMatrix],
    weighted: bool,
) -> Result<(Vec<String>, Vec<Vec<f64>>)> {
    let first = matrices.first().ok_or(PhyloError::EmptyTree)?;
    let taxa = first.mapped_taxa();
    let n = taxa.len();

    let mut sums = vec![vec![0.0; n]; n];
    for matrix in matrices {
        for (i, j) in (0..n).tuple_combinations() {
            let d = matrix.distance(&taxa[i], &taxa[j], weighted)?;
            sums[i][j] += d;
            sums[j][i] += d;
        }
    }

    let count = matrices.len() as f64;
    for row in &mut sums {
        for value in row.iter_mut() {
            *value /= count;
        }
    }
    let labels = taxa.iter().map(|t| t.label().to_string()).collect();
    Ok((labels, sums))
}

/// Equal when both map the same taxa and agree on every pairwise distance,
/// step count and MRCA, regardless of slot order.
impl PartialEq for PhylogeneticDistanceMatrix {
    fn eq(&self, other: &Self) -> bool {
        let mine: HashSet<&Taxon> = self.taxa.iter().collect();
        let theirs: HashSet<&Taxon> = other.taxa.iter().collect();
        if mine != theirs {
            return false;
        }
        self.taxa.iter().cartesian_product(&self.taxa).all(|(a, b)| {
            let (i, j) = (self.slots[a], self.slots[b]);
            let (k, l) = (other.slots[a], other.slots[b]);
            self.distances[i][j] == other.distances[k][l]
                && self.path_steps[i][j] == other.path_steps[k][l]
                && self.mrca[i][j] == other.mrca[k][l]
        })
    }
}
