//! Error type shared by the tree engine, the distance matrix and the readers.

use thiserror::Error;

/// Errors raised while building, editing or querying trees and matrices.
///
/// All of these are local failures: nothing is retried internally.
#[derive(Debug, Error)]
pub enum PhyloError {
    /// A structural edit referenced a node in the wrong place
    /// (e.g. removing a node that is not a child).
    #[error("Structural error: {0}")]
    Structural(String),

    /// A distance matrix query used a taxon that is not a leaf of the tree.
    #[error("Taxon '{0}' is not mapped in this distance matrix")]
    UnmappedTaxon(String),

    /// Sibling tip-to-node path lengths differ by more than the tolerance.
    #[error("Tree is not ultrametric: expected age {expected}, observed {observed}")]
    Ultrametricity { expected: f64, observed: f64 },

    /// The operation requires at least one node.
    #[error("Empty tree encountered")]
    EmptyTree,

    /// MPD / MNTD need at least two taxa after filtering.
    #[error("At least two taxa are required, but only {0} passed the filter")]
    InsufficientTaxa(usize),

    /// A diagnostic check found a violated invariant.
    #[error("Invalid tree: {0}")]
    InvalidTree(String),

    /// The Newick parser rejected its input.
    #[error("Failed to parse Newick string: {0}")]
    Newick(String),

    /// A community table (TSV) is malformed.
    #[error("Invalid community table: {0}")]
    InvalidTable(String),

    /// Reading or writing a file failed.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PhyloError>;
