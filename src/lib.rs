//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `tree`: arena tree with traversal, editing, rerooting and split encoding.
//! - `taxon`: identity-comparable taxa and the shared namespace.
//! - `distance_matrix`: all-pairs patristic distances, MRCAs and MPD / MNTD.
//! - `community`: community tables and per-sample diversity statistics.
//! - `snapshot` / `distances`: split snapshots and RF-type tree distances.
//! - `io`: Newick / BEAST readers and TSV writers.
//! - `bitset`: compact bitset representation for splits.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod bitset;
pub mod community;
pub mod distance_matrix;
pub mod distances;
pub mod error;
pub mod io;
pub mod snapshot;
pub mod taxon;
pub mod tree;

#[cfg(feature = "python")]
pub mod api;

pub use bitset::Bitset;
pub use community::{community_statistics, CommunityStats, CommunityTable};
pub use distance_matrix::{mean_distance_table, DistanceOptions, PhylogeneticDistanceMatrix};
pub use error::{PhyloError, Result};
pub use io::{read_beast_trees, read_trees, tree_from_newick, write_matrix_tsv};
pub use snapshot::SplitSnapshot;
pub use taxon::{Taxon, TaxonNamespace};
pub use tree::{Edge, EdgeId, Node, NodeId, Tree};
