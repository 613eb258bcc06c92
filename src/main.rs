use clap::{Parser, ValueEnum};
use rayon::prelude::*;
use rust_python_phylo_distances::community::community_statistics;
use rust_python_phylo_distances::distance_matrix::{
    mean_distance_table, DistanceOptions, PhylogeneticDistanceMatrix,
};
use rust_python_phylo_distances::distances::{build_snapshots, pairwise_matrix, TreeMetric};
use rust_python_phylo_distances::io::{
    read_community_table, read_trees, write_matrix_tsv, write_stats_tsv,
};
use rust_python_phylo_distances::taxon::TaxonNamespace;
use rust_python_phylo_distances::tree::Tree;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Compute patristic distance matrices, community statistics or pairwise
/// tree distances from a BEAST/NEXUS or Newick tree file.
#[derive(Parser, Debug)]
#[command(name = "phylo-dists", version, about = "Phylogenetic distance matrices for BEAST and Newick trees")]
struct Args {
    /// Path to BEAST .trees (NEXUS) or Newick file
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Burn-in by number of trees (drop first N trees)
    #[arg(short = 't', long = "burnin-trees", default_value_t = 0)]
    burnin_trees: usize,

    /// Burn-in by state (keep trees with STATE_ > value)
    #[arg(short = 's', long = "burnin-states", default_value_t = 0)]
    burnin_states: usize,

    /// Output path for TSV distance matrix (.gz compresses)
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Use TRANSLATE block to map taxon IDs to labels when available
    #[arg(long = "use-real-taxa", default_value_t = false)]
    use_real_taxa: bool,

    /// patristic | steps: taxon-by-taxon matrix averaged over all trees;
    /// rf | weighted-rf | euclidean: tree-by-tree matrix
    #[arg(long = "metric", value_enum, default_value_t = MetricArg::Patristic)]
    metric: MetricArg,

    /// Community table (TSV, samples by taxa) for per-sample MPD / MNTD
    #[arg(long = "community", requires = "stats_output")]
    community: Option<PathBuf>,

    /// Output path for the community statistics TSV
    #[arg(long = "stats-output")]
    stats_output: Option<PathBuf>,

    /// Divide community statistics by tree length (or edge count with steps)
    #[arg(long = "normalize", default_value_t = false)]
    normalize: bool,

    /// Quiet mode: only warnings and errors are logged
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum MetricArg {
    Patristic,
    Steps,
    Rf,
    WeightedRf,
    Euclidean,
}

impl MetricArg {
    fn tree_metric(self) -> Option<TreeMetric> {
        match self {
            MetricArg::Patristic | MetricArg::Steps => None,
            MetricArg::Rf => Some(TreeMetric::SymmetricDifference),
            MetricArg::WeightedRf => Some(TreeMetric::WeightedRobinsonFoulds),
            MetricArg::Euclidean => Some(TreeMetric::Euclidean),
        }
    }
}

fn main() {
    let args = Args::parse();

    let directives = log_directives(args.quiet, std::env::var("RUST_LOG").ok());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_target(false)
        .init();

    let t0 = Instant::now();
    let namespace = TaxonNamespace::shared();
    let named_trees = match read_trees(
        &args.input,
        args.burnin_trees,
        args.burnin_states,
        args.use_real_taxa,
        &namespace,
    ) {
        Ok(trees) => trees,
        Err(e) => {
            error!("Failed to read {:?}: {e}", args.input);
            process::exit(2);
        }
    };
    if named_trees.is_empty() {
        error!("No trees parsed from {:?}.", args.input);
        process::exit(2);
    }
    info!(
        "Read {} taxa for {} trees in {:.3}s",
        namespace.len(),
        named_trees.len(),
        t0.elapsed().as_secs_f64()
    );
    let (names, trees): (Vec<String>, Vec<Tree>) = named_trees.into_iter().unzip();

    match args.metric.tree_metric() {
        Some(metric) => run_tree_distances(&args, &names, &trees, metric),
        None => run_patristic(&args, &names, &trees),
    }
}

fn run_tree_distances(args: &Args, names: &[String], trees: &[Tree], metric: TreeMetric) {
    let t1 = Instant::now();
    let snaps = match build_snapshots(trees) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to build snapshots: {e}");
            process::exit(3);
        }
    };
    info!("Creating tree split snapshots {:.3}s", t1.elapsed().as_secs_f64());

    let t2 = Instant::now();
    info!(
        "Determining {:?} distances for {} combinations",
        metric,
        names.len() * (names.len() - 1) / 2
    );
    let mat = pairwise_matrix(&snaps, metric);
    info!("Determining distances {:.3}s", t2.elapsed().as_secs_f64());

    write_or_exit(&args.output, names, &mat);
}

fn run_patristic(args: &Args, names: &[String], trees: &[Tree]) {
    let weighted = args.metric == MetricArg::Patristic;

    let t1 = Instant::now();
    let matrices = match trees
        .par_iter()
        .map(PhylogeneticDistanceMatrix::from_tree)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(m) => m,
        Err(e) => {
            error!("Failed to build distance matrices: {e}");
            process::exit(3);
        }
    };
    info!("Building distance matrices {:.3}s", t1.elapsed().as_secs_f64());

    let (labels, mat) = match mean_distance_table(&matrices, weighted) {
        Ok(table) => table,
        Err(e) => {
            error!("Trees do not share their taxa: {e}");
            process::exit(3);
        }
    };
    write_or_exit(&args.output, &labels, &mat);

    let (Some(community), Some(stats_output)) = (&args.community, &args.stats_output) else {
        return;
    };
    let table = match read_community_table(community) {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to read community table {:?}: {e}", community);
            process::exit(2);
        }
    };
    let options = DistanceOptions {
        weighted,
        normalize_by_tree_size: args.normalize,
    };

    let t2 = Instant::now();
    let mut rows = Vec::new();
    for (name, matrix) in names.iter().zip(&matrices) {
        match community_statistics(matrix, &table, options) {
            Ok(stats) => rows.extend(stats.into_iter().map(|s| (name.clone(), s))),
            Err(e) => {
                error!("Failed to compute community statistics for {name}: {e}");
                process::exit(3);
            }
        }
    }
    info!(
        "Community statistics for {} samples {:.3}s",
        table.samples.len(),
        t2.elapsed().as_secs_f64()
    );

    if let Err(e) = write_stats_tsv(stats_output, &rows) {
        error!("Failed to write output {:?}: {e}", stats_output);
        process::exit(4);
    }
}

/// `RUST_LOG` when set, `info` otherwise; `--quiet` always means `warn`.
fn log_directives(quiet: bool, rust_log: Option<String>) -> String {
    if quiet {
        return "warn".to_string();
    }
    rust_log
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

fn write_or_exit(output: &Path, names: &[String], mat: &[Vec<f64>]) {
    let t = Instant::now();
    if let Err(e) = write_matrix_tsv(output, names, mat) {
        error!("Failed to write output {:?}: {e}", output);
        process::exit(4);
    }
    info!("Writing to output {:.3}s", t.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directives() {
        assert_eq!(log_directives(false, None), "info");
        assert_eq!(log_directives(false, Some("debug".to_string())), "debug");
        assert_eq!(log_directives(false, Some("  ".to_string())), "info");
        assert_eq!(log_directives(true, Some("debug".to_string())), "warn");
    }
}
