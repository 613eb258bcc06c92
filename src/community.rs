//! Community tables and per-sample phylogenetic diversity statistics.
//!
//! A community table is TSV with one header row and one row per sample:
//!
//! ```text
//! sample  A  B  C
//! s1      1  0  2
//! s2      0  3  1
//! ```
//!
//! A taxon is present in a sample when its abundance is positive.

use std::collections::HashSet;

use rayon::prelude::*;
use tracing::warn;

use crate::distance_matrix::{DistanceOptions, PhylogeneticDistanceMatrix};
use crate::error::{PhyloError, Result};
use crate::taxon::Taxon;

#[derive(Debug, Clone, PartialEq)]
pub struct CommunityTable {
    pub samples: Vec<String>,
    pub taxa: Vec<String>,
    /// `abundances[sample][taxon]`
    pub abundances: Vec<Vec<f64>>,
}

/// MPD / MNTD of one sample. `None` when fewer than two of its taxa are in
/// the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunityStats {
    pub sample: String,
    pub num_taxa: usize,
    pub mpd: Option<f64>,
    pub mntd: Option<f64>,
}

impl CommunityTable {
    /// Parses tab-separated text. Blank lines are ignored; every row must
    /// have as many cells as the header and abundances must be
    /// non-negative numbers.
    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let (_, header) = lines
            .next()
            .ok_or_else(|| PhyloError::InvalidTable("missing header row".to_string()))?;
        let taxa: Vec<String> = header
            .split('\t')
            .skip(1)
            .map(|s| s.trim().to_string())
            .collect();
        if taxa.is_empty() {
            return Err(PhyloError::InvalidTable(
                "header has no taxon columns".to_string(),
            ));
        }

        let mut samples = Vec::new();
        let mut abundances = Vec::new();
        for (line_no, line) in lines {
            let cells: Vec<&str> = line.split('\t').map(str::trim).collect();
            if cells.len() != taxa.len() + 1 {
                return Err(PhyloError::InvalidTable(format!(
                    "line {} has {} cells, expected {}",
                    line_no + 1,
                    cells.len(),
                    taxa.len() + 1
                )));
            }
            let row = cells[1..]
                .iter()
                .map(|cell| match cell.parse::<f64>() {
                    Ok(v) if v >= 0.0 => Ok(v),
                    _ => Err(PhyloError::InvalidTable(format!(
                        "line {}: '{}' is not a non-negative abundance",
                        line_no + 1,
                        cell
                    ))),
                })
                .collect::<Result<Vec<f64>>>()?;
            samples.push(cells[0].to_string());
            abundances.push(row);
        }

        Ok(CommunityTable {
            samples,
            taxa,
            abundances,
        })
    }

    /// Labels of the taxa present in sample `sample`.
    pub fn present_labels(&self, sample: usize) -> HashSet<&str> {
        self.taxa
            .iter()
            .zip(&self.abundances[sample])
            .filter(|(_, abundance)| **abundance > 0.0)
            .map(|(label, _)| label.as_str())
            .collect()
    }
}

fn undefined_when_insufficient(value: Result<f64>) -> Result<Option<f64>> {
    match value {
        Ok(v) => Ok(Some(v)),
        Err(PhyloError::InsufficientTaxa(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// MPD and MNTD of every sample of `table` over the taxa of `matrix`,
/// computed in parallel across samples. Taxa of the table that are not
/// leaves of the tree are ignored with a warning.
pub fn community_statistics(
    matrix: &PhylogeneticDistanceMatrix,
    table: &CommunityTable,
    options: DistanceOptions,
) -> Result<Vec<CommunityStats>> {
    let known: HashSet<&str> = matrix.mapped_taxa().iter().map(Taxon::label).collect();
    for label in table.taxa.iter().filter(|l| !known.contains(l.as_str())) {
        warn!(taxon = %label, "community taxon is not in the tree");
    }

    (0..table.samples.len())
        .into_par_iter()
        .map(|sample| {
            let present = table.present_labels(sample);
            let in_sample = |t: &Taxon| present.contains(t.label());
            let num_taxa = matrix.mapped_taxa().iter().filter(|t| in_sample(t)).count();
            Ok(CommunityStats {
                sample: table.samples[sample].clone(),
                num_taxa,
                mpd: undefined_when_insufficient(
                    matrix.mean_pairwise_distance_with(in_sample, options),
                )?,
                mntd: undefined_when_insufficient(
                    matrix.mean_nearest_taxon_distance_with(in_sample, options),
                )?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tree_from_newick;
    use crate::taxon::TaxonNamespace;
    use crate::tree::test_support::six_taxon_tree;

    const TABLE: &str = "sample\ta\tb\tc\td\tz\n\
                         s1\t1\t1\t0\t2\t0\n\
                         s2\t0\t0\t0\t1\t5\n\
                         \n\
                         s3\t1\t1\t1\t1\t0\n";

    #[test]
    fn test_parse() {
        let table = CommunityTable::parse(TABLE).unwrap();
        assert_eq!(table.samples, vec!["s1", "s2", "s3"]);
        assert_eq!(table.taxa, vec!["a", "b", "c", "d", "z"]);
        assert_eq!(table.abundances[0], vec![1.0, 1.0, 0.0, 2.0, 0.0]);

        let present = table.present_labels(1);
        assert_eq!(present, HashSet::from(["d", "z"]));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            CommunityTable::parse(""),
            Err(PhyloError::InvalidTable(_))
        ));
        assert!(matches!(
            CommunityTable::parse("sample\n"),
            Err(PhyloError::InvalidTable(_))
        ));
        assert!(matches!(
            CommunityTable::parse("sample\ta\tb\ns1\t1\n"),
            Err(PhyloError::InvalidTable(_))
        ));
        assert!(matches!(
            CommunityTable::parse("sample\ta\ns1\t-1\n"),
            Err(PhyloError::InvalidTable(_))
        ));
        assert!(matches!(
            CommunityTable::parse("sample\ta\ns1\tmany\n"),
            Err(PhyloError::InvalidTable(_))
        ));
    }

    #[test]
    fn test_community_statistics() {
        let (tree, _) = six_taxon_tree();
        let pdm = tree.phylogenetic_distance_matrix().unwrap();
        let table = CommunityTable::parse(TABLE).unwrap();
        let stats = community_statistics(&pdm, &table, DistanceOptions::default()).unwrap();

        assert_eq!(stats.len(), 3);

        // {a, b, d}: a-b 2, a-d 6, b-d 6
        assert_eq!(stats[0].num_taxa, 3);
        assert!((stats[0].mpd.unwrap() - 14.0 / 3.0).abs() < 1e-12);
        assert!((stats[0].mntd.unwrap() - 10.0 / 3.0).abs() < 1e-12);

        // only d is in the tree
        assert_eq!(stats[1].num_taxa, 1);
        assert_eq!(stats[1].mpd, None);
        assert_eq!(stats[1].mntd, None);

        // {a, b, c, d}: pairs 2, 4, 6, 4, 6, 6
        assert!((stats[2].mpd.unwrap() - 28.0 / 6.0).abs() < 1e-12);
        assert!((stats[2].mntd.unwrap() - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_community_statistics_unweighted() {
        let (tree, _) = six_taxon_tree();
        let pdm = tree.phylogenetic_distance_matrix().unwrap();
        let table = CommunityTable::parse("sample\ta\tc\ns1\t1\t1\n").unwrap();
        let options = DistanceOptions {
            weighted: false,
            normalize_by_tree_size: false,
        };
        let stats = community_statistics(&pdm, &table, options).unwrap();
        assert_eq!(stats[0].mpd, Some(3.0));
        assert_eq!(stats[0].mntd, Some(3.0));
    }

    #[test]
    fn test_community_statistics_five_samples() {
        let ns = TaxonNamespace::shared();
        let tree = tree_from_newick(
            "((a:0.1,b:0.25):0.3,(c:0.45,(d:0.05,e:0.125):0.2):0.15);",
            &ns,
        )
        .unwrap();
        let pdm = tree.phylogenetic_distance_matrix().unwrap();
        let table = CommunityTable::parse(
            "sample\ta\tb\tc\td\te\n\
             C1\t3\t1\t2\t1\t4\n\
             C2\t1\t0\t5\t0\t2\n\
             C3\t0\t2\t0\t1\t0\n\
             C4\t0\t0\t7\t0\t0\n\
             C5\t1\t1\t0\t0\t1\n",
        )
        .unwrap();
        let stats = community_statistics(&pdm, &table, DistanceOptions::default()).unwrap();

        let expected = [
            (Some(0.78), Some(0.35)),
            (Some(2.65 / 3.0), Some(2.425 / 3.0)),
            (Some(0.95), Some(0.95)),
            (None, None),
            (Some(0.75), Some(0.525)),
        ];
        let close = |got: Option<f64>, want: Option<f64>| match (got, want) {
            (Some(g), Some(w)) => (g - w).abs() < 1e-6,
            (None, None) => true,
            _ => false,
        };
        for (s, (mpd, mntd)) in stats.iter().zip(expected) {
            assert!(close(s.mpd, mpd), "{}: mpd {:?} vs {:?}", s.sample, s.mpd, mpd);
            assert!(close(s.mntd, mntd), "{}: mntd {:?} vs {:?}", s.sample, s.mntd, mntd);
        }
    }
}
